// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Shared test fixtures: a minimal [AppConfig], and test doubles that let the end-to-end
pipeline run without `dpkg-scanpackages` or a real signing key. */

use crate::cache::CacheGuard;
use crate::config::{AppConfig, AuthConfig, HttpConfig, SigningConfig};
use crate::error::Result;
use crate::signer::RepositorySigner;
use async_trait::async_trait;
use std::path::PathBuf;

/// A minimal, valid [AppConfig] rooted at `repo`/`pkgroot`, with one distribution ("trixie"),
/// one component ("main"), and one architecture ("amd64").
pub fn minimal_config(repo: PathBuf, pkgroot: PathBuf) -> AppConfig {
    AppConfig {
        pkgroot,
        repo,
        distributions: vec!["trixie".to_string()],
        components: vec!["main".to_string()],
        architectures: vec!["amd64".to_string()],
        trigger_delay_seconds: 0.02,
        application_name: "apt-repo-server".to_string(),
        application_version: "1.0".to_string(),
        release_template_path: None,
        directory_template_path: None,
        signing: SigningConfig {
            private_key_id: "TESTKEY".to_string(),
            private_key_path: PathBuf::from("/dev/null"),
            private_key_passphrase: String::new(),
            public_key_path: PathBuf::from("/dev/null"),
            public_name: "repo.gpg.key".to_string(),
        },
        http: HttpConfig {
            listen_addrs: vec!["127.0.0.1:0".to_string()],
            url_scheme: "http".to_string(),
            url_prefix: String::new(),
        },
        auth: AuthConfig::default(),
    }
}

/// A [RepositorySigner] that skips real OpenPGP entirely: `sign` leaves the `Release` contents
/// unamended and re-stores them into the cache write-side under the same `dists/<d>/Release`
/// path the creator already wrote, mirroring what a real signer does to its (amended) content —
/// for tests exercising the pipeline without a key.
pub struct PassthroughSigner {
    repo: PathBuf,
}

impl PassthroughSigner {
    pub fn new(repo: PathBuf) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl RepositorySigner for PassthroughSigner {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn sign(
        &self,
        distribution: &str,
        release_contents: &str,
        guard: &mut CacheGuard,
    ) -> Result<String> {
        let release_path = self.repo.join("dists").join(distribution).join("Release");
        guard.store(release_path, release_contents.as_bytes().to_vec());
        Ok(release_contents.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryRepositoryCache, RepositoryCache};
    use crate::creator::fake::StubRepositoryCreator;
    use crate::service::RepositoryService;
    use crate::watcher::fake::FakePackageWatcher;
    use std::sync::Arc;

    /// End-to-end: package event → debounced rebuild → Release visible through the cache.
    #[tokio::test]
    async fn package_change_rebuilds_and_publishes_release() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(minimal_config(
            dir.path().join("repo"),
            dir.path().join("pkgroot"),
        ));

        let watcher = Arc::new(FakePackageWatcher::new());
        let cache: Arc<dyn RepositoryCache> = Arc::new(InMemoryRepositoryCache::new());
        let creator = Arc::new(StubRepositoryCreator::new(
            config.clone(),
            b"Package: hello\nVersion: 1.0\n\n".to_vec(),
        ));
        let signer = Arc::new(PassthroughSigner::new(config.repo.clone()));

        let service = RepositoryService::new(config.clone(), watcher.clone(), cache.clone(), creator, signer);
        service.start().await.unwrap();

        watcher.fire("trixie");
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let release_path = config.repo.join("dists/trixie/Release");
        let release = cache.load("trixie", &release_path).await;
        assert!(release.is_some());
        assert!(String::from_utf8(release.unwrap()).unwrap().contains("Codename: trixie"));
    }

    /// A burst of events within the debounce window produces exactly one rebuild beyond the
    /// initial synchronous one `start()` already ran.
    #[tokio::test]
    async fn burst_within_debounce_window_yields_single_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(minimal_config(
            dir.path().join("repo"),
            dir.path().join("pkgroot"),
        ));

        let watcher = Arc::new(FakePackageWatcher::new());
        let cache: Arc<dyn RepositoryCache> = Arc::new(InMemoryRepositoryCache::new());
        let creator = Arc::new(StubRepositoryCreator::new(
            config.clone(),
            b"Package: hello\n\n".to_vec(),
        ));
        let signer = Arc::new(PassthroughSigner::new(config.repo.clone()));

        let service = RepositoryService::new(config.clone(), watcher.clone(), cache.clone(), creator, signer);
        service.start().await.unwrap();

        for _ in 0..5 {
            watcher.fire("trixie");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        let release_path = config.repo.join("dists/trixie/Release");
        assert!(cache.load("trixie", &release_path).await.is_some());
    }
}
