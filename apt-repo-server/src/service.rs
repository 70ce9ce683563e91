// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The event coordinator: per-distribution debounce, serialized rebuilds, and atomic publish.

`RepositoryService` is the only piece that ever calls `creator.create` + `signer.sign` +
`cache` together. Because `RepositoryCreator` changes the process cwd internally, at most one
`_update` may run globally at a time — enforced here by a single `creator_lock` held for the
duration of the pipeline, in addition to the per-distribution cache partition lock.
*/

use crate::cache::RepositoryCache;
use crate::config::AppConfig;
use crate::creator::RepositoryCreator;
use crate::signer::RepositorySigner;
use crate::timer::ReusableTimer;
use crate::watcher::PackageWatcher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// Drives the generate → sign → publish pipeline, per distribution, with debouncing and mutual
/// exclusion.
pub struct RepositoryService {
    config: Arc<AppConfig>,
    watcher: Arc<dyn PackageWatcher>,
    cache: Arc<dyn RepositoryCache>,
    creator: Arc<dyn RepositoryCreator>,
    signer: Arc<dyn RepositorySigner>,
    timers: std::sync::Mutex<HashMap<String, ReusableTimer>>,
    creator_lock: Arc<AsyncMutex<()>>,
}

impl RepositoryService {
    pub fn new(
        config: Arc<AppConfig>,
        watcher: Arc<dyn PackageWatcher>,
        cache: Arc<dyn RepositoryCache>,
        creator: Arc<dyn RepositoryCreator>,
        signer: Arc<dyn RepositorySigner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            watcher,
            cache,
            creator,
            signer,
            timers: std::sync::Mutex::new(HashMap::new()),
            creator_lock: Arc::new(AsyncMutex::new(())),
        })
    }

    /// Initialize the creator and signer, run one synchronous rebuild per configured
    /// distribution, then register with and start the watcher.
    pub async fn start(self: &Arc<Self>) -> crate::error::Result<()> {
        self.creator.initialize().await?;
        self.signer.initialize().await?;

        for distribution in self.config.distributions.clone() {
            if let Err(e) = self.update(&distribution).await {
                error!(distribution = %distribution, error = %e, "initial rebuild failed");
            }
        }

        let this = self.clone();
        self.watcher.register(Arc::new(move |distribution: &str| {
            this.handle_event(distribution);
        }));
        self.watcher.start().await?;

        Ok(())
    }

    /// Deregister from the watcher, stop it, and cancel outstanding debounce timers.
    pub fn stop(&self) {
        self.watcher.stop();
        let timers = self.timers.lock().expect("timers mutex poisoned");
        for timer in timers.values() {
            timer.cancel();
        }
    }

    /// Called on the watcher's dispatch path. Must return quickly: only timer state is touched
    /// here: the rebuild itself is scheduled, not run inline.
    pub fn handle_event(self: &Arc<Self>, distribution: &str) {
        if !self.config.distributions.iter().any(|d| d == distribution) {
            warn!(distribution, "ignoring event for unconfigured distribution");
            return;
        }

        let delay = Duration::from_secs_f64(self.config.trigger_delay_seconds.max(0.0));
        let timer = {
            let mut timers = self.timers.lock().expect("timers mutex poisoned");
            timers
                .entry(distribution.to_string())
                .or_insert_with(ReusableTimer::new)
                .clone()
        };

        let this = self.clone();
        let distribution = distribution.to_string();
        timer.reset(delay, move || async move {
            if let Err(e) = this.update(&distribution).await {
                error!(distribution = %distribution, error = %e, "rebuild failed");
            }
        });
    }

    /// Run one generate → sign → publish cycle for `distribution`.
    ///
    /// The per-distribution cache lock is held for the whole pipeline via [CacheGuard]'s RAII
    /// drop; the global `creator_lock` additionally serializes the cwd-mutating creator step
    /// across distributions. On any failure, [CacheGuard::discard] is called so the previous
    /// snapshot remains visible — a rebuild failure never corrupts what readers see.
    async fn update(&self, distribution: &str) -> crate::error::Result<()> {
        let _creator_permit = self.creator_lock.lock().await;
        let mut guard = self.cache.lock(distribution).await;

        let result = async {
            let release_contents = self.creator.create(distribution, &mut guard).await?;
            self.signer
                .sign(distribution, &release_contents, &mut guard)
                .await?;
            Ok::<(), crate::error::ServerError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(distribution, "rebuild completed");
                Ok(())
            }
            Err(e) => {
                guard.discard();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheGuard, InMemoryRepositoryCache};
    use crate::config::{AuthConfig, HttpConfig, SigningConfig};
    use crate::creator::fake::StubRepositoryCreator;
    use crate::watcher::fake::FakePackageWatcher;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(repo: PathBuf, pkgroot: PathBuf, delay: f64) -> AppConfig {
        AppConfig {
            pkgroot,
            repo,
            distributions: vec!["trixie".into(), "bookworm".into()],
            components: vec!["main".into()],
            architectures: vec!["amd64".into()],
            trigger_delay_seconds: delay,
            application_name: "apt-repo-server".into(),
            application_version: "1.0".into(),
            release_template_path: None,
            directory_template_path: None,
            signing: SigningConfig {
                private_key_id: "ABC".into(),
                private_key_path: PathBuf::from("/tmp/key.asc"),
                private_key_passphrase: String::new(),
                public_key_path: PathBuf::from("/tmp/key.pub.asc"),
                public_name: "repo.gpg.key".into(),
            },
            http: HttpConfig {
                listen_addrs: vec!["127.0.0.1:8080".into()],
                url_scheme: "http".into(),
                url_prefix: String::new(),
            },
            auth: AuthConfig::default(),
        }
    }

    struct CountingSigner {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RepositorySigner for CountingSigner {
        async fn initialize(&self) -> crate::error::Result<()> {
            Ok(())
        }

        async fn sign(
            &self,
            _distribution: &str,
            release_contents: &str,
            guard: &mut CacheGuard,
        ) -> crate::error::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            guard.store(
                PathBuf::from("unused-counting-signer-path"),
                release_contents.as_bytes().to_vec(),
            );
            Ok(release_contents.to_string())
        }
    }

    struct FailingSigner;

    #[async_trait]
    impl RepositorySigner for FailingSigner {
        async fn initialize(&self) -> crate::error::Result<()> {
            Ok(())
        }

        async fn sign(
            &self,
            _distribution: &str,
            _release_contents: &str,
            _guard: &mut CacheGuard,
        ) -> crate::error::Result<String> {
            Err(crate::error::ServerError::Configuration("boom".into()))
        }
    }

    /// Mimics the real signer's shape: amends content with a trailing line and stores the
    /// amended bytes back into the guard, instead of just echoing what the creator wrote.
    struct AmendingSigner {
        repo: PathBuf,
    }

    #[async_trait]
    impl RepositorySigner for AmendingSigner {
        async fn initialize(&self) -> crate::error::Result<()> {
            Ok(())
        }

        async fn sign(
            &self,
            distribution: &str,
            release_contents: &str,
            guard: &mut CacheGuard,
        ) -> crate::error::Result<String> {
            let amended = format!("{release_contents}SignWith: DEADBEEF\n");
            let release_path = self.repo.join("dists").join(distribution).join("Release");
            guard.store(release_path, amended.clone().into_bytes());
            Ok(amended)
        }
    }

    #[tokio::test]
    async fn signed_content_replaces_unsigned_content_in_cache() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let pkgroot = dir.path().join("pkgroot");
        let config = Arc::new(test_config(repo, pkgroot, 0.02));

        let watcher = Arc::new(FakePackageWatcher::new());
        let cache: Arc<dyn RepositoryCache> = Arc::new(InMemoryRepositoryCache::new());
        let creator: Arc<dyn RepositoryCreator> = Arc::new(StubRepositoryCreator::new(
            config.clone(),
            b"Package: hello\n\n".to_vec(),
        ));
        let signer: Arc<dyn RepositorySigner> = Arc::new(AmendingSigner {
            repo: config.repo.clone(),
        });

        let service = RepositoryService::new(config.clone(), watcher, cache.clone(), creator, signer);
        service.start().await.unwrap();

        let release_path = config.repo.join("dists/trixie/Release");
        let served = cache.load("trixie", &release_path).await.unwrap();
        let served = String::from_utf8(served).unwrap();
        assert!(
            served.contains("SignWith: DEADBEEF"),
            "cache must serve the signer's amended bytes, not the creator's pre-signing bytes: {served}"
        );
    }

    #[tokio::test]
    async fn burst_of_events_coalesces_into_one_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let pkgroot = dir.path().join("pkgroot");
        let config = Arc::new(test_config(repo, pkgroot, 0.05));

        let watcher = Arc::new(FakePackageWatcher::new());
        let cache: Arc<dyn RepositoryCache> = Arc::new(InMemoryRepositoryCache::new());
        let creator: Arc<dyn RepositoryCreator> = Arc::new(StubRepositoryCreator::new(
            config.clone(),
            b"Package: hello\n\n".to_vec(),
        ));
        let sign_calls = Arc::new(AtomicUsize::new(0));
        let signer: Arc<dyn RepositorySigner> = Arc::new(CountingSigner {
            calls: sign_calls.clone(),
        });

        let service = RepositoryService::new(
            config.clone(),
            watcher.clone(),
            cache,
            creator,
            signer,
        );
        service.start().await.unwrap();

        // `start()` ran one synchronous rebuild per distribution already.
        assert_eq!(sign_calls.load(Ordering::SeqCst), 2);

        for _ in 0..10 {
            watcher.fire("trixie");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sign_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unconfigured_distribution_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let pkgroot = dir.path().join("pkgroot");
        let config = Arc::new(test_config(repo, pkgroot, 0.02));

        let watcher = Arc::new(FakePackageWatcher::new());
        let cache: Arc<dyn RepositoryCache> = Arc::new(InMemoryRepositoryCache::new());
        let creator: Arc<dyn RepositoryCreator> = Arc::new(StubRepositoryCreator::new(
            config.clone(),
            b"Package: hello\n\n".to_vec(),
        ));
        let sign_calls = Arc::new(AtomicUsize::new(0));
        let signer: Arc<dyn RepositorySigner> = Arc::new(CountingSigner {
            calls: sign_calls.clone(),
        });

        let service = RepositoryService::new(config, watcher.clone(), cache, creator, signer);
        service.start().await.unwrap();
        let baseline = sign_calls.load(Ordering::SeqCst);

        watcher.fire("unknown-distribution");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sign_calls.load(Ordering::SeqCst), baseline);
    }

    #[tokio::test]
    async fn failed_sign_does_not_publish_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let pkgroot = dir.path().join("pkgroot");
        let config = Arc::new(test_config(repo, pkgroot, 0.02));

        let watcher = Arc::new(FakePackageWatcher::new());
        let cache: Arc<dyn RepositoryCache> = Arc::new(InMemoryRepositoryCache::new());
        let creator: Arc<dyn RepositoryCreator> = Arc::new(StubRepositoryCreator::new(
            config.clone(),
            b"Package: hello\n\n".to_vec(),
        ));
        let signer: Arc<dyn RepositorySigner> = Arc::new(FailingSigner);

        let service = RepositoryService::new(config.clone(), watcher, cache.clone(), creator, signer);
        // The initial rebuild in `start()` fails (FailingSigner always errors), but startup
        // itself must not fail: a rebuild failure is recoverable, not fatal.
        service.start().await.unwrap();

        let release_path = config.repo.join("dists/trixie/Release");
        assert_eq!(cache.load("trixie", &release_path).await, None);
    }
}
