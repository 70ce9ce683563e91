// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Regenerates the on-disk repository layout for a single distribution.

`create(d)` shells out to `dpkg-scanpackages` once per (component, architecture) pair, writes
the resulting `Packages`/`Packages.gz` to disk and into the cache write-side, then renders the
`Release` manifest from their checksums. `dpkg-scanpackages` is invoked with an explicit
`Command::current_dir`, not a process-wide `chdir`, so distinct distributions could in
principle scan concurrently; [crate::service] still serializes rebuilds via the per-distribution
cache lock plus a single shared creator lock, because a process-wide cwd is not the only thing
worth serializing when sharing one `dpkg-scanpackages` subprocess slot.
*/

use crate::cache::CacheGuard;
use crate::config::AppConfig;
use crate::error::{Result, ServerError};
use apt_repo_packaging::{Checksums, IndexFileEntry, ReleaseContext};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// Regenerates `Packages`/`Packages.gz`/`Release` for a distribution.
#[async_trait]
pub trait RepositoryCreator: Send + Sync {
    /// Ensure `<repo>` and its `pool` symlink exist; ensure `<pkgroot>` exists. Called once at
    /// startup.
    async fn initialize(&self) -> Result<()>;

    /// Regenerate the repository layout for `distribution`, writing outputs to disk and into
    /// `guard`'s write-side. Returns the rendered (unsigned) `Release` manifest contents.
    async fn create(&self, distribution: &str, guard: &mut CacheGuard) -> Result<String>;
}

/// Production [RepositoryCreator], invoking the real `dpkg-scanpackages` binary.
pub struct DpkgRepositoryCreator {
    config: Arc<AppConfig>,
}

impl DpkgRepositoryCreator {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RepositoryCreator for DpkgRepositoryCreator {
    async fn initialize(&self) -> Result<()> {
        initialize_layout(&self.config).await
    }

    async fn create(&self, distribution: &str, guard: &mut CacheGuard) -> Result<String> {
        create_repository(&self.config, distribution, guard, &run_dpkg_scanpackages).await
    }
}

async fn initialize_layout(config: &AppConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.repo)
        .await
        .map_err(|source| ServerError::Io {
            path: config.repo.clone(),
            source,
        })?;
    tokio::fs::create_dir_all(&config.pkgroot)
        .await
        .map_err(|source| ServerError::Io {
            path: config.pkgroot.clone(),
            source,
        })?;

    let pool_link = config.repo.join("pool");
    match tokio::fs::symlink_metadata(&pool_link).await {
        Ok(_) => {
            tokio::fs::remove_file(&pool_link).await.or_else(|_| {
                std::fs::remove_dir_all(&pool_link)
            }).map_err(|source| ServerError::Io {
                path: pool_link.clone(),
                source,
            })?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ServerError::Io {
                path: pool_link.clone(),
                source,
            })
        }
    }

    #[cfg(unix)]
    tokio::fs::symlink(&config.pkgroot, &pool_link)
        .await
        .map_err(|source| ServerError::Io {
            path: pool_link.clone(),
            source,
        })?;

    info!(repo = %config.repo.display(), pool = %pool_link.display(), "repository layout initialized");
    Ok(())
}

fn run_dpkg_scanpackages(
    cwd: &Path,
    component: &str,
    architecture: &str,
    distribution: &str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>>> + Send>> {
    let cwd = cwd.to_path_buf();
    let component = component.to_string();
    let architecture = architecture.to_string();
    let distribution = distribution.to_string();
    Box::pin(async move {
        let package_dir = PathBuf::from("pool").join(&distribution).join(&component);
        let output = Command::new("dpkg-scanpackages")
            .current_dir(&cwd)
            .arg("--multiversion")
            .arg("--arch")
            .arg(&architecture)
            .arg(&package_dir)
            .output()
            .await
            .map_err(|source| ServerError::Io {
                path: cwd.join(&package_dir),
                source,
            })?;

        if !output.status.success() {
            return Err(ServerError::ScanPackagesFailed {
                distribution,
                architecture,
                status: output.status,
            });
        }

        Ok(output.stdout)
    })
}

type ScanFn<'a> = dyn Fn(&Path, &str, &str, &str) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>>> + Send>>
    + Send
    + Sync
    + 'a;

async fn create_repository(
    config: &AppConfig,
    distribution: &str,
    guard: &mut CacheGuard,
    scan: &ScanFn<'_>,
) -> Result<String> {
    let dists_dir = config.repo.join("dists").join(distribution);
    let mut entries = Vec::new();

    for component in &config.components {
        let mut architectures = config.all_architectures();
        architectures.sort();

        for architecture in &architectures {
            let binary_dir = dists_dir.join(component).join(format!("binary-{architecture}"));
            tokio::fs::create_dir_all(&binary_dir)
                .await
                .map_err(|source| ServerError::Io {
                    path: binary_dir.clone(),
                    source,
                })?;

            let packages_bytes = scan(&config.repo, component, architecture, distribution).await?;

            let packages_path = binary_dir.join("Packages");
            tokio::fs::write(&packages_path, &packages_bytes)
                .await
                .map_err(|source| ServerError::Io {
                    path: packages_path.clone(),
                    source,
                })?;
            guard.store(packages_path.clone(), packages_bytes.clone());

            let gz_bytes = gzip(&packages_bytes)?;
            let gz_path = binary_dir.join("Packages.gz");
            tokio::fs::write(&gz_path, &gz_bytes)
                .await
                .map_err(|source| ServerError::Io {
                    path: gz_path.clone(),
                    source,
                })?;
            guard.store(gz_path.clone(), gz_bytes.clone());

            for (path, bytes) in [(&packages_path, &packages_bytes), (&gz_path, &gz_bytes)] {
                let relative_path = path
                    .strip_prefix(&dists_dir)
                    .expect("index path is under dists_dir")
                    .to_string_lossy()
                    .replace('\\', "/");
                if relative_path.contains(' ') {
                    return Err(ServerError::Packaging(
                        apt_repo_packaging::PackagingError::ReleasePathWithSpaces(relative_path),
                    ));
                }
                entries.push(IndexFileEntry {
                    checksums: Checksums::compute(bytes),
                    relative_path,
                });
            }
        }
    }

    let release = ReleaseContext {
        origin: config.application_name.clone(),
        label: config.application_name.clone(),
        version: config.application_version.clone(),
        codename: distribution.to_string(),
        architectures: config.all_architectures(),
        components: config.components.clone(),
        entries,
    };

    let template = match &config.release_template_path {
        Some(path) => Some(tokio::fs::read_to_string(path).await.map_err(|source| {
            ServerError::Io {
                path: path.clone(),
                source,
            }
        })?),
        None => None,
    };
    let rendered = release.render(template.as_deref())?;

    let release_path = dists_dir.join("Release");
    tokio::fs::write(&release_path, rendered.as_bytes())
        .await
        .map_err(|source| ServerError::Io {
            path: release_path.clone(),
            source,
        })?;
    guard.store(release_path, rendered.clone().into_bytes());

    Ok(rendered)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|source| ServerError::Io {
        path: PathBuf::from("<in-memory gzip buffer>"),
        source,
    })?;
    encoder.finish().map_err(|source| ServerError::Io {
        path: PathBuf::from("<in-memory gzip buffer>"),
        source,
    })
}
