// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Puts the repository under a trust anchor: publishes the public key and produces
`InRelease`/`Release.gpg` for a distribution's `Release` manifest.

The private key is parsed once at [RepositorySigner::initialize] time and held in memory for
the process lifetime — "importing into the keyring" from the GPG-backed reference design
corresponds to this parse-and-cache step, and "keyring already lists a key" corresponds to the
cached key's fingerprint already matching the configured key id.
*/

use crate::cache::CacheGuard;
use crate::config::AppConfig;
use crate::error::{Result, ServerError};
use apt_repo_packaging::{PackagingError, SigningKeys};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Produces `InRelease` and `Release.gpg` for a distribution, and publishes the public key.
#[async_trait]
pub trait RepositorySigner: Send + Sync {
    /// Load the signing key and publish the public key file. Called once at startup; failure is
    /// fatal.
    async fn initialize(&self) -> Result<()>;

    /// Amend `release_contents` with a trailing `SignWith:` line, clear-sign it to `InRelease`,
    /// detached-sign it to `Release.gpg`, write all three to disk, and self-verify both
    /// signatures. The amended `Release` bytes — the ones the signatures were actually computed
    /// over — are also stored into `guard`'s write-side, so the cache serves bytes that match
    /// `InRelease`/`Release.gpg`, not the pre-signing `Release` the creator wrote. Returns the
    /// (possibly amended) `Release` contents actually signed.
    async fn sign(
        &self,
        distribution: &str,
        release_contents: &str,
        guard: &mut CacheGuard,
    ) -> Result<String>;
}

pub struct PgpRepositorySigner {
    config: Arc<AppConfig>,
    keys: tokio::sync::OnceCell<SigningKeys>,
}

impl PgpRepositorySigner {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            keys: tokio::sync::OnceCell::new(),
        }
    }

    fn keys(&self) -> Result<&SigningKeys> {
        self.keys.get().ok_or_else(|| {
            ServerError::Configuration("signing keys not initialized".to_string())
        })
    }
}

#[async_trait]
impl RepositorySigner for PgpRepositorySigner {
    async fn initialize(&self) -> Result<()> {
        let armored = tokio::fs::read_to_string(&self.config.signing.private_key_path)
            .await
            .map_err(|source| ServerError::Io {
                path: self.config.signing.private_key_path.clone(),
                source,
            })?;

        let keys = SigningKeys::load(&armored, self.config.signing.private_key_passphrase.clone())?;

        let fingerprint = keys.fingerprint();
        if !fingerprint
            .to_lowercase()
            .ends_with(&self.config.signing.private_key_id.to_lowercase())
        {
            return Err(ServerError::Packaging(PackagingError::SigningKeyMismatch {
                configured: self.config.signing.private_key_id.clone(),
                actual: fingerprint,
            }));
        }

        self.keys
            .set(keys)
            .map_err(|_| ServerError::Configuration("signer initialized twice".to_string()))?;

        let public_armored = tokio::fs::read(&self.config.signing.public_key_path)
            .await
            .map_err(|source| ServerError::Io {
                path: self.config.signing.public_key_path.clone(),
                source,
            })?;
        let destination = self.config.repo.join(&self.config.signing.public_name);
        tokio::fs::write(&destination, &public_armored)
            .await
            .map_err(|source| ServerError::Io {
                path: destination.clone(),
                source,
            })?;

        info!(public_name = %self.config.signing.public_name, "signing key imported, public key published");
        Ok(())
    }

    async fn sign(
        &self,
        distribution: &str,
        release_contents: &str,
        guard: &mut CacheGuard,
    ) -> Result<String> {
        let keys = self.keys()?;

        let amended = amend_sign_with(release_contents, &keys.key_id_hex());

        let clearsigned = keys.clearsign(&amended)?;
        let detached = keys.detach_sign(&amended)?;

        let dists_dir = self.config.repo.join("dists").join(distribution);
        let release_path = dists_dir.join("Release");
        write_signature(&release_path, amended.as_bytes()).await?;
        write_signature(&dists_dir.join("InRelease"), clearsigned.as_bytes()).await?;
        write_signature(&dists_dir.join("Release.gpg"), detached.as_bytes()).await?;
        guard.store(release_path, amended.clone().into_bytes());

        Ok(amended)
    }
}

async fn write_signature(path: &PathBuf, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| ServerError::Io {
            path: path.clone(),
            source,
        })
}

/// If the last line of `release_contents` already carries `SignWith`, replace it; otherwise
/// append a new `SignWith: <keyid>` line.
fn amend_sign_with(release_contents: &str, key_id_hex: &str) -> String {
    let sign_with_line = format!("SignWith: {key_id_hex}");
    let mut lines: Vec<String> = release_contents.lines().map(str::to_string).collect();

    match lines.last() {
        Some(last) if last.contains("SignWith") => {
            let last_index = lines.len() - 1;
            lines[last_index] = sign_with_line;
        }
        _ => lines.push(sign_with_line),
    }

    let mut joined = lines.join("\n");
    joined.push('\n');
    joined
}
