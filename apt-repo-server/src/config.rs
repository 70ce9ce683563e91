// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Runtime configuration: TOML file, with CLI flags and environment variables overriding it.

Precedence, highest first: CLI flag > environment variable > TOML file > built-in default.
*/

use crate::error::{Result, ServerError};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Command-line arguments for `apt-repo-server`.
#[derive(Parser, Debug)]
#[command(name = "apt-repo-server")]
#[command(about = "Self-contained APT repository server: watch, rebuild, sign, serve")]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "apt-repo-server.toml")]
    pub config: PathBuf,

    /// Override the HTTP listen address (`host:port`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Override the incoming package root directory.
    #[arg(long)]
    pub pkgroot: Option<PathBuf>,

    /// Override the published repository directory.
    #[arg(long)]
    pub repo: Option<PathBuf>,

    /// Override the per-distribution debounce delay, in seconds.
    #[arg(long)]
    pub trigger_delay_seconds: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct SigningFile {
    private_key_id: String,
    private_key_path: PathBuf,
    #[serde(default)]
    private_key_passphrase_env: Option<String>,
    public_key_path: PathBuf,
    public_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct HttpFile {
    listen_addrs: Vec<String>,
    #[serde(default = "default_url_scheme")]
    url_scheme: String,
    #[serde(default)]
    url_prefix: String,
}

fn default_url_scheme() -> String {
    "http".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AuthFile {
    #[serde(default)]
    basic_user: Option<String>,
    #[serde(default)]
    basic_password_env: Option<String>,
    #[serde(default)]
    private_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    pkgroot: PathBuf,
    repo: PathBuf,
    distributions: Vec<String>,
    components: Vec<String>,
    architectures: Vec<String>,
    #[serde(default = "default_trigger_delay")]
    trigger_delay_seconds: f64,
    #[serde(default = "default_application_name")]
    application_name: String,
    #[serde(default = "default_application_version")]
    application_version: String,
    #[serde(default)]
    release_template_path: Option<PathBuf>,
    #[serde(default)]
    directory_template_path: Option<PathBuf>,
    signing: SigningFile,
    http: HttpFile,
    #[serde(default)]
    auth: AuthFile,
}

fn default_trigger_delay() -> f64 {
    2.0
}

fn default_application_name() -> String {
    "apt-repo-server".to_string()
}

fn default_application_version() -> String {
    "1.0".to_string()
}

/// Signing key locations and credentials, resolved from configuration.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub private_key_id: String,
    pub private_key_path: PathBuf,
    pub private_key_passphrase: String,
    pub public_key_path: PathBuf,
    pub public_name: String,
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub listen_addrs: Vec<String>,
    pub url_scheme: String,
    pub url_prefix: String,
}

/// Basic-auth configuration for private subtrees.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub basic_user: Option<String>,
    pub basic_password: Option<String>,
    pub private_dirs: Vec<PathBuf>,
}

/// Fully parsed, validated runtime configuration. Produced once at startup and shared
/// read-only (behind an `Arc`) by every component for the life of the process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pkgroot: PathBuf,
    pub repo: PathBuf,
    pub distributions: Vec<String>,
    pub components: Vec<String>,
    pub architectures: Vec<String>,
    pub trigger_delay_seconds: f64,
    pub application_name: String,
    pub application_version: String,
    pub release_template_path: Option<PathBuf>,
    pub directory_template_path: Option<PathBuf>,
    pub signing: SigningConfig,
    pub http: HttpConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from `args.config`, apply CLI overrides, and validate.
    pub fn load(args: &Args) -> Result<Self> {
        let contents = std::fs::read_to_string(&args.config).map_err(|source| ServerError::Io {
            path: args.config.clone(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&contents)
            .map_err(|e| ServerError::Configuration(format!("{}: {e}", args.config.display())))?;

        let private_key_passphrase = match &file.signing.private_key_passphrase_env {
            Some(var) => std::env::var(var).map_err(|_| {
                ServerError::Configuration(format!(
                    "signing.private_key_passphrase_env={var:?} is not set"
                ))
            })?,
            None => String::new(),
        };

        let basic_password = match &file.auth.basic_password_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                ServerError::Configuration(format!(
                    "auth.basic_password_env={var:?} is not set"
                ))
            })?),
            None => None,
        };

        let mut config = AppConfig {
            pkgroot: file.pkgroot,
            repo: file.repo,
            distributions: file.distributions,
            components: file.components,
            architectures: file.architectures,
            trigger_delay_seconds: file.trigger_delay_seconds,
            application_name: file.application_name,
            application_version: file.application_version,
            release_template_path: file.release_template_path,
            directory_template_path: file.directory_template_path,
            signing: SigningConfig {
                private_key_id: file.signing.private_key_id,
                private_key_path: file.signing.private_key_path,
                private_key_passphrase,
                public_key_path: file.signing.public_key_path,
                public_name: file.signing.public_name,
            },
            http: HttpConfig {
                listen_addrs: file.http.listen_addrs,
                url_scheme: file.http.url_scheme,
                url_prefix: file.http.url_prefix,
            },
            auth: AuthConfig {
                basic_user: file.auth.basic_user,
                basic_password,
                private_dirs: file.auth.private_dirs,
            },
        };

        if let Some(listen) = &args.listen {
            config.http.listen_addrs = vec![listen.clone()];
        }
        if let Some(pkgroot) = &args.pkgroot {
            config.pkgroot = pkgroot.clone();
        }
        if let Some(repo) = &args.repo {
            config.repo = repo.clone();
        }
        if let Some(delay) = args.trigger_delay_seconds {
            config.trigger_delay_seconds = delay;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.distributions.is_empty() {
            return Err(ServerError::Configuration(
                "distributions must not be empty".into(),
            ));
        }
        if self.components.is_empty() {
            return Err(ServerError::Configuration(
                "components must not be empty".into(),
            ));
        }
        if self.http.listen_addrs.is_empty() {
            return Err(ServerError::Configuration(
                "http.listen_addrs must not be empty".into(),
            ));
        }
        for private_dir in &self.auth.private_dirs {
            if !is_subpath(&self.repo, private_dir) {
                return Err(ServerError::Configuration(format!(
                    "auth.private_dirs entry {private_dir:?} is not a subpath of repo {:?}",
                    self.repo
                )));
            }
        }
        if !self.auth.private_dirs.is_empty()
            && (self.auth.basic_user.is_none() || self.auth.basic_password.is_none())
        {
            return Err(ServerError::Configuration(
                "auth.private_dirs configured without basic_user/basic_password_env".into(),
            ));
        }
        Ok(())
    }

    /// Every architecture a distribution is built for, including the implicit `all`, sorted.
    pub fn all_architectures(&self) -> Vec<String> {
        let mut archs: Vec<String> = std::iter::once("all".to_string())
            .chain(self.architectures.iter().cloned())
            .collect();
        archs.sort();
        archs.dedup();
        archs
    }
}

fn is_subpath(base: &Path, candidate: &Path) -> bool {
    candidate.starts_with(base)
}
