// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Self-contained APT repository server: watches `pkgroot` for `.deb` changes, rebuilds and
//! signs the repository metadata for the affected distribution, and serves the result over
//! HTTP with an HTML directory browser.

mod cache;
mod config;
mod creator;
mod directory;
mod error;
mod server;
mod service;
mod signer;
mod timer;
mod watcher;

#[cfg(test)]
mod testutil;

use clap::Parser;
use config::{Args, AppConfig};
use creator::DpkgRepositoryCreator;
use directory::DirectoryService;
use error::ServerError;
use server::Server;
use service::RepositoryService;
use signer::PgpRepositorySigner;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use watcher::FsPackageWatcher;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apt_repo_server=info,apt_repo_packaging=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            exit_code_for(&e)
        }
    }
}

async fn run() -> Result<(), ServerError> {
    let args = Args::parse();
    let config = Arc::new(AppConfig::load(&args)?);

    let cache: Arc<dyn cache::RepositoryCache> = Arc::new(cache::InMemoryRepositoryCache::new());
    let creator: Arc<dyn creator::RepositoryCreator> =
        Arc::new(DpkgRepositoryCreator::new(config.clone()));
    let signer: Arc<dyn signer::RepositorySigner> =
        Arc::new(PgpRepositorySigner::new(config.clone()));
    let watcher: Arc<dyn watcher::PackageWatcher> =
        Arc::new(FsPackageWatcher::new(config.pkgroot.clone()));

    let repository_service = RepositoryService::new(
        config.clone(),
        watcher,
        cache.clone(),
        creator,
        signer,
    );
    let directory_service = DirectoryService::new(config.clone(), cache);

    let server = Server::new(config, repository_service, directory_service);
    server.run().await
}

/// Maps a startup/runtime error to a process exit code: configuration/signing-key problems are
/// operator-actionable misconfiguration, everything else is an unexpected runtime failure.
fn exit_code_for(error: &ServerError) -> ExitCode {
    match error {
        ServerError::Configuration(_) | ServerError::Packaging(_) => ExitCode::from(2),
        ServerError::Io { .. } => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}
