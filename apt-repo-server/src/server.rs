// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Lifecycle supervisor: starts the repository service and the HTTP transport, blocks until
shutdown, then stops both in reverse order. */

use crate::config::AppConfig;
use crate::directory::DirectoryService;
use crate::error::{Result, ServerError};
use crate::service::RepositoryService;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::info;

pub struct Server {
    config: Arc<AppConfig>,
    repository_service: Arc<RepositoryService>,
    directory_service: Arc<DirectoryService>,
    shutdown: Arc<Notify>,
}

impl Server {
    pub fn new(
        config: Arc<AppConfig>,
        repository_service: Arc<RepositoryService>,
        directory_service: Arc<DirectoryService>,
    ) -> Self {
        Self {
            config,
            repository_service,
            directory_service,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Start the repository service (which starts the watcher) and the HTTP transport — one
    /// listener per configured `http.listen_addrs` entry, all serving the same router — then
    /// block until a shutdown signal (Ctrl+C or [Server::shutdown]) arrives.
    pub async fn run(&self) -> Result<()> {
        self.repository_service.start().await?;

        if self.config.http.listen_addrs.is_empty() {
            return Err(ServerError::Configuration(
                "http.listen_addrs is empty".into(),
            ));
        }

        let router = self.directory_service.router();
        let mut listeners = Vec::with_capacity(self.config.http.listen_addrs.len());
        for addr in &self.config.http.listen_addrs {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| ServerError::Http(format!("failed to bind {addr}: {source}")))?;
            info!(%addr, "listening");
            listeners.push(listener);
        }

        let mut tasks = tokio::task::JoinSet::new();
        for listener in listeners {
            let router = router.clone();
            let shutdown = self.shutdown.clone();
            tasks.spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        tokio::select! {
                            _ = shutdown.notified() => {}
                            _ = tokio::signal::ctrl_c() => {}
                        }
                    })
                    .await
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(ServerError::Http(format!("HTTP server error: {e}"))),
                Err(e) => {
                    return Err(ServerError::Http(format!(
                        "HTTP listener task panicked: {e}"
                    )))
                }
            }
        }

        self.repository_service.stop();
        info!("shutdown complete");
        Ok(())
    }

    /// Wake [Server::run] and let it unwind; stops services in reverse start order.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
