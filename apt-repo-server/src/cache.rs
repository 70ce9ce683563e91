// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Per-distribution read/write cache overlay.

Each distribution has its own [tokio::sync::Mutex]-guarded partition holding a write-side map
(populated during a rebuild) and a read-side map (visible to HTTP readers). `lock` returns a
[CacheGuard] whose `Drop` always performs `swap`+`unlock`, so a rebuild that returns early via
`?` still leaves the partition lock released — only the *swap* is conditional, via
[CacheGuard::discard]. `store` only ever writes through an already-held guard, so it can never
contend with the lock it is nested inside.
*/

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

#[derive(Default)]
struct Partition {
    write_side: HashMap<PathBuf, Vec<u8>>,
    read_side: HashMap<PathBuf, Vec<u8>>,
}

/// Per-distribution overlay cache over the on-disk repository tree.
#[async_trait]
pub trait RepositoryCache: Send + Sync {
    /// Acquire the partition's exclusive lock for `distribution`, returning an RAII guard that
    /// swaps the write-side into the read-side and releases the lock on drop (unless
    /// [CacheGuard::discard] was called). Writes for the duration of the rebuild go through
    /// [CacheGuard::store].
    async fn lock(&self, distribution: &str) -> CacheGuard;

    /// Return bytes visible for `path` in `distribution`: read-side first, then disk (promoting
    /// a successful disk read into the read-side), else `None`.
    async fn load(&self, distribution: &str, path: &std::path::Path) -> Option<Vec<u8>>;
}

/// The production [RepositoryCache], backed by one [tokio::sync::Mutex]-guarded [Partition] per
/// distribution.
#[derive(Default)]
pub struct InMemoryRepositoryCache {
    partitions: std::sync::Mutex<HashMap<String, Arc<Mutex<Partition>>>>,
}

impl InMemoryRepositoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, distribution: &str) -> Arc<Mutex<Partition>> {
        let mut partitions = self.partitions.lock().expect("partitions mutex poisoned");
        partitions
            .entry(distribution.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Partition::default())))
            .clone()
    }
}

#[async_trait]
impl RepositoryCache for InMemoryRepositoryCache {
    async fn lock(&self, distribution: &str) -> CacheGuard {
        let partition = self.partition(distribution);
        let guard = partition.lock_owned().await;
        CacheGuard {
            distribution: distribution.to_string(),
            guard: Some(guard),
            discard: false,
        }
    }

    async fn load(&self, distribution: &str, path: &std::path::Path) -> Option<Vec<u8>> {
        let partition = self.partition(distribution);
        {
            let partition = partition.lock().await;
            if let Some(bytes) = partition.read_side.get(path) {
                return Some(bytes.clone());
            }
        }

        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let mut partition = partition.lock().await;
                partition.read_side.insert(path.to_path_buf(), bytes.clone());
                Some(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "disk read failed while servicing cache miss");
                None
            }
        }
    }
}

/// RAII handle returned by [RepositoryCache::lock]. On drop, swaps the write-side into the
/// read-side (unless [CacheGuard::discard] was called) and releases the partition lock — this
/// is the single mechanism that guarantees `clear`/`unlock` runs on every exit path from a
/// rebuild, including early returns via `?`.
pub struct CacheGuard {
    distribution: String,
    guard: Option<OwnedMutexGuard<Partition>>,
    discard: bool,
}

impl CacheGuard {
    /// Record `bytes` under `path` in this distribution's write-side.
    pub fn store(&mut self, path: PathBuf, bytes: Vec<u8>) {
        let partition = self.guard.as_mut().expect("guard dropped before store");
        partition.write_side.insert(path, bytes);
    }

    /// Mark this guard so that, on drop, the write-side is dropped without being swapped into
    /// the read-side — used when a rebuild fails partway through and the previous snapshot must
    /// remain visible.
    pub fn discard(&mut self) {
        self.discard = true;
    }

    pub fn distribution(&self) -> &str {
        &self.distribution
    }
}

impl Drop for CacheGuard {
    fn drop(&mut self) {
        if let Some(mut partition) = self.guard.take() {
            if !self.discard {
                partition.read_side = std::mem::take(&mut partition.write_side);
            } else {
                partition.write_side.clear();
            }
        }
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;

    /// An in-memory cache identical in behavior to [InMemoryRepositoryCache] but exposing no
    /// disk fallback, for tests that want to assert "cache miss" without a filesystem fixture.
    #[derive(Default)]
    pub struct NoDiskFallbackCache {
        partitions: std::sync::Mutex<HashMap<String, Arc<Mutex<Partition>>>>,
    }

    impl NoDiskFallbackCache {
        pub fn new() -> Self {
            Self::default()
        }

        fn partition(&self, distribution: &str) -> Arc<Mutex<Partition>> {
            let mut partitions = self.partitions.lock().expect("partitions mutex poisoned");
            partitions
                .entry(distribution.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Partition::default())))
                .clone()
        }
    }

    #[async_trait]
    impl RepositoryCache for NoDiskFallbackCache {
        async fn lock(&self, distribution: &str) -> CacheGuard {
            let partition = self.partition(distribution);
            let guard = partition.lock_owned().await;
            CacheGuard {
                distribution: distribution.to_string(),
                guard: Some(guard),
                discard: false,
            }
        }

        async fn load(&self, distribution: &str, path: &std::path::Path) -> Option<Vec<u8>> {
            let partition = self.partition(distribution);
            let partition = partition.lock().await;
            partition.read_side.get(path).cloned()
        }
    }
}
