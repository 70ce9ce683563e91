// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Process-wide error taxonomy. */

use apt_repo_packaging::PackagingError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type. Every fallible public operation in this crate returns this type (or a
/// `Result` alias of it); `main` maps it to a process exit code.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Packaging(#[from] PackagingError),

    #[error("dpkg-scanpackages exited with status {status} for distribution {distribution:?}, architecture {architecture:?}")]
    ScanPackagesFailed {
        distribution: String,
        architecture: String,
        status: std::process::ExitStatus,
    },

    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("unknown distribution {0:?}")]
    UnknownDistribution(String),

    #[error("HTTP transport error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
