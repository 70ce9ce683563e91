// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// The `operation` a [PackagingError::Signing] failed during, mirroring the
/// `{Import, Sign, Verify}` taxonomy of the GPG-backed reference implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningOperation {
    Import,
    Sign,
    Verify,
}

impl std::fmt::Display for SigningOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Import => "Import",
            Self::Sign => "Sign",
            Self::Verify => "Verify",
        };
        f.write_str(s)
    }
}

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("{operation} failed: {detail}")]
    Signing {
        operation: SigningOperation,
        detail: String,
    },

    #[error("configured private key id {configured} does not match imported key fingerprint {actual}")]
    SigningKeyMismatch { configured: String, actual: String },

    #[error("template rendering error: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("template registration error: {0}")]
    TemplateRegistration(#[from] handlebars::TemplateError),

    #[error("index entry path unexpectedly has spaces: {0}")]
    ReleasePathWithSpaces(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, PackagingError>;
