// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content digesting for repository index files.

Every `Packages`/`Packages.gz` file written into a repository gets an md5, sha1, and sha256
digest plus its byte length recorded in the distribution's `Release` manifest. This module
computes all three digests in a single pass over the content.
*/

use digest::Digest;

/// The three digests (plus size) the Release manifest records for each index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksums {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub size: u64,
}

impl Checksums {
    /// Compute all three digests of `data` in one pass.
    pub fn compute(data: &[u8]) -> Self {
        Self {
            md5: hex::encode(md5::Md5::digest(data)),
            sha1: hex::encode(sha1::Sha1::digest(data)),
            sha256: hex::encode(sha2::Sha256::digest(data)),
            size: data.len() as u64,
        }
    }
}
