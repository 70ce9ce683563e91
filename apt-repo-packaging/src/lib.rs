// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository metadata and PGP signing primitives.

This crate implements the parts of the APT repository format that an automated repository
server needs to produce: content digests for indices files, the `Release` manifest that ties
a distribution's indices together, and the clear-sign/detached-sign PGP operations that make
a `Release` manifest trusted by `apt`.

It deliberately does not implement `.deb` reading/writing, control file parsing, or dependency
resolution — those concerns belong to package producers and clients, not to the repository
server this crate backs.
*/

pub mod checksums;
pub mod error;
pub mod release;
pub mod signing;

pub use checksums::Checksums;
pub use error::{PackagingError, Result, SigningOperation};
pub use release::{IndexFileEntry, ReleaseContext};
pub use signing::SigningKeys;
