// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` file rendering.

A `Release` file is a control paragraph that describes a distribution: which architectures
and components it carries, when it was generated, and the checksums/sizes of every indices
file (`Packages`, `Packages.gz`, ...) it references. This module renders that paragraph from
a [ReleaseContext] using the same `handlebars` template engine this packaging ecosystem uses
elsewhere for code/config generation.
*/

use crate::{checksums::Checksums, error::Result};
use chrono::Utc;
use handlebars::Handlebars;

/// Formatter string for the `Date` field, matching the reference implementation
/// (`"%a, %d %b %Y %H:%M:%S UTC"`), which intentionally differs from the RFC 2822 `%z` form
/// some other Debian tooling emits.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S UTC";

const DEFAULT_RELEASE_TEMPLATE: &str = include_str!("templates/release.hbs");

/// One row of a checksum table (`MD5Sum:`/`SHA1:`/`SHA256:`) in a `Release` file: a single
/// space, the hex digest, the size, and the path relative to the distribution's `dists/<d>/`
/// directory.
#[derive(Debug, Clone)]
pub struct IndexFileEntry {
    pub checksums: Checksums,
    /// Path relative to `dists/<distribution>/`, e.g. `main/binary-amd64/Packages.gz`.
    pub relative_path: String,
}

impl IndexFileEntry {
    fn row(&self, digest: &str) -> String {
        format!(" {} {} {}", digest, self.checksums.size, self.relative_path)
    }
}

/// Everything needed to render a `Release` manifest for one distribution.
#[derive(Debug, Clone)]
pub struct ReleaseContext {
    pub origin: String,
    pub label: String,
    pub version: String,
    pub codename: String,
    /// Sorted, space-joined architecture list; always includes `all`.
    pub architectures: Vec<String>,
    /// Sorted, space-joined component list.
    pub components: Vec<String>,
    pub entries: Vec<IndexFileEntry>,
}

impl ReleaseContext {
    /// Render the `Release` file body.
    ///
    /// Uses an embedded default template unless `template` overrides it, mirroring the
    /// `release_template_path` configuration key of the reference implementation.
    pub fn render(&self, template: Option<&str>) -> Result<String> {
        let mut hb = Handlebars::new();
        hb.set_strict_mode(true);
        hb.register_template_string("release", template.unwrap_or(DEFAULT_RELEASE_TEMPLATE))?;

        let md5_checksums = self
            .entries
            .iter()
            .map(|e| e.row(&e.checksums.md5))
            .collect::<Vec<_>>()
            .join("\n");
        let sha1_checksums = self
            .entries
            .iter()
            .map(|e| e.row(&e.checksums.sha1))
            .collect::<Vec<_>>()
            .join("\n");
        let sha256_checksums = self
            .entries
            .iter()
            .map(|e| e.row(&e.checksums.sha256))
            .collect::<Vec<_>>()
            .join("\n");

        let context = serde_json::json!({
            "origin": self.origin,
            "label": self.label,
            "version": self.version,
            "codename": self.codename,
            "date": Utc::now().format(DATE_FORMAT).to_string(),
            "architectures": self.architectures.join(" "),
            "components": self.components.join(" "),
            "md5_checksums": md5_checksums,
            "sha1_checksums": sha1_checksums,
            "sha256_checksums": sha256_checksums,
        });

        Ok(hb.render("release", &context)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> ReleaseContext {
        ReleaseContext {
            origin: "apt-repo-server".into(),
            label: "apt-repo-server".into(),
            version: "1.0".into(),
            codename: "trixie".into(),
            architectures: vec!["all".into(), "amd64".into()],
            components: vec!["main".into()],
            entries: vec![IndexFileEntry {
                checksums: Checksums::compute(b"Package: hello\n"),
                relative_path: "main/binary-amd64/Packages".into(),
            }],
        }
    }

    #[test]
    fn renders_required_fields() {
        let rendered = sample_context().render(None).unwrap();
        assert!(rendered.contains("Codename: trixie"));
        assert!(rendered.contains("Architectures: all amd64"));
        assert!(rendered.contains("Components: main"));
        assert!(rendered.contains("SHA256:"));
        assert!(rendered.contains("main/binary-amd64/Packages"));
    }

    #[test]
    fn checksum_rows_are_space_prefixed() {
        let rendered = sample_context().render(None).unwrap();
        let sha256_line = rendered
            .lines()
            .find(|l| l.ends_with("main/binary-amd64/Packages"))
            .unwrap();
        assert!(sha256_line.starts_with(' '));
    }
}
