//! `.pc` file content emission (§4.7 "pkg-config emission").
//!
//! Parsing pkg-config's own query syntax (`pkg-config --cflags foo`) is out
//! of scope (§1 Non-goals); this module only renders the handful of fields a
//! link target's pkg-config member (`TargetKind::PkgConfig`) needs to write
//! out once its own library closure is known.

use std::fmt::Write as _;

/// The content fields of a single `.pc` file (§3 "PkgConfig").
#[derive(Debug, Clone, Default)]
pub struct PkgConfigData {
    /// The `Name:` field.
    pub name: String,
    /// The `Description:` field.
    pub description: String,
    /// The `Version:` field.
    pub version: String,
    /// Other pkg-config packages this one `Requires:`, already
    /// space-joined by the caller (each a name, optionally with a version
    /// comparator).
    pub requires: Vec<String>,
    /// Private (static-link-only) requirements, emitted as
    /// `Requires.private:`.
    pub requires_private: Vec<String>,
    /// Linker flags (`-L`/`-l`), in emission order.
    pub libs: Vec<String>,
    /// Private linker flags, emitted as `Libs.private:` (used when this
    /// package's own implementation dependencies should not leak to a
    /// consumer linking against the public interface only).
    pub libs_private: Vec<String>,
    /// Preprocessor/compiler flags (`-I`/`-D`), in emission order.
    pub cflags: Vec<String>,
}

/// Renders `data` as the full text of a `.pc` file.
///
/// Fields whose corresponding list is empty are omitted entirely, matching
/// pkg-config's own convention that an absent field differs from an empty
/// one.
#[must_use]
pub fn render(data: &PkgConfigData) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Name: {}", data.name);
    let _ = writeln!(out, "Description: {}", data.description);
    let _ = writeln!(out, "Version: {}", data.version);
    if !data.requires.is_empty() {
        let _ = writeln!(out, "Requires: {}", data.requires.join(", "));
    }
    if !data.requires_private.is_empty() {
        let _ = writeln!(out, "Requires.private: {}", data.requires_private.join(", "));
    }
    let _ = writeln!(out, "Libs: {}", data.libs.join(" "));
    if !data.libs_private.is_empty() {
        let _ = writeln!(out, "Libs.private: {}", data.libs_private.join(" "));
    }
    if !data.cflags.is_empty() {
        let _ = writeln!(out, "Cflags: {}", data.cflags.join(" "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_minimal_package() {
        let data = PkgConfigData {
            name: "foo".to_string(),
            description: "The foo library".to_string(),
            version: "1.2.3".to_string(),
            libs: vec!["-lfoo".to_string()],
            ..Default::default()
        };
        let text = render(&data);
        assert!(text.contains("Name: foo\n"));
        assert!(text.contains("Version: 1.2.3\n"));
        assert!(text.contains("Libs: -lfoo\n"));
        assert!(!text.contains("Requires:"));
    }

    #[test]
    fn omits_empty_optional_fields() {
        let data = PkgConfigData {
            name: "bar".to_string(),
            ..Default::default()
        };
        let text = render(&data);
        assert!(!text.contains("Requires"));
        assert!(!text.contains("Cflags"));
    }

    #[test]
    fn joins_requires_with_commas() {
        let data = PkgConfigData {
            requires: vec!["baz >= 2.0".to_string(), "qux".to_string()],
            ..Default::default()
        };
        let text = render(&data);
        assert!(text.contains("Requires: baz >= 2.0, qux\n"));
    }
}
