//! Reference normalization: classify raw attribute values by how they must
//! be resolved (network probe, filesystem stat, or same-page lookup).

use std::path::{Component, Path, PathBuf};
use url::Url;

/// Check category a reference was extracted under. Categories can be toggled
/// independently in the options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Anchor,
    Link,
    Image,
    Script,
    Meta,
    Generic,
}

impl CheckKind {
    pub fn label(&self) -> &'static str {
        match self {
            CheckKind::Anchor => "anchor",
            CheckKind::Link => "link",
            CheckKind::Image => "image",
            CheckKind::Script => "script",
            CheckKind::Meta => "meta",
            CheckKind::Generic => "reference",
        }
    }
}

/// Resolution strategy class of a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    /// http(s) or protocol-relative; resolved by a network probe.
    External(Url),
    /// Root-relative or document-relative path; resolved by a filesystem stat.
    Internal,
    /// Same-page fragment; resolved against the document's anchor ids.
    Fragment(String),
    /// mailto:, tel:, javascript:, data: and friends; never checked.
    Unsupported,
    /// Empty or whitespace-only attribute value.
    Blank,
}

/// A normalized reference: the raw attribute value plus its scheme class and
/// the check category it came from.
#[derive(Debug, Clone)]
pub struct Reference {
    pub raw: String,
    pub scheme: Scheme,
    pub kind: CheckKind,
}

impl Reference {
    pub fn new(raw: &str, kind: CheckKind) -> Self {
        Self {
            raw: raw.to_string(),
            scheme: classify(raw),
            kind,
        }
    }

    /// The path portion of an internal reference, with any query string or
    /// fragment stripped.
    pub fn path_part(&self) -> &str {
        let end = self
            .raw
            .find(['?', '#'])
            .unwrap_or(self.raw.len());
        &self.raw[..end]
    }
}

fn classify(raw: &str) -> Scheme {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Scheme::Blank;
    }
    if let Some(fragment) = trimmed.strip_prefix('#') {
        return Scheme::Fragment(fragment.to_string());
    }
    // Protocol-relative references inherit the scheme of the page; audit
    // them over https.
    if let Some(rest) = trimmed.strip_prefix("//") {
        return match Url::parse(&format!("https://{}", rest)) {
            Ok(url) => Scheme::External(url),
            Err(_) => Scheme::Unsupported,
        };
    }
    if let Ok(url) = Url::parse(trimmed) {
        return match url.scheme() {
            "http" | "https" => Scheme::External(url),
            _ => Scheme::Unsupported,
        };
    }
    Scheme::Internal
}

/// Lexically normalize a path, resolving `.` and `..` components without
/// touching the filesystem. Used to build stable cache keys for internal
/// references.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_schemes() {
        assert!(matches!(
            Reference::new("https://example.com/page", CheckKind::Anchor).scheme,
            Scheme::External(_)
        ));
        assert!(matches!(
            Reference::new("http://example.com", CheckKind::Anchor).scheme,
            Scheme::External(_)
        ));
    }

    #[test]
    fn test_protocol_relative_is_external_https() {
        let reference = Reference::new("//cdn.example.com/app.js", CheckKind::Script);
        match reference.scheme {
            Scheme::External(url) => assert_eq!(url.scheme(), "https"),
            other => panic!("expected external, got {:?}", other),
        }
    }

    #[test]
    fn test_fragment() {
        let reference = Reference::new("#section-2", CheckKind::Anchor);
        assert_eq!(reference.scheme, Scheme::Fragment("section-2".to_string()));
        // Bare '#' points at the top of the page
        let top = Reference::new("#", CheckKind::Anchor);
        assert_eq!(top.scheme, Scheme::Fragment(String::new()));
    }

    #[test]
    fn test_unsupported_schemes_skipped() {
        for raw in ["mailto:a@b.com", "tel:+1234", "javascript:void(0)", "data:image/png;base64,xyz"] {
            let reference = Reference::new(raw, CheckKind::Anchor);
            assert_eq!(reference.scheme, Scheme::Unsupported, "{}", raw);
        }
    }

    #[test]
    fn test_internal_paths() {
        assert_eq!(
            Reference::new("/assets/style.css", CheckKind::Link).scheme,
            Scheme::Internal
        );
        assert_eq!(
            Reference::new("../images/logo.png", CheckKind::Image).scheme,
            Scheme::Internal
        );
    }

    #[test]
    fn test_blank() {
        assert_eq!(Reference::new("   ", CheckKind::Image).scheme, Scheme::Blank);
        assert_eq!(Reference::new("", CheckKind::Image).scheme, Scheme::Blank);
    }

    #[test]
    fn test_path_part_strips_query_and_fragment() {
        let reference = Reference::new("page.html?v=2#top", CheckKind::Anchor);
        assert_eq!(reference.path_part(), "page.html");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/site/blog/../images/./logo.png")),
            PathBuf::from("/site/images/logo.png")
        );
    }
}
