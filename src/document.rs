//! Document discovery and parsing.
//!
//! Parsing copies the tags and attributes we care about out of the scraper
//! DOM into an owned node list, so document tasks stay `Send` and the DOM
//! never crosses an await point.

use anyhow::{Context, Result};
use scraper::{Html, Node};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::checker::checks_for;

/// One element extracted from a document, ready for checking.
#[derive(Debug, Clone)]
pub struct ElementNode {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
}

impl ElementNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Mutable state accumulated while a document is parsed and traversed.
#[derive(Debug, Default, Clone)]
pub struct DocumentState {
    pub favicon_present: bool,
    pub doctype_present: bool,
    /// ids and anchor names usable as fragment targets.
    pub anchor_ids: HashSet<String>,
}

/// A single HTML document. Identity is the resolved file path; the node list
/// and state bag are populated by `parse`.
#[derive(Debug)]
pub struct Document {
    /// Path relative to the audit root, used in issue messages.
    pub site_path: String,
    /// On-disk path.
    pub file_path: PathBuf,
    pub nodes: Vec<ElementNode>,
    pub state: DocumentState,
}

impl Document {
    pub fn new(site_path: String, file_path: PathBuf) -> Self {
        Self {
            site_path,
            file_path,
            nodes: Vec::new(),
            state: DocumentState::default(),
        }
    }

    /// Directory of this document relative to the audit root, for resolving
    /// document-relative references.
    pub fn site_dir(&self) -> &Path {
        Path::new(&self.site_path).parent().unwrap_or(Path::new(""))
    }

    /// Read and parse the document, populating the node list and state bag.
    pub fn parse(&mut self) -> Result<()> {
        let html = std::fs::read_to_string(&self.file_path)
            .with_context(|| format!("Failed to read {}", self.file_path.display()))?;
        self.parse_html(&html);
        Ok(())
    }

    fn parse_html(&mut self, html: &str) {
        let parsed = Html::parse_document(html);

        for node in parsed.tree.nodes() {
            match node.value() {
                Node::Doctype(_) => self.state.doctype_present = true,
                Node::Element(element) => {
                    let tag = element.name();

                    if let Some(id) = element.attr("id") {
                        self.state.anchor_ids.insert(id.to_string());
                    }
                    // Legacy anchor form: <a name="...">
                    if tag == "a" {
                        if let Some(name) = element.attr("name") {
                            self.state.anchor_ids.insert(name.to_string());
                        }
                    }
                    if tag == "link" && is_favicon(element.attr("rel"), element.attr("href")) {
                        self.state.favicon_present = true;
                    }

                    if !checks_for(tag).is_empty() {
                        self.nodes.push(ElementNode {
                            tag: tag.to_string(),
                            attrs: element
                                .attrs()
                                .map(|(attr, value)| (attr.to_string(), value.to_string()))
                                .collect(),
                        });
                    }
                }
                _ => {}
            }
        }
    }
}

fn is_favicon(rel: Option<&str>, href: Option<&str>) -> bool {
    let Some(rel) = rel else { return false };
    let has_href = href.is_some_and(|href| !href.trim().is_empty());
    has_href
        && rel
            .split_whitespace()
            .any(|token| token.eq_ignore_ascii_case("icon") || token.eq_ignore_ascii_case("shortcut"))
}

/// Discovers and holds the document set for one audit root.
pub struct DocumentStore {
    pub base_path: PathBuf,
    pub document_extension: String,
    pub directory_index: String,
    ignore_patterns: Vec<glob::Pattern>,
    pub documents: Vec<Document>,
}

impl DocumentStore {
    pub fn new(
        base_path: PathBuf,
        document_extension: &str,
        directory_index: &str,
        ignore_patterns: &[String],
    ) -> Result<Self> {
        let ignore_patterns = ignore_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).with_context(|| format!("Invalid ignore pattern '{}'", p))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            base_path,
            document_extension: document_extension.to_string(),
            directory_index: directory_index.to_string(),
            ignore_patterns,
            documents: Vec::new(),
        })
    }

    /// Walk the root and populate the document set, sorted by site path for
    /// deterministic ordering.
    pub fn discover(&mut self) -> Result<()> {
        let base = self.base_path.clone();
        self.walk(&base, Path::new(""))?;
        self.documents.sort_by(|a, b| a.site_path.cmp(&b.site_path));
        Ok(())
    }

    fn walk(&mut self, dir: &Path, rel: &Path) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let rel_path = rel.join(entry.file_name());
            let rel_str = rel_path.to_string_lossy();

            if self.ignored(&rel_str) {
                continue;
            }
            if path.is_dir() {
                self.walk(&path, &rel_path)?;
            } else if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.document_extension))
            {
                self.documents
                    .push(Document::new(rel_str.into_owned(), path));
            }
        }
        Ok(())
    }

    fn ignored(&self, rel_path: &str) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches(rel_path))
    }

    /// Index of the document at the given site path, for single-document mode.
    pub fn resolve_path(&self, site_path: &str) -> Option<usize> {
        let wanted = site_path.trim_start_matches("./").trim_start_matches('/');
        self.documents.iter().position(|d| d.site_path == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(html: &str) -> Document {
        let mut doc = Document::new("test.html".to_string(), PathBuf::from("test.html"));
        doc.parse_html(html);
        doc
    }

    #[test]
    fn test_parse_collects_checkable_nodes() {
        let doc = parsed(
            r#"<!DOCTYPE html><html><body>
                <a href="/about.html">about</a>
                <img src="logo.png">
                <p>not checkable</p>
                <video src="clip.mp4" poster="frame.jpg"></video>
            </body></html>"#,
        );
        let tags: Vec<&str> = doc.nodes.iter().map(|n| n.tag.as_str()).collect();
        assert_eq!(tags, vec!["a", "img", "video"]);
        assert_eq!(doc.nodes[0].attr("href"), Some("/about.html"));
        assert_eq!(doc.nodes[2].attr("poster"), Some("frame.jpg"));
    }

    #[test]
    fn test_doctype_detection() {
        assert!(parsed("<!DOCTYPE html><html></html>").state.doctype_present);
        assert!(!parsed("<html><body></body></html>").state.doctype_present);
    }

    #[test]
    fn test_favicon_detection() {
        let with = parsed(r#"<html><head><link rel="shortcut icon" href="/favicon.ico"></head></html>"#);
        assert!(with.state.favicon_present);
        let without = parsed(r#"<html><head><link rel="stylesheet" href="style.css"></head></html>"#);
        assert!(!without.state.favicon_present);
        let blank_href = parsed(r#"<html><head><link rel="icon" href=""></head></html>"#);
        assert!(!blank_href.state.favicon_present);
    }

    #[test]
    fn test_anchor_ids_collected() {
        let doc = parsed(
            r#"<html><body>
                <h2 id="intro">Intro</h2>
                <a name="legacy"></a>
            </body></html>"#,
        );
        assert!(doc.state.anchor_ids.contains("intro"));
        assert!(doc.state.anchor_ids.contains("legacy"));
    }

    #[test]
    fn test_site_dir() {
        let doc = Document::new("blog/2024/post.html".to_string(), PathBuf::new());
        assert_eq!(doc.site_dir(), Path::new("blog/2024"));
        let root = Document::new("index.html".to_string(), PathBuf::new());
        assert_eq!(root.site_dir(), Path::new(""));
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("blog")).unwrap();
        std::fs::create_dir_all(dir.path().join("drafts")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        std::fs::write(dir.path().join("blog/post.html"), "<html></html>").unwrap();
        std::fs::write(dir.path().join("style.css"), "body{}").unwrap();
        std::fs::write(dir.path().join("drafts/wip.html"), "<html></html>").unwrap();

        let mut store = DocumentStore::new(
            dir.path().to_path_buf(),
            "html",
            "index.html",
            &["drafts/*".to_string()],
        )
        .unwrap();
        store.discover().unwrap();

        let paths: Vec<&str> = store.documents.iter().map(|d| d.site_path.as_str()).collect();
        assert_eq!(paths, vec!["blog/post.html", "index.html"]);
    }

    #[test]
    fn test_resolve_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), "<html></html>").unwrap();
        let mut store =
            DocumentStore::new(dir.path().to_path_buf(), "html", "index.html", &[]).unwrap();
        store.discover().unwrap();
        assert!(store.resolve_path("page.html").is_some());
        assert!(store.resolve_path("/page.html").is_some());
        assert!(store.resolve_path("missing.html").is_none());
    }
}
