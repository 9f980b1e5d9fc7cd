//! Session options: defaults, YAML config file overlay, check toggles.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::reference::CheckKind;

/// Issue ordering mode for output and the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogSort {
    /// Insertion order, issues printed immediately as discovered.
    Seq,
    /// Issues grouped per document, flushed when its checks complete.
    Document,
}

/// Effective options for one audit session.
#[derive(Debug, Clone)]
pub struct Options {
    /// Root directory of the HTML tree.
    pub directory_path: PathBuf,
    /// Single document to audit, relative to the root.
    pub file_path: Option<String>,
    /// Extension of files treated as documents.
    pub document_extension: String,
    /// Filename resolved for references that name a directory.
    pub directory_index: String,
    /// Glob patterns of relative paths to skip during discovery.
    pub ignore_patterns: Vec<String>,

    pub enable_cache: bool,
    pub cache_file: PathBuf,
    /// TTL for cache entries, in seconds.
    pub cache_expires: u64,

    /// Fetch limiter size: outbound probes in flight at once, globally.
    pub external_concurrency: usize,
    /// Document pool size, used only in concurrent mode.
    pub document_concurrency: usize,
    /// Concurrent document mode (experimental).
    pub test_files_concurrently: bool,
    /// Per-probe network timeout, in seconds.
    pub external_timeout: u64,
    /// Force HTTP/1 for probes; some servers negotiate H2 and then hang.
    pub http1_only: bool,
    /// Treat external references as always valid.
    pub skip_external: bool,

    pub check_anchors: bool,
    pub check_links: bool,
    pub check_images: bool,
    pub check_scripts: bool,
    pub check_meta: bool,
    pub check_generic: bool,
    pub check_favicon: bool,
    pub check_doctype: bool,

    pub log_sort: LogSort,
    pub log_file: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            directory_path: PathBuf::from("."),
            file_path: None,
            document_extension: "html".to_string(),
            directory_index: "index.html".to_string(),
            ignore_patterns: Vec::new(),
            enable_cache: false,
            cache_file: PathBuf::from(".htmlcheck/refcache.json"),
            cache_expires: 14 * 24 * 60 * 60,
            external_concurrency: 16,
            document_concurrency: 128,
            test_files_concurrently: false,
            external_timeout: 15,
            http1_only: true,
            skip_external: false,
            check_anchors: true,
            check_links: true,
            check_images: true,
            check_scripts: true,
            check_meta: true,
            check_generic: true,
            check_favicon: false,
            check_doctype: true,
            log_sort: LogSort::Document,
            log_file: None,
        }
    }
}

impl Options {
    /// Whether a check category is enabled.
    pub fn kind_enabled(&self, kind: CheckKind) -> bool {
        match kind {
            CheckKind::Anchor => self.check_anchors,
            CheckKind::Link => self.check_links,
            CheckKind::Image => self.check_images,
            CheckKind::Script => self.check_scripts,
            CheckKind::Meta => self.check_meta,
            CheckKind::Generic => self.check_generic,
        }
    }

    /// Apply a loaded config file on top of the defaults.
    pub fn apply_config(&mut self, config: ConfigFile) {
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = config.$field { self.$field = v; })*
            };
        }
        overlay!(
            document_extension,
            directory_index,
            ignore_patterns,
            enable_cache,
            cache_file,
            cache_expires,
            external_concurrency,
            document_concurrency,
            test_files_concurrently,
            external_timeout,
            http1_only,
            skip_external,
            check_anchors,
            check_links,
            check_images,
            check_scripts,
            check_meta,
            check_generic,
            check_favicon,
            check_doctype,
            log_sort,
        );
        // log_file is itself optional, so it falls outside the macro
        if config.log_file.is_some() {
            self.log_file = config.log_file;
        }
    }
}

/// `.htmlcheck.yml` config file. Every field optional; unset fields keep
/// their defaults. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfigFile {
    pub document_extension: Option<String>,
    pub directory_index: Option<String>,
    pub ignore_patterns: Option<Vec<String>>,
    pub enable_cache: Option<bool>,
    pub cache_file: Option<PathBuf>,
    pub cache_expires: Option<u64>,
    pub external_concurrency: Option<usize>,
    pub document_concurrency: Option<usize>,
    pub test_files_concurrently: Option<bool>,
    pub external_timeout: Option<u64>,
    pub http1_only: Option<bool>,
    pub skip_external: Option<bool>,
    pub check_anchors: Option<bool>,
    pub check_links: Option<bool>,
    pub check_images: Option<bool>,
    pub check_scripts: Option<bool>,
    pub check_meta: Option<bool>,
    pub check_generic: Option<bool>,
    pub check_favicon: Option<bool>,
    pub check_doctype: Option<bool>,
    pub log_sort: Option<LogSort>,
    pub log_file: Option<PathBuf>,
}

impl ConfigFile {
    /// Read and parse a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert_eq!(opts.document_extension, "html");
        assert_eq!(opts.directory_index, "index.html");
        assert!(!opts.test_files_concurrently);
        assert!(!opts.check_favicon);
        assert!(opts.check_doctype);
        assert_eq!(opts.log_sort, LogSort::Document);
    }

    #[test]
    fn test_apply_config_overlays_only_set_fields() {
        let mut opts = Options::default();
        let config: ConfigFile = serde_yaml::from_str(
            "external_timeout: 3\ncheck_favicon: true\nignore_patterns: [\"drafts/*\"]\n",
        )
        .unwrap();
        opts.apply_config(config);
        assert_eq!(opts.external_timeout, 3);
        assert!(opts.check_favicon);
        assert_eq!(opts.ignore_patterns, vec!["drafts/*".to_string()]);
        // Untouched fields keep defaults
        assert_eq!(opts.external_concurrency, 16);
    }

    #[test]
    fn test_apply_config_sets_log_file() {
        let mut opts = Options::default();
        let config: ConfigFile =
            serde_yaml::from_str("log_file: out/htmlcheck.log\n").unwrap();
        opts.apply_config(config);
        assert_eq!(opts.log_file, Some(PathBuf::from("out/htmlcheck.log")));

        // An unset key leaves an already-configured path alone
        opts.apply_config(ConfigFile::default());
        assert_eq!(opts.log_file, Some(PathBuf::from("out/htmlcheck.log")));
    }

    #[test]
    fn test_config_tolerates_unknown_keys() {
        let config: Result<ConfigFile, _> =
            serde_yaml::from_str("future_option: true\nexternal_timeout: 9\n");
        let config = config.unwrap();
        assert_eq!(config.external_timeout, Some(9));
    }
}
