//! Leveled issue store: append-only, concurrent-safe, two sort modes.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

/// Issue severity, used for counting and exit-status decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// A single finding. Sequence numbers are assigned by the store at insertion.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub level: Level,
    pub message: String,
    /// Site path of the owning document, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    pub seq: u64,
}

impl Issue {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            document: None,
            seq: 0,
        }
    }

    pub fn for_document(level: Level, document: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            document: Some(document.to_string()),
            seq: 0,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let doc = self.document.as_deref().unwrap_or("-");
        write!(f, "{} --- {} --> {}", self.level, doc, self.message)
    }
}

/// Append-only collection of findings, safe for insertion from many document
/// tasks at once. Insertion order is total across the whole run.
pub struct IssueStore {
    /// Print each issue to stderr the moment it is stored (seq sort mode).
    print_immediately: bool,
    inner: Mutex<Vec<Issue>>,
}

impl IssueStore {
    pub fn new(print_immediately: bool) -> Self {
        Self {
            print_immediately,
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Store one issue, assigning the next sequence number. Issues with no
    /// owning document always print immediately; per-document sorting has no
    /// flush point for them.
    pub fn add(&self, mut issue: Issue) {
        let mut issues = self.inner.lock().unwrap();
        issue.seq = issues.len() as u64;
        if self.print_immediately || issue.document.is_none() {
            eprintln!("{}", issue);
        }
        issues.push(issue);
    }

    /// Store a batch contiguously. Used by the per-document sort mode so one
    /// document's findings never interleave with another's.
    pub fn add_all(&self, batch: Vec<Issue>) {
        let mut issues = self.inner.lock().unwrap();
        for mut issue in batch {
            issue.seq = issues.len() as u64;
            if self.print_immediately {
                eprintln!("{}", issue);
            }
            issues.push(issue);
        }
    }

    /// Number of stored issues at the given level.
    pub fn count(&self, level: Level) -> usize {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.level == level)
            .count()
    }

    /// Print all issues belonging to one document to stderr.
    pub fn print_document_issues(&self, document: &str) {
        let issues = self.inner.lock().unwrap();
        for issue in issues.iter().filter(|i| i.document.as_deref() == Some(document)) {
            eprintln!("{}", issue);
        }
    }

    /// Write the full issue log, one line per issue in stored order.
    pub fn write_log(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let issues = self.inner.lock().unwrap();
        let mut log = String::new();
        for issue in issues.iter() {
            log.push_str(&issue.to_string());
            log.push('\n');
        }
        std::fs::write(path, log)
            .with_context(|| format!("Failed to write log {}", path.display()))
    }

    /// Snapshot of all stored issues, in insertion order.
    pub fn issues(&self) -> Vec<Issue> {
        self.inner.lock().unwrap().clone()
    }
}

/// Per-document emission funnel. In seq mode issues go straight to the store;
/// in document mode they buffer locally and land as one contiguous block when
/// the document's task finishes.
pub struct IssueSink<'a> {
    store: &'a IssueStore,
    document: String,
    buffer: Option<Vec<Issue>>,
}

impl<'a> IssueSink<'a> {
    pub fn new(store: &'a IssueStore, document: &str, buffered: bool) -> Self {
        Self {
            store,
            document: document.to_string(),
            buffer: buffered.then(Vec::new),
        }
    }

    /// Emit an issue owned by this sink's document.
    pub fn emit(&mut self, level: Level, message: impl Into<String>) {
        let issue = Issue::for_document(level, &self.document, message);
        match &mut self.buffer {
            Some(buffer) => buffer.push(issue),
            None => self.store.add(issue),
        }
    }

    /// Flush the buffer, if any, and print this document's issues when in
    /// buffered mode.
    pub fn flush(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.store.add_all(buffer);
            self.store.print_document_issues(&self.document);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_per_level() {
        let store = IssueStore::new(false);
        store.add(Issue::new(Level::Error, "one"));
        store.add(Issue::new(Level::Warning, "two"));
        store.add(Issue::new(Level::Error, "three"));
        assert_eq!(store.count(Level::Error), 2);
        assert_eq!(store.count(Level::Warning), 1);
    }

    #[test]
    fn test_sequence_numbers_monotone() {
        let store = IssueStore::new(false);
        for i in 0..5 {
            store.add(Issue::new(Level::Warning, format!("issue {}", i)));
        }
        let issues = store.issues();
        let seqs: Vec<u64> = issues.iter().map(|i| i.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_buffered_sink_keeps_documents_contiguous() {
        let store = IssueStore::new(false);
        let mut sink_a = IssueSink::new(&store, "a.html", true);
        let mut sink_b = IssueSink::new(&store, "b.html", true);

        // Interleaved emission, as concurrent document tasks would produce
        sink_a.emit(Level::Error, "a1");
        sink_b.emit(Level::Error, "b1");
        sink_a.emit(Level::Error, "a2");
        sink_b.emit(Level::Error, "b2");
        sink_b.flush();
        sink_a.flush();

        let issues = store.issues();
        let docs: Vec<&str> = issues
            .iter()
            .map(|i| i.document.as_deref().unwrap())
            .collect();
        assert_eq!(docs, vec!["b.html", "b.html", "a.html", "a.html"]);
    }

    #[test]
    fn test_unbuffered_sink_preserves_insertion_order() {
        let store = IssueStore::new(false);
        let mut sink = IssueSink::new(&store, "a.html", false);
        sink.emit(Level::Error, "first");
        sink.emit(Level::Warning, "second");
        sink.flush();
        let issues = store.issues();
        assert_eq!(issues[0].message, "first");
        assert_eq!(issues[1].message, "second");
    }

    #[test]
    fn test_write_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/htmlcheck.log");
        let store = IssueStore::new(false);
        store.add(Issue::for_document(Level::Error, "x.html", "broken ref"));
        store.write_log(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "error --- x.html --> broken ref\n");
    }
}
