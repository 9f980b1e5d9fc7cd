//! Audit session orchestration: pre-flight checks, document pools, post
//! checks, end-of-run persistence.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::checker::check_node;
use crate::document::{Document, DocumentStore};
use crate::issues::{Issue, IssueSink, IssueStore, Level};
use crate::options::{LogSort, Options};
use crate::refcache::RefCache;

/// Conditions that abort the whole run before any document is tested.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("cannot access '{0}', no such directory")]
    MissingRoot(PathBuf),
    #[error("'{0}' is a file, not a directory")]
    RootIsFile(PathBuf),
    #[error("could not find document '{file}' in '{root}'")]
    DocumentNotFound { file: String, root: PathBuf },
}

/// Shared context every document task runs against. All mutation funnels
/// through the components that own each piece of state: the cache owns
/// resolution state, the issue store owns findings.
pub struct Session {
    pub opts: Options,
    pub client: reqwest::Client,
    pub ref_cache: RefCache,
    pub issues: IssueStore,
    /// Fetch limiter: bounds outbound probes globally, independent of the
    /// document pool.
    pub fetch_gate: Semaphore,
}

impl Session {
    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(opts.external_timeout))
            .user_agent(concat!("htmlcheck/", env!("CARGO_PKG_VERSION")));
        if opts.http1_only {
            // Some hosts negotiate HTTP/2 and then stall mid-request;
            // forcing HTTP/1 sidesteps the whole class.
            builder = builder.http1_only();
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        let issues = IssueStore::new(opts.log_sort == LogSort::Seq);
        let ref_cache = RefCache::new(opts.cache_expires);
        let fetch_gate = Semaphore::new(opts.external_concurrency.max(1));
        Ok(Self {
            opts,
            client,
            ref_cache,
            issues,
            fetch_gate,
        })
    }
}

/// One audit run over a document tree.
pub struct HtmlCheck {
    session: Arc<Session>,
    store: DocumentStore,
}

impl HtmlCheck {
    /// Set up a session: fatal pre-flight on the root, document discovery,
    /// warm-cache restore.
    pub fn new(mut opts: Options) -> Result<Self> {
        let root = opts.directory_path.clone();
        let meta = std::fs::metadata(&root).map_err(|_| FatalError::MissingRoot(root.clone()))?;
        if !meta.is_dir() {
            return Err(FatalError::RootIsFile(root).into());
        }

        // Single-file mode narrows the extension filter to that file's own
        if let Some(file) = &opts.file_path {
            if let Some(ext) = std::path::Path::new(file).extension() {
                opts.document_extension = ext.to_string_lossy().into_owned();
            }
        }

        let mut store = DocumentStore::new(
            opts.directory_path.clone(),
            &opts.document_extension,
            &opts.directory_index,
            &opts.ignore_patterns,
        )?;
        store.discover()?;

        let session = Arc::new(Session::new(opts)?);
        if session.opts.enable_cache {
            match session.ref_cache.load(&session.opts.cache_file) {
                Ok(count) if count > 0 => {
                    eprintln!("Loaded {} cached reference(s)", count);
                }
                Ok(_) => {}
                // Corrupt snapshot degrades to a cold cache; surfaced so the
                // slow run is explicable.
                Err(err) => {
                    session.issues.add(Issue::new(
                        Level::Warning,
                        format!("reference cache unreadable, starting empty: {:#}", err),
                    ));
                }
            }
        }

        Ok(Self { session, store })
    }

    /// Test every discovered document (or the single requested one), then
    /// persist the cache and issue log if enabled.
    pub async fn run(&mut self) -> Result<()> {
        if let Some(file) = self.session.opts.file_path.clone() {
            let idx = self
                .store
                .resolve_path(&file)
                .ok_or_else(|| FatalError::DocumentNotFound {
                    file,
                    root: self.store.base_path.clone(),
                })?;
            let session = Arc::clone(&self.session);
            test_document(&session, &mut self.store.documents[idx]).await?;
        } else {
            self.test_documents().await?;
        }

        if self.session.opts.enable_cache {
            self.session
                .ref_cache
                .persist(&self.session.opts.cache_file)?;
        }
        if let Some(log_file) = &self.session.opts.log_file {
            self.session.issues.write_log(log_file)?;
        }
        Ok(())
    }

    async fn test_documents(&mut self) -> Result<()> {
        if self.session.opts.test_files_concurrently {
            self.session.issues.add(Issue::new(
                Level::Warning,
                "running in concurrent mode, this is experimental",
            ));

            let gate = Arc::new(Semaphore::new(self.session.opts.document_concurrency.max(1)));
            let documents = std::mem::take(&mut self.store.documents);
            let mut tasks = Vec::with_capacity(documents.len());
            for mut document in documents {
                // Take a pool slot before spawning so the number of live
                // document tasks never exceeds the pool size.
                let permit = Arc::clone(&gate).acquire_owned().await?;
                let session = Arc::clone(&self.session);
                tasks.push(tokio::spawn(async move {
                    let outcome = test_document(&session, &mut document).await;
                    drop(permit);
                    (document, outcome)
                }));
            }

            // join_all preserves spawn order, restoring discovery order
            let mut documents = Vec::with_capacity(tasks.len());
            for joined in join_all(tasks).await {
                let (document, outcome) = joined.context("document task panicked")?;
                outcome?;
                documents.push(document);
            }
            self.store.documents = documents;
        } else {
            for document in &mut self.store.documents {
                test_document(&self.session, document).await?;
            }
        }
        Ok(())
    }

    /// Number of error-level issues found so far.
    pub fn count_errors(&self) -> usize {
        self.session.issues.count(Level::Error)
    }

    /// Number of warning-level issues found so far.
    pub fn count_warnings(&self) -> usize {
        self.session.issues.count(Level::Warning)
    }

    /// Number of discovered documents.
    pub fn count_documents(&self) -> usize {
        self.store.documents.len()
    }

    /// Snapshot of all issues, in stored order.
    pub fn issues(&self) -> Vec<Issue> {
        self.session.issues.issues()
    }
}

/// Parse one document, run every enabled check over its node list, then the
/// post-traversal checks. In per-document sort mode the sink buffers and
/// flushes the document's findings as one contiguous block.
async fn test_document(session: &Session, document: &mut Document) -> Result<()> {
    document.parse()?;

    let buffered = session.opts.log_sort == LogSort::Document;
    let mut sink = IssueSink::new(&session.issues, &document.site_path, buffered);

    let nodes = std::mem::take(&mut document.nodes);
    for node in &nodes {
        check_node(session, document, node, &mut sink).await;
    }
    document.nodes = nodes;

    post_checks(session, document, &mut sink);
    sink.flush();
    Ok(())
}

/// Checks that need the fully accumulated document state.
fn post_checks(session: &Session, document: &Document, sink: &mut IssueSink<'_>) {
    if session.opts.check_favicon && !document.state.favicon_present {
        sink.emit(Level::Error, "favicon missing");
    }
    if session.opts.check_doctype && !document.state.doctype_present {
        sink.emit(Level::Error, "doctype missing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_root_is_fatal() {
        let opts = Options {
            directory_path: PathBuf::from("/definitely/not/here"),
            ..Options::default()
        };
        let err = HtmlCheck::new(opts).err().unwrap();
        assert!(err.to_string().contains("no such directory"));
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.html");
        std::fs::write(&file, "<html></html>").unwrap();
        let opts = Options {
            directory_path: file,
            ..Options::default()
        };
        let err = HtmlCheck::new(opts).err().unwrap();
        assert!(err.to_string().contains("not a directory"));
    }

    #[tokio::test]
    async fn test_single_document_not_found_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        let opts = Options {
            directory_path: dir.path().to_path_buf(),
            file_path: Some("missing.html".to_string()),
            ..Options::default()
        };
        let mut check = HtmlCheck::new(opts).unwrap();
        let err = check.run().await.unwrap_err();
        assert!(err.to_string().contains("could not find document"));
    }

    #[tokio::test]
    async fn test_concurrent_mode_emits_advisory_warning() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            "<!DOCTYPE html><html><body></body></html>",
        )
        .unwrap();
        let opts = Options {
            directory_path: dir.path().to_path_buf(),
            test_files_concurrently: true,
            ..Options::default()
        };
        let mut check = HtmlCheck::new(opts).unwrap();
        check.run().await.unwrap();
        assert_eq!(check.count_warnings(), 1);
        assert_eq!(check.count_errors(), 0);
    }
}
