//! htmlcheck: audit a tree of generated HTML documents for broken references.
//!
//! Walks documents (optionally in parallel), extracts hyperlinks, images,
//! scripts, stylesheets and media sources, resolves each distinct reference
//! at most once per run through a TTL cache and a global fetch limiter, and
//! aggregates findings into a leveled issue log.

pub mod checker;
pub mod document;
pub mod issues;
pub mod options;
pub mod refcache;
pub mod reference;
pub mod runner;

pub use issues::{Issue, IssueStore, Level};
pub use options::{ConfigFile, LogSort, Options};
pub use refcache::{CheckedRef, RefCache, RefStatus};
pub use runner::{FatalError, HtmlCheck};
