//! htmlcheck CLI
//!
//! Audits a static HTML tree for broken references: issues go to stderr as
//! they are found, a compact JSON summary goes to stdout, and the exit code
//! reflects the outcome (0 clean, 1 issues found, 2 fatal).

use anyhow::Result;
use clap::Parser;
use htmlcheck::{ConfigFile, HtmlCheck, LogSort, Options};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "htmlcheck")]
#[command(version)]
#[command(about = "Audit a static HTML tree for broken references")]
struct Cli {
    /// Root directory of the generated site
    path: PathBuf,

    /// Audit a single document, relative to the root
    #[arg(long)]
    file: Option<String>,

    /// Config file (default: <path>/.htmlcheck.yml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Document extension filter
    #[arg(long)]
    extension: Option<String>,

    /// Glob pattern of paths to skip (repeatable)
    #[arg(long)]
    ignore: Vec<String>,

    /// Persist and restore the reference cache across runs
    #[arg(long)]
    cache: bool,

    /// Reference cache location
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Cache entry TTL in seconds
    #[arg(long)]
    cache_expires: Option<u64>,

    /// Outbound probe concurrency (fetch limiter size)
    #[arg(long)]
    external_concurrency: Option<usize>,

    /// Document pool size, used with --concurrent
    #[arg(long)]
    document_concurrency: Option<usize>,

    /// Test documents concurrently (experimental)
    #[arg(long)]
    concurrent: bool,

    /// Network probe timeout in seconds
    #[arg(long)]
    external_timeout: Option<u64>,

    /// Allow HTTP/2 for probes (HTTP/1 is forced by default)
    #[arg(long)]
    allow_http2: bool,

    /// Treat external references as always valid
    #[arg(long)]
    skip_external: bool,

    /// Disable anchor (<a href>) checks
    #[arg(long)]
    no_anchors: bool,

    /// Disable <link href> checks
    #[arg(long)]
    no_links: bool,

    /// Disable <img src> checks
    #[arg(long)]
    no_images: bool,

    /// Disable <script src> checks
    #[arg(long)]
    no_scripts: bool,

    /// Disable meta-refresh checks
    #[arg(long)]
    no_meta: bool,

    /// Disable generic src/cite/data/poster checks
    #[arg(long)]
    no_generic: bool,

    /// Disable the doctype presence check
    #[arg(long)]
    no_doctype: bool,

    /// Enable the favicon presence check
    #[arg(long)]
    favicon: bool,

    /// Issue ordering: seq (insertion order) or document (grouped)
    #[arg(long, value_enum)]
    log_sort: Option<LogSort>,

    /// Write the issue log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Compact run summary printed to stdout.
#[derive(Serialize)]
struct RunSummary {
    documents: usize,
    errors: usize,
    warnings: usize,
}

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            2
        }
    };
    std::process::exit(exit_code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let opts = build_options(cli)?;

    let mut check = HtmlCheck::new(opts)?;
    eprintln!("Auditing {} document(s)...", check.count_documents());
    check.run().await?;

    let summary = RunSummary {
        documents: check.count_documents(),
        errors: check.count_errors(),
        warnings: check.count_warnings(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    eprintln!(
        "Done: {} error(s), {} warning(s)",
        summary.errors, summary.warnings
    );

    Ok(if summary.errors > 0 { 1 } else { 0 })
}

/// defaults <- config file <- CLI flags
fn build_options(cli: Cli) -> Result<Options> {
    let mut opts = Options::default();

    if let Some(config_path) = &cli.config {
        opts.apply_config(ConfigFile::load(config_path)?);
    } else {
        let default_config = cli.path.join(".htmlcheck.yml");
        if default_config.is_file() {
            opts.apply_config(ConfigFile::load(&default_config)?);
        }
    }

    opts.directory_path = cli.path;
    opts.file_path = cli.file;
    if let Some(extension) = cli.extension {
        opts.document_extension = extension;
    }
    if !cli.ignore.is_empty() {
        opts.ignore_patterns = cli.ignore;
    }
    if cli.cache {
        opts.enable_cache = true;
    }
    if let Some(cache_file) = cli.cache_file {
        opts.cache_file = cache_file;
    }
    if let Some(cache_expires) = cli.cache_expires {
        opts.cache_expires = cache_expires;
    }
    if let Some(external_concurrency) = cli.external_concurrency {
        opts.external_concurrency = external_concurrency;
    }
    if let Some(document_concurrency) = cli.document_concurrency {
        opts.document_concurrency = document_concurrency;
    }
    if cli.concurrent {
        opts.test_files_concurrently = true;
    }
    if let Some(external_timeout) = cli.external_timeout {
        opts.external_timeout = external_timeout;
    }
    if cli.allow_http2 {
        opts.http1_only = false;
    }
    if cli.skip_external {
        opts.skip_external = true;
    }
    if cli.no_anchors {
        opts.check_anchors = false;
    }
    if cli.no_links {
        opts.check_links = false;
    }
    if cli.no_images {
        opts.check_images = false;
    }
    if cli.no_scripts {
        opts.check_scripts = false;
    }
    if cli.no_meta {
        opts.check_meta = false;
    }
    if cli.no_generic {
        opts.check_generic = false;
    }
    if cli.no_doctype {
        opts.check_doctype = false;
    }
    if cli.favicon {
        opts.check_favicon = true;
    }
    if let Some(log_sort) = cli.log_sort {
        opts.log_sort = log_sort;
    }
    if let Some(log_file) = cli.log_file {
        opts.log_file = Some(log_file);
    }

    Ok(opts)
}
