//! Per-node reference checks: dispatch table and resolution strategies.
//!
//! Fragments resolve against the owning document, internal paths against the
//! filesystem, external URLs against the network. Filesystem and network
//! probes go through the cache and the global fetch limiter, so each distinct
//! target is checked at most once per run.

use regex::Regex;
use reqwest::StatusCode;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::document::{Document, ElementNode};
use crate::issues::{IssueSink, Level};
use crate::refcache::CheckedRef;
use crate::reference::{normalize_path, CheckKind, Reference, Scheme};
use crate::runner::Session;

/// Static registry mapping element kind to the attributes it is checked
/// under. Consulted once per node; extending coverage means adding a row
/// here, not touching the traversal.
pub fn checks_for(tag: &str) -> &'static [(&'static str, CheckKind)] {
    match tag {
        "a" => &[("href", CheckKind::Anchor)],
        "link" => &[("href", CheckKind::Link)],
        "img" => &[("src", CheckKind::Image)],
        "script" => &[("src", CheckKind::Script)],
        "meta" => &[("content", CheckKind::Meta)],
        "area" => &[("href", CheckKind::Generic)],
        "blockquote" | "del" | "ins" | "q" => &[("cite", CheckKind::Generic)],
        "iframe" | "input" | "audio" | "embed" | "source" | "track" => {
            &[("src", CheckKind::Generic)]
        }
        // Media elements carry two independently checkable references
        "video" => &[("src", CheckKind::Generic), ("poster", CheckKind::Generic)],
        "object" => &[("data", CheckKind::Generic)],
        _ => &[],
    }
}

/// Run every enabled check registered for this node.
pub async fn check_node(
    session: &Session,
    document: &Document,
    node: &ElementNode,
    sink: &mut IssueSink<'_>,
) {
    for &(attr, kind) in checks_for(&node.tag) {
        if !session.opts.kind_enabled(kind) {
            continue;
        }
        if kind == CheckKind::Meta {
            check_meta(session, document, node, sink).await;
            continue;
        }
        match node.attr(attr) {
            Some(value) => {
                let reference = Reference::new(value, kind);
                check_reference(session, document, node, attr, &reference, sink).await;
            }
            // An absent attribute is a no-op, except images which must
            // carry a source.
            None if kind == CheckKind::Image => {
                sink.emit(Level::Error, "<img> missing src attribute");
            }
            None => {}
        }
    }
}

/// `<meta http-equiv="refresh">` redirects carry a checkable URL in their
/// content attribute. Any other meta tag is ignored.
async fn check_meta(
    session: &Session,
    document: &Document,
    node: &ElementNode,
    sink: &mut IssueSink<'_>,
) {
    let is_refresh = node
        .attr("http-equiv")
        .is_some_and(|v| v.eq_ignore_ascii_case("refresh"));
    if !is_refresh {
        return;
    }
    let Some(content) = node.attr("content") else {
        sink.emit(Level::Error, "<meta> refresh missing content attribute");
        return;
    };
    if let Some(target) = refresh_target(content) {
        let reference = Reference::new(target, CheckKind::Meta);
        check_reference(session, document, node, "content", &reference, sink).await;
    }
}

fn refresh_target(content: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"(?i)^\s*\d+\s*;\s*url\s*=\s*['"]?([^'"]+?)['"]?\s*$"#).unwrap()
    });
    re.captures(content)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Resolve one reference and emit an issue on failure.
async fn check_reference(
    session: &Session,
    document: &Document,
    node: &ElementNode,
    attr: &str,
    reference: &Reference,
    sink: &mut IssueSink<'_>,
) {
    match &reference.scheme {
        Scheme::Unsupported => {}
        Scheme::Blank => {
            sink.emit(
                Level::Error,
                format!("blank {} attribute in <{}>", attr, node.tag),
            );
        }
        Scheme::Fragment(id) => {
            // Bare '#' targets the top of the page
            if !id.is_empty() && !document.state.anchor_ids.contains(id) {
                sink.emit(Level::Error, format!("hash does not exist: #{}", id));
            }
        }
        Scheme::External(url) => {
            if session.opts.skip_external {
                return;
            }
            let key = url.to_string();
            let (result, _from_cache) = session
                .ref_cache
                .resolve(&key, || probe_external(session, key.clone()))
                .await;
            if !result.is_valid() {
                let detail = result.detail.as_deref().unwrap_or("unknown");
                sink.emit(
                    Level::Error,
                    format!(
                        "{} target unreachable: {} ({})",
                        reference.kind.label(),
                        reference.raw,
                        detail
                    ),
                );
            }
        }
        Scheme::Internal => {
            let target = resolve_target(session, document, reference);
            let key = format!("file://{}", target.display());
            let (result, _from_cache) = session
                .ref_cache
                .resolve(&key, || probe_file(session, target.clone()))
                .await;
            if !result.is_valid() {
                sink.emit(
                    Level::Error,
                    format!(
                        "{} target does not exist: {}",
                        reference.kind.label(),
                        reference.raw
                    ),
                );
            }
        }
    }
}

/// Map an internal reference onto the on-disk path it must hit.
fn resolve_target(session: &Session, document: &Document, reference: &Reference) -> PathBuf {
    let path_part = reference.path_part();
    let base = &session.opts.directory_path;
    let mut target = if let Some(rooted) = path_part.strip_prefix('/') {
        base.join(rooted)
    } else {
        base.join(document.site_dir()).join(path_part)
    };
    if path_part.ends_with('/') {
        target = target.join(&session.opts.directory_index);
    }
    normalize_path(&target)
}

/// Filesystem stat, gated by the fetch limiter. Directories resolve through
/// the configured directory index.
async fn probe_file(session: &Session, target: PathBuf) -> CheckedRef {
    let _permit = match session.fetch_gate.acquire().await {
        Ok(permit) => permit,
        Err(_) => return CheckedRef::error("fetch limiter closed"),
    };
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => {
            let index = target.join(&session.opts.directory_index);
            if tokio::fs::metadata(&index).await.is_ok() {
                CheckedRef::valid()
            } else {
                CheckedRef::invalid("missing directory index")
            }
        }
        Ok(_) => CheckedRef::valid(),
        Err(_) => CheckedRef::invalid("no such file"),
    }
}

/// Network probe, gated by the fetch limiter. HEAD first; servers that
/// reject HEAD outright get one GET.
async fn probe_external(session: &Session, url: String) -> CheckedRef {
    let _permit = match session.fetch_gate.acquire().await {
        Ok(permit) => permit,
        Err(_) => return CheckedRef::error("fetch limiter closed"),
    };
    match session.client.head(&url).send().await {
        Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
            match session.client.get(&url).send().await {
                Ok(response) => classify_status(response.status()),
                Err(err) => classify_transport(&err),
            }
        }
        Ok(response) => classify_status(response.status()),
        Err(err) => classify_transport(&err),
    }
}

fn classify_status(status: StatusCode) -> CheckedRef {
    if status.is_success() || status.is_redirection() {
        CheckedRef::valid()
    } else {
        CheckedRef::invalid(format!("HTTP {}", status.as_u16()))
    }
}

fn classify_transport(err: &reqwest::Error) -> CheckedRef {
    if err.is_timeout() {
        CheckedRef::error("request timed out")
    } else if err.is_connect() {
        CheckedRef::error("connection failed")
    } else {
        CheckedRef::error(format!("request failed: {}", err))
    }
}
