//! Resource classification.
//!
//! # Responsibilities
//! - Decide whether a URL is a page (main) or a pushable asset (secondary)
//! - Map a URL to the content type declared on its push stream
//!
//! # Design Decisions
//! - Suffix matching on the raw URL string; a query string is not stripped,
//!   so `/app.js?v=2` is a main resource
//! - Push eligibility and content types live in two separate tables. The
//!   content-type table covers more extensions than are ever pushed and must
//!   not be folded into the eligibility table.

/// Kind of resource a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A page; the key under which secondary resources are learned.
    Main,
    /// A pushable asset (stylesheet, script, image, font, icon).
    Secondary,
}

/// Suffixes that make a URL a secondary resource.
const SECONDARY_SUFFIXES: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".ico", ".woff",
];

/// Suffix to content-type table. First match wins.
const CONTENT_TYPES: &[(&str, &str)] = &[
    (".css", "text/css"),
    (".js", "application/javascript"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".gif", "image/gif"),
    (".ico", "image/x-icon"),
    (".woff", "application/octet-stream"),
    (".html", "text/html"),
    (".json", "application/json"),
    (".txt", "text/plain"),
];

/// Content type used when the table has no entry for a pushed URL.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Classify a URL as main or secondary.
pub fn classify(url: &str) -> ResourceKind {
    if SECONDARY_SUFFIXES.iter().any(|suffix| url.ends_with(suffix)) {
        ResourceKind::Secondary
    } else {
        ResourceKind::Main
    }
}

/// Look up the content type for a URL.
pub fn content_type(url: &str) -> Option<&'static str> {
    CONTENT_TYPES
        .iter()
        .find(|(suffix, _)| url.ends_with(suffix))
        .map(|(_, content_type)| *content_type)
}
