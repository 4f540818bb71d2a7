//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Source URLs can carry session tokens in their query string or userinfo;
//! these functions keep them out of logs.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo, query and fragment from a URL.
///
/// - `https://user:pw@site.com/v/1?sig=abc` → `https://****@site.com/v/1`
/// - `https://site.com/v/1#t=3` → `https://site.com/v/1`
/// - anything without a scheme is returned unchanged
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };

    let scheme = &url[..scheme_end + 3];
    let rest = &url[scheme_end + 3..];
    let rest = rest.split(['?', '#']).next().unwrap_or_default();

    let host_end = rest.find('/').unwrap_or(rest.len());
    match rest[..host_end].rfind('@') {
        Some(at_pos) => format!("{}****@{}", scheme, &rest[at_pos + 1..]),
        None => format!("{}{}", scheme, rest),
    }
}
