//! URL list input and normalization.

use std::collections::HashSet;
use std::path::Path;

use url::Url;

use crate::config::NormalizationConfig;
use crate::error::InputError;
use crate::job::Job;

/// Parses a URL list: one entry per line, blank lines and `#` comments
/// skipped, order preserved.
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn read_url_list(path: &Path) -> Result<Vec<String>, InputError> {
    let content = std::fs::read_to_string(path).map_err(|e| InputError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let urls = parse_url_list(&content);
    if urls.is_empty() {
        return Err(InputError::Empty(path.to_path_buf()));
    }
    Ok(urls)
}

/// Normalizes an http(s) URL so equivalent spellings share one job id.
///
/// Returns `None` for anything that is not an absolute http(s) URL.
pub fn normalize_url(raw: &str, policy: &NormalizationConfig) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let mut host = url.host_str()?.to_ascii_lowercase();
    if policy.strip_www {
        if let Some(stripped) = host.strip_prefix("www.") {
            host = stripped.to_string();
        }
    }

    let mut out = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        out.push_str(&format!(":{}", port));
    }
    out.push_str(url.path().trim_end_matches('/'));

    // Pairs are ordered by key so reordered query strings share one id.
    if policy.strip_query {
        let mut kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| policy.keep_query_params.iter().any(|k| k == key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        kept.sort_by(|a, b| a.0.cmp(&b.0));
        if !kept.is_empty() {
            let joined: Vec<String> = kept
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect();
            out.push('?');
            out.push_str(&joined.join("&"));
        }
    } else if let Some(query) = url.query() {
        let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
        pairs.sort_by_key(|pair| pair.split('=').next().unwrap_or(""));
        if !pairs.is_empty() {
            out.push('?');
            out.push_str(&pairs.join("&"));
        }
    }

    if !policy.strip_fragment {
        if let Some(fragment) = url.fragment() {
            out.push('#');
            out.push_str(fragment);
        }
    }

    Some(out)
}

/// True for absolute http(s) URLs, the only ones the downloader is handed.
pub fn is_supported(raw: &str) -> bool {
    Url::parse(raw.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

/// Creates one job per distinct normalized URL, keeping first-seen order.
///
/// Entries that fail to normalize still become jobs keyed by their trimmed
/// text; the download stage rejects them so they show up as failed rows.
pub fn build_jobs(urls: &[String], policy: &NormalizationConfig) -> Vec<Job> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::new();

    for raw in urls {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let normalized = normalize_url(raw, policy).unwrap_or_else(|| raw.to_string());
        if !seen.insert(normalized.clone()) {
            log::debug!("Skipping duplicate URL {}", crate::sanitize::redact_url(raw));
            continue;
        }
        jobs.push(Job::new(raw, normalized));
    }

    jobs
}
