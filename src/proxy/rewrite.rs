//! Path rewriting and target URL construction.

use url::Url;

use crate::error::{GatewayError, Result};

/// Apply `strip` then `add` to `path`. The result always starts with `/`.
///
/// `strip` only matches whole segments: `/api` strips `/api/x` but not `/apis/x`.
pub fn rewrite_path(path: &str, strip: Option<&str>, add: Option<&str>) -> String {
    let stripped = strip
        .map(|p| p.trim_end_matches('/'))
        .filter(|p| !p.is_empty())
        .and_then(|prefix| path.strip_prefix(prefix))
        .filter(|rest| rest.is_empty() || rest.starts_with('/'));
    let mut rewritten = stripped.unwrap_or(path).to_string();
    if !rewritten.starts_with('/') {
        rewritten.insert(0, '/');
    }

    match add.map(|p| p.trim_end_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) if prefix.starts_with('/') => format!("{prefix}{rewritten}"),
        Some(prefix) => format!("/{prefix}{rewritten}"),
        None => rewritten,
    }
}

/// Absolute URL for `path` on `base_url`, with `query` appended in order.
pub fn build_target_url(base_url: &str, path: &str, query: &[(String, String)]) -> Result<Url> {
    let mut url = Url::parse(base_url).map_err(|e| {
        GatewayError::InvalidRequest(format!("invalid upstream url {base_url}: {e}"))
    })?;
    url.set_path(path);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Decode a raw query string into ordered pairs.
pub fn parse_query(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .into_owned()
            .collect()
    })
    .unwrap_or_default()
}
