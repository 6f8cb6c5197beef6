use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use sha2::{Digest, Sha256};

/// Query parameters that change per signed link without changing the content.
const TRANSIENT_PARAMS: &[&str] = &["token", "signature", "expires"];

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s<>()\[\]]+").expect("Invalid regex"));

/// Normalize a URL so that signed variants of the same object share one form.
///
/// Drops the fragment and any `token`, `signature` or `expires` parameter
/// (case-insensitive). Other parameters keep their order. Input that does not
/// parse as a URL is returned trimmed.
pub fn canonicalize(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRANSIENT_PARAMS.iter().any(|t| k.eq_ignore_ascii_case(t)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    url.to_string()
}

/// Hex SHA-256 of the canonical form.
pub fn cache_key(raw: &str) -> String {
    hex::encode(Sha256::digest(canonicalize(raw).as_bytes()))
}

/// First http(s) URL in free text, with trailing sentence punctuation removed.
pub fn extract_first_url(text: &str) -> Option<String> {
    URL_PATTERN
        .find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', '"', '\'']))
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}
