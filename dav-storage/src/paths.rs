use std::borrow::Cow;
use std::path::Path;

/// Collapses `.`, `..` and repeated separators, and strips the leading separator.
///
/// `..` never climbs above the root. Backslashes are treated as separators.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Percent-encodes every segment of a normalized path, keeping `/` literal.
///
/// Segments are escaped one by one, so a `%2F` that is part of a name stays escaped.
pub fn encode(normalized: &str) -> String {
    normalized
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

pub fn decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| segment.to_string())
}

/// Decoded final segment of a multistatus href. Collection hrefs end in `/`.
pub fn basename(href: &str) -> String {
    let trimmed = href.trim_end_matches('/');
    decode(trimmed.rsplit('/').next().unwrap_or(trimmed))
}

/// Extension of the final segment including the dot, or an empty string.
pub fn extension(normalized: &str) -> String {
    let name = normalized.rsplit('/').next().unwrap_or(normalized);
    Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Mount roots always begin and end with a separator.
pub fn normalize_root(root: &str) -> String {
    let inner = normalize(root);
    if inner.is_empty() {
        "/".to_string()
    } else {
        format!("/{inner}/")
    }
}
