use url::Url;

use crate::error::ArchiveError;

/// Clean up a user-typed URL and make sure it is something we can archive.
///
/// - collapses doubled scheme prefixes (`https://https://x` → `https://x`)
/// - defaults to `https://` when no scheme is given
/// - accepts only `http` and `https` with a host
///
/// The cleaned text is returned as typed; it is not re-serialized.
pub fn normalize_url(raw: &str) -> Result<String, ArchiveError> {
    let mut url = raw.trim().to_string();
    if url.is_empty() {
        return Err(ArchiveError::InvalidUrl("empty URL".into()));
    }

    for (doubled, single) in [
        ("https://https://", "https://"),
        ("http://http://", "http://"),
        ("https://http://", "https://"),
        ("http://https://", "https://"),
    ] {
        while url.starts_with(doubled) {
            url = url.replacen(doubled, single, 1);
        }
    }

    if !url.contains("://") {
        url = format!("https://{url}");
    }

    let parsed = Url::parse(&url).map_err(|e| ArchiveError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ArchiveError::InvalidUrl(format!(
                "scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ArchiveError::InvalidUrl(format!("{url} has no host")));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_double_scheme() {
        assert_eq!(
            normalize_url("https://https://example.com/a").unwrap(),
            "https://example.com/a"
        );
        assert_eq!(
            normalize_url("https://http://example.com").unwrap(),
            "https://example.com"
        );
        assert_eq!(
            normalize_url("http://http://example.com").unwrap(),
            "http://example.com"
        );
    }

    #[test]
    fn test_normalize_adds_https() {
        assert_eq!(
            normalize_url("  example.com/page ").unwrap(),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_url(""),
            Err(ArchiveError::InvalidUrl(_))
        ));
        assert!(matches!(
            normalize_url("file:///etc/passwd"),
            Err(ArchiveError::InvalidUrl(_))
        ));
        assert!(matches!(
            normalize_url("https://"),
            Err(ArchiveError::InvalidUrl(_))
        ));
    }
}
