use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::error::ValidationError;

static SCHEME: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^https?://")
        .case_insensitive(true)
        .build()
        .expect("valid scheme pattern")
});

pub fn normalize_url(raw: &str) -> Result<String, ValidationError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    if SCHEME.is_match(url) {
        Ok(url.to_owned())
    } else {
        Ok(format!("https://{url}"))
    }
}

pub fn link_label<'a>(text: &'a str, url: &'a str) -> &'a str {
    let text = text.trim();
    if text.is_empty() {
        url
    } else {
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedLink {
    pub index: usize,
    pub text: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_get_https() {
        assert_eq!(normalize_url(" example.com/a ").unwrap(), "https://example.com/a");
        assert_eq!(normalize_url("HTTP://x.org").unwrap(), "HTTP://x.org");
        assert_eq!(normalize_url("https://x.org").unwrap(), "https://x.org");
        assert_eq!(
            normalize_url("ftp://x.org").unwrap(),
            "https://ftp://x.org"
        );
    }

    #[test]
    fn blank_url_is_rejected() {
        assert_eq!(normalize_url("   "), Err(ValidationError::EmptyUrl));
    }

    #[test]
    fn label_falls_back_to_url() {
        assert_eq!(link_label("  ", "https://x.org"), "https://x.org");
        assert_eq!(link_label(" Docs ", "https://x.org"), "Docs");
    }
}
