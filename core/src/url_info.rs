//! Parsed, validated endpoint URLs.
//!
//! # Design
//! Only `http` and `https` endpoints are accepted. A `UrlInfo` keeps the
//! pieces the connection needs to address requests: the origin
//! (`scheme://host:port`) and a base path without surrounding slashes, to
//! which percent-encoded path segments are appended.

use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{Result, StorageError};

/// Bytes left untouched when encoding a single path segment.
pub(crate) const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// The components of a storage, CDN or authentication endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlInfo {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl UrlInfo {
    /// `scheme://host:port`, always with an explicit port.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    /// Absolute path for `segments` below the base path. Each segment is
    /// percent-encoded on its own, so a `/` inside a segment is escaped.
    pub fn path_for<S: AsRef<str>>(&self, segments: &[S]) -> String {
        let base = self.path.trim_end_matches('/');
        let mut path = String::from("/");
        path.push_str(base);
        for segment in segments {
            if !path.ends_with('/') {
                path.push('/');
            }
            path.extend(utf8_percent_encode(segment.as_ref(), SEGMENT));
        }
        path
    }

    /// Absolute URL for `segments`, with an optional pre-encoded query string.
    pub fn url_for<S: AsRef<str>>(&self, segments: &[S], query: Option<&str>) -> String {
        let mut url = self.origin();
        url.push_str(&self.path_for(segments));
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Copy of this endpoint with `prefix` prepended to the host.
    pub fn with_host_prefix(&self, prefix: &str) -> UrlInfo {
        UrlInfo {
            host: format!("{prefix}{}", self.host),
            ..self.clone()
        }
    }
}

impl fmt::Display for UrlInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin(), self.path)
    }
}

/// Parse and validate an `http` or `https` URL.
///
/// The port defaults to 443 for https and 80 for http. The path is returned
/// without leading or trailing slashes; query and fragment are ignored.
pub fn parse_url(raw: &str) -> Result<UrlInfo> {
    let parsed = match Url::parse(raw.trim()) {
        Ok(parsed) => parsed,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Err(StorageError::InvalidUrl(
                "scheme must be one of http or https".to_string(),
            ))
        }
        Err(_) => {
            return Err(StorageError::InvalidUrl(
                "the string must be a valid URL".to_string(),
            ))
        }
    };

    let scheme = match parsed.scheme() {
        "http" => Scheme::Http,
        "https" => Scheme::Https,
        _ => {
            return Err(StorageError::InvalidUrl(
                "scheme must be one of http or https".to_string(),
            ))
        }
    };

    let host = parsed.host_str().unwrap_or_default();
    if !is_valid_host(host) {
        return Err(StorageError::InvalidUrl(format!(
            "invalid host and/or port: {host}"
        )));
    }

    let port = parsed.port().unwrap_or_else(|| scheme.default_port());
    if port == 0 {
        return Err(StorageError::InvalidUrl(format!(
            "invalid host and/or port: {host}:{port}"
        )));
    }

    Ok(UrlInfo {
        scheme,
        host: host.to_string(),
        port,
        path: parsed.path().trim_matches('/').to_string(),
    })
}

fn is_valid_host(host: &str) -> bool {
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.parse::<std::net::Ipv6Addr>().is_ok();
    }
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_defaults_to_port_80() {
        let info = parse_url("http://example.org").unwrap();
        assert_eq!(
            info,
            UrlInfo {
                scheme: Scheme::Http,
                host: "example.org".to_string(),
                port: 80,
                path: String::new(),
            }
        );
    }

    #[test]
    fn https_defaults_to_port_443_and_trims_path() {
        let info = parse_url("https://storage.example.org/v1/AUTH_test/").unwrap();
        assert_eq!(info.scheme, Scheme::Https);
        assert_eq!(info.port, 443);
        assert_eq!(info.path, "v1/AUTH_test");
    }

    #[test]
    fn explicit_port_wins() {
        let info = parse_url("https://127.0.0.1:8443/auth/v1.0").unwrap();
        assert_eq!(info.host, "127.0.0.1");
        assert_eq!(info.port, 8443);
        assert_eq!(info.path, "auth/v1.0");
    }

    #[test]
    fn rejects_non_http_schemes() {
        let err = parse_url("file:///etc/passwd").unwrap_err();
        match err {
            StorageError::InvalidUrl(msg) => assert_eq!(msg, "scheme must be one of http or https"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            parse_url("ftp://example.org/"),
            Err(StorageError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_missing_scheme_and_garbage() {
        assert!(matches!(parse_url("example.org"), Err(StorageError::InvalidUrl(_))));
        assert!(matches!(parse_url("http://"), Err(StorageError::InvalidUrl(_))));
        assert!(matches!(parse_url(""), Err(StorageError::InvalidUrl(_))));
    }

    #[test]
    fn rejects_port_zero() {
        assert!(matches!(
            parse_url("http://example.org:0/"),
            Err(StorageError::InvalidUrl(_))
        ));
    }

    #[test]
    fn segments_are_encoded_individually() {
        let info = parse_url("https://storage.example.org/v1/AUTH_test/").unwrap();
        assert_eq!(
            info.url_for(&["my container", "photos/cat.jpg"], None),
            "https://storage.example.org:443/v1/AUTH_test/my%20container/photos%2Fcat.jpg"
        );
    }

    #[test]
    fn empty_base_path_and_no_segments() {
        let info = parse_url("http://cdn.example.org").unwrap();
        assert_eq!(info.path_for::<&str>(&[]), "/");
        assert_eq!(info.path_for(&["c"]), "/c");
        assert_eq!(
            info.url_for(&["c"], Some("format=json")),
            "http://cdn.example.org:80/c?format=json"
        );
    }

    #[test]
    fn host_prefix_keeps_everything_else() {
        let info = parse_url("https://storage.example.org:8080/v1/acct").unwrap();
        let snet = info.with_host_prefix("snet-");
        assert_eq!(snet.host, "snet-storage.example.org");
        assert_eq!(snet.port, 8080);
        assert_eq!(snet.path, "v1/acct");
    }
}
