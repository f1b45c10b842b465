use std::net::{IpAddr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Reasons a URL is refused as a feed source.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeedUrlError {
    #[error("Invalid URL: {0}")]
    Invalid(#[from] url::ParseError),

    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    /// Loopback, private, link-local or unspecified address.
    #[error("Internal address not allowed: {0}")]
    InternalHost(String),
}

/// Parse and check a URL before it is stored as a feed.
///
/// Only `http` and `https` are accepted. Hosts that resolve to the local
/// machine or a private network by their literal form are refused, since
/// every stored feed is fetched by the scheduler on behalf of its
/// subscribers. Names other than `localhost` are not resolved here.
///
/// Returns the normalized URL string, which is the key feeds are stored
/// under.
///
/// ```
/// use pithy::util::validate_feed_url;
///
/// let url = validate_feed_url("HTTPS://Example.com/feed.xml").unwrap();
/// assert_eq!(url, "https://example.com/feed.xml");
///
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// assert!(validate_feed_url("http://10.0.0.1/rss").is_err());
/// ```
pub fn validate_feed_url(input: &str) -> Result<String, FeedUrlError> {
    let url = Url::parse(input.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(FeedUrlError::UnsupportedScheme(url.scheme().to_owned()));
    }

    let internal = match url.host() {
        None => return Err(FeedUrlError::MissingHost),
        Some(Host::Domain(name)) => {
            let name = name.trim_end_matches('.');
            name.eq_ignore_ascii_case("localhost") || name.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => is_internal(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_internal(IpAddr::V6(ip)),
    };
    if internal {
        return Err(FeedUrlError::InternalHost(
            url.host_str().unwrap_or_default().to_owned(),
        ));
    }

    Ok(url.into())
}

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_internal(IpAddr::V4(v4)),
            None => v6.is_loopback() || v6.is_unspecified() || is_local_v6(&v6),
        },
    }
}

/// fc00::/7 (unique local) and fe80::/10 (link local)
fn is_local_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_accepted() {
        assert_eq!(
            validate_feed_url("https://example.com/feed.xml").unwrap(),
            "https://example.com/feed.xml"
        );
        assert_eq!(
            validate_feed_url("  http://news.example.org:8080/rss ").unwrap(),
            "http://news.example.org:8080/rss"
        );
        assert_eq!(
            validate_feed_url("http://93.184.216.34/atom").unwrap(),
            "http://93.184.216.34/atom"
        );
    }

    #[test]
    fn test_normalization() {
        assert_eq!(
            validate_feed_url("HTTP://EXAMPLE.com").unwrap(),
            "http://example.com/"
        );
    }

    #[test]
    fn test_unsupported_schemes() {
        assert_eq!(
            validate_feed_url("file:///etc/passwd"),
            Err(FeedUrlError::UnsupportedScheme("file".to_string()))
        );
        assert!(matches!(
            validate_feed_url("ftp://example.com/feed"),
            Err(FeedUrlError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_unparsable() {
        assert!(matches!(
            validate_feed_url("not a url"),
            Err(FeedUrlError::Invalid(_))
        ));
        assert!(matches!(validate_feed_url(""), Err(FeedUrlError::Invalid(_))));
    }

    #[test]
    fn test_internal_hosts_rejected() {
        for url in [
            "http://localhost/feed",
            "http://LOCALHOST./feed",
            "http://app.localhost/feed",
            "http://127.0.0.1/feed",
            "http://10.0.0.1/feed",
            "http://172.16.0.1/feed",
            "http://192.168.1.1:8080/feed",
            "http://169.254.1.1/feed",
            "http://0.0.0.0/feed",
            "http://[::1]/feed",
            "http://[fe80::1]/feed",
            "http://[fd00::1]/feed",
            "http://[::ffff:127.0.0.1]/feed",
        ] {
            assert!(
                matches!(validate_feed_url(url), Err(FeedUrlError::InternalHost(_))),
                "{url} should be rejected"
            );
        }
    }
}
