//! Origin allow-list for inbound events.
//!
//! Entries are either exact origins (`https://dialpad.com`) or wildcard
//! patterns (`https://*.dialpad.com`). A wildcard entry matches any origin
//! with the same scheme whose hostname ends with the pattern's host once the
//! `*` is removed.

use url::Url;

/// Set of origins the client accepts messages from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginAllowList {
    patterns: Vec<String>,
}

impl OriginAllowList {
    /// Build an allow-list from exact origins and wildcard patterns.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if any entry admits `request_origin`.
    pub fn is_allowed(&self, request_origin: &str) -> bool {
        self.patterns
            .iter()
            .any(|allowed| is_allowed_origin(request_origin, allowed))
    }
}

/// Match one request origin against one allow-list entry.
pub fn is_allowed_origin(request_origin: &str, allowed_origin: &str) -> bool {
    if !allowed_origin.contains('*') {
        return request_origin == allowed_origin;
    }

    let pattern = allowed_origin.replacen('*', "", 1);
    let Some((scheme, rest)) = pattern.split_once("://") else {
        log::debug!("[Origin] Ignoring malformed wildcard entry: {allowed_origin}");
        return false;
    };
    let host = rest
        .split(['/', ':'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }

    let Ok(request) = Url::parse(request_origin) else {
        return false;
    };
    request.scheme().eq_ignore_ascii_case(scheme)
        && request.host_str().is_some_and(|h| h.ends_with(&host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(is_allowed_origin("https://dialpad.com", "https://dialpad.com"));
        assert!(!is_allowed_origin("https://dialpad.com:8443", "https://dialpad.com"));
        assert!(!is_allowed_origin("http://dialpad.com", "https://dialpad.com"));
    }

    #[test]
    fn test_wildcard_subdomain() {
        let pattern = "https://*.dialpad.com";
        assert!(is_allowed_origin("https://app.dialpad.com", pattern));
        assert!(is_allowed_origin("https://beta.app.dialpad.com", pattern));
        assert!(!is_allowed_origin("https://dialpad.com.evil.io", pattern));
        assert!(!is_allowed_origin("http://app.dialpad.com", pattern));
    }

    #[test]
    fn test_wildcard_with_port_ignores_port() {
        let pattern = "http://*.localhost:8087";
        assert!(is_allowed_origin("http://dev.localhost:9000", pattern));
    }

    #[test]
    fn test_unparseable_request_origin() {
        assert!(!is_allowed_origin("null", "https://*.dialpad.com"));
        assert!(!is_allowed_origin("", "https://*.dialpad.com"));
    }

    #[test]
    fn test_allow_list_any() {
        let list = OriginAllowList::new(["https://dialpad.com", "https://*.dialpadbeta.com"]);
        assert!(list.is_allowed("https://dialpad.com"));
        assert!(list.is_allowed("https://eu.dialpadbeta.com"));
        assert!(!list.is_allowed("https://attacker.example"));
        assert!(!OriginAllowList::default().is_allowed("https://dialpad.com"));
    }
}
