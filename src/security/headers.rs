//! Forwarding header policy.
//!
//! # Responsibilities
//! - Name the headers a trusted proxy may use to describe the client
//! - Pick the winning header value by fixed priority
//!
//! # Design Decisions
//! - Never consulted for untrusted peers
//! - Header lookup goes through `HeaderMap`, which is case-insensitive
//! - Only the first comma-separated token of a chained list is honored

use axum::http::HeaderMap;

/// Which forwarding headers are honored and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHeaderPolicy {
    /// Candidate client address headers, highest priority first.
    pub client_ip_headers: &'static [&'static str],
    /// Candidate scheme headers, highest priority first.
    pub scheme_headers: &'static [&'static str],
    /// Forwarded host header.
    pub host_header: &'static str,
}

impl ProxyHeaderPolicy {
    pub const DEFAULT: ProxyHeaderPolicy = ProxyHeaderPolicy {
        client_ip_headers: &[
            "X-Envoy-External-Address",
            "X-Forwarded-For",
            "X-Real-IP",
            "True-Client-IP",
        ],
        scheme_headers: &["X-Forwarded-Proto", "X-Forwarded-Scheme"],
        host_header: "X-Forwarded-Host",
    };

    /// Client address from the first non-empty client address header.
    ///
    /// `203.0.113.5, 70.41.3.18` yields `203.0.113.5`. A winning header
    /// whose first token is blank yields `None`.
    pub fn client_ip(&self, headers: &HeaderMap) -> Option<String> {
        let value = first_non_empty(headers, self.client_ip_headers)?;
        let first = value.split(',').next().unwrap_or_default().trim();
        (!first.is_empty()).then(|| first.to_string())
    }

    /// Scheme from the first non-empty scheme header, lower-cased.
    pub fn scheme(&self, headers: &HeaderMap) -> Option<String> {
        first_non_empty(headers, self.scheme_headers).map(|v| v.trim().to_ascii_lowercase())
    }

    /// Host from the forwarded host header.
    pub fn host(&self, headers: &HeaderMap) -> Option<String> {
        first_non_empty(headers, &[self.host_header]).map(str::to_string)
    }
}

impl Default for ProxyHeaderPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn first_non_empty<'h>(headers: &'h HeaderMap, names: &[&str]) -> Option<&'h str> {
    names
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .find(|value| !value.is_empty())
}
