//! Trusted proxy resolution.
//!
//! # Responsibilities
//! - Hold the set of network prefixes whose traffic may override origin
//! - Decide whether a transport peer is inside that set
//! - Compute the effective client address, host and scheme
//!
//! # Design Decisions
//! - Built once at startup, shared read-only (no locking)
//! - Peer address tolerates `ip:port`, `[v6]:port` and bare `ip`
//! - The resolver is advisory; applying its output to the live request is
//!   the caller's job

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;
use thiserror::Error;

use crate::security::headers::ProxyHeaderPolicy;

/// Prefixes trusted by default: private ranges, loopback, ULA.
pub const DEFAULT_TRUSTED_PROXIES: &[&str] = &[
    "192.168.0.0/16",
    "172.16.0.0/12",
    "10.0.0.0/8",
    "127.0.0.1/8",
    "fd00::/8",
    "::1",
];

/// Error type for trust resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    /// The peer address could not be parsed as an IP address.
    #[error("malformed peer address {0:?}")]
    MalformedAddress(String),

    /// A trusted prefix entry could not be parsed.
    #[error("invalid trusted prefix {entry:?}: {reason}")]
    InvalidPrefix { entry: String, reason: String },
}

/// Ordered set of trusted network prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedPrefixSet {
    prefixes: Vec<IpNetwork>,
}

impl TrustedPrefixSet {
    /// Parse CIDR blocks and single addresses. A bare address becomes a
    /// single-host prefix.
    pub fn parse<I, S>(entries: I) -> Result<Self, TrustError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefixes = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            let invalid = |reason: String| TrustError::InvalidPrefix {
                entry: entry.to_string(),
                reason,
            };

            let network = if entry.contains('/') {
                entry
                    .parse::<IpNetwork>()
                    .map_err(|e| invalid(e.to_string()))?
            } else {
                let ip: IpAddr = entry.parse().map_err(|e: std::net::AddrParseError| invalid(e.to_string()))?;
                let bits = if ip.is_ipv4() { 32 } else { 128 };
                IpNetwork::new(ip, bits).map_err(|e| invalid(e.to_string()))?
            };
            prefixes.push(network);
        }
        Ok(Self { prefixes })
    }

    /// The built-in set from [`DEFAULT_TRUSTED_PROXIES`].
    pub fn defaults() -> Self {
        Self::parse(DEFAULT_TRUSTED_PROXIES).unwrap_or_else(|_| Self::empty())
    }

    /// A set that trusts nobody.
    pub fn empty() -> Self {
        Self {
            prefixes: Vec::new(),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.prefixes.iter().any(|network| network.contains(ip))
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

/// Outcome of resolving a request's origin.
///
/// `None` fields mean "keep the original request value".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// The transport peer is inside a trusted prefix.
    pub trusted: bool,
    /// Client address taken from a forwarding header.
    pub client_addr: Option<String>,
    /// Host taken from the forwarded host header.
    pub host: Option<String>,
    /// Scheme taken from a forwarding header, lower-cased.
    pub scheme: Option<String>,
}

impl Resolution {
    /// The effective peer: the forwarded client address, else `original`.
    pub fn effective_peer<'a>(&'a self, original: &'a str) -> &'a str {
        self.client_addr.as_deref().unwrap_or(original)
    }
}

/// Decides whether forwarding headers may override the perceived origin.
#[derive(Debug, Clone)]
pub struct TrustResolver {
    trusted: TrustedPrefixSet,
    policy: ProxyHeaderPolicy,
}

impl TrustResolver {
    pub fn new(trusted: TrustedPrefixSet, policy: ProxyHeaderPolicy) -> Self {
        Self { trusted, policy }
    }

    /// Resolve the origin of a request arriving from `peer_addr`.
    ///
    /// Headers are only read once the peer itself is trusted.
    pub fn resolve(&self, peer_addr: &str, headers: &HeaderMap) -> Result<Resolution, TrustError> {
        let ip = parse_peer_ip(peer_addr)?;
        if !self.trusted.contains(ip) {
            return Ok(Resolution::default());
        }

        Ok(Resolution {
            trusted: true,
            client_addr: self.policy.client_ip(headers),
            host: self.policy.host(headers),
            scheme: self.policy.scheme(headers),
        })
    }
}

impl Default for TrustResolver {
    fn default() -> Self {
        Self::new(TrustedPrefixSet::defaults(), ProxyHeaderPolicy::DEFAULT)
    }
}

/// Extract the IP from `ip:port`, `[v6]:port`, `[v6]` or a bare `ip`.
fn parse_peer_ip(peer_addr: &str) -> Result<IpAddr, TrustError> {
    if let Ok(addr) = peer_addr.parse::<SocketAddr>() {
        return Ok(addr.ip());
    }
    if let Ok(ip) = peer_addr.parse::<IpAddr>() {
        return Ok(ip);
    }

    let host = match peer_addr.strip_prefix('[') {
        Some(rest) => rest.split_once(']').map(|(host, _)| host),
        None => peer_addr.rsplit_once(':').map(|(host, _)| host),
    };
    host.and_then(|h| h.parse::<IpAddr>().ok())
        .ok_or_else(|| TrustError::MalformedAddress(peer_addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn forwarded() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 70.41.3.18"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("public.example.com"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("HTTPS"));
        headers
    }

    #[test]
    fn default_set_parses() {
        let set = TrustedPrefixSet::defaults();
        assert_eq!(set.len(), DEFAULT_TRUSTED_PROXIES.len());
        assert!(set.contains("127.0.0.1".parse().unwrap()));
        assert!(set.contains("127.9.9.9".parse().unwrap()));
        assert!(set.contains("10.1.2.3".parse().unwrap()));
        assert!(set.contains("172.31.255.255".parse().unwrap()));
        assert!(set.contains("::1".parse().unwrap()));
        assert!(set.contains("fd12::1".parse().unwrap()));
        assert!(!set.contains("172.32.0.1".parse().unwrap()));
        assert!(!set.contains("8.8.8.8".parse().unwrap()));
        assert!(!set.contains("::2".parse().unwrap()));
    }

    #[test]
    fn mapped_v4_peer_is_matched() {
        let set = TrustedPrefixSet::defaults();
        assert!(set.contains("::ffff:10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn invalid_prefix_rejected() {
        let err = TrustedPrefixSet::parse(["10.0.0.0/33"]).unwrap_err();
        assert!(matches!(err, TrustError::InvalidPrefix { .. }));
        assert!(TrustedPrefixSet::parse(["not-an-ip"]).is_err());
    }

    #[test]
    fn untrusted_peer_ignores_headers() {
        let resolver = TrustResolver::default();
        let resolution = resolver.resolve("8.8.8.8:1234", &forwarded()).unwrap();
        assert_eq!(resolution, Resolution::default());
        assert_eq!(resolution.effective_peer("8.8.8.8:1234"), "8.8.8.8:1234");
    }

    #[test]
    fn trusted_peer_uses_headers() {
        let resolver = TrustResolver::default();
        let resolution = resolver.resolve("10.0.0.7:51234", &forwarded()).unwrap();
        assert!(resolution.trusted);
        assert_eq!(resolution.client_addr.as_deref(), Some("203.0.113.5"));
        assert_eq!(resolution.host.as_deref(), Some("public.example.com"));
        assert_eq!(resolution.scheme.as_deref(), Some("https"));
    }

    #[test]
    fn trusted_peer_without_headers_keeps_originals() {
        let resolver = TrustResolver::default();
        let resolution = resolver.resolve("127.0.0.1", &HeaderMap::new()).unwrap();
        assert!(resolution.trusted);
        assert_eq!(resolution.client_addr, None);
        assert_eq!(resolution.host, None);
        assert_eq!(resolution.scheme, None);
        assert_eq!(resolution.effective_peer("127.0.0.1"), "127.0.0.1");
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let resolver = TrustResolver::default();
        let mut upper = HeaderMap::new();
        upper.insert(
            axum::http::HeaderName::from_bytes(b"X-Real-IP").unwrap(),
            HeaderValue::from_static("198.51.100.9"),
        );
        let mut lower = HeaderMap::new();
        lower.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));

        assert_eq!(
            resolver.resolve("[::1]:443", &upper).unwrap(),
            resolver.resolve("[::1]:443", &lower).unwrap()
        );
    }

    #[test]
    fn peer_address_forms() {
        assert_eq!(parse_peer_ip("10.0.0.1:80").unwrap(), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(parse_peer_ip("10.0.0.1").unwrap(), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(parse_peer_ip("[::1]:80").unwrap(), "::1".parse::<IpAddr>().unwrap());
        assert_eq!(parse_peer_ip("[::1]").unwrap(), "::1".parse::<IpAddr>().unwrap());
        assert_eq!(parse_peer_ip("::1").unwrap(), "::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn malformed_peer_address() {
        let resolver = TrustResolver::default();
        for bad in ["", "localhost:80", "not an address", "10.0.0.300:80"] {
            assert_eq!(
                resolver.resolve(bad, &HeaderMap::new()),
                Err(TrustError::MalformedAddress(bad.to_string()))
            );
        }
    }
}
