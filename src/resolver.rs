/* src/resolver.rs */

use http::{HeaderMap, HeaderName, HeaderValue};
use std::{net::IpAddr, sync::Arc};

use crate::error::Result;
use crate::extractor::{forwarded_chain, single_ip, source_ip};
use crate::ranges::NetworkRangeSet;

pub const CF_CONNECTING_IP: HeaderName = HeaderName::from_static("cf-connecting-ip");
pub const EO_CONNECTING_IP: HeaderName = HeaderName::from_static("eo-connecting-ip");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_IS_TRUSTED: HeaderName = HeaderName::from_static("x-is-trusted");

/// Extracts one candidate client IP from all lines of a single header.
pub type Extract = fn(&'static str, &[&HeaderValue]) -> Result<IpAddr>;

/// One entry of the header priority table.
#[derive(Debug, Clone)]
pub struct HeaderSource {
    pub name: HeaderName,
    /// Canonical spelling used in logs and error messages.
    pub label: &'static str,
    pub extract: Extract,
}

impl HeaderSource {
    pub const fn new(name: HeaderName, label: &'static str, extract: Extract) -> Self {
        Self {
            name,
            label,
            extract,
        }
    }
}

/// Headers consulted for trusted peers, highest priority first.
pub const DEFAULT_SOURCES: [HeaderSource; 4] = [
    HeaderSource::new(CF_CONNECTING_IP, "Cf-Connecting-Ip", single_ip),
    HeaderSource::new(EO_CONNECTING_IP, "Eo-Connecting-Ip", single_ip),
    HeaderSource::new(X_REAL_IP, "X-Real-IP", single_ip),
    HeaderSource::new(X_FORWARDED_FOR, "X-Forwarded-For", forwarded_chain),
];

/// Outcome of resolving one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// The resolved client IP.
    pub client_ip: IpAddr,
    /// The connection-layer peer IP.
    pub source_ip: IpAddr,
    /// Whether the peer is inside the trusted range set.
    pub trusted: bool,
}

/// The trust resolution engine.
///
/// Pure over its inputs: it never touches the request, so one instance is
/// shared by every request handled by a middleware.
#[derive(Debug, Clone)]
pub struct Resolver {
    ranges: Arc<NetworkRangeSet>,
    sources: Arc<[HeaderSource]>,
}

impl Resolver {
    /// Create a resolver over `ranges` with the default header priority.
    pub fn new(ranges: NetworkRangeSet) -> Self {
        Self {
            ranges: Arc::new(ranges),
            sources: Arc::new(DEFAULT_SOURCES),
        }
    }

    /// Replace the header priority table.
    pub fn with_sources(mut self, sources: Vec<HeaderSource>) -> Self {
        self.sources = sources.into();
        self
    }

    pub fn ranges(&self) -> &NetworkRangeSet {
        &self.ranges
    }

    pub fn sources(&self) -> &[HeaderSource] {
        &self.sources
    }

    /// Whether `ip` may assert a different client IP through headers.
    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.ranges.contains(ip)
    }

    /// Resolve the client IP from a raw `host:port` peer address.
    pub fn resolve_peer(&self, peer: &str, headers: &HeaderMap) -> Result<Resolution> {
        self.resolve(source_ip(peer)?, headers)
    }

    /// Resolve the client IP of a request from `source_ip`.
    ///
    /// Headers are never read for untrusted peers. For trusted peers the
    /// first present header in priority order decides: a valid value wins,
    /// an invalid one fails the whole resolution. Without any header the
    /// source IP is returned.
    pub fn resolve(&self, source_ip: IpAddr, headers: &HeaderMap) -> Result<Resolution> {
        let source_ip = source_ip.to_canonical();
        let trusted = self.is_trusted(source_ip);
        let resolved = |client_ip| Resolution {
            client_ip,
            source_ip,
            trusted,
        };

        if !trusted {
            tracing::debug!(ip = %source_ip, "Source IP is not trusted, ignoring headers");
            return Ok(resolved(source_ip));
        }

        for source in self.sources.iter() {
            let lines: Vec<&HeaderValue> = headers.get_all(&source.name).iter().collect();
            tracing::debug!(header = source.label, exists = !lines.is_empty(), "Checking header");

            if lines.is_empty() {
                continue;
            }

            let client_ip = (source.extract)(source.label, &lines)?;
            return Ok(resolved(client_ip));
        }

        tracing::debug!("No trusted headers found, returning source IP");
        Ok(resolved(source_ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RealIpError;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn resolver() -> Resolver {
        Resolver::new(NetworkRangeSet::local().with_block("103.21.244.0/22".parse().unwrap()))
    }

    fn headers(pairs: &[(HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_cf_connecting_ip_from_trusted_source() {
        let res = resolver()
            .resolve(ip("103.21.244.23"), &headers(&[(CF_CONNECTING_IP, "192.168.1.100")]))
            .unwrap();
        assert_eq!(res.client_ip, ip("192.168.1.100"));
        assert!(res.trusted);
    }

    #[test]
    fn test_untrusted_source_ignores_all_headers() {
        let all = headers(&[
            (CF_CONNECTING_IP, "192.168.1.100"),
            (EO_CONNECTING_IP, "5.5.5.5"),
            (X_REAL_IP, "invalid"),
            (X_FORWARDED_FOR, "1.2.3.4"),
            (X_FORWARDED_FOR, "5.6.7.8"),
        ]);
        let res = resolver().resolve(ip("2.2.2.2"), &all).unwrap();
        assert_eq!(
            res,
            Resolution {
                client_ip: ip("2.2.2.2"),
                source_ip: ip("2.2.2.2"),
                trusted: false,
            }
        );
    }

    #[test]
    fn test_trusted_source_without_headers() {
        let res = resolver().resolve(ip("10.0.0.1"), &HeaderMap::new()).unwrap();
        assert_eq!(res.client_ip, ip("10.0.0.1"));
        assert!(res.trusted);
    }

    #[test]
    fn test_priority_order() {
        let r = resolver();
        let src = ip("10.0.0.1");

        let res = r
            .resolve(src, &headers(&[(X_REAL_IP, "203.0.113.10"), (CF_CONNECTING_IP, "198.51.100.1")]))
            .unwrap();
        assert_eq!(res.client_ip, ip("198.51.100.1"));

        let res = r
            .resolve(src, &headers(&[(X_REAL_IP, "203.0.113.10"), (EO_CONNECTING_IP, "198.51.100.2")]))
            .unwrap();
        assert_eq!(res.client_ip, ip("198.51.100.2"));

        let res = r
            .resolve(src, &headers(&[(X_FORWARDED_FOR, "1.2.3.4"), (X_REAL_IP, "203.0.113.10")]))
            .unwrap();
        assert_eq!(res.client_ip, ip("203.0.113.10"));
    }

    #[test]
    fn test_forwarded_for_from_trusted_source() {
        let res = resolver()
            .resolve(ip("192.168.1.1"), &headers(&[(X_FORWARDED_FOR, "1.2.3.4, 192.168.1.1")]))
            .unwrap();
        assert_eq!(res.client_ip, ip("1.2.3.4"));
    }

    #[test]
    fn test_forwarded_for_only_private_fails() {
        let err = resolver()
            .resolve(ip("192.168.1.1"), &headers(&[(X_FORWARDED_FOR, "192.168.1.1, 10.0.0.1")]))
            .unwrap_err();
        assert_eq!(err, RealIpError::NoValidCandidateInChain { header: "X-Forwarded-For" });
    }

    #[test]
    fn test_invalid_trusted_header_does_not_fall_through() {
        let err = resolver()
            .resolve(
                ip("192.168.1.1"),
                &headers(&[(CF_CONNECTING_IP, "invalid-ip"), (X_REAL_IP, "203.0.113.10")]),
            )
            .unwrap_err();
        assert!(matches!(err, RealIpError::InvalidHeaderValue { header: "Cf-Connecting-Ip", .. }));
    }

    #[test]
    fn test_duplicate_header_fails() {
        let err = resolver()
            .resolve(ip("10.0.0.1"), &headers(&[(X_REAL_IP, "1.1.1.1"), (X_REAL_IP, "1.1.1.1")]))
            .unwrap_err();
        assert_eq!(err, RealIpError::AmbiguousHeader { header: "X-Real-IP", count: 2 });
    }

    #[test]
    fn test_header_names_are_case_insensitive() {
        let mut map = HeaderMap::new();
        map.insert(
            HeaderName::from_bytes(b"CF-CONNECTING-IP").unwrap(),
            HeaderValue::from_static("9.9.9.9"),
        );
        let res = resolver().resolve(ip("127.0.0.1"), &map).unwrap();
        assert_eq!(res.client_ip, ip("9.9.9.9"));
    }

    #[test]
    fn test_resolve_peer() {
        let r = resolver();
        let res = r
            .resolve_peer("[::1]:4000", &headers(&[(X_REAL_IP, "2001:db8::7")]))
            .unwrap();
        assert_eq!(res.client_ip, ip("2001:db8::7"));

        assert_eq!(
            r.resolve_peer("10.0.0.1", &HeaderMap::new()),
            Err(RealIpError::MalformedPeerAddress("10.0.0.1".to_string()))
        );
    }

    #[test]
    fn test_custom_sources() {
        fn fixed(_: &'static str, _: &[&HeaderValue]) -> Result<IpAddr> {
            Ok(IpAddr::from([8, 8, 8, 8]))
        }

        let custom = HeaderName::from_static("x-client-ip");
        let r = resolver().with_sources(vec![HeaderSource::new(custom.clone(), "X-Client-IP", fixed)]);
        assert_eq!(r.sources().len(), 1);

        let res = r
            .resolve(ip("10.0.0.1"), &headers(&[(custom, "anything"), (X_REAL_IP, "1.1.1.1")]))
            .unwrap();
        assert_eq!(res.client_ip, ip("8.8.8.8"));
    }

    #[test]
    fn test_empty_range_set_trusts_nobody() {
        let r = Resolver::new(NetworkRangeSet::new());
        let res = r
            .resolve(ip("127.0.0.1"), &headers(&[(X_REAL_IP, "1.1.1.1")]))
            .unwrap();
        assert_eq!(res.client_ip, ip("127.0.0.1"));
        assert!(!res.trusted);
    }
}
