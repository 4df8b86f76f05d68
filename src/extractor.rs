/* src/extractor.rs */

use http::HeaderValue;
use std::net::IpAddr;

use crate::error::{RealIpError, Result};
use crate::ranges::is_private_or_local;

/// Parse a textual IP address into its canonical form.
///
/// IPv4-mapped IPv6 addresses are folded to plain IPv4 so they match IPv4
/// ranges and print the way clients expect.
pub fn parse_ip(value: &str) -> Option<IpAddr> {
    value.parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// Extract the connection-layer source IP from a `host:port` peer address.
///
/// IPv6 hosts must be bracketed, e.g. `[::1]:8080`.
///
/// # Examples
///
/// ```rust
/// use trusted_real_ip::source_ip;
///
/// assert_eq!(source_ip("203.0.113.7:443").unwrap().to_string(), "203.0.113.7");
/// assert_eq!(source_ip("[2001:db8::1]:443").unwrap().to_string(), "2001:db8::1");
/// assert!(source_ip("203.0.113.7").is_err());
/// ```
pub fn source_ip(peer: &str) -> Result<IpAddr> {
    let host = split_host(peer).ok_or_else(|| RealIpError::MalformedPeerAddress(peer.to_string()))?;
    let ip = parse_ip(host).ok_or_else(|| RealIpError::InvalidIpFormat(host.to_string()))?;

    tracing::debug!(ip = %ip, "Parsed source IP");
    Ok(ip)
}

/// Split the host from a `host:port` string. The port itself is not validated.
fn split_host(addr: &str) -> Option<&str> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        if port.contains(['[', ']']) {
            return None;
        }
        return Some(host);
    }

    let (host, _port) = addr.rsplit_once(':')?;
    if host.contains([':', '[', ']']) {
        return None;
    }
    Some(host)
}

/// Require exactly one header line and return it as text.
fn single_line<'a>(header: &'static str, lines: &[&'a HeaderValue]) -> Result<&'a str> {
    let &[line] = lines else {
        return Err(RealIpError::AmbiguousHeader {
            header,
            count: lines.len(),
        });
    };

    line.to_str().map_err(|_| RealIpError::InvalidHeaderValue {
        header,
        value: String::from_utf8_lossy(line.as_bytes()).into_owned(),
    })
}

/// Extractor for single-hop headers (`Cf-Connecting-Ip`, `Eo-Connecting-Ip`, `X-Real-IP`).
///
/// The value is taken as-is once the header is accepted: no private/local
/// filtering, since acceptance already implies a trusted peer.
pub fn single_ip(header: &'static str, lines: &[&HeaderValue]) -> Result<IpAddr> {
    let value = single_line(header, lines)?;
    tracing::debug!(header, value, "Parsing header");

    let ip = parse_ip(value.trim()).ok_or_else(|| RealIpError::InvalidHeaderValue {
        header,
        value: value.to_string(),
    })?;

    tracing::debug!(header, ip = %ip, "Found valid header IP");
    Ok(ip)
}

/// Extractor for forwarded-for chains.
///
/// Walks the comma-separated candidates left to right and returns the first
/// one that is not private/local. Unparseable tokens are skipped.
pub fn forwarded_chain(header: &'static str, lines: &[&HeaderValue]) -> Result<IpAddr> {
    let value = single_line(header, lines)?;
    tracing::debug!(header, value, "Parsing header");

    value
        .split(',')
        .map(str::trim)
        .filter_map(|token| {
            let ip = parse_ip(token);
            if ip.is_none() {
                tracing::debug!(header, value = token, "Invalid IP format in chain, skipping");
            }
            ip
        })
        .find(|ip| {
            if is_private_or_local(*ip) {
                tracing::debug!(header, ip = %ip, "Chain entry is a local IP, skipping");
                return false;
            }
            tracing::debug!(header, ip = %ip, "Found valid chain IP");
            true
        })
        .ok_or(RealIpError::NoValidCandidateInChain { header })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn value(s: &str) -> HeaderValue {
        HeaderValue::from_str(s).unwrap()
    }

    #[test]
    fn test_source_ip() {
        assert_eq!(source_ip("192.168.1.1:12345"), Ok(ip("192.168.1.1")));
        assert_eq!(source_ip("[::1]:80"), Ok(ip("::1")));
        assert_eq!(source_ip("[::ffff:10.0.0.1]:80"), Ok(ip("10.0.0.1")));
        assert_eq!(source_ip("10.0.0.1:"), Ok(ip("10.0.0.1")));
    }

    #[test]
    fn test_source_ip_malformed() {
        for peer in ["192.168.1.1", "", "::1", "[::1]", "[::1]80", "1:2:3"] {
            assert_eq!(
                source_ip(peer),
                Err(RealIpError::MalformedPeerAddress(peer.to_string())),
                "{peer}"
            );
        }
    }

    #[test]
    fn test_source_ip_not_an_ip() {
        assert_eq!(
            source_ip("invalid:80"),
            Err(RealIpError::InvalidIpFormat("invalid".to_string()))
        );
        assert_eq!(
            source_ip("[example]:80"),
            Err(RealIpError::InvalidIpFormat("example".to_string()))
        );
    }

    #[test]
    fn test_single_ip() {
        let v = value("203.0.113.10");
        assert_eq!(single_ip("X-Real-IP", &[&v]), Ok(ip("203.0.113.10")));

        let private = value("192.168.1.100");
        assert_eq!(single_ip("Cf-Connecting-Ip", &[&private]), Ok(ip("192.168.1.100")));
    }

    #[test]
    fn test_single_ip_rejects_duplicates() {
        let a = value("1.1.1.1");
        let b = value("1.1.1.1");
        assert_eq!(
            single_ip("X-Real-IP", &[&a, &b]),
            Err(RealIpError::AmbiguousHeader { header: "X-Real-IP", count: 2 })
        );
    }

    #[test]
    fn test_single_ip_invalid_value() {
        let v = value("invalid-ip");
        let err = single_ip("Cf-Connecting-Ip", &[&v]).unwrap_err();
        assert_eq!(err.to_string(), "invalid IP format in Cf-Connecting-Ip: invalid-ip");

        let list = value("1.1.1.1, 2.2.2.2");
        assert!(single_ip("X-Real-IP", &[&list]).is_err());
    }

    #[test]
    fn test_single_ip_non_utf8() {
        let v = HeaderValue::from_bytes(b"\xff1.1.1.1").unwrap();
        assert!(matches!(
            single_ip("X-Real-IP", &[&v]),
            Err(RealIpError::InvalidHeaderValue { header: "X-Real-IP", .. })
        ));
    }

    #[test]
    fn test_forwarded_chain_first_public() {
        let v = value("1.2.3.4, 192.168.1.1");
        assert_eq!(forwarded_chain("X-Forwarded-For", &[&v]), Ok(ip("1.2.3.4")));

        let v = value("10.0.0.1,  203.0.113.10 ,198.51.100.1");
        assert_eq!(forwarded_chain("X-Forwarded-For", &[&v]), Ok(ip("203.0.113.10")));
    }

    #[test]
    fn test_forwarded_chain_skips_garbage() {
        let v = value("garbage, , fe80::1, 2001:db8::5");
        assert_eq!(forwarded_chain("X-Forwarded-For", &[&v]), Ok(ip("2001:db8::5")));
    }

    #[test]
    fn test_forwarded_chain_exhausted() {
        for chain in ["192.168.1.1, 10.0.0.1", "not-an-ip", "", "127.0.0.1, ::1"] {
            let v = value(chain);
            assert_eq!(
                forwarded_chain("X-Forwarded-For", &[&v]),
                Err(RealIpError::NoValidCandidateInChain { header: "X-Forwarded-For" }),
                "{chain}"
            );
        }
    }

    #[test]
    fn test_forwarded_chain_rejects_duplicates() {
        let a = value("1.2.3.4");
        let b = value("5.6.7.8");
        assert_eq!(
            forwarded_chain("X-Forwarded-For", &[&a, &b]),
            Err(RealIpError::AmbiguousHeader { header: "X-Forwarded-For", count: 2 })
        );
    }
}
