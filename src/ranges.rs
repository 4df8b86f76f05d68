/* src/ranges.rs */

use ipnet::IpNet;
use std::net::IpAddr;

/// Loopback, RFC1918, IPv6 unique-local and link-local blocks.
pub const LOCAL_RANGES: &[&str] = &[
    "127.0.0.0/8",    // IPv4 loopback
    "10.0.0.0/8",     // RFC1918
    "172.16.0.0/12",  // RFC1918
    "192.168.0.0/16", // RFC1918
    "::1/128",        // IPv6 loopback
    "fc00::/7",       // IPv6 unique local
    "fe80::/10",      // IPv6 link-local
];

/// Immutable set of trusted network blocks.
///
/// Order and duplicates do not affect membership. The set is assembled once
/// when the middleware is built and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkRangeSet {
    blocks: Vec<IpNet>,
}

impl NetworkRangeSet {
    /// Create an empty set. Nothing is trusted until blocks are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// The hardcoded local ranges.
    pub fn local() -> Self {
        Self {
            blocks: parse_embedded(LOCAL_RANGES),
        }
    }

    /// Add a block.
    pub fn with_block(mut self, block: IpNet) -> Self {
        self.blocks.push(block);
        self
    }

    /// Add several blocks.
    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = IpNet>) -> Self {
        self.blocks.extend(blocks);
        self
    }

    pub fn blocks(&self) -> &[IpNet] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Trust predicate: true iff some block contains `ip`.
    ///
    /// There is no implicit allowance for private addresses here; they are
    /// trusted only when the set was seeded with [`LOCAL_RANGES`].
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if self.blocks.iter().any(|block| block.contains(&ip)) {
            return true;
        }

        tracing::debug!(ip = %ip, "IP is not trusted");
        false
    }
}

impl FromIterator<IpNet> for NetworkRangeSet {
    fn from_iter<T: IntoIterator<Item = IpNet>>(iter: T) -> Self {
        Self {
            blocks: iter.into_iter().collect(),
        }
    }
}

/// Parse a list of CIDR literals, silently dropping malformed entries.
///
/// Only meant for the embedded lists compiled into this crate.
pub(crate) fn parse_embedded(cidrs: &[&str]) -> Vec<IpNet> {
    cidrs.iter().filter_map(|cidr| cidr.parse::<IpNet>().ok()).collect()
}

/// Check if an IP is loopback, private-use or link-local (unicast or multicast).
///
/// Independent of any configured trust; used to skip internal hops in a
/// forwarded-for chain.
pub fn is_private_or_local(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || (octets[0] == 224 && octets[1] == 0 && octets[2] == 0) // 224.0.0.0/24
        }
        IpAddr::V6(ipv6) => {
            let first = ipv6.segments()[0];
            ipv6.is_loopback()
                || (first & 0xfe00) == 0xfc00 // Unique local
                || (first & 0xffc0) == 0xfe80 // Link local
                || (first & 0xff0f) == 0xff02 // Link-local multicast
        }
    }
}
