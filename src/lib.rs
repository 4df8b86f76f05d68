/* src/lib.rs */
//! # Trusted Real IP
//!
//! Resolves the trustworthy client IP of a request that arrived through one
//! or more reverse proxies, and stamps the result onto the forwarding
//! headers before handing the request to the next service.
//!
//! ## How a request is resolved
//!
//! - The connection peer is checked against a [`NetworkRangeSet`] (local
//!   ranges, Cloudflare/EdgeOne edge ranges, operator CIDRs).
//! - Untrusted peers: headers are ignored and the peer IP is the client IP.
//! - Trusted peers: `Cf-Connecting-Ip`, `Eo-Connecting-Ip`, `X-Real-IP` and
//!   `X-Forwarded-For` are consulted in that order. The first header present
//!   decides; a malformed value fails the request with `400 Bad Request`.
//! - `X-Is-Trusted`, `X-Real-IP` and `X-Forwarded-For` are then rewritten.
//!
//! ## Examples
//!
//! ### Resolving without a server
//!
//! ```rust
//! use trusted_real_ip::{NetworkRangeSet, Resolver, X_FORWARDED_FOR, rewrite_headers};
//! use http::{HeaderMap, HeaderValue};
//!
//! let resolver = Resolver::new(NetworkRangeSet::local());
//!
//! let mut headers = HeaderMap::new();
//! headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7, 10.0.0.2"));
//!
//! let resolution = resolver.resolve_peer("10.0.0.1:4431", &headers).unwrap();
//! assert_eq!(resolution.client_ip.to_string(), "203.0.113.7");
//! assert!(resolution.trusted);
//!
//! rewrite_headers(&mut headers, &resolution);
//! assert_eq!(headers["x-real-ip"], "203.0.113.7");
//! assert_eq!(headers["x-is-trusted"], "yes");
//! ```

pub mod config;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod provider;
pub mod ranges;
pub mod resolver;
pub mod rewriter;

#[cfg(feature = "axum")]
pub mod middleware;

pub use config::Config;
pub use error::{ConfigError, FetchError, RealIpError, Result};
pub use extractor::{forwarded_chain, parse_ip, single_ip, source_ip};
pub use provider::{ProviderRanges, Providers, RangeSource, RemoteSource, StaticSource};
pub use ranges::{LOCAL_RANGES, NetworkRangeSet, is_private_or_local};
pub use resolver::{
    CF_CONNECTING_IP, DEFAULT_SOURCES, EO_CONNECTING_IP, HeaderSource, Resolution, Resolver,
    X_FORWARDED_FOR, X_IS_TRUSTED, X_REAL_IP,
};
pub use rewriter::rewrite_headers;

#[cfg(feature = "axum")]
pub use middleware::{Fault, RealIp, RealIpLayer, RealIpService};

/// Re-export commonly used types
pub use ipnet::IpNet;
pub use std::net::IpAddr;
