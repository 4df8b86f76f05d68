/* src/error.rs */

use thiserror::Error;

/// Result type alias for operations that may fail with `RealIpError`.
pub type Result<T> = std::result::Result<T, RealIpError>;

/// Errors that can occur while resolving the client IP of a single request.
///
/// Every variant except [`RealIpError::Aborted`] describes malformed input, so
/// the middleware answers them with `400 Bad Request` and the error message as
/// the body.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RealIpError {
    /// The peer address has no usable `host:port` split.
    #[error("failed to split host and port from peer address: {0:?}")]
    MalformedPeerAddress(String),

    /// The host part of the peer address is not an IP address.
    #[error("invalid IP format: {0}")]
    InvalidIpFormat(String),

    /// A header that must appear exactly once appears several times.
    #[error("header {header} invalid: expected a single value, found {count}")]
    AmbiguousHeader { header: &'static str, count: usize },

    /// A single-value header does not hold a parseable IP address.
    #[error("invalid IP format in {header}: {value}")]
    InvalidHeaderValue { header: &'static str, value: String },

    /// A forwarded-for chain holds no public address.
    #[error("no valid IP found in {header}")]
    NoValidCandidateInChain { header: &'static str },

    /// A header extractor asked for the resolution step to be run again.
    #[error("resolution aborted, retry requested")]
    Aborted,
}

/// Errors raised while building the trusted range set.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid trusted IP range: {0}")]
    InvalidTrustedRange(String),
}

/// Errors raised while fetching a remote range list.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(http::StatusCode),

    #[error("error parsing CIDR {0}")]
    InvalidCidr(String),

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<FetchError>,
    },
}
