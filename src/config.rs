/* src/config.rs */

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;
use crate::provider::Providers;
use crate::ranges::NetworkRangeSet;

/// Middleware configuration, consumed once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Trust loopback, private and link-local peers.
    #[serde(alias = "thrustLocal")]
    pub trust_local: bool,
    /// Trust Cloudflare's edge ranges.
    #[serde(alias = "thrustCloudFlare")]
    pub trust_cloudflare: bool,
    /// Trust EdgeOne's edge ranges.
    #[serde(rename = "trustEdgeOne", alias = "thrustEdgeOne")]
    pub trust_edgeone: bool,
    /// Extra trusted ranges in CIDR notation.
    #[serde(rename = "trustedIPs")]
    pub trusted_ips: Vec<String>,
    /// One of `debug`, `info`, `warn`, `error`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trust_local: true,
            trust_cloudflare: true,
            trust_edgeone: false,
            trusted_ips: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trust_local(mut self, trust: bool) -> Self {
        self.trust_local = trust;
        self
    }

    pub fn with_trust_cloudflare(mut self, trust: bool) -> Self {
        self.trust_cloudflare = trust;
        self
    }

    pub fn with_trust_edgeone(mut self, trust: bool) -> Self {
        self.trust_edgeone = trust;
        self
    }

    pub fn with_trusted_ips(mut self, cidrs: Vec<String>) -> Self {
        self.trusted_ips = cidrs;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// The configured log level, or `None` when `log_level` names no level.
    ///
    /// Never logs, so it is safe to call before a subscriber is installed.
    pub fn level(&self) -> Option<LevelFilter> {
        match self.log_level.to_lowercase().as_str() {
            "debug" => Some(LevelFilter::DEBUG),
            "info" | "" => Some(LevelFilter::INFO),
            "warn" => Some(LevelFilter::WARN),
            "error" => Some(LevelFilter::ERROR),
            _ => None,
        }
    }

    /// The configured log level. Unknown values fall back to `info` with a warning.
    pub fn log_filter(&self) -> LevelFilter {
        self.level().unwrap_or_else(|| {
            tracing::warn!(level = %self.log_level, "Invalid log level, using info");
            LevelFilter::INFO
        })
    }

    /// Parse the operator-supplied ranges. Host bits are cleared, so
    /// `10.0.0.5/8` becomes `10.0.0.0/8`.
    pub fn custom_ranges(&self) -> Result<Vec<IpNet>, ConfigError> {
        self.trusted_ips
            .iter()
            .map(|cidr| {
                cidr.trim()
                    .parse::<IpNet>()
                    .map(|net| net.trunc())
                    .map_err(|_| ConfigError::InvalidTrustedRange(cidr.clone()))
            })
            .collect()
    }

    /// Assemble the trusted range set: local ranges, provider ranges, then
    /// operator ranges, each only when enabled.
    ///
    /// Operator ranges are validated before any provider list is fetched.
    pub async fn trusted_ranges(&self, providers: &Providers) -> Result<NetworkRangeSet, ConfigError> {
        let custom = self.custom_ranges()?;

        let mut ranges = if self.trust_local {
            NetworkRangeSet::local()
        } else {
            NetworkRangeSet::new()
        };

        if self.trust_cloudflare {
            ranges = ranges.with_blocks(providers.cloudflare.ranges().await.iter().copied());
        }

        if self.trust_edgeone {
            ranges = ranges.with_blocks(providers.edgeone.ranges().await.iter().copied());
        }

        let ranges = ranges.with_blocks(custom);
        tracing::debug!(count = ranges.len(), "Assembled trusted ranges");

        Ok(ranges)
    }
}
