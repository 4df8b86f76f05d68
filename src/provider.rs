/* src/provider.rs */

use async_trait::async_trait;
use ipnet::IpNet;
use std::{sync::Arc, time::Duration};
use tokio::sync::OnceCell;

use crate::error::FetchError;
use crate::ranges::parse_embedded;

pub const CLOUDFLARE_URLS: &[&str] = &[
    "https://www.cloudflare.com/ips-v4",
    "https://www.cloudflare.com/ips-v6",
];

/// Cloudflare's published edge ranges, used when the live list is unavailable.
pub const CLOUDFLARE_FALLBACK: &[&str] = &[
    "173.245.48.0/20",
    "103.21.244.0/22",
    "103.22.200.0/22",
    "103.31.4.0/22",
    "141.101.64.0/18",
    "108.162.192.0/18",
    "190.93.240.0/20",
    "188.114.96.0/20",
    "197.234.240.0/22",
    "198.41.128.0/17",
    "162.158.0.0/15",
    "104.16.0.0/13",
    "104.24.0.0/14",
    "172.64.0.0/13",
    "131.0.72.0/22",
    "2400:cb00::/32",
    "2606:4700::/32",
    "2803:f800::/32",
    "2405:b500::/32",
    "2405:8100::/32",
    "2a06:98c0::/29",
    "2c0f:f248::/32",
];

pub const EDGEONE_URLS: &[&str] = &["https://api.edgeone.ai/ips"];

pub const EDGEONE_FALLBACK: &[&str] = &["198.51.100.0/24", "2001:db8::/32"];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// A source of network blocks for one provider.
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<IpNet>, FetchError>;
}

/// Fixed list of blocks. Useful for tests and hosts without network access.
#[derive(Debug, Clone, Default)]
pub struct StaticSource(pub Vec<IpNet>);

#[async_trait]
impl RangeSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<IpNet>, FetchError> {
        Ok(self.0.clone())
    }
}

/// Fetches newline-separated CIDR lists over HTTP.
///
/// Each URL is requested with exponential backoff between attempts. Client
/// errors (4xx) and malformed bodies are not retried.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    name: String,
    urls: Vec<String>,
    client: reqwest::Client,
    max_retries: u32,
    initial_delay: Duration,
}

impl RemoteSource {
    pub fn new(name: impl Into<String>, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            urls: urls.into_iter().map(Into::into).collect(),
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Set the number of retries after the first attempt and the first backoff delay.
    pub fn with_retry(mut self, max_retries: u32, initial_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_delay = initial_delay;
        self
    }

    /// Fetch and parse a single URL, retrying transient failures.
    pub async fn fetch_url(&self, url: &str) -> Result<Vec<IpNet>, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            let err = match self.fetch_once(url).await {
                Ok(blocks) => return Ok(blocks),
                Err(FetchError::Status(status)) if status.is_client_error() => {
                    tracing::error!(
                        provider = %self.name,
                        url,
                        status_code = status.as_u16(),
                        "Client error, will not retry"
                    );
                    return Err(FetchError::Status(status));
                }
                Err(err @ FetchError::InvalidCidr(_)) => return Err(err),
                Err(err) => err,
            };

            attempt += 1;
            tracing::warn!(
                provider = %self.name,
                url,
                attempt,
                max_attempts = self.max_retries + 1,
                error = %err,
                "Request failed"
            );

            if attempt > self.max_retries {
                tracing::error!(
                    provider = %self.name,
                    url,
                    attempts = attempt,
                    "Failed to fetch provider IPs after retries"
                );
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.initial_delay.saturating_mul(1u32 << (attempt - 1).min(16));
            tracing::info!(provider = %self.name, url, attempt, ?delay, "Retrying request");
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<IpNet>, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status != http::StatusCode::OK {
            return Err(FetchError::Status(status));
        }

        let body = response.text().await?;
        parse_cidr_lines(&body)
    }
}

#[async_trait]
impl RangeSource for RemoteSource {
    /// Union of all URLs that could be fetched. Failing URLs are logged and skipped.
    async fn fetch(&self) -> Result<Vec<IpNet>, FetchError> {
        let mut blocks = Vec::new();

        for url in &self.urls {
            match self.fetch_url(url).await {
                Ok(fetched) => blocks.extend(fetched),
                Err(err) => {
                    tracing::error!(
                        provider = %self.name,
                        url = %url,
                        error = %err,
                        "Error fetching provider IPs"
                    );
                }
            }
        }

        Ok(blocks)
    }
}

/// Parse one CIDR per line, ignoring blank lines.
pub fn parse_cidr_lines(body: &str) -> Result<Vec<IpNet>, FetchError> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<IpNet>()
                .map_err(|_| FetchError::InvalidCidr(line.to_string()))
        })
        .collect()
}

/// A provider's ranges, fetched at most once and cached for the owner's lifetime.
///
/// When the source yields nothing the embedded fallback list is cached instead,
/// so building the middleware never waits on the network indefinitely.
pub struct ProviderRanges {
    name: String,
    source: Box<dyn RangeSource>,
    fallback: Vec<IpNet>,
    cache: OnceCell<Vec<IpNet>>,
}

impl std::fmt::Debug for ProviderRanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRanges")
            .field("name", &self.name)
            .field("fallback", &self.fallback)
            .field("cache", &self.cache.get())
            .finish_non_exhaustive()
    }
}

impl ProviderRanges {
    pub fn new(
        name: impl Into<String>,
        source: impl RangeSource + 'static,
        fallback: Vec<IpNet>,
    ) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
            fallback,
            cache: OnceCell::new(),
        }
    }

    /// Cloudflare's live IPv4 and IPv6 lists.
    pub fn cloudflare() -> Self {
        Self::new(
            "Cloudflare",
            RemoteSource::new("Cloudflare", CLOUDFLARE_URLS.iter().copied()),
            parse_embedded(CLOUDFLARE_FALLBACK),
        )
    }

    /// EdgeOne's live list.
    pub fn edgeone() -> Self {
        Self::new(
            "EdgeOne",
            RemoteSource::new("EdgeOne", EDGEONE_URLS.iter().copied()),
            parse_embedded(EDGEONE_FALLBACK),
        )
    }

    /// A provider whose ranges are known up front.
    pub fn fixed(name: impl Into<String>, blocks: Vec<IpNet>) -> Self {
        Self::new(name, StaticSource(blocks), Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provider's blocks, populating the cache on first call.
    ///
    /// Concurrent first callers wait on the same fetch.
    pub async fn ranges(&self) -> &[IpNet] {
        self.cache
            .get_or_init(|| async {
                match self.source.fetch().await {
                    Ok(blocks) if !blocks.is_empty() => {
                        tracing::debug!(provider = %self.name, count = blocks.len(), "Fetched provider IPs");
                        blocks
                    }
                    Ok(_) => {
                        tracing::warn!(provider = %self.name, "Provider returned no IPs, using embedded defaults");
                        self.fallback.clone()
                    }
                    Err(err) => {
                        tracing::warn!(
                            provider = %self.name,
                            error = %err,
                            "Error fetching provider IPs, using embedded defaults"
                        );
                        self.fallback.clone()
                    }
                }
            })
            .await
    }

    /// The cached blocks, if already populated.
    pub fn cached(&self) -> Option<&[IpNet]> {
        self.cache.get().map(Vec::as_slice)
    }
}

/// The provider caches consulted when assembling a trusted range set.
///
/// Keep one bundle for the whole process to fetch each list only once, even
/// when several middleware instances are built from it.
#[derive(Debug, Clone)]
pub struct Providers {
    pub cloudflare: Arc<ProviderRanges>,
    pub edgeone: Arc<ProviderRanges>,
}

impl Default for Providers {
    fn default() -> Self {
        Self::remote()
    }
}

impl Providers {
    pub fn new(cloudflare: ProviderRanges, edgeone: ProviderRanges) -> Self {
        Self {
            cloudflare: Arc::new(cloudflare),
            edgeone: Arc::new(edgeone),
        }
    }

    /// Live provider lists with embedded fallbacks.
    pub fn remote() -> Self {
        Self::new(ProviderRanges::cloudflare(), ProviderRanges::edgeone())
    }
}
