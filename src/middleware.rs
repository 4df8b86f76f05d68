/* src/middleware.rs */

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use std::{
    any::Any,
    net::{IpAddr, SocketAddr},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

use crate::config::Config;
use crate::error::{ConfigError, RealIpError};
use crate::provider::Providers;
use crate::resolver::{Resolution, Resolver};
use crate::rewriter::rewrite_headers;

/// Name attached to every log event when none is configured.
pub const DEFAULT_NAME: &str = "trusted-real-ip";

/// Retries granted to a step that returned [`RealIpError::Aborted`].
pub const MAX_RETRY_COUNT: u32 = 3;

/// Extension that holds the resolved client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealIp {
    ip: IpAddr,
    trusted: bool,
}

impl RealIp {
    /// Get the IP address.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Whether the connection peer was trusted to assert it.
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }
}

impl From<&Resolution> for RealIp {
    fn from(resolution: &Resolution) -> Self {
        Self {
            ip: resolution.client_ip,
            trusted: resolution.trusted,
        }
    }
}

/// Why a guarded step did not finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// An extractor returned [`RealIpError::Aborted`] on attempt `count`.
    Retryable { count: u32 },
    /// The step panicked.
    Fatal(String),
}

impl Fault {
    fn classify(err: RealIpError, count: u32) -> Result<RealIpError, Self> {
        match err {
            RealIpError::Aborted => Err(Self::Retryable { count }),
            err => Ok(err),
        }
    }

    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string());
        Self::Fatal(message)
    }
}

/// What the service does with a request after the guarded step.
#[derive(Debug)]
enum Step {
    Forward(Resolution, HeaderMap),
    Reject(RealIpError),
    PassThrough,
}

/// Layer that resolves the client IP and rewrites the forwarding headers.
///
/// # Examples
///
/// ```rust,no_run
/// use axum::{Router, routing::get};
/// use trusted_real_ip::{Config, Providers, RealIp, RealIpLayer};
///
/// # async fn build() -> Result<(), Box<dyn std::error::Error>> {
/// let layer = RealIpLayer::from_config(&Config::default(), &Providers::remote()).await?;
///
/// let app: Router = Router::new()
///     .route("/", get(|ip: RealIp| async move { ip.ip().to_string() }))
///     .layer(layer);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RealIpLayer {
    resolver: Resolver,
    name: Arc<str>,
}

impl RealIpLayer {
    /// Create a layer around an already built resolver.
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            name: Arc::from(DEFAULT_NAME),
        }
    }

    /// Build the trusted range set from `config` and create a layer over it.
    ///
    /// An unknown `log_level` is reported here through the host's subscriber.
    pub async fn from_config(config: &Config, providers: &Providers) -> Result<Self, ConfigError> {
        let level = config.log_filter();
        let ranges = config.trusted_ranges(providers).await?;
        tracing::debug!(%level, ranges = ranges.len(), "Built trusted range set");
        Ok(Self::new(Resolver::new(ranges)))
    }

    /// Set the name attached to this layer's log events.
    pub fn with_name(mut self, name: impl AsRef<str>) -> Self {
        self.name = Arc::from(name.as_ref());
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }
}

impl<S> Layer<S> for RealIpLayer {
    type Service = RealIpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RealIpService {
            inner,
            resolver: self.resolver.clone(),
            name: self.name.clone(),
        }
    }
}

/// Service that resolves client IPs.
#[derive(Debug, Clone)]
pub struct RealIpService<S> {
    inner: S,
    resolver: Resolver,
    name: Arc<str>,
}

impl<S> RealIpService<S> {
    /// Resolve and rewrite under the panic guard, retrying aborted attempts.
    fn run(&self, peer: &str, headers: &HeaderMap) -> Step {
        let mut count = 1;

        loop {
            match self.attempt(peer, headers, count) {
                Ok(Ok((resolution, rewritten))) => return Step::Forward(resolution, rewritten),
                Ok(Err(err)) => return Step::Reject(err),
                Err(Fault::Retryable { count: attempt }) if attempt <= MAX_RETRY_COUNT => {
                    tracing::info!(retry_count = attempt, "Retrying request");
                    count = attempt + 1;
                }
                Err(Fault::Retryable { count: attempt }) => {
                    tracing::info!(retry_count = attempt, "Max retry count reached, aborting");
                    return Step::PassThrough;
                }
                Err(Fault::Fatal(message)) => {
                    tracing::error!(error = %message, "Panic recovered");
                    return Step::PassThrough;
                }
            }
        }
    }

    /// One guarded run. Only unexpected panics are caught; an abort is a
    /// returned value.
    fn attempt(
        &self,
        peer: &str,
        headers: &HeaderMap,
        count: u32,
    ) -> Result<Result<(Resolution, HeaderMap), RealIpError>, Fault> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let resolution = self.resolver.resolve_peer(peer, headers)?;
            tracing::debug!(
                ip = %resolution.source_ip,
                is_trusted = resolution.trusted,
                "Evaluated source trust"
            );

            let mut rewritten = headers.clone();
            rewrite_headers(&mut rewritten, &resolution);
            Ok::<_, RealIpError>((resolution, rewritten))
        }))
        .map_err(Fault::from_panic)?;

        match outcome {
            Ok(forwarded) => Ok(Ok(forwarded)),
            Err(err) => Fault::classify(err, count).map(Err),
        }
    }
}

impl<S> Service<Request> for RealIpService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let span = tracing::debug_span!("real_ip", plugin = %self.name);
        let _enter = span.enter();

        // Missing connection info is reported as an empty peer address
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        match self.run(&peer, req.headers()) {
            Step::Forward(resolution, headers) => {
                *req.headers_mut() = headers;
                req.extensions_mut().insert(RealIp::from(&resolution));
            }
            Step::Reject(err) => {
                tracing::error!(peer = %peer, error = %err, "Error getting real IP");
                let response = (StatusCode::BAD_REQUEST, err.to_string()).into_response();
                return Box::pin(async move { Ok(response) });
            }
            Step::PassThrough => {}
        }

        let future = self.inner.call(req);
        Box::pin(async move { future.await })
    }
}

/// Axum extractor for the resolved client IP.
///
/// Rejects with `500` when the request did not pass through [`RealIpLayer`].
impl<S> axum::extract::FromRequestParts<S> for RealIp
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RealIp>().copied().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Unable to determine client IP",
        ))
    }
}
