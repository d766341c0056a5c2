//! Shopify Admin API client
//!
//! Provides [`ShopifyClient`], the single entry point for network I/O. It
//! attaches credentials, enforces the request ceilings shared by every stream
//! and retries transient failures.

use super::http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use super::{Auth, RetryConfig};
use crate::config::{SyncSettings, TapConfig};
use crate::error::{Result, TapError};
use backon::Retryable;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A request for one page of a resource, relative to the versioned API root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Outcome of a request that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Ok(HttpResponse),
    /// HTTP 404: the resource does not exist for this store
    NotFound,
}

/// Shopify client shared by all streams of a sync.
///
/// Cloning is cheap and clones share the connection pool, the concurrent
/// request ceiling and the requests-per-second limiter.
///
/// # Example
/// ```no_run
/// use tap_shopify::client::{Auth, PageRequest, ShopifyClient};
/// use tap_shopify::config::TapConfig;
///
/// # async fn example() -> eyre::Result<()> {
/// let config = TapConfig::new("my-store", Auth::bare("shpat_xxx"));
/// let client = ShopifyClient::try_new(&config)?;
/// let response = client.send(&PageRequest::new("locations.json")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ShopifyClient {
    transport: Arc<dyn HttpTransport>,
    base: Url,
    auth: Auth,
    retry: RetryConfig,
    permits: Arc<Semaphore>,
    limiter: Arc<GovernorRateLimiter>,
}

impl ShopifyClient {
    /// Build a client backed by reqwest from a validated config.
    pub fn try_new(config: &TapConfig) -> Result<Self> {
        let transport = ReqwestTransport::with_timeout(config.sync.request_timeout())
            .map_err(|e| TapError::Config(e.to_string()))?;
        Ok(Self::with_transport(
            Arc::new(transport),
            config.api_base()?,
            config.authentication.clone(),
            &config.sync,
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        base: Url,
        auth: Auth,
        settings: &SyncSettings,
    ) -> Self {
        let rps = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            transport,
            base,
            auth,
            retry: settings.retry_config(),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1))),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        }
    }

    /// Get the versioned API root.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Verify credentials by fetching the shop resource.
    ///
    /// Returns the shop name on success.
    pub async fn check(&self) -> Result<String> {
        let response = match self.send(&PageRequest::new("shop.json")).await? {
            ApiResponse::Ok(response) => response,
            ApiResponse::NotFound => {
                return Err(TapError::Config(format!(
                    "no shop found at {}, check store/admin_url",
                    self.base
                )));
            }
        };
        let body: serde_json::Value = serde_json::from_slice(&response.body)?;
        Ok(body["shop"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    /// Send a request, retrying transient failures with exponential backoff.
    ///
    /// A 429 waits at least as long as its `Retry-After` (capped at the max
    /// backoff) before the next attempt. Nothing waits after the last one.
    ///
    /// # Errors
    /// - [`TapError::Auth`] on HTTP 401, never retried
    /// - [`TapError::TransientNetwork`] or [`TapError::RateLimited`] once the
    ///   retries are exhausted
    /// - [`TapError::UnexpectedStatus`] on any other non-success status
    pub async fn send(&self, request: &PageRequest) -> Result<ApiResponse> {
        let http = self.build(request)?;
        let attempt = AtomicU32::new(0);

        let send_once = || {
            attempt.fetch_add(1, Ordering::SeqCst);
            self.send_once(http.clone())
        };

        let max_delay = self.retry.max_delay;
        send_once
            .retry(self.retry.clone().into_backoff())
            .adjust(|err: &TapError, backoff: Option<Duration>| {
                let backoff = backoff?;
                Some(match err.retry_after() {
                    Some(wait) => backoff.max(wait.min(max_delay)),
                    None => backoff,
                })
            })
            .notify(|err: &TapError, dur: Duration| {
                log::warn!(
                    "Request to {} failed (attempt {}), retrying in {:?}: {}",
                    request.path,
                    attempt.load(Ordering::SeqCst),
                    dur,
                    err
                );
            })
            .when(TapError::is_transient)
            .await
    }

    fn build(&self, request: &PageRequest) -> Result<HttpRequest> {
        let path = request.path.strip_prefix('/').unwrap_or(&request.path);
        let mut url = self.base.join(path).map_err(|e| {
            TapError::Config(format!("invalid request path '{}': {}", request.path, e))
        })?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        Ok(HttpRequest {
            url,
            headers: vec![
                (
                    "X-Shopify-Access-Token".to_string(),
                    self.auth.access_token().to_string(),
                ),
                ("Accept".to_string(), "application/json".to_string()),
            ],
        })
    }

    async fn send_once(&self, request: HttpRequest) -> Result<ApiResponse> {
        let url = request.url.to_string();
        let response = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| TapError::TransientNetwork("request semaphore closed".to_string()))?;
            self.limiter.until_ready().await;
            log::trace!("GET {}", url);
            self.transport
                .send(request)
                .await
                .map_err(|e| TapError::TransientNetwork(e.to_string()))?
        };
        classify(url, response)
    }
}

/// Map an HTTP status onto the client's error taxonomy.
fn classify(url: String, response: HttpResponse) -> Result<ApiResponse> {
    match response.status {
        status if (200..300).contains(&status) => Ok(ApiResponse::Ok(response)),
        401 => Err(TapError::Auth {
            url,
            message: String::from_utf8_lossy(&response.body).into_owned(),
        }),
        404 => {
            log::debug!("{} returned 404", url);
            Ok(ApiResponse::NotFound)
        }
        429 => {
            let retry_after = response
                .header("Retry-After")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs.max(0.0)).ok());
            log::debug!("Rate limited by {}, Retry-After {:?}", url, retry_after);
            Err(TapError::RateLimited { url, retry_after })
        }
        status if status >= 500 => Err(TapError::TransientNetwork(format!(
            "HTTP {} from {}",
            status, url
        ))),
        status => Err(TapError::UnexpectedStatus {
            status,
            url,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }),
    }
}

impl std::fmt::Display for ShopifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.base, self.auth)
    }
}
