//! HTTP raster backend
//!
//! Speaks a small JSON protocol to a remote raster engine. Transient failures
//! (connection errors, timeouts, 429/502/503/504) are retried with exponential
//! backoff; everything else is mapped onto the crate's error taxonomy.

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::core::backend::{
    BoundaryFeature, BoundaryQuery, GroupedReduceRequest, GroupedReduceResponse, LayerHandle,
    PublishLayerRequest, RasterBackend,
};
use crate::core::error::{Error, Result};

/// Shared HTTP client; per-request timeouts come from [`HttpBackendConfig`]
static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(32)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(format!("forest-loss/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
});

/// Connection settings for [`HttpBackend`]
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    /// Sent as a bearer token when present
    pub token: Option<String>,
    /// Per-request timeout; reductions over large cells can be slow
    pub timeout: Duration,
    pub max_retries: u32,
    /// First backoff delay, doubled on every further attempt
    pub base_retry_delay: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            timeout: Duration::from_secs(120),
            max_retries: 3,
            base_retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Execute an operation, retrying network errors with exponential backoff
async fn retry_on_network_error<F, Fut, T>(max_retries: u32, base_delay: Duration, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(Error::NetworkError(msg)) if attempt < max_retries => {
                attempt += 1;
                let delay = base_delay * (1 << (attempt - 1));
                warn!("⚠️  Network error (attempt {attempt}): {msg}. Retrying in {delay:?}...");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Whether an error body describes a per-call capacity limit
fn mentions_capacity(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    ["too many pixels", "max_pixels", "memory limit", "computation timed out"]
        .iter()
        .any(|needle| body.contains(needle))
}

/// Map a non-success response onto the error taxonomy
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(detail),
        StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => Error::CapacityExceeded(detail),
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Error::NetworkError(detail),
        _ if mentions_capacity(&body) => Error::CapacityExceeded(detail),
        _ => Error::HttpError(detail),
    })
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct FeaturesResponse {
    #[serde(default)]
    features: Vec<BoundaryFeature>,
}

#[derive(Deserialize)]
struct NamesResponse {
    #[serde(default)]
    names: Vec<String>,
}

/// Raster backend reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Self {
        Self { config }
    }

    /// Backend at `base_url` with default retry settings
    pub fn with_url(base_url: &str) -> Self {
        Self::new(HttpBackendConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn prepare(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.timeout(self.config.timeout);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send the request built by `make_request`, with retries, and decode JSON
    async fn execute<T, F>(&self, make_request: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let make_request = &make_request;
        retry_on_network_error(self.config.max_retries, self.config.base_retry_delay, || async move {
            let response = self.prepare(make_request()).send().await?;
            let response = check_status(response).await?;
            Ok(response.json::<T>().await?)
        })
        .await
    }
}

#[async_trait]
impl RasterBackend for HttpBackend {
    async fn check_available(&self) -> Result<()> {
        let url = self.url("v1/status");
        let status: StatusResponse = self
            .execute(|| GLOBAL_CLIENT.get(&url))
            .await
            .map_err(|e| match e {
                Error::Unauthorized(msg) => Error::Unauthorized(msg),
                other => Error::BackendUnavailable(format!("{url}: {other}")),
            })?;

        if status.status.eq_ignore_ascii_case("ok") {
            debug!("Backend at {} is available", self.config.base_url);
            Ok(())
        } else {
            Err(Error::BackendUnavailable(format!(
                "backend reports status '{}'{}",
                status.status,
                status.message.map(|m| format!(": {m}")).unwrap_or_default()
            )))
        }
    }

    async fn lookup_boundaries(&self, query: &BoundaryQuery) -> Result<Vec<BoundaryFeature>> {
        let url = self.url("v1/boundaries/lookup");
        let response: FeaturesResponse = self
            .execute(|| GLOBAL_CLIENT.post(&url).json(query))
            .await?;
        Ok(response.features)
    }

    async fn boundary_names(&self, dataset: &str, property: &str) -> Result<Vec<String>> {
        let url = self.url("v1/boundaries/names");
        let response: NamesResponse = self
            .execute(|| {
                GLOBAL_CLIENT
                    .get(&url)
                    .query(&[("dataset", dataset), ("property", property)])
            })
            .await?;
        Ok(response.names)
    }

    async fn reduce_grouped(
        &self,
        request: &GroupedReduceRequest,
    ) -> Result<GroupedReduceResponse> {
        let url = self.url("v1/reduce");
        self.execute(|| GLOBAL_CLIENT.post(&url).json(request)).await
    }

    async fn publish_layer(&self, request: &PublishLayerRequest) -> Result<LayerHandle> {
        let url = self.url("v1/layers");
        self.execute(|| GLOBAL_CLIENT.post(&url).json(request)).await
    }
}
