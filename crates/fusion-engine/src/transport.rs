use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fusion_contracts::relay::{
    normalize_upload_response, RelayRequest, RelayResult, RelayTransportKind,
};
use fusion_contracts::{FusionError, FusionResultExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::Form as MultipartForm;
use reqwest::{Client as HttpClient, RequestBuilder};
use tracing::{debug, warn};

use crate::config::RelayConfig;

/// Uploads one image to the host. Implementations never fail: every
/// outcome, including transport trouble, comes back as a [`RelayResult`].
#[async_trait]
pub trait RelayTransport: Send + Sync {
    fn name(&self) -> &str;
    async fn upload(&self, request: &RelayRequest) -> RelayResult;
}

/// The one HTTP relay. `kind` picks how the payload is encoded; endpoint,
/// timeout and response handling are shared.
pub struct HttpRelayTransport {
    kind: RelayTransportKind,
    endpoint: String,
    timeout: Duration,
    max_retries: usize,
    retry_backoff: Duration,
    http: HttpClient,
}

impl HttpRelayTransport {
    pub fn new(config: &RelayConfig) -> Result<Self, FusionError> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| FusionError::Configuration(format!("http client setup failed: {err}")))?;
        Ok(Self {
            kind: config.transport,
            endpoint: config.upload_endpoint(),
            timeout: config.timeout,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
            http,
        })
    }

    pub fn kind(&self) -> RelayTransportKind {
        self.kind
    }

    fn prepare(&self, request: &RelayRequest) -> Result<RequestBuilder, FusionError> {
        let builder = self
            .http
            .post(&self.endpoint)
            .query(&[("key", request.credential())]);
        let builder = match self.kind {
            RelayTransportKind::Multipart => {
                let form = MultipartForm::new().text("image", request.base64().to_string());
                builder.multipart(form)
            }
            RelayTransportKind::UrlEncoded => {
                let fields: &[(&str, &str)] = &[("image", request.base64())];
                let body = serde_urlencoded::to_string(fields).internal("form encoding failed")?;
                builder
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header(CONTENT_LENGTH, body.len())
                    .body(body)
            }
            RelayTransportKind::Fetch => builder.form(&[("image", request.base64())]),
        };
        Ok(builder)
    }

    async fn send_with_retries(
        &self,
        request: &RelayRequest,
    ) -> Result<(u16, String), FusionError> {
        let mut attempt = 0;
        loop {
            let builder = self.prepare(request)?;
            match send_once(builder).await {
                Ok(reply) => return Ok(reply),
                Err(err) if is_retryable_transport_error(&err) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        transport = %self.kind,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "image host transport retry after transient failure"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt as u32).await;
                }
                Err(err) => return Err(self.describe_transport_error(err)),
            }
        }
    }

    fn describe_transport_error(&self, err: reqwest::Error) -> FusionError {
        if err.is_timeout() {
            return FusionError::Transport(format!(
                "Image host request timed out after {:.1}s",
                self.timeout.as_secs_f64()
            ));
        }
        // reqwest puts the full URL, credential included, into its errors.
        FusionError::Transport(format!("Image host request failed: {}", err.without_url()))
    }
}

async fn send_once(builder: RequestBuilder) -> Result<(u16, String), reqwest::Error> {
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok((status, body))
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn upload(&self, request: &RelayRequest) -> RelayResult {
        debug!(transport = %self.kind, bytes = request.base64().len(), "relaying image to host");
        match self.send_with_retries(request).await {
            Ok((status, body)) => normalize_upload_response(status, &body),
            Err(err) => RelayResult::failure(match err {
                FusionError::Transport(reason) => reason,
                other => other.to_string(),
            }),
        }
    }
}

pub fn build_transport(config: &RelayConfig) -> Result<Arc<dyn RelayTransport>, FusionError> {
    Ok(Arc::new(HttpRelayTransport::new(config)?))
}
