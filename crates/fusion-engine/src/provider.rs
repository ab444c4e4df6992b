use async_trait::async_trait;
use fusion_contracts::fusion::{FusionRequest, FusionResponse, FusionResult};
use fusion_contracts::FusionError;
use reqwest::Client as HttpClient;
use tracing::debug;

use crate::config::FusionConfig;

/// The external fusion service, consumed as a black box.
///
/// `Ok` carries whatever the provider decided, success or its own
/// failure; `Err` means no usable answer arrived.
#[async_trait]
pub trait FusionProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fuse(&self, request: &FusionRequest) -> Result<FusionResult, FusionError>;
}

pub struct HttpFusionProvider {
    endpoint: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl HttpFusionProvider {
    pub fn new(config: &FusionConfig) -> Result<Self, FusionError> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| FusionError::Configuration(format!("http client setup failed: {err}")))?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            http,
        })
    }
}

#[async_trait]
impl FusionProvider for HttpFusionProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fuse(&self, request: &FusionRequest) -> Result<FusionResult, FusionError> {
        debug!(endpoint = %self.endpoint, images = request.images.len(), "requesting fusion");
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }
        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                FusionError::Transport("fusion request timed out".to_string())
            } else {
                FusionError::Transport(format!("fusion request failed: {}", err.without_url()))
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| FusionError::Transport(format!("fusion response read failed: {err}")))?;
        let parsed = serde_json::from_str::<FusionResponse>(&body);

        if !status.is_success() {
            // A refusal the provider explains itself is still its answer.
            if let Ok(payload) = parsed {
                if !payload.success && payload.error.is_some() {
                    return Ok(payload.into_result());
                }
            }
            return Err(FusionError::Transport(format!(
                "fusion provider returned {}: {}",
                status.as_u16(),
                truncate_text(&body, 512)
            )));
        }
        parsed.map(FusionResponse::into_result).map_err(|err| {
            FusionError::ProviderSemantic(format!(
                "fusion provider returned invalid JSON ({err}): {}",
                truncate_text(&body, 512)
            ))
        })
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
