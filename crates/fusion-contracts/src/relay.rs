use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{decode_payload, encode_bytes, strip_data_prefix};
use crate::errors::FusionError;

pub const MISSING_BASE64_MESSAGE: &str = "Missing base64 image data";
pub const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed";
pub const UPLOAD_FAILED_MESSAGE: &str = "Upload failed";

/// How the image payload is put on the wire. All variants hit the same
/// upload endpoint and share one response interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayTransportKind {
    /// `image` as a text field of a multipart body.
    #[default]
    Multipart,
    /// `image` as a url-encoded field with an explicit byte length.
    UrlEncoded,
    /// `image` as a form built by the client library.
    Fetch,
}

impl RelayTransportKind {
    pub const ALL: [RelayTransportKind; 3] = [Self::Multipart, Self::UrlEncoded, Self::Fetch];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Multipart => "multipart",
            Self::UrlEncoded => "urlencoded",
            Self::Fetch => "fetch",
        }
    }
}

impl fmt::Display for RelayTransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayTransportKind {
    type Err = FusionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "multipart" | "formdata" => Ok(Self::Multipart),
            "urlencoded" | "form" => Ok(Self::UrlEncoded),
            "fetch" | "native" => Ok(Self::Fetch),
            other => Err(FusionError::Configuration(format!(
                "unknown relay transport '{other}' (expected multipart, urlencoded or fetch)"
            ))),
        }
    }
}

/// One image on its way to the host. Lives for a single relay call.
///
/// The payload is held in canonical form: no data-URI header, no line
/// breaks, standard padding. Every transport sends it as is.
#[derive(Clone)]
pub struct RelayRequest {
    payload: String,
    provider_credential: String,
}

impl RelayRequest {
    /// Validates the payload and re-encodes it from its decoded bytes.
    pub fn new(
        raw_base64: &str,
        provider_credential: impl Into<String>,
    ) -> Result<Self, FusionError> {
        let stripped = strip_data_prefix(raw_base64.trim());
        if stripped.is_empty() {
            return Err(FusionError::Validation(MISSING_BASE64_MESSAGE.to_string()));
        }
        let bytes = decode_payload(stripped)?;
        Ok(Self::from_bytes(&bytes, provider_credential))
    }

    pub fn from_bytes(bytes: &[u8], provider_credential: impl Into<String>) -> Self {
        Self {
            payload: encode_bytes(bytes),
            provider_credential: provider_credential.into(),
        }
    }

    pub fn base64(&self) -> &str {
        &self.payload
    }

    pub fn credential(&self) -> &str {
        &self.provider_credential
    }
}

impl fmt::Debug for RelayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayRequest")
            .field("base64_len", &self.payload.len())
            .field("provider_credential", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayResult {
    Success {
        url: String,
    },
    Failure {
        reason: String,
        provider_detail: Option<Value>,
    },
}

impl RelayResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
            provider_detail: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Maps a host answer to a [`RelayResult`]. Only
/// `{ "success": true, "data": { "url": ... } }` on a 2xx status counts as
/// success.
pub fn normalize_upload_response(status: u16, body: &str) -> RelayResult {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    if !(200..300).contains(&status) {
        let reason = parsed
            .as_ref()
            .and_then(host_error_message)
            .map(|message| format!("Image host request failed ({status}): {message}"))
            .unwrap_or_else(|| format!("Image host request failed ({status})"));
        return RelayResult::Failure {
            reason,
            provider_detail: parsed.or_else(|| non_empty_text(body)),
        };
    }
    let Some(payload) = parsed else {
        return RelayResult::Failure {
            reason: "Invalid response from image host".to_string(),
            provider_detail: non_empty_text(body),
        };
    };
    let success = payload.get("success").and_then(Value::as_bool) == Some(true);
    let url = payload
        .get("data")
        .and_then(|data| data.get("url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match (success, url) {
        (true, Some(url)) => RelayResult::Success {
            url: url.to_string(),
        },
        _ => RelayResult::Failure {
            reason: host_error_message(&payload)
                .unwrap_or_else(|| "Invalid response from image host".to_string()),
            provider_detail: Some(payload),
        },
    }
}

fn host_error_message(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    let text = match error {
        Value::String(text) => text.clone(),
        Value::Object(obj) => obj.get("message").and_then(Value::as_str)?.to_string(),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn non_empty_text(body: &str) -> Option<Value> {
    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| Value::String(trimmed.chars().take(512).collect()))
}

/// Body of a relay endpoint POST.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayPayload {
    #[serde(default)]
    pub base64: Option<String>,
}

/// JSON answered by the relay endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RelayReply {
    pub fn uploaded(url: impl Into<String>) -> Self {
        Self {
            success: true,
            url: Some(url.into()),
            error: None,
            message: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            url: None,
            error: Some(error.into()),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            url: None,
            error: Some(UPLOAD_FAILED_MESSAGE.to_string()),
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn transport_kind_parses_aliases() -> anyhow::Result<()> {
        assert_eq!("multipart".parse::<RelayTransportKind>()?, RelayTransportKind::Multipart);
        assert_eq!("URL-Encoded".parse::<RelayTransportKind>()?, RelayTransportKind::UrlEncoded);
        assert_eq!("native".parse::<RelayTransportKind>()?, RelayTransportKind::Fetch);
        let err = "smtp".parse::<RelayTransportKind>().unwrap_err();
        assert!(matches!(err, FusionError::Configuration(_)));
        Ok(())
    }

    #[test]
    fn request_strips_prefix_and_rejects_empty_or_invalid() -> anyhow::Result<()> {
        let request = RelayRequest::new("data:image/png;base64,YWJj", "key-1")?;
        assert_eq!(request.base64(), "YWJj");
        assert_eq!(request.credential(), "key-1");

        let err = RelayRequest::new("data:image/png;base64,", "key-1").unwrap_err();
        assert_eq!(err.to_string(), MISSING_BASE64_MESSAGE);
        assert!(RelayRequest::new("%%%", "key-1").unwrap_err().is_validation());
        Ok(())
    }

    #[test]
    fn debug_output_redacts_credential() -> anyhow::Result<()> {
        let request = RelayRequest::new("YWJj", "super-secret")?;
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
        Ok(())
    }

    #[test]
    fn wrapped_payload_is_stored_canonically() -> anyhow::Result<()> {
        let request = RelayRequest::new("data:image/png;base64,YW\r\nJj", "key")?;
        assert_eq!(request.base64(), "YWJj");
        assert_eq!(RelayRequest::new(" YW Jj\n", "key")?.base64(), "YWJj");
        Ok(())
    }

    #[test]
    fn normalize_accepts_only_success_with_url() {
        let body = json!({"success": true, "data": {"url": "https://x/1.png"}}).to_string();
        assert_eq!(
            normalize_upload_response(200, &body),
            RelayResult::Success {
                url: "https://x/1.png".to_string()
            }
        );

        let body = json!({"success": false, "error": {"message": "Invalid API v1 key."}});
        let body = body.to_string();
        match normalize_upload_response(200, &body) {
            RelayResult::Failure {
                reason,
                provider_detail,
            } => {
                assert_eq!(reason, "Invalid API v1 key.");
                assert!(provider_detail.is_some());
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let body = json!({"success": true, "data": {}}).to_string();
        assert!(!normalize_upload_response(200, &body).is_success());
        assert!(!normalize_upload_response(200, "<html>").is_success());
    }

    #[test]
    fn normalize_reports_status_for_non_2xx() {
        let body = json!({"success": true, "data": {"url": "https://x/1.png"}}).to_string();
        match normalize_upload_response(500, &body) {
            RelayResult::Failure { reason, .. } => {
                assert_eq!(reason, "Image host request failed (500)")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        match normalize_upload_response(400, r#"{"error":"Empty upload source."}"#) {
            RelayResult::Failure { reason, .. } => {
                assert_eq!(reason, "Image host request failed (400): Empty upload source.")
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn replies_serialize_without_empty_fields() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_value(RelayReply::uploaded("https://x/1.png"))?,
            json!({"success": true, "url": "https://x/1.png"})
        );
        assert_eq!(
            serde_json::to_value(RelayReply::rejected(MISSING_BASE64_MESSAGE))?,
            json!({"success": false, "error": "Missing base64 image data"})
        );
        assert_eq!(
            serde_json::to_value(RelayReply::failed("timed out"))?,
            json!({"success": false, "error": "Upload failed", "message": "timed out"})
        );
        Ok(())
    }
}
