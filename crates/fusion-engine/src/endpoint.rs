use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{middleware, Json, Router};
use fusion_contracts::relay::{
    RelayPayload, RelayReply, RelayRequest, RelayResult, METHOD_NOT_ALLOWED_MESSAGE,
    MISSING_BASE64_MESSAGE,
};
use fusion_contracts::{FusionError, FusionResultExt};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::transport::{build_transport, RelayTransport};

pub const BODY_TOO_LARGE_MESSAGE: &str = "Request body too large";

/// Shared, read-only state of the relay endpoint. Requests share nothing
/// else.
#[derive(Clone)]
pub struct RelayState {
    transport: Arc<dyn RelayTransport>,
    credential: Arc<str>,
}

impl RelayState {
    pub fn new(transport: Arc<dyn RelayTransport>, credential: impl Into<Arc<str>>) -> Self {
        Self {
            transport,
            credential: credential.into(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, FusionError> {
        Ok(Self::new(build_transport(config)?, config.api_key.as_str()))
    }
}

/// Routes every path and method to the relay handler and stamps CORS
/// headers on every response, rejections included.
pub fn relay_router(state: RelayState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", any(relay_handler))
        .route("/*path", any(relay_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::map_response(with_cors_headers))
}

pub async fn serve(listener: TcpListener, router: Router) -> Result<(), FusionError> {
    let addr = listener.local_addr().internal("listener address unavailable")?;
    info!(%addr, "relay endpoint listening");
    axum::serve(listener, router)
        .await
        .internal("relay server stopped")
}

async fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

async fn relay_handler(
    State(state): State<RelayState>,
    method: Method,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    if method != Method::POST {
        return reply(
            StatusCode::METHOD_NOT_ALLOWED,
            RelayReply::rejected(METHOD_NOT_ALLOWED_MESSAGE),
        );
    }
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let status = rejection.status();
            warn!(%status, error = %rejection.body_text(), "relay request body unreadable");
            let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
                BODY_TOO_LARGE_MESSAGE
            } else {
                "Could not read request body"
            };
            return reply(status, RelayReply::rejected(message));
        }
    };

    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "relay request body rejected");
            return reply(StatusCode::BAD_REQUEST, RelayReply::rejected("Invalid JSON body"));
        }
    };
    let Some(raw) = payload.base64.filter(|value| !value.trim().is_empty()) else {
        return reply(
            StatusCode::BAD_REQUEST,
            RelayReply::rejected(MISSING_BASE64_MESSAGE),
        );
    };
    let request = match RelayRequest::new(&raw, state.credential.as_ref()) {
        Ok(request) => request,
        Err(err) => return reply(StatusCode::BAD_REQUEST, RelayReply::rejected(err.to_string())),
    };

    dispatch(state.transport, request).await
}

fn parse_payload(body: &[u8]) -> Result<RelayPayload, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RelayPayload::default());
    }
    serde_json::from_slice(body)
}

/// Runs the upload on its own task so a panicking transport still yields
/// a 500.
async fn dispatch(transport: Arc<dyn RelayTransport>, request: RelayRequest) -> Response {
    let transport_name = transport.name().to_string();
    let outcome = tokio::spawn(async move { transport.upload(&request).await }).await;
    match outcome {
        Ok(RelayResult::Success { url }) => {
            info!(transport = %transport_name, %url, "image relayed");
            reply(StatusCode::OK, RelayReply::uploaded(url))
        }
        Ok(RelayResult::Failure {
            reason,
            provider_detail,
        }) => {
            warn!(
                transport = %transport_name,
                %reason,
                detail = ?provider_detail,
                "image relay failed"
            );
            reply(StatusCode::INTERNAL_SERVER_ERROR, RelayReply::failed(reason))
        }
        Err(err) => {
            error!(transport = %transport_name, error = %err, "image relay task aborted");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                RelayReply::failed("Internal relay error"),
            )
        }
    }
}

fn reply(status: StatusCode, body: RelayReply) -> Response {
    (status, Json(body)).into_response()
}
