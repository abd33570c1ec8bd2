use axum::{
    Form, Json,
    extract::{FromRequest, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use crate::crypto_service::CryptoError;
use crate::key_store::KeyStoreError;
use crate::models::{AesKeyRequest, ApiResponse, Payload, ProcessPayloadRequest, StatsResponse};
use crate::state::AppState;

/// Header carrying the caller's browser identity
pub const BROWSER_ID_HEADER: &str = "browserid";

const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Browser ID is missing from headers")]
    MissingBrowserId,
    #[error("Browser ID is invalid")]
    InvalidBrowserId,
    #[error("Public key is missing from request body")]
    MissingPublicKey,
    #[error("Encrypted payload is missing from request body")]
    MissingEncryptedPayload,
    #[error("no AES key on file for browser {0:?}")]
    KeyNotFound(String),
    #[error("decrypted payload is not a JSON object: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    KeyStore(KeyStoreError),
}

impl From<KeyStoreError> for ApiError {
    fn from(e: KeyStoreError) -> Self {
        match e {
            KeyStoreError::InvalidIdentity(_) => ApiError::InvalidBrowserId,
            other => ApiError::KeyStore(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingBrowserId
            | ApiError::InvalidBrowserId
            | ApiError::MissingPublicKey
            | ApiError::MissingEncryptedPayload => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal failures stay in the log; the client gets a generic message
        let message = if status.is_server_error() {
            tracing::error!("request failed: {}", self);
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            tracing::warn!("rejected request: {}", self);
            self.to_string()
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

fn browser_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(BROWSER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingBrowserId)
}

/// Request body sent either as JSON or as an urlencoded form.
///
/// Never rejects: a body that fails to parse comes through as `None`, so the
/// handler can report the missing field after checking the header.
#[derive(Debug)]
pub struct RequestBody<T>(pub Option<T>);

impl<S, T> FromRequest<S> for RequestBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

        let body = if is_form {
            Form::<T>::from_request(req, state).await.ok().map(|Form(body)| body)
        } else {
            Json::<T>::from_request(req, state).await.ok().map(|Json(body)| body)
        };

        Ok(RequestBody(body))
    }
}

fn required_field<T>(
    body: RequestBody<T>,
    field: impl FnOnce(T) -> Option<String>,
    missing: ApiError,
) -> Result<String, ApiError> {
    body.0
        .and_then(field)
        .filter(|value| !value.is_empty())
        .ok_or(missing)
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub async fn root() -> &'static str {
    "Browser Key Exchange Service API\n\nEndpoints:\n- POST /aesKey: Get a fresh AES key wrapped with your RSA public key\n- POST /payload/process: Decrypt, timestamp and re-encrypt a payload\n- GET /stats: Get service statistics"
}

// Handler issuing a fresh AES key wrapped with the caller's public key
pub async fn exchange_aes_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: RequestBody<AesKeyRequest>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    let start = Instant::now();

    let browser_id = browser_id(&headers)?;
    let public_key = required_field(body, |req| req.public_key, ApiError::MissingPublicKey)?;

    let _guard = state.locks().lock(&browser_id).await;

    let aes_key = state.crypto().generate_aes_key(&browser_id)?;
    state.keys().put(&browser_id, &aes_key).await?;

    // The new key is already on file, so a bad public key still replaces it
    let wrapped = state.crypto().wrap_aes_key(&aes_key, &public_key)?;

    tracing::info!(
        browser_id = %browser_id,
        elapsed = ?start.elapsed(),
        "AES key issued"
    );

    Ok(Json(ApiResponse::success(wrapped)))
}

// Handler decrypting a payload, stamping createdAt and sealing it again
pub async fn process_payload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: RequestBody<ProcessPayloadRequest>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    let start = Instant::now();

    let browser_id = browser_id(&headers)?;
    let encrypted_payload = required_field(
        body,
        |req| req.encrypted_payload,
        ApiError::MissingEncryptedPayload,
    )?;

    let _guard = state.locks().lock(&browser_id).await;

    let aes_key = state
        .keys()
        .get(&browser_id)
        .await?
        .ok_or_else(|| ApiError::KeyNotFound(browser_id.clone()))?;

    let decrypted = state.crypto().decrypt(&encrypted_payload, &aes_key)?;
    let mut payload: Payload = serde_json::from_str(&decrypted)?;
    payload.stamp_created_at(now_timestamp());

    let processed = serde_json::to_string(&payload)?;
    let encrypted = state.crypto().encrypt(&processed, &aes_key)?;

    tracing::info!(
        browser_id = %browser_id,
        elapsed = ?start.elapsed(),
        "payload processed"
    );

    Ok(Json(ApiResponse::success(encrypted)))
}

// Service health check and statistics
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error("Not Found")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_browser_id_requires_non_empty_header() {
        let mut headers = HeaderMap::new();
        assert!(matches!(browser_id(&headers), Err(ApiError::MissingBrowserId)));

        headers.insert(BROWSER_ID_HEADER, HeaderValue::from_static(""));
        assert!(matches!(browser_id(&headers), Err(ApiError::MissingBrowserId)));

        headers.insert(BROWSER_ID_HEADER, HeaderValue::from_static("abc123"));
        assert_eq!(browser_id(&headers).unwrap(), "abc123");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::MissingBrowserId.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::MissingPublicKey.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(KeyStoreError::InvalidIdentity("..".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::KeyNotFound("abc123".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(CryptoError::InvalidUtf8).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_timestamp_is_iso_with_millis() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-05-01T12:00:00.000Z".len());
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
