use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Request/Response models for the key exchange

/// Field the server stamps on every processed payload
pub const CREATED_AT_FIELD: &str = "createdAt";

// Model for key exchange request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AesKeyRequest {
    #[serde(default)]
    pub public_key: Option<String>,
}

// Model for payload processing request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPayloadRequest {
    #[serde(default)]
    pub encrypted_payload: Option<String>,
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse<T> {
    Success { data: T },
    Error { message: String },
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse::Success { data }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        ApiResponse::Error {
            message: message.into(),
        }
    }
}

/// Decrypted client payload: any JSON object, one field reserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Map<String, Value>);

impl Payload {
    pub fn stamp_created_at(&mut self, timestamp: String) {
        self.0
            .insert(CREATED_AT_FIELD.to_string(), Value::String(timestamp));
    }

    pub fn created_at(&self) -> Option<&str> {
        self.0.get(CREATED_AT_FIELD).and_then(Value::as_str)
    }
}

// Model for service statistics
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shapes() {
        let ok = serde_json::to_value(ApiResponse::success("wrapped")).unwrap();
        assert_eq!(ok, json!({ "status": "success", "data": "wrapped" }));

        let err = serde_json::to_value(ApiResponse::<()>::error("Internal Server Error")).unwrap();
        assert_eq!(
            err,
            json!({ "status": "error", "message": "Internal Server Error" })
        );
    }

    #[test]
    fn test_requests_tolerate_missing_fields() {
        let req: AesKeyRequest = serde_json::from_str("{}").unwrap();
        assert!(req.public_key.is_none());

        let req: ProcessPayloadRequest =
            serde_json::from_str(r#"{"encryptedPayload":"abc","other":1}"#).unwrap();
        assert_eq!(req.encrypted_payload.as_deref(), Some("abc"));
    }

    #[test]
    fn test_payload_stamp_overwrites_and_keeps_fields() {
        let mut payload: Payload =
            serde_json::from_str(r#"{"x":1,"createdAt":"old","nested":{"y":[1,2]}}"#).unwrap();

        payload.stamp_created_at("2024-05-01T12:00:00.000Z".into());

        assert_eq!(payload.created_at(), Some("2024-05-01T12:00:00.000Z"));
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({ "x": 1, "createdAt": "2024-05-01T12:00:00.000Z", "nested": { "y": [1, 2] } })
        );
    }

    #[test]
    fn test_payload_keeps_client_field_order() {
        let mut payload: Payload = serde_json::from_str(r#"{"zeta":1,"alpha":2}"#).unwrap();
        payload.stamp_created_at("2024-05-01T12:00:00.000Z".into());

        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"zeta":1,"alpha":2,"createdAt":"2024-05-01T12:00:00.000Z"}"#
        );
    }

    #[test]
    fn test_payload_must_be_an_object() {
        assert!(serde_json::from_str::<Payload>("[1,2]").is_err());
        assert!(serde_json::from_str::<Payload>("5").is_err());
    }
}
