//! Request/response/event envelopes shared by the persistence and session
//! services.
//!
//! Requests arrive as `{"action": string, "data": object}` and are decoded
//! straight into tagged enums ([`super::store_msg::StoreRequest`],
//! [`super::session_msg::SessionRequest`]); an unrecognized action tag fails
//! at this parse boundary and never propagates further. Responses are
//! `{"status", "message", "data"}`; unsolicited pushes are `{"event", "data"}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// The `{status, message, data}` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub message: String,
    pub data: Value,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            status: Status::Success,
            message: String::new(),
            data,
        }
    }

    pub fn ok_empty() -> Self {
        Self::ok(Value::Object(serde_json::Map::new()))
    }

    /// Error envelope carrying the machine-readable kind in `data.kind`.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            data: serde_json::json!({ "kind": kind }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// The error kind of an error envelope, if it carries a known one.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.is_success() {
            return None;
        }
        serde_json::from_value(self.data.get("kind")?.clone()).ok()
    }

    /// Decode the payload of a success envelope.
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let resp = Response::ok(serde_json::json!({"id": 3}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["data"]["id"], 3);
    }

    #[test]
    fn error_envelope_carries_kind() {
        let resp = Response::error(ErrorKind::Capacity, "room is full");
        assert!(!resp.is_success());
        assert_eq!(resp.error_kind(), Some(ErrorKind::Capacity));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["data"]["kind"], "Capacity");
        assert_eq!(json["message"], "room is full");
    }

    #[test]
    fn decode_extracts_typed_payload() {
        #[derive(Deserialize)]
        struct Payload {
            id: u64,
        }
        let resp = Response::ok(serde_json::json!({"id": 42}));
        let payload: Payload = resp.decode().unwrap();
        assert_eq!(payload.id, 42);
    }
}
