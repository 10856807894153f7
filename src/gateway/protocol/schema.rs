//! Gateway protocol schema
//!
//! Defines the wire format for gateway frames. Every WebSocket text message
//! carries exactly one frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway frame - Top-level message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    /// Request from client
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// Response from gateway
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Event pushed by gateway
    #[serde(rename = "event")]
    Event(EventFrame),
}

/// Request frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Unique request ID
    pub id: String,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Response frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Request ID this responds to
    pub id: String,
    /// Whether the request succeeded
    pub ok: bool,
    /// Result (success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error (failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// Event frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name
    pub event: String,
    /// Monotonic sequence number, when the gateway assigns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Event data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Error carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Error message
    pub message: String,
    /// Machine-readable code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl GatewayFrame {
    /// Decode a frame from a text message
    pub fn parse(text: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode a frame as a text message
    pub fn to_text(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl RequestFrame {
    /// Create a new request
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        RequestFrame {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl ResponseFrame {
    /// Create a success response
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        ResponseFrame {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Create an error response
    pub fn failure(id: impl Into<String>, error: ErrorShape) -> Self {
        ResponseFrame {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Convert into the outcome seen by the caller of `call`
    pub fn into_result(self) -> crate::error::Result<Value> {
        if self.ok {
            return Ok(self.payload.unwrap_or(Value::Null));
        }
        match self.error {
            Some(error) => Err(crate::error::Error::rpc(error.message, error.code)),
            None => Err(crate::error::Error::rpc("request failed", None)),
        }
    }
}

impl EventFrame {
    /// Create a new event
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        EventFrame {
            event: event.into(),
            seq: None,
            payload: Some(payload),
        }
    }

    /// Set the sequence number
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}

impl ErrorShape {
    /// Create a new error shape
    pub fn new(message: impl Into<String>) -> Self {
        ErrorShape {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_wire_shape() {
        let frame = GatewayFrame::Request(RequestFrame::new(
            "1",
            "chat.send",
            Some(json!({"message": "hello"})),
        ));

        let value: Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "req", "id": "1", "method": "chat.send", "params": {"message": "hello"}})
        );
    }

    #[test]
    fn test_parse_failed_response() {
        let frame = GatewayFrame::parse(
            r#"{"type":"res","id":"7","ok":false,"error":{"message":"rate limited","code":"RATE_LIMITED"}}"#,
        )
        .unwrap();

        let GatewayFrame::Response(res) = frame else {
            panic!("expected response frame");
        };
        let err = res.into_result().unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
        assert_eq!(err.rpc_code(), Some("RATE_LIMITED"));
    }

    #[test]
    fn test_parse_event_without_seq_or_payload() {
        let frame = GatewayFrame::parse(r#"{"type":"event","event":"tick"}"#).unwrap();
        assert_eq!(
            frame,
            GatewayFrame::Event(EventFrame {
                event: "tick".into(),
                seq: None,
                payload: None
            })
        );
    }

    #[test]
    fn test_success_without_payload_yields_null() {
        let res = ResponseFrame {
            id: "1".into(),
            ok: true,
            payload: None,
            error: None,
        };
        assert_eq!(res.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        assert!(GatewayFrame::parse(r#"{"type":"ping","id":"1"}"#).is_err());
        assert!(GatewayFrame::parse("not json").is_err());
    }
}
