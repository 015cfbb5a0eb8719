//! Wire frame types and codec.
//!
//! Every WebSocket text message carries exactly one JSON frame. The `type`
//! field discriminates: the strings `"req"` and `"res"` are requests and
//! responses, any other value marks a server-pushed event.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, from_str, from_value, to_string};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// `type` value of a request frame.
pub const REQUEST_TYPE: &str = "req";

/// `type` value of a response frame.
pub const RESPONSE_TYPE: &str = "res";

/// `type` value the gateway uses for push events.
pub const EVENT_TYPE: &str = "event";

// ============================================================================
// Frame
// ============================================================================

/// One discrete message on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// RPC call.
    Request(RequestFrame),
    /// RPC result.
    Response(ResponseFrame),
    /// Server push.
    Event(EventFrame),
}

impl Frame {
    /// Decodes one text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the text is not a JSON object with
    /// a `type` field, or a `req`/`res` frame is missing required fields.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = from_str(text).map_err(|e| Error::malformed_frame(e.to_string()))?;

        let kind = value
            .get("type")
            .ok_or_else(|| Error::malformed_frame("missing `type` field"))?;

        let frame = match kind.as_str() {
            Some(REQUEST_TYPE) => from_value(value).map(Self::Request),
            Some(RESPONSE_TYPE) => from_value(value).map(Self::Response),
            _ => from_value(value).map(Self::Event),
        };

        frame.map_err(|e| Error::malformed_frame(e.to_string()))
    }

    /// Encodes the frame as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a payload fails to serialize.
    pub fn encode(&self) -> Result<String> {
        let json = match self {
            Self::Request(request) => to_string(&Tagged {
                kind: REQUEST_TYPE,
                inner: request,
            })?,
            Self::Response(response) => to_string(&Tagged {
                kind: RESPONSE_TYPE,
                inner: response,
            })?,
            Self::Event(event) => to_string(event)?,
        };
        Ok(json)
    }

    /// Returns the `type` discriminant.
    ///
    /// Events whose `type` is not a string report `"event"`.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Request(_) => REQUEST_TYPE,
            Self::Response(_) => RESPONSE_TYPE,
            Self::Event(event) => event.kind.as_str().unwrap_or(EVENT_TYPE),
        }
    }
}

impl From<RequestFrame> for Frame {
    fn from(request: RequestFrame) -> Self {
        Self::Request(request)
    }
}

impl From<ResponseFrame> for Frame {
    fn from(response: ResponseFrame) -> Self {
        Self::Response(response)
    }
}

impl From<EventFrame> for Frame {
    fn from(event: EventFrame) -> Self {
        Self::Event(event)
    }
}

/// Adds the `type` field in front of a request or response body.
#[derive(Serialize)]
struct Tagged<'a, T> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    inner: &'a T,
}

// ============================================================================
// RequestFrame
// ============================================================================

/// Client to gateway RPC call.
///
/// # Format
///
/// ```json
/// { "type": "req", "id": "uuid", "method": "chat.send", "params": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id, unique for the socket's lifetime.
    pub id: RequestId,

    /// RPC method name.
    pub method: String,

    /// Method-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    /// Creates a request with a freshly generated id.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self::with_id(RequestId::generate(), method, params)
    }

    /// Creates a request with a specific id.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params: Some(params),
        }
    }
}

// ============================================================================
// ResponseFrame
// ============================================================================

/// Gateway to client RPC result.
///
/// # Format
///
/// Success:
/// ```json
/// { "type": "res", "id": "uuid", "ok": true, "payload": { ... } }
/// ```
///
/// Error:
/// ```json
/// { "type": "res", "id": "uuid", "ok": false, "error": { "message": "..." } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Echo of the request id.
    pub id: RequestId,

    /// Whether the call succeeded.
    pub ok: bool,

    /// Result data, present when `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Failure details, present when not `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    /// Creates a successful response.
    #[inline]
    #[must_use]
    pub fn success(id: RequestId, payload: Value) -> Self {
        Self {
            id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Creates a failed response.
    #[inline]
    #[must_use]
    pub fn failure(id: RequestId, error: ErrorShape) -> Self {
        Self {
            id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Returns the payload's `type` discriminant, if any.
    #[inline]
    #[must_use]
    pub fn payload_type(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
    }

    /// Returns the error message, if this is a failure.
    #[inline]
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// Extracts the payload, turning `ok: false` into an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the gateway reported a failure.
    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            return Ok(self.payload.unwrap_or(Value::Null));
        }

        match self.error {
            Some(error) => Err(Error::rpc(error.code, error.message)),
            None => Err(Error::rpc(None, "unknown error")),
        }
    }
}

// ============================================================================
// ErrorShape
// ============================================================================

/// Error body of a failed response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Human readable message.
    #[serde(default)]
    pub message: String,

    /// Machine readable code such as `UNAVAILABLE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Extra structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    /// Whether the gateway considers the call retryable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,

    /// Suggested retry delay.
    #[serde(
        default,
        rename = "retryAfterMs",
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_after_ms: Option<u64>,
}

impl ErrorShape {
    /// Creates an error with only a message.
    #[inline]
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Sets the error code.
    #[inline]
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

// ============================================================================
// EventFrame
// ============================================================================

/// Gateway to client push notification.
///
/// # Format
///
/// ```json
/// { "type": "event", "event": "chat", "payload": { ... }, "seq": 12 }
/// ```
///
/// Fields beyond the common ones are kept in [`EventFrame::extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// The frame's `type` value, kept as sent.
    #[serde(rename = "type")]
    pub kind: Value,

    /// Event name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Event-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Gateway sequence number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// Any other fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventFrame {
    /// Creates an `event` frame.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: Value::String(EVENT_TYPE.to_string()),
            event: Some(event.into()),
            payload: Some(payload),
            seq: None,
            extra: Map::new(),
        }
    }

    /// Returns the event name, falling back to a string `type`, then `"event"`.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.event
            .as_deref()
            .or_else(|| self.kind.as_str())
            .unwrap_or(EVENT_TYPE)
    }
}

// ============================================================================
// Tests
// ============================================================================
