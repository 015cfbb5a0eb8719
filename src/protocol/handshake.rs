//! Connect handshake messages.
//!
//! The first request on every socket is `connect`. The gateway answers with a
//! response whose payload carries `type: "hello-ok"` when it accepts the
//! client; anything else is a rejection.

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

use super::ResponseFrame;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 3;

/// Method name of the handshake request.
pub const CONNECT_METHOD: &str = "connect";

/// Payload discriminant of an accepted handshake.
pub const HELLO_OK: &str = "hello-ok";

/// Default time allowed for the gateway to answer `connect`, in milliseconds.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// ConnectParams
// ============================================================================

/// Parameters of the `connect` request.
///
/// # Format
///
/// ```json
/// {
///   "minProtocol": 3,
///   "maxProtocol": 3,
///   "client": { "id": "web-chat-ui", "version": "0.1.0", "platform": "linux", "mode": "operator" },
///   "timezone": "Europe/Berlin"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Oldest protocol version the client speaks.
    pub min_protocol: u32,

    /// Newest protocol version the client speaks.
    pub max_protocol: u32,

    /// Client identity.
    pub client: ClientInfo,

    /// Advertised capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caps: Option<Vec<String>>,

    /// Requested role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Requested scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    /// Client locale, e.g. `en-US`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// Free-form user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// IANA timezone name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

// ============================================================================
// ClientInfo
// ============================================================================

/// Identity the client presents in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client kind, e.g. `web-chat-ui`.
    pub id: String,

    /// Human readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Client version.
    pub version: String,

    /// Host platform.
    pub platform: String,

    /// Connection mode, e.g. `operator`.
    pub mode: String,

    /// Per-process instance id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

// ============================================================================
// HelloOk
// ============================================================================

/// Payload of an accepted handshake.
///
/// Only `type` is required; gateways may omit the rest. Metadata that does
/// not fit the typed fields is kept in [`HelloOk::extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    /// Always `hello-ok`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Negotiated protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,

    /// Server identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,

    /// Methods and events the gateway offers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,

    /// Limits the client should respect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,

    /// Opaque initial state snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,

    /// Any other session metadata.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HelloOk {
    /// Interprets a handshake response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeRejected`] unless the response is `ok` and its
    /// payload has `type: "hello-ok"`. The remaining fields never reject.
    pub fn from_response(response: &ResponseFrame) -> Result<Self> {
        if !response.ok {
            let message = response.error_message().unwrap_or("handshake refused");
            return Err(Error::handshake_rejected(message));
        }

        match response.payload_type() {
            Some(HELLO_OK) => {}
            Some(other) => {
                return Err(Error::handshake_rejected(format!(
                    "unexpected handshake payload type `{other}`"
                )));
            }
            None => return Err(Error::handshake_rejected("handshake payload has no type")),
        }

        let Some(Value::Object(mut object)) = response.payload.clone() else {
            return Err(Error::handshake_rejected("handshake payload is not an object"));
        };
        object.remove("type");

        Ok(Self {
            kind: HELLO_OK.to_string(),
            protocol: take_field(&mut object, "protocol"),
            server: take_field(&mut object, "server"),
            features: take_field(&mut object, "features"),
            policy: take_field(&mut object, "policy"),
            snapshot: object.remove("snapshot"),
            extra: object,
        })
    }
}

/// Removes and parses one metadata field, leaving it in place if it does not parse.
fn take_field<T: DeserializeOwned>(object: &mut Map<String, Value>, key: &str) -> Option<T> {
    let value = object.remove(key)?;

    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(field = key, error = %e, "Keeping unparsed hello-ok field");
            object.insert(key.to_string(), value);
            None
        }
    }
}

/// Gateway identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server version.
    #[serde(default)]
    pub version: String,

    /// Build commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// Host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Connection id assigned to this socket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,
}

/// Methods and events the gateway offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// RPC method names.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Event names.
    #[serde(default)]
    pub events: Vec<String>,
}

/// Limits announced by the gateway. Missing limits read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Policy {
    /// Largest accepted frame, in bytes.
    pub max_payload: usize,

    /// Largest send buffer, in bytes.
    pub max_buffered_bytes: usize,

    /// Keepalive tick interval.
    pub tick_interval_ms: u64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::RequestId;
    use crate::protocol::ErrorShape;
    use serde_json::json;

    fn client() -> ClientInfo {
        ClientInfo {
            id: "web-chat-ui".into(),
            display_name: None,
            version: "0.1.0".into(),
            platform: "linux".into(),
            mode: "operator".into(),
            instance_id: None,
        }
    }

    #[test]
    fn test_connect_params_wire_names() {
        let params = ConnectParams {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: client(),
            caps: None,
            role: None,
            scopes: None,
            locale: None,
            user_agent: Some("ua".into()),
            timezone: Some("UTC".into()),
        };

        let value = serde_json::to_value(&params).expect("serialize");
        assert_eq!(
            value,
            json!({
                "minProtocol": 3,
                "maxProtocol": 3,
                "client": {
                    "id": "web-chat-ui",
                    "version": "0.1.0",
                    "platform": "linux",
                    "mode": "operator"
                },
                "userAgent": "ua",
                "timezone": "UTC"
            })
        );
    }

    #[test]
    fn test_minimal_hello_ok_accepted() {
        let response = ResponseFrame::success(RequestId::new("c"), json!({ "type": "hello-ok" }));
        let hello = HelloOk::from_response(&response).expect("accepted");
        assert_eq!(hello.kind, HELLO_OK);
        assert!(hello.server.is_none());
    }

    #[test]
    fn test_full_hello_ok() {
        let response = ResponseFrame::success(
            RequestId::new("c"),
            json!({
                "type": "hello-ok",
                "protocol": 3,
                "server": { "version": "1.2.3", "connId": "abc" },
                "features": { "methods": ["chat.send"], "events": ["chat"] },
                "policy": { "maxPayload": 524288, "maxBufferedBytes": 1572864, "tickIntervalMs": 30000 },
                "snapshot": {},
                "canvasHostUrl": "http://localhost"
            }),
        );

        let hello = HelloOk::from_response(&response).expect("accepted");
        assert_eq!(hello.protocol, Some(3));
        assert_eq!(
            hello.server.as_ref().and_then(|s| s.conn_id.as_deref()),
            Some("abc")
        );
        assert_eq!(hello.policy.map(|p| p.tick_interval_ms), Some(30_000));
        assert!(hello.extra.contains_key("canvasHostUrl"));
    }

    #[test]
    fn test_partial_metadata_accepted() {
        let response = ResponseFrame::success(
            RequestId::new("c"),
            json!({
                "type": "hello-ok",
                "policy": { "maxPayload": 1 },
                "server": { "connId": "x" }
            }),
        );

        let hello = HelloOk::from_response(&response).expect("accepted");
        let policy = hello.policy.expect("policy");
        assert_eq!(policy.max_payload, 1);
        assert_eq!(policy.max_buffered_bytes, 0);
        let server = hello.server.expect("server");
        assert_eq!(server.conn_id.as_deref(), Some("x"));
        assert!(server.version.is_empty());
    }

    #[test]
    fn test_mistyped_metadata_kept_as_extra() {
        let response = ResponseFrame::success(
            RequestId::new("c"),
            json!({
                "type": "hello-ok",
                "protocol": "three",
                "features": { "methods": "all" },
                "policy": { "tickIntervalMs": 15000 }
            }),
        );

        let hello = HelloOk::from_response(&response).expect("accepted");
        assert_eq!(hello.protocol, None);
        assert_eq!(hello.features, None);
        assert_eq!(hello.policy.map(|p| p.tick_interval_ms), Some(15_000));
        assert_eq!(hello.extra.get("protocol"), Some(&json!("three")));
        assert_eq!(hello.extra.get("features"), Some(&json!({ "methods": "all" })));
        assert!(!hello.extra.contains_key("type"));
    }

    #[test]
    fn test_other_payload_type_rejected() {
        let response = ResponseFrame::success(RequestId::new("c"), json!({ "type": "hello-fail" }));
        let err = HelloOk::from_response(&response).expect_err("rejected");
        assert!(matches!(err, Error::HandshakeRejected { .. }));
    }

    #[test]
    fn test_error_response_rejected() {
        let response = ResponseFrame::failure(
            RequestId::new("c"),
            ErrorShape::new("protocol mismatch").with_code("INVALID_REQUEST"),
        );
        let err = HelloOk::from_response(&response).expect_err("rejected");
        assert_eq!(err.to_string(), "Handshake rejected: protocol mismatch");
    }

    #[test]
    fn test_missing_payload_rejected() {
        let response = ResponseFrame {
            id: RequestId::new("c"),
            ok: true,
            payload: None,
            error: None,
        };
        assert!(HelloOk::from_response(&response).is_err());
    }
}
