//! Wire protocol spoken with the WinDbg extension
//!
//! Every message is compact JSON followed by a `\r\n\r\n` delimiter:
//! ```text
//! {"protocol_version":1,"message_type":1,"payload":{...}}\r\n\r\n
//! ```
//!
//! Requests always use the versioned envelope. Responses come in two shapes:
//! the versioned envelope (`payload.type` is `response` or `error`) and an
//! older flat `{status, output|error}` object. Both are decoded into one
//! [`ExtensionResponse`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::{Error, Result};

/// End-of-message marker
pub const DELIMITER: &[u8] = b"\r\n\r\n";

/// Protocol version sent in every request
pub const PROTOCOL_VERSION: u32 = 1;

/// `message_type` value for command requests
pub const MESSAGE_TYPE_COMMAND: u32 = 1;

/// Largest response frame we accept (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

static LAST_REQUEST_ID: AtomicU64 = AtomicU64::new(0);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Next request id: the current time in milliseconds, bumped so it never
/// repeats or goes backwards within this process
pub fn next_request_id() -> u64 {
    let now = now_millis();
    let mut last = LAST_REQUEST_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_REQUEST_ID.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Request envelope sent to the extension
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub protocol_version: u32,
    pub message_type: u32,
    pub payload: RequestPayload,
}

/// Body of a request
#[derive(Debug, Clone, Serialize)]
pub struct RequestPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    /// Raw debugger text, or a handler name for handler requests
    pub command: String,
    pub parameters: Map<String, Value>,
    pub timeout_ms: u64,
    pub timestamp: u64,
}

impl Request {
    /// Build a request that runs raw debugger text
    pub fn command(command: &str, timeout_ms: u64) -> Self {
        Self::new(command, Map::new(), timeout_ms)
    }

    /// Build a request that invokes a named extension handler
    pub fn handler(name: &str, parameters: Map<String, Value>, timeout_ms: u64) -> Self {
        Self::new(name, parameters, timeout_ms)
    }

    fn new(command: &str, parameters: Map<String, Value>, timeout_ms: u64) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            message_type: MESSAGE_TYPE_COMMAND,
            payload: RequestPayload {
                kind: "command".to_string(),
                request_id: next_request_id().to_string(),
                command: command.to_string(),
                parameters,
                timeout_ms,
                timestamp: now_millis(),
            },
        }
    }

    /// The command or handler name carried by this request
    pub fn command_text(&self) -> &str {
        &self.payload.command
    }
}

/// Encode a request into a delimited frame
pub fn encode(request: &Request) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(request).map_err(|e| Error::Encoding(e.to_string()))?;
    frame.extend_from_slice(DELIMITER);
    Ok(frame)
}

/// Position of the first delimiter in `data`, if any
pub fn find_delimiter(data: &[u8]) -> Option<usize> {
    data.windows(DELIMITER.len()).position(|w| w == DELIMITER)
}

/// Status reported by the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Response normalized from either wire shape
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionResponse {
    pub status: Option<ResponseStatus>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub request_id: Option<String>,
    pub error_code: Option<i64>,
}

impl ExtensionResponse {
    /// A response is usable only if it says how it went and carries the
    /// field that goes with that status
    pub fn is_well_formed(&self) -> bool {
        match self.status {
            None => false,
            Some(ResponseStatus::Error) => self.error.is_some(),
            Some(ResponseStatus::Success) => self.output.is_some(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(ResponseStatus::Success)
    }
}

/// The two response shapes the extension may send
#[derive(Debug, Clone)]
pub enum WireResponse {
    /// `{protocol_version, message_type, payload:{type, ...}}`
    Versioned(VersionedPayload),
    /// `{status, output|error}`
    Legacy(LegacyResponse),
}

#[derive(Debug, Deserialize)]
struct VersionedEnvelope {
    payload: VersionedPayload,
}

/// Payload of a versioned response
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VersionedPayload {
    Response {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        output: String,
        #[serde(default)]
        error_message: Option<String>,
        #[serde(default)]
        execution_time_ms: f64,
        #[serde(default)]
        request_id: Value,
    },
    Error {
        #[serde(default)]
        error_message: Option<String>,
        #[serde(default)]
        error_code: Option<i64>,
        #[serde(default)]
        request_id: Value,
    },
}

/// Flat response shape used by older extension builds
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: Option<f64>,
    #[serde(default)]
    pub request_id: Value,
}

fn id_to_string(id: Value) -> Option<String> {
    match id {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl From<WireResponse> for ExtensionResponse {
    fn from(wire: WireResponse) -> Self {
        match wire {
            WireResponse::Versioned(VersionedPayload::Response {
                success,
                output,
                error_message,
                execution_time_ms,
                request_id,
            }) => Self {
                status: Some(if success {
                    ResponseStatus::Success
                } else {
                    ResponseStatus::Error
                }),
                output: Some(output),
                error: if success {
                    None
                } else {
                    Some(error_message.unwrap_or_default())
                },
                execution_time_ms: execution_time_ms.max(0.0) as u64,
                request_id: id_to_string(request_id),
                error_code: None,
            },
            WireResponse::Versioned(VersionedPayload::Error {
                error_message,
                error_code,
                request_id,
            }) => Self {
                status: Some(ResponseStatus::Error),
                output: None,
                error: Some(error_message.unwrap_or_else(|| "Unknown error".to_string())),
                execution_time_ms: 0,
                request_id: id_to_string(request_id),
                error_code: Some(error_code.unwrap_or(0)),
            },
            WireResponse::Legacy(legacy) => Self {
                status: match legacy.status.as_deref() {
                    Some("success") => Some(ResponseStatus::Success),
                    Some("error") => Some(ResponseStatus::Error),
                    _ => None,
                },
                output: legacy.output,
                error: legacy.error,
                execution_time_ms: legacy.execution_time_ms.unwrap_or(0.0).max(0.0) as u64,
                request_id: id_to_string(legacy.request_id),
                error_code: None,
            },
        }
    }
}

/// Parse a frame into one of the two wire shapes
pub fn parse(frame: &[u8]) -> Result<WireResponse> {
    let body = frame.strip_suffix(DELIMITER).unwrap_or(frame);

    if body.len() > MAX_FRAME_SIZE {
        return Err(Error::Decoding(format!("response too large: {} bytes", body.len())));
    }

    let text = std::str::from_utf8(body)
        .map_err(|e| Error::Decoding(format!("invalid UTF-8 in response: {}", e)))?;
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| Error::Decoding(format!("malformed JSON: {}", e)))?;

    let Value::Object(ref object) = value else {
        return Err(Error::Decoding("response is not a JSON object".to_string()));
    };

    if object.contains_key("protocol_version") && object.contains_key("payload") {
        let envelope: VersionedEnvelope = serde_json::from_value(value)
            .map_err(|e| Error::Decoding(format!("unsupported response payload: {}", e)))?;
        Ok(WireResponse::Versioned(envelope.payload))
    } else {
        let legacy: LegacyResponse = serde_json::from_value(value)
            .map_err(|e| Error::Decoding(format!("malformed legacy response: {}", e)))?;
        Ok(WireResponse::Legacy(legacy))
    }
}

/// Decode a frame into a normalized response
pub fn decode(frame: &[u8]) -> Result<ExtensionResponse> {
    parse(frame).map(ExtensionResponse::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command_frame() {
        let request = Request::command("k", 5000);
        let frame = encode(&request).unwrap();

        assert!(frame.ends_with(DELIMITER));
        assert_eq!(find_delimiter(&frame), Some(frame.len() - DELIMITER.len()));

        let body: Value = serde_json::from_slice(&frame[..frame.len() - 4]).unwrap();
        assert_eq!(body["protocol_version"], 1);
        assert_eq!(body["message_type"], 1);
        assert_eq!(body["payload"]["type"], "command");
        assert_eq!(body["payload"]["command"], "k");
        assert_eq!(body["payload"]["timeout_ms"], 5000);
        assert!(body["payload"]["parameters"].as_object().unwrap().is_empty());
        assert!(body["payload"]["request_id"].is_string());
    }

    #[test]
    fn test_encode_is_compact() {
        let frame = encode(&Request::command("lm", 1)).unwrap();
        let text = String::from_utf8(frame).unwrap();
        assert!(!text.contains(": "));
        assert!(!text.contains(", "));
    }

    #[test]
    fn test_handler_parameters() {
        let mut params = Map::new();
        params.insert("thread_id".into(), Value::from(3));
        let request = Request::handler("switch_thread", params, 1000);
        assert_eq!(request.command_text(), "switch_thread");
        assert_eq!(request.payload.parameters["thread_id"], 3);
    }

    #[test]
    fn test_request_ids_increase() {
        let a = next_request_id();
        let b = next_request_id();
        let c = next_request_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_decode_versioned_success() {
        let frame = br#"{"protocol_version":1,"message_type":2,"payload":{"type":"response","request_id":"42","success":true,"output":"rax=1","execution_time_ms":12}}"#;
        let mut data = frame.to_vec();
        data.extend_from_slice(DELIMITER);

        let response = decode(&data).unwrap();
        assert_eq!(response.status, Some(ResponseStatus::Success));
        assert_eq!(response.output.as_deref(), Some("rax=1"));
        assert_eq!(response.error, None);
        assert_eq!(response.execution_time_ms, 12);
        assert_eq!(response.request_id.as_deref(), Some("42"));
        assert!(response.is_well_formed());
    }

    #[test]
    fn test_decode_versioned_unsuccessful_response() {
        let frame = br#"{"protocol_version":1,"payload":{"type":"response","success":false,"error_message":"bad"}}"#;
        let response = decode(frame).unwrap();
        assert_eq!(response.status, Some(ResponseStatus::Error));
        assert_eq!(response.error.as_deref(), Some("bad"));
        assert!(response.is_well_formed());
    }

    #[test]
    fn test_decode_versioned_error() {
        let frame = br#"{"protocol_version":1,"payload":{"type":"error","request_id":7,"error_code":5}}"#;
        let response = decode(frame).unwrap();
        assert_eq!(response.status, Some(ResponseStatus::Error));
        assert_eq!(response.error.as_deref(), Some("Unknown error"));
        assert_eq!(response.error_code, Some(5));
        assert_eq!(response.request_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_decode_legacy() {
        let response = decode(b"{\"status\":\"success\",\"output\":\"\"}\r\n\r\n").unwrap();
        assert!(response.is_success());
        assert_eq!(response.output.as_deref(), Some(""));
        assert!(response.is_well_formed());

        let response = decode(br#"{"status":"error","error":"no target"}"#).unwrap();
        assert_eq!(response.status, Some(ResponseStatus::Error));
        assert_eq!(response.error.as_deref(), Some("no target"));
    }

    #[test]
    fn test_well_formed_rules() {
        assert!(!decode(br#"{"output":"x"}"#).unwrap().is_well_formed());
        assert!(!decode(br#"{"status":"error"}"#).unwrap().is_well_formed());
        assert!(!decode(br#"{"status":"success"}"#).unwrap().is_well_formed());
        assert!(!decode(br#"{"status":"pending","output":""}"#).unwrap().is_well_formed());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"not json\r\n\r\n"), Err(Error::Decoding(_))));
        assert!(matches!(decode(&[0xff, 0xfe, 0x00]), Err(Error::Decoding(_))));
        assert!(matches!(decode(b"[1,2,3]"), Err(Error::Decoding(_))));
        assert!(matches!(
            decode(br#"{"protocol_version":1,"payload":{"type":"event"}}"#),
            Err(Error::Decoding(_))
        ));
    }
}
