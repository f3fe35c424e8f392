use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// MCP servers may answer a POST either with a plain JSON document or with a
/// single SSE frame, and a single server can vary this per call. Callers pass
/// the response's declared content type and get one decoded payload back
/// either way.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no data frames found in event-stream response")]
    NoFramesFound,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Decoded JSON-RPC response to one call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

pub fn decode(raw: &str, content_kind: Option<&str>) -> Result<Envelope, DecodeError> {
    let value = decode_value(raw, content_kind)?;
    serde_json::from_value(value).map_err(|e| DecodeError::MalformedPayload(e.to_string()))
}

/// Extracts the single JSON payload from a response body. For event-stream
/// responses the first `data: ` line carries it; otherwise the whole body is
/// the document.
pub fn decode_value(raw: &str, content_kind: Option<&str>) -> Result<Value, DecodeError> {
    let is_stream = content_kind.is_some_and(|kind| kind.contains("text/event-stream"));

    let payload = if is_stream {
        raw.lines()
            .find_map(|line| line.strip_prefix("data: "))
            .ok_or(DecodeError::NoFramesFound)?
    } else {
        raw
    };

    serde_json::from_str(payload).map_err(|e| DecodeError::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_json() {
        let envelope = decode(
            r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#,
            Some("application/json"),
        )
        .unwrap();

        assert_eq!(envelope.id, Some(serde_json::json!(3)));
        assert_eq!(envelope.result.unwrap()["ok"], true);
        assert!(envelope.error.is_none());
    }

    #[test]
    fn decodes_sse_frame() {
        let raw = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}\n\n";
        let envelope = decode(raw, Some("text/event-stream")).unwrap();
        assert_eq!(envelope.id, Some(serde_json::json!(7)));
    }

    #[test]
    fn sse_and_json_decode_identically() {
        let payload = r#"{"jsonrpc":"2.0","id":1,"result":{"value":42}}"#;
        let framed = format!("data: {payload}\n\n");

        let plain = decode(payload, Some("application/json")).unwrap();
        let sse = decode(&framed, Some("text/event-stream; charset=utf-8")).unwrap();
        assert_eq!(plain, sse);
    }

    #[test]
    fn first_data_line_wins() {
        let raw = "data: {\"id\":1}\ndata: {\"id\":2}\n";
        let envelope = decode(raw, Some("text/event-stream")).unwrap();
        assert_eq!(envelope.id, Some(serde_json::json!(1)));
    }

    #[test]
    fn event_stream_without_frames_is_an_error() {
        let err = decode("event: ping\n\n", Some("text/event-stream")).unwrap_err();
        assert!(matches!(err, DecodeError::NoFramesFound));
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        let err = decode("not json at all", Some("application/json")).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload(_)));

        let err = decode("data: {broken\n", Some("text/event-stream")).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload(_)));
    }

    #[test]
    fn missing_content_kind_parses_as_json() {
        let envelope = decode(r#"{"id":9}"#, None).unwrap();
        assert_eq!(envelope.id, Some(serde_json::json!(9)));
    }

    #[test]
    fn error_payload_decodes() {
        let envelope = decode(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"method not found"}}"#,
            None,
        )
        .unwrap();

        let error = envelope.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "method not found");
    }
}
