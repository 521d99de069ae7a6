//! Messages exchanged over the supervisor/worker channel
//!
//! Every message is a JSON object with a `type` discriminator. On the wire
//! each message occupies exactly one line (newline-delimited JSON).

use crate::error::ErrorPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

pub const INIT: &str = "lambda.INIT";
pub const INIT_RESULT: &str = "lambda.INIT_RESULT";
pub const INVOKE: &str = "lambda.INVOKE";
pub const INVOKE_RESULT: &str = "lambda.INVOKE_RESULT";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message contains a raw newline")]
    EmbeddedNewline,
}

/// Supervisor → worker: one-time initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_identifier: Option<String>,
    pub module_path: PathBuf,
    pub handler_name: String,
    /// Keep the worker alive after a result and accept concurrent invocations
    #[serde(default)]
    pub persistent: bool,
}

/// Worker → supervisor: outcome of INIT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResult {
    #[serde(default)]
    pub err: Option<ErrorPayload>,
}

/// Supervisor → worker: run the handler once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub event: Value,
    pub context: Value,
    pub correlation_id: u64,
}

/// Worker → supervisor: outcome of one INVOKE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    pub correlation_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ErrorPayload>,
}

impl InvokeResult {
    pub fn from_outcome(correlation_id: u64, outcome: Result<Value, ErrorPayload>) -> Self {
        match outcome {
            Ok(result) => Self {
                correlation_id,
                result: Some(result),
                err: None,
            },
            Err(err) => Self {
                correlation_id,
                result: None,
                err: Some(err),
            },
        }
    }

    /// An error excludes a result; a missing result is `null`
    pub fn into_outcome(self) -> Result<Value, ErrorPayload> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "lambda.INIT")]
    Init(InitRequest),
    #[serde(rename = "lambda.INIT_RESULT")]
    InitResult(InitResult),
    #[serde(rename = "lambda.INVOKE")]
    Invoke(InvokeRequest),
    #[serde(rename = "lambda.INVOKE_RESULT")]
    InvokeResult(InvokeResult),
}

/// Message discriminator without its payload, for logging and dispatch tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Init,
    InitResult,
    Invoke,
    InvokeResult,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => INIT,
            Self::InitResult => INIT_RESULT,
            Self::Invoke => INVOKE,
            Self::InvokeResult => INVOKE_RESULT,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Init(_) => MessageKind::Init,
            Self::InitResult(_) => MessageKind::InitResult,
            Self::Invoke(_) => MessageKind::Invoke,
            Self::InvokeResult(_) => MessageKind::InvokeResult,
        }
    }

    /// Correlation id for invoke-class messages
    pub fn correlation_id(&self) -> Option<u64> {
        match self {
            Self::Invoke(m) => Some(m.correlation_id),
            Self::InvokeResult(m) => Some(m.correlation_id),
            Self::Init(_) | Self::InitResult(_) => None,
        }
    }

    /// Encode as a single newline-terminated frame
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut frame = serde_json::to_vec(self)?;
        // serde_json escapes newlines inside strings
        if frame.contains(&b'\n') {
            return Err(FrameError::EmbeddedNewline);
        }
        frame.push(b'\n');
        Ok(frame)
    }

    /// Decode one frame; surrounding whitespace (including the newline) is ignored
    pub fn decode(line: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

impl From<InitRequest> for Message {
    fn from(m: InitRequest) -> Self {
        Self::Init(m)
    }
}

impl From<InitResult> for Message {
    fn from(m: InitResult) -> Self {
        Self::InitResult(m)
    }
}

impl From<InvokeRequest> for Message {
    fn from(m: InvokeRequest) -> Self {
        Self::Invoke(m)
    }
}

impl From<InvokeResult> for Message {
    fn from(m: InvokeResult) -> Self {
        Self::InvokeResult(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_init_wire_format() {
        let message = Message::Init(InitRequest {
            region: Some("us-east-1".to_string()),
            sdk_path: None,
            process_identifier: Some("arn:aws:lambda:us-east-1:000000000000:function:test".to_string()),
            module_path: PathBuf::from("/var/task/index"),
            handler_name: "handler".to_string(),
            persistent: false,
        });

        let json: Value = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "lambda.INIT");
        assert_eq!(json["region"], "us-east-1");
        assert_eq!(json["modulePath"], "/var/task/index");
        assert_eq!(json["handlerName"], "handler");
        assert_eq!(json["processIdentifier"], "arn:aws:lambda:us-east-1:000000000000:function:test");
        assert!(json.get("sdkPath").is_none());
    }

    #[test]
    fn test_init_persistent_defaults_to_false() {
        let line = r#"{"type":"lambda.INIT","modulePath":"/m/index","handlerName":"handler"}"#;
        match Message::decode(line).unwrap() {
            Message::Init(init) => {
                assert!(!init.persistent);
                assert_eq!(init.region, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_invoke_result_with_error() {
        let line = r#"{"type":"lambda.INVOKE_RESULT","correlationId":7,"err":{"code":"HandlerRuntimeError","message":"boom"}}"#;
        let message = Message::decode(line).unwrap();
        assert_eq!(message.kind(), MessageKind::InvokeResult);
        assert_eq!(message.correlation_id(), Some(7));

        let Message::InvokeResult(result) = message else {
            panic!("expected INVOKE_RESULT");
        };
        let err = result.into_outcome().unwrap_err();
        assert!(err.is(ErrorCode::HandlerRuntime));
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_missing_result_is_null() {
        let result = InvokeResult {
            correlation_id: 1,
            result: None,
            err: None,
        };
        assert_eq!(result.into_outcome().unwrap(), Value::Null);
    }

    #[test]
    fn test_encode_is_single_line() {
        let message = Message::Invoke(InvokeRequest {
            event: json!({"text": "line one\nline two"}),
            context: json!({}),
            correlation_id: 1,
        });

        let frame = message.encode().unwrap();
        assert_eq!(frame.last(), Some(&b'\n'));
        assert_eq!(frame.iter().filter(|b| **b == b'\n').count(), 1);

        let decoded = Message::decode(std::str::from_utf8(&frame).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = Message::decode(r#"{"type":"lambda.SHUTDOWN"}"#).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }
}
