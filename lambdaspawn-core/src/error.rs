//! Structured errors carried across the process boundary

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes reported by either side of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Supervisor side
    Spawn,
    ProcessExit,
    ChannelSend,

    // Worker side, during INIT
    DependencyConfig,
    HandlerLoad,

    // Worker side, during INVOKE
    HandlerRuntime,

    // Either side
    ProtocolViolation,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawn => "SpawnError",
            Self::ProcessExit => "ProcessExitError",
            Self::ChannelSend => "ChannelSendError",
            Self::DependencyConfig => "DependencyConfigError",
            Self::HandlerLoad => "HandlerLoadError",
            Self::HandlerRuntime => "HandlerRuntimeError",
            Self::ProtocolViolation => "ProtocolViolation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SpawnError" => Some(Self::Spawn),
            "ProcessExitError" => Some(Self::ProcessExit),
            "ChannelSendError" => Some(Self::ChannelSend),
            "DependencyConfigError" => Some(Self::DependencyConfig),
            "HandlerLoadError" => Some(Self::HandlerLoad),
            "HandlerRuntimeError" => Some(Self::HandlerRuntime),
            "ProtocolViolation" => Some(Self::ProtocolViolation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{code, message, stack}` error shape used in INIT_RESULT and INVOKE_RESULT,
/// and for errors the supervisor synthesizes itself.
///
/// `code` is free-form on the wire so handlers can report their own codes;
/// [`ErrorPayload::error_code`] maps it back to a known [`ErrorCode`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.as_str().to_string()),
            message: message.into(),
            stack: None,
        }
    }

    /// Error with a caller-chosen code, e.g. one produced by handler code
    pub fn custom(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.code.as_deref().and_then(ErrorCode::parse)
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.error_code() == Some(code)
    }

    /// Worker exited while an invocation was outstanding
    pub fn process_exit(code: Option<i32>, signal: Option<i32>) -> Self {
        let fmt = |v: Option<i32>| v.map_or_else(|| "null".to_string(), |v| v.to_string());
        Self::new(
            ErrorCode::ProcessExit,
            format!(
                "Lambda process exited. code = {}, signal = {}",
                fmt(code),
                fmt(signal)
            ),
        )
    }

    pub fn channel_send(reason: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::ChannelSend,
            format!("Failed to send message to lambda process: {}", reason),
        )
    }

    /// Convert any error into the wire shape, keeping its source chain as the stack
    pub fn from_error(code: ErrorCode, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = format!("{}: {}", code, err);
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push_str(&format!("\n    caused by: {}", cause));
            source = cause.source();
        }
        Self::new(code, err.to_string()).with_stack(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() {
        for code in [
            ErrorCode::Spawn,
            ErrorCode::ProcessExit,
            ErrorCode::ChannelSend,
            ErrorCode::DependencyConfig,
            ErrorCode::HandlerLoad,
            ErrorCode::HandlerRuntime,
            ErrorCode::ProtocolViolation,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("MODULE_NOT_FOUND"), None);
    }

    #[test]
    fn test_error_payload_json_shape() {
        let err = ErrorPayload::new(ErrorCode::HandlerLoad, "Cannot find module '/tmp/index'");

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "HandlerLoadError");
        assert_eq!(json["message"], "Cannot find module '/tmp/index'");
        assert!(json.get("stack").is_none());
    }

    #[test]
    fn test_error_payload_accepts_missing_code() {
        let err: ErrorPayload = serde_json::from_str(r#"{"message":"boom"}"#).unwrap();
        assert_eq!(err.code, None);
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.error_code(), None);
    }

    #[test]
    fn test_process_exit_message() {
        let err = ErrorPayload::process_exit(None, Some(9));
        assert!(err.is(ErrorCode::ProcessExit));
        assert_eq!(err.message, "Lambda process exited. code = null, signal = 9");
    }

    #[test]
    fn test_from_error_keeps_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = ErrorPayload::from_error(ErrorCode::ChannelSend, &io);

        assert_eq!(err.message, "pipe closed");
        assert!(err.stack.unwrap().starts_with("ChannelSendError: pipe closed"));
    }
}
