//! Default invocation context

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_FUNCTION_VERSION: &str = "$LATEST";
pub const DEFAULT_MEMORY_LIMIT_MB: u32 = 128;

/// Context object handed to a handler next to its event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub aws_request_id: String,
    pub invoked_function_arn: String,
    pub function_name: String,
    pub function_version: String,
    #[serde(rename = "memoryLimitInMB")]
    pub memory_limit_in_mb: u32,
    pub log_group_name: String,
    pub log_stream_name: String,
    pub deadline_ms: i64,
}

impl InvocationContext {
    /// Build a context for `function_name`, expiring `timeout` from now.
    ///
    /// `identifier` is used as the invoked ARN when given.
    pub fn new(function_name: &str, identifier: Option<&str>, timeout: Duration) -> Self {
        let request_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);

        Self {
            invoked_function_arn: identifier.map_or_else(
                || format!("arn:aws:lambda:local:000000000000:function:{}", function_name),
                str::to_string,
            ),
            function_name: function_name.to_string(),
            function_version: DEFAULT_FUNCTION_VERSION.to_string(),
            memory_limit_in_mb: DEFAULT_MEMORY_LIMIT_MB,
            log_group_name: format!("/aws/lambda/{}", function_name),
            log_stream_name: format!(
                "{}/[{}]{}",
                now.format("%Y/%m/%d"),
                DEFAULT_FUNCTION_VERSION,
                &request_id[..8]
            ),
            deadline_ms: now.timestamp_millis().saturating_add(timeout_ms),
            aws_request_id: request_id,
        }
    }

    /// Get remaining time in milliseconds
    pub fn remaining_time_in_millis(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        (self.deadline_ms - now).max(0)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_fields() {
        let ctx = InvocationContext::new("echo", None, Duration::from_secs(3));

        assert_eq!(ctx.function_name, "echo");
        assert_eq!(ctx.function_version, "$LATEST");
        assert_eq!(ctx.log_group_name, "/aws/lambda/echo");
        assert_eq!(ctx.invoked_function_arn, "arn:aws:lambda:local:000000000000:function:echo");
        assert!(ctx.log_stream_name.ends_with(&ctx.aws_request_id[..8]));

        let remaining = ctx.remaining_time_in_millis();
        assert!(remaining > 0 && remaining <= 3000);
    }

    #[test]
    fn test_identifier_becomes_arn() {
        let arn = "arn:aws:lambda:us-east-1:123456789012:function:echo";
        let ctx = InvocationContext::new("echo", Some(arn), Duration::from_secs(1));
        assert_eq!(ctx.invoked_function_arn, arn);
    }

    #[test]
    fn test_context_wire_names() {
        let value = InvocationContext::new("echo", None, Duration::from_secs(1)).to_value();

        assert!(value.get("awsRequestId").is_some());
        assert!(value.get("memoryLimitInMB").is_some());
        assert!(value.get("deadlineMs").is_some());
    }

    #[test]
    fn test_expired_deadline_is_zero() {
        let mut ctx = InvocationContext::new("echo", None, Duration::from_secs(1));
        ctx.deadline_ms = 0;
        assert_eq!(ctx.remaining_time_in_millis(), 0);
    }
}
