//! Uniform response envelope.
//!
//! Every resource read and tool call answers with the same JSON shape:
//! `{"success": true, "address", "data"}` or
//! `{"success": false, "address", "error", "code"}`.

use crate::error::DbError;
use rmcp::model::{CallToolResult, Content, ResourceContents};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const JSON_MIME_TYPE: &str = "application/json";

/// A handler result wrapped for crossing the protocol boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    /// Resource URI or tool name the response belongs to
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ResponseEnvelope {
    /// Wrap a payload. A payload that cannot be serialized becomes an error envelope.
    pub fn success(address: impl Into<String>, data: impl Serialize) -> Self {
        let address = address.into();
        match serde_json::to_value(data) {
            Ok(data) => Self {
                success: true,
                address,
                data: Some(data),
                error: None,
                code: None,
            },
            Err(e) => Self::error(address, e.to_string(), "INTERNAL_ERROR"),
        }
    }

    pub fn error(
        address: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            address: address.into(),
            data: None,
            error: Some(message.into()),
            code: Some(code.into()),
        }
    }

    /// Error envelope carrying the error's own machine code.
    pub fn from_error(address: impl Into<String>, error: &DbError) -> Self {
        Self::error(address, error.to_string(), error.code())
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"address":"","error":"{}","code":"INTERNAL_ERROR"}}"#,
                e
            )
        })
    }

    /// Resource contents for the requested `uri`, which may differ in spelling
    /// from the canonical address inside the envelope.
    pub fn into_resource_contents(self, uri: impl Into<String>) -> ResourceContents {
        ResourceContents::TextResourceContents {
            uri: uri.into(),
            mime_type: Some(JSON_MIME_TYPE.to_string()),
            text: self.to_json_string(),
            meta: None,
        }
    }

    pub fn into_tool_result(self) -> CallToolResult {
        let content = vec![Content::text(self.to_json_string())];
        if self.success {
            CallToolResult::success(content)
        } else {
            CallToolResult::error(content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let envelope = ResponseEnvelope::success("db://schemas", vec!["public"]);
        let value: JsonValue = serde_json::from_str(&envelope.to_json_string()).unwrap();
        assert_eq!(
            value,
            json!({"success": true, "address": "db://schemas", "data": ["public"]})
        );
    }

    #[test]
    fn test_error_shape() {
        let envelope =
            ResponseEnvelope::error("db://schemas/x/tables", "boom", "TABLES_RETRIEVAL_ERROR");
        let value: JsonValue = serde_json::from_str(&envelope.to_json_string()).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "address": "db://schemas/x/tables",
                "error": "boom",
                "code": "TABLES_RETRIEVAL_ERROR"
            })
        );
    }

    #[test]
    fn test_from_error_uses_error_code() {
        let err = DbError::read_only_violation("delete", 1, &["select"]);
        let envelope = ResponseEnvelope::from_error("execute_sql", &err);
        assert_eq!(envelope.code.as_deref(), Some("READONLY_VIOLATION"));
        assert!(!envelope.success);
    }

    #[test]
    fn test_tool_result_error_flag() {
        let ok = ResponseEnvelope::success("execute_sql", json!({"rows": [], "count": 0}));
        assert_eq!(ok.into_tool_result().is_error, Some(false));

        let err = ResponseEnvelope::error("execute_sql", "bad", "EXECUTION_ERROR");
        assert_eq!(err.into_tool_result().is_error, Some(true));
    }

    #[test]
    fn test_resource_contents_carry_uri() {
        let contents = ResponseEnvelope::success("db://schemas", json!([]))
            .into_resource_contents("db://schemas/");
        match contents {
            ResourceContents::TextResourceContents { uri, mime_type, .. } => {
                assert_eq!(uri, "db://schemas/");
                assert_eq!(mime_type.as_deref(), Some(JSON_MIME_TYPE));
            }
            other => panic!("unexpected contents: {other:?}"),
        }
    }
}
