// src/telemetry.rs
// Tool-call telemetry events

use serde::Serialize;

use crate::error::ErrorCode;

/// Outcome recorded for a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolEventResult {
    Success,
    Failure,
}

/// One event per dispatched tool call, emitted after the result is formed and
/// before it is handed back to the transport.
#[derive(Debug, Clone, Serialize)]
pub struct ToolEvent {
    pub name: String,
    pub category: &'static str,
    pub operation_type: &'static str,
    pub result: ToolEventResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    pub duration_ms: u64,
    /// Auth mechanism of the active connection, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_auth_type: Option<String>,
    /// Tool-provided metadata (e.g. embedding model used).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolEvent {
    pub fn failure_code(mut self, code: ErrorCode) -> Self {
        self.result = ToolEventResult::Failure;
        self.error_code = Some(code.as_str());
        self
    }
}

/// Telemetry sink. Event upload is an external collaborator; events are
/// handed to the tracing pipeline where the configured exporter picks them up.
#[derive(Debug)]
pub struct Telemetry {
    enabled: bool,
}

impl Telemetry {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn emit(&self, event: ToolEvent) {
        if !self.enabled {
            return;
        }
        match serde_json::to_string(&event) {
            Ok(payload) => {
                tracing::debug!(target: "telemetry", tool = %event.name, %payload, "tool event")
            }
            Err(e) => tracing::warn!("failed to serialize telemetry event: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_telemetry_is_a_no_op() {
        let telemetry = Telemetry::new(false);
        assert!(!telemetry.is_enabled());
        // Must not panic or emit.
        telemetry.emit(ToolEvent {
            name: "find".into(),
            category: "mongodb",
            operation_type: "read",
            result: ToolEventResult::Success,
            error_code: None,
            duration_ms: 12,
            connection_auth_type: None,
            metadata: None,
        });
    }

    #[test]
    fn failure_code_marks_event_failed() {
        let event = ToolEvent {
            name: "aggregate".into(),
            category: "mongodb",
            operation_type: "read",
            result: ToolEventResult::Success,
            error_code: None,
            duration_ms: 3,
            connection_auth_type: Some("scram".into()),
            metadata: None,
        }
        .failure_code(ErrorCode::ForbiddenWriteOperation);

        assert_eq!(event.result, ToolEventResult::Failure);
        assert_eq!(event.error_code, Some("ForbiddenWriteOperation"));
    }

    #[test]
    fn event_serializes_without_empty_fields() {
        let event = ToolEvent {
            name: "find".into(),
            category: "mongodb",
            operation_type: "read",
            result: ToolEventResult::Success,
            error_code: None,
            duration_ms: 1,
            connection_auth_type: None,
            metadata: None,
        };
        let json = serde_json::to_value(&event).expect("serializes");
        assert!(json.get("error_code").is_none());
        assert!(json.get("connection_auth_type").is_none());
        assert_eq!(json["result"], "success");
    }
}
