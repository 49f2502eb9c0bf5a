// src/tools/dispatch.rs
// Tool invocation wrapper: gating, validation, execution, error shaping,
// telemetry

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ErrorCode, ServerError};
use crate::output::error_running;
use crate::session::Session;
use crate::telemetry::{ToolEvent, ToolEventResult};
use crate::tools::{JsonObject, ToolExecutionContext, ToolRegistry};

/// Transport-neutral result of a dispatched call. The MCP layer renders this
/// into a `CallToolResult`.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub content: Vec<String>,
    pub is_error: bool,
}

impl DispatchOutcome {
    fn error(text: String) -> Self {
        Self {
            content: vec![text],
            is_error: true,
        }
    }

    fn ok(content: Vec<String>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }
}

/// Wraps every tool invocation. Errors never propagate past this type; they
/// are rendered into error results and recorded in telemetry.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        session: &Arc<Session>,
        name: &str,
        args: Option<JsonObject>,
        cancellation: CancellationToken,
    ) -> DispatchOutcome {
        let start = Instant::now();
        let config = session.config.clone();

        let Some(tool) = self.registry.get(name) else {
            let err = ServerError::ToolNotFound(name.to_string());
            // No registered metadata to report against.
            self.emit(session, name, "unknown", "unknown", start, Err(err.code()), None)
                .await;
            return DispatchOutcome::error(error_running(name, &err));
        };
        let meta = tool.meta();
        let category = meta.category.as_str();
        let operation_type = meta.operation_type.as_str();

        // Feature gate.
        for feature in meta.required_features {
            if !config.feature_enabled(*feature) {
                let err = ServerError::FeatureDisabled {
                    name: name.to_string(),
                    feature: feature.as_str().to_string(),
                };
                self.emit(session, name, category, operation_type, start, Err(err.code()), None)
                    .await;
                return DispatchOutcome::error(error_running(name, &err));
            }
        }

        // Disabled set: name, category, or operation type.
        if config.is_tool_disabled(meta.name, category, operation_type) {
            let err = ServerError::ToolDisabled(name.to_string());
            self.emit(session, name, category, operation_type, start, Err(err.code()), None)
                .await;
            return DispatchOutcome::error(error_running(name, &err));
        }

        // Read-only gate.
        if config.read_only && meta.operation_type.is_write() {
            let err = ServerError::ForbiddenWriteOperation(format!(
                "tool '{name}' performs {operation_type} operations, but the server is running \
                 in read-only mode"
            ));
            self.emit(session, name, category, operation_type, start, Err(err.code()), None)
                .await;
            return DispatchOutcome::error(error_running(name, &err));
        }

        // Confirmation.
        if config.confirmation_required_tools.contains(name) {
            let prompt = format!(
                "The model wants to run the '{name}' tool. {description} Allow it?",
                description = meta.description
            );
            let outcome = session.elicitation.confirm(&prompt).await;
            if !outcome.is_confirmed() {
                debug!(tool = name, ?outcome, "confirmation not granted");
                self.emit(
                    session,
                    name,
                    category,
                    operation_type,
                    start,
                    Err(ErrorCode::ConfirmationDeclined),
                    None,
                )
                .await;
                return DispatchOutcome::ok(vec![format!(
                    "Tool '{name}' was not confirmed by the user. No action was taken."
                )]);
            }
        }

        // Validation happens as part of execute: the typed wrapper parses the
        // argument shape before any tool logic or driver call runs.
        let ctx = ToolExecutionContext {
            session: session.clone(),
            cancellation,
        };
        let result = tool.execute(args.unwrap_or_default(), &ctx).await;

        match result {
            Ok(output) => {
                self.emit(
                    session,
                    name,
                    category,
                    operation_type,
                    start,
                    Ok(()),
                    output.metadata.clone(),
                )
                .await;
                DispatchOutcome::ok(output.blocks)
            }
            Err(err) => {
                self.emit(session, name, category, operation_type, start, Err(err.code()), None)
                    .await;
                DispatchOutcome::error(error_running(name, &err))
            }
        }
    }

    async fn emit(
        &self,
        session: &Arc<Session>,
        name: &str,
        category: &'static str,
        operation_type: &'static str,
        start: Instant,
        result: Result<(), ErrorCode>,
        metadata: Option<serde_json::Value>,
    ) {
        let event = ToolEvent {
            name: name.to_string(),
            category,
            operation_type,
            result: ToolEventResult::Success,
            error_code: None,
            duration_ms: start.elapsed().as_millis() as u64,
            connection_auth_type: session.auth_type().await,
            metadata,
        };
        let event = match result {
            Ok(()) => event,
            Err(code) => event.failure_code(code),
        };
        session.telemetry.emit(event);
    }
}
