// src/mcp/elicitation.rs
// Confirmation prompts via MCP elicitation.
//
// Wraps rmcp's elicitation API behind a small client. When the connected
// model client does not support elicitation, confirmation-required tools are
// treated as not confirmed rather than executed silently.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{CreateElicitationRequestParams, ElicitationAction, ElicitationSchema};
use rmcp::service::{Peer, RoleServer};
use tokio::sync::RwLock;

/// Timeout for confirmation requests (a human is answering, so be generous)
const ELICITATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    Declined,
    /// The client does not support elicitation or the request failed.
    Unavailable,
}

impl ConfirmOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// Wrapper around the MCP peer for confirmation requests.
#[derive(Clone)]
pub struct ElicitationClient {
    peer: Arc<RwLock<Option<Peer<RoleServer>>>>,
}

impl ElicitationClient {
    pub fn new(peer: Arc<RwLock<Option<Peer<RoleServer>>>>) -> Self {
        Self { peer }
    }

    /// A client with no peer; every confirmation resolves to `Unavailable`.
    pub fn disconnected() -> Self {
        Self::new(Arc::new(RwLock::new(None)))
    }

    pub async fn is_available(&self) -> bool {
        let guard = self.peer.read().await;
        guard
            .as_ref()
            .map(|p| p.supports_elicitation())
            .unwrap_or(false)
    }

    /// Ask the user to confirm an action. Accept with `confirm: true` is the
    /// only confirming answer; decline, cancel, and transport failures all
    /// resolve to a non-confirmation.
    pub async fn confirm(&self, message: &str) -> ConfirmOutcome {
        let guard = self.peer.read().await;
        let peer = match guard.as_ref() {
            Some(p) if p.supports_elicitation() => p,
            _ => return ConfirmOutcome::Unavailable,
        };

        let params = CreateElicitationRequestParams {
            meta: None,
            message: message.to_string(),
            requested_schema: confirmation_schema(message),
        };

        match peer
            .create_elicitation_with_timeout(params, Some(ELICITATION_TIMEOUT))
            .await
        {
            Ok(result) => match result.action {
                ElicitationAction::Accept => {
                    let confirmed = result
                        .content
                        .as_ref()
                        .and_then(|v| v.get("confirm"))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    if confirmed {
                        ConfirmOutcome::Confirmed
                    } else {
                        ConfirmOutcome::Declined
                    }
                }
                ElicitationAction::Decline | ElicitationAction::Cancel => ConfirmOutcome::Declined,
            },
            Err(e) => {
                tracing::warn!("elicitation request failed: {}", e);
                ConfirmOutcome::Unavailable
            }
        }
    }
}

fn confirmation_schema(message: &str) -> ElicitationSchema {
    ElicitationSchema::builder()
        .title("Confirmation required")
        .description(message.to_string())
        .optional_bool("confirm", false)
        .build_unchecked()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_peer_is_unavailable() {
        let client = ElicitationClient::disconnected();
        assert!(!client.is_available().await);
        assert_eq!(
            client.confirm("Drop the database?").await,
            ConfirmOutcome::Unavailable
        );
    }

    #[test]
    fn schema_carries_confirm_property() {
        let schema = confirmation_schema("Run drop-collection?");
        assert!(schema.properties.contains_key("confirm"));
    }

    #[test]
    fn outcome_confirmed_predicate() {
        assert!(ConfirmOutcome::Confirmed.is_confirmed());
        assert!(!ConfirmOutcome::Declined.is_confirmed());
        assert!(!ConfirmOutcome::Unavailable.is_confirmed());
    }
}
