// src/mcp/mod.rs
// MCP server handler: ties the transport to the dispatcher

pub mod elicitation;
pub mod http;

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{Peer, RequestContext, RoleServer};
use rmcp::{ErrorData, ServerHandler};
use tokio::sync::RwLock;

use crate::atlas::{AtlasApi, AtlasClient};
use crate::config::Config;
use crate::session::Session;
use crate::telemetry::Telemetry;
use crate::tools::ToolRegistry;
use crate::tools::dispatch::Dispatcher;
use elicitation::ElicitationClient;

/// MCP server state: one session per transport connection.
#[derive(Clone)]
pub struct BrokerServer {
    session: Arc<Session>,
    dispatcher: Arc<Dispatcher>,
    peer: Arc<RwLock<Option<Peer<RoleServer>>>>,
}

impl BrokerServer {
    pub fn new(config: Arc<Config>) -> Self {
        let telemetry = Arc::new(Telemetry::new(config.telemetry_enabled));
        let peer = Arc::new(RwLock::new(None));
        let elicitation = ElicitationClient::new(peer.clone());

        let atlas: Option<Arc<dyn AtlasApi>> =
            match (&config.api_client_id, &config.api_client_secret) {
                (Some(id), Some(secret)) => {
                    Some(Arc::new(AtlasClient::new(id.clone(), secret.clone())))
                }
                _ => None,
            };

        let session = Arc::new(Session::new(config, atlas, elicitation, telemetry));
        let registry = Arc::new(ToolRegistry::with_default_tools());
        let dispatcher = Arc::new(Dispatcher::new(registry));

        Self {
            session,
            dispatcher,
            peer,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Tools visible to the client: feature-gated and disabled tools are
    /// omitted from the listing (calls against them still fail cleanly).
    fn visible_tools(&self) -> Vec<Tool> {
        let config = &self.session.config;
        self.dispatcher
            .registry()
            .iter()
            .filter(|tool| {
                let meta = tool.meta();
                let features_enabled = meta
                    .required_features
                    .iter()
                    .all(|f| config.feature_enabled(*f));
                features_enabled
                    && !config.is_tool_disabled(
                        meta.name,
                        meta.category.as_str(),
                        meta.operation_type.as_str(),
                    )
            })
            .map(|tool| {
                let meta = tool.meta();
                Tool {
                    name: meta.name.into(),
                    title: None,
                    description: Some(meta.description.into()),
                    input_schema: Arc::new(tool.input_schema()),
                    output_schema: None,
                    annotations: None,
                    icons: None,
                    meta: None,
                }
            })
            .collect()
    }
}

impl ServerHandler for BrokerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "mongodb-mcp-server".into(),
                title: Some("MongoDB MCP Server".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Query and manage MongoDB deployments, Atlas projects, and vector search from \
                 a model client. Call 'connect' first when no connection string is configured."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.visible_tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        // Capture the peer on first call so confirmation prompts can reach
        // the client.
        if self.peer.read().await.is_none() {
            *self.peer.write().await = Some(context.peer.clone());
        }

        // The signal fires when the transport drops the client or the call
        // is cancelled upstream.
        let cancellation = context.ct.child_token();
        let outcome = self
            .dispatcher
            .dispatch(
                &self.session,
                &request.name,
                request.arguments,
                cancellation,
            )
            .await;

        Ok(CallToolResult {
            content: outcome.content.into_iter().map(Content::text).collect(),
            structured_content: None,
            is_error: Some(outcome.is_error),
            meta: None,
        })
    }
}
