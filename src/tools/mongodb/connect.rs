// src/tools/mongodb/connect.rs
// Explicit connect / disconnect tools

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, TypedTool,
};

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectArgs {
    /// Connection string to connect with; falls back to the configured one.
    #[serde(default)]
    pub connection_string: Option<String>,
}

pub struct ConnectTool;

static CONNECT_META: ToolMeta = ToolMeta {
    name: "connect",
    description: "Connect to a MongoDB deployment. Uses the configured connection string when \
                  none is provided.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Connect,
    required_features: &[],
};

#[async_trait]
impl TypedTool for ConnectTool {
    type Args = ConnectArgs;

    fn meta(&self) -> &'static ToolMeta {
        &CONNECT_META
    }

    async fn run(&self, args: ConnectArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let session = &ctx.session;
        let uri = match args
            .connection_string
            .or_else(|| session.config.connection_string.clone())
        {
            Some(uri) => uri,
            None => return Err(crate::error::ServerError::NotConnected),
        };
        session.connect_with(&uri).await?;
        let auth_type = session.auth_type().await.unwrap_or_default();
        Ok(ToolOutput::text("Successfully connected to MongoDB.")
            .with_metadata(serde_json::json!({ "authType": auth_type })))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DisconnectArgs {}

pub struct DisconnectTool;

static DISCONNECT_META: ToolMeta = ToolMeta {
    name: "disconnect",
    description: "Close the current MongoDB connection.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Connect,
    required_features: &[],
};

#[async_trait]
impl TypedTool for DisconnectTool {
    type Args = DisconnectArgs;

    fn meta(&self) -> &'static ToolMeta {
        &DISCONNECT_META
    }

    async fn run(&self, _args: DisconnectArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        ctx.session.disconnect().await;
        Ok(ToolOutput::text("Disconnected from MongoDB."))
    }
}
