// src/tools/mongodb/find.rs
// The find tool: filtered reads with capped cursor consumption

use async_trait::async_trait;
use mongodb::bson::doc;
use serde::Deserialize;

use super::{ensure_index_usage, to_document};
use crate::cursor::{CapReason, Caps, collect_capped};
use crate::error::Result;
use crate::output::{docs_to_extended_json, wrap_untrusted};
use crate::provider::QueryOptions;
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, TypedTool,
};

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FindArgs {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Query filter as (extended) JSON; matches everything when omitted.
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    /// Projection document.
    #[serde(default)]
    pub projection: Option<serde_json::Value>,
    /// Sort document.
    #[serde(default)]
    pub sort: Option<serde_json::Value>,
    /// Maximum number of documents to return.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Response size cap in bytes for this call.
    #[serde(default)]
    pub response_bytes_limit: Option<u64>,
}

pub struct FindTool;

static META: ToolMeta = ToolMeta {
    name: "find",
    description: "Run a query against a MongoDB collection with optional filter, projection, \
                  sort, and limit.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for FindTool {
    type Args = FindArgs;

    fn meta(&self) -> &'static ToolMeta {
        &META
    }

    async fn run(&self, args: FindArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let config = ctx.config().clone();
        let provider = ctx.session.ensure_connected().await?;

        let filter = match args.filter {
            Some(value) => to_document(value, "filter")?,
            None => doc! {},
        };
        let projection = args
            .projection
            .map(|v| to_document(v, "projection"))
            .transpose()?;
        let sort = args.sort.map(|v| to_document(v, "sort")).transpose()?;

        if config.index_check {
            let mut command = doc! { "find": &args.collection, "filter": &filter };
            if let Some(sort) = &sort {
                command.insert("sort", sort.clone());
            }
            ensure_index_usage(provider.as_ref(), &args.database, command, "find").await?;
        }

        let options = QueryOptions {
            projection,
            sort,
            limit: args.limit,
            max_time_ms: None,
        };
        let stream = provider
            .find(&args.database, &args.collection, filter, options)
            .await?;

        let caps = Caps {
            max_documents: config.max_documents_per_query,
            server_max_bytes: config.max_bytes_per_query,
            caller_max_bytes: args.response_bytes_limit,
        };
        let capped = collect_capped(stream, caps, &ctx.cancellation).await?;

        let mut blocks = vec![format!(
            "Found {} document(s) in {}.{}.",
            capped.documents.len(),
            args.database,
            args.collection
        )];
        match capped.reason {
            CapReason::DocumentLimit => blocks.push(format!(
                "Results were capped at {} document(s) by maxDocumentsPerQuery.",
                config.max_documents_per_query
            )),
            CapReason::ServerBytesLimit => blocks.push(format!(
                "Results were capped at {} byte(s) by maxBytesPerQuery.",
                config.max_bytes_per_query
            )),
            CapReason::CallerBytesLimit => {
                blocks.push("Results were capped by the requested responseBytesLimit.".to_string())
            }
            CapReason::Exhausted => {}
        }
        if !capped.documents.is_empty() {
            blocks.push(wrap_untrusted(&docs_to_extended_json(&capped.documents)?));
        }
        Ok(ToolOutput::from_blocks(blocks))
    }
}
