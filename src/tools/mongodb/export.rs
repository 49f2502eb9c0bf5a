// src/tools/mongodb/export.rs
// The export tool: stream query results to a file as extended JSON

use async_trait::async_trait;
use mongodb::bson::doc;
use serde::Deserialize;

use super::to_document;
use crate::cursor::{Caps, collect_capped};
use crate::error::Result;
use crate::output::docs_to_extended_json;
use crate::provider::QueryOptions;
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, TypedTool,
};

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportArgs {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Query filter; exports everything when omitted.
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    /// Maximum number of documents to export.
    #[serde(default)]
    pub limit: Option<i64>,
    /// File name under the exports directory; generated when omitted.
    #[serde(default)]
    pub name: Option<String>,
}

pub struct ExportTool;

static META: ToolMeta = ToolMeta {
    name: "export",
    description: "Export query results to a file as extended JSON and return its path.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for ExportTool {
    type Args = ExportArgs;

    fn meta(&self) -> &'static ToolMeta {
        &META
    }

    async fn run(&self, args: ExportArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let config = ctx.config().clone();
        let provider = ctx.session.ensure_connected().await?;

        let filter = match args.filter {
            Some(value) => to_document(value, "filter")?,
            None => doc! {},
        };
        let options = QueryOptions {
            limit: args.limit,
            ..QueryOptions::default()
        };
        let stream = provider
            .find(&args.database, &args.collection, filter, options)
            .await?;

        // Exports are bounded only by the caller's limit, not the per-query
        // response caps.
        let caps = Caps {
            max_documents: args.limit.unwrap_or(0),
            server_max_bytes: 0,
            caller_max_bytes: None,
        };
        let capped = collect_capped(stream, caps, &ctx.cancellation).await?;

        let file_name = args.name.unwrap_or_else(|| {
            format!(
                "{}.{}.{}.json",
                args.database,
                args.collection,
                uuid::Uuid::new_v4().simple()
            )
        });
        let path = config.exports_path.join(file_name);
        tokio::fs::create_dir_all(&config.exports_path).await?;
        tokio::fs::write(&path, docs_to_extended_json(&capped.documents)?).await?;

        Ok(ToolOutput::text(format!(
            "Exported {} document(s) from {}.{} to {}.",
            capped.documents.len(),
            args.database,
            args.collection,
            path.display()
        )))
    }
}
