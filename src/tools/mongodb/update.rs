// src/tools/mongodb/update.rs
// update-many and delete-many tools

use async_trait::async_trait;
use mongodb::bson::doc;
use serde::Deserialize;

use super::to_document;
use crate::error::Result;
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, TypedTool,
};

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateManyArgs {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Filter selecting the documents to update; matches all when omitted.
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    /// Update document (e.g. `{"$set": {...}}`).
    pub update: serde_json::Value,
    /// Insert a new document when nothing matches.
    #[serde(default)]
    pub upsert: bool,
}

pub struct UpdateManyTool;

static UPDATE_META: ToolMeta = ToolMeta {
    name: "update-many",
    description: "Update every document matching a filter in a MongoDB collection.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Update,
    required_features: &[],
};

#[async_trait]
impl TypedTool for UpdateManyTool {
    type Args = UpdateManyArgs;

    fn meta(&self) -> &'static ToolMeta {
        &UPDATE_META
    }

    async fn run(&self, args: UpdateManyArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        let filter = match args.filter {
            Some(value) => to_document(value, "filter")?,
            None => doc! {},
        };
        let update = to_document(args.update, "update")?;

        let summary = provider
            .update_many(&args.database, &args.collection, filter, update, args.upsert)
            .await?;

        let mut text = format!(
            "Matched {} document(s) and modified {} document(s) in {}.{}.",
            summary.matched, summary.modified, args.database, args.collection
        );
        if let Some(id) = &summary.upserted_id {
            text.push_str(&format!(" Upserted a document with ID {}.", id));
        }
        Ok(ToolOutput::text(text))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteManyArgs {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Filter selecting the documents to delete; matches all when omitted.
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
}

pub struct DeleteManyTool;

static DELETE_META: ToolMeta = ToolMeta {
    name: "delete-many",
    description: "Delete every document matching a filter from a MongoDB collection.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Delete,
    required_features: &[],
};

#[async_trait]
impl TypedTool for DeleteManyTool {
    type Args = DeleteManyArgs;

    fn meta(&self) -> &'static ToolMeta {
        &DELETE_META
    }

    async fn run(&self, args: DeleteManyArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        let filter = match args.filter {
            Some(value) => to_document(value, "filter")?,
            None => doc! {},
        };
        let deleted = provider
            .delete_many(&args.database, &args.collection, filter)
            .await?;
        Ok(ToolOutput::text(format!(
            "Deleted {} document(s) from {}.{}.",
            deleted, args.database, args.collection
        )))
    }
}
