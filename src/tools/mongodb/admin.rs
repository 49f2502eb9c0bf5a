// src/tools/mongodb/admin.rs
// drop-collection and drop-database tools

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, TypedTool,
};

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DropCollectionArgs {
    /// Database name.
    pub database: String,
    /// Collection to drop.
    pub collection: String,
}

pub struct DropCollectionTool;

static DROP_COLLECTION_META: ToolMeta = ToolMeta {
    name: "drop-collection",
    description: "Drop a collection, removing all of its documents and indexes.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Delete,
    required_features: &[],
};

#[async_trait]
impl TypedTool for DropCollectionTool {
    type Args = DropCollectionArgs;

    fn meta(&self) -> &'static ToolMeta {
        &DROP_COLLECTION_META
    }

    async fn run(&self, args: DropCollectionArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        provider
            .drop_collection(&args.database, &args.collection)
            .await?;
        Ok(ToolOutput::text(format!(
            "Dropped collection {}.{}.",
            args.database, args.collection
        )))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DropDatabaseArgs {
    /// Database to drop.
    pub database: String,
}

pub struct DropDatabaseTool;

static DROP_DATABASE_META: ToolMeta = ToolMeta {
    name: "drop-database",
    description: "Drop an entire database, removing all of its collections.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Delete,
    required_features: &[],
};

#[async_trait]
impl TypedTool for DropDatabaseTool {
    type Args = DropDatabaseArgs;

    fn meta(&self) -> &'static ToolMeta {
        &DROP_DATABASE_META
    }

    async fn run(&self, args: DropDatabaseArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        provider.drop_database(&args.database).await?;
        Ok(ToolOutput::text(format!(
            "Dropped database {}.",
            args.database
        )))
    }
}
