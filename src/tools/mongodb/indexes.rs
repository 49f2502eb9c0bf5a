// src/tools/mongodb/indexes.rs
// collection-indexes, create-index, and drop-index tools

use async_trait::async_trait;
use serde::Deserialize;

use super::to_document;
use crate::error::Result;
use crate::output::{docs_to_extended_json, wrap_untrusted};
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, TypedTool,
};

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionIndexesArgs {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
}

pub struct CollectionIndexesTool;

static LIST_META: ToolMeta = ToolMeta {
    name: "collection-indexes",
    description: "List the indexes defined on a MongoDB collection.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Metadata,
    required_features: &[],
};

#[async_trait]
impl TypedTool for CollectionIndexesTool {
    type Args = CollectionIndexesArgs;

    fn meta(&self) -> &'static ToolMeta {
        &LIST_META
    }

    async fn run(
        &self,
        args: CollectionIndexesArgs,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        let indexes = provider
            .list_indexes(&args.database, &args.collection)
            .await?;
        let mut blocks = vec![format!(
            "Found {} index(es) on {}.{}.",
            indexes.len(),
            args.database,
            args.collection
        )];
        if !indexes.is_empty() {
            blocks.push(wrap_untrusted(&docs_to_extended_json(&indexes)?));
        }
        Ok(ToolOutput::from_blocks(blocks))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateIndexArgs {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Index key specification (e.g. `{"title": 1}`).
    pub keys: serde_json::Value,
    /// Optional index name.
    #[serde(default)]
    pub name: Option<String>,
}

pub struct CreateIndexTool;

static CREATE_META: ToolMeta = ToolMeta {
    name: "create-index",
    description: "Create an index on a MongoDB collection.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Create,
    required_features: &[],
};

#[async_trait]
impl TypedTool for CreateIndexTool {
    type Args = CreateIndexArgs;

    fn meta(&self) -> &'static ToolMeta {
        &CREATE_META
    }

    async fn run(&self, args: CreateIndexArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        let keys = to_document(args.keys, "keys")?;
        let name = provider
            .create_index(&args.database, &args.collection, keys, args.name)
            .await?;
        Ok(ToolOutput::text(format!(
            "Created index '{}' on {}.{}.",
            name, args.database, args.collection
        )))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DropIndexArgs {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Name of the index to drop.
    pub name: String,
}

pub struct DropIndexTool;

static DROP_META: ToolMeta = ToolMeta {
    name: "drop-index",
    description: "Drop an index from a MongoDB collection.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Delete,
    required_features: &[],
};

#[async_trait]
impl TypedTool for DropIndexTool {
    type Args = DropIndexArgs;

    fn meta(&self) -> &'static ToolMeta {
        &DROP_META
    }

    async fn run(&self, args: DropIndexArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let provider = ctx.session.ensure_connected().await?;
        provider
            .drop_index(&args.database, &args.collection, &args.name)
            .await?;
        Ok(ToolOutput::text(format!(
            "Dropped index '{}' from {}.{}.",
            args.name, args.database, args.collection
        )))
    }
}
