// src/tools/mongodb/insert.rs
// The insert-many tool, including embedding generation for vector fields

use async_trait::async_trait;
use serde::Deserialize;

use super::{format_inserted_id, to_documents};
use crate::config::PreviewFeature;
use crate::error::Result;
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, TypedTool,
};
use crate::vector::EmbeddingParameters;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InsertManyArgs {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Documents to insert, as (extended) JSON.
    pub documents: Vec<serde_json::Value>,
    /// Embedding generation parameters; `input` maps field paths to the raw
    /// text to embed, positionally aligned with `documents`.
    #[serde(default)]
    pub embedding_parameters: Option<EmbeddingParameters>,
}

pub struct InsertManyTool;

static META: ToolMeta = ToolMeta {
    name: "insert-many",
    description: "Insert documents into a MongoDB collection, optionally generating embeddings \
                  for vector-indexed fields.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Create,
    required_features: &[],
};

#[async_trait]
impl TypedTool for InsertManyTool {
    type Args = InsertManyArgs;

    fn meta(&self) -> &'static ToolMeta {
        &META
    }

    async fn run(&self, args: InsertManyArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let session = &ctx.session;
        let config = ctx.config();
        let provider = session.ensure_connected().await?;
        let db = &args.database;
        let coll = &args.collection;

        let mut docs = to_documents(args.documents, "documents")?;

        if config.feature_enabled(PreviewFeature::VectorSearch)
            && let Some(params) = &args.embedding_parameters
            && !params.input.is_empty()
        {
            session
                .embeddings
                .rewrite_documents_for_insert(
                    provider.as_ref(),
                    db,
                    coll,
                    &mut docs,
                    params,
                    &ctx.cancellation,
                )
                .await?;
        }

        session
            .embeddings
            .validate_document_dimensions(provider.as_ref(), db, coll, &docs)
            .await?;

        let ids = provider.insert_many(db, coll, docs).await?;

        let rendered: Vec<String> = ids.iter().map(format_inserted_id).collect();
        let metadata = args
            .embedding_parameters
            .as_ref()
            .filter(|p| !p.input.is_empty())
            .map(|p| serde_json::json!({ "embeddingModel": p.model.model_name() }));

        let mut output = ToolOutput::from_blocks(vec![
            "Documents were inserted successfully.".to_string(),
            format!("Inserted `{}` document(s) into {db}.{coll}.", ids.len()),
            format!("Inserted IDs: {}", rendered.join(", ")),
        ]);
        if let Some(metadata) = metadata {
            output = output.with_metadata(metadata);
        }
        Ok(output)
    }
}
