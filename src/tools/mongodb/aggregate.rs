// src/tools/mongodb/aggregate.rs
// The aggregate tool: stage gating, vector-search rewriting, capped
// streaming, and parallel counting

use async_trait::async_trait;
use mongodb::bson::{Bson, Document, doc};
use serde::Deserialize;

use super::{ensure_index_usage, to_documents};
use crate::cursor::{CapReason, Caps, collect_capped};
use crate::error::{Result, ServerError};
use crate::output::{docs_to_extended_json, wrap_untrusted};
use crate::provider::Provider;
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, TypedTool,
};

/// Bound on the parallel `$count` probe. When the count cannot finish in
/// time, the total is reported as indeterminable rather than delaying the
/// results.
const COUNT_MAX_TIME_MS: u64 = 60_000;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AggregateArgs {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Aggregation pipeline stages as (extended) JSON.
    pub pipeline: Vec<serde_json::Value>,
    /// Response size cap in bytes for this call.
    #[serde(default)]
    pub response_bytes_limit: Option<u64>,
}

pub struct AggregateTool;

static META: ToolMeta = ToolMeta {
    name: "aggregate",
    description: "Run an aggregation pipeline against a MongoDB collection. Supports \
                  $vectorSearch stages with server-side embedding generation.",
    category: ToolCategory::MongoDb,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for AggregateTool {
    type Args = AggregateArgs;

    fn meta(&self) -> &'static ToolMeta {
        &META
    }

    async fn run(&self, args: AggregateArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let config = ctx.config().clone();
        let session = &ctx.session;
        let provider = session.ensure_connected().await?;
        let db = &args.database;
        let coll = &args.collection;

        let mut pipeline = to_documents(args.pipeline, "pipeline")?;

        // Stage permissions: $out/$merge are writes in disguise.
        let has_write_stage = pipeline
            .iter()
            .any(|s| s.contains_key("$out") || s.contains_key("$merge"));
        if has_write_stage {
            let writes_disabled = ["create", "update", "delete"]
                .iter()
                .any(|op| config.disabled_tools.contains(*op));
            if config.read_only || writes_disabled {
                return Err(ServerError::ForbiddenWriteOperation(
                    "the pipeline contains $out or $merge, which perform writes and are not \
                     permitted by the current configuration"
                        .to_string(),
                ));
            }
        }

        let has_vector_search = pipeline.iter().any(|s| s.contains_key("$vectorSearch"));
        if has_vector_search {
            if !provider.supports_search(db, coll).await? {
                return Err(ServerError::AtlasSearchNotSupported);
            }
            session
                .embeddings
                .validate_vector_search_filters(provider.as_ref(), db, coll, &pipeline)
                .await?;
        }

        if config.index_check {
            if has_vector_search {
                ensure_vector_index_exists(session, provider.as_ref(), db, coll, &pipeline).await?;
            } else {
                let command = doc! {
                    "aggregate": coll,
                    "pipeline": pipeline.iter().map(|d| Bson::Document(d.clone())).collect::<Vec<_>>(),
                    "cursor": {},
                };
                ensure_index_usage(provider.as_ref(), db, command, "aggregate").await?;
            }
        }

        // Embedding rewrite, then dimension validation of inline documents.
        session
            .embeddings
            .rewrite_pipeline(provider.as_ref(), db, coll, &mut pipeline, &ctx.cancellation)
            .await?;
        for stage in &pipeline {
            if let Ok(inline) = stage.get_array("$documents") {
                let docs: Vec<Document> = inline
                    .iter()
                    .filter_map(|b| match b {
                        Bson::Document(d) => Some(d.clone()),
                        _ => None,
                    })
                    .collect();
                session
                    .embeddings
                    .validate_document_dimensions(provider.as_ref(), db, coll, &docs)
                    .await?;
            }
        }

        // The capped pipeline gets an appended $limit; the count probe runs
        // over the original stages.
        let mut capped_pipeline = pipeline.clone();
        if config.max_documents_per_query > 0 {
            capped_pipeline.push(doc! { "$limit": config.max_documents_per_query });
        }
        let mut count_pipeline = pipeline;
        count_pipeline.push(doc! { "$count": "total" });

        let caps = Caps {
            max_documents: config.max_documents_per_query,
            server_max_bytes: config.max_bytes_per_query,
            caller_max_bytes: args.response_bytes_limit,
        };

        let exec = async {
            let stream = provider.aggregate(db, coll, capped_pipeline, None).await?;
            collect_capped(stream, caps, &ctx.cancellation).await
        };
        let count = count_documents(provider.as_ref(), db, coll, count_pipeline);
        let (capped, total) = tokio::join!(exec, count);
        let capped = capped?;

        let total_text = total
            .map(|n| n.to_string())
            .unwrap_or_else(|| "indeterminable".to_string());
        let mut blocks = vec![format!(
            "The aggregation resulted in {total_text} document(s). Returning {} document(s).",
            capped.documents.len()
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

/// Confirm the `$vectorSearch` stage's named index exists and is queryable.
async fn ensure_vector_index_exists(
    session: &crate::session::Session,
    provider: &dyn Provider,
    db: &str,
    coll: &str,
    pipeline: &[Document],
) -> Result<()> {
    for stage in pipeline {
        let Ok(vs) = stage.get_document("$vectorSearch") else {
            continue;
        };
        let name = vs.get_str("index").unwrap_or("default");
        if !session
            .embeddings
            .index_exists(provider, db, coll, name)
            .await?
        {
            return Err(ServerError::AtlasVectorSearchIndexNotFound {
                name: name.to_string(),
                namespace: format!("{db}.{coll}"),
            });
        }
    }
    Ok(())
}

/// Estimate the total result size with a bounded `$count` probe. Failures and
/// timeouts yield `None` ("indeterminable").
async fn count_documents(
    provider: &dyn Provider,
    db: &str,
    coll: &str,
    pipeline: Vec<Document>,
) -> Option<i64> {
    use futures::StreamExt;

    let mut stream = provider
        .aggregate(db, coll, pipeline, Some(COUNT_MAX_TIME_MS))
        .await
        .ok()?;
    match stream.next().await {
        Some(Ok(doc)) => match doc.get("total") {
            Some(Bson::Int32(n)) => Some(*n as i64),
            Some(Bson::Int64(n)) => Some(*n),
            Some(Bson::Double(n)) => Some(*n as i64),
            _ => None,
        },
        // An empty result means the pipeline matched nothing.
        None => Some(0),
        Some(Err(_)) => None,
    }
}
