// src/tools/mongodb/mod.rs
// MongoDB tool family: connection, CRUD, aggregation, indexes, export

mod admin;
mod aggregate;
mod connect;
mod export;
mod find;
mod indexes;
mod insert;
mod update;

pub use aggregate::AggregateTool;
pub use connect::{ConnectTool, DisconnectTool};
pub use find::FindTool;
pub use insert::InsertManyTool;

use std::sync::Arc;

use mongodb::bson::{Bson, Document};

use crate::error::{Result, ServerError};
use crate::provider::Provider;
use crate::tools::ToolRegistry;

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(connect::ConnectTool));
    registry.register(Arc::new(connect::DisconnectTool));
    registry.register(Arc::new(find::FindTool));
    registry.register(Arc::new(aggregate::AggregateTool));
    registry.register(Arc::new(insert::InsertManyTool));
    registry.register(Arc::new(update::UpdateManyTool));
    registry.register(Arc::new(update::DeleteManyTool));
    registry.register(Arc::new(admin::DropCollectionTool));
    registry.register(Arc::new(admin::DropDatabaseTool));
    registry.register(Arc::new(indexes::CollectionIndexesTool));
    registry.register(Arc::new(indexes::CreateIndexTool));
    registry.register(Arc::new(indexes::DropIndexTool));
    registry.register(Arc::new(export::ExportTool));
}

/// Convert a raw JSON argument (extended JSON accepted) into a BSON document.
pub(crate) fn to_document(value: serde_json::Value, what: &str) -> Result<Document> {
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(_) => Err(ServerError::InvalidArguments(format!(
            "{what} must be an object"
        ))),
        Err(e) => Err(ServerError::InvalidArguments(format!("invalid {what}: {e}"))),
    }
}

/// Convert a list of raw JSON values into BSON documents.
pub(crate) fn to_documents(values: Vec<serde_json::Value>, what: &str) -> Result<Vec<Document>> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| to_document(value, &format!("{what}[{i}]")))
        .collect()
}

/// Whether an explain plan contains a collection scan anywhere.
pub(crate) fn plan_has_collection_scan(plan: &Document) -> bool {
    for (key, value) in plan {
        match value {
            Bson::String(s) if key == "stage" && s == "COLLSCAN" => return true,
            Bson::Document(nested) => {
                if plan_has_collection_scan(nested) {
                    return true;
                }
            }
            Bson::Array(items) => {
                for item in items {
                    if let Bson::Document(nested) = item
                        && plan_has_collection_scan(nested)
                    {
                        return true;
                    }
                }
            }
            _ => {}
        }
    }
    false
}

/// Run `explain("queryPlanner")` for the given command and fail when the
/// winning plan performs a collection scan. Used when `indexCheck` is on.
pub(crate) async fn ensure_index_usage(
    provider: &dyn Provider,
    db: &str,
    command: Document,
    tool_name: &str,
) -> Result<()> {
    let explain = mongodb::bson::doc! {
        "explain": command,
        "verbosity": "queryPlanner",
    };
    let plan = provider.run_command(db, explain).await?;
    if plan_has_collection_scan(&plan) {
        return Err(ServerError::ForbiddenReadOperation(format!(
            "the {tool_name} query would perform a collection scan, which indexCheck forbids; \
             add an index or adjust the query"
        )));
    }
    Ok(())
}

/// Render an inserted ID the way the driver reports it.
pub(crate) fn format_inserted_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn to_document_accepts_extended_json() {
        let value = serde_json::json!({ "_id": { "$oid": "507f1f77bcf86cd799439011" } });
        let doc = to_document(value, "filter").expect("parses");
        assert!(matches!(doc.get("_id"), Some(Bson::ObjectId(_))));
    }

    #[test]
    fn to_document_rejects_non_objects() {
        let err = to_document(serde_json::json!([1, 2]), "filter").expect_err("not an object");
        assert!(err.to_string().contains("filter"));
    }

    #[test]
    fn collection_scan_is_found_in_nested_plans() {
        let plan = doc! {
            "queryPlanner": {
                "winningPlan": {
                    "stage": "LIMIT",
                    "inputStage": { "stage": "COLLSCAN", "direction": "forward" },
                }
            }
        };
        assert!(plan_has_collection_scan(&plan));

        let indexed = doc! {
            "queryPlanner": {
                "winningPlan": {
                    "stage": "FETCH",
                    "inputStage": { "stage": "IXSCAN", "indexName": "_id_" },
                }
            }
        };
        assert!(!plan_has_collection_scan(&indexed));
    }

    #[test]
    fn inserted_ids_render_as_hex() {
        let oid = mongodb::bson::oid::ObjectId::new();
        assert_eq!(format_inserted_id(&Bson::ObjectId(oid)), oid.to_hex());
        assert_eq!(format_inserted_id(&Bson::Int32(7)), "7");
    }
}
