//! Test utilities: an in-memory Provider fake and session builders

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::{Bson, Document, doc, oid::ObjectId};
use tokio::sync::Mutex;

use mdbmcp::config::Config;
use mdbmcp::error::{Result, ServerError};
use mdbmcp::mcp::elicitation::ElicitationClient;
use mdbmcp::provider::{DocStream, Provider, QueryOptions, SearchIndex, UpdateSummary};
use mdbmcp::session::Session;
use mdbmcp::telemetry::Telemetry;
use mdbmcp::tools::ToolRegistry;
use mdbmcp::tools::dispatch::Dispatcher;
use mdbmcp::vector::{VectorSearchEmbeddingsManager, VoyageClient};

fn namespace(db: &str, coll: &str) -> String {
    format!("{db}.{coll}")
}

/// In-memory Provider. Records every call so tests can assert which driver
/// operations ran.
#[derive(Default)]
pub struct FakeProvider {
    pub docs: Mutex<HashMap<String, Vec<Document>>>,
    pub search_indexes: Mutex<HashMap<String, Vec<SearchIndex>>>,
    /// Result set served for non-`$count` aggregations.
    pub aggregate_results: Mutex<Vec<Document>>,
    /// Total served for `$count` probes; `None` simulates a count failure.
    pub count_total: Mutex<Option<i64>>,
    /// Recorded pipelines, for asserting rewrites.
    pub pipelines: Mutex<Vec<Vec<Document>>>,
    pub calls: Mutex<Vec<String>>,
    pub search_supported: AtomicBool,
    /// When set, `find` yields documents forever (for cancellation tests).
    pub endless_find: AtomicBool,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        let provider = Self::default();
        provider.search_supported.store(true, Ordering::SeqCst);
        Arc::new(provider)
    }

    pub async fn seed(&self, db: &str, coll: &str, docs: Vec<Document>) {
        self.docs.lock().await.insert(namespace(db, coll), docs);
    }

    pub async fn seed_search_index(&self, db: &str, coll: &str, index: SearchIndex) {
        self.search_indexes
            .lock()
            .await
            .entry(namespace(db, coll))
            .or_default()
            .push(index);
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn stored(&self, db: &str, coll: &str) -> Vec<Document> {
        self.docs
            .lock()
            .await
            .get(&namespace(db, coll))
            .cloned()
            .unwrap_or_default()
    }

    async fn record(&self, call: &str) {
        self.calls.lock().await.push(call.to_string());
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn find(
        &self,
        db: &str,
        coll: &str,
        _filter: Document,
        _options: QueryOptions,
    ) -> Result<DocStream> {
        self.record("find").await;
        if self.endless_find.load(Ordering::SeqCst) {
            let stream = futures::stream::repeat_with(|| Ok(doc! { "padding": "x" }));
            return Ok(stream.boxed());
        }
        let docs = self.stored(db, coll).await;
        Ok(futures::stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn aggregate(
        &self,
        _db: &str,
        _coll: &str,
        pipeline: Vec<Document>,
        _max_time_ms: Option<u64>,
    ) -> Result<DocStream> {
        self.record("aggregate").await;
        let is_count = pipeline
            .last()
            .map(|stage| stage.contains_key("$count"))
            .unwrap_or(false);
        self.pipelines.lock().await.push(pipeline);

        if is_count {
            return match *self.count_total.lock().await {
                Some(total) => {
                    Ok(futures::stream::iter(vec![Ok(doc! { "total": total })]).boxed())
                }
                None => Err(ServerError::Unexpected("count failed".to_string())),
            };
        }
        let docs = self.aggregate_results.lock().await.clone();
        Ok(futures::stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn insert_many(&self, db: &str, coll: &str, docs: Vec<Document>) -> Result<Vec<Bson>> {
        self.record("insert_many").await;
        let mut ids = Vec::with_capacity(docs.len());
        let mut store = self.docs.lock().await;
        let entry = store.entry(namespace(db, coll)).or_default();
        for mut doc in docs {
            let id = match doc.get("_id") {
                Some(id) => id.clone(),
                None => {
                    let id = Bson::ObjectId(ObjectId::new());
                    doc.insert("_id", id.clone());
                    id
                }
            };
            entry.push(doc);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn update_many(
        &self,
        _db: &str,
        _coll: &str,
        _filter: Document,
        _update: Document,
        _upsert: bool,
    ) -> Result<UpdateSummary> {
        self.record("update_many").await;
        Ok(UpdateSummary {
            matched: 2,
            modified: 2,
            upserted_id: None,
        })
    }

    async fn delete_many(&self, _db: &str, _coll: &str, _filter: Document) -> Result<u64> {
        self.record("delete_many").await;
        Ok(3)
    }

    async fn drop_collection(&self, db: &str, coll: &str) -> Result<()> {
        self.record("drop_collection").await;
        self.docs.lock().await.remove(&namespace(db, coll));
        Ok(())
    }

    async fn drop_database(&self, _db: &str) -> Result<()> {
        self.record("drop_database").await;
        Ok(())
    }

    async fn list_indexes(&self, _db: &str, _coll: &str) -> Result<Vec<Document>> {
        self.record("list_indexes").await;
        Ok(vec![doc! { "name": "_id_", "key": { "_id": 1 } }])
    }

    async fn create_index(
        &self,
        _db: &str,
        _coll: &str,
        _keys: Document,
        name: Option<String>,
    ) -> Result<String> {
        self.record("create_index").await;
        Ok(name.unwrap_or_else(|| "index_1".to_string()))
    }

    async fn drop_index(&self, _db: &str, _coll: &str, _name: &str) -> Result<()> {
        self.record("drop_index").await;
        Ok(())
    }

    async fn list_search_indexes(&self, db: &str, coll: &str) -> Result<Vec<SearchIndex>> {
        self.record("list_search_indexes").await;
        Ok(self
            .search_indexes
            .lock()
            .await
            .get(&namespace(db, coll))
            .cloned()
            .unwrap_or_default())
    }

    async fn run_command(&self, _db: &str, _command: Document) -> Result<Document> {
        self.record("run_command").await;
        Ok(doc! { "ok": 1 })
    }

    async fn supports_search(&self, _db: &str, _coll: &str) -> Result<bool> {
        self.record("supports_search").await;
        Ok(self.search_supported.load(Ordering::SeqCst))
    }

    async fn close(&self) {
        self.record("close").await;
    }
}

/// A vector search index over one vector field plus optional filter fields.
pub fn vector_index(name: &str, path: &str, dimensions: u32, filters: &[&str]) -> SearchIndex {
    let mut fields = vec![mdbmcp::provider::SearchIndexField {
        field_type: "vector".to_string(),
        path: path.to_string(),
        num_dimensions: Some(dimensions),
        similarity: Some("cosine".to_string()),
        quantization: None,
    }];
    for filter in filters {
        fields.push(mdbmcp::provider::SearchIndexField {
            field_type: "filter".to_string(),
            path: filter.to_string(),
            num_dimensions: None,
            similarity: None,
            quantization: None,
        });
    }
    SearchIndex {
        name: name.to_string(),
        status: "READY".to_string(),
        queryable: true,
        index_type: "vectorSearch".to_string(),
        fields,
    }
}

pub fn test_config() -> Config {
    Config::default()
}

pub fn make_session(provider: Arc<FakeProvider>, config: Config) -> Arc<Session> {
    let config = Arc::new(config);
    Arc::new(Session::with_provider(
        config,
        provider,
        ElicitationClient::disconnected(),
        Arc::new(Telemetry::new(false)),
    ))
}

/// Session whose Voyage client talks to `base_url` (a mock server).
pub fn make_session_with_voyage(
    provider: Arc<FakeProvider>,
    config: Config,
    base_url: &str,
) -> Arc<Session> {
    let config = Arc::new(config);
    let client = Arc::new(VoyageClient::with_base_url(
        "pa-test-key".to_string(),
        base_url.to_string(),
    ));
    let embeddings = VectorSearchEmbeddingsManager::with_client(&config, client);
    Arc::new(Session::with_provider_and_embeddings(
        config,
        provider,
        embeddings,
        ElicitationClient::disconnected(),
        Arc::new(Telemetry::new(false)),
    ))
}

pub fn make_dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(ToolRegistry::with_default_tools()))
}

/// Build raw tool arguments from a JSON literal.
pub fn args(value: serde_json::Value) -> Option<mdbmcp::tools::JsonObject> {
    match value {
        serde_json::Value::Object(map) => Some(map),
        _ => panic!("tool arguments must be an object"),
    }
}
