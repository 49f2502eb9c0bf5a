// src/provider.rs
// MongoDB driver facade used by tools; implemented by the real driver and by
// in-memory fakes in tests

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use mongodb::IndexModel;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::IndexOptions;

use crate::error::{Result, ServerError};

/// Stream of documents produced by a query. Owned by the tool invocation that
/// created it; always drained or dropped before the invocation returns.
pub type DocStream = Pin<Box<dyn Stream<Item = Result<Document>> + Send>>;

/// Options accepted by `find`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub limit: Option<i64>,
    pub max_time_ms: Option<u64>,
}

/// Summary of an `update_many` call.
#[derive(Debug, Clone)]
pub struct UpdateSummary {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

/// One field of a search-index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchIndexField {
    pub field_type: String,
    pub path: String,
    pub num_dimensions: Option<u32>,
    pub similarity: Option<String>,
    pub quantization: Option<String>,
}

/// A search-index definition as reported by `$listSearchIndexes`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchIndex {
    pub name: String,
    pub status: String,
    pub queryable: bool,
    pub index_type: String,
    pub fields: Vec<SearchIndexField>,
}

impl SearchIndex {
    /// Whether this is a vector-type index.
    pub fn is_vector(&self) -> bool {
        self.index_type == "vectorSearch" || self.index_type == "vector"
    }

    /// Parse the driver's raw index document.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let name = doc.get_str("name").ok()?.to_string();
        let status = doc.get_str("status").unwrap_or("UNKNOWN").to_string();
        let queryable = doc.get_bool("queryable").unwrap_or(false);
        let definition = doc.get_document("latestDefinition").ok();

        let index_type = doc
            .get_str("type")
            .ok()
            .or_else(|| definition.and_then(|d| d.get_str("type").ok()))
            .unwrap_or("search")
            .to_string();

        let mut fields = Vec::new();
        if let Some(definition) = definition
            && let Ok(raw_fields) = definition.get_array("fields")
        {
            for raw in raw_fields {
                let Bson::Document(field) = raw else { continue };
                let Ok(path) = field.get_str("path") else {
                    continue;
                };
                fields.push(SearchIndexField {
                    field_type: field.get_str("type").unwrap_or_default().to_string(),
                    path: path.to_string(),
                    num_dimensions: read_u32(field, "numDimensions"),
                    similarity: field.get_str("similarity").ok().map(str::to_string),
                    quantization: field.get_str("quantization").ok().map(str::to_string),
                });
            }
        }

        Some(Self {
            name,
            status,
            queryable,
            index_type,
            fields,
        })
    }
}

fn read_u32(doc: &Document, key: &str) -> Option<u32> {
    match doc.get(key) {
        Some(Bson::Int32(n)) => u32::try_from(*n).ok(),
        Some(Bson::Int64(n)) => u32::try_from(*n).ok(),
        Some(Bson::Double(n)) => Some(*n as u32),
        _ => None,
    }
}

/// Thin facade over MongoDB. Tools only ever see this trait, never the driver
/// types, so tests can substitute an in-memory implementation.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn find(
        &self,
        db: &str,
        coll: &str,
        filter: Document,
        options: QueryOptions,
    ) -> Result<DocStream>;

    async fn aggregate(
        &self,
        db: &str,
        coll: &str,
        pipeline: Vec<Document>,
        max_time_ms: Option<u64>,
    ) -> Result<DocStream>;

    /// Returns the inserted IDs in insertion order.
    async fn insert_many(&self, db: &str, coll: &str, docs: Vec<Document>) -> Result<Vec<Bson>>;

    async fn update_many(
        &self,
        db: &str,
        coll: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateSummary>;

    /// Returns the number of deleted documents.
    async fn delete_many(&self, db: &str, coll: &str, filter: Document) -> Result<u64>;

    async fn drop_collection(&self, db: &str, coll: &str) -> Result<()>;

    async fn drop_database(&self, db: &str) -> Result<()>;

    async fn list_indexes(&self, db: &str, coll: &str) -> Result<Vec<Document>>;

    /// Returns the created index name.
    async fn create_index(
        &self,
        db: &str,
        coll: &str,
        keys: Document,
        name: Option<String>,
    ) -> Result<String>;

    async fn drop_index(&self, db: &str, coll: &str, name: &str) -> Result<()>;

    async fn list_search_indexes(&self, db: &str, coll: &str) -> Result<Vec<SearchIndex>>;

    async fn run_command(&self, db: &str, command: Document) -> Result<Document>;

    /// Whether the cluster supports Atlas Search on the given namespace.
    async fn supports_search(&self, db: &str, coll: &str) -> Result<bool>;

    /// Close the underlying connection. Called exactly once on teardown.
    async fn close(&self);
}

/// Production provider backed by the official driver.
pub struct MongoProvider {
    client: mongodb::Client,
}

impl MongoProvider {
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = mongodb::Client::with_uri_str(uri).await?;
        Ok(Self { client })
    }

    fn collection(&self, db: &str, coll: &str) -> mongodb::Collection<Document> {
        self.client.database(db).collection::<Document>(coll)
    }
}

fn box_cursor(cursor: mongodb::Cursor<Document>) -> DocStream {
    cursor.map(|item| item.map_err(ServerError::from)).boxed()
}

#[async_trait]
impl Provider for MongoProvider {
    async fn find(
        &self,
        db: &str,
        coll: &str,
        filter: Document,
        options: QueryOptions,
    ) -> Result<DocStream> {
        let collection = self.collection(db, coll);
        let mut action = collection.find(filter);
        if let Some(projection) = options.projection {
            action = action.projection(projection);
        }
        if let Some(sort) = options.sort {
            action = action.sort(sort);
        }
        if let Some(limit) = options.limit {
            action = action.limit(limit);
        }
        if let Some(ms) = options.max_time_ms {
            action = action.max_time(Duration::from_millis(ms));
        }
        Ok(box_cursor(action.await?))
    }

    async fn aggregate(
        &self,
        db: &str,
        coll: &str,
        pipeline: Vec<Document>,
        max_time_ms: Option<u64>,
    ) -> Result<DocStream> {
        let collection = self.collection(db, coll);
        let mut action = collection.aggregate(pipeline);
        if let Some(ms) = max_time_ms {
            action = action.max_time(Duration::from_millis(ms));
        }
        Ok(box_cursor(action.await?))
    }

    async fn insert_many(&self, db: &str, coll: &str, docs: Vec<Document>) -> Result<Vec<Bson>> {
        let count = docs.len();
        let result = self.collection(db, coll).insert_many(docs).await?;
        // The driver reports a map keyed by input position; restore order.
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            if let Some(id) = result.inserted_ids.get(&i) {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    async fn update_many(
        &self,
        db: &str,
        coll: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateSummary> {
        let result = self
            .collection(db, coll)
            .update_many(filter, update)
            .upsert(upsert)
            .await?;
        Ok(UpdateSummary {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_many(&self, db: &str, coll: &str, filter: Document) -> Result<u64> {
        let result = self.collection(db, coll).delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    async fn drop_collection(&self, db: &str, coll: &str) -> Result<()> {
        self.collection(db, coll).drop().await?;
        Ok(())
    }

    async fn drop_database(&self, db: &str) -> Result<()> {
        self.client.database(db).drop().await?;
        Ok(())
    }

    async fn list_indexes(&self, db: &str, coll: &str) -> Result<Vec<Document>> {
        let mut cursor = self.collection(db, coll).list_indexes().await?;
        let mut out = Vec::new();
        while let Some(model) = cursor.try_next().await? {
            let name = model
                .options
                .as_ref()
                .and_then(|o| o.name.clone())
                .unwrap_or_default();
            out.push(doc! { "name": name, "key": model.keys });
        }
        Ok(out)
    }

    async fn create_index(
        &self,
        db: &str,
        coll: &str,
        keys: Document,
        name: Option<String>,
    ) -> Result<String> {
        let mut options = IndexOptions::default();
        options.name = name;
        let model = IndexModel::builder().keys(keys).options(options).build();
        let result = self.collection(db, coll).create_index(model).await?;
        Ok(result.index_name)
    }

    async fn drop_index(&self, db: &str, coll: &str, name: &str) -> Result<()> {
        self.collection(db, coll).drop_index(name).await?;
        Ok(())
    }

    async fn list_search_indexes(&self, db: &str, coll: &str) -> Result<Vec<SearchIndex>> {
        let mut cursor = self.collection(db, coll).list_search_indexes().await?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            if let Some(index) = SearchIndex::from_document(&doc) {
                out.push(index);
            }
        }
        Ok(out)
    }

    async fn run_command(&self, db: &str, command: Document) -> Result<Document> {
        Ok(self.client.database(db).run_command(command).await?)
    }

    async fn supports_search(&self, db: &str, coll: &str) -> Result<bool> {
        match self
            .collection(db, coll)
            .aggregate(vec![doc! { "$listSearchIndexes": {} }])
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let text = e.to_string();
                if text.contains("Unrecognized pipeline stage")
                    || text.contains("$listSearchIndexes")
                {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}
