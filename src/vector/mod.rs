// src/vector/mod.rs
// Vector-search embeddings manager: index introspection, document rewriting,
// query-pipeline rewriting, and dimension validation

pub mod voyage;

pub use voyage::{InputType, OutputDtype, VoyageClient, VoyageModel};

use std::collections::BTreeMap;
use std::sync::Arc;

use mongodb::bson::{Bson, Document};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, VALID_VECTOR_DIMENSIONS};
use crate::error::{Result, ServerError};
use crate::provider::Provider;

fn default_output_dimension() -> u32 {
    crate::config::DEFAULT_VECTOR_SEARCH_DIMENSIONS
}

/// Embedding generation parameters accepted by `insert-many` and inside
/// `$vectorSearch` stages.
#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EmbeddingParameters {
    /// Voyage AI model used to generate the embeddings.
    pub model: VoyageModel,
    /// Output dimensions; one of 256, 512, 1024, 2048, 4096.
    #[serde(default = "default_output_dimension")]
    pub output_dimension: u32,
    /// Element type of the generated vectors.
    #[serde(default)]
    pub output_dtype: OutputDtype,
    /// For insertion: one map per document, field path -> raw text.
    #[serde(default)]
    pub input: Vec<BTreeMap<String, String>>,
}

impl EmbeddingParameters {
    pub fn validate(&self) -> Result<()> {
        if !VALID_VECTOR_DIMENSIONS.contains(&self.output_dimension) {
            return Err(ServerError::InvalidArguments(format!(
                "outputDimension must be one of {:?}, got {}",
                VALID_VECTOR_DIMENSIONS, self.output_dimension
            )));
        }
        Ok(())
    }
}

/// A vector-indexed field on a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    pub path: String,
    pub num_dimensions: u32,
    pub similarity: Option<String>,
    pub quantization: Option<String>,
}

/// Owns the Voyage client and every policy around generated embeddings.
pub struct VectorSearchEmbeddingsManager {
    client: Option<Arc<VoyageClient>>,
    config: Arc<Config>,
}

impl VectorSearchEmbeddingsManager {
    pub fn from_config(config: &Arc<Config>) -> Self {
        let client = config
            .voyage_api_key
            .as_ref()
            .map(|key| Arc::new(VoyageClient::new(key.clone())));
        Self {
            client,
            config: config.clone(),
        }
    }

    /// Test hook: inject a client pointed at a mock server.
    pub fn with_client(config: &Arc<Config>, client: Arc<VoyageClient>) -> Self {
        Self {
            client: Some(client),
            config: config.clone(),
        }
    }

    fn client(&self) -> Result<&VoyageClient> {
        self.client.as_deref().ok_or_else(|| {
            ServerError::EmbeddingService(
                "no Voyage API key is configured; set voyageApiKey and enable the vectorSearch \
                 preview feature"
                    .to_string(),
            )
        })
    }

    /// Vector-typed fields across all vector indexes of a namespace.
    pub async fn embeddings_for_namespace(
        &self,
        provider: &dyn Provider,
        db: &str,
        coll: &str,
    ) -> Result<Vec<VectorField>> {
        let indexes = provider.list_search_indexes(db, coll).await?;
        let mut fields = Vec::new();
        for index in indexes.iter().filter(|i| i.is_vector()) {
            for field in &index.fields {
                if field.field_type == "vector" {
                    fields.push(VectorField {
                        path: field.path.clone(),
                        num_dimensions: field
                            .num_dimensions
                            .unwrap_or(self.config.vector_search_dimensions),
                        // Indexes that omit a similarity fall back to the
                        // configured default.
                        similarity: field.similarity.clone().or_else(|| {
                            Some(
                                self.config
                                    .vector_search_similarity_function
                                    .as_str()
                                    .to_string(),
                            )
                        }),
                        quantization: field.quantization.clone(),
                    });
                }
            }
        }
        Ok(fields)
    }

    /// Whether a named, queryable vector index exists on the namespace.
    pub async fn index_exists(
        &self,
        provider: &dyn Provider,
        db: &str,
        coll: &str,
        name: &str,
    ) -> Result<bool> {
        let indexes = provider.list_search_indexes(db, coll).await?;
        Ok(indexes
            .iter()
            .any(|i| i.name == name && i.is_vector() && i.queryable))
    }

    /// Rewrite documents before insertion: generate embeddings for every
    /// `(field path, raw text)` pair in `params.input` and assign them to the
    /// documents. One batched service call per invocation.
    pub async fn rewrite_documents_for_insert(
        &self,
        provider: &dyn Provider,
        db: &str,
        coll: &str,
        docs: &mut [Document],
        params: &EmbeddingParameters,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        if params.input.is_empty() {
            return Ok(());
        }
        params.validate()?;
        if params.input.len() != docs.len() {
            return Err(ServerError::InvalidArguments(format!(
                "embeddingParameters.input has {} entries but {} documents were provided",
                params.input.len(),
                docs.len()
            )));
        }

        let known = self.embeddings_for_namespace(provider, db, coll).await?;
        let mut targets: Vec<(usize, &str)> = Vec::new();
        let mut raw_texts: Vec<String> = Vec::new();
        for (i, entry) in params.input.iter().enumerate() {
            for (path, raw) in entry {
                if !known.iter().any(|f| f.path == *path) {
                    return Err(unknown_vector_field(path, db, coll));
                }
                targets.push((i, path));
                raw_texts.push(raw.clone());
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let vectors = self
            .client()?
            .generate_embeddings(
                &raw_texts,
                params.model,
                params.output_dimension,
                params.output_dtype,
                InputType::Document,
                cancellation,
            )
            .await?;

        for ((doc_index, path), vector) in targets.into_iter().zip(vectors) {
            let doc = &mut docs[doc_index];
            // Clear any nested value at the dotted path, then store the
            // vector under the literal dotted key.
            delete_dotted_path(doc, path);
            doc.insert(path, vector_to_bson(&vector));
        }
        Ok(())
    }

    /// Rewrite `$vectorSearch` stages whose `queryVector` is raw text into
    /// generated query vectors. A `queryVector` that is already a vector
    /// silently drops any stray `embeddingParameters` key.
    pub async fn rewrite_pipeline(
        &self,
        provider: &dyn Provider,
        db: &str,
        coll: &str,
        pipeline: &mut [Document],
        cancellation: &CancellationToken,
    ) -> Result<()> {
        for stage in pipeline.iter_mut() {
            let Ok(vs) = stage.get_document_mut("$vectorSearch") else {
                continue;
            };
            let is_text_query = matches!(vs.get("queryVector"), Some(Bson::String(_)));
            if !is_text_query {
                vs.remove("embeddingParameters");
                continue;
            }

            let Ok(raw_params) = vs.get_document("embeddingParameters") else {
                return Err(ServerError::AtlasVectorSearchInvalidQuery(
                    "$vectorSearch has a raw text queryVector but no embeddingParameters; \
                     provide embeddingParameters or pass a numeric vector"
                        .to_string(),
                ));
            };
            let params: EmbeddingParameters = mongodb::bson::from_document(raw_params.clone())
                .map_err(|e| {
                    ServerError::AtlasVectorSearchInvalidQuery(format!(
                        "invalid embeddingParameters: {e}"
                    ))
                })?;
            params.validate()?;

            let path = vs.get_str("path").unwrap_or_default().to_string();
            let known = self.embeddings_for_namespace(provider, db, coll).await?;
            if !known.iter().any(|f| f.path == path) {
                return Err(unknown_vector_field(&path, db, coll));
            }

            let text = vs.get_str("queryVector").unwrap_or_default().to_string();
            let vectors = self
                .client()?
                .generate_embeddings(
                    &[text],
                    params.model,
                    params.output_dimension,
                    params.output_dtype,
                    InputType::Query,
                    cancellation,
                )
                .await?;
            let Some(vector) = vectors.into_iter().next() else {
                return Err(ServerError::EmbeddingService(
                    "embedding service returned no vectors".to_string(),
                ));
            };
            vs.insert("queryVector", vector_to_bson(&vector));
            vs.remove("embeddingParameters");
        }
        Ok(())
    }

    /// Validate that every value stored at a vector-indexed field is an array
    /// of the declared dimension count. Suppressed by
    /// `disableEmbeddingsValidation`.
    pub async fn validate_document_dimensions(
        &self,
        provider: &dyn Provider,
        db: &str,
        coll: &str,
        docs: &[Document],
    ) -> Result<()> {
        if self.config.disable_embeddings_validation {
            return Ok(());
        }
        let fields = self.embeddings_for_namespace(provider, db, coll).await?;
        if fields.is_empty() {
            return Ok(());
        }

        for doc in docs {
            for field in &fields {
                let Some(value) = lookup_field(doc, &field.path) else {
                    continue;
                };
                check_vector_value(&field.path, field.num_dimensions, value)?;
            }
        }
        Ok(())
    }

    /// Validate that every `$vectorSearch.filter` only references fields
    /// declared filter-eligible in the matching vector index definition.
    pub async fn validate_vector_search_filters(
        &self,
        provider: &dyn Provider,
        db: &str,
        coll: &str,
        pipeline: &[Document],
    ) -> Result<()> {
        let mut indexes = None;
        for stage in pipeline {
            let Ok(vs) = stage.get_document("$vectorSearch") else {
                continue;
            };
            let Ok(filter) = vs.get_document("filter") else {
                continue;
            };

            if indexes.is_none() {
                indexes = Some(provider.list_search_indexes(db, coll).await?);
            }
            let indexes = indexes.as_deref().unwrap_or(&[]);

            let index_name = vs.get_str("index").unwrap_or_default();
            let allowed: Vec<&str> = indexes
                .iter()
                .filter(|i| i.is_vector() && (index_name.is_empty() || i.name == index_name))
                .flat_map(|i| i.fields.iter())
                .filter(|f| f.field_type == "filter")
                .map(|f| f.path.as_str())
                .collect();

            let mut referenced = Vec::new();
            collect_filter_fields(filter, &mut referenced);
            for field in referenced {
                if !allowed.contains(&field.as_str()) {
                    return Err(ServerError::AtlasVectorSearchInvalidQuery(format!(
                        "Field '{field}' is not a filter field of vector index '{index_name}' \
                         on {db}.{coll}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn unknown_vector_field(path: &str, db: &str, coll: &str) -> ServerError {
    ServerError::AtlasVectorSearchInvalidQuery(format!(
        "Field '{path}' does not have a vector search index in collection {db}.{coll}"
    ))
}

fn vector_to_bson(vector: &[f64]) -> Bson {
    Bson::Array(vector.iter().map(|v| Bson::Double(*v)).collect())
}

/// Remove the value at a dotted path, descending through nested documents.
/// Missing intermediate keys are a no-op. A literal dotted key is removed too.
pub fn delete_dotted_path(doc: &mut Document, path: &str) {
    doc.remove(path);

    let Some((head, rest)) = path.split_once('.') else {
        return;
    };
    if let Ok(nested) = doc.get_document_mut(head) {
        delete_dotted_path(nested, rest);
    }
}

/// Find the value stored at `path`: the literal dotted key wins, then nested
/// traversal.
fn lookup_field<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }
    let (head, rest) = path.split_once('.')?;
    let nested = doc.get_document(head).ok()?;
    lookup_field(nested, rest)
}

fn is_number(bson: &Bson) -> bool {
    matches!(bson, Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_))
}

fn check_vector_value(path: &str, expected: u32, value: &Bson) -> Result<()> {
    let as_number_array = match value {
        Bson::Array(items) if items.iter().all(is_number) => Some(items.len()),
        _ => None,
    };
    match as_number_array {
        None => Err(dimension_error(path, expected, "unknown", "not-a-vector")),
        Some(len) if len as u32 != expected => Err(dimension_error(
            path,
            expected,
            &len.to_string(),
            "dimension-mismatch",
        )),
        Some(_) => Ok(()),
    }
}

fn dimension_error(path: &str, expected: u32, actual: &str, kind: &str) -> ServerError {
    ServerError::EmbeddingDimensionMismatch(format!(
        "Field {path} is an embedding with {expected} dimensions, and the provided value is not \
         compatible. Actual dimensions: {actual}, Error: {kind}"
    ))
}

/// Collect field names referenced by a `$vectorSearch.filter` document,
/// recursing through logical operators.
fn collect_filter_fields(filter: &Document, out: &mut Vec<String>) {
    for (key, value) in filter {
        if key.starts_with('$') {
            match value {
                Bson::Array(items) => {
                    for item in items {
                        if let Bson::Document(nested) = item {
                            collect_filter_fields(nested, out);
                        }
                    }
                }
                Bson::Document(nested) => collect_filter_fields(nested, out),
                _ => {}
            }
        } else {
            out.push(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn delete_dotted_path_removes_nested_and_literal() {
        let mut document = doc! {
            "meta": { "embedding": [1.0, 2.0], "keep": true },
            "meta.embedding": "literal",
        };
        delete_dotted_path(&mut document, "meta.embedding");
        assert!(document.get("meta.embedding").is_none());
        let meta = document.get_document("meta").expect("meta survives");
        assert!(meta.get("embedding").is_none());
        assert_eq!(meta.get_bool("keep"), Ok(true));
    }

    #[test]
    fn delete_dotted_path_with_missing_intermediate_is_noop() {
        let mut document = doc! { "a": 1 };
        delete_dotted_path(&mut document, "missing.path");
        assert_eq!(document, doc! { "a": 1 });
    }

    #[test]
    fn lookup_prefers_literal_dotted_key() {
        let document = doc! {
            "meta.embedding": [1.0],
            "meta": { "embedding": [2.0, 3.0] },
        };
        let value = lookup_field(&document, "meta.embedding").expect("found");
        assert_eq!(value, &Bson::Array(vec![Bson::Double(1.0)]));
    }

    #[test]
    fn check_vector_value_formats_not_a_vector() {
        let err = check_vector_value("embedding", 256, &Bson::String("oopsie".into()))
            .expect_err("string is not a vector");
        assert_eq!(
            err.to_string(),
            "Field embedding is an embedding with 256 dimensions, and the provided value is not \
             compatible. Actual dimensions: unknown, Error: not-a-vector"
        );
    }

    #[test]
    fn check_vector_value_formats_dimension_mismatch() {
        let value = Bson::Array(vec![Bson::Double(1.0), Bson::Double(2.0)]);
        let err = check_vector_value("titleEmbeddings", 1024, &value)
            .expect_err("wrong dimension count");
        let text = err.to_string();
        assert!(text.contains("1024 dimensions"));
        assert!(text.contains("Actual dimensions: 2"));
        assert!(text.contains("Error: dimension-mismatch"));
    }

    #[test]
    fn check_vector_value_accepts_matching_array() {
        let value = Bson::Array(vec![Bson::Double(0.5); 4]);
        assert!(check_vector_value("e", 4, &value).is_ok());
    }

    #[test]
    fn filter_fields_recurse_through_operators() {
        let filter = doc! {
            "$and": [
                { "genre": "scifi" },
                { "$or": [ { "year": { "$gt": 1990 } }, { "rating": 5 } ] },
            ],
        };
        let mut fields = Vec::new();
        collect_filter_fields(&filter, &mut fields);
        assert_eq!(fields, vec!["genre", "year", "rating"]);
    }

    #[test]
    fn embedding_parameters_reject_bad_dimension() {
        let params = EmbeddingParameters {
            model: VoyageModel::Voyage35Lite,
            output_dimension: 123,
            output_dtype: OutputDtype::Float,
            input: Vec::new(),
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn embedding_parameters_parse_with_defaults() {
        let params: EmbeddingParameters = serde_json::from_value(serde_json::json!({
            "model": "voyage-3.5-lite",
            "input": [{ "titleEmbeddings": "The Matrix" }],
        }))
        .expect("parses");
        assert_eq!(params.output_dimension, 1024);
        assert_eq!(params.output_dtype, OutputDtype::Float);
        assert_eq!(params.input.len(), 1);
    }

    #[test]
    fn embedding_parameters_reject_unknown_keys() {
        let result: std::result::Result<EmbeddingParameters, _> =
            serde_json::from_value(serde_json::json!({
                "model": "voyage-3.5-lite",
                "bogus": true,
            }));
        assert!(result.is_err());
    }
}
