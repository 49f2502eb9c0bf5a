// src/tools/mod.rs
// Tool framework: metadata, registration, typed argument parsing

pub mod atlas;
pub mod dispatch;
pub mod mongodb;
pub mod routing;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, PreviewFeature};
use crate::error::{Result, ServerError};
use crate::session::Session;

/// Raw tool arguments as delivered by the transport.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Capability category of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    MongoDb,
    Atlas,
    AtlasLocal,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MongoDb => "mongodb",
            Self::Atlas => "atlas",
            Self::AtlasLocal => "atlas-local",
        }
    }
}

/// Operation type; alone governs read/write gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Read,
    Create,
    Update,
    Delete,
    Metadata,
    Connect,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Metadata => "metadata",
            Self::Connect => "connect",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// Static metadata describing a registered tool.
#[derive(Debug)]
pub struct ToolMeta {
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    pub operation_type: OperationType,
    pub required_features: &'static [PreviewFeature],
}

/// Output of a tool execution: ordered text blocks plus optional telemetry
/// metadata.
#[derive(Debug, Default)]
pub struct ToolOutput {
    pub blocks: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![text.into()],
            metadata: None,
        }
    }

    pub fn from_blocks(blocks: Vec<String>) -> Self {
        Self {
            blocks,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Everything a tool execution can reach: the session (connection, config,
/// embeddings, Atlas client) and the cancellation signal for this call.
pub struct ToolExecutionContext {
    pub session: Arc<Session>,
    pub cancellation: CancellationToken,
}

impl ToolExecutionContext {
    pub fn config(&self) -> &Arc<Config> {
        &self.session.config
    }
}

/// Object-safe tool interface held by the registry.
#[async_trait]
pub trait ServerTool: Send + Sync {
    fn meta(&self) -> &'static ToolMeta;
    fn input_schema(&self) -> JsonObject;
    async fn execute(&self, args: JsonObject, ctx: &ToolExecutionContext) -> Result<ToolOutput>;
}

/// Strongly-typed tool interface. Implementations declare an argument struct;
/// the blanket [`ServerTool`] wrapper parses and validates it before `run` is
/// invoked, so `run` never sees malformed arguments.
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Args: DeserializeOwned + schemars::JsonSchema + Send;

    fn meta(&self) -> &'static ToolMeta;

    async fn run(&self, args: Self::Args, ctx: &ToolExecutionContext) -> Result<ToolOutput>;
}

#[async_trait]
impl<T: TypedTool> ServerTool for T {
    fn meta(&self) -> &'static ToolMeta {
        TypedTool::meta(self)
    }

    fn input_schema(&self) -> JsonObject {
        schema_object::<T::Args>()
    }

    async fn execute(&self, args: JsonObject, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let parsed = parse_args::<T::Args>(args)?;
        self.run(parsed, ctx).await
    }
}

/// Parse raw arguments against a typed shape. Argument structs carry
/// `deny_unknown_fields`, so unknown top-level arguments are rejected here.
pub fn parse_args<T: DeserializeOwned>(args: JsonObject) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(args))
        .map_err(|e| ServerError::InvalidArguments(e.to_string()))
}

/// JSON Schema for a typed argument struct, as the plain object the MCP
/// `tools/list` response expects.
pub fn schema_object<T: schemars::JsonSchema>() -> JsonObject {
    let schema = schemars::schema_for!(T);
    match serde_json::to_value(&schema) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => JsonObject::new(),
    }
}

/// Registry of every tool the server exposes. Names are unique.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ServerTool>>,
    by_name: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// The full catalog served by this binary.
    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        mongodb::register(&mut registry);
        routing::register(&mut registry);
        atlas::register(&mut registry);
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn ServerTool>) {
        let name = tool.meta().name;
        assert!(
            !self.by_name.contains_key(name),
            "duplicate tool name: {name}"
        );
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ServerTool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ServerTool>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, schemars::JsonSchema)]
    #[serde(rename_all = "camelCase", deny_unknown_fields)]
    struct SampleArgs {
        database: String,
        #[serde(default)]
        limit: Option<i64>,
    }

    #[test]
    fn parse_args_accepts_known_fields() {
        let mut args = JsonObject::new();
        args.insert("database".into(), "app".into());
        let parsed: SampleArgs = parse_args(args).expect("parses");
        assert_eq!(parsed.database, "app");
        assert_eq!(parsed.limit, None);
    }

    #[test]
    fn parse_args_rejects_unknown_top_level_fields() {
        let mut args = JsonObject::new();
        args.insert("database".into(), "app".into());
        args.insert("bogus".into(), true.into());
        let err = parse_args::<SampleArgs>(args).expect_err("unknown field");
        assert!(matches!(err, ServerError::InvalidArguments(_)));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn parse_args_reports_missing_fields() {
        let err = parse_args::<SampleArgs>(JsonObject::new()).expect_err("missing field");
        assert!(err.to_string().contains("database"));
    }

    #[test]
    fn schema_object_is_a_closed_record() {
        let schema = schema_object::<SampleArgs>();
        assert_eq!(schema.get("type").and_then(|v| v.as_str()), Some("object"));
        assert!(schema.contains_key("properties"));
        assert_eq!(
            schema
                .get("additionalProperties")
                .and_then(|v| v.as_bool()),
            Some(false)
        );
    }

    #[test]
    fn default_registry_has_unique_expected_tools() {
        let registry = ToolRegistry::with_default_tools();
        for name in [
            "connect",
            "disconnect",
            "find",
            "aggregate",
            "insert-many",
            "update-many",
            "delete-many",
            "drop-collection",
            "drop-database",
            "collection-indexes",
            "create-index",
            "drop-index",
            "export",
            "shortest_path",
            "shortest_path_from_gates",
            "get_aois_by_poi",
            "get_roads_by_aoi",
            "atlas-list-orgs",
            "atlas-list-clusters",
            "atlas-inspect-cluster",
            "atlas-create-access-list",
            "atlas-create-db-user",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
    }
}
