// src/config/mod.rs
// Server configuration - CLI flags, environment variables, defaults

pub mod keychain;

pub use keychain::{Keychain, SecretKind};

use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 3000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_NOTIFICATION_TIMEOUT_MS: u64 = 540_000;
pub const DEFAULT_MAX_DOCUMENTS_PER_QUERY: i64 = 100;
pub const DEFAULT_MAX_BYTES_PER_QUERY: u64 = 16 * 1024 * 1024;
pub const DEFAULT_VECTOR_SEARCH_DIMENSIONS: u32 = 1024;
pub const DEFAULT_ATLAS_TEMP_USER_LIFETIME_MS: u64 = 4 * 60 * 60 * 1000;

/// Output dimensions accepted by the Voyage AI API.
pub const VALID_VECTOR_DIMENSIONS: &[u32] = &[256, 512, 1024, 2048, 4096];

/// Tools that require elicited confirmation unless overridden.
pub const DEFAULT_CONFIRMATION_REQUIRED_TOOLS: &[&str] = &[
    "atlas-create-access-list",
    "atlas-create-db-user",
    "drop-database",
    "drop-collection",
    "delete-many",
    "drop-index",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

fn parse_transport(s: &str) -> Result<Transport, String> {
    match s {
        "stdio" => Ok(Transport::Stdio),
        "http" => Ok(Transport::Http),
        "sse" => Err("the 'sse' transport is no longer supported; use 'http'".to_string()),
        other => Err(format!(
            "unknown transport '{other}'; expected 'stdio' or 'http'"
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoggerKind {
    Stderr,
    Disk,
    Mcp,
}

impl LoggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stderr => "stderr",
            Self::Disk => "disk",
            Self::Mcp => "mcp",
        }
    }

    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "stderr" => Ok(Self::Stderr),
            "disk" => Ok(Self::Disk),
            "mcp" => Ok(Self::Mcp),
            other => Err(format!(
                "unknown logger '{other}'; expected one of stderr, disk, mcp"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityFunction {
    Euclidean,
    #[default]
    Cosine,
    DotProduct,
}

impl SimilarityFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Euclidean => "euclidean",
            Self::Cosine => "cosine",
            Self::DotProduct => "dotProduct",
        }
    }
}

fn parse_similarity(s: &str) -> Result<SimilarityFunction, String> {
    match s {
        "euclidean" => Ok(SimilarityFunction::Euclidean),
        "cosine" => Ok(SimilarityFunction::Cosine),
        "dotProduct" => Ok(SimilarityFunction::DotProduct),
        other => Err(format!(
            "unknown similarity function '{other}'; expected euclidean, cosine, or dotProduct"
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreviewFeature {
    VectorSearch,
}

impl PreviewFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VectorSearch => "vectorSearch",
        }
    }

    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "vectorSearch" => Ok(Self::VectorSearch),
            other => Err(format!(
                "unknown preview feature '{other}'; expected vectorSearch"
            )),
        }
    }
}

/// Command line interface. Long flags are camelCase and every option has an
/// `MDB_MCP_*` environment fallback; precedence is positional specifier >
/// named flag > environment variable > default.
#[derive(Debug, Parser)]
#[command(
    name = "mdbmcp",
    version,
    about = "MCP broker server for MongoDB, Atlas, and Voyage AI vector search"
)]
pub struct Cli {
    /// MongoDB connection string used by auto-connect.
    #[arg(value_name = "CONNECTION_STRING")]
    pub connection_specifier: Option<String>,

    /// Deprecated; pass the connection string as the positional argument.
    #[arg(long = "connectionString", env = "MDB_MCP_CONNECTION_STRING")]
    pub connection_string: Option<String>,

    /// Transport to serve on: stdio or http.
    #[arg(long = "transport", env = "MDB_MCP_TRANSPORT", value_parser = parse_transport, default_value = "stdio")]
    pub transport: Transport,

    /// Port for the http transport (1..65535).
    #[arg(long = "httpPort", env = "MDB_MCP_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Bind host for the http transport.
    #[arg(long = "httpHost", env = "MDB_MCP_HTTP_HOST", default_value = DEFAULT_HTTP_HOST)]
    pub http_host: String,

    /// Inactivity window before an http session is torn down.
    #[arg(long = "idleTimeoutMs", env = "MDB_MCP_IDLE_TIMEOUT_MS", default_value_t = DEFAULT_IDLE_TIMEOUT_MS)]
    pub idle_timeout_ms: u64,

    /// Grace period to notify the client before a disconnect.
    #[arg(long = "notificationTimeoutMs", env = "MDB_MCP_NOTIFICATION_TIMEOUT_MS", default_value_t = DEFAULT_NOTIFICATION_TIMEOUT_MS)]
    pub notification_timeout_ms: u64,

    /// Disable write operations globally.
    #[arg(long = "readOnly", env = "MDB_MCP_READ_ONLY")]
    pub read_only: bool,

    /// Enforce that read queries use an index (no collection scans).
    #[arg(long = "indexCheck", env = "MDB_MCP_INDEX_CHECK")]
    pub index_check: bool,

    /// Comma-separated tool names, categories, or operation types to disable.
    #[arg(
        long = "disabledTools",
        env = "MDB_MCP_DISABLED_TOOLS",
        value_delimiter = ','
    )]
    pub disabled_tools: Vec<String>,

    /// Comma-separated tool names that require elicited confirmation.
    #[arg(
        long = "confirmationRequiredTools",
        env = "MDB_MCP_CONFIRMATION_REQUIRED_TOOLS",
        value_delimiter = ','
    )]
    pub confirmation_required_tools: Option<Vec<String>>,

    /// Telemetry switch: enabled or disabled.
    #[arg(long = "telemetry", env = "MDB_MCP_TELEMETRY", default_value = "enabled")]
    pub telemetry: String,

    /// Comma-separated log sinks; subset of stderr, disk, mcp.
    #[arg(
        long = "loggers",
        env = "MDB_MCP_LOGGERS",
        value_delimiter = ',',
        default_values_t = [String::from("disk"), String::from("mcp")]
    )]
    pub loggers: Vec<String>,

    /// Per-call document cap; 0 disables the cap.
    #[arg(long = "maxDocumentsPerQuery", env = "MDB_MCP_MAX_DOCUMENTS_PER_QUERY", default_value_t = DEFAULT_MAX_DOCUMENTS_PER_QUERY)]
    pub max_documents_per_query: i64,

    /// Per-call byte cap; 0 disables the cap.
    #[arg(long = "maxBytesPerQuery", env = "MDB_MCP_MAX_BYTES_PER_QUERY", default_value_t = DEFAULT_MAX_BYTES_PER_QUERY)]
    pub max_bytes_per_query: u64,

    /// Voyage AI API key; required when the vectorSearch preview feature is on.
    #[arg(long = "voyageApiKey", env = "MDB_MCP_VOYAGE_API_KEY")]
    pub voyage_api_key: Option<String>,

    /// Default embedding output dimensions.
    #[arg(long = "vectorSearchDimensions", env = "MDB_MCP_VECTOR_SEARCH_DIMENSIONS", default_value_t = DEFAULT_VECTOR_SEARCH_DIMENSIONS)]
    pub vector_search_dimensions: u32,

    /// Similarity function for generated vector indexes.
    #[arg(long = "vectorSearchSimilarityFunction", env = "MDB_MCP_VECTOR_SEARCH_SIMILARITY_FUNCTION", value_parser = parse_similarity, default_value = "cosine")]
    pub vector_search_similarity_function: SimilarityFunction,

    /// Skip embedding dimension validation on insert and aggregate.
    #[arg(
        long = "disableEmbeddingsValidation",
        env = "MDB_MCP_DISABLE_EMBEDDINGS_VALIDATION"
    )]
    pub disable_embeddings_validation: bool,

    /// Comma-separated preview features to enable.
    #[arg(
        long = "previewFeatures",
        env = "MDB_MCP_PREVIEW_FEATURES",
        value_delimiter = ','
    )]
    pub preview_features: Vec<String>,

    /// Lifetime of Atlas database users created by this server.
    #[arg(long = "atlasTemporaryDatabaseUserLifetimeMs", env = "MDB_MCP_ATLAS_TEMPORARY_DATABASE_USER_LIFETIME_MS", default_value_t = DEFAULT_ATLAS_TEMP_USER_LIFETIME_MS)]
    pub atlas_temporary_database_user_lifetime_ms: u64,

    /// Atlas API service-account client id.
    #[arg(long = "apiClientId", env = "MDB_MCP_API_CLIENT_ID")]
    pub api_client_id: Option<String>,

    /// Atlas API service-account client secret.
    #[arg(long = "apiClientSecret", env = "MDB_MCP_API_CLIENT_SECRET")]
    pub api_client_secret: Option<String>,

    /// Directory the export tool writes to.
    #[arg(long = "exportsPath", env = "MDB_MCP_EXPORTS_PATH")]
    pub exports_path: Option<PathBuf>,

    /// Directory the disk logger writes to.
    #[arg(long = "logPath", env = "MDB_MCP_LOG_PATH")]
    pub log_path: Option<PathBuf>,
}

/// Resolved, validated server configuration. Tools receive this read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub connection_string: Option<String>,
    pub transport: Transport,
    pub http_port: u16,
    pub http_host: String,
    pub idle_timeout_ms: u64,
    pub notification_timeout_ms: u64,
    pub read_only: bool,
    pub index_check: bool,
    pub disabled_tools: BTreeSet<String>,
    pub confirmation_required_tools: BTreeSet<String>,
    pub telemetry_enabled: bool,
    pub loggers: BTreeSet<LoggerKind>,
    pub max_documents_per_query: i64,
    pub max_bytes_per_query: u64,
    pub voyage_api_key: Option<String>,
    pub vector_search_dimensions: u32,
    pub vector_search_similarity_function: SimilarityFunction,
    pub disable_embeddings_validation: bool,
    pub preview_features: BTreeSet<PreviewFeature>,
    pub atlas_temporary_database_user_lifetime_ms: u64,
    pub api_client_id: Option<String>,
    pub api_client_secret: Option<String>,
    pub exports_path: PathBuf,
    pub log_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_string: None,
            transport: Transport::Stdio,
            http_port: DEFAULT_HTTP_PORT,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            notification_timeout_ms: DEFAULT_NOTIFICATION_TIMEOUT_MS,
            read_only: false,
            index_check: false,
            disabled_tools: BTreeSet::new(),
            confirmation_required_tools: DEFAULT_CONFIRMATION_REQUIRED_TOOLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            telemetry_enabled: true,
            loggers: BTreeSet::from([LoggerKind::Disk, LoggerKind::Mcp]),
            max_documents_per_query: DEFAULT_MAX_DOCUMENTS_PER_QUERY,
            max_bytes_per_query: DEFAULT_MAX_BYTES_PER_QUERY,
            voyage_api_key: None,
            vector_search_dimensions: DEFAULT_VECTOR_SEARCH_DIMENSIONS,
            vector_search_similarity_function: SimilarityFunction::default(),
            disable_embeddings_validation: false,
            preview_features: BTreeSet::new(),
            atlas_temporary_database_user_lifetime_ms: DEFAULT_ATLAS_TEMP_USER_LIFETIME_MS,
            api_client_id: None,
            api_client_secret: None,
            exports_path: default_data_dir().join("exports"),
            log_path: default_data_dir().join("logs"),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mongodb-mcp")
}

impl Config {
    /// Whether the given preview feature is enabled.
    pub fn feature_enabled(&self, feature: PreviewFeature) -> bool {
        self.preview_features.contains(&feature)
    }

    /// Whether a tool identified by name, category, and operation type is in
    /// the disabled set. Any of the three keys matches.
    pub fn is_tool_disabled(&self, name: &str, category: &str, operation_type: &str) -> bool {
        self.disabled_tools.contains(name)
            || self.disabled_tools.contains(category)
            || self.disabled_tools.contains(operation_type)
    }
}

/// Collected validation output. Errors are fatal (exit code 1); warnings are
/// logged and the server proceeds.
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }
        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warn in &self.warnings {
                lines.push(format!("  - {}", warn));
            }
        }
        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

impl Cli {
    /// Resolve the CLI into a `Config`, applying precedence and collecting
    /// every validation problem into one report.
    pub fn into_config(self) -> (Config, ConfigValidation) {
        let mut validation = ConfigValidation::default();
        let mut config = Config::default();

        if self.connection_string.is_some() && self.connection_specifier.is_none() {
            validation.add_warning(
                "--connectionString is deprecated; pass the connection string as the positional argument",
            );
        }
        // Positional specifier wins over the named flag and the env var.
        config.connection_string = self.connection_specifier.or(self.connection_string);

        config.transport = self.transport;
        if self.http_port == 0 {
            validation.add_error("httpPort must be in 1..65535");
        } else {
            config.http_port = self.http_port;
        }
        config.http_host = self.http_host;
        config.idle_timeout_ms = self.idle_timeout_ms;
        config.notification_timeout_ms = self.notification_timeout_ms;
        config.read_only = self.read_only;
        config.index_check = self.index_check;

        config.disabled_tools = self
            .disabled_tools
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if let Some(tools) = self.confirmation_required_tools {
            config.confirmation_required_tools = tools
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        match self.telemetry.as_str() {
            "enabled" => config.telemetry_enabled = true,
            "disabled" => config.telemetry_enabled = false,
            other => validation.add_error(format!(
                "telemetry must be 'enabled' or 'disabled', got '{other}'"
            )),
        }

        let mut loggers = BTreeSet::new();
        for raw in &self.loggers {
            match LoggerKind::parse(raw.trim()) {
                Ok(kind) => {
                    if !loggers.insert(kind) {
                        validation.add_error(format!("logger '{}' listed more than once", raw));
                    }
                }
                Err(e) => validation.add_error(e),
            }
        }
        if loggers.is_empty() {
            validation.add_error("loggers must name at least one of stderr, disk, mcp");
        } else {
            config.loggers = loggers;
        }

        if self.max_documents_per_query < 0 {
            validation.add_error("maxDocumentsPerQuery must be >= 0");
        } else {
            config.max_documents_per_query = self.max_documents_per_query;
        }
        config.max_bytes_per_query = self.max_bytes_per_query;

        if !VALID_VECTOR_DIMENSIONS.contains(&self.vector_search_dimensions) {
            validation.add_error(format!(
                "vectorSearchDimensions must be one of {:?}, got {}",
                VALID_VECTOR_DIMENSIONS, self.vector_search_dimensions
            ));
        } else {
            config.vector_search_dimensions = self.vector_search_dimensions;
        }
        config.vector_search_similarity_function = self.vector_search_similarity_function;
        config.disable_embeddings_validation = self.disable_embeddings_validation;

        for raw in &self.preview_features {
            match PreviewFeature::parse(raw.trim()) {
                Ok(feature) => {
                    config.preview_features.insert(feature);
                }
                Err(e) => validation.add_error(e),
            }
        }

        config.voyage_api_key = self.voyage_api_key;
        if config.feature_enabled(PreviewFeature::VectorSearch) && config.voyage_api_key.is_none() {
            validation
                .add_error("voyageApiKey is required when the vectorSearch preview feature is on");
        }

        config.atlas_temporary_database_user_lifetime_ms =
            self.atlas_temporary_database_user_lifetime_ms;
        config.api_client_id = self.api_client_id;
        config.api_client_secret = self.api_client_secret;
        if let Some(path) = self.exports_path {
            config.exports_path = path;
        }
        if let Some(path) = self.log_path {
            config.log_path = path;
        }

        register_secrets(&config);
        (config, validation)
    }
}

/// Seed the process-wide keychain from the loaded configuration.
fn register_secrets(config: &Config) {
    let keychain = Keychain::global();
    if let Some(uri) = &config.connection_string {
        keychain.register_connection_string(uri);
    }
    if let Some(key) = &config.voyage_api_key {
        keychain.register(key.clone(), SecretKind::Password);
    }
    if let Some(secret) = &config.api_client_secret {
        keychain.register(secret.clone(), SecretKind::Password);
    }
}

/// Log collected warnings through tracing. Kept separate from `into_config`
/// so validation can run before the logger is initialized.
pub fn log_warnings(validation: &ConfigValidation) {
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> (Config, ConfigValidation) {
        let mut argv = vec!["mdbmcp"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)
            .expect("cli should parse")
            .into_config()
    }

    #[test]
    fn defaults_match_documented_values() {
        let (config, validation) = parse(&[]);
        assert!(validation.is_valid());
        assert_eq!(config.transport, Transport::Stdio);
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.http_host, "127.0.0.1");
        assert_eq!(config.idle_timeout_ms, 600_000);
        assert_eq!(config.notification_timeout_ms, 540_000);
        assert_eq!(config.max_documents_per_query, 100);
        assert_eq!(config.max_bytes_per_query, 16 * 1024 * 1024);
        assert_eq!(config.vector_search_dimensions, 1024);
        assert!(config.telemetry_enabled);
        assert_eq!(
            config.loggers,
            BTreeSet::from([LoggerKind::Disk, LoggerKind::Mcp])
        );
        assert!(
            config
                .confirmation_required_tools
                .contains("drop-collection")
        );
        assert!(config.confirmation_required_tools.contains("delete-many"));
    }

    #[test]
    fn positional_specifier_wins_over_flag() {
        let (config, _) = parse(&[
            "mongodb://positional:27017",
            "--connectionString",
            "mongodb://flag:27017",
        ]);
        assert_eq!(
            config.connection_string.as_deref(),
            Some("mongodb://positional:27017")
        );
    }

    #[test]
    fn connection_string_flag_is_deprecated() {
        let (config, validation) = parse(&["--connectionString", "mongodb://flag:27017"]);
        assert_eq!(
            config.connection_string.as_deref(),
            Some("mongodb://flag:27017")
        );
        assert!(
            validation
                .warnings
                .iter()
                .any(|w| w.contains("deprecated"))
        );
    }

    #[test]
    fn sse_transport_is_rejected() {
        let err = Cli::try_parse_from(["mdbmcp", "--transport", "sse"])
            .expect_err("sse must be rejected");
        assert!(err.to_string().contains("no longer supported"));
    }

    #[test]
    fn unknown_flag_fails() {
        assert!(Cli::try_parse_from(["mdbmcp", "--connectionStrng", "x"]).is_err());
    }

    #[test]
    fn invalid_values_are_consolidated() {
        let (_, validation) = parse(&[
            "--telemetry",
            "sometimes",
            "--vectorSearchDimensions",
            "3",
            "--loggers",
            "stderr,stderr",
        ]);
        assert!(!validation.is_valid());
        assert!(validation.errors.len() >= 3);
        let report = validation.report();
        assert!(report.contains("Errors:"));
        assert!(report.contains("telemetry"));
        assert!(report.contains("vectorSearchDimensions"));
    }

    #[test]
    fn vector_search_requires_voyage_key() {
        let (_, validation) = parse(&["--previewFeatures", "vectorSearch"]);
        assert!(
            validation
                .errors
                .iter()
                .any(|e| e.contains("voyageApiKey"))
        );

        let (config, validation) = parse(&[
            "--previewFeatures",
            "vectorSearch",
            "--voyageApiKey",
            "pa-123",
        ]);
        assert!(validation.is_valid());
        assert!(config.feature_enabled(PreviewFeature::VectorSearch));
    }

    #[test]
    fn disabled_tool_matching_covers_all_keys() {
        let (config, _) = parse(&["--disabledTools", "drop-database,atlas,delete"]);
        assert!(config.is_tool_disabled("drop-database", "mongodb", "delete"));
        assert!(config.is_tool_disabled("atlas-list-orgs", "atlas", "read"));
        assert!(config.is_tool_disabled("delete-many", "mongodb", "delete"));
        assert!(!config.is_tool_disabled("find", "mongodb", "read"));
    }
}
