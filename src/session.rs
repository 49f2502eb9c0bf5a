// src/session.rs
// Per-client session and MongoDB connection lifecycle

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::atlas::AtlasApi;
use crate::config::{Config, Keychain};
use crate::error::{Result, ServerError};
use crate::mcp::elicitation::ElicitationClient;
use crate::provider::{MongoProvider, Provider};
use crate::telemetry::Telemetry;
use crate::vector::VectorSearchEmbeddingsManager;

/// Connection lifecycle of one session. Mutated only through the session's
/// connection manager, which serializes transitions.
#[derive(Clone)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected {
        provider: Arc<dyn Provider>,
        auth_type: String,
    },
    Errored(String),
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
            Self::Errored(_) => "errored",
        }
    }
}

/// One logical client session: a connection state, the shared config, and the
/// collaborators tools reach through.
pub struct Session {
    state: RwLock<ConnectionState>,
    /// Serializes connection attempts; at most one `Connecting` per session.
    connect_lock: Mutex<()>,
    pub config: Arc<Config>,
    pub embeddings: VectorSearchEmbeddingsManager,
    pub atlas: Option<Arc<dyn AtlasApi>>,
    pub elicitation: ElicitationClient,
    pub telemetry: Arc<Telemetry>,
}

impl Session {
    pub fn new(
        config: Arc<Config>,
        atlas: Option<Arc<dyn AtlasApi>>,
        elicitation: ElicitationClient,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let embeddings = VectorSearchEmbeddingsManager::from_config(&config);
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            connect_lock: Mutex::new(()),
            config,
            embeddings,
            atlas,
            elicitation,
            telemetry,
        }
    }

    /// Test constructor: a session already connected to the given provider.
    pub fn with_provider(
        config: Arc<Config>,
        provider: Arc<dyn Provider>,
        elicitation: ElicitationClient,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let embeddings = VectorSearchEmbeddingsManager::from_config(&config);
        Self {
            state: RwLock::new(ConnectionState::Connected {
                provider,
                auth_type: "scram".to_string(),
            }),
            connect_lock: Mutex::new(()),
            config,
            embeddings,
            atlas: None,
            elicitation,
            telemetry,
        }
    }

    /// Test constructor with an injected embeddings manager (e.g. one whose
    /// client points at a mock server).
    pub fn with_provider_and_embeddings(
        config: Arc<Config>,
        provider: Arc<dyn Provider>,
        embeddings: VectorSearchEmbeddingsManager,
        elicitation: ElicitationClient,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Connected {
                provider,
                auth_type: "scram".to_string(),
            }),
            connect_lock: Mutex::new(()),
            config,
            embeddings,
            atlas: None,
            elicitation,
            telemetry,
        }
    }

    /// Async-context variant of [`Session::with_provider`].
    pub async fn set_provider(&self, provider: Arc<dyn Provider>, auth_type: &str) {
        *self.state.write().await = ConnectionState::Connected {
            provider,
            auth_type: auth_type.to_string(),
        };
    }

    /// The provider if connected, without attempting to connect.
    pub async fn provider(&self) -> Result<Arc<dyn Provider>> {
        match &*self.state.read().await {
            ConnectionState::Connected { provider, .. } => Ok(provider.clone()),
            _ => Err(ServerError::NotConnected),
        }
    }

    /// Auth mechanism of the current connection, for telemetry.
    pub async fn auth_type(&self) -> Option<String> {
        match &*self.state.read().await {
            ConnectionState::Connected { auth_type, .. } => Some(auth_type.clone()),
            _ => None,
        }
    }

    pub async fn connection_state_label(&self) -> &'static str {
        self.state.read().await.label()
    }

    /// Return the connected provider, auto-connecting with the configured
    /// connection string when necessary.
    pub async fn ensure_connected(&self) -> Result<Arc<dyn Provider>> {
        if let ConnectionState::Connected { provider, .. } = &*self.state.read().await {
            return Ok(provider.clone());
        }

        let _guard = self.connect_lock.lock().await;
        // Another caller may have connected while we waited for the lock.
        if let ConnectionState::Connected { provider, .. } = &*self.state.read().await {
            return Ok(provider.clone());
        }

        let Some(uri) = self.config.connection_string.clone() else {
            return Err(ServerError::NotConnected);
        };
        self.connect_locked(&uri).await
    }

    /// Connect to the given URI, replacing any existing connection. Used by
    /// the `connect` tool.
    pub async fn connect_with(&self, uri: &str) -> Result<Arc<dyn Provider>> {
        let _guard = self.connect_lock.lock().await;
        self.close_current().await;
        Keychain::global().register_connection_string(uri);
        self.connect_locked(uri).await
    }

    /// Shared connect path; caller holds `connect_lock`.
    async fn connect_locked(&self, uri: &str) -> Result<Arc<dyn Provider>> {
        *self.state.write().await = ConnectionState::Connecting;
        debug!("connecting to MongoDB");

        match MongoProvider::connect(uri).await {
            Ok(provider) => {
                let provider: Arc<dyn Provider> = Arc::new(provider);
                let auth_type = auth_type_from_uri(uri);
                info!(auth_type = %auth_type, "connected to MongoDB");
                *self.state.write().await = ConnectionState::Connected {
                    provider: provider.clone(),
                    auth_type,
                };
                Ok(provider)
            }
            Err(e) => {
                let reason = Keychain::global().redact(&e.to_string());
                warn!("connection failed: {}", reason);
                *self.state.write().await = ConnectionState::Errored(reason.clone());
                Err(ServerError::ConnectionFailed(reason))
            }
        }
    }

    /// Disconnect and release the provider. Close errors are logged, never
    /// raised; the provider is closed exactly once.
    pub async fn disconnect(&self) {
        self.close_current().await;
    }

    async fn close_current(&self) {
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        if let ConnectionState::Connected { provider, .. } = previous {
            provider.close().await;
            debug!("MongoDB connection closed");
        }
    }
}

/// Derive the advertised auth type from a connection string. Attached to
/// telemetry; never used for decisions.
pub fn auth_type_from_uri(uri: &str) -> String {
    let mechanism = url::Url::parse(uri).ok().and_then(|parsed| {
        parsed
            .query_pairs()
            .find(|(k, _)| k.eq_ignore_ascii_case("authMechanism"))
            .map(|(_, v)| v.to_string())
    });

    match mechanism.as_deref() {
        Some("PLAIN") => "ldap".to_string(),
        Some("GSSAPI") => "kerberos".to_string(),
        Some("MONGODB-X509") => "x.509".to_string(),
        Some("MONGODB-OIDC") => {
            // Without a machine-identity ENVIRONMENT property the driver
            // falls back to the interactive device flow.
            if uri.contains("ENVIRONMENT") {
                "oidc-auth-flow".to_string()
            } else {
                "oidc-device-flow".to_string()
            }
        }
        Some(other) if other.starts_with("SCRAM") => "scram".to_string(),
        Some(other) => other.to_ascii_lowercase(),
        None => "scram".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_type_defaults_to_scram() {
        assert_eq!(auth_type_from_uri("mongodb://localhost:27017"), "scram");
        assert_eq!(
            auth_type_from_uri("mongodb://u:p@localhost/?authMechanism=SCRAM-SHA-256"),
            "scram"
        );
    }

    #[test]
    fn auth_type_maps_mechanisms() {
        assert_eq!(
            auth_type_from_uri("mongodb://u:p@localhost/?authMechanism=PLAIN"),
            "ldap"
        );
        assert_eq!(
            auth_type_from_uri("mongodb://u@localhost/?authMechanism=GSSAPI"),
            "kerberos"
        );
        assert_eq!(
            auth_type_from_uri("mongodb://localhost/?authMechanism=MONGODB-X509"),
            "x.509"
        );
        assert_eq!(
            auth_type_from_uri("mongodb://localhost/?authMechanism=MONGODB-OIDC"),
            "oidc-device-flow"
        );
    }

    #[test]
    fn connection_state_labels() {
        assert_eq!(ConnectionState::Disconnected.label(), "disconnected");
        assert_eq!(ConnectionState::Errored("x".into()).label(), "errored");
    }
}
