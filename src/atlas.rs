// src/atlas.rs
// Atlas control-plane API contract and HTTP client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Result, ServerError};

const DEFAULT_BASE_URL: &str = "https://cloud.mongodb.com";
const API_VERSION_HEADER: &str = "application/vnd.atlas.2025-03-12+json";
const TIMEOUT_SECS: u64 = 30;

/// An IP access-list entry to create on a project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A database user role.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbUserRole {
    pub role_name: String,
    pub database_name: String,
}

/// A database user to create on a project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbUserSpec {
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub roles: Vec<DbUserRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_after_date: Option<DateTime<Utc>>,
}

/// Contract with the Atlas control plane. Tools depend on this trait only;
/// the REST client below is one implementation and tests provide another.
#[async_trait]
pub trait AtlasApi: Send + Sync {
    async fn list_orgs(&self) -> Result<Value>;
    async fn list_clusters(&self, project_id: &str) -> Result<Value>;
    async fn inspect_cluster(&self, project_id: &str, cluster_name: &str) -> Result<Value>;
    async fn create_access_list(
        &self,
        project_id: &str,
        entries: Vec<AccessListEntry>,
    ) -> Result<Value>;
    async fn create_db_user(&self, project_id: &str, user: DbUserSpec) -> Result<Value>;
}

/// Service-account REST client. Fetches OAuth tokens with the client
/// credentials grant and caches them until shortly before expiry.
pub struct AtlasClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<(String, Instant)>>,
}

impl AtlasClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::with_base_url(client_id, client_secret, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(client_id: String, client_secret: String, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url,
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref()
            && *expires > Instant::now()
        {
            return Ok(token.clone());
        }

        let response = self
            .http
            .post(format!("{}/api/oauth/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ServerError::Unexpected(format!("Atlas token request failed: {e}")))?;

        let body: Value = response.json().await?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServerError::Unexpected("Atlas token response missing access_token".to_string())
            })?
            .to_string();
        let expires_in = body.get("expires_in").and_then(Value::as_u64).unwrap_or(300);
        // Refresh a minute early to avoid using a token mid-expiry.
        let expires = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60).max(30));
        *cached = Some((token.clone(), expires));
        Ok(token)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .header("Accept", API_VERSION_HEADER)
            .send()
            .await?;
        Self::into_json(response).await
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<Value> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .header("Accept", API_VERSION_HEADER)
            .json(body)
            .send()
            .await?;
        Self::into_json(response).await
    }

    async fn into_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ServerError::Unexpected(format!(
                "Atlas API error {status}: {text}"
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl AtlasApi for AtlasClient {
    async fn list_orgs(&self) -> Result<Value> {
        self.get("/api/atlas/v2/orgs").await
    }

    async fn list_clusters(&self, project_id: &str) -> Result<Value> {
        self.get(&format!("/api/atlas/v2/groups/{project_id}/clusters"))
            .await
    }

    async fn inspect_cluster(&self, project_id: &str, cluster_name: &str) -> Result<Value> {
        self.get(&format!(
            "/api/atlas/v2/groups/{project_id}/clusters/{cluster_name}"
        ))
        .await
    }

    async fn create_access_list(
        &self,
        project_id: &str,
        entries: Vec<AccessListEntry>,
    ) -> Result<Value> {
        self.post(&format!("/api/atlas/v2/groups/{project_id}/accessList"), &entries)
            .await
    }

    async fn create_db_user(&self, project_id: &str, user: DbUserSpec) -> Result<Value> {
        self.post(
            &format!("/api/atlas/v2/groups/{project_id}/databaseUsers"),
            &user,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_list_entry_skips_empty_fields() {
        let entry = AccessListEntry {
            ip_address: Some("198.51.100.7".into()),
            cidr_block: None,
            comment: None,
        };
        let json = serde_json::to_value(&entry).expect("serializes");
        assert_eq!(json["ipAddress"], "198.51.100.7");
        assert!(json.get("cidrBlock").is_none());
    }

    #[test]
    fn db_user_spec_serializes_expiry() {
        let user = DbUserSpec {
            username: "temp-user".into(),
            password: "s3cret".into(),
            database_name: "admin".into(),
            roles: vec![DbUserRole {
                role_name: "readWrite".into(),
                database_name: "app".into(),
            }],
            delete_after_date: Some(Utc::now()),
        };
        let json = serde_json::to_value(&user).expect("serializes");
        assert!(json.get("deleteAfterDate").is_some());
        assert_eq!(json["roles"][0]["roleName"], "readWrite");
    }
}
