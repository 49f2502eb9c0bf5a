// src/tools/atlas.rs
// Atlas control-plane tools

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::atlas::{AccessListEntry, AtlasApi, DbUserRole, DbUserSpec};
use crate::error::{Result, ServerError};
use crate::output::wrap_untrusted;
use crate::tools::{
    OperationType, ToolCategory, ToolExecutionContext, ToolMeta, ToolOutput, ToolRegistry,
    TypedTool,
};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ListOrgsTool));
    registry.register(Arc::new(ListClustersTool));
    registry.register(Arc::new(InspectClusterTool));
    registry.register(Arc::new(CreateAccessListTool));
    registry.register(Arc::new(CreateDbUserTool));
}

fn atlas_client(ctx: &ToolExecutionContext) -> Result<Arc<dyn AtlasApi>> {
    ctx.session.atlas.clone().ok_or_else(|| {
        ServerError::Unexpected(
            "the Atlas API is not configured; set apiClientId and apiClientSecret".to_string(),
        )
    })
}

fn json_block(value: &serde_json::Value) -> Result<String> {
    Ok(wrap_untrusted(&serde_json::to_string_pretty(value)?))
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListOrgsArgs {}

pub struct ListOrgsTool;

static LIST_ORGS_META: ToolMeta = ToolMeta {
    name: "atlas-list-orgs",
    description: "List the Atlas organizations visible to the configured service account.",
    category: ToolCategory::Atlas,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for ListOrgsTool {
    type Args = ListOrgsArgs;

    fn meta(&self) -> &'static ToolMeta {
        &LIST_ORGS_META
    }

    async fn run(&self, _args: ListOrgsArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let orgs = atlas_client(ctx)?.list_orgs().await?;
        Ok(ToolOutput::text(json_block(&orgs)?))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListClustersArgs {
    /// Atlas project (group) ID.
    pub project_id: String,
}

pub struct ListClustersTool;

static LIST_CLUSTERS_META: ToolMeta = ToolMeta {
    name: "atlas-list-clusters",
    description: "List the clusters in an Atlas project.",
    category: ToolCategory::Atlas,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for ListClustersTool {
    type Args = ListClustersArgs;

    fn meta(&self) -> &'static ToolMeta {
        &LIST_CLUSTERS_META
    }

    async fn run(&self, args: ListClustersArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let clusters = atlas_client(ctx)?.list_clusters(&args.project_id).await?;
        Ok(ToolOutput::text(json_block(&clusters)?))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InspectClusterArgs {
    /// Atlas project (group) ID.
    pub project_id: String,
    /// Cluster name.
    pub cluster_name: String,
}

pub struct InspectClusterTool;

static INSPECT_CLUSTER_META: ToolMeta = ToolMeta {
    name: "atlas-inspect-cluster",
    description: "Inspect one Atlas cluster: topology, state, and connection endpoints.",
    category: ToolCategory::Atlas,
    operation_type: OperationType::Read,
    required_features: &[],
};

#[async_trait]
impl TypedTool for InspectClusterTool {
    type Args = InspectClusterArgs;

    fn meta(&self) -> &'static ToolMeta {
        &INSPECT_CLUSTER_META
    }

    async fn run(&self, args: InspectClusterArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let cluster = atlas_client(ctx)?
            .inspect_cluster(&args.project_id, &args.cluster_name)
            .await?;
        Ok(ToolOutput::text(json_block(&cluster)?))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateAccessListArgs {
    /// Atlas project (group) ID.
    pub project_id: String,
    /// IP addresses to allow.
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    /// CIDR blocks to allow.
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
    /// Comment attached to each created entry.
    #[serde(default)]
    pub comment: Option<String>,
}

pub struct CreateAccessListTool;

static CREATE_ACCESS_LIST_META: ToolMeta = ToolMeta {
    name: "atlas-create-access-list",
    description: "Add IP addresses or CIDR blocks to an Atlas project's access list.",
    category: ToolCategory::Atlas,
    operation_type: OperationType::Create,
    required_features: &[],
};

#[async_trait]
impl TypedTool for CreateAccessListTool {
    type Args = CreateAccessListArgs;

    fn meta(&self) -> &'static ToolMeta {
        &CREATE_ACCESS_LIST_META
    }

    async fn run(
        &self,
        args: CreateAccessListArgs,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput> {
        if args.ip_addresses.is_empty() && args.cidr_blocks.is_empty() {
            return Err(ServerError::InvalidArguments(
                "provide at least one of ipAddresses or cidrBlocks".to_string(),
            ));
        }
        let mut entries = Vec::new();
        for ip in &args.ip_addresses {
            entries.push(AccessListEntry {
                ip_address: Some(ip.clone()),
                cidr_block: None,
                comment: args.comment.clone(),
            });
        }
        for cidr in &args.cidr_blocks {
            entries.push(AccessListEntry {
                ip_address: None,
                cidr_block: Some(cidr.clone()),
                comment: args.comment.clone(),
            });
        }
        let count = entries.len();
        atlas_client(ctx)?
            .create_access_list(&args.project_id, entries)
            .await?;
        Ok(ToolOutput::text(format!(
            "Added {count} entr{} to the access list of project {}.",
            if count == 1 { "y" } else { "ies" },
            args.project_id
        )))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateDbUserArgs {
    /// Atlas project (group) ID.
    pub project_id: String,
    /// Username to create.
    pub username: String,
    /// Password; generated when omitted.
    #[serde(default)]
    pub password: Option<String>,
    /// Roles as `role@database` pairs (e.g. `readWrite@app`).
    pub roles: Vec<String>,
}

pub struct CreateDbUserTool;

static CREATE_DB_USER_META: ToolMeta = ToolMeta {
    name: "atlas-create-db-user",
    description: "Create a temporary Atlas database user. The user expires after the configured \
                  lifetime.",
    category: ToolCategory::Atlas,
    operation_type: OperationType::Create,
    required_features: &[],
};

#[async_trait]
impl TypedTool for CreateDbUserTool {
    type Args = CreateDbUserArgs;

    fn meta(&self) -> &'static ToolMeta {
        &CREATE_DB_USER_META
    }

    async fn run(&self, args: CreateDbUserArgs, ctx: &ToolExecutionContext) -> Result<ToolOutput> {
        let mut roles = Vec::new();
        for raw in &args.roles {
            let Some((role, database)) = raw.split_once('@') else {
                return Err(ServerError::InvalidArguments(format!(
                    "role '{raw}' must be formatted as role@database"
                )));
            };
            roles.push(DbUserRole {
                role_name: role.to_string(),
                database_name: database.to_string(),
            });
        }

        let generated = args.password.is_none();
        let password = args
            .password
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        crate::config::Keychain::global()
            .register(password.clone(), crate::config::SecretKind::Password);

        let lifetime_ms = ctx.config().atlas_temporary_database_user_lifetime_ms;
        let user = DbUserSpec {
            username: args.username.clone(),
            password: password.clone(),
            database_name: "admin".to_string(),
            roles,
            delete_after_date: Some(Utc::now() + Duration::milliseconds(lifetime_ms as i64)),
        };
        atlas_client(ctx)?
            .create_db_user(&args.project_id, user)
            .await?;

        let mut blocks = vec![format!(
            "Created database user '{}' in project {}; it expires in {} hour(s).",
            args.username,
            args.project_id,
            lifetime_ms / 3_600_000
        )];
        if generated {
            blocks.push(format!("Generated password: {password}"));
        }
        Ok(ToolOutput::from_blocks(blocks))
    }
}
