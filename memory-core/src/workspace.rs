//! Workspace and context management: thin coordination over [`Storage`],
//! plus the auto-creation ("just works") path used when a caller references
//! a workspace id that doesn't exist yet.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::storage::Storage;
use crate::types::{Context, Workspace, DEFAULT_CONTEXT_ID, DEFAULT_TENANT_ID};

/// Coordinates workspace/context lifecycle on top of a [`Storage`] backend.
pub struct WorkspaceService {
    storage: Arc<dyn Storage>,
}

impl WorkspaceService {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        WorkspaceService { storage }
    }

    pub async fn create_workspace(&self, workspace: Workspace) -> Result<Workspace> {
        info!(workspace_id = %workspace.id, tenant_id = %workspace.tenant_id, "creating workspace");
        self.storage.create_workspace(workspace.clone()).await?;
        Ok(workspace)
    }

    pub async fn get_workspace(&self, tenant_id: &str, workspace_id: &str) -> Result<Option<Workspace>> {
        debug!(workspace_id, "getting workspace");
        self.storage.get_workspace(tenant_id, workspace_id).await
    }

    /// Ensure `workspace_id` exists, auto-creating it (named after its own
    /// id, under `tenant_id` or the default tenant) when `auto_create` is
    /// set and it isn't found. Supports callers that reference a workspace
    /// by id without having provisioned it first.
    pub async fn ensure_workspace(&self, workspace_id: &str, tenant_id: Option<&str>, auto_create: bool) -> Result<Option<Workspace>> {
        let tenant_id = tenant_id.unwrap_or(DEFAULT_TENANT_ID);
        if let Some(existing) = self.storage.get_workspace(tenant_id, workspace_id).await? {
            return Ok(Some(existing));
        }
        if !auto_create {
            debug!(workspace_id, "workspace not found, auto_create disabled");
            return Ok(None);
        }

        info!(workspace_id, tenant_id, "auto-creating workspace");
        let workspace = Workspace::new(tenant_id, workspace_id, workspace_id);
        self.storage.create_workspace(workspace.clone()).await?;
        self.ensure_default_context(workspace_id).await?;
        Ok(Some(workspace))
    }

    pub async fn update_workspace(&self, workspace: Workspace) -> Result<Workspace> {
        self.storage
            .get_workspace(&workspace.tenant_id, &workspace.id)
            .await?
            .ok_or_else(|| crate::error::Error::not_found("workspace", &workspace.id))?;
        self.storage.update_workspace(workspace.clone()).await?;
        info!(workspace_id = %workspace.id, "workspace updated");
        Ok(workspace)
    }

    /// Idempotent bootstrap of a workspace's `_default` context. Any
    /// already-exists race is swallowed, since the caller only needs the
    /// context to end up present.
    pub async fn ensure_default_context(&self, workspace_id: &str) -> Result<()> {
        if self.storage.get_context(workspace_id, DEFAULT_CONTEXT_ID).await?.is_some() {
            return Ok(());
        }
        let context = Context::new(workspace_id, DEFAULT_CONTEXT_ID, DEFAULT_CONTEXT_ID);
        self.storage.create_context(context).await?;
        debug!(workspace_id, "default context created");
        Ok(())
    }

    pub async fn get_context(&self, workspace_id: &str, context_id: &str) -> Result<Option<Context>> {
        self.storage.get_context(workspace_id, context_id).await
    }

    pub async fn get_context_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<Context>> {
        self.storage.get_context_by_name(workspace_id, name).await
    }

    pub async fn create_context(&self, context: Context) -> Result<Context> {
        self.storage.create_context(context.clone()).await?;
        Ok(context)
    }
}
