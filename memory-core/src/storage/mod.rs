//! Storage abstraction.
//!
//! A single trait all domain services program against, so that the
//! relational+vector production backend ([`memory_storage_redb`], shipped
//! as a sibling crate) and the in-memory backend used by tests are
//! interchangeable. Nothing above this layer knows which one is wired in.

pub mod memory_backend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::Result;
use crate::types::{
    Association, ContradictionRecord, Context, Direction, Memory, MemoryStatus, MemorySubtype,
    MemoryType, Session, Workspace, WorkingMemoryEntry,
};

pub use memory_backend::InMemoryStorage;

/// One hop of a traversed graph path.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub association: Association,
}

/// A path discovered by [`Storage::traverse_graph`].
#[derive(Debug, Clone)]
pub struct GraphPath {
    pub nodes: Vec<Memory>,
    pub edges: Vec<GraphEdge>,
    /// Product of edge strengths along the path.
    pub total_strength: f32,
    pub depth: usize,
}

/// Aggregate counters for a workspace, used by session briefings.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceStats {
    pub total_memories: u64,
    pub by_type: HashMap<MemoryType, u64>,
    pub total_associations: u64,
    pub open_contradictions: u64,
}

/// Filters accepted by [`Storage::search_memories`].
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub types: Option<Vec<MemoryType>>,
    pub subtypes: Option<Vec<MemorySubtype>>,
    pub tags: Option<Vec<String>>,
    pub include_archived: bool,
}

/// Filters accepted by [`Storage::get_memories_for_decay`] and
/// [`Storage::get_archival_candidates`].
#[derive(Debug, Clone)]
pub struct DecayQuery {
    pub min_age_days: i64,
    pub exclude_pinned: bool,
}

#[derive(Debug, Clone)]
pub struct ArchivalQuery {
    pub max_importance: f32,
    pub max_access_count: u64,
    pub min_age_days: i64,
}

/// Unified storage backend trait.
///
/// All mutations are single statements or bounded sequences; no cross-table
/// transactions are required. Every method is total: missing
/// entities surface as `Ok(None)` / empty `Vec`, never a thrown error, while
/// genuine I/O failure surfaces as `Error::Storage`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Idempotently ensure the reserved workspaces/contexts exist.
    async fn ensure_reserved_entities(&self) -> Result<()>;

    // ---- workspaces & contexts ----
    async fn create_workspace(&self, workspace: Workspace) -> Result<()>;
    async fn get_workspace(&self, tenant_id: &str, id: &str) -> Result<Option<Workspace>>;
    async fn update_workspace(&self, workspace: Workspace) -> Result<()>;
    async fn list_all_workspace_ids(&self) -> Result<Vec<(String, String)>>;

    async fn create_context(&self, context: Context) -> Result<()>;
    async fn get_context(&self, workspace_id: &str, id: &str) -> Result<Option<Context>>;
    async fn get_context_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<Context>>;

    // ---- memories ----
    async fn create_memory(&self, memory: Memory) -> Result<()>;
    async fn get_memory(&self, workspace_id: &str, id: &str, track_access: bool) -> Result<Option<Memory>>;
    async fn get_memory_by_id(&self, id: &str) -> Result<Option<Memory>>;
    async fn get_memory_by_hash(&self, workspace_id: &str, hash: &str) -> Result<Option<Memory>>;
    async fn update_memory(&self, memory: Memory) -> Result<()>;
    /// Soft delete: sets `status=deleted, deleted_at=now`. Returns whether a
    /// row was affected.
    async fn soft_delete_memory(&self, workspace_id: &str, id: &str) -> Result<bool>;
    /// Hard delete: purges the row, its FTS entry and associations touching it.
    async fn hard_delete_memory(&self, workspace_id: &str, id: &str) -> Result<bool>;

    async fn search_memories(
        &self,
        workspace_id: &str,
        query_vec: &[f32],
        limit: usize,
        offset: usize,
        min_relevance: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<(Memory, f32)>>;

    async fn full_text_search(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>>;

    async fn get_recent_memories(
        &self,
        workspace_id: &str,
        created_after: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>>;

    async fn workspace_stats(&self, workspace_id: &str) -> Result<WorkspaceStats>;

    // ---- associations ----
    async fn create_association(&self, association: Association) -> Result<()>;
    async fn get_association(&self, workspace_id: &str, id: &str) -> Result<Option<Association>>;
    async fn association_exists(
        &self,
        workspace_id: &str,
        source_id: &str,
        target_id: &str,
        relationship: &str,
    ) -> Result<bool>;
    async fn get_related(
        &self,
        workspace_id: &str,
        memory_id: &str,
        relationships: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<Association>>;
    async fn traverse_graph(
        &self,
        workspace_id: &str,
        start_id: &str,
        max_depth: usize,
        relationships: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<GraphPath>>;

    // ---- sessions & working memory ----
    async fn create_session(&self, session: Session) -> Result<()>;
    async fn get_session(&self, workspace_id: &str, id: &str) -> Result<Option<Session>>;
    async fn get_session_by_id(&self, id: &str) -> Result<Option<Session>>;
    async fn update_session(&self, session: Session) -> Result<()>;
    async fn delete_session(&self, workspace_id: &str, id: &str) -> Result<bool>;
    async fn list_sessions(&self, workspace_id: &str) -> Result<Vec<Session>>;
    async fn list_expired_sessions(&self, limit: usize) -> Result<Vec<Session>>;
    async fn cleanup_all_expired_sessions(&self) -> Result<u64>;

    async fn set_working_memory(&self, entry: WorkingMemoryEntry) -> Result<()>;
    async fn get_working_memory(&self, session_id: &str, key: &str) -> Result<Option<WorkingMemoryEntry>>;
    async fn get_all_working_memory(&self, session_id: &str) -> Result<Vec<WorkingMemoryEntry>>;

    // ---- contradictions ----
    async fn create_contradiction(&self, record: ContradictionRecord) -> Result<()>;
    async fn get_contradiction(&self, workspace_id: &str, id: &str) -> Result<Option<ContradictionRecord>>;
    async fn update_contradiction(&self, record: ContradictionRecord) -> Result<()>;
    async fn get_unresolved_contradictions(
        &self,
        workspace_id: &str,
        limit: usize,
    ) -> Result<Vec<ContradictionRecord>>;

    // ---- decay ----
    async fn get_memories_for_decay(&self, workspace_id: &str, query: &DecayQuery) -> Result<Vec<Memory>>;
    async fn get_archival_candidates(&self, workspace_id: &str, query: &ArchivalQuery) -> Result<Vec<Memory>>;
}

/// Age in whole days between `created_at` and now.
#[must_use]
pub fn age_days(created_at: DateTime<Utc>) -> i64 {
    (Utc::now() - created_at).num_days()
}

#[must_use]
pub fn memory_is_visible(memory: &Memory, include_archived: bool) -> bool {
    match memory.status {
        MemoryStatus::Deleted => false,
        MemoryStatus::Archived => include_archived,
        MemoryStatus::Active => true,
    }
}
