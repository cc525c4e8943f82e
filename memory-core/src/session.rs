//! Session and working-memory management.
//!
//! A single implementation backed by the [`Storage`] trait: wiring it to
//! [`crate::storage::InMemoryStorage`] gives an in-memory variant, wiring it
//! to the durable `redb` backend gives a storage-backed variant. Both share
//! the same sliding-window TTL, write-behind, and briefing logic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::contradiction::ContradictionService;
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::tasks::TaskService;
use crate::types::{ContradictionRecord, DetailLevel, Memory, Session, WorkingMemoryEntry};

/// Default sliding-window TTL applied by [`SessionService::touch_session`]
/// when the caller doesn't override it.
pub const DEFAULT_TOUCH_TTL_SECONDS: i64 = 3600;

/// Hook the session service calls to commit a session's working memory
/// into long-term storage. Implemented by the memory orchestrator, which
/// knows how to turn working-memory values into `Memory` records; kept as
/// a trait here so this module has no dependency on the orchestrator.
#[async_trait]
pub trait SessionCommitHook: Send + Sync {
    async fn commit(&self, workspace_id: &str, session: &Session, entries: &[WorkingMemoryEntry]) -> Result<u64>;
}

/// Statistics returned by [`SessionService::commit_session`].
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub session_id: String,
    pub committed_at: DateTime<Utc>,
    pub memories_committed: u64,
}

/// A workspace activity digest assembled for an agent at session start.
#[derive(Debug, Clone)]
pub struct SessionBriefing {
    pub total_memories: u64,
    pub total_associations: u64,
    pub open_contradictions: u64,
    pub recent_activity: Vec<String>,
    pub contradictions_detected: Vec<ContradictionRecord>,
    pub memories: Vec<(Memory, String)>,
}

/// Options for [`SessionService::get_briefing`].
#[derive(Debug, Clone)]
pub struct BriefingOptions {
    pub lookback_minutes: i64,
    pub detail_level: DetailLevel,
    pub limit: usize,
    pub include_memories: bool,
    pub include_contradictions: bool,
}

impl Default for BriefingOptions {
    fn default() -> Self {
        BriefingOptions {
            lookback_minutes: 60,
            detail_level: DetailLevel::default(),
            limit: 10,
            include_memories: true,
            include_contradictions: true,
        }
    }
}

/// Session and working-memory management, backed by a [`Storage`] implementation.
pub struct SessionService {
    storage: Arc<dyn Storage>,
    tasks: Option<Arc<TaskService>>,
    contradictions: Option<Arc<ContradictionService>>,
    commit_hook: Option<Arc<dyn SessionCommitHook>>,
    default_touch_ttl: i64,
}

impl SessionService {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        SessionService {
            storage,
            tasks: None,
            contradictions: None,
            commit_hook: None,
            default_touch_ttl: DEFAULT_TOUCH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_tasks(mut self, tasks: Arc<TaskService>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    #[must_use]
    pub fn with_contradictions(mut self, contradictions: Arc<ContradictionService>) -> Self {
        self.contradictions = Some(contradictions);
        self
    }

    #[must_use]
    pub fn with_commit_hook(mut self, hook: Arc<dyn SessionCommitHook>) -> Self {
        self.commit_hook = Some(hook);
        self
    }

    pub async fn create_session(&self, session: Session) -> Result<Session> {
        self.storage.create_session(session.clone()).await?;
        info!(session_id = %session.id, workspace_id = %session.workspace_id, "session created");
        Ok(session)
    }

    /// Retrieve a session, auto-deleting it (without auto-commit) if expired.
    pub async fn get_session(&self, workspace_id: &str, session_id: &str) -> Result<Option<Session>> {
        let Some(session) = self.storage.get_session(workspace_id, session_id).await? else {
            return Ok(None);
        };
        if session.is_expired() {
            info!(session_id, workspace_id, "session expired, removing");
            self.storage.delete_session(workspace_id, session_id).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Workspace-agnostic lookup by id.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let Some(session) = self.storage.get_session_by_id(session_id).await? else {
            return Ok(None);
        };
        if session.is_expired() {
            self.storage.delete_session(&session.workspace_id, session_id).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Delete a session. If `auto_commit` is set, not yet committed, and
    /// `skip_auto_commit` is false, attempt a commit first; a commit
    /// failure is logged but doesn't block deletion.
    pub async fn delete_session(&self, workspace_id: &str, session_id: &str, skip_auto_commit: bool) -> Result<bool> {
        if let Some(session) = self.storage.get_session(workspace_id, session_id).await? {
            if session.auto_commit && session.committed_at.is_none() && !skip_auto_commit {
                if let Err(e) = self.commit_session(workspace_id, session_id).await {
                    warn!(session_id, error = %e, "auto-commit failed, proceeding with deletion");
                }
            }
        }
        self.storage.delete_session(workspace_id, session_id).await
    }

    /// Sliding-window touch: `expires_at = now + ttl`.
    pub async fn touch_session(&self, workspace_id: &str, session_id: &str, extend_seconds: Option<i64>) -> Result<Session> {
        let mut session = self
            .get_session(workspace_id, session_id)
            .await?
            .ok_or_else(|| Error::not_found("session", session_id))?;

        let ttl = extend_seconds.unwrap_or(self.default_touch_ttl);
        session.touch(ttl);
        self.storage.update_session(session.clone()).await?;
        Ok(session)
    }

    /// Upsert a working-memory key, then schedule write-behind persistence
    /// into long-term storage as a `type=working` memory.
    pub async fn set_working_memory(
        &self,
        workspace_id: &str,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
        ttl_seconds: Option<i64>,
    ) -> Result<WorkingMemoryEntry> {
        let session = self
            .get_session(workspace_id, session_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("session {session_id} not found or expired in workspace {workspace_id}")))?;

        let expires_at = ttl_seconds.map(|s| Utc::now() + chrono::Duration::seconds(s));
        let entry = WorkingMemoryEntry {
            session_id: session_id.to_string(),
            key: key.to_string(),
            value: value.clone(),
            expires_at,
            created_at: Utc::now(),
        };
        self.storage.set_working_memory(entry.clone()).await?;

        let content = match &value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        if let Some(tasks) = &self.tasks {
            let payload = serde_json::json!({
                "workspace_id": workspace_id,
                "session_id": session_id,
                "key": key,
                "content": content,
                "context_id": session.context_id,
            });
            if let Err(e) = tasks.schedule_task("remember_working_memory", payload) {
                warn!(session_id, key, error = %e, "failed to schedule working memory write-behind");
            }
        } else {
            debug!(session_id, key, "no task service configured, skipping write-behind");
        }

        Ok(entry)
    }

    pub async fn get_working_memory(&self, workspace_id: &str, session_id: &str, key: &str) -> Result<Option<WorkingMemoryEntry>> {
        if self.get_session(workspace_id, session_id).await?.is_none() {
            return Ok(None);
        }
        self.storage.get_working_memory(session_id, key).await
    }

    pub async fn get_all_working_memory(&self, workspace_id: &str, session_id: &str) -> Result<Vec<WorkingMemoryEntry>> {
        if self.get_session(workspace_id, session_id).await?.is_none() {
            return Ok(Vec::new());
        }
        self.storage.get_all_working_memory(session_id).await
    }

    /// Mark a session committed. Working memory is already persisted via
    /// write-behind as it's written; this is the synchronization barrier.
    pub async fn commit_session(&self, workspace_id: &str, session_id: &str) -> Result<CommitResult> {
        let mut session = self
            .get_session(workspace_id, session_id)
            .await?
            .ok_or_else(|| Error::not_found("session", session_id))?;

        let entries = self.storage.get_all_working_memory(session_id).await?;
        let memories_committed = if let Some(hook) = &self.commit_hook {
            hook.commit(workspace_id, &session, &entries).await?
        } else {
            entries.len() as u64
        };

        let committed_at = Utc::now();
        session.committed_at = Some(committed_at);
        self.storage.update_session(session).await?;

        info!(session_id, memories_committed, "session committed");
        Ok(CommitResult {
            session_id: session_id.to_string(),
            committed_at,
            memories_committed,
        })
    }

    pub async fn list_sessions(&self, workspace_id: &str) -> Result<Vec<Session>> {
        self.storage.list_sessions(workspace_id).await
    }

    /// Assemble a workspace activity digest from storage stats, recent
    /// memories, and unresolved contradictions.
    pub async fn get_briefing(&self, workspace_id: &str, options: &BriefingOptions) -> Result<SessionBriefing> {
        let stats = self.storage.workspace_stats(workspace_id).await?;

        let memories = if options.include_memories {
            let created_after = Utc::now() - chrono::Duration::minutes(options.lookback_minutes);
            let recent = self
                .storage
                .get_recent_memories(workspace_id, Some(created_after), options.limit, 0)
                .await?;
            recent
                .into_iter()
                .map(|m| {
                    let content = m.content_for_detail_level(options.detail_level).to_string();
                    (m, content)
                })
                .collect()
        } else {
            Vec::new()
        };

        let contradictions_detected = if options.include_contradictions {
            match &self.contradictions {
                Some(svc) => svc.get_unresolved(workspace_id, 3).await.unwrap_or_else(|e| {
                    warn!(workspace_id, error = %e, "failed to get contradictions for briefing");
                    Vec::new()
                }),
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let recent_activity = vec![format!(
            "workspace stats: {} total memories, {} associations",
            stats.total_memories, stats.total_associations
        )];

        Ok(SessionBriefing {
            total_memories: stats.total_memories,
            total_associations: stats.total_associations,
            open_contradictions: stats.open_contradictions,
            recent_activity,
            contradictions_detected,
            memories,
        })
    }

    /// Recurring cleanup pass: fetch up to `limit` expired sessions, attempt
    /// commit for each eligible one (errors logged, not fatal), then delete.
    pub async fn cleanup_expired(&self, limit: usize) -> Result<u64> {
        let expired = self.storage.list_expired_sessions(limit).await?;
        let mut cleaned = 0u64;
        for session in expired {
            if session.auto_commit && session.committed_at.is_none() {
                if let Err(e) = self.commit_session(&session.workspace_id, &session.id).await {
                    warn!(session_id = %session.id, error = %e, "auto-commit failed during cleanup");
                }
            }
            self.storage.delete_session(&session.workspace_id, &session.id).await?;
            cleaned += 1;
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StubHook {
        calls: AtomicU64,
    }

    #[async_trait]
    impl SessionCommitHook for StubHook {
        async fn commit(&self, _workspace_id: &str, _session: &Session, entries: &[WorkingMemoryEntry]) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(entries.len() as u64)
        }
    }

    async fn service() -> (SessionService, Arc<dyn Storage>) {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        (SessionService::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn create_and_get_session_round_trips() {
        let (svc, _storage) = service().await;
        let session = Session::new("t", "w", "_default", 3600);
        svc.create_session(session.clone()).await.unwrap();

        let fetched = svc.get_session("w", &session.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
    }

    #[tokio::test]
    async fn expired_session_is_auto_removed_on_get() {
        let (svc, _storage) = service().await;
        let session = Session::new("t", "w", "_default", -1);
        svc.create_session(session.clone()).await.unwrap();

        let fetched = svc.get_session("w", &session.id).await.unwrap();
        assert!(fetched.is_none());
        assert!(svc.list_sessions("w").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn touch_session_extends_expiry() {
        let (svc, _storage) = service().await;
        let session = Session::new("t", "w", "_default", 10);
        svc.create_session(session.clone()).await.unwrap();

        let touched = svc.touch_session("w", &session.id, Some(999)).await.unwrap();
        assert!(touched.expires_at > session.expires_at);
    }

    #[tokio::test]
    async fn set_working_memory_requires_live_session() {
        let (svc, _storage) = service().await;
        let result = svc
            .set_working_memory("w", "sess_does_not_exist", "k", serde_json::json!("v"), None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn set_and_get_working_memory_round_trips() {
        let (svc, _storage) = service().await;
        let session = Session::new("t", "w", "_default", 3600);
        svc.create_session(session.clone()).await.unwrap();

        svc.set_working_memory("w", &session.id, "plan", serde_json::json!({"step": 1}), None)
            .await
            .unwrap();

        let entry = svc.get_working_memory("w", &session.id, "plan").await.unwrap().unwrap();
        assert_eq!(entry.value, serde_json::json!({"step": 1}));

        let all = svc.get_all_working_memory("w", &session.id).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn commit_session_invokes_hook_and_marks_committed() {
        let (storage_svc, storage) = service().await;
        let hook = Arc::new(StubHook { calls: AtomicU64::new(0) });
        let svc = storage_svc.with_commit_hook(hook.clone());

        let session = Session::new("t", "w", "_default", 3600);
        svc.create_session(session.clone()).await.unwrap();
        svc.set_working_memory("w", &session.id, "k", serde_json::json!("v"), None)
            .await
            .unwrap();

        let result = svc.commit_session("w", &session.id).await.unwrap();
        assert_eq!(result.memories_committed, 1);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);

        let committed = storage.get_session("w", &session.id).await.unwrap().unwrap();
        assert!(committed.committed_at.is_some());
    }

    #[tokio::test]
    async fn cleanup_expired_deletes_and_attempts_commit() {
        let (storage_svc, storage) = service().await;
        let hook = Arc::new(StubHook { calls: AtomicU64::new(0) });
        let svc = storage_svc.with_commit_hook(hook.clone());

        let session = Session::new("t", "w", "_default", -1);
        storage.create_session(session.clone()).await.unwrap();

        let cleaned = svc.cleanup_expired(10).await.unwrap();
        assert_eq!(cleaned, 1);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        assert!(storage.get_session_by_id(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_briefing_reports_workspace_stats() {
        let (svc, storage) = service().await;
        let memory = Memory::new("t", "w", "_default", "hello", crate::types::MemoryType::Semantic);
        storage.create_memory(memory).await.unwrap();

        let briefing = svc.get_briefing("w", &BriefingOptions::default()).await.unwrap();
        assert_eq!(briefing.total_memories, 1);
    }
}
