//! Periodic importance decay and archival.

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::storage::{ArchivalQuery, DecayQuery, Storage};
use crate::types::Memory;

/// Tunables for a decay/archival pass.
#[derive(Debug, Clone, Copy)]
pub struct DecayPolicy {
    /// Multiplied into `importance` for every eligible memory.
    pub decay_rate: f32,
    /// Minimum age in days before a memory is eligible for decay or archival.
    pub min_age_days: i64,
    /// Archive memories at or below this importance.
    pub archive_max_importance: f32,
    /// Archive memories at or below this access count.
    pub archive_max_access_count: u64,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        DecayPolicy {
            decay_rate: 0.01,
            min_age_days: 30,
            archive_max_importance: 0.2,
            archive_max_access_count: 1,
        }
    }
}

/// Outcome of a single-workspace decay pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayResult {
    pub decayed: u64,
}

/// Outcome of [`DecayService::decay_all_workspaces`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AllWorkspacesDecayResult {
    pub processed: u64,
    pub decayed: u64,
    pub archived: u64,
}

/// Applies importance decay and archival across workspaces.
pub struct DecayService {
    storage: Arc<dyn Storage>,
    policy: DecayPolicy,
}

impl DecayService {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, policy: DecayPolicy) -> Self {
        DecayService { storage, policy }
    }

    /// List non-pinned active memories older than `min_age_days`, multiply
    /// `importance` by `1 - decay_rate` and persist.
    pub async fn decay_workspace(&self, workspace_id: &str) -> Result<DecayResult> {
        let query = DecayQuery {
            min_age_days: self.policy.min_age_days,
            exclude_pinned: true,
        };
        let candidates = self.storage.get_memories_for_decay(workspace_id, &query).await?;

        let mut decayed = 0u64;
        for mut memory in candidates {
            memory.importance = (memory.importance * (1.0 - self.policy.decay_rate)).max(0.0);
            memory.updated_at = chrono::Utc::now();
            self.storage.update_memory(memory).await?;
            decayed += 1;
        }

        info!(workspace_id, decayed, "decay pass complete");
        Ok(DecayResult { decayed })
    }

    /// Archive memories at or below the importance/access thresholds that
    /// are old enough and not pinned.
    pub async fn archive_stale_memories(&self, workspace_id: &str) -> Result<u64> {
        let query = ArchivalQuery {
            max_importance: self.policy.archive_max_importance,
            max_access_count: self.policy.archive_max_access_count,
            min_age_days: self.policy.min_age_days,
        };
        let candidates = self.storage.get_archival_candidates(workspace_id, &query).await?;

        let mut archived = 0u64;
        for mut memory in candidates {
            if memory.pinned {
                continue;
            }
            memory.status = crate::types::MemoryStatus::Archived;
            memory.updated_at = chrono::Utc::now();
            self.storage.update_memory(memory).await?;
            archived += 1;
        }

        info!(workspace_id, archived, "archival pass complete");
        Ok(archived)
    }

    /// Run decay, then archival, across every known workspace.
    pub async fn decay_all_workspaces(&self) -> Result<AllWorkspacesDecayResult> {
        let workspace_ids = self.storage.list_all_workspace_ids().await?;
        let mut result = AllWorkspacesDecayResult::default();

        for (_tenant_id, workspace_id) in workspace_ids {
            let decay = self.decay_workspace(&workspace_id).await?;
            let archived = self.archive_stale_memories(&workspace_id).await?;
            result.processed += 1;
            result.decayed += decay.decayed;
            result.archived += archived;
        }

        info!(
            processed = result.processed,
            decayed = result.decayed,
            archived = result.archived,
            "decay pass complete across all workspaces"
        );
        Ok(result)
    }
}

/// Pure function: the new importance after an access event, bounded at 1.0
///.
#[must_use]
pub fn calculate_access_boost(memory: &Memory, boost: f32) -> f32 {
    (memory.importance + boost).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::{Memory, MemoryType};

    fn old_memory(importance: f32, access_count: u64, pinned: bool) -> Memory {
        let mut m = Memory::new("t", "w", "_default", "x", MemoryType::Semantic);
        m.importance = importance;
        m.access_count = access_count;
        m.pinned = pinned;
        m.created_at = chrono::Utc::now() - chrono::Duration::days(90);
        m.updated_at = m.created_at;
        m
    }

    #[tokio::test]
    async fn decay_workspace_reduces_importance_of_eligible_memories() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        let memory = old_memory(0.8, 5, false);
        let id = memory.id.clone();
        storage.create_memory(memory).await.unwrap();

        let service = DecayService::new(storage.clone(), DecayPolicy::default());
        let result = service.decay_workspace("w").await.unwrap();
        assert_eq!(result.decayed, 1);

        let after = storage.get_memory("w", &id, false).await.unwrap().unwrap();
        assert!(after.importance < 0.8);
    }

    #[tokio::test]
    async fn archive_stale_memories_skips_pinned() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        let pinned = old_memory(0.05, 0, true);
        let pinned_id = pinned.id.clone();
        let unpinned = old_memory(0.05, 0, false);
        let unpinned_id = unpinned.id.clone();
        storage.create_memory(pinned).await.unwrap();
        storage.create_memory(unpinned).await.unwrap();

        let service = DecayService::new(storage.clone(), DecayPolicy::default());
        let archived = service.archive_stale_memories("w").await.unwrap();
        assert_eq!(archived, 1);

        let pinned_after = storage.get_memory("w", &pinned_id, false).await.unwrap().unwrap();
        assert_eq!(pinned_after.status, crate::types::MemoryStatus::Active);
        let unpinned_after = storage.get_memory("w", &unpinned_id, false).await.unwrap().unwrap();
        assert_eq!(unpinned_after.status, crate::types::MemoryStatus::Archived);
    }

    #[test]
    fn access_boost_is_bounded_at_one() {
        let mut m = Memory::new("t", "w", "_default", "x", MemoryType::Semantic);
        m.importance = 0.95;
        assert!((calculate_access_boost(&m, 0.5) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn access_boost_adds_when_not_saturated() {
        let mut m = Memory::new("t", "w", "_default", "x", MemoryType::Semantic);
        m.importance = 0.3;
        assert!((calculate_access_boost(&m, 0.1) - 0.4).abs() < 1e-6);
    }
}
