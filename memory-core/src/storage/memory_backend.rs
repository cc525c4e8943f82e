//! In-memory [`Storage`] implementation.
//!
//! Used by the crate's own test suite and viable as a production backend
//! for single-process deployments. A single [`parking_lot::RwLock`] guards
//! all tables; because every operation here is a fast in-memory mutation
//! (no I/O, no lock held across an `.await`), this satisfies the same
//! atomicity the redb backend gets from a single write transaction.
//!
//! This is also where Open Question #1 (concurrent `remember` of identical
//! content) is resolved: the memory table and the `(workspace_id, hash)`
//! index are updated under the same lock acquisition, so two racing inserts
//! for the same content serialize and the second sees the first's row.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::embeddings::cosine_similarity;
use crate::error::{Error, Result};
use crate::types::{
    Association, ContradictionRecord, Context, Direction, Memory, MemoryStatus, Session,
    Workspace, WorkingMemoryEntry, DEFAULT_CONTEXT_ID, DEFAULT_WORKSPACE_ID, GLOBAL_WORKSPACE_ID,
};

use super::{
    age_days, memory_is_visible, ArchivalQuery, DecayQuery, GraphEdge, GraphPath, SearchFilters,
    Storage, WorkspaceStats,
};

#[derive(Default)]
struct Tables {
    workspaces: HashMap<(String, String), Workspace>,
    contexts: HashMap<(String, String), Context>,
    context_names: HashMap<(String, String), String>,
    memories: HashMap<String, Memory>,
    memory_by_hash: HashMap<(String, String), String>,
    associations: HashMap<String, Association>,
    association_triples: HashSet<(String, String, String, String)>,
    sessions: HashMap<String, Session>,
    working_memory: HashMap<(String, String), WorkingMemoryEntry>,
    contradictions: HashMap<String, ContradictionRecord>,
}

/// In-memory storage backend.
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        InMemoryStorage {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn ensure_reserved_entities(&self) -> Result<()> {
        let mut t = self.tables.write();
        for (tenant, ws_id) in [
            ("_system".to_string(), DEFAULT_WORKSPACE_ID.to_string()),
            ("_system".to_string(), GLOBAL_WORKSPACE_ID.to_string()),
        ] {
            t.workspaces
                .entry((tenant.clone(), ws_id.clone()))
                .or_insert_with(|| Workspace::new(tenant.clone(), ws_id.clone(), ws_id.clone()));
            t.contexts
                .entry((ws_id.clone(), DEFAULT_CONTEXT_ID.to_string()))
                .or_insert_with(|| Context::new(ws_id.clone(), DEFAULT_CONTEXT_ID, DEFAULT_CONTEXT_ID));
            t.context_names
                .entry((ws_id.clone(), DEFAULT_CONTEXT_ID.to_string()))
                .or_insert_with(|| DEFAULT_CONTEXT_ID.to_string());
        }
        Ok(())
    }

    async fn create_workspace(&self, workspace: Workspace) -> Result<()> {
        let mut t = self.tables.write();
        let key = (workspace.tenant_id.clone(), workspace.id.clone());
        t.contexts
            .entry((workspace.id.clone(), DEFAULT_CONTEXT_ID.to_string()))
            .or_insert_with(|| Context::new(workspace.id.clone(), DEFAULT_CONTEXT_ID, DEFAULT_CONTEXT_ID));
        t.workspaces.insert(key, workspace);
        Ok(())
    }

    async fn get_workspace(&self, tenant_id: &str, id: &str) -> Result<Option<Workspace>> {
        Ok(self
            .tables
            .read()
            .workspaces
            .get(&(tenant_id.to_string(), id.to_string()))
            .cloned())
    }

    async fn update_workspace(&self, workspace: Workspace) -> Result<()> {
        let mut t = self.tables.write();
        t.workspaces
            .insert((workspace.tenant_id.clone(), workspace.id.clone()), workspace);
        Ok(())
    }

    async fn list_all_workspace_ids(&self) -> Result<Vec<(String, String)>> {
        Ok(self.tables.read().workspaces.keys().cloned().collect())
    }

    async fn create_context(&self, context: Context) -> Result<()> {
        let mut t = self.tables.write();
        t.context_names
            .insert((context.workspace_id.clone(), context.name.clone()), context.id.clone());
        t.contexts
            .insert((context.workspace_id.clone(), context.id.clone()), context);
        Ok(())
    }

    async fn get_context(&self, workspace_id: &str, id: &str) -> Result<Option<Context>> {
        Ok(self
            .tables
            .read()
            .contexts
            .get(&(workspace_id.to_string(), id.to_string()))
            .cloned())
    }

    async fn get_context_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<Context>> {
        let t = self.tables.read();
        let Some(id) = t.context_names.get(&(workspace_id.to_string(), name.to_string())) else {
            return Ok(None);
        };
        Ok(t.contexts.get(&(workspace_id.to_string(), id.clone())).cloned())
    }

    async fn create_memory(&self, memory: Memory) -> Result<()> {
        let mut t = self.tables.write();
        let hash_key = (memory.workspace_id.clone(), memory.content_hash.clone());
        t.memory_by_hash.insert(hash_key, memory.id.clone());
        t.memories.insert(memory.id.clone(), memory);
        Ok(())
    }

    async fn get_memory(&self, workspace_id: &str, id: &str, track_access: bool) -> Result<Option<Memory>> {
        let mut t = self.tables.write();
        let Some(m) = t.memories.get(id) else {
            return Ok(None);
        };
        if m.workspace_id != workspace_id {
            return Ok(None);
        }
        if track_access {
            if let Some(m) = t.memories.get_mut(id) {
                m.access_count += 1;
                m.last_accessed_at = Some(Utc::now());
            }
        }
        Ok(t.memories.get(id).cloned())
    }

    async fn get_memory_by_id(&self, id: &str) -> Result<Option<Memory>> {
        Ok(self.tables.read().memories.get(id).cloned())
    }

    async fn get_memory_by_hash(&self, workspace_id: &str, hash: &str) -> Result<Option<Memory>> {
        let t = self.tables.read();
        let Some(id) = t.memory_by_hash.get(&(workspace_id.to_string(), hash.to_string())) else {
            return Ok(None);
        };
        Ok(t.memories.get(id).cloned())
    }

    async fn update_memory(&self, memory: Memory) -> Result<()> {
        let mut t = self.tables.write();
        let hash_key = (memory.workspace_id.clone(), memory.content_hash.clone());
        t.memory_by_hash.insert(hash_key, memory.id.clone());
        t.memories.insert(memory.id.clone(), memory);
        Ok(())
    }

    async fn soft_delete_memory(&self, workspace_id: &str, id: &str) -> Result<bool> {
        let mut t = self.tables.write();
        let Some(m) = t.memories.get_mut(id) else {
            return Ok(false);
        };
        if m.workspace_id != workspace_id {
            return Ok(false);
        }
        m.status = MemoryStatus::Deleted;
        m.deleted_at = Some(Utc::now());
        m.updated_at = Utc::now();
        Ok(true)
    }

    async fn hard_delete_memory(&self, workspace_id: &str, id: &str) -> Result<bool> {
        let mut t = self.tables.write();
        let Some(m) = t.memories.get(id) else {
            return Ok(false);
        };
        if m.workspace_id != workspace_id {
            return Ok(false);
        }
        let hash_key = (m.workspace_id.clone(), m.content_hash.clone());
        t.memories.remove(id);
        t.memory_by_hash.remove(&hash_key);
        t.associations
            .retain(|_, a| a.source_id != id && a.target_id != id);
        t.association_triples
            .retain(|(_, s, tgt, _)| s != id && tgt != id);
        Ok(true)
    }

    async fn search_memories(
        &self,
        workspace_id: &str,
        query_vec: &[f32],
        limit: usize,
        offset: usize,
        min_relevance: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<(Memory, f32)>> {
        let t = self.tables.read();
        let mut scored: Vec<(Memory, f32)> = t
            .memories
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .filter(|m| memory_is_visible(m, filters.include_archived))
            .filter(|m| {
                filters
                    .types
                    .as_ref()
                    .is_none_or(|types| types.contains(&m.memory_type))
            })
            .filter(|m| {
                filters.subtypes.as_ref().is_none_or(|subs| {
                    m.subtype.is_some_and(|s| subs.contains(&s))
                })
            })
            .filter(|m| {
                filters
                    .tags
                    .as_ref()
                    .is_none_or(|tags| tags.iter().any(|tag| m.tags.contains(tag)))
            })
            .filter_map(|m| {
                let embedding = m.embedding.as_ref()?;
                let relevance = cosine_similarity(query_vec, embedding);
                if relevance >= min_relevance {
                    Some((m.clone(), relevance))
                } else {
                    None
                }
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().skip(offset).take(limit).collect())
    }

    async fn full_text_search(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let needle = query.to_lowercase();
        let t = self.tables.read();
        let mut matches: Vec<Memory> = t
            .memories
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .filter(|m| memory_is_visible(m, false))
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_recent_memories(
        &self,
        workspace_id: &str,
        created_after: Option<chrono::DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let t = self.tables.read();
        let mut recent: Vec<Memory> = t
            .memories
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .filter(|m| memory_is_visible(m, false))
            .filter(|m| created_after.is_none_or(|after| m.created_at > after))
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(recent.into_iter().skip(offset).take(limit).collect())
    }

    async fn workspace_stats(&self, workspace_id: &str) -> Result<WorkspaceStats> {
        let t = self.tables.read();
        let mut stats = WorkspaceStats::default();
        for m in t.memories.values().filter(|m| m.workspace_id == workspace_id) {
            if memory_is_visible(m, true) {
                stats.total_memories += 1;
                *stats.by_type.entry(m.memory_type).or_insert(0) += 1;
            }
        }
        stats.total_associations = t
            .associations
            .values()
            .filter(|a| a.workspace_id == workspace_id)
            .count() as u64;
        stats.open_contradictions = t
            .contradictions
            .values()
            .filter(|c| c.workspace_id == workspace_id && c.is_unresolved())
            .count() as u64;
        Ok(stats)
    }

    async fn create_association(&self, association: Association) -> Result<()> {
        let mut t = self.tables.write();
        let triple = (
            association.workspace_id.clone(),
            association.source_id.clone(),
            association.target_id.clone(),
            association.relationship.clone(),
        );
        t.association_triples.insert(triple);
        t.associations.insert(association.id.clone(), association);
        Ok(())
    }

    async fn get_association(&self, workspace_id: &str, id: &str) -> Result<Option<Association>> {
        Ok(self
            .tables
            .read()
            .associations
            .get(id)
            .filter(|a| a.workspace_id == workspace_id)
            .cloned())
    }

    async fn association_exists(
        &self,
        workspace_id: &str,
        source_id: &str,
        target_id: &str,
        relationship: &str,
    ) -> Result<bool> {
        let triple = (
            workspace_id.to_string(),
            source_id.to_string(),
            target_id.to_string(),
            relationship.to_string(),
        );
        Ok(self.tables.read().association_triples.contains(&triple))
    }

    async fn get_related(
        &self,
        workspace_id: &str,
        memory_id: &str,
        relationships: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<Association>> {
        let t = self.tables.read();
        Ok(t.associations
            .values()
            .filter(|a| a.workspace_id == workspace_id)
            .filter(|a| match direction {
                Direction::Outgoing => a.source_id == memory_id,
                Direction::Incoming => a.target_id == memory_id,
                Direction::Both => a.source_id == memory_id || a.target_id == memory_id,
            })
            .filter(|a| {
                relationships.is_none_or(|rels| rels.contains(&a.relationship))
            })
            .cloned()
            .collect())
    }

    async fn traverse_graph(
        &self,
        workspace_id: &str,
        start_id: &str,
        max_depth: usize,
        relationships: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<GraphPath>> {
        let t = self.tables.read();
        let Some(start) = t.memories.get(start_id).cloned() else {
            return Ok(Vec::new());
        };

        let mut paths = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(start_id.to_string());

        let mut frontier: Vec<GraphPath> = vec![GraphPath {
            nodes: vec![start],
            edges: Vec::new(),
            total_strength: 1.0,
            depth: 0,
        }];

        for _ in 0..max_depth {
            let mut next_frontier = Vec::new();
            for path in &frontier {
                let current_id = path.nodes.last().unwrap().id.clone();
                let edges: Vec<&Association> = t
                    .associations
                    .values()
                    .filter(|a| a.workspace_id == workspace_id)
                    .filter(|a| match direction {
                        Direction::Outgoing => a.source_id == current_id,
                        Direction::Incoming => a.target_id == current_id,
                        Direction::Both => a.source_id == current_id || a.target_id == current_id,
                    })
                    .filter(|a| relationships.is_none_or(|rels| rels.contains(&a.relationship)))
                    .collect();

                for edge in edges {
                    let next_id = if edge.source_id == current_id {
                        &edge.target_id
                    } else {
                        &edge.source_id
                    };
                    if visited.contains(next_id) {
                        continue;
                    }
                    let Some(next_memory) = t.memories.get(next_id) else {
                        continue;
                    };
                    visited.insert(next_id.clone());
                    let mut new_path = path.clone();
                    new_path.nodes.push(next_memory.clone());
                    new_path.edges.push(GraphEdge {
                        association: edge.clone(),
                    });
                    new_path.total_strength *= edge.strength;
                    new_path.depth += 1;
                    next_frontier.push(new_path.clone());
                    paths.push(new_path);
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        Ok(paths)
    }

    async fn create_session(&self, session: Session) -> Result<()> {
        let mut t = self.tables.write();
        t.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, workspace_id: &str, id: &str) -> Result<Option<Session>> {
        Ok(self
            .tables
            .read()
            .sessions
            .get(id)
            .filter(|s| s.workspace_id == workspace_id)
            .cloned())
    }

    async fn get_session_by_id(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.tables.read().sessions.get(id).cloned())
    }

    async fn update_session(&self, session: Session) -> Result<()> {
        let mut t = self.tables.write();
        t.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete_session(&self, workspace_id: &str, id: &str) -> Result<bool> {
        let mut t = self.tables.write();
        let Some(s) = t.sessions.get(id) else {
            return Ok(false);
        };
        if s.workspace_id != workspace_id {
            return Ok(false);
        }
        t.sessions.remove(id);
        t.working_memory.retain(|(sid, _), _| sid != id);
        Ok(true)
    }

    async fn list_sessions(&self, workspace_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .tables
            .read()
            .sessions
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn list_expired_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        Ok(self
            .tables
            .read()
            .sessions
            .values()
            .filter(|s| s.is_expired())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn cleanup_all_expired_sessions(&self) -> Result<u64> {
        let mut t = self.tables.write();
        let expired: Vec<String> = t
            .sessions
            .values()
            .filter(|s| s.is_expired())
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            t.sessions.remove(id);
            t.working_memory.retain(|(sid, _), _| sid != id);
        }
        Ok(expired.len() as u64)
    }

    async fn set_working_memory(&self, entry: WorkingMemoryEntry) -> Result<()> {
        let mut t = self.tables.write();
        t.working_memory
            .insert((entry.session_id.clone(), entry.key.clone()), entry);
        Ok(())
    }

    async fn get_working_memory(&self, session_id: &str, key: &str) -> Result<Option<WorkingMemoryEntry>> {
        Ok(self
            .tables
            .read()
            .working_memory
            .get(&(session_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn get_all_working_memory(&self, session_id: &str) -> Result<Vec<WorkingMemoryEntry>> {
        Ok(self
            .tables
            .read()
            .working_memory
            .values()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn create_contradiction(&self, record: ContradictionRecord) -> Result<()> {
        let mut t = self.tables.write();
        t.contradictions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_contradiction(&self, workspace_id: &str, id: &str) -> Result<Option<ContradictionRecord>> {
        Ok(self
            .tables
            .read()
            .contradictions
            .get(id)
            .filter(|c| c.workspace_id == workspace_id)
            .cloned())
    }

    async fn update_contradiction(&self, record: ContradictionRecord) -> Result<()> {
        let mut t = self.tables.write();
        t.contradictions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_unresolved_contradictions(
        &self,
        workspace_id: &str,
        limit: usize,
    ) -> Result<Vec<ContradictionRecord>> {
        Ok(self
            .tables
            .read()
            .contradictions
            .values()
            .filter(|c| c.workspace_id == workspace_id && c.is_unresolved())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_memories_for_decay(&self, workspace_id: &str, query: &DecayQuery) -> Result<Vec<Memory>> {
        Ok(self
            .tables
            .read()
            .memories
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .filter(|m| m.status == MemoryStatus::Active)
            .filter(|m| !query.exclude_pinned || !m.pinned)
            .filter(|m| age_days(m.created_at) >= query.min_age_days)
            .cloned()
            .collect())
    }

    async fn get_archival_candidates(&self, workspace_id: &str, query: &ArchivalQuery) -> Result<Vec<Memory>> {
        Ok(self
            .tables
            .read()
            .memories
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .filter(|m| m.status == MemoryStatus::Active)
            .filter(|m| !m.pinned)
            .filter(|m| m.importance <= query.max_importance)
            .filter(|m| m.access_count <= query.max_access_count)
            .filter(|m| age_days(m.created_at) >= query.min_age_days)
            .cloned()
            .collect())
    }
}

/// Convenience constructor failure surface: returns `Err` only if the
/// underlying lock is poisoned, which cannot happen with `parking_lot`.
/// Kept for symmetry with fallible backends (e.g. redb open failures).
pub async fn open_in_memory() -> Result<InMemoryStorage> {
    let storage = InMemoryStorage::new();
    storage.ensure_reserved_entities().await.map_err(|e| Error::Storage(e.to_string()))?;
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Memory, MemoryType};

    async fn storage() -> InMemoryStorage {
        let s = InMemoryStorage::new();
        s.ensure_reserved_entities().await.unwrap();
        s
    }

    #[tokio::test]
    async fn ensure_reserved_entities_is_idempotent() {
        let s = storage().await;
        s.ensure_reserved_entities().await.unwrap();
        s.ensure_reserved_entities().await.unwrap();
        let ws = s.get_workspace("_system", DEFAULT_WORKSPACE_ID).await.unwrap();
        assert!(ws.is_some());
    }

    #[tokio::test]
    async fn hash_lookup_is_present_after_create() {
        let s = storage().await;
        let m = Memory::new("t", "w", "_default", "hello", MemoryType::Semantic);
        let hash = m.content_hash.clone();
        s.create_memory(m.clone()).await.unwrap();
        let found = s.get_memory_by_hash("w", &hash).await.unwrap().unwrap();
        assert_eq!(found.id, m.id);
    }

    #[tokio::test]
    async fn track_access_increments_exactly_once() {
        let s = storage().await;
        let m = Memory::new("t", "w", "_default", "hello", MemoryType::Semantic);
        s.create_memory(m.clone()).await.unwrap();
        let got = s.get_memory("w", &m.id, true).await.unwrap().unwrap();
        assert_eq!(got.access_count, 1);
        let got2 = s.get_memory("w", &m.id, false).await.unwrap().unwrap();
        assert_eq!(got2.access_count, 1);
    }

    #[tokio::test]
    async fn hard_delete_purges_memory_and_associations() {
        let s = storage().await;
        let a = Memory::new("t", "w", "_default", "a", MemoryType::Semantic);
        let b = Memory::new("t", "w", "_default", "b", MemoryType::Semantic);
        s.create_memory(a.clone()).await.unwrap();
        s.create_memory(b.clone()).await.unwrap();
        s.create_association(Association::new("w", &a.id, &b.id, "related_to", 0.5))
            .await
            .unwrap();
        assert!(s.hard_delete_memory("w", &a.id).await.unwrap());
        assert!(s.get_memory_by_id(&a.id).await.unwrap().is_none());
        let related = s.get_related("w", &b.id, None, Direction::Both).await.unwrap();
        assert!(related.is_empty());
    }

    #[tokio::test]
    async fn traverse_graph_terminates_on_cycles_and_never_repeats_a_node() {
        let s = storage().await;
        let a = Memory::new("t", "w", "_default", "a", MemoryType::Semantic);
        let b = Memory::new("t", "w", "_default", "b", MemoryType::Semantic);
        let c = Memory::new("t", "w", "_default", "c", MemoryType::Semantic);
        for m in [&a, &b, &c] {
            s.create_memory(m.clone()).await.unwrap();
        }
        s.create_association(Association::new("w", &a.id, &b.id, "related_to", 0.8))
            .await
            .unwrap();
        s.create_association(Association::new("w", &b.id, &c.id, "related_to", 0.9))
            .await
            .unwrap();
        s.create_association(Association::new("w", &c.id, &a.id, "related_to", 0.7))
            .await
            .unwrap();

        let paths = s
            .traverse_graph("w", &a.id, 5, None, Direction::Outgoing)
            .await
            .unwrap();
        for path in &paths {
            let mut ids: Vec<&str> = path.nodes.iter().map(|n| n.id.as_str()).collect();
            let before = ids.len();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(before, ids.len(), "a path revisited a node");
        }
    }

    #[tokio::test]
    async fn search_memories_orders_by_descending_relevance() {
        let s = storage().await;
        let mut a = Memory::new("t", "w", "_default", "a", MemoryType::Semantic);
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = Memory::new("t", "w", "_default", "b", MemoryType::Semantic);
        b.embedding = Some(vec![0.0, 1.0]);
        s.create_memory(a.clone()).await.unwrap();
        s.create_memory(b.clone()).await.unwrap();

        let results = s
            .search_memories("w", &[1.0, 0.0], 10, 0, 0.0, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results[0].0.id, a.id);
        assert!(results[0].1 >= results[1].1);
    }
}
