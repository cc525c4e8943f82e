//! [`Storage`] implementation backed by redb tables.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::ReadableTable;
use tracing::debug;

use memory_core::error::{Error, Result};
use memory_core::storage::{
    age_days, memory_is_visible, ArchivalQuery, DecayQuery, GraphPath, SearchFilters, Storage,
    WorkspaceStats,
};
use memory_core::types::{
    Association, ContradictionRecord, Context, Direction, Memory, MemoryStatus, Session,
    Workspace, WorkingMemoryEntry, DEFAULT_CONTEXT_ID, DEFAULT_WORKSPACE_ID, GLOBAL_WORKSPACE_ID,
};

use crate::search;
use crate::tables::{
    composite_key, ASSOCIATIONS_TABLE, ASSOCIATION_TRIPLES_TABLE, CONTEXTS_TABLE,
    CONTEXT_NAMES_TABLE, CONTRADICTIONS_TABLE, MEMORIES_TABLE, MEMORY_BY_HASH_TABLE,
    SESSIONS_TABLE, WORKING_MEMORY_TABLE, WORKSPACES_TABLE,
};
use crate::{postcard_decode, postcard_encode, with_db_timeout, RedbStorage};

fn storage_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Storage(format!("{context}: {e}"))
}

#[async_trait]
impl Storage for RedbStorage {
    async fn ensure_reserved_entities(&self) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            {
                let mut workspaces = write_txn
                    .open_table(WORKSPACES_TABLE)
                    .map_err(|e| storage_err("open workspaces", e))?;
                let mut contexts = write_txn
                    .open_table(CONTEXTS_TABLE)
                    .map_err(|e| storage_err("open contexts", e))?;
                let mut context_names = write_txn
                    .open_table(CONTEXT_NAMES_TABLE)
                    .map_err(|e| storage_err("open context_names", e))?;

                for ws_id in [DEFAULT_WORKSPACE_ID, GLOBAL_WORKSPACE_ID] {
                    let ws_key = composite_key(&["_system", ws_id]);
                    if workspaces
                        .get(ws_key.as_str())
                        .map_err(|e| storage_err("get workspace", e))?
                        .is_none()
                    {
                        let workspace = Workspace::new("_system", ws_id, ws_id);
                        let bytes = postcard_encode(&workspace, "workspace")?;
                        workspaces
                            .insert(ws_key.as_str(), bytes.as_slice())
                            .map_err(|e| storage_err("insert workspace", e))?;
                    }

                    let ctx_key = composite_key(&[ws_id, DEFAULT_CONTEXT_ID]);
                    if contexts
                        .get(ctx_key.as_str())
                        .map_err(|e| storage_err("get context", e))?
                        .is_none()
                    {
                        let context = Context::new(ws_id, DEFAULT_CONTEXT_ID, DEFAULT_CONTEXT_ID);
                        let bytes = postcard_encode(&context, "context")?;
                        contexts
                            .insert(ctx_key.as_str(), bytes.as_slice())
                            .map_err(|e| storage_err("insert context", e))?;
                        let name_key = composite_key(&[ws_id, DEFAULT_CONTEXT_ID]);
                        context_names
                            .insert(name_key.as_str(), DEFAULT_CONTEXT_ID.as_bytes())
                            .map_err(|e| storage_err("insert context name", e))?;
                    }
                }
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn create_workspace(&self, workspace: Workspace) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            {
                let mut contexts = write_txn
                    .open_table(CONTEXTS_TABLE)
                    .map_err(|e| storage_err("open contexts", e))?;
                let ctx_key = composite_key(&[&workspace.id, DEFAULT_CONTEXT_ID]);
                if contexts
                    .get(ctx_key.as_str())
                    .map_err(|e| storage_err("get context", e))?
                    .is_none()
                {
                    let context = Context::new(&workspace.id, DEFAULT_CONTEXT_ID, DEFAULT_CONTEXT_ID);
                    let bytes = postcard_encode(&context, "context")?;
                    contexts
                        .insert(ctx_key.as_str(), bytes.as_slice())
                        .map_err(|e| storage_err("insert context", e))?;

                    let mut context_names = write_txn
                        .open_table(CONTEXT_NAMES_TABLE)
                        .map_err(|e| storage_err("open context_names", e))?;
                    let name_key = composite_key(&[&workspace.id, DEFAULT_CONTEXT_ID]);
                    context_names
                        .insert(name_key.as_str(), DEFAULT_CONTEXT_ID.as_bytes())
                        .map_err(|e| storage_err("insert context name", e))?;
                }

                let mut workspaces = write_txn
                    .open_table(WORKSPACES_TABLE)
                    .map_err(|e| storage_err("open workspaces", e))?;
                let ws_key = composite_key(&[&workspace.tenant_id, &workspace.id]);
                let bytes = postcard_encode(&workspace, "workspace")?;
                workspaces
                    .insert(ws_key.as_str(), bytes.as_slice())
                    .map_err(|e| storage_err("insert workspace", e))?;
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn get_workspace(&self, tenant_id: &str, id: &str) -> Result<Option<Workspace>> {
        let db = Arc::clone(&self.db);
        let key = composite_key(&[tenant_id, id]);
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(WORKSPACES_TABLE)
                .map_err(|e| storage_err("open workspaces", e))?;
            match table.get(key.as_str()).map_err(|e| storage_err("get workspace", e))? {
                Some(v) => Ok(Some(postcard_decode(v.value(), "workspace")?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn update_workspace(&self, workspace: Workspace) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            {
                let mut workspaces = write_txn
                    .open_table(WORKSPACES_TABLE)
                    .map_err(|e| storage_err("open workspaces", e))?;
                let key = composite_key(&[&workspace.tenant_id, &workspace.id]);
                let bytes = postcard_encode(&workspace, "workspace")?;
                workspaces
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| storage_err("insert workspace", e))?;
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn list_all_workspace_ids(&self) -> Result<Vec<(String, String)>> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(WORKSPACES_TABLE)
                .map_err(|e| storage_err("open workspaces", e))?;
            let mut ids = Vec::new();
            for entry in table.iter().map_err(|e| storage_err("iterate workspaces", e))? {
                let (_, v) = entry.map_err(|e| storage_err("read workspace entry", e))?;
                let workspace: Workspace = postcard_decode(v.value(), "workspace")?;
                ids.push((workspace.tenant_id, workspace.id));
            }
            Ok(ids)
        })
        .await
    }

    async fn create_context(&self, context: Context) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            {
                let mut contexts = write_txn
                    .open_table(CONTEXTS_TABLE)
                    .map_err(|e| storage_err("open contexts", e))?;
                let key = composite_key(&[&context.workspace_id, &context.id]);
                let bytes = postcard_encode(&context, "context")?;
                contexts
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| storage_err("insert context", e))?;

                let mut context_names = write_txn
                    .open_table(CONTEXT_NAMES_TABLE)
                    .map_err(|e| storage_err("open context_names", e))?;
                let name_key = composite_key(&[&context.workspace_id, &context.name]);
                context_names
                    .insert(name_key.as_str(), context.id.as_bytes())
                    .map_err(|e| storage_err("insert context name", e))?;
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn get_context(&self, workspace_id: &str, id: &str) -> Result<Option<Context>> {
        let db = Arc::clone(&self.db);
        let key = composite_key(&[workspace_id, id]);
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(CONTEXTS_TABLE)
                .map_err(|e| storage_err("open contexts", e))?;
            match table.get(key.as_str()).map_err(|e| storage_err("get context", e))? {
                Some(v) => Ok(Some(postcard_decode(v.value(), "context")?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn get_context_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<Context>> {
        let db = Arc::clone(&self.db);
        let name_key = composite_key(&[workspace_id, name]);
        let workspace_id = workspace_id.to_string();
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let names = read_txn
                .open_table(CONTEXT_NAMES_TABLE)
                .map_err(|e| storage_err("open context_names", e))?;
            let Some(id_bytes) = names
                .get(name_key.as_str())
                .map_err(|e| storage_err("get context name", e))?
            else {
                return Ok(None);
            };
            let id = String::from_utf8_lossy(id_bytes.value()).to_string();
            let contexts = read_txn
                .open_table(CONTEXTS_TABLE)
                .map_err(|e| storage_err("open contexts", e))?;
            let key = composite_key(&[&workspace_id, &id]);
            match contexts
                .get(key.as_str())
                .map_err(|e| storage_err("get context", e))?
            {
                Some(v) => Ok(Some(postcard_decode(v.value(), "context")?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn create_memory(&self, memory: Memory) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            insert_memory_and_hash_index(&write_txn, &memory)?;
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn get_memory(&self, workspace_id: &str, id: &str, track_access: bool) -> Result<Option<Memory>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let id = id.to_string();
        if !track_access {
            return with_db_timeout(move || {
                let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
                let table = read_txn
                    .open_table(MEMORIES_TABLE)
                    .map_err(|e| storage_err("open memories", e))?;
                match table.get(id.as_str()).map_err(|e| storage_err("get memory", e))? {
                    Some(v) => {
                        let memory: Memory = postcard_decode(v.value(), "memory")?;
                        if memory.workspace_id != workspace_id {
                            return Ok(None);
                        }
                        Ok(Some(memory))
                    }
                    None => Ok(None),
                }
            })
            .await;
        }

        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            let updated = {
                let mut table = write_txn
                    .open_table(MEMORIES_TABLE)
                    .map_err(|e| storage_err("open memories", e))?;
                let Some(v) = table.get(id.as_str()).map_err(|e| storage_err("get memory", e))? else {
                    return Ok(None);
                };
                let mut memory: Memory = postcard_decode(v.value(), "memory")?;
                drop(v);
                if memory.workspace_id != workspace_id {
                    return Ok(None);
                }
                memory.access_count += 1;
                memory.last_accessed_at = Some(Utc::now());
                let bytes = postcard_encode(&memory, "memory")?;
                table
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(|e| storage_err("insert memory", e))?;
                Some(memory)
            };
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(updated)
        })
        .await
    }

    async fn get_memory_by_id(&self, id: &str) -> Result<Option<Memory>> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(MEMORIES_TABLE)
                .map_err(|e| storage_err("open memories", e))?;
            match table.get(id.as_str()).map_err(|e| storage_err("get memory", e))? {
                Some(v) => Ok(Some(postcard_decode(v.value(), "memory")?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn get_memory_by_hash(&self, workspace_id: &str, hash: &str) -> Result<Option<Memory>> {
        let db = Arc::clone(&self.db);
        let key = composite_key(&[workspace_id, hash]);
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let hash_index = read_txn
                .open_table(MEMORY_BY_HASH_TABLE)
                .map_err(|e| storage_err("open memory_by_hash", e))?;
            let Some(id_bytes) = hash_index
                .get(key.as_str())
                .map_err(|e| storage_err("get hash index", e))?
            else {
                return Ok(None);
            };
            let id = String::from_utf8_lossy(id_bytes.value()).to_string();
            let memories = read_txn
                .open_table(MEMORIES_TABLE)
                .map_err(|e| storage_err("open memories", e))?;
            match memories.get(id.as_str()).map_err(|e| storage_err("get memory", e))? {
                Some(v) => Ok(Some(postcard_decode(v.value(), "memory")?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn update_memory(&self, memory: Memory) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            insert_memory_and_hash_index(&write_txn, &memory)?;
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn soft_delete_memory(&self, workspace_id: &str, id: &str) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let id = id.to_string();
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            let found = {
                let mut table = write_txn
                    .open_table(MEMORIES_TABLE)
                    .map_err(|e| storage_err("open memories", e))?;
                let Some(v) = table.get(id.as_str()).map_err(|e| storage_err("get memory", e))? else {
                    return Ok(false);
                };
                let mut memory: Memory = postcard_decode(v.value(), "memory")?;
                drop(v);
                if memory.workspace_id != workspace_id {
                    return Ok(false);
                }
                let now = Utc::now();
                memory.status = MemoryStatus::Deleted;
                memory.deleted_at = Some(now);
                memory.updated_at = now;
                let bytes = postcard_encode(&memory, "memory")?;
                table
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(|e| storage_err("insert memory", e))?;
                true
            };
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(found)
        })
        .await
    }

    async fn hard_delete_memory(&self, workspace_id: &str, id: &str) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let id = id.to_string();
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            let found = {
                let hash_key = {
                    let memories = write_txn
                        .open_table(MEMORIES_TABLE)
                        .map_err(|e| storage_err("open memories", e))?;
                    let Some(v) = memories.get(id.as_str()).map_err(|e| storage_err("get memory", e))? else {
                        return Ok(false);
                    };
                    let memory: Memory = postcard_decode(v.value(), "memory")?;
                    if memory.workspace_id != workspace_id {
                        return Ok(false);
                    }
                    composite_key(&[&memory.workspace_id, &memory.content_hash])
                };

                let mut memories = write_txn
                    .open_table(MEMORIES_TABLE)
                    .map_err(|e| storage_err("open memories", e))?;
                memories
                    .remove(id.as_str())
                    .map_err(|e| storage_err("remove memory", e))?;
                drop(memories);

                let mut hash_index = write_txn
                    .open_table(MEMORY_BY_HASH_TABLE)
                    .map_err(|e| storage_err("open memory_by_hash", e))?;
                hash_index
                    .remove(hash_key.as_str())
                    .map_err(|e| storage_err("remove hash index", e))?;
                drop(hash_index);

                purge_associations_touching(&write_txn, &id)?;
                true
            };
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(found)
        })
        .await
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
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let query_vec = query_vec.to_vec();
        let filters = filters.clone();
        with_db_timeout(move || {
            let all = load_all_memories(&db)?;
            Ok(search::search_and_score(
                &all,
                &workspace_id,
                &query_vec,
                limit,
                offset,
                min_relevance,
                &filters,
            ))
        })
        .await
    }

    async fn full_text_search(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let needle = query.to_lowercase();
        with_db_timeout(move || {
            let all = load_all_memories(&db)?;
            let mut matches: Vec<Memory> = all
                .into_iter()
                .filter(|m| m.workspace_id == workspace_id)
                .filter(|m| memory_is_visible(m, false))
                .filter(|m| m.content.to_lowercase().contains(&needle))
                .collect();
            matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(matches.into_iter().skip(offset).take(limit).collect())
        })
        .await
    }

    async fn get_recent_memories(
        &self,
        workspace_id: &str,
        created_after: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        with_db_timeout(move || {
            let all = load_all_memories(&db)?;
            let mut recent: Vec<Memory> = all
                .into_iter()
                .filter(|m| m.workspace_id == workspace_id)
                .filter(|m| memory_is_visible(m, false))
                .filter(|m| created_after.is_none_or(|after| m.created_at > after))
                .collect();
            recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(recent.into_iter().skip(offset).take(limit).collect())
        })
        .await
    }

    async fn workspace_stats(&self, workspace_id: &str) -> Result<WorkspaceStats> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        with_db_timeout(move || {
            let mut stats = WorkspaceStats::default();
            for m in load_all_memories(&db)?
                .iter()
                .filter(|m| m.workspace_id == workspace_id)
            {
                if memory_is_visible(m, true) {
                    stats.total_memories += 1;
                    *stats.by_type.entry(m.memory_type).or_insert(0) += 1;
                }
            }
            let all_assoc = load_all_associations(&db)?;
            stats.total_associations = all_assoc
                .iter()
                .filter(|a| a.workspace_id == workspace_id)
                .count() as u64;
            let all_contradictions = load_all_contradictions(&db)?;
            stats.open_contradictions = all_contradictions
                .iter()
                .filter(|c| c.workspace_id == workspace_id && c.is_unresolved())
                .count() as u64;
            Ok(stats)
        })
        .await
    }

    async fn create_association(&self, association: Association) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            {
                let mut associations = write_txn
                    .open_table(ASSOCIATIONS_TABLE)
                    .map_err(|e| storage_err("open associations", e))?;
                let bytes = postcard_encode(&association, "association")?;
                associations
                    .insert(association.id.as_str(), bytes.as_slice())
                    .map_err(|e| storage_err("insert association", e))?;

                let mut triples = write_txn
                    .open_table(ASSOCIATION_TRIPLES_TABLE)
                    .map_err(|e| storage_err("open association_triples", e))?;
                let triple_key = composite_key(&[
                    &association.workspace_id,
                    &association.source_id,
                    &association.target_id,
                    &association.relationship,
                ]);
                triples
                    .insert(triple_key.as_str(), &[][..])
                    .map_err(|e| storage_err("insert association triple", e))?;
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn get_association(&self, workspace_id: &str, id: &str) -> Result<Option<Association>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let id = id.to_string();
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(ASSOCIATIONS_TABLE)
                .map_err(|e| storage_err("open associations", e))?;
            match table.get(id.as_str()).map_err(|e| storage_err("get association", e))? {
                Some(v) => {
                    let association: Association = postcard_decode(v.value(), "association")?;
                    if association.workspace_id != workspace_id {
                        return Ok(None);
                    }
                    Ok(Some(association))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn association_exists(
        &self,
        workspace_id: &str,
        source_id: &str,
        target_id: &str,
        relationship: &str,
    ) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let key = composite_key(&[workspace_id, source_id, target_id, relationship]);
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(ASSOCIATION_TRIPLES_TABLE)
                .map_err(|e| storage_err("open association_triples", e))?;
            Ok(table
                .get(key.as_str())
                .map_err(|e| storage_err("get association triple", e))?
                .is_some())
        })
        .await
    }

    async fn get_related(
        &self,
        workspace_id: &str,
        memory_id: &str,
        relationships: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<Association>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let memory_id = memory_id.to_string();
        let relationships = relationships.map(<[String]>::to_vec);
        with_db_timeout(move || {
            let all = load_all_associations(&db)?;
            Ok(all
                .into_iter()
                .filter(|a| a.workspace_id == workspace_id)
                .filter(|a| match direction {
                    Direction::Outgoing => a.source_id == memory_id,
                    Direction::Incoming => a.target_id == memory_id,
                    Direction::Both => a.source_id == memory_id || a.target_id == memory_id,
                })
                .filter(|a| {
                    relationships
                        .as_deref()
                        .is_none_or(|rels| rels.contains(&a.relationship))
                })
                .collect())
        })
        .await
    }

    async fn traverse_graph(
        &self,
        workspace_id: &str,
        start_id: &str,
        max_depth: usize,
        relationships: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<GraphPath>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let start_id = start_id.to_string();
        let relationships = relationships.map(<[String]>::to_vec);
        with_db_timeout(move || {
            let memories = load_all_memories(&db)?;
            let memories_by_id: HashMap<String, Memory> =
                memories.into_iter().map(|m| (m.id.clone(), m)).collect();
            let Some(start) = memories_by_id.get(&start_id).cloned() else {
                return Ok(Vec::new());
            };
            let associations = load_all_associations(&db)?;
            Ok(search::traverse(
                start,
                &memories_by_id,
                &associations,
                &workspace_id,
                max_depth,
                relationships.as_deref(),
                direction,
            ))
        })
        .await
    }

    async fn create_session(&self, session: Session) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            {
                let mut table = write_txn
                    .open_table(SESSIONS_TABLE)
                    .map_err(|e| storage_err("open sessions", e))?;
                let bytes = postcard_encode(&session, "session")?;
                table
                    .insert(session.id.as_str(), bytes.as_slice())
                    .map_err(|e| storage_err("insert session", e))?;
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, workspace_id: &str, id: &str) -> Result<Option<Session>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let id = id.to_string();
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(SESSIONS_TABLE)
                .map_err(|e| storage_err("open sessions", e))?;
            match table.get(id.as_str()).map_err(|e| storage_err("get session", e))? {
                Some(v) => {
                    let session: Session = postcard_decode(v.value(), "session")?;
                    if session.workspace_id != workspace_id {
                        return Ok(None);
                    }
                    Ok(Some(session))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn get_session_by_id(&self, id: &str) -> Result<Option<Session>> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(SESSIONS_TABLE)
                .map_err(|e| storage_err("open sessions", e))?;
            match table.get(id.as_str()).map_err(|e| storage_err("get session", e))? {
                Some(v) => Ok(Some(postcard_decode(v.value(), "session")?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn update_session(&self, session: Session) -> Result<()> {
        self.create_session(session).await
    }

    async fn delete_session(&self, workspace_id: &str, id: &str) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let id = id.to_string();
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            let found = {
                let mut sessions = write_txn
                    .open_table(SESSIONS_TABLE)
                    .map_err(|e| storage_err("open sessions", e))?;
                let Some(v) = sessions.get(id.as_str()).map_err(|e| storage_err("get session", e))? else {
                    return Ok(false);
                };
                let session: Session = postcard_decode(v.value(), "session")?;
                drop(v);
                if session.workspace_id != workspace_id {
                    return Ok(false);
                }
                sessions
                    .remove(id.as_str())
                    .map_err(|e| storage_err("remove session", e))?;
                true
            };
            if found {
                remove_working_memory_for_session(&write_txn, &id)?;
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(found)
        })
        .await
    }

    async fn list_sessions(&self, workspace_id: &str) -> Result<Vec<Session>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        with_db_timeout(move || {
            Ok(load_all_sessions(&db)?
                .into_iter()
                .filter(|s| s.workspace_id == workspace_id)
                .collect())
        })
        .await
    }

    async fn list_expired_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            Ok(load_all_sessions(&db)?
                .into_iter()
                .filter(Session::is_expired)
                .take(limit)
                .collect())
        })
        .await
    }

    async fn cleanup_all_expired_sessions(&self) -> Result<u64> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let expired_ids: Vec<String> = load_all_sessions(&db)?
                .into_iter()
                .filter(Session::is_expired)
                .map(|s| s.id)
                .collect();

            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            {
                let mut sessions = write_txn
                    .open_table(SESSIONS_TABLE)
                    .map_err(|e| storage_err("open sessions", e))?;
                for id in &expired_ids {
                    sessions
                        .remove(id.as_str())
                        .map_err(|e| storage_err("remove session", e))?;
                }
            }
            for id in &expired_ids {
                remove_working_memory_for_session(&write_txn, id)?;
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(expired_ids.len() as u64)
        })
        .await
    }

    async fn set_working_memory(&self, entry: WorkingMemoryEntry) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            {
                let mut table = write_txn
                    .open_table(WORKING_MEMORY_TABLE)
                    .map_err(|e| storage_err("open working_memory", e))?;
                let key = composite_key(&[&entry.session_id, &entry.key]);
                let bytes = postcard_encode(&entry, "working memory entry")?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| storage_err("insert working memory", e))?;
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn get_working_memory(&self, session_id: &str, key: &str) -> Result<Option<WorkingMemoryEntry>> {
        let db = Arc::clone(&self.db);
        let composite = composite_key(&[session_id, key]);
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(WORKING_MEMORY_TABLE)
                .map_err(|e| storage_err("open working_memory", e))?;
            match table
                .get(composite.as_str())
                .map_err(|e| storage_err("get working memory", e))?
            {
                Some(v) => Ok(Some(postcard_decode(v.value(), "working memory entry")?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn get_all_working_memory(&self, session_id: &str) -> Result<Vec<WorkingMemoryEntry>> {
        let db = Arc::clone(&self.db);
        let session_id = session_id.to_string();
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(WORKING_MEMORY_TABLE)
                .map_err(|e| storage_err("open working_memory", e))?;
            let mut entries = Vec::new();
            for item in table.iter().map_err(|e| storage_err("iterate working_memory", e))? {
                let (_, v) = item.map_err(|e| storage_err("read working memory entry", e))?;
                let entry: WorkingMemoryEntry = postcard_decode(v.value(), "working memory entry")?;
                if entry.session_id == session_id {
                    entries.push(entry);
                }
            }
            Ok(entries)
        })
        .await
    }

    async fn create_contradiction(&self, record: ContradictionRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| storage_err("begin write", e))?;
            {
                let mut table = write_txn
                    .open_table(CONTRADICTIONS_TABLE)
                    .map_err(|e| storage_err("open contradictions", e))?;
                let bytes = postcard_encode(&record, "contradiction")?;
                table
                    .insert(record.id.as_str(), bytes.as_slice())
                    .map_err(|e| storage_err("insert contradiction", e))?;
            }
            write_txn.commit().map_err(|e| storage_err("commit", e))?;
            Ok(())
        })
        .await
    }

    async fn get_contradiction(&self, workspace_id: &str, id: &str) -> Result<Option<ContradictionRecord>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let id = id.to_string();
        with_db_timeout(move || {
            let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
            let table = read_txn
                .open_table(CONTRADICTIONS_TABLE)
                .map_err(|e| storage_err("open contradictions", e))?;
            match table.get(id.as_str()).map_err(|e| storage_err("get contradiction", e))? {
                Some(v) => {
                    let record: ContradictionRecord = postcard_decode(v.value(), "contradiction")?;
                    if record.workspace_id != workspace_id {
                        return Ok(None);
                    }
                    Ok(Some(record))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn update_contradiction(&self, record: ContradictionRecord) -> Result<()> {
        self.create_contradiction(record).await
    }

    async fn get_unresolved_contradictions(
        &self,
        workspace_id: &str,
        limit: usize,
    ) -> Result<Vec<ContradictionRecord>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        with_db_timeout(move || {
            Ok(load_all_contradictions(&db)?
                .into_iter()
                .filter(|c| c.workspace_id == workspace_id && c.is_unresolved())
                .take(limit)
                .collect())
        })
        .await
    }

    async fn get_memories_for_decay(&self, workspace_id: &str, query: &DecayQuery) -> Result<Vec<Memory>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let query = query.clone();
        with_db_timeout(move || {
            Ok(load_all_memories(&db)?
                .into_iter()
                .filter(|m| m.workspace_id == workspace_id)
                .filter(|m| m.status == MemoryStatus::Active)
                .filter(|m| !query.exclude_pinned || !m.pinned)
                .filter(|m| age_days(m.created_at) >= query.min_age_days)
                .collect())
        })
        .await
    }

    async fn get_archival_candidates(&self, workspace_id: &str, query: &ArchivalQuery) -> Result<Vec<Memory>> {
        let db = Arc::clone(&self.db);
        let workspace_id = workspace_id.to_string();
        let query = query.clone();
        with_db_timeout(move || {
            Ok(load_all_memories(&db)?
                .into_iter()
                .filter(|m| m.workspace_id == workspace_id)
                .filter(|m| m.status == MemoryStatus::Active)
                .filter(|m| !m.pinned)
                .filter(|m| m.importance <= query.max_importance)
                .filter(|m| m.access_count <= query.max_access_count)
                .filter(|m| age_days(m.created_at) >= query.min_age_days)
                .collect())
        })
        .await
    }
}

fn insert_memory_and_hash_index(write_txn: &redb::WriteTransaction, memory: &Memory) -> Result<()> {
    let bytes = postcard_encode(memory, "memory")?;
    let mut memories = write_txn
        .open_table(MEMORIES_TABLE)
        .map_err(|e| storage_err("open memories", e))?;
    memories
        .insert(memory.id.as_str(), bytes.as_slice())
        .map_err(|e| storage_err("insert memory", e))?;
    drop(memories);

    let mut hash_index = write_txn
        .open_table(MEMORY_BY_HASH_TABLE)
        .map_err(|e| storage_err("open memory_by_hash", e))?;
    let hash_key = composite_key(&[&memory.workspace_id, &memory.content_hash]);
    hash_index
        .insert(hash_key.as_str(), memory.id.as_bytes())
        .map_err(|e| storage_err("insert hash index", e))?;
    Ok(())
}

/// Removes every association (and its triple-index entry) touching `id`,
/// in the caller's write transaction — matches `InMemoryStorage`'s
/// `hard_delete_memory` cleanup.
fn purge_associations_touching(write_txn: &redb::WriteTransaction, id: &str) -> Result<()> {
    let doomed: Vec<Association> = {
        let associations = write_txn
            .open_table(ASSOCIATIONS_TABLE)
            .map_err(|e| storage_err("open associations", e))?;
        let mut doomed = Vec::new();
        for entry in associations.iter().map_err(|e| storage_err("iterate associations", e))? {
            let (_, v) = entry.map_err(|e| storage_err("read association entry", e))?;
            let a: Association = postcard_decode(v.value(), "association")?;
            if a.source_id == id || a.target_id == id {
                doomed.push(a);
            }
        }
        doomed
    };

    if doomed.is_empty() {
        return Ok(());
    }

    let mut associations = write_txn
        .open_table(ASSOCIATIONS_TABLE)
        .map_err(|e| storage_err("open associations", e))?;
    let mut triples = write_txn
        .open_table(ASSOCIATION_TRIPLES_TABLE)
        .map_err(|e| storage_err("open association_triples", e))?;
    for a in &doomed {
        associations
            .remove(a.id.as_str())
            .map_err(|e| storage_err("remove association", e))?;
        let triple_key = composite_key(&[&a.workspace_id, &a.source_id, &a.target_id, &a.relationship]);
        triples
            .remove(triple_key.as_str())
            .map_err(|e| storage_err("remove association triple", e))?;
    }
    Ok(())
}

fn remove_working_memory_for_session(write_txn: &redb::WriteTransaction, session_id: &str) -> Result<()> {
    let doomed_keys: Vec<String> = {
        let table = write_txn
            .open_table(WORKING_MEMORY_TABLE)
            .map_err(|e| storage_err("open working_memory", e))?;
        let mut keys = Vec::new();
        for item in table.iter().map_err(|e| storage_err("iterate working_memory", e))? {
            let (k, v) = item.map_err(|e| storage_err("read working memory entry", e))?;
            let entry: WorkingMemoryEntry = postcard_decode(v.value(), "working memory entry")?;
            if entry.session_id == session_id {
                keys.push(k.value().to_string());
            }
        }
        keys
    };
    if doomed_keys.is_empty() {
        return Ok(());
    }
    let mut table = write_txn
        .open_table(WORKING_MEMORY_TABLE)
        .map_err(|e| storage_err("open working_memory", e))?;
    for key in doomed_keys {
        table
            .remove(key.as_str())
            .map_err(|e| storage_err("remove working memory", e))?;
    }
    Ok(())
}

fn load_all_memories(db: &redb::Database) -> Result<Vec<Memory>> {
    let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
    let table = read_txn
        .open_table(MEMORIES_TABLE)
        .map_err(|e| storage_err("open memories", e))?;
    let mut memories = Vec::new();
    for entry in table.iter().map_err(|e| storage_err("iterate memories", e))? {
        let (_, v) = entry.map_err(|e| storage_err("read memory entry", e))?;
        memories.push(postcard_decode(v.value(), "memory")?);
    }
    debug!(count = memories.len(), "loaded memories for full scan");
    Ok(memories)
}

fn load_all_associations(db: &redb::Database) -> Result<Vec<Association>> {
    let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
    let table = read_txn
        .open_table(ASSOCIATIONS_TABLE)
        .map_err(|e| storage_err("open associations", e))?;
    let mut associations = Vec::new();
    for entry in table.iter().map_err(|e| storage_err("iterate associations", e))? {
        let (_, v) = entry.map_err(|e| storage_err("read association entry", e))?;
        associations.push(postcard_decode(v.value(), "association")?);
    }
    Ok(associations)
}

fn load_all_sessions(db: &redb::Database) -> Result<Vec<Session>> {
    let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
    let table = read_txn
        .open_table(SESSIONS_TABLE)
        .map_err(|e| storage_err("open sessions", e))?;
    let mut sessions = Vec::new();
    for entry in table.iter().map_err(|e| storage_err("iterate sessions", e))? {
        let (_, v) = entry.map_err(|e| storage_err("read session entry", e))?;
        sessions.push(postcard_decode(v.value(), "session")?);
    }
    Ok(sessions)
}

fn load_all_contradictions(db: &redb::Database) -> Result<Vec<ContradictionRecord>> {
    let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
    let table = read_txn
        .open_table(CONTRADICTIONS_TABLE)
        .map_err(|e| storage_err("open contradictions", e))?;
    let mut records = Vec::new();
    for entry in table.iter().map_err(|e| storage_err("iterate contradictions", e))? {
        let (_, v) = entry.map_err(|e| storage_err("read contradiction entry", e))?;
        records.push(postcard_decode(v.value(), "contradiction")?);
    }
    Ok(records)
}
