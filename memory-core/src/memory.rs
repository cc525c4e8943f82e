//! The orchestrator: `remember`, `recall`, `forget`, `decay`,
//! `get`. Ties every other service in this crate into the end-to-end
//! pipelines.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::association::{AssociateInput, AssociationService, AutoAssociateCandidate};
use crate::config::EngineConfig;
use crate::contradiction::ContradictionService;
use crate::dedup::{self, DedupDecision, DedupThresholds};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::extraction;
use crate::llm::LlmService;
use crate::reranker::{self, RerankerService};
use crate::session::SessionCommitHook;
use crate::storage::{memory_is_visible, SearchFilters, Storage};
use crate::tasks::TaskService;
use crate::tiering::TieringService;
use crate::types::{
    content_hash, normalize_tags, DetailLevel, Memory, MemoryStatus, MemorySubtype, MemoryType,
    RecallMode, RememberInput, Session, SourceScope, Tolerance, WorkingMemoryEntry,
    DEFAULT_TENANT_ID, GLOBAL_WORKSPACE_ID,
};

/// Graph-expansion per-hop decay applied on top of edge strength.
const ASSOCIATION_HOP_DECAY: f32 = 0.8;
/// Similarity floor for the post-store auto-enrich search.
const AUTO_ENRICH_MIN_RELEVANCE: f32 = 0.6;
const AUTO_ENRICH_LIMIT: usize = 5;

/// Input to [`MemoryService::recall`].
#[derive(Debug, Clone, Default)]
pub struct RecallInput {
    pub query: String,
    pub context_id: Option<String>,
    pub mode: Option<RecallMode>,
    pub tolerance: Option<Tolerance>,
    pub min_relevance: Option<f32>,
    pub limit: Option<usize>,
    pub detail_level: Option<DetailLevel>,
    pub types: Option<Vec<MemoryType>>,
    pub subtypes: Option<Vec<MemorySubtype>>,
    pub tags: Option<Vec<String>>,
    pub include_archived: bool,
    pub include_global: Option<bool>,
    pub include_associations: Option<bool>,
    pub traverse_depth: Option<usize>,
    pub max_expansion: Option<usize>,
}

/// Per-stage timing, aggregated into `total_ms`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecallLatency {
    pub search_ms: u64,
    pub associations_ms: u64,
    pub rerank_ms: u64,
    pub detail_filter_ms: u64,
    pub access_tracking_ms: u64,
    pub total_ms: u64,
}

/// Result of [`MemoryService::recall`].
#[derive(Debug, Clone)]
pub struct RecallOutput {
    pub memories: Vec<Memory>,
    pub mode_used: RecallMode,
    pub latency: RecallLatency,
}

/// Collaborator bundle the orchestrator is built from.
pub struct MemoryService {
    storage: Arc<dyn Storage>,
    embeddings: Arc<dyn EmbeddingProvider>,
    llm: Option<Arc<dyn LlmService>>,
    reranker: Option<Arc<dyn RerankerService>>,
    cache: Arc<dyn crate::cache::Cache>,
    tasks: Option<Arc<TaskService>>,
    associations: Arc<AssociationService>,
    contradictions: Arc<ContradictionService>,
    tiering: Arc<TieringService>,
    dedup_thresholds: DedupThresholds,
    config: EngineConfig,
}

impl MemoryService {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        embeddings: Arc<dyn EmbeddingProvider>,
        cache: Arc<dyn crate::cache::Cache>,
        llm: Option<Arc<dyn LlmService>>,
        reranker: Option<Arc<dyn RerankerService>>,
        tasks: Option<Arc<TaskService>>,
        config: EngineConfig,
    ) -> Self {
        let associations = Arc::new(AssociationService::new(storage.clone(), llm.clone()));
        let contradictions = Arc::new(ContradictionService::new(storage.clone()));
        let tiering = Arc::new(TieringService::new(storage.clone(), llm.clone()));
        MemoryService {
            storage,
            embeddings,
            llm,
            reranker,
            cache,
            tasks,
            associations,
            contradictions,
            tiering,
            dedup_thresholds: DedupThresholds::default(),
            config,
        }
    }

    /// `remember(ws, input, inline)`.
    #[instrument(skip(self, input))]
    pub async fn remember(&self, workspace_id: &str, input: RememberInput, inline: bool) -> Result<Memory> {
        let hash = content_hash(&input.content);
        let embedding = self.embeddings.embed(&input.content).await?;

        let exact = self.storage.get_memory_by_hash(workspace_id, &hash).await?;
        let similar = self
            .storage
            .search_memories(workspace_id, &embedding, 1, 0, 0.0, &SearchFilters::default())
            .await?;
        let most_similar = similar.first().map(|(m, s)| (m, *s));

        let decision = dedup::check_duplicate(exact.as_ref(), most_similar, self.dedup_thresholds);
        match decision {
            DedupDecision::Skip { existing_memory_id, reason } => {
                debug!(existing_memory_id, reason, "remember skipped: exact duplicate");
                return self
                    .storage
                    .get_memory(workspace_id, &existing_memory_id, false)
                    .await?
                    .ok_or_else(|| Error::not_found("memory", &existing_memory_id));
            }
            DedupDecision::Update {
                existing_memory_id,
                reason,
                ..
            } => {
                debug!(existing_memory_id, reason, "remember updated: near-exact duplicate");
                let mut existing = self
                    .storage
                    .get_memory(workspace_id, &existing_memory_id, false)
                    .await?
                    .ok_or_else(|| Error::not_found("memory", &existing_memory_id))?;
                existing.content = input.content.clone();
                existing.content_hash = hash;
                existing.embedding = Some(embedding.clone());
                existing.importance = input.importance.unwrap_or(existing.importance).max(0.5);
                existing.updated_at = chrono::Utc::now();
                self.storage.update_memory(existing.clone()).await?;
                return Ok(existing);
            }
            DedupDecision::Merge {
                existing_memory_id,
                reason,
                ..
            } => {
                debug!(existing_memory_id, reason, "remember merged: near-duplicate");
                let mut existing = self
                    .storage
                    .get_memory(workspace_id, &existing_memory_id, false)
                    .await?
                    .ok_or_else(|| Error::not_found("memory", &existing_memory_id))?;
                let merged = dedup::merge_content(&existing.content, &input.content);
                existing.content_hash = content_hash(&merged);
                existing.content = merged;
                existing.embedding = self.embeddings.embed(&existing.content).await.ok();
                existing.importance = existing.importance.max(input.importance.unwrap_or(0.0));
                existing.updated_at = chrono::Utc::now();
                self.storage.update_memory(existing.clone()).await?;
                return Ok(existing);
            }
            DedupDecision::Create { .. } => {}
        }

        let auto_classified = input.memory_type.is_none();
        let memory_type = input.memory_type.unwrap_or_else(|| heuristic_classify(&input.content));

        let mut memory = Memory::new(DEFAULT_TENANT_ID, workspace_id, "_default", input.content.clone(), memory_type);
        memory.subtype = input.subtype;
        memory.category = input.category;
        memory.tags = normalize_tags(input.tags);
        memory.importance = input.importance.unwrap_or(0.5);
        memory.pinned = input.pinned;
        memory.embedding = Some(embedding.clone());
        if let Some(metadata) = input.metadata {
            memory.metadata = metadata;
        }

        self.storage.create_memory(memory.clone()).await?;
        info!(memory_id = %memory.id, workspace_id, "memory created");

        if should_decompose(&memory.content, memory.memory_type, self.config.fact_decomposition_enabled, self.config.fact_decomposition_min_length) {
            if inline {
                return self.decompose_and_process(workspace_id, memory, embedding).await;
            }
            if let Some(tasks) = &self.tasks {
                let payload = serde_json::json!({"workspace_id": workspace_id, "memory_id": memory.id.clone()});
                if let Err(e) = tasks.schedule_task("decompose_facts", payload) {
                    warn!(memory_id = %memory.id, error = %e, "failed to schedule decomposition task");
                }
                return Ok(memory);
            }
            return self.decompose_and_process(workspace_id, memory, embedding).await;
        }

        self.post_store_pipeline(workspace_id, memory.clone(), embedding, inline, auto_classified).await;
        Ok(memory)
    }

    /// `post_store_pipeline`.
    async fn post_store_pipeline(&self, workspace_id: &str, memory: Memory, embedding: Vec<f32>, inline: bool, classify_type: bool) {
        self.cache.clear_prefix(&format!("{workspace_id}:")).await;

        if inline || self.tasks.is_none() {
            self.tiering.generate_tiers(workspace_id, &memory.id).await;
        } else if let Some(tasks) = &self.tasks {
            let payload = serde_json::json!({"workspace_id": workspace_id, "memory_id": memory.id.clone()});
            if let Err(e) = tasks.schedule_task("generate_tiers", payload) {
                warn!(memory_id = %memory.id, error = %e, "failed to schedule tier generation");
            }
        }

        if let Err(e) = self.contradictions.check_new_memory(workspace_id, &memory.id).await {
            warn!(memory_id = %memory.id, error = %e, "contradiction check failed");
        }

        if inline || self.tasks.is_none() {
            self.auto_enrich(workspace_id, &memory, &embedding, classify_type).await;
        } else if let Some(tasks) = &self.tasks {
            let payload = serde_json::json!({"workspace_id": workspace_id, "memory_id": memory.id.clone(), "classify_type": classify_type});
            if let Err(e) = tasks.schedule_task("auto_enrich", payload) {
                warn!(memory_id = %memory.id, error = %e, "failed to schedule auto-enrich");
            }
        }
    }

    async fn auto_enrich(&self, workspace_id: &str, memory: &Memory, embedding: &[f32], classify_type: bool) {
        let similar = match self
            .storage
            .search_memories(workspace_id, embedding, AUTO_ENRICH_LIMIT, 0, AUTO_ENRICH_MIN_RELEVANCE, &SearchFilters::default())
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(memory_id = %memory.id, error = %e, "auto-enrich similarity search failed");
                return;
            }
        };

        let candidates: Vec<AutoAssociateCandidate<'_>> = similar
            .iter()
            .filter(|(m, _)| m.id != memory.id)
            .map(|(m, score)| AutoAssociateCandidate {
                candidate_id: m.id.as_str(),
                similarity: *score,
            })
            .collect();

        if let Err(e) = self
            .associations
            .auto_associate(workspace_id, &memory.id, &candidates, self.config.auto_association_threshold, Some(&memory.content))
            .await
        {
            warn!(memory_id = %memory.id, error = %e, "auto-association failed");
        }

        if classify_type {
            let Some(llm) = &self.llm else { return };
            let (new_type, new_subtype) = extraction::classify_content(Some(llm.as_ref()), &memory.content).await;
            if new_type != memory.memory_type || new_subtype != memory.subtype {
                if let Ok(Some(mut stored)) = self.storage.get_memory(workspace_id, &memory.id, false).await {
                    stored.memory_type = new_type;
                    stored.subtype = new_subtype;
                    stored.updated_at = chrono::Utc::now();
                    if let Err(e) = self.storage.update_memory(stored).await {
                        warn!(memory_id = %memory.id, error = %e, "failed to persist re-classified type");
                    }
                }
            }
        }
    }

    /// `ingest_fact`: the atomic per-fact pipeline used by decomposition.
    async fn ingest_fact(&self, workspace_id: &str, input: RememberInput, source_memory_id: &str, inline: bool) -> Result<Memory> {
        let hash = content_hash(&input.content);
        let embedding = self.embeddings.embed(&input.content).await?;

        let exact = self.storage.get_memory_by_hash(workspace_id, &hash).await?;
        let similar = self
            .storage
            .search_memories(workspace_id, &embedding, 1, 0, 0.0, &SearchFilters::default())
            .await?;
        let most_similar = similar.first().map(|(m, s)| (m, *s));
        let decision = dedup::check_duplicate(exact.as_ref(), most_similar, self.dedup_thresholds);

        let memory = match decision {
            DedupDecision::Skip { existing_memory_id, .. } => {
                return self
                    .storage
                    .get_memory(workspace_id, &existing_memory_id, false)
                    .await?
                    .ok_or_else(|| Error::not_found("memory", &existing_memory_id));
            }
            DedupDecision::Update { existing_memory_id, .. } | DedupDecision::Merge { existing_memory_id, .. } => {
                let mut existing = self
                    .storage
                    .get_memory(workspace_id, &existing_memory_id, false)
                    .await?
                    .ok_or_else(|| Error::not_found("memory", &existing_memory_id))?;
                existing.content = input.content.clone();
                existing.content_hash = hash;
                existing.embedding = Some(embedding.clone());
                existing.updated_at = chrono::Utc::now();
                self.storage.update_memory(existing.clone()).await?;
                existing
            }
            DedupDecision::Create { .. } => {
                let memory_type = input.memory_type.unwrap_or(MemoryType::Semantic);
                let mut memory = Memory::new(DEFAULT_TENANT_ID, workspace_id, "_default", input.content.clone(), memory_type);
                memory.subtype = input.subtype;
                memory.category = input.category;
                memory.tags = normalize_tags(input.tags);
                memory.importance = input.importance.unwrap_or(0.5);
                memory.embedding = Some(embedding.clone());
                memory.source_memory_id = Some(source_memory_id.to_string());
                if let Some(metadata) = input.metadata {
                    memory.metadata = metadata;
                }
                self.storage.create_memory(memory.clone()).await?;
                memory
            }
        };

        self.post_store_pipeline(workspace_id, memory.clone(), memory.embedding.clone().unwrap_or_default(), inline, false)
            .await;
        Ok(memory)
    }

    /// `decompose_and_process`.
    async fn decompose_and_process(&self, workspace_id: &str, memory: Memory, embedding: Vec<f32>) -> Result<Memory> {
        let facts = extraction::decompose_to_facts(self.llm.as_deref(), &memory.content).await;
        if facts.len() <= 1 {
            self.post_store_pipeline(workspace_id, memory.clone(), embedding, true, false).await;
            return Ok(memory);
        }

        for fact in facts {
            let input = RememberInput {
                content: fact,
                memory_type: Some(memory.memory_type),
                subtype: memory.subtype,
                ..Default::default()
            };
            match self.ingest_fact(workspace_id, input, &memory.id, true).await {
                Ok(stored_fact) => {
                    let assoc_input = AssociateInput {
                        source_id: stored_fact.id.clone(),
                        target_id: memory.id.clone(),
                        relationship: "part_of".to_string(),
                        strength: 1.0,
                        metadata: serde_json::json!({"auto_generated": true, "source": "fact_decomposition"}),
                    };
                    if let Err(e) = self.associations.associate(workspace_id, assoc_input).await {
                        warn!(fact_id = %stored_fact.id, error = %e, "failed to create part_of association for decomposed fact");
                    }
                }
                Err(e) => {
                    warn!(parent_id = %memory.id, error = %e, "failed to ingest a decomposed fact");
                }
            }
        }

        let mut parent = self
            .storage
            .get_memory(workspace_id, &memory.id, false)
            .await?
            .unwrap_or(memory);
        parent.status = MemoryStatus::Archived;
        parent.updated_at = chrono::Utc::now();
        self.storage.update_memory(parent.clone()).await?;
        Ok(parent)
    }

    /// `recall(ws, input)`.
    #[instrument(skip(self, input))]
    pub async fn recall(&self, workspace_id: &str, input: RecallInput) -> Result<RecallOutput> {
        let start = Instant::now();
        let mode = input.mode.unwrap_or_default();
        let tolerance = input.tolerance.unwrap_or_default();
        let detail_level = input.detail_level.unwrap_or_default();
        let limit = input.limit.unwrap_or(10).max(1);
        let context_id = input.context_id.clone().unwrap_or_else(|| "_default".to_string());
        let floor = resolve_relevance_floor(input.min_relevance, tolerance);
        let include_associations = input.include_associations.unwrap_or(self.config.include_associations);
        let traverse_depth = input.traverse_depth.unwrap_or(self.config.traverse_depth);
        let max_expansion = input.max_expansion.unwrap_or(self.config.max_graph_expansion);
        let include_global = input.include_global.unwrap_or(self.config.include_global_by_default);

        let cache_key = format!(
            "{workspace_id}:recall:{}:{:?}:{}:{}",
            content_hash(&input.query),
            mode,
            context_id,
            limit
        );
        if let Some(cached) = self.cache.get(&cache_key).await {
            if let Ok(memories) = serde_json::from_value::<Vec<Memory>>(cached) {
                debug!(workspace_id, "recall cache hit");
                return Ok(RecallOutput {
                    memories,
                    mode_used: mode,
                    latency: RecallLatency::default(),
                });
            }
        }

        let search_start = Instant::now();
        let filters = SearchFilters {
            types: input.types.clone(),
            subtypes: input.subtypes.clone(),
            tags: input.tags.clone(),
            include_archived: input.include_archived,
        };

        let (mut results, mode_used) = self
            .dispatch_search(workspace_id, &input.query, mode, floor, limit, include_global, &filters)
            .await?;

        apply_scope_boosts(&mut results, &context_id, workspace_id, &self.config);
        apply_recency_boost(&mut results, self.config.recency_weight, self.config.recency_half_life_hours);
        results.sort_by(|a, b| {
            b.boosted_score
                .unwrap_or(0.0)
                .partial_cmp(&a.boosted_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let search_ms = elapsed_ms(search_start);

        let assoc_start = Instant::now();
        if include_associations || traverse_depth > 0 {
            self.expand_via_associations(workspace_id, &mut results, traverse_depth, max_expansion)
                .await;
        }
        let associations_ms = elapsed_ms(assoc_start);

        let rerank_start = Instant::now();
        if let Some(reranker) = &self.reranker {
            if !reranker::is_trivial_query(&input.query) && results.len() > limit {
                let contents: Vec<String> = results.iter().map(|m| m.content.clone()).collect();
                match reranker.rerank_adaptive(&input.query, &contents, limit).await {
                    Ok(reranked) => {
                        let reordered: Vec<Memory> = reranked
                            .into_iter()
                            .filter_map(|r| results.get(r.index).cloned())
                            .collect();
                        results = reordered;
                    }
                    Err(e) => {
                        warn!(workspace_id, error = %e, "reranking failed, truncating instead");
                        results.truncate(limit);
                    }
                }
            } else {
                results.truncate(limit);
            }
        } else {
            results.truncate(limit);
        }
        let rerank_ms = elapsed_ms(rerank_start);

        let detail_start = Instant::now();
        for memory in &mut results {
            let content = memory.content_for_detail_level(detail_level).to_string();
            memory.content = content;
        }
        let detail_filter_ms = elapsed_ms(detail_start);

        let access_start = Instant::now();
        let access_results = futures::future::join_all(
            results
                .iter()
                .map(|memory| self.storage.get_memory(workspace_id, &memory.id, true)),
        )
        .await;
        for (memory, result) in results.iter().zip(access_results) {
            if let Err(e) = result {
                warn!(memory_id = %memory.id, error = %e, "access tracking failed during recall");
            }
        }
        let access_tracking_ms = elapsed_ms(access_start);

        if let Ok(serialized) = serde_json::to_value(&results) {
            self.cache.set(&cache_key, serialized, self.config.recall_cache_ttl_seconds).await;
        }

        Ok(RecallOutput {
            memories: results,
            mode_used,
            latency: RecallLatency {
                search_ms,
                associations_ms,
                rerank_ms,
                detail_filter_ms,
                access_tracking_ms,
                total_ms: elapsed_ms(start),
            },
        })
    }

    async fn dispatch_search(
        &self,
        workspace_id: &str,
        query: &str,
        mode: RecallMode,
        floor: f32,
        limit: usize,
        include_global: bool,
        filters: &SearchFilters,
    ) -> Result<(Vec<Memory>, RecallMode)> {
        match mode {
            RecallMode::Rag => Ok((self.rag_search(workspace_id, query, floor, limit, include_global, filters).await?, RecallMode::Rag)),
            RecallMode::Llm => {
                let rewritten = self.rewrite_query(query).await;
                let widened_limit = (limit * 3).min(self.config.recall_llm_candidate_cap);
                let widened_floor = (floor * 0.5).max(0.0);
                let results = self
                    .rag_search(workspace_id, &rewritten, widened_floor, widened_limit, include_global, filters)
                    .await?;
                Ok((results, RecallMode::Llm))
            }
            RecallMode::Hybrid => {
                let rag_results = self.rag_search(workspace_id, query, floor, limit, include_global, filters).await?;
                let fall_through = rag_results.is_empty()
                    || rag_results
                        .first()
                        .is_some_and(|m| m.importance < self.config.hybrid_rag_threshold);
                if fall_through {
                    let rewritten = self.rewrite_query(query).await;
                    let widened_limit = (limit * 3).min(self.config.recall_llm_candidate_cap);
                    let results = self
                        .rag_search(workspace_id, &rewritten, (floor * 0.5).max(0.0), widened_limit, include_global, filters)
                        .await?;
                    Ok((results, RecallMode::Llm))
                } else {
                    Ok((rag_results, RecallMode::Rag))
                }
            }
        }
    }

    async fn rag_search(
        &self,
        workspace_id: &str,
        query: &str,
        floor: f32,
        limit: usize,
        include_global: bool,
        filters: &SearchFilters,
    ) -> Result<Vec<Memory>> {
        let embedding = self.embeddings.embed(query).await?;
        let overfetch = limit * self.config.recall_overfetch;

        let mut scored = self
            .storage
            .search_memories(workspace_id, &embedding, overfetch, 0, floor, filters)
            .await?;

        if include_global && workspace_id != GLOBAL_WORKSPACE_ID {
            let global = self
                .storage
                .search_memories(GLOBAL_WORKSPACE_ID, &embedding, overfetch, 0, floor, filters)
                .await?;
            scored.extend(global);
        }

        Ok(scored
            .into_iter()
            .map(|(mut memory, relevance)| {
                memory.relevance_score = Some(relevance);
                memory.boosted_score = Some(relevance);
                memory
            })
            .collect())
    }

    async fn rewrite_query(&self, query: &str) -> String {
        let Some(llm) = &self.llm else { return query.to_string() };
        use crate::llm::LlmProfile;
        let prompt = format!("Rewrite this search query to improve semantic recall, return only the rewritten query: {query}");
        match llm.synthesize(&prompt, 64, Some(0.2), LlmProfile::Default).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten.trim().to_string(),
            _ => query.to_string(),
        }
    }

    /// Association graph expansion: BFS from each seed up
    /// to `effective_depth`, discovered score = `parent.boosted_score *
    /// path.total_strength * hop_decay^depth`.
    async fn expand_via_associations(&self, workspace_id: &str, results: &mut Vec<Memory>, effective_depth: usize, max_expansion: usize) {
        if effective_depth == 0 {
            return;
        }
        let seeds: Vec<(String, f32)> = results
            .iter()
            .map(|m| (m.id.clone(), m.boosted_score.unwrap_or(0.0)))
            .collect();

        let mut discovered: std::collections::HashMap<String, Memory> = std::collections::HashMap::new();
        for (seed_id, seed_score) in &seeds {
            let paths = match self
                .storage
                .traverse_graph(workspace_id, seed_id, effective_depth, None, crate::types::Direction::Both)
                .await
            {
                Ok(p) => p,
                Err(e) => {
                    warn!(seed_id, error = %e, "graph traversal failed during recall expansion");
                    continue;
                }
            };

            for path in paths {
                if path.depth == 0 {
                    continue;
                }
                let Some(node) = path.nodes.last() else { continue };
                if node.status != MemoryStatus::Active {
                    continue;
                }
                if results.iter().any(|m| m.id == node.id) || discovered.contains_key(&node.id) {
                    continue;
                }
                let score = seed_score * path.total_strength * ASSOCIATION_HOP_DECAY.powi(path.depth as i32);
                let mut node = node.clone();
                node.source_scope = Some(SourceScope::Association);
                node.boosted_score = Some(score);
                node.relevance_score = Some(score);
                discovered.insert(node.id.clone(), node);
                if discovered.len() >= max_expansion {
                    break;
                }
            }
            if discovered.len() >= max_expansion {
                break;
            }
        }

        let mut extra: Vec<Memory> = discovered.into_values().collect();
        extra.sort_by(|a, b| {
            b.boosted_score
                .unwrap_or(0.0)
                .partial_cmp(&a.boosted_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.extend(extra);
    }

    /// `forget(ws, id, hard)`.
    pub async fn forget(&self, workspace_id: &str, memory_id: &str, hard: bool) -> Result<bool> {
        self.cache.clear_prefix(&format!("{workspace_id}:")).await;
        if hard {
            self.storage.hard_delete_memory(workspace_id, memory_id).await
        } else {
            self.storage.soft_delete_memory(workspace_id, memory_id).await
        }
    }

    /// `decay(ws, id, rate)`: the single-memory decay call.
    pub async fn decay(&self, workspace_id: &str, memory_id: &str, rate: f32) -> Result<Memory> {
        let mut memory = self
            .storage
            .get_memory(workspace_id, memory_id, false)
            .await?
            .ok_or_else(|| Error::not_found("memory", memory_id))?;
        memory.importance = (memory.importance - rate).max(0.0);
        memory.updated_at = chrono::Utc::now();
        self.storage.update_memory(memory.clone()).await?;
        Ok(memory)
    }

    /// Tracking read by workspace-scoped id. Never surfaces a soft-deleted
    /// memory; surfaces an archived one only when `include_archived` is set.
    pub async fn get(&self, workspace_id: &str, memory_id: &str, include_archived: bool) -> Result<Option<Memory>> {
        let Some(memory) = self.storage.get_memory(workspace_id, memory_id, true).await? else {
            return Ok(None);
        };
        Ok(memory_is_visible(&memory, include_archived).then_some(memory))
    }

    /// Tracking read by id alone. Same visibility rules as [`Self::get`].
    pub async fn get_by_id(&self, memory_id: &str, include_archived: bool) -> Result<Option<Memory>> {
        let Some(memory) = self.storage.get_memory_by_id(memory_id).await? else {
            return Ok(None);
        };
        let Some(memory) = self.storage.get_memory(&memory.workspace_id, memory_id, true).await? else {
            return Ok(None);
        };
        Ok(memory_is_visible(&memory, include_archived).then_some(memory))
    }
}

/// Implements the session service's commit hook by extracting facts from a
/// session's content + working memory and storing each as a long-term memory.
#[async_trait::async_trait]
impl SessionCommitHook for MemoryService {
    async fn commit(&self, workspace_id: &str, session: &Session, entries: &[WorkingMemoryEntry]) -> Result<u64> {
        let mut working_memory = std::collections::HashMap::new();
        let mut session_content = String::new();
        for entry in entries {
            working_memory.insert(entry.key.clone(), entry.value.clone());
            let rendered = match &entry.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            session_content.push_str(&format!("{}: {}\n", entry.key, rendered));
        }

        let result = extraction::extract_from_session(
            self.llm.as_deref(),
            &session_content,
            &working_memory,
            &extraction::ExtractionOptions::default(),
        )
        .await;

        let mut committed = 0u64;
        for extracted in result.memories {
            let (memory_type, subtype) = extracted.category.mapping();
            let input = RememberInput {
                content: extracted.content,
                memory_type: Some(memory_type),
                subtype: Some(subtype),
                tags: extracted.tags,
                importance: Some(extracted.importance),
                metadata: Some(serde_json::json!({"session_id": session.id})),
                ..Default::default()
            };
            match self.remember(workspace_id, input, false).await {
                Ok(_) => committed += 1,
                Err(e) => warn!(session_id = %session.id, error = %e, "failed to commit an extracted memory"),
            }
        }
        Ok(committed)
    }
}

/// Per-fact/per-entry working-memory materialization task handler, backing
/// the write-behind path described below.
pub struct RememberWorkingMemoryHandler {
    memory: Arc<MemoryService>,
}

impl RememberWorkingMemoryHandler {
    #[must_use]
    pub fn new(memory: Arc<MemoryService>) -> Self {
        RememberWorkingMemoryHandler { memory }
    }
}

#[async_trait::async_trait]
impl crate::tasks::TaskHandler for RememberWorkingMemoryHandler {
    fn task_type(&self) -> &str {
        "remember_working_memory"
    }

    async fn handle(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let workspace_id = payload["workspace_id"].as_str().ok_or_else(|| anyhow::anyhow!("missing workspace_id"))?;
        let session_id = payload["session_id"].as_str().ok_or_else(|| anyhow::anyhow!("missing session_id"))?;
        let key = payload["key"].as_str().ok_or_else(|| anyhow::anyhow!("missing key"))?;
        let content = payload["content"].as_str().ok_or_else(|| anyhow::anyhow!("missing content"))?;

        let input = RememberInput {
            content: content.to_string(),
            memory_type: Some(MemoryType::Working),
            metadata: Some(serde_json::json!({
                "session_id": session_id,
                "working_memory_key": key,
            })),
            ..Default::default()
        };
        self.memory.remember(workspace_id, input, false).await?;
        Ok(())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Resolve the effective relevance floor.
#[must_use]
pub fn resolve_relevance_floor(min_relevance: Option<f32>, tolerance: Tolerance) -> f32 {
    let floor = tolerance.floor();
    match min_relevance {
        None => floor,
        Some(v) if v <= 0.0 => v,
        Some(v) => v.max(floor),
    }
}

/// Keyword-based type classifier used when `remember` is given no explicit type.
#[must_use]
pub fn heuristic_classify(content: &str) -> MemoryType {
    let lower = content.to_lowercase();
    const PROCEDURAL: &[&str] = &["how to", "steps", "procedure", "process", "method", "workflow"];
    const EPISODIC: &[&str] = &["when", "yesterday", "today", "occurred", "happened", "at that time"];
    const WORKING: &[&str] = &["currently", "working on", "in progress", "now", "right now"];

    if PROCEDURAL.iter().any(|kw| lower.contains(kw)) {
        return MemoryType::Procedural;
    }
    if EPISODIC.iter().any(|kw| lower.contains(kw)) {
        return MemoryType::Episodic;
    }
    if WORKING.iter().any(|kw| lower.contains(kw)) {
        return MemoryType::Working;
    }
    MemoryType::Semantic
}

/// Whether a memory should be decomposed into atomic facts.
#[must_use]
pub fn should_decompose(content: &str, memory_type: MemoryType, enabled: bool, min_len: usize) -> bool {
    if !enabled || memory_type == MemoryType::Working || content.len() < min_len {
        return false;
    }
    let mut terminators = 0usize;
    let chars: Vec<char> = content.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if matches!(c, '.' | ';' | '?' | '!') {
            let at_end = i + 1 == chars.len();
            let followed_by_space = chars.get(i + 1).is_some_and(|next| next.is_whitespace());
            if at_end || followed_by_space {
                terminators += 1;
            }
        }
    }
    terminators > 1
}

/// Classify `source_scope` and apply the configured boost multiplier.
fn apply_scope_boosts(memories: &mut [Memory], query_context_id: &str, query_workspace_id: &str, config: &EngineConfig) {
    for memory in memories.iter_mut() {
        let scope = if memory.context_id == query_context_id {
            SourceScope::SameContext
        } else if memory.workspace_id == query_workspace_id {
            SourceScope::SameWorkspace
        } else if memory.workspace_id == GLOBAL_WORKSPACE_ID {
            SourceScope::GlobalWorkspace
        } else {
            SourceScope::Other
        };
        let boost = match scope {
            SourceScope::SameContext => config.same_context_boost,
            SourceScope::SameWorkspace => config.same_workspace_boost,
            SourceScope::GlobalWorkspace => config.global_workspace_boost,
            _ => 1.0,
        };
        memory.source_scope = Some(scope);
        let base = memory.relevance_score.unwrap_or(0.0);
        memory.boosted_score = Some(base * boost);
    }
}

/// Exponential-decay recency boost.
fn apply_recency_boost(memories: &mut [Memory], weight: f32, half_life_hours: f32) {
    if weight <= 0.0 || memories.is_empty() {
        return;
    }
    let now = chrono::Utc::now();
    let decay_lambda = std::f32::consts::LN_2 / half_life_hours;
    for memory in memories.iter_mut() {
        let age_hours = (now - memory.updated_at).num_seconds().max(0) as f32 / 3600.0;
        let recency_factor = (-decay_lambda * age_hours).exp();
        let adjusted = memory.boosted_score.unwrap_or(0.0) * (1.0 - weight + weight * recency_factor);
        memory.boosted_score = Some(adjusted);
    }
}
