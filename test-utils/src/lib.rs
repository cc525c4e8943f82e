//! Shared test fixtures for the semantic memory engine.
//!
//! Provides:
//! - A ready-to-use [`MemoryService`] wired against [`InMemoryStorage`] or a
//!   scratch [`RedbStorage`]
//! - Builders for [`Memory`], [`Workspace`], [`Session`] and friends
//! - A deterministic embedding provider for assertions that need two
//!   near-identical pieces of content to embed close together

use std::sync::Arc;

use memory_core::cache::InMemoryCache;
use memory_core::config::EngineConfig;
use memory_core::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
use memory_core::memory::MemoryService;
use memory_core::storage::{InMemoryStorage, Storage};
use memory_core::types::{
    Association, ContradictionRecord, Context, Memory, MemoryType, RememberInput, Session,
    Workspace,
};
use memory_storage_redb::RedbStorage;

/// A [`MemoryService`] backed by [`InMemoryStorage`] and a deterministic mock
/// embedding provider, with no LLM, reranker or background tasks wired in.
/// Good enough for exercising dedup, search and association behavior without
/// network calls.
#[must_use]
pub fn test_memory_service() -> MemoryService {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(16));
    let cache = Arc::new(InMemoryCache::new());
    MemoryService::new(storage, embeddings, cache, None, None, None, EngineConfig::default())
}

/// Same as [`test_memory_service`] but returns the storage handle too, for
/// tests that want to assert directly against it alongside the orchestrator.
#[must_use]
pub fn test_memory_service_with_storage() -> (MemoryService, Arc<dyn Storage>) {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(16));
    let cache = Arc::new(InMemoryCache::new());
    let service = MemoryService::new(
        storage.clone(),
        embeddings,
        cache,
        None,
        None,
        None,
        EngineConfig::default(),
    );
    (service, storage)
}

/// Open a scratch [`RedbStorage`] under a fresh temp directory. The directory
/// is leaked intentionally (`TempDir::keep`) so the database file outlives
/// the test if it wants to reopen it.
pub async fn scratch_redb_storage() -> RedbStorage {
    let dir = tempfile::tempdir().expect("create scratch tempdir");
    let path = dir.keep().join("memory.redb");
    RedbStorage::new(path).await.expect("open scratch redb database")
}

/// Build a [`RememberInput`] with just content set, matching how a caller
/// with no prior classification would invoke `remember`.
#[must_use]
pub fn remember_input(content: impl Into<String>) -> RememberInput {
    RememberInput {
        content: content.into(),
        ..Default::default()
    }
}

/// Build a [`RememberInput`] with an explicit memory type, for tests that
/// need to bypass heuristic classification.
#[must_use]
pub fn remember_input_typed(content: impl Into<String>, memory_type: MemoryType) -> RememberInput {
    RememberInput {
        content: content.into(),
        memory_type: Some(memory_type),
        ..Default::default()
    }
}

/// A minimal active [`Memory`] in the `_default` tenant/context, for tests
/// that exercise storage directly rather than going through `remember`.
#[must_use]
pub fn test_memory(workspace_id: &str, content: &str) -> Memory {
    Memory::new("_default", workspace_id, "_default", content, MemoryType::Semantic)
}

#[must_use]
pub fn test_memory_typed(workspace_id: &str, content: &str, memory_type: MemoryType) -> Memory {
    Memory::new("_default", workspace_id, "_default", content, memory_type)
}

/// A test memory carrying a caller-supplied embedding, for search/ranking
/// tests that need control over similarity without depending on
/// [`MockEmbeddingProvider`]'s hash-derived output.
#[must_use]
pub fn test_memory_with_embedding(workspace_id: &str, content: &str, embedding: Vec<f32>) -> Memory {
    let mut memory = test_memory(workspace_id, content);
    memory.embedding = Some(embedding);
    memory
}

#[must_use]
pub fn test_workspace(tenant_id: &str, id: &str) -> Workspace {
    Workspace::new(tenant_id, id, id)
}

#[must_use]
pub fn test_context(workspace_id: &str, id: &str) -> Context {
    Context::new(workspace_id, id, id)
}

#[must_use]
pub fn test_session(workspace_id: &str, ttl_seconds: i64) -> Session {
    Session::new("_default", workspace_id, "_default", ttl_seconds)
}

#[must_use]
pub fn test_association(workspace_id: &str, source_id: &str, target_id: &str, relationship: &str) -> Association {
    Association::new(workspace_id, source_id, target_id, relationship, 0.8)
}

#[must_use]
pub fn test_contradiction(workspace_id: &str, memory_a_id: &str, memory_b_id: &str) -> ContradictionRecord {
    ContradictionRecord {
        id: memory_core::types::generate_id("contra_"),
        workspace_id: workspace_id.to_string(),
        memory_a_id: memory_a_id.to_string(),
        memory_b_id: memory_b_id.to_string(),
        contradiction_type: "factual".to_string(),
        confidence: 0.9,
        detection_method: "test_fixture".to_string(),
        detected_at: chrono::Utc::now(),
        resolved_at: None,
        resolution: None,
        merged_content: None,
    }
}
