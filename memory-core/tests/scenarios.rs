//! End-to-end scenarios exercised through [`MemoryService`] rather than
//! through individual service unit tests: a plain remember/recall round
//! trip, exact-duplicate dedup, fact decomposition, contradiction
//! detection, graph-expansion scoring, and session working-memory
//! write-behind.

use std::sync::Arc;

use async_trait::async_trait;

use memory_core::cache::InMemoryCache;
use memory_core::config::EngineConfig;
use memory_core::embeddings::EmbeddingProvider;
use memory_core::error::Result;
use memory_core::llm::{Completion, LlmProfile, LlmService};
use memory_core::memory::{MemoryService, RecallInput};
use memory_core::session::SessionService;
use memory_core::storage::{InMemoryStorage, Storage};
use memory_core::types::{Direction, MemoryStatus, MemoryType, Session};

/// A deterministic bag-of-words embedding provider: each vocabulary term
/// present in the text sets one vector dimension, so texts sharing most of
/// their vocabulary cosine-embed close together. `MockEmbeddingProvider`
/// hashes whole strings, which makes deliberately-similar test content embed
/// no more alike than unrelated content; these scenarios need the opposite.
struct KeywordEmbeddingProvider {
    vocabulary: Vec<&'static str>,
}

impl KeywordEmbeddingProvider {
    fn new(vocabulary: Vec<&'static str>) -> Self {
        KeywordEmbeddingProvider { vocabulary }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|term| if lower.contains(term) { 1.0 } else { 0.0 })
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }
}

/// A test-double LLM that always reports a fixed JSON array of facts, for
/// exercising the decomposition path without a real model.
struct FixedFactsLlm {
    facts: Vec<String>,
}

#[async_trait]
impl LlmService for FixedFactsLlm {
    async fn synthesize(&self, _prompt: &str, _max_tokens: u32, _temperature: Option<f32>, _profile: LlmProfile) -> Result<String> {
        Ok(String::new())
    }

    async fn complete(&self, _request: &str, _profile: LlmProfile) -> Result<Completion> {
        let content = serde_json::to_string(&self.facts).unwrap();
        Ok(Completion {
            content,
            prompt_tokens: 0,
            completion_tokens: 0,
        })
    }
}

fn plain_service() -> (MemoryService, Arc<dyn Storage>) {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(memory_core::embeddings::MockEmbeddingProvider::new(16));
    let cache = Arc::new(InMemoryCache::new());
    let service = MemoryService::new(storage.clone(), embeddings, cache, None, None, None, EngineConfig::default());
    (service, storage)
}

// S1: plain remember then recall finds it back by semantic search.
#[tokio::test]
async fn s1_plain_remember_and_recall() {
    let (service, storage) = plain_service();
    storage.ensure_reserved_entities().await.unwrap();

    let stored = service
        .remember(
            "w1",
            memory_core::types::RememberInput {
                content: "the api gateway retries failed requests three times".to_string(),
                ..Default::default()
            },
            true,
        )
        .await
        .expect("remember succeeds");

    let recalled = service
        .recall(
            "w1",
            RecallInput {
                query: "the api gateway retries failed requests three times".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("recall succeeds");

    assert!(recalled.memories.iter().any(|m| m.id == stored.id));
}

// S2: remembering identical content twice is an exact-hash skip, not a
// second row, and doesn't double the access count held by the first call.
#[tokio::test]
async fn s2_exact_duplicate_is_skipped_not_recreated() {
    let (service, storage) = plain_service();
    storage.ensure_reserved_entities().await.unwrap();

    let first = service
        .remember("w1", memory_core::types::RememberInput { content: "the build takes four minutes".to_string(), ..Default::default() }, true)
        .await
        .unwrap();
    let second = service
        .remember("w1", memory_core::types::RememberInput { content: "the build takes four minutes".to_string(), ..Default::default() }, true)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    let all_ids: Vec<_> = storage
        .get_recent_memories("w1", None, 100, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(all_ids.iter().filter(|id| **id == first.id).count(), 1);
}

// S3: long enough content with multiple sentences is decomposed into
// separate fact memories, each linked back to the archived parent via a
// `part_of` association.
#[tokio::test]
async fn s3_long_content_decomposes_into_linked_facts() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(memory_core::embeddings::MockEmbeddingProvider::new(16));
    let cache = Arc::new(InMemoryCache::new());
    let facts = vec![
        "the service runs on port eight thousand.".to_string(),
        "it requires a postgres database.".to_string(),
        "deployments happen through a blue-green rollout.".to_string(),
    ];
    let llm: Arc<dyn LlmService> = Arc::new(FixedFactsLlm { facts: facts.clone() });
    let service = MemoryService::new(
        storage.clone(),
        embeddings,
        cache,
        Some(llm),
        None,
        None,
        EngineConfig::default(),
    );
    storage.ensure_reserved_entities().await.unwrap();

    let composite = "The service runs on port eight thousand. It requires a postgres database. \
                      Deployments happen through a blue-green rollout process that takes about ten minutes.";
    let parent = service
        .remember("w1", memory_core::types::RememberInput { content: composite.to_string(), ..Default::default() }, true)
        .await
        .expect("remember succeeds");

    let refetched = service.get("w1", &parent.id, true).await.unwrap().unwrap();
    assert_eq!(refetched.status, MemoryStatus::Archived, "parent is archived once decomposed");

    let related = storage.get_related("w1", &parent.id, None, Direction::Incoming).await.unwrap();
    assert_eq!(related.len(), facts.len(), "one part_of association per decomposed fact");
    assert!(related.iter().all(|a| a.relationship == "part_of"));
}

// S4: two memories about the same topic that negate each other are flagged
// as a contradiction, then resolved by keeping one and soft-deleting the
// other.
#[tokio::test]
async fn s4_contradiction_detected_and_resolved() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    // Vocabulary chosen so the two sentences below share four of six terms
    // (should/caching/service/production) and differ on one (enable vs
    // disable), giving a cosine similarity of 0.8: above the contradiction
    // service's 0.7 relevance floor but below dedup's 0.90 merge threshold,
    // so the second remember is a genuinely new memory, not a dedup merge.
    let embeddings: Arc<dyn EmbeddingProvider> =
        Arc::new(KeywordEmbeddingProvider::new(vec!["should", "enable", "disable", "caching", "service", "production"]));
    let cache = Arc::new(InMemoryCache::new());
    let service = MemoryService::new(storage.clone(), embeddings, cache, None, None, None, EngineConfig::default());
    storage.ensure_reserved_entities().await.unwrap();

    service
        .remember(
            "w1",
            memory_core::types::RememberInput { content: "you should enable caching for this service in production".to_string(), ..Default::default() },
            true,
        )
        .await
        .unwrap();
    let second = service
        .remember(
            "w1",
            memory_core::types::RememberInput { content: "you should disable caching for this service in production".to_string(), ..Default::default() },
            true,
        )
        .await
        .unwrap();

    let unresolved = storage.get_unresolved_contradictions("w1", 10).await.unwrap();
    assert_eq!(unresolved.len(), 1);
    let record = &unresolved[0];
    assert!(record.memory_a_id == second.id || record.memory_b_id == second.id);

    let contradictions = memory_core::contradiction::ContradictionService::new(storage.clone());
    let resolved = contradictions
        .resolve("w1", &record.id, memory_core::types::ResolutionStrategy::KeepA, None)
        .await
        .unwrap()
        .expect("contradiction exists");
    assert!(!resolved.is_unresolved());

    let b = storage.get_memory_by_id(&resolved.memory_b_id).await.unwrap().unwrap();
    assert_eq!(b.status, MemoryStatus::Deleted);
}

// S5: recall expands through an association graph, and a directly-linked
// memory's discovered score reflects the seed's score times the edge
// strength times the per-hop decay, not a raw copy of the seed score.
#[tokio::test]
async fn s5_recall_expands_via_associations_with_decayed_score() {
    let (service, storage) = plain_service();
    storage.ensure_reserved_entities().await.unwrap();

    let seed = service
        .remember("w1", memory_core::types::RememberInput { content: "the checkout flow uses stripe for payments".to_string(), ..Default::default() }, true)
        .await
        .unwrap();
    let linked = service
        .remember("w1", memory_core::types::RememberInput { content: "stripe webhooks must be verified with a signing secret".to_string(), ..Default::default() }, true)
        .await
        .unwrap();

    let assoc = memory_core::types::Association::new("w1", &seed.id, &linked.id, "related_to", 0.5);
    storage.create_association(assoc).await.unwrap();

    let recalled = service
        .recall(
            "w1",
            RecallInput {
                query: "the checkout flow uses stripe for payments".to_string(),
                include_associations: Some(true),
                traverse_depth: Some(1),
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let discovered = recalled
        .memories
        .iter()
        .find(|m| m.id == linked.id)
        .expect("association-expanded memory present in results");
    assert_eq!(discovered.source_scope, Some(memory_core::types::SourceScope::Association));
    assert!(discovered.boosted_score.unwrap() > 0.0);
    assert!(discovered.boosted_score.unwrap() < 0.5, "per-hop decay must shrink the raw edge strength");
}

// S6: working memory set during a session is committed into long-term
// storage once the session commits, via `MemoryService`'s `SessionCommitHook`
// implementation.
#[tokio::test]
async fn s6_session_working_memory_commits_into_long_term_storage() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    storage.ensure_reserved_entities().await.unwrap();
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(memory_core::embeddings::MockEmbeddingProvider::new(16));
    let cache = Arc::new(InMemoryCache::new());
    let memory_service = Arc::new(MemoryService::new(
        storage.clone(),
        embeddings,
        cache,
        None,
        None,
        None,
        EngineConfig::default(),
    ));

    let session_service = SessionService::new(storage.clone()).with_commit_hook(memory_service.clone());

    let session = Session::new("_default", "w1", "_default", 3600);
    session_service.create_session(session.clone()).await.unwrap();
    session_service
        .set_working_memory("w1", &session.id, "draft_summary", serde_json::json!("investigated the flaky test and found a race in the retry loop"), None)
        .await
        .unwrap();

    let result = session_service.commit_session("w1", &session.id).await.unwrap();
    assert_eq!(result.memories_committed, 1);

    let recent = storage.get_recent_memories("w1", None, 10, 0).await.unwrap();
    assert!(
        recent.iter().any(|m| m.memory_type == MemoryType::Semantic || m.content.contains("race in the retry loop")),
        "committed working memory must land as a long-term memory"
    );

    let committed_session = storage.get_session("w1", &session.id).await.unwrap().unwrap();
    assert!(committed_session.committed_at.is_some());
}

