use memory_core::storage::{DecayQuery, SearchFilters, Storage};
use memory_core::types::{Association, ContradictionRecord, Direction, Memory, MemoryType, Session};

use crate::RedbStorage;

async fn open_scratch() -> RedbStorage {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.keep().join("memory.redb");
    RedbStorage::new(path).await.expect("open redb storage")
}

fn sample_memory(workspace_id: &str, content: &str) -> Memory {
    Memory::new("t1", workspace_id, "_default", content, MemoryType::Semantic)
}

#[tokio::test]
async fn create_and_get_memory_round_trips() {
    let storage = open_scratch().await;
    let memory = sample_memory("w1", "paris is the capital of france");
    storage.create_memory(memory.clone()).await.unwrap();

    let fetched = storage
        .get_memory("w1", &memory.id, false)
        .await
        .unwrap()
        .expect("memory present");
    assert_eq!(fetched.content, memory.content);
    assert_eq!(fetched.access_count, 0);
}

#[tokio::test]
async fn get_memory_by_hash_finds_duplicate_content() {
    let storage = open_scratch().await;
    let memory = sample_memory("w1", "the sky is blue");
    storage.create_memory(memory.clone()).await.unwrap();

    let found = storage
        .get_memory_by_hash("w1", &memory.content_hash)
        .await
        .unwrap()
        .expect("hash index hit");
    assert_eq!(found.id, memory.id);

    let miss = storage
        .get_memory_by_hash("w2", &memory.content_hash)
        .await
        .unwrap();
    assert!(miss.is_none(), "hash index is workspace-scoped");
}

#[tokio::test]
async fn track_access_increments_exactly_once() {
    let storage = open_scratch().await;
    let memory = sample_memory("w1", "rust ownership rules");
    storage.create_memory(memory.clone()).await.unwrap();

    let fetched = storage
        .get_memory("w1", &memory.id, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.access_count, 1);
    assert!(fetched.last_accessed_at.is_some());

    let fetched_again = storage
        .get_memory("w1", &memory.id, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched_again.access_count, 2);
}

#[tokio::test]
async fn hard_delete_purges_touching_associations() {
    let storage = open_scratch().await;
    let a = sample_memory("w1", "memory a");
    let b = sample_memory("w1", "memory b");
    storage.create_memory(a.clone()).await.unwrap();
    storage.create_memory(b.clone()).await.unwrap();

    let assoc = Association::new("w1", &a.id, &b.id, "related_to", 0.8);
    storage.create_association(assoc.clone()).await.unwrap();
    assert!(storage
        .association_exists("w1", &a.id, &b.id, "related_to")
        .await
        .unwrap());

    let deleted = storage.hard_delete_memory("w1", &a.id).await.unwrap();
    assert!(deleted);
    assert!(storage.get_memory_by_id(&a.id).await.unwrap().is_none());

    assert!(!storage
        .association_exists("w1", &a.id, &b.id, "related_to")
        .await
        .unwrap());
    let related = storage
        .get_related("w1", &b.id, None, Direction::Both)
        .await
        .unwrap();
    assert!(related.is_empty(), "dangling association must be purged");
}

#[tokio::test]
async fn traverse_graph_never_repeats_a_node() {
    let storage = open_scratch().await;
    let a = sample_memory("w1", "a");
    let b = sample_memory("w1", "b");
    let c = sample_memory("w1", "c");
    for m in [&a, &b, &c] {
        storage.create_memory(m.clone()).await.unwrap();
    }
    // a -> b -> c -> a, a cycle.
    storage
        .create_association(Association::new("w1", &a.id, &b.id, "related_to", 0.9))
        .await
        .unwrap();
    storage
        .create_association(Association::new("w1", &b.id, &c.id, "related_to", 0.9))
        .await
        .unwrap();
    storage
        .create_association(Association::new("w1", &c.id, &a.id, "related_to", 0.9))
        .await
        .unwrap();

    let paths = storage
        .traverse_graph("w1", &a.id, 5, None, Direction::Outgoing)
        .await
        .unwrap();

    for path in &paths {
        let mut seen = std::collections::HashSet::new();
        for node in &path.nodes {
            assert!(seen.insert(node.id.clone()), "node visited twice in one path");
        }
    }
    // With 3 nodes and a 3-cycle, traversal should discover exactly 2 extensions (b, then c).
    assert_eq!(paths.len(), 2);
}

#[tokio::test]
async fn search_memories_orders_by_descending_relevance() {
    let storage = open_scratch().await;
    let mut close = sample_memory("w1", "cats are small domesticated felines");
    close.embedding = Some(vec![1.0, 0.0, 0.0]);
    let mut far = sample_memory("w1", "quarterly tax filing deadlines");
    far.embedding = Some(vec![0.0, 1.0, 0.0]);
    storage.create_memory(close.clone()).await.unwrap();
    storage.create_memory(far.clone()).await.unwrap();

    let results = storage
        .search_memories("w1", &[1.0, 0.0, 0.0], 10, 0, 0.0, &SearchFilters::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0.id, close.id);
    assert!(results[0].1 >= results[1].1);
}

#[tokio::test]
async fn soft_deleted_memories_are_excluded_from_default_search() {
    let storage = open_scratch().await;
    let mut memory = sample_memory("w1", "deleted soon");
    memory.embedding = Some(vec![1.0, 0.0]);
    storage.create_memory(memory.clone()).await.unwrap();
    storage.soft_delete_memory("w1", &memory.id).await.unwrap();

    let results = storage
        .search_memories("w1", &[1.0, 0.0], 10, 0, 0.0, &SearchFilters::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn sessions_and_working_memory_round_trip() {
    let storage = open_scratch().await;
    let session = Session::new("t1", "w1", "_default", 3600);
    storage.create_session(session.clone()).await.unwrap();

    let fetched = storage
        .get_session("w1", &session.id)
        .await
        .unwrap()
        .expect("session present");
    assert_eq!(fetched.id, session.id);

    let entry = memory_core::types::WorkingMemoryEntry {
        session_id: session.id.clone(),
        key: "draft".to_string(),
        value: serde_json::json!({"text": "in progress"}),
        expires_at: None,
        created_at: chrono::Utc::now(),
    };
    storage.set_working_memory(entry.clone()).await.unwrap();

    let all = storage.get_all_working_memory(&session.id).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].key, "draft");

    let deleted = storage.delete_session("w1", &session.id).await.unwrap();
    assert!(deleted);
    let remaining = storage.get_all_working_memory(&session.id).await.unwrap();
    assert!(
        remaining.is_empty(),
        "deleting a session must sweep its working memory"
    );
}

#[tokio::test]
async fn contradictions_round_trip_and_filter_unresolved() {
    let storage = open_scratch().await;
    let a = sample_memory("w1", "the meeting is at 3pm");
    let b = sample_memory("w1", "the meeting is at 4pm");
    storage.create_memory(a.clone()).await.unwrap();
    storage.create_memory(b.clone()).await.unwrap();

    let record = ContradictionRecord {
        id: memory_core::types::generate_id("contra_"),
        workspace_id: "w1".to_string(),
        memory_a_id: a.id.clone(),
        memory_b_id: b.id.clone(),
        contradiction_type: "factual".to_string(),
        confidence: 0.9,
        detection_method: "llm".to_string(),
        detected_at: chrono::Utc::now(),
        resolved_at: None,
        resolution: None,
        merged_content: None,
    };
    storage.create_contradiction(record.clone()).await.unwrap();

    let unresolved = storage
        .get_unresolved_contradictions("w1", 10)
        .await
        .unwrap();
    assert_eq!(unresolved.len(), 1);

    let mut resolved = record.clone();
    resolved.resolved_at = Some(chrono::Utc::now());
    resolved.resolution = Some(memory_core::types::ResolutionStrategy::KeepNewer);
    storage.update_contradiction(resolved).await.unwrap();

    let unresolved_after = storage
        .get_unresolved_contradictions("w1", 10)
        .await
        .unwrap();
    assert!(unresolved_after.is_empty());
}

#[tokio::test]
async fn decay_query_respects_pinned_exclusion() {
    let storage = open_scratch().await;
    let mut pinned = sample_memory("w1", "never decay this");
    pinned.pinned = true;
    let unpinned = sample_memory("w1", "fine to decay");
    storage.create_memory(pinned.clone()).await.unwrap();
    storage.create_memory(unpinned.clone()).await.unwrap();

    let candidates = storage
        .get_memories_for_decay(
            "w1",
            &DecayQuery {
                min_age_days: 0,
                exclude_pinned: true,
            },
        )
        .await
        .unwrap();

    assert!(candidates.iter().all(|m| m.id != pinned.id));
    assert!(candidates.iter().any(|m| m.id == unpinned.id));
}

#[tokio::test]
async fn reopening_the_database_preserves_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.keep().join("memory.redb");
    let memory = sample_memory("w1", "persisted across reopen");

    {
        let storage = RedbStorage::new(&path).await.unwrap();
        storage.create_memory(memory.clone()).await.unwrap();
    }

    let reopened = RedbStorage::new(&path).await.unwrap();
    let fetched = reopened
        .get_memory_by_id(&memory.id)
        .await
        .unwrap()
        .expect("memory survives reopen");
    assert_eq!(fetched.content, memory.content);
}

#[tokio::test]
async fn health_check_reports_true_for_a_fresh_database() {
    let storage = open_scratch().await;
    assert!(storage.health_check().await.unwrap());
}

