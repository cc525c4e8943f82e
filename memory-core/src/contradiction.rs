//! Negation-pattern contradiction detection and resolution.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{info, warn};

use crate::error::Result;
use crate::storage::{SearchFilters, Storage};
use crate::types::{generate_id, ContradictionRecord, ResolutionStrategy};

/// Negation pairs used for simple textual contradiction detection. For each
/// pair, if content A contains one term and content B contains the other, a
/// negation-type contradiction is flagged.
pub const NEGATION_PAIRS: &[(&str, &str)] = &[
    ("use", "don't use"),
    ("use", "do not use"),
    ("use", "avoid"),
    ("enable", "disable"),
    ("add", "remove"),
    ("true", "false"),
    ("always", "never"),
    ("should", "should not"),
    ("should", "shouldn't"),
    ("must", "must not"),
    ("must", "mustn't"),
    ("can", "cannot"),
    ("can", "can't"),
    ("is", "is not"),
    ("is", "isn't"),
    ("prefer", "avoid"),
    ("recommended", "not recommended"),
    ("include", "exclude"),
    ("allow", "deny"),
    ("allow", "block"),
];

/// Minimum relevance for a memory to be considered as a contradiction
/// candidate against a newly-stored memory.
const CANDIDATE_MIN_RELEVANCE: f32 = 0.7;
/// Upper bound on candidates probed per check.
const CANDIDATE_LIMIT: usize = 20;

/// Detects and resolves contradictions between memories.
pub struct ContradictionService {
    storage: Arc<dyn Storage>,
}

impl ContradictionService {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        ContradictionService { storage }
    }

    /// Find contradictions between a newly-stored memory and existing ones:
    /// 1. Load the new memory.
    /// 2. Search for embedding-similar memories above [`CANDIDATE_MIN_RELEVANCE`].
    /// 3. Flag a negation-pattern contradiction for every similar memory whose
    ///    content opposes the new memory's content.
    /// 4. Persist and return the records created.
    pub async fn check_new_memory(&self, workspace_id: &str, memory_id: &str) -> Result<Vec<ContradictionRecord>> {
        let Some(new_memory) = self.storage.get_memory(workspace_id, memory_id, false).await? else {
            warn!(memory_id, workspace_id, "memory not found, skipping contradiction check");
            return Ok(Vec::new());
        };

        let Some(embedding) = new_memory.embedding.as_ref() else {
            return Ok(Vec::new());
        };

        let similar = self
            .storage
            .search_memories(
                workspace_id,
                embedding,
                CANDIDATE_LIMIT,
                0,
                CANDIDATE_MIN_RELEVANCE,
                &SearchFilters::default(),
            )
            .await?;

        let mut created = Vec::new();
        for (existing, relevance) in similar {
            if existing.id == memory_id {
                continue;
            }
            if has_negation_pattern(&new_memory.content, &existing.content) {
                let record = ContradictionRecord {
                    id: generate_id("contra_"),
                    workspace_id: workspace_id.to_string(),
                    memory_a_id: memory_id.to_string(),
                    memory_b_id: existing.id.clone(),
                    contradiction_type: "negation".to_string(),
                    confidence: relevance,
                    detection_method: "negation_pattern".to_string(),
                    detected_at: chrono::Utc::now(),
                    resolved_at: None,
                    resolution: None,
                    merged_content: None,
                };
                self.storage.create_contradiction(record.clone()).await?;
                info!(
                    memory_a = memory_id,
                    memory_b = %existing.id,
                    confidence = relevance,
                    "contradiction detected"
                );
                created.push(record);
            }
        }
        Ok(created)
    }

    /// Unresolved contradictions in a workspace.
    pub async fn get_unresolved(&self, workspace_id: &str, limit: usize) -> Result<Vec<ContradictionRecord>> {
        self.storage.get_unresolved_contradictions(workspace_id, limit).await
    }

    /// Resolve a contradiction by applying one of the four strategies:
    /// - `KeepA`: soft-delete memory B.
    /// - `KeepB`: soft-delete memory A.
    /// - `KeepBoth`: no memory mutation.
    /// - `Merge`: overwrite memory A's content with `merged_content`,
    ///   soft-delete memory B. Requires `merged_content`.
    pub async fn resolve(
        &self,
        workspace_id: &str,
        contradiction_id: &str,
        resolution: ResolutionStrategy,
        merged_content: Option<String>,
    ) -> Result<Option<ContradictionRecord>> {
        let Some(mut record) = self.storage.get_contradiction(workspace_id, contradiction_id).await? else {
            warn!(contradiction_id, workspace_id, "contradiction not found");
            return Ok(None);
        };

        match resolution {
            ResolutionStrategy::KeepA => {
                self.storage.soft_delete_memory(workspace_id, &record.memory_b_id).await?;
            }
            ResolutionStrategy::KeepB => {
                self.storage.soft_delete_memory(workspace_id, &record.memory_a_id).await?;
            }
            ResolutionStrategy::KeepBoth => {}
            ResolutionStrategy::Merge => {
                let Some(content) = merged_content.clone() else {
                    warn!(contradiction_id, "merge resolution requested without merged_content");
                    return Ok(None);
                };
                if let Some(mut memory_a) = self.storage.get_memory(workspace_id, &record.memory_a_id, false).await? {
                    memory_a.content = content;
                    memory_a.content_hash = crate::types::content_hash(&memory_a.content);
                    memory_a.updated_at = chrono::Utc::now();
                    self.storage.update_memory(memory_a).await?;
                }
                self.storage.soft_delete_memory(workspace_id, &record.memory_b_id).await?;
            }
        }

        record.resolved_at = Some(chrono::Utc::now());
        record.resolution = Some(resolution);
        record.merged_content = merged_content;
        self.storage.update_contradiction(record.clone()).await?;

        info!(contradiction_id, ?resolution, "contradiction resolved");
        Ok(Some(record))
    }
}

/// Word-boundary regexes for [`NEGATION_PAIRS`], compiled once. Boundaries
/// keep a term like "can" from matching inside "scan", which plain substring
/// search would not catch.
fn negation_regexes() -> &'static Vec<(Regex, Regex)> {
    static CACHE: OnceLock<Vec<(Regex, Regex)>> = OnceLock::new();
    CACHE.get_or_init(|| {
        NEGATION_PAIRS
            .iter()
            .map(|(term_pos, term_neg)| {
                let pos = Regex::new(&format!(r"\b{}\b", regex::escape(term_pos)))
                    .expect("negation term compiles to a valid regex");
                let neg = Regex::new(&format!(r"\b{}\b", regex::escape(term_neg)))
                    .expect("negation term compiles to a valid regex");
                (pos, neg)
            })
            .collect()
    })
}

/// Check for negation patterns between two texts, in either direction.
#[must_use]
pub fn has_negation_pattern(text_a: &str, text_b: &str) -> bool {
    let lower_a = text_a.to_lowercase();
    let lower_b = text_b.to_lowercase();

    negation_regexes().iter().any(|(re_pos, re_neg)| {
        (re_pos.is_match(&lower_a) && re_neg.is_match(&lower_b))
            || (re_neg.is_match(&lower_a) && re_pos.is_match(&lower_b))
    })
}

/// Filter contradiction records touching `memory_id` from a broader set,
/// useful for association-service convenience queries that reuse the
/// `contradicts` relationship label independently of this service.
#[must_use]
pub fn touching(records: &[ContradictionRecord], memory_id: &str) -> Vec<ContradictionRecord> {
    records
        .iter()
        .filter(|r| r.memory_a_id == memory_id || r.memory_b_id == memory_id)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::{Memory, MemoryStatus, MemoryType};

    #[test]
    fn negation_pattern_detects_should_should_not() {
        assert!(has_negation_pattern(
            "You should use async here",
            "You should not use async here"
        ));
    }

    #[test]
    fn negation_pattern_detects_either_direction() {
        assert!(has_negation_pattern("always validate input", "never validate input"));
        assert!(has_negation_pattern("never validate input", "always validate input"));
    }

    #[test]
    fn negation_pattern_false_when_unrelated() {
        assert!(!has_negation_pattern("the sky is blue", "cats are mammals"));
    }

    #[test]
    fn negation_pattern_is_case_insensitive() {
        assert!(has_negation_pattern("You SHOULD enable it", "You Should Not enable it"));
    }

    #[tokio::test]
    async fn check_new_memory_flags_and_persists_contradiction() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        let service = ContradictionService::new(storage.clone());

        let mut a = Memory::new("t", "w", "_default", "you should always enable caching", MemoryType::Semantic);
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = Memory::new("t", "w", "_default", "you should never enable caching", MemoryType::Semantic);
        b.embedding = Some(vec![1.0, 0.0]);
        storage.create_memory(a.clone()).await.unwrap();
        storage.create_memory(b.clone()).await.unwrap();

        let found = service.check_new_memory("w", &b.id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].contradiction_type, "negation");

        let unresolved = service.get_unresolved("w", 10).await.unwrap();
        assert_eq!(unresolved.len(), 1);
    }

    #[tokio::test]
    async fn resolve_keep_a_soft_deletes_b() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        let service = ContradictionService::new(storage.clone());

        let a = Memory::new("t", "w", "_default", "a", MemoryType::Semantic);
        let b = Memory::new("t", "w", "_default", "b", MemoryType::Semantic);
        storage.create_memory(a.clone()).await.unwrap();
        storage.create_memory(b.clone()).await.unwrap();

        let record = ContradictionRecord {
            id: generate_id("contra_"),
            workspace_id: "w".to_string(),
            memory_a_id: a.id.clone(),
            memory_b_id: b.id.clone(),
            contradiction_type: "negation".to_string(),
            confidence: 0.9,
            detection_method: "negation_pattern".to_string(),
            detected_at: chrono::Utc::now(),
            resolved_at: None,
            resolution: None,
            merged_content: None,
        };
        storage.create_contradiction(record.clone()).await.unwrap();

        let resolved = service
            .resolve("w", &record.id, ResolutionStrategy::KeepA, None)
            .await
            .unwrap()
            .unwrap();
        assert!(!resolved.is_unresolved());

        let b_after = storage.get_memory("w", &b.id, false).await.unwrap().unwrap();
        assert_eq!(b_after.status, MemoryStatus::Deleted);
        let a_after = storage.get_memory("w", &a.id, false).await.unwrap().unwrap();
        assert_eq!(a_after.status, MemoryStatus::Active);
    }

    #[tokio::test]
    async fn resolve_merge_requires_content() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        let service = ContradictionService::new(storage.clone());

        let a = Memory::new("t", "w", "_default", "a", MemoryType::Semantic);
        let b = Memory::new("t", "w", "_default", "b", MemoryType::Semantic);
        storage.create_memory(a.clone()).await.unwrap();
        storage.create_memory(b.clone()).await.unwrap();

        let record = ContradictionRecord {
            id: generate_id("contra_"),
            workspace_id: "w".to_string(),
            memory_a_id: a.id.clone(),
            memory_b_id: b.id.clone(),
            contradiction_type: "negation".to_string(),
            confidence: 0.9,
            detection_method: "negation_pattern".to_string(),
            detected_at: chrono::Utc::now(),
            resolved_at: None,
            resolution: None,
            merged_content: None,
        };
        storage.create_contradiction(record.clone()).await.unwrap();

        let result = service
            .resolve("w", &record.id, ResolutionStrategy::Merge, None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn touching_filters_by_memory_id() {
        let r1 = ContradictionRecord {
            id: "c1".to_string(),
            workspace_id: "w".to_string(),
            memory_a_id: "m1".to_string(),
            memory_b_id: "m2".to_string(),
            contradiction_type: "negation".to_string(),
            confidence: 0.5,
            detection_method: "negation_pattern".to_string(),
            detected_at: chrono::Utc::now(),
            resolved_at: None,
            resolution: None,
            merged_content: None,
        };
        let r2 = ContradictionRecord {
            memory_a_id: "m3".to_string(),
            memory_b_id: "m4".to_string(),
            id: "c2".to_string(),
            ..r1.clone()
        };
        let result = touching(&[r1.clone(), r2], "m1");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "c1");
    }
}
