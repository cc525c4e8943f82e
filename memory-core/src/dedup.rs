//! Deduplication decision function.
//!
//! Pure over `(content, content_hash, embedding, workspace_id)` plus the
//! candidate found via a hash or similarity probe; callers (the `Memory`
//! orchestrator) perform the actual storage mutation the decision calls for.

use serde::{Deserialize, Serialize};

use crate::embeddings::cosine_similarity;
use crate::types::Memory;

/// The outcome of a deduplication check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DedupDecision {
    /// Exact content-hash match: caller returns the existing memory unchanged.
    Skip {
        existing_memory_id: String,
        reason: String,
    },
    /// Semantic duplicate above the replace threshold: caller overwrites
    /// content + embedding, `importance <- max(new, 0.5)`.
    Update {
        existing_memory_id: String,
        similarity_score: f32,
        reason: String,
    },
    /// Semantic near-duplicate in the merge band: caller appends content,
    /// re-embeds, `importance <- max(old, new)`.
    Merge {
        existing_memory_id: String,
        similarity_score: f32,
        reason: String,
    },
    /// No duplicate found: caller stores a new memory.
    Create { reason: String },
}

/// Configurable thresholds for the semantic duplicate bands.
#[derive(Debug, Clone, Copy)]
pub struct DedupThresholds {
    /// Similarity at or above which a match is treated as a near-exact
    /// replacement (UPDATE).
    pub replace_threshold: f32,
    /// Similarity at or above which a match is treated as a near-duplicate
    /// to merge (MERGE), but below `replace_threshold`.
    pub merge_threshold: f32,
}

impl Default for DedupThresholds {
    fn default() -> Self {
        DedupThresholds {
            replace_threshold: 0.97,
            merge_threshold: 0.90,
        }
    }
}

/// Decide what to do with newly-ingested content, given:
/// - an exact hash match, if storage found one;
/// - the most similar existing memory by embedding cosine similarity, if any.
#[must_use]
pub fn check_duplicate(
    exact_hash_match: Option<&Memory>,
    most_similar: Option<(&Memory, f32)>,
    thresholds: DedupThresholds,
) -> DedupDecision {
    if let Some(existing) = exact_hash_match {
        return DedupDecision::Skip {
            existing_memory_id: existing.id.clone(),
            reason: "exact content hash match".to_string(),
        };
    }

    if let Some((existing, similarity)) = most_similar {
        if similarity >= thresholds.replace_threshold {
            return DedupDecision::Update {
                existing_memory_id: existing.id.clone(),
                similarity_score: similarity,
                reason: format!("semantic duplicate at similarity {similarity:.4}"),
            };
        }
        if similarity >= thresholds.merge_threshold {
            return DedupDecision::Merge {
                existing_memory_id: existing.id.clone(),
                similarity_score: similarity,
                reason: format!("near-duplicate at similarity {similarity:.4}"),
            };
        }
    }

    DedupDecision::Create {
        reason: "no duplicate found".to_string(),
    }
}

/// Find the most similar candidate among `candidates` to `embedding`, if any.
#[must_use]
pub fn most_similar<'a>(embedding: &[f32], candidates: &'a [Memory]) -> Option<(&'a Memory, f32)> {
    candidates
        .iter()
        .filter_map(|m| {
            m.embedding
                .as_ref()
                .map(|e| (m, cosine_similarity(embedding, e)))
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

/// Apply the MERGE append policy: `old + "\n\n---\n\n" + new`.
#[must_use]
pub fn merge_content(old: &str, new: &str) -> String {
    format!("{old}\n\n---\n\n{new}")
}
