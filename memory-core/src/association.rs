//! Create/query/traverse typed edges between memories; auto-associate on
//! similarity; classify edge types.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::LlmService;
use crate::ontology::{self, DEFAULT_RELATIONSHIP};
use crate::storage::{GraphPath, Storage};
use crate::types::{Association, Direction};

/// Fallback relationship for [`AssociationService::auto_associate`] when no
/// LLM classification is available. Distinct from [`DEFAULT_RELATIONSHIP`],
/// which is the fallback for a genuine classification failure.
const AUTO_ASSOCIATE_DEFAULT_RELATIONSHIP: &str = "similar_to";

/// Input for [`AssociationService::associate`].
#[derive(Debug, Clone)]
pub struct AssociateInput {
    pub source_id: String,
    pub target_id: String,
    pub relationship: String,
    pub strength: f32,
    pub metadata: serde_json::Value,
}

/// Input for [`AssociationService::traverse`].
#[derive(Debug, Clone)]
pub struct TraverseInput {
    pub start_id: String,
    pub max_depth: usize,
    pub relationships: Option<Vec<String>>,
    pub direction: Direction,
}

/// One auto-association candidate: an existing memory id plus the
/// similarity score that surfaced it.
#[derive(Debug, Clone, Copy)]
pub struct AutoAssociateCandidate<'a> {
    pub candidate_id: &'a str,
    pub similarity: f32,
}

/// Associates, queries and traverses the typed edge graph between memories.
pub struct AssociationService {
    storage: Arc<dyn Storage>,
    llm: Option<Arc<dyn LlmService>>,
}

impl AssociationService {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, llm: Option<Arc<dyn LlmService>>) -> Self {
        AssociationService { storage, llm }
    }

    /// Create an edge. Validates both endpoints exist (non-tracking reads),
    /// rejects self-edges, warns on unknown ontology labels.
    pub async fn associate(&self, workspace_id: &str, input: AssociateInput) -> Result<Association> {
        if input.source_id == input.target_id {
            return Err(Error::Validation(
                "self-association is not allowed: source_id == target_id".to_string(),
            ));
        }

        if self
            .storage
            .get_memory(workspace_id, &input.source_id, false)
            .await?
            .is_none()
        {
            return Err(Error::not_found("memory", &input.source_id));
        }
        if self
            .storage
            .get_memory(workspace_id, &input.target_id, false)
            .await?
            .is_none()
        {
            return Err(Error::not_found("memory", &input.target_id));
        }

        if !ontology::validate_relationship(&input.relationship) {
            warn!(
                relationship = %input.relationship,
                "association created with a relationship label not present in the ontology"
            );
        }

        let mut association = Association::new(
            workspace_id,
            input.source_id,
            input.target_id,
            input.relationship,
            input.strength,
        );
        association.metadata = input.metadata;
        self.storage.create_association(association.clone()).await?;
        Ok(association)
    }

    /// Edges touching `memory_id`, optionally filtered by relationship label.
    pub async fn get_related(
        &self,
        workspace_id: &str,
        memory_id: &str,
        relationships: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<Association>> {
        self.storage
            .get_related(workspace_id, memory_id, relationships, direction)
            .await
    }

    /// Thin wrapper over the storage BFS.
    pub async fn traverse(&self, workspace_id: &str, input: TraverseInput) -> Result<Vec<GraphPath>> {
        self.storage
            .traverse_graph(
                workspace_id,
                &input.start_id,
                input.max_depth,
                input.relationships.as_deref(),
                input.direction,
            )
            .await
    }

    /// For each candidate at or above `threshold`, classify the edge label
    /// (LLM-backed when available and `new_content` is given, else
    /// `similar_to`) and create an edge `new_memory_id -> candidate_id`.
    /// Best-effort: individual failures are logged and skipped.
    pub async fn auto_associate(
        &self,
        workspace_id: &str,
        new_memory_id: &str,
        candidates: &[AutoAssociateCandidate<'_>],
        threshold: f32,
        new_content: Option<&str>,
    ) -> Result<Vec<Association>> {
        let mut created = Vec::new();
        for candidate in candidates {
            if candidate.candidate_id == new_memory_id || candidate.similarity < threshold {
                continue;
            }

            let relationship = self
                .classify_edge(candidate.candidate_id, workspace_id, new_content)
                .await;

            let metadata = serde_json::json!({
                "auto_generated": true,
                "similarity_score": candidate.similarity,
            });

            let result = self
                .associate(
                    workspace_id,
                    AssociateInput {
                        source_id: new_memory_id.to_string(),
                        target_id: candidate.candidate_id.to_string(),
                        relationship,
                        strength: candidate.similarity,
                        metadata,
                    },
                )
                .await;

            match result {
                Ok(assoc) => created.push(assoc),
                Err(e) => {
                    warn!(
                        candidate_id = candidate.candidate_id,
                        error = %e,
                        "auto-association skipped for candidate"
                    );
                }
            }
        }
        Ok(created)
    }

    async fn classify_edge(&self, candidate_id: &str, workspace_id: &str, new_content: Option<&str>) -> String {
        let (Some(llm), Some(new_content)) = (&self.llm, new_content) else {
            return AUTO_ASSOCIATE_DEFAULT_RELATIONSHIP.to_string();
        };
        let Ok(Some(candidate)) = self.storage.get_memory(workspace_id, candidate_id, false).await else {
            return AUTO_ASSOCIATE_DEFAULT_RELATIONSHIP.to_string();
        };
        match classify_relationship(llm.as_ref(), new_content, &candidate.content).await {
            Ok(label) => label,
            Err(e) => {
                debug!(error = %e, "relationship classification fell back to related_to");
                DEFAULT_RELATIONSHIP.to_string()
            }
        }
    }

    /// Associations whose relationship is `contradicts`, touching `memory_id`.
    pub async fn find_contradictions(&self, workspace_id: &str, memory_id: &str) -> Result<Vec<Association>> {
        self.get_related(
            workspace_id,
            memory_id,
            Some(&["contradicts".to_string()]),
            Direction::Both,
        )
        .await
    }

    /// Follows `causes`/`leads_to` edges outward from `memory_id`.
    pub async fn get_causal_chain(&self, workspace_id: &str, memory_id: &str, max_depth: usize) -> Result<Vec<GraphPath>> {
        self.traverse(
            workspace_id,
            TraverseInput {
                start_id: memory_id.to_string(),
                max_depth,
                relationships: Some(vec!["causes".to_string(), "leads_to".to_string()]),
                direction: Direction::Outgoing,
            },
        )
        .await
    }

    /// Memories connected to a `problem_id` via `solves`/`addresses` edges.
    pub async fn get_solutions_for_problem(&self, workspace_id: &str, problem_id: &str) -> Result<Vec<Association>> {
        self.get_related(
            workspace_id,
            problem_id,
            Some(&["solves".to_string(), "addresses".to_string()]),
            Direction::Incoming,
        )
        .await
    }

    /// Edges touching `memory_id` restricted to labels in `category`.
    pub async fn get_related_by_category(
        &self,
        workspace_id: &str,
        memory_id: &str,
        category: &str,
        direction: Direction,
    ) -> Result<Vec<Association>> {
        let labels: Vec<String> = ontology::get_relationships_by_category(category)
            .into_iter()
            .map(str::to_string)
            .collect();
        self.get_related(workspace_id, memory_id, Some(&labels), direction).await
    }
}

/// LLM-backed relationship classification, falling back to `related_to` on
/// any failure.
pub async fn classify_relationship(llm: &dyn LlmService, content_a: &str, content_b: &str) -> Result<String> {
    use crate::llm::LlmProfile;
    let prompt = format!(
        "Classify the relationship from A to B as one ontology label.\nA: {content_a}\nB: {content_b}"
    );
    match llm.synthesize(&prompt, 16, Some(0.0), LlmProfile::Default).await {
        Ok(label) => {
            let label = label.trim().to_lowercase();
            if ontology::validate_relationship(&label) {
                Ok(label)
            } else {
                Ok(DEFAULT_RELATIONSHIP.to_string())
            }
        }
        Err(_) => Ok(DEFAULT_RELATIONSHIP.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorage, Storage};
    use crate::types::{Memory, MemoryType};

    async fn service() -> (AssociationService, Arc<dyn Storage>, Memory, Memory) {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        let a = Memory::new("t", "w", "_default", "a", MemoryType::Semantic);
        let b = Memory::new("t", "w", "_default", "b", MemoryType::Semantic);
        storage.create_memory(a.clone()).await.unwrap();
        storage.create_memory(b.clone()).await.unwrap();
        (AssociationService::new(storage.clone(), None), storage, a, b)
    }

    #[tokio::test]
    async fn self_association_is_rejected() {
        let (svc, _storage, a, _b) = service().await;
        let result = svc
            .associate(
                "w",
                AssociateInput {
                    source_id: a.id.clone(),
                    target_id: a.id.clone(),
                    relationship: "related_to".to_string(),
                    strength: 0.5,
                    metadata: serde_json::json!({}),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn missing_endpoint_is_not_found() {
        let (svc, _storage, a, _b) = service().await;
        let result = svc
            .associate(
                "w",
                AssociateInput {
                    source_id: a.id.clone(),
                    target_id: "mem_does_not_exist".to_string(),
                    relationship: "related_to".to_string(),
                    strength: 0.5,
                    metadata: serde_json::json!({}),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn associate_persists_and_is_queryable() {
        let (svc, _storage, a, b) = service().await;
        svc.associate(
            "w",
            AssociateInput {
                source_id: a.id.clone(),
                target_id: b.id.clone(),
                relationship: "similar_to".to_string(),
                strength: 0.8,
                metadata: serde_json::json!({}),
            },
        )
        .await
        .unwrap();

        let related = svc
            .get_related("w", &a.id, None, Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].target_id, b.id);
    }

    #[tokio::test]
    async fn auto_associate_defaults_to_similar_to_without_llm() {
        let (svc, storage, a, b) = service().await;
        let created = svc
            .auto_associate(
                "w",
                &a.id,
                &[AutoAssociateCandidate {
                    candidate_id: &b.id,
                    similarity: 0.9,
                }],
                0.6,
                None,
            )
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].relationship, "similar_to");
        assert!(storage
            .association_exists("w", &a.id, &b.id, "similar_to")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn auto_associate_skips_below_threshold_and_self() {
        let (svc, _storage, a, b) = service().await;
        let created = svc
            .auto_associate(
                "w",
                &a.id,
                &[
                    AutoAssociateCandidate {
                        candidate_id: &b.id,
                        similarity: 0.4,
                    },
                    AutoAssociateCandidate {
                        candidate_id: &a.id,
                        similarity: 0.99,
                    },
                ],
                0.6,
                None,
            )
            .await
            .unwrap();
        assert!(created.is_empty());
    }
}
