//! Hierarchical summary generation: `abstract` and `overview`
//! tiers, produced via LLM summarization and persisted onto the memory.
//! Best-effort enrichment — failures are warned and swallowed, never
//! propagated to the caller.

use std::sync::Arc;

use tracing::warn;

use crate::llm::{LlmProfile, LlmService};
use crate::storage::Storage;

const ABSTRACT_MAX_TOKENS: u32 = 40;
const OVERVIEW_MAX_TOKENS: u32 = 150;

/// Generates and persists the `abstract`/`overview` summary tiers for a memory.
pub struct TieringService {
    storage: Arc<dyn Storage>,
    llm: Option<Arc<dyn LlmService>>,
}

impl TieringService {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, llm: Option<Arc<dyn LlmService>>) -> Self {
        TieringService { storage, llm }
    }

    /// Generate and persist both tiers inline. Never returns an error to the
    /// caller: any failure along the way is logged and the memory is left
    /// with whichever tiers (if any) were already produced.
    pub async fn generate_tiers(&self, workspace_id: &str, memory_id: &str) {
        let Some(llm) = &self.llm else {
            warn!(memory_id, "no llm service configured, skipping tier generation");
            return;
        };

        let memory = match self.storage.get_memory(workspace_id, memory_id, false).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                warn!(memory_id, workspace_id, "memory not found, skipping tier generation");
                return;
            }
            Err(e) => {
                warn!(memory_id, error = %e, "failed to load memory for tier generation");
                return;
            }
        };

        let abstract_summary = summarize(llm.as_ref(), &memory.content, "one short sentence", ABSTRACT_MAX_TOKENS).await;
        let overview_summary = summarize(llm.as_ref(), &memory.content, "two to three sentences", OVERVIEW_MAX_TOKENS).await;

        if abstract_summary.is_none() && overview_summary.is_none() {
            return;
        }

        let mut updated = memory;
        if let Some(s) = abstract_summary {
            updated.abstract_summary = Some(s);
        }
        if let Some(s) = overview_summary {
            updated.overview_summary = Some(s);
        }
        updated.updated_at = chrono::Utc::now();

        if let Err(e) = self.storage.update_memory(updated).await {
            warn!(memory_id, error = %e, "failed to persist generated tiers");
        }
    }

    /// Enqueue background tier generation via a task scheduler. Intended to
    /// be wired to [`crate::tasks::TaskService::schedule_task`] with task
    /// type `generate_tiers`; left here as the inline fallback that callers
    /// use when no task scheduler is configured.
    pub async fn request_tier_generation(&self, workspace_id: &str, memory_id: &str) {
        self.generate_tiers(workspace_id, memory_id).await;
    }
}

async fn summarize(llm: &dyn LlmService, content: &str, length_hint: &str, max_tokens: u32) -> Option<String> {
    let prompt = format!("Summarize the following in {length_hint}:\n\n{content}");
    match llm.synthesize(&prompt, max_tokens, Some(0.3), LlmProfile::Reflection).await {
        Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "tier summarization failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::Completion;
    use crate::storage::InMemoryStorage;
    use crate::types::{Memory, MemoryType};
    use async_trait::async_trait;

    struct StubLlm;

    #[async_trait]
    impl LlmService for StubLlm {
        async fn synthesize(&self, prompt: &str, _: u32, _: Option<f32>, _: LlmProfile) -> Result<String> {
            Ok(format!("summary of: {}", &prompt[..prompt.len().min(10)]))
        }
        async fn complete(&self, _: &str, _: LlmProfile) -> Result<Completion> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn generate_tiers_persists_both_summaries() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        let memory = Memory::new("t", "w", "_default", "long content here", MemoryType::Semantic);
        storage.create_memory(memory.clone()).await.unwrap();

        let service = TieringService::new(storage.clone(), Some(Arc::new(StubLlm)));
        service.generate_tiers("w", &memory.id).await;

        let updated = storage.get_memory("w", &memory.id, false).await.unwrap().unwrap();
        assert!(updated.abstract_summary.is_some());
        assert!(updated.overview_summary.is_some());
    }

    #[tokio::test]
    async fn generate_tiers_without_llm_is_a_noop() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        let memory = Memory::new("t", "w", "_default", "content", MemoryType::Semantic);
        storage.create_memory(memory.clone()).await.unwrap();

        let service = TieringService::new(storage.clone(), None);
        service.generate_tiers("w", &memory.id).await;

        let unchanged = storage.get_memory("w", &memory.id, false).await.unwrap().unwrap();
        assert!(unchanged.abstract_summary.is_none());
        assert!(unchanged.overview_summary.is_none());
    }

    #[tokio::test]
    async fn generate_tiers_on_missing_memory_does_not_panic() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.ensure_reserved_entities().await.unwrap();
        let service = TieringService::new(storage.clone(), Some(Arc::new(StubLlm)));
        service.generate_tiers("w", "mem_does_not_exist").await;
    }
}
