//! Collaborator contract for the LLM provider, used abstractly for
//! query rewriting, synthesis, classification and fact decomposition. The
//! model itself is out of scope; only the shape of the call is specified.

use async_trait::async_trait;

use crate::error::Result;

/// Profile selects prompt/parameter tuning on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProfile {
    Default,
    Reflection,
    Extraction,
}

/// A structured completion response.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Collaborator contract: an LLM service.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Free-form text synthesis (tier generation, query rewriting).
    async fn synthesize(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: Option<f32>,
        profile: LlmProfile,
    ) -> Result<String>;

    /// Structured completion with token accounting.
    async fn complete(&self, request: &str, profile: LlmProfile) -> Result<Completion>;
}

/// A no-op provider used when no LLM is configured. Every call fails with
/// [`crate::error::Error::ClassificationUnavailable`], driving callers onto
/// their documented fallback paths (decomposition returns a single fact,
/// classification falls back to `semantic`, relationship classification
/// falls back to `related_to`).
#[derive(Debug, Default)]
pub struct NullLlmService;

#[async_trait]
impl LlmService for NullLlmService {
    async fn synthesize(
        &self,
        _prompt: &str,
        _max_tokens: u32,
        _temperature: Option<f32>,
        _profile: LlmProfile,
    ) -> Result<String> {
        Err(crate::error::Error::ClassificationUnavailable(
            "no llm service configured".to_string(),
        ))
    }

    async fn complete(&self, _request: &str, _profile: LlmProfile) -> Result<Completion> {
        Err(crate::error::Error::ClassificationUnavailable(
            "no llm service configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_service_always_fails() {
        let llm = NullLlmService;
        assert!(llm
            .synthesize("x", 10, None, LlmProfile::Default)
            .await
            .is_err());
        assert!(llm.complete("x", LlmProfile::Default).await.is_err());
    }
}
