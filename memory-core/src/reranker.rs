//! Collaborator contract for the reranker service: a secondary
//! model that re-orders a candidate set by query relevance, with an
//! adaptive `k`.

use async_trait::async_trait;

use crate::error::Result;

/// A single reranked result: the original index into the candidate slice,
/// paired with the reranker's score.
#[derive(Debug, Clone)]
pub struct RerankedItem {
    pub index: usize,
    pub score: f32,
}

/// Collaborator contract: a reranker.
#[async_trait]
pub trait RerankerService: Send + Sync {
    /// Rerank `contents` against `query`, returning up to `requested_k`
    /// items ordered by descending score. `index` in each result refers to
    /// the position in `contents`.
    async fn rerank_adaptive(
        &self,
        query: &str,
        contents: &[String],
        requested_k: usize,
    ) -> Result<Vec<RerankedItem>>;
}

/// Whether a query is "trivial" for reranking purposes: empty, `*`, or `**`.
/// Reranking is skipped for trivial queries step 5.
#[must_use]
pub fn is_trivial_query(query: &str) -> bool {
    matches!(query.trim(), "" | "*" | "**")
}
