//! Engine configuration.
//!
//! Every configuration knob lives here with a sane default, loadable
//! from a TOML file loaded the same way a CLI config module would. The
//! [`Default`] impl is what the in-memory backend and unit tests run with
//! when no config file is supplied.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Tolerance;

/// Which embedding provider backs [`crate::embeddings::EmbeddingProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Openai,
    Google,
    Local,
    Mock,
}

/// Which [`crate::storage::Storage`] implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Sqlite,
    Memory,
}

/// Which session service implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionServiceKind {
    InMemory,
    Persistent,
}

/// Top-level engine configuration, deserializable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub embedding_provider: EmbeddingProviderKind,
    pub embedding_model: String,
    pub embedding_dimensions: usize,

    pub storage_backend: StorageBackendKind,
    pub sqlite_storage_path: Option<String>,

    pub fact_decomposition_enabled: bool,
    pub fact_decomposition_min_length: usize,

    pub recall_overfetch: usize,
    pub max_graph_expansion: usize,
    pub include_associations: bool,
    pub traverse_depth: usize,

    pub auto_association_threshold: f32,

    pub recency_weight: f32,
    pub recency_half_life_hours: f32,

    pub same_context_boost: f32,
    pub same_workspace_boost: f32,
    pub global_workspace_boost: f32,

    pub default_tolerance: Tolerance,

    pub session_service: SessionServiceKind,
    pub session_touch_ttl_seconds: i64,
    pub session_implicit_create: bool,
    pub session_default_ttl_seconds: i64,

    pub session_cleanup_interval_seconds: u64,
    pub session_cleanup_batch_size: usize,
    pub decay_interval_seconds: u64,

    pub decay_min_age_days: i64,
    pub decay_rate: f32,
    pub archival_max_importance: f32,
    pub archival_max_access_count: u64,
    pub archival_min_age_days: i64,

    pub contradiction_search_limit: usize,
    pub contradiction_min_relevance: f32,

    pub auto_enrich_limit: usize,
    pub auto_enrich_min_relevance: f32,

    pub recall_cache_ttl_seconds: u64,
    pub recall_llm_candidate_multiplier: usize,
    pub recall_llm_candidate_cap: usize,
    pub hybrid_rag_threshold: f32,

    /// Whether workspace search includes the `_global` workspace by default.
    pub include_global_by_default: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            embedding_provider: EmbeddingProviderKind::Mock,
            embedding_model: "mock-embedding-v1".to_string(),
            embedding_dimensions: 8,

            storage_backend: StorageBackendKind::Memory,
            sqlite_storage_path: None,

            fact_decomposition_enabled: true,
            fact_decomposition_min_length: 50,

            recall_overfetch: 3,
            max_graph_expansion: 50,
            include_associations: true,
            traverse_depth: 2,

            auto_association_threshold: 0.6,

            recency_weight: 0.0,
            recency_half_life_hours: 72.0,

            same_context_boost: 1.5,
            same_workspace_boost: 1.2,
            global_workspace_boost: 1.0,

            default_tolerance: Tolerance::Moderate,

            session_service: SessionServiceKind::InMemory,
            session_touch_ttl_seconds: 3600,
            session_implicit_create: false,
            session_default_ttl_seconds: 3600,

            session_cleanup_interval_seconds: 300,
            session_cleanup_batch_size: 100,
            decay_interval_seconds: 86_400,

            decay_min_age_days: 30,
            decay_rate: 0.05,
            archival_max_importance: 0.2,
            archival_max_access_count: 1,
            archival_min_age_days: 90,

            contradiction_search_limit: 20,
            contradiction_min_relevance: 0.7,

            auto_enrich_limit: 5,
            auto_enrich_min_relevance: 0.6,

            recall_cache_ttl_seconds: 300,
            recall_llm_candidate_multiplier: 3,
            recall_llm_candidate_cap: 50,
            hybrid_rag_threshold: 0.5,

            include_global_by_default: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to [`Default`] for
    /// any field the file omits.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Validation(format!("invalid config: {e}")))
    }

    /// Load configuration from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.recall_overfetch, 3);
        assert_eq!(cfg.max_graph_expansion, 50);
        assert!(cfg.include_associations);
        assert_eq!(cfg.traverse_depth, 2);
        assert!((cfg.auto_association_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg = EngineConfig::from_toml_str("recall_overfetch = 5\n").unwrap();
        assert_eq!(cfg.recall_overfetch, 5);
        assert_eq!(cfg.max_graph_expansion, 50); // untouched default
    }

    #[test]
    fn invalid_toml_is_a_validation_error() {
        let err = EngineConfig::from_toml_str("not valid [[[ toml").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
