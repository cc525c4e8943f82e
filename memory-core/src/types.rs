//! Core data model: memories, associations, workspaces, contexts, sessions,
//! working memory and contradiction records.
//!
//! These are plain data types; the invariants that govern them (tag
//! normalization, hash determinism, reserved ids, ...) are enforced by the
//! services that construct and mutate them, not by the types themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

#[cfg(feature = "proptest-arbitrary")]
use proptest::prelude::{prop_oneof, Arbitrary, BoxedStrategy, Just, Strategy};

/// Reserved workspace id: the per-tenant default workspace.
pub const DEFAULT_WORKSPACE_ID: &str = "_default";
/// Reserved workspace id: the cross-workspace shared pool.
pub const GLOBAL_WORKSPACE_ID: &str = "_global";
/// Reserved context id: every workspace's auto-provisioned default context.
pub const DEFAULT_CONTEXT_ID: &str = "_default";
/// Tenant id used when an auto-created workspace isn't given one explicitly.
pub const DEFAULT_TENANT_ID: &str = "_default";

/// Generate a prefixed id following the convention: (`mem_`, `assoc_`, `sess_`).
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}

/// `SHA-256` over the exact content string. This is the deduplication key.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize a tag set: lowercase, trim, dedupe, sort.
///
/// Canonical tag form: `tags = sort(dedup(lower(trim(tag)) for tag in input))`.
#[must_use]
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let set: BTreeSet<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    set.into_iter().collect()
}

/// Cognitive memory type. Required on every memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A specific recalled event or experience.
    Episodic,
    /// General factual or conceptual knowledge.
    Semantic,
    /// Know-how: steps, rules, skills.
    Procedural,
    /// Session-scoped scratch state, write-behind materialized from a session.
    Working,
}

#[cfg(feature = "proptest-arbitrary")]
impl Arbitrary for MemoryType {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            Just(MemoryType::Episodic),
            Just(MemoryType::Semantic),
            Just(MemoryType::Procedural),
            Just(MemoryType::Working),
        ]
        .boxed()
    }
}

/// Closed enum of domain subtypes. Optional on a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySubtype {
    /// Stable facts about the user or agent.
    Profile,
    /// Stated likes/dislikes/preferences.
    Preference,
    /// Named entities (people, places, tools, systems).
    Entity,
    /// Time-stamped occurrences.
    Event,
    /// Worked examples, prior cases.
    Case,
    /// Recurring behavioral or structural patterns.
    Pattern,
}

/// Lifecycle status of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    /// Visible to recall.
    Active,
    /// Excluded from recall unless `include_archived` is set.
    Archived,
    /// Never surfaced; may still exist as a soft-deleted row.
    Deleted,
}

/// Where a recalled memory's relevance came from, relative to the query's
/// workspace/context. Populated only during recall, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceScope {
    /// Same `(workspace_id, context_id)` as the query.
    SameContext,
    /// Same workspace, different context.
    SameWorkspace,
    /// Surfaced via the `_global` shared-pool fanout.
    GlobalWorkspace,
    /// Discovered via association graph expansion.
    Association,
    /// Anything else.
    Other,
}

/// The central entity: a content-addressed, classified, embedded, optionally
/// summarized unit of long-term knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Globally unique id, `mem_`-prefixed. Immutable after creation.
    pub id: String,
    /// Required tenant scope.
    pub tenant_id: String,
    /// Required workspace scope.
    pub workspace_id: String,
    /// Required context scope; defaults to `_default`.
    pub context_id: String,

    /// Non-empty (after trim) content.
    pub content: String,
    /// `SHA-256` over `content`. The deduplication key.
    pub content_hash: String,

    /// Required cognitive type.
    pub memory_type: MemoryType,
    /// Optional domain subtype.
    pub subtype: Option<MemorySubtype>,
    /// Optional free-form category.
    pub category: Option<String>,
    /// Normalized tag set.
    pub tags: Vec<String>,

    /// Importance in `[0, 1]`.
    pub importance: f32,
    /// Decay factor in `[0, 1]`.
    pub decay_factor: f32,
    /// Number of tracked accesses.
    pub access_count: u64,
    /// Last tracked access time.
    pub last_accessed_at: Option<DateTime<Utc>>,

    /// Short hierarchical summary.
    pub abstract_summary: Option<String>,
    /// Medium hierarchical summary.
    pub overview_summary: Option<String>,

    /// Lifecycle status.
    pub status: MemoryStatus,
    /// Exempts a memory from decay/archival when true.
    pub pinned: bool,
    /// Parent memory id when this memory was decomposed from a composite.
    pub source_memory_id: Option<String>,

    /// Dense embedding, provider-fixed dimension. Absent briefly between
    /// creation and asynchronous write-back.
    pub embedding: Option<Vec<f32>>,

    /// Arbitrary structured metadata (e.g. `working_memory_key`, `session_id`,
    /// auto-association provenance).
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,

    // --- ephemeral ranking metadata, populated only during recall ---
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_scope: Option<SourceScope>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relevance_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub boosted_score: Option<f32>,
}

impl Memory {
    /// The content to surface for a given [`DetailLevel`]: the requested
    /// summary tier if present, falling back to the full content when that
    /// tier hasn't been generated yet.
    #[must_use]
    pub fn content_for_detail_level(&self, level: DetailLevel) -> &str {
        match level {
            DetailLevel::Abstract => self.abstract_summary.as_deref().unwrap_or(&self.content),
            DetailLevel::Overview => self.overview_summary.as_deref().unwrap_or(&self.content),
            DetailLevel::Full => &self.content,
        }
    }

    /// Build a new active memory, computing its id and content hash.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        workspace_id: impl Into<String>,
        context_id: impl Into<String>,
        content: impl Into<String>,
        memory_type: MemoryType,
    ) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        let now = Utc::now();
        Memory {
            id: generate_id("mem_"),
            tenant_id: tenant_id.into(),
            workspace_id: workspace_id.into(),
            context_id: context_id.into(),
            content,
            content_hash: hash,
            memory_type,
            subtype: None,
            category: None,
            tags: Vec::new(),
            importance: 0.5,
            decay_factor: 1.0,
            access_count: 0,
            last_accessed_at: None,
            abstract_summary: None,
            overview_summary: None,
            status: MemoryStatus::Active,
            pinned: false,
            source_memory_id: None,
            embedding: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            source_scope: None,
            relevance_score: None,
            boosted_score: None,
        }
    }
}

/// Input payload for `Memory::remember`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RememberInput {
    pub content: String,
    pub memory_type: Option<MemoryType>,
    pub subtype: Option<MemorySubtype>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub importance: Option<f32>,
    pub pinned: bool,
    pub metadata: Option<serde_json::Value>,
}

/// Directed typed edge between two memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Association {
    /// Unique id, `assoc_`-prefixed.
    pub id: String,
    pub workspace_id: String,
    pub source_id: String,
    pub target_id: String,
    /// Relationship label; should validate against the ontology.
    pub relationship: String,
    /// Edge strength in `[0, 1]`.
    pub strength: f32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Association {
    #[must_use]
    pub fn new(
        workspace_id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship: impl Into<String>,
        strength: f32,
    ) -> Self {
        Association {
            id: generate_id("assoc_"),
            workspace_id: workspace_id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship: relationship.into(),
            strength: strength.clamp(0.0, 1.0),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        }
    }
}

/// Direction of graph traversal / relationship lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Tenant-scoped namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub tenant_id: String,
    pub id: String,
    pub name: String,
    pub settings: WorkspaceSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-workspace tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    pub decay_rate: f32,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub abstract_tier_days: u32,
    pub overview_tier_days: u32,
    pub same_context_boost: f32,
    pub same_workspace_boost: f32,
    pub global_boost: f32,
    pub auto_remember: bool,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        WorkspaceSettings {
            decay_rate: 0.01,
            embedding_model: "mock".to_string(),
            embedding_dimensions: 8,
            abstract_tier_days: 7,
            overview_tier_days: 30,
            same_context_boost: 1.5,
            same_workspace_boost: 1.2,
            global_boost: 1.0,
            auto_remember: true,
        }
    }
}

impl Workspace {
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Workspace {
            tenant_id: tenant_id.into(),
            id: id.into(),
            name: name.into(),
            settings: WorkspaceSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Logical grouping within a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub workspace_id: String,
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Context {
    #[must_use]
    pub fn new(workspace_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Context {
            workspace_id: workspace_id.into(),
            id: id.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// TTL-bounded working-memory scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub tenant_id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub auto_commit: bool,
    pub committed_at: Option<DateTime<Utc>>,
}

impl Session {
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        workspace_id: impl Into<String>,
        context_id: impl Into<String>,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Session {
            id: generate_id("sess_"),
            tenant_id: tenant_id.into(),
            workspace_id: workspace_id.into(),
            context_id: context_id.into(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds),
            auto_commit: true,
            committed_at: None,
        }
    }

    /// Pure function of wall-clock: whether this session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Sliding-window touch: `expires_at = now + ttl`. Idempotent across
    /// repeated calls with the same ttl.
    pub fn touch(&mut self, ttl_seconds: i64) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(ttl_seconds);
    }
}

/// A KV pair inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryEntry {
    pub session_id: String,
    pub key: String,
    pub value: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Detected inconsistency between two memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionRecord {
    pub id: String,
    pub workspace_id: String,
    pub memory_a_id: String,
    pub memory_b_id: String,
    pub contradiction_type: String,
    pub confidence: f32,
    pub detection_method: String,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<ResolutionStrategy>,
    pub merged_content: Option<String>,
}

impl ContradictionRecord {
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Contradiction resolution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepA,
    KeepB,
    KeepBoth,
    Merge,
}

/// Recall execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallMode {
    Rag,
    Llm,
    Hybrid,
}

impl Default for RecallMode {
    fn default() -> Self {
        RecallMode::Rag
    }
}

/// Relevance floor preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tolerance {
    Strict,
    Moderate,
    Loose,
}

impl Tolerance {
    /// The floor associated with this tolerance preset.
    #[must_use]
    pub fn floor(self) -> f32 {
        match self {
            Tolerance::Strict => 0.6,
            Tolerance::Moderate => 0.3,
            Tolerance::Loose => 0.15,
        }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::Moderate
    }
}

/// Controls which summary tier `recall` returns as `content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Abstract,
    Overview,
    Full,
}

impl Default for DetailLevel {
    fn default() -> Self {
        DetailLevel::Full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_sha256() {
        let h = content_hash("hello");
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash("same"), content_hash("same"));
        assert_ne!(content_hash("same"), content_hash("different"));
    }

    #[test]
    fn tag_normalization_sorts_dedupes_lowercases() {
        let tags = normalize_tags(["  Rust ", "rust", "DB", "db", "Async"]);
        assert_eq!(tags, vec!["async", "db", "rust"]);
    }

    #[test]
    fn tag_normalization_drops_empty() {
        let tags = normalize_tags(["  ", "x"]);
        assert_eq!(tags, vec!["x"]);
    }

    #[test]
    fn session_touch_is_idempotent_not_additive() {
        let mut s = Session::new("t", "w", "_default", 60);
        let first = {
            s.touch(60);
            s.expires_at
        };
        // A second touch a moment later should move expires_at forward from
        // "now", not accumulate on top of the previous expires_at.
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.touch(60);
        assert!(s.expires_at >= first);
        assert!((s.expires_at - first) < chrono::Duration::seconds(1));
    }

    #[test]
    fn content_for_detail_level_falls_back_to_full_content() {
        let m = Memory::new("t", "w", "_default", "full text", MemoryType::Semantic);
        assert_eq!(m.content_for_detail_level(DetailLevel::Abstract), "full text");
        assert_eq!(m.content_for_detail_level(DetailLevel::Full), "full text");
    }

    #[test]
    fn content_for_detail_level_prefers_generated_tier() {
        let mut m = Memory::new("t", "w", "_default", "full text", MemoryType::Semantic);
        m.abstract_summary = Some("short".to_string());
        assert_eq!(m.content_for_detail_level(DetailLevel::Abstract), "short");
        assert_eq!(m.content_for_detail_level(DetailLevel::Overview), "full text");
    }

    #[test]
    fn tolerance_floors_have_expected_values() {
        assert!((Tolerance::Strict.floor() - 0.6).abs() < f32::EPSILON);
        assert!((Tolerance::Moderate.floor() - 0.3).abs() < f32::EPSILON);
        assert!((Tolerance::Loose.floor() - 0.15).abs() < f32::EPSILON);
    }
}
