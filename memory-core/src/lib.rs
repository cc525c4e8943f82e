//! A persistent semantic memory engine for LLM-powered agents.
//!
//! Long-term knowledge is stored as discrete, typed, embedded `Memory`
//! records, deduplicated and associated into a typed graph, decomposed into
//! atomic facts, tiered into abstract/overview/full summaries, decayed over
//! time, and surfaced through a `remember`/`recall` pipeline that blends
//! vector search, graph expansion, reranking and scope/recency boosting.
//!
//! [`MemoryService`] is the entry point most callers want: it owns the
//! storage, embedding, LLM, reranker, cache and task-scheduling
//! collaborators and exposes `remember`/`recall`/`forget`/`decay`. The
//! lower-level services ([`AssociationService`], [`ContradictionService`],
//! [`TieringService`], [`DecayService`], [`SessionService`],
//! [`WorkspaceService`]) are exported for callers that want to use them
//! directly or compose a different orchestrator.

pub mod association;
pub mod cache;
pub mod config;
pub mod contradiction;
pub mod decay;
pub mod dedup;
pub mod embeddings;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod memory;
pub mod ontology;
pub mod reranker;
pub mod session;
pub mod storage;
pub mod tasks;
pub mod tiering;
pub mod types;
pub mod workspace;

pub use association::AssociationService;
pub use config::EngineConfig;
pub use contradiction::ContradictionService;
pub use decay::DecayService;
pub use error::{Error, Result};
pub use memory::{MemoryService, RecallInput, RecallOutput};
pub use session::SessionService;
pub use storage::Storage;
pub use tasks::TaskService;
pub use tiering::TieringService;
pub use workspace::WorkspaceService;
