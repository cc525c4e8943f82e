//! redb table definitions and schema constants.
//!
//! Every table is `TableDefinition<&str, &[u8]>`: keys are plain strings
//! (composite keys join their parts with `\0`, which cannot occur inside an
//! id, hash or tag), values are postcard-encoded domain types. Keeping every
//! table homogeneous this way means the surrounding code never needs a
//! second key/value codec.

use redb::TableDefinition;

pub(crate) const SCHEMA_VERSION: &str = "1.0.0";
pub(crate) const METADATA_SCHEMA_VERSION_KEY: &str = "schema_version";

pub(crate) const WORKSPACES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("workspaces");
pub(crate) const CONTEXTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("contexts");
pub(crate) const CONTEXT_NAMES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("context_names");

pub(crate) const MEMORIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("memories");
/// Secondary index resolving `(workspace_id, content_hash)` to a memory id.
/// Written in the same write transaction as `MEMORIES_TABLE`, which is how
/// concurrent `remember` calls for identical content serialize: redb allows
/// one write transaction at a time, so the second writer always observes the
/// first writer's index entry before deciding to create a new row.
pub(crate) const MEMORY_BY_HASH_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("memory_by_hash");

pub(crate) const ASSOCIATIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("associations");
/// Existence marker for `(workspace_id, source_id, target_id, relationship)`
/// triples, backing `association_exists` without a full table scan.
pub(crate) const ASSOCIATION_TRIPLES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("association_triples");

pub(crate) const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
pub(crate) const WORKING_MEMORY_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("working_memory");

pub(crate) const CONTRADICTIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("contradictions");

pub(crate) const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Joins composite key parts with a NUL separator. None of `id`, `hash`,
/// `relationship` or `key` can legally contain `\0`, so this never collides.
pub(crate) fn composite_key(parts: &[&str]) -> String {
    parts.join("\u{0}")
}
