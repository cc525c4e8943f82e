//! Static catalog of canonical relationship labels.
//!
//! Grounded on the original service's `BASE_ONTOLOGY` table: ~65 labels
//! across 11 categories (hierarchical, causal, temporal, similarity,
//! learning, refinement, reference, solution, context, workflow, quality).
//! Kept as data, not code, per the design notes.

use std::sync::LazyLock;

use crate::error::{Error, Result};

/// Metadata about a single relationship label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipInfo {
    pub label: &'static str,
    pub description: &'static str,
    pub symmetric: bool,
    pub transitive: bool,
    pub inverse: Option<&'static str>,
    pub category: &'static str,
}

macro_rules! rel {
    ($label:expr, $desc:expr, $sym:expr, $trans:expr, $inv:expr, $cat:expr) => {
        RelationshipInfo {
            label: $label,
            description: $desc,
            symmetric: $sym,
            transitive: $trans,
            inverse: $inv,
            category: $cat,
        }
    };
}

/// Default label used when auto-association has no better classification.
pub const DEFAULT_RELATIONSHIP: &str = "related_to";

static BASE_ONTOLOGY: LazyLock<Vec<RelationshipInfo>> = LazyLock::new(|| {
    vec![
        // --- hierarchical ---
        rel!("parent_of", "Parent-child hierarchy", false, true, Some("child_of"), "hierarchical"),
        rel!("child_of", "Child-parent hierarchy", false, true, Some("parent_of"), "hierarchical"),
        rel!("part_of", "Component of a whole", false, true, Some("has_part"), "hierarchical"),
        rel!("has_part", "Whole contains part", false, true, Some("part_of"), "hierarchical"),
        rel!("instance_of", "Instance of a type/class", false, true, Some("type_of"), "hierarchical"),
        rel!("type_of", "Type/class of instances", false, true, Some("instance_of"), "hierarchical"),
        // --- causal ---
        rel!("causes", "Direct causation", false, true, Some("caused_by"), "causal"),
        rel!("caused_by", "Caused by another event", false, true, Some("causes"), "causal"),
        rel!("enables", "Makes possible or facilitates", false, false, Some("enabled_by"), "causal"),
        rel!("enabled_by", "Made possible by", false, false, Some("enables"), "causal"),
        rel!("triggers", "A triggers B", false, false, Some("triggered_by"), "causal"),
        rel!("triggered_by", "Triggered by another event", false, false, Some("triggers"), "causal"),
        rel!("leads_to", "A leads to B", false, true, Some("led_to_by"), "causal"),
        rel!("led_to_by", "Led to by another event", false, true, Some("leads_to"), "causal"),
        rel!("prevents", "A prevents B", false, false, Some("prevented_by"), "causal"),
        rel!("prevented_by", "Prevented by another event", false, false, Some("prevents"), "causal"),
        // --- temporal ---
        rel!("before", "Occurs before in time", false, true, Some("after"), "temporal"),
        rel!("after", "Occurs after in time", false, true, Some("before"), "temporal"),
        rel!("during", "Occurs during timespan", false, false, None, "temporal"),
        // --- similarity ---
        rel!("similar_to", "Similar content or meaning", true, false, Some("similar_to"), "similarity"),
        rel!("duplicate_of", "Exact or near duplicate", true, true, Some("duplicate_of"), "similarity"),
        rel!("related_to", "Generic related relationship", true, false, Some("related_to"), "similarity"),
        rel!("variant_of", "A is a variant of B", true, false, Some("variant_of"), "similarity"),
        // --- learning ---
        rel!("contradicts", "Logically contradicts", true, false, Some("contradicts"), "learning"),
        rel!("supports", "Provides evidence for", false, false, Some("supported_by"), "learning"),
        rel!("supported_by", "Evidence provided by", false, false, Some("supports"), "learning"),
        rel!("builds_on", "A builds on knowledge in B", false, true, Some("built_upon_by"), "learning"),
        rel!("built_upon_by", "Knowledge built upon by another", false, true, Some("builds_on"), "learning"),
        rel!("confirms", "A confirms or validates B", true, false, Some("confirms"), "learning"),
        rel!("supersedes", "A supersedes B with newer information", false, true, Some("superseded_by"), "learning"),
        rel!("superseded_by", "Superseded by newer information", false, true, Some("supersedes"), "learning"),
        // --- refinement ---
        rel!("refines", "Refines or elaborates on", false, false, Some("refined_by"), "refinement"),
        rel!("refined_by", "Refined or elaborated by", false, false, Some("refines"), "refinement"),
        rel!("replaces", "Supersedes or replaces", false, false, Some("replaced_by"), "refinement"),
        rel!("replaced_by", "Superseded by", false, false, Some("replaces"), "refinement"),
        // --- reference ---
        rel!("references", "References or cites", false, false, Some("referenced_by"), "reference"),
        rel!("referenced_by", "Referenced or cited by", false, false, Some("references"), "reference"),
        // --- solution ---
        rel!("solves", "A solves problem B", false, false, Some("solved_by"), "solution"),
        rel!("solved_by", "Problem solved by A", false, false, Some("solves"), "solution"),
        rel!("addresses", "A addresses issue B", false, false, Some("addressed_by"), "solution"),
        rel!("addressed_by", "Issue addressed by A", false, false, Some("addresses"), "solution"),
        rel!("alternative_to", "A is an alternative to B", true, false, Some("alternative_to"), "solution"),
        rel!("improves", "A improves B", false, false, Some("improved_by"), "solution"),
        rel!("improved_by", "Improved by A", false, false, Some("improves"), "solution"),
        // --- context ---
        rel!("occurs_in", "A occurs in context B", false, false, Some("contains_occurrence"), "context"),
        rel!("contains_occurrence", "Context B contains occurrence of A", false, false, Some("occurs_in"), "context"),
        rel!("applies_to", "A applies to B", false, false, Some("has_applicable"), "context"),
        rel!("has_applicable", "B has applicable A", false, false, Some("applies_to"), "context"),
        rel!("works_with", "A works with B", true, false, Some("works_with"), "context"),
        rel!("requires", "A requires B", false, true, Some("required_by"), "context"),
        rel!("required_by", "Required by A", false, true, Some("requires"), "context"),
        // --- workflow ---
        rel!("follows", "A follows B in sequence", false, true, Some("followed_by"), "workflow"),
        rel!("followed_by", "Followed by A in sequence", false, true, Some("follows"), "workflow"),
        rel!("depends_on", "A depends on B", false, true, Some("depended_on_by"), "workflow"),
        rel!("depended_on_by", "Depended on by A", false, true, Some("depends_on"), "workflow"),
        rel!("blocks", "A blocks B", false, false, Some("blocked_by"), "workflow"),
        rel!("blocked_by", "Blocked by A", false, false, Some("blocks"), "workflow"),
        // --- quality ---
        rel!("effective_for", "A is effective for B", false, false, Some("has_effective"), "quality"),
        rel!("has_effective", "B has effective A", false, false, Some("effective_for"), "quality"),
        rel!("preferred_over", "A is preferred over B", false, true, Some("less_preferred_than"), "quality"),
        rel!("less_preferred_than", "A is less preferred than B", false, true, Some("preferred_over"), "quality"),
        rel!("deprecated_by", "A is deprecated by B", false, false, Some("deprecates"), "quality"),
        rel!("deprecates", "A deprecates B", false, false, Some("deprecated_by"), "quality"),
    ]
});

/// Whether `label` exists in the ontology.
#[must_use]
pub fn validate_relationship(label: &str) -> bool {
    BASE_ONTOLOGY.iter().any(|r| r.label == label)
}

/// Look up full metadata for a relationship label.
pub fn get_relationship_info(label: &str) -> Result<RelationshipInfo> {
    BASE_ONTOLOGY
        .iter()
        .find(|r| r.label == label)
        .copied()
        .ok_or_else(|| Error::not_found("relationship label", label))
}

/// All labels belonging to a category, in table order.
#[must_use]
pub fn get_relationships_by_category(category: &str) -> Vec<&'static str> {
    BASE_ONTOLOGY
        .iter()
        .filter(|r| r.category == category)
        .map(|r| r.label)
        .collect()
}

/// All distinct categories in the table.
#[must_use]
pub fn categories() -> Vec<&'static str> {
    let mut cats: Vec<&'static str> = BASE_ONTOLOGY.iter().map(|r| r.category).collect();
    cats.sort_unstable();
    cats.dedup();
    cats
}

/// Total number of labels in the table.
#[must_use]
pub fn label_count() -> usize {
    BASE_ONTOLOGY.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_roughly_65_labels_in_11_categories() {
        assert!(label_count() >= 60, "expected ~65 labels, got {}", label_count());
        assert_eq!(categories().len(), 11);
    }

    #[test]
    fn validate_relationship_accepts_known_rejects_unknown() {
        assert!(validate_relationship("similar_to"));
        assert!(validate_relationship("part_of"));
        assert!(!validate_relationship("not_a_real_label"));
    }

    #[test]
    fn get_relationship_info_round_trips_inverse() {
        let info = get_relationship_info("parent_of").unwrap();
        assert_eq!(info.inverse, Some("child_of"));
        let inverse = get_relationship_info(info.inverse.unwrap()).unwrap();
        assert_eq!(inverse.inverse, Some("parent_of"));
    }

    #[test]
    fn symmetric_labels_are_their_own_inverse() {
        let info = get_relationship_info("similar_to").unwrap();
        assert!(info.symmetric);
        assert_eq!(info.inverse, Some("similar_to"));
    }

    #[test]
    fn category_lookup_is_non_empty_for_every_category() {
        for cat in categories() {
            assert!(
                !get_relationships_by_category(cat).is_empty(),
                "category {cat} had no labels"
            );
        }
    }

    #[test]
    fn unknown_label_lookup_is_not_found() {
        let err = get_relationship_info("nope").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
