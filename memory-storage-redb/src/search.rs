//! Full-scan search and graph traversal helpers, run inside the
//! `spawn_blocking` closures in [`crate::storage_ops`].
//!
//! redb has no secondary index over embeddings or association endpoints, so
//! these mirror the in-memory backend's approach: load the relevant table
//! into memory and filter/score there. That's the right tradeoff at the
//! scale this backend targets (single-node, embedded); a sharded vector
//! index is out of scope here.

use std::collections::{HashMap, HashSet};

use memory_core::embeddings::cosine_similarity;
use memory_core::storage::{memory_is_visible, GraphEdge, GraphPath, SearchFilters};
use memory_core::types::{Association, Direction, Memory};

#[must_use]
pub(crate) fn search_and_score(
    memories: &[Memory],
    workspace_id: &str,
    query_vec: &[f32],
    limit: usize,
    offset: usize,
    min_relevance: f32,
    filters: &SearchFilters,
) -> Vec<(Memory, f32)> {
    let mut scored: Vec<(Memory, f32)> = memories
        .iter()
        .filter(|m| m.workspace_id == workspace_id)
        .filter(|m| memory_is_visible(m, filters.include_archived))
        .filter(|m| {
            filters
                .types
                .as_ref()
                .is_none_or(|types| types.contains(&m.memory_type))
        })
        .filter(|m| {
            filters
                .subtypes
                .as_ref()
                .is_none_or(|subs| m.subtype.is_some_and(|s| subs.contains(&s)))
        })
        .filter(|m| {
            filters
                .tags
                .as_ref()
                .is_none_or(|tags| tags.iter().any(|tag| m.tags.contains(tag)))
        })
        .filter_map(|m| {
            let embedding = m.embedding.as_ref()?;
            let relevance = cosine_similarity(query_vec, embedding);
            if relevance >= min_relevance {
                Some((m.clone(), relevance))
            } else {
                None
            }
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().skip(offset).take(limit).collect()
}

/// BFS over `associations`, starting at `start`, mirroring
/// `InMemoryStorage::traverse_graph`: visits each node at most once, so
/// cycles terminate, and tracks the product of edge strengths along each
/// discovered path.
#[must_use]
pub(crate) fn traverse(
    start: Memory,
    memories_by_id: &HashMap<String, Memory>,
    associations: &[Association],
    workspace_id: &str,
    max_depth: usize,
    relationships: Option<&[String]>,
    direction: Direction,
) -> Vec<GraphPath> {
    let start_id = start.id.clone();
    let mut paths = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start_id.clone());

    let mut frontier: Vec<GraphPath> = vec![GraphPath {
        nodes: vec![start],
        edges: Vec::new(),
        total_strength: 1.0,
        depth: 0,
    }];

    for _ in 0..max_depth {
        let mut next_frontier = Vec::new();
        for path in &frontier {
            let current_id = path.nodes.last().expect("path always has a start node").id.clone();
            let edges: Vec<&Association> = associations
                .iter()
                .filter(|a| a.workspace_id == workspace_id)
                .filter(|a| match direction {
                    Direction::Outgoing => a.source_id == current_id,
                    Direction::Incoming => a.target_id == current_id,
                    Direction::Both => a.source_id == current_id || a.target_id == current_id,
                })
                .filter(|a| relationships.is_none_or(|rels| rels.contains(&a.relationship)))
                .collect();

            for edge in edges {
                let next_id = if edge.source_id == current_id {
                    &edge.target_id
                } else {
                    &edge.source_id
                };
                if visited.contains(next_id) {
                    continue;
                }
                let Some(next_memory) = memories_by_id.get(next_id) else {
                    continue;
                };
                visited.insert(next_id.clone());
                let mut new_path = path.clone();
                new_path.nodes.push(next_memory.clone());
                new_path.edges.push(GraphEdge {
                    association: edge.clone(),
                });
                new_path.total_strength *= edge.strength;
                new_path.depth += 1;
                next_frontier.push(new_path.clone());
                paths.push(new_path);
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    paths
}
