//! Relationship graph: node/edge model, the incremental assembler,
//! family hierarchy annotation and network metrics.

pub mod assembler;
pub mod family;
pub mod metrics;

pub use assembler::{AssemblyStats, Budgets, GraphAssembler, MergeOutcome};
pub use family::{annotate, FamilyAnnotation, FamilyCluster};
pub use metrics::{enrich, Enrichment, Taxonomy};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::relations::{Provenance, RelationCategory, SourceSystem};

/// What a node is known to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Person,
    Organization,
    Position,
    Unknown,
}

impl NodeKind {
    /// Upgrade from `Unknown` to an observed kind; a known kind never changes.
    ///
    /// Returns true if the kind changed.
    pub fn upgrade(&mut self, observed: NodeKind) -> bool {
        if *self == NodeKind::Unknown && observed != NodeKind::Unknown {
            *self = observed;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    pub first_seen_depth: u32,
    /// Placeholder for a literal value that never resolved to an entity
    #[serde(default)]
    pub unresolved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub office_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_id: String,
    pub to_id: String,
    pub relation: RelationCategory,
    pub predicate_code: String,
    pub provenance: Provenance,
    #[serde(default)]
    pub extra: EdgeExtra,
}

impl GraphEdge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from_id: self.from_id.clone(),
            to_id: self.to_id.clone(),
            predicate_code: self.predicate_code.clone(),
            source_system: self.provenance.source_system,
        }
    }
}

/// Edge identity: one edge per endpoints, predicate and source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub from_id: String,
    pub to_id: String,
    pub predicate_code: String,
    pub source_system: SourceSystem,
}

/// Serializable copy of the whole graph, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Structural problems found by [`validate`]
pub fn validate(snapshot: &GraphSnapshot) -> Vec<String> {
    let mut problems = Vec::new();
    let mut ids = HashSet::new();
    for node in &snapshot.nodes {
        if !ids.insert(node.id.as_str()) {
            problems.push(format!("duplicate node {}", node.id));
        }
    }

    let mut keys = HashSet::new();
    for edge in &snapshot.edges {
        for endpoint in [&edge.from_id, &edge.to_id] {
            if !ids.contains(endpoint.as_str()) {
                problems.push(format!(
                    "edge {} -[{}]-> {} references missing node {}",
                    edge.from_id, edge.predicate_code, edge.to_id, endpoint
                ));
            }
        }
        if !keys.insert(edge.key()) {
            problems.push(format!(
                "duplicate edge {} -[{}/{}]-> {}",
                edge.from_id,
                edge.predicate_code,
                edge.provenance.source_system.as_str(),
                edge.to_id
            ));
        }
    }
    problems
}
