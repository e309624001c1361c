//! Incremental multigraph builder.
//!
//! Nodes and edges keep insertion order so that identical fact streams
//! produce identical snapshots.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::{EdgeExtra, EdgeKey, GraphEdge, GraphNode, GraphSnapshot, NodeKind};
use crate::error::{Result, WikinetError};
use crate::relations::{ObjectRef, Predicate, RelationFact};

/// Optional caps on graph size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Budgets {
    pub max_nodes: Option<usize>,
    pub max_edges: Option<usize>,
}

/// Result of merging one subject's facts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Entity objects of accepted facts, in fact order, without repeats
    pub discovered: Vec<String>,
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub dropped_node_budget: usize,
    pub dropped_edge_budget: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyStats {
    pub nodes: usize,
    pub edges: usize,
    pub unresolved_nodes: usize,
    pub by_predicate: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub nodes_by_depth: BTreeMap<u32, usize>,
}

#[derive(Debug, Default)]
pub struct GraphAssembler {
    nodes: Vec<GraphNode>,
    node_index: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
    edge_index: HashMap<EdgeKey, usize>,
    budgets: Budgets,
}

impl GraphAssembler {
    pub fn new(budgets: Budgets) -> Self {
        Self {
            budgets,
            ..Default::default()
        }
    }

    /// Rebuild from a checkpointed snapshot
    pub fn from_snapshot(snapshot: GraphSnapshot, budgets: Budgets) -> Result<Self> {
        let problems = super::validate(&snapshot);
        if !problems.is_empty() {
            return Err(WikinetError::InvalidInput(format!(
                "Checkpoint graph is inconsistent: {}",
                problems.join("; ")
            )));
        }

        let mut assembler = Self::new(budgets);
        for node in snapshot.nodes {
            assembler.node_index.insert(node.id.clone(), assembler.nodes.len());
            assembler.nodes.push(node);
        }
        for edge in snapshot.edges {
            assembler.edge_index.insert(edge.key(), assembler.edges.len());
            assembler.edges.push(edge);
        }
        Ok(assembler)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edge_budget_reached(&self) -> bool {
        self.budgets.max_edges.is_some_and(|max| self.edges.len() >= max)
    }

    fn node_room(&self) -> usize {
        match self.budgets.max_nodes {
            Some(max) => max.saturating_sub(self.nodes.len()),
            None => usize::MAX,
        }
    }

    /// Make sure a seed has a node at depth 0.
    ///
    /// Returns false when the node does not exist and the node budget is spent.
    pub fn ensure_seed(&mut self, id: &str, label: Option<&str>) -> bool {
        if let Some(&i) = self.node_index.get(id) {
            if let Some(label) = label {
                relabel(&mut self.nodes[i], label);
            }
            return true;
        }
        if self.node_room() == 0 {
            return false;
        }
        self.push_node(GraphNode {
            id: id.to_string(),
            label: label.unwrap_or(id).to_string(),
            kind: NodeKind::Unknown,
            first_seen_depth: 0,
            unresolved: false,
        });
        true
    }

    /// Fill in a better label for an existing node
    pub fn apply_label(&mut self, id: &str, label: &str) {
        if let Some(&i) = self.node_index.get(id) {
            relabel(&mut self.nodes[i], label);
        }
    }

    /// Merge facts whose subject was expanded at `depth`
    pub fn merge(&mut self, facts: &[RelationFact], depth: u32) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for fact in facts {
            let (to_id, object_node) = self.object_node(fact, depth);
            let key = EdgeKey {
                from_id: fact.subject_id.clone(),
                to_id: to_id.clone(),
                predicate_code: fact.predicate.code().to_string(),
                source_system: fact.provenance.source_system,
            };

            if let Some(&i) = self.edge_index.get(&key) {
                if fact.provenance.retrieved_at > self.edges[i].provenance.retrieved_at {
                    self.edges[i].provenance = fact.provenance.clone();
                    outcome.replaced += 1;
                } else {
                    outcome.unchanged += 1;
                }
                self.observe(fact, &to_id);
                push_discovered(&mut outcome, fact);
                continue;
            }

            if self.edge_budget_reached() {
                outcome.dropped_edge_budget += 1;
                continue;
            }

            let subject_missing = !self.contains(&fact.subject_id);
            let object_missing = !self.contains(&to_id);
            let needed = usize::from(subject_missing) + usize::from(object_missing && to_id != fact.subject_id);
            if needed > self.node_room() {
                log::debug!(
                    "Node budget reached, dropping {} -[{}]-> {}",
                    fact.subject_id,
                    fact.predicate,
                    to_id
                );
                outcome.dropped_node_budget += 1;
                continue;
            }

            if subject_missing {
                self.push_node(GraphNode {
                    id: fact.subject_id.clone(),
                    label: fact.subject_label.clone().unwrap_or_else(|| fact.subject_id.clone()),
                    kind: fact.predicate.subject_kind(),
                    first_seen_depth: depth,
                    unresolved: false,
                });
            }
            if !self.contains(&to_id) {
                self.push_node(object_node);
            }
            self.observe(fact, &to_id);

            let extra = match (&fact.predicate, &fact.object) {
                (Predicate::PositionHeld, ObjectRef::Entity(id)) => EdgeExtra {
                    office_id: Some(id.clone()),
                },
                _ => EdgeExtra::default(),
            };
            self.edge_index.insert(key, self.edges.len());
            self.edges.push(GraphEdge {
                from_id: fact.subject_id.clone(),
                to_id,
                relation: fact.predicate.category(),
                predicate_code: fact.predicate.code().to_string(),
                provenance: fact.provenance.clone(),
                extra,
            });
            outcome.inserted += 1;
            push_discovered(&mut outcome, fact);
        }

        outcome
    }

    pub fn statistics(&self) -> AssemblyStats {
        let mut stats = AssemblyStats {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            ..Default::default()
        };
        for node in &self.nodes {
            *stats.nodes_by_depth.entry(node.first_seen_depth).or_default() += 1;
            if node.unresolved {
                stats.unresolved_nodes += 1;
            }
        }
        for edge in &self.edges {
            *stats.by_predicate.entry(edge.predicate_code.clone()).or_default() += 1;
            *stats
                .by_source
                .entry(edge.provenance.source_system.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    /// Node id for a fact's object, plus the node to create if it is new
    fn object_node(&self, fact: &RelationFact, depth: u32) -> (String, GraphNode) {
        match &fact.object {
            ObjectRef::Entity(id) => (
                id.clone(),
                GraphNode {
                    id: id.clone(),
                    label: fact.object_label.clone().unwrap_or_else(|| id.clone()),
                    kind: fact.predicate.object_kind(),
                    first_seen_depth: depth + 1,
                    unresolved: false,
                },
            ),
            ObjectRef::Literal(label) => {
                let id = format!("{}:{}:{}", fact.subject_id, fact.predicate.code(), label);
                (
                    id.clone(),
                    GraphNode {
                        id,
                        label: label.clone(),
                        kind: fact.predicate.object_kind(),
                        first_seen_depth: depth + 1,
                        unresolved: true,
                    },
                )
            }
        }
    }

    /// Apply what a fact tells us about its endpoints' kinds and labels
    fn observe(&mut self, fact: &RelationFact, to_id: &str) {
        if let Some(&i) = self.node_index.get(&fact.subject_id) {
            self.nodes[i].kind.upgrade(fact.predicate.subject_kind());
            if let Some(label) = &fact.subject_label {
                relabel(&mut self.nodes[i], label);
            }
        }
        if let Some(&i) = self.node_index.get(to_id) {
            self.nodes[i].kind.upgrade(fact.predicate.object_kind());
            if let Some(label) = &fact.object_label {
                relabel(&mut self.nodes[i], label);
            }
        }
    }

    fn push_node(&mut self, node: GraphNode) {
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }
}

/// Replace a label only while the node is still labelled with its bare id
fn relabel(node: &mut GraphNode, label: &str) {
    if node.label == node.id && !label.is_empty() {
        node.label = label.to_string();
    }
}

fn push_discovered(outcome: &mut MergeOutcome, fact: &RelationFact) {
    if let ObjectRef::Entity(id) = &fact.object {
        if !outcome.discovered.contains(id) {
            outcome.discovered.push(id.clone());
        }
    }
}
