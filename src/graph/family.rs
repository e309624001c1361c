//! Family clusters and generation levels.
//!
//! A cluster is a connected component over family edges. Within a cluster,
//! levels start at 0 for the topmost parents and grow by one per
//! parent → child step; spouses, siblings, partners and relatives share a level.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::GraphSnapshot;
use crate::relations::{Predicate, RelationCategory};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyCluster {
    pub name: String,
    /// Members in graph insertion order
    pub members: Vec<String>,
    pub levels: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyAnnotation {
    pub clusters: Vec<FamilyCluster>,
}

impl FamilyAnnotation {
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster_of(&self, id: &str) -> Option<&FamilyCluster> {
        self.clusters.iter().find(|c| c.levels.contains_key(id))
    }

    pub fn level_of(&self, id: &str) -> Option<u32> {
        self.cluster_of(id).and_then(|c| c.levels.get(id).copied())
    }
}

/// Group family-connected nodes into clusters named `family_{n}` and assign levels
pub fn annotate(snapshot: &GraphSnapshot) -> FamilyAnnotation {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut parents_of: HashMap<&str, usize> = HashMap::new();
    let mut peers: HashMap<&str, Vec<&str>> = HashMap::new();

    for edge in snapshot.edges.iter().filter(|e| e.relation == RelationCategory::Family) {
        let (u, v) = (edge.from_id.as_str(), edge.to_id.as_str());
        adjacency.entry(u).or_default().push(v);
        adjacency.entry(v).or_default().push(u);

        match Predicate::from_code(&edge.predicate_code) {
            Some(Predicate::Child) => link_parent(&mut children, &mut parents_of, u, v),
            Some(Predicate::Father | Predicate::Mother) => link_parent(&mut children, &mut parents_of, v, u),
            Some(_) => {
                peers.entry(u).or_default().push(v);
                peers.entry(v).or_default().push(u);
            }
            None => {}
        }
    }

    let order: HashMap<&str, usize> = snapshot
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut annotation = FamilyAnnotation::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for node in &snapshot.nodes {
        let start = node.id.as_str();
        if seen.contains(start) || !adjacency.contains_key(start) {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            component.push(current);
            if let Some(next) = adjacency.get(current) {
                stack.extend(next.iter().copied());
            }
        }
        component.sort_by_key(|id| order.get(id).copied().unwrap_or(usize::MAX));

        let levels = levels_for(&component, &children, &parents_of, &peers);
        annotation.clusters.push(FamilyCluster {
            name: format!("family_{}", annotation.clusters.len() + 1),
            members: component.iter().map(|id| id.to_string()).collect(),
            levels: levels.into_iter().map(|(id, level)| (id.to_string(), level)).collect(),
        });
    }

    annotation
}

fn link_parent<'a>(
    children: &mut HashMap<&'a str, Vec<&'a str>>,
    parents_of: &mut HashMap<&'a str, usize>,
    parent: &'a str,
    child: &'a str,
) {
    children.entry(parent).or_default().push(child);
    *parents_of.entry(child).or_default() += 1;
}

fn levels_for<'a>(
    component: &[&'a str],
    children: &HashMap<&'a str, Vec<&'a str>>,
    parents_of: &HashMap<&'a str, usize>,
    peers: &HashMap<&'a str, Vec<&'a str>>,
) -> HashMap<&'a str, u32> {
    let has_parent = |id: &str| parents_of.get(id).copied().unwrap_or(0) > 0;

    // Parents nobody else parents; otherwise anyone without a parent; otherwise everyone
    let mut roots: Vec<&str> = component
        .iter()
        .copied()
        .filter(|id| children.contains_key(id) && !has_parent(*id))
        .collect();
    if roots.is_empty() {
        roots = component.iter().copied().filter(|id| !has_parent(*id)).collect();
    }
    if roots.is_empty() {
        roots = component.to_vec();
    }

    let mut levels: HashMap<&str, u32> = HashMap::new();
    let mut queue: VecDeque<(&str, u32)> = roots.into_iter().map(|id| (id, 0)).collect();
    while let Some((id, level)) = queue.pop_front() {
        if levels.contains_key(id) {
            continue;
        }
        levels.insert(id, level);
        for &child in children.get(id).map(Vec::as_slice).unwrap_or_default() {
            queue.push_back((child, level + 1));
        }
        for &peer in peers.get(id).map(Vec::as_slice).unwrap_or_default() {
            queue.push_back((peer, level));
        }
    }
    for &id in component {
        levels.entry(id).or_insert(0);
    }
    levels
}
