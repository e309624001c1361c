//! Network analytics over an exported graph: centrality, k-cores,
//! communities, role guesses and an importance score per node.
//!
//! All measures treat the graph as undirected. Degree counts every edge
//! (parallel edges included); betweenness, cores and communities use the
//! simple graph underneath (one link per node pair, no self-loops).

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use super::{GraphEdge, GraphNode, GraphSnapshot};
use crate::relations::{Predicate, RelationCategory};

/// One link per connected node pair; node indices follow `snapshot.nodes`
pub type Links = UnGraph<(), ()>;

/// Keyword lists per role, checked against node labels before the built-in rules
pub type Taxonomy = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    pub degree: Vec<f64>,
    pub betweenness: Vec<f64>,
    pub core: Vec<u32>,
    pub community: Vec<usize>,
}

/// Outgoing relation tallies for one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationCounts {
    pub children: usize,
    pub spouses: usize,
    pub positions: usize,
    pub by_predicate: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedNode {
    #[serde(flatten)]
    pub node: GraphNode,
    #[serde(flatten)]
    pub counts: RelationCounts,
    pub degree_centrality: f64,
    pub betweenness_centrality: f64,
    pub core_number: u32,
    pub community: usize,
    pub primary_role: String,
    pub secondary_roles: Vec<String>,
    pub importance_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEdge {
    #[serde(flatten)]
    pub edge: GraphEdge,
    pub layer: String,
}

/// Node and edge records with analytics attached
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub nodes: Vec<EnrichedNode>,
    pub edges: Vec<EnrichedEdge>,
}

/// Predicates that mark political office or membership
pub fn is_political(predicate: Predicate) -> bool {
    matches!(
        predicate,
        Predicate::PositionHeld
            | Predicate::MemberOfParty
            | Predicate::MemberOf
            | Predicate::Officeholder
            | Predicate::HeadOfState
            | Predicate::HeadOfGovernment
    )
}

/// Compute all metrics; vectors are indexed like `snapshot.nodes`
pub fn compute_metrics(snapshot: &GraphSnapshot) -> Metrics {
    let n = snapshot.nodes.len();
    let index: HashMap<&str, usize> = snapshot
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.id.as_str(), i))
        .collect();

    let mut degree = vec![0usize; n];
    let mut links = Links::with_capacity(n, snapshot.edges.len());
    for _ in 0..n {
        links.add_node(());
    }
    for edge in &snapshot.edges {
        let (Some(&u), Some(&v)) = (index.get(edge.from_id.as_str()), index.get(edge.to_id.as_str())) else {
            continue;
        };
        degree[u] += 1;
        degree[v] += 1;
        if u != v {
            links.update_edge(NodeIndex::new(u), NodeIndex::new(v), ());
        }
    }

    let scale = n.saturating_sub(1).max(1) as f64;
    Metrics {
        degree: degree.iter().map(|&d| d as f64 / scale).collect(),
        betweenness: betweenness(&links),
        core: core_numbers(&links),
        community: communities(&links),
    }
}

fn neighbors(links: &Links, v: usize) -> impl Iterator<Item = usize> + '_ {
    links.neighbors(NodeIndex::new(v)).map(|w| w.index())
}

/// Brandes' algorithm, normalized by `(n-1)(n-2)` over ordered pairs
pub fn betweenness(links: &Links) -> Vec<f64> {
    let n = links.node_count();
    let mut centrality = vec![0.0; n];

    for source in 0..n {
        let mut order = Vec::with_capacity(n);
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut paths = vec![0.0f64; n];
        let mut dist = vec![usize::MAX; n];
        paths[source] = 1.0;
        dist[source] = 0;

        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            order.push(v);
            for w in neighbors(links, v) {
                if dist[w] == usize::MAX {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    paths[w] += paths[v];
                    preds[w].push(v);
                }
            }
        }

        let mut dependency = vec![0.0f64; n];
        while let Some(w) = order.pop() {
            for &v in &preds[w] {
                dependency[v] += paths[v] / paths[w] * (1.0 + dependency[w]);
            }
            if w != source {
                centrality[w] += dependency[w];
            }
        }
    }

    if n > 2 {
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        for value in &mut centrality {
            *value *= scale;
        }
    }
    centrality
}

/// k-core number of every node, by repeatedly peeling the lowest degree
pub fn core_numbers(links: &Links) -> Vec<u32> {
    let n = links.node_count();
    let mut degree: Vec<usize> = (0..n).map(|v| neighbors(links, v).count()).collect();
    let mut core = vec![0u32; n];
    let mut removed = vec![false; n];
    let mut current = 0usize;

    for _ in 0..n {
        let Some(v) = (0..n).filter(|&v| !removed[v]).min_by_key(|&v| (degree[v], v)) else {
            break;
        };
        current = current.max(degree[v]);
        core[v] = current as u32;
        removed[v] = true;
        for w in neighbors(links, v) {
            if !removed[w] {
                degree[w] -= 1;
            }
        }
    }
    core
}

/// Greedy modularity communities: start from singletons and keep merging
/// the linked pair with the largest modularity gain while it is positive.
/// Equal gains go to the lowest pair of community indices.
///
/// Communities are numbered from 0 by size (largest first), then by the
/// position of their first member.
pub fn communities(links: &Links) -> Vec<usize> {
    let n = links.node_count();
    let mut labels: Vec<usize> = (0..n).collect();

    if links.edge_count() > 0 {
        let total = 2.0 * links.edge_count() as f64;
        let mut share: Vec<f64> = (0..n).map(|v| neighbors(links, v).count() as f64 / total).collect();
        // Fraction of edge ends between two communities, keyed low index first
        let mut between: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for edge in links.edge_references() {
            let (u, v) = (edge.source().index(), edge.target().index());
            *between.entry((u.min(v), u.max(v))).or_default() += 1.0 / total;
        }

        loop {
            let mut best: Option<((usize, usize), f64)> = None;
            for (&(i, j), &e) in &between {
                let gain = 2.0 * (e - share[i] * share[j]);
                if best.map_or(true, |(_, g)| gain > g) {
                    best = Some(((i, j), gain));
                }
            }
            let Some(((keep, gone), gain)) = best else {
                break;
            };
            if gain <= 0.0 {
                break;
            }

            between.remove(&(keep, gone));
            let moved: Vec<((usize, usize), f64)> = between
                .iter()
                .filter(|(key, _)| key.0 == gone || key.1 == gone)
                .map(|(&key, &e)| (key, e))
                .collect();
            for ((a, b), e) in moved {
                between.remove(&(a, b));
                let other = if a == gone { b } else { a };
                *between.entry((keep.min(other), keep.max(other))).or_default() += e;
            }
            share[keep] += share[gone];
            share[gone] = 0.0;
            for label in labels.iter_mut().filter(|l| **l == gone) {
                *label = keep;
            }
        }
    }

    let mut groups: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
    for (v, &label) in labels.iter().enumerate() {
        groups.entry(label).or_insert((0, v)).0 += 1;
    }
    let mut ranked: Vec<(usize, usize, usize)> = groups
        .into_iter()
        .map(|(label, (size, first))| (label, size, first))
        .collect();
    ranked.sort_by_key(|&(_, size, first)| (std::cmp::Reverse(size), first));
    let number: HashMap<usize, usize> = ranked
        .iter()
        .enumerate()
        .map(|(i, &(label, _, _))| (label, i))
        .collect();

    labels.iter().map(|label| number[label]).collect()
}

/// Outgoing edge tallies for `id`
pub fn relation_counts(snapshot: &GraphSnapshot, id: &str) -> RelationCounts {
    let mut counts = RelationCounts::default();
    for edge in snapshot.edges.iter().filter(|e| e.from_id == id) {
        *counts.by_predicate.entry(edge.predicate_code.clone()).or_default() += 1;
        match Predicate::from_code(&edge.predicate_code) {
            Some(Predicate::Child) => counts.children += 1,
            Some(Predicate::Spouse) => counts.spouses += 1,
            Some(p) if is_political(p) => counts.positions += 1,
            _ => {}
        }
    }
    counts
}

/// Primary role plus sorted secondary roles.
///
/// Taxonomy keywords matched against the label come first, then
/// `security` (label mentions the military), `political` (holds positions
/// or label mentions government) and `family` (has children or spouses).
/// A node matching nothing is `other`.
pub fn roles(node: &GraphNode, counts: &RelationCounts, taxonomy: &Taxonomy) -> (String, Vec<String>) {
    let text = node.label.to_lowercase();
    let mut found: Vec<String> = taxonomy
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(&k.to_lowercase())))
        .map(|(role, _)| role.clone())
        .collect();

    if text.contains("military") {
        found.push("security".to_string());
    }
    if counts.positions > 0 || text.contains("government") {
        found.push("political".to_string());
    }
    if counts.children > 0 || counts.spouses > 0 {
        found.push("family".to_string());
    }
    if found.is_empty() {
        found.push("other".to_string());
    }

    let primary = found.remove(0);
    found.retain(|role| *role != primary);
    found.sort();
    found.dedup();
    (primary, found)
}

/// `degree + betweenness + 0.05 * core + role bonus`, rounded to 4 places
pub fn importance_score(degree: f64, betweenness: f64, core: u32, primary_role: &str) -> f64 {
    let bonus = match primary_role {
        "political" | "security" => 0.2,
        "corporate" => 0.1,
        _ => 0.0,
    };
    let score = degree + betweenness + core as f64 * 0.05 + bonus;
    (score * 10_000.0).round() / 10_000.0
}

/// Edge layer for display: family, political, or other
pub fn edge_layer(edge: &GraphEdge) -> &'static str {
    if edge.relation == RelationCategory::Family {
        return "family";
    }
    match Predicate::from_code(&edge.predicate_code) {
        Some(p) if is_political(p) => "political",
        _ => "other",
    }
}

/// Attach metrics, counts and roles to every node, and a layer to every edge
pub fn enrich(snapshot: &GraphSnapshot, taxonomy: &Taxonomy) -> Enrichment {
    let metrics = compute_metrics(snapshot);

    let nodes = snapshot
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let counts = relation_counts(snapshot, &node.id);
            let (primary_role, secondary_roles) = roles(node, &counts, taxonomy);
            EnrichedNode {
                node: node.clone(),
                counts,
                degree_centrality: metrics.degree[i],
                betweenness_centrality: metrics.betweenness[i],
                core_number: metrics.core[i],
                community: metrics.community[i],
                importance_score: importance_score(
                    metrics.degree[i],
                    metrics.betweenness[i],
                    metrics.core[i],
                    &primary_role,
                ),
                primary_role,
                secondary_roles,
            }
        })
        .collect();

    let edges = snapshot
        .edges
        .iter()
        .map(|edge| EnrichedEdge {
            edge: edge.clone(),
            layer: edge_layer(edge).to_string(),
        })
        .collect();

    Enrichment { nodes, edges }
}
