//! JSON export of a crawl: `nodes.json`, `edges.json`, `stats.json` and
//! `families.json`, plus the `enriched_*.json` analytics files.

use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, rename, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::crawl::{CrawlReport, CrawlStats, CrawlStatus};
use crate::error::Result;
use crate::graph::{Enrichment, FamilyAnnotation, GraphEdge, GraphNode, GraphSnapshot, Taxonomy};

pub const NODES_FILE: &str = "nodes.json";
pub const EDGES_FILE: &str = "edges.json";
pub const STATS_FILE: &str = "stats.json";
pub const FAMILIES_FILE: &str = "families.json";
pub const ENRICHED_NODES_FILE: &str = "enriched_nodes.json";
pub const ENRICHED_EDGES_FILE: &str = "enriched_edges.json";

/// A node as exported, with its family placement when known
#[derive(Debug, Serialize)]
struct ExportNode<'a> {
    #[serde(flatten)]
    node: &'a GraphNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    family_cluster: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    family_level: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportSummary {
    pub run_id: Uuid,
    pub status: CrawlStatus,
    pub unresolved_seeds: Vec<String>,
    pub stats: CrawlStats,
}

/// Files written by [`write_graph`]
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub nodes: PathBuf,
    pub edges: PathBuf,
    pub stats: PathBuf,
    pub families: Option<PathBuf>,
}

/// Write a crawl report into `dir`, creating it if needed
pub fn write_graph(dir: &Path, report: &CrawlReport) -> Result<ExportPaths> {
    create_dir_all(dir)?;

    let nodes: Vec<ExportNode> = report
        .graph
        .nodes
        .iter()
        .map(|node| {
            let cluster = report.families.cluster_of(&node.id);
            ExportNode {
                node,
                family_cluster: cluster.map(|c| c.name.as_str()),
                family_level: cluster.and_then(|c| c.levels.get(&node.id).copied()),
            }
        })
        .collect();

    let paths = ExportPaths {
        nodes: dir.join(NODES_FILE),
        edges: dir.join(EDGES_FILE),
        stats: dir.join(STATS_FILE),
        families: (!report.families.is_empty()).then(|| dir.join(FAMILIES_FILE)),
    };

    write_json(&paths.nodes, &nodes)?;
    write_json(&paths.edges, &report.graph.edges)?;
    write_json(
        &paths.stats,
        &ExportSummary {
            run_id: report.run_id,
            status: report.status,
            unresolved_seeds: report.unresolved_seeds.clone(),
            stats: report.stats.clone(),
        },
    )?;
    if let Some(path) = &paths.families {
        write_json(path, &report.families)?;
    }

    log::info!(
        "Exported {} nodes and {} edges to {}",
        report.graph.nodes.len(),
        report.graph.edges.len(),
        dir.display()
    );
    Ok(paths)
}

/// Read `nodes.json` and `edges.json` back into a snapshot
pub fn load_graph(dir: &Path) -> Result<GraphSnapshot> {
    let nodes: Vec<GraphNode> = read_json(&dir.join(NODES_FILE))?;
    let edges: Vec<GraphEdge> = read_json(&dir.join(EDGES_FILE))?;
    Ok(GraphSnapshot { nodes, edges })
}

/// Read `families.json`; absent means no family edges were exported
pub fn load_families(dir: &Path) -> Result<FamilyAnnotation> {
    let path = dir.join(FAMILIES_FILE);
    if !path.exists() {
        return Ok(FamilyAnnotation::default());
    }
    read_json(&path)
}

pub fn load_summary(dir: &Path) -> Result<ExportSummary> {
    read_json(&dir.join(STATS_FILE))
}

/// Read a role taxonomy: a JSON object of role name to keyword list
pub fn load_taxonomy(path: &Path) -> Result<Taxonomy> {
    read_json(path)
}

/// Write `enriched_nodes.json` and `enriched_edges.json` into `dir`
pub fn write_enrichment(dir: &Path, enrichment: &Enrichment) -> Result<(PathBuf, PathBuf)> {
    create_dir_all(dir)?;
    let nodes = dir.join(ENRICHED_NODES_FILE);
    let edges = dir.join(ENRICHED_EDGES_FILE);
    write_json(&nodes, &enrichment.nodes)?;
    write_json(&edges, &enrichment.edges)?;
    log::info!(
        "Wrote analytics for {} nodes and {} edges to {}",
        enrichment.nodes.len(),
        enrichment.edges.len(),
        dir.display()
    );
    Ok((nodes, edges))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write to `<path>.tmp`, fsync, then rename over `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }

    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    rename(&tmp_path, path)?;
    Ok(())
}
