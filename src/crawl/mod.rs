//! Bounded breadth-first crawl over entity relations.
//!
//! A crawl resolves its seeds, then drains a FIFO frontier one depth level
//! at a time. Each dequeued identifier is expanded through the structured
//! fetcher, topped up from the text fallback, and merged into the graph.
//! State is checkpointed after every `checkpoint_every` identifiers and at
//! the end of each batch, so an interrupted run can pick up where it stopped.

pub mod frontier;
pub mod state;

pub use frontier::Crawler;
pub use state::{Checkpoint, CrawlState, FrontierEntry, SeedStatus};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, WikinetError};
use crate::graph::{AssemblyStats, Budgets, FamilyAnnotation, GraphSnapshot};
use crate::relations::RelationScope;
use crate::resolver::AmbiguousChoice;

/// Lifecycle of a crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    #[default]
    Idle,
    Draining,
    /// Frontier empty, no budget cut anything
    Completed,
    /// A node or edge cap stopped further expansion
    BudgetExhausted,
    /// A remote failure under fail-fast, or a local failure (cache, checkpoint)
    Aborted,
    /// Stopped by a cancel request; resumable
    Interrupted,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Idle => "idle",
            CrawlStatus::Draining => "draining",
            CrawlStatus::Completed => "completed",
            CrawlStatus::BudgetExhausted => "budget_exhausted",
            CrawlStatus::Aborted => "aborted",
            CrawlStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CrawlStatus::Idle | CrawlStatus::Draining)
    }
}

impl std::fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative stop request, checked between batches
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Traversal policy, derived from `[crawl]` config
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_depth: u32,
    pub budgets: Budgets,
    pub scope: RelationScope,
    pub fallback: bool,
    pub fail_fast: bool,
    pub batch_size: usize,
    pub concurrency: usize,
    pub resume: bool,
    /// Processed identifiers between checkpoint writes
    pub checkpoint_every: usize,
    /// Where checkpoints go; `None` disables checkpointing
    pub state_path: Option<PathBuf>,
}

impl CrawlOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let max_depth = u32::try_from(config.crawl.max_depth)
            .map_err(|_| WikinetError::Config(format!("crawl.max_depth {} is too large", config.crawl.max_depth)))?;
        if config.crawl.max_nodes == Some(0) || config.crawl.max_edges == Some(0) {
            return Err(WikinetError::Config("Budgets must be greater than 0".to_string()));
        }

        Ok(Self {
            max_depth,
            budgets: Budgets {
                max_nodes: config.crawl.max_nodes,
                max_edges: config.crawl.max_edges,
            },
            scope: config.scope()?,
            fallback: config.crawl.fallback,
            fail_fast: config.crawl.fail_fast,
            batch_size: config.crawl.batch_size.max(1),
            concurrency: config.crawl.concurrency.max(1),
            resume: config.crawl.resume,
            checkpoint_every: config.crawl.checkpoint_every.max(1),
            state_path: Some(config.state_path()),
        })
    }
}

/// Diagnostics gathered while draining; never used for control flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub expanded: usize,
    /// Identifiers in the order they were expanded
    pub expansion_order: Vec<String>,
    pub depth_histogram: BTreeMap<u32, usize>,
    pub fallback_invocations: usize,
    pub fallback_facts: usize,
    pub malformed_facts: usize,
    pub discarded_beyond_depth: usize,
    pub warnings: Vec<String>,
    pub budget_notes: Vec<String>,
    pub ambiguous_seeds: Vec<AmbiguousChoice>,
    pub graph: AssemblyStats,
    /// Why the crawl ended `Aborted`, if it did
    #[serde(default)]
    pub abort_reason: Option<String>,
}

impl CrawlStats {
    fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Everything a crawl produced, including partial results
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub run_id: Uuid,
    pub status: CrawlStatus,
    pub graph: GraphSnapshot,
    pub stats: CrawlStats,
    pub unresolved_seeds: Vec<String>,
    pub families: FamilyAnnotation,
}

impl CrawlReport {
    /// False only for aborted crawls
    pub fn is_success(&self) -> bool {
        self.status != CrawlStatus::Aborted
    }
}
