//! Resumable crawl state and its on-disk checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::Path;
use uuid::Uuid;

use super::CrawlStatus;
use crate::error::{Result, WikinetError};
use crate::export::write_atomic;
use crate::graph::GraphSnapshot;

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub identifier: String,
    pub depth: u32,
}

impl FrontierEntry {
    pub fn new(identifier: impl Into<String>, depth: u32) -> Self {
        Self {
            identifier: identifier.into(),
            depth,
        }
    }
}

/// How a seed fared during resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SeedStatus {
    Resolved { identifiers: Vec<String> },
    Unresolved,
    Failed { detail: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlState {
    pub visited: BTreeSet<String>,
    pub frontier: VecDeque<FrontierEntry>,
    /// Entries whose fetch failed remotely; re-queued first on resume
    pub failed: Vec<FrontierEntry>,
    /// Taken by the current batch but not yet visited or failed.
    /// Restored to the head of the frontier when a checkpoint is loaded.
    #[serde(default)]
    pub in_progress: Vec<FrontierEntry>,
    pub node_count: usize,
    pub edge_count: usize,
    pub per_seed_status: BTreeMap<String, SeedStatus>,
    pub status: CrawlStatus,
    #[serde(skip)]
    queued: HashSet<String>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once an identifier has been expanded, queued, or parked as failed
    pub fn is_known(&self, id: &str) -> bool {
        self.visited.contains(id) || self.queued.contains(id)
    }

    /// Append to the frontier unless already known
    pub fn enqueue(&mut self, entry: FrontierEntry) -> bool {
        if self.is_known(&entry.identifier) {
            return false;
        }
        self.queued.insert(entry.identifier.clone());
        self.frontier.push_back(entry);
        true
    }

    /// Remove up to `limit` entries from the head that share the head's depth.
    ///
    /// Taken entries stay in `in_progress` until they are settled with
    /// [`mark_visited`](Self::mark_visited), [`mark_failed`](Self::mark_failed)
    /// or [`discard`](Self::discard).
    pub fn take_batch(&mut self, limit: usize) -> Vec<FrontierEntry> {
        let depth = match self.frontier.front() {
            Some(head) => head.depth,
            None => return Vec::new(),
        };
        let mut batch = Vec::new();
        while batch.len() < limit {
            match self.frontier.front() {
                Some(entry) if entry.depth == depth => {
                    if let Some(entry) = self.frontier.pop_front() {
                        batch.push(entry);
                    }
                }
                _ => break,
            }
        }
        self.in_progress.extend(batch.iter().cloned());
        batch
    }

    /// Record a fully processed identifier
    pub fn mark_visited(&mut self, id: &str) {
        self.settle(id);
        self.queued.remove(id);
        self.visited.insert(id.to_string());
    }

    /// Forget a dequeued entry that will not be expanded
    pub fn discard(&mut self, id: &str) {
        self.settle(id);
        self.queued.remove(id);
    }

    /// Park an entry whose fetch failed; it stays known so it is not re-queued
    pub fn mark_failed(&mut self, entry: FrontierEntry) {
        self.settle(&entry.identifier);
        if !self.failed.contains(&entry) {
            self.failed.push(entry);
        }
    }

    fn settle(&mut self, id: &str) {
        self.in_progress.retain(|e| e.identifier != id);
    }

    /// Move failed entries back to the head of the frontier
    pub fn requeue_failed(&mut self) -> usize {
        let failed = std::mem::take(&mut self.failed);
        let count = failed.len();
        for entry in failed.into_iter().rev() {
            if self.visited.contains(&entry.identifier) {
                continue;
            }
            if let Some(pos) = self.frontier.iter().position(|e| e.identifier == entry.identifier) {
                self.frontier.remove(pos);
            }
            self.queued.insert(entry.identifier.clone());
            self.frontier.push_front(entry);
        }
        count
    }

    /// Put unsettled batch entries back in front and rebuild the queued index
    fn reindex(&mut self) {
        for entry in std::mem::take(&mut self.in_progress).into_iter().rev() {
            self.frontier.push_front(entry);
        }
        self.queued = self
            .frontier
            .iter()
            .chain(self.failed.iter())
            .map(|e| e.identifier.clone())
            .collect();
    }
}

/// Everything needed to resume a crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub run_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub state: CrawlState,
    pub graph: GraphSnapshot,
}

impl Checkpoint {
    pub fn new(run_id: Uuid, state: CrawlState, graph: GraphSnapshot) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            run_id,
            saved_at: Utc::now(),
            state,
            graph,
        }
    }

    /// Write atomically: temp file, fsync, rename over the target
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self)?;
        write_atomic(path, &bytes)
    }

    /// Load a checkpoint; a missing file is not an error
    pub fn load(path: &Path) -> Result<Option<Checkpoint>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let mut checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(WikinetError::InvalidInput(format!(
                "Checkpoint {} has version {}, expected {}",
                path.display(),
                checkpoint.version,
                CHECKPOINT_VERSION
            )));
        }
        checkpoint.state.reindex();
        Ok(Some(checkpoint))
    }
}
