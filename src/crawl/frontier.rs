//! The frontier controller: seed resolution, the draining loop, checkpoints.

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::state::{Checkpoint, CrawlState, FrontierEntry, SeedStatus};
use super::{CancelFlag, CrawlOptions, CrawlReport, CrawlStats, CrawlStatus};
use crate::cache::ResponseStore;
use crate::config::Config;
use crate::error::{Result, WikinetError};
use crate::graph::{annotate, FamilyAnnotation, GraphAssembler, MergeOutcome};
use crate::relations::{FallbackFetcher, Predicate, RelationFact, StructuredBatch, StructuredFetcher};
use crate::remote::{CachedClient, HttpTransport, RetryPolicy, TokenBucket};
use crate::resolver::{Seed, SeedResolver};

pub struct Crawler {
    options: CrawlOptions,
    resolver: Arc<SeedResolver>,
    structured: StructuredFetcher,
    fallback: FallbackFetcher,
    cancel: CancelFlag,
}

impl Crawler {
    /// Build a crawler over an existing client
    pub fn new(config: &Config, client: Arc<CachedClient>) -> Result<Self> {
        let options = CrawlOptions::from_config(config)?;
        let language = config.wikinet.language.clone();
        let resolver = Arc::new(SeedResolver::new(
            client.clone(),
            language.clone(),
            config.resolver.clone(),
        ));
        let structured = StructuredFetcher::new(client.clone(), language, options.batch_size);
        let fallback = FallbackFetcher::new(client, resolver.clone());

        Ok(Self {
            options,
            resolver,
            structured,
            fallback,
            cancel: CancelFlag::new(),
        })
    }

    /// Open the on-disk cache and HTTP transport described by `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = ResponseStore::open(config.cache_db_path()).await?;
        let transport = HttpTransport::new(config.user_agent(), config.timeout())?;
        let bucket = TokenBucket::new(config.http.requests_per_second, config.http.burst);
        let retry = RetryPolicy {
            max_attempts: config.http.max_attempts,
            base_delay: Duration::from_millis(config.http.backoff_ms),
        };
        let client = CachedClient::new(
            Arc::new(transport),
            store,
            Arc::new(bucket),
            retry,
            config.http.memory_cache_capacity,
        );
        Self::new(config, Arc::new(client))
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.options
    }

    /// Run a crawl to a terminal status.
    ///
    /// Remote failures become warnings (or `Aborted` under fail-fast). Local
    /// failures mid-crawl (cache database, checkpoint writes) also end the
    /// crawl `Aborted`, with the partial graph and the error in
    /// `stats.abort_reason`. Only configuration errors and an unreadable
    /// checkpoint at startup are returned as `Err`.
    pub async fn run(&self, seeds: &[Seed]) -> Result<CrawlReport> {
        let (run_id, mut state, mut assembler) = self.initial_state()?;
        let mut stats = CrawlStats::default();

        let outcome = self.crawl(run_id, seeds, &mut state, &mut assembler, &mut stats).await;
        let mut status = match outcome {
            Ok(Some(status)) => status,
            Ok(None) if stats.budget_notes.is_empty() => CrawlStatus::Completed,
            Ok(None) => CrawlStatus::BudgetExhausted,
            Err(e) => {
                log::error!("Crawl {} aborted: {}", run_id, e);
                stats.abort_reason = Some(e.to_string());
                CrawlStatus::Aborted
            }
        };
        state.status = status;
        if let Err(e) = self.save(run_id, &mut state, &assembler) {
            stats.warn(format!("Could not write the final checkpoint: {}", e));
            if status != CrawlStatus::Aborted {
                stats.abort_reason = Some(e.to_string());
                status = CrawlStatus::Aborted;
            }
        }

        let graph = assembler.snapshot();
        stats.graph = assembler.statistics();
        let families = if self.options.scope.includes_family() {
            annotate(&graph)
        } else {
            FamilyAnnotation::default()
        };
        let unresolved_seeds = state
            .per_seed_status
            .iter()
            .filter(|(_, status)| !matches!(status, SeedStatus::Resolved { .. }))
            .map(|(seed, _)| seed.clone())
            .collect();

        log::info!(
            "Crawl {} finished {}: {} nodes, {} edges, {} expanded, {} warning(s)",
            run_id,
            status,
            graph.nodes.len(),
            graph.edges.len(),
            stats.expanded,
            stats.warnings.len()
        );

        Ok(CrawlReport {
            run_id,
            status,
            graph,
            stats,
            unresolved_seeds,
            families,
        })
    }

    /// Resolve seeds, then drain. `None` means the frontier ran dry.
    async fn crawl(
        &self,
        run_id: Uuid,
        seeds: &[Seed],
        state: &mut CrawlState,
        assembler: &mut GraphAssembler,
        stats: &mut CrawlStats,
    ) -> Result<Option<CrawlStatus>> {
        if let Some(status) = self.resolve_seeds(seeds, state, assembler, stats).await? {
            return Ok(Some(status));
        }
        state.status = CrawlStatus::Draining;
        self.save(run_id, state, assembler)?;
        self.drain(run_id, state, assembler, stats).await
    }

    /// Fresh state, or the last checkpoint when resuming
    fn initial_state(&self) -> Result<(Uuid, CrawlState, GraphAssembler)> {
        if self.options.resume {
            if let Some(path) = &self.options.state_path {
                if let Some(checkpoint) = Checkpoint::load(path)? {
                    let mut state = checkpoint.state;
                    let requeued = state.requeue_failed();
                    let assembler = GraphAssembler::from_snapshot(checkpoint.graph, self.options.budgets)?;
                    log::info!(
                        "Resuming crawl {} from {}: {} visited, {} queued, {} failed re-queued",
                        checkpoint.run_id,
                        path.display(),
                        state.visited.len(),
                        state.frontier.len(),
                        requeued
                    );
                    return Ok((checkpoint.run_id, state, assembler));
                }
                log::info!("No checkpoint at {}, starting a new crawl", path.display());
            }
        }
        Ok((
            Uuid::new_v4(),
            CrawlState::new(),
            GraphAssembler::new(self.options.budgets),
        ))
    }

    /// Resolve seeds not already resolved by an earlier run and queue them at depth 0.
    ///
    /// Returns `Some(Aborted)` when a remote failure hits under fail-fast.
    async fn resolve_seeds(
        &self,
        seeds: &[Seed],
        state: &mut CrawlState,
        assembler: &mut GraphAssembler,
        stats: &mut CrawlStats,
    ) -> Result<Option<CrawlStatus>> {
        for seed in seeds {
            let key = seed.to_string();
            if matches!(state.per_seed_status.get(&key), Some(SeedStatus::Resolved { .. })) {
                continue;
            }

            let resolved: Result<Vec<(String, Option<String>)>> = match seed {
                Seed::Category(name) => self
                    .resolver
                    .resolve_category(name)
                    .await
                    .map(|ids| ids.into_iter().map(|id| (id, None)).collect()),
                _ => self.resolver.resolve_best(seed).await.map(|resolution| {
                    if let Some(choice) = resolution.ambiguity {
                        stats.ambiguous_seeds.push(choice);
                    }
                    let chosen = resolution.chosen;
                    let label = (chosen.display_label != chosen.identifier).then_some(chosen.display_label);
                    vec![(chosen.identifier, label)]
                }),
            };

            let status = match resolved {
                Ok(ids) if ids.is_empty() => {
                    stats.warn(format!("Seed {} matched no entities", key));
                    SeedStatus::Unresolved
                }
                Ok(ids) => {
                    let mut identifiers = Vec::with_capacity(ids.len());
                    for (id, label) in ids {
                        if !assembler.ensure_seed(&id, label.as_deref()) {
                            stats
                                .budget_notes
                                .push(format!("Node budget reached before seed {} ({})", id, key));
                            continue;
                        }
                        log::info!("Seed {} resolved to {}", key, id);
                        state.enqueue(FrontierEntry::new(id.clone(), 0));
                        identifiers.push(id);
                    }
                    SeedStatus::Resolved { identifiers }
                }
                Err(WikinetError::UnresolvedSeed(_)) | Err(WikinetError::InvalidInput(_)) => {
                    stats.warn(format!("Seed {} could not be resolved", key));
                    SeedStatus::Unresolved
                }
                Err(e) if e.is_remote() => {
                    stats.warn(format!("Resolving seed {} failed: {}", key, e));
                    let failed = SeedStatus::Failed { detail: e.to_string() };
                    if self.options.fail_fast {
                        stats.abort_reason = Some(e.to_string());
                        state.per_seed_status.insert(key, failed);
                        return Ok(Some(CrawlStatus::Aborted));
                    }
                    failed
                }
                Err(e) => return Err(e),
            };
            state.per_seed_status.insert(key, status);
        }
        Ok(None)
    }

    /// Drain the frontier. `None` means it ran dry.
    async fn drain(
        &self,
        run_id: Uuid,
        state: &mut CrawlState,
        assembler: &mut GraphAssembler,
        stats: &mut CrawlStats,
    ) -> Result<Option<CrawlStatus>> {
        loop {
            if self.cancel.is_cancelled() {
                log::info!("Crawl {} interrupted with {} queued", run_id, state.frontier.len());
                return Ok(Some(CrawlStatus::Interrupted));
            }
            if !state.frontier.is_empty() && assembler.edge_budget_reached() {
                return Ok(Some(CrawlStatus::BudgetExhausted));
            }

            let mut batch = state.take_batch(self.options.batch_size);
            if batch.is_empty() {
                return Ok(None);
            }
            batch.retain(|entry| {
                if entry.depth > self.options.max_depth {
                    log::debug!("Discarding {} at depth {}", entry.identifier, entry.depth);
                    state.discard(&entry.identifier);
                    stats.discarded_beyond_depth += 1;
                    false
                } else {
                    true
                }
            });
            if batch.is_empty() {
                continue;
            }

            let ids: Vec<String> = batch.iter().map(|e| e.identifier.clone()).collect();
            log::debug!("Expanding {} identifier(s) at depth {}", ids.len(), batch[0].depth);

            let structured = match self.structured.fetch_structured(&ids, self.options.scope).await {
                Ok(structured) => structured,
                Err(e) if e.is_remote() => {
                    stats.warn(format!("Structured lookup failed for {}: {}", ids.join(", "), e));
                    for entry in batch {
                        state.mark_failed(entry);
                    }
                    self.save(run_id, state, assembler)?;
                    if self.options.fail_fast {
                        stats.abort_reason = Some(e.to_string());
                        return Ok(Some(CrawlStatus::Aborted));
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            stats.malformed_facts += structured.malformed;

            let fallbacks = self.fetch_fallbacks(&batch, &structured, stats).await;

            let mut aborted = false;
            let mut since_save = 0;
            for (entry, fallback) in batch.into_iter().zip(fallbacks) {
                let mut facts: Vec<RelationFact> = structured.facts_for(&entry.identifier).cloned().collect();
                let mut failed = false;
                match fallback {
                    Ok(extra) => {
                        stats.fallback_facts += extra.len();
                        facts.extend(extra);
                    }
                    Err(e) if e.is_remote() => {
                        stats.warn(format!("Text fallback failed for {}: {}", entry.identifier, e));
                        if self.options.fail_fast && !aborted {
                            stats.abort_reason = Some(e.to_string());
                            aborted = true;
                        }
                        failed = true;
                    }
                    Err(e) => return Err(e),
                }

                let outcome = assembler.merge(&facts, entry.depth);
                note_budget(&entry, &outcome, stats);

                if entry.depth < self.options.max_depth {
                    for id in &outcome.discovered {
                        state.enqueue(FrontierEntry::new(id.clone(), entry.depth + 1));
                    }
                }

                if failed {
                    state.mark_failed(entry);
                } else {
                    log::debug!(
                        "Expanded {} at depth {}: {} new, {} replaced edge(s)",
                        entry.identifier,
                        entry.depth,
                        outcome.inserted,
                        outcome.replaced
                    );
                    state.mark_visited(&entry.identifier);
                    stats.expanded += 1;
                    *stats.depth_histogram.entry(entry.depth).or_default() += 1;
                    stats.expansion_order.push(entry.identifier);
                }

                since_save += 1;
                if since_save >= self.options.checkpoint_every {
                    self.save(run_id, state, assembler)?;
                    since_save = 0;
                }
            }

            for (id, label) in &structured.labels {
                assembler.apply_label(id, label);
            }
            self.save(run_id, state, assembler)?;

            if aborted {
                return Ok(Some(CrawlStatus::Aborted));
            }
        }
    }

    /// Run the text fallback for predicates the structured lookup left
    /// empty, concurrently, with results in batch order
    async fn fetch_fallbacks(
        &self,
        batch: &[FrontierEntry],
        structured: &StructuredBatch,
        stats: &mut CrawlStats,
    ) -> Vec<Result<Vec<RelationFact>>> {
        let jobs: Vec<(&str, Vec<Predicate>)> = batch
            .iter()
            .map(|entry| {
                let missing = if self.options.fallback {
                    missing_predicates(&self.options, structured, &entry.identifier)
                } else {
                    Vec::new()
                };
                (entry.identifier.as_str(), missing)
            })
            .collect();
        stats.fallback_invocations += jobs.iter().filter(|(_, missing)| !missing.is_empty()).count();

        stream::iter(jobs)
            .map(|(id, missing)| async move { self.fallback.fetch_fallback(id, &missing).await })
            .buffered(self.options.concurrency)
            .collect()
            .await
    }

    fn save(&self, run_id: Uuid, state: &mut CrawlState, assembler: &GraphAssembler) -> Result<()> {
        let path = match &self.options.state_path {
            Some(path) => path,
            None => return Ok(()),
        };
        state.node_count = assembler.node_count();
        state.edge_count = assembler.edge_count();
        Checkpoint::new(run_id, state.clone(), assembler.snapshot()).save(path)
    }
}

/// In-scope predicates with no structured fact for `id`
fn missing_predicates(options: &CrawlOptions, structured: &StructuredBatch, id: &str) -> Vec<Predicate> {
    options
        .scope
        .predicates()
        .into_iter()
        .filter(|p| !structured.facts_for(id).any(|f| f.predicate == *p))
        .collect()
}

fn note_budget(entry: &FrontierEntry, outcome: &MergeOutcome, stats: &mut CrawlStats) {
    if outcome.dropped_node_budget > 0 {
        stats.budget_notes.push(format!(
            "Node budget reached expanding {}: {} fact(s) dropped",
            entry.identifier, outcome.dropped_node_budget
        ));
    }
    if outcome.dropped_edge_budget > 0 {
        stats.budget_notes.push(format!(
            "Edge budget reached expanding {}: {} fact(s) dropped",
            entry.identifier, outcome.dropped_edge_budget
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphEdge, GraphSnapshot};
    use crate::relations::SourceSystem;
    use crate::remote::{RemoteRequest, Transport, TransportError};
    use crate::testing::{FakeWiki, TestHarness};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const HAMAD_INFOBOX: &str = r#"{{Infobox royalty
| name   = Hamad bin Isa Al Khalifa
| father = [[Isa bin Salman Al Khalifa]]
}}"#;

    /// Three generations of fathers plus a spouse and children
    fn bahrain() -> FakeWiki {
        FakeWiki::new()
            .entity("Q1", "Royal family of Bahrain", 60)
            .description("Q1", "ruling family of Bahrain")
            .entity("Q7", "Royal family of Bahrain succession", 3)
            .entity("Q2", "Isa bin Salman Al Khalifa", 50)
            .entity("Q3", "Salman bin Hamad Al Khalifa I", 30)
            .entity("Q4", "Sabika bint Ibrahim Al Khalifa", 20)
            .entity("Q5", "Salman bin Hamad Al Khalifa", 45)
            .entity("Q6", "Hamad bin Isa Al Khalifa I", 10)
            .claim("Q1", "P22", "Q2")
            .claim("Q1", "P26", "Q4")
            .claim("Q1", "P40", "Q5")
            .claim("Q2", "P22", "Q3")
            .claim("Q2", "P40", "Q1")
            .claim("Q3", "P22", "Q6")
    }

    /// Breaks the cache database just before the sitelink lookup for `id`
    struct CacheBreakingTransport {
        inner: Arc<FakeWiki>,
        db_path: PathBuf,
        id: String,
    }

    #[async_trait]
    impl Transport for CacheBreakingTransport {
        async fn execute(&self, request: &RemoteRequest) -> std::result::Result<String, TransportError> {
            let params = &request.params;
            if params.get("action").map(String::as_str) == Some("wbgetentities")
                && params.get("ids") == Some(&self.id)
            {
                let conn = rusqlite::Connection::open(&self.db_path).unwrap();
                conn.execute_batch("DROP TABLE http_cache").unwrap();
            }
            self.inner.execute(request).await
        }
    }

    /// Family crawl with fallback on, one fallback at a time, checkpoint outside the cache dir
    fn fallback_config(cache_dir: &TempDir, state_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.wikinet.cache_dir = cache_dir.path().to_path_buf();
        config.crawl.scope = "family".to_string();
        config.crawl.max_depth = 2;
        config.crawl.concurrency = 1;
        config.crawl.state_path = Some(state_dir.path().join("crawl.json"));
        config
    }

    /// Crawl from Q1 with the cache breaking while the depth-1 batch [Q2, Q4, Q5] is merged
    async fn crawl_with_broken_cache(state_dir: &TempDir) -> (Config, CrawlReport) {
        let cache_dir = TempDir::new().unwrap();
        let transport = Arc::new(CacheBreakingTransport {
            inner: Arc::new(bahrain()),
            db_path: TestHarness::cache_path(&cache_dir),
            id: "Q4".to_string(),
        });
        let client = TestHarness::client_over(transport, &cache_dir).await;
        let config = fallback_config(&cache_dir, state_dir);
        let report = Crawler::new(&config, client)
            .unwrap()
            .run(&[Seed::parse("Q1")])
            .await
            .unwrap();
        (config, report)
    }

    fn test_config(h: &TestHarness, max_depth: usize) -> Config {
        let mut config = Config::default();
        config.wikinet.cache_dir = h.dir.path().to_path_buf();
        config.crawl.scope = "family".to_string();
        config.crawl.max_depth = max_depth;
        config.crawl.fallback = false;
        config
    }

    fn edge_ids(graph: &GraphSnapshot) -> Vec<(String, String, String, SourceSystem)> {
        let mut ids: Vec<_> = graph
            .edges
            .iter()
            .map(|e| (e.from_id.clone(), e.to_id.clone(), e.predicate_code.clone(), e.provenance.source_system))
            .collect();
        ids.sort();
        ids
    }

    fn node_ids(graph: &GraphSnapshot) -> Vec<String> {
        let mut ids: Vec<_> = graph.nodes.iter().map(|n| n.id.clone()).collect();
        ids.sort();
        ids
    }

    fn fathers<'a>(graph: &'a GraphSnapshot, id: &str) -> Vec<&'a GraphEdge> {
        graph
            .edges
            .iter()
            .filter(|e| e.from_id == id && e.predicate_code == "father")
            .collect()
    }

    #[tokio::test]
    async fn test_royal_family_seed_depth_one_and_two() {
        let h = TestHarness::new(bahrain()).await;
        let seeds = [Seed::parse("Royal family of Bahrain")];

        let crawler = Crawler::new(&test_config(&h, 1), h.client.clone()).unwrap();
        let report = crawler.run(&seeds).await.unwrap();
        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(fathers(&report.graph, "Q1").len(), 1);
        assert_eq!(fathers(&report.graph, "Q1")[0].to_id, "Q2");
        assert_eq!(report.stats.expansion_order, vec!["Q1", "Q2", "Q4", "Q5"]);

        let crawler = Crawler::new(&test_config(&h, 2), h.client.clone()).unwrap();
        let report = crawler.run(&seeds).await.unwrap();
        let grandfather = report.graph.nodes.iter().find(|n| n.id == "Q3").unwrap();
        assert_eq!(grandfather.first_seen_depth, 2);
        assert_eq!(grandfather.label, "Salman bin Hamad Al Khalifa I");
        assert!(report.stats.expansion_order.contains(&"Q3".to_string()));
        assert!(report.unresolved_seeds.is_empty());
        assert!(!report.families.is_empty());
        assert_eq!(report.families.level_of("Q1"), report.families.level_of("Q4"));
    }

    #[tokio::test]
    async fn test_node_budget_of_one_keeps_only_the_seed() {
        let wiki = FakeWiki::new()
            .entity("Q1", "Seed", 10)
            .claim("Q1", "P40", "Q2")
            .claim("Q1", "P40", "Q3")
            .claim("Q1", "P40", "Q4")
            .claim("Q1", "P26", "Q5")
            .claim("Q1", "P3373", "Q6");
        let h = TestHarness::new(wiki).await;
        let mut config = test_config(&h, 2);
        config.crawl.max_nodes = Some(1);

        let report = Crawler::new(&config, h.client.clone())
            .unwrap()
            .run(&[Seed::parse("Q1")])
            .await
            .unwrap();
        assert_eq!(report.status, CrawlStatus::BudgetExhausted);
        assert_eq!(report.graph.nodes.len(), 1);
        assert_eq!(report.graph.nodes[0].id, "Q1");
        assert!(report.graph.edges.is_empty());
        assert_eq!(report.stats.expansion_order, vec!["Q1"]);
        assert!(!report.stats.budget_notes.is_empty());
    }

    #[tokio::test]
    async fn test_edge_budget_is_respected() {
        let h = TestHarness::new(bahrain()).await;
        let mut config = test_config(&h, 3);
        config.crawl.max_edges = Some(2);

        let report = Crawler::new(&config, h.client.clone())
            .unwrap()
            .run(&[Seed::parse("Q1")])
            .await
            .unwrap();
        assert_eq!(report.status, CrawlStatus::BudgetExhausted);
        assert_eq!(report.graph.edges.len(), 2);
        assert_eq!(report.stats.expansion_order, vec!["Q1"]);
    }

    #[tokio::test]
    async fn test_fallback_fills_missing_father() {
        let wiki = FakeWiki::new()
            .entity("Q10", "Hamad bin Isa Al Khalifa", 80)
            .article("Q10", "Hamad bin Isa Al Khalifa", HAMAD_INFOBOX)
            .entity("Q11", "Isa bin Salman Al Khalifa", 50)
            .article("Q11", "Isa bin Salman Al Khalifa", "")
            .claim("Q10", "P26", "Q12")
            .entity("Q12", "Sabika bint Ibrahim Al Khalifa", 20);
        let h = TestHarness::new(wiki).await;
        let mut config = test_config(&h, 0);
        config.crawl.fallback = true;

        let report = Crawler::new(&config, h.client.clone())
            .unwrap()
            .run(&[Seed::parse("Q10")])
            .await
            .unwrap();
        let father = fathers(&report.graph, "Q10");
        assert_eq!(father.len(), 1);
        assert_eq!(father[0].to_id, "Q11");
        assert_eq!(father[0].provenance.source_system, SourceSystem::TextFallback);
        assert_eq!(report.stats.fallback_invocations, 1);
        assert_eq!(report.stats.fallback_facts, 1);
        // Spouse came from structured data; no fallback duplicate
        let spouses: Vec<_> = report.graph.edges.iter().filter(|e| e.predicate_code == "spouse").collect();
        assert_eq!(spouses.len(), 1);
        assert_eq!(spouses[0].provenance.source_system, SourceSystem::Structured);
    }

    #[tokio::test]
    async fn test_warm_cache_runs_are_identical() {
        let h = TestHarness::new(bahrain()).await;
        let config = test_config(&h, 2);
        let seeds = [Seed::parse("Q1")];

        let first = Crawler::new(&config, h.client.clone()).unwrap().run(&seeds).await.unwrap();
        let calls = h.wiki.total_calls();

        let client = TestHarness::client_for(h.wiki.clone(), &h.dir).await;
        let second = Crawler::new(&config, client).unwrap().run(&seeds).await.unwrap();

        assert_eq!(h.wiki.total_calls(), calls);
        assert_eq!(first.graph, second.graph);
        assert_eq!(first.stats.expansion_order, second.stats.expansion_order);
    }

    #[tokio::test]
    async fn test_interrupt_then_resume_matches_full_run() {
        let h = TestHarness::new(bahrain()).await;
        let mut config = test_config(&h, 2);
        let seeds = [Seed::parse("Q1")];

        let full = Crawler::new(&config, h.client.clone()).unwrap().run(&seeds).await.unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let stopped = Crawler::new(&config, h.client.clone())
            .unwrap()
            .with_cancel_flag(cancel)
            .run(&seeds)
            .await
            .unwrap();
        assert_eq!(stopped.status, CrawlStatus::Interrupted);
        assert!(stopped.graph.edges.is_empty());

        config.crawl.resume = true;
        let resumed = Crawler::new(&config, h.client.clone()).unwrap().run(&seeds).await.unwrap();
        assert_eq!(resumed.status, CrawlStatus::Completed);
        assert_eq!(resumed.run_id, stopped.run_id);
        assert_eq!(node_ids(&resumed.graph), node_ids(&full.graph));
        assert_eq!(edge_ids(&resumed.graph), edge_ids(&full.graph));
    }

    #[tokio::test]
    async fn test_failed_identifier_is_retried_on_resume() {
        let h = TestHarness::new(bahrain().failing_subject("Q2")).await;
        let mut config = test_config(&h, 2);
        config.crawl.batch_size = 1;
        let seeds = [Seed::parse("Q1")];

        let partial = Crawler::new(&config, h.client.clone()).unwrap().run(&seeds).await.unwrap();
        assert_eq!(partial.status, CrawlStatus::Completed);
        assert!(!partial.stats.warnings.is_empty());
        assert!(!partial.stats.expansion_order.contains(&"Q2".to_string()));
        let checkpoint = Checkpoint::load(&config.state_path()).unwrap().unwrap();
        assert_eq!(checkpoint.state.failed, vec![FrontierEntry::new("Q2", 1)]);

        // Same cache file, healthy upstream
        let healthy = Arc::new(bahrain());
        let client = TestHarness::client_for(healthy.clone(), &h.dir).await;
        config.crawl.resume = true;
        let resumed = Crawler::new(&config, client).unwrap().run(&seeds).await.unwrap();
        assert_eq!(resumed.stats.expansion_order.first().map(String::as_str), Some("Q2"));

        let reference = TestHarness::new(bahrain()).await;
        let full = Crawler::new(&test_config(&reference, 2), reference.client.clone())
            .unwrap()
            .run(&seeds)
            .await
            .unwrap();
        assert_eq!(node_ids(&resumed.graph), node_ids(&full.graph));
        assert_eq!(edge_ids(&resumed.graph), edge_ids(&full.graph));
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_with_partial_graph() {
        let h = TestHarness::new(bahrain().failing_subject("Q2")).await;
        let mut config = test_config(&h, 2);
        config.crawl.batch_size = 1;
        config.crawl.fail_fast = true;

        let report = Crawler::new(&config, h.client.clone())
            .unwrap()
            .run(&[Seed::parse("Q1")])
            .await
            .unwrap();
        assert_eq!(report.status, CrawlStatus::Aborted);
        assert!(!report.is_success());
        assert_eq!(report.stats.expansion_order, vec!["Q1"]);
        assert_eq!(report.graph.edges.len(), 3);
    }

    #[tokio::test]
    async fn test_unresolved_seed_does_not_stop_others() {
        let h = TestHarness::new(bahrain()).await;
        let report = Crawler::new(&test_config(&h, 0), h.client.clone())
            .unwrap()
            .run(&[Seed::parse("Nobody by that name"), Seed::parse("Q1")])
            .await
            .unwrap();
        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(report.unresolved_seeds, vec!["text:Nobody by that name".to_string()]);
        assert_eq!(report.stats.expansion_order, vec!["Q1"]);
        // Depth 0: neighbours are recorded but never expanded
        assert!(report.graph.nodes.len() > 1);
    }

    #[tokio::test]
    async fn test_cache_failure_aborts_with_partial_graph() {
        let state_dir = TempDir::new().unwrap();
        let (config, report) = crawl_with_broken_cache(&state_dir).await;

        assert_eq!(report.status, CrawlStatus::Aborted);
        assert!(!report.is_success());
        let reason = report.stats.abort_reason.clone().unwrap();
        assert!(reason.contains("Database error"), "reason: {}", reason);
        assert_eq!(report.stats.expansion_order, vec!["Q1", "Q2"]);
        assert_eq!(node_ids(&report.graph), vec!["Q1", "Q2", "Q3", "Q4", "Q5"]);
        assert_eq!(report.graph.edges.len(), 5);

        let checkpoint = Checkpoint::load(&config.state_path()).unwrap().unwrap();
        assert_eq!(checkpoint.state.status, CrawlStatus::Aborted);
        assert_eq!(checkpoint.graph, report.graph);
    }

    #[tokio::test]
    async fn test_resume_after_mid_batch_stop_expands_the_rest_of_the_batch() {
        let state_dir = TempDir::new().unwrap();
        let (mut config, stopped) = crawl_with_broken_cache(&state_dir).await;
        assert_eq!(stopped.status, CrawlStatus::Aborted);

        let checkpoint = Checkpoint::load(&config.state_path()).unwrap().unwrap();
        let queued: Vec<_> = checkpoint.state.frontier.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(queued, vec!["Q4", "Q5", "Q3"]);
        assert_eq!(checkpoint.state.frontier[0].depth, 1);

        // Healthy cache, same checkpoint
        let h = TestHarness::new(bahrain()).await;
        config.wikinet.cache_dir = h.dir.path().to_path_buf();
        config.crawl.resume = true;
        let resumed = Crawler::new(&config, h.client.clone())
            .unwrap()
            .run(&[Seed::parse("Q1")])
            .await
            .unwrap();
        assert_eq!(resumed.status, CrawlStatus::Completed);
        assert_eq!(resumed.run_id, stopped.run_id);
        assert_eq!(&resumed.stats.expansion_order[..2], &["Q4".to_string(), "Q5".to_string()]);

        let reference_cache = TempDir::new().unwrap();
        let reference_state = TempDir::new().unwrap();
        let client = TestHarness::client_for(Arc::new(bahrain()), &reference_cache).await;
        let full = Crawler::new(&fallback_config(&reference_cache, &reference_state), client)
            .unwrap()
            .run(&[Seed::parse("Q1")])
            .await
            .unwrap();
        assert_eq!(full.stats.expansion_order, vec!["Q1", "Q2", "Q4", "Q5", "Q3"]);
        assert_eq!(node_ids(&resumed.graph), node_ids(&full.graph));
        assert_eq!(edge_ids(&resumed.graph), edge_ids(&full.graph));
    }

    #[tokio::test]
    async fn test_sparse_checkpoints_still_resume() {
        let h = TestHarness::new(bahrain()).await;
        let mut config = test_config(&h, 2);
        config.crawl.checkpoint_every = 100;
        let seeds = [Seed::parse("Q1")];

        let first = Crawler::new(&config, h.client.clone()).unwrap().run(&seeds).await.unwrap();
        let checkpoint = Checkpoint::load(&config.state_path()).unwrap().unwrap();
        assert_eq!(checkpoint.state.status, CrawlStatus::Completed);
        assert_eq!(checkpoint.graph, first.graph);
        assert!(checkpoint.state.in_progress.is_empty());
    }

    #[tokio::test]
    async fn test_resumed_completed_crawl_adds_nothing() {
        let h = TestHarness::new(bahrain()).await;
        let mut config = test_config(&h, 1);
        let seeds = [Seed::parse("Q1")];
        let first = Crawler::new(&config, h.client.clone()).unwrap().run(&seeds).await.unwrap();

        config.crawl.resume = true;
        let again = Crawler::new(&config, h.client.clone()).unwrap().run(&seeds).await.unwrap();
        assert_eq!(again.graph, first.graph);
        assert!(again.stats.expansion_order.is_empty());
    }
}
