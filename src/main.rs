use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wikinet::crawl::{CrawlStatus, Crawler};
use wikinet::export::{load_graph, load_taxonomy, write_enrichment, write_graph};
use wikinet::graph::{enrich, validate, Taxonomy};
use wikinet::resolver::Seed;
use wikinet::Config;

#[derive(Parser, Debug)]
#[command(name = "wikinet")]
#[command(about = "Crawl family and affiliation graphs from Wikidata and Wikipedia")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve seeds and crawl their relations
    Crawl(CrawlArgs),
    /// Check an exported graph for dangling or duplicate records
    Validate {
        /// Directory containing nodes.json and edges.json
        dir: PathBuf,
    },
    /// Add centrality, community and role analytics to an exported graph
    Enrich {
        /// Directory containing nodes.json and edges.json
        dir: PathBuf,

        /// Where to write enriched_nodes.json and enriched_edges.json (defaults to DIR)
        #[arg(long)]
        out: Option<PathBuf>,

        /// JSON object mapping role names to label keywords
        #[arg(long)]
        taxonomy: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct CrawlArgs {
    /// Seed: free text, `Q123`, or `Category:Name`
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Exact article title
    #[arg(long = "title")]
    titles: Vec<String>,

    /// Entity identifier
    #[arg(long = "qid")]
    qids: Vec<String>,

    /// Category whose member articles become seeds
    #[arg(long = "category")]
    categories: Vec<String>,

    #[arg(long)]
    max_depth: Option<usize>,

    #[arg(long)]
    max_nodes: Option<usize>,

    #[arg(long)]
    max_edges: Option<usize>,

    /// family, political, or both
    #[arg(long)]
    mode: Option<String>,

    /// Wiki language for labels and articles
    #[arg(long)]
    lang: Option<String>,

    /// Requests per second ceiling
    #[arg(long)]
    rate: Option<f64>,

    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Output directory for the export
    #[arg(long, default_value = "out")]
    out: PathBuf,

    /// Continue from the last checkpoint
    #[arg(long)]
    resume: bool,

    /// Stop at the first remote failure
    #[arg(long)]
    fail_fast: bool,

    /// Skip the Wikipedia infobox fallback
    #[arg(long)]
    no_fallback: bool,
}

impl CrawlArgs {
    fn seeds(&self) -> Vec<Seed> {
        let mut seeds: Vec<Seed> = self.seeds.iter().map(|s| Seed::parse(s)).collect();
        seeds.extend(self.titles.iter().map(|t| Seed::Title(t.trim().to_string())));
        seeds.extend(self.qids.iter().map(|q| Seed::Identifier(q.trim().to_uppercase())));
        seeds.extend(self.categories.iter().map(|c| {
            Seed::Category(c.trim().trim_start_matches("Category:").to_string())
        }));
        seeds
    }

    /// Command-line flags win over config.toml
    fn apply(&self, config: &mut Config) {
        if let Some(depth) = self.max_depth {
            config.crawl.max_depth = depth;
        }
        if self.max_nodes.is_some() {
            config.crawl.max_nodes = self.max_nodes;
        }
        if self.max_edges.is_some() {
            config.crawl.max_edges = self.max_edges;
        }
        if let Some(mode) = &self.mode {
            config.crawl.scope = mode.clone();
        }
        if let Some(lang) = &self.lang {
            config.wikinet.language = lang.clone();
        }
        if let Some(rate) = self.rate {
            config.http.requests_per_second = rate;
        }
        if let Some(dir) = &self.cache_dir {
            config.wikinet.cache_dir = dir.clone();
        }
        config.crawl.resume |= self.resume;
        config.crawl.fail_fast |= self.fail_fast;
        if self.no_fallback {
            config.crawl.fallback = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", config.wikinet.log_level.as_str())
    ).init();

    match cli.command {
        Command::Crawl(args) => {
            args.apply(&mut config);
            config.validate()?;
            run_crawl(&config, &args).await
        }
        Command::Validate { dir } => run_validate(&dir),
        Command::Enrich { dir, out, taxonomy } => run_enrich(&dir, out.as_deref(), taxonomy.as_deref()),
    }
}

async fn run_crawl(config: &Config, args: &CrawlArgs) -> Result<()> {
    let seeds = args.seeds();
    if seeds.is_empty() && !config.crawl.resume {
        anyhow::bail!("No seeds given. Use --seed, --title, --qid or --category (or --resume)");
    }

    log::info!("Cache: {}", config.cache_db_path().display());
    log::info!(
        "Scope {}, depth {}, language {}, {} req/s",
        config.crawl.scope,
        config.crawl.max_depth,
        config.wikinet.language,
        config.http.requests_per_second
    );

    let crawler = Crawler::from_config(config)
        .await
        .context("Failed to set up the crawler")?;

    // Ctrl-C stops after the current batch; the checkpoint stays usable
    let cancel = crawler.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, finishing the current batch");
            cancel.cancel();
        }
    });

    let report = crawler.run(&seeds).await?;
    let paths = write_graph(&args.out, &report)
        .with_context(|| format!("Failed to write export to {}", args.out.display()))?;

    println!("\n=== Wikinet crawl {} ===\n", report.run_id);
    println!("Status:     {}", report.status);
    println!("Nodes:      {}", report.graph.nodes.len());
    println!("Edges:      {}", report.graph.edges.len());
    println!("Expanded:   {}", report.stats.expanded);
    println!("Fallback:   {} fact(s) from {} lookup(s)", report.stats.fallback_facts, report.stats.fallback_invocations);
    println!("Warnings:   {}", report.stats.warnings.len());
    for (code, count) in &report.stats.graph.by_predicate {
        println!("  {:<20} {:>6}", code, count);
    }
    for seed in &report.unresolved_seeds {
        println!("Unresolved seed: {}", seed);
    }
    for note in &report.stats.budget_notes {
        println!("Budget: {}", note);
    }
    println!("\nNodes: {}", paths.nodes.display());
    println!("Edges: {}", paths.edges.display());
    println!("Stats: {}", paths.stats.display());
    if let Some(families) = &paths.families {
        println!("Families: {}", families.display());
    }

    match report.status {
        CrawlStatus::Aborted => anyhow::bail!(
            "Crawl aborted ({}); partial graph written",
            report.stats.abort_reason.as_deref().unwrap_or("unknown cause")
        ),
        CrawlStatus::Interrupted => {
            log::info!("Run again with --resume to continue");
            Ok(())
        }
        _ => Ok(()),
    }
}

fn run_validate(dir: &std::path::Path) -> Result<()> {
    let graph = load_graph(dir).with_context(|| format!("Failed to load graph from {}", dir.display()))?;
    let problems = validate(&graph);

    println!("{} nodes, {} edges", graph.nodes.len(), graph.edges.len());
    if problems.is_empty() {
        println!("Graph is consistent");
        return Ok(());
    }
    for problem in &problems {
        println!("  - {}", problem);
    }
    anyhow::bail!("{} problem(s) found in {}", problems.len(), dir.display())
}

fn run_enrich(dir: &std::path::Path, out: Option<&std::path::Path>, taxonomy: Option<&std::path::Path>) -> Result<()> {
    let graph = load_graph(dir).with_context(|| format!("Failed to load graph from {}", dir.display()))?;
    let taxonomy = match taxonomy {
        Some(path) => load_taxonomy(path).with_context(|| format!("Failed to read taxonomy {}", path.display()))?,
        None => Taxonomy::new(),
    };

    let enrichment = enrich(&graph, &taxonomy);
    let out = out.unwrap_or(dir);
    let (nodes, edges) = write_enrichment(out, &enrichment)
        .with_context(|| format!("Failed to write analytics to {}", out.display()))?;

    let mut ranked: Vec<_> = enrichment.nodes.iter().collect();
    ranked.sort_by(|a, b| b.importance_score.total_cmp(&a.importance_score));
    println!("\n=== Most important nodes ===\n");
    for node in ranked.iter().take(10) {
        println!(
            "{:>8.4}  {:<12} {:<10} {}",
            node.importance_score, node.node.id, node.primary_role, node.node.label
        );
    }
    println!("\nNodes: {}", nodes.display());
    println!("Edges: {}", edges.display());
    Ok(())
}
