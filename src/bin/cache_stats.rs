use wikinet::cache::{CacheOutcome, ResponseStore};
use wikinet::config::Config;
use wikinet::crawl::Checkpoint;

/// Share of lookups answered without touching the network
fn hit_rate(log_by_outcome: &[(String, i64)]) -> Option<f64> {
    let count = |name: &str| {
        log_by_outcome
            .iter()
            .find(|(outcome, _)| outcome == name)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    let hits = count(CacheOutcome::HitMemory.as_str()) + count(CacheOutcome::HitStore.as_str());
    let total = hits + count(CacheOutcome::Stored.as_str()) + count(CacheOutcome::Failed.as_str());
    if total == 0 {
        return None;
    }
    Some(hits as f64 / total as f64)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    let path = config.cache_db_path();
    if !path.exists() {
        println!("No cache at {}. Run a crawl first.", path.display());
        return Ok(());
    }
    let store = ResponseStore::open(&path).await?;
    let summary = store.summary().await?;

    println!("\n=== Wikinet Cache Statistics ===\n");
    println!("Cache file: {}", path.display());
    println!("Cached responses: {}", summary.entries);
    if let (Some(oldest), Some(newest)) = (&summary.oldest, &summary.newest) {
        println!("Captured between {} and {}", oldest, newest);
    }

    if !summary.entries_by_endpoint.is_empty() {
        println!("\nResponses by endpoint:\n");
        println!("{:-<70}", "");
        println!("{:<58} {:>10}", "Endpoint", "Count");
        println!("{:-<70}", "");
        for (endpoint, count) in &summary.entries_by_endpoint {
            println!("{:<58} {:>10}", endpoint, count);
        }
        println!("{:-<70}", "");
    }

    if !summary.log_by_outcome.is_empty() {
        println!("\nAudit log by outcome:\n");
        println!("{:-<30}", "");
        for (outcome, count) in &summary.log_by_outcome {
            println!("{:<18} {:>10}", outcome, count);
        }
        println!("{:-<30}", "");
        if let Some(rate) = hit_rate(&summary.log_by_outcome) {
            println!("Cache hit rate: {:.1}%", rate * 100.0);
        }
    }

    let state_path = config.state_path();
    match Checkpoint::load(&state_path) {
        Ok(Some(checkpoint)) => {
            println!("\nCheckpoint {} (saved {})", checkpoint.run_id, checkpoint.saved_at);
            println!("  Status:   {}", checkpoint.state.status);
            println!("  Visited:  {}", checkpoint.state.visited.len());
            println!("  Queued:   {}", checkpoint.state.frontier.len());
            println!("  Failed:   {}", checkpoint.state.failed.len());
            println!(
                "  Graph:    {} nodes, {} edges",
                checkpoint.state.node_count, checkpoint.state.edge_count
            );
        }
        Ok(None) => println!("\nNo checkpoint at {}", state_path.display()),
        Err(e) => log::warn!("Could not read checkpoint {}: {}", state_path.display(), e),
    }

    Ok(())
}
