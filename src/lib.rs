pub mod config;
pub mod error;
pub mod db;
pub mod cache;
pub mod remote;
pub mod resolver;
pub mod relations;
pub mod graph;
pub mod crawl;
pub mod export;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use crawl::{CancelFlag, CrawlReport, CrawlStatus, Crawler};
pub use error::{Result, WikinetError};
pub use graph::{GraphEdge, GraphNode, GraphSnapshot};
pub use relations::{Predicate, RelationFact, RelationScope};
pub use resolver::Seed;
