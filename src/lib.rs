//! crawldex: the indexing core of a web-scale search engine.
//!
//! Ingests tab-separated records derived from web-crawl archives and
//! produces a sharded, on-disk inverted index mapping term hashes to ranked
//! postings. Three subsystems carry the weight:
//!
//! - the shard builder: an append / merge / compact engine per shard
//!   ([`shard`])
//! - the binary shard format and its constant-expected-time lookup path
//!   ([`shard::ShardReader`])
//! - the parallel ingestion pipeline over per-shard builders with a
//!   background merge scheduler ([`manager`], [`merger`])
//!
//! A HyperLogLog estimator ([`hyperloglog`]) backs the per-shard unique
//! counts, and HyperBall ([`hyperball`]) computes harmonic centrality over
//! the link graph for the scoring priors.

pub mod bloom;
pub mod config;
pub mod constants;
pub mod domain_level;
pub mod domain_stats;
pub mod error;
pub mod hash;
pub mod hyperball;
pub mod hyperloglog;
pub mod level;
pub mod link_level;
pub mod logging;
pub mod manager;
pub mod merger;
pub mod profiler;
pub mod record;
pub mod shard;
pub mod sharded;
pub mod text;
pub mod tsv;
pub mod url;
pub mod url_level;
pub mod urlstore;
pub mod word_level;

pub use bloom::BloomFilter;
pub use config::Config;
pub use domain_level::DomainLevel;
pub use domain_stats::DomainStats;
pub use error::{IndexError, Result};
pub use hyperball::hyper_ball;
pub use hyperloglog::HyperLogLog;
pub use level::{Level, LevelType};
pub use link_level::LinkLevel;
pub use manager::IndexManager;
pub use merger::Merger;
pub use record::{
    CountedRecord, DomainLinkRecord, DomainRecord, IndexRecord, LinkRecord, ReturnRecord,
    UrlRecord,
};
pub use shard::{BuilderLimits, IndexBuilder, ShardReader};
pub use sharded::{ShardedBuilder, ShardedIndex};
pub use url::Url;
pub use url_level::UrlLevel;
pub use word_level::WordLevel;
