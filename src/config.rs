//! Deployment configuration.
//!
//! A `Config` is parsed from a TOML file (or built from defaults), validated,
//! and installed process-wide with [`init`]. Builders and levels read their
//! deployment defaults from [`get`]; size limits that tests need to vary are
//! also accepted explicitly at construction sites.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::constants::DEFAULT_NUM_DATA_ROOTS;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories shards are spread over, indexed by `shard_id % len`.
    /// The production deployment uses eight mount points.
    pub data_roots: Vec<PathBuf>,

    /// Number of shards in the domain index.
    pub num_shards: usize,
    /// Number of shards in the word index.
    pub word_num_shards: usize,
    /// Number of shards in the link indexes.
    pub link_num_shards: usize,

    /// Internal hash-table size per shard (0 = single-page data files).
    pub hash_table_size: usize,
    /// Internal hash-table size for per-host URL builders.
    pub url_hash_table_size: usize,

    /// Maximum postings kept per section after a merge.
    pub max_results_per_section: usize,
    /// Maximum number of sections kept per key.
    pub max_sections: usize,

    /// In-memory record bytes at which a builder reports `full()`.
    pub builder_flush_bytes: usize,

    pub num_threads_indexing: usize,
    pub num_threads_merging: usize,
    pub num_threads_hyperball: usize,

    /// Maximum results returned from a manager query.
    pub find_limit: usize,

    /// Root of downloaded crawl batches (`{crawl_data_path}/{batch}/warc.paths.gz`).
    pub crawl_data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_roots: (0..DEFAULT_NUM_DATA_ROOTS)
                .map(|i| PathBuf::from(format!("/mnt/{}", i)))
                .collect(),
            num_shards: 1024,
            word_num_shards: 256,
            link_num_shards: 2001,
            hash_table_size: 0,
            url_hash_table_size: 1000,
            max_results_per_section: 100_000,
            max_sections: 8,
            builder_flush_bytes: 48 * 1024 * 1024,
            num_threads_indexing: 24,
            num_threads_merging: 12,
            num_threads_hyperball: 12,
            find_limit: 1000,
            crawl_data_path: PathBuf::from("/mnt/0/crawl-data"),
        }
    }
}

pub fn parse_config(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .context(format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&contents).context("Failed to parse TOML config")?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.data_roots.is_empty() {
        return Err(anyhow!("Config must define at least one data root"));
    }
    for (name, value) in [
        ("num_shards", config.num_shards),
        ("word_num_shards", config.word_num_shards),
        ("link_num_shards", config.link_num_shards),
        ("max_results_per_section", config.max_results_per_section),
        ("max_sections", config.max_sections),
        ("num_threads_indexing", config.num_threads_indexing),
        ("num_threads_merging", config.num_threads_merging),
        ("num_threads_hyperball", config.num_threads_hyperball),
    ] {
        if value == 0 {
            return Err(anyhow!("Config error: {} must be > 0", name));
        }
    }
    Ok(())
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Install the process-wide configuration. The first call wins; later calls
/// are ignored so that test binaries can install a shared scratch config once.
pub fn init(config: Config) {
    CONFIG.set(config).ok();
}

/// The process-wide configuration, defaulting if [`init`] was never called.
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}
