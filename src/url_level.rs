//! URL level: postings refer to individual URLs within a host.
//!
//! Builders are keyed by `host_hash`, so every URL of a host lands in one
//! builder instance and later joins against link data stay local. The
//! builder map grows on demand under a coarse lock with double-checked
//! insertion.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config;
use crate::error::Result;
use crate::hash;
use crate::level::{Level, LevelType};
use crate::record::{LinkRecord, ReturnRecord, UrlRecord};
use crate::shard::{BuilderLimits, IndexBuilder};
use crate::text;
use crate::tsv::{self, TsvReader};
use crate::url::Url;

use crate::domain_level::COLUMN_WEIGHTS;

pub const URL_DB: &str = "url";

type HostBuilder = Arc<Mutex<IndexBuilder<UrlRecord>>>;

pub struct UrlLevel {
    db_name: String,
    builders: Mutex<HashMap<u64, HostBuilder>>,
    limits: BuilderLimits,
}

impl Default for UrlLevel {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlLevel {
    pub fn new() -> Self {
        Self::with_db(URL_DB)
    }

    pub fn with_db(db_name: &str) -> Self {
        let limits =
            BuilderLimits::from_config().with_hash_table_size(config::get().url_hash_table_size);
        UrlLevel {
            db_name: db_name.to_string(),
            builders: Mutex::new(HashMap::new()),
            limits,
        }
    }

    /// The builder for a host, created on first use.
    fn builder_for(&self, host_hash: u64) -> HostBuilder {
        let mut builders = self.builders.lock().expect("url builder map lock poisoned");
        builders
            .entry(host_hash)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IndexBuilder::with_limits(
                    &self.db_name,
                    host_hash,
                    self.limits,
                )))
            })
            .clone()
    }

    fn snapshot(&self) -> Vec<HostBuilder> {
        self.builders
            .lock()
            .expect("url builder map lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl Level for UrlLevel {
    fn level_type(&self) -> LevelType {
        LevelType::Url
    }

    fn add_index_file(&self, local_path: &Path) -> Result<usize> {
        let mut rows = 0usize;
        for line in TsvReader::open(local_path)?.lines() {
            let line = line?;
            let columns = tsv::columns(&line);
            if columns.is_empty() {
                continue;
            }
            let url = Url::parse(columns[0]);
            let url_hash = url.hash();
            let builder = self.builder_for(url.host_hash());
            let mut builder = builder.lock().expect("url builder lock poisoned");

            for (column, value) in columns.iter().skip(1).take(COLUMN_WEIGHTS.len()).enumerate() {
                for word in text::full_text_words(value) {
                    builder.add(
                        hash::str_hash(&word),
                        UrlRecord::new(url_hash, COLUMN_WEIGHTS[column]),
                    );
                }
            }
            rows += 1;
        }
        Ok(rows)
    }

    fn full_shards(&self) -> Vec<u64> {
        self.builders
            .lock()
            .expect("url builder map lock poisoned")
            .iter()
            .filter_map(|(host_hash, builder)| {
                builder
                    .lock()
                    .expect("url builder lock poisoned")
                    .full()
                    .then_some(*host_hash)
            })
            .collect()
    }

    fn append_shard(&self, shard_id: u64) -> Result<()> {
        let builder = {
            let builders = self.builders.lock().expect("url builder map lock poisoned");
            builders.get(&shard_id).cloned()
        };
        match builder {
            Some(builder) => builder.lock().expect("url builder lock poisoned").append(),
            None => Ok(()),
        }
    }

    fn append(&self) -> Result<()> {
        for builder in self.snapshot() {
            builder.lock().expect("url builder lock poisoned").append()?;
        }
        Ok(())
    }

    fn merge(&self) -> Result<()> {
        for builder in self.snapshot() {
            let mut builder = builder.lock().expect("url builder lock poisoned");
            builder.append()?;
            builder.merge()?;
        }
        Ok(())
    }

    fn truncate(&self) -> Result<()> {
        for builder in self.snapshot() {
            builder.lock().expect("url builder lock poisoned").truncate()?;
        }
        self.builders
            .lock()
            .expect("url builder map lock poisoned")
            .clear();
        Ok(())
    }

    /// The URL level is joined against link data rather than queried
    /// directly.
    fn find(&self, _query: &str) -> Result<Vec<ReturnRecord>> {
        Ok(Vec::new())
    }
}

/// Boost URL results with inbound links.
///
/// Both inputs must be sorted ascending: `links` by target hash, `results`
/// by value. Each distinct `(source_domain, target)` edge contributes
/// `expm1(25·score)/50` to the matched result once; further links from the
/// same source domain to the same target are dropped.
///
/// Returns the number of links applied.
pub fn apply_url_links(links: &[LinkRecord], results: &mut [ReturnRecord]) -> usize {
    if links.is_empty() {
        return 0;
    }

    let mut applied = 0usize;
    let mut i = 0usize;
    let mut j = 0usize;
    let mut seen_edges: std::collections::HashSet<(u64, u64)> = std::collections::HashSet::new();

    while i < links.len() && j < results.len() {
        let target = links[i].value;
        let value = results[j].value;

        if target < value {
            i += 1;
        } else if target == value {
            let edge = (links[i].source_domain, target);
            if seen_edges.insert(edge) {
                results[j].score += (25.0f32 * links[i].score).exp_m1() / 50.0;
                results[j].num_url_links += 1;
                applied += 1;
            }
            i += 1;
        } else {
            j += 1;
        }
    }

    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_url_links_dedups_source_domain() {
        let links = vec![
            LinkRecord::new(100, 10, 0.1),
            LinkRecord::new(100, 10, 0.9),
            LinkRecord::new(100, 11, 0.5),
        ];
        let mut results = vec![ReturnRecord::new(100, 0.0)];

        let applied = apply_url_links(&links, &mut results);

        assert_eq!(applied, 2);
        assert_eq!(results[0].num_url_links, 2);
        let expected =
            (25.0f32 * 0.1).exp_m1() / 50.0 + (25.0f32 * 0.5).exp_m1() / 50.0;
        assert!((results[0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn test_apply_url_links_skips_unmatched_targets() {
        let links = vec![LinkRecord::new(50, 1, 0.5), LinkRecord::new(200, 1, 0.5)];
        let mut results = vec![ReturnRecord::new(100, 1.0)];
        assert_eq!(apply_url_links(&links, &mut results), 0);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_apply_url_links_empty_links() {
        let mut results = vec![ReturnRecord::new(1, 1.0)];
        assert_eq!(apply_url_links(&[], &mut results), 0);
    }
}
