//! Domain level: postings refer to hosts.
//!
//! Every word in an indexed document produces one posting
//! `(term_hash, { host_hash, score })`. The score blends the column weight
//! of the text the word appeared in with the host's precomputed harmonic
//! prior, so a term match on a well-linked host outranks the same match on
//! an obscure one.

use log::warn;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config;
use crate::domain_stats::DomainStats;
use crate::error::Result;
use crate::level::{intersect_postings, top_results, Level, LevelType, SharedBuilders};
use crate::record::{DomainRecord, ReturnRecord};
use crate::shard::BuilderLimits;
use crate::sharded::ShardedIndex;
use crate::text;
use crate::tsv::{self, TsvReader};
use crate::url::Url;
use crate::hash;

/// Column weights for the four text columns of an index TSV row.
pub const COLUMN_WEIGHTS: [f32; 4] = [10.0, 3.0, 2.0, 1.0];

pub const DOMAIN_DB: &str = "domain";

pub struct DomainLevel {
    builders: SharedBuilders<DomainRecord>,
    index: Mutex<ShardedIndex<DomainRecord>>,
    stats: Arc<DomainStats>,
}

impl DomainLevel {
    pub fn new(stats: Arc<DomainStats>) -> Self {
        Self::with_db(DOMAIN_DB, stats)
    }

    pub fn with_db(db_name: &str, stats: Arc<DomainStats>) -> Self {
        let num_shards = config::get().num_shards;
        DomainLevel {
            builders: SharedBuilders::new(db_name, num_shards, BuilderLimits::from_config()),
            index: Mutex::new(ShardedIndex::new(db_name, num_shards)),
            stats,
        }
    }

    fn score(&self, host_hash: u64, column: usize) -> f32 {
        COLUMN_WEIGHTS[column] * (1.0 + self.stats.prior(host_hash))
    }
}

impl Level for DomainLevel {
    fn level_type(&self) -> LevelType {
        LevelType::Domain
    }

    fn add_index_file(&self, local_path: &Path) -> Result<usize> {
        let mut rows = 0usize;
        for line in TsvReader::open(local_path)?.lines() {
            let line = line?;
            let columns = tsv::columns(&line);
            if columns.is_empty() {
                continue;
            }
            let host_hash = Url::parse(columns[0]).host_hash();

            for (column, value) in columns.iter().skip(1).take(COLUMN_WEIGHTS.len()).enumerate() {
                let score = self.score(host_hash, column);
                for word in text::full_text_words(value) {
                    self.builders
                        .add(hash::str_hash(&word), DomainRecord::new(host_hash, score));
                }
            }
            rows += 1;
        }
        Ok(rows)
    }

    fn full_shards(&self) -> Vec<u64> {
        self.builders.full_shards()
    }

    fn append_shard(&self, shard_id: u64) -> Result<()> {
        self.builders.append_shard(shard_id)
    }

    fn append(&self) -> Result<()> {
        self.builders.append_all()
    }

    fn merge(&self) -> Result<()> {
        self.builders.merge_all()
    }

    fn truncate(&self) -> Result<()> {
        self.builders.truncate_all()
    }

    fn find(&self, query: &str) -> Result<Vec<ReturnRecord>> {
        let words = text::full_text_words(query);
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let first_section = config::get().max_results_per_section;
        let mut lists = Vec::with_capacity(words.len());
        let mut index = self.index.lock().expect("domain index lock poisoned");
        for word in &words {
            // Only the first section is globally value-sorted; later
            // sections carry lower-scored postings and are skipped by the
            // merge-join.
            match index.find_with_limit(hash::str_hash(word), first_section) {
                Ok(postings) => {
                    if postings.is_empty() {
                        return Ok(Vec::new());
                    }
                    lists.push(postings);
                }
                Err(e) => {
                    // A broken shard does not poison the query; the term is
                    // treated as absent.
                    warn!("domain lookup failed for '{}': {}", word, e);
                    return Ok(Vec::new());
                }
            }
        }

        Ok(top_results(
            intersect_postings(&lists),
            config::get().find_limit,
        ))
    }
}
