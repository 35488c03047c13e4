//! Indexing levels: per-entity strategies sharing the shard builder
//! framework.
//!
//! A level owns the shared, mutex-guarded shard builders for one database
//! and knows how to turn a TSV archive into records. The manager drives
//! levels through the object-safe [`Level`] trait and never owns their
//! internals; the background merger reaches builders only through
//! `append_shard`, so every cache-file append happens under that shard's
//! mutex.

use rayon::prelude::*;
use std::path::Path;
use std::sync::Mutex;

use crate::bloom::BloomFilter;
use crate::config;
use crate::error::{IndexError, Result};
use crate::record::{IndexRecord, ReturnRecord};
use crate::shard::{BuilderLimits, IndexBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelType {
    Domain,
    Url,
    Word,
    Link,
}

/// The polymorphic seam between the manager and a level.
pub trait Level: Send + Sync {
    fn level_type(&self) -> LevelType;

    /// Stream one TSV archive into the level's builders. Returns the number
    /// of rows consumed.
    fn add_index_file(&self, local_path: &Path) -> Result<usize>;

    /// Stream one link archive, dropping postings whose target URL is not in
    /// the membership filter. Levels that do not index links ignore the call.
    fn add_link_file(&self, _local_path: &Path, _filter: &BloomFilter) -> Result<usize> {
        Ok(0)
    }

    /// Shard ids whose in-memory logs have reached the flush threshold.
    fn full_shards(&self) -> Vec<u64>;

    /// Append one shard's in-memory log to its cache files.
    fn append_shard(&self, shard_id: u64) -> Result<()>;

    /// Append every shard's in-memory log.
    fn append(&self) -> Result<()>;

    /// Fold every shard's cache into its data file.
    fn merge(&self) -> Result<()>;

    /// Delete all data for this level.
    fn truncate(&self) -> Result<()>;

    /// Post-ingestion housekeeping (score recalculation, re-sorting).
    fn optimize(&self) -> Result<()> {
        Ok(())
    }

    /// Query the level. Levels that are only joined against return nothing.
    fn find(&self, query: &str) -> Result<Vec<ReturnRecord>>;
}

/// Mutex-guarded shard builders shared between ingestion workers and the
/// background merger. The mutex serializes both in-memory adds and cache
/// file appends for one shard; shards are independent.
pub struct SharedBuilders<R: IndexRecord> {
    builders: Vec<Mutex<IndexBuilder<R>>>,
}

impl<R: IndexRecord> SharedBuilders<R> {
    pub fn new(db_name: &str, num_shards: usize, limits: BuilderLimits) -> Self {
        assert!(num_shards > 0);
        SharedBuilders {
            builders: (0..num_shards as u64)
                .map(|id| Mutex::new(IndexBuilder::with_limits(db_name, id, limits)))
                .collect(),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.builders.len()
    }

    pub fn shard_of(&self, key: u64) -> u64 {
        key % self.builders.len() as u64
    }

    pub fn add(&self, key: u64, record: R) {
        let shard = self.shard_of(key) as usize;
        self.builders[shard]
            .lock()
            .expect("shard builder lock poisoned")
            .add(key, record);
    }

    pub fn full_shards(&self) -> Vec<u64> {
        self.builders
            .iter()
            .filter_map(|b| {
                let builder = b.lock().expect("shard builder lock poisoned");
                builder.full().then(|| builder.id())
            })
            .collect()
    }

    pub fn append_shard(&self, shard_id: u64) -> Result<()> {
        self.builders[shard_id as usize]
            .lock()
            .expect("shard builder lock poisoned")
            .append()
    }

    pub fn append_all(&self) -> Result<()> {
        for builder in &self.builders {
            builder.lock().expect("shard builder lock poisoned").append()?;
        }
        Ok(())
    }

    /// Merge every shard, fanning out over the configured merge thread
    /// count. Shards are independent, so the only coordination is each
    /// shard's own lock.
    pub fn merge_all(&self) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config::get().num_threads_merging)
            .build()
            .map_err(|e| IndexError::validation(e.to_string()))?;

        pool.install(|| {
            self.builders.par_iter().try_for_each(|builder| {
                let mut builder = builder.lock().expect("shard builder lock poisoned");
                builder.append()?;
                builder.merge()
            })
        })
    }

    pub fn truncate_all(&self) -> Result<()> {
        for builder in &self.builders {
            builder.lock().expect("shard builder lock poisoned").truncate()?;
        }
        Ok(())
    }

    /// Run `f` against every builder in turn, under its lock.
    pub fn for_each(&self, f: &mut dyn FnMut(&mut IndexBuilder<R>) -> Result<()>) -> Result<()> {
        for builder in &self.builders {
            f(&mut builder.lock().expect("shard builder lock poisoned"))?;
        }
        Ok(())
    }
}

/// Intersect per-term posting lists by `value`, summing scores.
///
/// Every input list must be sorted by `value` ascending (the stored order of
/// a first section). The result keeps only values present in all lists and
/// is itself value-ascending.
pub fn intersect_postings<R: IndexRecord>(lists: &[Vec<R>]) -> Vec<ReturnRecord> {
    let Some(first) = lists.first() else {
        return Vec::new();
    };
    if lists.len() == 1 {
        return first
            .iter()
            .map(|r| ReturnRecord::new(r.value(), r.score()))
            .collect();
    }

    let mut cursors = vec![0usize; lists.len()];
    let mut results = Vec::new();

    'outer: for record in first {
        let value = record.value();
        let mut score = record.score();

        for (list, cursor) in lists[1..].iter().zip(cursors.iter_mut()) {
            while *cursor < list.len() && list[*cursor].value() < value {
                *cursor += 1;
            }
            if *cursor >= list.len() {
                break 'outer;
            }
            if list[*cursor].value() != value {
                continue 'outer;
            }
            score += list[*cursor].score();
        }

        results.push(ReturnRecord::new(value, score));
    }

    results
}

/// Top-`limit` results by combined score, descending. Ties broken by value
/// so result order is deterministic.
pub fn top_results(mut results: Vec<ReturnRecord>, limit: usize) -> Vec<ReturnRecord> {
    results.sort_unstable_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.value.cmp(&b.value))
    });
    if limit > 0 && results.len() > limit {
        results.truncate(limit);
    }
    results
}
