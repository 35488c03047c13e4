//! Sharded collections: route keys across N shard builders or readers.
//!
//! The shard for a key is `key mod N`. N is fixed for the life of a dataset;
//! changing it orphans every existing shard file.

use crate::error::Result;
use crate::record::IndexRecord;
use crate::shard::{BuilderLimits, IndexBuilder, ShardReader};

/// N shard builders for one database. Writers route records by key.
pub struct ShardedBuilder<R: IndexRecord> {
    db_name: String,
    builders: Vec<IndexBuilder<R>>,
}

impl<R: IndexRecord> ShardedBuilder<R> {
    pub fn new(db_name: &str, num_shards: usize) -> Self {
        Self::with_limits(db_name, num_shards, BuilderLimits::from_config())
    }

    pub fn with_limits(db_name: &str, num_shards: usize, limits: BuilderLimits) -> Self {
        assert!(num_shards > 0);
        ShardedBuilder {
            db_name: db_name.to_string(),
            builders: (0..num_shards as u64)
                .map(|id| IndexBuilder::with_limits(db_name, id, limits))
                .collect(),
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn num_shards(&self) -> usize {
        self.builders.len()
    }

    pub fn shard_of(&self, key: u64) -> u64 {
        key % self.builders.len() as u64
    }

    pub fn add(&mut self, key: u64, record: R) {
        let shard = self.shard_of(key);
        self.builders[shard as usize].add(key, record);
    }

    /// Append every shard's in-memory log to its cache files.
    pub fn append_all(&mut self) -> Result<()> {
        for builder in &mut self.builders {
            builder.append()?;
        }
        Ok(())
    }

    /// Merge every shard. Sequential; the manager parallelizes across
    /// builders, not within one.
    pub fn merge_all(&mut self) -> Result<()> {
        for builder in &mut self.builders {
            builder.merge()?;
        }
        Ok(())
    }

    pub fn truncate_all(&mut self) -> Result<()> {
        for builder in &mut self.builders {
            builder.truncate()?;
        }
        Ok(())
    }
}

/// N shard readers for one database. Lookups route by key; each reader
/// loads its header lazily on first use and keeps it.
pub struct ShardedIndex<R: IndexRecord> {
    db_name: String,
    readers: Vec<ShardReader<R>>,
}

impl<R: IndexRecord> ShardedIndex<R> {
    pub fn new(db_name: &str, num_shards: usize) -> Self {
        assert!(num_shards > 0);
        ShardedIndex {
            db_name: db_name.to_string(),
            readers: (0..num_shards as u64)
                .map(|id| ShardReader::new(db_name, id))
                .collect(),
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn num_shards(&self) -> usize {
        self.readers.len()
    }

    pub fn shard_of(&self, key: u64) -> u64 {
        key % self.readers.len() as u64
    }

    /// All postings for one key, in stored order.
    pub fn find(&mut self, key: u64) -> Result<Vec<R>> {
        let shard = self.shard_of(key);
        self.readers[shard as usize].find(key)
    }

    /// Postings for one key, truncated to `limit` (0 = no limit).
    pub fn find_with_limit(&mut self, key: u64, limit: usize) -> Result<Vec<R>> {
        let mut postings = self.find(key)?;
        if limit > 0 && postings.len() > limit {
            postings.truncate(limit);
        }
        Ok(postings)
    }

    /// Look up many keys, visiting each shard once. The result preserves
    /// per-shard order: all hits from shard 0 first, then shard 1, and so
    /// on, each in that shard's stored order.
    pub fn find_all(&mut self, keys: &[u64]) -> Result<Vec<(u64, Vec<R>)>> {
        let num_shards = self.readers.len() as u64;
        let mut by_shard: Vec<Vec<u64>> = vec![Vec::new(); num_shards as usize];
        for key in keys {
            by_shard[(key % num_shards) as usize].push(*key);
        }

        let mut results = Vec::with_capacity(keys.len());
        for (shard, shard_keys) in by_shard.into_iter().enumerate() {
            for key in shard_keys {
                let postings = self.readers[shard].find(key)?;
                results.push((key, postings));
            }
        }
        Ok(results)
    }

    /// Pre-truncation result count for a key.
    pub fn total_results(&mut self, key: u64) -> Result<u64> {
        let shard = self.shard_of(key);
        self.readers[shard as usize].total_results(key)
    }
}
