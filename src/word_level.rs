//! Word level: counted postings per host, scored after ingestion.
//!
//! During ingestion each word occurrence adds `count = 1` for its host;
//! merges fold the counts. A post-ingestion pass (`calculate_scores`) turns
//! counts into term-frequency scores by dividing with the host's document
//! size, and `sort_by_scores` re-permutes each posting list so the console
//! reads the strongest hosts first.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config;
use crate::error::{IndexError, Result};
use crate::hash;
use crate::level::{intersect_postings, top_results, Level, LevelType, SharedBuilders};
use crate::record::{CountedRecord, ReturnRecord};
use crate::shard::BuilderLimits;
use crate::sharded::ShardedIndex;
use crate::text;
use crate::tsv::{self, TsvReader};
use crate::url::Url;

pub const WORD_DB: &str = "word_index";

pub struct WordLevel {
    db_name: String,
    builders: SharedBuilders<CountedRecord>,
    index: Mutex<ShardedIndex<CountedRecord>>,
    /// host_hash -> total words indexed for that host. The divisor for
    /// term-frequency scores.
    document_sizes: Mutex<HashMap<u64, u64>>,
}

impl Default for WordLevel {
    fn default() -> Self {
        Self::new()
    }
}

impl WordLevel {
    pub fn new() -> Self {
        Self::with_db(WORD_DB)
    }

    pub fn with_db(db_name: &str) -> Self {
        let num_shards = config::get().word_num_shards;
        WordLevel {
            db_name: db_name.to_string(),
            builders: SharedBuilders::new(db_name, num_shards, BuilderLimits::from_config()),
            index: Mutex::new(ShardedIndex::new(db_name, num_shards)),
            document_sizes: Mutex::new(HashMap::new()),
        }
    }

    fn document_sizes_path(&self) -> PathBuf {
        let cfg = config::get();
        cfg.data_roots[0]
            .join("full_text")
            .join(&self.db_name)
            .join("document_sizes.bin")
    }

    /// Total indexed words for a host, from the persisted table.
    pub fn document_size(&self, host_hash: u64) -> u64 {
        if let Some(size) = self
            .document_sizes
            .lock()
            .expect("document sizes lock poisoned")
            .get(&host_hash)
        {
            return *size;
        }
        self.load_document_sizes()
            .ok()
            .and_then(|sizes| sizes.get(&host_hash).copied())
            .unwrap_or(0)
    }

    /// Raw counted postings for a term, as stored.
    pub fn find_counted(&self, term: &str) -> Result<Vec<CountedRecord>> {
        self.index
            .lock()
            .expect("word index lock poisoned")
            .find(hash::str_hash(term))
    }

    /// Divide every count by its host's document size. Run after all merges
    /// for a batch have finished.
    pub fn calculate_scores(&self) -> Result<()> {
        let sizes = self.load_document_sizes()?;
        self.builders.for_each(&mut |builder| {
            builder.rescore(&|record: &mut CountedRecord| {
                let size = sizes.get(&record.value).copied().unwrap_or(0);
                record.score = if size > 0 {
                    record.count as f32 / size as f32
                } else {
                    0.0
                };
            })
        })
    }

    /// Re-permute every posting list by score descending. After this pass
    /// the stored order is presentation order, not merge order.
    pub fn sort_by_scores(&self) -> Result<()> {
        self.builders.for_each(&mut |builder| {
            builder.reorder(&|records: &mut Vec<CountedRecord>| {
                records.sort_unstable_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.value.cmp(&b.value))
                });
            })
        })
    }

    fn load_document_sizes(&self) -> Result<HashMap<u64, u64>> {
        let path = self.document_sizes_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(IndexError::io(&path, "open", e)),
        };
        let mut reader = BufReader::new(file);
        let mut sizes = HashMap::new();
        let mut buf = [0u8; 16];
        loop {
            match reader.read_exact(&mut buf) {
                Ok(()) => {
                    let host = u64::from_le_bytes(buf[0..8].try_into().unwrap());
                    let size = u64::from_le_bytes(buf[8..16].try_into().unwrap());
                    *sizes.entry(host).or_insert(0) += size;
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(IndexError::io(&path, "read", e)),
            }
        }
        Ok(sizes)
    }

    /// Fold the in-memory size table into the persisted one.
    fn save_document_sizes(&self) -> Result<()> {
        let mut pending = {
            let mut guard = self
                .document_sizes
                .lock()
                .expect("document sizes lock poisoned");
            std::mem::take(&mut *guard)
        };
        if pending.is_empty() {
            return Ok(());
        }

        let mut sizes = self.load_document_sizes()?;
        for (host, size) in pending.drain() {
            *sizes.entry(host).or_insert(0) += size;
        }

        let path = self.document_sizes_path();
        let file = File::create(&path).map_err(|e| IndexError::io(&path, "create", e))?;
        let mut writer = BufWriter::new(file);
        for (host, size) in &sizes {
            writer
                .write_all(&host.to_le_bytes())
                .and_then(|_| writer.write_all(&size.to_le_bytes()))
                .map_err(|e| IndexError::io(&path, "write", e))?;
        }
        writer.flush().map_err(|e| IndexError::io(&path, "flush", e))
    }
}

impl Level for WordLevel {
    fn level_type(&self) -> LevelType {
        LevelType::Word
    }

    fn add_index_file(&self, local_path: &std::path::Path) -> Result<usize> {
        let mut rows = 0usize;
        for line in TsvReader::open(local_path)?.lines() {
            let line = line?;
            let columns = tsv::columns(&line);
            if columns.is_empty() {
                continue;
            }
            let host_hash = Url::parse(columns[0]).host_hash();

            let mut words_in_row = 0u64;
            for value in columns.iter().skip(1).take(4) {
                for word in text::full_text_words(value) {
                    self.builders
                        .add(hash::str_hash(&word), CountedRecord::new(host_hash, 1));
                    words_in_row += 1;
                }
            }
            if words_in_row > 0 {
                *self
                    .document_sizes
                    .lock()
                    .expect("document sizes lock poisoned")
                    .entry(host_hash)
                    .or_insert(0) += words_in_row;
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
        self.builders.merge_all()?;
        self.save_document_sizes()
    }

    fn truncate(&self) -> Result<()> {
        self.builders.truncate_all()?;
        self.document_sizes
            .lock()
            .expect("document sizes lock poisoned")
            .clear();
        let path = self.document_sizes_path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IndexError::io(path, "remove", e)),
        }
    }

    fn optimize(&self) -> Result<()> {
        self.calculate_scores()?;
        self.sort_by_scores()
    }

    fn find(&self, query: &str) -> Result<Vec<ReturnRecord>> {
        let words = text::full_text_words(query);
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let mut lists = Vec::with_capacity(words.len());
        for word in &words {
            let mut postings = self.find_counted(word)?;
            if postings.is_empty() {
                return Ok(Vec::new());
            }
            // After `sort_by_scores` the stored order is presentation
            // order; the merge-join needs value order.
            postings.sort_unstable_by_key(|r| r.value);
            lists.push(postings);
        }

        Ok(top_results(
            intersect_postings(&lists),
            config::get().find_limit,
        ))
    }
}
