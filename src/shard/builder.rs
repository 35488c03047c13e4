//! Shard builder: the append / merge / compact engine for one shard.
//!
//! Records accumulate in memory (`add`), spill to a pair of append-only cache
//! files (`append`), and fold into the page-structured data file (`merge`).
//!
//! # Page format (all integers little-endian u64)
//!
//! ```text
//! num_keys
//! num_keys × key
//! num_keys × position   (offset from the page's payload start)
//! num_keys × length     (payload bytes for that key)
//! num_keys × total      (result count before truncation)
//! payload               (concatenated posting arrays, page key order)
//! ```
//!
//! With a nonzero internal hash-table size H, keys are grouped into one page
//! per occupied bucket (`key mod H`) and a directory file of H u64 offsets is
//! written alongside; with H = 0 the whole shard is a single page.
//!
//! # Invariants
//! - A failed merge leaves the previous data file and both caches unchanged
//! - After a merge, each key's postings are unique by `value`, with equal
//!   values folded, and capped at `max_sections × max_per_section`
//! - `totals[key]` is the post-dedup, pre-truncation count

use log::info;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::config;
use crate::constants::{
    CACHE_READ_CHUNK, KEY_DIR_EMPTY, MAX_NUM_KEYS, MAX_PAYLOAD_BYTES, READER_BUFFER_LEN,
};
use crate::error::{IndexError, Result};
use crate::hyperloglog::HyperLogLog;
use crate::record::IndexRecord;

use super::files::ShardFiles;

/// Size limits for one builder. Deployment values come from [`config`];
/// tests construct tighter ones directly.
#[derive(Debug, Clone, Copy)]
pub struct BuilderLimits {
    /// Internal hash-table size (0 = single-page data file, no directory).
    pub hash_table_size: usize,
    /// Maximum postings kept per section.
    pub max_per_section: usize,
    /// Maximum number of sections kept per key.
    pub max_sections: usize,
    /// In-memory record bytes at which `full()` reports true.
    pub flush_bytes: usize,
}

impl BuilderLimits {
    pub fn from_config() -> Self {
        let cfg = config::get();
        BuilderLimits {
            hash_table_size: cfg.hash_table_size,
            max_per_section: cfg.max_results_per_section,
            max_sections: cfg.max_sections,
            flush_bytes: cfg.builder_flush_bytes,
        }
    }

    pub fn with_hash_table_size(mut self, hash_table_size: usize) -> Self {
        self.hash_table_size = hash_table_size;
        self
    }
}

pub struct IndexBuilder<R: IndexRecord> {
    files: ShardFiles,
    limits: BuilderLimits,

    // In-memory append log, parallel vectors.
    keys: Vec<u64>,
    records: Vec<R>,

    // Merge-time state, keyed by term hash. BTreeMap keeps key iteration
    // sorted so repeated merges of identical content write identical bytes.
    cache: BTreeMap<u64, Vec<R>>,
    total_results: BTreeMap<u64, u64>,
}

impl<R: IndexRecord> IndexBuilder<R> {
    pub fn new(db_name: &str, id: u64) -> Self {
        Self::with_limits(db_name, id, BuilderLimits::from_config())
    }

    pub fn with_limits(db_name: &str, id: u64, limits: BuilderLimits) -> Self {
        IndexBuilder {
            files: ShardFiles::new(db_name, id),
            limits,
            keys: Vec::new(),
            records: Vec::new(),
            cache: BTreeMap::new(),
            total_results: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.files.id()
    }

    /// Append one record in memory. Amortized constant.
    pub fn add(&mut self, key: u64, record: R) {
        self.keys.push(key);
        self.records.push(record);
    }

    /// Whether the in-memory log has reached the flush threshold.
    pub fn full(&self) -> bool {
        self.records.len() * (R::SIZE + 8) >= self.limits.flush_bytes
    }

    /// Flush the in-memory log to the shard's cache files. Pure append, no
    /// sorting. Concurrent appenders to the same shard must hold that
    /// shard's write lock.
    pub fn append(&mut self) -> Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }
        self.files.create_directories()?;

        let cache_path = self.files.cache_path();
        let record_writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cache_path)
            .map_err(|e| IndexError::io(&cache_path, "open", e))?;
        let mut record_writer = BufWriter::new(record_writer);

        let key_cache_path = self.files.key_cache_path();
        let key_writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&key_cache_path)
            .map_err(|e| IndexError::io(&key_cache_path, "open", e))?;
        let mut key_writer = BufWriter::new(key_writer);

        let mut buf = vec![0u8; R::SIZE];
        for record in &self.records {
            record.write_to(&mut buf);
            record_writer
                .write_all(&buf)
                .map_err(|e| IndexError::io(&cache_path, "write", e))?;
        }
        for key in &self.keys {
            key_writer
                .write_all(&key.to_le_bytes())
                .map_err(|e| IndexError::io(&key_cache_path, "write", e))?;
        }
        record_writer
            .flush()
            .map_err(|e| IndexError::io(&cache_path, "flush", e))?;
        key_writer
            .flush()
            .map_err(|e| IndexError::io(&key_cache_path, "flush", e))?;

        self.records = Vec::new();
        self.keys = Vec::new();
        Ok(())
    }

    /// Fold the append-log cache into the data file. Single-writer critical
    /// section per shard.
    ///
    /// Any error before the final step propagates without touching the cache
    /// files, so a failed merge can simply be retried.
    pub fn merge(&mut self) -> Result<()> {
        self.files.create_directories()?;

        self.cache.clear();
        self.total_results.clear();

        self.read_data_to_cache()?;
        self.read_append_cache()?;

        let mut hll = self.read_meta()?;
        self.count_unique(&mut hll);

        self.sort_cache();
        self.save_file()?;
        self.save_meta(&hll)?;

        self.files.truncate_cache_files()?;
        self.cache.clear();
        Ok(())
    }

    /// Delete all data and cache files for this shard.
    pub fn truncate(&mut self) -> Result<()> {
        self.keys.clear();
        self.records.clear();
        self.cache.clear();
        self.total_results.clear();
        self.files.truncate_all()
    }

    /// The post-dedup, pre-truncation result count for a key, as of the last
    /// merge.
    pub fn total_results(&self, key: u64) -> u64 {
        self.total_results.get(&key).copied().unwrap_or(0)
    }

    /// Apply a transform to every stored posting, re-sort, and rewrite the
    /// data file. Used by the counted level to turn counts into scores.
    pub fn rescore(&mut self, transform: &dyn Fn(&mut R)) -> Result<()> {
        self.cache.clear();
        self.total_results.clear();
        self.read_data_to_cache()?;

        for records in self.cache.values_mut() {
            for record in records.iter_mut() {
                transform(record);
            }
        }

        self.sort_cache();
        self.save_file()?;
        self.cache.clear();
        Ok(())
    }

    /// Re-permute every stored posting list with a caller-supplied order and
    /// rewrite the data file. Totals are preserved as stored.
    pub fn reorder(&mut self, permute: &dyn Fn(&mut Vec<R>)) -> Result<()> {
        self.cache.clear();
        self.total_results.clear();
        self.read_data_to_cache()?;

        for records in self.cache.values_mut() {
            permute(records);
        }

        self.save_file()?;
        self.cache.clear();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cache reading
    // ------------------------------------------------------------------

    /// Read the append-log cache files into the merge map.
    fn read_append_cache(&mut self) -> Result<()> {
        let cache_path = self.files.cache_path();
        let key_cache_path = self.files.key_cache_path();
        if !cache_path.exists() || !key_cache_path.exists() {
            return Ok(());
        }

        let reader = File::open(&cache_path).map_err(|e| IndexError::io(&cache_path, "open", e))?;
        let mut reader = BufReader::new(reader);
        let key_reader =
            File::open(&key_cache_path).map_err(|e| IndexError::io(&key_cache_path, "open", e))?;
        let mut key_reader = BufReader::new(key_reader);

        let mut record_buf = vec![0u8; R::SIZE * CACHE_READ_CHUNK];
        let mut key_buf = vec![0u8; 8 * CACHE_READ_CHUNK];

        loop {
            let read_bytes = read_up_to(&mut reader, &mut record_buf)
                .map_err(|e| IndexError::io(&cache_path, "read", e))?;
            if read_bytes == 0 {
                break;
            }
            let num_records = read_bytes / R::SIZE;

            let key_bytes = read_up_to(&mut key_reader, &mut key_buf[..num_records * 8])
                .map_err(|e| IndexError::io(&key_cache_path, "read", e))?;
            if key_bytes != num_records * 8 {
                return Err(IndexError::format(
                    &key_cache_path,
                    "cache and cache.keys lengths disagree",
                ));
            }

            for i in 0..num_records {
                let record = R::read_from(&record_buf[i * R::SIZE..(i + 1) * R::SIZE]);
                let key = u64::from_le_bytes(key_buf[i * 8..(i + 1) * 8].try_into().unwrap());
                self.cache.entry(key).or_default().push(record);
            }
        }
        Ok(())
    }

    /// Read the current data file into the merge map.
    fn read_data_to_cache(&mut self) -> Result<()> {
        let path = self.files.data_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(IndexError::io(&path, "open", e)),
        };
        let mut reader = BufReader::new(file);

        while self.read_page(&mut reader, &path)? {}
        Ok(())
    }

    /// Read one page into the merge map. Returns false on clean EOF.
    fn read_page(&mut self, reader: &mut BufReader<File>, path: &Path) -> Result<bool> {
        let mut header = [0u8; 8];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(IndexError::io(path, "read", e)),
        }
        let num_keys = u64::from_le_bytes(header);
        if num_keys > MAX_NUM_KEYS {
            return Err(IndexError::overflow("page header", MAX_NUM_KEYS, num_keys));
        }

        let keys = read_u64_vec(reader, num_keys as usize, path)?;
        let _positions = read_u64_vec(reader, num_keys as usize, path)?;
        let lengths = read_u64_vec(reader, num_keys as usize, path)?;
        let totals = read_u64_vec(reader, num_keys as usize, path)?;

        let payload_size: u64 = lengths.iter().sum();
        if payload_size > MAX_PAYLOAD_BYTES {
            return Err(IndexError::overflow(
                "page payload",
                MAX_PAYLOAD_BYTES,
                payload_size,
            ));
        }

        for (key, total) in keys.iter().zip(totals.iter()) {
            self.total_results.insert(*key, *total);
        }

        let mut window = vec![0u8; READER_BUFFER_LEN];
        for (key, len) in keys.iter().zip(lengths.iter()) {
            let records = self.cache.entry(*key).or_default();
            records.reserve((*len as usize) / R::SIZE);

            let mut remaining = *len as usize;
            let mut partial: Vec<u8> = Vec::new();
            while remaining > 0 {
                let to_read = remaining.min(window.len());
                reader.read_exact(&mut window[..to_read]).map_err(|e| {
                    IndexError::format(path, format!("payload stopped before end: {}", e))
                })?;
                remaining -= to_read;

                partial.extend_from_slice(&window[..to_read]);
                let complete = (partial.len() / R::SIZE) * R::SIZE;
                for chunk in partial[..complete].chunks_exact(R::SIZE) {
                    records.push(R::read_from(chunk));
                }
                partial.drain(..complete);
            }
            if !partial.is_empty() {
                return Err(IndexError::format(
                    path,
                    format!("key {} payload is not a whole number of records", key),
                ));
            }
        }

        Ok(true)
    }

    // ------------------------------------------------------------------
    // Sorting and capping
    // ------------------------------------------------------------------

    fn sort_cache(&mut self) {
        let limits = self.limits;
        for (key, records) in self.cache.iter_mut() {
            let total = sort_record_list(records, limits);
            // A list that was truncated by an earlier merge re-enters with
            // only its survivors; the stored total stays authoritative.
            let entry = self.total_results.entry(*key).or_insert(0);
            *entry = (*entry).max(total);
        }
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Write a new data file from the merge map, truncating the old, and the
    /// key directory when the internal hash table is in use.
    fn save_file(&mut self) -> Result<()> {
        let path = self.files.data_path();
        let file = File::create(&path).map_err(|e| IndexError::io(&path, "create", e))?;
        let mut writer = BufWriter::new(file);

        // Group keys into pages by directory bucket. With H = 0 the whole
        // shard is bucket 0.
        let hash_table_size = self.limits.hash_table_size as u64;
        let mut pages: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for key in self.cache.keys() {
            let bucket = if hash_table_size > 0 {
                key % hash_table_size
            } else {
                0
            };
            pages.entry(bucket).or_default().push(*key);
        }

        let mut directory = vec![KEY_DIR_EMPTY; self.limits.hash_table_size];
        let mut offset = 0u64;
        for (bucket, keys) in &pages {
            let page_pos = offset;
            offset += self.write_page(&mut writer, keys, &path)?;
            if hash_table_size > 0 {
                debug_assert!(*bucket < hash_table_size);
                directory[*bucket as usize] = page_pos;
            }
        }
        writer.flush().map_err(|e| IndexError::io(&path, "flush", e))?;

        if hash_table_size > 0 {
            let key_path = self.files.key_path();
            let key_file =
                File::create(&key_path).map_err(|e| IndexError::io(&key_path, "create", e))?;
            let mut key_writer = BufWriter::new(key_file);
            for entry in &directory {
                key_writer
                    .write_all(&entry.to_le_bytes())
                    .map_err(|e| IndexError::io(&key_path, "write", e))?;
            }
            key_writer
                .flush()
                .map_err(|e| IndexError::io(&key_path, "flush", e))?;
        }

        Ok(())
    }

    /// Write one page. Returns the number of bytes written.
    fn write_page(
        &self,
        writer: &mut BufWriter<File>,
        keys: &[u64],
        path: &Path,
    ) -> Result<u64> {
        let io_err = |e| IndexError::io(path, "write", e);

        writer
            .write_all(&(keys.len() as u64).to_le_bytes())
            .map_err(io_err)?;
        for key in keys {
            writer.write_all(&key.to_le_bytes()).map_err(io_err)?;
        }

        let mut positions = Vec::with_capacity(keys.len());
        let mut lengths = Vec::with_capacity(keys.len());
        let mut payload_len = 0u64;
        for key in keys {
            let len = (self.cache[key].len() * R::SIZE) as u64;
            positions.push(payload_len);
            lengths.push(len);
            payload_len += len;
        }

        for pos in &positions {
            writer.write_all(&pos.to_le_bytes()).map_err(io_err)?;
        }
        for len in &lengths {
            writer.write_all(&len.to_le_bytes()).map_err(io_err)?;
        }
        for key in keys {
            writer
                .write_all(&self.total_results.get(key).copied().unwrap_or(0).to_le_bytes())
                .map_err(io_err)?;
        }

        let mut buf = vec![0u8; R::SIZE];
        for key in keys {
            for record in &self.cache[key] {
                record.write_to(&mut buf);
                writer.write_all(&buf).map_err(io_err)?;
            }
        }

        Ok(8 + (keys.len() as u64) * 8 * 4 + payload_len)
    }

    // ------------------------------------------------------------------
    // Meta / HyperLogLog
    // ------------------------------------------------------------------

    fn count_unique(&self, hll: &mut HyperLogLog) {
        for records in self.cache.values() {
            for record in records {
                hll.insert(record.value());
            }
        }
    }

    fn read_meta(&self) -> Result<HyperLogLog> {
        let path = self.files.meta_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HyperLogLog::new()),
            Err(e) => return Err(IndexError::io(&path, "open", e)),
        };
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(8))
            .map_err(|e| IndexError::io(&path, "seek", e))?;

        let mut blob = vec![0u8; HyperLogLog::data_size()];
        match reader.read_exact(&mut blob) {
            Ok(()) => Ok(HyperLogLog::from_bytes(&blob)
                .ok_or_else(|| IndexError::format(&path, "register blob has wrong size"))?),
            // An empty or short meta file counts as no sketch yet.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(HyperLogLog::new()),
            Err(e) => Err(IndexError::io(&path, "read", e)),
        }
    }

    fn save_meta(&self, hll: &HyperLogLog) -> Result<()> {
        let path = self.files.meta_path();
        let file = File::create(&path).map_err(|e| IndexError::io(&path, "create", e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&hll.size().to_le_bytes())
            .and_then(|_| writer.write_all(hll.data()))
            .and_then(|_| writer.flush())
            .map_err(|e| IndexError::io(&path, "write", e))
    }

    /// The unique-value estimate persisted at the last merge.
    pub fn unique_count(&self) -> Result<u64> {
        let path = self.files.meta_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(IndexError::io(&path, "open", e)),
        };
        let mut buf = [0u8; 8];
        let mut reader = BufReader::new(file);
        match reader.read_exact(&mut buf) {
            Ok(()) => Ok(u64::from_le_bytes(buf)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(IndexError::io(&path, "read", e)),
        }
    }
}

/// Sort, fold, dedup, and cap one key's posting list in place. Returns the
/// post-dedup, pre-truncation count.
///
/// Order after return: if the list fits in one section it is sorted by
/// `value` ascending; otherwise the top-scoring `max_sections ×
/// max_per_section` postings are kept, split into consecutive sections of
/// `max_per_section`, each re-sorted by `value` ascending. The first section
/// is therefore the highest-scoring bucket, ready for merge-joins.
pub fn sort_record_list<R: IndexRecord>(records: &mut Vec<R>, limits: BuilderLimits) -> u64 {
    records.sort_unstable_by_key(|r| r.value());

    // Fold equal-value runs into the first element of each run.
    let mut write = 0usize;
    for read in 1..records.len() {
        if records[read].value() == records[write].value() {
            let other = records[read];
            records[write].fold(&other);
        } else {
            write += 1;
            records[write] = records[read];
        }
    }
    if !records.is_empty() {
        records.truncate(write + 1);
    }

    let total = records.len() as u64;

    if records.len() > limits.max_per_section {
        // Ties broken by value so repeated merges stay byte-identical.
        records.sort_unstable_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.value().cmp(&b.value()))
        });

        let max_results = limits.max_per_section * limits.max_sections;
        if records.len() > max_results {
            info!(
                "capping posting list at {} of {} records",
                max_results, total
            );
            records.truncate(max_results);
        }

        order_sections_by_value(records, limits.max_per_section);
    }

    total
}

/// Re-sort each consecutive section by value ascending.
fn order_sections_by_value<R: IndexRecord>(records: &mut [R], max_per_section: usize) {
    for section in records.chunks_mut(max_per_section) {
        section.sort_unstable_by_key(|r| r.value());
    }
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_u64_vec(reader: &mut BufReader<File>, count: usize, path: &Path) -> Result<Vec<u64>> {
    let mut bytes = vec![0u8; count * 8];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| IndexError::format(path, format!("truncated page header: {}", e)))?;
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DomainRecord;

    fn limits(max_per_section: usize, max_sections: usize) -> BuilderLimits {
        BuilderLimits {
            hash_table_size: 0,
            max_per_section,
            max_sections,
            flush_bytes: 1024,
        }
    }

    #[test]
    fn test_sort_folds_equal_values() {
        let mut records = vec![
            DomainRecord::new(100, 1.0),
            DomainRecord::new(200, 0.1),
            DomainRecord::new(100, 2.5),
        ];
        let total = sort_record_list(&mut records, limits(1000, 8));
        assert_eq!(total, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 100);
        assert!((records[0].score - 3.5).abs() < 1e-6);
        assert_eq!(records[1].value, 200);
    }

    #[test]
    fn test_capping_keeps_top_scores_sectioned_by_value() {
        // Scores [9,1,8,2,7] at values [10,20,30,40,50]; cap 2×2.
        let mut records = vec![
            DomainRecord::new(10, 9.0),
            DomainRecord::new(20, 1.0),
            DomainRecord::new(30, 8.0),
            DomainRecord::new(40, 2.0),
            DomainRecord::new(50, 7.0),
        ];
        let total = sort_record_list(&mut records, limits(2, 2));
        assert_eq!(total, 5);
        assert_eq!(records.len(), 4);

        // First section: two best scores (9, 8) ordered by value.
        assert_eq!(records[0].value, 10);
        assert_eq!(records[1].value, 30);
        // Second section: next best (7, 2) ordered by value.
        assert_eq!(records[2].value, 40);
        assert_eq!(records[3].value, 50);

        let kept: Vec<f32> = records.iter().map(|r| r.score).collect();
        assert_eq!(kept, vec![9.0, 8.0, 2.0, 7.0]);
    }

    #[test]
    fn test_small_list_stays_value_sorted() {
        let mut records = vec![
            DomainRecord::new(50, 0.5),
            DomainRecord::new(10, 0.1),
            DomainRecord::new(30, 0.9),
        ];
        sort_record_list(&mut records, limits(100, 8));
        let values: Vec<u64> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![10, 30, 50]);
    }

    #[test]
    fn test_partial_last_section_handled() {
        // 5 records, cap 2 per section × 3 sections: all kept, last section
        // has a single element.
        let mut records: Vec<DomainRecord> = (0..5)
            .map(|i| DomainRecord::new(100 - i, i as f32))
            .collect();
        let total = sort_record_list(&mut records, limits(2, 3));
        assert_eq!(total, 5);
        assert_eq!(records.len(), 5);
        for section in records.chunks(2) {
            let values: Vec<u64> = section.iter().map(|r| r.value).collect();
            let mut sorted = values.clone();
            sorted.sort_unstable();
            assert_eq!(values, sorted);
        }
    }
}
