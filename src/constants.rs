//! Constants used throughout the crawldex library for safety limits and format bounds.

// Maximum sizes for safety checks when loading shard files
pub(crate) const MAX_NUM_KEYS: u64 = 100_000_000; // keys per page
pub(crate) const MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024 * 1024; // 64GB page payload

// Buffer sizes for streaming binary reads
pub(crate) const READER_BUFFER_LEN: usize = 1024 * 1024; // 1MB window for posting payloads
pub(crate) const CACHE_READ_CHUNK: usize = 100_000; // records per cache-file read batch

// Sentinel for empty buckets in the key directory file
pub(crate) const KEY_DIR_EMPTY: u64 = u64::MAX;

// The original deployment spread shards over eight mount points
pub(crate) const DEFAULT_NUM_DATA_ROOTS: usize = 8;
