//! URL metadata blobs and the key/value store contract.
//!
//! The store itself (LevelDB in production) is an external collaborator;
//! only its contract lives here. What this crate owns is the wire format:
//! a fixed header of three u64 counters followed by two length-prefixed
//! strings, keyed by the URL's 64-bit hash. Decoding tolerates truncated
//! input by falling back to defaults, because old deployments wrote
//! header-only rows.

use std::collections::HashMap;

use crate::url::Url;

/// Per-URL metadata stored next to the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UrlData {
    pub link_count: u64,
    pub http_code: u64,
    pub last_visited: u64,
    pub url: String,
    pub redirect: String,
}

const HEADER_SIZE: usize = 24;

/// Serialize: `link_count, http_code, last_visited` then `url` and
/// `redirect` as u64-length-prefixed strings, all little-endian.
pub fn data_to_bytes(data: &UrlData) -> Vec<u8> {
    let mut bytes =
        Vec::with_capacity(HEADER_SIZE + 16 + data.url.len() + data.redirect.len());
    bytes.extend_from_slice(&data.link_count.to_le_bytes());
    bytes.extend_from_slice(&data.http_code.to_le_bytes());
    bytes.extend_from_slice(&data.last_visited.to_le_bytes());
    for field in [&data.url, &data.redirect] {
        bytes.extend_from_slice(&(field.len() as u64).to_le_bytes());
        bytes.extend_from_slice(field.as_bytes());
    }
    bytes
}

/// Parse a stored blob. Anything shorter than a full header decodes to the
/// default row; a row whose strings are cut off keeps the counters and
/// drops the strings.
pub fn bytes_to_data(bytes: &[u8]) -> UrlData {
    if bytes.len() < HEADER_SIZE + 16 {
        return UrlData::default();
    }

    let read_u64 =
        |offset: usize| u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());

    let mut data = UrlData {
        link_count: read_u64(0),
        http_code: read_u64(8),
        last_visited: read_u64(16),
        ..Default::default()
    };

    let url_len = read_u64(HEADER_SIZE) as usize;
    let url_start = HEADER_SIZE + 8;
    let redirect_len_at = url_start + url_len;
    if redirect_len_at + 8 > bytes.len() {
        return data;
    }
    let redirect_len = read_u64(redirect_len_at) as usize;
    let redirect_start = redirect_len_at + 8;
    if redirect_start + redirect_len > bytes.len() {
        return data;
    }

    data.url = String::from_utf8_lossy(&bytes[url_start..url_start + url_len]).into_owned();
    data.redirect =
        String::from_utf8_lossy(&bytes[redirect_start..redirect_start + redirect_len])
            .into_owned();
    data
}

/// Contract of the external key/value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: u64) -> Option<Vec<u8>>;
    fn set(&mut self, key: u64, value: Vec<u8>);
}

/// Typed facade over a store: rows are keyed by `url.key()`.
pub struct UrlStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> UrlStore<S> {
    pub fn new(store: S) -> Self {
        UrlStore { store }
    }

    pub fn set(&mut self, data: &UrlData) {
        let key = Url::parse(&data.url).key();
        self.store.set(key, data_to_bytes(data));
    }

    pub fn get(&self, url: &Url) -> UrlData {
        match self.store.get(url.key()) {
            Some(bytes) => bytes_to_data(&bytes),
            None => UrlData::default(),
        }
    }
}

/// In-memory store for tests and tooling.
#[derive(Default)]
pub struct MemoryKvStore {
    rows: HashMap<u64, Vec<u8>>,
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: u64) -> Option<Vec<u8>> {
        self.rows.get(&key).cloned()
    }

    fn set(&mut self, key: u64, value: Vec<u8>) {
        self.rows.insert(key, value);
    }
}
