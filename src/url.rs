//! Minimal URL handling for the index core.
//!
//! The crawler hands us already-normalized URLs in column 0 of the TSV
//! archives. This type extracts the host and produces the stable 64-bit
//! hashes the index is keyed on. Full normalization lives upstream.

use crate::hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    full: String,
    host: String,
    path: String,
}

impl Url {
    /// Parse a URL string. Never fails: an unparsable string is treated as a
    /// bare host with an empty path, which still hashes deterministically.
    pub fn parse(s: &str) -> Self {
        let without_scheme = match s.find("://") {
            Some(pos) => &s[pos + 3..],
            None => s,
        };

        let (host_port, path) = match without_scheme.find('/') {
            Some(pos) => (&without_scheme[..pos], &without_scheme[pos..]),
            None => (without_scheme, ""),
        };

        // Strip port and userinfo from the authority.
        let host_port = match host_port.rfind('@') {
            Some(pos) => &host_port[pos + 1..],
            None => host_port,
        };
        let host = match host_port.find(':') {
            Some(pos) => &host_port[..pos],
            None => host_port,
        };

        Url {
            full: s.to_string(),
            host: host.to_lowercase(),
            path: path.to_string(),
        }
    }

    /// Build a URL from a host and path, the way the console's `bloom`
    /// command receives them.
    pub fn from_host_path(host: &str, path: &str) -> Self {
        let full = format!("https://{}{}", host, path);
        Url {
            full,
            host: host.to_lowercase(),
            path: path.to_string(),
        }
    }

    pub fn str(&self) -> &str {
        &self.full
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hash of the whole URL. This is the posting `value` at the URL level.
    pub fn hash(&self) -> u64 {
        hash::str_hash(&self.full)
    }

    /// Hash of the host. This is the posting `value` at the domain level and
    /// the shard routing key for per-host URL builders.
    pub fn host_hash(&self) -> u64 {
        hash::str_hash(&self.host)
    }

    /// Key for the URL metadata store.
    pub fn key(&self) -> u64 {
        self.hash()
    }

    /// Input for the URL membership filter: host + path without scheme, so
    /// that http/https variants of the same document collide.
    pub fn filter_input(&self) -> String {
        format!("{}{}", self.host, self.path)
    }
}
