//! Bloom filter for URL membership tests during link ingestion.
//!
//! Link postings whose target URL was never indexed are dropped before they
//! reach the builders. False positives only let a few extra links through;
//! false negatives never happen.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::hash;

// A corrupt header should fail fast rather than allocate terabytes.
const MAX_FILTER_BITS: u64 = 1 << 40;
const MAX_NUM_HASHES: u64 = 64;

pub struct BloomFilter {
    num_bits: u64,
    num_hashes: u32,
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Filter sized for `items` expected insertions at the given false
    /// positive probability: m = -n·ln(p)/ln(2)², k = (m/n)·ln(2).
    pub fn with_capacity(items: usize, fpp: f64) -> Self {
        assert!(items > 0);
        assert!(fpp > 0.0 && fpp < 1.0);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = (-(items as f64) * fpp.ln() / (ln2 * ln2)).ceil() as u64;
        let num_hashes = ((num_bits as f64 / items as f64) * ln2).round().max(1.0) as u32;
        Self::new(num_bits, num_hashes)
    }

    pub fn new(num_bits: u64, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(8);
        BloomFilter {
            num_bits,
            num_hashes,
            bits: vec![0u8; num_bits.div_ceil(8) as usize],
        }
    }

    fn bit_positions(&self, input: &str) -> impl Iterator<Item = u64> + '_ {
        let h1 = hash::str_hash(input);
        // Forcing h2 odd keeps the probe sequence full-period.
        let h2 = hash::u64_hash(h1) | 1;
        let num_bits = self.num_bits;
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }

    pub fn insert(&mut self, input: &str) {
        let positions: Vec<u64> = self.bit_positions(input).collect();
        for pos in positions {
            self.bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
    }

    pub fn exists(&self, input: &str) -> bool {
        self.bit_positions(input)
            .all(|pos| self.bits[(pos / 8) as usize] & (1 << (pos % 8)) != 0)
    }

    /// Format: `u64 num_bits`, `u64 num_hashes`, bit blob (LE).
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| IndexError::io(path, "create", e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&self.num_bits.to_le_bytes())
            .and_then(|_| writer.write_all(&(self.num_hashes as u64).to_le_bytes()))
            .and_then(|_| writer.write_all(&self.bits))
            .map_err(|e| IndexError::io(path, "write", e))
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| IndexError::io(path, "open", e))?;
        let mut reader = BufReader::new(file);

        let mut buf = [0u8; 8];
        reader
            .read_exact(&mut buf)
            .map_err(|e| IndexError::io(path, "read", e))?;
        let num_bits = u64::from_le_bytes(buf);
        reader
            .read_exact(&mut buf)
            .map_err(|e| IndexError::io(path, "read", e))?;
        let num_hashes = u64::from_le_bytes(buf);

        if num_bits == 0 || num_bits > MAX_FILTER_BITS {
            return Err(IndexError::overflow("bloom filter bits", MAX_FILTER_BITS, num_bits));
        }
        if num_hashes == 0 || num_hashes > MAX_NUM_HASHES {
            return Err(IndexError::overflow("bloom filter hashes", MAX_NUM_HASHES, num_hashes));
        }

        let mut bits = vec![0u8; num_bits.div_ceil(8) as usize];
        reader
            .read_exact(&mut bits)
            .map_err(|e| IndexError::format(path, format!("truncated filter: {}", e)))?;

        Ok(BloomFilter {
            num_bits,
            num_hashes: num_hashes as u32,
            bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_inserted_items_exist() {
        let mut filter = BloomFilter::with_capacity(1000, 0.01);
        for i in 0..1000 {
            filter.insert(&format!("example.com/page/{}", i));
        }
        for i in 0..1000 {
            assert!(filter.exists(&format!("example.com/page/{}", i)));
        }
    }

    #[test]
    fn test_false_positive_rate_reasonable() {
        let mut filter = BloomFilter::with_capacity(10_000, 0.01);
        for i in 0..10_000 {
            filter.insert(&format!("indexed/{}", i));
        }
        let false_positives = (0..10_000)
            .filter(|i| filter.exists(&format!("absent/{}", i)))
            .count();
        // Target is 1%; allow generous slack.
        assert!(false_positives < 300, "fp = {}", false_positives);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("url_filter.bloom");

        let mut filter = BloomFilter::with_capacity(100, 0.01);
        filter.insert("example.com/kept");
        filter.write_file(&path).unwrap();

        let restored = BloomFilter::read_file(&path).unwrap();
        assert!(restored.exists("example.com/kept"));
        assert!(!restored.exists("example.com/never-seen"));
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.bloom");
        std::fs::write(&path, u64::MAX.to_le_bytes()).unwrap();
        assert!(BloomFilter::read_file(&path).is_err());
    }
}
