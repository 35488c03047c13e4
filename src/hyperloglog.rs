//! HyperLogLog cardinality estimator over 64-bit hash streams.
//!
//! Fixed geometry: 2^12 = 4096 one-byte registers, so every sketch
//! serializes to the same 4096-byte blob that the shard meta files store.
//!
//! # Invariants
//! - `merge` is commutative and associative (register-wise max)
//! - `count()` is monotone non-decreasing under `insert` and `merge`

use crate::hash;

/// Register index bits.
const P: u32 = 12;
/// Number of registers.
pub const NUM_REGISTERS: usize = 1 << P;

#[derive(Clone)]
pub struct HyperLogLog {
    registers: Box<[u8; NUM_REGISTERS]>,
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperLogLog {
    pub fn new() -> Self {
        HyperLogLog {
            registers: Box::new([0u8; NUM_REGISTERS]),
        }
    }

    /// Restore a sketch from a serialized register blob.
    /// Returns `None` if the blob has the wrong length.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != NUM_REGISTERS {
            return None;
        }
        let mut registers = Box::new([0u8; NUM_REGISTERS]);
        registers.copy_from_slice(bytes);
        Some(HyperLogLog { registers })
    }

    /// The raw register blob, as persisted in shard meta files.
    pub fn data(&self) -> &[u8] {
        &self.registers[..]
    }

    /// Number of bytes `data()` occupies.
    pub const fn data_size() -> usize {
        NUM_REGISTERS
    }

    /// Insert a value. The value is re-hashed internally so that dense
    /// identifiers (vertex ids, shard-local counters) still spread uniformly.
    pub fn insert(&mut self, value: u64) {
        let h = hash::u64_hash(value);
        let idx = (h >> (64 - P)) as usize;
        // Rank = position of the leftmost 1-bit in the remaining 52 bits.
        let remaining = h << P;
        let rank = if remaining == 0 {
            (64 - P + 1) as u8
        } else {
            (remaining.leading_zeros() + 1) as u8
        };
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    /// Register-wise max. Equivalent to having inserted both streams.
    pub fn merge(&mut self, other: &HyperLogLog) {
        for (r, o) in self.registers.iter_mut().zip(other.registers.iter()) {
            if *o > *r {
                *r = *o;
            }
        }
    }

    /// Estimated cardinality.
    pub fn count(&self) -> f64 {
        let m = NUM_REGISTERS as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);

        let mut sum = 0.0f64;
        let mut zeros = 0usize;
        for &r in self.registers.iter() {
            sum += 1.0 / (1u64 << r) as f64;
            if r == 0 {
                zeros += 1;
            }
        }

        let estimate = alpha * m * m / sum;

        // Linear counting for the small range.
        if estimate <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            estimate
        }
    }

    /// Rounded estimate, persisted as `unique_count` in meta files.
    pub fn size(&self) -> u64 {
        self.count().round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(range: std::ops::Range<u64>) -> HyperLogLog {
        let mut hll = HyperLogLog::new();
        for v in range {
            hll.insert(v);
        }
        hll
    }

    #[test]
    fn test_empty_counts_zero() {
        assert_eq!(HyperLogLog::new().size(), 0);
    }

    #[test]
    fn test_small_cardinality_is_exactish() {
        let hll = filled(0..100);
        let count = hll.count();
        assert!((90.0..110.0).contains(&count), "count = {}", count);
    }

    #[test]
    fn test_large_cardinality_within_tolerance() {
        let hll = filled(0..100_000);
        let count = hll.count();
        // Standard error for 4096 registers is ~1.6%; allow 5%.
        assert!(
            (95_000.0..105_000.0).contains(&count),
            "count = {}",
            count
        );
    }

    #[test]
    fn test_duplicates_do_not_inflate() {
        let mut hll = HyperLogLog::new();
        for _ in 0..10 {
            for v in 0..50u64 {
                hll.insert(v);
            }
        }
        let count = hll.count();
        assert!((45.0..55.0).contains(&count), "count = {}", count);
    }

    #[test]
    fn test_merge_commutative() {
        let a = filled(0..1000);
        let b = filled(500..2000);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab.count(), ba.count());
        assert_eq!(ab.data(), ba.data());
    }

    #[test]
    fn test_merge_equals_union_insert() {
        let mut merged = filled(0..1000);
        merged.merge(&filled(500..2000));
        let direct = filled(0..2000);
        assert_eq!(merged.data(), direct.data());
    }

    #[test]
    fn test_count_monotone_under_insert() {
        let mut hll = HyperLogLog::new();
        let mut prev = 0.0;
        for v in 0..5_000u64 {
            hll.insert(v);
            if v % 500 == 0 {
                let c = hll.count();
                assert!(c >= prev);
                prev = c;
            }
        }
    }

    #[test]
    fn test_roundtrip_bytes() {
        let hll = filled(0..1234);
        let restored = HyperLogLog::from_bytes(hll.data()).unwrap();
        assert_eq!(restored.count(), hll.count());
        assert!(HyperLogLog::from_bytes(&[0u8; 10]).is_none());
    }
}
