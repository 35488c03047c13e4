//! Precomputed per-host statistics for scoring.
//!
//! The table maps host hashes to harmonic centrality and feeds the domain
//! and link levels' score priors. It is loaded from a two-column TSV
//! (`host<TAB>centrality`) produced by an earlier [`crate::hyperball`] run
//! over the domain link graph, or computed directly from an edge list.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::hash;
use crate::hyperball::hyper_ball;
use crate::tsv::{self, TsvReader};
use crate::url::Url;

#[derive(Default)]
pub struct DomainStats {
    harmonic: HashMap<u64, f32>,
}

impl DomainStats {
    /// Empty table: every prior is 0 and scoring degrades to plain column
    /// weights.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load `host<TAB>centrality` rows.
    pub fn load_tsv(path: &Path) -> Result<Self> {
        let mut harmonic = HashMap::new();
        for line in TsvReader::open(path)?.lines() {
            let line = line?;
            let columns = tsv::columns(&line);
            if columns.len() < 2 {
                continue;
            }
            if let Ok(value) = columns[1].parse::<f32>() {
                harmonic.insert(hash::str_hash(&columns[0].to_lowercase()), value);
            }
        }
        Ok(DomainStats { harmonic })
    }

    /// Compute centrality for `hosts` from a host-graph edge list
    /// (`edges[i]` indexes into `hosts`).
    pub fn compute(hosts: &[u64], edges: &[Vec<u32>]) -> Self {
        assert_eq!(hosts.len(), edges.len());
        let harmonic = hyper_ball(edges);
        DomainStats {
            harmonic: hosts
                .iter()
                .zip(harmonic)
                .map(|(host, h)| (*host, h as f32))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.harmonic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harmonic.is_empty()
    }

    /// Harmonic centrality of a URL's host, 0.0 when unknown.
    pub fn harmonic_centrality(&self, url: &Url) -> f32 {
        self.prior(url.host_hash())
    }

    /// Scoring prior for a host hash, 0.0 when unknown.
    pub fn prior(&self, host_hash: u64) -> f32 {
        self.harmonic.get(&host_hash).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_tsv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.tsv");
        std::fs::write(&path, "example.com\t1.5\nother.org\t0.25\nbroken\n").unwrap();

        let stats = DomainStats::load_tsv(&path).unwrap();
        assert_eq!(stats.len(), 2);

        let url = Url::parse("https://example.com/page");
        assert!((stats.harmonic_centrality(&url) - 1.5).abs() < 1e-6);
        assert_eq!(stats.prior(hash::str_hash("unknown.net")), 0.0);
    }

    #[test]
    fn test_compute_from_edges() {
        let hosts = vec![
            hash::str_hash("a.com"),
            hash::str_hash("b.com"),
            hash::str_hash("c.com"),
        ];
        // a <-> b, c isolated.
        let edges = vec![vec![1], vec![0], vec![]];
        let stats = DomainStats::compute(&hosts, &edges);
        assert!(stats.prior(hosts[0]) > 0.0);
        assert_eq!(stats.prior(hosts[2]), 0.0);
    }
}
