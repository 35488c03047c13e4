//! Link level: postings are edges extracted from anchor text.
//!
//! Every word of a link's anchor text produces two postings keyed by the
//! term hash: one in the URL link index (target = URL hash) and one in the
//! domain link index (target = host hash). At query time the manager
//! retrieves link postings for the query terms and folds them into the
//! result scores; this level is never queried directly.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::bloom::BloomFilter;
use crate::config;
use crate::domain_stats::DomainStats;
use crate::error::Result;
use crate::hash;
use crate::level::{Level, LevelType, SharedBuilders};
use crate::record::{DomainLinkRecord, IndexRecord, LinkRecord, ReturnRecord};
use crate::shard::BuilderLimits;
use crate::sharded::ShardedIndex;
use crate::text;
use crate::tsv::{self, TsvReader};
use crate::url::Url;

pub const URL_LINK_DB: &str = "url_link_index";
pub const DOMAIN_LINK_DB: &str = "domain_link_index";

/// The two link indexes share one shard id space; even ids address the URL
/// link builders and odd ids the domain link builders, so the merge
/// scheduler can flush either through the one `append_shard` entry point.
fn split_shard(shard_id: u64) -> (bool, u64) {
    (shard_id % 2 == 0, shard_id / 2)
}

fn url_shard(shard_id: u64) -> u64 {
    shard_id * 2
}

fn domain_shard(shard_id: u64) -> u64 {
    shard_id * 2 + 1
}

pub struct LinkLevel {
    url_links: SharedBuilders<LinkRecord>,
    domain_links: SharedBuilders<DomainLinkRecord>,
    url_index: Mutex<ShardedIndex<LinkRecord>>,
    domain_index: Mutex<ShardedIndex<DomainLinkRecord>>,
    stats: Arc<DomainStats>,
}

impl LinkLevel {
    pub fn new(stats: Arc<DomainStats>) -> Self {
        Self::with_dbs(URL_LINK_DB, DOMAIN_LINK_DB, stats)
    }

    pub fn with_dbs(url_db: &str, domain_db: &str, stats: Arc<DomainStats>) -> Self {
        let num_shards = config::get().link_num_shards;
        let limits = BuilderLimits::from_config();
        LinkLevel {
            url_links: SharedBuilders::new(url_db, num_shards, limits),
            domain_links: SharedBuilders::new(domain_db, num_shards, limits),
            url_index: Mutex::new(ShardedIndex::new(url_db, num_shards)),
            domain_index: Mutex::new(ShardedIndex::new(domain_db, num_shards)),
            stats,
        }
    }

    /// URL link postings for every query term, concatenated and sorted by
    /// target hash, ready for [`crate::url_level::apply_url_links`].
    pub fn find_links(&self, query: &str) -> Result<Vec<LinkRecord>> {
        let mut index = self.url_index.lock().expect("url link index lock poisoned");
        let mut links = Vec::new();
        for word in text::full_text_words(query) {
            links.extend(index.find(hash::str_hash(&word))?);
        }
        links.sort_unstable_by_key(|l| (l.value(), l.source_domain));
        Ok(links)
    }

    /// Domain link postings for every query term, sorted by target host
    /// hash.
    pub fn find_domain_links(&self, query: &str) -> Result<Vec<DomainLinkRecord>> {
        let mut index = self
            .domain_index
            .lock()
            .expect("domain link index lock poisoned");
        let mut links = Vec::new();
        for word in text::full_text_words(query) {
            links.extend(index.find(hash::str_hash(&word))?);
        }
        links.sort_unstable_by_key(|l| (l.value(), l.source_domain));
        Ok(links)
    }
}

impl Level for LinkLevel {
    fn level_type(&self) -> LevelType {
        LevelType::Link
    }

    /// The link level only consumes link archives.
    fn add_index_file(&self, _local_path: &Path) -> Result<usize> {
        Ok(0)
    }

    fn add_link_file(&self, local_path: &Path, filter: &BloomFilter) -> Result<usize> {
        let mut rows = 0usize;
        for line in TsvReader::open(local_path)?.lines() {
            let line = line?;
            let columns = tsv::columns(&line);
            if columns.len() < 3 {
                continue;
            }
            let source = Url::parse(columns[0]);
            let target = Url::parse(columns[1]);

            // Only links pointing at indexed documents are worth storing.
            if !filter.exists(&target.filter_input()) {
                continue;
            }

            let source_domain = source.host_hash();
            let score = self.stats.prior(source_domain);

            for word in text::full_text_words(columns[2]) {
                let term_hash = hash::str_hash(&word);
                self.url_links
                    .add(term_hash, LinkRecord::new(target.hash(), source_domain, score));
                self.domain_links.add(
                    term_hash,
                    DomainLinkRecord::new(target.host_hash(), source_domain, score),
                );
            }
            rows += 1;
        }
        Ok(rows)
    }

    fn full_shards(&self) -> Vec<u64> {
        let mut full: Vec<u64> = self
            .url_links
            .full_shards()
            .into_iter()
            .map(url_shard)
            .collect();
        full.extend(self.domain_links.full_shards().into_iter().map(domain_shard));
        full
    }

    fn append_shard(&self, shard_id: u64) -> Result<()> {
        let (is_url, id) = split_shard(shard_id);
        if is_url {
            self.url_links.append_shard(id)
        } else {
            self.domain_links.append_shard(id)
        }
    }

    fn append(&self) -> Result<()> {
        self.url_links.append_all()?;
        self.domain_links.append_all()
    }

    fn merge(&self) -> Result<()> {
        self.url_links.merge_all()?;
        self.domain_links.merge_all()
    }

    fn truncate(&self) -> Result<()> {
        self.url_links.truncate_all()?;
        self.domain_links.truncate_all()
    }

    fn find(&self, _query: &str) -> Result<Vec<ReturnRecord>> {
        Ok(Vec::new())
    }
}
