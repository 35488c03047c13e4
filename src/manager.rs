//! Index manager: orchestrates levels and drives ingestion workers.
//!
//! The manager holds its levels behind the [`Level`] trait and fans
//! ingestion out over a fixed thread pool: input paths are split into one
//! chunk per worker, each worker streams its chunk through every level, and
//! full builders are flushed either by the background merge scheduler or
//! inline when no scheduler is running.
//!
//! A failed file or a broken shard never poisons sibling workers; it is
//! logged and skipped, and the batch carries on.

use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use crate::bloom::BloomFilter;
use crate::error::Result;
use crate::level::{top_results, Level, LevelType};
use crate::link_level::LinkLevel;
use crate::merger::Merger;
use crate::record::{LinkRecord, ReturnRecord};
use crate::url_level::apply_url_links;

#[derive(Default)]
pub struct IndexManager {
    levels: Vec<Arc<dyn Level>>,
    link_level: Option<Arc<LinkLevel>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_level(&mut self, level: Arc<dyn Level>) {
        self.levels.push(level);
    }

    /// Register the link level. It participates in the lifecycle like any
    /// level and is additionally joined against at query time.
    pub fn add_link_level(&mut self, level: Arc<LinkLevel>) {
        self.link_level = Some(Arc::clone(&level));
        self.levels.push(level);
    }

    /// Handles for the merge scheduler.
    pub fn levels(&self) -> Vec<Arc<dyn Level>> {
        self.levels.clone()
    }

    /// Stream index archives through every level with `num_threads` workers.
    pub fn add_index_files_threaded(
        &self,
        paths: &[PathBuf],
        num_threads: usize,
        merger: Option<&Merger>,
    ) -> Result<()> {
        self.run_workers(paths, num_threads, merger, &|level, path| {
            level.add_index_file(path)
        })
    }

    /// Stream link archives, dropping postings whose target URL is absent
    /// from the membership filter.
    pub fn add_link_files_threaded(
        &self,
        paths: &[PathBuf],
        num_threads: usize,
        filter: &BloomFilter,
        merger: Option<&Merger>,
    ) -> Result<()> {
        self.run_workers(paths, num_threads, merger, &|level, path| {
            level.add_link_file(path, filter)
        })
    }

    fn run_workers(
        &self,
        paths: &[PathBuf],
        num_threads: usize,
        merger: Option<&Merger>,
        add_file: &(dyn Fn(&dyn Level, &std::path::Path) -> Result<usize> + Sync),
    ) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let num_threads = num_threads.max(1);
        let chunk_size = paths.len().div_ceil(num_threads);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| crate::error::IndexError::validation(e.to_string()))?;

        pool.scope(|scope| {
            for chunk in paths.chunks(chunk_size) {
                scope.spawn(move |_| {
                    for (done, path) in chunk.iter().enumerate() {
                        for (level_idx, level) in self.levels.iter().enumerate() {
                            match add_file(level.as_ref(), path) {
                                Ok(_) => {}
                                Err(e) => {
                                    warn!("skipping {} for one level: {}", path.display(), e);
                                    continue;
                                }
                            }
                            self.flush_full(level_idx, level, merger);
                        }
                        info!("done {} out of {}", done + 1, chunk.len());
                    }
                });
            }
        });

        // Whatever is left in memory goes to the cache files now; with a
        // scheduler running this is usually a near-empty pass.
        for level in &self.levels {
            level.append()?;
        }
        Ok(())
    }

    /// Hand full shards to the scheduler, or append them inline when none
    /// is running.
    fn flush_full(&self, level_idx: usize, level: &Arc<dyn Level>, merger: Option<&Merger>) {
        for shard_id in level.full_shards() {
            match merger {
                Some(merger) => merger.enqueue(level_idx, shard_id),
                None => {
                    if let Err(e) = level.append_shard(shard_id) {
                        warn!("inline append of shard {} failed: {}", shard_id, e);
                    }
                }
            }
        }
    }

    /// Fold every level's caches into its data files.
    pub fn merge(&self) -> Result<()> {
        for level in &self.levels {
            level.merge()?;
        }
        Ok(())
    }

    pub fn truncate(&self) -> Result<()> {
        for level in &self.levels {
            level.truncate()?;
        }
        Ok(())
    }

    pub fn optimize(&self) -> Result<()> {
        for level in &self.levels {
            level.optimize()?;
        }
        Ok(())
    }

    /// Query the levels in registration order and boost the first non-empty
    /// result set with link data.
    pub fn find(&self, query: &str) -> Result<Vec<ReturnRecord>> {
        let mut found: Option<(LevelType, Vec<ReturnRecord>)> = None;
        for level in &self.levels {
            let results = level.find(query)?;
            if !results.is_empty() {
                found = Some((level.level_type(), results));
                break;
            }
        }
        let Some((level_type, mut results)) = found else {
            return Ok(Vec::new());
        };

        if let Some(link_level) = &self.link_level {
            // The link join walks both sides in value order.
            results.sort_unstable_by_key(|r| r.value);
            match level_type {
                LevelType::Domain => {
                    let links: Vec<LinkRecord> = link_level
                        .find_domain_links(query)?
                        .into_iter()
                        .map(|l| LinkRecord::new(l.value, l.source_domain, l.score))
                        .collect();
                    let applied = apply_url_links(&links, &mut results);
                    info!("applied {} domain links", applied);
                }
                LevelType::Url => {
                    let links = link_level.find_links(query)?;
                    let applied = apply_url_links(&links, &mut results);
                    info!("applied {} url links", applied);
                }
                _ => {}
            }
        }

        Ok(top_results(results, crate::config::get().find_limit))
    }
}
