//! Background merge scheduler.
//!
//! Ingestion workers that notice a full builder enqueue `(level, shard)`
//! events; a single scheduler thread pops them and appends that shard's
//! in-memory log to its cache files under the shard's own lock. The stop
//! signal is consulted at the top of each iteration; the queue is always
//! drained before the thread exits.

use log::{info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::Result;
use crate::level::Level;

struct Shared {
    queue: Mutex<SchedulerQueue>,
    condvar: Condvar,
}

struct SchedulerQueue {
    jobs: VecDeque<(usize, u64)>,
    stopping: bool,
}

pub struct Merger {
    levels: Vec<Arc<dyn Level>>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Merger {
    /// Spawn the scheduler thread over the given levels.
    pub fn start(levels: Vec<Arc<dyn Level>>) -> Merger {
        let shared = Arc::new(Shared {
            queue: Mutex::new(SchedulerQueue {
                jobs: VecDeque::new(),
                stopping: false,
            }),
            condvar: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_levels = levels.clone();
        let handle = std::thread::spawn(move || {
            Self::run(worker_shared, worker_levels);
        });

        Merger {
            levels,
            shared,
            handle: Some(handle),
        }
    }

    /// Report a full shard. The scheduler flushes it as soon as it gets the
    /// shard's lock.
    pub fn enqueue(&self, level_idx: usize, shard_id: u64) {
        let mut queue = self.shared.queue.lock().expect("merge queue lock poisoned");
        if !queue.jobs.contains(&(level_idx, shard_id)) {
            queue.jobs.push_back((level_idx, shard_id));
            self.shared.condvar.notify_one();
        }
    }

    fn run(shared: Arc<Shared>, levels: Vec<Arc<dyn Level>>) {
        loop {
            let job = {
                let mut queue = shared.queue.lock().expect("merge queue lock poisoned");
                loop {
                    if let Some(job) = queue.jobs.pop_front() {
                        break Some(job);
                    }
                    if queue.stopping {
                        break None;
                    }
                    queue = shared
                        .condvar
                        .wait(queue)
                        .expect("merge queue lock poisoned");
                }
            };

            let Some((level_idx, shard_id)) = job else {
                return;
            };

            // A failed append leaves the shard's in-memory log intact; the
            // final flush at stop time retries it.
            if let Err(e) = levels[level_idx].append_shard(shard_id) {
                warn!("background append of shard {} failed: {}", shard_id, e);
            }
        }
    }

    fn drain_and_join(&mut self) {
        {
            let mut queue = self.shared.queue.lock().expect("merge queue lock poisoned");
            queue.stopping = true;
            self.shared.condvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            handle.join().expect("merge scheduler thread panicked");
        }
    }

    /// Drain the queue, join the thread, flush every level, and run the
    /// final merge pass.
    pub fn stop(mut self) -> Result<()> {
        self.drain_and_join();
        info!("merge scheduler stopped, merging all levels");
        for level in &self.levels {
            level.append()?;
            level.merge()?;
        }
        Ok(())
    }

    /// Drain the queue and flush in-memory logs, but leave the caches
    /// unmerged so the caller can batch merges later.
    pub fn stop_only_append(mut self) -> Result<()> {
        self.drain_and_join();
        info!("merge scheduler stopped, caches left unmerged");
        for level in &self.levels {
            level.append()?;
        }
        Ok(())
    }
}

impl Drop for Merger {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.drain_and_join();
        }
    }
}
