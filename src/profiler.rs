//! Process-wide timing registry.
//!
//! An [`Instance`] measures one named span; stopped spans accumulate into a
//! global table that [`print_report`] dumps at the end of a batch. Nothing
//! here sits on the ingestion hot path.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

static REGISTRY: OnceLock<Mutex<HashMap<String, Accumulated>>> = OnceLock::new();

#[derive(Default, Clone, Copy)]
struct Accumulated {
    count: u64,
    total_ms: f64,
}

fn registry() -> &'static Mutex<HashMap<String, Accumulated>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

pub struct Instance {
    name: String,
    start: Instant,
    stopped: bool,
}

impl Instance {
    pub fn start(name: &str) -> Self {
        Instance {
            name: name.to_string(),
            start: Instant::now(),
            stopped: false,
        }
    }

    /// Elapsed milliseconds so far.
    pub fn get(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Stop the span and record it. Returns the elapsed milliseconds.
    pub fn stop(&mut self) -> f64 {
        let elapsed = self.get();
        if !self.stopped {
            self.stopped = true;
            let mut registry = registry().lock().expect("profiler lock poisoned");
            let entry = registry.entry(self.name.clone()).or_default();
            entry.count += 1;
            entry.total_ms += elapsed;
        }
        elapsed
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if !self.stopped {
            self.stop();
        }
    }
}

/// Dump every recorded span: name, call count, total and mean time.
pub fn print_report() {
    let registry = registry().lock().expect("profiler lock poisoned");
    let mut rows: Vec<(&String, &Accumulated)> = registry.iter().collect();
    rows.sort_by(|a, b| b.1.total_ms.total_cmp(&a.1.total_ms));

    println!("{:<40} {:>8} {:>12} {:>12}", "profile", "calls", "total ms", "mean ms");
    for (name, acc) in rows {
        println!(
            "{:<40} {:>8} {:>12.2} {:>12.2}",
            name,
            acc.count,
            acc.total_ms,
            acc.total_ms / acc.count as f64
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_records_on_stop() {
        let mut instance = Instance::start("test span");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let elapsed = instance.stop();
        assert!(elapsed >= 1.0);

        let registry = registry().lock().unwrap();
        assert!(registry.get("test span").unwrap().count >= 1);
    }

    #[test]
    fn test_double_stop_counts_once() {
        let before = {
            let registry = registry().lock().unwrap();
            registry.get("double").map(|a| a.count).unwrap_or(0)
        };
        let mut instance = Instance::start("double");
        instance.stop();
        instance.stop();
        drop(instance);
        let after = registry().lock().unwrap().get("double").unwrap().count;
        assert_eq!(after, before + 1);
    }
}
