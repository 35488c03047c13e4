//! Logger setup for the indexer console.
//!
//! Batch runs take hours, so every line is tagged with the seconds elapsed
//! since startup and the module that emitted it, and reads as a timeline:
//!
//! ```text
//! [   312.4s] INFO crawldex::merger: merge scheduler stopped, merging all levels
//! ```
//!
//! Everything goes to stderr; stdout stays clean for console command output.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Seconds since [`init_logger`] ran, 0.0 if it never did.
pub fn uptime() -> f64 {
    STARTED
        .get()
        .map(|started| started.elapsed().as_secs_f64())
        .unwrap_or(0.0)
}

/// Install the stderr logger.
///
/// Verbose selects Info, otherwise only warnings and errors get through;
/// a `RUST_LOG` setting in the environment overrides both.
pub fn init_logger(verbose: bool) {
    STARTED.set(Instant::now()).ok();

    let level = if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{:>8.1}s] {} {}: {}",
                uptime(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_is_zero_before_init() {
        // Tests never install the logger, so the clock has not started.
        assert_eq!(uptime(), 0.0);
    }
}
