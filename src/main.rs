use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crawldex::bloom::BloomFilter;
use crawldex::config;
use crawldex::domain_level::DomainLevel;
use crawldex::domain_stats::DomainStats;
use crawldex::link_level::LinkLevel;
use crawldex::manager::IndexManager;
use crawldex::merger::Merger;
use crawldex::profiler;
use crawldex::tsv::TsvReader;
use crawldex::url::Url;
use crawldex::url_level::UrlLevel;
use crawldex::word_level::WordLevel;
use crawldex::{hash, logging};

#[derive(Parser)]
#[command(name = "crawldex")]
#[command(about = "Sharded full-text indexing core for a web-scale search engine", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive indexer console
    Console,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    if let Some(path) = &cli.config {
        config::init(config::parse_config(path)?);
    }

    match cli.command {
        Commands::Console => console(),
    }
}

struct ConsoleState {
    manager: IndexManager,
    word_level: Arc<WordLevel>,
    stats: Arc<DomainStats>,
    url_filter: Option<BloomFilter>,
}

fn console() -> Result<()> {
    let cfg = config::get();

    let stats_path = cfg.data_roots[0].join("domain_stats.tsv");
    let stats = Arc::new(match DomainStats::load_tsv(&stats_path) {
        Ok(stats) => {
            info!("loaded {} domain stats rows", stats.len());
            stats
        }
        Err(_) => {
            warn!("no domain stats at {}, priors default to 0", stats_path.display());
            DomainStats::empty()
        }
    });

    let word_level = Arc::new(WordLevel::new());
    let mut manager = IndexManager::new();
    manager.add_level(Arc::new(DomainLevel::new(Arc::clone(&stats))));
    manager.add_level(Arc::new(UrlLevel::new()));
    manager.add_level(Arc::clone(&word_level) as Arc<dyn crawldex::Level>);
    manager.add_link_level(Arc::new(LinkLevel::new(Arc::clone(&stats))));

    let filter_path = cfg.data_roots[0].join("url_filter.bloom");
    let url_filter = match BloomFilter::read_file(&filter_path) {
        Ok(filter) => Some(filter),
        Err(_) => {
            warn!("no URL filter at {}", filter_path.display());
            None
        }
    };

    let state = ConsoleState {
        manager,
        word_level,
        stats,
        url_filter,
    };

    let stdin = std::io::stdin();
    let mut input = String::new();
    loop {
        print!("# ");
        std::io::stdout().flush().ok();
        input.clear();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        let args = input_to_args(&input);
        let Some(cmd) = args.first() else {
            continue;
        };

        let result = match cmd.as_str() {
            "index" => cmd_index(&state, &args),
            "index_link" => cmd_index_link(&state, &args),
            "search" => cmd_search(&state, &args),
            "word" => cmd_word(&state, &args),
            "word_domain" => cmd_word_domain(&state, &args),
            "word_num" => cmd_word_num(&state, &args),
            "harmonic" => cmd_harmonic(&state, &args),
            "bloom" => cmd_bloom(&state, &args),
            "quit" => break,
            other => {
                println!("unknown command: {}", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            eprintln!("error: {:#}", e);
        }
    }

    Ok(())
}

/// Split console input on the original word boundaries: space, tab, comma,
/// pipe, bang.
fn input_to_args(input: &str) -> Vec<String> {
    input
        .split(|c| " \t,|!\r\n".contains(c))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve the local archive paths of a crawl batch from its listing file.
fn batch_paths(batch: &str, limit: usize) -> Result<Vec<PathBuf>> {
    let cfg = config::get();
    let listing = cfg.crawl_data_path.join(batch).join("warc.paths.gz");

    let mut rows = Vec::new();
    TsvReader::open(&listing)
        .with_context(|| format!("batch listing {}", listing.display()))?
        .read_column_into(0, &mut rows, limit, 0)?;

    Ok(rows
        .into_iter()
        .map(|path| {
            // Archive listings name the raw crawl files; the transfer layer
            // stores them re-compressed as plain .gz.
            let path = path.replace(".warc.gz", ".gz");
            let candidate = PathBuf::from(&path);
            if candidate.is_absolute() {
                candidate
            } else {
                cfg.crawl_data_path.join(path)
            }
        })
        .collect())
}

fn parse_limit(args: &[String], index: usize) -> usize {
    args.get(index).and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn cmd_index(state: &ConsoleState, args: &[String]) -> Result<()> {
    let Some(batch) = args.get(1) else {
        println!("usage: index <batch> [limit]");
        return Ok(());
    };
    let paths = batch_paths(batch, parse_limit(args, 2))?;
    let cfg = config::get();

    let mut prof = profiler::Instance::start("index batch");
    let merger = Merger::start(state.manager.levels());
    println!("starting indexer");
    state
        .manager
        .add_index_files_threaded(&paths, cfg.num_threads_indexing, Some(&merger))?;
    println!("done with indexer");
    merger.stop()?;
    state.manager.optimize()?;
    prof.stop();
    profiler::print_report();
    Ok(())
}

fn cmd_index_link(state: &ConsoleState, args: &[String]) -> Result<()> {
    let Some(batch) = args.get(1) else {
        println!("usage: index_link <batch> [limit]");
        return Ok(());
    };
    let Some(filter) = &state.url_filter else {
        println!("no URL filter loaded; index a batch and build the filter first");
        return Ok(());
    };
    let paths = batch_paths(batch, parse_limit(args, 2))?;
    let cfg = config::get();

    let merger = Merger::start(state.manager.levels());
    println!("starting link indexer");
    state
        .manager
        .add_link_files_threaded(&paths, cfg.num_threads_indexing, filter, Some(&merger))?;
    println!("done with link indexer");
    merger.stop_only_append()?;
    state.manager.merge()?;
    Ok(())
}

fn cmd_search(state: &ConsoleState, args: &[String]) -> Result<()> {
    let query = args[1..].join(" ");
    let mut prof = profiler::Instance::start("domain search");
    let results = state.manager.find(&query)?;
    let took = prof.stop();

    println!("took {:.2}ms", took);
    println!("{:>18} {:>12} {:>6}", "domain hash", "score", "links");
    for record in results {
        println!(
            "{:>18x} {:>12.4} {:>6}",
            record.value, record.score, record.num_url_links
        );
    }
    Ok(())
}

fn cmd_word(state: &ConsoleState, args: &[String]) -> Result<()> {
    let Some(term) = args.get(1) else {
        println!("usage: word <term>");
        return Ok(());
    };
    let records = state.word_level.find_counted(term)?;
    for (pos, record) in records.iter().enumerate() {
        println!(
            "{:x}: {} score: {} pos: {} doc_size: {}",
            record.value,
            record.count,
            record.score,
            pos,
            state.word_level.document_size(record.value)
        );
    }
    Ok(())
}

fn cmd_word_domain(state: &ConsoleState, args: &[String]) -> Result<()> {
    let (Some(domain), Some(term)) = (args.get(1), args.get(2)) else {
        println!("usage: word_domain <domain> <term>");
        return Ok(());
    };
    let host_hash = hash::str_hash(&domain.to_lowercase());
    let records = state.word_level.find_counted(term)?;
    for (pos, record) in records.iter().enumerate() {
        if record.value == host_hash {
            println!(
                "{}: {} score: {} pos: {} doc_size: {}",
                domain,
                record.count,
                record.score,
                pos,
                state.word_level.document_size(record.value)
            );
        }
    }
    Ok(())
}

fn cmd_word_num(state: &ConsoleState, args: &[String]) -> Result<()> {
    let Some(term) = args.get(1) else {
        println!("usage: word_num <term>");
        return Ok(());
    };
    let records = state.word_level.find_counted(term)?;
    println!("num_records: {}", records.len());
    Ok(())
}

fn cmd_harmonic(state: &ConsoleState, args: &[String]) -> Result<()> {
    let Some(url) = args.get(1) else {
        println!("usage: harmonic <url>");
        return Ok(());
    };
    let harmonic = state.stats.harmonic_centrality(&Url::parse(url));
    println!("url: {} has harmonic centrality {}", url, harmonic);
    Ok(())
}

fn cmd_bloom(state: &ConsoleState, args: &[String]) -> Result<()> {
    let (Some(host), Some(path)) = (args.get(1), args.get(2)) else {
        println!("usage: bloom <host> <path>");
        return Ok(());
    };
    let Some(filter) = &state.url_filter else {
        println!("no URL filter loaded");
        return Ok(());
    };
    let url = Url::from_host_path(host, path);
    if filter.exists(&url.filter_input()) {
        println!("{} exists", url.str());
    } else {
        println!("{} not exists", url.str());
    }
    Ok(())
}
