//! End-to-end tests: TSV archives through the levels, the threaded
//! ingestion pipeline, the background merge scheduler, and query-time link
//! application.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crawldex::bloom::BloomFilter;
use crawldex::config::{self, Config};
use crawldex::domain_level::DomainLevel;
use crawldex::domain_stats::DomainStats;
use crawldex::hash;
use crawldex::level::Level;
use crawldex::link_level::LinkLevel;
use crawldex::manager::IndexManager;
use crawldex::merger::Merger;
use crawldex::record::UrlRecord;
use crawldex::shard::ShardReader;
use crawldex::url::Url;
use crawldex::url_level::UrlLevel;
use crawldex::word_level::WordLevel;

static ROOT: OnceLock<PathBuf> = OnceLock::new();

fn test_root() -> &'static PathBuf {
    ROOT.get_or_init(|| {
        let dir = tempfile::tempdir().expect("failed to create scratch dir");
        let path = dir.into_path();
        config::init(Config {
            data_roots: vec![path.clone()],
            num_shards: 8,
            word_num_shards: 4,
            link_num_shards: 5,
            url_hash_table_size: 10,
            // Tiny flush threshold so the scheduler actually sees full
            // builders in these small batches.
            builder_flush_bytes: 256,
            num_threads_indexing: 2,
            num_threads_merging: 2,
            num_threads_hyperball: 2,
            ..Default::default()
        });
        path
    })
}

fn write_archive(name: &str, rows: &[&str]) -> PathBuf {
    let path = test_root().join(name);
    std::fs::write(&path, rows.join("\n") + "\n").unwrap();
    path
}

fn stats_with(name: &str, rows: &[(&str, f32)]) -> Arc<DomainStats> {
    let lines: Vec<String> = rows
        .iter()
        .map(|(host, value)| format!("{}\t{}", host, value))
        .collect();
    let path = test_root().join(format!("stats_{}.tsv", name));
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    Arc::new(DomainStats::load_tsv(&path).unwrap())
}

#[test]
fn test_domain_ingestion_and_search() {
    test_root();

    let a = write_archive(
        "batch_a.tsv",
        &[
            "https://alpha.example/page1\tzebra stripes\tsavanna\t\t",
            "https://alpha.example/page2\tzebra herd\t\t\t",
        ],
    );
    let b = write_archive(
        "batch_b.tsv",
        &["https://beta.example/page1\tquagga stripes\t\t\t"],
    );

    let mut manager = IndexManager::new();
    let domain = Arc::new(DomainLevel::with_db(
        "domain_search",
        Arc::new(DomainStats::empty()),
    ));
    manager.add_level(domain);

    let merger = Merger::start(manager.levels());
    manager
        .add_index_files_threaded(&[a, b], 2, Some(&merger))
        .unwrap();
    merger.stop().unwrap();

    // "zebra" appears twice on alpha (title weight 10 each) and never on
    // beta.
    let results = manager.find("zebra").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, Url::parse("https://alpha.example/x").host_hash());
    assert!((results[0].score - 20.0).abs() < 1e-3);

    // "stripes" appears on both hosts.
    let results = manager.find("stripes").unwrap();
    assert_eq!(results.len(), 2);

    // Intersection: only alpha has both terms.
    let results = manager.find("zebra savanna").unwrap();
    assert_eq!(results.len(), 1);

    // Unknown terms are empty everywhere.
    assert!(manager.find("okapi").unwrap().is_empty());
    assert!(manager.find("zebra okapi").unwrap().is_empty());
}

#[test]
fn test_domain_prior_blends_into_scores() {
    test_root();

    let archive = write_archive(
        "batch_prior.tsv",
        &[
            "https://ranked.example/\tkudu\t\t\t",
            "https://plain.example/\tkudu\t\t\t",
        ],
    );

    let stats = stats_with("prior", &[("ranked.example", 1.0)]);
    let mut manager = IndexManager::new();
    manager.add_level(Arc::new(DomainLevel::with_db("domain_prior", stats)));

    manager.add_index_files_threaded(&[archive], 1, None).unwrap();
    manager.merge().unwrap();

    let results = manager.find("kudu").unwrap();
    assert_eq!(results.len(), 2);
    // Prior 1.0 doubles the column weight: 20 vs 10.
    assert_eq!(
        results[0].value,
        Url::parse("https://ranked.example/").host_hash()
    );
    assert!(results[0].score > results[1].score);
}

#[test]
fn test_word_level_counts_scores_and_document_sizes() {
    test_root();

    let archive = write_archive(
        "batch_words.tsv",
        &[
            "https://wordy.example/a\tgnu gnu gnu\tgnu\t\t",
            "https://wordy.example/b\timpala\t\t\t",
            "https://terse.example/\tgnu\t\t\t",
        ],
    );

    let word_level = Arc::new(WordLevel::with_db("word_counts"));
    let mut manager = IndexManager::new();
    manager.add_level(Arc::clone(&word_level) as Arc<dyn Level>);

    manager.add_index_files_threaded(&[archive], 1, None).unwrap();
    manager.merge().unwrap();

    let wordy = Url::parse("https://wordy.example/").host_hash();
    let terse = Url::parse("https://terse.example/").host_hash();

    // Counts fold across rows of the same host.
    let records = word_level.find_counted("gnu").unwrap();
    assert_eq!(records.len(), 2);
    let wordy_rec = records.iter().find(|r| r.value == wordy).unwrap();
    assert_eq!(wordy_rec.count, 4);
    let terse_rec = records.iter().find(|r| r.value == terse).unwrap();
    assert_eq!(terse_rec.count, 1);

    // wordy indexed 5 words in total, terse 1.
    assert_eq!(word_level.document_size(wordy), 5);
    assert_eq!(word_level.document_size(terse), 1);

    // Scores: count / document size, then re-permuted by score.
    word_level.calculate_scores().unwrap();
    word_level.sort_by_scores().unwrap();

    let records = word_level.find_counted("gnu").unwrap();
    assert!((records[0].score - records[0].count as f32
        / word_level.document_size(records[0].value) as f32)
        .abs()
        < 1e-6);
    assert!(records[0].score >= records[1].score);
}

#[test]
fn test_word_level_find_intersects_terms() {
    test_root();

    let archive = write_archive(
        "batch_word_find.tsv",
        &[
            "https://both.example/\tgemsbok dunes\t\t\t",
            "https://one.example/\tgemsbok\t\t\t",
        ],
    );

    let word_level = Arc::new(WordLevel::with_db("word_find"));
    let mut manager = IndexManager::new();
    manager.add_level(Arc::clone(&word_level) as Arc<dyn Level>);

    manager.add_index_files_threaded(&[archive], 1, None).unwrap();
    manager.merge().unwrap();
    word_level.calculate_scores().unwrap();
    word_level.sort_by_scores().unwrap();

    // A single term matches both hosts.
    assert_eq!(word_level.find("gemsbok").unwrap().len(), 2);

    // Both terms co-occur only on both.example; the stored lists are
    // score-ordered by now, so this exercises the value re-sort before the
    // merge-join.
    let results = word_level.find("gemsbok dunes").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].value,
        Url::parse("https://both.example/").host_hash()
    );
    // Combined score is the sum of the two term-frequency scores.
    assert!((results[0].score - 1.0).abs() < 1e-6);

    // A term with no postings empties the intersection.
    assert!(word_level.find("gemsbok sable").unwrap().is_empty());
}

#[test]
fn test_link_application_boosts_results() {
    test_root();

    let archive = write_archive(
        "batch_linked.tsv",
        &[
            "https://target.example/doc\toryx migration\t\t\t",
            "https://other.example/doc\toryx\t\t\t",
        ],
    );
    let links = write_archive(
        "batch_links.tsv",
        &[
            // source, target, anchor text
            "https://source.example/page\thttps://target.example/doc\toryx",
            // Second link from the same source domain: dropped by edge
            // uniqueness.
            "https://source.example/other\thttps://target.example/doc\toryx",
            // Target never indexed: dropped by the membership filter.
            "https://source.example/page\thttps://absent.example/doc\toryx",
        ],
    );

    let mut filter = BloomFilter::with_capacity(100, 0.01);
    filter.insert(&Url::parse("https://target.example/doc").filter_input());

    let stats = stats_with("linked", &[("source.example", 0.2)]);
    let mut manager = IndexManager::new();
    manager.add_level(Arc::new(DomainLevel::with_db(
        "domain_linked",
        Arc::new(DomainStats::empty()),
    )));
    manager.add_link_level(Arc::new(LinkLevel::with_dbs(
        "url_links_test",
        "domain_links_test",
        Arc::clone(&stats),
    )));

    let merger = Merger::start(manager.levels());
    manager
        .add_index_files_threaded(&[archive], 2, Some(&merger))
        .unwrap();
    manager
        .add_link_files_threaded(&[links], 2, &filter, Some(&merger))
        .unwrap();
    merger.stop().unwrap();

    let results = manager.find("oryx").unwrap();
    assert_eq!(results.len(), 2);

    let target = Url::parse("https://target.example/doc").host_hash();
    let boosted = results.iter().find(|r| r.value == target).unwrap();
    let plain = results
        .iter()
        .find(|r| r.value != target)
        .unwrap();

    // Exactly one distinct (source_domain, target) edge applied.
    assert_eq!(boosted.num_url_links, 1);
    assert_eq!(plain.num_url_links, 0);
    let boost = (25.0f32 * 0.2).exp_m1() / 50.0;
    assert!((boosted.score - (10.0 + boost)).abs() < 1e-2);
    assert!(boosted.score > plain.score);
}

#[test]
fn test_url_level_groups_by_host() {
    test_root();

    let archive = write_archive(
        "batch_urls.tsv",
        &[
            "https://host.example/one\tlechwe\t\t\t",
            "https://host.example/two\tlechwe\t\t\t",
        ],
    );

    let url_level = Arc::new(UrlLevel::with_db("url_grouped"));
    let mut manager = IndexManager::new();
    manager.add_level(Arc::clone(&url_level) as Arc<dyn Level>);

    manager.add_index_files_threaded(&[archive], 1, None).unwrap();
    manager.merge().unwrap();

    // Both URLs live in the one builder keyed by the host hash.
    let host_hash = Url::parse("https://host.example/").host_hash();
    let mut reader: ShardReader<UrlRecord> = ShardReader::new("url_grouped", host_hash);
    let postings = reader.find(hash::str_hash("lechwe")).unwrap();
    assert_eq!(postings.len(), 2);

    let hashes: Vec<u64> = postings.iter().map(|r| r.value).collect();
    assert!(hashes.contains(&Url::parse("https://host.example/one").hash()));
    assert!(hashes.contains(&Url::parse("https://host.example/two").hash()));
}

#[test]
fn test_truncate_clears_all_levels() {
    test_root();

    let archive = write_archive(
        "batch_truncate.tsv",
        &["https://gone.example/\tduiker\t\t\t"],
    );

    let mut manager = IndexManager::new();
    manager.add_level(Arc::new(DomainLevel::with_db(
        "domain_truncated",
        Arc::new(DomainStats::empty()),
    )));

    manager.add_index_files_threaded(&[archive], 1, None).unwrap();
    manager.merge().unwrap();
    assert_eq!(manager.find("duiker").unwrap().len(), 1);

    manager.truncate().unwrap();
    assert!(manager.find("duiker").unwrap().is_empty());
}

#[test]
fn test_missing_input_file_does_not_poison_batch() {
    test_root();

    let good = write_archive(
        "batch_good.tsv",
        &["https://fine.example/\tbongo\t\t\t"],
    );
    let missing = test_root().join("no_such_file.tsv");

    let mut manager = IndexManager::new();
    manager.add_level(Arc::new(DomainLevel::with_db(
        "domain_skips",
        Arc::new(DomainStats::empty()),
    )));

    // The missing file is logged and skipped; the good file still lands.
    manager
        .add_index_files_threaded(&[missing, good], 2, None)
        .unwrap();
    manager.merge().unwrap();

    assert_eq!(manager.find("bongo").unwrap().len(), 1);
}
