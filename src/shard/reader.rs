//! Shard reader: lookup by term hash against one shard's data file.
//!
//! Two access paths share the page format written by the builder:
//!
//! - **Single page** (built with hash-table size 0): the whole header
//!   (keys, positions, lengths, totals) is loaded once on first lookup and
//!   binary-searched per query.
//! - **Directory** (a `.keys` file exists): the directory entry at
//!   `key mod H` gives the page offset; the page header is read per lookup.
//!
//! A missing data file is an empty shard, not an error. A structurally
//! broken file is fatal for the shard and surfaces as `Format`.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::Path;

use crate::constants::{KEY_DIR_EMPTY, MAX_NUM_KEYS, READER_BUFFER_LEN};
use crate::error::{IndexError, Result};
use crate::record::IndexRecord;

use super::files::ShardFiles;

struct PageHeader {
    keys: Vec<u64>,
    positions: Vec<u64>,
    lengths: Vec<u64>,
    totals: Vec<u64>,
    /// Absolute file offset where the page's payload begins.
    data_start: u64,
}

pub struct ShardReader<R: IndexRecord> {
    files: ShardFiles,
    /// Lazily loaded single-page header; `None` until the first lookup.
    header: Option<PageHeader>,
    _marker: PhantomData<R>,
}

impl<R: IndexRecord> ShardReader<R> {
    pub fn new(db_name: &str, id: u64) -> Self {
        ShardReader {
            files: ShardFiles::new(db_name, id),
            header: None,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.files.id()
    }

    /// All postings for a term hash, in stored (merge-join) order.
    pub fn find(&mut self, key: u64) -> Result<Vec<R>> {
        if self.files.key_path().exists() {
            self.find_via_directory(key)
        } else {
            self.find_single_page(key)
        }
    }

    /// The pre-truncation result count for a key (0 when absent).
    pub fn total_results(&mut self, key: u64) -> Result<u64> {
        if self.files.key_path().exists() {
            // Directory shards resolve totals from the page header.
            let path = self.files.data_path();
            let Some(page_pos) = self.directory_entry(key)? else {
                return Ok(0);
            };
            let mut reader = match open_reader(&path)? {
                Some(r) => r,
                None => return Ok(0),
            };
            let header = read_page_header(&mut reader, page_pos, &path)?;
            Ok(match header.keys.binary_search(&key) {
                Ok(i) => header.totals[i],
                Err(_) => 0,
            })
        } else {
            self.read_keys()?;
            let header = self.header.as_ref().unwrap();
            Ok(match header.keys.binary_search(&key) {
                Ok(i) => header.totals[i],
                Err(_) => 0,
            })
        }
    }

    // ------------------------------------------------------------------
    // Single-page path
    // ------------------------------------------------------------------

    fn find_single_page(&mut self, key: u64) -> Result<Vec<R>> {
        self.read_keys()?;
        let header = self.header.as_ref().unwrap();

        let Ok(key_pos) = header.keys.binary_search(&key) else {
            return Ok(Vec::new());
        };
        let position = header.positions[key_pos];
        let length = header.lengths[key_pos];
        let data_start = header.data_start;

        let path = self.files.data_path();
        let mut reader = match open_reader(&path)? {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };
        read_postings(&mut reader, data_start + position, length, &path)
    }

    /// Load the first (and only) page header into memory. Idempotent.
    fn read_keys(&mut self) -> Result<()> {
        if self.header.is_some() {
            return Ok(());
        }

        let path = self.files.data_path();
        let header = match open_reader(&path)? {
            Some(mut reader) => match read_page_header_opt(&mut reader, 0, &path)? {
                Some(header) => header,
                None => empty_header(),
            },
            None => empty_header(),
        };
        self.header = Some(header);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Directory path
    // ------------------------------------------------------------------

    /// The page offset for `key`, or `None` when the bucket is empty.
    fn directory_entry(&self, key: u64) -> Result<Option<u64>> {
        let path = self.files.key_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IndexError::io(&path, "open", e)),
        };
        let table_size = file
            .metadata()
            .map_err(|e| IndexError::io(&path, "stat", e))?
            .len()
            / 8;
        if table_size == 0 {
            return Ok(None);
        }

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start((key % table_size) * 8))
            .map_err(|e| IndexError::io(&path, "seek", e))?;
        let mut buf = [0u8; 8];
        reader
            .read_exact(&mut buf)
            .map_err(|e| IndexError::format(&path, format!("truncated directory: {}", e)))?;

        let entry = u64::from_le_bytes(buf);
        Ok((entry != KEY_DIR_EMPTY).then_some(entry))
    }

    fn find_via_directory(&mut self, key: u64) -> Result<Vec<R>> {
        let Some(page_pos) = self.directory_entry(key)? else {
            return Ok(Vec::new());
        };

        let path = self.files.data_path();
        let mut reader = match open_reader(&path)? {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };
        let header = read_page_header(&mut reader, page_pos, &path)?;

        let Ok(key_pos) = header.keys.binary_search(&key) else {
            return Ok(Vec::new());
        };
        read_postings(
            &mut reader,
            header.data_start + header.positions[key_pos],
            header.lengths[key_pos],
            &path,
        )
    }
}

fn empty_header() -> PageHeader {
    PageHeader {
        keys: Vec::new(),
        positions: Vec::new(),
        lengths: Vec::new(),
        totals: Vec::new(),
        data_start: 0,
    }
}

fn open_reader(path: &Path) -> Result<Option<BufReader<File>>> {
    match File::open(path) {
        Ok(f) => Ok(Some(BufReader::new(f))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IndexError::io(path, "open", e)),
    }
}

fn read_page_header(
    reader: &mut BufReader<File>,
    page_pos: u64,
    path: &Path,
) -> Result<PageHeader> {
    read_page_header_opt(reader, page_pos, path)?
        .ok_or_else(|| IndexError::format(path, "page offset past end of file"))
}

/// Read the page header at `page_pos`. `None` when the file ends there
/// (an empty data file has no pages at all).
fn read_page_header_opt(
    reader: &mut BufReader<File>,
    page_pos: u64,
    path: &Path,
) -> Result<Option<PageHeader>> {
    reader
        .seek(SeekFrom::Start(page_pos))
        .map_err(|e| IndexError::io(path, "seek", e))?;

    let mut buf = [0u8; 8];
    match reader.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(IndexError::io(path, "read", e)),
    }
    let num_keys = u64::from_le_bytes(buf);
    if num_keys > MAX_NUM_KEYS {
        return Err(IndexError::overflow(
            "shard page keys",
            MAX_NUM_KEYS,
            num_keys,
        ));
    }

    let n = num_keys as usize;
    let keys = read_u64_array(reader, n, path)?;
    let positions = read_u64_array(reader, n, path)?;
    let lengths = read_u64_array(reader, n, path)?;
    let totals = read_u64_array(reader, n, path)?;

    let data_start = page_pos + 8 + (num_keys * 8) * 4;
    Ok(Some(PageHeader {
        keys,
        positions,
        lengths,
        totals,
        data_start,
    }))
}

fn read_u64_array(reader: &mut BufReader<File>, count: usize, path: &Path) -> Result<Vec<u64>> {
    let mut bytes = vec![0u8; count * 8];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| IndexError::format(path, format!("truncated page header: {}", e)))?;
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// Stream `length` payload bytes from `offset`, decoding fixed-size records
/// through a bounded window. Partial reads are tolerated only if the number
/// of complete records matches the declared length.
fn read_postings<R: IndexRecord>(
    reader: &mut BufReader<File>,
    offset: u64,
    length: u64,
    path: &Path,
) -> Result<Vec<R>> {
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| IndexError::io(path, "seek", e))?;

    let expected = (length as usize) / R::SIZE;
    let mut postings = Vec::with_capacity(expected);

    let mut window = vec![0u8; READER_BUFFER_LEN];
    let mut partial: Vec<u8> = Vec::new();
    let mut remaining = length as usize;
    while remaining > 0 {
        let to_read = remaining.min(window.len());
        let read = reader
            .read(&mut window[..to_read])
            .map_err(|e| IndexError::io(path, "read", e))?;
        if read == 0 {
            break;
        }
        remaining -= read;

        partial.extend_from_slice(&window[..read]);
        let complete = (partial.len() / R::SIZE) * R::SIZE;
        for chunk in partial[..complete].chunks_exact(R::SIZE) {
            postings.push(R::read_from(chunk));
        }
        partial.drain(..complete);
    }

    if postings.len() != expected {
        return Err(IndexError::format(
            path,
            format!(
                "expected {} postings, decoded {}",
                expected,
                postings.len()
            ),
        ));
    }
    Ok(postings)
}
