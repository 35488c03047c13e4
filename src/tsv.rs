//! Tab-separated input files, plain or gzipped.
//!
//! Crawl archives arrive as gzipped TSV where column 0 is a URL and the
//! remaining columns carry text. Batch listings (`warc.paths.gz`) are
//! single-column files read with [`TsvReader::read_column_into`].

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

/// Line reader over a TSV file. Transparently decompresses `.gz` paths.
pub struct TsvReader {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
}

impl std::fmt::Debug for TsvReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsvReader").field("path", &self.path).finish()
    }
}

impl TsvReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| IndexError::io(path, "open", e))?;

        let reader: Box<dyn BufRead + Send> =
            if path.extension().is_some_and(|ext| ext == "gz") {
                Box::new(BufReader::new(MultiGzDecoder::new(file)))
            } else {
                Box::new(BufReader::new(file))
            };

        Ok(TsvReader {
            path: path.to_path_buf(),
            reader,
        })
    }

    /// Iterate lines, skipping empty ones.
    pub fn lines(self) -> impl Iterator<Item = Result<String>> {
        let path = self.path;
        self.reader
            .lines()
            .map(move |line| line.map_err(|e| IndexError::io(path.clone(), "read", e)))
            .filter(|line| !matches!(line, Ok(l) if l.is_empty()))
    }

    /// Read one column into `container`, up to `limit` rows starting at
    /// `offset` (0 and 0 mean "everything"). Returns the number of rows read.
    pub fn read_column_into(
        self,
        column: usize,
        container: &mut Vec<String>,
        limit: usize,
        offset: usize,
    ) -> Result<usize> {
        let mut read = 0usize;
        for (row, line) in self.lines().enumerate() {
            let line = line?;
            if row < offset {
                continue;
            }
            if limit > 0 && read >= limit {
                break;
            }
            if let Some(value) = line.split('\t').nth(column) {
                container.push(value.to_string());
                read += 1;
            }
        }
        Ok(read)
    }
}

/// Split a TSV line into columns.
pub fn columns(line: &str) -> Vec<&str> {
    line.split('\t').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_plain_read_column() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.tsv");
        std::fs::write(&path, "a\t1\nb\t2\nc\t3\n").unwrap();

        let mut col = Vec::new();
        let n = TsvReader::open(&path)?.read_column_into(1, &mut col, 0, 0)?;
        assert_eq!(n, 3);
        assert_eq!(col, vec!["1", "2", "3"]);
        Ok(())
    }

    #[test]
    fn test_limit_and_offset() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.tsv");
        std::fs::write(&path, "a\nb\nc\nd\ne\n").unwrap();

        let mut col = Vec::new();
        let n = TsvReader::open(&path)?.read_column_into(0, &mut col, 2, 1)?;
        assert_eq!(n, 2);
        assert_eq!(col, vec!["b", "c"]);
        Ok(())
    }

    #[test]
    fn test_gzipped_input() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.tsv.gz");
        let file = File::create(&path).unwrap();
        let mut enc = GzEncoder::new(file, Compression::default());
        enc.write_all(b"x\t10\ny\t20\n").unwrap();
        enc.finish().unwrap();

        let mut col = Vec::new();
        TsvReader::open(&path)?.read_column_into(0, &mut col, 0, 0)?;
        assert_eq!(col, vec!["x", "y"]);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = TsvReader::open(Path::new("/nonexistent/file.tsv")).unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }));
    }
}
