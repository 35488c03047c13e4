//! On-disk layout for one shard.
//!
//! Files live at `{root}/full_text/{db_name}/{id}.{data,cache,cache.keys,keys,meta}`
//! where `root` is `data_roots[id % data_roots.len()]`. The production
//! deployment spreads shards over eight mount points this way.

use std::fs;
use std::path::PathBuf;

use crate::config;
use crate::error::{IndexError, Result};

#[derive(Debug, Clone)]
pub struct ShardFiles {
    db_name: String,
    id: u64,
}

impl ShardFiles {
    pub fn new(db_name: &str, id: u64) -> Self {
        ShardFiles {
            db_name: db_name.to_string(),
            id,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    fn dir(&self) -> PathBuf {
        let roots = &config::get().data_roots;
        let root = &roots[(self.id as usize) % roots.len()];
        root.join("full_text").join(&self.db_name)
    }

    pub fn data_path(&self) -> PathBuf {
        self.dir().join(format!("{}.data", self.id))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir().join(format!("{}.cache", self.id))
    }

    pub fn key_cache_path(&self) -> PathBuf {
        self.dir().join(format!("{}.cache.keys", self.id))
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir().join(format!("{}.keys", self.id))
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir().join(format!("{}.meta", self.id))
    }

    /// Create the `full_text/{db}` directory under every data root.
    pub fn create_directories(&self) -> Result<()> {
        for root in &config::get().data_roots {
            let dir = root.join("full_text").join(&self.db_name);
            fs::create_dir_all(&dir).map_err(|e| IndexError::io(dir, "create_dir_all", e))?;
        }
        Ok(())
    }

    /// Truncate both cache files to zero length.
    pub fn truncate_cache_files(&self) -> Result<()> {
        for path in [self.cache_path(), self.key_cache_path()] {
            fs::File::create(&path).map_err(|e| IndexError::io(path, "truncate", e))?;
        }
        Ok(())
    }

    /// Delete every file of this shard and re-create the directory tree.
    pub fn truncate_all(&self) -> Result<()> {
        self.create_directories()?;
        for path in [
            self.data_path(),
            self.cache_path(),
            self.key_cache_path(),
            self.key_path(),
            self.meta_path(),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(IndexError::io(path, "remove", e)),
            }
        }
        self.truncate_cache_files()
    }
}
