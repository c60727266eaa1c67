//! The persisted, de-duplicated collection of categorized articles.
//!
//! # File format
//!
//! ```json
//! { "timestamp": "2025-05-06T20:30:00+00:00", "articles": [ ... ] }
//! ```
//!
//! Older runs wrote either a bare array or a wrapper keyed by
//! `categorization_timestamp`; both are read and rewritten in the format above
//! on the next flush.
//!
//! Writes go to a fixed sibling `<file>.tmp` which is synced and then renamed
//! over the target, so a crash mid-flush leaves the previous file intact and
//! the next flush overwrites any leftover temp file.

use crate::error::StoreError;
use crate::models::AnnotatedRecord;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Serialize)]
struct StoreFileOut<'a> {
    timestamp: String,
    articles: &'a [AnnotatedRecord],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoreFileIn {
    Wrapped {
        #[serde(
            default,
            alias = "categorization_timestamp",
            alias = "optimization_timestamp"
        )]
        #[allow(dead_code)]
        timestamp: Option<String>,
        articles: Vec<AnnotatedRecord>,
    },
    Legacy(Vec<AnnotatedRecord>),
}

/// Categorized articles in insertion order, indexed by dedup key.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    records: Vec<AnnotatedRecord>,
    index: HashMap<String, usize>,
}

impl ResultStore {
    /// An empty store that will flush to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Load prior results from `path`.
    ///
    /// A missing or empty file yields an empty store. Entries whose key was
    /// already seen earlier in the file are dropped with a warning.
    ///
    /// # Arguments
    /// * `path` - The result file; also where later flushes write.
    ///
    /// # Returns
    /// The store in file order, or [`StoreError::Corrupt`] when the file is
    /// not a result document. A corrupt file is never overwritten.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut store = Self::new(path);

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No prior results; starting with an empty store");
                return Ok(store);
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if raw.trim().is_empty() {
            warn!("Result file is empty; starting with an empty store");
            return Ok(store);
        }

        let records = match serde_json::from_str::<StoreFileIn>(&raw).map_err(|source| {
            StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            }
        })? {
            StoreFileIn::Wrapped { articles, .. } => articles,
            StoreFileIn::Legacy(articles) => {
                info!(
                    count = articles.len(),
                    "Migrating bare-array result file; it will be rewritten on the next flush"
                );
                articles
            }
        };

        let mut dropped = 0usize;
        for record in records {
            let key = record.dedup_key();
            if store.index.contains_key(&key) {
                dropped += 1;
                debug!(%key, "Dropping duplicate entry from result file");
                continue;
            }
            store.index.insert(key, store.records.len());
            store.records.push(record);
        }
        if dropped > 0 {
            warn!(dropped, "Result file contained duplicate keys");
        }

        info!(count = store.records.len(), "Loaded prior results");
        Ok(store)
    }

    /// The file this store flushes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a record with this dedup key is already stored.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&AnnotatedRecord> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn records(&self) -> &[AnnotatedRecord] {
        &self.records
    }

    /// Append a record. Callers check [`ResultStore::contains`] first; adding
    /// a key twice is a bug and reported as [`StoreError::DuplicateKey`].
    pub fn add(&mut self, record: AnnotatedRecord) -> Result<(), StoreError> {
        let key = record.dedup_key();
        if self.index.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key));
        }
        self.index.insert(key, self.records.len());
        self.records.push(record);
        Ok(())
    }

    /// Atomically replace the file on disk with the full in-memory contents.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), count = self.records.len()))]
    pub fn flush(&self) -> Result<(), StoreError> {
        let out = StoreFileOut {
            timestamp: Utc::now().to_rfc3339(),
            articles: &self.records,
        };
        let json = serde_json::to_vec_pretty(&out)?;

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = self.tmp_path();
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        };
        if let Err(e) = write() {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }

        debug!("Flushed result store");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
