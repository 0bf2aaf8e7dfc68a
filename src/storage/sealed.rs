// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sealed state snapshots.
//!
//! ## Security Note
//!
//! This module uses **standard filesystem I/O**. The deployment mounts the
//! data root as the host's encrypted filesystem; the kernel never performs
//! storage cryptography itself. Confidentiality, integrity, and tamper
//! resistance of files under the root are the host's responsibility.
//!
//! The full kernel state is serialized to a single JSON snapshot after
//! every committed mutating dispatch and loaded once at boot. Writes go
//! through a temp file plus rename, so a crash mid-write leaves the
//! previous snapshot intact.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for sealed-storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("history database error: {0}")]
    History(#[from] super::history::HistoryError),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Layout of the sealed data root.
#[derive(Debug, Clone)]
pub struct SealedDir {
    root: PathBuf,
}

impl SealedDir {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the kernel-state snapshot.
    pub fn snapshot(&self) -> PathBuf {
        self.root.join("state.json")
    }

    /// Path of the append-only history database.
    pub fn history(&self) -> PathBuf {
        self.root.join("history.redb")
    }

    /// Create the root directory if missing.
    pub fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Load the snapshot, or `None` when no snapshot exists yet.
    pub fn read_snapshot<T: DeserializeOwned>(&self) -> StorageResult<Option<T>> {
        let path = self.snapshot();
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Replace the snapshot atomically.
    pub fn write_snapshot<T: Serialize>(&self, state: &T) -> StorageResult<()> {
        let path = self.snapshot();
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, state)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
