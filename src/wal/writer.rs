//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{CellarError, Result};

use super::{Operation, WalEntry, WalReader};

/// Writes entries to the WAL file
pub struct WalWriter {
    /// Location of the log (for diagnostics)
    path: PathBuf,

    /// Buffered append handle
    writer: BufWriter<File>,

    /// LSN assigned to the next appended entry
    next_lsn: u64,

    /// When to fsync
    sync_strategy: WalSyncStrategy,

    /// Entries appended since the last fsync
    uncommitted: usize,
}

impl WalWriter {
    /// Open or create a WAL file, continuing after its last valid LSN
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let mut last_lsn = 0;
        if path.exists() {
            for entry in WalReader::open(path)?.entries() {
                match entry {
                    Ok(entry) => last_lsn = entry.lsn,
                    Err(_) => break,
                }
            }
        }

        Self::open_at(path, sync_strategy, last_lsn + 1)
    }

    /// Open or create a WAL file, numbering new entries from `next_lsn`
    pub fn open_at(path: &Path, sync_strategy: WalSyncStrategy, next_lsn: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            next_lsn: next_lsn.max(1),
            sync_strategy,
            uncommitted: 0,
        })
    }

    /// Append an operation to the WAL, returning its LSN
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        let lsn = self.next_lsn;
        let bytes = WalEntry::new(lsn, operation).serialize()?;

        self.writer
            .write_all(&bytes)
            .and_then(|_| self.writer.flush())
            .map_err(|e| {
                CellarError::WalWrite(format!("{}: append LSN {}: {}", self.path.display(), lsn, e))
            })?;

        self.next_lsn += 1;
        self.uncommitted += 1;

        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.uncommitted >= count,
        };
        if should_sync {
            self.sync()?;
        }

        Ok(lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.uncommitted = 0;
        Ok(())
    }

    /// Drop every entry (they are covered by a checkpoint); LSNs keep counting
    pub fn truncate(&mut self) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.set_len(0)?;
        file.sync_all()?;
        self.uncommitted = 0;
        Ok(())
    }

    /// Get the LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Entries written but not yet fsynced
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
