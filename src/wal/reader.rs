//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{CellarError, Result};

use super::{WalEntry, HEADER_SIZE};

/// Outcome of reading one frame
pub(crate) enum Frame {
    /// A complete, checksummed entry
    Entry(WalEntry),

    /// Clean end of file
    Eof,

    /// File ends inside a frame (torn write)
    Partial,

    /// Complete frame whose checksum or payload is bad
    Corrupt(CellarError),
}

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,

    /// Byte offset of the next frame
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at a clean end of file; torn or corrupt frames are
    /// reported as `WalCorruption`.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        match self.read_frame()? {
            Frame::Entry(entry) => Ok(Some(entry)),
            Frame::Eof => Ok(None),
            Frame::Partial => Err(CellarError::WalCorruption(format!(
                "partial entry at offset {}",
                self.position
            ))),
            Frame::Corrupt(e) => Err(e),
        }
    }

    /// Iterate over all valid entries; stops after the first error
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Byte offset just past the last complete entry returned
    pub fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(Frame::Eof),
            n if n < HEADER_SIZE => return Ok(Frame::Partial),
            _ => {}
        }

        let (lsn, crc, len) = WalEntry::parse_header(&header);
        let mut data = vec![0u8; len];
        if read_full(&mut self.reader, &mut data)? < len {
            return Ok(Frame::Partial);
        }

        match WalEntry::decode_payload(lsn, crc, &data) {
            Ok(entry) => {
                self.position += (HEADER_SIZE + len) as u64;
                Ok(Frame::Entry(entry))
            }
            Err(e) => Ok(Frame::Corrupt(e)),
        }
    }
}

/// Read until `buf` is full or EOF; returns bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Iterator over WAL entries
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
