//! Heap image (checkpoint) file
//!
//! ## File Format
//! ```text
//! ┌──────────┬────────────┬──────────┬──────────────┬─────────┬─────────┐
//! │Magic (4) │Version (2) │ LSN (8)  │ Payload Len  │ Payload │ CRC (4) │
//! │  "CLRH"  │            │          │     (8)      │ bincode │         │
//! └──────────┴────────────┴──────────┴──────────────┴─────────┴─────────┘
//! ```
//!
//! `LSN` is the last WAL entry folded into the image; replay starts after it.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CellarError, Result};

use super::DurableObject;

pub(crate) const MAGIC: &[u8; 4] = b"CLRH";
pub(crate) const VERSION: u16 = 1;
const HEADER_SIZE: usize = 4 + 2 + 8 + 8;
const FOOTER_SIZE: usize = 4;

/// Everything needed to rebuild the heap without the WAL
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct HeapImage {
    pub lsn: u64,
    pub next_offset: u64,
    pub root: u64,
    pub objects: Vec<(u64, DurableObject)>,
}

impl HeapImage {
    /// Write atomically: temp file, fsync, rename
    pub fn write(&self, path: &Path) -> Result<()> {
        let payload = bincode::serialize(&(self.next_offset, self.root, &self.objects))?;
        let tmp = path.with_extension("img.tmp");

        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(MAGIC)?;
            writer.write_all(&VERSION.to_le_bytes())?;
            writer.write_all(&self.lsn.to_le_bytes())?;
            writer.write_all(&(payload.len() as u64).to_le_bytes())?;
            writer.write_all(&payload)?;
            writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp, path)?;
        if let Some(dir) = path.parent() {
            // Persist the rename itself
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    /// Load and validate an image
    pub fn read(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(CellarError::StorageFault(format!(
                "heap image {} too short: {} bytes",
                path.display(),
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(CellarError::StorageFault(format!(
                "invalid heap image magic: expected CLRH, got {:?}",
                &bytes[0..4]
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(CellarError::StorageFault(format!(
                "unsupported heap image version: {}",
                version
            )));
        }

        let lsn = read_u64(&bytes[6..14]);
        let truncated = || CellarError::StorageFault("heap image payload truncated".to_string());
        let payload_len = usize::try_from(read_u64(&bytes[14..22])).map_err(|_| truncated())?;
        let payload_end = HEADER_SIZE.checked_add(payload_len).ok_or_else(truncated)?;
        let footer_end = payload_end.checked_add(FOOTER_SIZE).ok_or_else(truncated)?;
        let payload = bytes.get(HEADER_SIZE..payload_end).ok_or_else(truncated)?;
        let footer = bytes
            .get(payload_end..footer_end)
            .ok_or_else(|| CellarError::StorageFault("heap image footer missing".to_string()))?;

        let stored = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        if stored != crc32fast::hash(payload) {
            return Err(CellarError::StorageFault(format!(
                "heap image {} checksum mismatch",
                path.display()
            )));
        }

        let (next_offset, root, objects): (u64, u64, Vec<(u64, DurableObject)>) =
            bincode::deserialize(payload)?;

        Ok(Self {
            lsn,
            next_offset,
            root,
            objects,
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}
