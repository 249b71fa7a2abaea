//! Write-Ahead Log (WAL) Module
//!
//! Makes heap transactions durable through append-only logging.
//!
//! ## Responsibilities
//! - Append one entry per committed heap transaction
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering against the heap image
//! - Crash recovery and replay
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//!
//! `Data` is the bincode encoding of `(Operation, timestamp)`; the CRC covers
//! `Data` only.

mod entry;
mod writer;
mod reader;
mod recovery;

pub use entry::{HeapWrite, Operation, WalEntry, HEADER_SIZE};
pub use writer::WalWriter;
pub use reader::{WalIterator, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};
