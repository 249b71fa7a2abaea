//! # Cellar
//!
//! The container catalog and transaction-epoch layer of a persistent-memory
//! object store:
//! - A durable catalog mapping container UUIDs to container descriptors
//! - A handle cache keeping one in-memory object per open container
//! - Per-container transaction bookkeeping and epoch boundaries
//! - Crash-consistent create / open / close / destroy / upgrade
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Pool                               │
//! │         (lifecycle orchestration, telemetry, upgrade)        │
//! └──────────┬──────────────────────┬───────────────────────────┘
//!            │                      │
//!            ▼                      ▼
//!   ┌─────────────────┐    ┌─────────────────┐    ┌───────────┐
//!   │  HandleCache    │───►│   Container     │───►│    DTX    │
//!   │ (weak, per-key) │    │ (boundary, objs)│    │ LRU + idx │
//!   └─────────────────┘    └────────┬────────┘    └───────────┘
//!                                   │
//!            ┌──────────────────────┼─────────────────────┐
//!            ▼                      ▼                     ▼
//!   ┌─────────────────┐    ┌─────────────────┐    ┌──────────────┐
//!   │    Catalog      │    │     B+tree      │    │      GC      │
//!   │ (ContainerDf)   │───►│  (RecordClass)  │    │ (bins,worker)│
//!   └─────────────────┘    └────────┬────────┘    └──────┬───────┘
//!                                   ▼                    │
//!                          ┌─────────────────┐           │
//!                          │      Heap       │◄──────────┘
//!                          │ (Tx, image, WAL)│
//!                          └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod heap;
pub mod btree;
pub mod catalog;
pub mod dtx;
pub mod gc;
pub mod ts;
pub mod hlc;
pub mod space;
pub mod container;
pub mod pool;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CellarError, Result};
pub use config::Config;
pub use container::{ContainerHandle, ContainerInfo, ContainerRef};
pub use dtx::{DtxId, DtxStatus};
pub use heap::FailPoint;
pub use pool::{Pool, PoolStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Cellar
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
