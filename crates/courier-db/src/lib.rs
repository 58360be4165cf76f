//! # courier-db: Local Persistence for Courier
//!
//! This crate provides everything Courier stores on the device: the durable
//! queue of instrument instances awaiting upload, and the identifier map
//! that hands out per-instrument sequence numbers.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Courier Data Flow                                │
//! │                                                                         │
//! │  courier-sync (coordinator / allocator actors)                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    courier-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Map file    │  │   │
//! │  │   │   (pool.rs)   │    │  (queue.rs)   │    │ (map_file.rs)│  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ RecordQueue-  │    │ write temp → │  │   │
//! │  │   │ + migrations  │    │ Repository    │    │ fsync →      │  │   │
//! │  │   │               │    │               │    │ rename       │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                              │                  │
//! │       ▼                                              ▼                  │
//! │   <data_dir>/queue.db                     <data_dir>/identifiers.json  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Record queue repository
//! - [`map_file`] - Atomic identifier map persistence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/queue.db")).await?;
//! let element = db.record_queue().push(&instance).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod map_file;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use map_file::IdentifierMapFile;
pub use pool::{Database, DbConfig};

pub use repository::queue::{QueuedRecord, RecordQueueRepository};
