//! # Repository Module
//!
//! Database repository implementations for Courier.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Upload coordinator                                                    │
//! │       │                                                                 │
//! │       │  db.record_queue().first()                                     │
//! │       ▼                                                                 │
//! │  RecordQueueRepository                                                 │
//! │  ├── push(&self, instance)                                             │
//! │  ├── first(&self)                                                      │
//! │  ├── update_instance(&self, key, instance)                             │
//! │  ├── remove(&self, key)                                                │
//! │  └── clear(&self)                                                      │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`queue::RecordQueueRepository`] - Durable upload queue

pub mod queue;
