//! Harvester Core Library
//!
//! Coordinates many independent worker processes that download options
//! greeks history, one (symbol, expiration, date) task at a time, through a
//! shared SQLite task catalog. The store's exclusive write lock is the only
//! synchronization primitive: no broker, no heartbeats.
//!
//! # Architecture
//!
//! - [`db`] - Database connection, schema, and exclusive write transactions
//! - [`catalog`] - Task records: idempotent creation, lookup, counts, operator resets
//! - [`lease`] - Atomic claim/complete/fail transitions and stuck-lease reclaim
//! - [`worker`] - The claim, fetch, store, report loop
//! - [`retrieval`] - Fetching payloads and listing expirations/dates (ThetaData terminal client)
//! - [`storage`] - Writing artifacts atomically to the filesystem

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod db;
pub mod lease;
pub mod retrieval;
pub mod storage;
pub mod worker;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogError, DbErrorKind, StatusCounts, Task, TaskKey, TaskStatus};
pub use db::{Database, DatabaseOptions, DbError};
pub use lease::{LeaseCoordinator, LeaseRepository, Reclaimer};
pub use retrieval::{Discovery, Retrieval, RetrievalError, ThetaClient};
pub use storage::{FsStorageWriter, StorageError, StorageWriter};
pub use worker::{TaskFailure, WorkOutcome, Worker, WorkerConfig, WorkerError, WorkerStats};
