//! # parley-store
//!
//! Asynchronous key-value storage consumed by the client state core.
//!
//! The core only ever talks to the [`KeyValueStore`] trait: per-key `get`,
//! multi-key `set` and whole-store `get_all`. Two backends are provided: an
//! in-memory map (tests, ephemeral sessions) and a SQLite file in which every
//! named store is a partition of one `kv` table.

pub mod database;
pub mod kv;
pub mod memory;
pub mod migrations;
pub mod sqlite;
pub mod storages;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use kv::{KeyValueStore, Records};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use storages::{EntityKind, StateStorages};
