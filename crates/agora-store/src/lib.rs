//! # agora-store
//!
//! Local SQLite persistence for the Agora reference hub.
//!
//! Documents of every collection live in one table, keyed by
//! `(collection, id)`, with their JSON body stored as text. The crate exposes
//! a synchronous `Database` handle that wraps a `rusqlite::Connection` and
//! provides typed helpers for reading and writing documents.

pub mod database;
pub mod documents;
pub mod migrations;

mod error;

pub use database::Database;
pub use documents::StoredDocument;
pub use error::{Result, StoreError};
