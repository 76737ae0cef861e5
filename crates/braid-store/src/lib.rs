//! # braid-store
//!
//! Durable local store for the Braid sync core, backed by `SQLite`.
//!
//! Responsibilities:
//!
//! - **Connection pool**: `r2d2` + `rusqlite` with WAL mode and foreign keys
//! - **Migrations**: version-tracked SQL schema evolution
//! - **Repositories**: stateless per-table CRUD taking `&Connection`
//! - **`LocalStore`**: transactional facade the sync engine and UI call into,
//!   including edit-plan materialization (fast-forward append, branch
//!   creation) and the pending-deletion queue
//!
//! The store serializes its own writes (every write method runs inside a
//! single transaction); callers never observe partial state.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repositories;
mod store;

pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use errors::{Result, StoreError};
pub use store::LocalStore;
