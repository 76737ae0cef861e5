//! # braid-sync
//!
//! The sync engine of the Braid conversation store.
//!
//! Reconciles the local store against one remote replica per pass:
//!
//! - **External seams**: [`RemoteGateway`], [`CryptoProvider`], and
//!   [`AttachmentStore`] traits — transport, payload encryption, and
//!   attachment binaries are consumed as opaque capabilities
//! - **Wire model**: sealed (encrypted) entity envelopes and the tagged
//!   record union they decrypt into
//! - **Engine**: the `Idle -> Pulling -> Applying -> Pushing -> Idle` pass,
//!   paginated diff pulls, edit-plan materialization via the resolver,
//!   attachment-gated pushes, and the tombstone flush
//!
//! One pass runs at a time; a trigger while busy is a no-op. Per-entity
//! failures are logged and skipped; an unauthorized response or a
//! cryptographic integrity failure aborts the whole pass.

#![deny(unsafe_code)]

pub mod attachments;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod wire;

pub use attachments::{AttachmentError, AttachmentStore};
pub use config::SyncConfig;
pub use crypto::{CryptoError, CryptoProvider, Sealed};
pub use engine::{SyncEngine, SyncReport};
pub use errors::{Result, SyncError};
pub use gateway::{DiffPage, GatewayError, RemoteGateway};
pub use wire::{RemoteMessage, RemoteRecord, RemoteSession, SealedEntity};
