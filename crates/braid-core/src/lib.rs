//! # braid-core
//!
//! Foundation types and pure algorithms for the Braid sync core.
//!
//! This crate provides the shared vocabulary the store and sync engine
//! depend on:
//!
//! - **Branded IDs**: `MessageId`, `SessionId`, `AttachmentId` as newtypes
//! - **Data model**: `Message`, `Session`, `AttachmentRef` and their enums
//! - **Total order**: `created_at` ascending, then id lexicographic
//! - **DAG utilities**: children map, head detection, cycle-guarded
//!   ancestry, duplicate suppression, safe-send ordering
//! - **Conflict resolver**: classifies a (local, remote) pair of histories
//!   as no-change / fast-forward / divergent and emits the edit plan
//!
//! Everything here is pure and synchronous; persistence and transport live
//! in `braid-store` and `braid-sync`.

#![deny(unsafe_code)]

pub mod dag;
pub mod ids;
pub mod resolve;
pub mod types;

pub use dag::{MessageIndex, children_map, dedupe, heads, is_ancestor, is_duplicate, sync_order};
pub use ids::{AttachmentId, MessageId, SessionId};
pub use resolve::{Resolution, resolve};
pub use types::{
    AttachmentRef, EntityKind, Message, Sender, Session, SyncState, UploadState, order_key,
    sort_by_order,
};
