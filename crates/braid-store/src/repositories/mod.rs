//! Repository layer: stateless per-table CRUD.
//!
//! Every repository method takes `&Connection`; transaction scoping is the
//! caller's responsibility (see [`crate::LocalStore`], whose write methods
//! wrap repository calls in a single transaction).

pub mod deletion;
pub mod message;
pub mod meta;
pub mod session;

pub use deletion::{DeletionRepo, PendingDeletion};
pub use message::MessageRepo;
pub use meta::MetaRepo;
pub use session::SessionRepo;
