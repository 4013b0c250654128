//! Shared contracts for the messaging/coordination runtime.
//!
//! This crate defines the cross-crate contracts implemented by `fanout-postgres` and driven by
//! `fanout-dispatcher`: outbox/inbox stores, the lease store, store discovery, and the handler
//! capability. It has no direct dependency on any particular wire transport and carries only the
//! `sqlx::Error` conversion needed to let store implementations report database failures through
//! a single crate-wide error type.

mod error;

pub mod clock;
pub mod discovery;
pub mod handler;
pub mod inbox;
pub mod join;
pub mod lease;
pub mod outbox;
pub mod owner;

pub use error::{Error, Result};
pub use owner::OwnerToken;
