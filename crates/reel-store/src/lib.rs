//! Durable pipeline state.
//!
//! The whole table of [`VideoRecord`](reel_models::VideoRecord)s lives in one
//! human-editable JSON document. Every read reloads the document and every
//! update is a full read-modify-write.

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{StateStore, Table};
