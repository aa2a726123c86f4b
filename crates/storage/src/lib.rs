//! Persistence for the Cortex knowledge store.
//!
//! This crate provides a trait-based storage interface with an atomic
//! JSON snapshot file as the reference implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;

pub use trait_::{DocumentStorage, StorageError, Result};
pub use json_storage::{JsonFileStorage, StoreSnapshot, SNAPSHOT_VERSION};
