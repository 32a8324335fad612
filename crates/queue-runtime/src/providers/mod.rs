//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueProvider`
//! trait for the supported backends.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryProvider;
pub use sqlite::SqliteProvider;
