//! Hooks for database drivers and cache clients

pub mod cache;
pub mod sql;

pub use cache::CacheObserver;
pub use sql::{QueryObservation, SqlObserver};
