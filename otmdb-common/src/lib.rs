//! # OTMDB Common Library
//!
//! Shared code for the OTMDB catalogue crates including:
//! - Database initialization, schema and migrations
//! - Event records and the EventBus notification sink
//! - Bootstrap configuration loading
//! - Cursor pagination
//! - Time and UUID helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod pagination;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use events::{EntityKind, EventBus, EventRecord};
