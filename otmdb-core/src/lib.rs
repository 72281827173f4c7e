//! # OTMDB Core
//!
//! The catalogue engine:
//! - Tag graph with explicit/implicit parentage and category inference
//! - Video tagging with soft-delete and re-attachment
//! - Semitag suggestion and moderation
//! - Registration workflow, one instance per video source
//! - Timeline projection over the event log
//!
//! Every mutation runs in one write transaction that also appends its event
//! records. [`Otmdb`] is the operation surface over all services.

pub mod api;
pub mod error;
pub mod event_log;
pub mod models;
mod page;
pub mod registration;
pub mod semitag;
pub mod store;
pub mod tag_graph;
pub mod tagging;
pub mod timeline;
pub mod videos;

pub use api::{Otmdb, RegistrationDetail};
pub use error::{OperationError, QueryError, INTERNAL_SERVER_ERROR};
pub use models::{CategoryType, TagType, UserId, VideoSourceKind};
pub use store::{Store, WriteTx};
