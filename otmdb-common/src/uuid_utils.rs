//! UUID utilities

use crate::{Error, Result};
use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse UUID from string
pub fn parse(s: &str) -> std::result::Result<Uuid, uuid::Error> {
    Uuid::parse_str(s)
}

/// Parse a UUID read back from a TEXT column
///
/// A malformed id in the database is a broken invariant, not user input,
/// so it surfaces as [`Error::Internal`].
pub fn parse_column(column: &str, value: &str) -> Result<Uuid> {
    parse(value).map_err(|e| Error::Internal(format!("malformed uuid in column {column}: {value:?} ({e})")))
}
