//! Operation error plumbing
//!
//! Every fallible operation returns its own closed enum. The enums share the
//! [`OperationError`] trait so the operation surface can log and report them
//! uniformly: domain outcomes pass through with their code, internal failures
//! are logged and collapsed to [`INTERNAL_SERVER_ERROR`].

use otmdb_common::pagination::PaginationError;
use uuid::Uuid;

/// Code reported for every internal failure
pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";

/// Common view over per-operation error enums
pub trait OperationError: std::error::Error {
    /// Stable machine-readable code
    fn code(&self) -> &'static str;

    fn is_internal(&self) -> bool {
        self.code() == INTERNAL_SERVER_ERROR
    }
}

/// Implements `From<sqlx::Error>` through the enum's `Internal` variant
///
/// Lets operations run queries with `?` directly.
macro_rules! internal_from_sqlx {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<sqlx::Error> for $ty {
                fn from(e: sqlx::Error) -> Self {
                    Self::Internal(otmdb_common::Error::Database(e))
                }
            }
        )+
    };
}

pub(crate) use internal_from_sqlx;

/// Failure of a paginated or scoped read
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Pagination(#[from] PaginationError),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

internal_from_sqlx!(QueryError);

impl OperationError for QueryError {
    fn code(&self) -> &'static str {
        match self {
            QueryError::NotFound(_) => "NOT_FOUND",
            QueryError::Pagination(PaginationError::FirstAndLast) => "FIRST_AND_LAST",
            QueryError::Pagination(PaginationError::PageSizeTooLarge { .. }) => "PAGE_SIZE_TOO_LARGE",
            QueryError::Pagination(PaginationError::LimitRequired) => "LIMIT_REQUIRED",
            QueryError::Pagination(PaginationError::InvalidCursor(_)) => "INVALID_CURSOR",
            QueryError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}
