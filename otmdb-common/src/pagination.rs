//! Cursor pagination
//!
//! Relay-style connections over keyset queries. Every paginated listing
//! orders by `(created_at, id)`; the opaque cursor is that pair,
//! base64-encoded.
//!
//! - `first: N` takes N rows from the front in ordering order
//! - `last: N` takes N rows from the back
//! - `after` / `before` bound the window exclusively by cursor
//! - one of `first` / `last` is required, and together they are rejected

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page size ceiling used when the settings table has no override
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

/// Sort direction of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// The opposite direction
    pub fn reverse(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Raw pagination arguments as received from a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionArgs {
    pub first: Option<u32>,
    pub last: Option<u32>,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl ConnectionArgs {
    /// Take `n` rows from the front
    pub fn first(n: u32) -> Self {
        Self {
            first: Some(n),
            ..Self::default()
        }
    }

    /// Take `n` rows from the back
    pub fn last(n: u32) -> Self {
        Self {
            last: Some(n),
            ..Self::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }
}

/// Pagination argument errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("`first` and `last` must not be combined")]
    FirstAndLast,

    #[error("page size {requested} exceeds maximum {max}")]
    PageSizeTooLarge { requested: u32, max: u32 },

    #[error("`first` or `last` is required")]
    LimitRequired,

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

/// Keyset position of one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: i64,
    pub id: String,
}

impl Cursor {
    pub fn new(created_at: i64, id: impl Into<String>) -> Self {
        Self {
            created_at,
            id: id.into(),
        }
    }

    /// Opaque string form handed to callers
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.created_at, self.id))
    }

    /// Parse an opaque cursor produced by [`Cursor::encode`]
    pub fn decode(raw: &str) -> Result<Self, PaginationError> {
        let invalid = || PaginationError::InvalidCursor(raw.to_string());

        let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (created_at, id) = text.split_once(':').ok_or_else(invalid)?;
        let created_at = created_at.parse::<i64>().map_err(|_| invalid())?;
        if id.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(created_at, id))
    }
}

/// One node of a connection with its cursor
#[derive(Debug, Clone, Serialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

/// Relay page info
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// A page of results
#[derive(Debug, Clone, Serialize)]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
    pub total_count: i64,
}

impl<T> Connection<T> {
    /// Nodes in page order
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }

    /// Convert every node, keeping cursors and page info
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Connection<U> {
        Connection {
            edges: self
                .edges
                .into_iter()
                .map(|e| Edge {
                    cursor: e.cursor,
                    node: f(e.node),
                })
                .collect(),
            page_info: self.page_info,
            total_count: self.total_count,
        }
    }
}

/// Validated pagination request, ready to be spliced into SQL
///
/// Usage at a call site:
///
/// ```ignore
/// let sql = format!(
///     "SELECT ... FROM tags WHERE 1 = 1{} {}{}",
///     page.keyset_sql("created_at", "id"),
///     page.order_sql("created_at", "id"),
///     page.limit_sql(),
/// );
/// let mut query = sqlx::query(&sql);
/// for (millis, id) in page.keyset_binds() {
///     query = query.bind(millis).bind(millis).bind(id);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PageQuery {
    order: SortOrder,
    after: Option<Cursor>,
    before: Option<Cursor>,
    limit: u32,
    from_back: bool,
}

impl PageQuery {
    /// Validate raw arguments
    pub fn new(
        args: &ConnectionArgs,
        order: SortOrder,
        max_page_size: u32,
    ) -> Result<Self, PaginationError> {
        let (limit, from_back) = match (args.first, args.last) {
            (Some(_), Some(_)) => return Err(PaginationError::FirstAndLast),
            (Some(n), None) => (n, false),
            (None, Some(n)) => (n, true),
            (None, None) => return Err(PaginationError::LimitRequired),
        };
        if limit > max_page_size {
            return Err(PaginationError::PageSizeTooLarge {
                requested: limit,
                max: max_page_size,
            });
        }

        let after = args.after.as_deref().map(Cursor::decode).transpose()?;
        let before = args.before.as_deref().map(Cursor::decode).transpose()?;

        Ok(Self {
            order,
            after,
            before,
            limit,
            from_back,
        })
    }

    /// Additional `AND` predicates bounding the window by cursor
    ///
    /// Each bound uses three placeholders: `created_at`, `created_at`, `id`.
    pub fn keyset_sql(&self, time_col: &str, id_col: &str) -> String {
        let mut sql = String::new();
        let (after_cmp, before_cmp) = match self.order {
            SortOrder::Asc => (">", "<"),
            SortOrder::Desc => ("<", ">"),
        };
        if self.after.is_some() {
            sql.push_str(&format!(
                " AND ({t} {c} ? OR ({t} = ? AND {i} {c} ?))",
                t = time_col,
                i = id_col,
                c = after_cmp
            ));
        }
        if self.before.is_some() {
            sql.push_str(&format!(
                " AND ({t} {c} ? OR ({t} = ? AND {i} {c} ?))",
                t = time_col,
                i = id_col,
                c = before_cmp
            ));
        }
        sql
    }

    /// Values for the placeholders of [`PageQuery::keyset_sql`], in order
    pub fn keyset_binds(&self) -> Vec<(i64, String)> {
        self.after
            .iter()
            .chain(self.before.iter())
            .map(|c| (c.created_at, c.id.clone()))
            .collect()
    }

    /// `ORDER BY` clause in fetch direction
    pub fn order_sql(&self, time_col: &str, id_col: &str) -> String {
        let direction = if self.from_back {
            self.order.reverse()
        } else {
            self.order
        };
        format!(
            "ORDER BY {t} {d}, {i} {d}",
            t = time_col,
            i = id_col,
            d = direction.sql()
        )
    }

    /// `LIMIT` clause fetching one extra row to detect further pages
    pub fn limit_sql(&self) -> String {
        format!(" LIMIT {}", u64::from(self.limit) + 1)
    }

    /// Requested page size
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Assemble the connection from rows fetched with this query
    pub fn finish<T>(
        &self,
        mut rows: Vec<T>,
        total_count: i64,
        cursor_of: impl Fn(&T) -> Cursor,
    ) -> Connection<T> {
        let has_more = rows.len() > self.limit as usize;
        rows.truncate(self.limit as usize);
        if self.from_back {
            rows.reverse();
        }

        let (has_previous_page, has_next_page) = if self.from_back {
            (has_more, self.before.is_some())
        } else {
            (self.after.is_some(), has_more)
        };

        let edges: Vec<Edge<T>> = rows
            .into_iter()
            .map(|node| Edge {
                cursor: cursor_of(&node).encode(),
                node,
            })
            .collect();

        let page_info = PageInfo {
            has_next_page,
            has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        };

        Connection {
            edges,
            page_info,
            total_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: i64) -> Cursor {
        Cursor::new(n, format!("id-{n}"))
    }

    #[test]
    fn test_cursor_roundtrip() {
        let c = Cursor::new(1_700_000_000_123, "5f0c1f1e-0000-4000-8000-000000000001");
        assert_eq!(Cursor::decode(&c.encode()).unwrap(), c);
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert!(matches!(
            Cursor::decode("%%%"),
            Err(PaginationError::InvalidCursor(_))
        ));
        let no_colon = URL_SAFE_NO_PAD.encode("12345");
        assert!(Cursor::decode(&no_colon).is_err());
        let bad_time = URL_SAFE_NO_PAD.encode("abc:id");
        assert!(Cursor::decode(&bad_time).is_err());
        let empty_id = URL_SAFE_NO_PAD.encode("12:");
        assert!(Cursor::decode(&empty_id).is_err());
    }

    #[test]
    fn test_first_and_last_rejected() {
        let args = ConnectionArgs {
            first: Some(1),
            last: Some(1),
            ..Default::default()
        };
        assert_eq!(
            PageQuery::new(&args, SortOrder::Asc, 100).unwrap_err(),
            PaginationError::FirstAndLast
        );
    }

    #[test]
    fn test_page_size_limit() {
        let err = PageQuery::new(&ConnectionArgs::first(101), SortOrder::Asc, 100).unwrap_err();
        assert_eq!(
            err,
            PaginationError::PageSizeTooLarge {
                requested: 101,
                max: 100
            }
        );
        assert!(PageQuery::new(&ConnectionArgs::last(100), SortOrder::Asc, 100).is_ok());
    }

    #[test]
    fn test_limit_required() {
        assert_eq!(
            PageQuery::new(&ConnectionArgs::default(), SortOrder::Asc, 100).unwrap_err(),
            PaginationError::LimitRequired
        );
        let cursor_only = ConnectionArgs::default().after(key(1).encode());
        assert_eq!(
            PageQuery::new(&cursor_only, SortOrder::Desc, 100).unwrap_err(),
            PaginationError::LimitRequired
        );
    }

    #[test]
    fn test_keyset_sql_ascending() {
        let args = ConnectionArgs::first(2)
            .after(key(5).encode())
            .before(key(9).encode());
        let page = PageQuery::new(&args, SortOrder::Asc, 100).unwrap();
        assert_eq!(
            page.keyset_sql("t.created_at", "t.id"),
            " AND (t.created_at > ? OR (t.created_at = ? AND t.id > ?)) AND (t.created_at < ? OR (t.created_at = ? AND t.id < ?))"
        );
        assert_eq!(page.keyset_binds(), vec![(5, "id-5".to_string()), (9, "id-9".to_string())]);
        assert_eq!(page.order_sql("t.created_at", "t.id"), "ORDER BY t.created_at ASC, t.id ASC");
        assert_eq!(page.limit_sql(), " LIMIT 3");
    }

    #[test]
    fn test_last_fetches_in_reverse() {
        let page = PageQuery::new(&ConnectionArgs::last(2), SortOrder::Asc, 100).unwrap();
        assert_eq!(page.order_sql("created_at", "id"), "ORDER BY created_at DESC, id DESC");
        assert_eq!(page.keyset_sql("created_at", "id"), "");
    }

    #[test]
    fn test_descending_after_uses_less_than() {
        let args = ConnectionArgs::first(1).after(key(3).encode());
        let page = PageQuery::new(&args, SortOrder::Desc, 100).unwrap();
        assert_eq!(
            page.keyset_sql("created_at", "id"),
            " AND (created_at < ? OR (created_at = ? AND id < ?))"
        );
    }

    #[test]
    fn test_finish_first_page() {
        let page = PageQuery::new(&ConnectionArgs::first(2), SortOrder::Asc, 100).unwrap();
        // Query fetched limit + 1 rows
        let conn = page.finish(vec![1i64, 2, 3], 5, |n| key(*n));
        assert_eq!(conn.nodes().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(conn.page_info.has_next_page);
        assert!(!conn.page_info.has_previous_page);
        assert_eq!(conn.page_info.end_cursor, Some(key(2).encode()));
        assert_eq!(conn.total_count, 5);
    }

    #[test]
    fn test_finish_last_page_restores_order() {
        let page = PageQuery::new(&ConnectionArgs::last(2), SortOrder::Asc, 100).unwrap();
        // Rows arrive in reverse fetch order: 5, 4, (3)
        let conn = page.finish(vec![5i64, 4, 3], 5, |n| key(*n));
        assert_eq!(conn.nodes().copied().collect::<Vec<_>>(), vec![4, 5]);
        assert!(conn.page_info.has_previous_page);
        assert!(!conn.page_info.has_next_page);
        assert_eq!(conn.page_info.start_cursor, Some(key(4).encode()));
    }

    #[test]
    fn test_finish_exact_page_has_no_next() {
        let page = PageQuery::new(&ConnectionArgs::first(3), SortOrder::Desc, 100).unwrap();
        assert_eq!(page.limit_sql(), " LIMIT 4");
        let conn = page.finish(vec![3i64, 2, 1], 3, |n| key(*n));
        assert_eq!(conn.edges.len(), 3);
        assert!(!conn.page_info.has_next_page);
        assert!(!conn.page_info.has_previous_page);
    }

    #[test]
    fn test_finish_empty() {
        let page = PageQuery::new(&ConnectionArgs::first(10), SortOrder::Asc, 100).unwrap();
        let conn = page.finish(Vec::<i64>::new(), 0, |n| key(*n));
        assert!(conn.edges.is_empty());
        assert_eq!(conn.page_info, PageInfo::default());
    }
}
