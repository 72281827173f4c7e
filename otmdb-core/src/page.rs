//! Keyset page fetching over `(created_at, id)`

use otmdb_common::pagination::{Connection, Cursor, PageQuery};
use otmdb_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

/// One paginated listing
///
/// `from_where` is the `FROM ... WHERE ...` tail shared by the count and the
/// row query; its `?` placeholders take `scope` in order.
pub(crate) struct PageSource<'a> {
    pub select: &'a str,
    pub from_where: &'a str,
    pub scope: Vec<String>,
    pub time_col: &'a str,
    pub id_col: &'a str,
}

pub(crate) async fn fetch_page<T>(
    conn: &mut SqliteConnection,
    source: PageSource<'_>,
    query: &PageQuery,
    map_row: impl Fn(&SqliteRow) -> Result<T>,
    cursor_of: impl Fn(&T) -> Cursor,
) -> Result<Connection<T>> {
    let count_sql = format!("SELECT COUNT(*) {}", source.from_where);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for value in &source.scope {
        count_query = count_query.bind(value.clone());
    }
    let total_count = count_query.fetch_one(&mut *conn).await?;

    let rows_sql = format!(
        "SELECT {} {}{} {}{}",
        source.select,
        source.from_where,
        query.keyset_sql(source.time_col, source.id_col),
        query.order_sql(source.time_col, source.id_col),
        query.limit_sql()
    );
    let mut rows_query = sqlx::query(&rows_sql);
    for value in &source.scope {
        rows_query = rows_query.bind(value.clone());
    }
    for (millis, id) in query.keyset_binds() {
        rows_query = rows_query.bind(millis).bind(millis).bind(id);
    }
    let rows = rows_query.fetch_all(&mut *conn).await?;

    let nodes = rows.iter().map(map_row).collect::<Result<Vec<T>>>()?;
    Ok(query.finish(nodes, total_count, cursor_of))
}
