use crate::application::source::SourceError;

pub fn map_sqlx_error(err: sqlx::Error) -> SourceError {
    match err {
        sqlx::Error::PoolTimedOut => SourceError::Timeout,
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to statement timeout") =>
        {
            SourceError::Timeout
        }
        other => SourceError::from_persistence(other),
    }
}

/// Recency ordering of `alias`, truncated to the millisecond score the cache
/// indexes use so both sides break ties on id alone.
pub fn recency_order(alias: &str) -> String {
    format!(" ORDER BY date_trunc('milliseconds', {alias}.created_at) DESC, {alias}.id DESC")
}

/// Keyset predicate for rows of `alias` ranked after the row of `table`
/// whose id is bound next; close with `)`.
pub fn recency_after(alias: &str, table: &str) -> String {
    format!(
        " AND (date_trunc('milliseconds', {alias}.created_at), {alias}.id) < \
         (SELECT date_trunc('milliseconds', l.created_at), l.id FROM {table} l WHERE l.id = "
    )
}

/// Row offset of a 1-based page; page `0` reads as the first page.
pub fn page_offset(page: u32, size: u32) -> i64 {
    i64::from(page.max(1) - 1) * i64::from(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_maps_to_timeout() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            SourceError::Timeout
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            SourceError::Persistence(_)
        ));
    }

    #[test]
    fn recency_ordering_truncates_to_milliseconds() {
        assert_eq!(
            recency_order("b"),
            " ORDER BY date_trunc('milliseconds', b.created_at) DESC, b.id DESC"
        );
        let after = recency_after("c", "comments");
        assert!(after.starts_with(" AND (date_trunc('milliseconds', c.created_at), c.id) < "));
        assert!(after.ends_with("FROM comments l WHERE l.id = "));
    }

    #[test]
    fn page_offset_is_one_based() {
        assert_eq!(page_offset(0, 20), 0);
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 20), 40);
    }
}
