//! Helpers for working around SQLite limits.

use ledgerkeep_core::Result;

/// Maximum number of ids bound in one `IN (...)` clause.
///
/// SQLite caps the number of bound parameters per statement (999 on older
/// builds). 500 leaves room for the other filters of the query.
pub const SQLITE_MAX_PARAMS_CHUNK: usize = 500;

/// Splits a slice into chunks that fit in one `IN (...)` clause.
pub fn chunk_for_sqlite<T>(items: &[T]) -> impl Iterator<Item = &[T]> {
    items.chunks(SQLITE_MAX_PARAMS_CHUNK)
}

/// Runs `load` once per chunk of `ids` and concatenates the results.
///
/// ```ignore
/// let items = load_chunked(&balance_item_ids, |chunk| {
///     balance_items::table
///         .filter(balance_items::id.eq_any(chunk))
///         .load::<BalanceItemDB>(&mut conn)
///         .into_core()
/// })?;
/// ```
pub fn load_chunked<T, R, F>(ids: &[T], mut load: F) -> Result<Vec<R>>
where
    F: FnMut(&[T]) -> Result<Vec<R>>,
{
    let mut loaded = Vec::new();
    for chunk in chunk_for_sqlite(ids) {
        loaded.extend(load(chunk)?);
    }
    Ok(loaded)
}
