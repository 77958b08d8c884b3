use chrono::{DateTime, Duration, Utc};

use crate::store::SearchQuery;

/// A query is due iff it is active and its scan interval has elapsed since
/// the last scan (or it has never been scanned). Pure over the fetched row.
pub fn is_due(query: &SearchQuery, now: DateTime<Utc>) -> bool {
    if !query.active {
        return false;
    }
    match query.last_scanned_at {
        None => true,
        Some(last) => now >= last + Duration::seconds(query.scan_interval_secs),
    }
}

/// Filter to due queries and order them: never-scanned first, then oldest
/// scan first. Starved queries surface before recently-served ones.
pub fn due_queries(queries: Vec<SearchQuery>, now: DateTime<Utc>) -> Vec<SearchQuery> {
    let mut due: Vec<SearchQuery> = queries.into_iter().filter(|q| is_due(q, now)).collect();
    due.sort_by_key(|q| (q.last_scanned_at.is_some(), q.last_scanned_at));
    due
}
