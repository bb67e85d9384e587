//! Cursor pagination over the token collection.
//!
//! The store offers a single primitive, an ordered primary-key scan with
//! `skip`/`limit`/`descending`/`start_key`. Every page is built from one or
//! two such scans: the window itself, plus one row on either side of it
//! which becomes the `prev`/`next` cursor. Cursors are token ids in their
//! short form.
//!
//! Display order is newest first when `newest_first` is set (keys
//! descending), oldest first otherwise.

use crate::errors::AppError;
use crate::id::{id_in, id_out};
use crate::models::{from_doc, Page, Token, TokenBody};
use crate::store::{DocumentStore, Row, ScanOptions, ScanResult};

/// Where a page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// Display index. Negative values count from the end, `-1` being the
    /// last row in display order.
    Offset(i64),
    /// First row of the page.
    StartId(String),
    /// Last row of the page.
    EndId(String),
}

impl Addressing {
    /// Pick the addressing mode from optional query parameters.
    /// `offset` wins over `start_id`, which wins over `end_id`.
    pub fn from_params(
        offset: Option<i64>,
        start_id: Option<String>,
        end_id: Option<String>,
    ) -> Result<Self, AppError> {
        match (offset, start_id, end_id) {
            (Some(offset), _, _) => Ok(Addressing::Offset(offset)),
            (None, Some(id), _) => Ok(Addressing::StartId(id)),
            (None, None, Some(id)) => Ok(Addressing::EndId(id)),
            (None, None, None) => Err(AppError::validation("need offset, start_id, or end_id")),
        }
    }
}

pub async fn get_page(
    store: &dyn DocumentStore,
    collection: &str,
    addressing: &Addressing,
    count: usize,
    newest_first: bool,
) -> Result<Page, AppError> {
    match addressing {
        Addressing::Offset(offset) if *offset >= 0 => {
            from_offset(store, collection, *offset as usize, count, newest_first).await
        }
        Addressing::Offset(offset) => {
            from_end(store, collection, *offset, count, newest_first).await
        }
        Addressing::StartId(id) => from_id(store, collection, &id_in(id), count, newest_first).await,
        Addressing::EndId(id) => until_id(store, collection, &id_in(id), count, newest_first).await,
    }
}

/// Window starting at display index `offset`.
///
/// One extra row is requested at the end for `next` and, when `offset > 0`,
/// one at the start for `prev`.
async fn from_offset(
    store: &dyn DocumentStore,
    collection: &str,
    offset: usize,
    count: usize,
    newest_first: bool,
) -> Result<Page, AppError> {
    let scan = store
        .range_scan(
            collection,
            ScanOptions {
                skip: offset.saturating_sub(1),
                limit: if offset > 0 { count + 2 } else { count + 1 },
                descending: newest_first,
                start_key: None,
            },
        )
        .await?;

    let total_rows = scan.total_rows;
    let mut rows = scan.rows;

    let prev = if offset > 0 && !rows.is_empty() {
        Some(rows.remove(0).key)
    } else {
        None
    };
    let next = if rows.len() > count { rows.pop().map(|r| r.key) } else { None };

    page(total_rows, offset as i64, rows, prev, next, newest_first)
}

/// Window starting `-offset` rows from the end of the display order.
///
/// Scans in reverse display order from the tail, then flips the rows back.
/// `count` is clamped to what is left between the start position and the
/// end, so the window never runs past the last row.
async fn from_end(
    store: &dyn DocumentStore,
    collection: &str,
    offset: i64,
    count: usize,
    newest_first: bool,
) -> Result<Page, AppError> {
    // zero-based distance from the end: -1 -> 0, -2 -> 1, ...
    let from_end = (offset + 1).unsigned_abs() as usize;
    let count = count.min(from_end + 1);
    // rows between the window and the tail; negative when the window touches it
    let gap = from_end as i64 - count as i64;

    let scan = store
        .range_scan(
            collection,
            ScanOptions {
                skip: gap.max(0) as usize,
                limit: if gap >= 0 { count + 2 } else { count + 1 },
                descending: !newest_first,
                start_key: None,
            },
        )
        .await?;

    let total_rows = scan.total_rows;
    let mut rows = scan.rows;
    rows.reverse();

    let next = if gap + 1 > 0 && !rows.is_empty() {
        rows.pop().map(|r| r.key)
    } else {
        None
    };
    let prev = if rows.len() > count {
        Some(rows.remove(0).key)
    } else {
        None
    };

    page(total_rows, offset, rows, prev, next, newest_first)
}

/// Window whose first row is `start_key` (or the first key after it).
async fn from_id(
    store: &dyn DocumentStore,
    collection: &str,
    start_key: &str,
    count: usize,
    newest_first: bool,
) -> Result<Page, AppError> {
    let scan = store
        .range_scan(
            collection,
            ScanOptions {
                skip: 0,
                limit: count + 1,
                descending: newest_first,
                start_key: Some(start_key.to_string()),
            },
        )
        .await?;

    let ScanResult {
        total_rows,
        offset,
        mut rows,
    } = scan;

    let next = if rows.len() > count { rows.pop().map(|r| r.key) } else { None };
    let prev = if offset > 0 {
        neighbour(store, collection, start_key, !newest_first).await?
    } else {
        None
    };

    page(total_rows, offset as i64, rows, prev, next, newest_first)
}

/// Window whose last row is `end_key` (or the last key before it).
async fn until_id(
    store: &dyn DocumentStore,
    collection: &str,
    end_key: &str,
    count: usize,
    newest_first: bool,
) -> Result<Page, AppError> {
    let scan = store
        .range_scan(
            collection,
            ScanOptions {
                skip: 0,
                limit: count + 1,
                descending: !newest_first,
                start_key: Some(end_key.to_string()),
            },
        )
        .await?;

    let ScanResult {
        total_rows,
        offset: scanned_past,
        mut rows,
    } = scan;
    rows.reverse();

    let prev = if rows.len() > count {
        Some(rows.remove(0).key)
    } else {
        None
    };
    let next = if scanned_past > 0 {
        neighbour(store, collection, end_key, newest_first).await?
    } else {
        None
    };

    let offset = total_rows.saturating_sub(scanned_past + rows.len());
    page(total_rows, offset as i64, rows, prev, next, newest_first)
}

/// The row following `key` when scanning in direction `descending`.
///
/// Needs its own scan: the store cannot report what lies on the other side
/// of a start key.
async fn neighbour(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    descending: bool,
) -> Result<Option<String>, AppError> {
    let scan = store
        .range_scan(
            collection,
            ScanOptions {
                skip: 0,
                limit: 2,
                descending,
                start_key: Some(key.to_string()),
            },
        )
        .await?;

    // rows[0] is the anchor itself, unless the anchor doesn't exist
    let mut rows = scan.rows.into_iter();
    Ok(match rows.next() {
        Some(first) if first.key != key => Some(first.key),
        Some(_) => rows.next().map(|r| r.key),
        None => None,
    })
}

fn page(
    total_rows: usize,
    offset: i64,
    rows: Vec<Row>,
    prev: Option<String>,
    next: Option<String>,
    newest_first: bool,
) -> Result<Page, AppError> {
    let rows = rows
        .into_iter()
        .map(|row| {
            let body: TokenBody = from_doc(&row.key, row.doc)?;
            Ok::<_, AppError>(Token {
                id: id_out(&row.key),
                body,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Page {
        total_rows,
        offset,
        rows,
        prev: prev.as_deref().map(id_out),
        next: next.as_deref().map(id_out),
        newest_first,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addressing_precedence() {
        assert_eq!(
            Addressing::from_params(Some(-1), Some("A".into()), None).unwrap(),
            Addressing::Offset(-1)
        );
        assert_eq!(
            Addressing::from_params(None, Some("A".into()), Some("B".into())).unwrap(),
            Addressing::StartId("A".into())
        );
        assert_eq!(
            Addressing::from_params(None, None, Some("B".into())).unwrap(),
            Addressing::EndId("B".into())
        );

        let err = Addressing::from_params(None, None, None).unwrap_err();
        assert_eq!(err.to_string(), "need offset, start_id, or end_id");
    }
}
