//! Ordering and pagination for named queries.
//!
//! Three modes are supported on top of any compiled statement:
//!
//! | Request            | Rewrite                                   | Response              |
//! |--------------------|-------------------------------------------|-----------------------|
//! | none + order by    | `ORDER BY`                                | none                  |
//! | offset             | `ORDER BY` + `LIMIT` + `OFFSET` + count   | total row count       |
//! | cursor             | `ORDER BY` + keyset predicate + `LIMIT`   | next / prev tokens    |
//!
//! NULL is treated as the greatest value of every ordering column: it sorts
//! last ascending and first descending. The policy is fixed so that cursors
//! stay stable from page to page.

mod cursor;
mod rewrite;
mod shape;

use serde::{Deserialize, Serialize};

use crate::error::{FaylError, FaylResult};

pub use rewrite::{Plan, plan};

/// Rows per page when the caller passes zero or a negative size.
pub const DEFAULT_PER_PAGE: i64 = 10;
/// Page number when the caller passes zero or a negative page.
pub const DEFAULT_PAGE: i64 = 1;

/// Sort direction of one ordering column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One entry of an order by list: `name`, `+name` or `-name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderColumn {
    pub column: String,
    pub direction: Direction,
}

impl OrderColumn {
    /// Parse an ordering reference. `-` means descending, `+` or no prefix ascending.
    pub fn parse(spec: &str) -> FaylResult<Self> {
        let spec = spec.trim();
        let (direction, column) = match spec.strip_prefix('-') {
            Some(rest) => (Direction::Desc, rest),
            None => (Direction::Asc, spec.strip_prefix('+').unwrap_or(spec)),
        };

        if !is_valid_column(column) {
            return Err(FaylError::compile(
                "",
                format!("invalid order by column '{}'", spec),
            ));
        }

        Ok(Self {
            column: column.to_string(),
            direction,
        })
    }

    /// The result-set column name of this entry (`t.col` → `col`). Cursor
    /// tokens store values under it.
    pub fn key(&self) -> &str {
        self.column.rsplit('.').next().unwrap_or(&self.column)
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_.]*`.
fn is_valid_column(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.ends_with('.') && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Pagination {
    /// Keyset paging. An empty cursor requests the first page.
    Cursor { cursor: String, limit: i64 },
    /// Numeric offset/limit paging with a total count.
    Offset { offset: i64, limit: i64 },
}

impl Pagination {
    /// Cursor paging from `cursor` (empty for the first page).
    pub fn cursor(cursor: impl Into<String>, limit: i64) -> Self {
        Pagination::Cursor {
            cursor: cursor.into(),
            limit,
        }
        .normalized()
    }

    /// Offset paging.
    pub fn offset(offset: i64, limit: i64) -> Self {
        Pagination::Offset { offset, limit }.normalized()
    }

    /// Offset paging by 1-based page number. An offset past `i64::MAX`
    /// saturates, which yields an empty page.
    pub fn page(page: i64, per_page: i64) -> Self {
        let page = if page <= 0 { DEFAULT_PAGE } else { page };
        let per_page = default_limit(per_page);
        Pagination::Offset {
            offset: (page - 1).saturating_mul(per_page),
            limit: per_page,
        }
    }

    pub fn limit(&self) -> i64 {
        match self {
            Pagination::Cursor { limit, .. } | Pagination::Offset { limit, .. } => *limit,
        }
    }

    /// Apply the defaults for non-positive page sizes and negative offsets.
    pub(crate) fn normalized(self) -> Self {
        match self {
            Pagination::Cursor { cursor, limit } => Pagination::Cursor {
                cursor,
                limit: default_limit(limit),
            },
            Pagination::Offset { offset, limit } => Pagination::Offset {
                offset: offset.max(0),
                limit: default_limit(limit),
            },
        }
    }
}

fn default_limit(limit: i64) -> i64 {
    if limit <= 0 { DEFAULT_PER_PAGE } else { limit }
}

/// Ordering plus pagination request attached to one runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tabling {
    pub order_by: Vec<String>,
    pub pagination: Option<Pagination>,
}

/// Continuation state computed after the rows are materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PaginationResponse {
    /// Opaque tokens; `None` at either boundary.
    Cursor {
        next: Option<String>,
        prev: Option<String>,
    },
    /// Total rows matched by the statement without limit/offset.
    Offset { total: i64, offset: i64, limit: i64 },
}

impl PaginationResponse {
    pub fn next(&self) -> Option<&str> {
        match self {
            PaginationResponse::Cursor { next, .. } => next.as_deref(),
            PaginationResponse::Offset { .. } => None,
        }
    }

    pub fn prev(&self) -> Option<&str> {
        match self {
            PaginationResponse::Cursor { prev, .. } => prev.as_deref(),
            PaginationResponse::Offset { .. } => None,
        }
    }

    pub fn total(&self) -> Option<i64> {
        match self {
            PaginationResponse::Offset { total, .. } => Some(*total),
            PaginationResponse::Cursor { .. } => None,
        }
    }
}
