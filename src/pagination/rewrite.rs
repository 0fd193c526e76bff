//! Statement rewriting for ordering, offset and cursor pagination.
//!
//! Clauses are appended to the compiled statement itself, so ordering columns
//! may be qualified (`u.created_at`) and need not be selected:
//!
//! ```text
//! <statement> [WHERE|AND <keyset>] ORDER BY … LIMIT …
//! ```
//!
//! A statement that already ends in its own `ORDER BY`/`LIMIT`, is a compound
//! select, or (for cursors) groups its rows is wrapped as a derived table
//! instead. Ordering columns then name result-set columns.

use serde_json::Value as JsonValue;

use super::cursor::{Cursor, Seek};
use super::shape::Shape;
use super::{Direction, OrderColumn, Pagination, PaginationResponse, Tabling};
use crate::dialect::Placeholder;
use crate::error::{FaylError, FaylResult};
use crate::scanner::Record;
use crate::template::Statement;
use crate::value::Value;

const PAGE_ALIAS: &str = "fayl_page";
const COUNT_ALIAS: &str = "fayl_count";

/// The final statement of a read plus what is needed to compute its
/// pagination response.
#[derive(Debug, Clone)]
pub struct Plan {
    pub statement: Statement,
    mode: Mode,
}

#[derive(Debug, Clone)]
enum Mode {
    Plain,
    Ordered,
    Offset {
        count: Statement,
        offset: i64,
        limit: i64,
    },
    Cursor {
        keys: Vec<OrderColumn>,
        limit: i64,
        seek: Seek,
        resumed: bool,
    },
}

/// Rewrite `statement` according to the ordering and pagination request.
pub fn plan(statement: Statement, tabling: &Tabling, placeholder: Placeholder) -> FaylResult<Plan> {
    let order = tabling
        .order_by
        .iter()
        .map(|spec| OrderColumn::parse(spec))
        .collect::<FaylResult<Vec<_>>>()?;

    let pagination = tabling.pagination.clone().map(Pagination::normalized);

    match pagination {
        None if order.is_empty() => Ok(Plan {
            statement,
            mode: Mode::Plain,
        }),
        None => {
            let base = Base::new(&statement.sql, false, placeholder);
            let sql = format!("{} ORDER BY {}", base.sql, order_clause(&base.columns(&order), &order, false));
            Ok(Plan {
                statement: Statement {
                    sql,
                    args: statement.args,
                },
                mode: Mode::Ordered,
            })
        }
        Some(Pagination::Offset { offset, limit }) => plan_offset(statement, &order, offset, limit, placeholder),
        Some(Pagination::Cursor { cursor, limit }) => plan_cursor(statement, order, &cursor, limit, placeholder),
    }
}

fn plan_offset(
    statement: Statement,
    order: &[OrderColumn],
    offset: i64,
    limit: i64,
    placeholder: Placeholder,
) -> FaylResult<Plan> {
    let count = Statement {
        sql: format!(
            "SELECT COUNT(*) AS total FROM {}",
            derived(&statement.sql, COUNT_ALIAS, placeholder)
        ),
        args: statement.args.clone(),
    };

    let base = Base::new(&statement.sql, false, placeholder);
    let mut sql = base.sql.clone();
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_clause(&base.columns(order), order, false));
    } else if placeholder.fetch_needs_order() {
        sql.push_str(" ORDER BY (SELECT NULL)");
    }
    sql.push_str(&limit_clause(placeholder, limit, Some(offset)));

    Ok(Plan {
        statement: Statement {
            sql,
            args: statement.args,
        },
        mode: Mode::Offset { count, offset, limit },
    })
}

fn plan_cursor(
    statement: Statement,
    order: Vec<OrderColumn>,
    token: &str,
    limit: i64,
    placeholder: Placeholder,
) -> FaylResult<Plan> {
    if order.is_empty() {
        return Err(FaylError::compile(
            "",
            "cursor pagination requires an order by",
        ));
    }

    let cursor = if token.trim().is_empty() {
        None
    } else {
        let cursor = Cursor::decode(token)?;
        let keys: Vec<&str> = order.iter().map(OrderColumn::key).collect();
        if cursor.keys != keys {
            return Err(FaylError::compile(
                "",
                format!(
                    "cursor was issued for order by [{}], not [{}]",
                    cursor.keys.join(", "),
                    keys.join(", ")
                ),
            ));
        }
        Some(cursor)
    };

    let seek = cursor.as_ref().map(|c| c.seek).unwrap_or(Seek::Next);
    let reversed = seek == Seek::Prev;

    let mut args = statement.args;
    let mut base = Base::new(&statement.sql, cursor.is_some(), placeholder);
    let columns = base.columns(&order);

    if let Some(cursor) = &cursor {
        let predicate = keyset_predicate(&order, &columns, &cursor.values, reversed, placeholder, &mut args)?;
        base.filter(&predicate);
    }

    let mut sql = base.sql;
    sql.push_str(" ORDER BY ");
    sql.push_str(&order_clause(&columns, &order, reversed));
    // One extra row tells whether another page follows.
    sql.push_str(&limit_clause(placeholder, limit.saturating_add(1), None));

    Ok(Plan {
        statement: Statement { sql, args },
        mode: Mode::Cursor {
            keys: order,
            limit,
            seek,
            resumed: cursor.is_some(),
        },
    })
}

impl Plan {
    /// The companion count statement of an offset plan.
    pub fn count_statement(&self) -> Option<&Statement> {
        match &self.mode {
            Mode::Offset { count, .. } => Some(count),
            _ => None,
        }
    }

    pub fn is_cursor(&self) -> bool {
        matches!(self.mode, Mode::Cursor { .. })
    }

    /// Trim the fetched rows to the page and compute the continuation state.
    ///
    /// `total` is the scalar result of [`Plan::count_statement`], if any.
    pub(crate) fn finish(
        &self,
        records: &mut Vec<Record>,
        total: Option<i64>,
    ) -> FaylResult<Option<PaginationResponse>> {
        match &self.mode {
            Mode::Plain | Mode::Ordered => Ok(None),
            Mode::Offset { offset, limit, .. } => Ok(Some(PaginationResponse::Offset {
                total: total.unwrap_or_default(),
                offset: *offset,
                limit: *limit,
            })),
            Mode::Cursor {
                keys,
                limit,
                seek,
                resumed,
            } => {
                let has_more = records.len() as i64 > *limit;
                if has_more {
                    records.truncate(*limit as usize);
                }

                let (next, prev) = match seek {
                    Seek::Next => {
                        let next = match records.last() {
                            Some(last) if has_more => Some(token(Seek::Next, keys, last)?),
                            _ => None,
                        };
                        let prev = match records.first() {
                            Some(first) if *resumed => Some(token(Seek::Prev, keys, first)?),
                            _ => None,
                        };
                        (next, prev)
                    }
                    Seek::Prev => {
                        records.reverse();
                        let prev = match records.first() {
                            Some(first) if has_more => Some(token(Seek::Prev, keys, first)?),
                            _ => None,
                        };
                        let next = match records.last() {
                            Some(last) => Some(token(Seek::Next, keys, last)?),
                            None => None,
                        };
                        (next, prev)
                    }
                };

                Ok(Some(PaginationResponse::Cursor { next, prev }))
            }
        }
    }
}

fn token(seek: Seek, keys: &[OrderColumn], record: &Record) -> FaylResult<String> {
    let mut values = Vec::with_capacity(keys.len());
    for key in keys {
        let value = record.get(key.key()).ok_or_else(|| {
            FaylError::compile(
                "",
                format!("cursor column '{}' is not in the result set", key.key()),
            )
        })?;
        values.push(value.clone());
    }

    Ok(Cursor {
        seek,
        keys: keys.iter().map(|k| k.key().to_string()).collect(),
        values,
    }
    .encode())
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// `(<sql>) AS alias`; Oracle takes no `AS` before a table alias.
fn derived(sql: &str, alias: &str, placeholder: Placeholder) -> String {
    let sql = strip_terminator(sql);
    let sql = if Shape::scan(sql).open_comment {
        format!("{}\n", sql)
    } else {
        sql.to_string()
    };
    if placeholder.aliases_with_as() {
        format!("({}) AS {}", sql, alias)
    } else {
        format!("({}) {}", sql, alias)
    }
}

/// The statement the ordering, filter and limit clauses are added to.
struct Base {
    sql: String,
    /// The caller's statement sits inside a derived table.
    wrapped: bool,
    where_at: Option<usize>,
}

impl Base {
    fn new(sql: &str, filtered: bool, placeholder: Placeholder) -> Self {
        let sql = strip_terminator(sql);
        let shape = Shape::scan(sql);
        let direct = if filtered { shape.accepts_filter() } else { shape.accepts_tail() };

        if !direct {
            return Base {
                sql: format!("SELECT * FROM {}", derived(sql, PAGE_ALIAS, placeholder)),
                wrapped: true,
                where_at: None,
            };
        }

        let mut sql = sql.to_string();
        if shape.open_comment {
            sql.push('\n');
        }
        Base {
            sql,
            wrapped: false,
            where_at: shape.where_at,
        }
    }

    /// How each ordering column is referenced in the rewritten statement.
    fn columns(&self, order: &[OrderColumn]) -> Vec<String> {
        order
            .iter()
            .map(|col| {
                if self.wrapped {
                    col.key().to_string()
                } else {
                    col.column.clone()
                }
            })
            .collect()
    }

    /// Keep only rows matching `predicate`, alongside any existing filter.
    fn filter(&mut self, predicate: &str) {
        match self.where_at {
            Some(at) => {
                let start = at + "WHERE".len();
                let rest = &self.sql[start..];
                let start = start + (rest.len() - rest.trim_start().len());
                self.sql.insert(start, '(');
                self.sql.push_str(") AND ");
            }
            None => self.sql.push_str(" WHERE "),
        }
        self.sql.push_str(predicate);
    }
}

/// `CASE WHEN k IS NULL THEN 1 ELSE 0 END <dir>, k <dir>` per column.
fn order_clause(columns: &[String], order: &[OrderColumn], reversed: bool) -> String {
    columns
        .iter()
        .zip(order)
        .map(|(k, col)| {
            let dir = if reversed { col.direction.reversed() } else { col.direction };
            format!("CASE WHEN {k} IS NULL THEN 1 ELSE 0 END {d}, {k} {d}", d = dir.as_sql())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn limit_clause(placeholder: Placeholder, limit: i64, offset: Option<i64>) -> String {
    if placeholder.uses_fetch_clause() {
        return format!(
            " OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            offset.unwrap_or(0),
            limit
        );
    }
    match offset {
        Some(offset) => format!(" LIMIT {} OFFSET {}", limit, offset),
        None => format!(" LIMIT {}", limit),
    }
}

/// Rows strictly after the boundary in the (possibly reversed) ordering:
///
/// `(k1 after v1) OR (k1 = v1 AND k2 after v2) OR …`
///
/// With NULL as the greatest value, "after" in ascending order is
/// `k > v OR k IS NULL` and in descending order `k < v`; a NULL boundary is
/// followed by nothing ascending and by every non-NULL descending.
fn keyset_predicate(
    order: &[OrderColumn],
    columns: &[String],
    values: &[JsonValue],
    reversed: bool,
    placeholder: Placeholder,
    args: &mut Vec<Value>,
) -> FaylResult<String> {
    let mut bound = Vec::with_capacity(values.len());
    for (col, raw) in order.iter().zip(values) {
        let value = Value::from_json(raw.clone());
        if matches!(value, Value::List(_) | Value::Json(_)) {
            return Err(FaylError::compile(
                "",
                format!("cursor value for '{}' is not a scalar", col.key()),
            ));
        }
        bound.push(value);
    }

    let mut clauses = Vec::new();
    for level in 0..order.len() {
        let col = &order[level];
        let dir = if reversed { col.direction.reversed() } else { col.direction };
        let key = &columns[level];

        // Nothing sorts after NULL ascending.
        if bound[level].is_null() && dir == Direction::Asc {
            continue;
        }

        let mut parts = Vec::with_capacity(level + 1);
        for prev in 0..level {
            let prev_key = &columns[prev];
            parts.push(match &bound[prev] {
                Value::Null => format!("{} IS NULL", prev_key),
                v => {
                    let mark = push(args, v.clone(), placeholder);
                    format!("{} = {}", prev_key, mark)
                }
            });
        }

        parts.push(match (&bound[level], dir) {
            (Value::Null, _) => format!("{} IS NOT NULL", key),
            (v, Direction::Asc) => {
                let mark = push(args, v.clone(), placeholder);
                format!("({k} > {m} OR {k} IS NULL)", k = key, m = mark)
            }
            (v, Direction::Desc) => {
                let mark = push(args, v.clone(), placeholder);
                format!("{} < {}", key, mark)
            }
        });
        clauses.push(format!("({})", parts.join(" AND ")));
    }

    if clauses.is_empty() {
        return Ok("1 = 0".to_string());
    }
    Ok(format!("({})", clauses.join(" OR ")))
}

fn push(args: &mut Vec<Value>, value: Value, placeholder: Placeholder) -> String {
    args.push(value);
    placeholder.render(args.len())
}
