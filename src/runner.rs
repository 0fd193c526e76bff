//! Per-call runner: parameters, ordering, pagination and destination for one
//! named query.
//!
//! A runner is created by [`Fayl::run`](crate::Fayl::run) (or
//! [`Tx::run`](crate::Tx::run) inside a transaction), configured with
//! consuming builder calls and finished with [`Runner::exec`] or
//! [`Runner::query`].
//!
//! ```rust,ignore
//! let mut user = User::default();
//! fayl.run("users.get_by_id")
//!     .with_param("id", 7)
//!     .scan_struct(&mut user)
//!     .query(&ctx)
//!     .await?;
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, Row};
use tokio::io::AsyncWrite;
use tracing::Instrument;

use crate::client::Fayl;
use crate::context::Context;
use crate::error::{FaylError, FaylResult};
use crate::pagination::{self, Pagination, PaginationResponse, Plan, Tabling};
use crate::scanner::{self, Record, Scanner};
use crate::template::{self, Statement};
use crate::value::{self, Params, Value};

/// Outcome of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Driver dependent; `None` where the backend does not report it.
    pub last_insert_id: Option<i64>,
}

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    /// Rows delivered to the destination.
    pub rows: usize,
    pub pagination: Option<PaginationResponse>,
}

/// Builder and executor for one named-query call.
pub struct Runner<'a> {
    fayl: Fayl,
    code: String,
    params: Params,
    deferred: Option<String>,
    tabling: Tabling,
    scanner: Scanner<'a>,
    in_transaction: bool,
}

impl<'a> Runner<'a> {
    pub(crate) fn new(fayl: Fayl, code: impl Into<String>, in_transaction: bool) -> Self {
        Self {
            fayl,
            code: code.into(),
            params: Params::new(),
            deferred: None,
            tabling: Tabling::default(),
            scanner: Scanner::None,
            in_transaction,
        }
    }

    /// The query code this runner executes.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Set one parameter. The last write per key wins.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Merge a map or a serializable struct into the parameters.
    ///
    /// Anything that does not serialize to an object is recorded and returned
    /// by [`Runner::exec`] / [`Runner::query`] before any database work.
    pub fn with_params<T: Serialize + ?Sized>(mut self, source: &T) -> Self {
        match value::to_params(source) {
            Ok(params) => self.params.extend(params),
            Err(err) => {
                if self.deferred.is_none() {
                    self.deferred = Some(match err {
                        FaylError::Bind { message, .. } => message,
                        other => other.to_string(),
                    });
                }
            }
        }
        self
    }

    /// Set the ordering (`name`, `+name`, `-name`), replacing any previous one.
    pub fn with_order_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tabling.order_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.tabling.pagination = Some(pagination.normalized());
        self
    }

    /// Decode the first row into a map.
    pub fn scan_map(mut self, dest: &'a mut Record) -> Self {
        self.scanner = Scanner::Map(dest);
        self
    }

    pub fn scan_maps(mut self, dest: &'a mut Vec<Record>) -> Self {
        self.scanner = Scanner::Maps(dest);
        self
    }

    /// Decode the single row into `dest`; zero rows is [`FaylError::NotFound`].
    pub fn scan_struct<T>(mut self, dest: &'a mut T) -> Self
    where
        T: DeserializeOwned + Send + 'a,
    {
        self.scanner = Scanner::single_struct(dest);
        self
    }

    pub fn scan_structs<T>(mut self, dest: &'a mut Vec<T>) -> Self
    where
        T: DeserializeOwned + Send + 'a,
    {
        self.scanner = Scanner::struct_slice(dest);
        self
    }

    /// Write the rows as one JSON array.
    pub fn scan_writer<W>(mut self, dest: &'a mut W) -> Self
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.scanner = Scanner::Writer(dest);
        self
    }

    /// Compile the template without touching the database.
    pub fn compile(&self) -> FaylResult<Statement> {
        if let Some(message) = &self.deferred {
            return Err(FaylError::bind(&self.code, message.clone()));
        }
        let text = self.fayl.registry().get(&self.code)?;
        tracing::debug!(code = %self.code, "compiling template");
        template::compile(text, &self.params, self.fayl.placeholder()).map_err(|e| e.with_code(&self.code))
    }

    /// Compile and apply ordering/pagination without touching the database.
    pub fn plan(&self) -> FaylResult<Plan> {
        let statement = self.compile()?;
        pagination::plan(statement, &self.tabling, self.fayl.placeholder()).map_err(|e| e.with_code(&self.code))
    }

    /// Execute a mutating statement.
    pub async fn exec(self, ctx: &Context) -> FaylResult<ExecResult> {
        let span = tracing::info_span!(
            parent: self.fayl.span(),
            "exec",
            code = %self.code,
            request_id = tracing::field::Empty,
            correlation_id = tracing::field::Empty
        );
        ctx.record_ids(&span);

        async move {
            let statement = self.compile()?;
            tracing::info!(
                sql = %statement.sql,
                args = statement.args.len(),
                in_transaction = self.in_transaction,
                "executing statement"
            );

            let result = ctx
                .guard(&self.code, async {
                    let query = bind_args(sqlx::query(&statement.sql), &statement.args);
                    let result = if self.in_transaction {
                        let handle = ctx.tx("execute query")?;
                        let mut guard = handle.lock().await;
                        let tx = guard.as_mut().ok_or(FaylError::TransactionFinished("execute query"))?;
                        query.execute(&mut **tx).await
                    } else {
                        query.execute(self.fayl.pool()).await
                    };
                    result.map_err(|e| FaylError::execute(&self.code, "execute", e))
                })
                .await?;

            Ok(ExecResult {
                rows_affected: result.rows_affected(),
                last_insert_id: result.last_insert_id(),
            })
        }
        .instrument(span)
        .await
    }

    /// Execute a read and deliver its rows to the selected destination.
    pub async fn query(mut self, ctx: &Context) -> FaylResult<QueryResult> {
        let span = tracing::info_span!(
            parent: self.fayl.span(),
            "query",
            code = %self.code,
            request_id = tracing::field::Empty,
            correlation_id = tracing::field::Empty
        );
        ctx.record_ids(&span);

        async move {
            let plan = self.plan()?;
            let statement = &plan.statement;
            tracing::info!(
                sql = %statement.sql,
                args = statement.args.len(),
                in_transaction = self.in_transaction,
                "executing query"
            );

            if self.scanner.is_none() && plan.count_statement().is_none() && !plan.is_cursor() {
                self.drain(ctx, statement).await?;
                return Ok(QueryResult::default());
            }

            let rows = self.fetch(ctx, statement, "fetch").await?;
            let mut records: Vec<Record> = rows.iter().map(scanner::row_to_record).collect();
            drop(rows);

            let total = match plan.count_statement() {
                Some(count) => Some(self.count(ctx, count).await?),
                None => None,
            };

            let pagination = plan.finish(&mut records, total).map_err(|e| e.with_code(&self.code))?;
            let delivered = records.len();
            let scanner = std::mem::replace(&mut self.scanner, Scanner::None);
            scanner.deliver(&self.code, records).await?;

            Ok(QueryResult {
                rows: delivered,
                pagination,
            })
        }
        .instrument(span)
        .await
    }

    async fn fetch(&self, ctx: &Context, statement: &Statement, phase: &'static str) -> FaylResult<Vec<AnyRow>> {
        ctx.guard(&self.code, async {
            let query = bind_args(sqlx::query(&statement.sql), &statement.args);
            let rows = if self.in_transaction {
                let handle = ctx.tx("execute query")?;
                let mut guard = handle.lock().await;
                let tx = guard.as_mut().ok_or(FaylError::TransactionFinished("execute query"))?;
                query.fetch_all(&mut **tx).await
            } else {
                query.fetch_all(self.fayl.pool()).await
            };
            rows.map_err(|e| FaylError::execute(&self.code, phase, e))
        })
        .await
    }

    async fn drain(&self, ctx: &Context, statement: &Statement) -> FaylResult<()> {
        self.fetch(ctx, statement, "fetch").await.map(drop)
    }

    async fn count(&self, ctx: &Context, count: &Statement) -> FaylResult<i64> {
        tracing::debug!(sql = %count.sql, "counting rows");
        let rows = self.fetch(ctx, count, "count").await?;
        let row = rows.first().ok_or_else(|| {
            FaylError::decode(&self.code, "count statement returned no rows")
        })?;
        row.try_get::<i64, _>(0)
            .map_err(|e| FaylError::decode(&self.code, format!("invalid row count: {}", e)))
    }
}

/// Bind positional arguments in placeholder order.
fn bind_args<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    args: &[Value],
) -> Query<'q, Any, AnyArguments<'q>> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Bytes(v) => query.bind(v.clone()),
            Value::List(_) | Value::Json(_) => query.bind(arg.to_json().to_string()),
        };
    }
    query
}
