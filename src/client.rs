//! The `Fayl` client: pool, registry and transaction management.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Connection};
use tracing::{Instrument, Span};

use crate::config::Config;
use crate::context::{Context, TxHandle};
use crate::dialect::Placeholder;
use crate::error::{FaylError, FaylResult};
use crate::registry::Registry;
use crate::runner::Runner;

/// Initialization inputs for [`Fayl::init`].
#[derive(Debug, Clone)]
pub struct Options {
    pub pool: AnyPool,
    /// Root directory of the `.sql` templates.
    pub query_location: PathBuf,
    /// Driver identifier used to pick the placeholder dialect.
    pub driver_name: Option<String>,
    /// Explicit dialect; wins over `driver_name`.
    pub placeholder: Option<Placeholder>,
    /// Parent span of every runner and transaction.
    pub span: Option<Span>,
}

impl Options {
    pub fn new(pool: AnyPool, query_location: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            query_location: query_location.into(),
            driver_name: None,
            placeholder: None,
            span: None,
        }
    }

    pub fn driver(mut self, name: impl Into<String>) -> Self {
        self.driver_name = Some(name.into());
        self
    }

    pub fn placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// Entry point for running named queries.
///
/// Cheap to clone; clones share the pool and the registry.
#[derive(Clone)]
pub struct Fayl {
    inner: Arc<Inner>,
}

struct Inner {
    pool: AnyPool,
    registry: Registry,
    placeholder: Placeholder,
    span: Span,
}

impl Fayl {
    /// Ping the database, load the registry and build the client.
    ///
    /// Without an explicit placeholder or driver name, the dialect follows the
    /// backend of the pool.
    pub async fn init(options: Options) -> FaylResult<Self> {
        sqlx::any::install_default_drivers();

        let mut conn = options
            .pool
            .acquire()
            .await
            .map_err(|e| FaylError::execute("", "connect", e))?;
        conn.ping()
            .await
            .map_err(|e| FaylError::execute("", "ping", e))?;
        let backend = conn.backend_name().to_string();
        drop(conn);

        let placeholder = options
            .placeholder
            .or_else(|| options.driver_name.as_deref().and_then(Placeholder::for_driver))
            .or_else(|| Placeholder::for_driver(&backend))
            .unwrap_or_default();

        let registry = Registry::load(&options.query_location)?;
        tracing::info!(
            queries = registry.len(),
            placeholder = %placeholder,
            backend = %backend,
            "fayl initialized"
        );

        Ok(Self::build(options.pool, registry, placeholder, options.span))
    }

    /// Build a client from an already-loaded registry.
    pub fn new(pool: AnyPool, registry: Registry, placeholder: Placeholder) -> Self {
        Self::build(pool, registry, placeholder, None)
    }

    fn build(pool: AnyPool, registry: Registry, placeholder: Placeholder, span: Option<Span>) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                registry,
                placeholder,
                span: span.unwrap_or_else(|| tracing::info_span!("fayl")),
            }),
        }
    }

    /// Connect using a [`Config`] and initialize.
    pub async fn connect(config: &Config) -> FaylResult<Self> {
        sqlx::any::install_default_drivers();

        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| FaylError::Config("database_url is not set".to_string()))?;
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| FaylError::execute("", "connect", e))?;

        let mut options = Options::new(pool, &config.query_location);
        options.driver_name = config.driver.clone();
        options.placeholder = config.placeholder();
        Self::init(options).await
    }

    /// Start a runner for `code` outside any transaction.
    pub fn run<'a>(&self, code: impl Into<String>) -> Runner<'a> {
        Runner::new(self.clone(), code, false)
    }

    /// Registered query codes, sorted.
    pub fn codes(&self) -> Vec<&str> {
        self.inner.registry.codes().collect()
    }

    pub fn pool(&self) -> &AnyPool {
        &self.inner.pool
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn placeholder(&self) -> Placeholder {
        self.inner.placeholder
    }

    pub(crate) fn span(&self) -> &Span {
        &self.inner.span
    }

    /// Open a transaction and return a context carrying it.
    pub async fn begin(&self, ctx: &Context) -> FaylResult<Context> {
        if ctx.in_transaction() {
            return Err(FaylError::NestedTransaction);
        }

        let tx = ctx
            .guard("begin transaction", async {
                self.inner
                    .pool
                    .begin()
                    .await
                    .map_err(|source| FaylError::Transaction { op: "begin", source })
            })
            .await?;

        let handle = TxHandle::new(tx);
        tracing::debug!(parent: self.span(), tx = handle.id(), "transaction started");
        Ok(ctx.with_tx(handle))
    }

    pub async fn commit(&self, ctx: &Context) -> FaylResult<()> {
        let handle = ctx.tx("commit")?;
        let tx = handle.take("commit").await?;
        ctx.guard("commit transaction", async {
            tx.commit()
                .await
                .map_err(|source| FaylError::Transaction { op: "commit", source })
        })
        .await?;
        tracing::debug!(parent: self.span(), tx = handle.id(), "transaction committed");
        Ok(())
    }

    pub async fn rollback(&self, ctx: &Context) -> FaylResult<()> {
        let handle = ctx.tx("rollback")?;
        let tx = handle.take("rollback").await?;
        ctx.guard("rollback transaction", async {
            tx.rollback()
                .await
                .map_err(|source| FaylError::Transaction { op: "rollback", source })
        })
        .await?;
        tracing::debug!(parent: self.span(), tx = handle.id(), "transaction rolled back");
        Ok(())
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`. Rolls back when it returns `Err` (the
    /// error is returned as-is, or wrapped in [`FaylError::RollbackFailed`]
    /// if the rollback fails too) and when it panics, in which case the panic
    /// resumes after the rollback.
    ///
    /// ```rust,ignore
    /// fayl.with_transaction(&ctx, |ctx, tx| async move {
    ///     tx.run("accounts.debit").with_param("id", 1).exec(&ctx).await?;
    ///     tx.run("accounts.credit").with_param("id", 2).exec(&ctx).await?;
    ///     Ok(())
    /// })
    /// .await?;
    /// ```
    pub async fn with_transaction<F, Fut, T>(&self, ctx: &Context, f: F) -> FaylResult<T>
    where
        F: FnOnce(Context, Tx) -> Fut,
        Fut: Future<Output = FaylResult<T>>,
    {
        let span = tracing::info_span!(
            parent: self.span(),
            "transaction",
            request_id = tracing::field::Empty,
            correlation_id = tracing::field::Empty
        );
        ctx.record_ids(&span);

        async move {
            let tx_ctx = self.begin(ctx).await?;
            let scope = Tx { fayl: self.clone() };

            let outcome = AssertUnwindSafe(f(tx_ctx.clone(), scope)).catch_unwind().await;

            match outcome {
                Err(panic) => {
                    if let Err(err) = self.rollback(&tx_ctx).await {
                        tracing::error!(error = %err, "rollback after panic failed");
                    }
                    std::panic::resume_unwind(panic)
                }
                Ok(Err(cause)) => match self.rollback(&tx_ctx).await {
                    Ok(()) => Err(cause),
                    Err(rollback) => Err(FaylError::RollbackFailed {
                        cause: Box::new(cause),
                        rollback: Box::new(rollback),
                    }),
                },
                Ok(Ok(value)) => {
                    self.commit(&tx_ctx).await?;
                    Ok(value)
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for Fayl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fayl")
            .field("queries", &self.inner.registry.len())
            .field("placeholder", &self.inner.placeholder)
            .finish()
    }
}

/// Runner factory handed to a [`Fayl::with_transaction`] callback.
#[derive(Clone, Debug)]
pub struct Tx {
    fayl: Fayl,
}

impl Tx {
    /// Start a runner that executes on the transaction of the context it is
    /// run with.
    pub fn run<'a>(&self, code: impl Into<String>) -> Runner<'a> {
        Runner::new(self.fayl.clone(), code, true)
    }
}
