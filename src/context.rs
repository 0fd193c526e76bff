//! Request-scoped context: transaction handle, deadline and request ids.
//!
//! A [`Context`] is passed explicitly to every call that touches the database.
//! [`Fayl::begin`](crate::Fayl::begin) derives a context carrying a transaction
//! handle; runners created in a transaction resolve the handle from the context
//! they are executed with and fail if it is missing.
//!
//! Request and correlation ids set on a context are recorded on the `exec`,
//! `query` and `transaction` spans, so every log line of the call carries them.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sqlx::{Any, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::Span;

use crate::error::{FaylError, FaylResult};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// A started transaction shared by every clone of the context that carries it.
///
/// The inner option is taken on commit or rollback, so each handle is
/// finalized exactly once.
#[derive(Clone)]
pub(crate) struct TxHandle {
    id: u64,
    tx: Arc<Mutex<Option<Transaction<'static, Any>>>>,
}

impl TxHandle {
    pub(crate) fn new(tx: Transaction<'static, Any>) -> Self {
        Self {
            id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Lock the transaction for one statement.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<Transaction<'static, Any>>> {
        self.tx.lock().await
    }

    /// Take the transaction out for commit or rollback.
    pub(crate) async fn take(&self, op: &'static str) -> FaylResult<Transaction<'static, Any>> {
        self.tx
            .lock()
            .await
            .take()
            .ok_or(FaylError::TransactionFinished(op))
    }
}

impl std::fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle").field("id", &self.id).finish()
    }
}

/// Explicit per-call context.
#[derive(Debug, Clone, Default)]
pub struct Context {
    tx: Option<TxHandle>,
    deadline: Option<Instant>,
    request_id: Option<String>,
    correlation_id: Option<String>,
}

impl Context {
    /// An empty context: no transaction, no deadline, no ids.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context whose round trips fail after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context whose round trips fail at `deadline`.
    ///
    /// An earlier deadline already on the context is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Derive a context tagged with the id of the request it serves.
    pub fn with_request_id(&self, id: impl Into<String>) -> Self {
        Self {
            request_id: Some(id.into()),
            ..self.clone()
        }
    }

    /// Derive a context tagged with a correlation id spanning services.
    pub fn with_correlation_id(&self, id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(id.into()),
            ..self.clone()
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Fill the `request_id` and `correlation_id` fields of `span`.
    pub(crate) fn record_ids(&self, span: &Span) {
        if let Some(id) = &self.request_id {
            span.record("request_id", id.as_str());
        }
        if let Some(id) = &self.correlation_id {
            span.record("correlation_id", id.as_str());
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True when this context carries a transaction.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub(crate) fn with_tx(&self, handle: TxHandle) -> Self {
        Self {
            tx: Some(handle),
            ..self.clone()
        }
    }

    /// Resolve the transaction handle or fail with `TransactionNotFound`.
    pub(crate) fn tx(&self, op: &'static str) -> FaylResult<&TxHandle> {
        self.tx.as_ref().ok_or(FaylError::TransactionNotFound(op))
    }

    /// Race a round trip against the context deadline. An elapsed deadline
    /// fails before `fut` is polled.
    pub(crate) async fn guard<T, F>(&self, op: &str, fut: F) -> FaylResult<T>
    where
        F: Future<Output = FaylResult<T>>,
    {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Err(FaylError::Cancelled(op.to_string())),
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| FaylError::Cancelled(op.to_string()))?,
            None => fut.await,
        }
    }
}
