//! Request-scoped query context.
//!
//! Every metastore and scan operation takes a [`QueryContext`]. The context
//! carries:
//!
//! - The tenant the request runs on behalf of. All index and storage paths
//!   are derived from it, so two tenants never observe each other's data.
//! - A cancellation signal shared with a [`CancelHandle`].
//! - An optional deadline.
//!
//! Blocking work (object-storage reads and writes) is wrapped with
//! [`QueryContext::run`], which races the future against cancellation and
//! the deadline and reports either as a [`ContextError`] that callers can
//! tell apart from data errors.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use snafu::prelude::*;
use tokio::sync::watch;
use tokio::time::Instant;

/// Identifier of a tenant (the isolation boundary of every operation).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant ID, rejecting empty strings and path separators.
    pub fn new(id: impl Into<String>) -> Result<Self, ContextError> {
        let id = id.into();
        ensure!(
            !id.is_empty() && !id.contains('/'),
            InvalidTenantSnafu { tenant: id }
        );
        Ok(Self(id))
    }

    /// Borrow the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cancellation and deadline errors.
///
/// These are distinct from data errors so callers can decide to retry.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum ContextError {
    /// The request was cancelled through its [`CancelHandle`].
    #[snafu(display("Request cancelled"))]
    Cancelled,

    /// The request deadline passed before the operation finished.
    #[snafu(display("Request deadline exceeded"))]
    DeadlineExceeded,

    /// The tenant identifier is empty or contains a path separator.
    #[snafu(display("Invalid tenant ID {tenant:?}"))]
    InvalidTenant {
        /// The rejected tenant identifier.
        tenant: String,
    },
}

/// Handle used to cancel every context derived from it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Tenant-scoped, cancellable request context.
#[derive(Debug, Clone)]
pub struct QueryContext {
    tenant: TenantId,
    cancel: watch::Receiver<bool>,
    // Keeps the channel open for contexts created without an external handle.
    _owner: Option<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// Create a context for `tenant` that is never cancelled and has no deadline.
    pub fn new(tenant: TenantId) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tenant,
            cancel: rx,
            _owner: Some(tx),
            deadline: None,
        }
    }

    /// Create a context together with the handle that cancels it.
    pub fn with_cancel(tenant: TenantId) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            tenant,
            cancel: rx,
            _owner: None,
            deadline: None,
        };
        (ctx, CancelHandle { tx })
    }

    /// Return a copy of this context that expires after `timeout`.
    ///
    /// An existing earlier deadline is kept.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Tenant the request runs for.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Deadline of the request, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Return an error if the context is already cancelled or expired.
    pub fn check(&self) -> Result<(), ContextError> {
        if *self.cancel.borrow() {
            return CancelledSnafu.fail();
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return DeadlineExceededSnafu.fail();
            }
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or expires first.
    ///
    /// When the context wins the race, `fut` is dropped, which releases any
    /// resources it acquired.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ContextError>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            // A closed channel means no handle can cancel anymore.
            if cancel.wait_for(|c| *c).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => CancelledSnafu.fail(),
            _ = expired => DeadlineExceededSnafu.fail(),
            out = fut => Ok(out),
        }
    }
}
