//! Per-operation deadline and cancellation.
//!
//! Every client and manager operation takes an [`OpContext`]. A context can
//! carry a deadline, a cancellation flag, or both. Operations check it before
//! doing any work and while waiting for the store's writer lock, so a caller
//! that gives up gets control back promptly and nothing is written.

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline and cancellation signal for a single operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

/// Handle that cancels every [`OpContext`] derived from it.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Cancels all operations using this handle's context.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl OpContext {
    /// A context that never expires and cannot be cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context expiring `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::default().deadline(Instant::now() + timeout)
    }

    /// A cancellable context together with the handle that cancels it.
    #[must_use]
    pub fn cancellable() -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = Self {
            deadline: None,
            cancelled: Some(Arc::clone(&flag)),
        };
        (ctx, CancelHandle(flag))
    }

    /// Sets (or tightens) the deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline, or `None` without one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails if the context has been cancelled or its deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] or [`CoreError::DeadlineExceeded`].
    pub fn check(&self) -> CoreResult<()> {
        if self
            .cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            return Err(CoreError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CoreError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
