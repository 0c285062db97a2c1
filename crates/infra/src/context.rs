//! Deadlines and cancellation for engine operations.
//!
//! Engines run the transactional part of every write through
//! [`OperationContext::run`]. If the context fires first, the body future is
//! dropped together with the open transaction, which rolls it back. Commit
//! happens after `run` returns and is never interrupted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::LedgerConfig;
use crate::error::{EngineError, EngineResult};

/// Caller-side trigger for cancelling one or more operations.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Deadline and cancellation signal of one engine call.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    deadline: Option<(Instant, Duration)>,
    cancel: Option<watch::Receiver<bool>>,
}

impl OperationContext {
    /// No deadline, no cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// Deadline taken from `LEDGER_OPERATION_TIMEOUT_MS`.
    pub fn from_config(config: &LedgerConfig) -> Self {
        match config.operation_timeout {
            Some(timeout) => Self::with_timeout(timeout),
            None => Self::background(),
        }
    }

    /// Replace the deadline with `now + timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout));
        self
    }

    pub fn cancelled_by(mut self, handle: &CancelHandle) -> Self {
        self.cancel = Some(handle.sender.subscribe());
        self
    }

    /// Fail fast if the context already fired.
    pub fn check(&self) -> EngineResult<()> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(EngineError::Cancelled);
        }
        if let Some((deadline, timeout)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::DeadlineExceeded(timeout));
            }
        }
        Ok(())
    }

    /// Drive `body` until it finishes or the context fires, whichever is first.
    pub async fn run<F, T>(&self, body: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        self.check()?;

        let cancelled = async {
            match self.cancel.clone() {
                Some(mut rx) => {
                    // A dropped handle can no longer cancel.
                    if rx.wait_for(|c| *c).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some((deadline, _)) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(EngineError::Cancelled),
            _ = expired => Err(EngineError::DeadlineExceeded(
                self.deadline.map(|(_, t)| t).unwrap_or_default(),
            )),
            out = body => out,
        }
    }
}
