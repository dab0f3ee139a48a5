//! Deadlines and the call context that carries them.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{CallError, Result};

/// Values carried from an enclosing call into the calls it makes.
///
/// A server call exposes the context derived from its inbound
/// `grpc-timeout`; passing it to an outgoing call propagates the deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context without a deadline.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Timeout for an outgoing call: the remaining time until this context's
    /// deadline if there is one, otherwise `requested`.
    ///
    /// Fails with [`CallError::DeadlineExpired`] if the deadline has passed.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Result<Option<Duration>> {
        match self.deadline {
            None => Ok(requested),
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    return Err(CallError::DeadlineExpired);
                }
                Ok(Some(deadline - now))
            }
        }
    }
}

/// A call timeout with its optional expiry timer.
#[derive(Debug)]
pub struct Deadline {
    timeout: Option<Duration>,
    timer: Option<JoinHandle<()>>,
}

impl Deadline {
    /// A deadline with no timer.
    pub fn unscheduled(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            timer: None,
        }
    }

    /// Arm a timer that runs `on_expiry` once `timeout` elapses.
    ///
    /// Must be called within a tokio runtime.
    pub fn schedule<F>(timeout: Duration, on_expiry: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| CallError::InvalidState("deadline timer needs a tokio runtime"))?;
        trace!(?timeout, "arming deadline");
        let timer = handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            on_expiry();
        });
        Ok(Self {
            timeout: Some(timeout),
            timer: Some(timer),
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the timer is still pending.
    pub fn is_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }

    /// Disarm the timer. Later calls do nothing.
    ///
    /// Returns whether a timer was disarmed by this call.
    pub fn cancel(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                let pending = !timer.is_finished();
                timer.abort();
                if pending {
                    trace!("deadline disarmed");
                }
                pending
            }
            None => false,
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let deadline = Deadline::schedule(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(deadline.is_armed());

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!deadline.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut deadline = Deadline::schedule(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(deadline.cancel());
        assert!(!deadline.cancel());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(deadline.timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn schedule_outside_runtime_fails() {
        let err = Deadline::schedule(Duration::from_secs(1), || {}).unwrap_err();
        assert!(matches!(err, CallError::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn context_overrides_requested_timeout() {
        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(2)).await;

        let timeout = ctx
            .effective_timeout(Some(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(timeout, Some(Duration::from_secs(3)));
        assert_eq!(
            CallContext::new()
                .effective_timeout(Some(Duration::from_secs(60)))
                .unwrap(),
            Some(Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_context_is_rejected() {
        let ctx = CallContext::with_timeout(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(10)).await;

        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
        assert!(matches!(
            ctx.effective_timeout(None),
            Err(CallError::DeadlineExpired)
        ));
    }
}
