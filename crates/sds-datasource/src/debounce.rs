//! Trailing-edge debouncing of async calls.
//!
//! The stream picker issues a lookup for every keystroke; a [`Debouncer`]
//! makes sure only the last lookup of a burst reaches the data store.
use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::sync::oneshot;

/// Why a scheduled call did not run.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DebounceError {
    #[error("call was superseded by a later call")]
    Superseded,
    #[error("call was cancelled before it ran")]
    Cancelled,
}

/// Wraps an async function so that only the most recent call made within
/// `delay` of each other actually runs.
pub struct Debouncer<F> {
    f: F,
    delay: Duration,
    pending: Mutex<Option<oneshot::Sender<DebounceError>>>,
}

impl<F> std::fmt::Debug for Debouncer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.lock().is_some())
            .finish()
    }
}

impl<F> Debouncer<F> {
    pub fn new(delay: Duration, f: F) -> Self {
        Self {
            f,
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Cancel the call waiting for its timer, if any.
    ///
    /// Calls whose timer has already fired are unaffected.
    pub fn cancel_pending(&self) {
        if let Some(pending) = self.lock().take() {
            let _ = pending.send(DebounceError::Cancelled);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<oneshot::Sender<DebounceError>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F, I, Fut> Debouncer<F>
where
    F: Fn(I) -> Fut,
    Fut: Future,
{
    /// Schedule a call with `input`.
    ///
    /// Any call still waiting for its timer is superseded as soon as this
    /// method returns, even if the returned future is never polled. The
    /// returned future resolves once the delay has passed and the wrapped
    /// function has run, or with an error if this call is itself superseded
    /// or cancelled first.
    pub fn schedule<'a>(
        &'a self,
        input: I,
    ) -> impl Future<Output = Result<Fut::Output, DebounceError>> + 'a
    where
        I: 'a,
        Fut: 'a,
    {
        let (tx, mut rx) = oneshot::channel();
        if let Some(previous) = self.lock().replace(tx) {
            let _ = previous.send(DebounceError::Superseded);
        }
        async move {
            tokio::select! {
                biased;
                reason = &mut rx => return Err(reason.unwrap_or(DebounceError::Cancelled)),
                () = tokio::time::sleep(self.delay) => {}
            }
            {
                let mut pending = self.lock();
                if let Ok(reason) = rx.try_recv() {
                    return Err(reason);
                }
                // Still ours: nobody can replace it while the lock is held.
                pending.take();
            }
            Ok((self.f)(input).await)
        }
    }
}
