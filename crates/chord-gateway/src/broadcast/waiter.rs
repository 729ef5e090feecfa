//! One-shot waiters
//!
//! A waiter pairs a predicate with a single-use completion channel. The
//! dispatcher takes every waiter for an event out of the registry before
//! evaluating them, so a fulfilled waiter is never offered a second frame.

use super::EventDispatcher;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Sleep;

/// Why a `wait_for` handle resolved without a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("timed out waiting for event")]
    TimedOut,

    /// The dispatcher dropped the waiter (client shut down)
    #[error("event dispatcher closed")]
    Closed,
}

/// Outcome of offering one frame to a waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Predicate did not match; keep waiting
    Pending,
    /// Predicate matched and the value was delivered
    Fulfilled,
    /// The handle is gone; drop the waiter
    Abandoned,
}

type Check = Box<dyn FnMut(&Value) -> Resolution + Send + Sync>;

/// Registered waiter, type-erased over its result
pub(crate) struct Waiter {
    pub(crate) id: u64,
    check: Check,
}

impl Waiter {
    pub(crate) fn new<T, P, F>(id: u64, predicate: P, transform: F, tx: oneshot::Sender<T>) -> Self
    where
        T: Send + 'static,
        P: Fn(&Value) -> bool + Send + Sync + 'static,
        F: FnOnce(&Value) -> T + Send + Sync + 'static,
    {
        let mut slot = Some((transform, tx));
        let check = move |data: &Value| {
            match slot.as_ref() {
                None => return Resolution::Abandoned,
                Some((_, tx)) if tx.is_closed() => return Resolution::Abandoned,
                Some(_) => {}
            }
            if !predicate(data) {
                return Resolution::Pending;
            }
            let Some((transform, tx)) = slot.take() else {
                return Resolution::Abandoned;
            };
            match tx.send(transform(data)) {
                Ok(()) => Resolution::Fulfilled,
                Err(_) => Resolution::Abandoned,
            }
        };
        Self {
            id,
            check: Box::new(check),
        }
    }

    pub(crate) fn offer(&mut self, data: &Value) -> Resolution {
        (self.check)(data)
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter").field("id", &self.id).finish_non_exhaustive()
    }
}

struct Registration {
    dispatcher: Weak<EventDispatcher>,
    event: String,
    id: u64,
}

/// Awaitable handle returned by `wait_for`
///
/// Resolves to the transformed payload of the first matching dispatch.
/// Dropping the handle (or calling [`WaitFor::cancel`]) removes the waiter
/// without touching other waiters on the same event.
#[must_use = "a waiter does nothing unless awaited"]
pub struct WaitFor<T> {
    rx: oneshot::Receiver<T>,
    registration: Option<Registration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

// Fields are never structurally pinned
impl<T> Unpin for WaitFor<T> {}

impl<T> WaitFor<T> {
    pub(crate) fn new(
        rx: oneshot::Receiver<T>,
        dispatcher: Weak<EventDispatcher>,
        event: String,
        id: u64,
    ) -> Self {
        Self {
            rx,
            registration: Some(Registration {
                dispatcher,
                event,
                id,
            }),
            deadline: None,
        }
    }

    /// Resolve to `Err(WaitError::TimedOut)` if nothing matches within `duration`
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.deadline = Some(Box::pin(tokio::time::sleep(duration)));
        self
    }

    /// Event name this handle waits on
    pub fn event(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.event.as_str())
    }

    /// Withdraw the waiter
    pub fn cancel(mut self) {
        self.deregister();
    }

    fn deregister(&mut self) {
        if let Some(registration) = self.registration.take() {
            if let Some(dispatcher) = registration.dispatcher.upgrade() {
                dispatcher.remove_waiter(&registration.event, registration.id);
            }
        }
    }
}

impl<T> Future for WaitFor<T> {
    type Output = Result<T, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(value)) => {
                // Already removed by the dispatcher
                this.registration = None;
                return Poll::Ready(Ok(value));
            }
            Poll::Ready(Err(_)) => {
                this.registration = None;
                return Poll::Ready(Err(WaitError::Closed));
            }
            Poll::Pending => {}
        }

        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                this.deregister();
                // A dispatch may have fulfilled us just before removal
                return Poll::Ready(this.rx.try_recv().map_err(|_| WaitError::TimedOut));
            }
        }

        Poll::Pending
    }
}

impl<T> Drop for WaitFor<T> {
    fn drop(&mut self) {
        self.deregister();
    }
}
