//! Cancellable delayed action.
//!
//! A [`Debouncer`] owns at most one pending invocation of its action. Scheduling a new
//! value aborts the previous one while it is still waiting out the quiet period. Once the
//! quiet period is over the action is spawned on its own and runs to completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Action<T> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct Debouncer<T> {
    delay: Duration,
    action: Action<T>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.has_pending())
            .finish()
    }
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            delay,
            action: Arc::new(move |value| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(action(value))
            }),
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs the action with `value` once the default delay has passed without another
    /// call to `schedule`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, value: T) {
        self.schedule_after(value, self.delay);
    }

    pub fn schedule_after(&self, value: T, after: Duration) {
        let deadline = Instant::now() + after;
        let action = Arc::clone(&self.action);

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            tokio::spawn(action(value));
        });

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Aborts the pending invocation, if any. Returns whether one was still waiting.
    pub fn cancel_pending(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|p| p.into_inner()).take();
        match pending {
            Some(handle) => {
                let outstanding = !handle.is_finished();
                handle.abort();
                outstanding
            }
            None => false,
        }
    }
}

impl<T> Debouncer<T> {
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
    }
}
