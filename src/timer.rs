//! One-shot cancellable timer backing the refresh retry schedule

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Sender, bounded};
use crossbeam::select;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a pending callback running on its own thread.
///
/// Dropping the handle cancels the timer if it has not fired yet; the thread
/// is detached. Use [`RetryTimer::cancel_and_join`] when the caller must know
/// the thread is gone.
pub struct RetryTimer {
    id: u64,
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl RetryTimer {
    /// Run `callback` with the timer id once `delay` has elapsed.
    pub fn schedule<F>(delay: Duration, callback: F) -> std::io::Result<Self>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name(format!("retry-timer-{}", id))
            .spawn(move || {
                select! {
                    // Either an explicit cancel or the handle being dropped.
                    recv(cancel_rx) -> _ => {}
                    default(delay) => callback(id),
                }
            })?;

        Ok(RetryTimer {
            id,
            cancel: Some(cancel_tx),
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the timer without waiting for its thread.
    pub fn cancel(mut self) {
        self.signal_cancel();
    }

    /// Stop the timer and wait for its thread to exit. Must not be called
    /// from inside the timer's own callback.
    pub fn cancel_and_join(mut self) {
        self.signal_cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Retry timer {} panicked", self.id);
            }
        }
    }

    fn signal_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.try_send(());
        }
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.signal_cancel();
    }
}

impl std::fmt::Debug for RetryTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryTimer").field("id", &self.id).finish()
    }
}
