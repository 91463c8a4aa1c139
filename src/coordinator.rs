//! Cache coordinator: validate, refresh and retry the element cache
//!
//! Every refresh, whoever asks for it, goes through [`Inner::refresh`]:
//! - an atomic flag makes concurrent requests skip instead of queueing;
//! - the cache mutex is held for the whole algorithm;
//! - background failures schedule one retry at a time, user failures never do.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::{ElementCache, WindowMode};
use crate::error::{HammerError, Result};
use crate::lifecycle::{
    LifecycleEffect, LifecycleMonitor, ProcessEvent, ProcessSource, ProcessWatcher, RunningState,
};
use crate::timer::RetryTimer;
use crate::toolbar::ToolbarPattern;
use crate::tree::ElementTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            interval: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub target_app: String,
    pub window_mode: WindowMode,
    pub toolbar: ToolbarPattern,
    pub retry: RetryPolicy,
}

/// Who asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Lifecycle,
    Retry,
    User,
}

impl Trigger {
    fn is_background(self) -> bool {
        !matches!(self, Trigger::User)
    }
}

#[derive(Default)]
struct RetryState {
    attempts: u32,
    timer: Option<RetryTimer>,
}

struct Subscription {
    watcher: ProcessWatcher,
    dispatcher: Option<JoinHandle<()>>,
}

/// Point-in-time view of the coordinator for status output.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    pub target_app: String,
    pub state: RunningState,
    pub application_cached: bool,
    pub windows_cached: usize,
    pub buttons_cached: usize,
    pub retry_attempts: u32,
    pub retry_pending: bool,
}

struct Inner<T: ElementTree> {
    tree: Arc<T>,
    settings: CoordinatorSettings,
    cache: Mutex<ElementCache<T::Handle>>,
    monitor: Mutex<LifecycleMonitor>,
    updating: AtomicBool,
    closed: AtomicBool,
    retry: Mutex<RetryState>,
    subscription: Mutex<Option<Subscription>>,
}

/// Owns the element cache and keeps it usable for button presses.
///
/// Cloning is cheap and every clone drives the same cache.
pub struct CacheCoordinator<T: ElementTree> {
    inner: Arc<Inner<T>>,
}

impl<T: ElementTree> Clone for CacheCoordinator<T> {
    fn clone(&self) -> Self {
        CacheCoordinator {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ElementTree> CacheCoordinator<T> {
    pub fn new(tree: Arc<T>, settings: CoordinatorSettings) -> Self {
        let cache = ElementCache::new(settings.window_mode);
        let monitor = LifecycleMonitor::new(settings.target_app.clone());
        CacheCoordinator {
            inner: Arc::new(Inner {
                tree,
                settings,
                cache: Mutex::new(cache),
                monitor: Mutex::new(monitor),
                updating: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                retry: Mutex::new(RetryState::default()),
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn tree(&self) -> &Arc<T> {
        &self.inner.tree
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.inner.settings
    }

    pub fn is_running(&self) -> bool {
        self.inner.monitor.lock().state().is_running()
    }

    /// Feed a confirmed running/not-running signal for the target.
    pub fn notify_process_lifecycle(&self, running: bool) {
        let effect = self.inner.monitor.lock().transition(running);
        self.inner.apply_effect(effect);
    }

    /// Feed a raw process event; events for other processes are ignored.
    pub fn handle_process_event(&self, event: &ProcessEvent) {
        let effect = self.inner.monitor.lock().apply(event);
        self.inner.apply_effect(effect);
    }

    /// Validate the cached buttons and refresh them if needed.
    ///
    /// This is the user-facing entry point: it cancels any pending
    /// background retry and never schedules one itself.
    pub fn ensure_ready(&self) -> Result<()> {
        if !self.is_running() {
            return Err(HammerError::TargetNotRunning);
        }
        self.inner.refresh(Trigger::User)
    }

    pub fn get_button(&self, index: usize) -> Option<T::Handle> {
        self.inner.cache.lock().button(index).cloned()
    }

    pub fn buttons(&self) -> Vec<T::Handle> {
        self.inner.cache.lock().buttons().to_vec()
    }

    /// Make sure the toolbar is usable and press button `index`.
    pub fn press_button(&self, index: usize) -> Result<()> {
        self.ensure_ready()?;

        let count = self.inner.cache.lock().buttons().len();
        let button = self
            .get_button(index)
            .ok_or(HammerError::ButtonIndexOutOfRange { index, count })?;

        let tree = &self.inner.tree;
        let action = &self.inner.settings.toolbar.press_action;
        if !tree.supports_action(&button, action) {
            if !tree.is_valid(&button) {
                self.inner.forget_button(&button);
                return Err(HammerError::StaleHandle);
            }
            return Err(HammerError::ActionUnsupported(action.clone()));
        }

        if !tree.invoke_action(&button, action) {
            if !tree.is_valid(&button) {
                self.inner.forget_button(&button);
                return Err(HammerError::StaleHandle);
            }
            return Err(HammerError::ActionFailed(action.clone()));
        }

        tracing::info!("Pressed toolbar button {}", index);
        Ok(())
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let (application_cached, windows_cached, buttons_cached) = {
            let cache = self.inner.cache.lock();
            (
                cache.application().is_some(),
                cache.windows().len(),
                cache.buttons().len(),
            )
        };
        let (retry_attempts, retry_pending) = {
            let retry = self.inner.retry.lock();
            (retry.attempts, retry.timer.is_some())
        };

        CoordinatorSnapshot {
            target_app: self.inner.settings.target_app.clone(),
            state: self.inner.monitor.lock().state(),
            application_cached,
            windows_cached,
            buttons_cached,
            retry_attempts,
            retry_pending,
        }
    }

    /// Scan `source` for the target, then keep following process launches
    /// and terminations until [`CacheCoordinator::shutdown`].
    pub fn start_monitoring<S: ProcessSource>(
        &self,
        mut source: S,
        poll_interval: Duration,
    ) -> Result<()> {
        let initial: HashSet<String> = source.running_names();
        let running = initial.contains(&self.inner.settings.target_app);
        if running {
            tracing::info!("{} already running", self.inner.settings.target_app);
        }

        let (watcher, events) = ProcessWatcher::spawn(source, initial, poll_interval)?;

        let weak = Arc::downgrade(&self.inner);
        let dispatcher = thread::Builder::new()
            .name("lifecycle-dispatch".into())
            .spawn(move || {
                for event in events.iter() {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    let effect = inner.monitor.lock().apply(&event);
                    inner.apply_effect(effect);
                }
            })
            .map_err(HammerError::Io)?;

        let previous = self.inner.subscription.lock().replace(Subscription {
            watcher,
            dispatcher: Some(dispatcher),
        });
        if let Some(previous) = previous {
            Inner::<T>::stop_subscription(previous);
        }

        self.notify_process_lifecycle(running);
        Ok(())
    }

    /// Stop lifecycle monitoring, cancel any pending retry and clear the
    /// cache. No callback touches the cache after this returns.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);

        let subscription = self.inner.subscription.lock().take();
        if let Some(subscription) = subscription {
            Inner::<T>::stop_subscription(subscription);
        }

        let timer = self.inner.retry.lock().timer.take();
        if let Some(timer) = timer {
            timer.cancel_and_join();
        }

        self.inner.cache.lock().clear_all();
        tracing::debug!("Cache coordinator shut down");
    }

    #[cfg(test)]
    fn retry_attempts(&self) -> u32 {
        self.inner.retry.lock().attempts
    }

    #[cfg(test)]
    fn has_pending_retry(&self) -> bool {
        self.inner.retry.lock().timer.is_some()
    }

    #[cfg(test)]
    fn cache_is_empty(&self) -> bool {
        self.inner.cache.lock().is_empty()
    }

    #[cfg(test)]
    fn refresh_in_background(&self) -> Result<()> {
        self.inner.refresh(Trigger::Lifecycle)
    }
}

/// Resets the in-progress flag when the refresh ends, however it ends.
struct UpdatingGuard<'a>(&'a AtomicBool);

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: ElementTree> Inner<T> {
    fn apply_effect(self: &Arc<Self>, effect: Option<LifecycleEffect>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        match effect {
            Some(LifecycleEffect::Refresh) => {
                self.reset_retry();
                let _ = self.refresh(Trigger::Lifecycle);
            }
            Some(LifecycleEffect::ClearCache) => {
                self.reset_retry();
                self.cache.lock().clear_all();
                tracing::info!("Element cache cleared");
            }
            None => {}
        }
    }

    fn refresh(self: &Arc<Self>, trigger: Trigger) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HammerError::TargetNotRunning);
        }
        if trigger.is_background() && !self.monitor.lock().state().is_running() {
            tracing::debug!("Target not running, dropping {:?} refresh", trigger);
            return Err(HammerError::TargetNotRunning);
        }

        if self
            .updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Refresh already in progress, skipping {:?} refresh", trigger);
            return Err(HammerError::RefreshInProgress);
        }
        let _guard = UpdatingGuard(&self.updating);

        if trigger == Trigger::User {
            self.cancel_retry();
        }

        let outcome = {
            let mut cache = self.cache.lock();
            self.attempt_refresh(&mut cache)
        };

        match &outcome {
            Ok(()) => {
                tracing::info!("Element cache refreshed ({:?})", trigger);
                self.reset_retry();
            }
            Err(HammerError::RefreshInProgress) => {}
            Err(e) if trigger.is_background() && e.is_retryable() => {
                tracing::warn!("Background refresh failed: {}", e);
                self.schedule_retry();
            }
            Err(e) => {
                tracing::warn!("Refresh failed ({:?}), not retrying: {}", trigger, e);
            }
        }

        outcome
    }

    fn attempt_refresh(&self, cache: &mut ElementCache<T::Handle>) -> Result<()> {
        let tree = &*self.tree;

        let application = match cache.application() {
            Some(app) if tree.is_valid(app) => {
                tracing::trace!("Application cache still valid");
                app.clone()
            }
            cached => {
                if cached.is_some() {
                    tracing::debug!("Cached application is stale, re-fetching");
                }
                let app = tree
                    .find_application(&self.settings.target_app)
                    .ok_or(HammerError::ApplicationNotFound)?;
                cache.set_application(app.clone());
                app
            }
        };

        let cached_window = cache
            .window()
            .filter(|w| tree.is_valid(w) && tree.is_focused(w))
            .cloned();

        let (window, window_fresh) = match cached_window {
            Some(window) => (window, true),
            None => {
                if cache.mode() == WindowMode::Multi {
                    let open = tree.windows(&application);
                    cache.retain_windows(|w| match &open {
                        Some(open) => open.contains(w),
                        None => tree.is_valid(w),
                    });
                }
                let window = tree
                    .focused_window(&application)
                    .ok_or(HammerError::WindowNotFound)?;
                cache.set_window(window.clone());
                tracing::debug!("Window cache updated");
                (window, false)
            }
        };

        if window_fresh
            && !cache.buttons().is_empty()
            && cache.buttons().iter().all(|b| tree.is_valid(b))
        {
            tracing::debug!("Button cache still valid");
            return Ok(());
        }

        cache.clear_buttons();
        let buttons = self.settings.toolbar.locate(tree, &window)?;
        for button in buttons {
            cache.add_button(button);
        }
        Ok(())
    }

    fn forget_button(&self, button: &T::Handle) {
        let mut cache = self.cache.lock();
        if cache.contains_button(button) {
            cache.clear_buttons();
        }
    }

    fn schedule_retry(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        // Checked under the retry lock so a concurrent termination either
        // sees this timer in reset_retry or stops it from being created.
        let mut retry = self.retry.lock();
        if !self.monitor.lock().state().is_running() {
            tracing::debug!("Target not running, not scheduling a retry");
            return;
        }
        if retry.attempts >= self.settings.retry.max_attempts {
            tracing::info!(
                "Reached {} retry attempts, waiting for the next launch",
                retry.attempts
            );
            if let Some(timer) = retry.timer.take() {
                timer.cancel();
            }
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        match RetryTimer::schedule(self.settings.retry.interval, move |id| {
            if let Some(inner) = weak.upgrade() {
                inner.on_retry_elapsed(id);
            }
        }) {
            Ok(timer) => {
                if let Some(previous) = retry.timer.replace(timer) {
                    previous.cancel();
                }
            }
            Err(e) => tracing::error!("Failed to schedule refresh retry: {}", e),
        }
    }

    fn on_retry_elapsed(self: &Arc<Self>, id: u64) {
        {
            let mut retry = self.retry.lock();
            match &retry.timer {
                Some(timer) if timer.id() == id => {}
                _ => return,
            }
            retry.timer = None;
            retry.attempts += 1;
            tracing::info!("Retrying refresh (attempt {})", retry.attempts);
        }
        // The refresh that scheduled this timer may still hold the guard.
        // A skipped attempt is not counted; try again after another interval.
        if let Err(HammerError::RefreshInProgress) = self.refresh(Trigger::Retry) {
            {
                let mut retry = self.retry.lock();
                if retry.timer.is_some() {
                    return;
                }
                retry.attempts = retry.attempts.saturating_sub(1);
            }
            self.schedule_retry();
        }
    }

    fn cancel_retry(&self) {
        let timer = self.retry.lock().timer.take();
        if let Some(timer) = timer {
            tracing::debug!("Cancelled pending retry {}", timer.id());
            timer.cancel();
        }
    }

    fn reset_retry(&self) {
        self.cancel_retry();
        self.retry.lock().attempts = 0;
    }

    fn stop_subscription(mut subscription: Subscription) {
        subscription.watcher.stop();
        if let Some(dispatcher) = subscription.dispatcher.take() {
            if dispatcher.join().is_err() {
                tracing::warn!("Lifecycle dispatcher panicked");
            }
        }
    }
}

impl<T: ElementTree> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.retry.get_mut().timer.take() {
            timer.cancel();
        }
    }
}
