//! Target process lifecycle tracking
//!
//! [`ProcessWatcher`] polls the process list and publishes launch/terminate
//! events for every process on a channel. [`LifecycleMonitor`] reduces those
//! events into a de-duplicated running/not-running state for one target and
//! says what the cache should do about each real transition.

use std::collections::HashSet;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use crossbeam::select;
use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};

use crate::error::{HammerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Launched(String),
    Terminated(String),
}

impl ProcessEvent {
    pub fn process_name(&self) -> &str {
        match self {
            ProcessEvent::Launched(name) | ProcessEvent::Terminated(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningState {
    Running,
    NotRunning,
}

impl RunningState {
    pub fn from_running(running: bool) -> Self {
        if running {
            RunningState::Running
        } else {
            RunningState::NotRunning
        }
    }

    pub fn is_running(self) -> bool {
        self == RunningState::Running
    }
}

/// What the cache has to do after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEffect {
    Refresh,
    ClearCache,
}

#[derive(Debug, Clone)]
pub struct LifecycleMonitor {
    target: String,
    state: RunningState,
}

impl LifecycleMonitor {
    pub fn new(target: impl Into<String>) -> Self {
        LifecycleMonitor {
            target: target.into(),
            state: RunningState::NotRunning,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> RunningState {
        self.state
    }

    /// Apply a process event. Events for other processes are ignored.
    pub fn apply(&mut self, event: &ProcessEvent) -> Option<LifecycleEffect> {
        if event.process_name() != self.target {
            return None;
        }

        match event {
            ProcessEvent::Launched(_) => self.transition(true),
            ProcessEvent::Terminated(_) => self.transition(false),
        }
    }

    /// Move to the given state; `None` when nothing changed.
    pub fn transition(&mut self, running: bool) -> Option<LifecycleEffect> {
        let next = RunningState::from_running(running);
        if next == self.state {
            return None;
        }

        self.state = next;
        if running {
            tracing::info!("{} launched", self.target);
            Some(LifecycleEffect::Refresh)
        } else {
            tracing::info!("{} terminated", self.target);
            Some(LifecycleEffect::ClearCache)
        }
    }
}

/// Source of the names of currently running processes.
pub trait ProcessSource: Send + 'static {
    fn running_names(&mut self) -> HashSet<String>;
}

/// Process list backed by `sysinfo`.
pub struct SystemProcesses {
    system: System,
}

impl SystemProcesses {
    pub fn new() -> Self {
        SystemProcesses {
            system: System::new(),
        }
    }

    /// PID of the first running process with exactly this name.
    pub fn pid_for_name(&mut self, name: &str) -> Option<u32> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system
            .processes()
            .iter()
            .find(|(_, p)| p.name().to_string_lossy() == name)
            .map(|(pid, _)| pid.as_u32())
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SystemProcesses {
    fn running_names(&mut self) -> HashSet<String> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().into_owned())
            .collect()
    }
}

/// Diff two process-name snapshots into events, launches first.
pub fn diff_snapshots(previous: &HashSet<String>, current: &HashSet<String>) -> Vec<ProcessEvent> {
    let mut launched: Vec<&String> = current.difference(previous).collect();
    let mut terminated: Vec<&String> = previous.difference(current).collect();
    launched.sort();
    terminated.sort();

    launched
        .into_iter()
        .map(|name| ProcessEvent::Launched(name.clone()))
        .chain(
            terminated
                .into_iter()
                .map(|name| ProcessEvent::Terminated(name.clone())),
        )
        .collect()
}

/// Background poller publishing process launch/terminate events.
pub struct ProcessWatcher {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ProcessWatcher {
    /// Start polling `source` every `interval`. `initial` is the snapshot the
    /// first diff is taken against.
    pub fn spawn<S: ProcessSource>(
        mut source: S,
        initial: HashSet<String>,
        interval: Duration,
    ) -> Result<(Self, Receiver<ProcessEvent>)> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (event_tx, event_rx) = unbounded();

        let thread = thread::Builder::new()
            .name("process-watcher".into())
            .spawn(move || {
                let mut previous = initial;
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        default(interval) => {
                            let current = source.running_names();
                            for event in diff_snapshots(&previous, &current) {
                                if event_tx.send(event).is_err() {
                                    return;
                                }
                            }
                            previous = current;
                        }
                    }
                }
                tracing::debug!("Process watcher stopped");
            })
            .map_err(|e| {
                HammerError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to spawn process watcher: {}", e),
                ))
            })?;

        Ok((
            ProcessWatcher {
                stop: Some(stop_tx),
                thread: Some(thread),
            },
            event_rx,
        ))
    }

    /// Stop polling and wait for the thread. The event channel closes.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Process watcher thread panicked");
            }
        }
    }
}

impl Drop for ProcessWatcher {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const TARGET: &str = "MarginNote 4";

    /// Process list the test can edit while a watcher polls it.
    #[derive(Clone, Default)]
    pub struct ManualProcesses {
        names: Arc<Mutex<HashSet<String>>>,
    }

    impl ManualProcesses {
        pub fn launch(&self, name: &str) {
            self.names.lock().insert(name.to_string());
        }

        pub fn terminate(&self, name: &str) {
            self.names.lock().remove(name);
        }
    }

    impl ProcessSource for ManualProcesses {
        fn running_names(&mut self) -> HashSet<String> {
            self.names.lock().clone()
        }
    }

    fn names(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn launch_and_terminate_transitions() {
        let mut monitor = LifecycleMonitor::new(TARGET);
        assert_eq!(monitor.state(), RunningState::NotRunning);

        let effect = monitor.apply(&ProcessEvent::Launched(TARGET.into()));
        assert_eq!(effect, Some(LifecycleEffect::Refresh));
        assert!(monitor.state().is_running());

        let effect = monitor.apply(&ProcessEvent::Terminated(TARGET.into()));
        assert_eq!(effect, Some(LifecycleEffect::ClearCache));
        assert_eq!(monitor.state(), RunningState::NotRunning);
    }

    #[test]
    fn duplicate_signals_do_not_fire_twice() {
        let mut monitor = LifecycleMonitor::new(TARGET);
        assert!(monitor.transition(true).is_some());
        assert!(monitor.transition(true).is_none());
        assert!(monitor.apply(&ProcessEvent::Launched(TARGET.into())).is_none());

        assert!(monitor.transition(false).is_some());
        assert!(monitor.transition(false).is_none());
    }

    #[test]
    fn other_processes_are_ignored() {
        let mut monitor = LifecycleMonitor::new(TARGET);
        assert!(monitor.apply(&ProcessEvent::Launched("Finder".into())).is_none());
        assert!(monitor.apply(&ProcessEvent::Launched("MarginNote".into())).is_none());
        assert_eq!(monitor.state(), RunningState::NotRunning);
    }

    #[test]
    fn diff_reports_launches_then_terminations() {
        let previous = names(&["Finder", "Safari"]);
        let current = names(&["Finder", "Mail", "MarginNote 4"]);

        let events = diff_snapshots(&previous, &current);
        assert_eq!(
            events,
            vec![
                ProcessEvent::Launched("Mail".into()),
                ProcessEvent::Launched("MarginNote 4".into()),
                ProcessEvent::Terminated("Safari".into()),
            ]
        );
        assert!(diff_snapshots(&current, &current).is_empty());
    }

    #[test]
    fn watcher_publishes_changes_and_stops() {
        let source = ManualProcesses::default();
        source.launch("Finder");
        let initial = source.clone().running_names();

        let (mut watcher, events) =
            ProcessWatcher::spawn(source.clone(), initial, Duration::from_millis(5)).unwrap();

        source.launch(TARGET);
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, ProcessEvent::Launched(TARGET.into()));

        source.terminate(TARGET);
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, ProcessEvent::Terminated(TARGET.into()));

        watcher.stop();
        assert!(events.recv_timeout(Duration::from_secs(2)).is_err());
    }
}
