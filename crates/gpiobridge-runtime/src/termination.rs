//! Run State and the [`TerminationController`].
//!
//! OS signals arrive asynchronously; the bridge only ever looks at a shared
//! [`RunState`] flag, once per loop iteration.  The controller's signal task
//! does nothing but flip that flag, so no hardware call can ever run inside
//! signal delivery.
//!
//! ```text
//!   Running ──SIGINT/SIGTERM──▶ Terminating ──shutdown done──▶ Stopped
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::task::JoinHandle;
use tracing::{info, warn};

const RUNNING: u8 = 0;
const TERMINATING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle phase of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Terminating,
    Stopped,
}

/// Shared tri-state run flag.  Clone it cheaply – all clones observe the same
/// state.
#[derive(Debug, Clone)]
pub struct RunState(Arc<AtomicU8>);

impl Default for RunState {
    fn default() -> Self {
        Self(Arc::new(AtomicU8::new(RUNNING)))
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        match self.0.load(Ordering::SeqCst) {
            RUNNING => Phase::Running,
            TERMINATING => Phase::Terminating,
            _ => Phase::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Move `Running -> Terminating`.
    ///
    /// Returns `true` only for the call that performed the transition;
    /// repeated requests are no-ops.
    pub fn request_stop(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, TERMINATING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move to `Stopped`.  Only the shutdown sequence calls this.
    pub(crate) fn mark_stopped(&self) {
        self.0.store(STOPPED, Ordering::SeqCst);
    }
}

/// Turns SIGINT and SIGTERM into a stop request on a [`RunState`].
///
/// The controller is *Armed* until the first signal arrives and *Signaled*
/// afterwards; further signals are absorbed.
pub struct TerminationController {
    run_state: RunState,
    task: JoinHandle<()>,
}

impl TerminationController {
    /// Register the signal handlers and start the watcher task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when the OS refuses to install a handler.
    pub fn install(run_state: RunState) -> std::io::Result<Self> {
        let task = spawn_watcher(run_state.clone())?;
        Ok(Self { run_state, task })
    }

    /// `true` once a termination signal has been observed.
    pub fn is_signaled(&self) -> bool {
        !self.run_state.is_running()
    }

    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }
}

impl Drop for TerminationController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Record one delivered signal.  Returns `true` if it initiated termination.
pub fn observe_signal(run_state: &RunState, signal: &str) -> bool {
    if run_state.request_stop() {
        info!(signal, "termination signal received");
        true
    } else {
        warn!(signal, "termination already in progress; signal ignored");
        false
    }
}

#[cfg(unix)]
fn spawn_watcher(run_state: RunState) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                received = interrupt.recv() => match received {
                    Some(()) => "SIGINT",
                    None => break,
                },
                received = terminate.recv() => match received {
                    Some(()) => "SIGTERM",
                    None => break,
                },
            };
            observe_signal(&run_state, name);
        }
    }))
}

#[cfg(not(unix))]
fn spawn_watcher(run_state: RunState) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            observe_signal(&run_state, "CTRL_C");
        }
    }))
}
