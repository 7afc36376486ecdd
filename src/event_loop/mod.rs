//! Cooperative event loop
//!
//! An [`EventLoop`] owns one background thread that drives a [`Scheduler`]:
//! every cycle, each registered [`Worker`] gets exactly one non-blocking
//! [`step`](Worker::step). There is no preemption; the cycle boundary is the
//! only yield point, and removing a worker is the only way to cancel it.
//!
//! # Lifecycle
//!
//! ```text
//! Running --stop()--> Idle --add_worker()/resume()--> Running
//!    \                  /
//!     +--shutdown()/drop--> Exit (thread joined)
//! ```
//!
//! Stopping keeps the thread and the registered workers; stepping resumes as
//! soon as a worker is added again.

mod scheduler;

pub use scheduler::{CycleReport, Scheduler};

use crate::config::EventLoopConfig;
use crate::error::{Result, RtPlotError};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What a single step accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing to do right now
    Idle,
    /// Work was done; the loop should not back off
    Progress,
    /// Finished; remove after this cycle
    Exhausted,
}

/// A non-blocking unit of work driven by an [`EventLoop`]
pub trait Worker: Send {
    fn name(&self) -> &str;

    /// Do a bounded amount of work and return promptly.
    ///
    /// An `Err` is logged and the worker is removed from its loop.
    fn step(&mut self) -> Result<StepOutcome>;
}

/// Handle to a registered worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Running = 0,
    Idle = 1,
    Exit = 2,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Running,
            1 => LoopState::Idle,
            _ => LoopState::Exit,
        }
    }
}

struct LoopShared {
    scheduler: Scheduler,
    state: AtomicU8,
    wake_tx: Sender<()>,
}

impl LoopShared {
    fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::Release);
        // A full slot already guarantees a wakeup
        let _ = self.wake_tx.try_send(());
    }
}

/// Background thread stepping a set of workers
pub struct EventLoop {
    name: String,
    shared: Arc<LoopShared>,
    handle: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Start the loop thread
    pub fn spawn(name: &str, config: &EventLoopConfig) -> Result<Self> {
        let (wake_tx, wake_rx) = bounded(1);
        let shared = Arc::new(LoopShared {
            scheduler: Scheduler::new(),
            state: AtomicU8::new(LoopState::Running as u8),
            wake_tx,
        });

        let thread_shared = Arc::clone(&shared);
        let idle_interval = config.idle_interval();
        let poll_interval = config.poll_interval();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(thread_shared, wake_rx, idle_interval, poll_interval))
            .map_err(|e| RtPlotError::Config(format!("Failed to spawn event loop thread: {}", e)))?;

        tracing::debug!("Event loop '{}' started", name);
        Ok(Self {
            name: name.to_string(),
            shared,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    /// Register a worker, resuming the loop if it was stopped
    pub fn add_worker(&self, worker: Box<dyn Worker>) -> Result<WorkerId> {
        let id = self.shared.scheduler.add(worker)?;
        if self.shared.state() == LoopState::Idle {
            self.shared.set_state(LoopState::Running);
        } else {
            let _ = self.shared.wake_tx.try_send(());
        }
        Ok(id)
    }

    pub fn add<W: Worker + 'static>(&self, worker: W) -> Result<WorkerId> {
        self.add_worker(Box::new(worker))
    }

    /// Remove a worker; `false` when it was not a member
    pub fn remove_worker(&self, id: WorkerId) -> Result<bool> {
        self.shared.scheduler.remove(id)
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.shared.scheduler.contains(id)
    }

    pub fn worker_count(&self) -> usize {
        self.shared.scheduler.len()
    }

    /// Stop stepping workers without ending the thread
    pub fn stop(&self) {
        if self.shared.state() == LoopState::Running {
            tracing::debug!("Event loop '{}' going idle", self.name);
            self.shared.set_state(LoopState::Idle);
        }
    }

    pub fn resume(&self) {
        if self.shared.state() == LoopState::Idle {
            self.shared.set_state(LoopState::Running);
        }
    }

    /// Block until no workers remain or `timeout` passes; `true` if empty
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.shared.scheduler.is_empty() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// End the thread and join it
    pub fn shutdown(mut self) {
        self.exit_and_join();
    }

    fn exit_and_join(&mut self) {
        self.shared.set_state(LoopState::Exit);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Event loop '{}' thread panicked", self.name);
            } else {
                tracing::debug!("Event loop '{}' exited", self.name);
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.exit_and_join();
    }
}

fn run(
    shared: Arc<LoopShared>,
    wake_rx: Receiver<()>,
    idle_interval: Duration,
    poll_interval: Duration,
) {
    loop {
        match shared.state() {
            LoopState::Exit => break,
            LoopState::Idle => {
                let _ = wake_rx.recv_timeout(idle_interval);
                continue;
            }
            LoopState::Running => {}
        }

        if shared.scheduler.is_empty() {
            let _ = wake_rx.recv_timeout(idle_interval);
            continue;
        }

        match shared.scheduler.run_cycle() {
            Ok(report) if report.progressed == 0 => {
                let _ = wake_rx.recv_timeout(poll_interval);
            }
            Ok(report) => {
                tracing::trace!(
                    "Cycle stepped {} workers, {} progressed",
                    report.stepped,
                    report.progressed
                );
            }
            Err(e) => {
                tracing::error!("Event loop cycle failed: {}", e);
                let _ = wake_rx.recv_timeout(idle_interval);
            }
        }
    }
}
