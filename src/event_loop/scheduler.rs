//! Synchronous scheduling core: membership plus one round-robin cycle

use super::{StepOutcome, Worker, WorkerId};
use crate::error::{Result, RtPlotError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type SharedWorker = Arc<Mutex<Box<dyn Worker>>>;

struct Member {
    id: WorkerId,
    name: String,
    worker: SharedWorker,
}

/// What happened during one [`Scheduler::run_cycle`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Workers stepped this cycle
    pub stepped: usize,
    /// Workers that reported [`StepOutcome::Progress`]
    pub progressed: usize,
    /// Workers removed after the cycle (exhausted, failed or panicked)
    pub removed: Vec<WorkerId>,
}

/// Registered workers, stepped once each per cycle.
///
/// A cycle iterates a snapshot of the membership taken when it starts, so
/// [`add`](Self::add) and [`remove`](Self::remove) never wait on a running step
/// and take effect from the next cycle.
#[derive(Default)]
pub struct Scheduler {
    next_id: AtomicU64,
    members: Mutex<Vec<Member>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_members(&self) -> Result<MutexGuard<'_, Vec<Member>>> {
        self.members
            .lock()
            .map_err(|e| RtPlotError::Lock(format!("Failed to acquire scheduler lock: {}", e)))
    }

    pub fn add(&self, worker: Box<dyn Worker>) -> Result<WorkerId> {
        let id = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let name = worker.name().to_string();
        tracing::debug!("Registering worker '{}' as {}", name, id);
        self.lock_members()?.push(Member {
            id,
            name,
            worker: Arc::new(Mutex::new(worker)),
        });
        Ok(id)
    }

    /// Remove a worker. Removing a non-member is a logged no-op returning `false`.
    pub fn remove(&self, id: WorkerId) -> Result<bool> {
        let mut members = self.lock_members()?;
        match members.iter().position(|m| m.id == id) {
            Some(index) => {
                let member = members.remove(index);
                tracing::debug!("Removed worker '{}' ({})", member.name, id);
                Ok(true)
            }
            None => {
                tracing::warn!("Ignoring removal of {}: not a member", id);
                Ok(false)
            }
        }
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.lock_members()
            .map(|m| m.iter().any(|member| member.id == id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock_members().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.lock_members()
            .map(|m| m.iter().map(|member| member.id).collect())
            .unwrap_or_default()
    }

    /// Step every current member exactly once.
    ///
    /// Members that report [`StepOutcome::Exhausted`], return an error or panic
    /// are removed after the cycle. Errors are logged, never propagated.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let snapshot: Vec<(WorkerId, String, SharedWorker)> = self
            .lock_members()?
            .iter()
            .map(|m| (m.id, m.name.clone(), Arc::clone(&m.worker)))
            .collect();

        let mut report = CycleReport::default();
        for (id, name, worker) in snapshot {
            report.stepped += 1;
            match step_one(&worker) {
                Ok(StepOutcome::Progress) => report.progressed += 1,
                Ok(StepOutcome::Idle) => {}
                Ok(StepOutcome::Exhausted) => {
                    tracing::debug!("Worker '{}' ({}) finished", name, id);
                    report.removed.push(id);
                }
                Err(e) => {
                    tracing::error!("Worker '{}' ({}) failed and was removed: {}", name, id, e);
                    report.removed.push(id);
                }
            }
        }

        if !report.removed.is_empty() {
            self.lock_members()?
                .retain(|m| !report.removed.contains(&m.id));
        }
        Ok(report)
    }
}

fn step_one(worker: &SharedWorker) -> Result<StepOutcome> {
    let mut guard = worker
        .lock()
        .map_err(|_| RtPlotError::Lock("worker poisoned by an earlier panic".to_string()))?;
    match catch_unwind(AssertUnwindSafe(|| guard.step())) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(RtPlotError::WorkerPanic(message))
        }
    }
}
