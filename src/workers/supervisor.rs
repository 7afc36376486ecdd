//! Bounded reconnect state machine shared by both pumps

use crate::error::{Result, RtPlotError};
use crate::transport::{Backoff, ReconnectPolicy, Transport};
use std::time::Instant;

/// Tracks whether a pump's link is up and schedules reconnect attempts.
///
/// The first attempt runs in the step that observed the loss. Later attempts
/// run on subsequent steps once the backoff delay has passed, so a step never
/// sleeps waiting for the link.
#[derive(Debug)]
pub struct LinkSupervisor {
    backoff: Backoff,
    down: bool,
}

impl LinkSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            backoff: Backoff::new(policy),
            down: false,
        }
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    /// Record a lost connection and try to restore it right away.
    ///
    /// `Ok(true)` means the link is back, `Ok(false)` that a retry is scheduled.
    pub fn connection_lost(&mut self, transport: &mut Transport, cause: &RtPlotError) -> Result<bool> {
        tracing::warn!("Connection lost ({}), reconnecting", cause);
        self.down = true;
        self.attempt(transport)
    }

    /// Check the link before doing work. Runs a due retry when it is down.
    pub fn ensure_up(&mut self, transport: &mut Transport) -> Result<bool> {
        if !self.down {
            return Ok(true);
        }
        if !self.backoff.ready(Instant::now()) {
            return Ok(false);
        }
        self.attempt(transport)
    }

    fn attempt(&mut self, transport: &mut Transport) -> Result<bool> {
        match transport.reconnect() {
            Ok(()) => {
                self.backoff.reset();
                self.down = false;
                Ok(true)
            }
            Err(e) => {
                let now = Instant::now();
                if self.backoff.record_failure(now) {
                    let delay = self.backoff.policy().delay_after(self.backoff.failures());
                    tracing::warn!(
                        "Reconnect attempt {} failed: {}; next try in {:?}",
                        self.backoff.failures(),
                        e,
                        delay
                    );
                    Ok(false)
                } else {
                    Err(RtPlotError::Connection(format!(
                        "Giving up after {} reconnect attempts: {}",
                        self.backoff.failures(),
                        e
                    )))
                }
            }
        }
    }
}
