use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, warn};

use crate::host::Transport;
use crate::req::{ControlFlags, Outcome, Queue, RequestId, State};
use crate::Result;

use super::Controller;

impl<T: Transport> Controller<T> {
    /// Handles all command timers that expired at or before `now`.
    pub fn fire_timeouts(&mut self, now: Instant) {
        let mut fired = false;
        while let Some(&(d, id)) = self.timers.first() {
            if d > now {
                break;
            }
            self.timers.remove(&(d, id));
            self.handle_timeout(id, now);
            fired = true;
        }
        if fired {
            self.process_waiting_requests(false, now);
        }
    }

    /// Completes a busy request with [`Outcome::TimedOut`]. If the
    /// controller never acknowledged the command, its credit is returned.
    /// A hard reset is requested from the transport after
    /// `timeout_reset_threshold` consecutive timeouts.
    pub fn handle_timeout(&mut self, id: RequestId, now: Instant) {
        let Ok(r) = self.pool.get(id) else { return };
        if r.state != State::Busy {
            return;
        }
        let (opcode, acked, timeout) = (r.opcode, r.acked, r.timeout);
        if !self.complete(id, Outcome::TimedOut, &[], now) {
            return;
        }
        warn!("{id} {opcode} timed out after {timeout:?}");
        self.stats.timeouts += 1;
        if !acked {
            self.credits = self.credits.saturating_add(1);
        }
        self.timeout_streak += 1;
        if self.timeout_streak >= self.cfg.timeout_reset_threshold {
            error!(
                "{} consecutive command timeouts, resetting controller",
                self.timeout_streak
            );
            self.timeout_streak = 0;
            self.stats.hard_resets += 1;
            self.t.hard_reset();
        }
    }

    /// Changes the timeout of a request. The timer of a busy request is
    /// re-armed to expire `d` after `now`.
    pub fn set_timeout(&mut self, id: RequestId, d: Duration, now: Instant) -> Result<()> {
        let r = self.pool.get_mut(id)?;
        r.timeout = d;
        if let Some(old) = r.deadline.take() {
            self.timers.remove(&(old, id));
            let new = now + d;
            r.deadline = Some(new);
            self.timers.insert((new, id));
        }
        Ok(())
    }

    /// Restores the original timeout of a request.
    pub fn restore_timeout(&mut self, id: RequestId, now: Instant) -> Result<()> {
        let d = self.pool.get(id)?.orig_timeout;
        self.set_timeout(id, d, now)
    }

    /// Disposes completed requests that were not disposed within the orphan
    /// grace period.
    pub fn cleanup_orphaned(&mut self, now: Instant) {
        while let Some(&(d, id)) = self.orphans.first() {
            if d > now {
                break;
            }
            self.orphans.remove(&(d, id));
            if matches!(self.pool.get(id), Ok(r) if r.state == State::Idle) {
                warn!("Reclaiming orphaned {id}");
                let _ = self.pool.dispose(id);
            }
        }
    }

    /// Times out every request whose timeout has expired, including waiting
    /// requests that were never sent, and reclaims orphaned requests.
    pub fn cleanup_expired(&mut self, now: Instant) {
        self.fire_timeouts(now);
        for id in self.pool.queued(Queue::Wait) {
            let expired = self.pool.get(id).map_or(false, |r| {
                !r.flags.contains(ControlFlags::NO_TIMEOUT)
                    && r.queued.map_or(false, |q| q + r.timeout <= now)
            });
            if expired {
                warn!("{id} expired while waiting");
                self.complete(id, Outcome::TimedOut, &[], now);
            }
        }
        self.cleanup_orphaned(now);
    }
}
