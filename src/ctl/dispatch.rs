use smallvec::SmallVec;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::hci::Opcode;
use crate::host::Transport;
use crate::req::{
    Completion, ControlFlags, Key, Notifier, Outcome, Queue, Request, RequestId, State,
    Submission,
};
use crate::{Error, Result};

use super::{Controller, PowerState};

impl<T: Transport> Controller<T> {
    /// Creates a request and queues it for dispatch. The notifier is invoked
    /// exactly once when the request completes, times out, or is aborted.
    pub fn submit(&mut self, sub: Submission, n: Notifier, now: Instant) -> Result<RequestId> {
        if self.power != PowerState::On {
            return Err(Error::TransportUnavailable);
        }
        let req = Request::new(sub, self.cfg.default_timeout(), now)?;
        let id = self.pool.create(req)?;
        if let Err(e) = self.enqueue(id, n, now) {
            let _ = self.pool.dispose(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Queues an idle request for dispatch. A completed request may be queued
    /// again to reissue its command.
    pub fn enqueue(&mut self, id: RequestId, n: Notifier, now: Instant) -> Result<()> {
        let grace = self.cfg.orphan_grace();
        let r = self.pool.get_mut(id)?;
        if r.state != State::Idle {
            return Err(Error::InvalidState);
        }
        self.orphans.remove(&(r.idle_since + grace, id));
        r.notifier = Some(n);
        r.outcome = None;
        r.results.clear();
        r.intermediate_seen = 0;
        r.acked = false;
        r.timeout = r.orig_timeout;
        (r.queued, r.started) = (Some(now), None);
        let opcode = r.opcode;
        self.pool.set_state(id, State::Waiting)?;
        trace!("Queued {id} {opcode}");
        if opcode == Opcode::RESET {
            self.handle_special_opcodes(id, now);
        } else {
            self.process_waiting_requests(false, now);
        }
        Ok(())
    }

    /// Applies the queuing rules of commands that affect all other commands.
    /// `HCI_Reset` aborts all other pending requests, clears connection state,
    /// and is sent without waiting for a command credit. No further commands
    /// are sent until it completes ([Vol 4] Part E, Section 7.3.2).
    pub fn handle_special_opcodes(&mut self, id: RequestId, now: Instant) {
        let Ok(r) = self.pool.get(id) else { return };
        if r.opcode != Opcode::RESET {
            return;
        }
        let mut pending = self.pool.queued(Queue::Busy);
        pending.extend(self.pool.queued(Queue::Wait));
        for other in pending.into_iter().filter(|&v| v != id) {
            debug!("Reset aborts {other}");
            self.complete(other, Outcome::Aborted, &[], now);
        }
        self.reg.clear();
        self.flow.reset();
        self.process_waiting_requests(true, now);
    }

    /// Sends waiting requests, oldest first, while command credits are
    /// available or unconditionally if `force` is set. A serialized request
    /// is skipped while another request of its group is busy or skipped.
    pub fn process_waiting_requests(&mut self, force: bool, now: Instant) {
        if !self.lifecycle.accepts_commands() || self.reset_pending() {
            return;
        }
        let mut skipped: SmallVec<[Key; 4]> = SmallVec::new();
        for id in self.pool.queued(Queue::Wait) {
            if self.credits == 0 && !force {
                break;
            }
            let Ok(r) = self.pool.get(id) else { continue };
            if r.is_serialized() {
                let k = r.key();
                if skipped.iter().any(|s| s.opcode == k.opcode && s.addr == k.addr)
                    || self.pool.find(Queue::Busy, |b| k.same_group(b)).is_some()
                {
                    trace!("{id} waits for {}", k.opcode);
                    skipped.push(k);
                    continue;
                }
            }
            let _ = self.sending_request(id, now);
        }
    }

    /// Returns whether an `HCI_Reset` command is waiting for its completion.
    pub(super) fn reset_pending(&self) -> bool {
        (self.pool).find(Queue::Busy, |r| r.opcode == Opcode::RESET).is_some()
    }

    /// Writes the command of a waiting request to the transport, arms its
    /// timer, and moves it to the busy queue. The request completes with
    /// [`Outcome::Aborted`] if the transport write fails.
    pub fn sending_request(&mut self, id: RequestId, now: Instant) -> Result<()> {
        if !self.lifecycle.accepts_commands() {
            return Err(Error::TransportUnavailable);
        }
        let r = self.pool.get_mut(id)?;
        if r.state != State::Waiting {
            return Err(Error::InvalidState);
        }
        let opcode = r.opcode;
        trace!("Command: {:02X?}", r.packet.as_ref());
        if let Err(e) = self.t.send_command(r.packet.as_ref()) {
            error!("Failed to send {id} {opcode}: {e}");
            self.complete(id, Outcome::Aborted, &[], now);
            return Err(e.into());
        }
        r.started = Some(now);
        if !r.flags.contains(ControlFlags::NO_TIMEOUT) {
            let d = now + r.timeout;
            r.deadline = Some(d);
            self.timers.insert((d, id));
        }
        self.credits = if opcode == Opcode::RESET {
            0
        } else {
            self.credits.saturating_sub(1)
        };
        self.pool.set_state(id, State::Busy)?;
        debug!("Sent {id} {opcode}");
        Ok(())
    }

    /// Aborts a waiting or busy request.
    pub fn abort_request(&mut self, id: RequestId, now: Instant) -> Result<()> {
        if self.pool.get(id)?.state == State::Idle {
            return Err(Error::InvalidState);
        }
        debug!("Aborting {id}");
        self.complete(id, Outcome::Aborted, &[], now);
        self.process_waiting_requests(false, now);
        Ok(())
    }

    /// Aborts all waiting and busy requests. With `destroy`, aborted requests
    /// are also disposed, along with idle ones if `include_idle` is set.
    pub fn kill_all_pending(&mut self, destroy: bool, include_idle: bool, now: Instant) {
        let mut n = 0;
        for id in self.pool.allocated() {
            let Ok(r) = self.pool.get(id) else { continue };
            let idle = r.state == State::Idle;
            if !idle {
                self.complete(id, Outcome::Aborted, &[], now);
                n += 1;
            }
            if destroy && (include_idle || !idle) && self.pool.get(id).is_ok() {
                let _ = self.dispose(id);
            }
        }
        if n > 0 {
            warn!("Aborted {n} pending requests");
        }
    }

    /// Disposes an idle request.
    pub fn dispose(&mut self, id: RequestId) -> Result<()> {
        let r = self.pool.get(id)?;
        let orphan = (r.idle_since + self.cfg.orphan_grace(), id);
        self.pool.dispose(id)?;
        self.orphans.remove(&orphan);
        Ok(())
    }

    /// Completes a waiting or busy request and delivers its completion. Only
    /// the first call for each request has any effect. Returns whether the
    /// request was completed.
    pub(crate) fn complete(
        &mut self,
        id: RequestId,
        outcome: Outcome,
        params: &[u8],
        now: Instant,
    ) -> bool {
        let Ok(r) = self.pool.get_mut(id) else {
            return false;
        };
        if r.state == State::Idle {
            return false;
        }
        let Some(notifier) = r.notifier.take() else {
            warn!("{id} has no notifier");
            return false;
        };
        if let Some(d) = r.deadline.take() {
            self.timers.remove(&(d, id));
        }
        let n = params.len().min(r.result_cap);
        r.results.clear();
        r.results.extend_from_slice(&params[..n]);
        r.outcome = Some(outcome);
        r.idle_since = now;
        let auto = r.flags.contains(ControlFlags::AUTO_DISPOSE);
        let c = Completion {
            id,
            opcode: r.opcode,
            outcome,
            params: r.results.clone(),
        };
        let _ = self.pool.set_state(id, State::Idle);
        if matches!(outcome, Outcome::Complete(_)) {
            self.timeout_streak = 0;
        }
        if auto {
            let _ = self.pool.dispose(id);
        } else {
            self.orphans.insert((now + self.cfg.orphan_grace(), id));
        }
        debug!("Completed {id} {}: {outcome:?}", c.opcode);
        notifier.notify(c);
        true
    }
}
