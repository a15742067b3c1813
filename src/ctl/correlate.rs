use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::flow::LinkKind;
use crate::gate::Notification;
use crate::hci::{
    BufferSize, ConnectionComplete, DisconnectionComplete, EventCode, EventHeader, EventType,
    LeBufferSize, LeConnectionComplete, MatchBy, NumberOfCompletedPackets, Opcode, Status,
};
use crate::host::Transport;
use crate::req::{Key, Outcome, Queue, Request};
use crate::Result;

use super::Controller;

impl<T: Transport> Controller<T> {
    /// Processes a received event. `seq` is the transport sequence number of
    /// the event. Gaps in the sequence are logged as lost events.
    ///
    /// Registry and admission state is updated first. The event then
    /// completes the oldest busy request that expects it, or is broadcast to
    /// listeners if no request does.
    pub fn process_event(&mut self, raw: &[u8], seq: u64, now: Instant) -> Result<()> {
        self.check_seq(seq);
        let (hdr, params) = EventHeader::unpack(raw)?;
        trace!("Event: {:02X?}", raw);
        if let Some(q) = hdr.cmd_quota {
            if hdr.opcode != Opcode::RESET && self.reset_pending() {
                debug!("Ignored command quota of {} during reset", hdr.opcode);
            } else {
                self.credits = q;
            }
        }
        self.apply_event(&hdr, params, now);
        match hdr.typ {
            EventType::Hci(EventCode::CommandComplete) => self.command_complete(&hdr, params, now),
            EventType::Hci(EventCode::CommandStatus) => self.command_status(&hdr, now),
            typ => {
                let full = raw.get(typ.params_off()..).unwrap_or_default();
                self.event(&hdr, raw, full, now);
            }
        }
        self.process_waiting_requests(false, now);
        Ok(())
    }

    /// Records the event sequence number. A backwards jump is not counted as
    /// a loss and restarts gap detection from the new number.
    fn check_seq(&mut self, seq: u64) {
        if let Some(last) = self.last_seq {
            let want = last.wrapping_add(1);
            if seq > want {
                let lost = seq - want;
                warn!("Lost {lost} events before event #{seq}");
                self.stats.lost_events += lost;
            } else if seq < want {
                warn!("Event sequence restarted at #{seq} after #{last}");
            }
        }
        self.last_seq = Some(seq);
    }

    /// Updates the registry and admission state from connection, packet
    /// completion, and buffer size events.
    fn apply_event(&mut self, hdr: &EventHeader, params: &[u8], now: Instant) {
        match hdr.typ {
            EventType::Hci(
                EventCode::ConnectionComplete | EventCode::SynchronousConnectionComplete,
            ) => {
                let Some(e) = hdr.decode::<ConnectionComplete>(params) else {
                    return;
                };
                if !e.status.is_ok() {
                    return;
                }
                if e.link_type.is_sync() {
                    self.reg.connect_sco(e.addr, e.handle);
                    let tier = self.cfg.flow.default_tier;
                    self.flow.add_link(e.handle, LinkKind::Sco, tier);
                } else {
                    let tier = self.reg.connect(e.addr, e.handle, LinkKind::Acl);
                    self.flow.add_link(e.handle, LinkKind::Acl, tier);
                }
            }
            EventType::Le(_) => {
                let Some(e) = hdr.decode::<LeConnectionComplete>(params) else {
                    return;
                };
                if e.status.is_ok() {
                    let tier = self.reg.connect(e.peer_addr, e.handle, LinkKind::LeAcl);
                    self.flow.add_link(e.handle, LinkKind::LeAcl, tier);
                }
            }
            EventType::Hci(EventCode::DisconnectionComplete) => {
                let Some(e) = hdr.decode::<DisconnectionComplete>(params) else {
                    return;
                };
                if !e.status.is_ok() {
                    return;
                }
                if self.reg.disconnect(e.handle).is_none() {
                    debug!("Disconnection of unknown {}", e.handle);
                }
                let n = self.flow.remove_link(e.handle, now, &mut self.t);
                if n > 0 {
                    debug!("{} disconnected ({}) with {n} queued packets", e.handle, e.reason);
                }
            }
            EventType::Hci(EventCode::NumberOfCompletedPackets) => {
                let Some(e) = hdr.decode::<NumberOfCompletedPackets>(params) else {
                    return;
                };
                for &(h, n) in e.as_ref() {
                    self.flow.completed(h, n, now, &mut self.t);
                }
            }
            EventType::Hci(EventCode::CommandComplete) => {
                if let Some(e) = hdr.decode::<BufferSize>(params) {
                    debug!("{e:?}");
                    (self.flow).set_buffer_size(e.acl_num_pkts, e.sco_num_pkts, &mut self.t);
                } else if let Some(e) = hdr.decode::<LeBufferSize>(params) {
                    debug!("{e:?}");
                    (self.flow).set_le_buffer_size(u16::from(e.acl_num_pkts), &mut self.t);
                }
            }
            _ => {}
        }
    }

    /// Completes the oldest busy request with the opcode of a
    /// `CommandComplete` event.
    fn command_complete(&mut self, hdr: &EventHeader, params: &[u8], now: Instant) {
        if hdr.opcode == Opcode::NONE {
            return;
        }
        match self.pool.find_queued(Queue::Busy, &Key::from(hdr), false) {
            Some(id) => {
                self.complete(id, Outcome::Complete(hdr.status), params, now);
            }
            None => self.stale(hdr),
        }
    }

    /// Acknowledges the oldest unacknowledged busy request with the opcode of
    /// a `CommandStatus` event. A failure status completes the request.
    fn command_status(&mut self, hdr: &EventHeader, now: Instant) {
        if hdr.opcode == Opcode::NONE {
            return;
        }
        let k = Key::from(hdr);
        let unacked = (self.pool).find(Queue::Busy, |r| k.matches(r, false) && !r.acked);
        let Some(id) = unacked else {
            return self.stale(hdr);
        };
        let Ok(r) = self.pool.get_mut(id) else { return };
        r.acked = true;
        if !hdr.status.is_ok() || r.expect.is_command_status() {
            self.complete(id, Outcome::Complete(hdr.status), &[], now);
        }
    }

    /// Matches a connection-oriented event against busy requests.
    fn event(&mut self, hdr: &EventHeader, raw: &[u8], params: &[u8], now: Instant) {
        let (typ, k) = (hdr.typ, Key::from(hdr));
        let complete = (self.pool).find(Queue::Busy, |r| {
            r.expect.completes(typ) && targets(r, &k)
        });
        if let Some(id) = complete {
            self.complete(id, Outcome::Complete(hdr.status), params, now);
            return;
        }
        let intermediate = (self.pool).find(Queue::Busy, |r| {
            r.expect.intermediate.contains(&typ) && targets(r, &k)
        });
        if let Some(id) = intermediate {
            if let Ok(r) = self.pool.get_mut(id) {
                r.intermediate_seen = r.intermediate_seen.saturating_add(1);
                trace!("{id} intermediate {typ} #{}", r.intermediate_seen);
                if r.expect.max_intermediate == Some(r.intermediate_seen) {
                    self.complete(id, Outcome::Complete(Status::Success), params, now);
                }
            }
        } else {
            self.stats.unmatched_events += 1;
            trace!("Unmatched {typ} event");
        }
        self.notify(Notification::Event {
            typ,
            raw: raw.to_vec(),
        });
    }

    /// Logs a command completion that has no matching request. This is
    /// expected after a command times out.
    fn stale(&mut self, hdr: &EventHeader) {
        warn!("Ignored {} {} ({})", hdr.typ, hdr.opcode, hdr.status);
        self.stats.stale_completions += 1;
    }
}

/// Returns whether the event with key `k` refers to the target of request
/// `r`.
fn targets(r: &Request, k: &Key) -> bool {
    match r.expect.by {
        MatchBy::Any => true,
        MatchBy::Addr => r.addr.is_some() && r.addr == k.addr,
        MatchBy::Handle => r.handle.is_some() && r.handle == k.handle,
    }
}
