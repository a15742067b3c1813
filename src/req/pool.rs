use tracing::trace;

use crate::{Error, Result};

use super::list::{Chain, Links, List};
use super::*;

/// Request queue.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Queue {
    /// Requests waiting for dispatch.
    Wait,
    /// Requests written to the transport.
    Busy,
}

/// Pool slot.
#[derive(Debug, Default)]
struct Slot {
    seq: u64,
    req: Option<Request>,
}

/// Fixed-capacity request table with wait, busy, and allocation lists.
/// Requests move between queues only through [`Pool::set_state`], which keeps
/// queue membership consistent with the request state.
#[derive(Debug)]
pub struct Pool {
    slots: Vec<Slot>,
    links: Vec<Links>,
    free: Vec<u32>,
    cap: usize,
    next_seq: u64,
    alloc: List,
    wait: List,
    busy: List,
}

impl Pool {
    /// Creates an empty pool that can hold up to `cap` requests.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            slots: Vec::new(),
            links: Vec::new(),
            free: Vec::new(),
            cap,
            next_seq: 1,
            alloc: List::new(Chain::Alloc),
            wait: List::new(Chain::Queue),
            busy: List::new(Chain::Queue),
        }
    }

    /// Returns the number of allocated requests.
    #[inline(always)]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.alloc.len()
    }

    /// Returns whether the pool has no allocated requests.
    #[inline(always)]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.alloc.len() == 0
    }

    /// Returns the pool capacity.
    #[inline(always)]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.cap
    }

    /// Returns the number of requests in queue `q`.
    #[inline]
    #[must_use]
    pub const fn queue_len(&self, q: Queue) -> usize {
        match q {
            Queue::Wait => self.wait.len(),
            Queue::Busy => self.busy.len(),
        }
    }

    /// Allocates a slot for an idle request. Freed slots are reused most
    /// recently freed first.
    pub fn create(&mut self, mut req: Request) -> Result<RequestId> {
        if self.alloc.len() >= self.cap {
            return Err(Error::OutOfRequests);
        }
        let slot = match self.free.pop() {
            Some(i) => i,
            None => {
                #[allow(clippy::cast_possible_truncation)]
                let i = self.slots.len() as u32;
                self.slots.push(Slot::default());
                self.links.push(Links::default());
                i
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        req.state = State::Idle;
        let s = &mut self.slots[slot as usize];
        (s.seq, s.req) = (seq, Some(req));
        self.alloc.push_back(&mut self.links, slot);
        let id = RequestId { slot, seq };
        trace!("Created {id}");
        Ok(id)
    }

    /// Frees an idle request and returns it. Disposing a request that was
    /// already disposed fails with [`Error::NotFound`].
    pub fn dispose(&mut self, id: RequestId) -> Result<Request> {
        if self.get(id)?.state != State::Idle {
            return Err(Error::InvalidState);
        }
        self.alloc.remove(&mut self.links, id.slot);
        self.free.push(id.slot);
        let req = self.slots[id.slot as usize].req.take().ok_or(Error::NotFound)?;
        trace!("Disposed {id}");
        Ok(req)
    }

    /// Returns the request with the specified ID.
    pub fn get(&self, id: RequestId) -> Result<&Request> {
        match self.slots.get(id.slot as usize) {
            Some(Slot { seq, req: Some(r) }) if *seq == id.seq => Ok(r),
            _ => Err(Error::NotFound),
        }
    }

    /// Returns the mutable request with the specified ID.
    pub fn get_mut(&mut self, id: RequestId) -> Result<&mut Request> {
        match self.slots.get_mut(id.slot as usize) {
            Some(Slot { seq, req: Some(r) }) if *seq == id.seq => Ok(r),
            _ => Err(Error::NotFound),
        }
    }

    /// Changes request state, moving it to the tail of the corresponding
    /// queue. Returns the previous state.
    pub fn set_state(&mut self, id: RequestId, st: State) -> Result<State> {
        let r = self.get_mut(id)?;
        let prev = std::mem::replace(&mut r.state, st);
        match prev {
            State::Idle => {}
            State::Waiting => self.wait.remove(&mut self.links, id.slot),
            State::Busy => self.busy.remove(&mut self.links, id.slot),
        }
        match st {
            State::Idle => {}
            State::Waiting => self.wait.push_back(&mut self.links, id.slot),
            State::Busy => self.busy.push_back(&mut self.links, id.slot),
        }
        Ok(prev)
    }

    /// Returns the IDs of all requests in queue `q`, oldest first.
    #[must_use]
    pub fn queued(&self, q: Queue) -> Vec<RequestId> {
        let l = match q {
            Queue::Wait => &self.wait,
            Queue::Busy => &self.busy,
        };
        l.iter(&self.links).map(|i| self.id(i)).collect()
    }

    /// Returns the IDs of all allocated requests, oldest first.
    #[must_use]
    pub fn allocated(&self) -> Vec<RequestId> {
        (self.alloc.iter(&self.links)).map(|i| self.id(i)).collect()
    }

    /// Returns the oldest request in queue `q` that matches `k`.
    #[must_use]
    pub fn find_queued(&self, q: Queue, k: &Key, use_attrs: bool) -> Option<RequestId> {
        self.find(q, |r| k.matches(r, use_attrs))
    }

    /// Returns the oldest request in queue `q` for which `f` returns `true`.
    pub fn find(&self, q: Queue, mut f: impl FnMut(&Request) -> bool) -> Option<RequestId> {
        let l = match q {
            Queue::Wait => &self.wait,
            Queue::Busy => &self.busy,
        };
        (l.iter(&self.links))
            .find(|&i| self.slots[i as usize].req.as_ref().map_or(false, &mut f))
            .map(|i| self.id(i))
    }

    /// Returns the ID of an allocated slot.
    #[inline]
    fn id(&self, slot: u32) -> RequestId {
        RequestId {
            slot,
            seq: self.slots[slot as usize].seq,
        }
    }
}
