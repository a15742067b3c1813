use std::time::{Duration, Instant};

/// Single-value latch. The value is set once by the context that produces it
/// and taken by a thread that blocks until it is available.
#[derive(Debug)]
pub struct Latch<T> {
    v: parking_lot::Mutex<Option<T>>,
    cv: parking_lot::Condvar,
}

impl<T> Latch<T> {
    /// Creates an unset latch.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            v: parking_lot::Mutex::new(None),
            cv: parking_lot::Condvar::new(),
        }
    }

    /// Sets the latch value and wakes any waiter.
    pub fn set(&self, v: T) {
        *self.v.lock() = Some(v);
        self.cv.notify_all();
    }

    /// Takes the value, if it is set.
    #[inline]
    pub fn take(&self) -> Option<T> {
        self.v.lock().take()
    }

    /// Blocks the current thread until the value is set or the timeout
    /// expires. Must not be called from an async context.
    pub fn wait_timeout(&self, d: Duration) -> Option<T> {
        let deadline = Instant::now() + d;
        let mut g = self.v.lock();
        loop {
            if let Some(v) = g.take() {
                return Some(v);
            }
            if self.cv.wait_until(&mut g, deadline).timed_out() {
                return g.take();
            }
        }
    }
}

impl<T> Default for Latch<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
