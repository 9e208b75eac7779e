//! Bounded sliding buffer for client spans

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tokio::sync::Notify;

/// Default number of spans retained per client
pub const DEFAULT_CAPACITY: usize = 100;

struct Inner<T> {
    ring: HeapRb<T>,
    shutdown: bool,
}

/// Bounded FIFO that drops the oldest entry on overflow
///
/// The producer side ([`offer`](Self::offer)) never blocks and never fails while the
/// buffer is open. Consumers either poll or await [`take`](Self::take). Once
/// [`shutdown`](Self::shutdown) is called the contents are discarded, further offers are
/// ignored and pending takers resolve to `None`.
pub struct SpanBuffer<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> SpanBuffer<T> {
    /// Create new sliding buffer with given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                ring: HeapRb::new(capacity),
                shutdown: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Append a span, evicting the oldest one when full.
    ///
    /// Returns `false` if the buffer has been shut down.
    pub fn offer(&self, span: T) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return false;
            }
            inner.ring.push_overwrite(span);
        }
        self.notify.notify_waiters();
        true
    }

    /// Remove the oldest span without waiting
    pub fn poll(&self) -> Option<T> {
        self.inner.lock().ring.try_pop()
    }

    /// Wait for the next span. Returns `None` once the buffer is shut down.
    pub async fn take(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(span) = inner.ring.try_pop() {
                    return Some(span);
                }
                if inner.shutdown {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Remove and return everything currently buffered, oldest first
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        let mut spans = Vec::with_capacity(inner.ring.occupied_len());
        while let Some(span) = inner.ring.try_pop() {
            spans.push(span);
        }
        spans
    }

    /// Copy of the buffered spans, oldest first
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.lock().ring.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    /// Close the buffer, drop its contents and wake every pending taker
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return;
            }
            inner.shutdown = true;
            inner.ring.clear();
        }
        self.notify.notify_waiters();
    }
}

impl<T> Default for SpanBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T> std::fmt::Debug for SpanBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SpanBuffer")
            .field("len", &inner.ring.occupied_len())
            .field("capacity", &self.capacity)
            .field("shutdown", &inner.shutdown)
            .finish()
    }
}
