//! Small fixed-capacity ring buffers for recording recent events per subsystem.
//!
//! Each long-lived activity in the daemon (the health loop, the CAN pipe, the
//! peripheral controller, ...) keeps one of these alongside its `log` calls.
//! Unlike the log, a [`Ringbuf`] is always in memory and cheap to record into,
//! so it can be consulted after the fact (e.g. from a signal handler dumping
//! diagnostics, or a test assertion) without needing a log sink to have been
//! configured.
//!
//! ## Creating a ring buffer
//!
//! ```
//! use ringbuf::{ringbuf, ringbuf_entry};
//!
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     Opened(u8),
//!     None,
//! }
//!
//! ringbuf!(Trace, 32, Trace::None);
//!
//! ringbuf_entry!(Trace::Opened(3));
//! ```
//!
//! Entries are de-duplicated: recording the same payload twice in a row just
//! increments a count on the existing entry rather than consuming a new slot.
//! This keeps a fast-spinning loop that logs "nothing changed" every tick from
//! flushing out the history that actually matters.

use parking_lot::Mutex;

/// A single recorded entry: a payload plus how many consecutive times it
/// was recorded without anything else intervening.
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub payload: T,
    pub count: u32,
}

/// A fixed-capacity ring of the `N` most recent distinct entries.
pub struct Ringbuf<T, const N: usize> {
    inner: Mutex<Inner<T, N>>,
}

struct Inner<T, const N: usize> {
    last: Option<usize>,
    buffer: [Entry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self
    where
        T: Copy,
    {
        Ringbuf {
            inner: Mutex::new(Inner {
                last: None,
                buffer: [Entry {
                    payload: init,
                    count: 0,
                }; N],
            }),
        }
    }

    /// Record a payload, de-duplicating against the most recent entry.
    pub fn record(&self, payload: T) {
        let mut inner = self.inner.lock();
        let last = inner.last;
        if let Some(last) = last {
            let ent = &mut inner.buffer[last];
            if ent.payload == payload {
                ent.count = ent.count.saturating_add(1);
                return;
            }
        }
        let next = match last {
            Some(last) if last + 1 < N => last + 1,
            _ => 0,
        };
        inner.buffer[next] = Entry { payload, count: 1 };
        inner.last = Some(next);
    }

    /// Snapshot the buffer's contents, oldest first, for diagnostics or
    /// tests. Entries that have never been recorded into are omitted.
    pub fn snapshot(&self) -> Vec<Entry<T>>
    where
        T: Clone,
    {
        let inner = self.inner.lock();
        let Some(last) = inner.last else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(N);
        let start = (last + 1) % N;
        for i in 0..N {
            let idx = (start + i) % N;
            if inner.buffer[idx].count > 0 {
                out.push(inner.buffer[idx].clone());
            }
        }
        out
    }

    /// The most recently recorded payload, if any.
    pub fn last(&self) -> Option<T>
    where
        T: Clone,
    {
        let inner = self.inner.lock();
        inner.last.map(|i| inner.buffer[i].payload.clone())
    }
}

impl<T, const N: usize> Entry<T> {
    pub fn payload(&self) -> &T {
        &self.payload
    }
}

impl<T: Copy, const N: usize> Copy for Entry<T> where T: Copy {}

/// Declares a static [`Ringbuf`] in the current module.
///
/// `ringbuf!(NAME, Type, N, init)` declares a ring buffer named `NAME` with
/// room for `N` entries of `Type`, all initialized to `init`. Omitting the
/// name defaults it to `__RINGBUF`, matching the common case of one buffer
/// per module.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        static $name: $crate::Ringbuf<$t, $n> = $crate::Ringbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Records `payload` into a ring buffer declared with [`ringbuf!`].
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {
        $crate::Ringbuf::record(&$buf, $payload)
    };
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq)]
    enum Trace {
        Tick(u32),
        None,
    }

    #[test]
    fn dedups_consecutive_entries() {
        let rb: Ringbuf<Trace, 4> = Ringbuf::new(Trace::None);
        rb.record(Trace::Tick(1));
        rb.record(Trace::Tick(1));
        rb.record(Trace::Tick(1));
        let snap = rb.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].count, 3);
    }

    #[test]
    fn wraps_after_capacity() {
        let rb: Ringbuf<Trace, 2> = Ringbuf::new(Trace::None);
        rb.record(Trace::Tick(1));
        rb.record(Trace::Tick(2));
        rb.record(Trace::Tick(3));
        let snap = rb.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].payload, Trace::Tick(2));
        assert_eq!(snap[1].payload, Trace::Tick(3));
    }

    #[test]
    fn last_tracks_most_recent() {
        let rb: Ringbuf<Trace, 4> = Ringbuf::new(Trace::None);
        assert_eq!(rb.last(), None);
        rb.record(Trace::Tick(7));
        assert_eq!(rb.last(), Some(Trace::Tick(7)));
    }
}
