// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-capacity ring buffer for instrumenting kernel code.
//!
//! A `Ringbuf` records a bounded history of `Copy + PartialEq` payloads,
//! collapsing runs of identical entries into a single entry with a count.
//! Each entry also records the source line that produced it (captured by
//! the [`ringbuf_entry!`] macro) and a generation counter that ticks every
//! time the slot is rewritten, so a debugger paging through memory can tell
//! fresh entries from stale ones.
//!
//! The buffer is an owned value rather than a linker-placed static, so a
//! kernel (or a test) can carry its own trace without any global state:
//!
//! ```
//! use ringbuf::{Ringbuf, ringbuf_entry};
//!
//! let mut trace: Ringbuf<u32, 16> = Ringbuf::new(0);
//! ringbuf_entry!(trace, 42);
//! assert_eq!(trace.last().unwrap().payload, 42);
//! ```
//!
//! There is deliberately no formatting machinery here; payloads are meant
//! to be small `Copy` enums or integers that a debugger can render.

#![no_std]

/// One recorded entry.
#[derive(Debug, Copy, Clone)]
pub struct Entry<T: Copy + PartialEq> {
    /// Source line that recorded this entry.
    pub line: u16,
    /// Bumped each time this slot is rewritten.
    pub generation: u16,
    /// Number of consecutive identical recordings collapsed into this
    /// entry. Zero means the slot has never been used.
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of `N` entries with payload type `T`.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [Entry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// Creates an empty ring buffer. `fill` initializes the payload slots;
    /// it is never observable through `iter`/`last`, which skip slots with
    /// a zero count.
    pub const fn new(fill: T) -> Self {
        Self {
            last: None,
            buffer: [Entry {
                line: 0,
                generation: 0,
                count: 0,
                payload: fill,
            }; N],
        }
    }

    /// Records `payload`, collapsing it into the previous entry if both the
    /// line and the payload match. When the buffer is full the oldest entry
    /// is overwritten.
    ///
    /// Most callers want the [`ringbuf_entry!`] macro, which fills in
    /// `line` from the call site.
    pub fn record(&mut self, line: u16, payload: T) {
        // A repeat of the latest entry just bumps its count.
        if let Some(last) = self.last {
            let ent = &mut self.buffer[last];
            if ent.line == line && ent.payload == payload {
                ent.count += 1;
                return;
            }
        }

        let ndx = match self.last {
            None => 0,
            Some(last) => (last + 1) % self.buffer.len(),
        };
        self.buffer[ndx] = Entry {
            line,
            generation: self.buffer[ndx].generation.wrapping_add(1),
            count: 1,
            payload,
        };
        self.last = Some(ndx);
    }

    /// Returns the most recently written entry, if anything has been
    /// recorded.
    pub fn last(&self) -> Option<&Entry<T>> {
        self.last.map(|ndx| &self.buffer[ndx])
    }

    /// Iterates over the used slots in storage order. Note that this is
    /// not chronological order once the buffer has wrapped.
    pub fn iter(&self) -> impl Iterator<Item = &Entry<T>> {
        self.buffer.iter().filter(|e| e.count != 0)
    }
}

/// Records an entry in a [`Ringbuf`], capturing the source line of the call
/// site.
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {
        $buf.record(line!() as u16, $payload)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let r: Ringbuf<u8, 4> = Ringbuf::new(0);
        assert!(r.last().is_none());
        assert_eq!(r.iter().count(), 0);
    }

    #[test]
    fn records_and_returns_last() {
        let mut r: Ringbuf<u8, 4> = Ringbuf::new(0);
        r.record(10, 1);
        r.record(11, 2);
        let last = r.last().unwrap();
        assert_eq!(last.payload, 2);
        assert_eq!(last.line, 11);
        assert_eq!(last.count, 1);
    }

    #[test]
    fn collapses_identical_runs() {
        let mut r: Ringbuf<u8, 4> = Ringbuf::new(0);
        for _ in 0..5 {
            r.record(10, 7);
        }
        assert_eq!(r.iter().count(), 1);
        assert_eq!(r.last().unwrap().count, 5);

        // Same payload from a different line is a distinct entry.
        r.record(20, 7);
        assert_eq!(r.iter().count(), 2);
        assert_eq!(r.last().unwrap().count, 1);
    }

    #[test]
    fn wraps_and_bumps_generation() {
        let mut r: Ringbuf<u8, 2> = Ringbuf::new(0);
        for i in 0..5 {
            r.record(i as u16, i);
        }
        // Five distinct entries through a two-slot buffer: every slot has
        // been rewritten, and the latest entry is the last one recorded.
        assert_eq!(r.last().unwrap().payload, 4);
        for ent in r.iter() {
            assert!(ent.generation >= 2);
        }
    }
}
