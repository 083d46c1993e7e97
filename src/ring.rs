//! Fixed-capacity byte rings shared between thread and interrupt context.
//!
//! A [`Ring`] is the flow-control boundary of the crate: application
//! threads block on one side with a [`Wait`] policy, interrupt handlers
//! drain or fill the other side with the non-blocking calls. All index
//! and count updates happen inside a short critical section; nothing
//! that can block is ever called while it is held.
//!
//! Instead of invoking a notification callback from inside the critical
//! section, every successful operation returns the [`RingEvents`] state
//! transitions it caused. The owning driver reacts to those events after
//! the section has been released.

use core::cell::UnsafeCell;

use bitflags::bitflags;

use crate::Error;

bitflags! {
    /// State transitions caused by a ring operation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RingEvents: u8 {
        /// The ring went from empty to non-empty.
        const READABLE = 1 << 0;
        /// The ring went from full to non-full.
        const WRITABLE = 1 << 1;
    }
}

/// Decides how long a blocking ring operation may keep retrying.
///
/// `pause` is called between retries, outside the critical section. It
/// yields the caller in whatever way the platform supports and returns
/// `false` once the wait budget is exhausted.
pub trait Wait {
    fn pause(&mut self) -> bool;
}

impl<W: Wait + ?Sized> Wait for &mut W {
    fn pause(&mut self) -> bool {
        (**self).pause()
    }
}

/// Give up immediately: the non-blocking policy.
pub struct NonBlocking;

impl Wait for NonBlocking {
    fn pause(&mut self) -> bool {
        false
    }
}

/// Give up after a fixed number of pauses.
///
/// The unit is a retry, not a unit of time. Platforms that need a real
/// deadline implement [`Wait`] over their own clock or RTOS tick.
pub struct Bounded(pub usize);

impl Wait for Bounded {
    fn pause(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        core::hint::spin_loop();
        true
    }
}

/// Never give up. Only a [`Ring::reset`] wakes the caller.
pub struct Forever;

impl Wait for Forever {
    fn pause(&mut self) -> bool {
        core::hint::spin_loop();
        true
    }
}

struct Inner<const N: usize> {
    buffer: [u8; N],
    read: usize,
    write: usize,
    count: usize,
    /// Bumped on every reset. Waiters compare against the value sampled
    /// when they entered, so a reset can never leave a blocked caller
    /// behind.
    epoch: u32,
}

impl<const N: usize> Inner<N> {
    fn push(&mut self, byte: u8) -> Option<RingEvents> {
        if self.count == N {
            return None;
        }
        let was_empty = self.count == 0;
        self.buffer[self.write] = byte;
        self.write = (self.write + 1) % N;
        self.count += 1;
        let mut events = RingEvents::empty();
        if was_empty {
            events |= RingEvents::READABLE;
        }
        Some(events)
    }

    fn pop(&mut self) -> Option<(u8, RingEvents)> {
        if self.count == 0 {
            return None;
        }
        let was_full = self.count == N;
        let byte = self.buffer[self.read];
        self.read = (self.read + 1) % N;
        self.count -= 1;
        let mut events = RingEvents::empty();
        if was_full {
            events |= RingEvents::WRITABLE;
        }
        Some((byte, events))
    }
}

/// Fixed-capacity FIFO byte ring.
///
/// The capacity is the const generic `N`. Bytes come out in exactly the
/// order they went in; the only lossy path in the crate is the receive
/// overflow policy of the queue driver, never the ring itself.
pub struct Ring<const N: usize> {
    inner: UnsafeCell<Inner<N>>,
}

// Safety: `inner` is only accessed inside `critical_section::with`,
// which guarantees exclusive access across threads and interrupts.
unsafe impl<const N: usize> Sync for Ring<N> {}

impl<const N: usize> Ring<N> {
    const CAPACITY_NONZERO: () = assert!(N > 0, "ring capacity must be nonzero");

    pub const fn new() -> Self {
        let () = Self::CAPACITY_NONZERO;
        Ring {
            inner: UnsafeCell::new(Inner {
                buffer: [0; N],
                read: 0,
                write: 0,
                count: 0,
                epoch: 0,
            }),
        }
    }

    fn lock<R>(&self, f: impl FnOnce(&mut Inner<N>) -> R) -> R {
        // Safety: the critical section serializes every access to inner.
        critical_section::with(|_| f(unsafe { &mut *self.inner.get() }))
    }

    /// Reset generation counter. Callers that retry across several ring
    /// operations compare against a sampled value to notice a reset that
    /// landed between them.
    pub(crate) fn epoch(&self) -> u32 {
        self.lock(|inner| inner.epoch)
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of buffered bytes. Interrupt-safe snapshot.
    pub fn count_full(&self) -> usize {
        self.lock(|inner| inner.count)
    }

    /// Number of free slots. Interrupt-safe snapshot.
    pub fn count_free(&self) -> usize {
        self.lock(|inner| N - inner.count)
    }

    pub fn is_empty(&self) -> bool {
        self.count_full() == 0
    }

    pub fn is_full(&self) -> bool {
        self.count_full() == N
    }

    /// Append one byte without waiting.
    pub fn try_put(&self, byte: u8) -> Result<RingEvents, Error> {
        self.lock(|inner| inner.push(byte).ok_or(Error::WouldBlock))
    }

    /// Take one byte without waiting.
    pub fn try_get(&self) -> Result<(u8, RingEvents), Error> {
        self.lock(|inner| inner.pop().ok_or(Error::WouldBlock))
    }

    /// Append one byte, retrying under `wait` while the ring is full.
    ///
    /// Returns [`Error::Reset`] if the ring is reset while waiting.
    pub fn put(&self, byte: u8, wait: &mut impl Wait) -> Result<RingEvents, Error> {
        let epoch = self.epoch();
        loop {
            let result = self.lock(|inner| {
                if inner.epoch != epoch {
                    return Err(Error::Reset);
                }
                inner.push(byte).ok_or(Error::WouldBlock)
            });
            match result {
                Err(Error::WouldBlock) => {
                    if !wait.pause() {
                        return Err(Error::WouldBlock);
                    }
                }
                other => return other,
            }
        }
    }

    /// Take one byte, retrying under `wait` while the ring is empty.
    ///
    /// Returns [`Error::Reset`] if the ring is reset while waiting.
    pub fn get(&self, wait: &mut impl Wait) -> Result<(u8, RingEvents), Error> {
        let epoch = self.epoch();
        loop {
            let result = self.lock(|inner| {
                if inner.epoch != epoch {
                    return Err(Error::Reset);
                }
                inner.pop().ok_or(Error::WouldBlock)
            });
            match result {
                Err(Error::WouldBlock) => {
                    if !wait.pause() {
                        return Err(Error::WouldBlock);
                    }
                }
                other => return other,
            }
        }
    }

    /// Best-effort bulk append.
    ///
    /// Writes as much of `data` as fits, pausing under `wait` when the
    /// ring fills up. Returns the number of bytes written, which is
    /// short of `data.len()` when the wait budget expires first, plus
    /// the accumulated state transitions.
    pub fn write(&self, data: &[u8], wait: &mut impl Wait) -> Result<(usize, RingEvents), Error> {
        let epoch = self.epoch();
        let mut written = 0;
        let mut events = RingEvents::empty();
        loop {
            let n = self.lock(|inner| {
                if inner.epoch != epoch {
                    return Err(Error::Reset);
                }
                let mut n = 0;
                while let Some(&byte) = data.get(written + n) {
                    match inner.push(byte) {
                        Some(ev) => {
                            events |= ev;
                            n += 1;
                        }
                        None => break,
                    }
                }
                Ok(n)
            })?;
            written += n;
            if written == data.len() {
                return Ok((written, events));
            }
            if !wait.pause() {
                return Ok((written, events));
            }
        }
    }

    /// Best-effort bulk take, symmetric to [`write`](Ring::write).
    pub fn read(
        &self,
        data: &mut [u8],
        wait: &mut impl Wait,
    ) -> Result<(usize, RingEvents), Error> {
        let epoch = self.epoch();
        let mut read = 0;
        let mut events = RingEvents::empty();
        loop {
            let n = self.lock(|inner| {
                if inner.epoch != epoch {
                    return Err(Error::Reset);
                }
                let mut n = 0;
                while read + n < data.len() {
                    match inner.pop() {
                        Some((byte, ev)) => {
                            data[read + n] = byte;
                            events |= ev;
                            n += 1;
                        }
                        None => break,
                    }
                }
                Ok(n)
            })?;
            read += n;
            if read == data.len() {
                return Ok((read, events));
            }
            if !wait.pause() {
                return Ok((read, events));
            }
        }
    }

    /// All-or-nothing bulk append.
    ///
    /// Either every byte of `data` is accepted in one critical section,
    /// or nothing is. Wire frames written through this can never be
    /// split by a timeout. `data` must fit the ring's capacity.
    pub fn write_atomic(&self, data: &[u8], wait: &mut impl Wait) -> Result<RingEvents, Error> {
        debug_assert!(data.len() <= N);
        let epoch = self.epoch();
        loop {
            let result = self.lock(|inner| {
                if inner.epoch != epoch {
                    return Err(Error::Reset);
                }
                if N - inner.count < data.len() {
                    return Err(Error::WouldBlock);
                }
                let mut events = RingEvents::empty();
                for &byte in data {
                    if let Some(ev) = inner.push(byte) {
                        events |= ev;
                    }
                }
                Ok(events)
            });
            match result {
                Err(Error::WouldBlock) => {
                    if !wait.pause() {
                        return Err(Error::WouldBlock);
                    }
                }
                other => return other,
            }
        }
    }

    /// Drop all buffered content and wake every waiter with
    /// [`Error::Reset`].
    ///
    /// Used on disconnect and reconfigure. The indices return to zero,
    /// so a reset ring is indistinguishable from a fresh one except to
    /// callers that were waiting.
    pub fn reset(&self) {
        self.lock(|inner| {
            inner.read = 0;
            inner.write = 0;
            inner.count = 0;
            inner.epoch = inner.epoch.wrapping_add(1);
        });
    }
}

impl<const N: usize> Default for Ring<N> {
    fn default() -> Self {
        Self::new()
    }
}
