//! Full-duplex endpoint stream queues.
//!
//! An [`EndpointQueue`] bridges one input [`Ring`] and one output
//! [`Ring`] to the hardware transfer services of a [`Transport`]. The
//! interrupt side enters through [`on_data_received`] and
//! [`on_data_transmitted`]; the thread side enters through [`read`] and
//! [`write`]. Both sides meet at the rings, never at each other.
//!
//! Flow control rules, in both directions:
//!
//! - Receive transfers request the input ring's free space rounded
//!   *down* to a multiple of the endpoint's max packet size. Requesting
//!   a non-multiple could end in a short packet the application cannot
//!   distinguish from end-of-transfer.
//! - Received bytes beyond the input ring's free space are dropped.
//!   This lossy overflow policy keeps the interrupt path bounded; it is
//!   a property of the design, not an error.
//! - At most one transmit transfer is in flight. Completion either
//!   starts the next chunk or, when the completed size was a nonzero
//!   multiple of the max packet size, a zero-length packet so the host
//!   sees end-of-data.
//!
//! The critical section is held for state mutation only. Hardware calls
//! ([`Transport::start_receive`], [`Transport::start_transmit`]) always
//! happen outside of it.
//!
//! [`on_data_received`]: EndpointQueue::on_data_received
//! [`on_data_transmitted`]: EndpointQueue::on_data_transmitted
//! [`read`]: EndpointQueue::read
//! [`write`]: EndpointQueue::write

use core::cell::UnsafeCell;

use bitflags::bitflags;
use usb_device::endpoint::EndpointAddress;

use crate::ring::{NonBlocking, Ring, Wait};
use crate::{Error, Transport};

bitflags! {
    /// Connection status observable by listeners.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Connection: u8 {
        /// The queue is started and will service hardware events.
        const CONNECTED = 1 << 0;
        /// The queue is stopped.
        const DISCONNECTED = 1 << 1;
        /// The input ring holds unread bytes.
        const INPUT_AVAILABLE = 1 << 2;
        /// The output ring is drained and nothing is in flight.
        const OUTPUT_EMPTY = 1 << 3;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Stopped,
    Ready,
}

/// The endpoint pair serviced by one queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Endpoint delivering data from the wire into the input ring.
    pub input: EndpointAddress,
    /// Endpoint carrying output ring data onto the wire.
    pub output: EndpointAddress,
}

struct Inner {
    state: State,
    /// A transmit transfer (or a claim on starting one) is outstanding.
    /// Whoever sets this owns the scratch buffer until it is cleared.
    tx_in_flight: bool,
}

/// A full-duplex stream queue over one endpoint pair.
///
/// `RX` and `TX` are the ring capacities; `XFER` is the transmit scratch
/// buffer size, the largest single hardware transfer the queue will
/// start. Rings are owned by the caller and passed in at construction,
/// so two queues can never alias a buffer:
///
/// ```
/// use usbq::{Config, EndpointAddress, EndpointQueue, Ring, UsbDirection};
///
/// static INPUT: Ring<512> = Ring::new();
/// static OUTPUT: Ring<512> = Ring::new();
///
/// let queue: EndpointQueue<512, 512, 64> = EndpointQueue::new(
///     Config {
///         input: EndpointAddress::from_parts(1, UsbDirection::In),
///         output: EndpointAddress::from_parts(1, UsbDirection::Out),
///     },
///     &INPUT,
///     &OUTPUT,
/// );
/// ```
pub struct EndpointQueue<'a, const RX: usize, const TX: usize, const XFER: usize> {
    config: Config,
    input: &'a Ring<RX>,
    output: &'a Ring<TX>,
    inner: UnsafeCell<Inner>,
    scratch: UnsafeCell<[u8; XFER]>,
}

// Safety: `inner` is only accessed inside `critical_section::with`;
// `scratch` is only accessed by the holder of the `tx_in_flight` claim
// documented on `Inner`.
unsafe impl<const RX: usize, const TX: usize, const XFER: usize> Sync
    for EndpointQueue<'_, RX, TX, XFER>
{
}

impl<'a, const RX: usize, const TX: usize, const XFER: usize> EndpointQueue<'a, RX, TX, XFER> {
    pub const fn new(config: Config, input: &'a Ring<RX>, output: &'a Ring<TX>) -> Self {
        EndpointQueue {
            config,
            input,
            output,
            inner: UnsafeCell::new(Inner {
                state: State::Stopped,
                tx_in_flight: false,
            }),
            scratch: UnsafeCell::new([0; XFER]),
        }
    }

    fn lock<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        // Safety: the critical section serializes every access to inner.
        critical_section::with(|_| f(unsafe { &mut *self.inner.get() }))
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn is_ready(&self) -> bool {
        self.lock(|inner| inner.state == State::Ready)
    }

    /// Start the queue and prime the first receive transfer.
    ///
    /// Starting an already started queue is allowed; it just re-arms
    /// reception.
    pub fn start<T: Transport>(&self, transport: &mut T) {
        self.lock(|inner| inner.state = State::Ready);
        debug!(
            "queue start in=ep{} out=ep{}",
            self.config.input.index(),
            self.config.output.index()
        );
        self.arm_receive(transport);
    }

    /// Stop the queue, reset both rings, and wake every blocked caller
    /// with [`Error::Reset`].
    ///
    /// The connection flags collapse to [`Connection::DISCONNECTED`].
    /// Hardware events arriving after this are dropped until the next
    /// [`start`](EndpointQueue::start).
    pub fn stop(&self) {
        self.lock(|inner| {
            inner.state = State::Stopped;
            inner.tx_in_flight = false;
        });
        self.input.reset();
        self.output.reset();
        debug!("queue stop in=ep{}", self.config.input.index());
    }

    /// Snapshot of the connection flags.
    pub fn connection(&self) -> Connection {
        let (ready, tx_in_flight) =
            self.lock(|inner| (inner.state == State::Ready, inner.tx_in_flight));
        let mut flags = if ready {
            Connection::CONNECTED
        } else {
            Connection::DISCONNECTED
        };
        if !self.input.is_empty() {
            flags |= Connection::INPUT_AVAILABLE;
        }
        if self.output.is_empty() && !tx_in_flight {
            flags |= Connection::OUTPUT_EMPTY;
        }
        flags
    }

    /// Interrupt-context entry point: a receive transfer completed with
    /// `data`.
    ///
    /// Copies into the input ring what fits and drops the rest (the
    /// documented lossy overflow policy), then re-arms the next receive
    /// if the rounded free space is nonzero. A queue that isn't ready,
    /// or a transport that isn't active, drops the event entirely.
    pub fn on_data_received<T: Transport>(&self, transport: &mut T, data: &[u8]) {
        if !self.is_ready() || !transport.is_active() {
            return;
        }
        match self.input.write(data, &mut NonBlocking) {
            Ok((copied, _)) => {
                if copied < data.len() {
                    warn!(
                        "ep{} receive overflow, dropped {}",
                        self.config.input.index(),
                        data.len() - copied
                    );
                }
            }
            // Reset raced the completion; the next start() re-arms.
            Err(_) => return,
        }
        self.arm_receive(transport);
    }

    /// Interrupt-context entry point: a transmit transfer of `len`
    /// bytes completed.
    pub fn on_data_transmitted<T: Transport>(&self, transport: &mut T, len: usize) {
        let ready = self.lock(|inner| {
            inner.tx_in_flight = false;
            inner.state == State::Ready
        });
        if !ready || !transport.is_active() {
            return;
        }
        if self.pump_transmit(transport) {
            return;
        }
        // Nothing left to send. A completed transfer that was a nonzero
        // exact multiple of the max packet size needs a zero-length
        // follow-up, or the host keeps waiting for a continuation.
        let mps = transport.max_packet_size(self.config.output);
        if len > 0 && mps > 0 && len % mps == 0 {
            let claimed = self.lock(|inner| {
                if inner.state != State::Ready || inner.tx_in_flight {
                    return false;
                }
                inner.tx_in_flight = true;
                true
            });
            if claimed {
                transport.start_transmit(self.config.output, &[]);
            }
        }
    }

    /// Queue `data` for transmission.
    ///
    /// Returns the number of bytes accepted, which may be short of
    /// `data.len()` when `wait` expires first, or [`Error::Reset`] if
    /// the queue is stopped while waiting.
    pub fn write<T: Transport>(
        &self,
        transport: &mut T,
        data: &[u8],
        wait: &mut impl Wait,
    ) -> Result<usize, Error> {
        let epoch = self.output.epoch();
        let mut written = 0;
        loop {
            let (n, _) = self.output.write(&data[written..], &mut NonBlocking)?;
            written += n;
            self.pump_transmit(transport);
            if written == data.len() {
                return Ok(written);
            }
            if !wait.pause() {
                return Ok(written);
            }
            // A stop() while we paused reset the ring under us.
            if self.output.epoch() != epoch {
                return Err(Error::Reset);
            }
        }
    }

    /// Queue `data` as one unit: either every byte is accepted before
    /// `wait` expires, or none is.
    pub fn write_all<T: Transport>(
        &self,
        transport: &mut T,
        data: &[u8],
        wait: &mut impl Wait,
    ) -> Result<(), Error> {
        let epoch = self.output.epoch();
        loop {
            match self.output.write_atomic(data, &mut NonBlocking) {
                Ok(_) => {
                    self.pump_transmit(transport);
                    return Ok(());
                }
                Err(Error::WouldBlock) => {
                    // Draining the ring into the scratch buffer is what
                    // frees space, so pump before giving up.
                    self.pump_transmit(transport);
                    if !wait.pause() {
                        return Err(Error::WouldBlock);
                    }
                    if self.output.epoch() != epoch {
                        return Err(Error::Reset);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Read up to `data.len()` bytes from the input ring.
    ///
    /// Freed ring space re-arms reception. Returns the number of bytes
    /// read, which may be short when `wait` expires first, or
    /// [`Error::Reset`] if the queue is stopped while waiting.
    pub fn read<T: Transport>(
        &self,
        transport: &mut T,
        data: &mut [u8],
        wait: &mut impl Wait,
    ) -> Result<usize, Error> {
        let epoch = self.input.epoch();
        let mut read = 0;
        loop {
            let (n, _) = self.input.read(&mut data[read..], &mut NonBlocking)?;
            read += n;
            if n > 0 {
                self.arm_receive(transport);
            }
            if read == data.len() {
                return Ok(read);
            }
            if !wait.pause() {
                return Ok(read);
            }
            // A stop() while we paused reset the ring under us.
            if self.input.epoch() != epoch {
                return Err(Error::Reset);
            }
        }
    }

    /// Single-byte variant of [`write`](EndpointQueue::write).
    pub fn write_byte<T: Transport>(
        &self,
        transport: &mut T,
        byte: u8,
        wait: &mut impl Wait,
    ) -> Result<(), Error> {
        match self.write(transport, &[byte], wait)? {
            1 => Ok(()),
            _ => Err(Error::WouldBlock),
        }
    }

    /// Single-byte variant of [`read`](EndpointQueue::read).
    pub fn read_byte<T: Transport>(
        &self,
        transport: &mut T,
        wait: &mut impl Wait,
    ) -> Result<u8, Error> {
        let mut buffer = [0; 1];
        match self.read(transport, &mut buffer, wait)? {
            1 => Ok(buffer[0]),
            _ => Err(Error::WouldBlock),
        }
    }

    /// Start the next receive transfer if flow control allows.
    ///
    /// The requested length is the input ring's free space, capped by
    /// the hardware buffer, rounded down to a multiple of the max
    /// packet size. Zero rounded space means no transfer; the next
    /// thread-side read frees space and re-arms.
    fn arm_receive<T: Transport>(&self, transport: &mut T) {
        if !self.is_ready() || !transport.is_active() || transport.is_busy(self.config.input) {
            return;
        }
        let mps = transport.max_packet_size(self.config.input);
        if mps == 0 {
            return;
        }
        let free = self
            .input
            .count_free()
            .min(transport.transfer_capacity(self.config.input));
        let len = free - free % mps;
        if len > 0 {
            transport.start_receive(self.config.input, len);
        }
    }

    /// Start the next transmit transfer if none is in flight. Returns
    /// `true` if one was started.
    ///
    /// A chunk is never larger than the output ring's fill level, the
    /// scratch buffer, or the hardware buffer behind the endpoint.
    fn pump_transmit<T: Transport>(&self, transport: &mut T) -> bool {
        let limit = XFER.min(transport.transfer_capacity(self.config.output));
        if limit == 0 {
            return false;
        }
        loop {
            if !transport.is_active() || transport.is_busy(self.config.output) {
                return false;
            }
            let claimed = self.lock(|inner| {
                if inner.state != State::Ready || inner.tx_in_flight {
                    return false;
                }
                inner.tx_in_flight = true;
                true
            });
            if !claimed {
                return false;
            }
            // Safety: holding the tx_in_flight claim gives this path
            // exclusive access to the scratch buffer until the claim is
            // released or the transfer completes.
            let scratch = unsafe { &mut *self.scratch.get() };
            let len = match self.output.read(&mut scratch[..limit], &mut NonBlocking) {
                Ok((n, _)) => n,
                Err(_) => 0,
            };
            if len == 0 {
                self.lock(|inner| inner.tx_in_flight = false);
                // A writer may have refilled the ring after we sampled
                // it; re-check before giving up.
                if self.output.is_empty() {
                    return false;
                }
                continue;
            }
            transport.start_transmit(self.config.output, &scratch[..len]);
            return true;
        }
    }
}
