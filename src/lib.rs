//! Byte-stream plumbing between application threads and USB endpoints.
//!
//! `usbq` provides the data-moving core of an embedded USB stack:
//!
//! - [`ring`]: fixed-capacity byte rings that are safe to share between
//!   thread and interrupt context.
//! - [`queue`]: a full-duplex endpoint queue driver that bridges the
//!   rings to hardware transfers through the [`Transport`] trait.
//! - [`midi`]: a USB-MIDI event packet codec, including SysEx
//!   continuation splitting.
//! - [`report`]: bit-field extraction from fixed-layout HID input
//!   reports.
//!
//! The crate never touches hardware registers. Platform code implements
//! [`Transport`] over its USB host or device library, and forwards
//! transfer-complete interrupts into
//! [`EndpointQueue::on_data_received`](queue::EndpointQueue::on_data_received)
//! and
//! [`EndpointQueue::on_data_transmitted`](queue::EndpointQueue::on_data_transmitted).
//!
//! All shared state is mutated inside [`critical_section::with`]. Supply
//! a `critical-section` implementation for your target (for example, the
//! `cortex-m` single-core implementation). The host test suite uses the
//! `std` implementation.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod log;

pub mod midi;
pub mod queue;
pub mod report;
pub mod ring;

pub use queue::{Config, Connection, EndpointQueue};
pub use ring::{Bounded, Forever, NonBlocking, Ring, RingEvents, Wait};

pub use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// Errors reported by queue and ring operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The operation could not complete within its wait budget.
    ///
    /// Retry later, or retry with a more patient [`Wait`] policy.
    WouldBlock,
    /// The owning driver was stopped, or the ring was reset, while the
    /// caller was waiting.
    Reset,
}

/// Hardware transfer services consumed by [`queue::EndpointQueue`].
///
/// Implementations wrap the platform's USB library and its endpoint
/// buffers. Every method must be non-blocking and bounded in time: the
/// queue driver calls them from interrupt context.
///
/// The queue driver never starts a transfer while an endpoint reports
/// [`is_busy`](Transport::is_busy), and never starts one while holding
/// its own critical section.
pub trait Transport {
    /// Maximum packet size negotiated for `ep`.
    fn max_packet_size(&self, ep: EndpointAddress) -> usize;

    /// Capacity of the hardware buffer backing a single transfer on `ep`.
    fn transfer_capacity(&self, ep: EndpointAddress) -> usize;

    /// A transfer is currently in flight on `ep`.
    fn is_busy(&self, ep: EndpointAddress) -> bool;

    /// The transport is attached and able to move data.
    ///
    /// While this returns `false`, the queue driver drops hardware
    /// events and defers all transfers until reconnection.
    fn is_active(&self) -> bool;

    /// Arm a receive of exactly `len` bytes into the hardware buffer.
    ///
    /// Completion is reported through
    /// [`EndpointQueue::on_data_received`](queue::EndpointQueue::on_data_received)
    /// with the bytes that actually arrived.
    fn start_receive(&mut self, ep: EndpointAddress, len: usize);

    /// Start transmitting `data` on `ep`.
    ///
    /// `data` is only valid for the duration of the call; the transport
    /// copies it into its own transfer buffer. Completion is reported
    /// through
    /// [`EndpointQueue::on_data_transmitted`](queue::EndpointQueue::on_data_transmitted).
    fn start_transmit(&mut self, ep: EndpointAddress, data: &[u8]);
}
