//! USB-MIDI event packet framing.
//!
//! USB-MIDI moves every MIDI message as a sequence of 4-byte event
//! packets: one header byte carrying the cable number and code index
//! number (CIN), then up to three payload bytes, zero padded. See the
//! USB Device Class Definition for MIDI Devices 1.0, chapter 4.
//!
//! The codec here is pure: packet construction never touches a queue.
//! The `send_*` helpers combine construction with
//! [`EndpointQueue::write_all`], so a timeout can never strand half a
//! packet in the output ring.
//!
//! [`EndpointQueue::write_all`]: crate::queue::EndpointQueue::write_all

use crate::queue::EndpointQueue;
use crate::ring::Wait;
use crate::{Error, Transport};

/// CIN of a SysEx start or continuation packet (three payload bytes,
/// message continues).
pub const CIN_SYSEX_CONTINUE: u8 = 0x04;
/// CIN of a SysEx tail packet carrying one payload byte.
pub const CIN_SYSEX_END_1: u8 = 0x05;
/// CIN of a SysEx tail packet carrying two payload bytes.
pub const CIN_SYSEX_END_2: u8 = 0x06;
/// CIN of a SysEx tail packet carrying three payload bytes.
pub const CIN_SYSEX_END_3: u8 = 0x07;

/// Errors from the MIDI senders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiError {
    /// SysEx payloads shorter than three bytes are rejected: a complete
    /// message carries at least `F0`, one data byte, and `F7`.
    SysexTooShort,
    /// The underlying queue operation failed.
    Queue(Error),
}

impl From<Error> for MidiError {
    fn from(error: Error) -> Self {
        MidiError::Queue(error)
    }
}

/// Code index number derived from a MIDI status byte.
///
/// The status high nibble doubles as the CIN for every channel and
/// system message this crate sends; SysEx packets override it.
pub const fn code_index(status: u8) -> u8 {
    (status >> 4) & 0x0f
}

/// Event packet header for virtual cable `port` (1..=16) and a message
/// starting with `status`.
pub const fn pack_header(port: u8, status: u8) -> u8 {
    (port.wrapping_sub(1) & 0x0f) << 4 | code_index(status)
}

/// One 4-byte USB-MIDI event packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EventPacket([u8; 4]);

impl EventPacket {
    /// Packet for a one-byte message (system real-time, for example).
    pub const fn one(port: u8, b0: u8) -> Self {
        EventPacket([pack_header(port, b0), b0, 0, 0])
    }

    /// Packet for a two-byte message (program change, channel pressure).
    pub const fn two(port: u8, b0: u8, b1: u8) -> Self {
        EventPacket([pack_header(port, b0), b0, b1, 0])
    }

    /// Packet for a three-byte message (note on/off, control change).
    pub const fn three(port: u8, b0: u8, b1: u8, b2: u8) -> Self {
        EventPacket([pack_header(port, b0), b0, b1, b2])
    }

    const fn sysex(port: u8, cin: u8, payload: [u8; 3]) -> Self {
        EventPacket([
            (port.wrapping_sub(1) & 0x0f) << 4 | cin,
            payload[0],
            payload[1],
            payload[2],
        ])
    }

    pub const fn header(&self) -> u8 {
        self.0[0]
    }

    /// Cable number nibble (`port - 1`).
    pub const fn cable(&self) -> u8 {
        self.0[0] >> 4
    }

    pub const fn code_index(&self) -> u8 {
        self.0[0] & 0x0f
    }

    pub const fn payload(&self) -> [u8; 3] {
        [self.0[1], self.0[2], self.0[3]]
    }

    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

/// Iterator over the event packets encoding one SysEx message.
///
/// Yields full three-byte [`CIN_SYSEX_CONTINUE`] packets while more
/// than three payload bytes remain, then exactly one tail packet whose
/// CIN ([`CIN_SYSEX_END_1`]..[`CIN_SYSEX_END_3`]) says how many of its
/// payload bytes are real. A payload of length `L` yields `⌈L/3⌉`
/// packets in total.
#[derive(Clone, Debug)]
pub struct SysexPackets<'a> {
    port: u8,
    rest: &'a [u8],
}

/// Split a SysEx payload (including the `F0`/`F7` framing bytes) into
/// event packets for `port`.
pub fn sysex_packets(port: u8, payload: &[u8]) -> Result<SysexPackets<'_>, MidiError> {
    if payload.len() < 3 {
        return Err(MidiError::SysexTooShort);
    }
    Ok(SysexPackets {
        port,
        rest: payload,
    })
}

impl Iterator for SysexPackets<'_> {
    type Item = EventPacket;

    fn next(&mut self) -> Option<EventPacket> {
        let packet = match *self.rest {
            [] => return None,
            [b0] => {
                self.rest = &[];
                EventPacket::sysex(self.port, CIN_SYSEX_END_1, [b0, 0, 0])
            }
            [b0, b1] => {
                self.rest = &[];
                EventPacket::sysex(self.port, CIN_SYSEX_END_2, [b0, b1, 0])
            }
            [b0, b1, b2] => {
                self.rest = &[];
                EventPacket::sysex(self.port, CIN_SYSEX_END_3, [b0, b1, b2])
            }
            [b0, b1, b2, ..] => {
                self.rest = &self.rest[3..];
                EventPacket::sysex(self.port, CIN_SYSEX_CONTINUE, [b0, b1, b2])
            }
        };
        Some(packet)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let packets = self.rest.len().div_ceil(3);
        (packets, Some(packets))
    }
}

impl ExactSizeIterator for SysexPackets<'_> {}

/// Enqueue one event packet, whole or not at all.
pub fn send_packet<T: Transport, const RX: usize, const TX: usize, const XFER: usize>(
    queue: &EndpointQueue<'_, RX, TX, XFER>,
    transport: &mut T,
    packet: EventPacket,
    wait: &mut impl Wait,
) -> Result<(), MidiError> {
    queue.write_all(transport, packet.as_bytes(), wait)?;
    Ok(())
}

/// Send a one-byte MIDI message on `port`.
pub fn send_1<T: Transport, const RX: usize, const TX: usize, const XFER: usize>(
    queue: &EndpointQueue<'_, RX, TX, XFER>,
    transport: &mut T,
    port: u8,
    b0: u8,
    wait: &mut impl Wait,
) -> Result<(), MidiError> {
    send_packet(queue, transport, EventPacket::one(port, b0), wait)
}

/// Send a two-byte MIDI message on `port`.
pub fn send_2<T: Transport, const RX: usize, const TX: usize, const XFER: usize>(
    queue: &EndpointQueue<'_, RX, TX, XFER>,
    transport: &mut T,
    port: u8,
    b0: u8,
    b1: u8,
    wait: &mut impl Wait,
) -> Result<(), MidiError> {
    send_packet(queue, transport, EventPacket::two(port, b0, b1), wait)
}

/// Send a three-byte MIDI message on `port`.
pub fn send_3<T: Transport, const RX: usize, const TX: usize, const XFER: usize>(
    queue: &EndpointQueue<'_, RX, TX, XFER>,
    transport: &mut T,
    port: u8,
    b0: u8,
    b1: u8,
    b2: u8,
    wait: &mut impl Wait,
) -> Result<(), MidiError> {
    send_packet(queue, transport, EventPacket::three(port, b0, b1, b2), wait)
}

/// Send a complete SysEx message on `port`.
///
/// `payload` includes the `F0` and `F7` framing bytes and must be at
/// least three bytes long. Packets are enqueued one at a time; if the
/// wait budget expires partway, whole packets stay queued and the
/// remainder of the message is not sent.
pub fn send_sysex<T: Transport, const RX: usize, const TX: usize, const XFER: usize>(
    queue: &EndpointQueue<'_, RX, TX, XFER>,
    transport: &mut T,
    port: u8,
    payload: &[u8],
    wait: &mut impl Wait,
) -> Result<(), MidiError> {
    for packet in sysex_packets(port, payload)? {
        send_packet(queue, transport, packet, wait)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        code_index, pack_header, send_3, send_sysex, sysex_packets, EventPacket, MidiError,
        CIN_SYSEX_CONTINUE, CIN_SYSEX_END_1, CIN_SYSEX_END_2, CIN_SYSEX_END_3,
    };
    use crate::queue::{Config, EndpointQueue};
    use crate::ring::{NonBlocking, Ring};
    use crate::{EndpointAddress, Error, Transport, UsbDirection};
    use std::vec::Vec;

    #[test]
    fn code_index_is_status_high_nibble() {
        assert_eq!(code_index(0x90), 0x9);
        assert_eq!(code_index(0x80), 0x8);
        assert_eq!(code_index(0xc5), 0xc);
    }

    #[test]
    fn header_for_note_on_all_ports() {
        for port in 1..=16u8 {
            assert_eq!(pack_header(port, 0x90), ((port - 1) & 0xf) << 4 | 0x9);
        }
    }

    #[test]
    fn packets_zero_pad_unused_payload() {
        assert_eq!(EventPacket::one(1, 0xf8).as_bytes(), &[0x0f, 0xf8, 0, 0]);
        assert_eq!(
            EventPacket::two(2, 0xc0, 0x12).as_bytes(),
            &[0x1c, 0xc0, 0x12, 0]
        );
        assert_eq!(
            EventPacket::three(3, 0x90, 0x3c, 0x40).as_bytes(),
            &[0x29, 0x90, 0x3c, 0x40]
        );
    }

    #[test]
    fn sysex_rejects_short_payloads() {
        assert_eq!(
            sysex_packets(1, &[]).err(),
            Some(MidiError::SysexTooShort)
        );
        assert_eq!(
            sysex_packets(1, &[0xf0, 0xf7]).err(),
            Some(MidiError::SysexTooShort)
        );
    }

    #[test]
    fn sysex_packet_count_is_payload_thirds_rounded_up() {
        for len in 3..=32usize {
            let payload: Vec<u8> = (0..len as u8).collect();
            let packets: Vec<_> = sysex_packets(1, &payload).unwrap().collect();
            assert_eq!(packets.len(), len.div_ceil(3), "payload length {}", len);
        }
    }

    #[test]
    fn sysex_tail_cin_matches_remainder() {
        let tail = |payload: &[u8]| {
            sysex_packets(1, payload)
                .unwrap()
                .last()
                .unwrap()
                .code_index()
        };
        assert_eq!(tail(&[0xf0, 1, 0xf7]), CIN_SYSEX_END_3);
        assert_eq!(tail(&[0xf0, 1, 2, 0xf7]), CIN_SYSEX_END_1);
        assert_eq!(tail(&[0xf0, 1, 2, 3, 0xf7]), CIN_SYSEX_END_2);
    }

    #[test]
    fn sysex_payload_reconstructs_exactly() {
        let payload: Vec<u8> = (0..20u8).collect();
        let mut rebuilt = Vec::new();
        for packet in sysex_packets(5, &payload).unwrap() {
            // Cable nibble is constant across continuations.
            assert_eq!(packet.cable(), 4);
            let bytes = packet.payload();
            let real = match packet.code_index() {
                CIN_SYSEX_CONTINUE | CIN_SYSEX_END_3 => 3,
                CIN_SYSEX_END_2 => 2,
                CIN_SYSEX_END_1 => 1,
                other => panic!("unexpected CIN {}", other),
            };
            rebuilt.extend_from_slice(&bytes[..real]);
        }
        assert_eq!(rebuilt, payload);
    }

    struct Sink {
        bytes: Vec<u8>,
        busy: bool,
        pending: Option<usize>,
    }

    impl Sink {
        fn new() -> Self {
            Sink {
                bytes: Vec::new(),
                busy: false,
                pending: None,
            }
        }

        /// Deliver transmit completions until the queue goes idle.
        fn flush<const RX: usize, const TX: usize, const XFER: usize>(
            &mut self,
            queue: &EndpointQueue<RX, TX, XFER>,
        ) {
            while let Some(len) = self.pending.take() {
                queue.on_data_transmitted(self, len);
            }
        }
    }

    impl Transport for Sink {
        fn max_packet_size(&self, _: EndpointAddress) -> usize {
            64
        }
        fn transfer_capacity(&self, _: EndpointAddress) -> usize {
            64
        }
        fn is_busy(&self, _: EndpointAddress) -> bool {
            self.busy
        }
        fn is_active(&self) -> bool {
            true
        }
        fn start_receive(&mut self, _: EndpointAddress, _: usize) {}
        fn start_transmit(&mut self, _: EndpointAddress, data: &[u8]) {
            self.bytes.extend_from_slice(data);
            self.pending = Some(data.len());
        }
    }

    fn queue_over<'a>(
        input: &'a Ring<64>,
        output: &'a Ring<64>,
    ) -> EndpointQueue<'a, 64, 64, 64> {
        EndpointQueue::new(
            Config {
                input: EndpointAddress::from_parts(2, UsbDirection::In),
                output: EndpointAddress::from_parts(2, UsbDirection::Out),
            },
            input,
            output,
        )
    }

    #[test]
    fn note_messages_round_trip_through_the_wire_bytes() {
        let input = Ring::<64>::new();
        let output = Ring::<64>::new();
        let queue = queue_over(&input, &output);
        let mut sink = Sink::new();
        queue.start(&mut sink);

        let messages = [
            (0x90u8, 0x3cu8, 0x40u8),
            (0x80, 0x3c, 0x00),
            (0x90, 0x40, 0x7f),
        ];
        for (b0, b1, b2) in messages {
            send_3(&queue, &mut sink, 1, b0, b1, b2, &mut NonBlocking).unwrap();
            sink.flush(&queue);
        }

        let mut rebuilt = Vec::new();
        for frame in sink.bytes.chunks(4) {
            assert_eq!(frame.len(), 4);
            // Drop the header; a three-byte message has no padding.
            rebuilt.push((frame[1], frame[2], frame[3]));
        }
        assert_eq!(rebuilt, messages);
    }

    #[test]
    fn sysex_lands_on_the_wire_in_order() {
        let input = Ring::<64>::new();
        let output = Ring::<64>::new();
        let queue = queue_over(&input, &output);
        let mut sink = Sink::new();
        queue.start(&mut sink);

        let payload = [0xf0, 0x7e, 0x7f, 0x06, 0x01, 0xf7];
        send_sysex(&queue, &mut sink, 1, &payload, &mut NonBlocking).unwrap();
        sink.flush(&queue);
        assert_eq!(
            sink.bytes,
            [0x04, 0xf0, 0x7e, 0x7f, 0x07, 0x06, 0x01, 0xf7]
        );
    }

    #[test]
    fn full_ring_never_strands_a_partial_packet() {
        let input = Ring::<64>::new();
        let output = Ring::<6>::new();
        let queue: EndpointQueue<64, 6, 64> = EndpointQueue::new(
            Config {
                input: EndpointAddress::from_parts(2, UsbDirection::In),
                output: EndpointAddress::from_parts(2, UsbDirection::Out),
            },
            &input,
            &output,
        );
        let mut sink = Sink::new();
        queue.start(&mut sink);
        sink.busy = true;

        send_3(&queue, &mut sink, 1, 0x90, 0x3c, 0x40, &mut NonBlocking).unwrap();
        let result = send_3(&queue, &mut sink, 1, 0x80, 0x3c, 0x00, &mut NonBlocking);
        assert_eq!(result, Err(MidiError::Queue(Error::WouldBlock)));
        // Only the first, complete packet is buffered.
        assert_eq!(output.count_full(), 4);
    }
}
