//! Receive-dispatch loop.
//!
//! The dispatcher is the sole reader of the transport once the connect
//! handshake is done. Each frame moves through the same states: one byte
//! read for the type nibble, byte-at-a-time remaining-length decode, an
//! exact-size body read, then a pattern match on the decoded packet. A
//! malformed frame is logged and discarded; the loop only ends when the
//! transport closes or fails.

use std::io::{self, Read, Write};
use std::sync::Arc;

use crossbeam_channel::Sender;
use log::{debug, warn};
use parking_lot::Mutex;

use mqpico_core::packet::{decode_body, encode_pingresp, Packet, PacketType};
use mqpico_core::Limits;

use crate::error::{ClientError, Result};
use crate::events::Event;
use crate::transport;

/// Drain buffer size for oversized frames.
const DRAIN_CHUNK: usize = 1024;

/// The receive-dispatch state machine over the transport's read half.
pub struct Dispatcher<R, W> {
    reader: R,
    writer: Arc<Mutex<W>>,
    limits: Limits,
    events: Sender<Event>,
}

impl<R: Read, W: Write> Dispatcher<R, W> {
    pub(crate) fn new(
        reader: R,
        writer: Arc<Mutex<W>>,
        limits: Limits,
        events: Sender<Event>,
    ) -> Self {
        Self {
            reader,
            writer,
            limits,
            events,
        }
    }

    /// Run the loop until the transport closes or fails.
    ///
    /// A clean close between frames emits [`Event::Disconnected`] and
    /// returns `Ok(())`; a close mid-frame or any I/O failure is an error.
    pub fn run(mut self) -> Result<()> {
        loop {
            let first = match self.read_first_byte() {
                Some(byte) => byte?,
                None => {
                    self.emit(Event::Disconnected {
                        reason: Some("connection closed by peer".to_string()),
                    });
                    return Ok(());
                }
            };

            let packet_type = match PacketType::try_from(first >> 4) {
                Ok(packet_type) => packet_type,
                Err(err) => {
                    // Reserved nibble: no trustworthy length follows, so
                    // drop the byte and resynchronize on the next one.
                    warn!("discarding byte: {}", err);
                    continue;
                }
            };

            let remaining = self.read_remaining_length()?;

            if remaining > self.limits.max_remaining_length {
                warn!(
                    "dropping {:?} frame: remaining length {} exceeds {}",
                    packet_type, remaining, self.limits.max_remaining_length
                );
                self.drain(remaining)?;
                continue;
            }

            let mut body = vec![0u8; remaining];
            transport::read_full(&mut self.reader, &mut body)?;

            match decode_body(packet_type, first & 0x0F, &body) {
                Ok(packet) => self.dispatch(packet)?,
                // Malformed frames never terminate the loop
                Err(err) => warn!("discarding {:?} frame: {}", packet_type, err),
            }
        }
    }

    /// Read the type byte of the next frame.
    ///
    /// Returns `None` on a clean close; between frames that is a normal end
    /// of session, not a failure.
    fn read_first_byte(&mut self) -> Option<Result<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return None,
                Ok(_) => return Some(Ok(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(ClientError::Io(e))),
            }
        }
    }

    /// Decode the remaining-length field one byte at a time.
    ///
    /// The field is capped at four bytes. A continuation bit still set on
    /// the fourth byte means the stream is malformed; the bounded value is
    /// used anyway so the loop cannot hang accumulating length bytes.
    fn read_remaining_length(&mut self) -> Result<usize> {
        let mut multiplier = 1usize;
        let mut value = 0usize;
        for _ in 0..4 {
            let byte = transport::read_byte(&mut self.reader)?;
            value += ((byte & 0x7F) as usize) * multiplier;
            multiplier *= 128;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        warn!(
            "remaining length continued past 4 bytes, using capped value {}",
            value
        );
        Ok(value)
    }

    /// Consume and discard `remaining` body bytes, keeping the stream framed.
    fn drain(&mut self, mut remaining: usize) -> Result<()> {
        let mut chunk = [0u8; DRAIN_CHUNK];
        while remaining > 0 {
            let want = remaining.min(chunk.len());
            transport::read_full(&mut self.reader, &mut chunk[..want])?;
            remaining -= want;
        }
        Ok(())
    }

    fn dispatch(&mut self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Connack(connack) => {
                if !connack.code.is_accepted() {
                    warn!("broker refused connection: {:?}", connack.code);
                }
                self.emit(Event::Connack { code: connack.code });
            }
            Packet::Publish(publish) => {
                debug!(
                    "publish on {:?}, {} payload bytes",
                    publish.topic,
                    publish.payload.len()
                );
                self.emit(Event::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                    qos: publish.qos,
                    message_id: publish.message_id,
                });
            }
            Packet::Puback { message_id } => {
                debug!("puback for message {}", message_id);
                self.emit(Event::Puback { message_id });
            }
            Packet::Suback(suback) => {
                debug!(
                    "suback for message {}, granted {:?}",
                    suback.message_id, suback.granted
                );
                self.emit(Event::Suback {
                    message_id: suback.message_id,
                    granted: suback.granted,
                });
            }
            Packet::Unsuback { message_id } => {
                debug!("unsuback for message {}", message_id);
                self.emit(Event::Unsuback { message_id });
            }
            Packet::Pingreq => self.send_pingresp()?,
            Packet::Pingresp => {
                debug!("pingresp");
                self.emit(Event::Pingresp);
            }
        }
        Ok(())
    }

    /// Answer a broker PINGREQ through the shared write path.
    fn send_pingresp(&mut self) -> Result<()> {
        let mut frame = Vec::new();
        encode_pingresp(&mut frame);
        let mut writer = self.writer.lock();
        let sent = writer.write(&frame)?;
        if sent != frame.len() {
            return Err(ClientError::PartialSend {
                sent,
                len: frame.len(),
            });
        }
        writer.flush()?;
        Ok(())
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped, discarding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use mqpico_core::{ConnectReturnCode, QoS};

    fn run_loop(input: Vec<u8>, limits: Limits) -> (Result<()>, Vec<Event>, Vec<u8>) {
        let writer = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let dispatcher = Dispatcher::new(Cursor::new(input), Arc::clone(&writer), limits, tx);
        let result = dispatcher.run();
        let events = rx.try_iter().collect();
        let sent = writer.lock().clone();
        (result, events, sent)
    }

    fn run_ok(input: Vec<u8>) -> (Vec<Event>, Vec<u8>) {
        let (result, events, sent) = run_loop(input, Limits::default());
        result.unwrap();
        (events, sent)
    }

    #[test]
    fn connack_accepted_reaches_the_handler() {
        let (events, _) = run_ok(vec![0x20, 0x02, 0x00, 0x00]);
        assert!(matches!(
            events[0],
            Event::Connack {
                code: ConnectReturnCode::Accepted
            }
        ));
        assert!(matches!(events[1], Event::Disconnected { .. }));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn connack_refusal_does_not_stop_the_loop() {
        let mut input = vec![0x20, 0x02, 0x00, 0x01]; // bad protocol version
        input.extend_from_slice(&[
            0x30, 0x08, 0x00, 0x04, b't', b'e', b's', b't', b'h', b'i',
        ]);
        let (events, _) = run_ok(input);

        assert!(matches!(
            events[0],
            Event::Connack {
                code: ConnectReturnCode::UnacceptableProtocolVersion
            }
        ));
        let Event::Message { topic, payload, qos, message_id } = &events[1] else {
            panic!("expected the publish after the refused CONNACK");
        };
        assert_eq!(&topic[..], b"test");
        assert_eq!(&payload[..], b"hi");
        assert_eq!(*qos, QoS::AtMostOnce);
        assert_eq!(*message_id, None);
    }

    #[test]
    fn reserved_nibble_is_skipped() {
        let (events, _) = run_ok(vec![0x00, 0x20, 0x02, 0x00, 0x00]);
        assert!(matches!(events[0], Event::Connack { .. }));
    }

    #[test]
    fn malformed_body_is_discarded() {
        // CONNACK claiming 3 remaining bytes, then a valid PINGRESP
        let (events, _) = run_ok(vec![0x20, 0x03, 0x00, 0x00, 0x00, 0xD0, 0x00]);
        assert!(matches!(events[0], Event::Pingresp));
        assert!(matches!(events[1], Event::Disconnected { .. }));
    }

    #[test]
    fn broker_illegal_type_is_drained_and_rejected() {
        // A SUBSCRIBE frame is never broker-to-client; its body must still
        // be consumed so the following frame stays aligned.
        let (events, _) = run_ok(vec![0x82, 0x02, 0x00, 0x01, 0x20, 0x02, 0x00, 0x00]);
        assert!(matches!(events[0], Event::Connack { .. }));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn pingreq_is_answered_with_pingresp() {
        let (events, sent) = run_ok(vec![0xC0, 0x00]);
        assert_eq!(sent, [0xD0, 0x00]);
        assert!(matches!(events[0], Event::Disconnected { .. }));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn qos1_publish_carries_message_id() {
        let input = vec![0x32, 0x07, 0x00, 0x01, b't', 0x00, 0x2A, b'h', b'i'];
        let (events, _) = run_ok(input);
        let Event::Message { qos, message_id, payload, .. } = &events[0] else {
            panic!("expected a publish delivery");
        };
        assert_eq!(*qos, QoS::AtLeastOnce);
        assert_eq!(*message_id, Some(42));
        assert_eq!(&payload[..], b"hi");
    }

    #[test]
    fn acks_are_dispatched() {
        let mut input = vec![0x40, 0x02, 0x00, 0x07]; // PUBACK id 7
        input.extend_from_slice(&[0x90, 0x03, 0x00, 0x08, 0x01]); // SUBACK id 8
        input.extend_from_slice(&[0xB0, 0x02, 0x00, 0x09]); // UNSUBACK id 9
        let (events, _) = run_ok(input);

        assert!(matches!(events[0], Event::Puback { message_id: 7 }));
        let Event::Suback { message_id, granted } = &events[1] else {
            panic!("expected a suback");
        };
        assert_eq!(*message_id, 8);
        assert_eq!(granted, &[0x01]);
        assert!(matches!(events[2], Event::Unsuback { message_id: 9 }));
    }

    #[test]
    fn oversized_frame_is_drained() {
        let limits = Limits {
            max_remaining_length: 4,
            ..Limits::default()
        };
        let mut input = vec![0x30, 0x08, 0x00, 0x04, b't', b'e', b's', b't', b'h', b'i'];
        input.extend_from_slice(&[0xD0, 0x00]);
        let (result, events, _) = run_loop(input, limits);
        result.unwrap();

        assert!(matches!(events[0], Event::Pingresp));
        assert!(matches!(events[1], Event::Disconnected { .. }));
    }

    #[test]
    fn capped_remaining_length_bounds_the_decode() {
        // Four continuation bytes with zero digits decode to length 0; the
        // fifth byte is already the next frame's type.
        let (events, sent) = run_ok(vec![0xC0, 0x80, 0x80, 0x80, 0x80, 0xD0, 0x00]);
        assert_eq!(sent, [0xD0, 0x00]); // the PINGREQ was still answered
        assert!(matches!(events[0], Event::Pingresp));
    }

    #[test]
    fn close_mid_frame_is_an_error() {
        let (result, events, _) = run_loop(vec![0x30, 0x08, 0x00], Limits::default());
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert!(events.is_empty());
    }
}
