//! MQTT client operations over a blocking transport.

use std::io::{Read, Write};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mqpico_core::packet::{
    encode_connect, encode_disconnect, encode_pingreq, encode_publish, encode_subscribe,
    encode_unsubscribe, Connect, ConnectReturnCode, PacketType, QoS,
};
use mqpico_core::ProtocolError;

use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ClientError, Result};
use crate::events::Event;
use crate::transport;

/// MQTT 3.1 client bound to the write half of a transport.
///
/// All frames go out through one mutex-guarded write path, so handles may be
/// cloned into timers and interrupt-style producers without interleaving
/// bytes mid-frame. Reading is single-owner: [`Client::connect`] borrows the
/// read half once for the CONNACK handshake, after which the [`Dispatcher`]
/// returned by [`Client::dispatcher`] is the only reader.
pub struct Client<W> {
    writer: Arc<Mutex<W>>,
    config: ClientConfig,
    rng: StdRng,
}

impl<W: Write> Client<W> {
    /// Create a client owning the transport's write half.
    pub fn new(writer: W, config: ClientConfig) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            config,
            // Seeded once here; message ids never touch global RNG state.
            rng: StdRng::from_os_rng(),
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the broker and wait for its CONNACK.
    ///
    /// Sends CONNECT, then performs one blocking read against `reader` and
    /// validates the reply inline: the first frame on the wire must be a
    /// CONNACK with remaining length 2. The broker's return code is given
    /// back as a value; refusals (codes 1-5) are not errors.
    pub fn connect<R: Read>(&mut self, reader: &mut R) -> Result<ConnectReturnCode> {
        let connect = Connect {
            client_id: self.config.client_id.clone(),
            keep_alive: self.config.keep_alive,
            clean_session: self.config.clean_session,
            username: self.config.username.clone(),
            password: self.config.password.clone(),
        };
        let mut frame = Vec::new();
        encode_connect(&connect, &self.config.limits, &mut frame)?;
        self.send_frame(&frame)?;

        let first = transport::read_byte(reader)?;
        if first >> 4 != PacketType::Connack as u8 {
            return Err(ClientError::UnexpectedReply {
                packet_type: first >> 4,
            });
        }
        let mut rest = [0u8; 3];
        transport::read_full(reader, &mut rest)?;
        if rest[0] != 2 {
            return Err(ProtocolError::MalformedPacket(format!(
                "CONNACK remaining length {}, expected 2",
                rest[0]
            ))
            .into());
        }
        // rest[1] is reserved in MQTT 3.1
        Ok(ConnectReturnCode::try_from(rest[2])?)
    }

    /// Publish a QoS 0 message.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::new();
        encode_publish(topic, payload, &self.config.limits, &mut frame)?;
        self.send_frame(&frame)
    }

    /// Subscribe to topic filters. Returns the message id of the request.
    ///
    /// The eventual SUBACK is delivered through the dispatch loop; its
    /// message id is surfaced there but not correlated here.
    pub fn subscribe(&mut self, topics: &[(&str, QoS)]) -> Result<u16> {
        let message_id = self.next_message_id();
        let mut frame = Vec::new();
        encode_subscribe(message_id, topics, &self.config.limits, &mut frame)?;
        self.send_frame(&frame)?;
        Ok(message_id)
    }

    /// Unsubscribe from topic filters. Returns the message id of the request.
    pub fn unsubscribe(&mut self, topics: &[&str]) -> Result<u16> {
        let message_id = self.next_message_id();
        let mut frame = Vec::new();
        encode_unsubscribe(message_id, topics, &self.config.limits, &mut frame)?;
        self.send_frame(&frame)?;
        Ok(message_id)
    }

    /// Send a PINGREQ. The PINGRESP arrives through the dispatch loop.
    pub fn ping(&mut self) -> Result<()> {
        let mut frame = Vec::new();
        encode_pingreq(&mut frame);
        self.send_frame(&frame)
    }

    /// Send a DISCONNECT.
    pub fn disconnect(&mut self) -> Result<()> {
        let mut frame = Vec::new();
        encode_disconnect(&mut frame);
        self.send_frame(&frame)
    }

    /// Build the receive-dispatch loop over the transport's read half.
    ///
    /// The dispatcher shares this client's write path so it can answer
    /// broker PINGREQs.
    pub fn dispatcher<R: Read>(&self, reader: R, events: Sender<Event>) -> Dispatcher<R, W> {
        Dispatcher::new(
            reader,
            Arc::clone(&self.writer),
            self.config.limits,
            events,
        )
    }

    fn next_message_id(&mut self) -> u16 {
        self.rng.random()
    }

    /// Send one frame in a single locked section.
    ///
    /// The transport reports how many bytes it accepted; anything short of
    /// the whole frame is a connection failure.
    fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        let sent = writer.write(frame)?;
        if sent != frame.len() {
            return Err(ClientError::PartialSend {
                sent,
                len: frame.len(),
            });
        }
        writer.flush()?;
        Ok(())
    }
}

impl<W> Clone for Client<W> {
    /// Cloned handles share the write path; each gets its own RNG.
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            config: self.config.clone(),
            rng: StdRng::from_os_rng(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// Write half double that records everything it accepts.
    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl SharedWriter {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().clone()
        }
    }

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Write half double that always comes up one byte short.
    struct ShortWriter;

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len().saturating_sub(1))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_client(writer: SharedWriter) -> Client<SharedWriter> {
        let config = ClientConfig::new("tester123").keep_alive(10);
        Client::new(writer, config)
    }

    #[test]
    fn connect_handshake_accepted() {
        let writer = SharedWriter::default();
        let mut client = test_client(writer.clone());
        let mut reader = Cursor::new(vec![0x20, 0x02, 0x00, 0x00]);

        let code = client.connect(&mut reader).unwrap();
        assert_eq!(code, ConnectReturnCode::Accepted);
        assert!(code.is_accepted());

        let sent = writer.bytes();
        assert_eq!(sent.len(), 25);
        assert_eq!(sent[0], 0x10);
    }

    #[test]
    fn connect_refusal_is_a_value_not_an_error() {
        let writer = SharedWriter::default();
        let mut client = test_client(writer);
        let mut reader = Cursor::new(vec![0x20, 0x02, 0x00, 0x05]);

        let code = client.connect(&mut reader).unwrap();
        assert_eq!(code, ConnectReturnCode::NotAuthorized);
        assert!(!code.is_accepted());
    }

    #[test]
    fn connect_rejects_non_connack_reply() {
        let writer = SharedWriter::default();
        let mut client = test_client(writer);
        let mut reader = Cursor::new(vec![0x30, 0x02, 0x00, 0x00]);

        assert!(matches!(
            client.connect(&mut reader),
            Err(ClientError::UnexpectedReply { packet_type: 3 })
        ));
    }

    #[test]
    fn connect_rejects_bad_connack_length() {
        let writer = SharedWriter::default();
        let mut client = test_client(writer);
        let mut reader = Cursor::new(vec![0x20, 0x03, 0x00, 0x00]);

        assert!(matches!(
            client.connect(&mut reader),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn connect_surfaces_closed_transport() {
        let writer = SharedWriter::default();
        let mut client = test_client(writer);
        let mut reader = Cursor::new(Vec::new());

        assert!(matches!(
            client.connect(&mut reader),
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[test]
    fn connect_validates_before_sending() {
        let writer = SharedWriter::default();
        let mut client = Client::new(writer.clone(), ClientConfig::new(""));
        let mut reader = Cursor::new(Vec::new());

        assert!(matches!(
            client.connect(&mut reader),
            Err(ClientError::Encode(_))
        ));
        assert!(writer.bytes().is_empty());
    }

    #[test]
    fn publish_writes_exact_frame() {
        let writer = SharedWriter::default();
        let mut client = test_client(writer.clone());

        client.publish("test", b"hi").unwrap();
        assert_eq!(
            writer.bytes(),
            [0x30, 0x08, 0x00, 0x04, b't', b'e', b's', b't', b'h', b'i']
        );
    }

    #[test]
    fn publish_short_write_is_partial_send() {
        let mut client = Client::new(ShortWriter, ClientConfig::new("tester123"));
        assert!(matches!(
            client.publish("test", b"hi"),
            Err(ClientError::PartialSend { sent: 9, len: 10 })
        ));
    }

    #[test]
    fn subscribe_frame_carries_returned_message_id() {
        let writer = SharedWriter::default();
        let mut client = test_client(writer.clone());

        let message_id = client.subscribe(&[("a/b", QoS::AtMostOnce)]).unwrap();
        let sent = writer.bytes();
        assert_eq!(sent[0], 0x82);
        assert_eq!(u16::from_be_bytes([sent[2], sent[3]]), message_id);
        assert_eq!(&sent[4..6], &[0x00, 0x03]);
        assert_eq!(&sent[6..9], b"a/b");
        assert_eq!(sent[9], 0x00);
    }

    #[test]
    fn unsubscribe_frame_carries_returned_message_id() {
        let writer = SharedWriter::default();
        let mut client = test_client(writer.clone());

        let message_id = client.unsubscribe(&["a/b"]).unwrap();
        let sent = writer.bytes();
        assert_eq!(sent[0], 0xA2);
        assert_eq!(u16::from_be_bytes([sent[2], sent[3]]), message_id);
        assert_eq!(&sent[6..9], b"a/b");
    }

    #[test]
    fn ping_and_disconnect_are_two_byte_frames() {
        let writer = SharedWriter::default();
        let mut client = test_client(writer.clone());

        client.ping().unwrap();
        client.disconnect().unwrap();
        assert_eq!(writer.bytes(), [0xC0, 0x00, 0xE0, 0x00]);
    }

    #[test]
    fn cloned_handles_share_the_write_path() {
        let writer = SharedWriter::default();
        let client = test_client(writer.clone());

        let mut producer = client.clone();
        producer.publish("t", b"x").unwrap();
        assert_eq!(writer.bytes()[0], 0x30);
    }
}
