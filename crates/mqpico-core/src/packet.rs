//! MQTT 3.1 packet types and codec.
//!
//! Outbound frames are appended to a `Vec<u8>` by the `encode_*` builders,
//! which validate their inputs against [`Limits`] before producing a single
//! byte. Inbound frame bodies (everything after the fixed header) are turned
//! into a typed [`Packet`] by [`decode_body`], the one parsing entry point
//! the dispatch loop consumes with a pattern match.

use bytes::Bytes;

use crate::error::{EncodeError, ProtocolError, Result};
use crate::limits::{Limits, MAX_CLIENT_ID_LENGTH, MIN_CLIENT_ID_LENGTH, MIN_TOPIC_LENGTH};
use crate::varint;

/// Protocol name for MQTT 3.1.
pub const PROTOCOL_NAME: &[u8] = b"MQIsdp";
/// Protocol version byte for MQTT 3.1.
pub const PROTOCOL_VERSION: u8 = 3;

// Connect flag bits
const CLEAN_SESSION_FLAG: u8 = 0x02;
const PASSWORD_FLAG: u8 = 0x40;
const USERNAME_FLAG: u8 = 0x80;

/// MQTT Control Packet Types (top nibble of the first frame byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            // 0 and 15 are reserved in MQTT 3.1
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket(format!(
                "invalid QoS: {}",
                value
            ))),
        }
    }
}

/// CONNACK return codes (MQTT 3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernamePassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// Whether the broker accepted the connection.
    pub fn is_accepted(self) -> bool {
        self == ConnectReturnCode::Accepted
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadUsernamePassword),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err(ProtocolError::InvalidReturnCode(value)),
        }
    }
}

/// CONNECT packet data.
#[derive(Debug, Clone)]
pub struct Connect {
    pub client_id: String,
    /// Keep-alive in seconds; the u16 type holds the protocol's [0, 65535]
    /// bound by construction.
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

/// Inbound packets a broker sends to a client.
///
/// Outbound-only types (CONNECT, SUBSCRIBE, UNSUBSCRIBE, DISCONNECT) have
/// builders but no variant here; the QoS 2 handshake types are out of scope.
#[derive(Debug, Clone)]
pub enum Packet {
    Connack(Connack),
    Publish(Publish),
    Puback { message_id: u16 },
    Suback(Suback),
    Unsuback { message_id: u16 },
    Pingreq,
    Pingresp,
}

/// CONNACK packet data.
///
/// MQTT 3.1 has no session-present flag; the first variable-header byte is
/// reserved and ignored.
#[derive(Debug, Clone, Copy)]
pub struct Connack {
    pub code: ConnectReturnCode,
}

/// Inbound PUBLISH packet data.
#[derive(Debug, Clone)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: Bytes,
    /// Present only when the QoS bits of the fixed header are nonzero.
    pub message_id: Option<u16>,
    pub payload: Bytes,
}

/// SUBACK packet data.
#[derive(Debug, Clone)]
pub struct Suback {
    pub message_id: u16,
    /// Granted QoS, one byte per requested topic filter.
    pub granted: Vec<u8>,
}

fn check_remaining_length(remaining: usize, limits: &Limits) -> std::result::Result<(), EncodeError> {
    if remaining > limits.max_remaining_length {
        return Err(EncodeError::MessageLength {
            len: remaining,
            max: limits.max_remaining_length,
        });
    }
    Ok(())
}

fn check_topic_length(topic: &[u8], limits: &Limits) -> std::result::Result<(), EncodeError> {
    if topic.len() < MIN_TOPIC_LENGTH || topic.len() > limits.max_topic_length {
        return Err(EncodeError::TopicLength {
            len: topic.len(),
            min: MIN_TOPIC_LENGTH,
            max: limits.max_topic_length,
        });
    }
    Ok(())
}

// === Outbound frame builders ===

/// Encode a CONNECT packet.
///
/// Validation order: client id, username, password, computed remaining
/// length. Each failure is distinct and no bytes are written on error.
pub fn encode_connect(
    connect: &Connect,
    limits: &Limits,
    buf: &mut Vec<u8>,
) -> std::result::Result<(), EncodeError> {
    let client_id = connect.client_id.as_bytes();
    if client_id.len() < MIN_CLIENT_ID_LENGTH || client_id.len() > MAX_CLIENT_ID_LENGTH {
        return Err(EncodeError::ClientIdLength {
            len: client_id.len(),
            min: MIN_CLIENT_ID_LENGTH,
            max: MAX_CLIENT_ID_LENGTH,
        });
    }
    if let Some(username) = &connect.username {
        if username.len() > limits.max_username_length {
            return Err(EncodeError::UsernameLength {
                len: username.len(),
                max: limits.max_username_length,
            });
        }
    }
    if let Some(password) = &connect.password {
        if password.len() > limits.max_password_length {
            return Err(EncodeError::PasswordLength {
                len: password.len(),
                max: limits.max_password_length,
            });
        }
    }

    // Variable header: protocol name, version, flags, keep-alive
    let mut remaining = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
    remaining += 2 + client_id.len();
    if let Some(username) = &connect.username {
        remaining += 2 + username.len();
    }
    if let Some(password) = &connect.password {
        remaining += 2 + password.len();
    }
    check_remaining_length(remaining, limits)?;

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= CLEAN_SESSION_FLAG;
    }
    if connect.username.is_some() {
        flags |= USERNAME_FLAG;
    }
    if connect.password.is_some() {
        flags |= PASSWORD_FLAG;
    }

    buf.push((PacketType::Connect as u8) << 4);
    varint::encode(remaining, buf);

    buf.extend_from_slice(&(PROTOCOL_NAME.len() as u16).to_be_bytes());
    buf.extend_from_slice(PROTOCOL_NAME);
    buf.push(PROTOCOL_VERSION);
    buf.push(flags);
    buf.extend_from_slice(&connect.keep_alive.to_be_bytes());

    buf.extend_from_slice(&(client_id.len() as u16).to_be_bytes());
    buf.extend_from_slice(client_id);
    if let Some(username) = &connect.username {
        buf.extend_from_slice(&(username.len() as u16).to_be_bytes());
        buf.extend_from_slice(username.as_bytes());
    }
    if let Some(password) = &connect.password {
        buf.extend_from_slice(&(password.len() as u16).to_be_bytes());
        buf.extend_from_slice(password);
    }

    Ok(())
}

/// Encode a QoS 0 PUBLISH packet (no DUP, no RETAIN, no message id).
///
/// Wildcards are rejected unconditionally: `#` and `+` are only meaningful
/// in subscribe filters, never in a topic published to.
pub fn encode_publish(
    topic: &str,
    payload: &[u8],
    limits: &Limits,
    buf: &mut Vec<u8>,
) -> std::result::Result<(), EncodeError> {
    if let Some(wildcard) = topic.chars().find(|c| *c == '#' || *c == '+') {
        return Err(EncodeError::TopicWildcard(wildcard));
    }
    let topic = topic.as_bytes();
    check_topic_length(topic, limits)?;

    let remaining = 2 + topic.len() + payload.len();
    check_remaining_length(remaining, limits)?;

    buf.push((PacketType::Publish as u8) << 4);
    varint::encode(remaining, buf);

    buf.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    buf.extend_from_slice(topic);
    buf.extend_from_slice(payload);

    Ok(())
}

/// Encode a SUBSCRIBE packet.
///
/// Every filter is validated before any byte is written: one bad topic
/// fails the whole request. Wildcards are legal here.
pub fn encode_subscribe(
    message_id: u16,
    topics: &[(&str, QoS)],
    limits: &Limits,
    buf: &mut Vec<u8>,
) -> std::result::Result<(), EncodeError> {
    let mut remaining = 2; // message id
    for (topic, _) in topics {
        check_topic_length(topic.as_bytes(), limits)?;
        remaining += 2 + topic.len() + 1;
    }
    check_remaining_length(remaining, limits)?;

    // SUBSCRIBE carries fixed-header flags 0x02
    buf.push(((PacketType::Subscribe as u8) << 4) | 0x02);
    varint::encode(remaining, buf);

    buf.extend_from_slice(&message_id.to_be_bytes());
    for (topic, qos) in topics {
        let topic = topic.as_bytes();
        buf.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        buf.extend_from_slice(topic);
        buf.push(*qos as u8);
    }

    Ok(())
}

/// Encode an UNSUBSCRIBE packet.
pub fn encode_unsubscribe(
    message_id: u16,
    topics: &[&str],
    limits: &Limits,
    buf: &mut Vec<u8>,
) -> std::result::Result<(), EncodeError> {
    let mut remaining = 2; // message id
    for topic in topics {
        check_topic_length(topic.as_bytes(), limits)?;
        remaining += 2 + topic.len();
    }
    check_remaining_length(remaining, limits)?;

    // UNSUBSCRIBE carries fixed-header flags 0x02
    buf.push(((PacketType::Unsubscribe as u8) << 4) | 0x02);
    varint::encode(remaining, buf);

    buf.extend_from_slice(&message_id.to_be_bytes());
    for topic in topics {
        let topic = topic.as_bytes();
        buf.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        buf.extend_from_slice(topic);
    }

    Ok(())
}

/// Encode a PINGREQ packet.
pub fn encode_pingreq(buf: &mut Vec<u8>) {
    buf.push((PacketType::Pingreq as u8) << 4);
    buf.push(0);
}

/// Encode a PINGRESP packet (sent in answer to a broker PINGREQ).
pub fn encode_pingresp(buf: &mut Vec<u8>) {
    buf.push((PacketType::Pingresp as u8) << 4);
    buf.push(0);
}

/// Encode a DISCONNECT packet.
pub fn encode_disconnect(buf: &mut Vec<u8>) {
    buf.push((PacketType::Disconnect as u8) << 4);
    buf.push(0);
}

// === Inbound body decoding ===

/// Cursor over a frame body.
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u16(&mut self) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(ProtocolError::IncompletePacket {
                needed: 2,
                have: self.remaining(),
            });
        }
        let val = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(val)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::IncompletePacket {
                needed: len,
                have: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

/// Decode one frame body into a typed packet.
///
/// `flags` is the low nibble of the first frame byte; `body` holds exactly
/// `remaining length` bytes. Types a broker never sends to a client
/// (CONNECT, SUBSCRIBE, UNSUBSCRIBE, DISCONNECT) and the QoS 2 handshake
/// (PUBREC, PUBREL, PUBCOMP) are rejected as [`ProtocolError::UnexpectedPacket`].
pub fn decode_body(packet_type: PacketType, flags: u8, body: &[u8]) -> Result<Packet> {
    match packet_type {
        PacketType::Connack => decode_connack(body),
        PacketType::Publish => decode_publish(flags, body),
        PacketType::Puback => Ok(Packet::Puback {
            message_id: decode_message_id_only("PUBACK", body)?,
        }),
        PacketType::Suback => decode_suback(body),
        PacketType::Unsuback => Ok(Packet::Unsuback {
            message_id: decode_message_id_only("UNSUBACK", body)?,
        }),
        PacketType::Pingreq => {
            expect_empty("PINGREQ", body)?;
            Ok(Packet::Pingreq)
        }
        PacketType::Pingresp => {
            expect_empty("PINGRESP", body)?;
            Ok(Packet::Pingresp)
        }
        PacketType::Connect
        | PacketType::Subscribe
        | PacketType::Unsubscribe
        | PacketType::Disconnect
        | PacketType::Pubrec
        | PacketType::Pubrel
        | PacketType::Pubcomp => Err(ProtocolError::UnexpectedPacket(packet_type as u8)),
    }
}

fn decode_connack(body: &[u8]) -> Result<Packet> {
    if body.len() != 2 {
        return Err(ProtocolError::MalformedPacket(format!(
            "CONNACK remaining length {}, expected 2",
            body.len()
        )));
    }
    // body[0] is reserved in MQTT 3.1
    let code = ConnectReturnCode::try_from(body[1])?;
    Ok(Packet::Connack(Connack { code }))
}

fn decode_publish(flags: u8, body: &[u8]) -> Result<Packet> {
    let dup = (flags & 0x08) != 0;
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let retain = (flags & 0x01) != 0;

    let mut dec = Decoder::new(body);

    let topic_len = dec.read_u16()? as usize;
    let topic_bytes = dec.read_bytes(topic_len)?;
    if std::str::from_utf8(topic_bytes).is_err() {
        return Err(ProtocolError::InvalidUtf8);
    }
    let topic = Bytes::copy_from_slice(topic_bytes);

    // QoS 0 publishes carry no message id
    let message_id = if qos != QoS::AtMostOnce {
        Some(dec.read_u16()?)
    } else {
        None
    };

    let payload = Bytes::copy_from_slice(dec.read_bytes(dec.remaining())?);

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        message_id,
        payload,
    }))
}

fn decode_suback(body: &[u8]) -> Result<Packet> {
    // Message id plus at least one granted-QoS byte
    if body.len() < 3 {
        return Err(ProtocolError::MalformedPacket(format!(
            "SUBACK remaining length {}, expected at least 3",
            body.len()
        )));
    }
    let mut dec = Decoder::new(body);
    let message_id = dec.read_u16()?;
    let granted = dec.read_bytes(dec.remaining())?.to_vec();
    Ok(Packet::Suback(Suback {
        message_id,
        granted,
    }))
}

fn decode_message_id_only(name: &str, body: &[u8]) -> Result<u16> {
    if body.len() != 2 {
        return Err(ProtocolError::MalformedPacket(format!(
            "{} remaining length {}, expected 2",
            name,
            body.len()
        )));
    }
    Decoder::new(body).read_u16()
}

fn expect_empty(name: &str, body: &[u8]) -> Result<()> {
    if !body.is_empty() {
        return Err(ProtocolError::MalformedPacket(format!(
            "{} remaining length {}, expected 0",
            name,
            body.len()
        )));
    }
    Ok(())
}
