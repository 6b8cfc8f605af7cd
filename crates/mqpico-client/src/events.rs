//! Events delivered by the dispatch loop.

use bytes::Bytes;

use mqpico_core::{ConnectReturnCode, QoS};

/// Decoded inbound frames, delivered in arrival order.
#[derive(Debug)]
pub enum Event {
    /// CONNACK arrived outside the synchronous connect handshake.
    Connack {
        /// Broker return code (0 = accepted, 1-5 = refusal reasons).
        code: ConnectReturnCode,
    },
    /// Received a publish message.
    Message {
        /// Topic the message was published to.
        topic: Bytes,
        /// Message payload.
        payload: Bytes,
        /// Quality of Service level the broker used.
        qos: QoS,
        /// Message id, present only for QoS 1/2 deliveries.
        message_id: Option<u16>,
    },
    /// Publish acknowledgment (QoS 1).
    Puback {
        /// Message id of the acknowledged PUBLISH.
        message_id: u16,
    },
    /// Subscribe acknowledgment.
    Suback {
        /// Message id of the SUBSCRIBE.
        message_id: u16,
        /// Granted QoS, one byte per topic filter.
        granted: Vec<u8>,
    },
    /// Unsubscribe acknowledgment.
    Unsuback {
        /// Message id of the UNSUBSCRIBE.
        message_id: u16,
    },
    /// Ping response from the broker.
    Pingresp,
    /// The transport closed; the dispatch loop has ended.
    Disconnected {
        /// Reason for disconnection, if known.
        reason: Option<String>,
    },
}
