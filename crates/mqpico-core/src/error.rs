//! Error types for the MQTT codec.

use thiserror::Error;

/// Frame-building failures, detected before any byte is produced.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("client id length {len} outside [{min}, {max}]")]
    ClientIdLength { len: usize, min: usize, max: usize },

    #[error("username length {len} exceeds {max}")]
    UsernameLength { len: usize, max: usize },

    #[error("password length {len} exceeds {max}")]
    PasswordLength { len: usize, max: usize },

    #[error("topic length {len} outside [{min}, {max}]")]
    TopicLength { len: usize, min: usize, max: usize },

    #[error("publish topic contains wildcard character '{0}'")]
    TopicWildcard(char),

    #[error("remaining length {len} exceeds maximum {max}")]
    MessageLength { len: usize, max: usize },
}

/// MQTT protocol decode errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("packet type {0} is not sent broker-to-client")]
    UnexpectedPacket(u8),

    #[error("invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("incomplete packet: need {needed} bytes, have {have}")]
    IncompletePacket { needed: usize, have: usize },

    #[error("invalid connect return code: {0}")]
    InvalidReturnCode(u8),

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
