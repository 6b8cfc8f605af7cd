//! Client error types.

use std::io;

use thiserror::Error;

use mqpico_core::{EncodeError, ProtocolError};

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame rejected: {0}")]
    Encode(#[from] EncodeError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The transport accepted fewer bytes than the frame holds.
    #[error("Partial send: transport accepted {sent} of {len} bytes")]
    PartialSend { sent: usize, len: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    /// The first frame after CONNECT was not a CONNACK.
    #[error("Unexpected reply packet type: {packet_type}")]
    UnexpectedReply { packet_type: u8 },
}

pub type Result<T> = std::result::Result<T, ClientError>;
