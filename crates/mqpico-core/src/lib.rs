//! mqpico-core - MQTT 3.1 wire types and codec.
//!
//! This crate provides frame building and parsing for the MQTT 3.1 client
//! subset (protocol name `MQIsdp`, version 3), shared by the client crate.
//! No I/O lives here: builders append complete frames to a `Vec<u8>`, and
//! `decode_body` turns an already-read frame body into a typed [`Packet`].

pub mod error;
pub mod limits;
pub mod packet;
pub mod varint;

pub use error::{EncodeError, ProtocolError, Result};
pub use limits::Limits;
pub use packet::*;
