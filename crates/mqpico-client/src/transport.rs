//! Blocking read helpers for the transport collaborator.
//!
//! The transport contract is `receive(buffer) -> count`: a zero count means
//! the peer closed the connection, which mid-frame is a transport failure.
//! `Interrupted` reads are retried.

use std::io::{self, Read};

use crate::error::{ClientError, Result};

/// Read exactly one byte.
pub(crate) fn read_byte<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Err(ClientError::ConnectionClosed),
            Ok(_) => return Ok(buf[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ClientError::Io(e)),
        }
    }
}

/// Fill the whole buffer.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(ClientError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ClientError::Io(e)),
        }
    }
    Ok(())
}
