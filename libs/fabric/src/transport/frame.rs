//! Wire format of a single transport message
//!
//! ```text
//! +----------------------+------------------+-------------------+
//! | varint header length | bincode header   | payload bytes     |
//! +----------------------+------------------+-------------------+
//! ```
//!
//! The payload runs to the end of the connection message and is absent when
//! the header says `no_payload`.

use serde::{Deserialize, Serialize};
use switchboard_core::{Status, StatusError};

use crate::error::{Error, Result};

/// Frame header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgHeader {
    pub exchange_id: u64,
    /// False on the last frame of this direction.
    pub exchange_continues: bool,
    /// Method name, present only on the frame that opens an exchange.
    pub exchange_type: Option<String>,
    pub error: Option<Status>,
    pub no_payload: bool,
    /// Credential announced together with the exchange type.
    pub auth: Option<String>,
}

/// A header plus an optional payload. `header.no_payload` always matches
/// whether `payload` is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub header: MsgHeader,
    pub payload: Option<Vec<u8>>,
}

impl TransportMessage {
    pub fn new(mut header: MsgHeader, payload: Option<Vec<u8>>) -> Self {
        header.no_payload = payload.is_none();
        Self { header, payload }
    }

    /// A payload frame.
    pub fn data(exchange_id: u64, payload: Vec<u8>, continues: bool) -> Self {
        Self::new(
            MsgHeader {
                exchange_id,
                exchange_continues: continues,
                ..Default::default()
            },
            Some(payload),
        )
    }

    /// A frame without payload: a placeholder while `continues`, otherwise
    /// the end of this direction.
    pub fn empty(exchange_id: u64, continues: bool) -> Self {
        Self::new(
            MsgHeader {
                exchange_id,
                exchange_continues: continues,
                ..Default::default()
            },
            None,
        )
    }

    /// A frame that fails the exchange on the receiving side.
    pub fn error(exchange_id: u64, err: &StatusError) -> Self {
        Self::new(
            MsgHeader {
                exchange_id,
                error: Some(err.to_status()),
                ..Default::default()
            },
            None,
        )
    }

    /// The error this frame carries, if any. A status with code 0 is not one.
    pub fn error_status(&self) -> Option<StatusError> {
        self.header.error.as_ref().and_then(StatusError::from_status)
    }

    pub fn is_final(&self) -> bool {
        !self.header.exchange_continues
    }
}

/// Serialize a message into one connection message.
pub fn encode_message(message: &TransportMessage) -> Result<Vec<u8>> {
    validate(&message.header, message.payload.is_some())?;
    let header = bincode::serialize(&message.header)
        .map_err(|e| Error::Codec(format!("failed to encode header: {e}")))?;
    let payload_len = message.payload.as_ref().map_or(0, Vec::len);

    let mut out = Vec::with_capacity(header.len() + payload_len + 10);
    write_varint(&mut out, header.len() as u64);
    out.extend_from_slice(&header);
    if let Some(payload) = &message.payload {
        out.extend_from_slice(payload);
    }
    Ok(out)
}

/// Parse one connection message.
pub fn decode_message(data: &[u8]) -> Result<TransportMessage> {
    let (header_len, offset) = read_varint(data)?;
    let header_end = usize::try_from(header_len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            Error::InvalidFrame(format!(
                "header length {header_len} exceeds message of {} bytes",
                data.len()
            ))
        })?;

    let header: MsgHeader = bincode::deserialize(&data[offset..header_end])
        .map_err(|e| Error::InvalidFrame(format!("malformed header: {e}")))?;

    let rest = &data[header_end..];
    let payload = if header.no_payload {
        if !rest.is_empty() {
            return Err(Error::InvalidFrame(format!(
                "{} trailing bytes after a header without payload",
                rest.len()
            )));
        }
        None
    } else {
        Some(rest.to_vec())
    };
    validate(&header, payload.is_some())?;
    Ok(TransportMessage { header, payload })
}

fn validate(header: &MsgHeader, has_payload: bool) -> Result<()> {
    if header.no_payload == has_payload {
        return Err(Error::InvalidFrame(
            "no_payload flag does not match the payload".to_string(),
        ));
    }
    if header.error.as_ref().is_some_and(Status::is_error) && has_payload {
        return Err(Error::InvalidFrame(
            "error frames cannot carry a payload".to_string(),
        ));
    }
    Ok(())
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in data.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::InvalidFrame("truncated header length".to_string()))
}
