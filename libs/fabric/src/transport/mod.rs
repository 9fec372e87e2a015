//! Framing of transport messages over a byte connection

use tracing::trace;

use crate::channel::{channel, forward, try_map, Receiver, Sender};
use crate::connection::Connection;

pub mod frame;

pub use self::frame::{decode_message, encode_message, MsgHeader, TransportMessage};

/// A connection that carries [`TransportMessage`]s.
///
/// Decoding failures fail the inbound side and encoding failures fail the
/// outbound side. Closing the sender closes the connection.
pub struct Transport {
    label: String,
    sender: Sender<TransportMessage>,
    receiver: Receiver<TransportMessage>,
}

impl Transport {
    pub fn new(connection: impl Connection) -> Self {
        let label = connection.label();
        let (sender, receiver) = connection.into_channel();
        Self::from_channel(label, sender, receiver)
    }

    /// Frame messages over an existing pair of byte channels.
    pub fn from_channel(
        label: impl Into<String>,
        bytes_out: Sender<Vec<u8>>,
        bytes_in: Receiver<Vec<u8>>,
    ) -> Self {
        let label = label.into();

        let inbound_label = label.clone();
        let receiver = try_map(bytes_in, move |bytes: Vec<u8>| {
            let message = decode_message(&bytes)?;
            trace_message(&inbound_label, "in", bytes.len(), &message);
            Ok::<_, crate::Error>(message)
        });

        let (sender, outbound) = channel();
        let outbound_label = label.clone();
        let encoded = try_map(outbound, move |message: TransportMessage| {
            let bytes = encode_message(&message)?;
            trace_message(&outbound_label, "out", bytes.len(), &message);
            Ok::<_, crate::Error>(bytes)
        });
        forward(encoded, bytes_out);

        Self {
            label,
            sender,
            receiver,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn into_parts(self) -> (Sender<TransportMessage>, Receiver<TransportMessage>) {
        (self.sender, self.receiver)
    }
}

fn trace_message(label: &str, direction: &str, len: usize, message: &TransportMessage) {
    let header = &message.header;
    trace!(
        connection = label,
        direction,
        bytes = len,
        exchange_id = header.exchange_id,
        continues = header.exchange_continues,
        exchange_type = header.exchange_type.as_deref(),
        error = ?header.error,
        payload = message.payload.as_ref().map(Vec::len),
        "frame"
    );
}
