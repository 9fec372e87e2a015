use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::{bi_channel, Receiver, Sender};
use crate::connection::{ByteChannel, Connection};

static NEXT_PAIR: AtomicU64 = AtomicU64::new(1);

/// One end of an in-process connection.
pub struct MemConnection {
    label: String,
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

impl MemConnection {
    /// Two connected ends. What one side sends the other receives, in order.
    pub fn pair() -> (MemConnection, MemConnection) {
        let n = NEXT_PAIR.fetch_add(1, Ordering::Relaxed);
        let ((a_tx, a_rx), (b_tx, b_rx)) = bi_channel::<Vec<u8>, Vec<u8>>();
        a_tx.open();
        b_tx.open();
        (
            MemConnection {
                label: format!("mem://{n}/a"),
                sender: a_tx,
                receiver: a_rx,
            },
            MemConnection {
                label: format!("mem://{n}/b"),
                sender: b_tx,
                receiver: b_rx,
            },
        )
    }
}

impl Connection for MemConnection {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn into_channel(self) -> ByteChannel {
        (self.sender, self.receiver)
    }
}

/// Shorthand for [`MemConnection::pair`].
pub fn pair() -> (MemConnection, MemConnection) {
    MemConnection::pair()
}
