use std::collections::HashMap;

use switchboard_core::StatusError;
use tracing::trace;

use super::{channel, Receiver};

/// Restore the order of keyed packets.
///
/// Keys count up from 0. `key` extracts a packet's position and `is_final`
/// marks the packet that ends the sequence; its key is the last one the
/// output waits for. Duplicates of already delivered keys are dropped.
///
/// The output closes once the final packet and everything before it went
/// out. If the input ends while packets are still held back the output fails
/// with `DataLoss`.
pub fn reorder<T, K, F>(mut receiver: Receiver<T>, key: K, is_final: F) -> Receiver<T>
where
    T: Send + 'static,
    K: Fn(&T) -> u64 + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    let (sender, output) = channel();
    tokio::spawn(async move {
        let mut held: HashMap<u64, T> = HashMap::new();
        let mut next_key = 0u64;
        let mut final_key: Option<u64> = None;

        receiver.opened().await;
        sender.open();
        while let Some(item) = receiver.recv().await {
            let packet = match item {
                Ok(packet) => packet,
                Err(err) => {
                    sender.fail(err);
                    return;
                }
            };
            let packet_key = key(&packet);
            if final_key.is_none() && is_final(&packet) {
                final_key = Some(packet_key);
            }
            if packet_key < next_key {
                trace!(key = packet_key, "dropping duplicate packet");
                continue;
            }
            held.insert(packet_key, packet);

            while let Some(packet) = held.remove(&next_key) {
                next_key += 1;
                if sender.send(packet).is_err() {
                    return;
                }
            }
            if let Some(last) = final_key {
                if next_key > last && held.is_empty() {
                    sender.close();
                    return;
                }
            }
        }

        if held.is_empty() {
            sender.close();
        } else {
            sender.fail(StatusError::data_loss(format!(
                "input closed while waiting for packet {next_key}, {} packets held back",
                held.len()
            )));
        }
    });
    output
}
