use switchboard_core::StatusError;

use super::{ChannelResult, Receiver};

/// Wait for the first value of a channel.
///
/// A channel that closes empty resolves to an `Internal` error; a failed one
/// resolves to its failure.
pub async fn take_one<T>(mut receiver: Receiver<T>) -> ChannelResult<T> {
    match receiver.recv().await {
        Some(result) => result,
        None => Err(StatusError::internal(
            "channel closed before a value was received",
        )),
    }
}
