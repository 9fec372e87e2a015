use std::future::Future;

use futures_util::{pin_mut, Stream, StreamExt};
use switchboard_core::StatusError;

use super::{channel, forward, Receiver};

/// A receiver available right away for a channel that only exists once
/// `future` resolves. A failed future fails the receiver.
pub fn promised_receiver<T, E, F>(future: F) -> Receiver<T>
where
    T: Send + 'static,
    E: Into<StatusError> + Send + 'static,
    F: Future<Output = Result<Receiver<T>, E>> + Send + 'static,
{
    let (sender, receiver) = channel();
    tokio::spawn(async move {
        match future.await {
            Ok(promised) => {
                let _ = forward(promised, sender).await;
            }
            Err(err) => sender.fail(err),
        }
    });
    receiver
}

/// Drain a fallible stream into a channel. The channel opens immediately and
/// closes when the stream ends; a stream error fails it.
pub fn from_stream<T, E, S>(stream: S) -> Receiver<T>
where
    T: Send + 'static,
    E: Into<StatusError> + Send + 'static,
    S: Stream<Item = Result<T, E>> + Send + 'static,
{
    let (sender, receiver) = channel();
    tokio::spawn(async move {
        pin_mut!(stream);
        sender.open();
        while let Some(item) = stream.next().await {
            match item {
                Ok(value) => {
                    if sender.send(value).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    sender.fail(err);
                    return;
                }
            }
        }
        sender.close();
    });
    receiver
}
