use switchboard_core::StatusError;

use super::{channel, refused, relay, Receiver};

/// Transform every value of `receiver` into a new channel.
///
/// Opening, closing and failure carry over from the input. A value that is
/// the last one of a closed input is forwarded together with the close.
pub fn map<T, U, F>(receiver: Receiver<T>, mut transform: F) -> Receiver<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    try_map(receiver, move |value| {
        Ok::<_, StatusError>(transform(value))
    })
}

/// Like [`map`], but the transform may fail.
///
/// A failed transform fails both the output and the input channel with the
/// same error.
pub fn try_map<T, U, E, F>(mut receiver: Receiver<T>, mut transform: F) -> Receiver<U>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Into<StatusError> + Send + 'static,
    F: FnMut(T) -> Result<U, E> + Send + 'static,
{
    let (sender, output) = channel();
    tokio::spawn(async move {
        receiver.opened().await;
        sender.open();
        while let Some(item) = receiver.recv().await {
            let value = match item {
                Ok(value) => value,
                Err(err) => {
                    sender.fail(err);
                    return;
                }
            };
            match transform(value) {
                Ok(mapped) => {
                    if let Err(err) = relay(&sender, mapped, receiver.is_done()) {
                        receiver.fail(refused(err));
                        return;
                    }
                }
                Err(err) => {
                    let err = err.into();
                    receiver.fail(err.clone());
                    sender.fail(err);
                    return;
                }
            }
        }
        sender.close();
    });
    output
}
