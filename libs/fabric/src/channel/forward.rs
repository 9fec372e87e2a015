use tokio::task::JoinHandle;

use super::{refused, relay, Receiver, Sender};

/// Pipe every value of `receiver` into `sender`, carrying over opening,
/// closing and failure.
///
/// If `sender` stops accepting values the input is failed with the reason.
/// The returned handle resolves once the input is exhausted.
pub fn forward<T>(mut receiver: Receiver<T>, sender: Sender<T>) -> JoinHandle<()>
where
    T: Send + 'static,
{
    tokio::spawn(async move {
        receiver.opened().await;
        sender.open();
        while let Some(item) = receiver.recv().await {
            match item {
                Ok(value) => {
                    if let Err(err) = relay(&sender, value, receiver.is_done()) {
                        receiver.fail(refused(err));
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
    })
}
