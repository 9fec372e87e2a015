use std::fmt::Debug;

use tracing::trace as log;

use super::{channel, refused, relay, Receiver};

/// Pass every value through unchanged, logging open, values, close and
/// failure at trace level under `label`.
pub fn trace<T>(mut receiver: Receiver<T>, label: impl Into<String>) -> Receiver<T>
where
    T: Debug + Send + 'static,
{
    let label = label.into();
    let (sender, output) = channel();
    tokio::spawn(async move {
        receiver.opened().await;
        log!(channel = %label, "opened");
        sender.open();
        while let Some(item) = receiver.recv().await {
            match item {
                Ok(value) => {
                    log!(channel = %label, value = ?value, "value");
                    if let Err(err) = relay(&sender, value, receiver.is_done()) {
                        receiver.fail(refused(err));
                        return;
                    }
                }
                Err(err) => {
                    log!(channel = %label, error = %err, "failed");
                    sender.fail(err);
                    return;
                }
            }
        }
        log!(channel = %label, "closed");
        sender.close();
    });
    output
}
