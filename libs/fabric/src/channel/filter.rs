use super::{channel, refused, relay, Receiver};

/// Keep only the values for which `predicate` returns true.
pub fn filter<T, F>(mut receiver: Receiver<T>, mut predicate: F) -> Receiver<T>
where
    T: Send + 'static,
    F: FnMut(&T) -> bool + Send + 'static,
{
    let (sender, output) = channel();
    tokio::spawn(async move {
        receiver.opened().await;
        sender.open();
        while let Some(item) = receiver.recv().await {
            match item {
                Ok(value) if predicate(&value) => {
                    if let Err(err) = relay(&sender, value, receiver.is_done()) {
                        receiver.fail(refused(err));
                        return;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    sender.fail(err);
                    return;
                }
            }
        }
        sender.close();
    });
    output
}
