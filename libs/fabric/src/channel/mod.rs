//! Buffered single-producer/single-consumer channels
//!
//! A channel is the data-flow primitive every other layer is built from. It
//! buffers without bound, can be closed (buffered items are still delivered)
//! or failed (buffered items are discarded and only the error is delivered),
//! and carries a separate "opened" signal so a consumer can wait for the
//! producer to commit to the channel before any data exists.
//!
//! Dropping the last sender closes the channel. Dropping the receiver fails
//! it, so further sends are refused.

use std::collections::VecDeque;
use std::fmt;
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_util::Stream;
use parking_lot::Mutex;
use switchboard_core::StatusError;

use crate::error::{Error, Result};

pub mod adapt;
pub mod filter;
pub mod forward;
pub mod map;
pub mod reorder;
pub mod take_one;
pub mod trace;

pub use self::adapt::{from_stream, promised_receiver};
pub use self::filter::filter;
pub use self::forward::forward;
pub use self::map::{map, try_map};
pub use self::reorder::reorder;
pub use self::take_one::take_one;
pub use self::trace::trace;

/// What a receive yields: a value, or the error the channel failed with.
pub type ChannelResult<T> = std::result::Result<T, StatusError>;

/// Two crossed channels: each side sends on one and receives on the other.
pub type BiChannel<A, B> = ((Sender<A>, Receiver<B>), (Sender<B>, Receiver<A>));

/// Create a channel, returning its sending and receiving ends.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buffer: VecDeque::new(),
            lifecycle: Lifecycle::Open,
            opened: false,
            open_waiters: Vec::new(),
            recv: RecvSlot::Idle,
            error_yielded: false,
        }),
        senders: AtomicUsize::new(1),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

/// Create two channels in a cross configuration.
///
/// The first pair sends `A` and receives `B`; the second pair sends `B` and
/// receives `A`.
pub fn bi_channel<A, B>() -> BiChannel<A, B> {
    let (left_tx, left_rx) = channel::<A>();
    let (right_tx, right_rx) = channel::<B>();
    ((left_tx, right_rx), (right_tx, left_rx))
}

enum Lifecycle {
    Open,
    Closed,
    Failed(StatusError),
}

// Receivers are not Clone and every receive takes `&mut self`, so at most one
// receive can be suspended at a time.
enum RecvSlot {
    Idle,
    Awaiting(Waker),
}

struct State<T> {
    buffer: VecDeque<T>,
    lifecycle: Lifecycle,
    opened: bool,
    open_waiters: Vec<Waker>,
    recv: RecvSlot,
    error_yielded: bool,
}

impl<T> State<T> {
    fn is_terminated(&self) -> bool {
        !matches!(self.lifecycle, Lifecycle::Open)
    }

    fn error(&self) -> Option<&StatusError> {
        match &self.lifecycle {
            Lifecycle::Failed(err) => Some(err),
            _ => None,
        }
    }

    fn closed_error(&self) -> Error {
        Error::ChannelClosed(self.error().cloned())
    }

    fn mark_opened(&mut self) -> Vec<Waker> {
        if self.opened {
            return Vec::new();
        }
        self.opened = true;
        std::mem::take(&mut self.open_waiters)
    }

    fn take_receiver(&mut self) -> Option<Waker> {
        match std::mem::replace(&mut self.recv, RecvSlot::Idle) {
            RecvSlot::Awaiting(waker) => Some(waker),
            RecvSlot::Idle => None,
        }
    }

    fn park(&mut self, waker: &Waker) {
        match &mut self.recv {
            RecvSlot::Awaiting(current) if current.will_wake(waker) => {}
            slot => *slot = RecvSlot::Awaiting(waker.clone()),
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    senders: AtomicUsize,
}

/// Wakers collected under the lock and run after it is released.
struct Wakeups {
    opened: Vec<Waker>,
    receiver: Option<Waker>,
}

impl Wakeups {
    fn run(self) {
        for waker in self.opened {
            waker.wake();
        }
        if let Some(waker) = self.receiver {
            waker.wake();
        }
    }
}

impl<T> Shared<T> {
    fn open(&self) {
        let opened = self.state.lock().mark_opened();
        Wakeups {
            opened,
            receiver: None,
        }
        .run();
    }

    fn push(&self, value: T, close: bool) -> Result<()> {
        let wakeups = {
            let mut state = self.state.lock();
            if state.is_terminated() {
                return Err(state.closed_error());
            }
            state.buffer.push_back(value);
            if close {
                state.lifecycle = Lifecycle::Closed;
            }
            Wakeups {
                opened: state.mark_opened(),
                receiver: state.take_receiver(),
            }
        };
        wakeups.run();
        Ok(())
    }

    fn terminate(&self, error: Option<StatusError>) {
        let wakeups = {
            let mut state = self.state.lock();
            if state.is_terminated() {
                return;
            }
            match error {
                Some(err) => {
                    state.buffer.clear();
                    state.lifecycle = Lifecycle::Failed(err);
                }
                None => state.lifecycle = Lifecycle::Closed,
            }
            Wakeups {
                opened: state.mark_opened(),
                receiver: state.take_receiver(),
            }
        };
        wakeups.run();
    }

    fn pending_len(&self) -> usize {
        self.state.lock().buffer.len()
    }
}

/// Sending end of a channel.
///
/// Cloning a sender does not create a new channel; all clones feed the same
/// buffer.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.terminate(None);
        }
    }
}

impl<T> Sender<T> {
    /// Open the channel without sending anything. Idempotent.
    pub fn open(&self) {
        self.shared.open();
    }

    /// Append a value, opening the channel if needed.
    ///
    /// Fails with [`Error::ChannelClosed`] once the channel was closed or
    /// failed.
    pub fn send(&self, value: T) -> Result<()> {
        self.shared.push(value, false)
    }

    /// Enqueue a final value and close in the same step.
    pub fn send_and_close(&self, value: T) -> Result<()> {
        self.shared.push(value, true)
    }

    /// Close the channel. Buffered values are still delivered. No-op once
    /// closed or failed.
    pub fn close(&self) {
        self.shared.terminate(None);
    }

    /// Fail the channel, discarding anything buffered. No-op once closed or
    /// failed.
    pub fn fail(&self, error: impl Into<StatusError>) {
        self.shared.terminate(Some(error.into()));
    }

    /// Number of values sent but not yet received.
    pub fn pending_len(&self) -> usize {
        self.shared.pending_len()
    }

    /// Whether the channel was closed or failed.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().is_terminated()
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Sender")
            .field("pending", &state.buffer.len())
            .field("closed", &state.is_terminated())
            .finish()
    }
}

/// Receiving end of a channel.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Resolves once the sender opened the channel (explicitly, or by
    /// sending, closing or failing).
    pub async fn opened(&self) {
        poll_fn(|cx| {
            let mut state = self.shared.state.lock();
            if state.opened {
                return Poll::Ready(());
            }
            if !state.open_waiters.iter().any(|w| w.will_wake(cx.waker())) {
                state.open_waiters.push(cx.waker().clone());
            }
            Poll::Pending
        })
        .await
    }

    /// Take a buffered value without waiting.
    ///
    /// Returns the stored error if the channel failed, and `None` when
    /// nothing is buffered. Mixing this with a running consumer lets it steal
    /// values from that consumer.
    pub fn try_recv_now(&self) -> Option<ChannelResult<T>> {
        let mut state = self.shared.state.lock();
        if let Some(value) = state.buffer.pop_front() {
            return Some(Ok(value));
        }
        state.error().cloned().map(Err)
    }

    /// Receive the next value.
    ///
    /// Values come out in send order. Once the buffer is drained a failed
    /// channel yields its error once; after that, and for a closed channel,
    /// `None` is returned.
    pub async fn recv(&mut self) -> Option<ChannelResult<T>> {
        poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Wait for the first buffered value and return a copy of it without
    /// removing it. `None` means the channel closed without any value.
    pub async fn peek_first(&mut self) -> Option<ChannelResult<T>>
    where
        T: Clone,
    {
        poll_fn(|cx| {
            let mut state = self.shared.state.lock();
            if let Some(value) = state.buffer.front() {
                let value = value.clone();
                state.recv = RecvSlot::Idle;
                return Poll::Ready(Some(Ok(value)));
            }
            match &state.lifecycle {
                Lifecycle::Failed(err) => {
                    let err = err.clone();
                    state.recv = RecvSlot::Idle;
                    Poll::Ready(Some(Err(err)))
                }
                Lifecycle::Closed => {
                    state.recv = RecvSlot::Idle;
                    Poll::Ready(None)
                }
                Lifecycle::Open => {
                    state.park(cx.waker());
                    Poll::Pending
                }
            }
        })
        .await
    }

    /// Whether everything was received and the channel closed without error.
    ///
    /// Checked right after a receive, this tells whether that value was the
    /// last one.
    pub fn is_done(&self) -> bool {
        let state = self.shared.state.lock();
        state.buffer.is_empty() && matches!(state.lifecycle, Lifecycle::Closed)
    }

    /// Whether the sender closed or failed the channel. Values may still be
    /// buffered.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().is_terminated()
    }

    /// Number of buffered values.
    pub fn pending_len(&self) -> usize {
        self.shared.pending_len()
    }

    /// Fail the channel from the receiving side.
    pub fn fail(&self, error: impl Into<StatusError>) {
        self.shared.terminate(Some(error.into()));
    }

    /// Wrap any fallible stream into a channel receiver.
    pub fn from_stream<E, S>(stream: S) -> Self
    where
        T: Send + 'static,
        E: Into<StatusError> + Send + 'static,
        S: Stream<Item = std::result::Result<T, E>> + Send + 'static,
    {
        from_stream(stream)
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<ChannelResult<T>>> {
        let mut state = self.shared.state.lock();
        if let Some(value) = state.buffer.pop_front() {
            state.recv = RecvSlot::Idle;
            return Poll::Ready(Some(Ok(value)));
        }
        match &state.lifecycle {
            Lifecycle::Failed(err) => {
                let err = err.clone();
                state.recv = RecvSlot::Idle;
                if state.error_yielded {
                    Poll::Ready(None)
                } else {
                    state.error_yielded = true;
                    Poll::Ready(Some(Err(err)))
                }
            }
            Lifecycle::Closed => {
                state.recv = RecvSlot::Idle;
                Poll::Ready(None)
            }
            Lifecycle::Open => {
                state.park(cx.waker());
                Poll::Pending
            }
        }
    }
}

impl<T> Stream for Receiver<T> {
    type Item = ChannelResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_recv(cx)
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared
            .terminate(Some(StatusError::cancelled("receiver dropped")));
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Receiver")
            .field("pending", &state.buffer.len())
            .field("opened", &state.opened)
            .field("closed", &state.is_terminated())
            .finish()
    }
}

/// Send `value`, closing in the same step when nothing follows it upstream.
pub(crate) fn relay<T>(sender: &Sender<T>, value: T, last: bool) -> Result<()> {
    if last {
        sender.send_and_close(value)
    } else {
        sender.send(value)
    }
}

/// Error to fail an upstream channel with after a downstream send was refused.
pub(crate) fn refused(err: Error) -> StatusError {
    match err {
        Error::ChannelClosed(Some(cause)) => cause,
        _ => StatusError::cancelled("downstream channel closed"),
    }
}
