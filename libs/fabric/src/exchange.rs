//! One bidirectional conversation multiplexed on a session
//!
//! An exchange owns two byte channels facing the application: an inbound one
//! fed from wire frames and an outbound one drained into wire frames. The
//! first outbound frame carries the exchange type (and auth token) so the
//! peer can route it. The exchange completes once both directions finished,
//! or as soon as it failed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use switchboard_core::StatusError;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::channel::{bi_channel, ChannelResult, Receiver, Sender};
use crate::transport::{MsgHeader, TransportMessage};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// The application side of an exchange.
pub struct ExchangeChannel {
    /// Payloads for the peer.
    pub sender: Sender<Vec<u8>>,
    /// Payloads from the peer.
    pub receiver: Receiver<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    Open,
    Closed,
    Failed(StatusError),
}

type CompletionHook = Box<dyn FnOnce(&ChannelResult<()>) + Send>;

struct Progress {
    state: ExchangeState,
    inbound_done: bool,
    outbound_done: bool,
    /// Whether the next outbound frame must carry type and auth.
    announce: bool,
    notify_peer: bool,
    failure_sent: bool,
    completion: Option<ChannelResult<()>>,
    hooks: Vec<CompletionHook>,
}

struct Inner {
    id: u64,
    serial: u64,
    exchange_type: String,
    auth: Option<String>,
    wire: Sender<TransportMessage>,
    inbound: Sender<Vec<u8>>,
    outbound: Sender<Vec<u8>>,
    channel: Mutex<Option<ExchangeChannel>>,
    /// Outbound side until the loop draining it is started.
    unstarted: Mutex<Option<Receiver<Vec<u8>>>>,
    progress: Mutex<Progress>,
    completed: watch::Sender<Option<ChannelResult<()>>>,
}

/// Handle to an exchange. Clones refer to the same exchange.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<Inner>,
}

impl Exchange {
    /// Create the receiving side of an exchange from its opening frame.
    pub fn inbound(message: TransportMessage, wire: Sender<TransportMessage>) -> Self {
        let header = &message.header;
        let exchange = Self::create(
            header.exchange_id,
            header.exchange_type.clone().unwrap_or_default(),
            header.auth.clone(),
            wire,
            false,
        );
        exchange.start();
        exchange.process_wire_message(message);
        exchange
    }

    /// Create the opening side of an exchange.
    ///
    /// With an `initial` payload the outbound direction is sent as a single
    /// final frame and the application sender is already closed.
    pub fn outbound(
        id: u64,
        exchange_type: impl Into<String>,
        auth: Option<String>,
        wire: Sender<TransportMessage>,
        initial: Option<Vec<u8>>,
    ) -> Self {
        let exchange = Self::prepare_outbound(id, exchange_type, auth, wire, initial);
        exchange.start();
        exchange
    }

    /// Like [`Exchange::outbound`], but no frame is written before
    /// [`Exchange::start`], so the caller can make the exchange routable
    /// first.
    pub(crate) fn prepare_outbound(
        id: u64,
        exchange_type: impl Into<String>,
        auth: Option<String>,
        wire: Sender<TransportMessage>,
        initial: Option<Vec<u8>>,
    ) -> Self {
        let exchange = Self::create(id, exchange_type.into(), auth, wire, true);
        if let Some(payload) = initial {
            let _ = exchange.inner.outbound.send_and_close(payload);
        }
        exchange
    }

    /// Start writing outbound frames. Only the first call has an effect.
    pub(crate) fn start(&self) {
        if let Some(outbound) = self.inner.unstarted.lock().take() {
            tokio::spawn(outbound_loop(self.inner.clone(), outbound));
        }
    }

    fn create(
        id: u64,
        exchange_type: String,
        auth: Option<String>,
        wire: Sender<TransportMessage>,
        announce: bool,
    ) -> Self {
        let ((app_tx, app_rx), (inbound, outbound_rx)) = bi_channel::<Vec<u8>, Vec<u8>>();
        let (completed, _) = watch::channel(None);
        let inner = Arc::new(Inner {
            id,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            exchange_type,
            auth,
            wire,
            inbound,
            outbound: app_tx.clone(),
            channel: Mutex::new(Some(ExchangeChannel {
                sender: app_tx,
                receiver: app_rx,
            })),
            unstarted: Mutex::new(Some(outbound_rx)),
            progress: Mutex::new(Progress {
                state: ExchangeState::Open,
                inbound_done: false,
                outbound_done: false,
                announce,
                notify_peer: true,
                failure_sent: false,
                completion: None,
                hooks: Vec::new(),
            }),
            completed,
        });
        Exchange { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Method name this exchange was opened for.
    pub fn exchange_type(&self) -> &str {
        &self.inner.exchange_type
    }

    /// Credential announced when the exchange was opened.
    pub fn auth(&self) -> Option<&str> {
        self.inner.auth.as_deref()
    }

    /// Hand out the application channels. Only the first call gets them.
    pub fn take_channel(&self) -> Option<ExchangeChannel> {
        self.inner.channel.lock().take()
    }

    pub fn state(&self) -> ExchangeState {
        self.inner.progress.lock().state.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.progress.lock().completion.is_some()
    }

    /// Wait until the exchange completed, returning its outcome.
    pub async fn completed(&self) -> ChannelResult<()> {
        let mut rx = self.inner.completed.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(StatusError::cancelled("exchange dropped"));
            }
        }
    }

    /// Run `hook` once the exchange completes, or right away if it already
    /// has.
    pub fn on_complete(&self, hook: impl FnOnce(&ChannelResult<()>) + Send + 'static) {
        let result = {
            let mut progress = self.inner.progress.lock();
            match progress.completion.clone() {
                Some(result) => result,
                None => {
                    progress.hooks.push(Box::new(hook));
                    return;
                }
            }
        };
        hook(&result);
    }

    /// Feed one frame received for this exchange.
    pub fn process_wire_message(&self, message: TransportMessage) {
        if let Some(err) = message.error_status() {
            debug!(exchange_id = self.inner.id, error = %err, "peer failed exchange");
            self.abort(err);
            return;
        }
        if self.inner.progress.lock().inbound_done {
            trace!(exchange_id = self.inner.id, "ignoring frame after inbound side finished");
            return;
        }

        let inbound = &self.inner.inbound;
        match (message.payload, message.header.exchange_continues) {
            (Some(payload), false) => {
                let _ = inbound.send_and_close(payload);
                self.inner.finish_inbound();
            }
            (Some(payload), true) => {
                let _ = inbound.send(payload);
            }
            (None, false) => {
                inbound.close();
                self.inner.finish_inbound();
            }
            (None, true) => inbound.open(),
        }
    }

    /// End the exchange locally.
    ///
    /// Without an error both directions close gracefully and the outbound
    /// side still sends its final frame. With an error both application
    /// channels fail and the peer receives an error frame.
    pub fn close(&self, error: Option<StatusError>) {
        self.terminate(error, true);
    }

    /// Fail the exchange without telling the peer, used when the peer or
    /// the whole session is already gone.
    pub(crate) fn abort(&self, error: StatusError) {
        self.terminate(Some(error), false);
    }

    pub(crate) fn serial(&self) -> u64 {
        self.inner.serial
    }

    fn terminate(&self, error: Option<StatusError>, notify_peer: bool) {
        {
            let mut progress = self.inner.progress.lock();
            if progress.state != ExchangeState::Open || progress.completion.is_some() {
                return;
            }
            progress.notify_peer = notify_peer;
            progress.inbound_done = true;
            progress.state = match &error {
                Some(err) => ExchangeState::Failed(err.clone()),
                None => ExchangeState::Closed,
            };
        }
        match error {
            Some(err) => {
                self.inner.inbound.fail(err.clone());
                self.inner.outbound.fail(err);
                self.inner.flush_failure();
            }
            None => {
                self.inner.inbound.close();
                self.inner.outbound.close();
            }
        }
        self.inner.maybe_complete();
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.inner.id)
            .field("type", &self.inner.exchange_type)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn frame(&self, payload: Option<Vec<u8>>, continues: bool) -> TransportMessage {
        let announce = std::mem::take(&mut self.progress.lock().announce);
        let header = MsgHeader {
            exchange_id: self.id,
            exchange_continues: continues,
            exchange_type: announce.then(|| self.exchange_type.clone()),
            auth: if announce { self.auth.clone() } else { None },
            ..Default::default()
        };
        TransportMessage::new(header, payload)
    }

    fn send_wire(&self, message: TransportMessage) {
        if let Err(err) = self.wire.send(message) {
            trace!(exchange_id = self.id, error = %err, "dropping frame, session wire closed");
        }
    }

    fn fail_from_outbound(&self, err: StatusError) {
        {
            let mut progress = self.progress.lock();
            if progress.state == ExchangeState::Open {
                progress.state = ExchangeState::Failed(err.clone());
            }
            progress.inbound_done = true;
        }
        self.inbound.fail(err);
    }

    fn finish_inbound(&self) {
        self.progress.lock().inbound_done = true;
        self.maybe_complete();
    }

    fn finish_outbound(&self) {
        self.progress.lock().outbound_done = true;
        self.flush_failure();
        self.maybe_complete();
    }

    /// Send the error frame once the outbound loop stopped, unless the peer
    /// never learned about the exchange or must not be told.
    fn flush_failure(&self) {
        let err = {
            let mut progress = self.progress.lock();
            let ready = progress.notify_peer
                && progress.outbound_done
                && !progress.announce
                && !progress.failure_sent;
            match &progress.state {
                ExchangeState::Failed(err) if ready => {
                    let err = err.clone();
                    progress.failure_sent = true;
                    err
                }
                _ => return,
            }
        };
        self.send_wire(TransportMessage::error(self.id, &err));
    }

    fn maybe_complete(&self) {
        let (result, hooks) = {
            let mut progress = self.progress.lock();
            if progress.completion.is_some() || !(progress.inbound_done && progress.outbound_done)
            {
                return;
            }
            if progress.state == ExchangeState::Open {
                progress.state = ExchangeState::Closed;
            }
            let result = match &progress.state {
                ExchangeState::Failed(err) => Err(err.clone()),
                _ => Ok(()),
            };
            progress.completion = Some(result.clone());
            (result, std::mem::take(&mut progress.hooks))
        };
        trace!(exchange_id = self.id, ok = result.is_ok(), "exchange complete");
        for hook in hooks {
            hook(&result);
        }
        self.completed.send_replace(Some(result));
    }
}

async fn outbound_loop(inner: Arc<Inner>, mut outbound: Receiver<Vec<u8>>) {
    outbound.opened().await;
    if outbound.pending_len() == 0 && !outbound.is_closed() {
        inner.send_wire(inner.frame(None, true));
    }
    loop {
        match outbound.recv().await {
            Some(Ok(payload)) => {
                let last = outbound.is_done();
                inner.send_wire(inner.frame(Some(payload), !last));
                if last {
                    break;
                }
            }
            Some(Err(err)) => {
                inner.fail_from_outbound(err);
                break;
            }
            None => {
                inner.send_wire(inner.frame(None, false));
                break;
            }
        }
    }
    inner.finish_outbound();
}
