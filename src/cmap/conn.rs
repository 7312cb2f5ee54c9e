pub(crate) mod command;
pub(crate) mod wire;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use self::{
    command::CommandContext,
    wire::{Message, RawChannel},
};
use crate::{
    client::WeakClient,
    error::Error,
    hello::HelloReply,
    options::ServerAddress,
    runtime,
};

static CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

fn next_connection_id() -> u32 {
    CONNECTION_ID.fetch_add(1, Ordering::SeqCst)
}

/// A single established transport to one server, along with the state the
/// routing and retry machinery needs: the latest handshake reply, the ordered
/// queue of commands awaiting replies, and whether the transport has closed.
///
/// The identity of a `Connection` is its `id`; a host that reconnects yields a
/// new `Connection` with a new id.
#[derive(Debug)]
pub(crate) struct Connection {
    id: u32,
    address: ServerAddress,
    hello_reply: Option<HelloReply>,
    readable_secondary: bool,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    closed: Arc<AtomicBool>,
    in_flight: Arc<Mutex<VecDeque<CommandContext>>>,
}

impl Connection {
    /// Wraps an open transport. Spawns the reply reader, which owns the inbound
    /// side of the channel for the life of the transport.
    pub(crate) fn new(address: ServerAddress, channel: RawChannel, client: WeakClient) -> Self {
        let id = next_connection_id();
        let closed = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(Mutex::new(VecDeque::new()));

        let reader = ReplyReader {
            id,
            address: address.clone(),
            inbound: channel.inbound,
            closed: closed.clone(),
            in_flight: in_flight.clone(),
            client,
        };
        runtime::execute(reader.run());

        Self {
            id,
            address,
            hello_reply: None,
            readable_secondary: false,
            outbound: Some(channel.outbound),
            closed,
            in_flight,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_mocked(
        address: ServerAddress,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Message>,
        mpsc::UnboundedSender<crate::error::Result<Message>>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let channel = RawChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        };
        let connection = Self::new(address, channel, WeakClient::dead());
        (connection, outbound_rx, inbound_tx)
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn hello_reply(&self) -> Option<&HelloReply> {
        self.hello_reply.as_ref()
    }

    pub(crate) fn set_hello_reply(&mut self, reply: HelloReply) {
        self.hello_reply = Some(reply);
    }

    pub(crate) fn readable_secondary(&self) -> bool {
        self.readable_secondary
    }

    pub(crate) fn set_readable_secondary(&mut self, value: bool) {
        self.readable_secondary = value;
    }

    #[cfg(test)]
    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Queues `context` and writes it to the transport.
    ///
    /// The context is appended to the in-flight queue before the write so the
    /// reply reader can never observe a reply with nothing queued. If the write
    /// fails and the close funnel has not already claimed the context, its slot is
    /// failed here; claiming is keyed by request id so the context is never failed
    /// and retried both.
    pub(crate) fn send_context(&self, mut context: CommandContext) {
        debug_assert!(!context.is_sent(), "context is already in flight");

        let outbound = match self.outbound {
            Some(ref outbound) => outbound,
            None => {
                context.complete(Err(self.closed_error()));
                return;
            }
        };

        let message = Message::with_command(&context.command, context.request_id);
        let request_id = context.request_id;
        context.mark_sent();
        self.in_flight.lock().unwrap().push_back(context);

        if outbound.send(message).is_err() {
            let reclaimed = {
                let mut queue = self.in_flight.lock().unwrap();
                queue
                    .iter()
                    .position(|queued| queued.request_id == request_id)
                    .and_then(|index| queue.remove(index))
            };
            if let Some(context) = reclaimed {
                context.complete(Err(self.closed_error()));
            }
        }
    }

    /// Takes ownership of every queued command, leaving the queue empty.
    pub(crate) fn take_in_flight(&self) -> Vec<CommandContext> {
        self.in_flight.lock().unwrap().drain(..).collect()
    }

    /// Closes the outbound side of the transport, which cascades to the reply
    /// reader once the remote end hangs up.
    pub(crate) fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.outbound.take();
    }

    fn closed_error(&self) -> Error {
        Error::connection_closed(format!(
            "connection {} to {} closed before the command could be written",
            self.id, self.address
        ))
    }
}

/// The background half of a [`Connection`]: consumes the inbound side of the
/// transport, pairing each reply with the head of the in-flight queue.
///
/// Holds only a weak handle to the client so that an outstanding transport does
/// not keep a dropped client alive; if the client is gone when the transport
/// closes, the close is handled locally by failing whatever is still queued.
struct ReplyReader {
    id: u32,
    address: ServerAddress,
    inbound: mpsc::UnboundedReceiver<crate::error::Result<Message>>,
    closed: Arc<AtomicBool>,
    in_flight: Arc<Mutex<VecDeque<CommandContext>>>,
    client: WeakClient,
}

impl ReplyReader {
    async fn run(mut self) {
        let error = loop {
            match self.inbound.recv().await {
                Some(Ok(message)) => {
                    let context = self.in_flight.lock().unwrap().pop_front();
                    match context {
                        Some(context) => {
                            if message.response_to != context.request_id {
                                warn!(
                                    connection_id = self.id,
                                    address = %self.address,
                                    expected = context.request_id,
                                    actual = message.response_to,
                                    "out-of-order reply"
                                );
                            }
                            context.complete(Ok(message.into_reply()));
                        }
                        None => warn!(
                            connection_id = self.id,
                            address = %self.address,
                            "received a reply with no command in flight"
                        ),
                    }
                }
                Some(Err(error)) if !error.is_network_error() => {
                    // A reply that failed to decode still consumes its queue slot.
                    if let Some(context) = self.in_flight.lock().unwrap().pop_front() {
                        context.complete(Err(error));
                    }
                }
                Some(Err(error)) => break error,
                None => {
                    break Error::connection_closed(format!(
                        "connection {} to {} closed by the server",
                        self.id, self.address
                    ))
                }
            }
        };

        self.closed.store(true, Ordering::SeqCst);
        debug!(connection_id = self.id, address = %self.address, "transport closed");

        let drained: Vec<CommandContext> = self.in_flight.lock().unwrap().drain(..).collect();
        let (retryable, non_retryable): (Vec<_>, Vec<_>) =
            drained.into_iter().partition(|context| context.retryable);

        // Non-retryable commands fail with the transport error before anything
        // else: the discovery sweep kicked off below may itself be awaiting one of
        // these slots (heartbeats are non-retryable).
        for context in non_retryable {
            context.complete(Err(error.clone()));
        }

        match self.client.upgrade() {
            Some(client) => {
                client
                    .handle_connection_closed(self.id, self.address, retryable, error)
                    .await
            }
            None => {
                for context in retryable {
                    context.complete(Err(error.clone()));
                }
            }
        }
    }
}
