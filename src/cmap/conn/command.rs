use std::sync::atomic::{AtomicI32, Ordering};

use bson::Document;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::Result;

static REQUEST_ID: AtomicI32 = AtomicI32::new(0);

/// Returns a monotonically increasing id for use in wire messages.
pub(crate) fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// A database command.
#[derive(Clone, Debug)]
pub struct Command {
    /// The name of the command.
    pub name: String,

    /// The database the command targets.
    pub target_db: String,

    /// The command body.
    pub body: Document,
}

impl Command {
    /// Constructs a new command.
    pub fn new(name: impl ToString, target_db: impl ToString, body: Document) -> Self {
        Self {
            name: name.to_string(),
            target_db: target_db.to_string(),
            body,
        }
    }
}

/// A reply received from a server.
#[derive(Clone, Debug)]
pub(crate) struct ServerReply {
    pub(crate) body: Document,
}

/// A command with its completion slot, as tracked in a connection's in-flight
/// queue between write and reply.
#[derive(Debug)]
pub(crate) struct CommandContext {
    pub(crate) command: Command,
    pub(crate) request_id: i32,
    pub(crate) retryable: bool,
    pub(crate) session_id: Option<Uuid>,
    sent: bool,
    completion: oneshot::Sender<Result<ServerReply>>,
}

impl CommandContext {
    /// Creates a context for `command` along with the receiving half of its
    /// completion slot.
    pub(crate) fn new(
        command: Command,
        retryable: bool,
        session_id: Option<Uuid>,
    ) -> (Self, oneshot::Receiver<Result<ServerReply>>) {
        let (completion, receiver) = oneshot::channel();
        let context = Self {
            command,
            request_id: next_request_id(),
            retryable,
            session_id,
            sent: false,
            completion,
        };
        (context, receiver)
    }

    /// Delivers the final outcome of this command. Consuming `self` guarantees the
    /// slot fires at most once; the send result is ignored because the caller may
    /// have stopped waiting.
    pub(crate) fn complete(self, result: Result<ServerReply>) {
        let _ = self.completion.send(result);
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }

    pub(crate) fn mark_unsent(&mut self) {
        self.sent = false;
    }

    pub(crate) fn is_sent(&self) -> bool {
        self.sent
    }
}
