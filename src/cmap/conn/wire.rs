use bson::Document;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, sync::mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::warn;

use super::command::{Command, ServerReply};
use crate::{
    error::{ErrorKind, Result},
    runtime::{self, stream::AsyncStream},
};

/// A wire protocol message: one length-delimited frame carrying a single
/// document.
///
/// Within one connection, messages are answered in the order they were written,
/// with each reply's `response_to` naming the request it answers.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Message {
    pub(crate) request_id: i32,
    pub(crate) response_to: i32,
    pub(crate) body: Document,
}

impl Message {
    /// Creates a `Message` from a given `Command`.
    pub(crate) fn with_command(command: &Command, request_id: i32) -> Self {
        let mut body = command.body.clone();
        body.insert("$db", command.target_db.clone());

        Self {
            request_id,
            response_to: 0,
            body,
        }
    }

    pub(crate) fn into_reply(self) -> ServerReply {
        ServerReply { body: self.body }
    }
}

/// The two directions of an open transport, as handed to a [`Connection`].
///
/// Whatever sits on the other side (the TCP message pump below, or a scripted
/// server in tests) must answer messages in write order and drop `inbound` when
/// the transport closes.
///
/// [`Connection`]: super::Connection
#[derive(Debug)]
pub(crate) struct RawChannel {
    pub(crate) outbound: mpsc::UnboundedSender<Message>,
    pub(crate) inbound: mpsc::UnboundedReceiver<Result<Message>>,
}

/// Bridges an [`AsyncStream`] to a [`RawChannel`] with a pair of codec tasks.
///
/// The writer task ends when the outbound sender is dropped and shuts the socket
/// down; the reader task forwards frames (and the terminal transport error) until
/// EOF and then closes the inbound side.
pub(crate) fn spawn_message_pump(stream: AsyncStream) -> RawChannel {
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Result<Message>>();

    let mut framed_write = FramedWrite::new(write_half, LengthDelimitedCodec::new());
    runtime::execute(async move {
        while let Some(message) = outbound_rx.recv().await {
            let bytes = match bson::to_vec(&message) {
                Ok(bytes) => bytes,
                Err(error) => {
                    warn!(%error, "failed to encode outgoing message");
                    break;
                }
            };
            if framed_write.send(Bytes::from(bytes)).await.is_err() {
                break;
            }
        }
        let _ = framed_write.into_inner().shutdown().await;
    });

    let mut framed_read = FramedRead::new(read_half, LengthDelimitedCodec::new());
    runtime::execute(async move {
        loop {
            match framed_read.next().await {
                Some(Ok(frame)) => {
                    let parsed = bson::from_slice::<Message>(&frame).map_err(|e| {
                        ErrorKind::InvalidResponse {
                            message: format!("invalid message frame: {}", e),
                        }
                        .into()
                    });
                    if inbound_tx.send(parsed).is_err() {
                        break;
                    }
                }
                Some(Err(error)) => {
                    let _ = inbound_tx.send(Err(error.into()));
                    break;
                }
                None => break,
            }
        }
    });

    RawChannel {
        outbound: outbound_tx,
        inbound: inbound_rx,
    }
}

#[cfg(test)]
mod test {
    use bson::doc;

    use super::Message;
    use crate::cmap::conn::command::Command;

    #[test]
    fn with_command_attaches_target_db() {
        let command = Command::new("listIndexes", "inventory", doc! { "listIndexes": "widgets" });
        let message = Message::with_command(&command, 42);

        assert_eq!(message.request_id, 42);
        assert_eq!(message.response_to, 0);
        assert_eq!(message.body.get_str("$db").unwrap(), "inventory");
        assert_eq!(message.body.get_str("listIndexes").unwrap(), "widgets");
    }

    #[test]
    fn messages_round_trip_through_bson_frames() {
        let command = Command::new("ping", "admin", doc! { "ping": 1 });
        let message = Message::with_command(&command, 7);

        let bytes = bson::to_vec(&message).unwrap();
        let decoded: Message = bson::from_slice(&bytes).unwrap();

        assert_eq!(decoded.request_id, 7);
        assert_eq!(decoded.body.get_str("$db").unwrap(), "admin");
    }
}
