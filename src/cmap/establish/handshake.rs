use crate::{
    client::options::Credential,
    cmap::{conn::command::CommandContext, Connection},
    error::{Error, Result},
    hello::{hello_command, ClientMetadata, HelloReply},
};

/// Contains the logic needed to handshake a connection.
#[derive(Clone, Debug)]
pub(crate) struct Handshaker {
    /// Metadata describing the client, sent on initial handshakes only.
    metadata: ClientMetadata,

    credential: Option<Credential>,
}

pub(crate) struct HandshakerOptions {
    pub(crate) app_name: Option<String>,
    pub(crate) credential: Option<Credential>,
}

impl Handshaker {
    /// Creates a new Handshaker.
    pub(crate) fn new(options: HandshakerOptions) -> Self {
        Self {
            metadata: ClientMetadata::new(options.app_name),
            credential: options.credential,
        }
    }

    /// Runs a `hello` exchange on the connection and interprets the reply.
    ///
    /// `initial` selects the full handshake with client metadata; monitoring
    /// re-handshakes pass `false` and send the bare command. The command is not
    /// retryable: if the transport dies mid-exchange the failure belongs to this
    /// connection, not to a replacement.
    pub(crate) async fn handshake(&self, connection: &Connection, initial: bool) -> Result<HelloReply> {
        let command = hello_command(
            initial.then_some(&self.metadata),
            self.credential.as_ref(),
        );
        let (context, receiver) = CommandContext::new(command, false, None);
        connection.send_context(context);

        let reply = match receiver.await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                return Err(Error::handshake(format!(
                    "handshake with {} failed",
                    connection.address()
                ))
                .with_source(error))
            }
            Err(_) => {
                return Err(Error::handshake(format!(
                    "no handshake reply received from {}",
                    connection.address()
                )))
            }
        };

        HelloReply::parse(connection.address().clone(), reply.body)
    }
}

#[cfg(test)]
mod test {
    use bson::doc;

    use super::{Handshaker, HandshakerOptions};
    use crate::{
        cmap::{conn::wire::Message, Connection},
        options::ServerAddress,
    };

    #[tokio::test]
    async fn initial_handshake_sends_metadata_and_parses_reply() {
        let address = ServerAddress::parse("db1:29017").unwrap();
        let (connection, mut requests, replies) = Connection::new_mocked(address);
        let handshaker = Handshaker::new(HandshakerOptions {
            app_name: Some("handshake-test".to_string()),
            credential: None,
        });

        let handshake = handshaker.handshake(&connection, true);
        let respond = async {
            let request = requests.recv().await.unwrap();
            assert!(request.body.contains_key("client"));
            replies
                .send(Ok(Message {
                    request_id: 0,
                    response_to: request.request_id,
                    body: doc! {
                        "ok": 1,
                        "ismaster": true,
                        "hosts": ["db1:29017"],
                    },
                }))
                .unwrap();
        };

        let (reply, ()) = futures::join!(handshake, respond);
        let reply = reply.unwrap();
        assert!(reply.command_response.is_master);
        assert_eq!(reply.command_response.hosts, vec!["db1:29017"]);
    }

    #[tokio::test]
    async fn monitoring_handshake_omits_metadata() {
        let address = ServerAddress::parse("db1:29017").unwrap();
        let (connection, mut requests, replies) = Connection::new_mocked(address);
        let handshaker = Handshaker::new(HandshakerOptions {
            app_name: Some("handshake-test".to_string()),
            credential: None,
        });

        let handshake = handshaker.handshake(&connection, false);
        let respond = async {
            let request = requests.recv().await.unwrap();
            assert!(!request.body.contains_key("client"));
            replies
                .send(Ok(Message {
                    request_id: 0,
                    response_to: request.request_id,
                    body: doc! { "ok": 1, "ismaster": false, "readOnly": true },
                }))
                .unwrap();
        };

        let (reply, ()) = futures::join!(handshake, respond);
        let reply = reply.unwrap();
        assert!(!reply.command_response.is_master);
        assert!(reply.command_response.read_only);
    }

    #[tokio::test]
    async fn malformed_reply_is_a_handshake_error() {
        let address = ServerAddress::parse("db1:29017").unwrap();
        let (connection, mut requests, replies) = Connection::new_mocked(address);
        let handshaker = Handshaker::new(HandshakerOptions {
            app_name: None,
            credential: None,
        });

        let handshake = handshaker.handshake(&connection, true);
        let respond = async {
            let request = requests.recv().await.unwrap();
            replies
                .send(Ok(Message {
                    request_id: 0,
                    response_to: request.request_id,
                    // `hosts` should be an array of strings
                    body: doc! { "ok": 1, "hosts": 17 },
                }))
                .unwrap();
        };

        let (reply, ()) = futures::join!(handshake, respond);
        assert!(matches!(
            reply.unwrap_err().kind.as_ref(),
            crate::error::ErrorKind::Handshake { .. }
        ));
    }
}
