use bson::{doc, spec::BinarySubtype, Binary, Document};
use tracing::warn;

use super::session::ClientSession;
use crate::{
    client::Client,
    cmap::{Command, CommandContext},
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
    sdam::topology::Topology,
};

impl Client {
    /// Executes a command on a connection selected by the topology, running it on
    /// an implicit session when the caller did not provide one.
    pub(crate) async fn execute_command(
        &self,
        command: Command,
        session: Option<&mut ClientSession>,
    ) -> Result<Document> {
        if self.is_shut_down() {
            return Err(ErrorKind::Shutdown.into());
        }

        let mut implicit_session = None;
        let session_id = match session {
            Some(session) => {
                session.mark_use();
                session.id()
            }
            None => {
                let session = self.start_implicit_session().await;
                let id = session.id();
                implicit_session = Some(session);
                id
            }
        };

        let (context, receiver) = CommandContext::new(command, true, Some(session_id));
        self.dispatch(context).await;

        let result = receiver
            .await
            .map_err(|_| Error::internal("command completion slot was dropped"))?;

        if let Some(mut session) = implicit_session {
            session.mark_use();
            self.check_in_session(session).await;
        }

        result.map(|reply| reply.body)
    }

    /// Routes a context onto a connection and writes it. Failures are delivered
    /// through the context's completion slot rather than returned.
    ///
    /// Selection first asks for any readable connection and falls back to
    /// requiring a writable one, so read traffic keeps flowing while only a
    /// secondary is reachable.
    pub(crate) async fn dispatch(&self, mut context: CommandContext) {
        if let Some(session_id) = context.session_id {
            context.command.body.insert(
                "lsid",
                doc! {
                    "id": Binary {
                        subtype: BinarySubtype::Uuid,
                        bytes: session_id.as_bytes().to_vec(),
                    }
                },
            );
        }

        let weak = self.weak();
        let topology = self.topology();
        let mut state = topology.lock().await;

        let selected = match topology.get_connection(&mut state, &weak, false).await {
            Ok(id) => Ok(id),
            Err(_) => topology.get_connection(&mut state, &weak, true).await,
        };

        match selected {
            Ok(id) => match state.pool.get(id) {
                Some(connection) => connection.send_context(context),
                None => context.complete(Err(Error::internal(
                    "selected connection is no longer pooled",
                ))),
            },
            Err(error) => context.complete(Err(error)),
        }
    }

    /// The close funnel: runs the eviction-and-retry policy when a pooled
    /// connection's transport closes with commands still queued.
    ///
    /// Each queued command either gets resubmitted onto a fresh connection or has
    /// its slot failed, exactly once; non-retryable commands were already failed
    /// by the reply reader before this runs.
    pub(crate) async fn handle_connection_closed(
        &self,
        id: u32,
        address: ServerAddress,
        mut contexts: Vec<CommandContext>,
        cause: Error,
    ) {
        let topology: &Topology = self.topology();
        let sweep = {
            let mut state = topology.lock().await;
            let was_pooled = state.pool.get(id).is_some();
            state.detach(id);

            // Connections that never made it into the pool (e.g. a handshake that
            // died mid-establish) carry nothing to recover and do not warrant a
            // sweep.
            if !was_pooled && contexts.is_empty() {
                return;
            }

            warn!(
                connection_id = id,
                %address,
                %cause,
                in_flight = contexts.len(),
                "pooled connection closed"
            );

            for context in contexts.iter_mut() {
                context.mark_unsent();
            }

            topology.rediscover(&mut state).await
        };

        match sweep {
            Ok(()) => {
                for context in contexts {
                    self.dispatch(context).await;
                }
            }
            Err(sweep_error) => {
                for context in contexts {
                    context.complete(Err(sweep_error.clone().with_source(cause.clone())));
                }
            }
        }
    }
}
