use bson::Document;

use crate::{
    client::session::ClientSession,
    cmap::Command,
    error::{Error, Result},
    Client,
};

/// `Database` is the client-side abstraction of a QuillDB database. It can only
/// be obtained through a [`Client`], by calling [`Client::database`].
///
/// `Database` is cheap to create and clone: it holds no connections of its own
/// and routes every command through its client's pool.
#[derive(Clone, Debug)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
        }
    }

    /// The name of the database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs a database-level command on an implicit session.
    ///
    /// The first key of `command` is the command name.
    pub async fn run_command(&self, command: Document) -> Result<Document> {
        let command = self.build_command(command)?;
        self.client.send(command, None).await
    }

    /// Runs a database-level command on the provided session.
    pub async fn run_command_with_session(
        &self,
        command: Document,
        session: &mut ClientSession,
    ) -> Result<Document> {
        let command = self.build_command(command)?;
        self.client.send(command, Some(session)).await
    }

    fn build_command(&self, body: Document) -> Result<Command> {
        let name = body
            .keys()
            .next()
            .ok_or_else(|| Error::invalid_argument("an empty document cannot be run as a command"))?
            .to_string();
        Ok(Command::new(name, &self.name, body))
    }
}
