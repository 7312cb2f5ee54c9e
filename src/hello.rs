use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::{
    client::options::{Credential, ServerAddress},
    cmap::Command,
    error::{ErrorKind, Result},
};

/// The name of the command every server answers on a fresh connection.
pub(crate) const HELLO_COMMAND_NAME: &str = "hello";

/// Construct a `hello` command.
///
/// Client metadata is attached only on the initial handshake of a connection;
/// monitoring re-handshakes pass `None`. When a credential is configured, the
/// command advertises the user so the server can report the SASL mechanisms it
/// supports for the later authentication exchange.
pub(crate) fn hello_command(
    metadata: Option<&ClientMetadata>,
    credential: Option<&Credential>,
) -> Command {
    let mut body = doc! { HELLO_COMMAND_NAME: 1 };

    if let Some(metadata) = metadata {
        body.insert("client", metadata.clone());
    }

    if let Some(credential) = credential {
        if let Some(ref username) = credential.username {
            body.insert(
                "saslSupportedMechs",
                format!("{}.{}", credential.resolved_source(), username),
            );
        }
    }

    Command::new(HELLO_COMMAND_NAME, "admin", body)
}

/// Metadata describing this driver and the application embedding it, reported to
/// the server on the initial handshake.
#[derive(Clone, Debug)]
pub(crate) struct ClientMetadata {
    pub(crate) application: Option<AppMetadata>,
    pub(crate) driver: DriverMetadata,
    pub(crate) os: OsMetadata,
}

#[derive(Clone, Debug)]
pub(crate) struct AppMetadata {
    pub(crate) name: String,
}

#[derive(Clone, Debug)]
pub(crate) struct DriverMetadata {
    pub(crate) name: String,
    pub(crate) version: String,
}

#[derive(Clone, Debug)]
pub(crate) struct OsMetadata {
    pub(crate) os_type: String,
    pub(crate) architecture: String,
}

impl ClientMetadata {
    pub(crate) fn new(app_name: Option<String>) -> Self {
        Self {
            application: app_name.map(|name| AppMetadata { name }),
            driver: DriverMetadata {
                name: "quilldb-rust-driver".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            os: OsMetadata {
                os_type: std::env::consts::OS.into(),
                architecture: std::env::consts::ARCH.into(),
            },
        }
    }
}

impl From<ClientMetadata> for Bson {
    fn from(metadata: ClientMetadata) -> Self {
        let mut metadata_doc = Document::new();

        if let Some(application) = metadata.application {
            metadata_doc.insert("application", doc! { "name": application.name });
        }

        metadata_doc.insert(
            "driver",
            doc! {
                "name": metadata.driver.name,
                "version": metadata.driver.version,
            },
        );

        metadata_doc.insert(
            "os",
            doc! {
                "type": metadata.os.os_type,
                "architecture": metadata.os.architecture,
            },
        );

        Bson::Document(metadata_doc)
    }
}

/// A `hello` reply as tracked per connection.
#[derive(Clone, Debug)]
pub(crate) struct HelloReply {
    pub(crate) server_address: ServerAddress,
    pub(crate) command_response: HelloCommandResponse,
    #[allow(unused)]
    pub(crate) raw_command_response: Document,
}

impl HelloReply {
    /// Interprets a raw server reply as a `hello` response.
    pub(crate) fn parse(server_address: ServerAddress, response: Document) -> Result<Self> {
        let command_response: HelloCommandResponse =
            bson::from_document(response.clone()).map_err(|e| ErrorKind::Handshake {
                message: format!("invalid hello reply from {}: {}", server_address, e),
            })?;

        Ok(Self {
            server_address,
            command_response,
            raw_command_response: response,
        })
    }
}

/// The body of the response to a `hello` command.
///
/// Fields the cluster core does not consume are retained in the raw reply on
/// [`HelloReply`] rather than modeled here.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelloCommandResponse {
    /// Whether the server is the writable primary of the deployment.
    #[serde(rename = "ismaster", default)]
    pub(crate) is_master: bool,

    /// Whether the server refuses writes on this connection.
    #[serde(default)]
    pub(crate) read_only: bool,

    /// The list of all members of the deployment.
    #[serde(default)]
    pub(crate) hosts: Vec<String>,

    /// The list of passive members of the deployment.
    #[serde(default)]
    pub(crate) passives: Vec<String>,

    /// The time in minutes that a session remains active after its most recent use.
    pub(crate) logical_session_timeout_minutes: Option<i64>,
}

#[cfg(test)]
mod test {
    use bson::doc;

    use super::{hello_command, HelloReply};
    use crate::client::options::{Credential, ServerAddress};
    use crate::hello::ClientMetadata;

    #[test]
    fn initial_handshake_includes_metadata_and_sasl_mechs() {
        let metadata = ClientMetadata::new(Some("sdam-test".to_string()));
        let credential = Credential::builder().username("app-user".to_string()).build();
        let command = hello_command(Some(&metadata), Some(&credential));

        assert_eq!(command.name, "hello");
        let client = command.body.get_document("client").unwrap();
        assert_eq!(
            client
                .get_document("application")
                .unwrap()
                .get_str("name")
                .unwrap(),
            "sdam-test"
        );
        assert_eq!(
            client.get_document("driver").unwrap().get_str("name").unwrap(),
            "quilldb-rust-driver"
        );
        assert_eq!(
            command.body.get_str("saslSupportedMechs").unwrap(),
            "admin.app-user"
        );
    }

    #[test]
    fn monitoring_handshake_omits_metadata() {
        let command = hello_command(None, None);
        assert!(!command.body.contains_key("client"));
        assert!(!command.body.contains_key("saslSupportedMechs"));
    }

    #[test]
    fn parse_defaults_missing_fields() {
        let address = ServerAddress::parse("db1:29017").unwrap();
        let reply = HelloReply::parse(address, doc! { "ok": 1 }).unwrap();

        assert!(!reply.command_response.is_master);
        assert!(!reply.command_response.read_only);
        assert!(reply.command_response.hosts.is_empty());
    }

    #[test]
    fn parse_reads_host_lists() {
        let address = ServerAddress::parse("db1:29017").unwrap();
        let reply = HelloReply::parse(
            address,
            doc! {
                "ok": 1,
                "ismaster": true,
                "readOnly": false,
                "hosts": ["db1:29017", "db2:29017"],
                "passives": ["db3:29017"],
                "logicalSessionTimeoutMinutes": 30_i64,
            },
        )
        .unwrap();

        assert!(reply.command_response.is_master);
        assert_eq!(reply.command_response.hosts.len(), 2);
        assert_eq!(reply.command_response.passives, vec!["db3:29017"]);
        assert_eq!(
            reply.command_response.logical_session_timeout_minutes,
            Some(30)
        );
    }
}
