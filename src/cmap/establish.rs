pub(crate) mod handshake;

use std::{sync::Arc, time::Duration};

use self::handshake::{Handshaker, HandshakerOptions};
use super::conn::wire::{self, RawChannel};
use crate::{
    client::{options::ClientOptions, WeakClient},
    cmap::Connection,
    error::Result,
    options::ServerAddress,
    runtime::stream::{AsyncStream, StreamOptions, DEFAULT_CONNECT_TIMEOUT},
    BoxFuture,
};

#[cfg(feature = "rustls-tls")]
use crate::{client::options::TlsOptions, runtime::TlsConfig};

/// The transport contract: opens a raw message channel to a host.
///
/// Production uses [`TcpConnector`]; tests substitute an in-memory deployment.
pub(crate) trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, Result<RawChannel>>;
}

/// Contains the logic to establish a connection: opening the transport and
/// performing the initial handshake.
#[derive(Clone)]
pub(crate) struct ConnectionEstablisher {
    connector: Arc<dyn Connector>,
    handshaker: Handshaker,
}

pub(crate) struct EstablisherOptions {
    handshake_options: HandshakerOptions,
    connect_timeout: Option<Duration>,
    #[cfg(feature = "rustls-tls")]
    tls_options: Option<TlsOptions>,
    #[cfg(test)]
    pub(crate) test_connector: Option<Arc<dyn Connector>>,
}

impl EstablisherOptions {
    pub(crate) fn from_client_options(options: &ClientOptions) -> Self {
        Self {
            handshake_options: HandshakerOptions {
                app_name: options.app_name.clone(),
                credential: options.credential.clone(),
            },
            connect_timeout: options.connect_timeout,
            #[cfg(feature = "rustls-tls")]
            tls_options: options.tls.clone(),
            #[cfg(test)]
            test_connector: options
                .test_options
                .as_ref()
                .and_then(|test_options| test_options.connector.clone()),
        }
    }
}

impl ConnectionEstablisher {
    /// Creates a new ConnectionEstablisher from the given options.
    pub(crate) fn new(options: EstablisherOptions) -> Result<Self> {
        let handshaker = Handshaker::new(options.handshake_options);

        #[cfg(test)]
        if let Some(connector) = options.test_connector {
            return Ok(Self {
                connector,
                handshaker,
            });
        }

        let connect_timeout = options
            .connect_timeout
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        #[cfg(feature = "rustls-tls")]
        let tls_config = options.tls_options.map(TlsConfig::new).transpose()?;

        Ok(Self {
            connector: Arc::new(TcpConnector {
                connect_timeout,
                #[cfg(feature = "rustls-tls")]
                tls_config,
            }),
            handshaker,
        })
    }

    pub(crate) fn handshaker(&self) -> &Handshaker {
        &self.handshaker
    }

    /// Opens a transport to `address`, runs the initial handshake (with client
    /// metadata), and applies the current cluster settings to the new connection.
    ///
    /// On any failure no pool entry is left behind; the caller decides whether to
    /// mark the host timed out.
    pub(crate) async fn establish(
        &self,
        address: &ServerAddress,
        client: WeakClient,
        readable_secondary: bool,
    ) -> Result<Connection> {
        let channel = match self.connector.connect(address).await {
            Ok(channel) => channel,
            Err(error) => return Err(error.into_unable_to_connect()),
        };

        let mut connection = Connection::new(address.clone(), channel, client);
        connection.set_readable_secondary(readable_secondary);

        let reply = match self.handshaker.handshake(&connection, true).await {
            Ok(reply) => reply,
            Err(error) => return Err(error.into_unable_to_connect()),
        };
        connection.set_hello_reply(reply);

        Ok(connection)
    }
}

/// Opens TCP (and optionally TLS) transports with a message pump bridging the
/// socket to the channel contract.
struct TcpConnector {
    connect_timeout: Duration,
    #[cfg(feature = "rustls-tls")]
    tls_config: Option<TlsConfig>,
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, Result<RawChannel>> {
        Box::pin(async move {
            let stream = AsyncStream::connect(StreamOptions {
                address,
                connect_timeout: self.connect_timeout,
                #[cfg(feature = "rustls-tls")]
                tls_config: self.tls_config.as_ref(),
            })
            .await?;
            Ok(wire::spawn_message_pump(stream))
        })
    }
}
