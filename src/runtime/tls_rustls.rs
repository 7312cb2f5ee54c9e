use std::{fs::File, io::BufReader, sync::Arc};

use rustls::{pki_types::ServerName, ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::{
    client::options::TlsOptions,
    error::{ErrorKind, Result},
};

/// Configuration required to use TLS. Creating this is expensive, so it is cached
/// on the connection establisher and reused for every connection.
#[derive(Clone)]
pub(crate) struct TlsConfig {
    connector: TlsConnector,
}

impl TlsConfig {
    /// Create a new `TlsConfig` from the provided options.
    pub(crate) fn new(options: TlsOptions) -> Result<TlsConfig> {
        let config = make_rustls_config(options)?;
        let connector: TlsConnector = Arc::new(config).into();
        Ok(TlsConfig { connector })
    }

    pub(crate) async fn connect(
        &self,
        host: &str,
        tcp_stream: TcpStream,
    ) -> Result<TlsStream<TcpStream>> {
        let name =
            ServerName::try_from(host.to_string()).map_err(|e| ErrorKind::InvalidTlsConfig {
                message: format!("disallowed SNI name {:?}: {}", host, e),
            })?;

        let stream = self.connector.connect(name, tcp_stream).await?;
        Ok(stream)
    }
}

/// Converts `TlsOptions` into a `rustls::ClientConfig`.
fn make_rustls_config(options: TlsOptions) -> Result<ClientConfig> {
    let mut store = RootCertStore::empty();
    if let Some(path) = options.ca_file_path {
        let file = File::open(&path)?;
        for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
            let cert = cert.map_err(|e| ErrorKind::InvalidTlsConfig {
                message: format!(
                    "Unable to parse PEM-encoded root certificate from {}: {}",
                    path.display(),
                    e
                ),
            })?;
            store.add(cert).map_err(|e| ErrorKind::InvalidTlsConfig {
                message: format!(
                    "Unable to add root certificate from {}: {}",
                    path.display(),
                    e
                ),
            })?;
        }
    } else {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(store)
        .with_no_client_auth())
}
