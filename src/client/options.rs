//! Contains the types for client and connection configuration.

use std::{
    cmp::Ordering,
    fmt::{self, Display},
    hash::{Hash, Hasher},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

#[cfg(test)]
use derive_where::derive_where;
use typed_builder::TypedBuilder;

use crate::error::{ErrorKind, Result};

/// The default port a QuillDB server listens on.
pub(crate) const DEFAULT_PORT: u16 = 29017;

/// An enum representing the address of a QuillDB server.
///
/// Currently this just supports addresses that can be connected to over TCP, but
/// alternative address types may be supported in the future (e.g. Unix Domain
/// Socket paths).
#[derive(Clone, Debug, Eq)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP/IP host and port combination.
    Tcp {
        /// The hostname or IP address where the QuillDB server can be found.
        host: String,

        /// The TCP port that the QuillDB server is listening on.
        ///
        /// The default is 29017.
        port: Option<u16>,
    },
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Tcp { host, port },
                Self::Tcp {
                    host: other_host,
                    port: other_port,
                },
            ) => {
                host == other_host
                    && port.unwrap_or(DEFAULT_PORT) == other_port.unwrap_or(DEFAULT_PORT)
            }
        }
    }
}

impl Hash for ServerAddress {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        match self {
            Self::Tcp { host, port } => {
                host.hash(state);
                port.unwrap_or(DEFAULT_PORT).hash(state);
            }
        }
    }
}

// Candidate selection in the host registry picks the minimum address, so the
// ordering must agree with the normalized equality above.
impl Ord for ServerAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Self::Tcp { host, port },
                Self::Tcp {
                    host: other_host,
                    port: other_port,
                },
            ) => (host, port.unwrap_or(DEFAULT_PORT))
                .cmp(&(other_host, other_port.unwrap_or(DEFAULT_PORT))),
        }
    }
}

impl PartialOrd for ServerAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for ServerAddress {
    type Err = crate::error::Error;
    fn from_str(address: &str) -> Result<Self> {
        ServerAddress::parse(address)
    }
}

impl ServerAddress {
    /// Parses an address string into a `ServerAddress`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let mut parts = address.split(':');
        let hostname = match parts.next() {
            Some(part) => {
                if part.is_empty() {
                    return Err(ErrorKind::InvalidArgument {
                        message: format!(
                            "invalid server address: \"{}\"; hostname cannot be empty",
                            address
                        ),
                    }
                    .into());
                }
                part
            }
            None => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!("invalid server address: \"{}\"", address),
                }
                .into())
            }
        };

        let port = match parts.next() {
            Some(part) => {
                let port = u16::from_str(part).map_err(|_| ErrorKind::InvalidArgument {
                    message: format!(
                        "port must be valid 16-bit unsigned integer, instead got: {}",
                        part
                    ),
                })?;

                if port == 0 {
                    return Err(ErrorKind::InvalidArgument {
                        message: format!(
                            "invalid server address: \"{}\"; port must be non-zero",
                            address
                        ),
                    }
                    .into());
                }
                if parts.next().is_some() {
                    return Err(ErrorKind::InvalidArgument {
                        message: format!(
                            "address \"{}\" contains more than one unescaped ':'",
                            address
                        ),
                    }
                    .into());
                }

                Some(port)
            }
            None => None,
        };

        Ok(ServerAddress::Tcp {
            host: hostname.to_lowercase(),
            port,
        })
    }

    pub(crate) fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host.as_str(),
        }
    }

    pub(crate) fn port(&self) -> u16 {
        match self {
            Self::Tcp { port, .. } => port.unwrap_or(DEFAULT_PORT),
        }
    }
}

impl Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => {
                write!(fmt, "{}:{}", host, port.unwrap_or(DEFAULT_PORT))
            }
        }
    }
}

/// A struct containing authentication information.
///
/// The authentication exchange itself is performed by the credential machinery
/// after the handshake; the cluster core only advertises the configured user on
/// the initial handshake.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct Credential {
    /// The username to authenticate with.
    pub username: Option<String>,

    /// The database used to authenticate.
    ///
    /// Defaults to "admin".
    pub source: Option<String>,

    /// The password to authenticate with.
    pub password: Option<String>,
}

impl Credential {
    /// The resolved database this credential authenticates against.
    pub(crate) fn resolved_source(&self) -> &str {
        self.source.as_deref().unwrap_or("admin")
    }
}

/// Specifies the TLS configuration that the [`Client`](crate::Client) should use.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct TlsOptions {
    /// The path to the CA file that the [`Client`](crate::Client) should use for TLS. If none is
    /// specified, then the WebPKI roots will be used.
    pub ca_file_path: Option<PathBuf>,
}

/// Contains the options that can be used to create a new [`Client`](crate::Client).
#[derive(Clone, TypedBuilder)]
#[cfg_attr(test, derive_where(Debug))]
#[cfg_attr(not(test), derive(Debug))]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ClientOptions {
    /// The initial list of seeds that the Client should connect to.
    ///
    /// The driver will autodiscover the other members of the deployment from the
    /// handshake replies of the seeds.
    pub hosts: Vec<ServerAddress>,

    /// The application name that the Client will send to the server as part of the
    /// handshake. This can be used in combination with the server logs to determine
    /// which Client is connected to a server.
    pub app_name: Option<String>,

    /// The credential to use for authenticating connections made by this client.
    pub credential: Option<Credential>,

    /// The TLS configuration for the Client to use in its connections with the
    /// deployment.
    ///
    /// By default, TLS is disabled.
    pub tls: Option<TlsOptions>,

    /// The amount of time each monitoring thread should wait between sending a
    /// heartbeat to its respective server to check its status.
    ///
    /// Defaults to 10 seconds; values below 500 milliseconds are silently raised to
    /// 500 milliseconds.
    pub heartbeat_freq: Option<Duration>,

    /// Whether commands that do not need a writable server may be routed to a
    /// read-only secondary.
    ///
    /// Defaults to false. Can be changed at runtime with
    /// [`Client::set_readable_secondary`](crate::Client::set_readable_secondary).
    pub readable_secondary: Option<bool>,

    /// The connect timeout passed to each underlying TCP stream when attempting to
    /// connect to the server.
    ///
    /// The default value is 10 seconds.
    pub connect_timeout: Option<Duration>,

    /// Options used in tests to substitute the transport with an in-memory one and
    /// to lower timing constants.
    #[cfg(test)]
    #[derive_where(skip)]
    pub(crate) test_options: Option<TestOptions>,
}

/// Overrides used only by this crate's test suite.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct TestOptions {
    /// Replaces the TCP connector with an arbitrary one, usually the scripted
    /// in-memory deployment from `crate::test`.
    pub(crate) connector: Option<std::sync::Arc<dyn crate::cmap::establish::Connector>>,
}

impl ClientOptions {
    /// Ensures the options are consistent before a `Client` is built from them.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(ErrorKind::NoHostSpecified.into());
        }

        #[cfg(not(feature = "rustls-tls"))]
        if self.tls.is_some() {
            return Err(ErrorKind::InvalidTlsConfig {
                message: "TLS options were provided, but the driver was compiled without the \
                          'rustls-tls' feature"
                    .to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::ServerAddress;

    #[test]
    fn parse_applies_default_port_for_equality() {
        let explicit = ServerAddress::parse("db1.example.com:29017").unwrap();
        let implicit = ServerAddress::parse("db1.example.com").unwrap();
        assert_eq!(explicit, implicit);
    }

    #[test]
    fn parse_lowercases_hostname() {
        let address = ServerAddress::parse("DB1.Example.Com:4000").unwrap();
        assert_eq!(address.host(), "db1.example.com");
        assert_eq!(address.port(), 4000);
    }

    #[test]
    fn parse_rejects_malformed_addresses() {
        assert!(ServerAddress::parse("").is_err());
        assert!(ServerAddress::parse(":29017").is_err());
        assert!(ServerAddress::parse("db1:0").is_err());
        assert!(ServerAddress::parse("db1:29017:2").is_err());
        assert!(ServerAddress::parse("db1:notaport").is_err());
    }

    #[test]
    fn ordering_agrees_with_normalized_equality() {
        let a = ServerAddress::parse("db1:29017").unwrap();
        let b = ServerAddress::parse("db1").unwrap();
        assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);

        let c = ServerAddress::parse("db1:29018").unwrap();
        assert!(a < c);
    }
}
