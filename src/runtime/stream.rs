use std::{
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};

use crate::{
    error::{ErrorKind, Result},
    options::ServerAddress,
    runtime,
};

#[cfg(feature = "rustls-tls")]
use super::TlsConfig;

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for connecting an [`AsyncStream`].
pub(crate) struct StreamOptions<'a> {
    pub(crate) address: &'a ServerAddress,
    pub(crate) connect_timeout: Duration,
    #[cfg(feature = "rustls-tls")]
    pub(crate) tls_config: Option<&'a TlsConfig>,
}

/// An async stream to a server, possibly using TLS.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub(crate) enum AsyncStream {
    /// A basic TCP connection to the server.
    Tcp(TcpStream),

    /// A TLS connection over TCP.
    #[cfg(feature = "rustls-tls")]
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl AsyncStream {
    pub(crate) async fn connect(options: StreamOptions<'_>) -> Result<Self> {
        let tcp_stream = tcp_connect(options.address, options.connect_timeout).await?;

        #[cfg(feature = "rustls-tls")]
        if let Some(config) = options.tls_config {
            let tls_stream = config.connect(options.address.host(), tcp_stream).await?;
            return Ok(Self::Tls(tls_stream));
        }

        Ok(Self::Tcp(tcp_stream))
    }
}

async fn tcp_connect(address: &ServerAddress, connect_timeout: Duration) -> Result<TcpStream> {
    let mut socket_addrs: Vec<SocketAddr> =
        tokio::net::lookup_host((address.host(), address.port()))
            .await?
            .collect();

    if socket_addrs.is_empty() {
        return Err(ErrorKind::Io(std::sync::Arc::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses found for {}", address),
        )))
        .into());
    }

    // Try each of the addresses in sequence with a preference for IPv4.
    socket_addrs.sort_by_key(|addr| if addr.is_ipv4() { 0 } else { 1 });

    let mut connect_error = None;
    for socket_addr in &socket_addrs {
        match try_connect(socket_addr, connect_timeout).await {
            Ok(stream) => return Ok(stream),
            Err(error) => connect_error = Some(error),
        }
    }

    Err(connect_error
        .unwrap_or_else(|| ErrorKind::from(std::io::ErrorKind::ConnectionRefused).into()))
}

async fn try_connect(address: &SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    let stream_future = TcpStream::connect(address);

    let stream = if connect_timeout == Duration::from_secs(0) {
        stream_future.await?
    } else {
        runtime::timeout(connect_timeout, stream_future).await??
    };

    stream.set_nodelay(true)?;

    Ok(stream)
}

impl AsyncRead for AsyncStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(ref mut stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(ref mut stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(ref mut stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(ref mut stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
