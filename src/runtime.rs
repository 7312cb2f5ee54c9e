pub(crate) mod stream;
#[cfg(feature = "rustls-tls")]
mod tls_rustls;

use std::{future::Future, time::Duration};

#[cfg(feature = "rustls-tls")]
pub(crate) use tls_rustls::TlsConfig;

use crate::error::Result;

/// Spawn a task in the background to run a future.
///
/// This must be called from an async block or function running on a runtime.
#[track_caller]
pub(crate) fn execute<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::task::spawn(fut);
}

/// Await on a future for a maximum amount of time before returning an error.
pub(crate) async fn timeout<F: Future>(timeout: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| std::io::ErrorKind::TimedOut.into())
}

/// Await for the given duration.
pub(crate) async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await
}
