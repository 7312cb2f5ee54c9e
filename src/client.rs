mod executor;
pub mod options;
pub mod session;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as SyncMutex, Weak,
    },
    time::Duration,
};

use bson::Document;

use crate::{
    cmap::{
        establish::{ConnectionEstablisher, EstablisherOptions},
        Command,
    },
    db::Database,
    error::{ErrorKind, Result},
    options::ClientOptions,
    sdam::{Monitor, Topology, DEFAULT_HEARTBEAT_FREQUENCY, MIN_HEARTBEAT_FREQUENCY},
};

use session::{ClientSession, ServerSessionPool};

/// This is the main entry point for the API. A `Client` is used to connect to a
/// QuillDB deployment. It discovers the other members of the deployment from the
/// seed hosts' handshakes, keeps a pool of connections to the members it has
/// discovered, and monitors the deployment for changes on a heartbeat.
///
/// `Client` uses [`std::sync::Arc`](https://doc.rust-lang.org/std/sync/struct.Arc.html)
/// internally, so it can safely be shared across threads or async tasks. For
/// example:
///
/// ```rust
/// # use quilldb::{error::Result, options::{ClientOptions, ServerAddress}, Client};
/// #
/// # async fn start_workers() -> Result<()> {
/// let options = ClientOptions::builder()
///     .hosts(vec![ServerAddress::parse("db1.example.com:29017")?])
///     .build();
/// let client = Client::connect(options).await?;
///
/// for i in 0..5 {
///     let client_ref = client.clone();
///
///     tokio::task::spawn(async move {
///         let database = client_ref.database(&format!("db{}", i));
///
///         // Do something with the database
///     });
/// }
/// #
/// # Ok(())
/// # }
/// ```
///
/// ## Clean shutdown
/// Dropping the last `Client` closes its connections from background tasks,
/// which may run at an arbitrary later time. Call [`Client::shutdown`] in the
/// termination path of your application to tear the pool down deterministically.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[allow(dead_code, unreachable_code, clippy::diverging_sub_expression)]
const _: fn() = || {
    fn assert_send<T: Send>(_t: T) {}
    fn assert_sync<T: Sync>(_t: T) {}

    let _c: Client = todo!();
    assert_send(_c);
    assert_sync(_c);
};

#[derive(Debug)]
struct ClientInner {
    topology: Topology,
    options: ClientOptions,
    session_pool: ServerSessionPool,
    heartbeat_freq: SyncMutex<Duration>,
    shut_down: AtomicBool,
}

impl Client {
    /// Creates a new `Client` connected to the deployment specified by `options`
    /// and runs the first discovery sweep.
    ///
    /// Connections themselves are opened lazily, when the first command needs
    /// one; `connect` succeeding does not imply any seed host is reachable.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        options.validate()?;

        let establisher = ConnectionEstablisher::new(EstablisherOptions::from_client_options(
            &options,
        ))?;
        let heartbeat_freq = options
            .heartbeat_freq
            .unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY)
            .max(MIN_HEARTBEAT_FREQUENCY);

        let inner = Arc::new(ClientInner {
            topology: Topology::new(&options, establisher),
            session_pool: ServerSessionPool::new(),
            heartbeat_freq: SyncMutex::new(heartbeat_freq),
            shut_down: AtomicBool::new(false),
            options,
        });
        let client = Self { inner };

        client.rediscover().await?;
        Monitor::start(client.weak());

        Ok(client)
    }

    /// Gets a handle to a database specified by `name` in the deployment the
    /// `Client` is connected to.
    ///
    /// This method does not send or receive anything across the wire to the
    /// database, so it can be used repeatedly without incurring any costs from
    /// I/O.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name)
    }

    /// Sends `command` to the deployment and returns the server's reply.
    ///
    /// This is the single dispatch entry point: commands are routed to a pooled
    /// connection matching their needs, and transparently re-routed onto a fresh
    /// connection if the chosen one closes before replying. When `session` is
    /// `None` the command runs on an implicit session.
    pub async fn send(
        &self,
        command: Command,
        session: Option<&mut ClientSession>,
    ) -> Result<Document> {
        self.execute_command(command, session).await
    }

    /// Starts a new [`ClientSession`] to thread through commands explicitly.
    pub async fn start_session(&self) -> ClientSession {
        let timeout = self.session_timeout().await;
        ClientSession::new(self.inner.session_pool.check_out(timeout).await)
    }

    /// The interval between discovery sweeps.
    pub fn heartbeat_frequency(&self) -> Duration {
        *self.inner.heartbeat_freq.lock().unwrap()
    }

    /// Changes the interval between discovery sweeps, taking effect when the
    /// next sweep is scheduled. Values below 500 milliseconds are silently raised
    /// to 500 milliseconds.
    pub fn set_heartbeat_frequency(&self, frequency: Duration) {
        *self.inner.heartbeat_freq.lock().unwrap() = frequency.max(MIN_HEARTBEAT_FREQUENCY);
    }

    /// Sets whether commands that do not need a writable server may run on a
    /// read-only secondary. The setting cascades to every pooled connection.
    pub async fn set_readable_secondary(&self, value: bool) {
        self.inner.topology.set_readable_secondary(value).await;
    }

    /// Shuts the client down, closing every pooled connection. Commands still in
    /// flight fail with a shutdown error; commands submitted afterwards are
    /// rejected.
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let contexts = self.inner.topology.shutdown().await;
        for context in contexts {
            context.complete(Err(ErrorKind::Shutdown.into()));
        }
    }

    /// Runs one discovery sweep now, on top of the periodic schedule.
    pub(crate) async fn rediscover(&self) -> Result<()> {
        let mut state = self.inner.topology.lock().await;
        self.inner.topology.rediscover(&mut state).await
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    pub(crate) fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    /// The options this client was created with.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn weak(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) async fn start_implicit_session(&self) -> ClientSession {
        let timeout = self.session_timeout().await;
        ClientSession::new(self.inner.session_pool.check_out(timeout).await)
    }

    pub(crate) async fn check_in_session(&self, session: ClientSession) {
        let timeout = self.session_timeout().await;
        self.inner
            .session_pool
            .check_in(session.into_server_session(), timeout)
            .await;
    }

    async fn session_timeout(&self) -> Option<Duration> {
        self.inner.topology.lock().await.session_timeout
    }

    /// The addresses currently backed by a pooled connection, in pool order.
    #[cfg(test)]
    pub(crate) async fn pool_addresses(&self) -> Vec<crate::options::ServerAddress> {
        let state = self.inner.topology.lock().await;
        state
            .pool
            .iter()
            .map(|connection| connection.address().clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn registry_view(
        &self,
    ) -> (
        std::collections::HashSet<crate::options::ServerAddress>,
        std::collections::HashSet<crate::options::ServerAddress>,
        std::collections::HashSet<crate::options::ServerAddress>,
    ) {
        let state = self.inner.topology.lock().await;
        (
            state.registry.known().clone(),
            state.registry.discovered().clone(),
            state.registry.timed_out().clone(),
        )
    }

    #[cfg(test)]
    pub(crate) async fn in_flight_on(&self, address: &crate::options::ServerAddress) -> usize {
        let state = self.inner.topology.lock().await;
        state
            .pool
            .iter()
            .filter(|connection| connection.address() == address)
            .map(|connection| connection.in_flight_count())
            .sum()
    }

    /// Runs server selection the way the dispatcher would and reports the chosen
    /// connection's address. Test-only.
    #[cfg(test)]
    pub(crate) async fn test_get_connection(
        &self,
        writable: bool,
    ) -> Result<crate::options::ServerAddress> {
        let weak = self.weak();
        let mut state = self.inner.topology.lock().await;
        let id = self
            .inner
            .topology
            .get_connection(&mut state, &weak, writable)
            .await?;
        state
            .pool
            .get(id)
            .map(|connection| connection.address().clone())
            .ok_or_else(|| crate::error::Error::internal("selected connection vanished"))
    }

    #[cfg(test)]
    pub(crate) async fn test_get_connection_id(&self, writable: bool) -> Result<u32> {
        let weak = self.weak();
        let mut state = self.inner.topology.lock().await;
        self.inner
            .topology
            .get_connection(&mut state, &weak, writable)
            .await
    }
}

#[derive(Clone, Debug)]
pub(crate) struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    pub(crate) fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }

    /// A weak handle that never upgrades, for wiring connections that outlive
    /// their cluster in tests.
    #[cfg(test)]
    pub(crate) fn dead() -> Self {
        Self { inner: Weak::new() }
    }
}
