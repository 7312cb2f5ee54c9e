use std::time::Duration;

use derive_where::derive_where;
use futures_util::future::join_all;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::registry::HostRegistry;
use crate::{
    client::{options::ClientOptions, WeakClient},
    cmap::{
        establish::ConnectionEstablisher,
        CommandContext,
        Connection,
        ConnectionPool,
    },
    error::{Error, ErrorKind, Result},
    hello::HelloReply,
};

/// The topology of the deployment: the host registry, the connection pool, and
/// the cluster-wide settings they consult.
///
/// Every mutation of this state runs under the one `Mutex` below. Routing scans,
/// discovery sweeps, eviction, and settings cascades each hold the lock for
/// their whole duration, so each observes (and leaves behind) a consistent
/// snapshot; per-connection reply pairing is the only work that happens off this
/// lock.
#[derive_where(Debug)]
pub(crate) struct Topology {
    state: Mutex<TopologyState>,
    #[derive_where(skip)]
    establisher: ConnectionEstablisher,
}

#[derive(Debug)]
pub(crate) struct TopologyState {
    pub(crate) registry: HostRegistry,
    pub(crate) pool: ConnectionPool,
    pub(crate) readable_secondary: bool,
    pub(crate) session_timeout: Option<Duration>,
    pub(crate) shut_down: bool,
}

impl TopologyState {
    /// Removes a pool entry by connection identity. A no-op when the entry has
    /// already been removed, which makes the racing removal paths (router scan,
    /// close funnel, shutdown) safe to overlap.
    pub(crate) fn detach(&mut self, id: u32) {
        if let Some(connection) = self.pool.remove(id) {
            if !self.pool.contains_host(connection.address()) {
                self.registry.remove_discovered(connection.address());
            }
            debug!(
                connection_id = id,
                address = %connection.address(),
                "removed connection from the pool"
            );
        }
    }

    /// Scans the pool in insertion order for a connection with the requested
    /// capability, detaching entries that are closed or were never handshaked.
    /// The last match wins: newer connections have fresher handshakes.
    fn scan_pool(&mut self, writable: bool) -> Option<u32> {
        let mut dead = Vec::new();
        let mut selected = None;
        for connection in self.pool.iter() {
            if connection.is_closed() || connection.hello_reply().is_none() {
                dead.push(connection.id());
                continue;
            }
            if connection_matches(connection, writable) {
                selected = Some(connection.id());
            }
        }
        for id in dead {
            self.detach(id);
        }
        selected
    }

    fn fold_reply(&mut self, reply: &HelloReply) {
        debug!(address = %reply.server_address, "folding handshake reply");
        self.registry.fold_hello(&reply.command_response);
        if let Some(minutes) = reply.command_response.logical_session_timeout_minutes {
            if let Ok(minutes) = u64::try_from(minutes) {
                self.session_timeout = Some(Duration::from_secs(minutes * 60));
            }
        }
    }
}

/// Whether a live, handshaked connection can serve a command with the given
/// write requirement.
fn connection_matches(connection: &Connection, writable: bool) -> bool {
    let reply = match connection.hello_reply() {
        Some(reply) if !connection.is_closed() => &reply.command_response,
        _ => return false,
    };
    let unwritable = writable && reply.read_only;
    let unreadable = !connection.readable_secondary() && !reply.is_master;
    !unwritable && !unreadable
}

impl Topology {
    pub(crate) fn new(options: &ClientOptions, establisher: ConnectionEstablisher) -> Self {
        Self {
            state: Mutex::new(TopologyState {
                registry: HostRegistry::new(options.hosts.iter().cloned()),
                pool: ConnectionPool::new(),
                readable_secondary: options.readable_secondary.unwrap_or(false),
                session_timeout: None,
                shut_down: false,
            }),
            establisher,
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, TopologyState> {
        self.state.lock().await
    }

    /// Selects a connection that can serve a command with the given write
    /// requirement, in three stages: scan the pool, connect to candidate hosts,
    /// and finally run one discovery sweep and re-scan.
    ///
    /// The returned id refers to a connection that is live at this moment but may
    /// close before the caller writes to it; the dispatcher's retry path covers
    /// that window.
    pub(crate) async fn get_connection(
        &self,
        state: &mut TopologyState,
        client: &WeakClient,
        writable: bool,
    ) -> Result<u32> {
        if state.shut_down {
            return Err(ErrorKind::Shutdown.into());
        }

        if let Some(id) = state.scan_pool(writable) {
            return Ok(id);
        }

        while let Some(address) = state.registry.next_candidate() {
            match self
                .establisher
                .establish(&address, client.clone(), state.readable_secondary)
                .await
            {
                Ok(connection) => {
                    state.registry.mark_discovered(&address);
                    if let Some(reply) = connection.hello_reply() {
                        state.fold_reply(reply);
                    }
                    let id = connection.id();
                    let matches = connection_matches(&connection, writable);
                    debug!(connection_id = id, %address, "added connection to the pool");
                    state.pool.append(connection);
                    if matches {
                        return Ok(id);
                    }
                }
                Err(error) => {
                    warn!(%address, %error, "failed to connect to candidate host");
                    state.registry.mark_timed_out(&address);
                }
            }
        }

        self.rediscover(state).await?;
        if let Some(id) = state.scan_pool(writable) {
            return Ok(id);
        }

        Err(Error::no_available_hosts(format!(
            "no pooled connection can serve a {} command and all known hosts have been tried \
             ({} pooled, {} known, {} discovered, {} timed out)",
            if writable { "write" } else { "read" },
            state.pool.len(),
            state.registry.known().len(),
            state.registry.discovered().len(),
            state.registry.timed_out().len(),
        )))
    }

    /// One discovery sweep: re-handshake every pooled connection, fold the
    /// replies into the registry, drop failed hosts from the discovered view, and
    /// finally forget all timeouts so the next sweep retries them.
    pub(crate) async fn rediscover(&self, state: &mut TopologyState) -> Result<()> {
        if state.shut_down {
            return Err(ErrorKind::Shutdown.into());
        }

        let handshaker = self.establisher.handshaker();
        let checks = state.pool.iter().map(|connection| {
            let id = connection.id();
            let address = connection.address().clone();
            let handshake = handshaker.handshake(connection, false);
            async move { (id, address, handshake.await) }
        });
        let results = join_all(checks).await;

        for (id, address, result) in results {
            match result {
                Ok(reply) => {
                    state.fold_reply(&reply);
                    if let Some(connection) = state.pool.get_mut(id) {
                        connection.set_hello_reply(reply);
                    }
                }
                Err(error) => {
                    warn!(%address, %error, "heartbeat failed");
                    state.registry.remove_discovered(&address);
                }
            }
        }

        state.registry.reset_timeouts();
        Ok(())
    }

    /// Flips the cluster-wide readable-secondary setting and mirrors it onto
    /// every pooled connection.
    pub(crate) async fn set_readable_secondary(&self, value: bool) {
        let mut state = self.state.lock().await;
        state.readable_secondary = value;
        for connection in state.pool.iter_mut() {
            connection.set_readable_secondary(value);
        }
    }

    /// Marks the topology shut down and empties the pool, returning every
    /// command still in flight so the caller can fail their slots.
    pub(crate) async fn shutdown(&self) -> Vec<CommandContext> {
        let connections = {
            let mut state = self.state.lock().await;
            state.shut_down = true;
            let connections = state.pool.drain();
            for connection in &connections {
                state.registry.remove_discovered(connection.address());
            }
            connections
        };

        let mut contexts = Vec::new();
        for mut connection in connections {
            contexts.extend(connection.take_in_flight());
            connection.close();
        }
        contexts
    }
}
