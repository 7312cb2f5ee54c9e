pub(crate) mod conn;
pub(crate) mod establish;

pub use self::conn::command::Command;
pub(crate) use self::conn::{command::CommandContext, Connection};

use crate::options::ServerAddress;

/// The set of live connections, in insertion order.
///
/// Insertion order is load-bearing: the router scans the pool front to back and
/// takes the last match, so newer connections (with fresher handshakes) win
/// ties.
#[derive(Debug, Default)]
pub(crate) struct ConnectionPool {
    entries: Vec<Connection>,
}

impl ConnectionPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, connection: Connection) {
        self.entries.push(connection);
    }

    /// Removes the entry with the given connection id, if it is still present.
    pub(crate) fn remove(&mut self, id: u32) -> Option<Connection> {
        let index = self.entries.iter().position(|entry| entry.id() == id)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn get(&self, id: u32) -> Option<&Connection> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut Connection> {
        self.entries.iter_mut().find(|entry| entry.id() == id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.entries.iter_mut()
    }

    pub(crate) fn drain(&mut self) -> Vec<Connection> {
        self.entries.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any pool entry is connected to the given host.
    pub(crate) fn contains_host(&self, address: &ServerAddress) -> bool {
        self.entries.iter().any(|entry| entry.address() == address)
    }
}

#[cfg(test)]
mod test {
    use super::ConnectionPool;
    use crate::{cmap::Connection, options::ServerAddress};

    fn mocked(address: &str) -> Connection {
        let address = ServerAddress::parse(address).unwrap();
        let (connection, _requests, _replies) = Connection::new_mocked(address);
        connection
    }

    #[tokio::test]
    async fn iteration_preserves_insertion_order() {
        let mut pool = ConnectionPool::new();
        let first = mocked("db1:29017");
        let second = mocked("db2:29017");
        let third = mocked("db1:29017");
        let ids = [first.id(), second.id(), third.id()];

        pool.append(first);
        pool.append(second);
        pool.append(third);

        let seen: Vec<u32> = pool.iter().map(|entry| entry.id()).collect();
        assert_eq!(seen, ids);
    }

    #[tokio::test]
    async fn remove_is_by_identity_and_idempotent() {
        let mut pool = ConnectionPool::new();
        let first = mocked("db1:29017");
        let second = mocked("db1:29017");
        let first_id = first.id();

        pool.append(first);
        pool.append(second);

        assert!(pool.remove(first_id).is_some());
        assert!(pool.remove(first_id).is_none());
        // A second entry for the same host is untouched.
        assert_eq!(pool.len(), 1);
        assert!(pool.contains_host(&ServerAddress::parse("db1:29017").unwrap()));
    }
}
