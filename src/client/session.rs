//! Contains the types for client sessions.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;
use uuid::Uuid;

/// A logical session on the deployment, used to associate the commands sent
/// through it on the server side.
///
/// Sessions are obtained from [`Client::start_session`](crate::Client::start_session);
/// commands that are not given one run on an implicit session checked out of the
/// client's session pool for the duration of the command.
#[derive(Debug)]
pub struct ClientSession {
    server_session: ServerSession,
}

impl ClientSession {
    pub(crate) fn new(server_session: ServerSession) -> Self {
        Self { server_session }
    }

    /// The id of this session.
    pub fn id(&self) -> Uuid {
        self.server_session.id
    }

    pub(crate) fn mark_use(&mut self) {
        self.server_session.last_use = Instant::now();
    }

    pub(crate) fn into_server_session(self) -> ServerSession {
        self.server_session
    }
}

#[derive(Debug)]
pub(crate) struct ServerSession {
    id: Uuid,
    last_use: Instant,
}

impl ServerSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            last_use: Instant::now(),
        }
    }

    /// Whether the server will expire this session within the next minute, given
    /// the server-reported session timeout. With no reported timeout sessions are
    /// assumed not to expire.
    fn is_about_to_expire(&self, logical_session_timeout: Option<Duration>) -> bool {
        match logical_session_timeout {
            Some(timeout) => {
                let expiry_time = self.last_use + timeout;
                expiry_time.saturating_duration_since(Instant::now()) < Duration::from_secs(60)
            }
            None => false,
        }
    }
}

/// The pool of server sessions implicit commands draw from.
#[derive(Debug)]
pub(crate) struct ServerSessionPool {
    pool: Mutex<VecDeque<ServerSession>>,
}

impl ServerSessionPool {
    pub(crate) fn new() -> Self {
        Self {
            pool: Default::default(),
        }
    }

    /// Checks out a server session from the pool, discarding expired ones along
    /// the way. If the pool is empty a new session is created.
    pub(crate) async fn check_out(
        &self,
        logical_session_timeout: Option<Duration>,
    ) -> ServerSession {
        let mut pool = self.pool.lock().await;
        while let Some(session) = pool.pop_front() {
            if session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            return session;
        }
        ServerSession::new()
    }

    /// Checks a server session back in. Sessions about to expire are discarded
    /// rather than returned to the pool.
    pub(crate) async fn check_in(
        &self,
        session: ServerSession,
        logical_session_timeout: Option<Duration>,
    ) {
        if session.is_about_to_expire(logical_session_timeout) {
            return;
        }
        self.pool.lock().await.push_front(session);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.pool.lock().await.len()
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::{ServerSession, ServerSessionPool};

    #[tokio::test]
    async fn sessions_are_reused_in_lifo_order() {
        let pool = ServerSessionPool::new();
        let session = pool.check_out(None).await;
        let id = session.id;
        pool.check_in(session, None).await;

        let reused = pool.check_out(None).await;
        assert_eq!(reused.id, id);
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn expiring_sessions_are_discarded_on_check_in() {
        let pool = ServerSessionPool::new();
        let mut session = pool.check_out(None).await;
        session.last_use = Instant::now() - Duration::from_secs(120);

        // Reported timeout of two minutes: the session is within a minute of
        // expiry and must not be pooled again.
        pool.check_in(session, Some(Duration::from_secs(120))).await;
        assert_eq!(pool.len().await, 0);
    }
}
