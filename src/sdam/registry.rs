use std::collections::HashSet;

use tracing::debug;

use crate::{hello::HelloCommandResponse, options::ServerAddress};

/// Tracks the three views of the host universe: every host known to belong to
/// the deployment, the hosts currently backed by a pooled connection, and the
/// hosts whose most recent connection attempt failed.
///
/// `discovered` and `timed_out` are always subsets of `known` and never overlap;
/// a host in neither is a candidate for a new connection.
#[derive(Debug)]
pub(crate) struct HostRegistry {
    known: HashSet<ServerAddress>,
    discovered: HashSet<ServerAddress>,
    timed_out: HashSet<ServerAddress>,
}

impl HostRegistry {
    pub(crate) fn new(seeds: impl IntoIterator<Item = ServerAddress>) -> Self {
        Self {
            known: seeds.into_iter().collect(),
            discovered: HashSet::new(),
            timed_out: HashSet::new(),
        }
    }

    pub(crate) fn insert_known(&mut self, address: ServerAddress) {
        self.known.insert(address);
    }

    pub(crate) fn mark_discovered(&mut self, address: &ServerAddress) {
        self.known.insert(address.clone());
        self.timed_out.remove(address);
        self.discovered.insert(address.clone());
    }

    pub(crate) fn mark_timed_out(&mut self, address: &ServerAddress) {
        self.known.insert(address.clone());
        self.discovered.remove(address);
        self.timed_out.insert(address.clone());
    }

    pub(crate) fn remove_discovered(&mut self, address: &ServerAddress) {
        self.discovered.remove(address);
    }

    /// Forgets every timed-out host so the next sweep retries them.
    pub(crate) fn reset_timeouts(&mut self) {
        self.timed_out.clear();
    }

    /// Returns a known host that is neither pooled nor timed out.
    ///
    /// Always the smallest such address, so the choice is a pure function of the
    /// registry state.
    pub(crate) fn next_candidate(&self) -> Option<ServerAddress> {
        self.known
            .iter()
            .filter(|address| {
                !self.discovered.contains(address) && !self.timed_out.contains(address)
            })
            .min()
            .cloned()
    }

    /// Merges the peer lists of a handshake reply into the known set.
    ///
    /// A malformed entry is skipped without failing the caller; one bad host
    /// string in a reply must not poison the rest of the sweep.
    pub(crate) fn fold_hello(&mut self, response: &HelloCommandResponse) {
        for raw in response.hosts.iter().chain(response.passives.iter()) {
            match ServerAddress::parse(raw) {
                Ok(address) => self.insert_known(address),
                Err(error) => {
                    debug!(host = raw.as_str(), %error, "skipping malformed host in hello reply")
                }
            }
        }
    }

    pub(crate) fn known(&self) -> &HashSet<ServerAddress> {
        &self.known
    }

    pub(crate) fn discovered(&self) -> &HashSet<ServerAddress> {
        &self.discovered
    }

    pub(crate) fn timed_out(&self) -> &HashSet<ServerAddress> {
        &self.timed_out
    }
}

#[cfg(test)]
mod test {
    use super::HostRegistry;
    use crate::{hello::HelloCommandResponse, options::ServerAddress};

    fn address(s: &str) -> ServerAddress {
        ServerAddress::parse(s).unwrap()
    }

    fn registry(seeds: &[&str]) -> HostRegistry {
        HostRegistry::new(seeds.iter().map(|s| address(s)))
    }

    #[test]
    fn views_stay_disjoint() {
        let mut registry = registry(&["db1", "db2"]);

        registry.mark_discovered(&address("db1"));
        registry.mark_timed_out(&address("db2"));
        assert!(registry.discovered().is_disjoint(registry.timed_out()));

        // Re-marking moves a host between views rather than duplicating it.
        registry.mark_timed_out(&address("db1"));
        registry.mark_discovered(&address("db1"));
        assert!(registry.discovered().contains(&address("db1")));
        assert!(!registry.timed_out().contains(&address("db1")));
        assert!(registry.discovered().is_subset(registry.known()));
        assert!(registry.timed_out().is_subset(registry.known()));
    }

    #[test]
    fn candidates_exclude_discovered_and_timed_out() {
        let mut registry = registry(&["db1", "db2", "db3"]);

        registry.mark_discovered(&address("db1"));
        registry.mark_timed_out(&address("db2"));
        assert_eq!(registry.next_candidate(), Some(address("db3")));

        registry.mark_timed_out(&address("db3"));
        assert_eq!(registry.next_candidate(), None);

        registry.reset_timeouts();
        assert_eq!(registry.next_candidate(), Some(address("db2")));
    }

    #[test]
    fn candidate_selection_is_deterministic() {
        let registry = registry(&["db3", "db1", "db2"]);
        for _ in 0..10 {
            assert_eq!(registry.next_candidate(), Some(address("db1")));
        }
    }

    #[test]
    fn fold_hello_is_idempotent_and_skips_malformed_hosts() {
        let mut registry = registry(&["db1"]);
        let response = HelloCommandResponse {
            hosts: vec!["db1:29017".to_string(), "db2:29017".to_string()],
            passives: vec!["db3:29017".to_string(), "bad:host:name:8".to_string()],
            ..Default::default()
        };

        registry.fold_hello(&response);
        let after_first = registry.known().clone();
        assert_eq!(after_first.len(), 3);

        registry.fold_hello(&response);
        assert_eq!(registry.known(), &after_first);
    }
}
