use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::addr::Multiaddr;
use crate::identity::PeerId;

/// Known addresses per peer, consulted when dialing.
///
/// Entries never expire. Duplicate addresses are ignored.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: Mutex<HashMap<PeerId, Vec<Multiaddr>>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record addresses for `peer`. `/p2p` components are stripped.
    pub fn add_addrs(&self, peer: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) {
        let mut entries = self.lock();
        let known = entries.entry(peer).or_default();
        for addr in addrs {
            let addr = addr.without_peer_id();
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
    }

    /// Addresses for `peer`, in insertion order.
    pub fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.lock().get(peer).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, Vec<Multiaddr>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn stores_addresses_without_duplicates() {
        let book = AddressBook::new();
        let peer = Identity::from_seed(1).peer_id();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4000".parse().unwrap();

        book.add_addrs(peer, [addr.clone(), addr.clone()]);
        book.add_addrs(peer, [addr.clone()]);

        assert_eq!(book.addrs(&peer), vec![addr]);
    }

    #[test]
    fn strips_peer_component() {
        let book = AddressBook::new();
        let peer = Identity::from_seed(2).peer_id();
        let addr: Multiaddr = format!("/ip4/10.0.0.1/tcp/1/p2p/{peer}").parse().unwrap();

        book.add_addrs(peer, [addr]);
        assert_eq!(book.addrs(&peer)[0].to_string(), "/ip4/10.0.0.1/tcp/1");
    }

    #[test]
    fn unknown_peer_has_no_addresses() {
        let book = AddressBook::new();
        let peer = Identity::from_seed(3).peer_id();
        assert!(book.addrs(&peer).is_empty());
    }
}
