//! Notification subscriber bookkeeping
//!
//! A peer is subscribed while its last CCCD write was the enable value and it
//! has not disconnected since.

use std::collections::BTreeSet;

use gattlink_core::PeerAddress;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// Point-in-time copy of the subscriber set
pub type SubscriberSnapshot = SmallVec<[PeerAddress; 4]>;

#[derive(Debug, Default)]
pub struct SubscriberSet {
    peers: Mutex<BTreeSet<PeerAddress>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the peer was not already subscribed
    pub fn insert(&self, peer: PeerAddress) -> bool {
        self.peers.lock().insert(peer)
    }

    /// Returns `true` if the peer was subscribed
    pub fn remove(&self, peer: &PeerAddress) -> bool {
        self.peers.lock().remove(peer)
    }

    pub fn contains(&self, peer: &PeerAddress) -> bool {
        self.peers.lock().contains(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    pub fn clear(&self) {
        self.peers.lock().clear();
    }

    /// Copy the current members, in address order
    pub fn snapshot(&self) -> SubscriberSnapshot {
        self.peers.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let set = SubscriberSet::new();
        let peer = PeerAddress::from("AA");

        assert!(set.insert(peer.clone()));
        assert!(!set.insert(peer.clone()));
        assert_eq!(set.len(), 1);

        assert!(set.remove(&peer));
        assert!(!set.remove(&peer));
        assert!(set.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let set = SubscriberSet::new();
        set.insert(PeerAddress::from("BB"));
        set.insert(PeerAddress::from("AA"));

        let snapshot = set.snapshot();
        set.clear();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].as_str(), "AA");
        assert!(set.is_empty());
    }
}
