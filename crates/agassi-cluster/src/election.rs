//! Master election rule used by the discovery substrate.
//!
//! Rank is (start time, address): the longest-running node wins, the
//! lowest address breaks ties. A newcomer therefore never displaces an
//! established master.

use std::cmp::Ordering;
use std::net::IpAddr;

use crate::peers::Peer;

/// A node's standing in the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rank {
    pub started_at: u64,
    pub address: IpAddr,
}

impl Rank {
    pub fn of(peer: &Peer) -> Self {
        Self {
            started_at: peer.started_at,
            address: peer.address,
        }
    }

    /// Whether `self` wins against `other`.
    pub fn outranks(&self, other: &Rank) -> bool {
        self.cmp(other) == Ordering::Less
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.started_at
            .cmp(&other.started_at)
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What the local node should do after an election check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Promote,
    Demote,
    Hold,
}

/// Decide the local node's move given the live peers.
///
/// - Not master, no live master, and outranking every live peer: promote.
/// - Master, but another live master outranks us: demote.
pub fn decide(local: Rank, local_is_master: bool, peers: &[Peer]) -> Verdict {
    let mut masters = peers.iter().filter(|p| p.is_master).map(Rank::of);

    if local_is_master {
        if masters.any(|m| m.outranks(&local)) {
            Verdict::Demote
        } else {
            Verdict::Hold
        }
    } else if masters.next().is_none() && peers.iter().all(|p| local.outranks(&Rank::of(p))) {
        Verdict::Promote
    } else {
        Verdict::Hold
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn peer(last: u8, started_at: u64, is_master: bool) -> Peer {
        Peer {
            started_at,
            is_master,
            ..Peer::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
        }
    }

    fn rank(last: u8, started_at: u64) -> Rank {
        Rank {
            started_at,
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
        }
    }

    #[test]
    fn lone_node_promotes() {
        assert_eq!(decide(rank(1, 100), false, &[]), Verdict::Promote);
    }

    #[test]
    fn oldest_node_wins() {
        let peers = [peer(2, 200, false), peer(3, 300, false)];
        assert_eq!(decide(rank(9, 100), false, &peers), Verdict::Promote);
        assert_eq!(decide(rank(9, 250), false, &peers), Verdict::Hold);
    }

    #[test]
    fn address_breaks_ties() {
        let peers = [peer(5, 100, false)];
        assert_eq!(decide(rank(4, 100), false, &peers), Verdict::Promote);
        assert_eq!(decide(rank(6, 100), false, &peers), Verdict::Hold);
    }

    #[test]
    fn existing_master_blocks_promotion() {
        let peers = [peer(2, 500, true)];
        assert_eq!(decide(rank(1, 100), false, &peers), Verdict::Hold);
    }

    #[test]
    fn master_demotes_to_better_master() {
        let peers = [peer(2, 50, true)];
        assert_eq!(decide(rank(1, 100), true, &peers), Verdict::Demote);
        assert_eq!(decide(rank(1, 10), true, &peers), Verdict::Hold);
    }

    #[test]
    fn master_holds_without_rivals() {
        let peers = [peer(2, 50, false)];
        assert_eq!(decide(rank(1, 100), true, &peers), Verdict::Hold);
    }
}
