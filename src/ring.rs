//! Module that computes the logical ring over the static set of peers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, num::ParseIntError, str::FromStr};

/// Identifier of a peer, which is also the port it listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u16);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Smallest member greater than `id`, wrapping around to the smallest member overall.
///
/// Returns `None` only for an empty membership list.
pub fn successor(id: PeerId, members: &[PeerId]) -> Option<PeerId> {
    members
        .iter()
        .copied()
        .filter(|member| *member > id)
        .min()
        .or_else(|| initial_holder(members))
}

/// The peer that starts out holding the token: the smallest member.
pub fn initial_holder(members: &[PeerId]) -> Option<PeerId> {
    members.iter().copied().min()
}

/// Sorted, de-duplicated membership of the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring {
    members: Vec<PeerId>,
}

impl Ring {
    pub fn new(members: impl IntoIterator<Item = PeerId>) -> Result<Self> {
        let mut members: Vec<PeerId> = members.into_iter().collect();
        members.sort_unstable();
        members.dedup();

        if members.is_empty() {
            return Err(Error::Config("the membership list is empty".into()));
        }

        Ok(Self { members })
    }

    pub fn members(&self) -> &[PeerId] {
        &self.members
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.members.binary_search(&id).is_ok()
    }

    pub fn successor(&self, id: PeerId) -> PeerId {
        match self.members.iter().find(|member| **member > id) {
            Some(next) => *next,
            None => self.initial_holder(),
        }
    }

    pub fn initial_holder(&self) -> PeerId {
        self.members[0]
    }

    /// Every member except `id`.
    pub fn others(&self, id: PeerId) -> impl Iterator<Item = PeerId> + '_ {
        self.members.iter().copied().filter(move |member| *member != id)
    }

    /// Follows successors from `start` until the walk would return to it.
    pub fn walk(&self, start: PeerId) -> impl Iterator<Item = PeerId> + '_ {
        let mut next = Some(start);
        std::iter::from_fn(move || {
            let current = next?;
            let following = self.successor(current);
            next = (following != start).then_some(following);
            Some(current)
        })
        .take(self.members.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(ports: &[u16]) -> Vec<PeerId> {
        ports.iter().copied().map(PeerId).collect()
    }

    #[test]
    fn three_peer_ring() {
        let members = ids(&[5003, 5001, 5002]);

        assert_eq!(initial_holder(&members), Some(PeerId(5001)));
        assert_eq!(successor(PeerId(5001), &members), Some(PeerId(5002)));
        assert_eq!(successor(PeerId(5002), &members), Some(PeerId(5003)));
        assert_eq!(successor(PeerId(5003), &members), Some(PeerId(5001)));
    }

    #[test]
    fn empty_membership() {
        assert_eq!(successor(PeerId(5001), &[]), None);
        assert_eq!(initial_holder(&[]), None);
        assert!(matches!(Ring::new(Vec::new()), Err(Error::Config(_))));
    }

    #[test]
    fn single_peer_is_its_own_successor() {
        let ring = Ring::new(ids(&[7000])).unwrap();
        assert_eq!(ring.successor(PeerId(7000)), PeerId(7000));
        assert_eq!(ring.others(PeerId(7000)).count(), 0);
    }

    #[test]
    fn duplicates_collapse() {
        let ring = Ring::new(ids(&[5002, 5001, 5002])).unwrap();
        assert_eq!(ring.members(), ids(&[5001, 5002]).as_slice());
    }

    #[test]
    fn peer_id_parses_trimmed_lines() {
        assert_eq!(" 5001\r".parse::<PeerId>(), Ok(PeerId(5001)));
        assert!("port".parse::<PeerId>().is_err());
    }

    proptest! {
        #[test]
        fn initial_holder_is_smallest(
            ports in prop::collection::btree_set(1u16..=u16::MAX, 1..32),
        ) {
            let members = ids(&ports.iter().copied().collect::<Vec<_>>());
            let ring = Ring::new(members.clone()).unwrap();

            let smallest = ports.iter().next().copied().map(PeerId);

            prop_assert_eq!(Some(ring.initial_holder()), smallest);
            prop_assert_eq!(initial_holder(&members), Some(ring.initial_holder()));
        }

        #[test]
        fn successor_forms_a_single_cycle(
            ports in prop::collection::btree_set(1u16..=u16::MAX, 1..32),
            start in any::<prop::sample::Index>(),
        ) {
            let members = ids(&ports.iter().copied().collect::<Vec<_>>());
            let ring = Ring::new(members.clone()).unwrap();
            let start = members[start.index(members.len())];

            let walked: Vec<PeerId> = ring.walk(start).collect();
            let mut visited = walked.clone();
            visited.sort_unstable();

            prop_assert_eq!(visited, ring.members().to_vec());
            prop_assert_eq!(ring.successor(*walked.last().unwrap()), start);
            for member in &members {
                prop_assert_eq!(successor(*member, &members), Some(ring.successor(*member)));
            }
        }
    }
}
