//! Tracks which peers have seen the quota completed.

use crate::{PeerId, Ring};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSet {
    flags: BTreeMap<PeerId, bool>,
}

impl CompletionSet {
    pub fn new(ring: &Ring) -> Self {
        Self {
            flags: ring.members().iter().map(|id| (*id, false)).collect(),
        }
    }

    /// Marks `id` complete. Returns `true` only the first time a known peer is marked.
    pub fn mark(&mut self, id: PeerId) -> bool {
        match self.flags.get_mut(&id) {
            Some(flag) if !*flag => {
                *flag = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_complete(&self, id: PeerId) -> bool {
        self.flags.get(&id).copied().unwrap_or(false)
    }

    pub fn all_complete(&self) -> bool {
        self.flags.values().all(|flag| *flag)
    }

    pub fn pending(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.flags.iter().filter(|(_, flag)| !**flag).map(|(id, _)| *id)
    }
}
