//! Per-channel set of observed nodes.

use crate::types::{Channel, NodeIdentity, ObservedNode};
use std::collections::HashSet;

/// Which nodes are currently observed, per channel.
///
/// Plain bookkeeping: no I/O and no locking. The coordinator serializes
/// access to it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    data_change: HashSet<NodeIdentity>,
    events: HashSet<NodeIdentity>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, channel: Channel) -> &HashSet<NodeIdentity> {
        match channel {
            Channel::DataChange => &self.data_change,
            Channel::Event => &self.events,
        }
    }

    fn set_mut(&mut self, channel: Channel) -> &mut HashSet<NodeIdentity> {
        match channel {
            Channel::DataChange => &mut self.data_change,
            Channel::Event => &mut self.events,
        }
    }

    /// Returns `false` if the node was already present.
    pub fn add(&mut self, channel: Channel, node: NodeIdentity) -> bool {
        self.set_mut(channel).insert(node)
    }

    /// Returns `false` if the node was not present.
    pub fn remove(&mut self, channel: Channel, node: &NodeIdentity) -> bool {
        self.set_mut(channel).remove(node)
    }

    pub fn contains(&self, channel: Channel, node: &NodeIdentity) -> bool {
        self.set(channel).contains(node)
    }

    /// Sum across both channels.
    pub fn total_count(&self) -> usize {
        self.data_change.len() + self.events.len()
    }

    pub fn count(&self, channel: Channel) -> usize {
        self.set(channel).len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    /// Drop every node on `channel`. Returns how many were removed.
    pub fn clear(&mut self, channel: Channel) -> usize {
        let set = self.set_mut(channel);
        let removed = set.len();
        set.clear();
        removed
    }

    /// Nodes on `channel`, sorted.
    pub fn nodes(&self, channel: Channel) -> Vec<NodeIdentity> {
        let mut nodes: Vec<_> = self.set(channel).iter().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Every observed (channel, node) pair.
    pub fn observed(&self) -> Vec<ObservedNode> {
        Channel::ALL
            .iter()
            .flat_map(|&channel| {
                self.nodes(channel)
                    .into_iter()
                    .map(move |node| ObservedNode { channel, node })
            })
            .collect()
    }
}
