/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Main type: [`Ghost`].

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;
use std::collections::{HashMap, HashSet};

use crate::{
    arena::{Arena, Handle},
    types::{
        data_types::{Slot, SlotHash, Stake, TotalStake, VerifyingKeyBytes},
        stake_table::StakeTable,
    },
};

/// Checked reference to a [`GhostNode`].
pub type NodeHandle = Handle;

/// Vote-weighted mirror of one block.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct GhostNode {
    key: SlotHash,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    stake: TotalStake,
    weight: TotalStake,
}

impl GhostNode {
    pub fn key(&self) -> SlotHash {
        self.key
    }

    /// Stake of the validators whose latest vote is for this node.
    pub fn stake(&self) -> TotalStake {
        self.stake
    }

    /// Stake of the validators whose latest vote is for this node or any of its descendants.
    pub fn weight(&self) -> TotalStake {
        self.weight
    }

    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }
}

/// A validator's latest vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
struct VoteRecord {
    key: SlotHash,
    // The stake that was added along the vote's path, and that has to be subtracted again when the
    // validator votes next.
    stake: Stake,
    // `None` once the voted node has been pruned.
    node: Option<NodeHandle>,
}

/// The fork-choice tree.
///
/// # Capacity
///
/// At most `node_max` nodes and `vote_max` distinct voters are tracked. Exceeding either makes the
/// offending call fail; nothing is silently dropped.
#[derive(Clone, Debug)]
pub struct Ghost {
    nodes: Arena<GhostNode>,
    node_map: HashMap<SlotHash, NodeHandle>,
    votes: HashMap<VerifyingKey, VoteRecord>,
    vote_max: usize,
    root: Option<NodeHandle>,
}

impl Ghost {
    /// Create an empty tree. The first [`leaf_insert`](Self::leaf_insert) (with no parent) places the
    /// root.
    pub fn new(node_max: usize, vote_max: usize) -> Self {
        Self {
            nodes: Arena::with_capacity(node_max),
            node_map: HashMap::new(),
            votes: HashMap::new(),
            vote_max,
            root: None,
        }
    }

    /// Register the block `key` as a child of `parent_key`.
    ///
    /// `parent_key` must already be in the tree: ancestors are always inserted first. Passing `None`
    /// inserts the root, which is only allowed while the tree is empty.
    pub fn leaf_insert(
        &mut self,
        key: SlotHash,
        parent_key: Option<SlotHash>,
    ) -> Result<NodeHandle, GhostError> {
        if self.node_map.contains_key(&key) {
            return Err(GhostError::NodeExists { key });
        }

        let parent = match parent_key {
            None if self.root.is_some() => return Err(GhostError::RootExists { key }),
            None => None,
            Some(parent_key) => {
                let parent = *self
                    .node_map
                    .get(&parent_key)
                    .ok_or(GhostError::UnknownParent { key, parent_key })?;
                if key.slot <= parent_key.slot {
                    return Err(GhostError::SlotNotAfterParent { key, parent_key });
                }
                Some(parent)
            }
        };

        let node = GhostNode {
            key,
            parent,
            children: Vec::new(),
            stake: TotalStake::new(0),
            weight: TotalStake::new(0),
        };
        let handle = self
            .nodes
            .insert(node)
            .map_err(|_| GhostError::NodeCapacityExhausted {
                node_max: self.nodes.capacity(),
            })?;

        match parent {
            Some(parent) => self.node_mut(parent).children.push(handle),
            None => self.root = Some(handle),
        }
        self.node_map.insert(key, handle);
        Ok(handle)
    }

    /// Move `validator`'s `stake` to the path from `key` to the root.
    ///
    /// If the validator voted before, the stake recorded with that vote is first subtracted from the
    /// previous path. Votes must be strictly increasing in slot per validator: a vote whose slot is at
    /// or below the previous vote's slot is rejected and changes nothing.
    pub fn vote_update(
        &mut self,
        validator: &VerifyingKey,
        key: SlotHash,
        stake: Stake,
    ) -> Result<(), GhostError> {
        let node = *self.node_map.get(&key).ok_or(GhostError::UnknownKey { key })?;

        let previous = self.votes.get(validator).copied();
        match previous {
            Some(previous) if key.slot <= previous.key.slot => {
                return Err(GhostError::StaleVote {
                    previous: previous.key,
                    attempted: key,
                })
            }
            None if self.votes.len() >= self.vote_max => {
                return Err(GhostError::VoteCapacityExhausted {
                    vote_max: self.vote_max,
                })
            }
            _ => (),
        }

        if let Some(VoteRecord {
            stake: previous_stake,
            node: Some(previous_node),
            ..
        }) = previous
        {
            self.subtract_along_path(previous_node, previous_stake);
        }
        self.add_along_path(node, stake);

        self.votes.insert(
            *validator,
            VoteRecord {
                key,
                stake,
                node: Some(node),
            },
        );
        Ok(())
    }

    /// Re-weight every recorded vote with the validator's stake in `stake_table`.
    ///
    /// Each live vote's path loses the stake it was counted with and gains the validator's new
    /// stake. Validators absent from `stake_table` lose their vote record entirely, which also frees
    /// their place among the `vote_max` tracked voters.
    pub fn rebase_stakes(&mut self, stake_table: &StakeTable) {
        let records: Vec<(VerifyingKey, VoteRecord)> =
            self.votes.iter().map(|(k, v)| (*k, *v)).collect();
        for (validator, record) in records {
            let new_stake = stake_table.stake(&validator);
            if let Some(node) = record.node {
                if new_stake == Some(record.stake) {
                    continue;
                }
                self.subtract_along_path(node, record.stake);
                if let Some(new_stake) = new_stake {
                    self.add_along_path(node, new_stake);
                }
            }
            match new_stake {
                Some(stake) => {
                    if let Some(record) = self.votes.get_mut(&validator) {
                        record.stake = stake;
                    }
                }
                None => {
                    self.votes.remove(&validator);
                }
            }
        }
    }

    /// Get the head of the heaviest chain, or `None` if the tree is empty.
    pub fn head(&self) -> Option<SlotHash> {
        let mut current = self.nodes.get(self.root?)?;
        loop {
            let heaviest = current
                .children
                .iter()
                .map(|child| self.node(*child))
                .max_by(|a, b| {
                    a.weight
                        .cmp(&b.weight)
                        // Lower slot, then smaller hash, wins a tie; so it has to compare as greater.
                        .then_with(|| b.key.cmp(&a.key))
                });
            match heaviest {
                Some(child) => current = child,
                None => return Some(current.key),
            }
        }
    }

    /// Make `new_root_key` the root and discard every node that does not descend from it.
    ///
    /// Votes for discarded nodes stop contributing weight. If the discarded node is above the new
    /// root's slot, the validator's latest voted slot is remembered so that vote monotonicity still
    /// holds; otherwise the vote record is dropped.
    ///
    /// Returns the keys of the discarded nodes in ascending order.
    pub fn prune(&mut self, new_root_key: SlotHash) -> Result<Vec<SlotHash>, GhostError> {
        let new_root = *self
            .node_map
            .get(&new_root_key)
            .ok_or(GhostError::UnknownKey { key: new_root_key })?;

        let mut keep = HashSet::new();
        let mut stack = vec![new_root];
        while let Some(handle) = stack.pop() {
            keep.insert(handle);
            stack.extend(self.node(handle).children.iter().copied());
        }

        let mut pruned = Vec::new();
        for handle in self.nodes.handles() {
            if keep.contains(&handle) {
                continue;
            }
            if let Some(node) = self.nodes.remove(handle) {
                self.node_map.remove(&node.key);
                pruned.push(node.key);
            }
        }

        for record in self.votes.values_mut() {
            if let Some(node) = record.node {
                if !keep.contains(&node) {
                    record.node = None;
                }
            }
        }
        // Every live node is at or above the new root's slot, so a record below it can no longer
        // make a later vote stale.
        self.votes
            .retain(|_, record| record.node.is_some() || record.key.slot >= new_root_key.slot);

        self.node_mut(new_root).parent = None;
        self.root = Some(new_root);

        pruned.sort();
        Ok(pruned)
    }

    /// Get the aggregated subtree weight of `key`.
    pub fn weight(&self, key: &SlotHash) -> Option<TotalStake> {
        self.query(key).map(|node| node.weight)
    }

    /// Get the stake voted directly for `key`.
    pub fn stake(&self, key: &SlotHash) -> Option<TotalStake> {
        self.query(key).map(|node| node.stake)
    }

    pub fn query(&self, key: &SlotHash) -> Option<&GhostNode> {
        self.nodes.get(*self.node_map.get(key)?)
    }

    pub fn contains(&self, key: &SlotHash) -> bool {
        self.node_map.contains_key(key)
    }

    pub fn root(&self) -> Option<SlotHash> {
        self.nodes.get(self.root?).map(|node| node.key)
    }

    /// Get the key of `key`'s parent, if `key` is in the tree and is not the root.
    pub fn parent(&self, key: &SlotHash) -> Option<SlotHash> {
        let parent = self.query(key)?.parent?;
        self.nodes.get(parent).map(|node| node.key)
    }

    /// Get every node in `slot`.
    ///
    /// The tree itself accepts several blocks per slot. Under [`Bft`](crate::bft::Bft) there is at
    /// most one, since the fork pool holds a single fork per slot.
    pub fn query_slot(&self, slot: Slot) -> Vec<SlotHash> {
        let mut keys: Vec<SlotHash> = self
            .node_map
            .keys()
            .filter(|key| key.slot == slot)
            .copied()
            .collect();
        keys.sort();
        keys
    }

    /// Check whether `ancestor` is `descendant` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: &SlotHash, descendant: &SlotHash) -> bool {
        let mut cursor = Some(*descendant);
        while let Some(key) = cursor {
            if key == *ancestor {
                return true;
            }
            if key.slot < ancestor.slot {
                return false;
            }
            cursor = self.parent(&key);
        }
        false
    }

    /// Get the key and stake of `validator`'s latest vote.
    pub fn latest_vote(&self, validator: &VerifyingKey) -> Option<(SlotHash, Stake)> {
        self.votes
            .get(validator)
            .map(|record| (record.key, record.stake))
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of distinct validators that have voted.
    pub fn voter_count(&self) -> usize {
        self.votes.len()
    }

    /// Recompute every node's stake and weight from the recorded votes and compare them with the
    /// incrementally maintained values.
    pub fn verify_integrity(&self) -> Result<(), GhostError> {
        let mut expected_stake: HashMap<NodeHandle, TotalStake> = HashMap::new();
        for record in self.votes.values() {
            if let Some(node) = record.node {
                *expected_stake.entry(node).or_default() += record.stake;
            }
        }

        for (handle, node) in self.nodes.iter() {
            let expected = expected_stake.get(&handle).copied().unwrap_or_default();
            if node.stake != expected {
                return Err(GhostError::WeightMismatch {
                    key: node.key,
                    expected,
                    actual: node.stake,
                });
            }

            let mut expected_weight = node.stake;
            for child in &node.children {
                expected_weight += self.node(*child).weight;
            }
            if node.weight != expected_weight {
                return Err(GhostError::WeightMismatch {
                    key: node.key,
                    expected: expected_weight,
                    actual: node.weight,
                });
            }
        }
        Ok(())
    }

    fn add_along_path(&mut self, from: NodeHandle, stake: Stake) {
        self.node_mut(from).stake += stake;
        let mut cursor = Some(from);
        while let Some(handle) = cursor {
            let node = self.node_mut(handle);
            node.weight += stake;
            cursor = node.parent;
        }
    }

    fn subtract_along_path(&mut self, from: NodeHandle, stake: Stake) {
        let node = self.node_mut(from);
        let key = node.key;
        node.stake = node
            .stake
            .checked_sub(stake)
            .unwrap_or_else(|| weight_conservation_violated(key));
        let mut cursor = Some(from);
        while let Some(handle) = cursor {
            let node = self.node_mut(handle);
            let key = node.key;
            node.weight = node
                .weight
                .checked_sub(stake)
                .unwrap_or_else(|| weight_conservation_violated(key));
            cursor = node.parent;
        }
    }

    // Handles stored inside the tree (root, parent and child links, the node map) always resolve:
    // nodes are only removed by `prune`, which removes every link to them in the same call.
    fn node(&self, handle: NodeHandle) -> &GhostNode {
        self.nodes
            .get(handle)
            .expect("ghost tree links only to live nodes")
    }

    fn node_mut(&mut self, handle: NodeHandle) -> &mut GhostNode {
        self.nodes
            .get_mut(handle)
            .expect("ghost tree links only to live nodes")
    }

    pub(crate) fn to_image(&self) -> GhostImage {
        let mut node_map: Vec<(SlotHash, NodeHandle)> =
            self.node_map.iter().map(|(k, v)| (*k, *v)).collect();
        node_map.sort();
        let mut votes: Vec<(VerifyingKeyBytes, VoteRecord)> = self
            .votes
            .iter()
            .map(|(validator, record)| (validator.to_bytes(), *record))
            .collect();
        votes.sort_by(|a, b| a.0.cmp(&b.0));

        GhostImage {
            nodes: self.nodes.clone(),
            node_map,
            votes,
            vote_max: self.vote_max as u64,
            root: self.root,
        }
    }
}

impl PartialEq for Ghost {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
            && self.node_map == other.node_map
            && self.votes == other.votes
            && self.vote_max == other.vote_max
            && self.root == other.root
    }
}

// A weight going negative means a subtraction was not matched by an earlier addition: the tree no
// longer reflects the votes it has seen. Continuing would risk voting on a wrong head.
fn weight_conservation_violated(key: SlotHash) -> ! {
    panic!(
        "ghost weight conservation violated at slot {}: subtracted more stake than was added",
        key.slot
    )
}

/// Intermediate representation of [`Ghost`] for serialization into a
/// [`ConsensusImage`](crate::snapshot::ConsensusImage).
///
/// Replaces `VerifyingKey`s by their bytes, since `VerifyingKey` does not implement borsh.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct GhostImage {
    nodes: Arena<GhostNode>,
    node_map: Vec<(SlotHash, NodeHandle)>,
    votes: Vec<(VerifyingKeyBytes, VoteRecord)>,
    vote_max: u64,
    root: Option<NodeHandle>,
}

impl TryFrom<GhostImage> for Ghost {
    type Error = ed25519_dalek::SignatureError;

    fn try_from(value: GhostImage) -> Result<Self, Self::Error> {
        let mut votes = HashMap::with_capacity(value.votes.len());
        for (validator_bytes, record) in value.votes {
            votes.insert(VerifyingKey::from_bytes(&validator_bytes)?, record);
        }
        Ok(Ghost {
            nodes: value.nodes,
            node_map: value.node_map.into_iter().collect(),
            votes,
            vote_max: value.vote_max as usize,
            root: value.root,
        })
    }
}

/// Enumerates the ways an operation on [`Ghost`] can fail.
#[derive(Debug, PartialEq, Eq)]
pub enum GhostError {
    /// The block is already in the tree.
    NodeExists { key: SlotHash },

    /// Tried to insert a second root.
    RootExists { key: SlotHash },

    /// The parent must be inserted before the child.
    UnknownParent {
        key: SlotHash,
        parent_key: SlotHash,
    },

    /// A block must be in a later slot than its parent.
    SlotNotAfterParent {
        key: SlotHash,
        parent_key: SlotHash,
    },

    /// The voted (or requested) block is not in the tree, either because it was never inserted or
    /// because it has been pruned.
    UnknownKey { key: SlotHash },

    /// The vote's slot is not higher than the validator's previous vote's slot.
    StaleVote {
        previous: SlotHash,
        attempted: SlotHash,
    },

    /// All `node_max` nodes are in use.
    NodeCapacityExhausted { node_max: usize },

    /// `vote_max` distinct validators have already voted.
    VoteCapacityExhausted { vote_max: usize },

    /// [`Ghost::verify_integrity`] found a node whose stake or weight does not match its votes.
    WeightMismatch {
        key: SlotHash,
        expected: TotalStake,
        actual: TotalStake,
    },
}
