//! Incremental Merkle tree
//!
//! Generic over the node type and the rule that combines two children into a
//! parent. Every level is kept in one flat vector (leaves first, root last) and
//! a dirty mask records which part of the tree is stale:
//!
//! - `LEFT_INVALID`: only leaf 0 changed; the leftmost spine is recomputed.
//! - `RIGHT_INVALID`: leaves were appended; the tree is rebuilt.
//! - `CENTER_INVALID`: an interior leaf changed; the tree is rebuilt.
//!
//! A level of odd width pairs its last node with itself.

use crate::error::{ConsensusError, Result};
use crate::hash::{double_sha256_parts, Sha256Hash};

pub const LEFT_INVALID: u8 = 0b001;
pub const RIGHT_INVALID: u8 = 0b010;
pub const CENTER_INVALID: u8 = 0b100;

/// Combines two sibling nodes into their parent. `level` is the level of the
/// children (0 for leaves); `total_levels` counts every level including the root.
pub trait NodeCombiner<D> {
    fn combine(&self, level: usize, total_levels: usize, left: &D, right: &D) -> D;
}

impl<D, F> NodeCombiner<D> for F
where
    F: Fn(usize, usize, &D, &D) -> D,
{
    fn combine(&self, level: usize, total_levels: usize, left: &D, right: &D) -> D {
        self(level, total_levels, left, right)
    }
}

/// Bitcoin's rule: double SHA-256 over both children in wire order, read back
/// into display order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcoinCombiner;

impl NodeCombiner<Sha256Hash> for BitcoinCombiner {
    fn combine(&self, _level: usize, _total: usize, left: &Sha256Hash, right: &Sha256Hash) -> Sha256Hash {
        Sha256Hash::from_wire(double_sha256_parts(&[&left.to_wire(), &right.to_wire()]))
    }
}

pub type BitcoinMerkleTree = MerkleTree<Sha256Hash, BitcoinCombiner>;

/// Number of levels, root included, of a tree over `leaf_count` leaves.
pub fn level_count(leaf_count: usize) -> usize {
    if leaf_count == 0 {
        return 0;
    }
    let mut levels = 1;
    let mut width = leaf_count;
    while width > 1 {
        width = (width + 1) / 2;
        levels += 1;
    }
    levels
}

fn node_count(leaf_count: usize) -> usize {
    let mut total = leaf_count;
    let mut width = leaf_count;
    while width > 1 {
        width = (width + 1) / 2;
        total += width;
    }
    total
}

#[derive(Debug, Clone)]
pub struct MerkleTree<D, C> {
    combiner: C,
    nodes: Vec<D>,
    leaf_count: usize,
    dirty: u8,
}

impl<D: Clone, C: NodeCombiner<D>> MerkleTree<D, C> {
    pub fn new(combiner: C) -> Self {
        MerkleTree { combiner, nodes: Vec::new(), leaf_count: 0, dirty: 0 }
    }

    pub fn with_leaves(combiner: C, leaves: impl IntoIterator<Item = D>) -> Self {
        let nodes: Vec<D> = leaves.into_iter().collect();
        let leaf_count = nodes.len();
        MerkleTree { combiner, nodes, leaf_count, dirty: RIGHT_INVALID }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    pub fn dirty_mask(&self) -> u8 {
        self.dirty
    }

    pub fn leaves(&self) -> &[D] {
        &self.nodes[..self.leaf_count]
    }

    /// Append a leaf.
    pub fn add_node(&mut self, node: D) {
        self.nodes.truncate(self.leaf_count);
        self.nodes.push(node);
        self.leaf_count += 1;
        self.dirty |= RIGHT_INVALID;
    }

    /// Replace leaf 0, the coinbase slot.
    pub fn set_first_node(&mut self, node: D) -> Result<()> {
        if self.leaf_count == 0 {
            return Err(ConsensusError::IllegalState(
                "Cannot replace the first node of an empty tree".to_string(),
            ));
        }
        self.nodes[0] = node;
        self.dirty |= LEFT_INVALID;
        Ok(())
    }

    pub fn set_node(&mut self, index: usize, node: D) -> Result<()> {
        if index == 0 {
            return self.set_first_node(node);
        }
        if index >= self.leaf_count {
            return Err(ConsensusError::IllegalState(format!(
                "Leaf {} out of range ({} leaves)",
                index, self.leaf_count
            )));
        }
        self.nodes[index] = node;
        self.dirty |= CENTER_INVALID;
        Ok(())
    }

    pub fn root(&mut self) -> Option<D> {
        self.make_valid();
        self.nodes.last().cloned()
    }

    /// Node at `index` of the flat level-by-level layout.
    pub fn node(&mut self, index: usize) -> Option<D> {
        self.make_valid();
        self.nodes.get(index).cloned()
    }

    /// Number of nodes across every level.
    pub fn size(&mut self) -> usize {
        self.make_valid();
        self.nodes.len()
    }

    /// Authentication path of leaf `index`: its sibling at each level, leaves up.
    pub fn branch(&mut self, index: usize) -> Result<Vec<D>> {
        if index >= self.leaf_count {
            return Err(ConsensusError::IllegalState(format!(
                "Leaf {} out of range ({} leaves)",
                index, self.leaf_count
            )));
        }
        self.make_valid();

        let mut branch = Vec::with_capacity(level_count(self.leaf_count));
        let mut start = 0;
        let mut width = self.leaf_count;
        let mut position = index;
        while width > 1 {
            let sibling = (position ^ 1).min(width - 1);
            branch.push(self.nodes[start + sibling].clone());
            start += width;
            width = (width + 1) / 2;
            position >>= 1;
        }
        Ok(branch)
    }

    fn make_valid(&mut self) {
        if self.dirty & (CENTER_INVALID | RIGHT_INVALID) != 0
            || self.nodes.len() != node_count(self.leaf_count)
        {
            self.build();
        } else if self.dirty & LEFT_INVALID != 0 {
            self.recalculate_left();
        }
        self.dirty = 0;
    }

    fn build(&mut self) {
        self.nodes.truncate(self.leaf_count);
        self.nodes.reserve(node_count(self.leaf_count) - self.leaf_count);
        let total_levels = level_count(self.leaf_count);

        let mut start = 0;
        let mut width = self.leaf_count;
        let mut level = 0;
        while width > 1 {
            for i in (0..width).step_by(2) {
                let right = (i + 1).min(width - 1);
                let parent = self.combiner.combine(
                    level,
                    total_levels,
                    &self.nodes[start + i],
                    &self.nodes[start + right],
                );
                self.nodes.push(parent);
            }
            start += width;
            width = (width + 1) / 2;
            level += 1;
        }
    }

    /// Recompute only the leftmost node of every level.
    fn recalculate_left(&mut self) {
        let total_levels = level_count(self.leaf_count);
        let mut start = 0;
        let mut width = self.leaf_count;
        let mut level = 0;
        while width > 1 {
            let right = 1.min(width - 1);
            let parent = self.combiner.combine(
                level,
                total_levels,
                &self.nodes[start],
                &self.nodes[start + right],
            );
            start += width;
            self.nodes[start] = parent;
            width = (width + 1) / 2;
            level += 1;
        }
    }
}

/// Fold a leaf up its authentication path to the root it commits to.
pub fn root_from_branch<D: Clone, C: NodeCombiner<D>>(
    combiner: &C,
    leaf: &D,
    index: usize,
    branch: &[D],
) -> D {
    let total_levels = branch.len() + 1;
    let mut node = leaf.clone();
    let mut position = index;
    for (level, sibling) in branch.iter().enumerate() {
        node = if position & 1 == 1 {
            combiner.combine(level, total_levels, sibling, &node)
        } else {
            combiner.combine(level, total_levels, &node, sibling)
        };
        position >>= 1;
    }
    node
}

/// Merkle root of a list of transaction hashes; `None` for an empty list.
pub fn merkle_root(hashes: &[Sha256Hash]) -> Option<Sha256Hash> {
    MerkleTree::with_leaves(BitcoinCombiner, hashes.iter().copied()).root()
}
