// File: torrentree-merkle/src/lib.rs
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use torrentree_hash::{Digest, Hasher};
use tracing::{debug, trace};

// Levels narrower than this are hashed sequentially.
const PAR_LEVEL_MIN: usize = 64;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("a merkle tree needs at least one leaf")]
    EmptyLeaves,
    #[error("leaf index {index} out of range for {leaves} leaves")]
    LeafOutOfRange { index: usize, leaves: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Position of a node: `level` 0 holds the leaves, the last level holds the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub level: usize,
    pub index: usize,
}

impl NodeRef {
    pub const fn new(level: usize, index: usize) -> Self {
        Self { level, index }
    }

    pub const fn parent(&self) -> Self {
        Self {
            level: self.level + 1,
            index: self.index / 2,
        }
    }

    /// Display label in a tree of `height` levels: `ROOT`, `P<n>` for leaves (1-based), `N<level>-<index>`.
    pub fn label(&self, height: usize) -> String {
        if self.level + 1 == height {
            "ROOT".to_owned()
        } else if self.level == 0 {
            format!("P{}", self.index + 1)
        } else {
            format!("N{}-{}", self.level, self.index)
        }
    }
}

/// Merkle tree stored level by level, leaves first.
///
/// Node `i` of level `L` is `digest(level[L-1][2i] || level[L-1][2i+1])`. A level with an
/// odd number of nodes pairs its last node with itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    pub fn build<H: Hasher + Sync>(hasher: &H, leaves: &[Digest]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(Error::EmptyLeaves);
        }
        let mut levels = Vec::new();
        let mut current = leaves.to_vec();
        while current.len() > 1 {
            let next = next_level(hasher, &current);
            trace!(level = levels.len() + 1, nodes = next.len(), "built level");
            levels.push(std::mem::replace(&mut current, next));
        }
        levels.push(current);
        let tree = Self { levels };
        debug!(
            leaves = leaves.len(),
            height = tree.height(),
            root = %tree.root().short(16),
            "built merkle tree"
        );
        Ok(tree)
    }

    pub fn levels(&self) -> &[Vec<Digest>] {
        &self.levels
    }
    pub fn level(&self, level: usize) -> Option<&[Digest]> {
        self.levels.get(level).map(Vec::as_slice)
    }
    /// Number of levels, leaves and root included.
    pub fn height(&self) -> usize {
        self.levels.len()
    }
    pub fn leaves(&self) -> &[Digest] {
        &self.levels[0]
    }
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }
    pub fn root(&self) -> Digest {
        self.levels[self.levels.len() - 1][0]
    }
    pub fn node(&self, node: NodeRef) -> Option<Digest> {
        self.levels.get(node.level)?.get(node.index).copied()
    }

    /// Children a node was hashed from. The right child repeats the left one past the level end.
    pub fn children(&self, node: NodeRef) -> Option<(NodeRef, NodeRef)> {
        if node.level == 0 {
            return None;
        }
        self.node(node)?;
        let below = self.levels[node.level - 1].len();
        let left = 2 * node.index;
        let right = if left + 1 < below { left + 1 } else { left };
        Some((
            NodeRef::new(node.level - 1, left),
            NodeRef::new(node.level - 1, right),
        ))
    }

    /// Every node from `leaf` up to and including the root.
    pub fn path_to_root(&self, leaf: usize) -> Result<AncestorPath> {
        if leaf >= self.leaf_count() {
            return Err(Error::LeafOutOfRange {
                index: leaf,
                leaves: self.leaf_count(),
            });
        }
        Ok(AncestorPath::from_shape(leaf, self.height()))
    }
}

fn next_level<H: Hasher + Sync>(hasher: &H, level: &[Digest]) -> Vec<Digest> {
    let parent = |pair: &[Digest]| {
        let left = &pair[0];
        let right = pair.get(1).unwrap_or(left);
        hasher.digest_pair(left, right)
    };
    if level.len() >= PAR_LEVEL_MIN {
        level.par_chunks(2).map(parent).collect()
    } else {
        level.chunks(2).map(parent).collect()
    }
}

/// The ancestor chain of one leaf: the nodes a piece's integrity is explained through.
///
/// This is the full column of ancestors, not a sibling-only inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AncestorPath {
    nodes: Vec<NodeRef>,
}

impl AncestorPath {
    /// Path for `leaf` in a tree of `height` levels, computed from the shape alone.
    pub fn from_shape(leaf: usize, height: usize) -> Self {
        let mut nodes = Vec::with_capacity(height);
        let mut node = NodeRef::new(0, leaf);
        while node.level < height {
            nodes.push(node);
            node = node.parent();
        }
        Self { nodes }
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn leaf(&self) -> Option<NodeRef> {
        self.nodes.first().copied()
    }
    pub fn contains(&self, level: usize, index: usize) -> bool {
        self.nodes.get(level).is_some_and(|n| n.index == index)
    }
    pub fn iter(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.iter()
    }

    /// Digests of the path's nodes in `tree`, leaf first.
    pub fn digests(&self, tree: &MerkleTree) -> Vec<Digest> {
        self.nodes.iter().filter_map(|n| tree.node(*n)).collect()
    }
}
