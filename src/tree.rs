//! Arena-based rooted binary tree with integer leaf labels.
//!
//! # Overview
//! Input trees are parsed by `phylotree` and immediately converted into this
//! compact representation: one `Vec` of nodes, parent/child edges stored as
//! indices. All later stages (LCA index, forests, the search engine) address
//! nodes by index, which keeps backtracking records trivially serializable.
//!
//! A `Tree` is immutable once built; the mutable search substrate is
//! [`crate::forest::Forest`], which copies the arena on construction.

use crate::labels::{Label, LabelMap};
use phylotree::tree::{Tree as PhyloTree, TreeError};
use thiserror::Error;

/// Index of a node inside a tree or forest arena.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Node(pub(crate) usize);

impl Node {
    /// Access the raw arena index of this node.
    pub fn id(self) -> usize {
        self.0
    }
}

/// Errors raised while converting a parsed tree into the arena model.
#[derive(Error, Debug)]
pub enum TreeBuildError {
    /// An internal node does not have exactly two children.
    #[error("input tree is not binary (node with {0} children)")]
    NotBinary(usize),
    /// A leaf has no name to translate into a label.
    #[error("leaf without a label")]
    UnlabeledLeaf,
    /// The underlying phylotree structure was malformed.
    #[error(transparent)]
    Phylo(#[from] TreeError),
}

/// The data associated with one tree node.
#[derive(Clone, Debug)]
pub struct TreeNode {
    pub parent: Option<Node>,
    /// Exactly two children for internal nodes, `None` for leaves.
    pub children: Option<(Node, Node)>,
    /// Leaf label; internal nodes carry no label.
    pub label: Option<Label>,
    /// Position in the last preorder numbering pass. Invalidated by any
    /// structural change; refresh with [`Tree::preorder_number`].
    pub preorder: usize,
}

/// A rooted binary tree over integer leaf labels.
#[derive(Clone, Debug)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    root: Node,
}

impl Tree {
    /// Convert a parsed `phylotree` tree, translating leaf names through
    /// `labels`. Fails unless every internal node is binary.
    pub fn from_phylo(tree: &PhyloTree, labels: &mut LabelMap) -> Result<Self, TreeBuildError> {
        let root_id = tree.get_root()?;
        let mut nodes = Vec::new();
        let root = Self::convert(tree, root_id, None, labels, &mut nodes)?;
        let mut out = Tree { nodes, root };
        out.preorder_number();
        Ok(out)
    }

    fn convert(
        tree: &PhyloTree,
        id: usize,
        parent: Option<Node>,
        labels: &mut LabelMap,
        nodes: &mut Vec<TreeNode>,
    ) -> Result<Node, TreeBuildError> {
        let phylo = tree.get(&id)?;
        let this = Node(nodes.len());
        nodes.push(TreeNode {
            parent,
            children: None,
            label: None,
            preorder: 0,
        });
        match phylo.children.len() {
            0 => {
                let name = phylo.name.as_deref().ok_or(TreeBuildError::UnlabeledLeaf)?;
                nodes[this.0].label = Some(labels.intern(name));
            }
            2 => {
                let l = Self::convert(tree, phylo.children[0], Some(this), labels, nodes)?;
                let r = Self::convert(tree, phylo.children[1], Some(this), labels, nodes)?;
                nodes[this.0].children = Some((l, r));
            }
            n => return Err(TreeBuildError::NotBinary(n)),
        }
        Ok(this)
    }

    /// Build directly from an arena. Used by the rooting enumerator and by
    /// tests; callers are responsible for structural validity.
    pub(crate) fn from_arena(nodes: Vec<TreeNode>, root: Node) -> Self {
        let mut out = Tree { nodes, root };
        out.preorder_number();
        out
    }

    pub fn root(&self) -> Node {
        self.root
    }

    pub fn node(&self, n: Node) -> &TreeNode {
        &self.nodes[n.0]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_leaf(&self, n: Node) -> bool {
        self.nodes[n.0].children.is_none()
    }

    /// Lazy, restartable iterator over the leaves in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, d)| d.children.is_none())
            .map(|(i, _)| Node(i))
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    /// Assign preorder indices by a depth-first pass from the root.
    /// Must be re-run before indices are compared after any rebuild.
    pub fn preorder_number(&mut self) {
        let mut next = 0;
        let mut stack = vec![self.root];
        while let Some(n) = stack.pop() {
            self.nodes[n.0].preorder = next;
            next += 1;
            if let Some((l, r)) = self.nodes[n.0].children {
                stack.push(r);
                stack.push(l);
            }
        }
    }

    /// Render the subtree under `node` in Newick-like form (no lengths).
    pub fn subtree_string(&self, node: Node, labels: &LabelMap) -> String {
        match self.nodes[node.0].children {
            None => labels.name(self.nodes[node.0].label.expect("leaf has label")).to_string(),
            Some((l, r)) => format!(
                "({},{})",
                self.subtree_string(l, labels),
                self.subtree_string(r, labels)
            ),
        }
    }

    /// Render the whole tree.
    pub fn newick(&self, labels: &LabelMap) -> String {
        self.subtree_string(self.root, labels)
    }

    /// Enumerate every rooting of this tree's underlying unrooted topology.
    ///
    /// The current root is suppressed, and for each of the `2n - 3` edges of
    /// the unrooted tree a fresh `Tree` rooted on that edge is produced.
    /// Only the unrooted-comparison driver consumes this; the exact search
    /// never re-roots.
    pub fn rootings(&self) -> impl Iterator<Item = Tree> + '_ {
        let (adj, edges) = self.unrooted_edges();
        let this = self;
        let mut fallback = edges.is_empty();
        let mut iter = edges.into_iter();
        std::iter::from_fn(move || {
            if fallback {
                fallback = false;
                return Some(this.clone());
            }
            let (u, v) = iter.next()?;
            Some(this.rooted_on(&adj, u, v))
        })
    }

    /// Adjacency of the unrooted topology (root suppressed) and its edge
    /// list, each edge listed once.
    fn unrooted_edges(&self) -> (Vec<Vec<Node>>, Vec<(Node, Node)>) {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        let mut edges = Vec::new();
        for (i, data) in self.nodes.iter().enumerate() {
            if let Some((l, r)) = data.children {
                if Node(i) == self.root {
                    // Suppress the root: connect its children directly.
                    adj[l.0].push(r);
                    adj[r.0].push(l);
                    edges.push((l, r));
                } else {
                    for c in [l, r] {
                        adj[i].push(c);
                        adj[c.0].push(Node(i));
                        edges.push((Node(i), c));
                    }
                }
            }
        }
        (adj, edges)
    }

    /// Build the rooted tree obtained by subdividing edge `(u, v)` with a
    /// new root.
    fn rooted_on(&self, adj: &[Vec<Node>], u: Node, v: Node) -> Tree {
        let mut nodes = Vec::new();
        let root = Node(0);
        nodes.push(TreeNode {
            parent: None,
            children: None,
            label: None,
            preorder: 0,
        });
        let left = self.orient(adj, u, v, root, &mut nodes);
        let right = self.orient(adj, v, u, root, &mut nodes);
        nodes[root.0].children = Some((left, right));
        Tree::from_arena(nodes, root)
    }

    /// Copy the subtree hanging from `at` when approached from `from`,
    /// re-orienting edges away from the new root.
    fn orient(
        &self,
        adj: &[Vec<Node>],
        at: Node,
        from: Node,
        parent: Node,
        nodes: &mut Vec<TreeNode>,
    ) -> Node {
        let this = Node(nodes.len());
        nodes.push(TreeNode {
            parent: Some(parent),
            children: None,
            label: self.nodes[at.0].label,
            preorder: 0,
        });
        let next: Vec<Node> = adj[at.0].iter().copied().filter(|&n| n != from).collect();
        if let [a, b] = next[..] {
            let l = self.orient(adj, a, at, this, nodes);
            let r = self.orient(adj, b, at, this, nodes);
            nodes[this.0].children = Some((l, r));
        }
        this
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_tree;

    #[test]
    fn converts_and_numbers_preorder() {
        let mut labels = LabelMap::new();
        let tree = parse_tree("((1,2),(3,4))", &mut labels).unwrap();
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.node(tree.root()).preorder, 0);
        // Preorder of a child is strictly greater than its parent's.
        for leaf in tree.leaves() {
            let parent = tree.node(leaf).parent.unwrap();
            assert!(tree.node(leaf).preorder > tree.node(parent).preorder);
        }
    }

    #[test]
    fn rejects_multifurcations() {
        let mut labels = LabelMap::new();
        assert!(parse_tree("(1,2,3)", &mut labels).is_err());
    }

    #[test]
    fn roundtrips_newick() {
        let mut labels = LabelMap::new();
        let tree = parse_tree("((a,b),c)", &mut labels).unwrap();
        assert_eq!(tree.newick(&labels), "((a,b),c)");
    }

    #[test]
    fn enumerates_all_rootings() {
        let mut labels = LabelMap::new();
        let tree = parse_tree("((1,2),(3,4))", &mut labels).unwrap();
        let rootings: Vec<Tree> = tree.rootings().collect();
        // 2n - 3 rootings for n = 4 leaves.
        assert_eq!(rootings.len(), 5);
        for r in &rootings {
            assert_eq!(r.leaf_count(), 4);
        }
        // The original rooting is among them.
        assert!(
            rootings
                .iter()
                .any(|r| r.newick(&labels) == "((1,2),(3,4))")
        );
    }
}
