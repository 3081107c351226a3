//! Constant-time lowest-common-ancestor queries over a fixed tree.
//!
//! Built from an Euler tour of the tree plus a sparse table of range
//! minima over tour depths: `O(n log n)` preprocessing, `O(1)` per query.
//! The index is only valid for the exact `Tree` it was built from; it is
//! used before a tree enters the mutable search (cluster-point discovery,
//! structural pre-analysis) and never rebuilt mid-search.

use crate::tree::{Node, Tree};

/// Precomputed LCA index over one [`Tree`].
#[derive(Debug, Clone)]
pub struct LcaIndex {
    /// First position of each node in the Euler tour.
    first: Vec<usize>,
    /// The Euler tour itself.
    euler: Vec<Node>,
    /// Depth of each tour entry.
    depth: Vec<usize>,
    /// `table[j][i]`: tour position of the minimum depth in `[i, i + 2^j)`.
    table: Vec<Vec<usize>>,
}

impl LcaIndex {
    /// Build the index. Preprocessing is `O(n log n)`.
    pub fn new(tree: &Tree) -> Self {
        let n = tree.node_count();
        let mut first = vec![usize::MAX; n];
        let mut euler = Vec::with_capacity(2 * n);
        let mut depth = Vec::with_capacity(2 * n);

        // Iterative Euler tour: re-visit a node after each child subtree.
        let mut stack = vec![(tree.root(), 0usize)];
        while let Some((node, d)) = stack.pop() {
            if first[node.id()] == usize::MAX {
                first[node.id()] = euler.len();
            }
            euler.push(node);
            depth.push(d);
            if first[node.id()] == euler.len() - 1 {
                if let Some((l, r)) = tree.node(node).children {
                    // Visit left, come back, visit right, come back.
                    stack.push((r, d + 1));
                    stack.push((node, d));
                    stack.push((l, d + 1));
                }
            }
        }

        let m = euler.len();
        let levels = usize::BITS as usize - m.leading_zeros() as usize;
        let mut table = Vec::with_capacity(levels);
        table.push((0..m).collect::<Vec<_>>());
        let mut j = 1;
        while (1 << j) <= m {
            let prev = &table[j - 1];
            let mut row = Vec::with_capacity(m - (1 << j) + 1);
            for i in 0..=(m - (1 << j)) {
                let a = prev[i];
                let b = prev[i + (1 << (j - 1))];
                row.push(if depth[a] <= depth[b] { a } else { b });
            }
            table.push(row);
            j += 1;
        }

        LcaIndex {
            first,
            euler,
            depth,
            table,
        }
    }

    /// The lowest common ancestor of `a` and `b` in `O(1)`.
    ///
    /// Both nodes must belong to the indexed tree, unmutated since
    /// construction.
    pub fn lca(&self, a: Node, b: Node) -> Node {
        let (mut lo, mut hi) = (self.first[a.id()], self.first[b.id()]);
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }
        let span = hi - lo + 1;
        let j = usize::BITS as usize - span.leading_zeros() as usize - 1;
        let x = self.table[j][lo];
        let y = self.table[j][hi + 1 - (1 << j)];
        self.euler[if self.depth[x] <= self.depth[y] { x } else { y }]
    }

    /// Whether `a` is an ancestor of (or equal to) `b`.
    pub fn is_ancestor(&self, a: Node, b: Node) -> bool {
        self.lca(a, b) == a
    }
}
