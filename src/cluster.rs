//! Cluster decomposition: split one large instance into independent
//! smaller ones.
//!
//! A *cluster point* is a pair of nodes, one per tree, whose subtrees
//! carry exactly the same leaf-label set (a shared clade). Each maximal
//! cluster point is replaced in both forests by a placeholder leaf with a
//! fresh label; the detached subtree pairs become independent instances,
//! each solved with its own root handle through the same
//! approximation-plus-search pipeline. The root remainder is solved last,
//! solved pieces are substituted back through `join_cluster`, and the
//! partial distances sum to the total.
//!
//! The FPT search cost is dominated by the largest single cluster's own
//! budget, not the sum over all leaves, which is the whole point of the
//! exercise.

use crate::forest::{sync_twins, Forest};
use crate::labels::{Label, LabelMap};
use crate::lca::LcaIndex;
use crate::search::{solve, Config};
use crate::tree::{Node, Tree};
use std::collections::HashMap;

/// Result of [`decompose_and_solve`].
#[derive(Debug)]
pub struct Decomposition {
    /// The exact rSPR distance of the input pair.
    pub distance: usize,
    /// The rejoined maximum agreement forest of tree 1.
    pub forest_a: Forest,
    /// The rejoined maximum agreement forest of tree 2.
    pub forest_b: Forest,
    /// Per-cluster exact distances, remainder last.
    pub cluster_distances: Vec<usize>,
    /// Set when the cluster count exceeded the configured maximum and the
    /// instance was solved without decomposition instead.
    pub fell_back: bool,
}

/// Find the maximal cluster points of the pair: internal non-root nodes of
/// `t1` whose clade is also a clade of `t2`, with no proper non-root
/// ancestor sharing the property. Pairs are returned in preorder of `t1`.
pub fn find_cluster_points(t1: &Tree, t2: &Tree) -> Vec<(Node, Node)> {
    let index2 = LcaIndex::new(t2);

    // Leaf label → node in t2.
    let mut leaf2: HashMap<Label, Node> = HashMap::new();
    for leaf in t2.leaves() {
        leaf2.insert(t2.node(leaf).label.expect("leaf has a label"), leaf);
    }

    // Bottom-up image of every t1 node in t2: leaves map by label,
    // internal nodes to the LCA of their children's images.
    let mut image: Vec<Option<Node>> = vec![None; t1.node_count()];
    let mut order: Vec<Node> = Vec::with_capacity(t1.node_count());
    let mut stack = vec![t1.root()];
    while let Some(n) = stack.pop() {
        order.push(n);
        if let Some((l, r)) = t1.node(n).children {
            stack.push(l);
            stack.push(r);
        }
    }
    for &n in order.iter().rev() {
        image[n.id()] = match t1.node(n).children {
            None => leaf2.get(&t1.node(n).label.expect("leaf")).copied(),
            Some((l, r)) => match (image[l.id()], image[r.id()]) {
                (Some(il), Some(ir)) => Some(index2.lca(il, ir)),
                _ => None,
            },
        };
    }

    let count1 = subtree_leaf_counts(t1);
    let count2 = subtree_leaf_counts(t2);
    let shared = |n: Node| -> bool {
        image[n.id()].is_some_and(|im| count1[n.id()] == count2[im.id()])
    };

    // Top-down sweep keeping only the maximal shared clades.
    let mut points = Vec::new();
    let mut sweep = vec![t1.root()];
    while let Some(n) = sweep.pop() {
        let is_point =
            n != t1.root() && t1.node(n).children.is_some() && shared(n);
        if is_point {
            points.push((n, image[n.id()].expect("shared clade has an image")));
        } else if let Some((l, r)) = t1.node(n).children {
            sweep.push(r);
            sweep.push(l);
        }
    }
    points.sort_by_key(|&(n, _)| t1.node(n).preorder);
    points
}

fn subtree_leaf_counts(tree: &Tree) -> Vec<usize> {
    let mut counts = vec![0usize; tree.node_count()];
    let mut order: Vec<Node> = Vec::with_capacity(tree.node_count());
    let mut stack = vec![tree.root()];
    while let Some(n) = stack.pop() {
        order.push(n);
        if let Some((l, r)) = tree.node(n).children {
            stack.push(l);
            stack.push(r);
        }
    }
    for &n in order.iter().rev() {
        counts[n.id()] = match tree.node(n).children {
            None => 1,
            Some((l, r)) => counts[l.id()] + counts[r.id()],
        };
    }
    counts
}

/// Decompose, solve every piece, and rejoin.
///
/// Placeholder labels are registered in `labels` so the rejoined forests
/// print with real taxa only. When the discovered cluster count exceeds
/// `cfg.max_clusters` the decomposition is abandoned and the instance is
/// solved whole; that is a recoverable condition, not an error.
pub fn decompose_and_solve(
    t1: &Tree,
    t2: &Tree,
    labels: &mut LabelMap,
    cfg: &Config,
) -> Decomposition {
    let points = find_cluster_points(t1, t2);
    let over_limit = cfg.max_clusters.is_some_and(|max| points.len() > max);
    if points.is_empty() || over_limit {
        let mut a = Forest::from_tree(t1);
        let mut b = Forest::from_tree(t2);
        sync_twins(&mut a, &mut b).expect("input trees share a leaf set");
        let d = solve(&mut a, &mut b, cfg);
        return Decomposition {
            distance: d,
            forest_a: a,
            forest_b: b,
            cluster_distances: vec![d],
            fell_back: over_limit,
        };
    }

    let mut book_a = Forest::from_tree_plain(t1);
    let mut book_b = Forest::from_tree_plain(t2);
    sync_twins(&mut book_a, &mut book_b).expect("input trees share a leaf set");

    // Replace each cluster point by a placeholder leaf; the detached
    // subtrees stay behind as bookkeeping components.
    let mut placeholder_labels = Vec::with_capacity(points.len());
    let mut detached = Vec::with_capacity(points.len());
    for (id, &(v1, v2)) in points.iter().enumerate() {
        let x = labels.fresh_placeholder();
        let d1 = book_a
            .add_cluster(v1, id, x)
            .expect("cluster points are never component roots");
        let d2 = book_b
            .add_cluster(v2, id, x)
            .expect("cluster points are never component roots");
        placeholder_labels.push(x);
        detached.push((d1, d2));
    }

    // Solve each piece as an independent ρ-augmented instance.
    let mut cluster_distances = Vec::with_capacity(points.len() + 1);
    let mut solved = Vec::with_capacity(points.len());
    let mut total = 0;
    for &(d1, d2) in &detached {
        let mut pa = Forest::from_subtree(&book_a, d1);
        let mut pb = Forest::from_subtree(&book_b, d2);
        sync_twins(&mut pa, &mut pb).expect("piece pair shares a leaf set");
        let d = solve(&mut pa, &mut pb, cfg);
        cluster_distances.push(d);
        total += d;
        solved.push((pa, pb));
    }

    // The component containing the original root is always solved last.
    let mut ra = Forest::from_subtree(&book_a, book_a.components()[0]);
    let mut rb = Forest::from_subtree(&book_b, book_b.components()[0]);
    sync_twins(&mut ra, &mut rb).expect("remainder pair shares a leaf set");
    let d = solve(&mut ra, &mut rb, cfg);
    cluster_distances.push(d);
    total += d;

    // Substitute the solved pieces back into the remainder's forest at
    // their placeholders.
    for (id, &x) in placeholder_labels.iter().enumerate() {
        let na = ra.find_label(x).expect("placeholder survives the search");
        ra.register_cluster(id, na);
        let nb = rb.find_label(x).expect("placeholder survives the search");
        rb.register_cluster(id, nb);
        let (pa, pb) = &solved[id];
        ra.join_cluster(id, pa).expect("cluster id registered");
        rb.join_cluster(id, pb).expect("cluster id registered");
    }

    // Move the rejoined components into the bookkeeping forests and drop
    // the now-stale bookkeeping components.
    let stale_a = book_a.num_components();
    book_a.absorb(&ra);
    book_a.erase_components(0..stale_a);
    let stale_b = book_b.num_components();
    book_b.absorb(&rb);
    book_b.erase_components(0..stale_b);

    Decomposition {
        distance: total,
        forest_a: book_a,
        forest_b: book_b,
        cluster_distances,
        fell_back: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_tree;

    fn trees(n1: &str, n2: &str) -> (Tree, Tree, LabelMap) {
        let mut labels = LabelMap::new();
        let t1 = parse_tree(n1, &mut labels).unwrap();
        let t2 = parse_tree(n2, &mut labels).unwrap();
        (t1, t2, labels)
    }

    fn direct_distance(t1: &Tree, t2: &Tree) -> usize {
        let mut a = Forest::from_tree(t1);
        let mut b = Forest::from_tree(t2);
        sync_twins(&mut a, &mut b).unwrap();
        solve(&mut a, &mut b, &Config::default())
    }

    #[test]
    fn finds_maximal_shared_clades() {
        let (t1, t2, _) = trees("((((1,2),3),4),5)", "((((2,1),3),5),4)");
        let points = find_cluster_points(&t1, &t2);
        // {1,2} and {1,2,3} are shared; only the maximal {1,2,3} counts.
        assert_eq!(points.len(), 1);
        let (v1, v2) = points[0];
        assert!(t1.node(v1).children.is_some());
        assert!(t2.node(v2).children.is_some());
    }

    #[test]
    fn no_cluster_points_in_fully_conflicting_pair() {
        let (t1, t2, _) = trees("((1,2),(3,4))", "((1,3),(2,4))");
        assert!(find_cluster_points(&t1, &t2).is_empty());
    }

    #[test]
    fn decomposition_matches_direct_distance() {
        let cases = [
            ("((((1,2),3),4),5)", "((((2,1),3),5),4)"),
            ("(((1,2),(3,4)),5)", "(((3,4),(2,1)),5)"),
            ("(((1,2),(3,4)),(5,6))", "(((1,3),(2,4)),(6,5))"),
        ];
        for (n1, n2) in cases {
            let (t1, t2, mut labels) = trees(n1, n2);
            let direct = direct_distance(&t1, &t2);
            let dec = decompose_and_solve(&t1, &t2, &mut labels, &Config::default());
            assert_eq!(dec.distance, direct, "{n1} vs {n2}");
            assert!(!dec.fell_back);
            assert_eq!(
                dec.cluster_distances.iter().sum::<usize>(),
                dec.distance
            );
        }
    }

    #[test]
    fn rejoined_forests_carry_real_labels_only() {
        let (t1, t2, mut labels) = trees("((((1,2),3),4),5)", "((((2,1),3),5),4)");
        let dec = decompose_and_solve(&t1, &t2, &mut labels, &Config::default());
        let printed = dec.forest_a.components_string(&labels);
        assert!(!printed.contains('X'), "placeholder leaked: {printed}");
        for name in ["1", "2", "3", "4", "5"] {
            assert!(printed.contains(name), "{name} missing from {printed}");
        }
    }

    #[test]
    fn cluster_limit_falls_back_to_whole_instance() {
        let (t1, t2, mut labels) = trees("((((1,2),3),4),5)", "((((2,1),3),5),4)");
        let cfg = Config {
            max_clusters: Some(0),
            ..Config::default()
        };
        let dec = decompose_and_solve(&t1, &t2, &mut labels, &cfg);
        assert!(dec.fell_back);
        assert_eq!(dec.distance, direct_distance(&t1, &t2));
    }

    #[test]
    fn scenario_decomposition_equals_direct() {
        let (t1, t2, mut labels) = trees(
            "((((1,2),(3,4)),((5,6),(7,8))),(((9,10),(11,12)),((13,14),(15,16))))",
            "((((3,4),(8,(2,((11,12),1)))),((15,16),(7,(6,5)))),(14,((10,13),9)))",
        );
        let cfg = Config {
            prefer_rho: true,
            ..Config::default()
        };
        let dec = decompose_and_solve(&t1, &t2, &mut labels, &cfg);
        assert_eq!(dec.distance, 4);
        // The shared cherries decompose into distance-zero pieces.
        assert!(dec.cluster_distances.len() > 1);
    }
}
