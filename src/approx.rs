//! Linear-time 3-approximation of the rSPR distance.
//!
//! # Algorithm
//! Repeatedly simplify the forest pair for free (contract sibling pairs
//! that agree on both sides, mirror forest-B singletons into forest A)
//! and, at each remaining conflict, cut three candidate edges of forest B
//! at once: the edge above each conflicting leaf and the nearest pendant
//! edge between them. Any agreement forest must cut at least one of the
//! three, so the returned bound `B` satisfies
//! `distance ≤ B ≤ 3 × distance`.
//!
//! The quadratic variant additionally checks, per conflict, whether one of
//! the three candidate subtrees already agrees with a forest-A subtree; if
//! so that single cheaper cut resolves the conflict and the bound
//! tightens. The exact search always seeds its budget from the linear
//! bound, whose `⌊B/3⌋ ≤ distance` guarantee is unconditional.
//!
//! This module also hosts the free simplification pass shared with the
//! branch-and-bound engine.

use crate::forest::{contract_pair, finish_pair, sync_twins, Forest};
use crate::tree::Node;
use crate::undo::{Side, UndoLog};

/// Options for [`approximate`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ApproxOptions {
    /// Enable the quadratic component check (`-cc`).
    pub quadratic: bool,
}

/// Compute the approximation bound, leaving both forests in the
/// approximate agreement-forest state for printing.
///
/// The forests must have been twin-synced (see [`sync_twins`]).
pub fn approximate(a: &mut Forest, b: &mut Forest, opts: ApproxOptions) -> usize {
    let mut undo = UndoLog::new();
    approximate_logged(a, b, &mut undo, opts)
}

/// As [`approximate`], but recording every edit in `undo` so a caller can
/// rewind the forests afterwards (the search engine's bounding step).
pub(crate) fn approximate_logged(
    a: &mut Forest,
    b: &mut Forest,
    undo: &mut UndoLog,
    opts: ApproxOptions,
) -> usize {
    let mut count = 0;
    loop {
        simplify(a, b, undo, opts.quadratic);
        let Some((x, y)) = find_conflict_cherry(a, b, false) else {
            break;
        };
        let xb = a.twin(x).expect("effective leaf has a twin");
        let yb = a.twin(y).expect("effective leaf has a twin");

        let mut candidates = vec![xb];
        if b.component_root(xb) == b.component_root(yb) {
            let (pendants_a, pendants_c) = path_pendants(b, xb, yb);
            // The pendant nearest a conflicting leaf; every agreement
            // forest that keeps the pair together must cut it.
            let pendant = pendants_a
                .first()
                .or(pendants_c.first())
                .copied()
                .expect("non-sibling pair in one component has a pendant");
            candidates.push(pendant);
        }
        candidates.push(yb);

        if opts.quadratic {
            // Prefer a single cut whose severed part already agrees.
            if let Some(&v) = candidates
                .iter()
                .find(|&&v| b.agreement_image(a, v).is_some())
            {
                count += cut_counted(b, v, undo);
                continue;
            }
        }
        for v in candidates {
            count += cut_counted(b, v, undo);
        }
    }
    count
}

/// Cut above `v` in forest B if the edge still exists; a candidate whose
/// edge was suppressed away by an earlier cut of the same conflict is
/// already separated.
fn cut_counted(b: &mut Forest, v: Node, undo: &mut UndoLog) -> usize {
    match b.cut(v, Side::B, undo) {
        Ok(_) => 1,
        Err(_) => 0,
    }
}

/// Apply every free reduction until none fires:
/// 1. contract sibling pairs present identically in both forests;
/// 2. retire agreeing forest-B components, mirroring the separating cut
///    into forest A at no cost. With `separate` set this covers whole
///    agreeing components (the separate-components optimization);
///    otherwise only the mandatory singleton case.
pub(crate) fn simplify(a: &mut Forest, b: &mut Forest, undo: &mut UndoLog, separate: bool) {
    loop {
        if let Some((x, y)) = find_agreeing_cherry(a, b) {
            contract_pair(a, b, x, y, undo);
            continue;
        }
        if let Some((ra, rb)) = find_agreeing_component(a, b, separate) {
            let ra = match a.parent(ra) {
                // Mirror the separation into forest A for free.
                Some(_) => a.cut(ra, Side::A, undo).expect("node has a parent"),
                None => ra,
            };
            finish_pair(a, b, ra, rb, undo);
            continue;
        }
        break;
    }
}

/// First sibling pair of effective leaves in forest A whose twins are also
/// siblings in forest B.
pub(crate) fn find_agreeing_cherry(a: &Forest, b: &Forest) -> Option<(Node, Node)> {
    scan_cherries(a, b, true, false)
}

/// First sibling pair of effective leaves in forest A whose twins are
/// *not* siblings in forest B: the "bad" pair driving a branching step.
/// With `prefer_rho`, the component carrying ρ is examined first.
pub(crate) fn find_conflict_cherry(a: &Forest, b: &Forest, prefer_rho: bool) -> Option<(Node, Node)> {
    scan_cherries(a, b, false, prefer_rho)
}

fn scan_cherries(a: &Forest, b: &Forest, agreeing: bool, prefer_rho: bool) -> Option<(Node, Node)> {
    let mut roots: Vec<Node> = a.unfinished_components().collect();
    if prefer_rho {
        if let Some(rho) = a.rho() {
            let rho_root = a.component_root(rho);
            roots.sort_by_key(|&r| r != rho_root);
        }
    }
    for root in roots {
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            if let Some((l, r)) = a.effective_children(n) {
                if a.is_effective_leaf(l) && a.is_effective_leaf(r) {
                    let tl = a.twin(l).expect("leaf has a twin");
                    let tr = a.twin(r).expect("leaf has a twin");
                    let siblings = match (b.parent(tl), b.parent(tr)) {
                        (Some(p), Some(q)) => p == q,
                        _ => false,
                    };
                    if siblings == agreeing {
                        return Some((l, r));
                    }
                } else {
                    stack.push(r);
                    stack.push(l);
                }
            }
        }
    }
    None
}

/// An unfinished forest-B component that agrees with a forest-A subtree,
/// paired with the subtree's root. With `separate` unset, only singleton
/// components qualify (their mirroring is required for correctness).
fn find_agreeing_component(a: &Forest, b: &Forest, separate: bool) -> Option<(Node, Node)> {
    for rb in b.unfinished_components() {
        if !separate && !b.is_effective_leaf(rb) {
            continue;
        }
        if let Some(ra) = b.agreement_image(a, rb) {
            return Some((ra, rb));
        }
    }
    None
}

/// Pendant subtree roots hanging off the forest-B path between `xb` and
/// `yb` (which must share a component): first the pendants on `xb`'s side
/// of their LCA, nearest-first, then those on `yb`'s side.
pub(crate) fn path_pendants(b: &Forest, xb: Node, yb: Node) -> (Vec<Node>, Vec<Node>) {
    let mut x_chain = vec![xb];
    let mut at = xb;
    while let Some(p) = b.parent(at) {
        x_chain.push(p);
        at = p;
    }
    // Walk up from yb until the chains meet.
    let mut y_chain = vec![yb];
    at = yb;
    let lca = loop {
        if let Some(pos) = x_chain.iter().position(|&n| n == at) {
            y_chain.pop();
            break pos;
        }
        let p = b.parent(at).expect("nodes share a component");
        y_chain.push(p);
        at = p;
    };

    let other_child = |parent: Node, on_path: Node| {
        let (l, r) = b.children(parent).expect("path node is internal");
        if l == on_path { r } else { l }
    };
    let pendants_a = (1..lca)
        .map(|i| other_child(x_chain[i], x_chain[i - 1]))
        .collect();
    let pendants_c = (1..y_chain.len())
        .map(|i| other_child(y_chain[i], y_chain[i - 1]))
        .collect();
    (pendants_a, pendants_c)
}

/// Build a synced forest pair for two trees and return the approximation.
/// Convenience used by the driver and tests.
pub fn approximate_trees(
    t1: &crate::tree::Tree,
    t2: &crate::tree::Tree,
    opts: ApproxOptions,
) -> (usize, Forest, Forest) {
    let mut f1 = Forest::from_tree(t1);
    let mut f2 = Forest::from_tree(t2);
    sync_twins(&mut f1, &mut f2).expect("trees share a leaf set");
    let bound = approximate(&mut f1, &mut f2, opts);
    (bound, f1, f2)
}
