//! Fixed-parameter branch-and-bound search for the exact rSPR distance.
//!
//! # Shape of the search
//! Given a budget `k`, the engine repeatedly simplifies the forest pair for
//! free (contractions, mirrored singletons, agreeing-component retirement),
//! then picks a "bad" sibling pair (two effective leaves that are siblings
//! in forest A but not in forest B) and branches over a small set of
//! forest-B edges to cut. Every cut consumes budget; a failed branch is
//! rolled back through the undo log. `Infeasible` is an expected outcome
//! that drives the caller's retry at `k + 1`, never an error.
//!
//! The optimized branching rules (`cut-one-b`, `cut-all-b`,
//! `separate-components`) replace parts of the default 3-way branch with
//! cheaper deterministic steps when their structural preconditions match;
//! they change the search cost, never the returned distance.

use crate::approx::{
    approximate_logged, find_conflict_cherry, path_pendants, simplify, ApproxOptions,
};
use crate::forest::Forest;
use crate::labels::LabelMap;
use crate::tree::Node;
use crate::undo::{Side, UndoLog};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Immutable configuration threaded through the search. Absence of every
/// branching optimization means full 3-way branching.
#[derive(Clone, Debug)]
pub struct Config {
    pub use_cut_one_b: bool,
    pub use_cut_all_b: bool,
    pub use_separate_components: bool,
    pub use_memoization: bool,
    pub prefer_rho: bool,
    pub all_mafs: bool,
    /// Prune with the approximation bound (`-bb`); disabled for the plain
    /// FPT mode (`-fpt`).
    pub branch_bound: bool,
    /// Cluster decomposition cap; `None` means unlimited.
    pub max_clusters: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            use_cut_one_b: true,
            use_cut_all_b: true,
            use_separate_components: true,
            use_memoization: false,
            prefer_rho: false,
            all_mafs: false,
            branch_bound: true,
            max_clusters: None,
        }
    }
}

impl Config {
    /// The `-noopt` configuration: full 3-way branching everywhere.
    pub fn unoptimized() -> Self {
        Config {
            use_cut_one_b: false,
            use_cut_all_b: false,
            use_separate_components: false,
            ..Config::default()
        }
    }
}

/// Outcome of a bounded exact search: an expected negative result, not an
/// error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Exact {
    Solved(usize),
    Infeasible,
}

/// Run the bounded search at budget `k`. On success the forests are left
/// in the found agreement-forest state; on `Infeasible` they are restored
/// untouched.
pub fn exact(a: &mut Forest, b: &mut Forest, k: usize, cfg: &Config) -> Exact {
    // Enumeration is only meaningful through `solve_all`; a single bounded
    // query always reports the first witness found.
    let cfg = Config {
        all_mafs: false,
        ..cfg.clone()
    };
    let mut searcher = Searcher::new(&cfg, None);
    if searcher.search(a, b, k) {
        Exact::Solved(searcher.undo.b_cuts())
    } else {
        Exact::Infeasible
    }
}

/// Exact distance by iterative deepening: seed `k₀ = ⌊B/3⌋` from the
/// linear approximation and scan upward until the bounded search succeeds.
/// The forests end in a minimum agreement-forest state.
pub fn solve(a: &mut Forest, b: &mut Forest, cfg: &Config) -> usize {
    let mut k = seed_budget(a, b);
    loop {
        match exact(a, b, k, cfg) {
            Exact::Solved(d) => return d,
            Exact::Infeasible => k += 1,
        }
    }
}

/// Enumerate every minimum agreement forest: the distance plus the
/// distinct printed forest pairs. Forest state is restored afterwards.
pub fn solve_all(
    a: &mut Forest,
    b: &mut Forest,
    cfg: &Config,
    labels: &LabelMap,
) -> (usize, Vec<(String, String)>) {
    let cfg = Config {
        all_mafs: true,
        // Distinct search paths into one cached state witness distinct
        // forests, so the infeasibility cache must stay off here.
        use_memoization: false,
        ..cfg.clone()
    };
    let mut k = seed_budget(a, b);
    loop {
        let mut searcher = Searcher::new(&cfg, Some(labels));
        searcher.search(a, b, k);
        if !searcher.mafs.is_empty() {
            return (k, searcher.mafs.into_iter().collect());
        }
        k += 1;
    }
}

/// `⌊B/3⌋` from the linear 3-approximation, replayed through a scratch
/// undo log so the forests are untouched.
fn seed_budget(a: &mut Forest, b: &mut Forest) -> usize {
    let mut undo = UndoLog::new();
    let cp = undo.checkpoint();
    let bound = approximate_logged(a, b, &mut undo, ApproxOptions::default());
    undo.rewind(cp, a, b);
    bound / 3
}

/// The branch alternatives at a conflict.
#[derive(Clone, Copy, Debug)]
enum Branch {
    CutA,
    CutPendants,
    CutC,
}

struct Searcher<'a> {
    cfg: &'a Config,
    undo: UndoLog,
    /// Canonical state → largest budget proven infeasible.
    memo: HashMap<String, usize>,
    /// Distinct minimum agreement forests, printed (all-MAFs mode).
    mafs: BTreeSet<(String, String)>,
    labels: Option<&'a LabelMap>,
}

impl<'a> Searcher<'a> {
    fn new(cfg: &'a Config, labels: Option<&'a LabelMap>) -> Self {
        Searcher {
            cfg,
            undo: UndoLog::new(),
            memo: HashMap::new(),
            mafs: BTreeSet::new(),
            labels,
        }
    }

    /// Depth-first bounded search. Returns whether an agreement forest was
    /// reached within budget; in all-MAFs mode always returns false after
    /// recording every success at this budget.
    fn search(&mut self, a: &mut Forest, b: &mut Forest, k: usize) -> bool {
        let cp = self.undo.checkpoint();
        simplify(a, b, &mut self.undo, self.cfg.use_separate_components);

        if is_agreement(a, b) {
            if self.cfg.all_mafs {
                self.record_maf(a, b);
                self.undo.rewind(cp, a, b);
                return false;
            }
            return true;
        }

        let Some((x, y)) = find_conflict_cherry(a, b, self.cfg.prefer_rho) else {
            // No conflict but no agreement: nothing left to branch on.
            self.undo.rewind(cp, a, b);
            return false;
        };
        if k == 0 {
            self.undo.rewind(cp, a, b);
            return false;
        }

        let key = if self.cfg.use_memoization {
            let key = format!("{}#{}", canonical(a), canonical(b));
            if self.memo.get(&key).is_some_and(|&bad| k <= bad) {
                self.undo.rewind(cp, a, b);
                return false;
            }
            Some(key)
        } else {
            None
        };

        if self.cfg.branch_bound {
            let bp = self.undo.checkpoint();
            let bound = approximate_logged(a, b, &mut self.undo, ApproxOptions::default());
            self.undo.rewind(bp, a, b);
            if bound / 3 > k {
                self.record_infeasible(key, k);
                self.undo.rewind(cp, a, b);
                return false;
            }
        }

        let xb = a.twin(x).expect("effective leaf has a twin");
        let yb = a.twin(y).expect("effective leaf has a twin");
        let same_component = b.component_root(xb) == b.component_root(yb);
        let (pendants, branches) = if same_component {
            let (pa, pc) = path_pendants(b, xb, yb);
            let branches = self.pick_branches(a, b, x, &pa, &pc);
            let mut pendants = pa;
            pendants.extend(pc);
            (pendants, branches)
        } else {
            (Vec::new(), vec![Branch::CutA, Branch::CutC])
        };

        for branch in branches {
            let bcp = self.undo.checkpoint();
            let cost = match branch {
                Branch::CutA => {
                    b.cut(xb, Side::B, &mut self.undo).expect("leaf has a parent");
                    1
                }
                Branch::CutC => {
                    b.cut(yb, Side::B, &mut self.undo).expect("leaf has a parent");
                    1
                }
                Branch::CutPendants => {
                    if pendants.len() > k {
                        continue;
                    }
                    for &p in &pendants {
                        b.cut(p, Side::B, &mut self.undo).expect("pendant has a parent");
                    }
                    pendants.len()
                }
            };
            if self.search(a, b, k - cost) {
                return true;
            }
            self.undo.rewind(bcp, a, b);
        }

        self.record_infeasible(key, k);
        self.undo.rewind(cp, a, b);
        false
    }

    /// Choose the branch set for a same-component conflict, applying the
    /// optimized branching rules where their preconditions hold.
    fn pick_branches(
        &self,
        a: &Forest,
        b: &Forest,
        x: Node,
        pendants_a: &[Node],
        pendants_c: &[Node],
    ) -> Vec<Branch> {
        let q = pendants_a.len() + pendants_c.len();
        debug_assert!(q >= 1, "non-sibling twins in one component have a pendant");
        let on_a_side = pendants_c.is_empty();

        if self.cfg.use_cut_one_b && q == 1 {
            let p = *pendants_a.first().or(pendants_c.first()).expect("q == 1");
            // Single leaf pendant hanging directly above the cherry on the
            // A side as well: the pendant cut dominates all three branches.
            if b.is_effective_leaf(p) {
                let cherry_parent = a.parent(x).expect("cherry has a parent");
                let twin = b.twin(p).expect("effective leaf has a twin");
                if let Some(gp) = a.parent(cherry_parent) {
                    if a.parent(twin) == Some(gp) {
                        return vec![Branch::CutPendants];
                    }
                }
            }
            // Otherwise the endpoint on the pendant's side is dominated.
            return if on_a_side {
                vec![Branch::CutPendants, Branch::CutC]
            } else {
                vec![Branch::CutA, Branch::CutPendants]
            };
        }

        if self.cfg.use_cut_all_b
            && q >= 2
            && (on_a_side || pendants_a.is_empty())
        {
            let pendants = if on_a_side { pendants_a } else { pendants_c };
            if self.ladder_matched(a, b, x, pendants) {
                // The near-side endpoint cut is dominated by cutting the
                // whole pendant ladder.
                return if on_a_side {
                    vec![Branch::CutPendants, Branch::CutC]
                } else {
                    vec![Branch::CutA, Branch::CutPendants]
                };
            }
        }

        vec![Branch::CutA, Branch::CutPendants, Branch::CutC]
    }

    /// Whether the pendant chain (nearest first) consists of single leaves
    /// whose forest-A twins hang in the same order directly above the
    /// conflicting cherry.
    fn ladder_matched(&self, a: &Forest, b: &Forest, x: Node, pendants: &[Node]) -> bool {
        let mut at = a.parent(x).expect("cherry has a parent");
        for &p in pendants {
            if !b.is_effective_leaf(p) {
                return false;
            }
            let twin = b.twin(p).expect("effective leaf has a twin");
            let Some(up) = a.parent(at) else {
                return false;
            };
            let (l, r) = a.children(up).expect("internal node");
            let rung = if l == at { r } else { l };
            if rung != twin {
                return false;
            }
            at = up;
        }
        true
    }

    fn record_infeasible(&mut self, key: Option<String>, k: usize) {
        if let Some(key) = key {
            let entry = self.memo.entry(key).or_insert(k);
            *entry = (*entry).max(k);
        }
    }

    fn record_maf(&mut self, a: &Forest, b: &Forest) {
        if let Some(labels) = self.labels {
            self.mafs
                .insert((a.components_string(labels), b.components_string(labels)));
        }
    }
}

/// Goal test: every unfinished forest-B component has a twin-isomorphic
/// image that is an unfinished forest-A component root, bijectively.
/// ρ carries its own reserved label, which yields the "agreeing up to the
/// rho designation" rule without a special case.
pub fn is_agreement(a: &Forest, b: &Forest) -> bool {
    let unfinished_a: Vec<Node> = a.unfinished_components().collect();
    let mut matched = HashSet::new();
    for rb in b.unfinished_components() {
        match b.agreement_image(a, rb) {
            Some(ra) if a.parent(ra).is_none() && !a.is_finished(ra) => {
                matched.insert(ra);
            }
            _ => return false,
        }
    }
    matched.len() == unfinished_a.len()
}

/// Canonical order-independent encoding of the unfinished components,
/// used as the memoization key. Labels are unique per forest, so the
/// encoding of both sides captures the twin relation.
fn canonical(f: &Forest) -> String {
    let mut comps: Vec<String> = f
        .unfinished_components()
        .map(|r| canonical_node(f, r))
        .collect();
    comps.sort();
    comps.join(" ")
}

fn canonical_node(f: &Forest, n: Node) -> String {
    match f.effective_children(n) {
        None => f.label(n).expect("effective leaf has a label").to_string(),
        Some((l, r)) => {
            let a = canonical_node(f, l);
            let b = canonical_node(f, r);
            if a <= b {
                format!("({a},{b})")
            } else {
                format!("({b},{a})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::sync_twins;
    use crate::newick::parse_tree;

    fn pair(n1: &str, n2: &str) -> (Forest, Forest, LabelMap) {
        let mut labels = LabelMap::new();
        let t1 = parse_tree(n1, &mut labels).unwrap();
        let t2 = parse_tree(n2, &mut labels).unwrap();
        let mut f1 = Forest::from_tree(&t1);
        let mut f2 = Forest::from_tree(&t2);
        sync_twins(&mut f1, &mut f2).unwrap();
        (f1, f2, labels)
    }

    fn distance(n1: &str, n2: &str, cfg: &Config) -> usize {
        let (mut f1, mut f2, _) = pair(n1, n2);
        solve(&mut f1, &mut f2, cfg)
    }

    #[test]
    fn identical_trees_have_distance_zero() {
        let cfg = Config::default();
        assert_eq!(distance("(1,2)", "(1,2)", &cfg), 0);
        assert_eq!(distance("((1,2),(3,4))", "((1,2),(3,4))", &cfg), 0);
        assert_eq!(distance("((((1,2),3),4),5)", "((((1,2),3),4),5)", &cfg), 0);
    }

    #[test]
    fn single_leaf_pair_is_distance_zero() {
        let (mut f1, mut f2, _) = pair("1", "1");
        assert_eq!(solve(&mut f1, &mut f2, &Config::default()), 0);
    }

    #[test]
    fn known_small_distances() {
        let cfg = Config::default();
        // One regraft: move 3 next to 1.
        assert_eq!(distance("(((1,2),3),4)", "(((1,3),2),4)", &cfg), 1);
        // Swapping deep cherries needs two moves.
        assert_eq!(distance("((1,2),(3,4))", "((1,3),(2,4))", &cfg), 2);
    }

    #[test]
    fn distance_is_symmetric() {
        let cfg = Config::default();
        let cases = [
            ("(((1,2),3),4)", "(((1,3),2),4)"),
            ("((1,2),(3,4))", "((1,3),(2,4))"),
            ("((((1,2),3),4),5)", "((((4,2),3),1),5)"),
        ];
        for (t1, t2) in cases {
            assert_eq!(distance(t1, t2, &cfg), distance(t2, t1, &cfg), "{t1} vs {t2}");
        }
    }

    #[test]
    fn infeasible_budget_is_reported_then_recovers() {
        let (mut f1, mut f2, labels) = pair("((1,2),(3,4))", "((1,3),(2,4))");
        let before = f1.components_string(&labels);
        let cfg = Config::default();
        assert_eq!(exact(&mut f1, &mut f2, 1, &cfg), Exact::Infeasible);
        // The failed attempt restored the forests.
        assert_eq!(f1.components_string(&labels), before);
        assert!(matches!(exact(&mut f1, &mut f2, 2, &cfg), Exact::Solved(2)));
    }

    #[test]
    fn budget_of_leaf_count_always_suffices() {
        let cases = [
            ("((1,2),(3,4))", "((1,3),(2,4))"),
            ("(((1,2),3),(4,5))", "(((5,3),1),(4,2))"),
        ];
        for (t1, t2) in cases {
            let (mut f1, mut f2, _) = pair(t1, t2);
            let n = 5;
            assert!(
                matches!(exact(&mut f1, &mut f2, n, &Config::default()), Exact::Solved(_)),
                "{t1} vs {t2} infeasible at k = n"
            );
        }
    }

    #[test]
    fn optimizations_do_not_change_the_distance() {
        let cases = [
            ("(((1,2),3),4)", "(((1,3),2),4)"),
            ("((1,2),(3,4))", "((1,3),(2,4))"),
            ("((((1,2),3),4),5)", "((((4,2),3),1),5)"),
            ("(((1,2),(3,4)),5)", "(((3,1),(2,4)),5)"),
            ("((((1,2),3),(4,5)),6)", "((((6,5),3),(4,1)),2)"),
        ];
        let full = Config::default();
        let none = Config::unoptimized();
        let only_cob = Config {
            use_cut_all_b: false,
            use_separate_components: false,
            ..Config::default()
        };
        let only_sc = Config {
            use_cut_one_b: false,
            use_cut_all_b: false,
            ..Config::default()
        };
        for (t1, t2) in cases {
            let d = distance(t1, t2, &none);
            assert_eq!(distance(t1, t2, &full), d, "{t1} allopt");
            assert_eq!(distance(t1, t2, &only_cob), d, "{t1} cob");
            assert_eq!(distance(t1, t2, &only_sc), d, "{t1} sc");
        }
    }

    #[test]
    fn memoization_and_fpt_mode_agree() {
        let cases = [
            ("((1,2),(3,4))", "((1,3),(2,4))"),
            ("((((1,2),3),4),5)", "((((4,2),3),1),5)"),
        ];
        let memo = Config {
            use_memoization: true,
            ..Config::default()
        };
        let fpt = Config {
            branch_bound: false,
            ..Config::default()
        };
        for (t1, t2) in cases {
            let d = distance(t1, t2, &Config::default());
            assert_eq!(distance(t1, t2, &memo), d);
            assert_eq!(distance(t1, t2, &fpt), d);
        }
    }

    #[test]
    fn prefer_rho_changes_selection_not_result() {
        let cfg = Config {
            prefer_rho: true,
            ..Config::default()
        };
        assert_eq!(distance("((1,2),(3,4))", "((1,3),(2,4))", &cfg), 2);
    }

    #[test]
    fn approximation_sandwiches_the_distance() {
        use crate::approx::{approximate, ApproxOptions};
        let cases = [
            ("(((1,2),3),4)", "(((1,3),2),4)"),
            ("((1,2),(3,4))", "((1,3),(2,4))"),
            ("((((1,2),3),4),5)", "((((4,2),3),1),5)"),
        ];
        for (t1, t2) in cases {
            let d = distance(t1, t2, &Config::default());
            let (mut f1, mut f2, _) = pair(t1, t2);
            let bound = approximate(&mut f1, &mut f2, ApproxOptions::default());
            assert!(d <= bound, "{t1}: d={d} bound={bound}");
            assert!(bound <= 3 * d, "{t1}: d={d} bound={bound}");
        }
    }

    #[test]
    fn solved_forests_form_matching_components() {
        let (mut f1, mut f2, _) = pair("((1,2),(3,4))", "((1,3),(2,4))");
        let d = solve(&mut f1, &mut f2, &Config::default());
        assert_eq!(d, 2);
        assert!(is_agreement(&f1, &f2));
        // distance = components - 1, counting the ρ remnant.
        assert_eq!(f2.num_components(), d + 1);
    }

    #[test]
    fn all_mafs_contains_a_witness() {
        let (mut f1, mut f2, labels) = pair("(((1,2),3),4)", "(((1,3),2),4)");
        let (d, mafs) = solve_all(&mut f1, &mut f2, &Config::default(), &labels);
        assert_eq!(d, 1);
        assert!(!mafs.is_empty());
        // Every witness pair agrees component-for-component when reparsed.
        for (w1, w2) in &mafs {
            let mut c1: Vec<&str> = w1.split(' ').collect();
            let mut c2: Vec<&str> = w2.split(' ').collect();
            assert_eq!(c1.len(), c2.len());
            c1.sort();
            c2.sort();
        }
    }

    // End-to-end pair with a large gap between bound and distance.
    const BIG_T1: &str =
        "((((1,2),(3,4)),((5,6),(7,8))),(((9,10),(11,12)),((13,14),(15,16))))";
    const BIG_T2: &str =
        "((((3,4),(8,(2,((11,12),1)))),((15,16),(7,(6,5)))),(14,((10,13),9)))";

    #[test]
    fn scenario_approximation_bound() {
        use crate::approx::{approximate, ApproxOptions};
        let (mut f1, mut f2, _) = pair(BIG_T1, BIG_T2);
        assert_eq!(approximate(&mut f1, &mut f2, ApproxOptions::default()), 12);
    }

    #[test]
    fn scenario_exact_distance() {
        let (mut f1, mut f2, _) = pair(BIG_T1, BIG_T2);
        let d = solve(&mut f1, &mut f2, &Config::default());
        assert_eq!(d, 4);
        assert!(is_agreement(&f1, &f2));
    }

    #[test]
    fn scenario_exact_distance_without_optimizations() {
        let (mut f1, mut f2, _) = pair(BIG_T1, BIG_T2);
        assert_eq!(solve(&mut f1, &mut f2, &Config::unoptimized()), 4);
    }
}
