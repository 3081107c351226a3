//! The mutable forest pair substrate of the search engine.
//!
//! A `Forest` is a set of rooted binary components cut out of one source
//! tree, stored in a single arena. Arena slots are never reused, so every
//! structural edit can be described (and inverted) as an index-keyed delta
//! in the [`crate::undo::UndoLog`].
//!
//! Two forests are compared through the *twin* relation: each effective
//! leaf points at the node carrying the same label in the partner forest.
//! Twins are plain indices, never ownership edges, and are kept consistent
//! by every mutating operation.
//!
//! The root-remnant marker ρ is an ordinary reserved-label leaf attached
//! under a synthetic root at construction, per the standard rooted
//! agreement-forest formulation; it is elided from printed output.

use crate::labels::{Label, LabelMap, RHO};
use crate::tree::{Node, Tree};
use crate::undo::{Op, Side, UndoLog};
use std::collections::HashMap;
use std::ops::Range;
use thiserror::Error;

/// Structural contract violations. These indicate a bug in the caller, not
/// bad user input, and abort the affected operation.
#[derive(Error, Debug)]
pub enum ForestError {
    #[error("cannot cut the edge above a component root")]
    CutAtComponentRoot,
    #[error("cannot replace a component root with a cluster placeholder")]
    ClusterAtComponentRoot,
    #[error("unknown cluster id {0}")]
    UnknownCluster(usize),
    #[error("forests carry different leaf label sets")]
    LabelMismatch,
}

/// Per-node data. Parent/child edges are arena indices; `twin` points into
/// the partner forest's arena.
#[derive(Clone, Debug)]
pub struct NodeData {
    pub parent: Option<Node>,
    pub children: Option<(Node, Node)>,
    /// Set for leaves and for contracted pseudo-leaves.
    pub label: Option<Label>,
    pub twin: Option<Node>,
    /// A contracted node keeps its subtree but acts as a leaf.
    pub contracted: bool,
    /// Set on component roots retired from the active search.
    pub finished: bool,
}

impl NodeData {
    fn leaf(label: Label) -> Self {
        NodeData {
            parent: None,
            children: None,
            label: Some(label),
            twin: None,
            contracted: false,
            finished: false,
        }
    }
}

/// An ordered collection of components over one arena.
#[derive(Clone, Debug, Default)]
pub struct Forest {
    nodes: Vec<NodeData>,
    roots: Vec<Node>,
    /// The ρ leaf, when this forest carries a root handle.
    rho: Option<Node>,
    /// Cluster id → placeholder leaf introduced for it.
    clusters: Vec<(usize, Node)>,
}

impl Forest {
    /// Build the standard search instance for `tree`: one component, with
    /// the root handle `(root, ρ)` attached on top.
    pub fn from_tree(tree: &Tree) -> Self {
        let mut forest = Self::from_tree_plain(tree);
        forest.attach_root_handle();
        forest
    }

    /// Build a bare single-component forest without the root handle. Used
    /// for cluster bookkeeping, where each piece receives its own handle
    /// when it becomes a search instance.
    pub fn from_tree_plain(tree: &Tree) -> Self {
        let nodes = (0..tree.node_count())
            .map(|i| {
                let d = tree.node(Node(i));
                NodeData {
                    parent: d.parent,
                    children: d.children,
                    label: d.label,
                    twin: None,
                    contracted: false,
                    finished: false,
                }
            })
            .collect();
        Forest {
            nodes,
            roots: vec![tree.root()],
            rho: None,
            clusters: Vec::new(),
        }
    }

    /// Copy the component under `root` of `src` into a fresh instance and
    /// attach a root handle. This is how cluster pieces enter the pipeline.
    pub fn from_subtree(src: &Forest, root: Node) -> Self {
        let mut forest = Forest::default();
        let copied = forest.import(src, root);
        forest.roots.push(copied);
        forest.attach_root_handle();
        forest
    }

    fn attach_root_handle(&mut self) {
        let old = self.roots[0];
        let rho = Node(self.nodes.len());
        self.nodes.push(NodeData::leaf(RHO));
        let new_root = Node(self.nodes.len());
        self.nodes.push(NodeData {
            parent: None,
            children: Some((old, rho)),
            label: None,
            twin: None,
            contracted: false,
            finished: false,
        });
        self.nodes[old.0].parent = Some(new_root);
        self.nodes[rho.0].parent = Some(new_root);
        self.roots[0] = new_root;
        self.rho = Some(rho);
    }

    /// Deep-copy the subtree of `src` under `from` into this arena.
    /// Twin links are not copied; they are re-established by
    /// [`sync_twins`] when the copy becomes part of a pair.
    fn import(&mut self, src: &Forest, from: Node) -> Node {
        let data = &src.nodes[from.0];
        let this = Node(self.nodes.len());
        self.nodes.push(NodeData {
            parent: None,
            children: None,
            label: data.label,
            twin: None,
            contracted: data.contracted,
            finished: false,
        });
        if let Some((l, r)) = data.children {
            let cl = self.import(src, l);
            let cr = self.import(src, r);
            self.nodes[cl.0].parent = Some(this);
            self.nodes[cr.0].parent = Some(this);
            self.nodes[this.0].children = Some((cl, cr));
        }
        this
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn parent(&self, n: Node) -> Option<Node> {
        self.nodes[n.0].parent
    }

    pub fn children(&self, n: Node) -> Option<(Node, Node)> {
        self.nodes[n.0].children
    }

    pub fn label(&self, n: Node) -> Option<Label> {
        self.nodes[n.0].label
    }

    pub fn twin(&self, n: Node) -> Option<Node> {
        self.nodes[n.0].twin
    }

    /// A leaf, or a contracted pseudo-leaf.
    pub fn is_effective_leaf(&self, n: Node) -> bool {
        self.nodes[n.0].children.is_none() || self.nodes[n.0].contracted
    }

    /// Children, unless this node has been contracted away.
    pub fn effective_children(&self, n: Node) -> Option<(Node, Node)> {
        if self.nodes[n.0].contracted {
            None
        } else {
            self.nodes[n.0].children
        }
    }

    /// The root of the component containing `n`.
    pub fn component_root(&self, n: Node) -> Node {
        let mut at = n;
        while let Some(p) = self.nodes[at.0].parent {
            at = p;
        }
        at
    }

    /// Ordered component roots, for printing and inspection.
    pub fn components(&self) -> &[Node] {
        &self.roots
    }

    /// Component roots still in the active search.
    pub fn unfinished_components(&self) -> impl Iterator<Item = Node> + '_ {
        self.roots.iter().copied().filter(|&r| !self.nodes[r.0].finished)
    }

    pub fn is_finished(&self, root: Node) -> bool {
        self.nodes[root.0].finished
    }

    pub fn num_components(&self) -> usize {
        self.roots.len()
    }

    /// Total number of arena slots ever allocated.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// The ρ marker leaf, when this forest carries a root handle.
    pub fn rho(&self) -> Option<Node> {
        self.rho
    }

    /// True when the component containing ρ has been pared down to the
    /// bare marker, i.e. the root remnant was separated.
    pub fn contains_rho(&self) -> bool {
        self.rho
            .is_some_and(|r| self.nodes[r.0].parent.is_none())
    }

    /// Effective leaves of the component under `root`, left to right.
    pub fn component_leaves(&self, root: Node) -> Vec<Node> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            match self.effective_children(n) {
                None => out.push(n),
                Some((l, r)) => {
                    stack.push(r);
                    stack.push(l);
                }
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Mutating operations (all undo-logged)
    // ------------------------------------------------------------------

    /// Detach `node`'s subtree as a new component and suppress its former
    /// parent. Returns the new component root (`node` itself). The edit is
    /// recorded in `undo`; [`Forest::merge`] is its exact inverse.
    pub fn cut(
        &mut self,
        node: Node,
        side: Side,
        undo: &mut UndoLog,
    ) -> Result<Node, ForestError> {
        let parent = self.nodes[node.0]
            .parent
            .ok_or(ForestError::CutAtComponentRoot)?;
        let (l, r) = self.nodes[parent.0].children.expect("parent is internal");
        let sibling = if l == node { r } else { l };
        let grandparent = self.nodes[parent.0].parent;

        self.nodes[node.0].parent = None;
        self.nodes[sibling.0].parent = grandparent;
        let root_slot = match grandparent {
            Some(gp) => {
                let (gl, gr) = self.nodes[gp.0].children.expect("grandparent is internal");
                self.nodes[gp.0].children = Some(if gl == parent {
                    (sibling, gr)
                } else {
                    (gl, sibling)
                });
                None
            }
            None => {
                let slot = self
                    .roots
                    .iter()
                    .position(|&rt| rt == parent)
                    .expect("suppressed parent was a component root");
                self.roots[slot] = sibling;
                Some(slot)
            }
        };
        self.roots.push(node);
        undo.push(Op::Cut {
            side,
            child: node,
            parent,
            sibling,
            grandparent,
            root_slot,
        });
        Ok(node)
    }

    /// Re-attach a component cut off by [`Forest::cut`]. Arguments are the
    /// fields of the corresponding undo record; the component to merge must
    /// be the most recently created one (LIFO discipline).
    pub fn merge(
        &mut self,
        child: Node,
        parent: Node,
        sibling: Node,
        grandparent: Option<Node>,
        root_slot: Option<usize>,
    ) {
        let popped = self.roots.pop().expect("merge on an empty component list");
        debug_assert_eq!(popped, child, "undo records consumed out of order");
        self.nodes[child.0].parent = Some(parent);
        self.nodes[sibling.0].parent = Some(parent);
        match grandparent {
            Some(gp) => {
                let (gl, gr) = self.nodes[gp.0].children.expect("grandparent is internal");
                self.nodes[gp.0].children = Some(if gl == sibling {
                    (parent, gr)
                } else {
                    (gl, parent)
                });
            }
            None => {
                let slot = root_slot.expect("root cut recorded its slot");
                self.roots[slot] = parent;
            }
        }
    }

    pub(crate) fn apply_contract(&mut self, parent: Node, label: Label, twin: Node) {
        let d = &mut self.nodes[parent.0];
        d.label = Some(label);
        d.twin = Some(twin);
        d.contracted = true;
    }

    pub(crate) fn undo_contract(&mut self, parent: Node) {
        let d = &mut self.nodes[parent.0];
        d.label = None;
        d.twin = None;
        d.contracted = false;
    }

    pub(crate) fn apply_finish(&mut self, root: Node) {
        self.nodes[root.0].finished = true;
    }

    pub(crate) fn undo_finish(&mut self, root: Node) {
        self.nodes[root.0].finished = false;
    }

    // ------------------------------------------------------------------
    // Agreement testing
    // ------------------------------------------------------------------

    /// Twin-isomorphic image of this forest's subtree under `node` inside
    /// `other`, computed bottom-up: a leaf maps to its twin, an internal
    /// node maps to the shared parent of its children's images if they are
    /// siblings. `None` means the subtrees disagree.
    pub fn agreement_image(&self, other: &Forest, node: Node) -> Option<Node> {
        if self.is_effective_leaf(node) {
            return self.nodes[node.0].twin;
        }
        let (l, r) = self.nodes[node.0].children.expect("internal node");
        let il = self.agreement_image(other, l)?;
        let ir = self.agreement_image(other, r)?;
        let pl = other.nodes[il.0].parent?;
        let pr = other.nodes[ir.0].parent?;
        (pl == pr && il != ir).then_some(pl)
    }

    // ------------------------------------------------------------------
    // Cluster bookkeeping
    // ------------------------------------------------------------------

    /// Replace `node`'s subtree with a fresh placeholder leaf carrying
    /// `label`, detach the subtree as a bookkeeping component, and record
    /// the placeholder under `id` for later [`Forest::join_cluster`].
    /// Returns the detached subtree root.
    pub fn add_cluster(
        &mut self,
        node: Node,
        id: usize,
        label: Label,
    ) -> Result<Node, ForestError> {
        let parent = self.nodes[node.0]
            .parent
            .ok_or(ForestError::ClusterAtComponentRoot)?;
        let ph = Node(self.nodes.len());
        self.nodes.push(NodeData {
            parent: Some(parent),
            ..NodeData::leaf(label)
        });
        let (l, r) = self.nodes[parent.0].children.expect("parent is internal");
        self.nodes[parent.0].children = Some(if l == node { (ph, r) } else { (l, ph) });
        self.nodes[node.0].parent = None;
        self.roots.push(node);
        self.clusters.push((id, ph));
        Ok(node)
    }

    /// The placeholder leaf created for cluster `id`.
    pub fn get_cluster_node(&self, id: usize) -> Option<Node> {
        self.clusters
            .iter()
            .find(|&&(cid, _)| cid == id)
            .map(|&(_, n)| n)
    }

    /// Re-register a cluster placeholder after this forest was rebuilt by
    /// copying (placeholders are located by label in the copy).
    pub fn register_cluster(&mut self, id: usize, node: Node) {
        self.clusters.push((id, node));
    }

    /// Find the unique node carrying `label` by walking all components.
    pub fn find_label(&self, label: Label) -> Option<Node> {
        for &root in &self.roots {
            let mut stack = vec![root];
            while let Some(n) = stack.pop() {
                if self.nodes[n.0].label == Some(label) && self.nodes[n.0].children.is_none() {
                    return Some(n);
                }
                if let Some((l, r)) = self.nodes[n.0].children {
                    stack.push(r);
                    stack.push(l);
                }
            }
        }
        None
    }

    /// Substitute the solved sub-instance `solved` back into the
    /// placeholder registered under `id`. The content of the solved
    /// forest's ρ-component takes the placeholder's position (an empty
    /// remnant deletes the placeholder); all other components are appended
    /// as components of this forest.
    pub fn join_cluster(&mut self, id: usize, solved: &Forest) -> Result<(), ForestError> {
        let ph = self
            .get_cluster_node(id)
            .ok_or(ForestError::UnknownCluster(id))?;
        let rho = solved.rho.expect("solved instance carries a root handle");
        let rho_root = solved.component_root(rho);

        for &r in &solved.roots {
            if r == rho_root {
                continue;
            }
            let copied = self.import(solved, r);
            self.roots.push(copied);
        }

        if rho_root == rho {
            // Bare ρ: the remnant is empty, the placeholder disappears.
            self.remove_leaf(ph);
        } else {
            let (l, r) = solved.nodes[rho_root.0].children.expect("handle root");
            let remnant = if l == rho { r } else { l };
            let copied = self.import(solved, remnant);
            self.replace_node(ph, copied);
        }
        Ok(())
    }

    /// Splice `with` into the tree position currently held by `node`.
    fn replace_node(&mut self, node: Node, with: Node) {
        match self.nodes[node.0].parent {
            Some(p) => {
                let (l, r) = self.nodes[p.0].children.expect("parent is internal");
                self.nodes[p.0].children = Some(if l == node { (with, r) } else { (l, with) });
                self.nodes[with.0].parent = Some(p);
            }
            None => {
                let slot = self
                    .roots
                    .iter()
                    .position(|&rt| rt == node)
                    .expect("parentless node is a component root");
                self.roots[slot] = with;
                self.nodes[with.0].parent = None;
            }
        }
        self.nodes[node.0].parent = None;
    }

    /// Remove a leaf from its component, suppressing its parent. A leaf
    /// that forms a whole component drops the component.
    fn remove_leaf(&mut self, leaf: Node) {
        match self.nodes[leaf.0].parent {
            Some(p) => {
                let (l, r) = self.nodes[p.0].children.expect("parent is internal");
                let sibling = if l == leaf { r } else { l };
                self.replace_node(p, sibling);
                self.nodes[leaf.0].parent = None;
            }
            None => {
                self.roots.retain(|&rt| rt != leaf);
            }
        }
    }

    /// Remove the components in `range` of the ordered root list. Used to
    /// discard the bookkeeping components of a finished cluster
    /// decomposition; the arena keeps the slots.
    pub fn erase_components(&mut self, range: Range<usize>) {
        assert!(
            range.start <= range.end && range.end <= self.roots.len(),
            "component range out of bounds"
        );
        self.roots.drain(range);
    }

    /// Append every component of `other` to this forest (deep copy).
    pub fn absorb(&mut self, other: &Forest) {
        for &r in &other.roots {
            let copied = self.import(other, r);
            self.roots.push(copied);
        }
    }

    // ------------------------------------------------------------------
    // Printing
    // ------------------------------------------------------------------

    /// Render one component, ρ elided. `None` when the component is the
    /// bare ρ marker.
    pub fn component_string(&self, root: Node, labels: &LabelMap) -> Option<String> {
        if self.nodes[root.0].label == Some(RHO) && self.nodes[root.0].children.is_none() {
            return None;
        }
        let mut out = String::new();
        self.write_node(root, labels, &mut out);
        Some(out)
    }

    fn write_node(&self, n: Node, labels: &LabelMap, out: &mut String) {
        match self.nodes[n.0].children {
            None => out.push_str(labels.name(self.nodes[n.0].label.expect("leaf has label"))),
            Some((l, r)) => {
                let lr = self.nodes[l.0].label == Some(RHO) && self.nodes[l.0].children.is_none();
                let rr = self.nodes[r.0].label == Some(RHO) && self.nodes[r.0].children.is_none();
                if lr {
                    self.write_node(r, labels, out);
                } else if rr {
                    self.write_node(l, labels, out);
                } else {
                    out.push('(');
                    self.write_node(l, labels, out);
                    out.push(',');
                    self.write_node(r, labels, out);
                    out.push(')');
                }
            }
        }
    }

    /// All components, space separated; single-leaf components print as
    /// bare labels.
    pub fn components_string(&self, labels: &LabelMap) -> String {
        self.roots
            .iter()
            .filter_map(|&r| self.component_string(r, labels))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Establish the twin bijection between the effective leaves of both
/// forests, keyed by label. Fails when the label sets differ.
pub fn sync_twins(a: &mut Forest, b: &mut Forest) -> Result<(), ForestError> {
    let map_a = leaf_map(a);
    let map_b = leaf_map(b);
    if map_a.len() != map_b.len() {
        return Err(ForestError::LabelMismatch);
    }
    for (&label, &na) in &map_a {
        let &nb = map_b.get(&label).ok_or(ForestError::LabelMismatch)?;
        a.nodes[na.0].twin = Some(nb);
        b.nodes[nb.0].twin = Some(na);
    }
    Ok(())
}

fn leaf_map(f: &Forest) -> HashMap<Label, Node> {
    let mut map = HashMap::new();
    for &root in f.components() {
        for leaf in f.component_leaves(root) {
            if let Some(label) = f.label(leaf) {
                map.insert(label, leaf);
            }
        }
    }
    map
}

/// Contract the agreeing sibling pair `(x, y)` of forest A (whose twins
/// are siblings in forest B): both parents become pseudo-leaves carrying
/// the pair's surviving label, twinned with each other.
pub fn contract_pair(
    a: &mut Forest,
    b: &mut Forest,
    x: Node,
    y: Node,
    undo: &mut UndoLog,
) {
    let pa = a.parent(x).expect("sibling pair has a parent");
    let xb = a.twin(x).expect("leaf has a twin");
    let pb = b.parent(xb).expect("twin pair has a parent");
    // ρ never names a pseudo-leaf.
    let label = if a.label(x) == Some(RHO) {
        a.label(y).expect("effective leaf has a label")
    } else {
        a.label(x).expect("effective leaf has a label")
    };
    a.apply_contract(pa, label, pb);
    b.apply_contract(pb, label, pa);
    undo.push(Op::Contract {
        a_parent: pa,
        b_parent: pb,
        label,
    });
}

/// Retire the agreeing component pair `(ra, rb)` from the active search.
pub fn finish_pair(a: &mut Forest, b: &mut Forest, ra: Node, rb: Node, undo: &mut UndoLog) {
    a.apply_finish(ra);
    b.apply_finish(rb);
    undo.push(Op::Finish {
        a_root: ra,
        b_root: rb,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_tree;

    fn build_pair(n1: &str, n2: &str) -> (Forest, Forest, LabelMap) {
        let mut labels = LabelMap::new();
        let t1 = parse_tree(n1, &mut labels).unwrap();
        let t2 = parse_tree(n2, &mut labels).unwrap();
        let mut f1 = Forest::from_tree(&t1);
        let mut f2 = Forest::from_tree(&t2);
        sync_twins(&mut f1, &mut f2).unwrap();
        (f1, f2, labels)
    }

    fn leaf(f: &Forest, labels: &LabelMap, name: &str) -> Node {
        f.find_label(labels.get(name).unwrap()).unwrap()
    }

    #[test]
    fn root_handle_is_elided_in_output() {
        let (f1, _, labels) = build_pair("((1,2),3)", "((1,2),3)");
        assert_eq!(f1.components_string(&labels), "((1,2),3)");
        assert_eq!(f1.num_components(), 1);
        assert!(!f1.contains_rho());
    }

    #[test]
    fn cut_detaches_and_suppresses() {
        let (mut f1, mut f2, labels) = build_pair("((1,2),3)", "((1,2),3)");
        let mut undo = UndoLog::new();
        let three = leaf(&f1, &labels, "3");
        let root = f1.cut(three, Side::A, &mut undo).unwrap();
        assert_eq!(root, three);
        assert_eq!(f1.num_components(), 2);
        assert_eq!(f1.components_string(&labels), "(1,2) 3");
        // Forest B untouched.
        assert_eq!(f2.components_string(&labels), "((1,2),3)");
        undo.rewind(undo.checkpoint(), &mut f1, &mut f2); // no-op checkpoint
        assert_eq!(f1.num_components(), 2);
    }

    #[test]
    fn undo_restores_structure_exactly() {
        let (mut f1, mut f2, labels) = build_pair("(((1,2),3),4)", "(((1,2),3),4)");
        let before = f1.components_string(&labels);
        let mut undo = UndoLog::new();
        let cp = undo.checkpoint();

        let two = leaf(&f1, &labels, "2");
        f1.cut(two, Side::A, &mut undo).unwrap();
        let four = leaf(&f1, &labels, "4");
        f1.cut(four, Side::A, &mut undo).unwrap();
        assert_eq!(f1.num_components(), 3);

        undo.rewind(cp, &mut f1, &mut f2);
        assert_eq!(f1.num_components(), 1);
        assert_eq!(f1.components_string(&labels), before);
        assert!(undo.is_empty());
    }

    #[test]
    fn cutting_next_to_rho_leaves_a_bare_remnant() {
        let (mut f1, mut f2, labels) = build_pair("(1,2)", "(1,2)");
        let mut undo = UndoLog::new();
        let cp = undo.checkpoint();
        // Cut the whole original tree off the handle: only ρ remains there.
        let root = f1.components()[0];
        let (l, r) = f1.children(root).unwrap();
        let original = if f1.label(r) == Some(RHO) { l } else { r };
        f1.cut(original, Side::A, &mut undo).unwrap();
        assert!(f1.contains_rho());
        assert_eq!(f1.components_string(&labels), "(1,2)");
        undo.rewind(cp, &mut f1, &mut f2);
        assert!(!f1.contains_rho());
    }

    #[test]
    fn contraction_makes_a_pseudo_leaf_and_undoes() {
        let (mut f1, mut f2, labels) = build_pair("((1,2),3)", "((1,2),3)");
        let mut undo = UndoLog::new();
        let cp = undo.checkpoint();
        let one = leaf(&f1, &labels, "1");
        let two = leaf(&f1, &labels, "2");
        contract_pair(&mut f1, &mut f2, one, two, &mut undo);
        let p = f1.parent(one).unwrap();
        assert!(f1.is_effective_leaf(p));
        assert_eq!(f1.label(p), Some(labels.get("1").unwrap()));
        assert!(f1.twin(p).is_some());
        // Printing still expands the retained subtree.
        assert_eq!(f1.components_string(&labels), "((1,2),3)");
        undo.rewind(cp, &mut f1, &mut f2);
        assert!(!f1.is_effective_leaf(p));
        assert_eq!(f1.label(p), None);
    }

    #[test]
    fn agreement_image_detects_matching_subtrees() {
        let (f1, f2, labels) = build_pair("((1,2),(3,4))", "((3,4),(2,1))");
        let one = leaf(&f2, &labels, "1");
        let p = f2.parent(one).unwrap(); // (2,1) in forest B
        let image = f2.agreement_image(&f1, p).unwrap();
        let one_a = leaf(&f1, &labels, "1");
        assert_eq!(image, f1.parent(one_a).unwrap());

        // ((3,4),(2,1)) vs ((1,2),(3,4)) as whole components also agree.
        let rb = f2.components()[0];
        assert!(f2.agreement_image(&f1, rb).is_some());
    }

    #[test]
    fn agreement_image_rejects_conflicts() {
        let (f1, f2, labels) = build_pair("((1,2),(3,4))", "((1,3),(2,4))");
        let one = leaf(&f2, &labels, "1");
        let p = f2.parent(one).unwrap(); // (1,3) in B has no image in A
        assert!(f2.agreement_image(&f1, p).is_none());
    }

    #[test]
    fn cluster_add_and_join_roundtrip() {
        let mut labels = LabelMap::new();
        let t1 = parse_tree("(((1,2),3),4)", &mut labels).unwrap();
        let mut f1 = Forest::from_tree_plain(&t1);
        let one = f1.find_label(labels.get("1").unwrap()).unwrap();
        let sub = f1.parent(one).unwrap(); // (1,2)
        let x = labels.fresh_placeholder();
        let detached = f1.add_cluster(sub, 0, x).unwrap();
        assert_eq!(detached, sub);
        assert_eq!(f1.components_string(&labels), "((X4,3),4) (1,2)");
        assert!(f1.get_cluster_node(0).is_some());

        // Solve the piece trivially (identity) and join it back.
        let piece = Forest::from_subtree(&f1, detached);
        f1.join_cluster(0, &piece).unwrap();
        assert!(f1.components_string(&labels).starts_with("(((1,2),3),4)"));

        f1.erase_components(1..2);
        assert_eq!(f1.components_string(&labels), "(((1,2),3),4)");
    }

    #[test]
    fn join_with_bare_rho_deletes_placeholder() {
        let mut labels = LabelMap::new();
        let t1 = parse_tree("(((1,2),3),4)", &mut labels).unwrap();
        let mut f1 = Forest::from_tree_plain(&t1);
        let one = f1.find_label(labels.get("1").unwrap()).unwrap();
        let sub = f1.parent(one).unwrap();
        let x = labels.fresh_placeholder();
        let detached = f1.add_cluster(sub, 7, x).unwrap();

        // Simulate a solved piece whose root remnant was fully separated.
        let mut piece = Forest::from_subtree(&f1, detached);
        let mut undo = UndoLog::new();
        let root = piece.components()[0];
        let (l, r) = piece.children(root).unwrap();
        let content = if piece.label(r) == Some(RHO) { l } else { r };
        piece.cut(content, Side::A, &mut undo).unwrap();
        assert!(piece.contains_rho());

        f1.join_cluster(7, &piece).unwrap();
        // Placeholder gone, (1,2) appended as its own component.
        assert_eq!(f1.components_string(&labels), "(3,4) (1,2) (1,2)");
        f1.erase_components(1..2); // drop the stale bookkeeping component
        assert_eq!(f1.components_string(&labels), "(3,4) (1,2)");
    }

    #[test]
    fn unknown_cluster_is_an_error() {
        let mut labels = LabelMap::new();
        let t1 = parse_tree("(1,2)", &mut labels).unwrap();
        let mut f1 = Forest::from_tree_plain(&t1);
        let piece = Forest::from_tree(&t1);
        assert!(matches!(
            f1.join_cluster(3, &piece),
            Err(ForestError::UnknownCluster(3))
        ));
    }

    #[test]
    fn sync_twins_rejects_mismatched_labels() {
        let mut labels = LabelMap::new();
        let t1 = parse_tree("(1,2)", &mut labels).unwrap();
        let t2 = parse_tree("(1,3)", &mut labels).unwrap();
        let mut f1 = Forest::from_tree(&t1);
        let mut f2 = Forest::from_tree(&t2);
        assert!(sync_twins(&mut f1, &mut f2).is_err());
    }
}
