//! Command-pattern undo log for the backtracking search.
//!
//! Every structural edit applied to a forest pair during search pushes one
//! record here. A failed branch rewinds to a checkpoint by popping records
//! in strict LIFO order and applying their inverses, restoring the pair in
//! time proportional to the number of edits, not the structure size.
//! Records are index-based deltas: arena slots are never reused, so a
//! record stays valid for exactly as long as it sits in the log.

use crate::forest::Forest;
use crate::labels::Label;
use crate::tree::Node;

/// Which forest of the active pair an edit applied to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    A,
    B,
}

/// One reversible structural edit.
#[derive(Clone, Debug)]
pub(crate) enum Op {
    /// `child`'s subtree was detached and `parent` suppressed.
    Cut {
        side: Side,
        child: Node,
        parent: Node,
        sibling: Node,
        grandparent: Option<Node>,
        /// Where `parent` sat in the component-root list, if it was a root.
        root_slot: Option<usize>,
    },
    /// An agreeing sibling pair was collapsed into a pseudo-leaf on each
    /// side; records the two parents and the label they took over.
    Contract {
        a_parent: Node,
        b_parent: Node,
        label: Label,
    },
    /// A component pair was proven agreeing and retired from the search.
    Finish { a_root: Node, b_root: Node },
}

/// A position in the log to rewind back to.
#[derive(Clone, Copy, Debug)]
pub struct Checkpoint(pub(crate) usize);

/// The log itself. Owned by one search instance; never shared.
#[derive(Debug, Default)]
pub struct UndoLog {
    ops: Vec<Op>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.ops.len())
    }

    pub(crate) fn push(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Committed forest-B cut records in the log. Cuts are only ever
    /// counted on the B side, so this is the distance witnessed so far.
    pub fn b_cuts(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, Op::Cut { side: Side::B, .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Pop and invert every edit made since `cp`, newest first.
    ///
    /// Rewinding past the front of the log is a contract violation and
    /// aborts rather than corrupt the forests.
    pub fn rewind(&mut self, cp: Checkpoint, a: &mut Forest, b: &mut Forest) {
        assert!(
            cp.0 <= self.ops.len(),
            "rewind past the end of the undo log"
        );
        while self.ops.len() > cp.0 {
            match self.ops.pop().expect("log length checked") {
                Op::Cut {
                    side,
                    child,
                    parent,
                    sibling,
                    grandparent,
                    root_slot,
                } => {
                    let forest = match side {
                        Side::A => &mut *a,
                        Side::B => &mut *b,
                    };
                    forest.merge(child, parent, sibling, grandparent, root_slot);
                }
                Op::Contract {
                    a_parent,
                    b_parent,
                    label,
                } => {
                    debug_assert_eq!(
                        a.label(a_parent),
                        Some(label),
                        "contract record does not match forest state"
                    );
                    a.undo_contract(a_parent);
                    b.undo_contract(b_parent);
                }
                Op::Finish { a_root, b_root } => {
                    a.undo_finish(a_root);
                    b.undo_finish(b_root);
                }
            }
        }
    }
}
