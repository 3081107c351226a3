//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `labels`: string ↔ integer taxon label translation.
//! - `tree`: arena-based rooted binary trees and rooting enumeration.
//! - `lca`: constant-time lowest-common-ancestor queries over fixed trees.
//! - `newick`: reading Newick input through `phylotree`.
//! - `forest`: the mutable forest pair with twins, ρ and cluster plumbing.
//! - `undo`: the LIFO edit log that makes backtracking affordable.
//! - `approx`: the linear-time 3-approximation of the rSPR distance.
//! - `search`: the branch-and-bound FPT exact search.
//! - `cluster`: cluster decomposition into independent sub-instances.
//! - `api`: Python bindings via `pyo3` (gated behind the "python" feature).
//!
//! Public API kept stable by re-exporting the key items below.

pub mod approx;
pub mod cluster;
pub mod forest;
pub mod labels;
pub mod lca;
pub mod newick;
pub mod search;
pub mod tree;
pub mod undo;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use approx::{approximate, approximate_trees, ApproxOptions};
pub use cluster::{decompose_and_solve, find_cluster_points, Decomposition};
pub use forest::{sync_twins, Forest, ForestError};
pub use labels::{Label, LabelMap, RHO};
pub use lca::LcaIndex;
pub use newick::{parse_tree, ParseError};
pub use search::{exact, solve, solve_all, Config, Exact};
pub use tree::{Node, Tree};
pub use undo::{Checkpoint, Side, UndoLog};
