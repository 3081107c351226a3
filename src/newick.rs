//! Reading Newick strings into arena trees.
//!
//! Parsing proper is delegated to `phylotree`; this module only normalizes
//! the raw input line (trailing semicolon, stray whitespace) and converts
//! the parsed structure into [`crate::tree::Tree`], translating labels
//! through the shared [`LabelMap`].

use crate::labels::LabelMap;
use crate::tree::{Tree, TreeBuildError};
use phylotree::tree::{NewickParseError, Tree as PhyloTree};
use thiserror::Error;

/// Errors reading an input tree line.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed newick: {0}")]
    Newick(#[from] NewickParseError),
    #[error(transparent)]
    Build(#[from] TreeBuildError),
}

/// Parse one Newick line into an arena tree.
///
/// Accepts input with or without the trailing `;`. Labels are interned into
/// `labels`, so a pair of trees parsed through the same map share ids.
pub fn parse_tree(line: &str, labels: &mut LabelMap) -> Result<Tree, ParseError> {
    let trimmed = line.trim();
    let normalized = if trimmed.ends_with(';') {
        trimmed.to_string()
    } else {
        format!("{trimmed};")
    };
    let phylo = PhyloTree::from_newick(&normalized)?;
    Ok(Tree::from_phylo(&phylo, labels)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_semicolon() {
        let mut labels = LabelMap::new();
        let t1 = parse_tree("((1,2),3)", &mut labels).unwrap();
        let t2 = parse_tree("((1,2),3);", &mut labels).unwrap();
        assert_eq!(t1.newick(&labels), t2.newick(&labels));
    }

    #[test]
    fn shared_map_gives_shared_ids() {
        let mut labels = LabelMap::new();
        let t1 = parse_tree("(a,b)", &mut labels).unwrap();
        let t2 = parse_tree("(b,a)", &mut labels).unwrap();
        let l1: Vec<_> = t1.leaves().map(|n| t1.node(n).label).collect();
        let l2: Vec<_> = t2.leaves().map(|n| t2.node(n).label).collect();
        assert_eq!(l1.len(), 2);
        // Same taxa, same ids, opposite order.
        assert_eq!(l1[0], l2[1]);
        assert_eq!(l1[1], l2[0]);
    }

    #[test]
    fn reports_parse_errors() {
        let mut labels = LabelMap::new();
        assert!(parse_tree("((1,2", &mut labels).is_err());
    }
}
