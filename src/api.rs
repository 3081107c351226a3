//! Python binding layer for rSPR distance calculations.
//!
//! Provides Python functions for computing exact rSPR distances between
//! rooted binary trees given as Newick strings, pairwise and in parallel.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rayon::prelude::*;

use crate::forest::{sync_twins, Forest};
use crate::labels::LabelMap;
use crate::newick::parse_tree;
use crate::search::{solve, Config};

fn distance_of(newick1: &str, newick2: &str, cfg: &Config) -> Result<usize, String> {
    let mut labels = LabelMap::new();
    let t1 = parse_tree(newick1, &mut labels).map_err(|e| e.to_string())?;
    let t2 = parse_tree(newick2, &mut labels).map_err(|e| e.to_string())?;
    let mut f1 = Forest::from_tree(&t1);
    let mut f2 = Forest::from_tree(&t2);
    sync_twins(&mut f1, &mut f2).map_err(|e| e.to_string())?;
    Ok(solve(&mut f1, &mut f2, cfg))
}

/// Compute the exact rSPR distance between two Newick trees.
///
/// Args:
///     newick1: First rooted binary tree in Newick format
///     newick2: Second rooted binary tree in Newick format
///
/// Returns:
///     The exact rSPR distance.
///
/// Raises:
///     ValueError: If a tree is malformed or the leaf sets differ
#[pyfunction]
#[pyo3(signature = (newick1, newick2))]
fn spr_distance(newick1: &str, newick2: &str) -> PyResult<usize> {
    distance_of(newick1, newick2, &Config::default()).map_err(PyValueError::new_err)
}

/// Compute pairwise exact rSPR distances over a list of Newick trees.
///
/// Args:
///     newicks: List of rooted binary trees in Newick format
///
/// Returns:
///     A symmetric 2D list of exact distances.
///
/// Raises:
///     ValueError: If fewer than 2 trees are given, a tree is malformed,
///     or two trees have different leaf sets
#[pyfunction]
#[pyo3(signature = (newicks))]
fn pairwise_spr(newicks: Vec<String>) -> PyResult<Vec<Vec<usize>>> {
    let n = newicks.len();
    if n < 2 {
        return Err(PyValueError::new_err(
            "Need at least 2 trees to compute pairwise distances",
        ));
    }

    let cfg = Config::default();
    // Parallel computation across all pairs; every pair owns its own
    // forests and undo log, so no synchronization is needed.
    let pairs: Vec<(usize, usize, usize)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| {
            distance_of(&newicks[i], &newicks[j], &cfg).map(|d| (i, j, d))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(PyValueError::new_err)?;

    // Fill matrix (symmetric)
    let mut matrix = vec![vec![0usize; n]; n];
    for (i, j, d) in pairs {
        matrix[i][j] = d;
        matrix[j][i] = d;
    }
    Ok(matrix)
}

/// Python module definition
#[pymodule]
fn rspr(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(spr_distance, m)?)?;
    m.add_function(wrap_pyfunction!(pairwise_spr, m)?)?;
    Ok(())
}
