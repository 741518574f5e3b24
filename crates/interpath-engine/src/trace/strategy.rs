//! Interpolation strategies: how interpolants for the split points of an
//! UNSAT trace are requested from the solver.

use super::*;

/// A pushed block formula with its logical position in the trace.
#[derive(Debug, Clone)]
pub(crate) struct PushedBlock<G> {
    pub(crate) position: usize,
    pub(crate) group: G,
}

impl InterpolationStrategy {
    /// One interpolant per split point `0..n-1` of the trace made of
    /// `blocks`, in logical order. The last check on `session` must have been
    /// UNSAT.
    ///
    /// `call_depths[i]` is the call depth after block `i`; tree strategies
    /// use it to lay out the interpolation tree.
    pub(crate) fn interpolants<S: InterpolatingSolver>(
        self,
        session: &mut InterpolationSession<S>,
        blocks: &[PushedBlock<S::Group>],
        call_depths: Option<&[usize]>,
    ) -> Result<Vec<SmtTerm>, RefinementError> {
        let n = blocks.len();
        if n <= 1 {
            return Ok(Vec::new());
        }
        let mut by_position: Vec<&PushedBlock<S::Group>> = blocks.iter().collect();
        by_position.sort_by_key(|block| block.position);
        let partitions: Vec<Vec<S::Group>> = by_position
            .iter()
            .map(|block| vec![block.group.clone()])
            .collect();

        let interpolants = match self {
            InterpolationStrategy::Sequential => {
                let mut out = Vec::with_capacity(n - 1);
                let mut a_side = Vec::with_capacity(n - 1);
                for partition in &partitions[..n - 1] {
                    a_side.extend(partition.iter().cloned());
                    out.push(session.interpolant(&a_side)?);
                }
                out
            }
            InterpolationStrategy::SequentialNative => {
                if !session.solver().supports_sequence_interpolants() {
                    debug!("solver answers sequence queries pairwise");
                }
                session.sequence_interpolants(&partitions)?
            }
            InterpolationStrategy::Tree
            | InterpolationStrategy::TreeWellScoped
            | InterpolationStrategy::TreeNested => {
                let starts = tree_layout(self, call_depths, n);
                debug!(strategy = %self, start_of_subtree = ?starts, "tree interpolation layout");
                let tree = session
                    .tree_interpolants(&partitions, &starts)?
                    .ok_or_else(|| RefinementError::Solver {
                        context: "tree interpolation",
                        message: "solver does not support tree interpolation".into(),
                    })?;
                if tree.len() != n - 1 {
                    return Err(wrong_count(tree.len(), n - 1));
                }
                flatten_tree_interpolants(&tree, &starts)
            }
        };
        if interpolants.len() != n - 1 {
            return Err(wrong_count(interpolants.len(), n - 1));
        }
        Ok(interpolants)
    }
}

fn wrong_count(got: usize, expected: usize) -> RefinementError {
    RefinementError::Solver {
        context: "interpolation",
        message: format!("solver returned {got} interpolants, expected {expected}"),
    }
}

/// Post-order layout of the interpolation tree: `starts[i]` is the left-most
/// node of the subtree rooted at block `i`, and the last block is the root.
///
/// Blocks between a call and its return form a subtree hanging below the
/// return block. The strategies differ in which boundary blocks belong to
/// that subtree: none, the return block, or both call and return block.
/// Without call depths the tree degenerates to a chain.
pub(crate) fn tree_layout(
    strategy: InterpolationStrategy,
    call_depths: Option<&[usize]>,
    n: usize,
) -> Vec<usize> {
    let mut starts = vec![0; n];
    let Some(depths) = call_depths.filter(|d| d.len() == n) else {
        return starts;
    };
    // Start of the innermost open scope; the bottom entry is the entry
    // function and is never popped.
    let mut scopes = vec![0usize];
    let mut previous = 0usize;
    for (i, &depth) in depths.iter().enumerate() {
        let top = |scopes: &[usize]| scopes.last().copied().unwrap_or(0);
        if depth > previous {
            match strategy {
                InterpolationStrategy::TreeNested => {
                    for _ in previous..depth {
                        scopes.push(i);
                    }
                    starts[i] = top(&scopes);
                }
                _ => {
                    starts[i] = top(&scopes);
                    for _ in previous..depth {
                        scopes.push(i + 1);
                    }
                }
            }
        } else if depth < previous {
            match strategy {
                InterpolationStrategy::Tree => {
                    for _ in depth..previous {
                        if scopes.len() > 1 {
                            scopes.pop();
                        }
                    }
                    starts[i] = top(&scopes);
                }
                _ => {
                    starts[i] = top(&scopes);
                    for _ in depth..previous {
                        if scopes.len() > 1 {
                            scopes.pop();
                        }
                    }
                }
            }
        } else {
            starts[i] = top(&scopes);
        }
        previous = depth;
    }
    // Calls that never return leave scopes open; the root spans everything.
    if let Some(root) = starts.last_mut() {
        *root = 0;
    }
    starts
}

/// Turn tree interpolants into path interpolants: the interpolant at split
/// `i` is the tree interpolant of block `i` conjoined with the path
/// interpolant just before its subtree.
pub(crate) fn flatten_tree_interpolants(tree: &[SmtTerm], starts: &[usize]) -> Vec<SmtTerm> {
    let mut out: Vec<SmtTerm> = Vec::with_capacity(tree.len());
    for (i, itp) in tree.iter().enumerate() {
        let flattened = match starts[i] {
            0 => itp.clone(),
            start => SmtTerm::conjunction([itp.clone(), out[start - 1].clone()]),
        };
        out.push(flattened);
    }
    out
}
