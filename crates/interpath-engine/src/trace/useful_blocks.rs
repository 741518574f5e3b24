//! Minimal unsatisfiable subsets of block formulas.
//!
//! Blocks outside the subset are replaced by `true` before interpolation so
//! that interpolants only mention what is needed to refute the trace.

use super::*;

/// Traversal used to grow the unsatisfiable subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreTraversal {
    Forwards,
    Backwards,
    /// Alternate between the front and the back of the trace.
    ZigZag,
}

impl CoreTraversal {
    pub fn for_ordering(ordering: OrderingStrategy) -> Self {
        match ordering {
            OrderingStrategy::ZigZag => CoreTraversal::ZigZag,
            o if o.is_backwards() => CoreTraversal::Backwards,
            _ => CoreTraversal::Forwards,
        }
    }
}

/// Replace every block outside a minimal unsatisfiable subset by `true`.
///
/// Satisfiable traces and cancelled searches return the blocks unchanged.
pub fn useful_blocks<F: SolverFactory>(
    factory: &F,
    blocks: &BlockFormulas,
    traversal: CoreTraversal,
    cancel: &CancellationToken,
) -> Result<BlockFormulas, RefinementError> {
    let Some(useful) = minimal_core(factory, blocks.formulas(), traversal, cancel)? else {
        return Ok(blocks.clone());
    };
    let kept = useful.iter().filter(|u| **u).count();
    debug!(kept, total = blocks.len(), ?traversal, "useful blocks");
    let formulas = blocks
        .formulas()
        .iter()
        .zip(&useful)
        .map(|(formula, useful)| {
            if *useful {
                formula.clone()
            } else {
                SmtTerm::bool(true)
            }
        })
        .collect();
    Ok(blocks.replace_formulas(formulas))
}

/// Deletion-free core search: each round asserts the blocks known to be
/// needed, then adds the remaining blocks in traversal order until the
/// conjunction becomes UNSAT. The block that closed it is needed.
fn minimal_core<F: SolverFactory>(
    factory: &F,
    formulas: &[SmtTerm],
    traversal: CoreTraversal,
    cancel: &CancellationToken,
) -> Result<Option<Vec<bool>>, RefinementError> {
    let n = formulas.len();
    let mut useful = vec![false; n];
    // Zig-zag keeps alternating across rounds.
    let mut from_front = true;
    loop {
        if cancel.is_cancelled() {
            debug!("useful block search cancelled");
            return Ok(None);
        }
        let mut session = InterpolationSession::open(factory)?;
        for (formula, _) in formulas.iter().zip(&useful).filter(|(_, u)| **u) {
            session.push(formula)?;
        }
        if session.is_unsat()? {
            return Ok(Some(useful));
        }

        let candidates: Vec<usize> = match traversal {
            CoreTraversal::Forwards => (0..n).collect(),
            CoreTraversal::Backwards => (0..n).rev().collect(),
            CoreTraversal::ZigZag => {
                let (mut lo, mut hi) = (0, n);
                let mut visit = Vec::with_capacity(n);
                while lo < hi {
                    if from_front {
                        visit.push(lo);
                        lo += 1;
                    } else {
                        hi -= 1;
                        visit.push(hi);
                    }
                    from_front = !from_front;
                }
                visit
            }
        };

        let mut needed = None;
        for i in candidates.into_iter().filter(|i| !useful[*i]) {
            if cancel.is_cancelled() {
                debug!("useful block search cancelled");
                return Ok(None);
            }
            session.push(&formulas[i])?;
            if session.is_unsat()? {
                needed = Some(i);
                break;
            }
        }
        match needed {
            Some(i) => useful[i] = true,
            None => return Ok(None),
        }
    }
}
