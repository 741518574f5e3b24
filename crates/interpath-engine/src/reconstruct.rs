//! Rebuilding a precise error path from the branching decisions of a model.
//!
//! When abstract states merge several concrete branches, a feasible trace
//! does not pin down which concrete path the counterexample takes. The
//! model's branch decisions do: starting at the root of the reference graph,
//! follow at every branching node the edge the model chose, then replay the
//! resulting path to confirm it is feasible on its own.

use std::fmt;

use interpath_smt::solver::{Model, SatResult, SolverFactory};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::RefinementError;
use crate::program::{BlockFormulas, BranchDecisions, BranchPointId};
use crate::result::PrecisePath;
use crate::trace::InterpolationSession;

/// Reference graph containing every concrete path the abstract error path
/// may stand for.
pub trait PathGraph {
    type Node: Clone + PartialEq + fmt::Debug;

    fn root(&self) -> Self::Node;

    fn target(&self) -> Self::Node;

    /// Successors of `node` on some path to the target. A branching node
    /// labels each edge with the branch outcome it represents.
    fn children(&self, node: &Self::Node) -> Vec<(Self::Node, Option<bool>)>;

    /// Branch point decided at `node`, if it branches.
    fn branch_point(&self, node: &Self::Node) -> Option<BranchPointId>;
}

/// Builds the block formulas of a concrete path through a [`PathGraph`].
pub trait PathFormulaBuilder<N> {
    fn build_path_formulas(&self, path: &[N]) -> Result<BlockFormulas, RefinementError>;
}

#[derive(Debug, Error)]
pub enum ReconstructionError {
    #[error("feasible trace carries no branching information")]
    NoBranchingInformation,
    #[error("no decision recorded for branching node {0}")]
    MissingDecision(String),
    #[error("no successor of {node} matches branch outcome {outcome}")]
    NoMatchingEdge { node: String, outcome: bool },
    #[error("path ends at {0} before reaching the target")]
    DeadEnd(String),
    #[error("path revisits {0}")]
    Cycle(String),
    #[error(transparent)]
    Refinement(#[from] RefinementError),
}

/// Outcome of a reconstruction attempt. Failures never abort the analysis:
/// the caller keeps the imprecise path.
#[derive(Debug)]
pub enum Reconstruction<N> {
    Precise(PrecisePath<N>),
    Imprecise(ReconstructionError),
}

impl<N> Reconstruction<N> {
    pub fn into_precise(self) -> Option<PrecisePath<N>> {
        match self {
            Reconstruction::Precise(path) => Some(path),
            Reconstruction::Imprecise(_) => None,
        }
    }

    pub(crate) fn from_attempt(attempt: Result<PrecisePath<N>, ReconstructionError>) -> Self {
        match attempt {
            Ok(path) => {
                debug!(nodes = path.nodes.len(), "precise error path rebuilt");
                Reconstruction::Precise(path)
            }
            Err(reason) => {
                warn!(%reason, "keeping imprecise error path");
                Reconstruction::Imprecise(reason)
            }
        }
    }
}

pub struct ErrorPathReconstructor<'a, F: SolverFactory> {
    factory: &'a F,
}

impl<'a, F: SolverFactory> ErrorPathReconstructor<'a, F> {
    pub fn new(factory: &'a F) -> Self {
        Self { factory }
    }

    pub fn reconstruct<G, B>(
        &self,
        graph: &G,
        decisions: &BranchDecisions,
        builder: &B,
    ) -> Reconstruction<G::Node>
    where
        G: PathGraph,
        B: PathFormulaBuilder<G::Node> + ?Sized,
    {
        let attempt = concrete_path(graph, decisions, builder).and_then(|(nodes, formulas)| {
            let model = replay(self.factory, &formulas)?;
            Ok(PrecisePath { nodes, model })
        });
        Reconstruction::from_attempt(attempt)
    }
}

/// Concrete path chosen by `decisions` and its block formulas.
pub(crate) fn concrete_path<G, B>(
    graph: &G,
    decisions: &BranchDecisions,
    builder: &B,
) -> Result<(Vec<G::Node>, BlockFormulas), ReconstructionError>
where
    G: PathGraph,
    B: PathFormulaBuilder<G::Node> + ?Sized,
{
    if decisions.is_empty() {
        return Err(ReconstructionError::NoBranchingInformation);
    }
    let nodes = walk(graph, decisions)?;
    let formulas = builder.build_path_formulas(&nodes)?;
    Ok((nodes, formulas))
}

/// Check the rebuilt path on a fresh session; it must be feasible on its own.
pub(crate) fn replay<F: SolverFactory>(
    factory: &F,
    formulas: &BlockFormulas,
) -> Result<Model, ReconstructionError> {
    let mut session = InterpolationSession::open(factory)?;
    for formula in formulas.formulas() {
        session.push(formula)?;
    }
    match session.check_sat()? {
        SatResult::Sat => Ok(session.model()?),
        SatResult::Unsat => Err(RefinementError::InconsistentReplay(
            "path chosen by the model is infeasible".into(),
        )
        .into()),
        SatResult::Unknown(reason) => Err(RefinementError::Solver {
            context: "error path replay",
            message: format!("solver returned unknown: {reason}"),
        }
        .into()),
    }
}

/// Follow `decisions` from the root of `graph` to its target.
fn walk<G: PathGraph>(
    graph: &G,
    decisions: &BranchDecisions,
) -> Result<Vec<G::Node>, ReconstructionError> {
    let target = graph.target();
    let mut node = graph.root();
    let mut path = vec![node.clone()];
    while node != target {
        let mut children = graph.children(&node);
        let next = match children.len() {
            0 => return Err(ReconstructionError::DeadEnd(format!("{node:?}"))),
            1 => children.swap_remove(0).0,
            _ => {
                let decision = graph
                    .branch_point(&node)
                    .and_then(|id| decisions.get(&id).copied())
                    .ok_or_else(|| ReconstructionError::MissingDecision(format!("{node:?}")))?;
                children
                    .into_iter()
                    .find(|(_, outcome)| *outcome == Some(decision))
                    .map(|(child, _)| child)
                    .ok_or_else(|| ReconstructionError::NoMatchingEdge {
                        node: format!("{node:?}"),
                        outcome: decision,
                    })?
            }
        };
        if path.contains(&next) {
            return Err(ReconstructionError::Cycle(format!("{next:?}")));
        }
        path.push(next.clone());
        node = next;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpath_smt::backends::bounded::BoundedSolverFactory;
    use interpath_smt::terms::SmtTerm;
    use std::collections::BTreeMap;

    /// Diamond `0 -> {1 (then), 2 (else)} -> 3`.
    struct Diamond;

    impl PathGraph for Diamond {
        type Node = u32;

        fn root(&self) -> u32 {
            0
        }

        fn target(&self) -> u32 {
            3
        }

        fn children(&self, node: &u32) -> Vec<(u32, Option<bool>)> {
            match node {
                0 => vec![(1, Some(true)), (2, Some(false))],
                1 | 2 => vec![(3, None)],
                _ => Vec::new(),
            }
        }

        fn branch_point(&self, node: &u32) -> Option<BranchPointId> {
            (*node == 0).then_some(BranchPointId(0))
        }
    }

    /// Then-branch requires `x > 0`, else-branch `x <= 0`; the error edge
    /// requires `x = 2`.
    struct DiamondFormulas;

    impl PathFormulaBuilder<u32> for DiamondFormulas {
        fn build_path_formulas(&self, path: &[u32]) -> Result<BlockFormulas, RefinementError> {
            let x = || SmtTerm::var("x");
            let formulas = path
                .windows(2)
                .map(|edge| match (edge[0], edge[1]) {
                    (0, 1) => x().gt(SmtTerm::int(0)),
                    (0, 2) => x().le(SmtTerm::int(0)),
                    _ => x().eq(SmtTerm::int(2)),
                })
                .collect();
            Ok(BlockFormulas::new(formulas))
        }
    }

    fn decisions(taken: bool) -> BranchDecisions {
        BTreeMap::from([(BranchPointId(0), taken)])
    }

    #[test]
    fn follows_recorded_decision() {
        let factory = BoundedSolverFactory::default();
        let rebuilt = ErrorPathReconstructor::new(&factory)
            .reconstruct(&Diamond, &decisions(true), &DiamondFormulas)
            .into_precise()
            .expect("then-branch path should be feasible");
        assert_eq!(rebuilt.nodes, vec![0, 1, 3]);
        assert_eq!(rebuilt.model.get_int("x"), Some(2));
    }

    #[test]
    fn infeasible_replay_keeps_imprecise_path() {
        let factory = BoundedSolverFactory::default();
        let outcome = ErrorPathReconstructor::new(&factory).reconstruct(
            &Diamond,
            &decisions(false),
            &DiamondFormulas,
        );
        assert!(matches!(
            outcome,
            Reconstruction::Imprecise(ReconstructionError::Refinement(
                RefinementError::InconsistentReplay(_)
            ))
        ));
    }

    #[test]
    fn missing_decision_keeps_imprecise_path() {
        let factory = BoundedSolverFactory::default();
        let unrelated = BTreeMap::from([(BranchPointId(9), true)]);
        let outcome = ErrorPathReconstructor::new(&factory).reconstruct(
            &Diamond,
            &unrelated,
            &DiamondFormulas,
        );
        assert!(matches!(
            outcome,
            Reconstruction::Imprecise(ReconstructionError::MissingDecision(_))
        ));
    }

    #[test]
    fn empty_decisions_keep_imprecise_path_even_without_branches() {
        /// Straight line `0 -> 1 -> 2`.
        struct Line;
        impl PathGraph for Line {
            type Node = u32;
            fn root(&self) -> u32 {
                0
            }
            fn target(&self) -> u32 {
                2
            }
            fn children(&self, node: &u32) -> Vec<(u32, Option<bool>)> {
                match node {
                    0 | 1 => vec![(node + 1, None)],
                    _ => Vec::new(),
                }
            }
            fn branch_point(&self, _node: &u32) -> Option<BranchPointId> {
                None
            }
        }
        impl PathFormulaBuilder<u32> for Line {
            fn build_path_formulas(&self, path: &[u32]) -> Result<BlockFormulas, RefinementError> {
                Ok(BlockFormulas::new(
                    path.windows(2).map(|_| SmtTerm::bool(true)).collect(),
                ))
            }
        }

        let factory = BoundedSolverFactory::default();
        let outcome =
            ErrorPathReconstructor::new(&factory).reconstruct(&Line, &BranchDecisions::new(), &Line);
        assert!(matches!(
            outcome,
            Reconstruction::Imprecise(ReconstructionError::NoBranchingInformation)
        ));

        let decided = BTreeMap::from([(BranchPointId(0), true)]);
        let rebuilt = ErrorPathReconstructor::new(&factory)
            .reconstruct(&Line, &decided, &Line)
            .into_precise()
            .expect("straight-line path should replay");
        assert_eq!(rebuilt.nodes, vec![0, 1, 2]);
    }

    #[test]
    fn walk_detects_dead_ends_and_cycles() {
        struct Looping;
        impl PathGraph for Looping {
            type Node = u32;
            fn root(&self) -> u32 {
                0
            }
            fn target(&self) -> u32 {
                9
            }
            fn children(&self, node: &u32) -> Vec<(u32, Option<bool>)> {
                match node {
                    0 => vec![(1, None)],
                    1 => vec![(0, None)],
                    _ => Vec::new(),
                }
            }
            fn branch_point(&self, _node: &u32) -> Option<BranchPointId> {
                None
            }
        }
        assert!(matches!(
            walk(&Looping, &BranchDecisions::new()),
            Err(ReconstructionError::Cycle(_))
        ));

        struct Stub;
        impl PathGraph for Stub {
            type Node = u32;
            fn root(&self) -> u32 {
                0
            }
            fn target(&self) -> u32 {
                1
            }
            fn children(&self, _node: &u32) -> Vec<(u32, Option<bool>)> {
                Vec::new()
            }
            fn branch_point(&self, _node: &u32) -> Option<BranchPointId> {
                None
            }
        }
        assert!(matches!(
            walk(&Stub, &BranchDecisions::new()),
            Err(ReconstructionError::DeadEnd(_))
        ));
    }
}
