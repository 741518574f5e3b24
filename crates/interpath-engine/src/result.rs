use interpath_smt::solver::Model;
use interpath_smt::terms::SmtTerm;

use crate::program::{BlockFormulas, BranchDecisions};

/// An error path rebuilt from the branching decisions of a model, together
/// with the model of its replayed path formula.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisePath<N> {
    pub nodes: Vec<N>,
    pub model: Model,
}

/// Verdict of a counterexample trace check.
///
/// `N` is the node type of the reference graph used to rebuild precise error
/// paths; it is `()` when no graph was supplied.
#[derive(Debug, Clone, PartialEq)]
pub enum CounterexampleTraceResult<N = ()> {
    /// The trace is spurious. `interpolants[i]` separates blocks `0..=i`
    /// from the rest; the list is empty when no interpolants were requested.
    Infeasible { interpolants: Vec<SmtTerm> },
    /// The trace is feasible.
    Feasible {
        model: Model,
        formulas: BlockFormulas,
        branching: BranchDecisions,
        precise_path: Option<PrecisePath<N>>,
    },
}

impl<N> CounterexampleTraceResult<N> {
    pub fn is_spurious(&self) -> bool {
        matches!(self, CounterexampleTraceResult::Infeasible { .. })
    }

    /// # Panics
    ///
    /// Panics when the trace is feasible.
    pub fn interpolants(&self) -> &[SmtTerm] {
        match self {
            CounterexampleTraceResult::Infeasible { interpolants } => interpolants,
            CounterexampleTraceResult::Feasible { .. } => {
                panic!("interpolants requested for a feasible trace")
            }
        }
    }

    /// # Panics
    ///
    /// Panics when the trace is infeasible.
    pub fn model(&self) -> &Model {
        match self {
            CounterexampleTraceResult::Feasible { model, .. } => model,
            CounterexampleTraceResult::Infeasible { .. } => {
                panic!("model requested for an infeasible trace")
            }
        }
    }

    pub fn try_interpolants(&self) -> Option<&[SmtTerm]> {
        match self {
            CounterexampleTraceResult::Infeasible { interpolants } => Some(interpolants),
            CounterexampleTraceResult::Feasible { .. } => None,
        }
    }

    pub fn try_model(&self) -> Option<&Model> {
        match self {
            CounterexampleTraceResult::Feasible { model, .. } => Some(model),
            CounterexampleTraceResult::Infeasible { .. } => None,
        }
    }

    pub fn precise_path(&self) -> Option<&PrecisePath<N>> {
        match self {
            CounterexampleTraceResult::Feasible { precise_path, .. } => precise_path.as_ref(),
            CounterexampleTraceResult::Infeasible { .. } => None,
        }
    }

    pub fn into_interpolants(self) -> Option<Vec<SmtTerm>> {
        match self {
            CounterexampleTraceResult::Infeasible { interpolants } => Some(interpolants),
            CounterexampleTraceResult::Feasible { .. } => None,
        }
    }
}
