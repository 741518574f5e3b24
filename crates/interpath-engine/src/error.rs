use std::time::Duration;

use thiserror::Error;

/// Errors raised while checking a counterexample trace or refining with its
/// interpolants.
#[derive(Debug, Error)]
pub enum RefinementError {
    #[error("Solver error during {context}: {message}")]
    Solver {
        context: &'static str,
        message: String,
    },
    #[error("Trace check exceeded the time limit of {limit:?}")]
    Timeout { limit: Duration },
    #[error("Precise error path replay is inconsistent: {0}")]
    InconsistentReplay(String),
    #[error("Path formula of size {size} exceeds the refinement limit of {limit}")]
    TooMuchUnrolling { size: usize, limit: usize },
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Refinement failed: {cause}")]
    RefinementFailed {
        #[source]
        cause: Box<RefinementError>,
    },
    #[error("Collaborator error: {0}")]
    Collaborator(String),
    #[error("Trace check worker failed: {0}")]
    Worker(String),
}

impl RefinementError {
    /// Adapter for `map_err` on backend results.
    pub(crate) fn solver<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> Self {
        move |err| RefinementError::Solver {
            context,
            message: err.to_string(),
        }
    }

    /// Whether the error came from the solver itself and may go away with a
    /// different submission order or without interpolation.
    pub fn is_solver_failure(&self) -> bool {
        matches!(self, RefinementError::Solver { .. })
    }
}
