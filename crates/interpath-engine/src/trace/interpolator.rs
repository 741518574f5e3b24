//! Ordered submission of a trace to the solver and extraction of either
//! interpolants or a model.

use super::ordering::order_formulas;
use super::useful_blocks::{useful_blocks, CoreTraversal};
use super::*;

/// Verdict of one trace check.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TraceOutcome {
    /// The trace is infeasible. Interpolants are empty when none were
    /// requested.
    Infeasible(Vec<SmtTerm>),
    Feasible {
        model: Model,
        branching: BranchDecisions,
    },
}

struct AttemptFailure {
    error: RefinementError,
    unsat_established: bool,
}

impl AttemptFailure {
    fn before_unsat(error: RefinementError) -> Self {
        Self {
            error,
            unsat_established: false,
        }
    }
}

/// Owns the (optionally long-lived) solver session used for trace checks.
pub(crate) struct TraceInterpolator<F: SolverFactory> {
    factory: Arc<F>,
    options: InterpolationOptions,
    facts: Arc<ProgramFacts>,
    dumper: QueryDumper,
    cancel: CancellationToken,
    session: Option<InterpolationSession<F::Solver>>,
}

impl<F: SolverFactory> TraceInterpolator<F> {
    pub(crate) fn new(
        factory: Arc<F>,
        options: InterpolationOptions,
        facts: Arc<ProgramFacts>,
        dumper: QueryDumper,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            options,
            facts,
            dumper,
            cancel,
            session: None,
        }
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check `blocks` and, if infeasible and `with_interpolation` is set,
    /// compute one interpolant per split point in logical order.
    pub(crate) fn check_trace(
        &mut self,
        blocks: &BlockFormulas,
        states: Option<&[AbstractionState]>,
        with_interpolation: bool,
    ) -> Result<TraceOutcome, RefinementError> {
        let submitted = if with_interpolation && self.options.useful_blocks {
            let traversal = CoreTraversal::for_ordering(self.options.ordering);
            useful_blocks(self.factory.as_ref(), blocks, traversal, &self.cancel)?
        } else {
            blocks.clone()
        };
        let order = order_formulas(
            self.options.ordering,
            submitted.formulas(),
            states,
            &self.facts,
            self.options.random_seed,
        );
        let call_depths: Option<Vec<usize>> =
            states.map(|states| states.iter().map(AbstractionState::call_depth).collect());
        let incremental = self.options.incremental_check;

        let first = self.attempt(
            &submitted,
            &order,
            incremental,
            with_interpolation,
            call_depths.as_deref(),
        );
        let failure = match first {
            Ok(outcome) => return Ok(outcome),
            Err(failure) => failure,
        };
        if !(with_interpolation
            && self.options.retry_on_failure
            && failure.error.is_solver_failure())
        {
            return Err(failure.error);
        }

        warn!(
            error = %failure.error,
            "trace check failed, retrying with reversed order"
        );
        let retried = self
            .attempt(
                &submitted,
                &order.reversed(),
                !incremental,
                with_interpolation,
                call_depths.as_deref(),
            )
            .map_err(|retry| retry.error)?;
        if failure.unsat_established && matches!(retried, TraceOutcome::Feasible { .. }) {
            return Err(RefinementError::InvariantViolation(
                "trace was UNSAT before the retry but SAT after it".into(),
            ));
        }
        info!("trace check succeeded after retry");
        Ok(retried)
    }

    fn attempt(
        &mut self,
        blocks: &BlockFormulas,
        order: &Permutation,
        incremental: bool,
        with_interpolation: bool,
        call_depths: Option<&[usize]>,
    ) -> Result<TraceOutcome, AttemptFailure> {
        let desired: Vec<&SmtTerm> = order.iter().map(|pos| &blocks.formulas()[pos]).collect();
        let mut session = self
            .prepare_session(&desired)
            .map_err(AttemptFailure::before_unsat)?;
        let result = self.solve(
            &mut session,
            blocks,
            order,
            incremental,
            with_interpolation,
            call_depths,
        );
        // A failed session is discarded.
        if self.options.reuse_session && result.is_ok() {
            self.session = Some(session);
        }
        result
    }

    /// Reuse the retained session when its asserted prefix matches the start
    /// of `desired`; otherwise open a fresh one.
    fn prepare_session(
        &mut self,
        desired: &[&SmtTerm],
    ) -> Result<InterpolationSession<F::Solver>, RefinementError> {
        if self.options.reuse_session {
            if let Some(mut session) = self.session.take() {
                let shared = session.common_prefix_len(desired);
                if shared > 0 {
                    session.pop_to(shared)?;
                    debug!(reused = shared, total = desired.len(), "reusing solver prefix");
                    return Ok(session);
                }
                debug!("no common prefix, replacing solver session");
            }
        }
        InterpolationSession::open(self.factory.as_ref())
    }

    fn solve(
        &self,
        session: &mut InterpolationSession<F::Solver>,
        blocks: &BlockFormulas,
        order: &Permutation,
        incremental: bool,
        with_interpolation: bool,
        call_depths: Option<&[usize]>,
    ) -> Result<TraceOutcome, AttemptFailure> {
        let fail = AttemptFailure::before_unsat;
        let reused = session.depth();
        let mut pushed: Vec<PushedBlock<_>> = session
            .groups()
            .zip(order.iter())
            .map(|(group, position)| PushedBlock {
                position,
                group: group.clone(),
            })
            .collect();

        let mut unsat = false;
        for position in order.iter().skip(reused) {
            let group = session.push(&blocks.formulas()[position]).map_err(fail)?;
            pushed.push(PushedBlock { position, group });
            if incremental && !unsat {
                unsat = session.is_unsat().map_err(fail)?;
                if unsat {
                    debug!(pushed = pushed.len(), "trace infeasible before the last block");
                }
            }
        }
        self.dumper.dump(session.asserted_formulas());

        if !unsat {
            unsat = session.is_unsat().map_err(fail)?;
        }
        if !unsat {
            let model = session.model().map_err(fail)?;
            let branching = blocks.branch_decisions(&model);
            debug!(blocks = blocks.len(), "trace is feasible");
            return Ok(TraceOutcome::Feasible { model, branching });
        }
        if !with_interpolation {
            return Ok(TraceOutcome::Infeasible(Vec::new()));
        }
        let interpolants = self
            .options
            .strategy
            .interpolants(session, &pushed, call_depths)
            .map_err(|error| AttemptFailure {
                error,
                unsat_established: true,
            })?;
        debug!(
            count = interpolants.len(),
            strategy = %self.options.strategy,
            "interpolants computed"
        );
        Ok(TraceOutcome::Infeasible(interpolants))
    }
}
