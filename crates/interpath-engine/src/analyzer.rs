//! Counterexample trace analysis: decide whether a candidate error path is
//! spurious and extract interpolants or a model.

use std::sync::Arc;
use std::time::Instant;

use interpath_smt::solver::{Model, SolverFactory};
use interpath_smt::terms::SmtTerm;
use tracing::{debug, info, warn};

use crate::error::RefinementError;
use crate::options::InterpolationOptions;
use crate::program::{AbstractionState, BlockFormulas, BranchDecisions, ProgramFacts};
use crate::reconstruct::{
    concrete_path, replay, ErrorPathReconstructor, PathFormulaBuilder, PathGraph, Reconstruction,
    ReconstructionError,
};
use crate::result::{CounterexampleTraceResult, PrecisePath};
use crate::trace::{
    check_interpolants, deadline_from_limit, remaining_time, run_with_time_limit,
    CancellationToken, QueryDumper, TraceInterpolator, TraceOutcome,
};

pub struct CounterexampleTraceAnalyzer<F: SolverFactory> {
    factory: Arc<F>,
    options: InterpolationOptions,
    facts: Arc<ProgramFacts>,
    shutdown: CancellationToken,
    dumper: QueryDumper,
    /// Taken by a timed worker and handed back when it finishes; lost with
    /// the worker on timeout.
    interpolator: Option<TraceInterpolator<F>>,
}

impl<F: SolverFactory> CounterexampleTraceAnalyzer<F> {
    pub fn new(factory: F, options: InterpolationOptions) -> Self {
        let dumper = QueryDumper::new(options.dump_path_template.clone());
        Self {
            factory: Arc::new(factory),
            options,
            facts: Arc::new(ProgramFacts::default()),
            shutdown: CancellationToken::new(),
            dumper,
            interpolator: None,
        }
    }

    pub fn with_program_facts(mut self, facts: ProgramFacts) -> Self {
        self.facts = Arc::new(facts);
        self.interpolator = None;
        self
    }

    /// Cancelling `token` stops running and future trace checks.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self.interpolator = None;
        self
    }

    pub fn options(&self) -> &InterpolationOptions {
        &self.options
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Check the trace made of `formulas`. `states[i]` is the abstract state
    /// reached after block `i`; orderings and tree strategies that need
    /// states fall back to their state-free variant without them.
    pub fn build_counterexample_trace(
        &mut self,
        formulas: &BlockFormulas,
        states: Option<&[AbstractionState]>,
    ) -> Result<CounterexampleTraceResult, RefinementError> {
        let deadline = self.deadline();
        self.analyze(formulas, states, true, deadline)
    }

    /// Like [`build_counterexample_trace`](Self::build_counterexample_trace),
    /// and for feasible traces additionally rebuild the precise error path
    /// through `graph`.
    pub fn build_counterexample_trace_with_reference<G, B>(
        &mut self,
        formulas: &BlockFormulas,
        states: Option<&[AbstractionState]>,
        graph: &G,
        builder: &B,
    ) -> Result<CounterexampleTraceResult<G::Node>, RefinementError>
    where
        G: PathGraph,
        B: PathFormulaBuilder<G::Node> + ?Sized,
    {
        let deadline = self.deadline();
        let result = self.analyze(formulas, states, true, deadline)?;
        Ok(self.attach_precise_path(result, graph, builder, deadline))
    }

    /// Decide feasibility only. Infeasible traces carry no interpolants.
    pub fn build_counterexample_trace_without_interpolation(
        &mut self,
        formulas: &BlockFormulas,
        states: Option<&[AbstractionState]>,
    ) -> Result<CounterexampleTraceResult, RefinementError> {
        let deadline = self.deadline();
        self.analyze(formulas, states, false, deadline)
    }

    pub fn build_counterexample_trace_without_interpolation_with_reference<G, B>(
        &mut self,
        formulas: &BlockFormulas,
        states: Option<&[AbstractionState]>,
        graph: &G,
        builder: &B,
    ) -> Result<CounterexampleTraceResult<G::Node>, RefinementError>
    where
        G: PathGraph,
        B: PathFormulaBuilder<G::Node> + ?Sized,
    {
        let deadline = self.deadline();
        let result = self.analyze(formulas, states, false, deadline)?;
        Ok(self.attach_precise_path(result, graph, builder, deadline))
    }

    /// Interpolants for an infeasible sequence of formulas, or `None` when
    /// the formulas are satisfiable together.
    pub fn interpolate(
        &mut self,
        formulas: &[SmtTerm],
        states: Option<&[AbstractionState]>,
    ) -> Result<Option<Vec<SmtTerm>>, RefinementError> {
        let blocks = BlockFormulas::new(formulas.to_vec());
        let deadline = self.deadline();
        Ok(self
            .analyze::<()>(&blocks, states, true, deadline)?
            .into_interpolants())
    }

    /// Rebuild the concrete error path chosen by `decisions`.
    pub fn reconstruct_error_path<G, B>(
        &self,
        graph: &G,
        decisions: &BranchDecisions,
        builder: &B,
    ) -> Reconstruction<G::Node>
    where
        G: PathGraph,
        B: PathFormulaBuilder<G::Node> + ?Sized,
    {
        ErrorPathReconstructor::new(self.factory.as_ref()).reconstruct(graph, decisions, builder)
    }

    fn attach_precise_path<G, B>(
        &self,
        result: CounterexampleTraceResult<G::Node>,
        graph: &G,
        builder: &B,
        deadline: Option<Instant>,
    ) -> CounterexampleTraceResult<G::Node>
    where
        G: PathGraph,
        B: PathFormulaBuilder<G::Node> + ?Sized,
    {
        match result {
            CounterexampleTraceResult::Feasible {
                model,
                formulas,
                branching,
                ..
            } => {
                let attempt = concrete_path(graph, &branching, builder).and_then(
                    |(nodes, path_formulas)| {
                        let model = self.replay_within(path_formulas, deadline)?;
                        Ok(PrecisePath { nodes, model })
                    },
                );
                let precise_path = Reconstruction::from_attempt(attempt).into_precise();
                CounterexampleTraceResult::Feasible {
                    model,
                    formulas,
                    branching,
                    precise_path,
                }
            }
            infeasible => infeasible,
        }
    }

    /// Replay a rebuilt path in whatever time the call has left.
    fn replay_within(
        &self,
        formulas: BlockFormulas,
        deadline: Option<Instant>,
    ) -> Result<Model, ReconstructionError> {
        let Some(remaining) = remaining_time(deadline) else {
            return replay(self.factory.as_ref(), &formulas);
        };
        if remaining.is_zero() {
            return Err(self.timeout().into());
        }
        let factory = Arc::clone(&self.factory);
        let token = self.shutdown.child();
        run_with_time_limit(remaining, &token, move || replay(factory.as_ref(), &formulas))
            .map_err(|error| self.expired(error))?
    }

    /// The time limit covers one public call, fallback and replay included.
    fn deadline(&self) -> Option<Instant> {
        deadline_from_limit(self.options.time_limit())
    }

    fn timeout(&self) -> RefinementError {
        RefinementError::Timeout {
            limit: self.options.time_limit().unwrap_or_default(),
        }
    }

    /// Report a worker timeout against the configured limit rather than the
    /// remainder it was given.
    fn expired(&self, error: RefinementError) -> RefinementError {
        match error {
            RefinementError::Timeout { .. } => self.timeout(),
            other => other,
        }
    }

    fn analyze<N>(
        &mut self,
        formulas: &BlockFormulas,
        states: Option<&[AbstractionState]>,
        with_interpolation: bool,
        deadline: Option<Instant>,
    ) -> Result<CounterexampleTraceResult<N>, RefinementError> {
        if let Some(limit) = self.options.formula_size_limit() {
            let size = formulas.size();
            if size > limit {
                warn!(size, limit, "path formula too large, skipping refinement");
                return Err(RefinementError::TooMuchUnrolling { size, limit });
            }
        }
        info!(
            blocks = formulas.len(),
            ordering = %self.options.ordering,
            strategy = %self.options.strategy,
            with_interpolation,
            "checking counterexample trace"
        );

        let outcome = match self.check_timed(formulas, states, with_interpolation, deadline) {
            Ok(outcome) => outcome,
            Err(error)
                if with_interpolation
                    && error.is_solver_failure()
                    && self.options.fallback_without_interpolation =>
            {
                warn!(%error, "interpolation failed, checking feasibility without it");
                match self.check_timed(formulas, states, false, deadline) {
                    Ok(outcome @ TraceOutcome::Feasible { .. }) => outcome,
                    Err(timeout @ RefinementError::Timeout { .. }) => return Err(timeout),
                    Ok(TraceOutcome::Infeasible(_)) | Err(_) => {
                        return Err(RefinementError::RefinementFailed {
                            cause: Box::new(error),
                        })
                    }
                }
            }
            Err(error) => return Err(error),
        };

        match outcome {
            TraceOutcome::Infeasible(interpolants) => {
                if with_interpolation && self.options.verify_interpolants {
                    check_interpolants(
                        self.factory.as_ref(),
                        formulas.formulas(),
                        &interpolants,
                        !self.options.strategy.is_tree(),
                    )?;
                }
                info!(interpolants = interpolants.len(), "counterexample is spurious");
                Ok(CounterexampleTraceResult::Infeasible { interpolants })
            }
            TraceOutcome::Feasible { model, branching } => {
                info!("counterexample is feasible");
                Ok(CounterexampleTraceResult::Feasible {
                    model,
                    formulas: formulas.clone(),
                    branching,
                    precise_path: None,
                })
            }
        }
    }

    fn take_interpolator(&mut self) -> TraceInterpolator<F> {
        self.interpolator.take().unwrap_or_else(|| {
            TraceInterpolator::new(
                Arc::clone(&self.factory),
                self.options.clone(),
                Arc::clone(&self.facts),
                self.dumper.clone(),
                self.shutdown.child(),
            )
        })
    }

    fn check_timed(
        &mut self,
        formulas: &BlockFormulas,
        states: Option<&[AbstractionState]>,
        with_interpolation: bool,
        deadline: Option<Instant>,
    ) -> Result<TraceOutcome, RefinementError> {
        let remaining = remaining_time(deadline);
        if remaining.is_some_and(|left| left.is_zero()) {
            warn!("no time left for the trace check");
            return Err(self.timeout());
        }
        let mut interpolator = self.take_interpolator();
        let Some(remaining) = remaining else {
            let result = interpolator.check_trace(formulas, states, with_interpolation);
            self.interpolator = Some(interpolator);
            return result;
        };

        let token = interpolator.cancellation().clone();
        let formulas = formulas.clone();
        let states = states.map(<[AbstractionState]>::to_vec);
        let (result, interpolator) = run_with_time_limit(remaining, &token, move || {
            let result = interpolator.check_trace(&formulas, states.as_deref(), with_interpolation);
            (result, interpolator)
        })
        .map_err(|error| self.expired(error))?;
        debug!("timed trace check finished");
        self.interpolator = Some(interpolator);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpath_smt::backends::bounded::BoundedSolverFactory;

    fn analyzer(options: InterpolationOptions) -> CounterexampleTraceAnalyzer<BoundedSolverFactory> {
        CounterexampleTraceAnalyzer::new(BoundedSolverFactory::default(), options)
    }

    fn x_is(n: i64) -> SmtTerm {
        SmtTerm::var("x").eq(SmtTerm::int(n))
    }

    #[test]
    fn oversized_trace_is_rejected_before_solving() {
        let options = InterpolationOptions {
            max_formula_size: 4,
            ..InterpolationOptions::default()
        };
        let blocks = BlockFormulas::new(vec![x_is(0), x_is(1)]);
        let err = analyzer(options)
            .build_counterexample_trace(&blocks, None)
            .expect_err("trace exceeds the size limit");
        assert!(matches!(
            err,
            RefinementError::TooMuchUnrolling { size: 6, limit: 4 }
        ));
    }

    #[test]
    fn interpolate_returns_none_for_satisfiable_formulas() {
        let mut analyzer = analyzer(InterpolationOptions::default());
        let sat = analyzer
            .interpolate(&[x_is(0), SmtTerm::var("x").ge(SmtTerm::int(0))], None)
            .expect("check should succeed");
        assert_eq!(sat, None);

        let unsat = analyzer
            .interpolate(&[x_is(0), x_is(1)], None)
            .expect("check should succeed");
        assert_eq!(unsat, Some(vec![x_is(0)]));
    }

    #[test]
    fn verification_accepts_strongest_interpolants() {
        let options = InterpolationOptions {
            verify_interpolants: true,
            time_limit_ms: 10_000,
            ..InterpolationOptions::default()
        };
        let blocks = BlockFormulas::new(vec![
            x_is(0),
            SmtTerm::var("y").eq(SmtTerm::var("x").add(SmtTerm::int(1))),
            SmtTerm::var("y").lt(SmtTerm::int(0)),
        ]);
        let result = analyzer(options)
            .build_counterexample_trace(&blocks, None)
            .expect("check should succeed");
        assert_eq!(result.interpolants().len(), 2);
    }

    #[test]
    fn cancelled_shutdown_token_still_answers_without_core_search() {
        let token = CancellationToken::new();
        token.cancel();
        let options = InterpolationOptions {
            useful_blocks: true,
            ..InterpolationOptions::default()
        };
        let mut analyzer = analyzer(options).with_shutdown_token(token);
        let result = analyzer
            .build_counterexample_trace(&BlockFormulas::new(vec![x_is(0), x_is(1)]), None)
            .expect("check should succeed");
        assert!(result.is_spurious());
    }
}
