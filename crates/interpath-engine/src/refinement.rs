//! One round of counterexample-guided abstraction refinement around the
//! trace analyzer.

use std::fmt;

use interpath_smt::solver::{Model, SolverFactory};
use interpath_smt::terms::SmtTerm;
use tracing::{debug, info, warn};

use crate::analyzer::CounterexampleTraceAnalyzer;
use crate::error::RefinementError;
use crate::program::{AbstractionState, BlockFormulas};
use crate::reconstruct::{PathFormulaBuilder, PathGraph, Reconstruction};
use crate::result::CounterexampleTraceResult;

/// Strengthens the abstraction with the interpolants of a spurious path.
pub trait AbstractionRefiner {
    /// `interpolants[i]` holds at `states[i]`. `repeated` is set when the
    /// same path was refuted in the previous round.
    fn refine(
        &mut self,
        interpolants: &[SmtTerm],
        states: &[AbstractionState],
        repeated: bool,
    ) -> Result<(), RefinementError>;
}

/// Produces abstract error paths from the current abstraction.
pub trait CounterexampleSource<N> {
    /// Next candidate error path, or `None` once the abstraction has no
    /// error path left.
    fn next_candidate(&mut self) -> Result<Option<CandidatePath<N>>, RefinementError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementPhase {
    Start,
    TraceBuilt,
    Spurious,
    Feasible,
}

/// An abstract error path handed over by the model checker.
#[derive(Debug, Clone)]
pub struct CandidatePath<N> {
    pub formulas: BlockFormulas,
    /// Abstract state reached after each block.
    pub states: Vec<AbstractionState>,
    /// Nodes of the abstract path in the reference graph.
    pub path: Vec<N>,
    /// Whether some abstract state on the path merged several branches.
    pub merged_branches: bool,
}

/// A feasible error path.
#[derive(Debug, Clone)]
pub struct Counterexample<N> {
    pub path: Vec<N>,
    pub model: Model,
    pub formulas: BlockFormulas,
    /// Whether `path` is known to be the concrete path the model takes.
    pub precise: bool,
}

impl<N: fmt::Debug> Counterexample<N> {
    /// Human-readable rendering, formatted only when displayed.
    pub fn dump(&self) -> CounterexampleDump<'_, N> {
        CounterexampleDump(self)
    }
}

pub struct CounterexampleDump<'a, N>(&'a Counterexample<N>);

impl<N: fmt::Debug> fmt::Display for CounterexampleDump<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cex = self.0;
        let kind = if cex.precise { "precise" } else { "imprecise" };
        writeln!(f, "Counterexample ({kind}, {} nodes):", cex.path.len())?;
        for (i, node) in cex.path.iter().enumerate() {
            writeln!(f, "  {i:>3}: {node:?}")?;
        }
        writeln!(f, "Path formula:")?;
        for (i, formula) in cex.formulas.formulas().iter().enumerate() {
            writeln!(f, "  {i:>3}: {formula}")?;
        }
        writeln!(f, "Model:")?;
        for line in cex.model.to_string().lines() {
            writeln!(f, "  {line}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum RoundOutcome<N> {
    Spurious { repeated: bool },
    Feasible(Counterexample<N>),
}

#[derive(Debug, Clone)]
pub enum LoopOutcome<N> {
    /// No error path is left after `rounds` refinements.
    Safe { rounds: usize },
    Feasible(Counterexample<N>),
}

pub struct RefinementLoop<F: SolverFactory> {
    analyzer: CounterexampleTraceAnalyzer<F>,
    phase: RefinementPhase,
    previous: Option<Vec<SmtTerm>>,
    rounds: usize,
}

impl<F: SolverFactory> RefinementLoop<F> {
    pub fn new(analyzer: CounterexampleTraceAnalyzer<F>) -> Self {
        Self {
            analyzer,
            phase: RefinementPhase::Start,
            previous: None,
            rounds: 0,
        }
    }

    pub fn phase(&self) -> RefinementPhase {
        self.phase
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn analyzer_mut(&mut self) -> &mut CounterexampleTraceAnalyzer<F> {
        &mut self.analyzer
    }

    /// Check `candidate`; refine the abstraction when it is spurious, report
    /// it when it is feasible.
    pub fn refine_round<G, B, R>(
        &mut self,
        candidate: &CandidatePath<G::Node>,
        graph: &G,
        builder: &B,
        refiner: &mut R,
    ) -> Result<RoundOutcome<G::Node>, RefinementError>
    where
        G: PathGraph,
        B: PathFormulaBuilder<G::Node> + ?Sized,
        R: AbstractionRefiner + ?Sized,
    {
        self.phase = RefinementPhase::Start;
        self.rounds += 1;
        let round = self.rounds;
        debug!(round, blocks = candidate.formulas.len(), "refinement round");

        let result: CounterexampleTraceResult = self
            .analyzer
            .build_counterexample_trace(&candidate.formulas, Some(&candidate.states))?;
        self.phase = RefinementPhase::TraceBuilt;

        match result {
            CounterexampleTraceResult::Infeasible { interpolants } => {
                let repeated = self.previous.as_deref() == Some(candidate.formulas.formulas());
                if repeated {
                    warn!(round, "same counterexample as in the previous round");
                }
                refiner.refine(&interpolants, &candidate.states, repeated)?;
                self.previous = Some(candidate.formulas.formulas().to_vec());
                self.phase = RefinementPhase::Spurious;
                info!(round, repeated, "spurious counterexample refined");
                Ok(RoundOutcome::Spurious { repeated })
            }
            CounterexampleTraceResult::Feasible {
                model,
                formulas,
                branching,
                ..
            } => {
                let (path, model, precise) = if candidate.merged_branches {
                    match self
                        .analyzer
                        .reconstruct_error_path(graph, &branching, builder)
                    {
                        Reconstruction::Precise(precise) => (precise.nodes, precise.model, true),
                        Reconstruction::Imprecise(_) => (candidate.path.clone(), model, false),
                    }
                } else {
                    (candidate.path.clone(), model, true)
                };
                let counterexample = Counterexample {
                    path,
                    model,
                    formulas,
                    precise,
                };
                self.phase = RefinementPhase::Feasible;
                info!(round, precise, "feasible counterexample found");
                debug!(counterexample = %counterexample.dump());
                Ok(RoundOutcome::Feasible(counterexample))
            }
        }
    }

    /// Refine until `source` runs out of candidates or a feasible
    /// counterexample is found.
    pub fn run<S, G, B, R>(
        &mut self,
        source: &mut S,
        graph: &G,
        builder: &B,
        refiner: &mut R,
    ) -> Result<LoopOutcome<G::Node>, RefinementError>
    where
        S: CounterexampleSource<G::Node> + ?Sized,
        G: PathGraph,
        B: PathFormulaBuilder<G::Node> + ?Sized,
        R: AbstractionRefiner + ?Sized,
    {
        let mut refined = 0;
        while let Some(candidate) = source.next_candidate()? {
            match self.refine_round(&candidate, graph, builder, refiner)? {
                RoundOutcome::Spurious { .. } => refined += 1,
                RoundOutcome::Feasible(counterexample) => {
                    return Ok(LoopOutcome::Feasible(counterexample))
                }
            }
        }
        info!(rounds = refined, "no error path left");
        Ok(LoopOutcome::Safe { rounds: refined })
    }
}
