#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use interpath_smt::backends::bounded::{BoundedGroup, BoundedSolver};
use interpath_smt::solver::{InterpolatingSolver, Model, SatResult, SolverFactory};
use interpath_smt::terms::SmtTerm;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// `x@i` in SSA form.
pub fn x(ssa: u32) -> SmtTerm {
    SmtTerm::var(format!("x@{ssa}"))
}

/// `x@0 = 0; x@1 = x@0 + 1; ...; x@{n-2} < 0`, infeasible for `n >= 2`.
pub fn counting_trace(n: usize) -> Vec<SmtTerm> {
    let mut formulas = vec![x(0).eq(SmtTerm::int(0))];
    for i in 1..n.saturating_sub(1) as u32 {
        formulas.push(x(i).eq(x(i - 1).add(SmtTerm::int(1))));
    }
    if n >= 2 {
        formulas.push(x(n as u32 - 2).lt(SmtTerm::int(0)));
    }
    formulas
}

#[derive(Debug, Default)]
pub struct Counters {
    pub sessions: AtomicUsize,
    pub pushes: AtomicUsize,
    pub pops: AtomicUsize,
    pub checks: AtomicUsize,
    pub interpolant_calls: AtomicUsize,
    pub sequence_calls: AtomicUsize,
    pub tree_calls: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn interpolation_calls(&self) -> usize {
        Self::get(&self.interpolant_calls)
            + Self::get(&self.sequence_calls)
            + Self::get(&self.tree_calls)
    }
}

/// Behaviour knobs of [`FakeSolver`].
#[derive(Debug, Clone, Default)]
pub struct FakeBehaviour {
    /// Sleep inside every satisfiability check.
    pub check_delay: Option<Duration>,
    /// Fail every interpolation query while this formula is at the bottom
    /// of the stack.
    pub fail_when_bottom: Option<SmtTerm>,
    /// Answer tree queries instead of reporting them unsupported.
    pub tree_support: bool,
    /// Claim satisfiability, with an empty model, whenever this formula is
    /// at the bottom of the stack.
    pub sat_when_bottom: Option<SmtTerm>,
}

/// Bounded solver instrumented with call counters and failure injection.
pub struct FakeSolver {
    inner: BoundedSolver,
    stack: Vec<SmtTerm>,
    counters: Arc<Counters>,
    behaviour: FakeBehaviour,
    log: Arc<Mutex<Vec<String>>>,
    claimed_sat: bool,
}

impl FakeSolver {
    fn check_failure(&self) -> io::Result<()> {
        match (&self.behaviour.fail_when_bottom, self.stack.first()) {
            (Some(poison), Some(bottom)) if poison == bottom => {
                Err(io::Error::other("injected interpolation failure"))
            }
            _ => Ok(()),
        }
    }
}

fn lift<T>(result: Result<T, impl std::error::Error>) -> io::Result<T> {
    result.map_err(|e| io::Error::other(e.to_string()))
}

impl InterpolatingSolver for FakeSolver {
    type Error = io::Error;
    type Group = BoundedGroup;

    fn push(&mut self, formula: &SmtTerm) -> io::Result<BoundedGroup> {
        self.counters.pushes.fetch_add(1, Ordering::SeqCst);
        self.log.lock().map_err(|_| io::Error::other("poisoned"))?.push(formula.to_string());
        self.stack.push(formula.clone());
        lift(self.inner.push(formula))
    }

    fn pop(&mut self) -> io::Result<()> {
        self.counters.pops.fetch_add(1, Ordering::SeqCst);
        self.stack.pop();
        lift(self.inner.pop())
    }

    fn check_sat(&mut self) -> io::Result<SatResult> {
        self.counters.checks.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.behaviour.check_delay {
            std::thread::sleep(delay);
        }
        self.claimed_sat = matches!(
            (&self.behaviour.sat_when_bottom, self.stack.first()),
            (Some(claimed), Some(bottom)) if claimed == bottom
        );
        if self.claimed_sat {
            return Ok(SatResult::Sat);
        }
        lift(self.inner.check_sat())
    }

    fn model(&mut self) -> io::Result<Model> {
        if self.claimed_sat {
            return Ok(Model::new());
        }
        lift(self.inner.model())
    }

    fn interpolant(&mut self, a_side: &[BoundedGroup]) -> io::Result<SmtTerm> {
        self.counters.interpolant_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        lift(self.inner.interpolant(a_side))
    }

    fn supports_sequence_interpolants(&self) -> bool {
        true
    }

    fn sequence_interpolants(&mut self, partitions: &[Vec<BoundedGroup>]) -> io::Result<Vec<SmtTerm>> {
        self.counters.sequence_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        lift(self.inner.sequence_interpolants(partitions))
    }

    fn tree_interpolants(
        &mut self,
        partitions: &[Vec<BoundedGroup>],
        start_of_subtree: &[usize],
    ) -> io::Result<Option<Vec<SmtTerm>>> {
        self.counters.tree_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        if !self.behaviour.tree_support {
            return Ok(None);
        }
        lift(self.inner.tree_interpolants(partitions, start_of_subtree))
    }
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub counters: Arc<Counters>,
    pub behaviour: FakeBehaviour,
    /// Every formula pushed on any session, in push order.
    pub log: Arc<Mutex<Vec<String>>>,
}

impl FakeFactory {
    pub fn new(behaviour: FakeBehaviour) -> Self {
        Self {
            behaviour,
            ..Self::default()
        }
    }

    pub fn pushed(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

impl SolverFactory for FakeFactory {
    type Solver = FakeSolver;

    fn create(&self) -> io::Result<FakeSolver> {
        self.counters.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSolver {
            inner: BoundedSolver::new(),
            stack: Vec::new(),
            counters: Arc::clone(&self.counters),
            behaviour: self.behaviour.clone(),
            log: Arc::clone(&self.log),
            claimed_sat: false,
        })
    }
}
