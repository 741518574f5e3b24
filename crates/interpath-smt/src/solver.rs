use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::terms::SmtTerm;

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown(String),
}

/// A model (variable assignments) extracted from a SAT result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Model {
    pub values: HashMap<String, ModelValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ModelValue {
    Int(i64),
    Bool(bool),
}

impl fmt::Display for ModelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelValue::Int(n) => write!(f, "{n}"),
            ModelValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ModelValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ModelValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ModelValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Evaluate a term under this model.
    ///
    /// Returns `None` when a variable is unassigned, sorts do not match, or
    /// integer arithmetic overflows.
    pub fn evaluate(&self, term: &SmtTerm) -> Option<ModelValue> {
        use ModelValue::{Bool, Int};
        match term {
            SmtTerm::Var(name) => self.values.get(name).copied(),
            SmtTerm::IntLit(n) => Some(Int(*n)),
            SmtTerm::BoolLit(b) => Some(Bool(*b)),
            SmtTerm::Add(l, r) => self.eval_int(l)?.checked_add(self.eval_int(r)?).map(Int),
            SmtTerm::Sub(l, r) => self.eval_int(l)?.checked_sub(self.eval_int(r)?).map(Int),
            SmtTerm::Mul(l, r) => self.eval_int(l)?.checked_mul(self.eval_int(r)?).map(Int),
            SmtTerm::Eq(l, r) => match (self.evaluate(l)?, self.evaluate(r)?) {
                (Int(a), Int(b)) => Some(Bool(a == b)),
                (Bool(a), Bool(b)) => Some(Bool(a == b)),
                _ => None,
            },
            SmtTerm::Lt(l, r) => Some(Bool(self.eval_int(l)? < self.eval_int(r)?)),
            SmtTerm::Le(l, r) => Some(Bool(self.eval_int(l)? <= self.eval_int(r)?)),
            SmtTerm::Gt(l, r) => Some(Bool(self.eval_int(l)? > self.eval_int(r)?)),
            SmtTerm::Ge(l, r) => Some(Bool(self.eval_int(l)? >= self.eval_int(r)?)),
            SmtTerm::And(terms) => {
                let mut all = true;
                for t in terms {
                    all &= self.evaluate_bool(t)?;
                }
                Some(Bool(all))
            }
            SmtTerm::Or(terms) => {
                let mut any = false;
                for t in terms {
                    any |= self.evaluate_bool(t)?;
                }
                Some(Bool(any))
            }
            SmtTerm::Not(inner) => Some(Bool(!self.evaluate_bool(inner)?)),
            SmtTerm::Implies(l, r) => {
                Some(Bool(!self.evaluate_bool(l)? || self.evaluate_bool(r)?))
            }
            SmtTerm::Ite(c, t, e) => {
                if self.evaluate_bool(c)? {
                    self.evaluate(t)
                } else {
                    self.evaluate(e)
                }
            }
        }
    }

    pub fn evaluate_bool(&self, term: &SmtTerm) -> Option<bool> {
        match self.evaluate(term)? {
            ModelValue::Bool(b) => Some(b),
            ModelValue::Int(_) => None,
        }
    }

    fn eval_int(&self, term: &SmtTerm) -> Option<i64> {
        match self.evaluate(term)? {
            ModelValue::Int(n) => Some(n),
            ModelValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();
        for name in names {
            writeln!(f, "{name} = {}", self.values[name])?;
        }
        Ok(())
    }
}

/// Incremental SMT solver that can compute Craig interpolants.
///
/// Every [`push`](InterpolatingSolver::push) opens a new stack level holding
/// exactly one formula and returns an opaque group token for it. Interpolation
/// queries name the A-side by these tokens; every other formula currently on
/// the stack forms the B-side.
pub trait InterpolatingSolver {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opaque token assigned by the solver to a pushed formula. Callers only
    /// store and compare it.
    type Group: Clone + PartialEq + fmt::Debug + Send + 'static;

    /// Open a new stack level and assert `formula` in it.
    fn push(&mut self, formula: &SmtTerm) -> Result<Self::Group, Self::Error>;

    /// Drop the topmost stack level.
    fn pop(&mut self) -> Result<(), Self::Error>;

    /// Check satisfiability of the current stack.
    fn check_sat(&mut self) -> Result<SatResult, Self::Error>;

    /// Model of the last satisfiable check.
    fn model(&mut self) -> Result<Model, Self::Error>;

    /// Interpolant between the conjunction of `a_side` and the conjunction of
    /// every other formula on the stack. Requires the last check to be UNSAT.
    fn interpolant(&mut self, a_side: &[Self::Group]) -> Result<SmtTerm, Self::Error>;

    /// Whether [`sequence_interpolants`](InterpolatingSolver::sequence_interpolants)
    /// is answered natively rather than by repeated pairwise queries.
    fn supports_sequence_interpolants(&self) -> bool {
        false
    }

    /// Sequence interpolants for consecutive partitions of the stack: the
    /// `i`-th result separates partitions `0..=i` from the rest.
    fn sequence_interpolants(
        &mut self,
        partitions: &[Vec<Self::Group>],
    ) -> Result<Vec<SmtTerm>, Self::Error> {
        let splits = partitions.len().saturating_sub(1);
        let mut out = Vec::with_capacity(splits);
        let mut a_side = Vec::new();
        for partition in &partitions[..splits] {
            a_side.extend(partition.iter().cloned());
            out.push(self.interpolant(&a_side)?);
        }
        Ok(out)
    }

    /// Tree interpolants for partitions laid out in post-order.
    ///
    /// `start_of_subtree[i]` is the index of the left-most leaf below node
    /// `i`; the last node is the root. Returns one interpolant per non-root
    /// node, or `None` when the backend cannot answer tree queries.
    fn tree_interpolants(
        &mut self,
        _partitions: &[Vec<Self::Group>],
        _start_of_subtree: &[usize],
    ) -> Result<Option<Vec<SmtTerm>>, Self::Error> {
        Ok(None)
    }
}

/// Creates fresh solver sessions.
pub trait SolverFactory: Send + Sync + 'static {
    type Solver: InterpolatingSolver + Send + 'static;

    fn create(&self) -> Result<Self::Solver, <Self::Solver as InterpolatingSolver>::Error>;
}
