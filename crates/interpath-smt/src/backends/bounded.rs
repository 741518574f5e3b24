//! Exact interpolating solver over a finite integer range.
//!
//! Integer variables range over `min_int..=max_int`; within that universe the
//! backend decides satisfiability by enumeration and answers interpolation
//! queries with the strongest interpolant, the projection of the A-side onto
//! the vocabulary it shares with the B-side. Strongest interpolants are
//! inductive, so sequence and tree queries are answered natively.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::solver::{InterpolatingSolver, Model, ModelValue, SatResult, SolverFactory};
use crate::sorts::SmtSort;
use crate::terms::{infer_sorts, SmtTerm};

#[derive(Debug, Error)]
pub enum BoundedError {
    #[error("search space of {vars} variables exceeds {limit} assignments")]
    SearchSpaceTooLarge { vars: usize, limit: u64 },
    #[error("no model available: the last check was not satisfiable")]
    NoModel,
    #[error("interpolation requires the last check to be unsatisfiable")]
    NotUnsat,
    #[error("unknown interpolation group {0:?}")]
    UnknownGroup(BoundedGroup),
    #[error("pop on empty stack")]
    EmptyStack,
    #[error("malformed interpolation tree: {0}")]
    MalformedTree(String),
}

/// Opaque token naming one pushed formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundedGroup(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedConfig {
    pub min_int: i64,
    pub max_int: i64,
    /// Upper bound on enumerated assignments per query.
    pub max_assignments: u64,
}

impl Default for BoundedConfig {
    fn default() -> Self {
        Self {
            min_int: -8,
            max_int: 8,
            max_assignments: 1 << 22,
        }
    }
}

impl BoundedConfig {
    fn width(&self, sort: SmtSort) -> u64 {
        match sort {
            SmtSort::Bool => 2,
            SmtSort::Int => self.max_int.abs_diff(self.min_int).saturating_add(1),
        }
    }

    fn value(&self, sort: SmtSort, index: u64) -> ModelValue {
        match sort {
            SmtSort::Bool => ModelValue::Bool(index == 1),
            SmtSort::Int => ModelValue::Int(self.min_int.saturating_add_unsigned(index)),
        }
    }
}

enum LastCheck {
    Sat(Model),
    Unsat,
}

pub struct BoundedSolver {
    config: BoundedConfig,
    stack: Vec<(BoundedGroup, SmtTerm)>,
    next_group: u64,
    last: Option<LastCheck>,
}

impl BoundedSolver {
    pub fn new() -> Self {
        Self::with_config(BoundedConfig::default())
    }

    pub fn with_config(config: BoundedConfig) -> Self {
        Self {
            config,
            stack: Vec::new(),
            next_group: 0,
            last: None,
        }
    }

    /// Number of formulas currently asserted.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Visit every assignment of `vars`, stopping early on `Break`.
    fn for_each_assignment(
        &self,
        vars: &IndexMap<String, SmtSort>,
        mut visit: impl FnMut(&Model) -> ControlFlow<()>,
    ) -> Result<(), BoundedError> {
        let widths: Vec<u64> = vars.values().map(|s| self.config.width(*s)).collect();
        let total = widths
            .iter()
            .try_fold(1u64, |acc, w| acc.checked_mul(*w))
            .filter(|total| *total <= self.config.max_assignments);
        if total.is_none() {
            return Err(BoundedError::SearchSpaceTooLarge {
                vars: vars.len(),
                limit: self.config.max_assignments,
            });
        }

        let mut model = Model::new();
        for (name, sort) in vars {
            model.insert(name.clone(), self.config.value(*sort, 0));
        }
        let mut indices = vec![0u64; vars.len()];
        loop {
            if visit(&model).is_break() {
                return Ok(());
            }
            let mut advanced = false;
            for (k, (name, sort)) in vars.iter().enumerate() {
                indices[k] += 1;
                if indices[k] < widths[k] {
                    model.insert(name.clone(), self.config.value(*sort, indices[k]));
                    advanced = true;
                    break;
                }
                indices[k] = 0;
                model.insert(name.clone(), self.config.value(*sort, 0));
            }
            if !advanced {
                return Ok(());
            }
        }
    }

    fn sorted_vars(formulas: &[&SmtTerm]) -> IndexMap<String, SmtSort> {
        infer_sorts(formulas.iter().copied()).into_iter().collect()
    }

    fn find_model(&self, formulas: &[&SmtTerm]) -> Result<Option<Model>, BoundedError> {
        let vars = Self::sorted_vars(formulas);
        let mut found = None;
        self.for_each_assignment(&vars, |model| {
            if formulas.iter().all(|f| model.evaluate_bool(f) == Some(true)) {
                found = Some(model.clone());
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(found)
    }

    /// Strongest interpolant of `a_side` with respect to `b_side`.
    fn project(&self, a_side: &[&SmtTerm], b_side: &[&SmtTerm]) -> Result<SmtTerm, BoundedError> {
        let all: Vec<&SmtTerm> = a_side.iter().chain(b_side.iter()).copied().collect();
        let sorts = infer_sorts(all.iter().copied());
        let a_vars: BTreeSet<String> = a_side.iter().flat_map(|f| f.free_vars()).collect();
        let b_vars: BTreeSet<String> = b_side.iter().flat_map(|f| f.free_vars()).collect();
        let shared: Vec<(String, SmtSort)> = a_vars
            .intersection(&b_vars)
            .map(|name| (name.clone(), sorts[name]))
            .collect();
        let a_sorted: IndexMap<String, SmtSort> = a_vars
            .iter()
            .map(|name| (name.clone(), sorts[name]))
            .collect();

        let mut projections: BTreeSet<Vec<ModelValue>> = BTreeSet::new();
        self.for_each_assignment(&a_sorted, |model| {
            if a_side.iter().all(|f| model.evaluate_bool(f) == Some(true)) {
                let key = shared
                    .iter()
                    .filter_map(|(name, _)| model.values.get(name).copied())
                    .collect();
                projections.insert(key);
            }
            ControlFlow::Continue(())
        })?;

        if projections.is_empty() {
            return Ok(SmtTerm::bool(false));
        }
        let space: u64 = shared.iter().map(|(_, s)| self.config.width(*s)).product();
        if shared.is_empty() || projections.len() as u64 == space {
            return Ok(SmtTerm::bool(true));
        }
        if let [(name, SmtSort::Int)] = shared.as_slice() {
            return Ok(self.integer_ranges(name, &projections));
        }
        Ok(SmtTerm::disjunction(projections.iter().map(|values| {
            SmtTerm::conjunction(shared.iter().zip(values).map(|((name, _), value)| {
                match value {
                    ModelValue::Bool(true) => SmtTerm::var(name.clone()),
                    ModelValue::Bool(false) => SmtTerm::var(name.clone()).not(),
                    ModelValue::Int(n) => SmtTerm::var(name.clone()).eq(SmtTerm::int(*n)),
                }
            }))
        })))
    }

    /// Render a set of values of one integer variable as a union of ranges.
    fn integer_ranges(&self, name: &str, projections: &BTreeSet<Vec<ModelValue>>) -> SmtTerm {
        let values: Vec<i64> = projections
            .iter()
            .filter_map(|v| match v.first() {
                Some(ModelValue::Int(n)) => Some(*n),
                _ => None,
            })
            .collect();
        let mut runs: Vec<(i64, i64)> = Vec::new();
        for n in values {
            match runs.last_mut() {
                Some((_, hi)) if hi.checked_add(1) == Some(n) => *hi = n,
                _ => runs.push((n, n)),
            }
        }
        let var = || SmtTerm::var(name);
        SmtTerm::disjunction(runs.into_iter().map(|(lo, hi)| {
            if lo == hi {
                return var().eq(SmtTerm::int(lo));
            }
            let mut bounds = Vec::new();
            if lo > self.config.min_int {
                bounds.push(var().ge(SmtTerm::int(lo)));
            }
            if hi < self.config.max_int {
                bounds.push(var().le(SmtTerm::int(hi)));
            }
            SmtTerm::conjunction(bounds)
        }))
    }

    fn require_unsat(&self) -> Result<(), BoundedError> {
        match self.last {
            Some(LastCheck::Unsat) => Ok(()),
            _ => Err(BoundedError::NotUnsat),
        }
    }

    /// Split the stack into formulas named by `groups` and all others.
    fn partition(
        &self,
        groups: &[BoundedGroup],
    ) -> Result<(Vec<&SmtTerm>, Vec<&SmtTerm>), BoundedError> {
        for group in groups {
            if !self.stack.iter().any(|(g, _)| g == group) {
                return Err(BoundedError::UnknownGroup(*group));
            }
        }
        let (inside, outside): (Vec<_>, Vec<_>) =
            self.stack.iter().partition(|(g, _)| groups.contains(g));
        Ok((
            inside.into_iter().map(|(_, f)| f).collect(),
            outside.into_iter().map(|(_, f)| f).collect(),
        ))
    }
}

impl Default for BoundedSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpolatingSolver for BoundedSolver {
    type Error = BoundedError;
    type Group = BoundedGroup;

    fn push(&mut self, formula: &SmtTerm) -> Result<BoundedGroup, BoundedError> {
        let group = BoundedGroup(self.next_group);
        self.next_group += 1;
        self.stack.push((group, formula.clone()));
        self.last = None;
        Ok(group)
    }

    fn pop(&mut self) -> Result<(), BoundedError> {
        self.stack.pop().ok_or(BoundedError::EmptyStack)?;
        self.last = None;
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, BoundedError> {
        let formulas: Vec<&SmtTerm> = self.stack.iter().map(|(_, f)| f).collect();
        let found = self.find_model(&formulas)?;
        debug!(depth = formulas.len(), sat = found.is_some(), "bounded check");
        let (result, last) = match found {
            Some(model) => (SatResult::Sat, LastCheck::Sat(model)),
            None => (SatResult::Unsat, LastCheck::Unsat),
        };
        self.last = Some(last);
        Ok(result)
    }

    fn model(&mut self) -> Result<Model, BoundedError> {
        match &self.last {
            Some(LastCheck::Sat(model)) => Ok(model.clone()),
            _ => Err(BoundedError::NoModel),
        }
    }

    fn interpolant(&mut self, a_side: &[BoundedGroup]) -> Result<SmtTerm, BoundedError> {
        self.require_unsat()?;
        let (a, b) = self.partition(a_side)?;
        self.project(&a, &b)
    }

    fn supports_sequence_interpolants(&self) -> bool {
        true
    }

    fn sequence_interpolants(
        &mut self,
        partitions: &[Vec<BoundedGroup>],
    ) -> Result<Vec<SmtTerm>, BoundedError> {
        self.require_unsat()?;
        let splits = partitions.len().saturating_sub(1);
        let mut a_groups = Vec::new();
        let mut out = Vec::with_capacity(splits);
        for partition in &partitions[..splits] {
            a_groups.extend(partition.iter().copied());
            let (a, b) = self.partition(&a_groups)?;
            out.push(self.project(&a, &b)?);
        }
        Ok(out)
    }

    fn tree_interpolants(
        &mut self,
        partitions: &[Vec<BoundedGroup>],
        start_of_subtree: &[usize],
    ) -> Result<Option<Vec<SmtTerm>>, BoundedError> {
        self.require_unsat()?;
        if partitions.len() != start_of_subtree.len() {
            return Err(BoundedError::MalformedTree(format!(
                "{} partitions but {} subtree starts",
                partitions.len(),
                start_of_subtree.len()
            )));
        }
        if let Some(bad) = (0..start_of_subtree.len()).find(|&i| start_of_subtree[i] > i) {
            return Err(BoundedError::MalformedTree(format!(
                "node {bad} starts after itself"
            )));
        }
        if start_of_subtree.last().is_some_and(|root| *root != 0) {
            return Err(BoundedError::MalformedTree("root does not span all nodes".into()));
        }

        let nodes = partitions.len();
        let mut out = Vec::with_capacity(nodes.saturating_sub(1));
        for node in 0..nodes.saturating_sub(1) {
            let subtree: Vec<BoundedGroup> = partitions[start_of_subtree[node]..=node]
                .iter()
                .flatten()
                .copied()
                .collect();
            let (a, b) = self.partition(&subtree)?;
            out.push(self.project(&a, &b)?);
        }
        Ok(Some(out))
    }
}

/// Factory for [`BoundedSolver`] sessions sharing one configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundedSolverFactory {
    pub config: BoundedConfig,
}

impl BoundedSolverFactory {
    pub fn new(config: BoundedConfig) -> Self {
        Self { config }
    }
}

impl SolverFactory for BoundedSolverFactory {
    type Solver = BoundedSolver;

    fn create(&self) -> Result<BoundedSolver, BoundedError> {
        Ok(BoundedSolver::with_config(self.config))
    }
}
