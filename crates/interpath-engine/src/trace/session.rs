//! Solver session that mirrors the solver's assertion stack.

use super::*;

/// An interpolating solver together with the formulas currently asserted on
/// it, bottom first. The mirror changes only after the solver accepted the
/// corresponding push or pop.
pub struct InterpolationSession<S: InterpolatingSolver> {
    solver: S,
    asserted: Vec<(SmtTerm, S::Group)>,
}

impl<S: InterpolatingSolver> InterpolationSession<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            asserted: Vec::new(),
        }
    }

    pub fn open<F>(factory: &F) -> Result<Self, RefinementError>
    where
        F: SolverFactory<Solver = S>,
    {
        let solver = factory
            .create()
            .map_err(RefinementError::solver("session creation"))?;
        Ok(Self::new(solver))
    }

    pub fn depth(&self) -> usize {
        self.asserted.len()
    }

    pub fn asserted_formulas(&self) -> impl Iterator<Item = &SmtTerm> {
        self.asserted.iter().map(|(formula, _)| formula)
    }

    pub fn groups(&self) -> impl Iterator<Item = &S::Group> {
        self.asserted.iter().map(|(_, group)| group)
    }

    pub fn push(&mut self, formula: &SmtTerm) -> Result<S::Group, RefinementError> {
        let group = self
            .solver
            .push(formula)
            .map_err(RefinementError::solver("push"))?;
        self.asserted.push((formula.clone(), group.clone()));
        Ok(group)
    }

    pub fn pop(&mut self) -> Result<(), RefinementError> {
        if self.asserted.is_empty() {
            return Err(RefinementError::InvariantViolation(
                "pop on an empty solver session".into(),
            ));
        }
        self.solver.pop().map_err(RefinementError::solver("pop"))?;
        self.asserted.pop();
        Ok(())
    }

    /// Pop until at most `depth` formulas remain.
    pub fn pop_to(&mut self, depth: usize) -> Result<(), RefinementError> {
        while self.asserted.len() > depth {
            self.pop()?;
        }
        Ok(())
    }

    /// Length of the longest prefix of `desired` that is already asserted in
    /// the same order.
    pub fn common_prefix_len(&self, desired: &[&SmtTerm]) -> usize {
        self.asserted
            .iter()
            .zip(desired)
            .take_while(|((asserted, _), wanted)| asserted == **wanted)
            .count()
    }

    pub fn check_sat(&mut self) -> Result<SatResult, RefinementError> {
        self.solver
            .check_sat()
            .map_err(RefinementError::solver("satisfiability check"))
    }

    /// Satisfiability check that treats `unknown` as a solver failure.
    pub fn is_unsat(&mut self) -> Result<bool, RefinementError> {
        match self.check_sat()? {
            SatResult::Unsat => Ok(true),
            SatResult::Sat => Ok(false),
            SatResult::Unknown(reason) => Err(RefinementError::Solver {
                context: "satisfiability check",
                message: format!("solver returned unknown: {reason}"),
            }),
        }
    }

    pub fn model(&mut self) -> Result<Model, RefinementError> {
        self.solver
            .model()
            .map_err(RefinementError::solver("model extraction"))
    }

    pub fn interpolant(&mut self, a_side: &[S::Group]) -> Result<SmtTerm, RefinementError> {
        self.solver
            .interpolant(a_side)
            .map_err(RefinementError::solver("interpolation"))
    }

    pub fn sequence_interpolants(
        &mut self,
        partitions: &[Vec<S::Group>],
    ) -> Result<Vec<SmtTerm>, RefinementError> {
        self.solver
            .sequence_interpolants(partitions)
            .map_err(RefinementError::solver("sequence interpolation"))
    }

    pub fn tree_interpolants(
        &mut self,
        partitions: &[Vec<S::Group>],
        start_of_subtree: &[usize],
    ) -> Result<Option<Vec<SmtTerm>>, RefinementError> {
        self.solver
            .tree_interpolants(partitions, start_of_subtree)
            .map_err(RefinementError::solver("tree interpolation"))
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }
}
