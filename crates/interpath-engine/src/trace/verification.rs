//! Independent check of path interpolants against the trace they refute.

use super::*;

/// Check that `interpolants` is a valid sequence of path interpolants for
/// `formulas`: for every split point `i`,
///
/// * `F_0 ∧ … ∧ F_i` implies `I_i`,
/// * `I_i ∧ F_{i+1} ∧ … ∧ F_{n-1}` is unsatisfiable,
/// * `I_i` only mentions variables shared by both sides.
///
/// Every check runs on a fresh session.
pub fn verify_interpolants<F: SolverFactory>(
    factory: &F,
    formulas: &[SmtTerm],
    interpolants: &[SmtTerm],
) -> Result<(), RefinementError> {
    check_interpolants(factory, formulas, interpolants, true)
}

/// Flattened tree interpolants conjoin the context before a callee scope and
/// may mention variables of that scope, so `vocabulary` is off for them.
pub(crate) fn check_interpolants<F: SolverFactory>(
    factory: &F,
    formulas: &[SmtTerm],
    interpolants: &[SmtTerm],
    vocabulary: bool,
) -> Result<(), RefinementError> {
    let expected = formulas.len().saturating_sub(1);
    if interpolants.len() != expected {
        return Err(RefinementError::InvariantViolation(format!(
            "{} interpolants for {} formulas",
            interpolants.len(),
            formulas.len()
        )));
    }
    for (i, itp) in interpolants.iter().enumerate() {
        let (prefix, suffix) = formulas.split_at(i + 1);

        let negated = itp.clone().not();
        if !conjunction_is_unsat(factory, prefix.iter().chain([&negated]))? {
            return Err(RefinementError::InvariantViolation(format!(
                "interpolant {i} is not implied by the trace prefix: {itp}"
            )));
        }
        if !conjunction_is_unsat(factory, std::iter::once(itp).chain(suffix))? {
            return Err(RefinementError::InvariantViolation(format!(
                "interpolant {i} is consistent with the trace suffix: {itp}"
            )));
        }

        if !vocabulary {
            continue;
        }
        let prefix_vars: BTreeSet<String> = prefix.iter().flat_map(SmtTerm::free_vars).collect();
        let suffix_vars: BTreeSet<String> = suffix.iter().flat_map(SmtTerm::free_vars).collect();
        let foreign: Vec<String> = itp
            .free_vars()
            .into_iter()
            .filter(|v| !(prefix_vars.contains(v) && suffix_vars.contains(v)))
            .collect();
        if !foreign.is_empty() {
            return Err(RefinementError::InvariantViolation(format!(
                "interpolant {i} mentions non-shared variables {foreign:?}"
            )));
        }
    }
    debug!(count = interpolants.len(), "interpolants verified");
    Ok(())
}

fn conjunction_is_unsat<'a, F: SolverFactory>(
    factory: &F,
    formulas: impl IntoIterator<Item = &'a SmtTerm>,
) -> Result<bool, RefinementError> {
    let mut session = InterpolationSession::open(factory)?;
    for formula in formulas {
        session.push(formula)?;
    }
    session.is_unsat()
}
