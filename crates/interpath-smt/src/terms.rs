use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::backends::smtlib_printer::to_smtlib;
use crate::sorts::SmtSort;

/// Separator between a program variable and its SSA index (`x@3`).
pub const SSA_SEPARATOR: char = '@';

/// Abstract quantifier-free SMT term, solver-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    /// Integer literal.
    IntLit(i64),
    /// Boolean literal.
    BoolLit(bool),

    // Arithmetic
    Add(Box<SmtTerm>, Box<SmtTerm>),
    Sub(Box<SmtTerm>, Box<SmtTerm>),
    Mul(Box<SmtTerm>, Box<SmtTerm>),

    // Comparison
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    Lt(Box<SmtTerm>, Box<SmtTerm>),
    Le(Box<SmtTerm>, Box<SmtTerm>),
    Gt(Box<SmtTerm>, Box<SmtTerm>),
    Ge(Box<SmtTerm>, Box<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Implies(Box<SmtTerm>, Box<SmtTerm>),

    // If-then-else
    Ite(Box<SmtTerm>, Box<SmtTerm>, Box<SmtTerm>),
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn int(n: i64) -> Self {
        SmtTerm::IntLit(n)
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    pub fn add(self, other: SmtTerm) -> Self {
        SmtTerm::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: SmtTerm) -> Self {
        SmtTerm::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: SmtTerm) -> Self {
        SmtTerm::Mul(Box::new(self), Box::new(other))
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::And(terms)
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Or(terms)
    }

    pub fn not(self) -> Self {
        SmtTerm::Not(Box::new(self))
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Box::new(self), Box::new(other))
    }

    pub fn ite(cond: SmtTerm, then: SmtTerm, els: SmtTerm) -> Self {
        SmtTerm::Ite(Box::new(cond), Box::new(then), Box::new(els))
    }

    /// Conjunction that drops `true` operands and collapses to `false` or a
    /// single operand where possible.
    pub fn conjunction(terms: impl IntoIterator<Item = SmtTerm>) -> Self {
        let mut kept = Vec::new();
        for term in terms {
            if term.is_false() {
                return SmtTerm::bool(false);
            }
            if !term.is_true() {
                kept.push(term);
            }
        }
        match kept.len() {
            0 => SmtTerm::bool(true),
            1 => kept.remove(0),
            _ => SmtTerm::And(kept),
        }
    }

    /// Disjunction dual to [`SmtTerm::conjunction`].
    pub fn disjunction(terms: impl IntoIterator<Item = SmtTerm>) -> Self {
        let mut kept = Vec::new();
        for term in terms {
            if term.is_true() {
                return SmtTerm::bool(true);
            }
            if !term.is_false() {
                kept.push(term);
            }
        }
        match kept.len() {
            0 => SmtTerm::bool(false),
            1 => kept.remove(0),
            _ => SmtTerm::Or(kept),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, SmtTerm::BoolLit(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, SmtTerm::BoolLit(false))
    }

    fn children(&self) -> Vec<&SmtTerm> {
        match self {
            SmtTerm::Var(_) | SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => Vec::new(),
            SmtTerm::Add(l, r)
            | SmtTerm::Sub(l, r)
            | SmtTerm::Mul(l, r)
            | SmtTerm::Eq(l, r)
            | SmtTerm::Lt(l, r)
            | SmtTerm::Le(l, r)
            | SmtTerm::Gt(l, r)
            | SmtTerm::Ge(l, r)
            | SmtTerm::Implies(l, r) => vec![&**l, &**r],
            SmtTerm::And(terms) | SmtTerm::Or(terms) => terms.iter().collect(),
            SmtTerm::Not(inner) => vec![&**inner],
            SmtTerm::Ite(c, t, e) => vec![&**c, &**t, &**e],
        }
    }

    /// Names of all variables occurring in the term.
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(term) = stack.pop() {
            if let SmtTerm::Var(name) = term {
                out.insert(name.clone());
            }
            stack.extend(term.children());
        }
        out
    }

    /// Number of nodes in the term tree.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(term) = stack.pop() {
            count += 1;
            stack.extend(term.children());
        }
        count
    }

    fn sort_hint(&self, known: &BTreeMap<String, SmtSort>) -> Option<SmtSort> {
        match self {
            SmtTerm::Var(name) => known.get(name).copied(),
            SmtTerm::IntLit(_) | SmtTerm::Add(..) | SmtTerm::Sub(..) | SmtTerm::Mul(..) => {
                Some(SmtSort::Int)
            }
            SmtTerm::BoolLit(_)
            | SmtTerm::Eq(..)
            | SmtTerm::Lt(..)
            | SmtTerm::Le(..)
            | SmtTerm::Gt(..)
            | SmtTerm::Ge(..)
            | SmtTerm::And(_)
            | SmtTerm::Or(_)
            | SmtTerm::Not(_)
            | SmtTerm::Implies(..) => Some(SmtSort::Bool),
            SmtTerm::Ite(_, t, e) => t.sort_hint(known).or_else(|| e.sort_hint(known)),
        }
    }

    fn infer_into(&self, expected: Option<SmtSort>, known: &mut BTreeMap<String, SmtSort>) {
        match self {
            SmtTerm::Var(name) => {
                if let Some(sort) = expected {
                    known.entry(name.clone()).or_insert(sort);
                }
            }
            SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => {}
            SmtTerm::Add(l, r)
            | SmtTerm::Sub(l, r)
            | SmtTerm::Mul(l, r)
            | SmtTerm::Lt(l, r)
            | SmtTerm::Le(l, r)
            | SmtTerm::Gt(l, r)
            | SmtTerm::Ge(l, r) => {
                l.infer_into(Some(SmtSort::Int), known);
                r.infer_into(Some(SmtSort::Int), known);
            }
            SmtTerm::Eq(l, r) => {
                let sort = l.sort_hint(known).or_else(|| r.sort_hint(known));
                l.infer_into(sort, known);
                r.infer_into(sort, known);
            }
            SmtTerm::And(terms) | SmtTerm::Or(terms) => {
                for t in terms {
                    t.infer_into(Some(SmtSort::Bool), known);
                }
            }
            SmtTerm::Not(inner) => inner.infer_into(Some(SmtSort::Bool), known),
            SmtTerm::Implies(l, r) => {
                l.infer_into(Some(SmtSort::Bool), known);
                r.infer_into(Some(SmtSort::Bool), known);
            }
            SmtTerm::Ite(c, t, e) => {
                c.infer_into(Some(SmtSort::Bool), known);
                let sort = expected
                    .or_else(|| t.sort_hint(known))
                    .or_else(|| e.sort_hint(known));
                t.infer_into(sort, known);
                e.infer_into(sort, known);
            }
        }
    }
}

impl fmt::Display for SmtTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_smtlib(self))
    }
}

/// Infer a sort for every variable of the given Boolean formulas.
///
/// Variables used arithmetically are `Int`, variables in Boolean positions
/// are `Bool`. The first usage wins on conflicts; variables only ever
/// compared with other unsorted variables default to `Int`.
pub fn infer_sorts<'a>(formulas: impl IntoIterator<Item = &'a SmtTerm>) -> BTreeMap<String, SmtSort> {
    let formulas: Vec<&SmtTerm> = formulas.into_iter().collect();
    let mut known = BTreeMap::new();
    // A second pass lets equalities between variables see sorts fixed later.
    for _ in 0..2 {
        for formula in &formulas {
            formula.infer_into(Some(SmtSort::Bool), &mut known);
        }
    }
    for formula in &formulas {
        for name in formula.free_vars() {
            known.entry(name).or_insert(SmtSort::Int);
        }
    }
    known
}

/// Strip the SSA index from a solver-level variable name (`x@3` -> `x`).
pub fn program_variable(name: &str) -> &str {
    match name.rsplit_once(SSA_SEPARATOR) {
        Some((base, index))
            if !base.is_empty() && !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) =>
        {
            base
        }
        _ => name,
    }
}

/// Whether a symbol was introduced by the encoding or the solver rather than
/// the program (`__`-prefixed helpers, `!`-tagged solver auxiliaries).
pub fn is_internal_symbol(name: &str) -> bool {
    name.starts_with("__") || name.contains('!')
}
