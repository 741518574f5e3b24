//! Program facts consumed by the trace analyzer: abstract states along a
//! path, loop structure, variable classification and branching formulas.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use interpath_smt::solver::Model;
use interpath_smt::terms::SmtTerm;
use serde::{Deserialize, Serialize};

/// A control-flow node inside a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub function: String,
    pub node: u32,
}

impl Location {
    pub fn new(function: impl Into<String>, node: u32) -> Self {
        Self {
            function: function.into(),
            node,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:N{}", self.function, self.node)
    }
}

/// An abstract state on a candidate error path.
///
/// `call_stack` holds the call sites of the functions entered but not yet
/// left, outermost first; it is empty in the entry function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractionState {
    pub id: usize,
    pub location: Location,
    #[serde(default)]
    pub call_stack: Vec<Location>,
}

impl AbstractionState {
    pub fn new(id: usize, location: Location) -> Self {
        Self {
            id,
            location,
            call_stack: Vec::new(),
        }
    }

    pub fn with_call_stack(mut self, call_stack: Vec<Location>) -> Self {
        self.call_stack = call_stack;
        self
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// The location this state occupies in `function`: its own location, or
    /// the pending call site inside `function` when it is deeper in the
    /// call stack.
    pub fn location_in(&self, function: &str) -> Option<&Location> {
        if self.location.function == function {
            return Some(&self.location);
        }
        self.call_stack
            .iter()
            .rev()
            .find(|site| site.function == function)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
    pub head: Location,
    pub nodes: BTreeSet<Location>,
}

impl Loop {
    pub fn new(head: Location, nodes: impl IntoIterator<Item = Location>) -> Self {
        let mut nodes: BTreeSet<Location> = nodes.into_iter().collect();
        nodes.insert(head.clone());
        Self { head, nodes }
    }

    pub fn function(&self) -> &str {
        &self.head.function
    }

    /// Whether `state` is inside this loop, either directly or through a
    /// pending call made from inside it.
    pub fn contains(&self, state: &AbstractionState) -> bool {
        state
            .location_in(self.function())
            .is_some_and(|loc| self.nodes.contains(loc))
    }
}

/// Loops of the analyzed program and the variables they increment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStructure {
    loops: Vec<Loop>,
    increment_vars: BTreeSet<String>,
}

impl LoopStructure {
    pub fn new(loops: Vec<Loop>) -> Self {
        Self {
            loops,
            increment_vars: BTreeSet::new(),
        }
    }

    pub fn with_increment_vars<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.increment_vars = vars.into_iter().map(Into::into).collect();
        self
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Index of the loop headed at `location`.
    pub fn loop_headed_at(&self, location: &Location) -> Option<usize> {
        self.loops.iter().position(|l| &l.head == location)
    }

    pub fn is_increment_var(&self, name: &str) -> bool {
        self.increment_vars.contains(name)
    }
}

/// Coarse classification of program variables by how they are used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableClassification {
    int_bool: BTreeSet<String>,
    int_equal: BTreeSet<String>,
}

impl VariableClassification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables only ever holding 0 or 1.
    pub fn with_bool_like<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.int_bool.extend(vars.into_iter().map(Into::into));
        self
    }

    /// Variables only compared for equality.
    pub fn with_equality_only<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.int_equal.extend(vars.into_iter().map(Into::into));
        self
    }

    pub fn is_bool_like(&self, name: &str) -> bool {
        self.int_bool.contains(name)
    }

    pub fn is_equality_only(&self, name: &str) -> bool {
        self.int_equal.contains(name)
    }
}

/// Optional program knowledge. Orderings that need a missing piece fall back
/// to forwards order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramFacts {
    pub loops: Option<LoopStructure>,
    pub classification: Option<VariableClassification>,
}

impl ProgramFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loops(mut self, loops: LoopStructure) -> Self {
        self.loops = Some(loops);
        self
    }

    pub fn with_classification(mut self, classification: VariableClassification) -> Self {
        self.classification = Some(classification);
        self
    }
}

/// Identifier of a branching node whose outcome is recorded in the path
/// formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchPointId(pub u64);

impl fmt::Display for BranchPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch#{}", self.0)
    }
}

/// Outcome of each branching node under a model: `true` means the then-edge
/// was taken.
pub type BranchDecisions = BTreeMap<BranchPointId, bool>;

/// Block formulas of a path (one per edge block, in SSA form) together with
/// the predicates whose truth value tells which branch was taken.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockFormulas {
    formulas: Vec<SmtTerm>,
    branching: BTreeMap<BranchPointId, SmtTerm>,
}

impl BlockFormulas {
    pub fn new(formulas: Vec<SmtTerm>) -> Self {
        Self {
            formulas,
            branching: BTreeMap::new(),
        }
    }

    pub fn with_branching(mut self, branching: BTreeMap<BranchPointId, SmtTerm>) -> Self {
        self.branching = branching;
        self
    }

    pub fn formulas(&self) -> &[SmtTerm] {
        &self.formulas
    }

    pub fn branching(&self) -> &BTreeMap<BranchPointId, SmtTerm> {
        &self.branching
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    /// Total size of all block formulas.
    pub fn size(&self) -> usize {
        self.formulas.iter().map(SmtTerm::size).sum()
    }

    /// Same branching predicates over different block formulas.
    pub(crate) fn replace_formulas(&self, formulas: Vec<SmtTerm>) -> Self {
        Self {
            formulas,
            branching: self.branching.clone(),
        }
    }

    /// Evaluate every branching predicate under `model`. Predicates the
    /// model cannot decide are left out.
    pub fn branch_decisions(&self, model: &Model) -> BranchDecisions {
        self.branching
            .iter()
            .filter_map(|(id, predicate)| model.evaluate_bool(predicate).map(|taken| (*id, taken)))
            .collect()
    }
}
