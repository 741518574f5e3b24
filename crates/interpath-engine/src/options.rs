//! Configuration of the counterexample trace analyzer.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ORDERING_FORWARDS: &str = "forwards";
pub const ORDERING_BACKWARDS: &str = "backwards";
pub const ORDERING_ZIGZAG: &str = "zigzag";
pub const ORDERING_LOOP_FREE_FIRST: &str = "loop-free-first";
pub const ORDERING_LOOP_FREE_FIRST_BACKWARDS: &str = "loop-free-first-backwards";
pub const ORDERING_RANDOM: &str = "random";
pub const ORDERING_LOWEST_AVG_SCORE: &str = "lowest-avg-score";
pub const ORDERING_HIGHEST_AVG_SCORE: &str = "highest-avg-score";

pub const STRATEGY_SEQUENTIAL: &str = "sequential";
pub const STRATEGY_SEQUENTIAL_NATIVE: &str = "sequential-native";
pub const STRATEGY_TREE: &str = "tree";
pub const STRATEGY_TREE_WELL_SCOPED: &str = "tree-well-scoped";
pub const STRATEGY_TREE_NESTED: &str = "tree-nested";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("unknown formula ordering '{0}'")]
    UnknownOrdering(String),
    #[error("unknown interpolation strategy '{0}'")]
    UnknownStrategy(String),
}

/// Order in which block formulas are submitted to the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingStrategy {
    #[default]
    Forwards,
    Backwards,
    #[serde(rename = "zigzag")]
    ZigZag,
    LoopFreeFirst,
    LoopFreeFirstBackwards,
    Random,
    LowestAvgScore,
    HighestAvgScore,
}

impl OrderingStrategy {
    pub const ALL: [OrderingStrategy; 8] = [
        OrderingStrategy::Forwards,
        OrderingStrategy::Backwards,
        OrderingStrategy::ZigZag,
        OrderingStrategy::LoopFreeFirst,
        OrderingStrategy::LoopFreeFirstBackwards,
        OrderingStrategy::Random,
        OrderingStrategy::LowestAvgScore,
        OrderingStrategy::HighestAvgScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderingStrategy::Forwards => ORDERING_FORWARDS,
            OrderingStrategy::Backwards => ORDERING_BACKWARDS,
            OrderingStrategy::ZigZag => ORDERING_ZIGZAG,
            OrderingStrategy::LoopFreeFirst => ORDERING_LOOP_FREE_FIRST,
            OrderingStrategy::LoopFreeFirstBackwards => ORDERING_LOOP_FREE_FIRST_BACKWARDS,
            OrderingStrategy::Random => ORDERING_RANDOM,
            OrderingStrategy::LowestAvgScore => ORDERING_LOWEST_AVG_SCORE,
            OrderingStrategy::HighestAvgScore => ORDERING_HIGHEST_AVG_SCORE,
        }
    }

    /// Whether the ordering submits the end of the trace before its start.
    pub fn is_backwards(&self) -> bool {
        matches!(
            self,
            OrderingStrategy::Backwards | OrderingStrategy::LoopFreeFirstBackwards
        )
    }
}

impl fmt::Display for OrderingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderingStrategy {
    type Err = OptionsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        OrderingStrategy::ALL
            .into_iter()
            .find(|ordering| ordering.as_str() == normalized)
            .ok_or(OptionsError::UnknownOrdering(normalized))
    }
}

/// How interpolants are requested from the solver once a trace is UNSAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterpolationStrategy {
    /// One pairwise query per split point.
    #[default]
    Sequential,
    /// A single sequence-interpolation query.
    SequentialNative,
    /// Tree interpolation where a callee scope excludes its call and return.
    Tree,
    /// Tree interpolation where a callee scope includes its return.
    TreeWellScoped,
    /// Tree interpolation where a callee scope includes its call and return.
    TreeNested,
}

impl InterpolationStrategy {
    pub const ALL: [InterpolationStrategy; 5] = [
        InterpolationStrategy::Sequential,
        InterpolationStrategy::SequentialNative,
        InterpolationStrategy::Tree,
        InterpolationStrategy::TreeWellScoped,
        InterpolationStrategy::TreeNested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InterpolationStrategy::Sequential => STRATEGY_SEQUENTIAL,
            InterpolationStrategy::SequentialNative => STRATEGY_SEQUENTIAL_NATIVE,
            InterpolationStrategy::Tree => STRATEGY_TREE,
            InterpolationStrategy::TreeWellScoped => STRATEGY_TREE_WELL_SCOPED,
            InterpolationStrategy::TreeNested => STRATEGY_TREE_NESTED,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(
            self,
            InterpolationStrategy::Tree
                | InterpolationStrategy::TreeWellScoped
                | InterpolationStrategy::TreeNested
        )
    }
}

impl fmt::Display for InterpolationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterpolationStrategy {
    type Err = OptionsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        InterpolationStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or(OptionsError::UnknownStrategy(normalized))
    }
}

/// Options for [`CounterexampleTraceAnalyzer`](crate::CounterexampleTraceAnalyzer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InterpolationOptions {
    pub ordering: OrderingStrategy,
    pub strategy: InterpolationStrategy,
    /// Check satisfiability after every pushed formula and stop pushing
    /// checks once the trace is known to be UNSAT.
    pub incremental_check: bool,
    /// Keep the solver session between calls and reuse the common prefix of
    /// asserted formulas.
    pub reuse_session: bool,
    /// Retry once with the reversed order when interpolation fails.
    pub retry_on_failure: bool,
    /// Check every produced interpolant against the trace.
    pub verify_interpolants: bool,
    /// Wall-clock limit per trace check in milliseconds; 0 disables it.
    pub time_limit_ms: u64,
    /// Replace formulas outside a minimal unsatisfiable core by `true`
    /// before interpolating.
    pub useful_blocks: bool,
    /// Largest total path formula size that is still refined; 0 disables
    /// the limit.
    pub max_formula_size: usize,
    /// Write every submitted query as an SMT-LIB script. `%d` is replaced by
    /// a running counter.
    pub dump_path_template: Option<String>,
    /// Seed of the random ordering.
    pub random_seed: u64,
    /// Decide feasibility without interpolation when interpolation fails.
    pub fallback_without_interpolation: bool,
}

impl Default for InterpolationOptions {
    fn default() -> Self {
        Self {
            ordering: OrderingStrategy::Forwards,
            strategy: InterpolationStrategy::Sequential,
            incremental_check: false,
            reuse_session: false,
            retry_on_failure: true,
            verify_interpolants: false,
            time_limit_ms: 0,
            useful_blocks: false,
            max_formula_size: 0,
            dump_path_template: None,
            random_seed: 0,
            fallback_without_interpolation: true,
        }
    }
}

impl InterpolationOptions {
    pub fn time_limit(&self) -> Option<Duration> {
        if self.time_limit_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.time_limit_ms))
        }
    }

    pub fn formula_size_limit(&self) -> Option<usize> {
        (self.max_formula_size > 0).then_some(self.max_formula_size)
    }
}
