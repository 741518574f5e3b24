//! Solver-facing machinery of the trace analyzer: formula ordering, solver
//! sessions, interpolation strategies, core minimization, interpolant
//! checks, query dumps and time limits.
// Sub-submodules use `use super::*` to access these imports; the unused_imports
// lint fires because the items are not referenced directly in this file.
#![allow(unused_imports)]

mod timeout;
pub(crate) use timeout::*;
pub use timeout::CancellationToken;

mod dump;
pub(crate) use dump::*;

mod session;
pub use session::InterpolationSession;

pub mod ordering;
pub use ordering::{order_formulas, Permutation};

mod strategy;
pub(crate) use strategy::*;

pub mod useful_blocks;

mod verification;
pub use verification::verify_interpolants;
pub(crate) use verification::check_interpolants;

mod interpolator;
pub(crate) use interpolator::*;

use std::collections::BTreeSet;
use std::sync::Arc;

use interpath_smt::solver::{InterpolatingSolver, Model, SatResult, SolverFactory};
use interpath_smt::terms::SmtTerm;
use tracing::{debug, info, warn};

use crate::error::RefinementError;
use crate::options::{InterpolationOptions, InterpolationStrategy, OrderingStrategy};
use crate::program::{AbstractionState, BlockFormulas, BranchDecisions, ProgramFacts};
