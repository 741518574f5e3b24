#![doc = include_str!("../README.md")]

pub mod analyzer;
pub mod error;
pub mod options;
pub mod program;
pub mod reconstruct;
pub mod refinement;
pub mod result;
pub mod trace;

pub use analyzer::CounterexampleTraceAnalyzer;
pub use error::RefinementError;
pub use options::{InterpolationOptions, InterpolationStrategy, OrderingStrategy};
pub use result::CounterexampleTraceResult;
