#![doc = include_str!("../README.md")]

//! Term language and interpolating solver capability for trace checking.
//!
//! Formulas are plain [`terms::SmtTerm`] trees. Backends implement
//! [`solver::InterpolatingSolver`], which pushes one formula per stack level
//! and hands back an opaque group token that later names the formula in
//! interpolation queries.

pub mod backends;
pub mod solver;
pub mod sorts;
pub mod terms;
