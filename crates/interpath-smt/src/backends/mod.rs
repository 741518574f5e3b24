//! Concrete solver backends.

pub mod bounded;
pub mod smtlib_printer;
pub mod smtlib_process;
pub(crate) mod sexp;
