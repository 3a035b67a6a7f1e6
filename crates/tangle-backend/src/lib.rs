//! Grammar compilation: validation, lowering, LALR(1) construction and conflict
//! resolution, producing the [`ParseTable`](tangle_runtime::table::ParseTable) the
//! runtime executes.

pub mod check;
pub mod compile;
pub mod error;
pub mod grammar;
pub mod lower;
pub mod lr;
pub mod pattern;
pub mod resolve;

pub use compile::{CompileOptions, CompiledGrammar};
pub use error::{CompileErrors, Diagnostic};
pub use grammar::Grammar;
