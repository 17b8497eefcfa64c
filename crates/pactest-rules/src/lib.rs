mod assertion;
mod eval;
mod outcome;
mod rule;

pub use assertion::{Assertion, FileType, PkgList, PkgScalar, Sidecar};
pub use eval::EvalContext;
pub use outcome::{Outcome, SkipReason};
pub use rule::Rule;

#[cfg(test)]
mod tests;
