//! Errors specific to Stage A; non-fatal diagnostics go through
//! [`crate::diagnostics::Diagnostics`] instead, so this enum only carries
//! failures that abort analysis of the function in progress.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("call to unresolved function `{0}`")]
    UnknownFunction(String),
    #[error("no overload of `{0}` matches the argument types at this call site")]
    NoMatchingOverload(String),
    #[error("ambiguous call to `{0}`: more than one overload matches")]
    AmbiguousOverload(String),
    #[error("type `{0}` is not declared")]
    UnknownType(String),
}
