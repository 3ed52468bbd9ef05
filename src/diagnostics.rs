//! Error and diagnostic collection, per spec §7.
//!
//! Downstream passes are not run after a pass records an error: each stage
//! (`analyzer`, `ir::builder`, `ctie`, `opt`, `isa`, `encoder`) funnels its
//! failures into a [`Diagnostics`] collector and the driver in
//! [`crate::pipeline`] aborts at the end of the stage if anything was
//! recorded. Warnings are non-fatal and are returned alongside a
//! successful result.

use crate::span::SourceSpan;
use std::fmt;

/// Stable categorization of compiler errors (spec §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown identifier, ambiguous/no matching overload, duplicate
    /// definition, cyclic type.
    Resolution,
    /// Type mismatch, narrowing without cast, static OOB index,
    /// non-exhaustive `case`, invalid implicit widening.
    Type,
    /// Mutation of immutable, non-constant lambda capture, interface value
    /// used without monomorphization, non-constant CTIE input.
    Semantic,
    /// TSMC requested for a recursive function, spill exhaustion,
    /// instruction pattern not found in the encoder table.
    Backend,
    /// Invariant violation: always a compiler bug.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorKind::Resolution => "resolution error",
            ErrorKind::Type => "type error",
            ErrorKind::Semantic => "semantic error",
            ErrorKind::Backend => "backend error",
            ErrorKind::Internal => "internal compiler error",
        };
        f.write_str(s)
    }
}

/// A single diagnostic: a kind, a message, and the span it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub span: SourceSpan,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, span: SourceSpan, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            message: message.into(),
            span,
        }
    }

    pub fn internal(span: SourceSpan, message: impl Into<String>) -> Self {
        Diagnostic::new(ErrorKind::Internal, span, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {} ({})", self.span, self.kind, self.message)
    }
}

/// Accumulates errors and warnings across a single pass, per spec §7:
/// "the analyzer reports as many as it can before aborting".
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, kind: ErrorKind, span: SourceSpan, message: impl Into<String>) {
        self.errors.push(Diagnostic::new(kind, span, message));
    }

    pub fn warn(&mut self, kind: ErrorKind, span: SourceSpan, message: impl Into<String>) {
        self.warnings.push(Diagnostic::new(kind, span, message));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn append(&mut self, other: &mut Diagnostics) {
        self.errors.append(&mut other.errors);
        self.warnings.append(&mut other.warnings);
    }

    /// Turn the accumulated errors into a [`CompileError::Aborted`], if any
    /// were recorded. Call this at the end of every pass boundary.
    pub fn into_result(self) -> CompileResult<Vec<Diagnostic>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(CompileError::Aborted(self.errors))
        }
    }
}

/// Top-level error type for the whole pipeline, grounded on
/// `cranelift-codegen`'s `pub use crate::result::{CodegenError,
/// CodegenResult}` re-export: one umbrella error, `thiserror`-derived,
/// wrapping each stage's own error family.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// One or more diagnostics were recorded and the owning pass aborted.
    #[error("compilation aborted with {} error(s)", .0.len())]
    Aborted(Vec<Diagnostic>),

    /// A MIR invariant (spec §3.3) was violated; always a compiler bug.
    #[error("internal compiler error: {0}")]
    Verifier(String),

    /// The Z80 backend rejected the module (e.g. TSMC requested for a
    /// recursive function, or spill exhaustion).
    #[error("backend error: {0}")]
    Backend(#[from] crate::isa::BackendError),

    /// The instruction encoder found no matching table entry.
    #[error("encoder error: {0}")]
    Encode(#[from] crate::encoder::EncodeError),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Constructs an [`ErrorKind::Internal`] diagnostic with a formatted
/// message; used at verifier/invariant-violation sites where the only
/// sound action is to report a compiler bug rather than attempt recovery.
#[macro_export]
macro_rules! bug {
    ($span:expr, $($arg:tt)*) => {
        $crate::diagnostics::Diagnostic::internal($span, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::span::FileId;

    #[test]
    fn collects_multiple_errors_before_aborting() {
        let mut d = Diagnostics::new();
        let span = SourceSpan::new(FileId::new(0), 0, 1);
        d.error(ErrorKind::Type, span, "first");
        d.error(ErrorKind::Resolution, span, "second");
        assert!(d.has_errors());
        match d.into_result() {
            Err(CompileError::Aborted(errs)) => assert_eq!(errs.len(), 2),
            _ => panic!("expected Aborted"),
        }
    }

    #[test]
    fn warnings_alone_do_not_abort() {
        let mut d = Diagnostics::new();
        let span = SourceSpan::new(FileId::new(0), 0, 1);
        d.warn(ErrorKind::Semantic, span, "heads up");
        let warnings = d.into_result().expect("warnings-only is Ok");
        assert_eq!(warnings.len(), 1);
    }
}
