//! The MIR data model (spec §3.2) and its builder (spec §4.B).

pub mod entities;
pub mod flowgraph;
pub mod function;
pub mod instructions;
pub mod module;
pub mod strings;
pub mod verifier;
pub mod write;

mod builder;
pub use builder::{build_function, BuilderError, FunctionBuilder};
