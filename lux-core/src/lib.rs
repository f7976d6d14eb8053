//! SPIR-V code generation backend for the Lux shading language.
//!
//! The crate consumes a typed, name-resolved [`ir::Program`] and emits a
//! SPIR-V 1.0 module for the Vertex or Fragment execution model, using the
//! Logical addressing model and the GLSL450 memory model, with the
//! `GLSL.std.450` extended instruction set imported.
//!
//! ```no_run
//! use lux_core::codegen::CodeGenerator;
//! use lux_core::ir::{Program, ProgramKind};
//!
//! let program = Program { kind: ProgramKind::Fragment, elements: vec![] };
//! let words = CodeGenerator::new().generate(&program);
//! ```

pub mod codegen;
pub mod error;
pub mod ir;
pub mod validate;

pub use codegen::CodeGenerator;
pub use error::{CodegenError, Result};
