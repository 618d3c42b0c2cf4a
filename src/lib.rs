//! Floe - PNaCl bitcode to native code translation.
//!
//! Floe reads a PNaCl bitcode stream, materializes a typed SSA control-flow
//! graph per function, and lowers it to ARM32 machine code, emitted either as
//! textual assembly or as a relocatable ELF object.
//!
//! # Usage
//!
//! ```ignore
//! use floe::bitstream::PexeReader;
//! use floe::context::{Flags, GlobalContext};
//! use floe::translator;
//!
//! let bytes = std::fs::read("input.pexe")?;
//! let mut cursor = PexeReader::new(&bytes)?;
//! let ctx = GlobalContext::new(Flags::default(), Box::new(std::io::stdout()));
//! let summary = translator::translate(&mut cursor, &ctx)?;
//! ```
//!
//! # Architecture
//!
//! - [`bitstream`] - record-level cursor over the bitcode container
//! - [`parser`] - block parsers building the typed CFG
//! - [`ir`] - the SSA intermediate representation
//! - [`arm32`] - target instruction model, assembler and lowering
//! - [`elf`] - relocatable object emission
//! - [`translator`] - the producer/worker driver tying it together

pub mod arm32;
pub mod bitstream;
pub mod context;
pub mod elf;
pub mod error;
pub mod intrinsics;
pub mod ir;
pub mod parser;
pub mod translator;

pub use context::{Flags, GlobalContext, OutputFormat};
pub use error::{TranslateError, TranslateResult};
pub use translator::{translate, TranslationSummary};
