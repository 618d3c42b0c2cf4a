//! Typed SSA intermediate representation.
//!
//! The parser materializes one [`Cfg`] per function block; the ARM32 lowering
//! consumes it. Types, instructions and operands live in submodules:
//!
//! - [`types`] - the closed type set and function signatures
//! - [`inst`] - instructions, operands, constants
//! - [`cfg`] - basic blocks and the per-function graph

pub mod cfg;
pub mod inst;
pub mod types;

pub use cfg::{BasicBlock, Cfg};
pub use inst::{
    ArithOp, BlockId, Callee, CastOp, ConstId, Constant, FcmpCond, GlobalId, IcmpCond, Inst,
    Operand, VarId,
};
pub use types::{FuncSig, Type};
