// High-level IR instructions as a tagged sum. The bitcode parser appends these
// to basic blocks; the target lowering consumes them. Each variant carries only
// the fields it needs, and operand references are indices into the per-function
// value tables rather than pointers, so a finished CFG can move between threads
// without shared state.

//! SSA instructions, operands and constants.

use std::fmt;

use super::types::Type;

/// Index of an SSA variable within its function.
pub type VarId = u32;
/// Index into a function's local constant pool.
pub type ConstId = u32;
/// Index into the module's global declaration table (functions first).
pub type GlobalId = u32;
/// Index of a basic block within its function; block 0 is the entry.
pub type BlockId = u32;

/// An instruction operand: an SSA variable, a function-local constant, or the
/// address of a global declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Var(VarId),
    Const(ConstId),
    Global(GlobalId),
}

/// A function-local constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Integer { ty: Type, value: i64 },
    Float(f32),
    Double(f64),
    Undef(Type),
}

impl Constant {
    pub fn ty(&self) -> Type {
        match *self {
            Constant::Integer { ty, .. } => ty,
            Constant::Float(_) => Type::F32,
            Constant::Double(_) => Type::F64,
            Constant::Undef(ty) => ty,
        }
    }
}

/// Arithmetic sub-kinds. Integer and float families are disjoint; the parser
/// selects the family from the operand type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Fadd,
    Sub,
    Fsub,
    Mul,
    Fmul,
    Udiv,
    Sdiv,
    Fdiv,
    Urem,
    Srem,
    Frem,
    Shl,
    Lshr,
    Ashr,
    And,
    Or,
    Xor,
}

impl ArithOp {
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Fadd => "fadd",
            ArithOp::Sub => "sub",
            ArithOp::Fsub => "fsub",
            ArithOp::Mul => "mul",
            ArithOp::Fmul => "fmul",
            ArithOp::Udiv => "udiv",
            ArithOp::Sdiv => "sdiv",
            ArithOp::Fdiv => "fdiv",
            ArithOp::Urem => "urem",
            ArithOp::Srem => "srem",
            ArithOp::Frem => "frem",
            ArithOp::Shl => "shl",
            ArithOp::Lshr => "lshr",
            ArithOp::Ashr => "ashr",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    Zext,
    Sext,
    Fptoui,
    Fptosi,
    Uitofp,
    Sitofp,
    Fptrunc,
    Fpext,
    Bitcast,
}

impl CastOp {
    pub fn name(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::Zext => "zext",
            CastOp::Sext => "sext",
            CastOp::Fptoui => "fptoui",
            CastOp::Fptosi => "fptosi",
            CastOp::Uitofp => "uitofp",
            CastOp::Sitofp => "sitofp",
            CastOp::Fptrunc => "fptrunc",
            CastOp::Fpext => "fpext",
            CastOp::Bitcast => "bitcast",
        }
    }
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Integer compare conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpCond {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

/// The sixteen IEEE ordered/unordered float compare conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcmpCond {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Uno,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    True,
}

/// Callee of a call instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    /// Direct call to a declared function.
    Direct(GlobalId),
    /// Indirect call through a computed address.
    Indirect(Operand),
}

/// A high-level instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Arith { op: ArithOp, dest: VarId, a: Operand, b: Operand },
    Cast { op: CastOp, dest: VarId, src: Operand },
    Select { dest: VarId, cond: Operand, then_val: Operand, else_val: Operand },
    ExtractElement { dest: VarId, vec: Operand, index: Operand },
    InsertElement { dest: VarId, vec: Operand, elt: Operand, index: Operand },
    Icmp { cond: IcmpCond, dest: VarId, a: Operand, b: Operand },
    Fcmp { cond: FcmpCond, dest: VarId, a: Operand, b: Operand },
    Ret { value: Option<Operand> },
    Br { target: BlockId },
    CondBr { cond: Operand, then_target: BlockId, else_target: BlockId },
    Switch { ty: Type, cond: Operand, default: BlockId, cases: Vec<(i64, BlockId)> },
    Unreachable,
    Phi { dest: VarId, args: Vec<(Operand, BlockId)> },
    Alloca { dest: VarId, byte_count: Operand, align: u32 },
    Load { dest: VarId, ty: Type, addr: Operand, align: u32 },
    Store { value: Operand, addr: Operand, align: u32 },
    Call { dest: Option<VarId>, callee: Callee, args: Vec<Operand>, tail: bool },
    IntrinsicCall { dest: Option<VarId>, intrinsic: u32, args: Vec<Operand> },
    /// Parse-error placeholder keeping the value ID space aligned.
    Assign { dest: VarId, src: Operand },
}

impl Inst {
    /// Whether this instruction ends a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Ret { .. }
                | Inst::Br { .. }
                | Inst::CondBr { .. }
                | Inst::Switch { .. }
                | Inst::Unreachable
        )
    }

    /// Successor blocks named by a terminator, in record order.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Inst::Br { target } => vec![*target],
            Inst::CondBr { then_target, else_target, .. } => vec![*then_target, *else_target],
            Inst::Switch { default, cases, .. } => {
                let mut succs = vec![*default];
                succs.extend(cases.iter().map(|&(_, label)| label));
                succs
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators() {
        assert!(Inst::Unreachable.is_terminator());
        assert!(Inst::Ret { value: None }.is_terminator());
        assert!(Inst::Br { target: 1 }.is_terminator());
        assert!(!Inst::Assign { dest: 0, src: Operand::Var(0) }.is_terminator());
    }

    #[test]
    fn test_switch_successors() {
        let sw = Inst::Switch {
            ty: Type::I32,
            cond: Operand::Var(0),
            default: 3,
            cases: vec![(-1, 1), (2, 2)],
        };
        assert_eq!(sw.successors(), vec![3, 1, 2]);
    }
}
