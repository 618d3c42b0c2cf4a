// The closed set of ARM32 machine instruction variants produced by the
// lowering. Each variant carries a predicate, its operands, and optional
// flags; emission is a pair of functions pattern-matching on the variant, one
// producing textual assembly (this file) and one driving the binary assembler.
// Instructions the assembler cannot encode are carried as pre-rendered text
// and flagged for text fixup downstream.

//! ARM32 instruction variants, textual emission, branch optimization.

use std::fmt::Write as _;

use crate::ir::BlockId;

use super::operands::{FlexOp2, MemOperand, ShiftAmount, ShiftKind};
use super::{type_attrs, Cond, Reg, VfpReg};

/// Data-processing opcodes with a register/flex-operand form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOp {
    Add,
    Adc,
    Sub,
    Sbc,
    Rsb,
    And,
    Orr,
    Eor,
    Bic,
}

impl DataOp {
    pub fn name(self) -> &'static str {
        match self {
            DataOp::Add => "add",
            DataOp::Adc => "adc",
            DataOp::Sub => "sub",
            DataOp::Sbc => "sbc",
            DataOp::Rsb => "rsb",
            DataOp::And => "and",
            DataOp::Orr => "orr",
            DataOp::Eor => "eor",
            DataOp::Bic => "bic",
        }
    }

    /// The four-bit ALU opcode field.
    pub fn encoding(self) -> u32 {
        match self {
            DataOp::And => 0b0000,
            DataOp::Eor => 0b0001,
            DataOp::Sub => 0b0010,
            DataOp::Rsb => 0b0011,
            DataOp::Add => 0b0100,
            DataOp::Adc => 0b0101,
            DataOp::Sbc => 0b0110,
            DataOp::Orr => 0b1100,
            DataOp::Bic => 0b1110,
        }
    }
}

/// VFP three-operand arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfpOp {
    Vadd,
    Vsub,
    Vmul,
    Vdiv,
}

impl VfpOp {
    pub fn name(self) -> &'static str {
        match self {
            VfpOp::Vadd => "vadd",
            VfpOp::Vsub => "vsub",
            VfpOp::Vmul => "vmul",
            VfpOp::Vdiv => "vdiv",
        }
    }
}

/// VFP unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfpUnaryOp {
    Vsqrt,
    Vabs,
    Vneg,
}

impl VfpUnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            VfpUnaryOp::Vsqrt => "vsqrt",
            VfpUnaryOp::Vabs => "vabs",
            VfpUnaryOp::Vneg => "vneg",
        }
    }
}

/// VFP conversions, named destination-type-first like the mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcvtKind {
    F64FromF32,
    F32FromF64,
    S32FromF32,
    U32FromF32,
    S32FromF64,
    U32FromF64,
    F32FromS32,
    F32FromU32,
    F64FromS32,
    F64FromU32,
}

impl VcvtKind {
    /// The `.dst.src` mnemonic suffix.
    pub fn suffix(self) -> &'static str {
        match self {
            VcvtKind::F64FromF32 => ".f64.f32",
            VcvtKind::F32FromF64 => ".f32.f64",
            VcvtKind::S32FromF32 => ".s32.f32",
            VcvtKind::U32FromF32 => ".u32.f32",
            VcvtKind::S32FromF64 => ".s32.f64",
            VcvtKind::U32FromF64 => ".u32.f64",
            VcvtKind::F32FromS32 => ".f32.s32",
            VcvtKind::F32FromU32 => ".f32.u32",
            VcvtKind::F64FromS32 => ".f64.s32",
            VcvtKind::F64FromU32 => ".f64.u32",
        }
    }
}

/// A 16-bit immediate half materialized by `movw`/`movt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideImm<'a> {
    Imm(u16),
    /// Half of a relocatable symbol address plus addend; `movw` takes the
    /// lower half, `movt` the upper.
    Symbol { name: &'a str, addend: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget<'a> {
    Direct(&'a str),
    Indirect(Reg),
}

/// One machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Arm32Inst<'a> {
    DataOp {
        op: DataOp,
        pred: Cond,
        set_flags: bool,
        dest: Reg,
        src0: Reg,
        src1: FlexOp2,
    },
    Shift { kind: ShiftKind, pred: Cond, dest: Reg, src: Reg, amount: ShiftAmount },
    Mul { pred: Cond, dest: Reg, src0: Reg, src1: Reg },
    /// `mls dest, src0, src1, acc`: dest = acc - src0*src1.
    Mls { pred: Cond, dest: Reg, src0: Reg, src1: Reg, acc: Reg },
    Umull { pred: Cond, dest_lo: Reg, dest_hi: Reg, src0: Reg, src1: Reg },
    Div { signed: bool, pred: Cond, dest: Reg, src0: Reg, src1: Reg },
    Clz { pred: Cond, dest: Reg, src: Reg },
    Rev { pred: Cond, dest: Reg, src: Reg },
    Cmp { pred: Cond, src0: Reg, src1: FlexOp2 },
    Tst { pred: Cond, src0: Reg, src1: FlexOp2 },
    MovReg { pred: Cond, dest: Reg, src: FlexOp2 },
    MovW { pred: Cond, dest: Reg, src: WideImm<'a> },
    MovT { pred: Cond, dest: Reg, src: WideImm<'a> },
    /// Core-to-VFP and VFP-to-core single moves.
    VMovRS { pred: Cond, dest: Reg, src: VfpReg },
    VMovSR { pred: Cond, dest: VfpReg, src: Reg },
    /// Multi-destination move: a 64-bit VFP register into a core pair.
    VMovRRD { pred: Cond, dest_lo: Reg, dest_hi: Reg, src: VfpReg },
    /// Multi-source move: a core pair into a 64-bit VFP register.
    VMovDRR { pred: Cond, dest: VfpReg, src_lo: Reg, src_hi: Reg },
    VMovVV { pred: Cond, dest: VfpReg, src: VfpReg },
    VArith { op: VfpOp, pred: Cond, dest: VfpReg, src0: VfpReg, src1: VfpReg },
    VUnary { op: VfpUnaryOp, pred: Cond, dest: VfpReg, src: VfpReg },
    Vcmp { pred: Cond, src0: VfpReg, src1: VfpReg },
    /// Transfer VFP status flags to the core flags.
    Vmrs { pred: Cond },
    Vcvt { kind: VcvtKind, pred: Cond, dest: VfpReg, src: VfpReg },
    /// sxtb/sxth/uxtb/uxth.
    Extend { pred: Cond, signed: bool, byte: bool, dest: Reg, src: Reg },
    Ldr { pred: Cond, sign_extend: bool, dest: Reg, mem: MemOperand },
    Str { pred: Cond, src: Reg, mem: MemOperand },
    Vldr { pred: Cond, dest: VfpReg, mem: MemOperand },
    Vstr { pred: Cond, src: VfpReg, mem: MemOperand },
    Push { regs: Vec<Reg> },
    Pop { regs: Vec<Reg> },
    /// Branch. Unconditional: predicate `AL` with only `target_false`.
    /// Conditional: `target_true` taken on the predicate, `target_false` as
    /// the explicit fallthrough; `None` after optimization means the false
    /// edge falls through in layout order.
    Br { pred: Cond, target_true: Option<BlockId>, target_false: Option<BlockId> },
    Call { target: CallTarget<'a> },
    Ret,
    Trap,
    /// Pre-rendered assembly the binary assembler cannot encode.
    TextInst { text: &'a str },
}

/// What a branch optimization did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOpt {
    Unchanged,
    Changed,
    /// The branch is a fallthrough and must be removed.
    Delete,
}

impl<'a> Arm32Inst<'a> {
    /// Branch optimization against the next block in layout order:
    /// unconditional branches to it are deleted, a conditional whose false
    /// target is next drops the explicit fallthrough, and a conditional
    /// whose true target is next swaps targets under the opposite predicate.
    /// Running it a second time never changes anything further.
    pub fn optimize_branch(&mut self, next: BlockId) -> BranchOpt {
        let Arm32Inst::Br { pred, target_true, target_false } = self else {
            return BranchOpt::Unchanged;
        };
        let Some(false_target) = *target_false else {
            return BranchOpt::Unchanged;
        };
        if target_true.is_none() {
            if false_target == next {
                return BranchOpt::Delete;
            }
            return BranchOpt::Unchanged;
        }
        if false_target == next {
            *target_false = None;
            return BranchOpt::Changed;
        }
        if *target_true == Some(next) {
            debug_assert!(*pred != Cond::Al);
            *pred = pred.opposite();
            *target_true = Some(false_target);
            *target_false = None;
            return BranchOpt::Changed;
        }
        BranchOpt::Unchanged
    }

    /// Render as textual assembly, one (occasionally two) tab-indented lines
    /// without a trailing newline. `label` names branch targets.
    pub fn emit_text(&self, out: &mut String, label: &dyn Fn(BlockId) -> String) {
        match self {
            Arm32Inst::DataOp { op, pred, set_flags, dest, src0, src1 } => {
                let s = if *set_flags { "s" } else { "" };
                let _ = write!(out, "\t{}{s}{pred}\t{dest}, {src0}, {src1}", op.name());
            }
            Arm32Inst::Shift { kind, pred, dest, src, amount } => {
                let _ = write!(out, "\t{}{pred}\t{dest}, {src}, ", kind.name());
                match amount {
                    ShiftAmount::Imm(n) => {
                        let _ = write!(out, "#{n}");
                    }
                    ShiftAmount::Reg(r) => {
                        let _ = write!(out, "{r}");
                    }
                }
            }
            Arm32Inst::Mul { pred, dest, src0, src1 } => {
                let _ = write!(out, "\tmul{pred}\t{dest}, {src0}, {src1}");
            }
            Arm32Inst::Mls { pred, dest, src0, src1, acc } => {
                let _ = write!(out, "\tmls{pred}\t{dest}, {src0}, {src1}, {acc}");
            }
            Arm32Inst::Umull { pred, dest_lo, dest_hi, src0, src1 } => {
                let _ = write!(out, "\tumull{pred}\t{dest_lo}, {dest_hi}, {src0}, {src1}");
            }
            Arm32Inst::Div { signed, pred, dest, src0, src1 } => {
                let name = if *signed { "sdiv" } else { "udiv" };
                let _ = write!(out, "\t{name}{pred}\t{dest}, {src0}, {src1}");
            }
            Arm32Inst::Clz { pred, dest, src } => {
                let _ = write!(out, "\tclz{pred}\t{dest}, {src}");
            }
            Arm32Inst::Rev { pred, dest, src } => {
                let _ = write!(out, "\trev{pred}\t{dest}, {src}");
            }
            Arm32Inst::Cmp { pred, src0, src1 } => {
                let _ = write!(out, "\tcmp{pred}\t{src0}, {src1}");
            }
            Arm32Inst::Tst { pred, src0, src1 } => {
                let _ = write!(out, "\ttst{pred}\t{src0}, {src1}");
            }
            Arm32Inst::MovReg { pred, dest, src } => {
                let _ = write!(out, "\tmov{pred}\t{dest}, {src}");
            }
            Arm32Inst::MovW { pred, dest, src } => match src {
                WideImm::Imm(v) => {
                    let _ = write!(out, "\tmovw{pred}\t{dest}, #{v}");
                }
                WideImm::Symbol { name, addend: 0 } => {
                    let _ = write!(out, "\tmovw{pred}\t{dest}, #:lower16:{name}");
                }
                WideImm::Symbol { name, addend } => {
                    let _ = write!(out, "\tmovw{pred}\t{dest}, #:lower16:({name} + {addend})");
                }
            },
            Arm32Inst::MovT { pred, dest, src } => match src {
                WideImm::Imm(v) => {
                    let _ = write!(out, "\tmovt{pred}\t{dest}, #{v}");
                }
                WideImm::Symbol { name, addend: 0 } => {
                    let _ = write!(out, "\tmovt{pred}\t{dest}, #:upper16:{name}");
                }
                WideImm::Symbol { name, addend } => {
                    let _ = write!(out, "\tmovt{pred}\t{dest}, #:upper16:({name} + {addend})");
                }
            },
            Arm32Inst::VMovRS { pred, dest, src } => {
                let _ = write!(out, "\tvmov{pred}\t{dest}, {src}");
            }
            Arm32Inst::VMovSR { pred, dest, src } => {
                let _ = write!(out, "\tvmov{pred}\t{dest}, {src}");
            }
            Arm32Inst::VMovRRD { pred, dest_lo, dest_hi, src } => {
                let _ = write!(out, "\tvmov{pred}\t{dest_lo}, {dest_hi}, {src}");
            }
            Arm32Inst::VMovDRR { pred, dest, src_lo, src_hi } => {
                let _ = write!(out, "\tvmov{pred}\t{dest}, {src_lo}, {src_hi}");
            }
            Arm32Inst::VMovVV { pred, dest, src } => {
                let suffix = if dest.is_double() { ".f64" } else { ".f32" };
                let _ = write!(out, "\tvmov{pred}{suffix}\t{dest}, {src}");
            }
            Arm32Inst::VArith { op, pred, dest, src0, src1 } => {
                let suffix = if dest.is_double() { ".f64" } else { ".f32" };
                let _ = write!(out, "\t{}{pred}{suffix}\t{dest}, {src0}, {src1}", op.name());
            }
            Arm32Inst::VUnary { op, pred, dest, src } => {
                let suffix = if dest.is_double() { ".f64" } else { ".f32" };
                let _ = write!(out, "\t{}{pred}{suffix}\t{dest}, {src}", op.name());
            }
            Arm32Inst::Vcmp { pred, src0, src1 } => {
                let suffix = if src0.is_double() { ".f64" } else { ".f32" };
                let _ = write!(out, "\tvcmp{pred}{suffix}\t{src0}, {src1}");
            }
            Arm32Inst::Vmrs { pred } => {
                let _ = write!(out, "\tvmrs{pred}\tAPSR_nzcv, FPSCR");
            }
            Arm32Inst::Vcvt { kind, pred, dest, src } => {
                let _ = write!(out, "\tvcvt{pred}{}\t{dest}, {src}", kind.suffix());
            }
            Arm32Inst::Extend { pred, signed, byte, dest, src } => {
                let name = match (signed, byte) {
                    (true, true) => "sxtb",
                    (true, false) => "sxth",
                    (false, true) => "uxtb",
                    (false, false) => "uxth",
                };
                let _ = write!(out, "\t{name}{pred}\t{dest}, {src}");
            }
            Arm32Inst::Ldr { pred, sign_extend, dest, mem } => {
                let attrs = type_attrs(mem.ty);
                let sign = if *sign_extend { "s" } else { "" };
                let width = attrs.width_suffix;
                let _ = write!(out, "\tldr{sign}{width}{pred}\t{dest}, {mem}");
            }
            Arm32Inst::Str { pred, src, mem } => {
                let width = type_attrs(mem.ty).width_suffix;
                let _ = write!(out, "\tstr{width}{pred}\t{src}, {mem}");
            }
            Arm32Inst::Vldr { pred, dest, mem } => {
                let _ = write!(out, "\tvldr{pred}\t{dest}, {mem}");
            }
            Arm32Inst::Vstr { pred, src, mem } => {
                let _ = write!(out, "\tvstr{pred}\t{src}, {mem}");
            }
            Arm32Inst::Push { regs } => {
                out.push_str("\tpush\t{");
                for (i, reg) in regs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{reg}");
                }
                out.push('}');
            }
            Arm32Inst::Pop { regs } => {
                out.push_str("\tpop\t{");
                for (i, reg) in regs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{reg}");
                }
                out.push('}');
            }
            Arm32Inst::Br { pred, target_true, target_false } => match (target_true, target_false)
            {
                (None, Some(target)) => {
                    let _ = write!(out, "\tb{pred}\t{}", label(*target));
                }
                (Some(target), None) => {
                    let _ = write!(out, "\tb{pred}\t{}", label(*target));
                }
                (Some(then_target), Some(else_target)) => {
                    let _ = write!(out, "\tb{pred}\t{}", label(*then_target));
                    let _ = write!(out, "\n\tb\t{}", label(*else_target));
                }
                (None, None) => {}
            },
            Arm32Inst::Call { target } => match target {
                CallTarget::Direct(name) => {
                    let _ = write!(out, "\tbl\t{name}");
                }
                CallTarget::Indirect(reg) => {
                    let _ = write!(out, "\tblx\t{reg}");
                }
            },
            Arm32Inst::Ret => out.push_str("\tbx\tlr"),
            Arm32Inst::Trap => out.push_str("\tudf\t#0"),
            Arm32Inst::TextInst { text } => {
                let _ = write!(out, "\t{text}");
            }
        }
    }
}

/// A lowered function: one instruction list per basic block, in the CFG's
/// block order, which is also the layout order.
#[derive(Debug)]
pub struct LoweredFunction<'a> {
    pub name: String,
    pub internal: bool,
    pub blocks: Vec<Vec<Arm32Inst<'a>>>,
    /// Set when any instruction could not be encoded directly.
    pub needs_text_fixup: bool,
}

impl<'a> LoweredFunction<'a> {
    /// Delete fallthrough branches and invert conditionals whose taken edge
    /// is the layout successor.
    pub fn optimize_branches(&mut self) {
        for index in 0..self.blocks.len() {
            let next = (index + 1) as BlockId;
            if next as usize >= self.blocks.len() {
                break;
            }
            let block = &mut self.blocks[index];
            let Some(last) = block.last_mut() else { continue };
            if last.optimize_branch(next) == BranchOpt::Delete {
                block.pop();
            }
        }
    }

    pub fn block_label(&self, block: BlockId) -> String {
        format!(".L{}$bb{block}", self.name)
    }

    /// Render the function as textual assembly.
    pub fn emit_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\t.text");
        if !self.internal {
            let _ = writeln!(out, "\t.globl\t{}", self.name);
        }
        let _ = writeln!(out, "\t.type\t{}, %function", self.name);
        let _ = writeln!(out, "{}:", self.name);
        for (index, block) in self.blocks.iter().enumerate() {
            if index > 0 {
                let _ = writeln!(out, "{}:", self.block_label(index as BlockId));
            }
            for inst in block {
                inst.emit_text(&mut out, &|target| self.block_label(target));
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    fn cond_br(pred: Cond, then_target: u32, else_target: u32) -> Arm32Inst<'static> {
        Arm32Inst::Br { pred, target_true: Some(then_target), target_false: Some(else_target) }
    }

    #[test]
    fn test_unconditional_fallthrough_deleted() {
        let mut br =
            Arm32Inst::Br { pred: Cond::Al, target_true: None, target_false: Some(1) };
        assert_eq!(br.optimize_branch(1), BranchOpt::Delete);
    }

    #[test]
    fn test_conditional_false_target_becomes_fallthrough() {
        let mut br = cond_br(Cond::Eq, 3, 1);
        assert_eq!(br.optimize_branch(1), BranchOpt::Changed);
        assert_eq!(
            br,
            Arm32Inst::Br { pred: Cond::Eq, target_true: Some(3), target_false: None }
        );
        // Idempotent.
        assert_eq!(br.optimize_branch(1), BranchOpt::Unchanged);
    }

    #[test]
    fn test_conditional_true_target_inverts() {
        let mut br = cond_br(Cond::Eq, 1, 3);
        assert_eq!(br.optimize_branch(1), BranchOpt::Changed);
        assert_eq!(
            br,
            Arm32Inst::Br { pred: Cond::Ne, target_true: Some(3), target_false: None }
        );
        assert_eq!(br.optimize_branch(1), BranchOpt::Unchanged);
    }

    #[test]
    fn test_unrelated_branch_unchanged() {
        let mut br = cond_br(Cond::Gt, 4, 5);
        assert_eq!(br.optimize_branch(2), BranchOpt::Unchanged);
        assert_eq!(br, cond_br(Cond::Gt, 4, 5));
    }

    #[test]
    fn test_text_emission() {
        let mut out = String::new();
        Arm32Inst::DataOp {
            op: DataOp::Add,
            pred: Cond::Al,
            set_flags: false,
            dest: Reg::R0,
            src0: Reg::R1,
            src1: FlexOp2::reg(Reg::R2),
        }
        .emit_text(&mut out, &|b| format!("L{b}"));
        assert_eq!(out, "\tadd\tr0, r1, r2");

        let mut out = String::new();
        Arm32Inst::Ldr {
            pred: Cond::Al,
            sign_extend: true,
            dest: Reg::R0,
            mem: MemOperand::base_offset(Type::I16, Reg::FP, -12),
        }
        .emit_text(&mut out, &|b| format!("L{b}"));
        assert_eq!(out, "\tldrsh\tr0, [fp, #-12]");

        let mut out = String::new();
        Arm32Inst::Br { pred: Cond::Eq, target_true: Some(2), target_false: Some(3) }
            .emit_text(&mut out, &|b| format!("L{b}"));
        assert_eq!(out, "\tbeq\tL2\n\tb\tL3");
    }
}
