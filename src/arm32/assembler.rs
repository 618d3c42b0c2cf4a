// Binary encoder for the ARM32 instruction variants. Covers the data
// processing group, multiplies and divides, loads and stores with immediate
// offsets, VFP arithmetic and moves, branches (with intra-function label
// fixups) and calls (emitted as relocations). Anything outside the encodable
// subset sets the needs-text-fixup flag; the textual emitter is the final
// authority for such functions.

//! Subset ARM32 binary assembler.

use crate::ir::{BlockId, Type};

use super::inst::{Arm32Inst, CallTarget, VcvtKind, WideImm};
use super::operands::{AddrMode, FlexOp2, MemOffset, MemOperand, ShiftAmount};
use super::{Cond, Reg, VfpReg};

/// Relocation kinds the object writer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 24-bit branch-and-link displacement.
    Call,
    /// `movw` lower half of an absolute address.
    MovwAbs,
    /// `movt` upper half of an absolute address.
    MovtAbs,
}

/// One relocation against an extern or data symbol.
#[derive(Debug, Clone)]
pub struct Reloc {
    pub offset: u64,
    pub kind: RelocKind,
    pub symbol: String,
    pub addend: i64,
}

/// Encoded output of one function.
#[derive(Debug)]
pub struct EncodedFunction {
    pub bytes: Vec<u8>,
    pub relocs: Vec<Reloc>,
    pub needs_text_fixup: bool,
}

struct BranchFixup {
    offset: u32,
    target: BlockId,
}

/// Per-function encoder. Bind each block before encoding its instructions,
/// then `finish` patches branch displacements.
pub struct Arm32Assembler {
    buffer: Vec<u8>,
    block_offsets: Vec<Option<u32>>,
    branch_fixups: Vec<BranchFixup>,
    relocs: Vec<Reloc>,
    needs_text_fixup: bool,
}

impl Arm32Assembler {
    pub fn new(num_blocks: usize) -> Self {
        Self {
            buffer: Vec::new(),
            block_offsets: vec![None; num_blocks],
            branch_fixups: Vec::new(),
            relocs: Vec::new(),
            needs_text_fixup: false,
        }
    }

    pub fn bind_block(&mut self, block: BlockId) {
        self.block_offsets[block as usize] = Some(self.buffer.len() as u32);
    }

    pub fn set_needs_text_fixup(&mut self) {
        self.needs_text_fixup = true;
    }

    pub fn needs_text_fixup(&self) -> bool {
        self.needs_text_fixup
    }

    fn emit32(&mut self, word: u32) {
        self.buffer.extend_from_slice(&word.to_le_bytes());
    }

    fn emit_branch_to(&mut self, cond: Cond, target: BlockId) {
        self.branch_fixups.push(BranchFixup { offset: self.buffer.len() as u32, target });
        self.emit32((cond.encoding() << 28) | 0x0A00_0000);
    }

    fn flex_op2(op2: &FlexOp2) -> (u32, bool) {
        match *op2 {
            FlexOp2::Imm(imm) => (imm.encoding(), true),
            FlexOp2::Reg { reg, shift, amount: ShiftAmount::Imm(n) } => {
                (reg.encoding() | (shift.encoding() << 5) | ((n as u32) << 7), false)
            }
            FlexOp2::Reg { reg, shift, amount: ShiftAmount::Reg(rs) } => (
                reg.encoding() | 0x10 | (shift.encoding() << 5) | (rs.encoding() << 8),
                false,
            ),
        }
    }

    fn data_proc(&mut self, cond: Cond, opcode: u32, set_flags: bool, rn: Reg, rd: Reg, op2: &FlexOp2) {
        let (operand2, is_imm) = Self::flex_op2(op2);
        let i = if is_imm { 1 } else { 0 };
        let s = if set_flags { 1 } else { 0 };
        self.emit32(
            (cond.encoding() << 28)
                | (i << 25)
                | (opcode << 21)
                | (s << 20)
                | (rn.encoding() << 16)
                | (rd.encoding() << 12)
                | operand2,
        );
    }

    /// Split a VFP register into its four-bit field and its extension bit.
    fn split_vfp(reg: VfpReg) -> (u32, u32) {
        match reg {
            VfpReg::S(n) => ((n as u32) >> 1, (n as u32) & 1),
            VfpReg::D(n) => ((n as u32) & 0xF, ((n as u32) >> 4) & 1),
        }
    }

    fn vfp_data(&mut self, cond: Cond, bit23: u32, bits21_20: u32, opc2: u32, bits7_6: u32, dest: VfpReg, src0: Option<VfpReg>, src1: VfpReg) {
        let sz = if src1.is_double() || dest.is_double() { 1 } else { 0 };
        let (vd, d) = Self::split_vfp(dest);
        let (vn, n) = src0.map(Self::split_vfp).unwrap_or((opc2, 0));
        let (vm, m) = Self::split_vfp(src1);
        self.emit32(
            (cond.encoding() << 28)
                | (0b1110 << 24)
                | (bit23 << 23)
                | (d << 22)
                | (bits21_20 << 20)
                | (vn << 16)
                | (vd << 12)
                | (0b101 << 9)
                | (sz << 8)
                | (n << 7)
                | (bits7_6 << 6)
                | (m << 5)
                | vm,
        );
    }

    /// Encode a load or store with an immediate offset. Returns false when
    /// the combination is outside the encodable subset.
    fn load_store(&mut self, cond: Cond, is_load: bool, sign_extend: bool, reg: Reg, mem: &MemOperand) -> bool {
        if mem.mode != AddrMode::Offset {
            return false;
        }
        let MemOffset::Imm(offset) = mem.offset else { return false };
        if !MemOperand::can_hold_offset(mem.ty, sign_extend, offset) {
            return false;
        }
        let magnitude = offset.unsigned_abs();
        let u = if offset >= 0 { 1u32 } else { 0 };
        let cond = cond.encoding() << 28;
        let rn = mem.base.encoding() << 16;
        let rt = reg.encoding() << 12;
        match (mem.ty, sign_extend) {
            // ldr/str and ldrb/strb take a 12-bit unsigned magnitude.
            (Type::I32, _) | (Type::I8 | Type::I1, false) => {
                let b = if mem.ty == Type::I32 { 0u32 } else { 1 << 22 };
                let l = if is_load { 1u32 << 20 } else { 0 };
                self.emit32(cond | (0b01 << 26) | (1 << 24) | (u << 23) | b | l | rn | rt | magnitude);
                true
            }
            // Halfword and sign-extending forms split an 8-bit magnitude.
            (Type::I16, _) | (Type::I8, true) => {
                if !is_load && sign_extend {
                    return false;
                }
                let l = if is_load { 1u32 << 20 } else { 0 };
                let s = if sign_extend { 1u32 << 6 } else { 0 };
                let h = if mem.ty == Type::I16 { 1u32 << 5 } else { 0 };
                if !is_load && h == 0 {
                    return false;
                }
                let imm_hi = (magnitude >> 4) & 0xF;
                let imm_lo = magnitude & 0xF;
                self.emit32(
                    cond | (1 << 24) | (u << 23) | (1 << 22) | l | rn | rt | (imm_hi << 8)
                        | (1 << 7) | s | h | (1 << 4) | imm_lo,
                );
                true
            }
            _ => false,
        }
    }

    fn vfp_load_store(&mut self, cond: Cond, is_load: bool, reg: VfpReg, mem: &MemOperand) -> bool {
        if mem.mode != AddrMode::Offset {
            return false;
        }
        let MemOffset::Imm(offset) = mem.offset else { return false };
        if offset % 4 != 0 || offset.unsigned_abs() / 4 > 0xFF {
            return false;
        }
        let u = if offset >= 0 { 1u32 } else { 0 };
        let (vd, d) = Self::split_vfp(reg);
        let sz = if reg.is_double() { 1u32 } else { 0 };
        let l = if is_load { 1u32 } else { 0 };
        self.emit32(
            (cond.encoding() << 28)
                | (0b1101 << 24)
                | (u << 23)
                | (d << 22)
                | (l << 20)
                | (mem.base.encoding() << 16)
                | (vd << 12)
                | (0b101 << 9)
                | (sz << 8)
                | (offset.unsigned_abs() / 4),
        );
        true
    }

    fn reg_list(regs: &[Reg]) -> u32 {
        regs.iter().fold(0u32, |list, reg| list | (1 << reg.encoding()))
    }

    /// Encode one instruction. Unsupported shapes set the text-fixup flag
    /// and emit nothing.
    pub fn encode_inst(&mut self, inst: &Arm32Inst<'_>) {
        match inst {
            Arm32Inst::DataOp { op, pred, set_flags, dest, src0, src1 } => {
                self.data_proc(*pred, op.encoding(), *set_flags, *src0, *dest, src1);
            }
            Arm32Inst::Shift { kind, pred, dest, src, amount } => {
                let op2 = FlexOp2::Reg { reg: *src, shift: *kind, amount: *amount };
                self.data_proc(*pred, 0b1101, false, Reg(0), *dest, &op2);
            }
            Arm32Inst::Mul { pred, dest, src0, src1 } => {
                self.emit32(
                    (pred.encoding() << 28)
                        | (dest.encoding() << 16)
                        | (src1.encoding() << 8)
                        | (0b1001 << 4)
                        | src0.encoding(),
                );
            }
            Arm32Inst::Mls { pred, dest, src0, src1, acc } => {
                self.emit32(
                    (pred.encoding() << 28)
                        | 0x0060_0090
                        | (dest.encoding() << 16)
                        | (acc.encoding() << 12)
                        | (src1.encoding() << 8)
                        | src0.encoding(),
                );
            }
            Arm32Inst::Umull { pred, dest_lo, dest_hi, src0, src1 } => {
                self.emit32(
                    (pred.encoding() << 28)
                        | 0x0080_0090
                        | (dest_hi.encoding() << 16)
                        | (dest_lo.encoding() << 12)
                        | (src1.encoding() << 8)
                        | src0.encoding(),
                );
            }
            Arm32Inst::Div { signed, pred, dest, src0, src1 } => {
                let base = if *signed { 0x0710_F010 } else { 0x0730_F010 };
                self.emit32(
                    (pred.encoding() << 28)
                        | base
                        | (dest.encoding() << 16)
                        | (src1.encoding() << 8)
                        | src0.encoding(),
                );
            }
            Arm32Inst::Clz { pred, dest, src } => {
                self.emit32(
                    (pred.encoding() << 28) | 0x016F_0F10 | (dest.encoding() << 12) | src.encoding(),
                );
            }
            Arm32Inst::Rev { pred, dest, src } => {
                self.emit32(
                    (pred.encoding() << 28) | 0x06BF_0F30 | (dest.encoding() << 12) | src.encoding(),
                );
            }
            Arm32Inst::Cmp { pred, src0, src1 } => {
                self.data_proc(*pred, 0b1010, true, *src0, Reg(0), src1);
            }
            Arm32Inst::Tst { pred, src0, src1 } => {
                self.data_proc(*pred, 0b1000, true, *src0, Reg(0), src1);
            }
            Arm32Inst::MovReg { pred, dest, src } => {
                self.data_proc(*pred, 0b1101, false, Reg(0), *dest, src);
            }
            Arm32Inst::MovW { pred, dest, src } => {
                let imm16 = self.wide_imm(src, RelocKind::MovwAbs);
                let imm12 = imm16 & 0xFFF;
                let imm4 = (imm16 >> 12) & 0xF;
                self.emit32(
                    (pred.encoding() << 28)
                        | (0b0011_0000 << 20)
                        | (imm4 << 16)
                        | (dest.encoding() << 12)
                        | imm12,
                );
            }
            Arm32Inst::MovT { pred, dest, src } => {
                let imm16 = self.wide_imm(src, RelocKind::MovtAbs);
                let imm12 = imm16 & 0xFFF;
                let imm4 = (imm16 >> 12) & 0xF;
                self.emit32(
                    (pred.encoding() << 28)
                        | (0b0011_0100 << 20)
                        | (imm4 << 16)
                        | (dest.encoding() << 12)
                        | imm12,
                );
            }
            Arm32Inst::VMovRS { pred, dest, src } => {
                let (vn, n) = Self::split_vfp(*src);
                self.emit32(
                    (pred.encoding() << 28)
                        | (0b1110 << 24)
                        | (1 << 20)
                        | (vn << 16)
                        | (dest.encoding() << 12)
                        | (0b1010 << 8)
                        | (n << 7)
                        | (1 << 4),
                );
            }
            Arm32Inst::VMovSR { pred, dest, src } => {
                let (vn, n) = Self::split_vfp(*dest);
                self.emit32(
                    (pred.encoding() << 28)
                        | (0b1110 << 24)
                        | (vn << 16)
                        | (src.encoding() << 12)
                        | (0b1010 << 8)
                        | (n << 7)
                        | (1 << 4),
                );
            }
            Arm32Inst::VMovRRD { pred, dest_lo, dest_hi, src } => {
                let (vm, m) = Self::split_vfp(*src);
                self.emit32(
                    (pred.encoding() << 28)
                        | (0b1100 << 24)
                        | (0b010 << 21)
                        | (1 << 20)
                        | (dest_hi.encoding() << 16)
                        | (dest_lo.encoding() << 12)
                        | (0b1011 << 8)
                        | (m << 5)
                        | (1 << 4)
                        | vm,
                );
            }
            Arm32Inst::VMovDRR { pred, dest, src_lo, src_hi } => {
                let (vm, m) = Self::split_vfp(*dest);
                self.emit32(
                    (pred.encoding() << 28)
                        | (0b1100 << 24)
                        | (0b010 << 21)
                        | (src_hi.encoding() << 16)
                        | (src_lo.encoding() << 12)
                        | (0b1011 << 8)
                        | (m << 5)
                        | (1 << 4)
                        | vm,
                );
            }
            Arm32Inst::VMovVV { pred, dest, src } => {
                self.vfp_data(*pred, 1, 0b11, 0b0000, 0b01, *dest, None, *src);
            }
            Arm32Inst::VArith { op, pred, dest, src0, src1 } => {
                use super::inst::VfpOp;
                let (bit23, bits21_20, bit6) = match op {
                    VfpOp::Vadd => (0, 0b11, 0),
                    VfpOp::Vsub => (0, 0b11, 1),
                    VfpOp::Vmul => (0, 0b10, 0),
                    VfpOp::Vdiv => (1, 0b00, 0),
                };
                self.vfp_data(*pred, bit23, bits21_20, 0, bit6, *dest, Some(*src0), *src1);
            }
            Arm32Inst::VUnary { op, pred, dest, src } => {
                use super::inst::VfpUnaryOp;
                let (opc2, bits7_6) = match op {
                    VfpUnaryOp::Vabs => (0b0000, 0b11),
                    VfpUnaryOp::Vsqrt => (0b0001, 0b11),
                    VfpUnaryOp::Vneg => (0b0001, 0b01),
                };
                self.vfp_data(*pred, 1, 0b11, opc2, bits7_6, *dest, None, *src);
            }
            Arm32Inst::Vcmp { pred, src0, src1 } => {
                self.vfp_data(*pred, 1, 0b11, 0b0100, 0b01, *src0, None, *src1);
            }
            Arm32Inst::Vmrs { pred } => {
                self.emit32((pred.encoding() << 28) | 0x0EF1_FA10);
            }
            Arm32Inst::Vcvt { kind, pred, dest, src } => self.encode_vcvt(*kind, *pred, *dest, *src),
            Arm32Inst::Extend { pred, signed, byte, dest, src } => {
                let base: u32 = match (signed, byte) {
                    (true, true) => 0x06AF_0070,
                    (true, false) => 0x06BF_0070,
                    (false, true) => 0x06EF_0070,
                    (false, false) => 0x06FF_0070,
                };
                self.emit32(
                    (pred.encoding() << 28) | base | (dest.encoding() << 12) | src.encoding(),
                );
            }
            Arm32Inst::Ldr { pred, sign_extend, dest, mem } => {
                if !self.load_store(*pred, true, *sign_extend, *dest, mem) {
                    self.needs_text_fixup = true;
                }
            }
            Arm32Inst::Str { pred, src, mem } => {
                if !self.load_store(*pred, false, false, *src, mem) {
                    self.needs_text_fixup = true;
                }
            }
            Arm32Inst::Vldr { pred, dest, mem } => {
                if !self.vfp_load_store(*pred, true, *dest, mem) {
                    self.needs_text_fixup = true;
                }
            }
            Arm32Inst::Vstr { pred, src, mem } => {
                if !self.vfp_load_store(*pred, false, *src, mem) {
                    self.needs_text_fixup = true;
                }
            }
            Arm32Inst::Push { regs } => {
                self.emit32(
                    (Cond::Al.encoding() << 28)
                        | (0b100 << 25)
                        | (1 << 24)
                        | (1 << 21)
                        | (Reg::SP.encoding() << 16)
                        | Self::reg_list(regs),
                );
            }
            Arm32Inst::Pop { regs } => {
                self.emit32(
                    (Cond::Al.encoding() << 28)
                        | (0b100 << 25)
                        | (1 << 23)
                        | (1 << 21)
                        | (1 << 20)
                        | (Reg::SP.encoding() << 16)
                        | Self::reg_list(regs),
                );
            }
            Arm32Inst::Br { pred, target_true, target_false } => {
                match (target_true, target_false) {
                    (None, Some(target)) | (Some(target), None) => {
                        self.emit_branch_to(*pred, *target);
                    }
                    (Some(then_target), Some(else_target)) => {
                        self.emit_branch_to(*pred, *then_target);
                        self.emit_branch_to(Cond::Al, *else_target);
                    }
                    (None, None) => {}
                }
            }
            Arm32Inst::Call { target } => match target {
                CallTarget::Direct(name) => {
                    self.relocs.push(Reloc {
                        offset: self.buffer.len() as u64,
                        kind: RelocKind::Call,
                        symbol: (*name).to_string(),
                        addend: -8,
                    });
                    self.emit32((Cond::Al.encoding() << 28) | 0x0B00_0000 | 0x00FF_FFFE);
                }
                CallTarget::Indirect(reg) => {
                    self.emit32((Cond::Al.encoding() << 28) | 0x012F_FF30 | reg.encoding());
                }
            },
            Arm32Inst::Ret => {
                self.emit32((Cond::Al.encoding() << 28) | 0x012F_FF10 | Reg::LR.encoding());
            }
            Arm32Inst::Trap => self.emit32(0xE7F0_00F0),
            Arm32Inst::TextInst { .. } => self.needs_text_fixup = true,
        }
    }

    fn wide_imm(&mut self, imm: &WideImm<'_>, kind: RelocKind) -> u32 {
        match imm {
            WideImm::Imm(v) => *v as u32,
            WideImm::Symbol { name, addend } => {
                self.relocs.push(Reloc {
                    offset: self.buffer.len() as u64,
                    kind,
                    symbol: (*name).to_string(),
                    addend: *addend as i64,
                });
                0
            }
        }
    }

    fn encode_vcvt(&mut self, kind: VcvtKind, pred: Cond, dest: VfpReg, src: VfpReg) {
        let cond = pred.encoding() << 28;
        match kind {
            VcvtKind::F64FromF32 | VcvtKind::F32FromF64 => {
                let (vd, d) = Self::split_vfp(dest);
                let (vm, m) = Self::split_vfp(src);
                let sz = if src.is_double() { 1u32 } else { 0 };
                self.emit32(
                    cond | (0b11101 << 23) | (d << 22) | (0b11 << 20) | (0b0111 << 16)
                        | (vd << 12) | (0b101 << 9) | (sz << 8) | (0b11 << 6) | (m << 5) | vm,
                );
            }
            VcvtKind::F32FromS32 | VcvtKind::F32FromU32 | VcvtKind::F64FromS32
            | VcvtKind::F64FromU32 => {
                let signed = matches!(kind, VcvtKind::F32FromS32 | VcvtKind::F64FromS32);
                let (vd, d) = Self::split_vfp(dest);
                let (vm, m) = Self::split_vfp(src);
                let sz = if dest.is_double() { 1u32 } else { 0 };
                let op = if signed { 1u32 } else { 0 };
                self.emit32(
                    cond | (0b11101 << 23) | (d << 22) | (0b11 << 20) | (0b1000 << 16)
                        | (vd << 12) | (0b101 << 9) | (sz << 8) | (op << 7) | (1 << 6)
                        | (m << 5) | vm,
                );
            }
            VcvtKind::S32FromF32 | VcvtKind::U32FromF32 | VcvtKind::S32FromF64
            | VcvtKind::U32FromF64 => {
                let signed = matches!(kind, VcvtKind::S32FromF32 | VcvtKind::S32FromF64);
                let (vd, d) = Self::split_vfp(dest);
                let (vm, m) = Self::split_vfp(src);
                let sz = if src.is_double() { 1u32 } else { 0 };
                let opc2 = if signed { 0b101u32 } else { 0b100 };
                self.emit32(
                    cond | (0b11101 << 23) | (d << 22) | (0b11 << 20) | (1 << 19) | (opc2 << 16)
                        | (vd << 12) | (0b101 << 9) | (sz << 8) | (1 << 7) | (1 << 6)
                        | (m << 5) | vm,
                );
            }
        }
    }

    /// Patch branch fixups and return the encoded function.
    pub fn finish(mut self) -> EncodedFunction {
        for fixup in &self.branch_fixups {
            let Some(target_offset) = self.block_offsets[fixup.target as usize] else {
                self.needs_text_fixup = true;
                continue;
            };
            let displacement = (target_offset as i64 - (fixup.offset as i64 + 8)) / 4;
            let imm24 = (displacement as u32) & 0x00FF_FFFF;
            let site = fixup.offset as usize;
            let mut word = u32::from_le_bytes([
                self.buffer[site],
                self.buffer[site + 1],
                self.buffer[site + 2],
                self.buffer[site + 3],
            ]);
            word |= imm24;
            self.buffer[site..site + 4].copy_from_slice(&word.to_le_bytes());
        }
        EncodedFunction {
            bytes: self.buffer,
            relocs: self.relocs,
            needs_text_fixup: self.needs_text_fixup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::inst::DataOp;
    use super::*;
    use crate::arm32::operands::FlexImm;

    fn encode_one(inst: Arm32Inst<'_>) -> u32 {
        let mut asm = Arm32Assembler::new(1);
        asm.bind_block(0);
        asm.encode_inst(&inst);
        let out = asm.finish();
        assert!(!out.needs_text_fixup);
        assert_eq!(out.bytes.len(), 4);
        u32::from_le_bytes([out.bytes[0], out.bytes[1], out.bytes[2], out.bytes[3]])
    }

    #[test]
    fn test_encode_add_registers() {
        // add r0, r1, r2
        let word = encode_one(Arm32Inst::DataOp {
            op: DataOp::Add,
            pred: Cond::Al,
            set_flags: false,
            dest: Reg::R0,
            src0: Reg::R1,
            src1: FlexOp2::reg(Reg::R2),
        });
        assert_eq!(word, 0xE081_0002);
    }

    #[test]
    fn test_encode_add_immediate() {
        // add r0, r0, #1
        let word = encode_one(Arm32Inst::DataOp {
            op: DataOp::Add,
            pred: Cond::Al,
            set_flags: false,
            dest: Reg::R0,
            src0: Reg::R0,
            src1: FlexOp2::Imm(FlexImm::from_value(1).unwrap()),
        });
        assert_eq!(word, 0xE280_0001);
    }

    #[test]
    fn test_encode_ldr_str() {
        // ldr r0, [fp, #-8]
        let word = encode_one(Arm32Inst::Ldr {
            pred: Cond::Al,
            sign_extend: false,
            dest: Reg::R0,
            mem: MemOperand::base_offset(Type::I32, Reg::FP, -8),
        });
        assert_eq!(word, 0xE51B_0008);
        // str r1, [sp]
        let word = encode_one(Arm32Inst::Str {
            pred: Cond::Al,
            src: Reg::R1,
            mem: MemOperand::base_offset(Type::I32, Reg::SP, 0),
        });
        assert_eq!(word, 0xE58D_1000);
    }

    #[test]
    fn test_encode_push_pop() {
        let word = encode_one(Arm32Inst::Push { regs: vec![Reg::FP, Reg::LR] });
        assert_eq!(word, 0xE92D_4800);
        let word = encode_one(Arm32Inst::Pop { regs: vec![Reg::FP, Reg::LR] });
        assert_eq!(word, 0xE8BD_4800);
    }

    #[test]
    fn test_encode_bx_lr() {
        assert_eq!(encode_one(Arm32Inst::Ret), 0xE12F_FF1E);
    }

    #[test]
    fn test_branch_fixup_backward() {
        let mut asm = Arm32Assembler::new(2);
        asm.bind_block(0);
        asm.encode_inst(&Arm32Inst::MovReg {
            pred: Cond::Al,
            dest: Reg::R0,
            src: FlexOp2::imm(0).unwrap(),
        });
        asm.bind_block(1);
        asm.encode_inst(&Arm32Inst::Br {
            pred: Cond::Al,
            target_true: None,
            target_false: Some(0),
        });
        let out = asm.finish();
        let word = u32::from_le_bytes([out.bytes[4], out.bytes[5], out.bytes[6], out.bytes[7]]);
        // Branch from offset 4 back to offset 0: displacement (0 - 12) / 4.
        assert_eq!(word & 0x00FF_FFFF, 0x00FF_FFFD);
        assert_eq!(word >> 24, 0xEA);
    }

    #[test]
    fn test_unencodable_offset_sets_fixup() {
        let mut asm = Arm32Assembler::new(1);
        asm.bind_block(0);
        asm.encode_inst(&Arm32Inst::Ldr {
            pred: Cond::Al,
            sign_extend: false,
            dest: Reg::R0,
            mem: MemOperand::base_offset(Type::I32, Reg::FP, 40000),
        });
        assert!(asm.needs_text_fixup());
    }

    #[test]
    fn test_call_emits_relocation() {
        let mut asm = Arm32Assembler::new(1);
        asm.bind_block(0);
        asm.encode_inst(&Arm32Inst::Call { target: CallTarget::Direct("memcpy") });
        let out = asm.finish();
        assert_eq!(out.relocs.len(), 1);
        assert_eq!(out.relocs[0].kind, RelocKind::Call);
        assert_eq!(out.relocs[0].symbol, "memcpy");
        assert_eq!(out.relocs[0].offset, 0);
    }
}
