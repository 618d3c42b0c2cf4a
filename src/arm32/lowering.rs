// IR-to-ARM32 lowering. Every SSA value lives in a frame slot; instructions
// load operands into a small set of scratch registers, compute, and store the
// result back. Phi nodes get a staging slot written by each predecessor before
// its terminator and copied into the real slot at block entry, which breaks
// swap cycles without a parallel-move solver. NEON-only operations are emitted
// through the text-fixup path. One lowering session per worker owns the arena
// interning label and symbol strings for the function's lifetime.

//! Lowering of the high-level IR to ARM32 instructions.

use std::cell::RefCell;
use std::collections::HashMap;

use bumpalo::Bump;

use crate::context::GlobalContext;
use crate::error::TranslateResult;
use crate::intrinsics::IntrinsicRegistry;
use crate::ir::{
    ArithOp, BlockId, Callee, CastOp, Cfg, Constant, FcmpCond, IcmpCond, Inst, Operand, Type,
    VarId,
};

use super::inst::{Arm32Inst, CallTarget, DataOp, VcvtKind, VfpOp, VfpUnaryOp, WideImm};
use super::operands::{FlexImm, FlexOp2, MemOperand, ShiftAmount, ShiftKind};
use super::{Cond, Reg, VfpReg};

/// Per-worker lowering session: arena-backed string interning plus counters.
pub struct LowerSession<'a> {
    arena: &'a Bump,
    interned: RefCell<HashMap<String, &'a str>>,
    functions_lowered: RefCell<usize>,
}

impl<'a> LowerSession<'a> {
    pub fn new(arena: &'a Bump) -> Self {
        Self { arena, interned: RefCell::new(HashMap::new()), functions_lowered: RefCell::new(0) }
    }

    /// Intern a string in the session arena.
    pub fn intern(&self, s: &str) -> &'a str {
        let mut interned = self.interned.borrow_mut();
        if let Some(&existing) = interned.get(s) {
            return existing;
        }
        let stored = self.arena.alloc_str(s);
        interned.insert(s.to_string(), stored);
        stored
    }

    pub fn functions_lowered(&self) -> usize {
        *self.functions_lowered.borrow()
    }
}

/// Register class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Core,
    Pair,
    SingleFp,
    DoubleFp,
    Vector,
}

fn class_of(ty: Type) -> Class {
    match ty {
        Type::I64 => Class::Pair,
        Type::F32 => Class::SingleFp,
        Type::F64 => Class::DoubleFp,
        _ if ty.is_vector() => Class::Vector,
        _ => Class::Core,
    }
}

/// Frame bytes a value of this type occupies. Sub-word integers widen to a
/// word; boolean vectors are stored in NEON lane-mask form and take a full
/// quadword.
fn slot_size(ty: Type) -> i32 {
    match class_of(ty) {
        Class::Core | Class::SingleFp => 4,
        Class::Pair | Class::DoubleFp => 8,
        Class::Vector => 16,
    }
}

/// Where an AAPCS argument lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgLoc {
    Core(u8),
    CorePair(u8),
    S(u8),
    D(u8),
    Q(u8),
    Stack(i32),
}

/// Hard-float AAPCS argument assignment, shared by the prologue and call
/// lowering.
#[derive(Default)]
struct AapcsAssigner {
    next_core: u8,
    /// VFP allocation in single-precision units, without back-filling.
    next_vfp: u8,
    stack_bytes: i32,
}

impl AapcsAssigner {
    fn assign(&mut self, ty: Type) -> ArgLoc {
        match class_of(ty) {
            Class::Core => {
                if self.next_core < 4 {
                    let reg = self.next_core;
                    self.next_core += 1;
                    return ArgLoc::Core(reg);
                }
                self.stack(4, 4)
            }
            Class::Pair => {
                self.next_core += self.next_core % 2;
                if self.next_core <= 2 {
                    let reg = self.next_core;
                    self.next_core += 2;
                    return ArgLoc::CorePair(reg);
                }
                self.next_core = 4;
                self.stack(8, 8)
            }
            Class::SingleFp => {
                if self.next_vfp < 16 {
                    let reg = self.next_vfp;
                    self.next_vfp += 1;
                    return ArgLoc::S(reg);
                }
                self.stack(4, 4)
            }
            Class::DoubleFp => {
                self.next_vfp += self.next_vfp % 2;
                if self.next_vfp < 16 {
                    let reg = self.next_vfp / 2;
                    self.next_vfp += 2;
                    return ArgLoc::D(reg);
                }
                self.stack(8, 8)
            }
            Class::Vector => {
                self.next_vfp += (4 - self.next_vfp % 4) % 4;
                if self.next_vfp < 16 {
                    let reg = self.next_vfp / 4;
                    self.next_vfp += 4;
                    return ArgLoc::Q(reg);
                }
                self.stack(16, 8)
            }
        }
    }

    fn stack(&mut self, size: i32, align: i32) -> ArgLoc {
        self.stack_bytes = (self.stack_bytes + align - 1) & -align;
        let offset = self.stack_bytes;
        self.stack_bytes += size;
        ArgLoc::Stack(offset)
    }
}

/// Lower one function. Symbol references resolve through the context's
/// interned constant symbols; the returned instruction lists reference
/// strings owned by the session arena.
pub fn lower_function<'a>(
    session: &LowerSession<'a>,
    ctx: &GlobalContext,
    intrinsics: &IntrinsicRegistry,
    cfg: &Cfg,
) -> TranslateResult<super::inst::LoweredFunction<'a>> {
    let mut lowering = Lowering::new(session, ctx, intrinsics, cfg);
    lowering.assign_slots();
    let mut blocks = Vec::with_capacity(cfg.blocks.len());
    for (index, block) in cfg.blocks.iter().enumerate() {
        lowering.out.clear();
        if index == 0 {
            lowering.emit_prologue();
        }
        lowering.copy_phi_staging(index as BlockId);
        for inst in &block.insts {
            if inst.is_terminator() {
                lowering.emit_pending_phi_moves(index as BlockId);
            }
            lowering.lower_inst(inst);
        }
        blocks.push(std::mem::take(&mut lowering.out));
    }
    *session.functions_lowered.borrow_mut() += 1;
    // The definition takes the same mangling as references to it.
    let mut lowered = super::inst::LoweredFunction {
        name: ctx.mangle_name(&cfg.name, !cfg.internal),
        internal: cfg.internal,
        blocks,
        needs_text_fixup: lowering.needs_text_fixup,
    };
    lowered.optimize_branches();
    Ok(lowered)
}

struct Lowering<'a, 'c> {
    session: &'c LowerSession<'a>,
    ctx: &'c GlobalContext,
    intrinsics: &'c IntrinsicRegistry,
    cfg: &'c Cfg,
    out: Vec<Arm32Inst<'a>>,
    /// Frame offset (negative, fp-relative) of each variable's slot.
    slots: Vec<i32>,
    /// Staging slots for phi destinations.
    staging: HashMap<VarId, i32>,
    /// Phi moves each predecessor must perform before its terminator.
    phi_moves: HashMap<BlockId, Vec<(VarId, Operand)>>,
    frame_size: i32,
    needs_text_fixup: bool,
}

impl<'a, 'c> Lowering<'a, 'c> {
    fn new(
        session: &'c LowerSession<'a>,
        ctx: &'c GlobalContext,
        intrinsics: &'c IntrinsicRegistry,
        cfg: &'c Cfg,
    ) -> Self {
        Self {
            session,
            ctx,
            intrinsics,
            cfg,
            out: Vec::new(),
            slots: Vec::new(),
            staging: HashMap::new(),
            phi_moves: HashMap::new(),
            frame_size: 0,
            needs_text_fixup: false,
        }
    }

    fn assign_slots(&mut self) {
        let mut offset = 0i32;
        let mut place = |ty: Type| {
            let size = slot_size(ty);
            offset = (offset + size - 1) & -size;
            offset += size;
            -offset
        };
        for var in 0..self.cfg.num_variables() {
            self.slots.push(place(self.cfg.var_type(var as VarId)));
        }
        for block in &self.cfg.blocks {
            for inst in &block.insts {
                if let Inst::Phi { dest, args } = inst {
                    self.staging.insert(*dest, place(self.cfg.var_type(*dest)));
                    for (op, pred) in args {
                        self.phi_moves.entry(*pred).or_default().push((*dest, *op));
                    }
                }
            }
        }
        self.frame_size = (offset + 7) & -8;
    }

    // ---- emission helpers ----------------------------------------------

    fn push(&mut self, inst: Arm32Inst<'a>) {
        self.out.push(inst);
    }

    fn text(&mut self, text: String) {
        self.needs_text_fixup = true;
        let text = self.session.intern(&text);
        self.push(Arm32Inst::TextInst { text });
    }

    /// A lowering case with no instruction selection; diagnosed so object
    /// emission fails rather than producing wrong code.
    fn unimplemented(&mut self, what: &str) {
        self.ctx.report(crate::context::Diagnostic {
            bit_offset: 0,
            block: "lowering",
            message: format!("No ARM32 lowering for {what} in {}", self.cfg.name),
        });
        self.text(format!("@ unimplemented: {what}"));
    }

    fn mov_imm32(&mut self, dest: Reg, value: u32) {
        if let Some(imm) = FlexImm::from_value(value) {
            self.push(Arm32Inst::MovReg { pred: Cond::Al, dest, src: FlexOp2::Imm(imm) });
            return;
        }
        self.push(Arm32Inst::MovW {
            pred: Cond::Al,
            dest,
            src: WideImm::Imm((value & 0xFFFF) as u16),
        });
        if value >> 16 != 0 {
            self.push(Arm32Inst::MovT {
                pred: Cond::Al,
                dest,
                src: WideImm::Imm((value >> 16) as u16),
            });
        }
    }

    /// The emitted name and relocation addend for a global declaration, from
    /// the symbol interned when the parser first saw the reference.
    fn symbol_ref(&self, global: u32) -> (&'a str, i32) {
        match self.ctx.find_symbol(global) {
            Some(sym) => {
                let name = self.ctx.mangle_name(&sym.name, sym.suppress_mangling);
                (self.session.intern(&name), sym.offset as i32)
            }
            None => (self.session.intern(""), 0),
        }
    }

    /// Materialize the address of a global declaration.
    fn mov_symbol(&mut self, dest: Reg, global: u32) {
        let (name, addend) = self.symbol_ref(global);
        self.push(Arm32Inst::MovW { pred: Cond::Al, dest, src: WideImm::Symbol { name, addend } });
        self.push(Arm32Inst::MovT { pred: Cond::Al, dest, src: WideImm::Symbol { name, addend } });
    }

    /// Memory operand for a frame offset, falling back to an address
    /// computation in `ip` when the offset exceeds the type's budget.
    fn frame_mem(&mut self, ty: Type, offset: i32) -> MemOperand {
        if MemOperand::can_hold_offset(ty, false, offset) {
            return MemOperand::base_offset(ty, Reg::FP, offset);
        }
        self.mov_imm32(Reg::IP, offset as u32);
        self.push(Arm32Inst::DataOp {
            op: DataOp::Add,
            pred: Cond::Al,
            set_flags: false,
            dest: Reg::IP,
            src0: Reg::FP,
            src1: FlexOp2::reg(Reg::IP),
        });
        MemOperand::base_offset(ty, Reg::IP, 0)
    }

    fn load_word(&mut self, dest: Reg, offset: i32) {
        let mem = self.frame_mem(Type::I32, offset);
        self.push(Arm32Inst::Ldr { pred: Cond::Al, sign_extend: false, dest, mem });
    }

    fn store_word(&mut self, src: Reg, offset: i32) {
        let mem = self.frame_mem(Type::I32, offset);
        self.push(Arm32Inst::Str { pred: Cond::Al, src, mem });
    }

    /// Compute the address of a frame slot into `dest`.
    fn slot_address(&mut self, dest: Reg, offset: i32) {
        if let Some(imm) = FlexImm::from_value(offset.unsigned_abs()) {
            let op = if offset >= 0 { DataOp::Add } else { DataOp::Sub };
            self.push(Arm32Inst::DataOp {
                op,
                pred: Cond::Al,
                set_flags: false,
                dest,
                src0: Reg::FP,
                src1: FlexOp2::Imm(imm),
            });
            return;
        }
        self.mov_imm32(dest, offset as u32);
        self.push(Arm32Inst::DataOp {
            op: DataOp::Add,
            pred: Cond::Al,
            set_flags: false,
            dest,
            src0: Reg::FP,
            src1: FlexOp2::reg(dest),
        });
    }

    // ---- operand access ------------------------------------------------

    fn operand_type(&self, op: Operand) -> Type {
        self.cfg.operand_type(op)
    }

    /// The 32-bit words of an operand's value, for raw copies. Variables
    /// return `None` (copied from their slot instead).
    fn constant_words(&self, op: Operand) -> Option<Vec<u32>> {
        match op {
            Operand::Var(_) => None,
            Operand::Global(_) => None,
            Operand::Const(c) => Some(match *self.cfg.constant(c) {
                Constant::Integer { ty: Type::I64, value } => {
                    vec![value as u32, (value >> 32) as u32]
                }
                Constant::Integer { ty, value } => {
                    let mask = if ty.scalar_int_width() >= 32 {
                        u32::MAX
                    } else {
                        (1u32 << ty.scalar_int_width()) - 1
                    };
                    vec![value as u32 & mask]
                }
                Constant::Float(f) => vec![f.to_bits()],
                Constant::Double(d) => {
                    let bits = d.to_bits();
                    vec![bits as u32, (bits >> 32) as u32]
                }
                Constant::Undef(ty) => vec![0; (slot_size(ty) / 4) as usize],
            }),
        }
    }

    /// Load a core-class operand into `dest`. Uses only `dest` and `ip`.
    fn load_core(&mut self, op: Operand, dest: Reg) {
        match op {
            Operand::Var(var) => self.load_word(dest, self.slots[var as usize]),
            Operand::Global(id) => self.mov_symbol(dest, id),
            Operand::Const(_) => {
                let words = self.constant_words(op).unwrap_or_default();
                self.mov_imm32(dest, words.first().copied().unwrap_or(0));
            }
        }
    }

    /// Load an i64 operand into a register pair.
    fn load_pair(&mut self, op: Operand, lo: Reg, hi: Reg) {
        match op {
            Operand::Var(var) => {
                let offset = self.slots[var as usize];
                self.load_word(lo, offset);
                self.load_word(hi, offset + 4);
            }
            _ => {
                let words = self.constant_words(op).unwrap_or_default();
                self.mov_imm32(lo, words.first().copied().unwrap_or(0));
                self.mov_imm32(hi, words.get(1).copied().unwrap_or(0));
            }
        }
    }

    fn load_single(&mut self, op: Operand, dest: VfpReg) {
        match op {
            Operand::Var(var) => {
                let mem = self.frame_mem(Type::F32, self.slots[var as usize]);
                self.push(Arm32Inst::Vldr { pred: Cond::Al, dest, mem });
            }
            _ => {
                let words = self.constant_words(op).unwrap_or_default();
                self.mov_imm32(Reg::IP, words.first().copied().unwrap_or(0));
                self.push(Arm32Inst::VMovSR { pred: Cond::Al, dest, src: Reg::IP });
            }
        }
    }

    fn load_double(&mut self, op: Operand, dest: VfpReg) {
        match op {
            Operand::Var(var) => {
                let mem = self.frame_mem(Type::F64, self.slots[var as usize]);
                self.push(Arm32Inst::Vldr { pred: Cond::Al, dest, mem });
            }
            _ => {
                let words = self.constant_words(op).unwrap_or_default();
                self.mov_imm32(Reg::IP, words.first().copied().unwrap_or(0));
                self.mov_imm32(Reg::LR, words.get(1).copied().unwrap_or(0));
                self.push(Arm32Inst::VMovDRR {
                    pred: Cond::Al,
                    dest,
                    src_lo: Reg::IP,
                    src_hi: Reg::LR,
                });
            }
        }
    }

    /// Load a vector operand into quad register `q`.
    fn load_vector(&mut self, op: Operand, q: u8) {
        match op {
            Operand::Var(var) => {
                self.slot_address(Reg::IP, self.slots[var as usize]);
                self.text(format!("vld1.64 {{d{}, d{}}}, [ip]", q * 2, q * 2 + 1));
            }
            _ => {
                // Constant vectors only arise as undef; zero the register.
                self.text(format!("vmov.i32 q{q}, #0"));
            }
        }
    }

    fn store_vector(&mut self, var: VarId, q: u8) {
        self.slot_address(Reg::IP, self.slots[var as usize]);
        self.text(format!("vst1.64 {{d{}, d{}}}, [ip]", q * 2, q * 2 + 1));
    }

    fn store_core(&mut self, var: VarId, src: Reg) {
        self.store_word(src, self.slots[var as usize]);
    }

    fn store_pair(&mut self, var: VarId, lo: Reg, hi: Reg) {
        let offset = self.slots[var as usize];
        self.store_word(lo, offset);
        self.store_word(hi, offset + 4);
    }

    fn store_single(&mut self, var: VarId, src: VfpReg) {
        let mem = self.frame_mem(Type::F32, self.slots[var as usize]);
        self.push(Arm32Inst::Vstr { pred: Cond::Al, src, mem });
    }

    fn store_double(&mut self, var: VarId, src: VfpReg) {
        let mem = self.frame_mem(Type::F64, self.slots[var as usize]);
        self.push(Arm32Inst::Vstr { pred: Cond::Al, src, mem });
    }

    /// Copy an operand into an arbitrary frame slot as raw words. Works for
    /// every class; used by phi staging, assigns and bitcasts.
    fn copy_operand_to_slot(&mut self, op: Operand, offset: i32, ty: Type) {
        if let Operand::Var(var) = op {
            let src_offset = self.slots[var as usize];
            let words = slot_size(ty) / 4;
            for word in 0..words {
                self.load_word(Reg::R0, src_offset + word * 4);
                self.store_word(Reg::R0, offset + word * 4);
            }
            return;
        }
        if let Operand::Global(id) = op {
            self.mov_symbol(Reg::R0, id);
            self.store_word(Reg::R0, offset);
            return;
        }
        let words = self.constant_words(op).unwrap_or_default();
        for (index, word) in words.iter().enumerate() {
            self.mov_imm32(Reg::R0, *word);
            self.store_word(Reg::R0, offset + index as i32 * 4);
        }
    }

    // ---- prologue / epilogue -------------------------------------------

    fn emit_prologue(&mut self) {
        self.push(Arm32Inst::Push { regs: vec![Reg::FP, Reg::LR] });
        self.push(Arm32Inst::MovReg { pred: Cond::Al, dest: Reg::FP, src: FlexOp2::reg(Reg::SP) });
        self.adjust_sp(-self.frame_size);
        // Spill incoming arguments to their slots.
        let mut assigner = AapcsAssigner::default();
        for &arg in &self.cfg.args {
            let ty = self.cfg.var_type(arg);
            let offset = self.slots[arg as usize];
            match assigner.assign(ty) {
                ArgLoc::Core(reg) => self.store_word(Reg(reg), offset),
                ArgLoc::CorePair(reg) => {
                    self.store_word(Reg(reg), offset);
                    self.store_word(Reg(reg + 1), offset + 4);
                }
                ArgLoc::S(reg) => self.store_single(arg, VfpReg::S(reg)),
                ArgLoc::D(reg) => self.store_double(arg, VfpReg::D(reg)),
                ArgLoc::Q(reg) => self.store_vector(arg, reg),
                ArgLoc::Stack(stack_offset) => {
                    // Incoming stack arguments sit above the saved fp/lr pair.
                    let words = slot_size(ty) / 4;
                    for word in 0..words {
                        self.load_word(Reg::R0, 8 + stack_offset + word * 4);
                        self.store_word(Reg::R0, offset + word * 4);
                    }
                }
            }
        }
    }

    fn emit_epilogue(&mut self) {
        self.push(Arm32Inst::MovReg { pred: Cond::Al, dest: Reg::SP, src: FlexOp2::reg(Reg::FP) });
        self.push(Arm32Inst::Pop { regs: vec![Reg::FP, Reg::LR] });
        self.push(Arm32Inst::Ret);
    }

    fn adjust_sp(&mut self, amount: i32) {
        if amount == 0 {
            return;
        }
        let (op, magnitude) = if amount < 0 {
            (DataOp::Sub, amount.unsigned_abs())
        } else {
            (DataOp::Add, amount as u32)
        };
        if let Some(imm) = FlexImm::from_value(magnitude) {
            self.push(Arm32Inst::DataOp {
                op,
                pred: Cond::Al,
                set_flags: false,
                dest: Reg::SP,
                src0: Reg::SP,
                src1: FlexOp2::Imm(imm),
            });
            return;
        }
        self.mov_imm32(Reg::IP, magnitude);
        self.push(Arm32Inst::DataOp {
            op,
            pred: Cond::Al,
            set_flags: false,
            dest: Reg::SP,
            src0: Reg::SP,
            src1: FlexOp2::reg(Reg::IP),
        });
    }

    // ---- phi handling --------------------------------------------------

    fn copy_phi_staging(&mut self, block: BlockId) {
        let phis: Vec<VarId> = self.cfg.blocks[block as usize]
            .insts
            .iter()
            .filter_map(|inst| match inst {
                Inst::Phi { dest, .. } => Some(*dest),
                _ => None,
            })
            .collect();
        for dest in phis {
            let ty = self.cfg.var_type(dest);
            let staging = self.staging[&dest];
            let target = self.slots[dest as usize];
            let words = slot_size(ty) / 4;
            for word in 0..words {
                self.load_word(Reg::R0, staging + word * 4);
                self.store_word(Reg::R0, target + word * 4);
            }
        }
    }

    fn emit_pending_phi_moves(&mut self, block: BlockId) {
        let Some(moves) = self.phi_moves.get(&block).cloned() else { return };
        for (dest, op) in moves {
            let staging = self.staging[&dest];
            let ty = self.cfg.var_type(dest);
            self.copy_operand_to_slot(op, staging, ty);
        }
    }

    // ---- instruction dispatch ------------------------------------------

    fn lower_inst(&mut self, inst: &Inst) {
        match inst {
            Inst::Arith { op, dest, a, b } => self.lower_arith(*op, *dest, *a, *b),
            Inst::Cast { op, dest, src } => self.lower_cast(*op, *dest, *src),
            Inst::Select { dest, cond, then_val, else_val } => {
                self.lower_select(*dest, *cond, *then_val, *else_val)
            }
            Inst::ExtractElement { dest, vec, index } => {
                self.lower_extract_element(*dest, *vec, *index)
            }
            Inst::InsertElement { dest, vec, elt, index } => {
                self.lower_insert_element(*dest, *vec, *elt, *index)
            }
            Inst::Icmp { cond, dest, a, b } => self.lower_icmp(*cond, *dest, *a, *b),
            Inst::Fcmp { cond, dest, a, b } => self.lower_fcmp(*cond, *dest, *a, *b),
            Inst::Ret { value } => self.lower_ret(*value),
            Inst::Br { target } => {
                self.push(Arm32Inst::Br {
                    pred: Cond::Al,
                    target_true: None,
                    target_false: Some(*target),
                });
            }
            Inst::CondBr { cond, then_target, else_target } => {
                self.load_core(*cond, Reg::R0);
                self.push(Arm32Inst::Tst {
                    pred: Cond::Al,
                    src0: Reg::R0,
                    src1: FlexOp2::imm(1).unwrap_or(FlexOp2::reg(Reg::R0)),
                });
                self.push(Arm32Inst::Br {
                    pred: Cond::Ne,
                    target_true: Some(*then_target),
                    target_false: Some(*else_target),
                });
            }
            Inst::Switch { ty, cond, default, cases } => {
                self.lower_switch(*ty, *cond, *default, cases)
            }
            Inst::Unreachable => self.push(Arm32Inst::Trap),
            Inst::Phi { .. } => {
                // Handled by staging copies at block entry.
            }
            Inst::Alloca { dest, byte_count, align: _ } => {
                self.load_core(*byte_count, Reg::R0);
                self.push(Arm32Inst::DataOp {
                    op: DataOp::Add,
                    pred: Cond::Al,
                    set_flags: false,
                    dest: Reg::R0,
                    src0: Reg::R0,
                    src1: FlexOp2::imm(15).unwrap_or(FlexOp2::reg(Reg::R0)),
                });
                self.push(Arm32Inst::DataOp {
                    op: DataOp::Bic,
                    pred: Cond::Al,
                    set_flags: false,
                    dest: Reg::R0,
                    src0: Reg::R0,
                    src1: FlexOp2::imm(15).unwrap_or(FlexOp2::reg(Reg::R0)),
                });
                self.push(Arm32Inst::DataOp {
                    op: DataOp::Sub,
                    pred: Cond::Al,
                    set_flags: false,
                    dest: Reg::SP,
                    src0: Reg::SP,
                    src1: FlexOp2::reg(Reg::R0),
                });
                self.push(Arm32Inst::MovReg {
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src: FlexOp2::reg(Reg::SP),
                });
                self.store_core(*dest, Reg::R0);
            }
            Inst::Load { dest, ty, addr, align: _ } => self.lower_load(*dest, *ty, *addr),
            Inst::Store { value, addr, align: _ } => self.lower_store(*value, *addr),
            Inst::Call { dest, callee, args, tail: _ } => self.lower_call(*dest, *callee, args),
            Inst::IntrinsicCall { dest, intrinsic, args } => {
                self.lower_intrinsic(*dest, *intrinsic, args)
            }
            Inst::Assign { dest, src } => {
                let ty = self.cfg.var_type(*dest);
                let offset = self.slots[*dest as usize];
                self.copy_operand_to_slot(*src, offset, ty);
            }
        }
    }

    // ---- arithmetic ----------------------------------------------------

    /// Re-establish the canonical zero-extended form of a sub-word value in
    /// `reg` after an operation that may have dirtied the upper bits.
    fn normalize_narrow(&mut self, reg: Reg, ty: Type) {
        match ty {
            Type::I1 => self.push(Arm32Inst::DataOp {
                op: DataOp::And,
                pred: Cond::Al,
                set_flags: false,
                dest: reg,
                src0: reg,
                src1: FlexOp2::imm(1).unwrap_or(FlexOp2::reg(reg)),
            }),
            Type::I8 => self.push(Arm32Inst::Extend {
                pred: Cond::Al,
                signed: false,
                byte: true,
                dest: reg,
                src: reg,
            }),
            Type::I16 => self.push(Arm32Inst::Extend {
                pred: Cond::Al,
                signed: false,
                byte: false,
                dest: reg,
                src: reg,
            }),
            _ => {}
        }
    }

    /// Sign-extend a canonical sub-word value in `reg` for signed operations.
    fn sign_extend_narrow(&mut self, reg: Reg, ty: Type) {
        match ty {
            Type::I8 => self.push(Arm32Inst::Extend {
                pred: Cond::Al,
                signed: true,
                byte: true,
                dest: reg,
                src: reg,
            }),
            Type::I16 => self.push(Arm32Inst::Extend {
                pred: Cond::Al,
                signed: true,
                byte: false,
                dest: reg,
                src: reg,
            }),
            _ => {}
        }
    }

    fn data_op(&mut self, op: DataOp, dest: Reg, src0: Reg, src1: Reg) {
        self.push(Arm32Inst::DataOp {
            op,
            pred: Cond::Al,
            set_flags: false,
            dest,
            src0,
            src1: FlexOp2::reg(src1),
        });
    }

    fn lower_arith(&mut self, op: ArithOp, dest: VarId, a: Operand, b: Operand) {
        let ty = self.operand_type(a);
        match class_of(ty) {
            Class::Core => self.lower_arith_core(op, dest, a, b, ty),
            Class::Pair => self.lower_arith_pair(op, dest, a, b),
            Class::SingleFp | Class::DoubleFp => self.lower_arith_fp(op, dest, a, b, ty),
            Class::Vector => self.lower_arith_vector(op, dest, a, b, ty),
        }
    }

    fn lower_arith_core(&mut self, op: ArithOp, dest: VarId, a: Operand, b: Operand, ty: Type) {
        self.load_core(a, Reg::R0);
        self.load_core(b, Reg::R1);
        match op {
            ArithOp::Add => self.data_op(DataOp::Add, Reg::R0, Reg::R0, Reg::R1),
            ArithOp::Sub => self.data_op(DataOp::Sub, Reg::R0, Reg::R0, Reg::R1),
            ArithOp::Mul => {
                self.push(Arm32Inst::Mul { pred: Cond::Al, dest: Reg::R0, src0: Reg::R0, src1: Reg::R1 })
            }
            ArithOp::And => self.data_op(DataOp::And, Reg::R0, Reg::R0, Reg::R1),
            ArithOp::Or => self.data_op(DataOp::Orr, Reg::R0, Reg::R0, Reg::R1),
            ArithOp::Xor => self.data_op(DataOp::Eor, Reg::R0, Reg::R0, Reg::R1),
            ArithOp::Shl => {
                self.push(Arm32Inst::Shift {
                    kind: ShiftKind::Lsl,
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src: Reg::R0,
                    amount: ShiftAmount::Reg(Reg::R1),
                });
            }
            ArithOp::Lshr => {
                self.push(Arm32Inst::Shift {
                    kind: ShiftKind::Lsr,
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src: Reg::R0,
                    amount: ShiftAmount::Reg(Reg::R1),
                });
            }
            ArithOp::Ashr => {
                self.sign_extend_narrow(Reg::R0, ty);
                self.push(Arm32Inst::Shift {
                    kind: ShiftKind::Asr,
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src: Reg::R0,
                    amount: ShiftAmount::Reg(Reg::R1),
                });
            }
            ArithOp::Udiv => {
                self.push(Arm32Inst::Div {
                    signed: false,
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src0: Reg::R0,
                    src1: Reg::R1,
                });
            }
            ArithOp::Sdiv => {
                self.sign_extend_narrow(Reg::R0, ty);
                self.sign_extend_narrow(Reg::R1, ty);
                self.push(Arm32Inst::Div {
                    signed: true,
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src0: Reg::R0,
                    src1: Reg::R1,
                });
            }
            ArithOp::Urem => {
                self.push(Arm32Inst::Div {
                    signed: false,
                    pred: Cond::Al,
                    dest: Reg::R2,
                    src0: Reg::R0,
                    src1: Reg::R1,
                });
                self.push(Arm32Inst::Mls {
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src0: Reg::R2,
                    src1: Reg::R1,
                    acc: Reg::R0,
                });
            }
            ArithOp::Srem => {
                self.sign_extend_narrow(Reg::R0, ty);
                self.sign_extend_narrow(Reg::R1, ty);
                self.push(Arm32Inst::Div {
                    signed: true,
                    pred: Cond::Al,
                    dest: Reg::R2,
                    src0: Reg::R0,
                    src1: Reg::R1,
                });
                self.push(Arm32Inst::Mls {
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src0: Reg::R2,
                    src1: Reg::R1,
                    acc: Reg::R0,
                });
            }
            _ => self.unimplemented("float operator on integer operands"),
        }
        self.normalize_narrow(Reg::R0, ty);
        self.store_core(dest, Reg::R0);
    }

    fn lower_arith_pair(&mut self, op: ArithOp, dest: VarId, a: Operand, b: Operand) {
        self.load_pair(a, Reg::R0, Reg::R1);
        match op {
            ArithOp::Add | ArithOp::Sub => {
                self.load_pair(b, Reg::R2, Reg::R3);
                let (low, high) =
                    if op == ArithOp::Add { (DataOp::Add, DataOp::Adc) } else { (DataOp::Sub, DataOp::Sbc) };
                self.push(Arm32Inst::DataOp {
                    op: low,
                    pred: Cond::Al,
                    set_flags: true,
                    dest: Reg::R0,
                    src0: Reg::R0,
                    src1: FlexOp2::reg(Reg::R2),
                });
                self.push(Arm32Inst::DataOp {
                    op: high,
                    pred: Cond::Al,
                    set_flags: false,
                    dest: Reg::R1,
                    src0: Reg::R1,
                    src1: FlexOp2::reg(Reg::R3),
                });
            }
            ArithOp::And | ArithOp::Or | ArithOp::Xor => {
                self.load_pair(b, Reg::R2, Reg::R3);
                let data = match op {
                    ArithOp::And => DataOp::And,
                    ArithOp::Or => DataOp::Orr,
                    _ => DataOp::Eor,
                };
                self.data_op(data, Reg::R0, Reg::R0, Reg::R2);
                self.push(Arm32Inst::DataOp {
                    op: data,
                    pred: Cond::Al,
                    set_flags: false,
                    dest: Reg::R1,
                    src0: Reg::R1,
                    src1: FlexOp2::reg(Reg::R3),
                });
            }
            ArithOp::Mul => {
                self.load_pair(b, Reg::R2, Reg::R3);
                self.call_runtime("__aeabi_lmul");
            }
            ArithOp::Sdiv => {
                self.load_pair(b, Reg::R2, Reg::R3);
                self.call_runtime("__aeabi_ldivmod");
            }
            ArithOp::Udiv => {
                self.load_pair(b, Reg::R2, Reg::R3);
                self.call_runtime("__aeabi_uldivmod");
            }
            ArithOp::Srem | ArithOp::Urem => {
                self.load_pair(b, Reg::R2, Reg::R3);
                let name =
                    if op == ArithOp::Srem { "__aeabi_ldivmod" } else { "__aeabi_uldivmod" };
                self.call_runtime(name);
                // Remainder comes back in r2:r3.
                self.push(Arm32Inst::MovReg { pred: Cond::Al, dest: Reg::R0, src: FlexOp2::reg(Reg::R2) });
                self.push(Arm32Inst::MovReg { pred: Cond::Al, dest: Reg::R1, src: FlexOp2::reg(Reg::R3) });
            }
            ArithOp::Shl | ArithOp::Lshr | ArithOp::Ashr => {
                self.load_core(b, Reg::R2);
                let name = match op {
                    ArithOp::Shl => "__aeabi_llsl",
                    ArithOp::Lshr => "__aeabi_llsr",
                    _ => "__aeabi_lasr",
                };
                self.call_runtime(name);
            }
            _ => self.unimplemented("float operator on i64 operands"),
        }
        self.store_pair(dest, Reg::R0, Reg::R1);
    }

    fn lower_arith_fp(&mut self, op: ArithOp, dest: VarId, a: Operand, b: Operand, ty: Type) {
        let double = ty == Type::F64;
        let (d0, d1) = if double {
            (VfpReg::D(0), VfpReg::D(1))
        } else {
            (VfpReg::S(0), VfpReg::S(1))
        };
        if double {
            self.load_double(a, d0);
            self.load_double(b, d1);
        } else {
            self.load_single(a, d0);
            self.load_single(b, d1);
        }
        let vfp_op = match op {
            ArithOp::Fadd => Some(VfpOp::Vadd),
            ArithOp::Fsub => Some(VfpOp::Vsub),
            ArithOp::Fmul => Some(VfpOp::Vmul),
            ArithOp::Fdiv => Some(VfpOp::Vdiv),
            ArithOp::Frem => None,
            _ => {
                self.unimplemented("integer operator on float operands");
                return;
            }
        };
        match vfp_op {
            Some(vfp_op) => {
                self.push(Arm32Inst::VArith { op: vfp_op, pred: Cond::Al, dest: d0, src0: d0, src1: d1 });
            }
            None => {
                // No VFP remainder; the arguments are already in s0/s1 (d0/d1).
                self.call_runtime(if double { "fmod" } else { "fmodf" });
            }
        }
        if double {
            self.store_double(dest, d0);
        } else {
            self.store_single(dest, d0);
        }
    }

    fn neon_elem_suffix(ty: Type) -> &'static str {
        match ty.element_type() {
            Type::I1 => ".i32",
            Type::I8 => ".i8",
            Type::I16 => ".i16",
            Type::I32 => ".i32",
            Type::F32 => ".f32",
            _ => ".i32",
        }
    }

    fn lower_arith_vector(&mut self, op: ArithOp, dest: VarId, a: Operand, b: Operand, ty: Type) {
        self.load_vector(a, 0);
        self.load_vector(b, 1);
        let suffix = Self::neon_elem_suffix(ty);
        let mnemonic = match op {
            ArithOp::Add | ArithOp::Fadd => "vadd",
            ArithOp::Sub | ArithOp::Fsub => "vsub",
            ArithOp::Mul | ArithOp::Fmul => "vmul",
            ArithOp::And => "vand",
            ArithOp::Or => "vorr",
            ArithOp::Xor => "veor",
            ArithOp::Shl => "vshl",
            _ => {
                self.unimplemented("vector division");
                return;
            }
        };
        match mnemonic {
            "vand" | "vorr" | "veor" => self.text(format!("{mnemonic} q0, q0, q1")),
            _ => self.text(format!("{mnemonic}{suffix} q0, q0, q1")),
        }
        self.store_vector(dest, 0);
    }

    fn call_runtime(&mut self, name: &str) {
        let name = self.session.intern(name);
        self.push(Arm32Inst::Call { target: CallTarget::Direct(name) });
    }

    // ---- casts ---------------------------------------------------------

    fn lower_cast(&mut self, op: CastOp, dest: VarId, src: Operand) {
        let src_ty = self.operand_type(src);
        let dest_ty = self.cfg.var_type(dest);
        if src_ty.is_vector() || dest_ty.is_vector() {
            return self.lower_cast_vector(op, dest, src, src_ty, dest_ty);
        }
        match op {
            CastOp::Trunc => {
                if src_ty == Type::I64 {
                    self.load_pair(src, Reg::R0, Reg::R1);
                } else {
                    self.load_core(src, Reg::R0);
                }
                self.normalize_narrow(Reg::R0, dest_ty);
                self.store_core(dest, Reg::R0);
            }
            CastOp::Zext => {
                self.load_core(src, Reg::R0);
                if dest_ty == Type::I64 {
                    self.mov_imm32(Reg::R1, 0);
                    self.store_pair(dest, Reg::R0, Reg::R1);
                } else {
                    self.store_core(dest, Reg::R0);
                }
            }
            CastOp::Sext => {
                self.load_core(src, Reg::R0);
                if src_ty == Type::I1 {
                    // 0 or 1 becomes 0 or all-ones.
                    self.push(Arm32Inst::DataOp {
                        op: DataOp::Rsb,
                        pred: Cond::Al,
                        set_flags: false,
                        dest: Reg::R0,
                        src0: Reg::R0,
                        src1: FlexOp2::imm(0).unwrap_or(FlexOp2::reg(Reg::R0)),
                    });
                } else {
                    self.sign_extend_narrow(Reg::R0, src_ty);
                }
                if dest_ty == Type::I64 {
                    self.push(Arm32Inst::Shift {
                        kind: ShiftKind::Asr,
                        pred: Cond::Al,
                        dest: Reg::R1,
                        src: Reg::R0,
                        amount: ShiftAmount::Imm(31),
                    });
                    self.store_pair(dest, Reg::R0, Reg::R1);
                } else {
                    self.normalize_narrow(Reg::R0, dest_ty);
                    self.store_core(dest, Reg::R0);
                }
            }
            CastOp::Fptoui | CastOp::Fptosi => {
                let signed = op == CastOp::Fptosi;
                let double = src_ty == Type::F64;
                if dest_ty == Type::I64 {
                    // Via the runtime, which takes soft-float arguments.
                    if double {
                        self.load_double(src, VfpReg::D(0));
                        self.push(Arm32Inst::VMovRRD {
                            pred: Cond::Al,
                            dest_lo: Reg::R0,
                            dest_hi: Reg::R1,
                            src: VfpReg::D(0),
                        });
                        self.call_runtime(if signed { "__aeabi_d2lz" } else { "__aeabi_d2ulz" });
                    } else {
                        self.load_single(src, VfpReg::S(0));
                        self.push(Arm32Inst::VMovRS {
                            pred: Cond::Al,
                            dest: Reg::R0,
                            src: VfpReg::S(0),
                        });
                        self.call_runtime(if signed { "__aeabi_f2lz" } else { "__aeabi_f2ulz" });
                    }
                    self.store_pair(dest, Reg::R0, Reg::R1);
                    return;
                }
                let kind = match (double, signed) {
                    (false, true) => VcvtKind::S32FromF32,
                    (false, false) => VcvtKind::U32FromF32,
                    (true, true) => VcvtKind::S32FromF64,
                    (true, false) => VcvtKind::U32FromF64,
                };
                let src_reg = if double { VfpReg::D(0) } else { VfpReg::S(0) };
                if double {
                    self.load_double(src, src_reg);
                } else {
                    self.load_single(src, src_reg);
                }
                self.push(Arm32Inst::Vcvt {
                    kind,
                    pred: Cond::Al,
                    dest: VfpReg::S(0),
                    src: src_reg,
                });
                self.push(Arm32Inst::VMovRS { pred: Cond::Al, dest: Reg::R0, src: VfpReg::S(0) });
                self.normalize_narrow(Reg::R0, dest_ty);
                self.store_core(dest, Reg::R0);
            }
            CastOp::Uitofp | CastOp::Sitofp => {
                let signed = op == CastOp::Sitofp;
                let double = dest_ty == Type::F64;
                if src_ty == Type::I64 {
                    self.load_pair(src, Reg::R0, Reg::R1);
                    let name = match (double, signed) {
                        (false, true) => "__aeabi_l2f",
                        (false, false) => "__aeabi_ul2f",
                        (true, true) => "__aeabi_l2d",
                        (true, false) => "__aeabi_ul2d",
                    };
                    self.call_runtime(name);
                    // Soft-float return value comes back in core registers.
                    if double {
                        self.push(Arm32Inst::VMovDRR {
                            pred: Cond::Al,
                            dest: VfpReg::D(0),
                            src_lo: Reg::R0,
                            src_hi: Reg::R1,
                        });
                        self.store_double(dest, VfpReg::D(0));
                    } else {
                        self.store_core(dest, Reg::R0);
                    }
                    return;
                }
                self.load_core(src, Reg::R0);
                if signed {
                    self.sign_extend_narrow(Reg::R0, src_ty);
                }
                self.push(Arm32Inst::VMovSR { pred: Cond::Al, dest: VfpReg::S(0), src: Reg::R0 });
                let kind = match (double, signed) {
                    (false, true) => VcvtKind::F32FromS32,
                    (false, false) => VcvtKind::F32FromU32,
                    (true, true) => VcvtKind::F64FromS32,
                    (true, false) => VcvtKind::F64FromU32,
                };
                let dest_reg = if double { VfpReg::D(0) } else { VfpReg::S(0) };
                self.push(Arm32Inst::Vcvt { kind, pred: Cond::Al, dest: dest_reg, src: VfpReg::S(0) });
                if double {
                    self.store_double(dest, dest_reg);
                } else {
                    self.store_single(dest, dest_reg);
                }
            }
            CastOp::Fptrunc => {
                self.load_double(src, VfpReg::D(0));
                self.push(Arm32Inst::Vcvt {
                    kind: VcvtKind::F32FromF64,
                    pred: Cond::Al,
                    dest: VfpReg::S(0),
                    src: VfpReg::D(0),
                });
                self.store_single(dest, VfpReg::S(0));
            }
            CastOp::Fpext => {
                self.load_single(src, VfpReg::S(0));
                self.push(Arm32Inst::Vcvt {
                    kind: VcvtKind::F64FromF32,
                    pred: Cond::Al,
                    dest: VfpReg::D(0),
                    src: VfpReg::S(0),
                });
                self.store_double(dest, VfpReg::D(0));
            }
            CastOp::Bitcast => {
                let offset = self.slots[dest as usize];
                self.copy_operand_to_slot(src, offset, dest_ty);
            }
        }
    }

    fn lower_cast_vector(&mut self, op: CastOp, dest: VarId, src: Operand, src_ty: Type, dest_ty: Type) {
        if op == CastOp::Bitcast && slot_size(src_ty) == slot_size(dest_ty) {
            let offset = self.slots[dest as usize];
            self.copy_operand_to_slot(src, offset, dest_ty);
            return;
        }
        self.load_vector(src, 0);
        let text = match op {
            CastOp::Trunc => format!("vmovn{} d0, q0", Self::neon_elem_suffix(src_ty)),
            CastOp::Fptosi => "vcvt.s32.f32 q0, q0".to_string(),
            CastOp::Fptoui => "vcvt.u32.f32 q0, q0".to_string(),
            CastOp::Sitofp => "vcvt.f32.s32 q0, q0".to_string(),
            CastOp::Uitofp => "vcvt.f32.u32 q0, q0".to_string(),
            _ => {
                self.unimplemented("vector cast");
                return;
            }
        };
        self.text(text);
        self.store_vector(dest, 0);
    }

    // ---- compares and select -------------------------------------------

    fn icmp_cond(cond: IcmpCond) -> Cond {
        match cond {
            IcmpCond::Eq => Cond::Eq,
            IcmpCond::Ne => Cond::Ne,
            IcmpCond::Ugt => Cond::Hi,
            IcmpCond::Uge => Cond::Cs,
            IcmpCond::Ult => Cond::Cc,
            IcmpCond::Ule => Cond::Ls,
            IcmpCond::Sgt => Cond::Gt,
            IcmpCond::Sge => Cond::Ge,
            IcmpCond::Slt => Cond::Lt,
            IcmpCond::Sle => Cond::Le,
        }
    }

    fn store_flag(&mut self, dest: VarId, cond: Cond, second: Option<Cond>) {
        self.mov_imm32(Reg::R0, 0);
        self.push(Arm32Inst::MovReg {
            pred: cond,
            dest: Reg::R0,
            src: FlexOp2::imm(1).unwrap_or(FlexOp2::reg(Reg::R0)),
        });
        if let Some(second) = second {
            self.push(Arm32Inst::MovReg {
                pred: second,
                dest: Reg::R0,
                src: FlexOp2::imm(1).unwrap_or(FlexOp2::reg(Reg::R0)),
            });
        }
        self.store_core(dest, Reg::R0);
    }

    fn lower_icmp(&mut self, cond: IcmpCond, dest: VarId, a: Operand, b: Operand) {
        let ty = self.operand_type(a);
        if ty.is_vector() {
            return self.lower_icmp_vector(cond, dest, a, b, ty);
        }
        if ty == Type::I64 {
            return self.lower_icmp_pair(cond, dest, a, b);
        }
        self.load_core(a, Reg::R0);
        self.load_core(b, Reg::R1);
        let signed = matches!(cond, IcmpCond::Sgt | IcmpCond::Sge | IcmpCond::Slt | IcmpCond::Sle);
        if signed {
            self.sign_extend_narrow(Reg::R0, ty);
            self.sign_extend_narrow(Reg::R1, ty);
        }
        self.push(Arm32Inst::Cmp { pred: Cond::Al, src0: Reg::R0, src1: FlexOp2::reg(Reg::R1) });
        self.store_flag(dest, Self::icmp_cond(cond), None);
    }

    fn lower_icmp_pair(&mut self, cond: IcmpCond, dest: VarId, a: Operand, b: Operand) {
        self.load_pair(a, Reg::R0, Reg::R1);
        self.load_pair(b, Reg::R2, Reg::R3);
        match cond {
            IcmpCond::Eq | IcmpCond::Ne => {
                self.data_op(DataOp::Eor, Reg::R0, Reg::R0, Reg::R2);
                self.data_op(DataOp::Eor, Reg::R1, Reg::R1, Reg::R3);
                self.push(Arm32Inst::DataOp {
                    op: DataOp::Orr,
                    pred: Cond::Al,
                    set_flags: true,
                    dest: Reg::R0,
                    src0: Reg::R0,
                    src1: FlexOp2::reg(Reg::R1),
                });
                let arm_cond = if cond == IcmpCond::Eq { Cond::Eq } else { Cond::Ne };
                self.store_flag(dest, arm_cond, None);
            }
            _ => {
                // Borrow-based ordering: subtract and read the flags. The
                // greater-than family swaps operands first.
                let (swap, arm_cond) = match cond {
                    IcmpCond::Ult => (false, Cond::Cc),
                    IcmpCond::Uge => (false, Cond::Cs),
                    IcmpCond::Slt => (false, Cond::Lt),
                    IcmpCond::Sge => (false, Cond::Ge),
                    IcmpCond::Ugt => (true, Cond::Cc),
                    IcmpCond::Ule => (true, Cond::Cs),
                    IcmpCond::Sgt => (true, Cond::Lt),
                    IcmpCond::Sle => (true, Cond::Ge),
                    IcmpCond::Eq | IcmpCond::Ne => unreachable!(),
                };
                let (alo, ahi, blo, bhi) = if swap {
                    (Reg::R2, Reg::R3, Reg::R0, Reg::R1)
                } else {
                    (Reg::R0, Reg::R1, Reg::R2, Reg::R3)
                };
                self.push(Arm32Inst::DataOp {
                    op: DataOp::Sub,
                    pred: Cond::Al,
                    set_flags: true,
                    dest: Reg::IP,
                    src0: alo,
                    src1: FlexOp2::reg(blo),
                });
                self.push(Arm32Inst::DataOp {
                    op: DataOp::Sbc,
                    pred: Cond::Al,
                    set_flags: true,
                    dest: Reg::IP,
                    src0: ahi,
                    src1: FlexOp2::reg(bhi),
                });
                self.store_flag(dest, arm_cond, None);
            }
        }
    }

    fn lower_icmp_vector(&mut self, cond: IcmpCond, dest: VarId, a: Operand, b: Operand, ty: Type) {
        self.load_vector(a, 0);
        self.load_vector(b, 1);
        let elem = ty.element_type();
        let bits = match elem {
            Type::I8 => "8",
            Type::I16 => "16",
            _ => "32",
        };
        let text = match cond {
            IcmpCond::Eq => format!("vceq.i{bits} q0, q0, q1"),
            IcmpCond::Ne => format!("vceq.i{bits} q0, q0, q1\n\tvmvn q0, q0"),
            IcmpCond::Ugt => format!("vcgt.u{bits} q0, q0, q1"),
            IcmpCond::Uge => format!("vcge.u{bits} q0, q0, q1"),
            IcmpCond::Ult => format!("vcgt.u{bits} q0, q1, q0"),
            IcmpCond::Ule => format!("vcge.u{bits} q0, q1, q0"),
            IcmpCond::Sgt => format!("vcgt.s{bits} q0, q0, q1"),
            IcmpCond::Sge => format!("vcge.s{bits} q0, q0, q1"),
            IcmpCond::Slt => format!("vcgt.s{bits} q0, q1, q0"),
            IcmpCond::Sle => format!("vcge.s{bits} q0, q1, q0"),
        };
        self.text(text);
        self.store_vector(dest, 0);
    }

    /// Condition pair selecting the true outcome of a float compare after
    /// `vcmp`/`vmrs`. `None, None` encodes an always-false compare.
    fn fcmp_conds(cond: FcmpCond) -> (Option<Cond>, Option<Cond>) {
        match cond {
            FcmpCond::False => (None, None),
            FcmpCond::Oeq => (Some(Cond::Eq), None),
            FcmpCond::Ogt => (Some(Cond::Gt), None),
            FcmpCond::Oge => (Some(Cond::Ge), None),
            FcmpCond::Olt => (Some(Cond::Mi), None),
            FcmpCond::Ole => (Some(Cond::Ls), None),
            FcmpCond::One => (Some(Cond::Mi), Some(Cond::Gt)),
            FcmpCond::Ord => (Some(Cond::Vc), None),
            FcmpCond::Uno => (Some(Cond::Vs), None),
            FcmpCond::Ueq => (Some(Cond::Eq), Some(Cond::Vs)),
            FcmpCond::Ugt => (Some(Cond::Hi), None),
            FcmpCond::Uge => (Some(Cond::Pl), None),
            FcmpCond::Ult => (Some(Cond::Lt), None),
            FcmpCond::Ule => (Some(Cond::Le), None),
            FcmpCond::Une => (Some(Cond::Ne), None),
            FcmpCond::True => (Some(Cond::Al), None),
        }
    }

    fn lower_fcmp(&mut self, cond: FcmpCond, dest: VarId, a: Operand, b: Operand) {
        let ty = self.operand_type(a);
        if ty.is_vector() {
            return self.lower_fcmp_vector(cond, dest, a, b);
        }
        let (first, second) = Self::fcmp_conds(cond);
        let Some(first) = first else {
            // Always-false compare.
            self.mov_imm32(Reg::R0, 0);
            self.store_core(dest, Reg::R0);
            return;
        };
        let double = ty == Type::F64;
        let (r0, r1) = if double {
            (VfpReg::D(0), VfpReg::D(1))
        } else {
            (VfpReg::S(0), VfpReg::S(1))
        };
        if double {
            self.load_double(a, r0);
            self.load_double(b, r1);
        } else {
            self.load_single(a, r0);
            self.load_single(b, r1);
        }
        self.push(Arm32Inst::Vcmp { pred: Cond::Al, src0: r0, src1: r1 });
        self.push(Arm32Inst::Vmrs { pred: Cond::Al });
        self.store_flag(dest, first, second);
    }

    fn lower_fcmp_vector(&mut self, cond: FcmpCond, dest: VarId, a: Operand, b: Operand) {
        self.load_vector(a, 0);
        self.load_vector(b, 1);
        let text = match cond {
            FcmpCond::False => "vmov.i32 q0, #0".to_string(),
            FcmpCond::True => "vmov.i8 q0, #255".to_string(),
            FcmpCond::Oeq => "vceq.f32 q0, q0, q1".to_string(),
            FcmpCond::Ogt => "vcgt.f32 q0, q0, q1".to_string(),
            FcmpCond::Oge => "vcge.f32 q0, q0, q1".to_string(),
            FcmpCond::Olt => "vcgt.f32 q0, q1, q0".to_string(),
            FcmpCond::Ole => "vcge.f32 q0, q1, q0".to_string(),
            FcmpCond::Une => "vceq.f32 q0, q0, q1\n\tvmvn q0, q0".to_string(),
            FcmpCond::One => {
                "vcgt.f32 q2, q0, q1\n\tvcgt.f32 q3, q1, q0\n\tvorr q0, q2, q3".to_string()
            }
            FcmpCond::Ord => {
                "vceq.f32 q2, q0, q0\n\tvceq.f32 q3, q1, q1\n\tvand q0, q2, q3".to_string()
            }
            FcmpCond::Uno => {
                "vceq.f32 q2, q0, q0\n\tvceq.f32 q3, q1, q1\n\tvand q2, q2, q3\n\tvmvn q0, q2"
                    .to_string()
            }
            FcmpCond::Ueq => {
                "vcgt.f32 q2, q0, q1\n\tvcgt.f32 q3, q1, q0\n\tvorr q2, q2, q3\n\tvmvn q0, q2"
                    .to_string()
            }
            FcmpCond::Ugt => {
                "vcge.f32 q2, q1, q0\n\tvmvn q0, q2".to_string()
            }
            FcmpCond::Uge => {
                "vcgt.f32 q2, q1, q0\n\tvmvn q0, q2".to_string()
            }
            FcmpCond::Ult => {
                "vcge.f32 q2, q0, q1\n\tvmvn q0, q2".to_string()
            }
            FcmpCond::Ule => {
                "vcgt.f32 q2, q0, q1\n\tvmvn q0, q2".to_string()
            }
        };
        self.text(text);
        self.store_vector(dest, 0);
    }

    fn lower_select(&mut self, dest: VarId, cond: Operand, then_val: Operand, else_val: Operand) {
        let ty = self.cfg.var_type(dest);
        if ty.is_vector() {
            self.load_vector(cond, 0);
            self.load_vector(then_val, 1);
            self.load_vector(else_val, 2);
            self.text("vbsl q0, q1, q2".to_string());
            self.store_vector(dest, 0);
            return;
        }
        match class_of(ty) {
            Class::Core => {
                self.load_core(else_val, Reg::R0);
                self.load_core(then_val, Reg::R1);
                self.load_core(cond, Reg::R2);
                self.push(Arm32Inst::Tst {
                    pred: Cond::Al,
                    src0: Reg::R2,
                    src1: FlexOp2::imm(1).unwrap_or(FlexOp2::reg(Reg::R2)),
                });
                self.push(Arm32Inst::MovReg {
                    pred: Cond::Ne,
                    dest: Reg::R0,
                    src: FlexOp2::reg(Reg::R1),
                });
                self.store_core(dest, Reg::R0);
            }
            Class::Pair => {
                self.load_pair(else_val, Reg::R0, Reg::R1);
                self.load_pair(then_val, Reg::R2, Reg::R3);
                self.load_core(cond, Reg::IP);
                self.push(Arm32Inst::Tst {
                    pred: Cond::Al,
                    src0: Reg::IP,
                    src1: FlexOp2::imm(1).unwrap_or(FlexOp2::reg(Reg::IP)),
                });
                self.push(Arm32Inst::MovReg {
                    pred: Cond::Ne,
                    dest: Reg::R0,
                    src: FlexOp2::reg(Reg::R2),
                });
                self.push(Arm32Inst::MovReg {
                    pred: Cond::Ne,
                    dest: Reg::R1,
                    src: FlexOp2::reg(Reg::R3),
                });
                self.store_pair(dest, Reg::R0, Reg::R1);
            }
            Class::SingleFp | Class::DoubleFp => {
                let double = ty == Type::F64;
                let (v0, v1) = if double {
                    (VfpReg::D(0), VfpReg::D(1))
                } else {
                    (VfpReg::S(0), VfpReg::S(1))
                };
                if double {
                    self.load_double(else_val, v0);
                    self.load_double(then_val, v1);
                } else {
                    self.load_single(else_val, v0);
                    self.load_single(then_val, v1);
                }
                self.load_core(cond, Reg::R0);
                self.push(Arm32Inst::Tst {
                    pred: Cond::Al,
                    src0: Reg::R0,
                    src1: FlexOp2::imm(1).unwrap_or(FlexOp2::reg(Reg::R0)),
                });
                self.push(Arm32Inst::VMovVV { pred: Cond::Ne, dest: v0, src: v1 });
                if double {
                    self.store_double(dest, v0);
                } else {
                    self.store_single(dest, v0);
                }
            }
            Class::Vector => unreachable!(),
        }
    }

    // ---- vector element access -----------------------------------------

    /// Bits per NEON lane. Boolean vectors are in lane-mask form, so the lane
    /// width comes from the element count, not the element type.
    fn lane_bits(ty: Type) -> i64 {
        128 / ty.num_elements() as i64
    }

    fn lane_ref(ty: Type, lane: i64) -> String {
        let lanes_per_d = 64 / Self::lane_bits(ty);
        format!("d{}[{}]", lane / lanes_per_d, lane % lanes_per_d)
    }

    fn lower_extract_element(&mut self, dest: VarId, vec: Operand, index: Operand) {
        let vec_ty = self.operand_type(vec);
        let lane = match index {
            Operand::Const(c) => match *self.cfg.constant(c) {
                Constant::Integer { value, .. } => value,
                _ => 0,
            },
            _ => 0,
        };
        self.load_vector(vec, 0);
        let elem = vec_ty.element_type();
        let mov_suffix = match Self::lane_bits(vec_ty) {
            8 => ".u8",
            16 => ".u16",
            _ => ".32",
        };
        self.text(format!("vmov{mov_suffix} r0, {}", Self::lane_ref(vec_ty, lane)));
        if elem == Type::I1 {
            self.normalize_narrow(Reg::R0, Type::I1);
        }
        // Float elements travel through the core register with the same bits.
        self.store_core(dest, Reg::R0);
    }

    fn lower_insert_element(&mut self, dest: VarId, vec: Operand, elt: Operand, index: Operand) {
        let vec_ty = self.operand_type(vec);
        let lane = match index {
            Operand::Const(c) => match *self.cfg.constant(c) {
                Constant::Integer { value, .. } => value,
                _ => 0,
            },
            _ => 0,
        };
        self.load_vector(vec, 0);
        match self.operand_type(elt) {
            Type::F32 => {
                // Move the float bits through a core register.
                self.load_single(elt, VfpReg::S(8));
                self.push(Arm32Inst::VMovRS { pred: Cond::Al, dest: Reg::R0, src: VfpReg::S(8) });
            }
            Type::I1 => {
                self.load_core(elt, Reg::R0);
                // Lane-mask form: expand the bit to all-ones.
                self.push(Arm32Inst::DataOp {
                    op: DataOp::Rsb,
                    pred: Cond::Al,
                    set_flags: false,
                    dest: Reg::R0,
                    src0: Reg::R0,
                    src1: FlexOp2::imm(0).unwrap_or(FlexOp2::reg(Reg::R0)),
                });
            }
            _ => self.load_core(elt, Reg::R0),
        }
        let mov_suffix = match Self::lane_bits(vec_ty) {
            8 => ".8",
            16 => ".16",
            _ => ".32",
        };
        self.text(format!("vmov{mov_suffix} {}, r0", Self::lane_ref(vec_ty, lane)));
        self.store_vector(dest, 0);
    }

    // ---- control flow --------------------------------------------------

    fn lower_switch(&mut self, ty: Type, cond: Operand, default: BlockId, cases: &[(i64, BlockId)]) {
        let width = ty.scalar_int_width();
        if ty == Type::I64 {
            self.load_pair(cond, Reg::R0, Reg::R1);
            for &(value, label) in cases {
                let lo = value as u32;
                let hi = (value >> 32) as u32;
                self.cmp_imm(Reg::R0, lo, Cond::Al);
                self.cmp_imm(Reg::R1, hi, Cond::Eq);
                self.push(Arm32Inst::Br {
                    pred: Cond::Eq,
                    target_true: Some(label),
                    target_false: None,
                });
            }
        } else {
            self.load_core(cond, Reg::R0);
            for &(value, label) in cases {
                // Compare against the zero-extended canonical form.
                let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
                self.cmp_imm(Reg::R0, value as u32 & mask, Cond::Al);
                self.push(Arm32Inst::Br {
                    pred: Cond::Eq,
                    target_true: Some(label),
                    target_false: None,
                });
            }
        }
        self.push(Arm32Inst::Br { pred: Cond::Al, target_true: None, target_false: Some(default) });
    }

    fn cmp_imm(&mut self, reg: Reg, value: u32, pred: Cond) {
        if let Some(imm) = FlexImm::from_value(value) {
            self.push(Arm32Inst::Cmp { pred, src0: reg, src1: FlexOp2::Imm(imm) });
            return;
        }
        self.mov_imm32(Reg::IP, value);
        self.push(Arm32Inst::Cmp { pred, src0: reg, src1: FlexOp2::reg(Reg::IP) });
    }

    fn lower_ret(&mut self, value: Option<Operand>) {
        if let Some(value) = value {
            match class_of(self.operand_type(value)) {
                Class::Core => self.load_core(value, Reg::R0),
                Class::Pair => self.load_pair(value, Reg::R0, Reg::R1),
                Class::SingleFp => self.load_single(value, VfpReg::S(0)),
                Class::DoubleFp => self.load_double(value, VfpReg::D(0)),
                Class::Vector => self.load_vector(value, 0),
            }
        }
        self.emit_epilogue();
    }

    // ---- memory --------------------------------------------------------

    fn lower_load(&mut self, dest: VarId, ty: Type, addr: Operand) {
        self.load_core(addr, Reg::R2);
        match class_of(ty) {
            Class::Core => {
                let mem = MemOperand::base_offset(ty, Reg::R2, 0);
                self.push(Arm32Inst::Ldr { pred: Cond::Al, sign_extend: false, dest: Reg::R0, mem });
                self.store_core(dest, Reg::R0);
            }
            Class::Pair => {
                let mem = MemOperand::base_offset(Type::I32, Reg::R2, 0);
                self.push(Arm32Inst::Ldr { pred: Cond::Al, sign_extend: false, dest: Reg::R0, mem });
                let mem = MemOperand::base_offset(Type::I32, Reg::R2, 4);
                self.push(Arm32Inst::Ldr { pred: Cond::Al, sign_extend: false, dest: Reg::R1, mem });
                self.store_pair(dest, Reg::R0, Reg::R1);
            }
            Class::SingleFp => {
                let mem = MemOperand::base_offset(ty, Reg::R2, 0);
                self.push(Arm32Inst::Vldr { pred: Cond::Al, dest: VfpReg::S(0), mem });
                self.store_single(dest, VfpReg::S(0));
            }
            Class::DoubleFp => {
                let mem = MemOperand::base_offset(ty, Reg::R2, 0);
                self.push(Arm32Inst::Vldr { pred: Cond::Al, dest: VfpReg::D(0), mem });
                self.store_double(dest, VfpReg::D(0));
            }
            Class::Vector => {
                self.text("vld1.64 {d0, d1}, [r2]".to_string());
                self.store_vector(dest, 0);
            }
        }
    }

    fn lower_store(&mut self, value: Operand, addr: Operand) {
        let ty = self.operand_type(value);
        self.load_core(addr, Reg::R2);
        match class_of(ty) {
            Class::Core => {
                self.load_core(value, Reg::R0);
                let mem = MemOperand::base_offset(ty, Reg::R2, 0);
                self.push(Arm32Inst::Str { pred: Cond::Al, src: Reg::R0, mem });
            }
            Class::Pair => {
                self.load_pair(value, Reg::R0, Reg::R1);
                let mem = MemOperand::base_offset(Type::I32, Reg::R2, 0);
                self.push(Arm32Inst::Str { pred: Cond::Al, src: Reg::R0, mem });
                let mem = MemOperand::base_offset(Type::I32, Reg::R2, 4);
                self.push(Arm32Inst::Str { pred: Cond::Al, src: Reg::R1, mem });
            }
            Class::SingleFp => {
                self.load_single(value, VfpReg::S(0));
                let mem = MemOperand::base_offset(ty, Reg::R2, 0);
                self.push(Arm32Inst::Vstr { pred: Cond::Al, src: VfpReg::S(0), mem });
            }
            Class::DoubleFp => {
                self.load_double(value, VfpReg::D(0));
                let mem = MemOperand::base_offset(ty, Reg::R2, 0);
                self.push(Arm32Inst::Vstr { pred: Cond::Al, src: VfpReg::D(0), mem });
            }
            Class::Vector => {
                self.load_vector(value, 0);
                self.text("vst1.64 {d0, d1}, [r2]".to_string());
            }
        }
    }

    // ---- calls ---------------------------------------------------------

    fn lower_call(&mut self, dest: Option<VarId>, callee: Callee, args: &[Operand]) {
        // Assign argument locations first so the stack adjustment is known.
        let mut assigner = AapcsAssigner::default();
        let locs: Vec<ArgLoc> = args.iter().map(|&a| assigner.assign(self.operand_type(a))).collect();
        let stack_bytes = (assigner.stack_bytes + 7) & -8;
        self.adjust_sp(-stack_bytes);
        // Stack arguments first; they are free to use every scratch register.
        for (&arg, &loc) in args.iter().zip(&locs) {
            if let ArgLoc::Stack(offset) = loc {
                match class_of(self.operand_type(arg)) {
                    Class::Core => {
                        self.load_core(arg, Reg::R0);
                        self.store_sp_word(Reg::R0, offset);
                    }
                    Class::Pair => {
                        self.load_pair(arg, Reg::R0, Reg::R1);
                        self.store_sp_word(Reg::R0, offset);
                        self.store_sp_word(Reg::R1, offset + 4);
                    }
                    Class::SingleFp => {
                        self.load_core(arg, Reg::R0);
                        self.store_sp_word(Reg::R0, offset);
                    }
                    Class::DoubleFp | Class::Vector => {
                        let words = slot_size(self.operand_type(arg)) / 4;
                        for word in 0..words {
                            if let Operand::Var(var) = arg {
                                self.load_word(Reg::R0, self.slots[var as usize] + word * 4);
                            } else {
                                let values = self.constant_words(arg).unwrap_or_default();
                                self.mov_imm32(
                                    Reg::R0,
                                    values.get(word as usize).copied().unwrap_or(0),
                                );
                            }
                            self.store_sp_word(Reg::R0, offset + word * 4);
                        }
                    }
                }
            }
        }
        // Register arguments; loads touch only their target and ip/lr.
        for (&arg, &loc) in args.iter().zip(&locs) {
            match loc {
                ArgLoc::Core(reg) => self.load_core(arg, Reg(reg)),
                ArgLoc::CorePair(reg) => self.load_pair(arg, Reg(reg), Reg(reg + 1)),
                ArgLoc::S(reg) => self.load_single(arg, VfpReg::S(reg)),
                ArgLoc::D(reg) => self.load_double(arg, VfpReg::D(reg)),
                ArgLoc::Q(reg) => self.load_vector(arg, reg),
                ArgLoc::Stack(_) => {}
            }
        }
        match callee {
            Callee::Direct(id) => {
                let (name, _) = self.symbol_ref(id);
                self.push(Arm32Inst::Call { target: CallTarget::Direct(name) });
            }
            Callee::Indirect(op) => {
                self.load_core(op, Reg::IP);
                self.push(Arm32Inst::Call { target: CallTarget::Indirect(Reg::IP) });
            }
        }
        self.adjust_sp(stack_bytes);
        if let Some(dest) = dest {
            match class_of(self.cfg.var_type(dest)) {
                Class::Core => self.store_core(dest, Reg::R0),
                Class::Pair => self.store_pair(dest, Reg::R0, Reg::R1),
                Class::SingleFp => self.store_single(dest, VfpReg::S(0)),
                Class::DoubleFp => self.store_double(dest, VfpReg::D(0)),
                Class::Vector => self.store_vector(dest, 0),
            }
        }
    }

    fn store_sp_word(&mut self, src: Reg, offset: i32) {
        let mem = MemOperand::base_offset(Type::I32, Reg::SP, offset);
        self.push(Arm32Inst::Str { pred: Cond::Al, src, mem });
    }

    fn lower_intrinsic(&mut self, dest: Option<VarId>, intrinsic: u32, args: &[Operand]) {
        let name = self.intrinsics.info(intrinsic).name;
        match name {
            "memcpy.p0i8.p0i8.i32" | "memmove.p0i8.p0i8.i32" | "memset.p0i8.i32" => {
                // Drop the align and isvolatile arguments and call libc.
                for (index, &arg) in args.iter().take(3).enumerate() {
                    self.load_core(arg, Reg(index as u8));
                }
                let callee = match name {
                    "memcpy.p0i8.p0i8.i32" => "memcpy",
                    "memmove.p0i8.p0i8.i32" => "memmove",
                    _ => "memset",
                };
                self.call_runtime(callee);
            }
            "nacl.read.tp" => {
                self.text("mrc p15, 0, r0, c13, c0, 3".to_string());
                if let Some(dest) = dest {
                    self.store_core(dest, Reg::R0);
                }
            }
            "nacl.setjmp" => {
                if let Some(&arg) = args.first() {
                    self.load_core(arg, Reg::R0);
                }
                self.call_runtime("setjmp");
                if let Some(dest) = dest {
                    self.store_core(dest, Reg::R0);
                }
            }
            "nacl.longjmp" => {
                for (index, &arg) in args.iter().take(2).enumerate() {
                    self.load_core(arg, Reg(index as u8));
                }
                self.call_runtime("longjmp");
            }
            "trap" => self.push(Arm32Inst::Trap),
            "stacksave" => {
                self.push(Arm32Inst::MovReg {
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src: FlexOp2::reg(Reg::SP),
                });
                if let Some(dest) = dest {
                    self.store_core(dest, Reg::R0);
                }
            }
            "stackrestore" => {
                if let Some(&arg) = args.first() {
                    self.load_core(arg, Reg::R0);
                    self.push(Arm32Inst::MovReg {
                        pred: Cond::Al,
                        dest: Reg::SP,
                        src: FlexOp2::reg(Reg::R0),
                    });
                }
            }
            "sqrt.f32" | "fabs.f32" => {
                let op = if name.starts_with("sqrt") { VfpUnaryOp::Vsqrt } else { VfpUnaryOp::Vabs };
                if let Some(&arg) = args.first() {
                    self.load_single(arg, VfpReg::S(0));
                }
                self.push(Arm32Inst::VUnary {
                    op,
                    pred: Cond::Al,
                    dest: VfpReg::S(0),
                    src: VfpReg::S(0),
                });
                if let Some(dest) = dest {
                    self.store_single(dest, VfpReg::S(0));
                }
            }
            "sqrt.f64" | "fabs.f64" => {
                let op = if name.starts_with("sqrt") { VfpUnaryOp::Vsqrt } else { VfpUnaryOp::Vabs };
                if let Some(&arg) = args.first() {
                    self.load_double(arg, VfpReg::D(0));
                }
                self.push(Arm32Inst::VUnary {
                    op,
                    pred: Cond::Al,
                    dest: VfpReg::D(0),
                    src: VfpReg::D(0),
                });
                if let Some(dest) = dest {
                    self.store_double(dest, VfpReg::D(0));
                }
            }
            "ctlz.i32" => {
                if let Some(&arg) = args.first() {
                    self.load_core(arg, Reg::R0);
                }
                self.push(Arm32Inst::Clz { pred: Cond::Al, dest: Reg::R0, src: Reg::R0 });
                if let Some(dest) = dest {
                    self.store_core(dest, Reg::R0);
                }
            }
            "cttz.i32" => {
                if let Some(&arg) = args.first() {
                    self.load_core(arg, Reg::R0);
                }
                self.text("rbit r0, r0".to_string());
                self.push(Arm32Inst::Clz { pred: Cond::Al, dest: Reg::R0, src: Reg::R0 });
                if let Some(dest) = dest {
                    self.store_core(dest, Reg::R0);
                }
            }
            "ctpop.i32" => {
                if let Some(&arg) = args.first() {
                    self.load_core(arg, Reg::R0);
                }
                self.call_runtime("__popcountsi2");
                if let Some(dest) = dest {
                    self.store_core(dest, Reg::R0);
                }
            }
            "ctpop.i64" => {
                if let Some(&arg) = args.first() {
                    self.load_pair(arg, Reg::R0, Reg::R1);
                }
                self.call_runtime("__popcountdi2");
                self.mov_imm32(Reg::R1, 0);
                if let Some(dest) = dest {
                    self.store_pair(dest, Reg::R0, Reg::R1);
                }
            }
            "bswap.i16" => {
                if let Some(&arg) = args.first() {
                    self.load_core(arg, Reg::R0);
                }
                self.push(Arm32Inst::Rev { pred: Cond::Al, dest: Reg::R0, src: Reg::R0 });
                self.push(Arm32Inst::Shift {
                    kind: ShiftKind::Lsr,
                    pred: Cond::Al,
                    dest: Reg::R0,
                    src: Reg::R0,
                    amount: ShiftAmount::Imm(16),
                });
                if let Some(dest) = dest {
                    self.store_core(dest, Reg::R0);
                }
            }
            "bswap.i32" => {
                if let Some(&arg) = args.first() {
                    self.load_core(arg, Reg::R0);
                }
                self.push(Arm32Inst::Rev { pred: Cond::Al, dest: Reg::R0, src: Reg::R0 });
                if let Some(dest) = dest {
                    self.store_core(dest, Reg::R0);
                }
            }
            "bswap.i64" => {
                if let Some(&arg) = args.first() {
                    self.load_pair(arg, Reg::R0, Reg::R1);
                }
                self.push(Arm32Inst::Rev { pred: Cond::Al, dest: Reg::R2, src: Reg::R0 });
                self.push(Arm32Inst::Rev { pred: Cond::Al, dest: Reg::R0, src: Reg::R1 });
                self.push(Arm32Inst::MovReg {
                    pred: Cond::Al,
                    dest: Reg::R1,
                    src: FlexOp2::reg(Reg::R2),
                });
                if let Some(dest) = dest {
                    self.store_pair(dest, Reg::R0, Reg::R1);
                }
            }
            other => self.unimplemented(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aapcs_core_assignment() {
        let mut assigner = AapcsAssigner::default();
        assert_eq!(assigner.assign(Type::I32), ArgLoc::Core(0));
        assert_eq!(assigner.assign(Type::I32), ArgLoc::Core(1));
        // The i64 pair aligns to an even register.
        assert_eq!(assigner.assign(Type::I64), ArgLoc::CorePair(2));
        assert_eq!(assigner.assign(Type::I32), ArgLoc::Stack(0));
        assert_eq!(assigner.assign(Type::I64), ArgLoc::Stack(8));
    }

    #[test]
    fn test_aapcs_vfp_assignment() {
        let mut assigner = AapcsAssigner::default();
        assert_eq!(assigner.assign(Type::F32), ArgLoc::S(0));
        assert_eq!(assigner.assign(Type::F64), ArgLoc::D(1));
        assert_eq!(assigner.assign(Type::F32), ArgLoc::S(4));
        // Core and VFP pools are independent.
        assert_eq!(assigner.assign(Type::I32), ArgLoc::Core(0));
    }

    #[test]
    fn test_slot_sizes() {
        assert_eq!(slot_size(Type::I1), 4);
        assert_eq!(slot_size(Type::I8), 4);
        assert_eq!(slot_size(Type::I64), 8);
        assert_eq!(slot_size(Type::F64), 8);
        assert_eq!(slot_size(Type::V16I8), 16);
        // Boolean vectors take lane-mask form.
        assert_eq!(slot_size(Type::V4I1), 16);
    }
}
