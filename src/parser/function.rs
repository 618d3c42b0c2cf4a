// Function block parser: builds one CFG from instruction records. Block 0 is
// pre-created and receives the function arguments; DECLAREBLOCKS installs the
// remaining blocks. A flat per-function value ID space covers globals first,
// then arguments and value-producing instructions; operand references in
// records are relative to the next instruction index. Forward references
// reserve slots via FORWARDTYPEREF and are merged when the defining
// instruction arrives. Nested constants and symbol table blocks are handled
// here too since they share the value ID space.

//! Function block parser (IR builder).

use crate::bitstream::abi::{binop, block, castop, cst_code, fcmp, func_code, icmp};
use crate::bitstream::{decode_sign_rotated, Cursor, Event, Record};
use crate::context::RelocSymbol;
use crate::error::{TranslateError, TranslateResult};
use crate::intrinsics::{CallCheck, IntrinsicRegistry, INTRINSIC_PREFIX};
use crate::ir::{
    ArithOp, Callee, CastOp, Cfg, Constant, FcmpCond, GlobalId, IcmpCond, Inst, Operand, Type,
    VarId,
};

use super::symtab::{self, Entry};
use super::tables::{GlobalTable, Linkage, TypeTable};
use super::{extract_alignment, BlockCtx};

/// Parse one function block, returning the finished CFG. The caller decides
/// whether to hand it to the lowering sink.
pub(crate) fn parse_function_block<C: Cursor>(
    cursor: &mut C,
    module_bc: &BlockCtx<'_>,
    types: &TypeTable,
    globals: &GlobalTable,
    intrinsics: &IntrinsicRegistry,
    decl_id: GlobalId,
) -> TranslateResult<Cfg> {
    let bc = module_bc.with_block("function");
    let mut parser = FunctionParser::new(bc, types, globals, intrinsics, decl_id);
    loop {
        match cursor.next_event()? {
            Some(Event::Record(rec)) => parser.process_record(&rec)?,
            Some(Event::Enter { block_id }) => match block_id {
                block::CONSTANTS => parser.parse_constants_block(cursor)?,
                block::VALUE_SYMTAB => parser.parse_symtab_block(cursor)?,
                other => {
                    parser.bc.error(0, format!("Don't know how to parse block id: {other}"))?;
                    cursor.skip_block()?;
                }
            },
            Some(Event::Exit) => return parser.exit_block(),
            None => {
                return Err(TranslateError::Fatal(
                    "bitstream ended inside function block".to_string(),
                ))
            }
        }
    }
}

struct FunctionParser<'m> {
    bc: BlockCtx<'m>,
    types: &'m TypeTable,
    globals: &'m GlobalTable,
    intrinsics: &'m IntrinsicRegistry,
    cfg: Cfg,
    /// Size of the global partition of the value ID space.
    num_globals: u32,
    /// Local value slots, indexed by `absolute id - num_globals`. `None`
    /// marks a reserved-but-undefined forward reference.
    locals: Vec<Option<Operand>>,
    /// Absolute ID the next value-producing instruction will define.
    next_local: u32,
    /// Index of the basic block receiving instructions.
    cur_block: u32,
    /// Set by terminators; the next instruction record opens the next block.
    terminated: bool,
    blocks_declared: bool,
}

impl<'m> FunctionParser<'m> {
    fn new(
        bc: BlockCtx<'m>,
        types: &'m TypeTable,
        globals: &'m GlobalTable,
        intrinsics: &'m IntrinsicRegistry,
        decl_id: GlobalId,
    ) -> Self {
        let decl = &globals.functions[decl_id as usize];
        let mut cfg = Cfg::new(decl.name.clone(), decl.sig.ret);
        cfg.internal = decl.linkage == Linkage::Internal;
        let num_globals = globals.num_global_ids();
        let mut parser = Self {
            bc,
            types,
            globals,
            intrinsics,
            cfg,
            num_globals,
            locals: Vec::new(),
            next_local: num_globals,
            cur_block: 0,
            terminated: false,
            blocks_declared: false,
        };
        for &arg_type in &decl.sig.args.clone() {
            let var = parser.cfg.make_variable(arg_type);
            parser.cfg.args.push(var);
            parser.locals.push(Some(Operand::Var(var)));
            parser.next_local += 1;
        }
        parser
    }

    // ---- value ID space ------------------------------------------------

    /// Store `op` at an absolute value index, growing the slot vector for
    /// forward references. Redefinition with a different operand is an error.
    fn set_operand(&mut self, index: u32, op: Operand, bit: u64) -> TranslateResult<()> {
        let local = (index - self.num_globals) as usize;
        if local == self.locals.len() {
            self.locals.push(Some(op));
            return Ok(());
        }
        if local > self.locals.len() {
            self.locals.resize(local + 1, None);
        }
        match self.locals[local] {
            None => {
                self.locals[local] = Some(op);
                Ok(())
            }
            Some(old) if old == op => Ok(()),
            Some(_) => {
                self.bc.error(bit, format!("Multiple definitions for index {index}"))?;
                self.locals[local] = Some(op);
                Ok(())
            }
        }
    }

    /// Resolve an absolute value index. Global IDs intern their relocatable
    /// symbol on first use; the lowering reads the interned entry back when
    /// it emits the reference. An undefined local slot aborts translation;
    /// the value ID space would be corrupt past this point.
    fn get_operand(&mut self, index: u32, bit: u64) -> TranslateResult<Operand> {
        if index < self.num_globals {
            let globals = self.globals;
            self.bc.context().constant_symbol(index, || RelocSymbol {
                offset: 0,
                name: globals.name(index).unwrap_or("").to_string(),
                suppress_mangling: globals.suppress_mangling(index),
            });
            return Ok(Operand::Global(index));
        }
        let local = (index - self.num_globals) as usize;
        match self.locals.get(local) {
            Some(Some(op)) => Ok(*op),
            _ => {
                let bits = bit / 8;
                Err(TranslateError::Fatal(format!(
                    "({bits}:{}) Value index {index} not defined!",
                    bit % 8
                )))
            }
        }
    }

    /// Convert a relative reference to an absolute index. References must not
    /// exceed the next instruction index; the recovery value is index 0.
    fn relative_to_absolute(&mut self, rel: u64, bit: u64) -> TranslateResult<u32> {
        let base = self.next_local as u64;
        if rel > base {
            self.bc.error(
                bit,
                format!("Invalid relative value id: {rel} (must be <= {base})"),
            )?;
            return Ok(0);
        }
        Ok((base - rel) as u32)
    }

    fn get_relative(&mut self, rel: u64, bit: u64) -> TranslateResult<Operand> {
        let index = self.relative_to_absolute(rel, bit)?;
        self.get_operand(index, bit)
    }

    /// Signed variant used by phi records, where sign-rotated encoding allows
    /// references to values defined later in the stream.
    fn get_relative_signed(&mut self, rel: i64, bit: u64) -> TranslateResult<Operand> {
        let base = self.next_local as i64;
        let index = base - rel;
        if index < 0 || index > u32::MAX as i64 {
            self.bc.error(
                bit,
                format!("Invalid relative value id: {rel} (must be <= {base})"),
            )?;
            return self.get_operand(0, bit);
        }
        self.get_operand(index as u32, bit)
    }

    fn create_inst_var(&mut self, ty: Type, bit: u64) -> TranslateResult<VarId> {
        let ty = if ty == Type::Void {
            self.bc.error(bit, "Can't define instruction value using type void")?;
            Type::I32
        } else {
            ty
        };
        Ok(self.cfg.make_variable(ty))
    }

    /// Variable for the next value-producing instruction. A slot reserved by
    /// a forward type reference is reused when the type matches.
    fn next_inst_var(&mut self, ty: Type, bit: u64) -> TranslateResult<VarId> {
        let local = (self.next_local - self.num_globals) as usize;
        if let Some(Some(op)) = self.locals.get(local) {
            if let Operand::Var(var) = *op {
                if self.cfg.var_type(var) == ty {
                    self.next_local += 1;
                    return Ok(var);
                }
            }
            self.bc.error(
                bit,
                format!("Illegal forward referenced instruction ({})", self.next_local),
            )?;
            self.next_local += 1;
            return self.create_inst_var(ty, bit);
        }
        let var = self.create_inst_var(ty, bit)?;
        let index = self.next_local;
        self.set_operand(index, Operand::Var(var), bit)?;
        self.next_local += 1;
        Ok(var)
    }

    /// Install a `dest = dest` placeholder so later value IDs stay aligned
    /// after a diagnosed instruction. Void-typed instructions define no value
    /// and need no placeholder.
    fn append_error_placeholder(&mut self, ty: Type, bit: u64) -> TranslateResult<()> {
        if ty == Type::Void {
            return Ok(());
        }
        let var = self.next_inst_var(ty, bit)?;
        self.append(Inst::Assign { dest: var, src: Operand::Var(var) });
        Ok(())
    }

    // ---- blocks --------------------------------------------------------

    fn append(&mut self, inst: Inst) {
        self.cfg.blocks[self.cur_block as usize].insts.push(inst);
    }

    fn operand_type(&self, op: Operand) -> Type {
        self.cfg.operand_type(op)
    }

    /// Block lookup for phi arguments: any declared block is acceptable.
    fn get_basic_block(&mut self, index: u64, bit: u64) -> TranslateResult<u32> {
        let count = self.cfg.blocks.len() as u64;
        if index >= count {
            self.bc.error(
                bit,
                format!("Reference to basic block {index} not found. Must be less than {count}"),
            )?;
            return Ok(0);
        }
        Ok(index as u32)
    }

    /// Block lookup for branch targets: the entry block is never a legal
    /// target.
    fn get_branch_block(&mut self, index: u64, bit: u64) -> TranslateResult<u32> {
        if index == 0 {
            self.bc.error(bit, "Branch to entry block not allowed")?;
        }
        self.get_basic_block(index, bit)
    }

    fn get_type(&mut self, id: u64, bit: u64) -> TranslateResult<Type> {
        match self.types.get_simple(id) {
            Ok(ty) => Ok(ty),
            Err(message) => {
                self.bc.error(bit, message)?;
                Ok(Type::Void)
            }
        }
    }

    // ---- record dispatch -----------------------------------------------

    fn process_record(&mut self, rec: &Record) -> TranslateResult<()> {
        if self.terminated {
            self.terminated = false;
            let next = self.cur_block as u64 + 1;
            self.cur_block = self.get_basic_block(next, rec.bit_offset)?;
        }
        match rec.code {
            func_code::DECLAREBLOCKS => self.process_declare_blocks(rec),
            func_code::INST_BINOP => self.process_binop(rec),
            func_code::INST_CAST => self.process_cast(rec),
            func_code::INST_VSELECT => self.process_select(rec),
            func_code::INST_EXTRACTELT => self.process_extract_element(rec),
            func_code::INST_INSERTELT => self.process_insert_element(rec),
            func_code::INST_CMP2 => self.process_cmp2(rec),
            func_code::INST_RET => self.process_ret(rec),
            func_code::INST_BR => self.process_br(rec),
            func_code::INST_SWITCH => self.process_switch(rec),
            func_code::INST_UNREACHABLE => self.process_unreachable(rec),
            func_code::INST_PHI => self.process_phi(rec),
            func_code::INST_ALLOCA => self.process_alloca(rec),
            func_code::INST_LOAD => self.process_load(rec),
            func_code::INST_STORE => self.process_store(rec),
            func_code::INST_CALL | func_code::INST_CALL_INDIRECT => self.process_call(rec),
            func_code::INST_FORWARDTYPEREF => self.process_forward_type_ref(rec),
            _ => self.bc.unknown_record(rec),
        }
    }

    fn process_declare_blocks(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 1, "count")? {
            return Ok(());
        }
        let mut count = rec.values[0];
        if count == 0 {
            self.bc
                .error(rec.bit_offset, "Functions must contain at least one basic block.")?;
            count = 1;
        }
        if self.blocks_declared || self.cfg.blocks.len() != 1 {
            return self.bc.error(rec.bit_offset, "Duplicate function block count record");
        }
        self.blocks_declared = true;
        // Block 0 already exists as the entry.
        for _ in 1..count {
            self.cfg.make_block();
        }
        Ok(())
    }

    fn process_binop(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 3, "binop")? {
            return Ok(());
        }
        let a = self.get_relative(rec.values[0], rec.bit_offset)?;
        let b = self.get_relative(rec.values[1], rec.bit_offset)?;
        let type_a = self.operand_type(a);
        let type_b = self.operand_type(b);
        if type_a != type_b {
            self.bc.error(
                rec.bit_offset,
                format!("Binop argument types differ: {type_a} and {type_b}"),
            )?;
            return self.append_error_placeholder(type_a, rec.bit_offset);
        }
        let op = match self.convert_binop(rec, rec.values[2], type_a)? {
            Some(op) => op,
            None => return self.append_error_placeholder(type_a, rec.bit_offset),
        };
        let dest = self.next_inst_var(type_a, rec.bit_offset)?;
        self.append(Inst::Arith { op, dest, a, b });
        Ok(())
    }

    /// Map a binop record code to an operator, selecting the integer or float
    /// family from the operand type and checking the family is legal for it.
    fn convert_binop(
        &mut self,
        rec: &Record,
        code: u64,
        ty: Type,
    ) -> TranslateResult<Option<ArithOp>> {
        let is_int = ty.is_integer();
        let op = match code {
            binop::ADD => {
                if is_int {
                    ArithOp::Add
                } else {
                    ArithOp::Fadd
                }
            }
            binop::SUB => {
                if is_int {
                    ArithOp::Sub
                } else {
                    ArithOp::Fsub
                }
            }
            binop::MUL => {
                if is_int {
                    ArithOp::Mul
                } else {
                    ArithOp::Fmul
                }
            }
            binop::UDIV => ArithOp::Udiv,
            binop::SDIV => {
                if is_int {
                    ArithOp::Sdiv
                } else {
                    ArithOp::Fdiv
                }
            }
            binop::UREM => ArithOp::Urem,
            binop::SREM => {
                if is_int {
                    ArithOp::Srem
                } else {
                    ArithOp::Frem
                }
            }
            binop::SHL => ArithOp::Shl,
            binop::LSHR => ArithOp::Lshr,
            binop::ASHR => ArithOp::Ashr,
            binop::AND => ArithOp::And,
            binop::OR => ArithOp::Or,
            binop::XOR => ArithOp::Xor,
            _ => {
                self.bc.error(
                    rec.bit_offset,
                    format!("Binary opcode {code} not understood for type {ty}"),
                )?;
                return Ok(None);
            }
        };
        let valid = match op {
            ArithOp::And | ArithOp::Or | ArithOp::Xor => ty.is_integer(),
            ArithOp::Fadd | ArithOp::Fsub | ArithOp::Fmul | ArithOp::Fdiv | ArithOp::Frem => {
                ty.is_floating()
            }
            _ => ty.is_integer_arithmetic(),
        };
        if !valid {
            self.bc.error(
                rec.bit_offset,
                format!("Invalid operator type for {}. Found {ty}", op.name()),
            )?;
            return Ok(None);
        }
        Ok(Some(op))
    }

    fn process_cast(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 3, "cast")? {
            return Ok(());
        }
        let src = self.get_relative(rec.values[0], rec.bit_offset)?;
        let cast_type = self.get_type(rec.values[1], rec.bit_offset)?;
        let src_type = self.operand_type(src);
        let op = match self.convert_cast(rec, rec.values[2], src_type, cast_type)? {
            Some(op) => op,
            None => return self.append_error_placeholder(cast_type, rec.bit_offset),
        };
        let dest = self.next_inst_var(cast_type, rec.bit_offset)?;
        self.append(Inst::Cast { op, dest, src });
        Ok(())
    }

    fn convert_cast(
        &mut self,
        rec: &Record,
        code: u64,
        src: Type,
        dst: Type,
    ) -> TranslateResult<Option<CastOp>> {
        let op = match code {
            castop::TRUNC => CastOp::Trunc,
            castop::ZEXT => CastOp::Zext,
            castop::SEXT => CastOp::Sext,
            castop::FPTOUI => CastOp::Fptoui,
            castop::FPTOSI => CastOp::Fptosi,
            castop::UITOFP => CastOp::Uitofp,
            castop::SITOFP => CastOp::Sitofp,
            castop::FPTRUNC => CastOp::Fptrunc,
            castop::FPEXT => CastOp::Fpext,
            castop::BITCAST => CastOp::Bitcast,
            _ => {
                self.bc.error(rec.bit_offset, format!("Cast opcode {code} not understood."))?;
                return Ok(None);
            }
        };
        let valid = match op {
            CastOp::Trunc => int_trunc_valid(src, dst),
            CastOp::Zext | CastOp::Sext => int_trunc_valid(dst, src),
            CastOp::Fptoui | CastOp::Fptosi => float_to_int_valid(src, dst),
            CastOp::Uitofp | CastOp::Sitofp => float_to_int_valid(dst, src),
            CastOp::Fptrunc => float_trunc_valid(src, dst),
            CastOp::Fpext => float_trunc_valid(dst, src),
            CastOp::Bitcast => src.bitcast_width_in_bits() == dst.bitcast_width_in_bits(),
        };
        if !valid {
            self.bc.error(
                rec.bit_offset,
                format!("Illegal cast: {} {src} to {dst}", op.name()),
            )?;
            return Ok(None);
        }
        Ok(Some(op))
    }

    fn process_select(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 3, "select")? {
            return Ok(());
        }
        let then_val = self.get_relative(rec.values[0], rec.bit_offset)?;
        let else_val = self.get_relative(rec.values[1], rec.bit_offset)?;
        let cond = self.get_relative(rec.values[2], rec.bit_offset)?;
        let then_type = self.operand_type(then_val);
        let else_type = self.operand_type(else_val);
        if then_type != else_type {
            self.bc.error(
                rec.bit_offset,
                format!("Select operands not same type. Found {then_type} and {else_type}"),
            )?;
            return self.append_error_placeholder(then_type, rec.bit_offset);
        }
        let cond_type = self.operand_type(cond);
        if cond_type.is_vector() {
            if !then_type.is_vector()
                || cond_type.element_type() != Type::I1
                || then_type.num_elements() != cond_type.num_elements()
            {
                self.bc.error(
                    rec.bit_offset,
                    format!(
                        "Select condition type {cond_type} not allowed for values of type {then_type}"
                    ),
                )?;
                return self.append_error_placeholder(then_type, rec.bit_offset);
            }
        } else if cond_type != Type::I1 {
            self.bc.error(
                rec.bit_offset,
                format!("Select condition not type i1. Found: {cond_type}"),
            )?;
            return self.append_error_placeholder(then_type, rec.bit_offset);
        }
        let dest = self.next_inst_var(then_type, rec.bit_offset)?;
        self.append(Inst::Select { dest, cond, then_val, else_val });
        Ok(())
    }

    /// Vector index checks for insertelement/extractelement, in fixed order.
    fn validate_vector_index(&self, vec: Operand, index: Operand) -> Result<(), &'static str> {
        let vec_type = self.operand_type(vec);
        if !vec_type.is_vector() {
            return Err("Vector index on non vector");
        }
        let value = match index {
            Operand::Const(c) => match *self.cfg.constant(c) {
                Constant::Integer { value, .. } => value,
                _ => return Err("Vector index not integer constant"),
            },
            _ => return Err("Vector index not integer constant"),
        };
        if value < 0 || value as u64 >= vec_type.num_elements() as u64 {
            return Err("Vector index not in range of vector");
        }
        if self.operand_type(index) != Type::I32 {
            return Err("Vector index not of type i32");
        }
        Ok(())
    }

    fn process_extract_element(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 2, "extract element")? {
            return Ok(());
        }
        let vec = self.get_relative(rec.values[0], rec.bit_offset)?;
        let index = self.get_relative(rec.values[1], rec.bit_offset)?;
        let vec_type = self.operand_type(vec);
        if let Err(check) = self.validate_vector_index(vec, index) {
            self.bc.error(
                rec.bit_offset,
                format!(
                    "{check}: extractelement {vec_type} {}, {} {}",
                    self.cfg.operand_name(vec),
                    self.operand_type(index),
                    self.cfg.operand_name(index)
                ),
            )?;
            return self.append_error_placeholder(vec_type, rec.bit_offset);
        }
        let dest = self.next_inst_var(vec_type.element_type(), rec.bit_offset)?;
        self.append(Inst::ExtractElement { dest, vec, index });
        Ok(())
    }

    fn process_insert_element(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 3, "insert element")? {
            return Ok(());
        }
        let vec = self.get_relative(rec.values[0], rec.bit_offset)?;
        let elt = self.get_relative(rec.values[1], rec.bit_offset)?;
        let index = self.get_relative(rec.values[2], rec.bit_offset)?;
        let vec_type = self.operand_type(vec);
        if let Err(check) = self.validate_vector_index(vec, index) {
            let elt_type = self.operand_type(elt);
            self.bc.error(
                rec.bit_offset,
                format!(
                    "{check}: insertelement {vec_type} {}, {elt_type} {}, {} {}",
                    self.cfg.operand_name(vec),
                    self.cfg.operand_name(elt),
                    self.operand_type(index),
                    self.cfg.operand_name(index)
                ),
            )?;
            return self.append_error_placeholder(elt_type, rec.bit_offset);
        }
        let dest = self.next_inst_var(vec_type, rec.bit_offset)?;
        self.append(Inst::InsertElement { dest, vec, elt, index });
        Ok(())
    }

    fn process_cmp2(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 3, "compare")? {
            return Ok(());
        }
        let a = self.get_relative(rec.values[0], rec.bit_offset)?;
        let mut b = self.get_relative(rec.values[1], rec.bit_offset)?;
        let type_a = self.operand_type(a);
        let type_b = self.operand_type(b);
        let dest_type = type_a.compare_result_type();
        if type_a != type_b {
            self.bc.error(
                rec.bit_offset,
                format!("Compare argument types differ: {type_a} and {type_b}"),
            )?;
            b = a;
        }
        if dest_type == Type::Void {
            return self
                .bc
                .error(rec.bit_offset, format!("Compare not defined for type {type_a}"));
        }
        if type_a.is_integer() {
            let cond = match rec.values[2] {
                icmp::EQ => IcmpCond::Eq,
                icmp::NE => IcmpCond::Ne,
                icmp::UGT => IcmpCond::Ugt,
                icmp::UGE => IcmpCond::Uge,
                icmp::ULT => IcmpCond::Ult,
                icmp::ULE => IcmpCond::Ule,
                icmp::SGT => IcmpCond::Sgt,
                icmp::SGE => IcmpCond::Sge,
                icmp::SLT => IcmpCond::Slt,
                icmp::SLE => IcmpCond::Sle,
                other => {
                    self.bc.error(
                        rec.bit_offset,
                        format!("Compare record contains unknown integer predicate index: {other}"),
                    )?;
                    return self.append_error_placeholder(dest_type, rec.bit_offset);
                }
            };
            let dest = self.next_inst_var(dest_type, rec.bit_offset)?;
            self.append(Inst::Icmp { cond, dest, a, b });
        } else if type_a.is_floating() {
            let cond = match rec.values[2] {
                fcmp::FALSE => FcmpCond::False,
                fcmp::OEQ => FcmpCond::Oeq,
                fcmp::OGT => FcmpCond::Ogt,
                fcmp::OGE => FcmpCond::Oge,
                fcmp::OLT => FcmpCond::Olt,
                fcmp::OLE => FcmpCond::Ole,
                fcmp::ONE => FcmpCond::One,
                fcmp::ORD => FcmpCond::Ord,
                fcmp::UNO => FcmpCond::Uno,
                fcmp::UEQ => FcmpCond::Ueq,
                fcmp::UGT => FcmpCond::Ugt,
                fcmp::UGE => FcmpCond::Uge,
                fcmp::ULT => FcmpCond::Ult,
                fcmp::ULE => FcmpCond::Ule,
                fcmp::UNE => FcmpCond::Une,
                fcmp::TRUE => FcmpCond::True,
                other => {
                    self.bc.error(
                        rec.bit_offset,
                        format!("Compare record contains unknown float predicate index: {other}"),
                    )?;
                    return self.append_error_placeholder(dest_type, rec.bit_offset);
                }
            };
            let dest = self.next_inst_var(dest_type, rec.bit_offset)?;
            self.append(Inst::Fcmp { cond, dest, a, b });
        } else {
            self.bc
                .error(rec.bit_offset, format!("Compare on type not understood: {type_a}"))?;
            return self.append_error_placeholder(dest_type, rec.bit_offset);
        }
        Ok(())
    }

    fn process_ret(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size_in_range(rec, 0, 1, "return")? {
            return Ok(());
        }
        let value = match rec.values.first() {
            Some(&rel) => Some(self.get_relative(rel, rec.bit_offset)?),
            None => None,
        };
        self.append(Inst::Ret { value });
        self.terminated = true;
        Ok(())
    }

    fn process_br(&mut self, rec: &Record) -> TranslateResult<()> {
        if rec.values.len() == 1 {
            let target = self.get_branch_block(rec.values[0], rec.bit_offset)?;
            self.append(Inst::Br { target });
        } else {
            if !self.bc.check_size(rec, 3, "branch")? {
                return Ok(());
            }
            let cond = self.get_relative(rec.values[2], rec.bit_offset)?;
            let cond_type = self.operand_type(cond);
            if cond_type != Type::I1 {
                return self.bc.error(
                    rec.bit_offset,
                    format!("Branch condition not i1. Found: {cond_type}"),
                );
            }
            let then_target = self.get_branch_block(rec.values[0], rec.bit_offset)?;
            let else_target = self.get_branch_block(rec.values[1], rec.bit_offset)?;
            self.append(Inst::CondBr { cond, then_target, else_target });
        }
        self.terminated = true;
        Ok(())
    }

    fn process_switch(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size_at_least(rec, 4, "switch")? {
            return Ok(());
        }
        let cond_type = self.get_type(rec.values[0], rec.bit_offset)?;
        if !cond_type.is_scalar_integer() {
            return self.bc.error(
                rec.bit_offset,
                format!("Case condition must be non-wide integer. Found: {cond_type}"),
            );
        }
        let bit_width = cond_type.scalar_int_width();
        let cond = self.get_relative(rec.values[1], rec.bit_offset)?;
        if self.operand_type(cond) != cond_type {
            return self.bc.error(
                rec.bit_offset,
                format!(
                    "Case condition expects type {cond_type}. Found: {}",
                    self.operand_type(cond)
                ),
            );
        }
        let default = self.get_branch_block(rec.values[2], rec.bit_offset)?;
        let num_cases = rec.values[3];
        let expected = 4u64.saturating_add(num_cases.saturating_mul(4));
        if rec.values.len() as u64 != expected {
            self.bc.check_size(rec, expected.min(usize::MAX as u64) as usize, "switch")?;
            return Ok(());
        }
        let mut cases = Vec::with_capacity(num_cases as usize);
        let mut index = 4usize;
        for _ in 0..num_cases {
            if rec.values[index] != 1 || rec.values[index + 1] != 1 {
                return self.bc.error(
                    rec.bit_offset,
                    format!(
                        "Sequence [1, 1, value, label] expected for case entry in switch record. \
                         (at index {index})"
                    ),
                );
            }
            let value = truncate_to_width(decode_sign_rotated(rec.values[index + 2]), bit_width);
            let label = self.get_branch_block(rec.values[index + 3], rec.bit_offset)?;
            cases.push((value, label));
            index += 4;
        }
        self.append(Inst::Switch { ty: cond_type, cond, default, cases });
        self.terminated = true;
        Ok(())
    }

    fn process_unreachable(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 0, "unreachable")? {
            return Ok(());
        }
        self.append(Inst::Unreachable);
        self.terminated = true;
        Ok(())
    }

    fn process_phi(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size_at_least(rec, 3, "phi")? {
            return Ok(());
        }
        let ty = self.get_type(rec.values[0], rec.bit_offset)?;
        if rec.values.len() % 2 == 0 {
            self.bc.error(
                rec.bit_offset,
                format!("function block phi record size not valid: {}", rec.values.len()),
            )?;
            return self.append_error_placeholder(ty, rec.bit_offset);
        }
        if ty == Type::Void {
            return self.bc.error(rec.bit_offset, "Phi record using type void not allowed");
        }
        let dest = self.next_inst_var(ty, rec.bit_offset)?;
        let mut args = Vec::with_capacity(rec.values.len() / 2);
        let mut index = 1usize;
        while index < rec.values.len() {
            let rel = decode_sign_rotated(rec.values[index]);
            let op = self.get_relative_signed(rel, rec.bit_offset)?;
            let op_type = self.operand_type(op);
            if op_type != ty {
                self.bc.error(
                    rec.bit_offset,
                    format!(
                        "Value {} not type {ty} in phi instruction. Found: {op_type}",
                        self.cfg.operand_name(op)
                    ),
                )?;
                return self.append_error_placeholder(ty, rec.bit_offset);
            }
            let block = self.get_basic_block(rec.values[index + 1], rec.bit_offset)?;
            args.push((op, block));
            index += 2;
        }
        self.append(Inst::Phi { dest, args });
        Ok(())
    }

    fn process_alloca(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 2, "alloca")? {
            return Ok(());
        }
        let byte_count = self.get_relative(rec.values[0], rec.bit_offset)?;
        let align = extract_alignment(&self.bc, "Alloca", rec.values[1], rec.bit_offset)?;
        let pointer = Type::pointer();
        if self.operand_type(byte_count) != Type::I32 {
            self.bc.error(
                rec.bit_offset,
                format!(
                    "Alloca on non-i32 value. Found: {}",
                    self.operand_type(byte_count)
                ),
            )?;
            return self.append_error_placeholder(pointer, rec.bit_offset);
        }
        let dest = self.next_inst_var(pointer, rec.bit_offset)?;
        self.append(Inst::Alloca { dest, byte_count, align });
        Ok(())
    }

    fn check_pointer(&mut self, op: Operand, inst_name: &str, bit: u64) -> TranslateResult<bool> {
        let pointer = Type::pointer();
        if self.operand_type(op) == pointer {
            return Ok(true);
        }
        self.bc.error(
            bit,
            format!(
                "{inst_name} address not {pointer}. Found: {}",
                self.cfg.operand_name(op)
            ),
        )?;
        Ok(false)
    }

    /// Load/store legality: the accessed type must be in the legal set and the
    /// alignment must equal its natural alignment, or 1 for scalars.
    fn check_load_store(
        &mut self,
        ty: Type,
        align: u32,
        inst_name: &str,
        bit: u64,
    ) -> TranslateResult<bool> {
        if !ty.is_load_store_legal() {
            self.bc.error(bit, format!("{inst_name} type not allowed: {ty}*"))?;
            return Ok(false);
        }
        let allowed = align == ty.natural_alignment() || (align == 1 && !ty.is_vector());
        if !allowed {
            self.bc
                .error(bit, format!("{inst_name} {ty}*: not allowed for alignment {align}"))?;
            return Ok(false);
        }
        Ok(true)
    }

    fn process_load(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 3, "load")? {
            return Ok(());
        }
        let addr = self.get_relative(rec.values[0], rec.bit_offset)?;
        let ty = self.get_type(rec.values[2], rec.bit_offset)?;
        let align = extract_alignment(&self.bc, "Load", rec.values[1], rec.bit_offset)?;
        if !self.check_pointer(addr, "Load", rec.bit_offset)? {
            return self.append_error_placeholder(ty, rec.bit_offset);
        }
        if !self.check_load_store(ty, align, "Load", rec.bit_offset)? {
            return self.append_error_placeholder(ty, rec.bit_offset);
        }
        let dest = self.next_inst_var(ty, rec.bit_offset)?;
        self.append(Inst::Load { dest, ty, addr, align });
        Ok(())
    }

    fn process_store(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 3, "store")? {
            return Ok(());
        }
        let addr = self.get_relative(rec.values[0], rec.bit_offset)?;
        let value = self.get_relative(rec.values[1], rec.bit_offset)?;
        let align = extract_alignment(&self.bc, "Store", rec.values[2], rec.bit_offset)?;
        if !self.check_pointer(addr, "Store", rec.bit_offset)? {
            return Ok(());
        }
        let value_type = self.operand_type(value);
        if !self.check_load_store(value_type, align, "Store", rec.bit_offset)? {
            return Ok(());
        }
        self.append(Inst::Store { value, addr, align });
        Ok(())
    }

    fn process_call(&mut self, rec: &Record) -> TranslateResult<()> {
        let is_direct = rec.code == func_code::INST_CALL;
        let params_start = if is_direct {
            if !self.bc.check_size_at_least(rec, 2, "call")? {
                return Ok(());
            }
            2
        } else {
            if !self.bc.check_size_at_least(rec, 3, "call indirect")? {
                return Ok(());
            }
            3
        };

        let mut intrinsic = None;
        let (callee, return_type) = if is_direct {
            let callee_index = self.relative_to_absolute(rec.values[1], rec.bit_offset)?;
            // Resolving the operand interns the callee's relocatable symbol.
            self.get_operand(callee_index, rec.bit_offset)?;
            let decl = match self.globals.function(callee_index) {
                Some(decl) => decl,
                None => {
                    self.bc.error(
                        rec.bit_offset,
                        format!("Function index {callee_index} not a declared function"),
                    )?;
                    match self.globals.function(0) {
                        Some(decl) => decl,
                        None => {
                            return Err(TranslateError::Fatal(
                                "Call without any declared functions".to_string(),
                            ))
                        }
                    }
                }
            };
            let return_type = decl.sig.ret;
            if let Some(suffix) = decl.name.strip_prefix(INTRINSIC_PREFIX) {
                match self.intrinsics.find(suffix) {
                    Some(id) => intrinsic = Some(id),
                    None => {
                        self.bc.error(
                            rec.bit_offset,
                            format!("Invalid PNaCl intrinsic call to {}", decl.name),
                        )?;
                        return self.append_error_placeholder(return_type, rec.bit_offset);
                    }
                }
            }
            (Callee::Direct(callee_index), return_type)
        } else {
            let callee = self.get_relative(rec.values[1], rec.bit_offset)?;
            let return_type = self.get_type(rec.values[2], rec.bit_offset)?;
            (Callee::Indirect(callee), return_type)
        };

        let cc_info = rec.values[0];
        if cc_info >> 1 != 0 {
            self.bc.error(
                rec.bit_offset,
                format!(
                    "Function call calling convention value {} not understood.",
                    cc_info >> 1
                ),
            )?;
            return self.append_error_placeholder(return_type, rec.bit_offset);
        }
        let tail = cc_info & 1 != 0;

        let mut args = Vec::with_capacity(rec.values.len() - params_start);
        for &rel in &rec.values[params_start..] {
            args.push(self.get_relative(rel, rec.bit_offset)?);
        }

        let dest = if return_type == Type::Void {
            None
        } else {
            Some(self.next_inst_var(return_type, rec.bit_offset)?)
        };

        if let Some(id) = intrinsic {
            let arg_types: Vec<Type> = args.iter().map(|&a| self.operand_type(a)).collect();
            let info = self.intrinsics.info(id);
            match self.intrinsics.validate_call(id, return_type, &arg_types) {
                CallCheck::Valid => {}
                CallCheck::BadReturnType => {
                    self.bc.error(
                        rec.bit_offset,
                        format!(
                            "Intrinsic call expects return type {}. Found: {return_type}",
                            info.ret
                        ),
                    )?;
                }
                CallCheck::WrongNumArgs => {
                    self.bc.error(
                        rec.bit_offset,
                        format!(
                            "Intrinsic call expects {}. Found: {}",
                            info.args.len(),
                            args.len()
                        ),
                    )?;
                }
                CallCheck::WrongArgType(index) => {
                    self.bc.error(
                        rec.bit_offset,
                        format!(
                            "Intrinsic call argument {index} expects type {}. Found: {}",
                            info.args[index], arg_types[index]
                        ),
                    )?;
                }
            }
            self.append(Inst::IntrinsicCall { dest, intrinsic: id, args });
        } else {
            self.append(Inst::Call { dest, callee, args, tail });
        }
        Ok(())
    }

    fn process_forward_type_ref(&mut self, rec: &Record) -> TranslateResult<()> {
        if !self.bc.check_size(rec, 2, "forward type ref")? {
            return Ok(());
        }
        let index = rec.values[0];
        if index < self.num_globals as u64 || index > u32::MAX as u64 {
            return self.bc.error(
                rec.bit_offset,
                format!("Invalid forward reference value id {index}"),
            );
        }
        let ty = self.get_type(rec.values[1], rec.bit_offset)?;
        let var = self.create_inst_var(ty, rec.bit_offset)?;
        self.set_operand(index as u32, Operand::Var(var), rec.bit_offset)
    }

    // ---- nested blocks -------------------------------------------------

    /// Constants pool within the function block. SETTYPE establishes the type
    /// for subsequent records; each accepted constant occupies one slot in the
    /// local value ID space.
    fn parse_constants_block<C: Cursor>(&mut self, cursor: &mut C) -> TranslateResult<()> {
        let bc = self.bc.with_block("constants");
        let mut pending: Option<Type> = None;
        loop {
            match cursor.next_event()? {
                Some(Event::Record(rec)) => match rec.code {
                    cst_code::SETTYPE => {
                        if !bc.check_size(&rec, 1, "set type")? {
                            continue;
                        }
                        let ty = match self.types.get_simple(rec.values[0]) {
                            Ok(ty) => ty,
                            Err(message) => {
                                bc.error(rec.bit_offset, message)?;
                                Type::Void
                            }
                        };
                        if ty == Type::Void {
                            bc.error(
                                rec.bit_offset,
                                "constants block set type not allowed for void type",
                            )?;
                            continue;
                        }
                        pending = Some(ty);
                    }
                    cst_code::UNDEF => {
                        if !bc.check_size(&rec, 0, "undef")? {
                            continue;
                        }
                        let Some(ty) = pending else {
                            bc.error(
                                rec.bit_offset,
                                "Constant record not preceded by set type record",
                            )?;
                            continue;
                        };
                        self.append_constant(Constant::Undef(ty), rec.bit_offset)?;
                    }
                    cst_code::INTEGER => {
                        if !bc.check_size(&rec, 1, "integer")? {
                            continue;
                        }
                        let Some(ty) = pending else {
                            bc.error(
                                rec.bit_offset,
                                "Constant record not preceded by set type record",
                            )?;
                            continue;
                        };
                        if !ty.is_scalar_integer() {
                            bc.error(
                                rec.bit_offset,
                                format!("constant block integer record for non-integer type {ty}"),
                            )?;
                            continue;
                        }
                        let value = truncate_to_width(
                            decode_sign_rotated(rec.values[0]),
                            ty.scalar_int_width(),
                        );
                        self.append_constant(Constant::Integer { ty, value }, rec.bit_offset)?;
                    }
                    cst_code::FLOAT => {
                        if !bc.check_size(&rec, 1, "float")? {
                            continue;
                        }
                        let Some(ty) = pending else {
                            bc.error(
                                rec.bit_offset,
                                "Constant record not preceded by set type record",
                            )?;
                            continue;
                        };
                        match ty {
                            Type::F32 => {
                                let bits = rec.values[0] as u32;
                                self.append_constant(
                                    Constant::Float(f32::from_bits(bits)),
                                    rec.bit_offset,
                                )?;
                            }
                            Type::F64 => {
                                self.append_constant(
                                    Constant::Double(f64::from_bits(rec.values[0])),
                                    rec.bit_offset,
                                )?;
                            }
                            _ => {
                                bc.error(
                                    rec.bit_offset,
                                    format!(
                                        "constant block float record for non-floating type {ty}"
                                    ),
                                )?;
                            }
                        }
                    }
                    _ => bc.unknown_record(&rec)?,
                },
                Some(Event::Enter { block_id }) => {
                    bc.error(0, format!("Don't know how to parse block id: {block_id}"))?;
                    cursor.skip_block()?;
                }
                Some(Event::Exit) => return Ok(()),
                None => {
                    return Err(TranslateError::Fatal(
                        "bitstream ended inside constants block".to_string(),
                    ))
                }
            }
        }
    }

    fn append_constant(&mut self, constant: Constant, bit: u64) -> TranslateResult<()> {
        let id = self.cfg.add_constant(constant);
        let index = self.next_local;
        self.set_operand(index, Operand::Const(id), bit)?;
        self.next_local += 1;
        Ok(())
    }

    /// Function-local symbol table: names SSA values and basic blocks. Names
    /// are only retained when dump output is enabled.
    fn parse_symtab_block<C: Cursor>(&mut self, cursor: &mut C) -> TranslateResult<()> {
        let bc = self.bc.with_block("valuesymtab");
        let keep_names = self.bc.context().flags.verbose;
        let num_globals = self.num_globals as u64;
        let locals = &self.locals;
        let cfg = &mut self.cfg;
        symtab::parse_entries(cursor, &bc, &mut |entry| match entry {
            Entry::Value(index, name) => {
                if index < num_globals {
                    return Err(format!(
                        "Function-local instruction name '{name}' can't be associated with \
                         index {index}"
                    ));
                }
                match locals.get((index - num_globals) as usize) {
                    Some(Some(Operand::Var(var))) => {
                        if keep_names {
                            cfg.set_var_name(*var, name);
                        }
                        Ok(())
                    }
                    _ => Err(format!(
                        "Function-local instruction name '{name}' can't be associated with \
                         index {index}"
                    )),
                }
            }
            Entry::Block(index, name) => {
                if index as usize >= cfg.blocks.len() {
                    return Err(format!(
                        "Function-local basic block name '{name}' can't be associated with \
                         index {index}"
                    ));
                }
                if keep_names {
                    cfg.blocks[index as usize].name = Some(name);
                }
                Ok(())
            }
        })
    }

    // ---- completion ----------------------------------------------------

    /// Block-exit validation: every block must contain instructions and end in
    /// a terminator. Violations are diagnosed and patched with `unreachable`,
    /// then predecessors are computed.
    fn exit_block(mut self) -> TranslateResult<Cfg> {
        for index in 0..self.cfg.blocks.len() {
            let block = &self.cfg.blocks[index];
            if block.insts.is_empty() {
                self.bc.error(0, format!("Basic block {index} contains no instructions"))?;
                self.cfg.blocks[index].insts.push(Inst::Unreachable);
                continue;
            }
            let is_terminated = block.insts.last().map(Inst::is_terminator).unwrap_or(false);
            if !is_terminated {
                self.bc.error(
                    0,
                    format!("Last instruction of basic block {index} not a terminator"),
                )?;
                self.cfg.blocks[index].insts.push(Inst::Unreachable);
            }
        }
        self.cfg.compute_predecessors();
        if self.bc.context().flags.verbose {
            log::debug!("parsed function:\n{}", self.cfg.dump());
        }
        Ok(self.cfg)
    }
}

/// Vector-type aware integer truncation validity: both integer, matching
/// vector shape, strictly narrowing on the element.
fn int_trunc_valid(src: Type, dst: Type) -> bool {
    if !src.is_integer() || !dst.is_integer() {
        return false;
    }
    if src.is_vector() != dst.is_vector() {
        return false;
    }
    if src.is_vector() && src.num_elements() != dst.num_elements() {
        return false;
    }
    src.element_type().scalar_int_width() > dst.element_type().scalar_int_width()
}

fn float_trunc_valid(src: Type, dst: Type) -> bool {
    if src.is_vector() != dst.is_vector() {
        return false;
    }
    if src.is_vector() && src.num_elements() != dst.num_elements() {
        return false;
    }
    src.element_type() == Type::F64 && dst.element_type() == Type::F32
}

fn float_to_int_valid(src: Type, dst: Type) -> bool {
    if !src.is_floating() || !dst.is_integer() {
        return false;
    }
    if src.is_vector() != dst.is_vector() {
        return false;
    }
    !src.is_vector() || src.num_elements() == dst.num_elements()
}

/// Wrap a decoded value to the given bit width, sign-extending back to i64.
fn truncate_to_width(value: i64, bits: u32) -> i64 {
    if bits >= 64 {
        return value;
    }
    let shift = 64 - bits;
    (value << shift) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_width() {
        assert_eq!(truncate_to_width(-1, 32), -1);
        assert_eq!(truncate_to_width(0xFFFF_FFFF, 32), -1);
        assert_eq!(truncate_to_width(0x80, 8), -128);
        assert_eq!(truncate_to_width(0x7F, 8), 127);
        assert_eq!(truncate_to_width(i64::MIN, 64), i64::MIN);
    }

    #[test]
    fn test_cast_validity_rules() {
        assert!(int_trunc_valid(Type::I32, Type::I8));
        assert!(!int_trunc_valid(Type::I8, Type::I32));
        assert!(!int_trunc_valid(Type::I32, Type::I32));
        assert!(int_trunc_valid(Type::V4I32, Type::V4I1));
        assert!(!int_trunc_valid(Type::V4I32, Type::V8I1));
        assert!(!int_trunc_valid(Type::I32, Type::F32));

        assert!(float_trunc_valid(Type::F64, Type::F32));
        assert!(!float_trunc_valid(Type::F32, Type::F64));

        assert!(float_to_int_valid(Type::F32, Type::I32));
        assert!(float_to_int_valid(Type::V4F32, Type::V4I32));
        assert!(!float_to_int_valid(Type::V4F32, Type::I32));
    }
}
