// Numeric block IDs and record codes of the PNaCl bitcode format. These values
// are a frozen external ABI; they must match the writer side bit for bit and
// are never renumbered.

//! Fixed record and block codes of the bitcode format.

/// Block IDs.
pub mod block {
    pub const BLOCKINFO: u32 = 0;
    pub const MODULE: u32 = 8;
    pub const CONSTANTS: u32 = 11;
    pub const FUNCTION: u32 = 12;
    pub const VALUE_SYMTAB: u32 = 14;
    pub const TYPES: u32 = 17;
    pub const GLOBALVAR: u32 = 19;
}

/// Records inside the module block.
pub mod module_code {
    pub const VERSION: u32 = 1;
    pub const FUNCTION: u32 = 8;
}

/// Records inside the types block.
pub mod type_code {
    pub const NUMENTRY: u32 = 1;
    pub const VOID: u32 = 2;
    pub const FLOAT: u32 = 3;
    pub const DOUBLE: u32 = 4;
    pub const INTEGER: u32 = 7;
    pub const VECTOR: u32 = 12;
    pub const FUNCTION: u32 = 21;
}

/// Records inside the globals block.
pub mod globalvar_code {
    pub const VAR: u32 = 0;
    pub const COMPOUND: u32 = 1;
    pub const ZEROFILL: u32 = 2;
    pub const DATA: u32 = 3;
    pub const RELOC: u32 = 4;
    pub const COUNT: u32 = 5;
}

/// Records inside a value symbol table block.
pub mod vst_code {
    pub const ENTRY: u32 = 1;
    pub const BBENTRY: u32 = 2;
}

/// Records inside a constants block.
pub mod cst_code {
    pub const SETTYPE: u32 = 1;
    pub const UNDEF: u32 = 3;
    pub const INTEGER: u32 = 4;
    pub const FLOAT: u32 = 6;
}

/// Records inside a function block.
pub mod func_code {
    pub const DECLAREBLOCKS: u32 = 1;
    pub const INST_BINOP: u32 = 2;
    pub const INST_CAST: u32 = 3;
    pub const INST_EXTRACTELT: u32 = 6;
    pub const INST_INSERTELT: u32 = 7;
    pub const INST_RET: u32 = 10;
    pub const INST_BR: u32 = 11;
    pub const INST_SWITCH: u32 = 12;
    pub const INST_UNREACHABLE: u32 = 15;
    pub const INST_PHI: u32 = 16;
    pub const INST_ALLOCA: u32 = 19;
    pub const INST_LOAD: u32 = 20;
    pub const INST_STORE: u32 = 24;
    pub const INST_CMP2: u32 = 28;
    pub const INST_VSELECT: u32 = 29;
    pub const INST_CALL: u32 = 34;
    pub const INST_FORWARDTYPEREF: u32 = 43;
    pub const INST_CALL_INDIRECT: u32 = 44;
}

/// Binary operator codes carried by `INST_BINOP` records.
pub mod binop {
    pub const ADD: u64 = 0;
    pub const SUB: u64 = 1;
    pub const MUL: u64 = 2;
    pub const UDIV: u64 = 3;
    pub const SDIV: u64 = 4;
    pub const UREM: u64 = 5;
    pub const SREM: u64 = 6;
    pub const SHL: u64 = 7;
    pub const LSHR: u64 = 8;
    pub const ASHR: u64 = 9;
    pub const AND: u64 = 10;
    pub const OR: u64 = 11;
    pub const XOR: u64 = 12;
}

/// Cast operator codes carried by `INST_CAST` records.
pub mod castop {
    pub const TRUNC: u64 = 0;
    pub const ZEXT: u64 = 1;
    pub const SEXT: u64 = 2;
    pub const FPTOUI: u64 = 3;
    pub const FPTOSI: u64 = 4;
    pub const UITOFP: u64 = 5;
    pub const SITOFP: u64 = 6;
    pub const FPTRUNC: u64 = 7;
    pub const FPEXT: u64 = 8;
    pub const BITCAST: u64 = 11;
}

/// Integer predicate codes carried by `INST_CMP2` records.
pub mod icmp {
    pub const EQ: u64 = 32;
    pub const NE: u64 = 33;
    pub const UGT: u64 = 34;
    pub const UGE: u64 = 35;
    pub const ULT: u64 = 36;
    pub const ULE: u64 = 37;
    pub const SGT: u64 = 38;
    pub const SGE: u64 = 39;
    pub const SLT: u64 = 40;
    pub const SLE: u64 = 41;
}

/// Float predicate codes carried by `INST_CMP2` records.
pub mod fcmp {
    pub const FALSE: u64 = 0;
    pub const OEQ: u64 = 1;
    pub const OGT: u64 = 2;
    pub const OGE: u64 = 3;
    pub const OLT: u64 = 4;
    pub const OLE: u64 = 5;
    pub const ONE: u64 = 6;
    pub const ORD: u64 = 7;
    pub const UNO: u64 = 8;
    pub const UEQ: u64 = 9;
    pub const UGT: u64 = 10;
    pub const UGE: u64 = 11;
    pub const ULT: u64 = 12;
    pub const ULE: u64 = 13;
    pub const UNE: u64 = 14;
    pub const TRUE: u64 = 15;
}
