// Per-function control-flow graph. The CFG owns its basic blocks, the type of
// every SSA variable and the local constant pool; operands index into those
// tables. Once the parser finishes a function the CFG is handed to exactly one
// worker, so nothing here is shared or locked.

//! Control-flow graph built by the function parser.

use std::fmt::Write as _;

use super::inst::{BlockId, Callee, ConstId, Constant, Inst, Operand, VarId};
use super::types::Type;

/// A basic block: an ordered instruction list whose last element must be a
/// terminator once parsing completes.
#[derive(Debug, Default, Clone)]
pub struct BasicBlock {
    pub insts: Vec<Inst>,
    /// Predecessor block indices, computed from successor edges after parse.
    pub preds: Vec<BlockId>,
    /// Optional name from the function-local value symbol table.
    pub name: Option<String>,
}

/// A function under translation.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub name: String,
    pub ret_type: Type,
    /// Internal linkage: the symbol is not exported from the object.
    pub internal: bool,
    /// Argument variables, in signature order.
    pub args: Vec<VarId>,
    /// Block list; index 0 is the entry block.
    pub blocks: Vec<BasicBlock>,
    var_types: Vec<Type>,
    var_names: Vec<Option<String>>,
    constants: Vec<Constant>,
}

impl Cfg {
    pub fn new(name: String, ret_type: Type) -> Self {
        Self {
            name,
            ret_type,
            internal: false,
            args: Vec::new(),
            blocks: vec![BasicBlock::default()],
            var_types: Vec::new(),
            var_names: Vec::new(),
            constants: Vec::new(),
        }
    }

    /// Append a fresh variable of the given type.
    pub fn make_variable(&mut self, ty: Type) -> VarId {
        let id = self.var_types.len() as VarId;
        self.var_types.push(ty);
        self.var_names.push(None);
        id
    }

    pub fn num_variables(&self) -> usize {
        self.var_types.len()
    }

    pub fn var_type(&self, var: VarId) -> Type {
        self.var_types[var as usize]
    }

    pub fn set_var_name(&mut self, var: VarId, name: String) {
        self.var_names[var as usize] = Some(name);
    }

    pub fn var_name(&self, var: VarId) -> Option<&str> {
        self.var_names[var as usize].as_deref()
    }

    /// Append a constant to the local pool.
    pub fn add_constant(&mut self, c: Constant) -> ConstId {
        let id = self.constants.len() as ConstId;
        self.constants.push(c);
        id
    }

    pub fn constant(&self, id: ConstId) -> &Constant {
        &self.constants[id as usize]
    }

    /// Type of an operand. Global addresses always have pointer type.
    pub fn operand_type(&self, op: Operand) -> Type {
        match op {
            Operand::Var(v) => self.var_type(v),
            Operand::Const(c) => self.constant(c).ty(),
            Operand::Global(_) => Type::pointer(),
        }
    }

    /// Append a new empty basic block and return its index.
    pub fn make_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::default());
        (self.blocks.len() - 1) as BlockId
    }

    /// Recompute every block's predecessor list from the successor edges of
    /// the block terminators. Deterministic: predecessors appear in block
    /// order, once per distinct edge source.
    pub fn compute_predecessors(&mut self) {
        for block in &mut self.blocks {
            block.preds.clear();
        }
        let num_blocks = self.blocks.len();
        for idx in 0..num_blocks {
            let succs = match self.blocks[idx].insts.last() {
                Some(inst) => inst.successors(),
                None => continue,
            };
            for succ in succs {
                let preds = &mut self.blocks[succ as usize].preds;
                if !preds.contains(&(idx as BlockId)) {
                    preds.push(idx as BlockId);
                }
            }
        }
    }

    /// Name used in diagnostics and dumps for an operand.
    pub fn operand_name(&self, op: Operand) -> String {
        match op {
            Operand::Var(v) => match self.var_name(v) {
                Some(name) => format!("%{name}"),
                None => format!("%v{v}"),
            },
            Operand::Const(c) => match *self.constant(c) {
                Constant::Integer { value, .. } => value.to_string(),
                Constant::Float(f) => f.to_string(),
                Constant::Double(d) => d.to_string(),
                Constant::Undef(_) => "undef".to_string(),
            },
            Operand::Global(g) => format!("@g{g}"),
        }
    }

    /// Render the CFG for `-v` dumps. Not a stable format.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "define {} @{}:", self.ret_type, self.name);
        for (idx, block) in self.blocks.iter().enumerate() {
            match &block.name {
                Some(name) => {
                    let _ = writeln!(out, "{name}:");
                }
                None => {
                    let _ = writeln!(out, "bb{idx}:");
                }
            }
            for inst in &block.insts {
                let _ = writeln!(out, "  {}", self.dump_inst(inst));
            }
        }
        out
    }

    fn dump_inst(&self, inst: &Inst) -> String {
        match inst {
            Inst::Arith { op, dest, a, b } => format!(
                "%v{dest} = {op} {} {}, {}",
                self.var_type(*dest),
                self.operand_name(*a),
                self.operand_name(*b)
            ),
            Inst::Cast { op, dest, src } => format!(
                "%v{dest} = {op} {} {} to {}",
                self.operand_type(*src),
                self.operand_name(*src),
                self.var_type(*dest)
            ),
            Inst::Select { dest, cond, then_val, else_val } => format!(
                "%v{dest} = select {}, {}, {}",
                self.operand_name(*cond),
                self.operand_name(*then_val),
                self.operand_name(*else_val)
            ),
            Inst::ExtractElement { dest, vec, index } => format!(
                "%v{dest} = extractelement {}, {}",
                self.operand_name(*vec),
                self.operand_name(*index)
            ),
            Inst::InsertElement { dest, vec, elt, index } => format!(
                "%v{dest} = insertelement {}, {}, {}",
                self.operand_name(*vec),
                self.operand_name(*elt),
                self.operand_name(*index)
            ),
            Inst::Icmp { cond, dest, a, b } => format!(
                "%v{dest} = icmp {cond:?} {}, {}",
                self.operand_name(*a),
                self.operand_name(*b)
            ),
            Inst::Fcmp { cond, dest, a, b } => format!(
                "%v{dest} = fcmp {cond:?} {}, {}",
                self.operand_name(*a),
                self.operand_name(*b)
            ),
            Inst::Ret { value: None } => "ret void".to_string(),
            Inst::Ret { value: Some(v) } => format!("ret {}", self.operand_name(*v)),
            Inst::Br { target } => format!("br label bb{target}"),
            Inst::CondBr { cond, then_target, else_target } => format!(
                "br {}, label bb{then_target}, label bb{else_target}",
                self.operand_name(*cond)
            ),
            Inst::Switch { cond, default, cases, .. } => {
                let mut s = format!(
                    "switch {}, label bb{default} [",
                    self.operand_name(*cond)
                );
                for (value, label) in cases {
                    let _ = write!(s, " {value}: bb{label}");
                }
                s.push_str(" ]");
                s
            }
            Inst::Unreachable => "unreachable".to_string(),
            Inst::Phi { dest, args } => {
                let mut s = format!("%v{dest} = phi");
                for (i, (op, block)) in args.iter().enumerate() {
                    if i > 0 {
                        s.push(',');
                    }
                    let _ = write!(s, " [{}, bb{block}]", self.operand_name(*op));
                }
                s
            }
            Inst::Alloca { dest, byte_count, align } => format!(
                "%v{dest} = alloca {}, align {align}",
                self.operand_name(*byte_count)
            ),
            Inst::Load { dest, ty, addr, align } => format!(
                "%v{dest} = load {ty}, {}, align {align}",
                self.operand_name(*addr)
            ),
            Inst::Store { value, addr, align } => format!(
                "store {}, {}, align {align}",
                self.operand_name(*value),
                self.operand_name(*addr)
            ),
            Inst::Call { dest, callee, args, tail } => {
                let mut s = String::new();
                if let Some(dest) = dest {
                    let _ = write!(s, "%v{dest} = ");
                }
                if *tail {
                    s.push_str("tail ");
                }
                match callee {
                    Callee::Direct(g) => {
                        let _ = write!(s, "call @g{g}(");
                    }
                    Callee::Indirect(op) => {
                        let _ = write!(s, "call {}(", self.operand_name(*op));
                    }
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        s.push_str(", ");
                    }
                    s.push_str(&self.operand_name(*arg));
                }
                s.push(')');
                s
            }
            Inst::IntrinsicCall { dest, intrinsic, args } => {
                let mut s = String::new();
                if let Some(dest) = dest {
                    let _ = write!(s, "%v{dest} = ");
                }
                let _ = write!(s, "intrinsic #{intrinsic}(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        s.push_str(", ");
                    }
                    s.push_str(&self.operand_name(*arg));
                }
                s.push(')');
                s
            }
            Inst::Assign { dest, src } => {
                format!("%v{dest} = {}", self.operand_name(*src))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predecessors_from_edges() {
        let mut cfg = Cfg::new("f".to_string(), Type::Void);
        let b1 = cfg.make_block();
        let b2 = cfg.make_block();
        let cond = cfg.make_variable(Type::I1);
        cfg.blocks[0].insts.push(Inst::CondBr {
            cond: Operand::Var(cond),
            then_target: b1,
            else_target: b2,
        });
        cfg.blocks[b1 as usize].insts.push(Inst::Br { target: b2 });
        cfg.blocks[b2 as usize].insts.push(Inst::Ret { value: None });
        cfg.compute_predecessors();
        assert_eq!(cfg.blocks[b1 as usize].preds, vec![0]);
        assert_eq!(cfg.blocks[b2 as usize].preds, vec![0, b1]);
        assert!(cfg.blocks[0].preds.is_empty());
    }

    #[test]
    fn test_predecessors_deduplicated() {
        let mut cfg = Cfg::new("f".to_string(), Type::Void);
        let b1 = cfg.make_block();
        let c = cfg.make_variable(Type::I1);
        // Both switch arms target the same block.
        cfg.blocks[0].insts.push(Inst::CondBr {
            cond: Operand::Var(c),
            then_target: b1,
            else_target: b1,
        });
        cfg.blocks[b1 as usize].insts.push(Inst::Ret { value: None });
        cfg.compute_predecessors();
        assert_eq!(cfg.blocks[b1 as usize].preds, vec![0]);
    }

    #[test]
    fn test_operand_types() {
        let mut cfg = Cfg::new("f".to_string(), Type::I32);
        let v = cfg.make_variable(Type::F64);
        let c = cfg.add_constant(Constant::Integer { ty: Type::I32, value: 7 });
        assert_eq!(cfg.operand_type(Operand::Var(v)), Type::F64);
        assert_eq!(cfg.operand_type(Operand::Const(c)), Type::I32);
        assert_eq!(cfg.operand_type(Operand::Global(0)), Type::I32);
    }
}
