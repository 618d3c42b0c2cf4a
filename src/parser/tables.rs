// Module-wide tables filled by the block parsers: the dense type table and the
// global declaration table. Both are write-once structures; after the module
// parse finishes they are frozen behind an Arc and shared by the lowering
// workers. Lookup failures return messages rather than diagnostics so the
// caller can attach the record's bit position.

//! Type table and global declaration table.

use crate::ir::{FuncSig, GlobalId, Type};

/// A type table entry. Entries are created undefined and transition exactly
/// once to a simple type or a function signature.
#[derive(Debug, Clone, Default)]
pub enum ExtendedType {
    #[default]
    Undefined,
    Simple(Type),
    Signature(FuncSig),
}

/// Dense type table indexed by type ID.
#[derive(Debug, Default)]
pub struct TypeTable {
    entries: Vec<ExtendedType>,
}

impl TypeTable {
    /// Resize on a NUMENTRY record. Shrinking is never requested by valid
    /// inputs but is harmless.
    pub fn resize(&mut self, count: usize) {
        self.entries.resize_with(count, ExtendedType::default);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Define the entry for `id`. Fails if the entry was already defined.
    pub fn define(&mut self, id: u32, ty: ExtendedType) -> Result<(), String> {
        let index = id as usize;
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, ExtendedType::default);
        }
        match self.entries[index] {
            ExtendedType::Undefined => {
                self.entries[index] = ty;
                Ok(())
            }
            _ => Err(format!("Type index {id} defined more than once")),
        }
    }

    /// Resolve a type ID expected to name a simple type.
    pub fn get_simple(&self, id: u64) -> Result<Type, String> {
        match self.entries.get(id as usize) {
            Some(ExtendedType::Simple(ty)) => Ok(*ty),
            Some(ExtendedType::Signature(_)) => {
                Err(format!("Type index {id} not a simple type"))
            }
            _ => Err(format!("Type index {id} not defined")),
        }
    }

    /// Resolve a type ID expected to name a function signature.
    pub fn get_signature(&self, id: u64) -> Result<&FuncSig, String> {
        match self.entries.get(id as usize) {
            Some(ExtendedType::Signature(sig)) => Ok(sig),
            Some(ExtendedType::Simple(_)) => {
                Err(format!("Type index {id} not a signature type"))
            }
            _ => Err(format!("Type index {id} not defined")),
        }
    }
}

/// Symbol linkage of a global declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
}

/// A declared function: signature plus linkage information. `is_proto`
/// declarations have no function block in the file.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub sig: FuncSig,
    pub linkage: Linkage,
    pub is_proto: bool,
}

/// One initializer of a global variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    ZeroFill(u64),
    Data(Vec<u8>),
    Reloc { target: GlobalId, addend: i64 },
}

impl Initializer {
    pub fn size_in_bytes(&self) -> u64 {
        match self {
            Initializer::ZeroFill(n) => *n,
            Initializer::Data(bytes) => bytes.len() as u64,
            Initializer::Reloc { .. } => 4,
        }
    }
}

/// A declared global variable.
#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: String,
    pub align: u32,
    pub constant: bool,
    pub initializers: Vec<Initializer>,
}

impl VariableDecl {
    fn placeholder(index: usize) -> Self {
        Self {
            name: format!("g{index}"),
            align: 0,
            constant: false,
            initializers: Vec::new(),
        }
    }
}

/// The ordered global declaration table. The flat value ID space puts all
/// function declarations first, then all variable declarations.
#[derive(Debug, Default)]
pub struct GlobalTable {
    pub functions: Vec<FunctionDecl>,
    pub variables: Vec<VariableDecl>,
    /// Indices (into `functions`) of declarations with a body, in file order.
    defining_functions: Vec<GlobalId>,
    num_function_blocks: usize,
}

impl GlobalTable {
    pub fn num_global_ids(&self) -> u32 {
        (self.functions.len() + self.variables.len()) as u32
    }

    /// Append a function declaration, recording whether a body will follow.
    pub fn add_function(&mut self, decl: FunctionDecl) {
        let id = self.functions.len() as GlobalId;
        if !decl.is_proto {
            self.defining_functions.push(id);
        }
        self.functions.push(decl);
    }

    /// Create `count` placeholder variable declarations, filled in by the
    /// globals block records.
    pub fn declare_variables(&mut self, count: usize) {
        let base = self.functions.len();
        for i in 0..count {
            self.variables.push(VariableDecl::placeholder(base + i));
        }
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn variable_mut(&mut self, index: usize) -> Option<&mut VariableDecl> {
        self.variables.get_mut(index)
    }

    pub fn function(&self, id: GlobalId) -> Option<&FunctionDecl> {
        self.functions.get(id as usize)
    }

    pub fn is_function(&self, id: GlobalId) -> bool {
        (id as usize) < self.functions.len()
    }

    /// Whether the declaration's symbol name is ABI-fixed and must never be
    /// mangled. True exactly for externally linked functions; variables and
    /// internal functions are module-private names.
    pub fn suppress_mangling(&self, id: GlobalId) -> bool {
        match self.function(id) {
            Some(decl) => decl.linkage == Linkage::External,
            None => false,
        }
    }

    /// Name of the declaration with the given flat ID.
    pub fn name(&self, id: GlobalId) -> Option<&str> {
        let index = id as usize;
        if index < self.functions.len() {
            return Some(&self.functions[index].name);
        }
        self.variables.get(index - self.functions.len()).map(|v| v.name.as_str())
    }

    pub fn set_name(&mut self, id: GlobalId, name: String) -> bool {
        let index = id as usize;
        if index < self.functions.len() {
            self.functions[index].name = name;
            return true;
        }
        let num_functions = self.functions.len();
        match self.variables.get_mut(index - num_functions) {
            Some(var) => {
                var.name = name;
                true
            }
            None => false,
        }
    }

    /// The function declaration backing the next function block, advancing the
    /// internal counter. `None` once every defining declaration is consumed.
    pub fn next_function_block(&mut self) -> Option<GlobalId> {
        let id = self.defining_functions.get(self.num_function_blocks).copied();
        if id.is_some() {
            self.num_function_blocks += 1;
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_defined_once() {
        let mut table = TypeTable::default();
        table.resize(2);
        table.define(0, ExtendedType::Simple(Type::I32)).unwrap();
        assert!(table.define(0, ExtendedType::Simple(Type::F32)).is_err());
        assert_eq!(table.get_simple(0).unwrap(), Type::I32);
        assert!(table.get_simple(1).is_err());
    }

    #[test]
    fn test_signature_kind_checked() {
        let mut table = TypeTable::default();
        table
            .define(0, ExtendedType::Signature(FuncSig { ret: Type::I32, args: vec![Type::I32] }))
            .unwrap();
        assert!(table.get_simple(0).is_err());
        assert_eq!(table.get_signature(0).unwrap().ret, Type::I32);
    }

    #[test]
    fn test_global_id_partition() {
        let mut globals = GlobalTable::default();
        globals.add_function(FunctionDecl {
            name: "f0".to_string(),
            sig: FuncSig::new(Type::Void),
            linkage: Linkage::External,
            is_proto: true,
        });
        globals.add_function(FunctionDecl {
            name: "f1".to_string(),
            sig: FuncSig::new(Type::I32),
            linkage: Linkage::Internal,
            is_proto: false,
        });
        globals.declare_variables(2);
        assert_eq!(globals.num_global_ids(), 4);
        assert!(globals.is_function(1));
        assert!(!globals.is_function(2));
        assert_eq!(globals.name(2), Some("g2"));
        // Only f1 has a body.
        assert_eq!(globals.next_function_block(), Some(1));
        assert_eq!(globals.next_function_block(), None);
    }
}
