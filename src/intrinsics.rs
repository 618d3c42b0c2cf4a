// Registry of the intrinsics reachable through direct calls whose callee name
// starts with "llvm.". The function parser looks names up by their suffix and
// validates each call against the registered signature; validation checks run
// in a fixed order (return type, then argument count, then argument types) so
// diagnostics are deterministic. The registry is populated once at startup and
// read-only afterwards.

//! Intrinsic registry and call validation.

use std::collections::HashMap;

use crate::ir::Type;

/// Prefix marking a direct callee as an intrinsic.
pub const INTRINSIC_PREFIX: &str = "llvm.";

/// Signature of one registered intrinsic.
#[derive(Debug, Clone)]
pub struct Intrinsic {
    /// Name suffix after `llvm.`.
    pub name: &'static str,
    pub ret: Type,
    pub args: &'static [Type],
}

/// Why an intrinsic call failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCheck {
    Valid,
    BadReturnType,
    WrongNumArgs,
    WrongArgType(usize),
}

/// Index of an intrinsic within the registry.
pub type IntrinsicId = u32;

pub struct IntrinsicRegistry {
    infos: Vec<Intrinsic>,
    by_name: HashMap<&'static str, IntrinsicId>,
}

impl IntrinsicRegistry {
    pub fn new() -> Self {
        let mut registry = Self { infos: Vec::new(), by_name: HashMap::new() };
        for info in TABLE {
            registry.register(info.clone());
        }
        registry
    }

    fn register(&mut self, info: Intrinsic) {
        let id = self.infos.len() as IntrinsicId;
        self.by_name.insert(info.name, id);
        self.infos.push(info);
    }

    /// Look up an intrinsic by its name suffix (after `llvm.`).
    pub fn find(&self, suffix: &str) -> Option<IntrinsicId> {
        self.by_name.get(suffix).copied()
    }

    pub fn info(&self, id: IntrinsicId) -> &Intrinsic {
        &self.infos[id as usize]
    }

    /// Validate a call against the registered signature. Checks are ordered:
    /// return type first, then arity, then each argument type.
    pub fn validate_call(&self, id: IntrinsicId, ret: Type, args: &[Type]) -> CallCheck {
        let info = self.info(id);
        if ret != info.ret {
            return CallCheck::BadReturnType;
        }
        if args.len() != info.args.len() {
            return CallCheck::WrongNumArgs;
        }
        for (index, (&got, &want)) in args.iter().zip(info.args).enumerate() {
            if got != want {
                return CallCheck::WrongArgType(index);
            }
        }
        CallCheck::Valid
    }
}

impl Default for IntrinsicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

use Type::{F32, F64, I1, I16, I32, I64, I8, Void};

/// The provided registry. Pointer-typed parameters are `i32` on this target.
static TABLE: &[Intrinsic] = &[
    Intrinsic {
        name: "memcpy.p0i8.p0i8.i32",
        ret: Void,
        args: &[I32, I32, I32, I32, I1],
    },
    Intrinsic {
        name: "memmove.p0i8.p0i8.i32",
        ret: Void,
        args: &[I32, I32, I32, I32, I1],
    },
    Intrinsic {
        name: "memset.p0i8.i32",
        ret: Void,
        args: &[I32, I8, I32, I32, I1],
    },
    Intrinsic { name: "nacl.read.tp", ret: I32, args: &[] },
    Intrinsic { name: "nacl.setjmp", ret: I32, args: &[I32] },
    Intrinsic { name: "nacl.longjmp", ret: Void, args: &[I32, I32] },
    Intrinsic { name: "trap", ret: Void, args: &[] },
    Intrinsic { name: "stacksave", ret: I32, args: &[] },
    Intrinsic { name: "stackrestore", ret: Void, args: &[I32] },
    Intrinsic { name: "sqrt.f32", ret: F32, args: &[F32] },
    Intrinsic { name: "sqrt.f64", ret: F64, args: &[F64] },
    Intrinsic { name: "fabs.f32", ret: F32, args: &[F32] },
    Intrinsic { name: "fabs.f64", ret: F64, args: &[F64] },
    Intrinsic { name: "ctlz.i32", ret: I32, args: &[I32, I1] },
    Intrinsic { name: "cttz.i32", ret: I32, args: &[I32, I1] },
    Intrinsic { name: "ctpop.i32", ret: I32, args: &[I32] },
    Intrinsic { name: "ctpop.i64", ret: I64, args: &[I64] },
    Intrinsic { name: "bswap.i16", ret: I16, args: &[I16] },
    Intrinsic { name: "bswap.i32", ret: I32, args: &[I32] },
    Intrinsic { name: "bswap.i64", ret: I64, args: &[I64] },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_suffix() {
        let registry = IntrinsicRegistry::new();
        assert!(registry.find("memcpy.p0i8.p0i8.i32").is_some());
        assert!(registry.find("memcpy").is_none());
        assert!(registry.find("nacl.read.tp").is_some());
    }

    #[test]
    fn test_validation_order() {
        let registry = IntrinsicRegistry::new();
        let memcpy = registry.find("memcpy.p0i8.p0i8.i32").unwrap();
        // Return type is checked before arity.
        assert_eq!(
            registry.validate_call(memcpy, Type::I32, &[Type::I32, Type::I32]),
            CallCheck::BadReturnType
        );
        assert_eq!(
            registry.validate_call(memcpy, Type::Void, &[Type::I32, Type::I32]),
            CallCheck::WrongNumArgs
        );
        assert_eq!(
            registry.validate_call(
                memcpy,
                Type::Void,
                &[Type::I32, Type::I32, Type::F32, Type::I32, Type::I1]
            ),
            CallCheck::WrongArgType(2)
        );
        assert_eq!(
            registry.validate_call(
                memcpy,
                Type::Void,
                &[Type::I32, Type::I32, Type::I32, Type::I32, Type::I1]
            ),
            CallCheck::Valid
        );
    }
}
