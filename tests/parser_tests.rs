//! Parser integration tests: whole translations driven from synthetic record
//! streams through the memory cursor.

use floe::bitstream::abi::{block, cst_code, func_code, globalvar_code, module_code, type_code, vst_code};
use floe::bitstream::{Event, MemoryCursor, Record};
use floe::context::{Flags, GlobalContext};
use floe::intrinsics::IntrinsicRegistry;
use floe::ir::{Callee, Cfg, GlobalId, Inst, Operand, Type};
use floe::parser::{parse_module, Initializer, Module};
use floe::TranslateError;

fn enter(block_id: u32) -> Event {
    Event::Enter { block_id }
}

fn rec(code: u32, values: &[u64]) -> Event {
    Event::Record(Record::new(code, values.to_vec()))
}

fn recovery_context() -> GlobalContext {
    let flags = Flags { error_recovery: true, ..Flags::default() };
    GlobalContext::new(flags, Box::new(Vec::new()))
}

/// Run a parse, collecting the functions offered to the lowering sink.
fn parse(
    ctx: &GlobalContext,
    events: Vec<Event>,
) -> Result<(Module, Vec<(GlobalId, Cfg)>), TranslateError> {
    let mut cursor = MemoryCursor::new(events);
    let intrinsics = IntrinsicRegistry::new();
    let mut funcs = Vec::new();
    let module = parse_module(&mut cursor, ctx, &intrinsics, &mut |id, cfg| {
        funcs.push((id, cfg));
    })?;
    Ok((module, funcs))
}

/// Module skeleton: types `[i32, void, i32 (i32)]`, one defined function, no
/// globals, followed by the given function-block records.
fn identity_module(func_records: Vec<Event>) -> Vec<Event> {
    let mut events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[3]),
        rec(type_code::INTEGER, &[32]),
        rec(type_code::VOID, &[]),
        rec(type_code::FUNCTION, &[0, 0, 0]),
        Event::Exit,
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[0]),
        Event::Exit,
        rec(module_code::FUNCTION, &[2, 0, 0, 0]),
        enter(block::FUNCTION),
    ];
    events.extend(func_records);
    events.push(Event::Exit);
    events.push(Event::Exit);
    events
}

#[test]
fn test_minimal_identity_function() {
    let ctx = recovery_context();
    let events = identity_module(vec![
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_RET, &[1]),
    ]);
    let (_module, funcs) = parse(&ctx, events).unwrap();
    assert_eq!(ctx.num_errors(), 0);
    assert_eq!(funcs.len(), 1);
    let cfg = &funcs[0].1;
    assert_eq!(cfg.name, "f0");
    assert_eq!(cfg.blocks.len(), 1);
    assert_eq!(cfg.args.len(), 1);
    assert_eq!(cfg.blocks[0].insts.len(), 1);
    // The relative reference resolves to the first argument (absolute ID 1,
    // just past the single global).
    assert_eq!(
        cfg.blocks[0].insts[0],
        Inst::Ret { value: Some(Operand::Var(cfg.args[0])) }
    );
}

#[test]
fn test_add_then_return() {
    let ctx = recovery_context();
    let events = identity_module(vec![
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_BINOP, &[1, 1, 0]),
        rec(func_code::INST_RET, &[1]),
    ]);
    let (_module, funcs) = parse(&ctx, events).unwrap();
    assert_eq!(ctx.num_errors(), 0);
    let cfg = &funcs[0].1;
    let arg = Operand::Var(cfg.args[0]);
    match &cfg.blocks[0].insts[0] {
        Inst::Arith { op, dest, a, b } => {
            assert_eq!(op.name(), "add");
            assert_eq!(*a, arg);
            assert_eq!(*b, arg);
            assert_eq!(cfg.var_type(*dest), Type::I32);
            // The return references the add's result.
            assert_eq!(
                cfg.blocks[0].insts[1],
                Inst::Ret { value: Some(Operand::Var(*dest)) }
            );
        }
        other => panic!("expected add, got {other:?}"),
    }
}

#[test]
fn test_switch_with_sign_rotated_cases() {
    let ctx = recovery_context();
    let events = identity_module(vec![
        rec(func_code::DECLAREBLOCKS, &[4]),
        // encode(-1) = 3, encode(2) = 4 under sign rotation.
        rec(
            func_code::INST_SWITCH,
            &[0, 1, 3, 2, 1, 1, 3, 1, 1, 1, 4, 2],
        ),
        rec(func_code::INST_RET, &[]),
        rec(func_code::INST_RET, &[]),
        rec(func_code::INST_RET, &[]),
    ]);
    let (_module, funcs) = parse(&ctx, events).unwrap();
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let cfg = &funcs[0].1;
    assert_eq!(cfg.blocks.len(), 4);
    match &cfg.blocks[0].insts[0] {
        Inst::Switch { ty, default, cases, .. } => {
            assert_eq!(*ty, Type::I32);
            assert_eq!(*default, 3);
            assert_eq!(*cases, vec![(-1, 1), (2, 2)]);
        }
        other => panic!("expected switch, got {other:?}"),
    }
    // Predecessors follow the successor edges.
    assert_eq!(cfg.blocks[1].preds, vec![0]);
    assert_eq!(cfg.blocks[3].preds, vec![0]);
}

#[test]
fn test_conditional_branch_and_phi() {
    let ctx = recovery_context();
    // Module with types [i32, void, i1, i32 (i32)]; the function computes a
    // phi over two constants.
    let mut events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[4]),
        rec(type_code::INTEGER, &[32]),
        rec(type_code::VOID, &[]),
        rec(type_code::INTEGER, &[1]),
        rec(type_code::FUNCTION, &[0, 0, 0]),
        Event::Exit,
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[0]),
        Event::Exit,
        rec(module_code::FUNCTION, &[3, 0, 0, 0]),
        enter(block::FUNCTION),
        rec(func_code::DECLAREBLOCKS, &[4]),
    ];
    // Constants: one i1 true, two i32 values 10 and 20.
    events.extend(vec![
        enter(block::CONSTANTS),
        rec(cst_code::SETTYPE, &[2]),
        rec(cst_code::INTEGER, &[2]), // i1 1
        rec(cst_code::SETTYPE, &[0]),
        rec(cst_code::INTEGER, &[20]), // i32 10
        rec(cst_code::INTEGER, &[40]), // i32 20
        Event::Exit,
    ]);
    // Value IDs: f0=0, arg=1, consts=2,3,4. In block 0 branch on the i1.
    events.extend(vec![
        rec(func_code::INST_BR, &[1, 2, 3]), // cond rel 3 -> abs 2 (the i1)
        rec(func_code::INST_BR, &[3]),
        rec(func_code::INST_BR, &[3]),
        // phi i32 [10, block1], [20, block2]; relative (signed) refs.
        rec(
            func_code::INST_PHI,
            &[0, 2 * 2, 1, 2 * 1, 2], // rel 2 -> abs 3, rel 1 -> abs 4
        ),
        rec(func_code::INST_RET, &[1]),
        Event::Exit,
        Event::Exit,
    ]);
    let (_module, funcs) = parse(&ctx, events).unwrap();
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let cfg = &funcs[0].1;
    match &cfg.blocks[0].insts[0] {
        Inst::CondBr { then_target, else_target, .. } => {
            assert_eq!((*then_target, *else_target), (1, 2));
        }
        other => panic!("expected condbr, got {other:?}"),
    }
    match &cfg.blocks[3].insts[0] {
        Inst::Phi { args, .. } => {
            assert_eq!(args.len(), 2);
            assert_eq!(args.len(), cfg.blocks[3].preds.len());
            assert_eq!(args[0].1, 1);
            assert_eq!(args[1].1, 2);
        }
        other => panic!("expected phi, got {other:?}"),
    }
}

#[test]
fn test_illegal_cast_recovery() {
    let ctx = recovery_context();
    // Types [i32, void, f64, i32 (i32)].
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[4]),
        rec(type_code::INTEGER, &[32]),
        rec(type_code::VOID, &[]),
        rec(type_code::DOUBLE, &[]),
        rec(type_code::FUNCTION, &[0, 0, 0]),
        Event::Exit,
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[0]),
        Event::Exit,
        rec(module_code::FUNCTION, &[3, 0, 0, 0]),
        enter(block::FUNCTION),
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_CAST, &[1, 2, 0]), // trunc arg to f64
        rec(func_code::INST_RET, &[2]),
        Event::Exit,
        Event::Exit,
    ];
    let (_module, funcs) = parse(&ctx, events).unwrap();
    assert!(ctx
        .diagnostic_messages()
        .iter()
        .any(|m| m.contains("Illegal cast: trunc i32 to f64")));
    // Functions with errors are parsed but never offered for lowering.
    assert!(funcs.is_empty());
}

#[test]
fn test_illegal_cast_placeholder_keeps_ids_aligned() {
    let ctx = recovery_context();
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[4]),
        rec(type_code::INTEGER, &[32]),
        rec(type_code::VOID, &[]),
        rec(type_code::DOUBLE, &[]),
        rec(type_code::FUNCTION, &[0, 0, 0]),
        Event::Exit,
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[0]),
        Event::Exit,
        rec(module_code::FUNCTION, &[3, 0, 0, 0]),
        enter(block::FUNCTION),
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_CAST, &[1, 2, 0]),
        // A later record referring to the placeholder by relative ID still
        // resolves: binop over the f64 placeholder.
        rec(func_code::INST_BINOP, &[1, 1, 0]),
        rec(func_code::INST_RET, &[1]),
        Event::Exit,
        Event::Exit,
    ];
    parse(&ctx, events).unwrap();
    // Only the cast is diagnosed; the fadd over the placeholder type-checks.
    let messages = ctx.diagnostic_messages();
    assert_eq!(messages.len(), 1, "{messages:?}");
}

#[test]
fn test_intrinsic_call_arity_check() {
    let ctx = recovery_context();
    // Two declarations: the intrinsic prototype and the calling function.
    let memcpy_name: Vec<u64> =
        "llvm.memcpy.p0i8.p0i8.i32".bytes().map(u64::from).collect();
    let mut entry = vec![0u64];
    entry.extend(&memcpy_name);
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[4]),
        rec(type_code::INTEGER, &[32]),
        rec(type_code::VOID, &[]),
        rec(type_code::FUNCTION, &[0, 1, 0, 0]), // void (i32, i32)
        rec(type_code::FUNCTION, &[0, 1]),       // void ()
        Event::Exit,
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[0]),
        Event::Exit,
        rec(module_code::FUNCTION, &[2, 0, 1, 0]), // prototype
        rec(module_code::FUNCTION, &[3, 0, 0, 0]), // defined caller
        enter(block::VALUE_SYMTAB),
        rec(vst_code::ENTRY, &entry),
        Event::Exit,
        enter(block::FUNCTION),
        rec(func_code::DECLAREBLOCKS, &[1]),
        enter(block::CONSTANTS),
        rec(cst_code::SETTYPE, &[0]),
        rec(cst_code::INTEGER, &[20]),
        rec(cst_code::INTEGER, &[40]),
        Event::Exit,
        // Call llvm.memcpy (absolute id 0, so relative 4) with two args.
        rec(func_code::INST_CALL, &[0, 4, 2, 1]),
        rec(func_code::INST_RET, &[]),
        Event::Exit,
        Event::Exit,
    ];
    let (_module, funcs) = parse(&ctx, events).unwrap();
    assert!(ctx
        .diagnostic_messages()
        .iter()
        .any(|m| m.contains("Intrinsic call expects 5. Found: 2")));
    assert!(funcs.is_empty());
}

#[test]
fn test_unknown_intrinsic_name() {
    let ctx = recovery_context();
    let name: Vec<u64> = "llvm.not.a.real.intrinsic".bytes().map(u64::from).collect();
    let mut entry = vec![0u64];
    entry.extend(&name);
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[3]),
        rec(type_code::VOID, &[]),
        rec(type_code::FUNCTION, &[0, 0]),
        rec(type_code::INTEGER, &[32]),
        Event::Exit,
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[0]),
        Event::Exit,
        rec(module_code::FUNCTION, &[1, 0, 1, 0]),
        rec(module_code::FUNCTION, &[1, 0, 0, 0]),
        enter(block::VALUE_SYMTAB),
        rec(vst_code::ENTRY, &entry),
        Event::Exit,
        enter(block::FUNCTION),
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_CALL, &[0, 2]),
        rec(func_code::INST_RET, &[]),
        Event::Exit,
        Event::Exit,
    ];
    parse(&ctx, events).unwrap();
    assert!(ctx
        .diagnostic_messages()
        .iter()
        .any(|m| m.contains("Invalid PNaCl intrinsic call to llvm.not.a.real.intrinsic")));
}

#[test]
fn test_globals_block_initializers() {
    let ctx = recovery_context();
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[0]),
        Event::Exit,
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[2]),
        rec(globalvar_code::VAR, &[3, 1]),
        rec(globalvar_code::DATA, &[1, 2, 3, 4]),
        rec(globalvar_code::VAR, &[0, 0]),
        rec(globalvar_code::COMPOUND, &[2]),
        rec(globalvar_code::ZEROFILL, &[8]),
        rec(globalvar_code::RELOC, &[0, 4]),
        Event::Exit,
        Event::Exit,
    ];
    let (module, _funcs) = parse(&ctx, events).unwrap();
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let vars = &module.globals.variables;
    assert_eq!(vars.len(), 2);
    // Alignment decodes as (1 << power) >> 1.
    assert_eq!(vars[0].align, 4);
    assert!(vars[0].constant);
    assert_eq!(vars[0].initializers, vec![Initializer::Data(vec![1, 2, 3, 4])]);
    assert_eq!(
        vars[1].initializers,
        vec![Initializer::ZeroFill(8), Initializer::Reloc { target: 0, addend: 4 }]
    );
}

#[test]
fn test_globals_missing_initializer_diagnosed() {
    let ctx = recovery_context();
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[1]),
        rec(globalvar_code::VAR, &[0, 0]),
        // No initializer record follows.
        Event::Exit,
        Event::Exit,
    ];
    parse(&ctx, events).unwrap();
    assert!(ctx
        .diagnostic_messages()
        .iter()
        .any(|m| m.contains("expected 1 initializer. Found: 0")));
}

#[test]
fn test_vector_type_table() {
    let ctx = recovery_context();
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[3]),
        rec(type_code::INTEGER, &[32]),
        rec(type_code::VECTOR, &[4, 0]),
        rec(type_code::VECTOR, &[3, 0]), // no <3 x i32>
        Event::Exit,
        Event::Exit,
    ];
    let (module, _funcs) = parse(&ctx, events).unwrap();
    assert_eq!(module.types.get_simple(1).unwrap(), Type::V4I32);
    assert!(ctx
        .diagnostic_messages()
        .iter()
        .any(|m| m.contains("Invalid type vector record: <3 x i32>")));
}

#[test]
fn test_void_parameter_recovered_as_i32() {
    let ctx = recovery_context();
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[2]),
        rec(type_code::VOID, &[]),
        rec(type_code::FUNCTION, &[0, 0, 0]), // void parameter
        Event::Exit,
        Event::Exit,
    ];
    let (module, _funcs) = parse(&ctx, events).unwrap();
    assert_eq!(ctx.num_errors(), 1);
    assert_eq!(module.types.get_signature(1).unwrap().args, vec![Type::I32]);
}

#[test]
fn test_branch_to_entry_block_rejected() {
    let ctx = recovery_context();
    let events = identity_module(vec![
        rec(func_code::DECLAREBLOCKS, &[2]),
        rec(func_code::INST_BR, &[0]),
        rec(func_code::INST_RET, &[1]),
    ]);
    parse(&ctx, events).unwrap();
    assert!(ctx
        .diagnostic_messages()
        .iter()
        .any(|m| m.contains("Branch to entry block not allowed")));
}

#[test]
fn test_empty_block_patched_with_unreachable() {
    let ctx = recovery_context();
    let events = identity_module(vec![
        rec(func_code::DECLAREBLOCKS, &[2]),
        rec(func_code::INST_RET, &[1]),
        // Block 1 never receives instructions.
    ]);
    let (_module, _funcs) = parse(&ctx, events).unwrap();
    assert!(ctx
        .diagnostic_messages()
        .iter()
        .any(|m| m.contains("Basic block 1 contains no instructions")));
}

#[test]
fn test_forward_type_ref_merges_with_definition() {
    let ctx = recovery_context();
    // Value IDs: f0=0, arg=1, add=2. The forward ref reserves ID 2 before
    // the branch uses it, then the add merges into the reserved slot.
    let events = identity_module(vec![
        rec(func_code::DECLAREBLOCKS, &[2]),
        rec(func_code::INST_FORWARDTYPEREF, &[2, 0]),
        rec(func_code::INST_BR, &[1]),
        rec(func_code::INST_BINOP, &[1, 1, 0]),
        rec(func_code::INST_RET, &[1]),
    ]);
    let (_module, funcs) = parse(&ctx, events).unwrap();
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let cfg = &funcs[0].1;
    match (&cfg.blocks[1].insts[0], &cfg.blocks[1].insts[1]) {
        (Inst::Arith { dest, .. }, Inst::Ret { value: Some(Operand::Var(returned)) }) => {
            assert_eq!(dest, returned);
        }
        other => panic!("unexpected block contents: {other:?}"),
    }
}

#[test]
fn test_forward_type_ref_type_mismatch() {
    let ctx = recovery_context();
    let events = identity_module(vec![
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_FORWARDTYPEREF, &[2, 1]), // reserved as void -> error + i32
        rec(func_code::INST_RET, &[1]),
    ]);
    parse(&ctx, events).unwrap();
    assert!(ctx.num_errors() > 0);
}

#[test]
fn test_fail_fast_aborts_on_first_error() {
    let ctx = GlobalContext::new(Flags::default(), Box::new(Vec::new()));
    let events = identity_module(vec![
        rec(func_code::DECLAREBLOCKS, &[0]), // diagnosed
        rec(func_code::INST_RET, &[1]),
    ]);
    let result = parse(&ctx, events);
    assert!(matches!(result, Err(TranslateError::FailFast(_))));
    assert_eq!(ctx.num_errors(), 1);
}

#[test]
fn test_unknown_block_skipped_with_diagnostic() {
    let ctx = recovery_context();
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(77),
        rec(9, &[1, 2, 3]),
        Event::Exit,
        Event::Exit,
    ];
    parse(&ctx, events).unwrap();
    assert!(ctx
        .diagnostic_messages()
        .iter()
        .any(|m| m.contains("Don't know how to parse block id: 77")));
}

#[test]
fn test_relative_reference_out_of_range() {
    let ctx = recovery_context();
    let events = identity_module(vec![
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_RET, &[7]), // base is 2; 7 exceeds it
    ]);
    parse(&ctx, events).unwrap();
    assert!(ctx
        .diagnostic_messages()
        .iter()
        .any(|m| m.contains("Invalid relative value id: 7")));
}

#[test]
fn test_call_direct_to_declared_function() {
    let ctx = recovery_context();
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::TYPES),
        rec(type_code::NUMENTRY, &[3]),
        rec(type_code::INTEGER, &[32]),
        rec(type_code::VOID, &[]),
        rec(type_code::FUNCTION, &[0, 0, 0]), // i32 (i32)
        Event::Exit,
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[0]),
        Event::Exit,
        rec(module_code::FUNCTION, &[2, 0, 1, 0]), // extern i32 (i32)
        rec(module_code::FUNCTION, &[2, 0, 0, 0]), // defined
        enter(block::FUNCTION),
        rec(func_code::DECLAREBLOCKS, &[1]),
        // call f0(arg): callee abs 0 -> rel 3; arg abs 2 -> rel 1.
        rec(func_code::INST_CALL, &[0, 3, 1]),
        rec(func_code::INST_RET, &[1]),
        Event::Exit,
        Event::Exit,
    ];
    let (_module, funcs) = parse(&ctx, events).unwrap();
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let cfg = &funcs[0].1;
    match &cfg.blocks[0].insts[0] {
        Inst::Call { callee: Callee::Direct(0), args, dest: Some(dest), tail: false } => {
            assert_eq!(args.len(), 1);
            assert_eq!(cfg.var_type(*dest), Type::I32);
        }
        other => panic!("expected direct call, got {other:?}"),
    }
    // Resolving the callee interned its relocatable symbol; the extern
    // declaration's name is ABI-fixed.
    let symbol = ctx.find_symbol(0).unwrap();
    assert_eq!(symbol.name, "f0");
    assert_eq!(symbol.offset, 0);
    assert!(symbol.suppress_mangling);
    assert!(ctx.find_symbol(1).is_none());
}
