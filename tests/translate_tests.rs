//! End-to-end translation tests: synthetic record streams through the full
//! driver, checking the emitted assembly and object files.

use std::sync::{Arc, Mutex};

use floe::bitstream::abi::{block, func_code, globalvar_code, module_code, type_code};
use floe::bitstream::{Event, MemoryCursor, Record};
use floe::context::{Flags, GlobalContext, OutputFormat};
use floe::translator;
use object::{Object as _, ObjectSection, ObjectSymbol};

fn enter(block_id: u32) -> Event {
    Event::Enter { block_id }
}

fn rec(code: u32, values: &[u64]) -> Event {
    Event::Record(Record::new(code, values.to_vec()))
}

/// Shared output buffer readable after the context is done with it.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_with_flags(events: Vec<Event>, flags: Flags) -> (GlobalContext, SharedBuf, usize) {
    let buf = SharedBuf::default();
    let ctx = GlobalContext::new(flags, Box::new(buf.clone()));
    let mut cursor = MemoryCursor::new(events);
    let summary = translator::translate(&mut cursor, &ctx).unwrap();
    (ctx, buf, summary.functions_translated)
}

fn run(events: Vec<Event>, format: OutputFormat) -> (GlobalContext, SharedBuf, usize) {
    let flags = Flags {
        error_recovery: true,
        output_format: format,
        threads: 1,
        ..Flags::default()
    };
    run_with_flags(events, flags)
}

/// Module with types `[i32, void, i1, i32 (i32)]` and one defined function.
fn one_function_module(func_records: Vec<Event>) -> Vec<Event> {
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
    ];
    events.extend(func_records);
    events.push(Event::Exit);
    events.push(Event::Exit);
    events
}

#[test]
fn test_identity_function_asm() {
    let events = one_function_module(vec![
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_RET, &[1]),
    ]);
    let (ctx, buf, translated) = run(events, OutputFormat::Asm);
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    assert_eq!(translated, 1);
    let text = String::from_utf8(buf.contents()).unwrap();
    assert!(text.contains("\t.globl\tf0"));
    assert!(text.contains("f0:"));
    assert!(text.contains("\tpush\t{fp, lr}"));
    assert!(text.contains("\tbx\tlr"));
}

#[test]
fn test_add_function_asm() {
    let events = one_function_module(vec![
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_BINOP, &[1, 1, 0]),
        rec(func_code::INST_RET, &[1]),
    ]);
    let (ctx, buf, _) = run(events, OutputFormat::Asm);
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let text = String::from_utf8(buf.contents()).unwrap();
    assert!(text.contains("\tadd\tr0, r0, r1"), "missing add:\n{text}");
}

#[test]
fn test_conditional_branch_fallthrough() {
    // Block 0 branches on %arg != 0 (via icmp) to block 2, else block 1; the
    // false target is the layout successor, so only the taken edge is emitted.
    let events = one_function_module(vec![
        rec(func_code::DECLAREBLOCKS, &[3]),
        // icmp ne arg, arg (contents don't matter, only the i1 result)
        rec(func_code::INST_CMP2, &[1, 1, 33]),
        rec(func_code::INST_BR, &[2, 1, 1]),
        rec(func_code::INST_RET, &[2]),
        rec(func_code::INST_RET, &[2]),
    ]);
    let (ctx, buf, _) = run(events, OutputFormat::Asm);
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let text = String::from_utf8(buf.contents()).unwrap();
    // The conditional branch targets block 2 directly.
    assert!(text.contains("\tbne\t.Lf0$bb2"), "missing bne:\n{text}");
    // No explicit branch to the fallthrough block remains.
    assert!(!text.contains("\tb\t.Lf0$bb1"), "fallthrough not elided:\n{text}");
}

#[test]
fn test_identity_function_elf() {
    let events = one_function_module(vec![
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_RET, &[1]),
    ]);
    let (ctx, buf, _) = run(events, OutputFormat::Elf);
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let bytes = buf.contents();
    let file = object::File::parse(&*bytes).unwrap();
    let text = file.section_by_name(".text").unwrap();
    assert!(text.size() > 0);
    let symbol = file.symbols().find(|s| s.name() == Ok("f0")).unwrap();
    assert!(symbol.is_definition());
}

#[test]
fn test_direct_call_emits_relocation() {
    // Extern declaration plus a caller; the object carries an R_ARM_CALL.
    let events = vec![
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
        rec(module_code::FUNCTION, &[2, 0, 1, 0]),
        rec(module_code::FUNCTION, &[2, 0, 0, 0]),
        enter(block::FUNCTION),
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_CALL, &[0, 3, 1]),
        rec(func_code::INST_RET, &[1]),
        Event::Exit,
        Event::Exit,
    ];
    let (ctx, buf, _) = run(events, OutputFormat::Elf);
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let bytes = buf.contents();
    let file = object::File::parse(&*bytes).unwrap();
    let text = file.section_by_name(".text").unwrap();
    assert_eq!(text.relocations().count(), 1);
    assert!(file.symbols().any(|s| s.name() == Ok("f0") && s.is_undefined()));
}

#[test]
fn test_globals_emitted_as_data() {
    let events = vec![
        enter(block::MODULE),
        rec(module_code::VERSION, &[1]),
        enter(block::GLOBALVAR),
        rec(globalvar_code::COUNT, &[1]),
        rec(globalvar_code::VAR, &[3, 0]),
        rec(globalvar_code::DATA, &[0xDE, 0xAD, 0xBE, 0xEF]),
        Event::Exit,
        Event::Exit,
    ];
    let (ctx, buf, _) = run(events, OutputFormat::Asm);
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    let text = String::from_utf8(buf.contents()).unwrap();
    assert!(text.contains("g0:"));
    assert!(text.contains("\t.byte\t222, 173, 190, 239"));
    assert!(text.contains("\t.size\tg0, 4"));
}

#[test]
fn test_symbol_prefix_mangles_internal_names() {
    // Two functions: an internal callee and an internal caller. Both the
    // definitions and the call site take the prefix; nothing is exported.
    let events = vec![
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
        rec(module_code::FUNCTION, &[2, 0, 0, 3]), // internal, defined
        rec(module_code::FUNCTION, &[2, 0, 0, 3]), // internal, defined
        enter(block::FUNCTION),
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_RET, &[1]),
        Event::Exit,
        enter(block::FUNCTION),
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_CALL, &[0, 3, 1]), // call f0(arg)
        rec(func_code::INST_RET, &[1]),
        Event::Exit,
        Event::Exit,
    ];
    let flags = Flags {
        error_recovery: true,
        output_format: OutputFormat::Asm,
        prefix: "tp$".to_string(),
        threads: 1,
        ..Flags::default()
    };
    let (ctx, buf, translated) = run_with_flags(events, flags);
    assert_eq!(ctx.num_errors(), 0, "{:?}", ctx.diagnostic_messages());
    assert_eq!(translated, 2);
    let text = String::from_utf8(buf.contents()).unwrap();
    assert!(text.contains("tp$f0:"), "definition not mangled:\n{text}");
    assert!(text.contains("\tbl\ttp$f0"), "call site not mangled:\n{text}");
    assert!(!text.contains(".globl"), "internal symbols exported:\n{text}");
}

#[test]
fn test_error_makes_translation_fail() {
    let events = one_function_module(vec![
        rec(func_code::DECLAREBLOCKS, &[1]),
        rec(func_code::INST_CAST, &[1, 1, 0]), // trunc i32 to void: illegal
        rec(func_code::INST_RET, &[1]),
    ]);
    let (ctx, _buf, translated) = run(events, OutputFormat::Asm);
    assert!(ctx.num_errors() > 0);
    assert_eq!(translated, 0);
}
