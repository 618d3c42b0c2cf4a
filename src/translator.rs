// Translator driver. The calling thread parses the bitstream sequentially and
// hands each finished CFG to a bounded queue feeding the lowering workers.
// Workers own their function exclusively; the constant-symbol table a function
// needs is fully interned by the time its CFG is queued, and the context
// shares it read-only. Function output is buffered per function and flushed
// under the single output lock; once any error is recorded, workers drain the
// queue without translating.

//! Producer/worker translation driver.

use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Instant;

use bumpalo::Bump;

use crate::arm32::assembler::EncodedFunction;
use crate::arm32::{lower_function, Arm32Assembler, LowerSession, LoweredFunction};
use crate::bitstream::Cursor;
use crate::context::{Diagnostic, GlobalContext, OutputFormat};
use crate::error::TranslateResult;
use crate::intrinsics::IntrinsicRegistry;
use crate::ir::Cfg;
use crate::parser::{parse_module, GlobalTable, Initializer, Module};

/// Summary of one translation run.
#[derive(Debug)]
pub struct TranslationSummary {
    pub num_errors: usize,
    pub functions_translated: usize,
}

/// Run the full pipeline: parse, lower on the worker pool, emit.
pub fn translate<C: Cursor>(cursor: &mut C, ctx: &GlobalContext) -> TranslateResult<TranslationSummary> {
    let intrinsics = IntrinsicRegistry::new();
    let num_workers = if ctx.flags.threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        ctx.flags.threads
    };
    let (sender, receiver) = mpsc::sync_channel::<Cfg>(num_workers * 2);
    let receiver = Mutex::new(receiver);
    let encoded = Mutex::new(Vec::<(String, bool, EncodedFunction)>::new());
    let translated = Mutex::new(0usize);

    let module = std::thread::scope(|scope| {
        for _ in 0..num_workers {
            scope.spawn(|| worker_loop(&receiver, ctx, &intrinsics, &encoded, &translated));
        }
        let result = parse_module(cursor, ctx, &intrinsics, &mut |_id, cfg| {
            // A full queue blocks the producer until a worker frees a slot.
            let _ = sender.send(cfg);
        });
        drop(sender);
        result
    });
    let module = module?;

    emit_globals(ctx, &module, &encoded)?;
    ctx.flush_output()?;
    let functions_translated = *translated.lock().unwrap();
    Ok(TranslationSummary {
        num_errors: ctx.num_errors(),
        functions_translated,
    })
}

fn worker_loop(
    receiver: &Mutex<mpsc::Receiver<Cfg>>,
    ctx: &GlobalContext,
    intrinsics: &IntrinsicRegistry,
    encoded: &Mutex<Vec<(String, bool, EncodedFunction)>>,
    translated: &Mutex<usize>,
) {
    loop {
        let job = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };
        let Ok(cfg) = job else { return };
        // Errors anywhere disable translation; keep draining the queue.
        if ctx.translation_disabled() {
            continue;
        }
        let start = Instant::now();
        let arena = Bump::new();
        let session = LowerSession::new(&arena);
        let lowered = match lower_function(&session, ctx, intrinsics, &cfg) {
            Ok(lowered) => lowered,
            Err(err) => {
                ctx.report(Diagnostic {
                    bit_offset: 0,
                    block: "lowering",
                    message: err.to_string(),
                });
                continue;
            }
        };
        match ctx.flags.output_format {
            OutputFormat::Asm => {
                let text = lowered.emit_text();
                if ctx.write_output(text.as_bytes()).is_err() {
                    ctx.report(Diagnostic {
                        bit_offset: 0,
                        block: "emit",
                        message: format!("failed writing assembly for {}", lowered.name),
                    });
                    continue;
                }
            }
            OutputFormat::Elf => {
                let function = encode_function(&lowered);
                if function.needs_text_fixup {
                    ctx.report(Diagnostic {
                        bit_offset: 0,
                        block: "emit",
                        message: format!(
                            "{} contains instructions with no direct encoding; use the asm \
                             output format",
                            lowered.name
                        ),
                    });
                    continue;
                }
                encoded.lock().unwrap().push((lowered.name.clone(), lowered.internal, function));
            }
        }
        if ctx.flags.time_funcs {
            log::info!("translated {} in {:?}", lowered.name, start.elapsed());
        }
        *translated.lock().unwrap() += 1;
    }
}

fn encode_function(lowered: &LoweredFunction<'_>) -> EncodedFunction {
    let mut assembler = Arm32Assembler::new(lowered.blocks.len());
    if lowered.needs_text_fixup {
        assembler.set_needs_text_fixup();
    }
    for (index, block) in lowered.blocks.iter().enumerate() {
        assembler.bind_block(index as u32);
        for inst in block {
            assembler.encode_inst(inst);
        }
    }
    assembler.finish()
}

/// Emit global variable data after all functions are done.
fn emit_globals(
    ctx: &GlobalContext,
    module: &Module,
    encoded: &Mutex<Vec<(String, bool, EncodedFunction)>>,
) -> TranslateResult<()> {
    match ctx.flags.output_format {
        OutputFormat::Asm => {
            let text = globals_text(ctx, &module.globals);
            ctx.write_output(text.as_bytes())?;
            Ok(())
        }
        OutputFormat::Elf => {
            if ctx.num_errors() != 0 {
                // No object for a failed translation.
                return Ok(());
            }
            let mut writer = crate::elf::ElfWriter::new();
            for (name, internal, function) in encoded.lock().unwrap().iter() {
                writer.emit_function(name, *internal, &function.bytes, &function.relocs)?;
            }
            writer.emit_globals(ctx, &module.globals)?;
            let bytes = writer.finish()?;
            ctx.write_output(&bytes)?;
            Ok(())
        }
    }
}

fn globals_text(ctx: &GlobalContext, globals: &GlobalTable) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    for var in &globals.variables {
        let name = ctx.mangle_name(&var.name, false);
        let zero_fill_only =
            var.initializers.iter().all(|init| matches!(init, Initializer::ZeroFill(_)));
        let section = if zero_fill_only {
            ".bss"
        } else if var.constant {
            ".section\t.rodata"
        } else {
            ".data"
        };
        let _ = writeln!(out, "\t{section}");
        if var.align > 1 {
            let _ = writeln!(out, "\t.align\t{}", var.align.trailing_zeros());
        }
        let _ = writeln!(out, "\t.type\t{name}, %object");
        let _ = writeln!(out, "{name}:");
        let mut total = 0u64;
        for init in &var.initializers {
            total += init.size_in_bytes();
            match init {
                Initializer::ZeroFill(n) => {
                    let _ = writeln!(out, "\t.zero\t{n}");
                }
                Initializer::Data(bytes) => {
                    let rendered: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
                    let _ = writeln!(out, "\t.byte\t{}", rendered.join(", "));
                }
                Initializer::Reloc { target, addend } => {
                    let target_name = ctx.mangle_name(
                        globals.name(*target).unwrap_or(""),
                        globals.suppress_mangling(*target),
                    );
                    if *addend != 0 {
                        let _ = writeln!(out, "\t.long\t{target_name} + {addend}");
                    } else {
                        let _ = writeln!(out, "\t.long\t{target_name}");
                    }
                }
            }
        }
        let _ = writeln!(out, "\t.size\t{name}, {total}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Flags;
    use crate::parser::VariableDecl;

    fn sample_globals() -> GlobalTable {
        let mut globals = GlobalTable::default();
        globals.declare_variables(2);
        globals.variables[0] = VariableDecl {
            name: "g0".to_string(),
            align: 4,
            constant: true,
            initializers: vec![Initializer::Data(vec![1, 2])],
        };
        globals.variables[1] = VariableDecl {
            name: "g1".to_string(),
            align: 0,
            constant: false,
            initializers: vec![Initializer::ZeroFill(8)],
        };
        globals
    }

    #[test]
    fn test_globals_text_sections() {
        let ctx = GlobalContext::new(Flags::default(), Box::new(Vec::new()));
        let text = globals_text(&ctx, &sample_globals());
        assert!(text.contains(".rodata"));
        assert!(text.contains("\t.byte\t1, 2"));
        assert!(text.contains(".bss"));
        assert!(text.contains("\t.zero\t8"));
        assert!(text.contains("\t.size\tg1, 8"));
    }

    #[test]
    fn test_globals_text_mangles_names() {
        let flags = Flags { prefix: "tp$".to_string(), ..Flags::default() };
        let ctx = GlobalContext::new(flags, Box::new(Vec::new()));
        let text = globals_text(&ctx, &sample_globals());
        assert!(text.contains("tp$g0:"));
        assert!(text.contains("\t.size\ttp$g1, 8"));
    }
}
