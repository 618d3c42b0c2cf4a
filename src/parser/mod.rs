// Top-level bitcode parser. Dispatches nested blocks of the single module
// block to the per-block parsers and maintains the module-wide tables. Every
// record handler either updates state or produces a diagnostic; under
// --error-recovery a diagnostic installs a substitute value and parsing
// continues, otherwise the first diagnostic aborts with FailFast. Functions
// parsed after any error are no longer handed to the lowering sink.

//! Bitcode block dispatch and module parsing.

use crate::bitstream::abi::{block, module_code};
use crate::bitstream::{Cursor, Event, Record};
use crate::context::{Diagnostic, GlobalContext};
use crate::error::{TranslateError, TranslateResult};
use crate::intrinsics::IntrinsicRegistry;
use crate::ir::{Cfg, FuncSig, GlobalId};

pub mod function;
pub mod globals;
pub mod symtab;
pub mod tables;
pub mod types;

pub use tables::{
    ExtendedType, FunctionDecl, GlobalTable, Initializer, Linkage, TypeTable, VariableDecl,
};

/// Per-block diagnostic helper: renders record-size errors in a uniform shape
/// and routes diagnostics through the context, honoring the recovery flag.
pub(crate) struct BlockCtx<'a> {
    ctx: &'a GlobalContext,
    block: &'static str,
    header_bits: u64,
}

impl<'a> BlockCtx<'a> {
    pub fn new(ctx: &'a GlobalContext, block: &'static str, header_size: usize) -> Self {
        Self { ctx, block, header_bits: header_size as u64 * 8 }
    }

    pub fn with_block(&self, block: &'static str) -> BlockCtx<'a> {
        BlockCtx { ctx: self.ctx, block, header_bits: self.header_bits }
    }

    pub fn context(&self) -> &'a GlobalContext {
        self.ctx
    }

    /// Report a diagnostic at the given record bit position. Returns an error
    /// only in fail-fast mode.
    pub fn error(&self, bit_offset: u64, message: impl Into<String>) -> TranslateResult<()> {
        let diag = Diagnostic {
            bit_offset: bit_offset + self.header_bits,
            block: self.block,
            message: message.into(),
        };
        let rendered = diag.to_string();
        let recover = self.ctx.flags.error_recovery;
        self.ctx.report(diag);
        if recover {
            Ok(())
        } else {
            Err(TranslateError::FailFast(rendered))
        }
    }

    fn size_error(
        &self,
        rec: &Record,
        expected: usize,
        name: &str,
        qualifier: Option<&str>,
    ) -> TranslateResult<()> {
        let mut block = self.block.to_string();
        if let Some(first) = block.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        let plural = if expected == 1 { "argument" } else { "arguments" };
        let qualifier = qualifier.map(|q| format!("{q} ")).unwrap_or_default();
        self.error(
            rec.bit_offset,
            format!(
                "{block} {name} record expects {qualifier}{expected} {plural}. Found: {}",
                rec.values.len()
            ),
        )
    }

    /// Check the record has exactly `expected` values; diagnose otherwise.
    pub fn check_size(&self, rec: &Record, expected: usize, name: &str) -> TranslateResult<bool> {
        if rec.values.len() == expected {
            return Ok(true);
        }
        self.size_error(rec, expected, name, None)?;
        Ok(false)
    }

    pub fn check_size_at_least(
        &self,
        rec: &Record,
        expected: usize,
        name: &str,
    ) -> TranslateResult<bool> {
        if rec.values.len() >= expected {
            return Ok(true);
        }
        self.size_error(rec, expected, name, Some("at least"))?;
        Ok(false)
    }

    pub fn check_size_in_range(
        &self,
        rec: &Record,
        low: usize,
        high: usize,
        name: &str,
    ) -> TranslateResult<bool> {
        if rec.values.len() < low {
            self.size_error(rec, low, name, Some("at least"))?;
            return Ok(false);
        }
        if rec.values.len() > high {
            self.size_error(rec, high, name, Some("no more than"))?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Fallback for record codes the block does not know.
    pub fn unknown_record(&self, rec: &Record) -> TranslateResult<()> {
        let mut rendered = format!("<{}", rec.code);
        for value in &rec.values {
            rendered.push_str(&format!(" {value}"));
        }
        rendered.push('>');
        self.error(
            rec.bit_offset,
            format!("Don't know how to process {} record: {rendered}", self.block),
        )
    }
}

/// Decode `(1 << power) >> 1` alignments, diagnosing powers above the LLVM
/// limit and recovering with alignment 1.
pub(crate) fn extract_alignment(
    bc: &BlockCtx<'_>,
    inst_name: &str,
    power: u64,
    bit_offset: u64,
) -> TranslateResult<u32> {
    const ALIGN_POWER_LIMIT: u64 = 29;
    if power <= ALIGN_POWER_LIMIT {
        return Ok((1u32 << power) >> 1);
    }
    bc.error(
        bit_offset,
        format!(
            "{inst_name} alignment greater than 2**{ALIGN_POWER_LIMIT}. Found: 2**{power}"
        ),
    )?;
    Ok(1)
}

/// The parsed module: frozen tables shared with the lowering workers.
pub struct Module {
    pub types: TypeTable,
    pub globals: GlobalTable,
}

/// Parse the bitcode stream. Each completely parsed function CFG is passed to
/// `sink` (unless any diagnostic has been recorded); the symbols the function
/// references are interned in the context by then, which is how the lowering
/// resolves them. The module tables are returned once the module block closes.
pub fn parse_module<C: Cursor>(
    cursor: &mut C,
    ctx: &GlobalContext,
    intrinsics: &IntrinsicRegistry,
    sink: &mut dyn FnMut(GlobalId, Cfg),
) -> TranslateResult<Module> {
    let bc = BlockCtx::new(ctx, "module", cursor.header_size());
    let mut module: Option<Module> = None;
    loop {
        match cursor.next_event()? {
            Some(Event::Enter { block_id }) if block_id == block::MODULE => {
                if module.is_some() {
                    bc.error(0, "Expected exactly one module block")?;
                    cursor.skip_block()?;
                    continue;
                }
                module = Some(parse_module_block(cursor, &bc, intrinsics, sink)?);
            }
            Some(Event::Enter { block_id }) => {
                bc.error(0, format!("Unknown top-level block id: {block_id}"))?;
                cursor.skip_block()?;
            }
            Some(Event::Record(rec)) => {
                bc.error(rec.bit_offset, "Record found outside of any block")?;
            }
            Some(Event::Exit) => {
                return Err(TranslateError::Fatal("unbalanced block exit".to_string()));
            }
            None => break,
        }
    }
    module.ok_or_else(|| TranslateError::Fatal("No module block found in input".to_string()))
}

fn parse_module_block<C: Cursor>(
    cursor: &mut C,
    bc: &BlockCtx<'_>,
    intrinsics: &IntrinsicRegistry,
    sink: &mut dyn FnMut(GlobalId, Cfg),
) -> TranslateResult<Module> {
    let mut types = TypeTable::default();
    let mut globals = GlobalTable::default();
    let mut version: Option<u64> = None;
    loop {
        match cursor.next_event()? {
            Some(Event::Record(rec)) => match rec.code {
                module_code::VERSION => {
                    if !bc.check_size(&rec, 1, "version")? {
                        continue;
                    }
                    if version.is_some() {
                        bc.error(rec.bit_offset, "Duplicate module version record")?;
                        continue;
                    }
                    if rec.values[0] != 1 {
                        bc.error(
                            rec.bit_offset,
                            format!("Unknown bitstream version. Found: {}", rec.values[0]),
                        )?;
                    }
                    version = Some(rec.values[0]);
                }
                module_code::FUNCTION => {
                    if !bc.check_size(&rec, 4, "address")? {
                        continue;
                    }
                    let sig = match types.get_signature(rec.values[0]) {
                        Ok(sig) => sig.clone(),
                        Err(message) => {
                            bc.error(rec.bit_offset, message)?;
                            FuncSig::default()
                        }
                    };
                    if rec.values[1] != 0 {
                        bc.error(
                            rec.bit_offset,
                            format!(
                                "Function address calling convention {} not understood",
                                rec.values[1]
                            ),
                        )?;
                    }
                    let is_proto = rec.values[2] != 0;
                    let linkage = match rec.values[3] {
                        0 => Linkage::External,
                        3 => Linkage::Internal,
                        other => {
                            bc.error(
                                rec.bit_offset,
                                format!("Function address linkage {other} not understood"),
                            )?;
                            Linkage::Internal
                        }
                    };
                    let name = format!("f{}", globals.functions.len());
                    globals.add_function(FunctionDecl { name, sig, linkage, is_proto });
                }
                _ => bc.unknown_record(&rec)?,
            },
            Some(Event::Enter { block_id }) => match block_id {
                block::BLOCKINFO => cursor.skip_block()?,
                block::TYPES => types::parse(cursor, &bc.with_block("type"), &mut types)?,
                block::GLOBALVAR => {
                    globals::parse(cursor, &bc.with_block("globals"), &mut globals)?
                }
                block::VALUE_SYMTAB => symtab::parse_module_symtab(
                    cursor,
                    &bc.with_block("valuesymtab"),
                    &mut globals,
                )?,
                block::FUNCTION => {
                    if version.is_none() {
                        bc.error(0, "Function block before module version record")?;
                    }
                    let decl_id = globals.next_function_block().ok_or_else(|| {
                        TranslateError::Fatal(
                            "More function blocks than defined function addresses".to_string(),
                        )
                    })?;
                    let parsed = function::parse_function_block(
                        cursor,
                        bc,
                        &types,
                        &globals,
                        intrinsics,
                        decl_id,
                    )?;
                    if bc.context().num_errors() == 0 {
                        sink(decl_id, parsed);
                    }
                }
                other => {
                    bc.error(0, format!("Don't know how to parse block id: {other}"))?;
                    cursor.skip_block()?;
                }
            },
            Some(Event::Exit) => return Ok(Module { types, globals }),
            None => {
                return Err(TranslateError::Fatal(
                    "bitstream ended inside module block".to_string(),
                ))
            }
        }
    }
}
