// Globals block parser. The COUNT record must come first and pre-declares the
// variable table; each VAR record opens a declaration expecting one
// initializer unless a COMPOUND record re-declares the expected count. On
// block exit the declaration count and every per-variable initializer count
// must match what was announced; mismatches are diagnosed and clamped.

//! Globals block parser.

use crate::bitstream::abi::globalvar_code;
use crate::bitstream::{Cursor, Event, Record};
use crate::error::{TranslateError, TranslateResult};

use super::tables::{GlobalTable, Initializer, VariableDecl};
use super::{extract_alignment, BlockCtx};

pub(crate) fn parse<C: Cursor>(
    cursor: &mut C,
    bc: &BlockCtx<'_>,
    globals: &mut GlobalTable,
) -> TranslateResult<()> {
    let mut parser = GlobalsParser {
        bc,
        globals,
        initializers_needed: 0,
        next_variable: 0,
        // Collects stray initializers appearing before the first VAR record,
        // so handlers never need a current-variable check.
        dummy: VariableDecl { name: String::new(), align: 0, constant: false, initializers: Vec::new() },
    };
    loop {
        match cursor.next_event()? {
            Some(Event::Record(rec)) => parser.process_record(&rec)?,
            Some(Event::Enter { block_id }) => {
                bc.error(0, format!("Don't know how to parse block id: {block_id}"))?;
                cursor.skip_block()?;
            }
            Some(Event::Exit) => return parser.exit_block(),
            None => {
                return Err(TranslateError::Fatal(
                    "bitstream ended inside globals block".to_string(),
                ))
            }
        }
    }
}

struct GlobalsParser<'a, 'c> {
    bc: &'a BlockCtx<'c>,
    globals: &'a mut GlobalTable,
    initializers_needed: usize,
    /// Index of the next VAR record within the variable table.
    next_variable: usize,
    dummy: VariableDecl,
}

impl GlobalsParser<'_, '_> {
    fn current(&mut self) -> &mut VariableDecl {
        let index = self.next_variable.wrapping_sub(1);
        if self.next_variable == 0 || index >= self.globals.num_variables() {
            return &mut self.dummy;
        }
        &mut self.globals.variables[index]
    }

    /// Diagnose a mismatch between announced and observed initializers for the
    /// declaration being closed, then clamp.
    fn verify_no_missing_initializers(&mut self, bit_offset: u64) -> TranslateResult<()> {
        let needed = self.initializers_needed;
        let name = if self.next_variable == 0 {
            "g?".to_string()
        } else {
            self.current().name.clone()
        };
        let found = self.current().initializers.len();
        if needed != found {
            let plural = if needed == 1 { "initializer" } else { "initializers" };
            self.bc.error(
                bit_offset,
                format!("Global variable @{name} expected {needed} {plural}. Found: {found}"),
            )?;
            self.initializers_needed = found;
        }
        Ok(())
    }

    fn add_initializer(&mut self, init: Initializer) {
        self.current().initializers.push(init);
    }

    fn process_record(&mut self, rec: &Record) -> TranslateResult<()> {
        match rec.code {
            globalvar_code::COUNT => {
                if !self.bc.check_size(rec, 1, "count")? {
                    return Ok(());
                }
                if self.next_variable != 0 || self.globals.num_variables() != 0 {
                    return self.bc.error(rec.bit_offset, "Globals count record not first in block.");
                }
                self.globals.declare_variables(rec.values[0] as usize);
                Ok(())
            }
            globalvar_code::VAR => {
                if !self.bc.check_size(rec, 2, "variable")? {
                    return Ok(());
                }
                self.verify_no_missing_initializers(rec.bit_offset)?;
                let align = extract_alignment(self.bc, "Global variable", rec.values[0], rec.bit_offset)?;
                if self.next_variable >= self.globals.num_variables() {
                    // More VAR records than the count announced; keep counting
                    // so the exit check reports one mismatch.
                    self.next_variable += 1;
                    self.initializers_needed = 0;
                    return self.bc.error(
                        rec.bit_offset,
                        "Globals variable record beyond declared count",
                    );
                }
                self.next_variable += 1;
                self.initializers_needed = 1;
                let var = self.current();
                var.align = align;
                var.constant = rec.values[1] != 0;
                Ok(())
            }
            globalvar_code::COMPOUND => {
                if !self.bc.check_size(rec, 1, "compound")? {
                    return Ok(());
                }
                if !self.current().initializers.is_empty() {
                    return self
                        .bc
                        .error(rec.bit_offset, "Globals compound record not first initializer");
                }
                if rec.values[0] < 2 {
                    return self.bc.error(
                        rec.bit_offset,
                        format!("Globals compound record size invalid. Found: {}", rec.values[0]),
                    );
                }
                self.initializers_needed = rec.values[0] as usize;
                Ok(())
            }
            globalvar_code::ZEROFILL => {
                if !self.bc.check_size(rec, 1, "zerofill")? {
                    return Ok(());
                }
                self.add_initializer(Initializer::ZeroFill(rec.values[0]));
                Ok(())
            }
            globalvar_code::DATA => {
                if !self.bc.check_size_at_least(rec, 1, "data")? {
                    return Ok(());
                }
                let bytes = rec.values.iter().map(|&v| v as u8).collect();
                self.add_initializer(Initializer::Data(bytes));
                Ok(())
            }
            globalvar_code::RELOC => {
                if !self.bc.check_size_in_range(rec, 1, 2, "reloc")? {
                    return Ok(());
                }
                let mut target = rec.values[0] as u32;
                if target >= self.globals.num_global_ids() {
                    self.bc.error(
                        rec.bit_offset,
                        format!("Reloc initializer to unknown global id {target}"),
                    )?;
                    target = 0;
                }
                let addend = rec.values.get(1).copied().unwrap_or(0) as i64;
                self.add_initializer(Initializer::Reloc { target, addend });
                Ok(())
            }
            _ => self.bc.unknown_record(rec),
        }
    }

    fn exit_block(&mut self) -> TranslateResult<()> {
        self.verify_no_missing_initializers(0)?;
        let declared = self.globals.num_variables();
        if self.next_variable < declared {
            self.bc.error(
                0,
                format!(
                    "Globals block expects {declared} global variable declarations. Found: {}",
                    self.next_variable
                ),
            )?;
        }
        Ok(())
    }
}
