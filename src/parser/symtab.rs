// Value symbol table parsers. The module-level table names global
// declarations; the function-level variant names SSA values and basic blocks.
// Names are opaque byte strings decoded from the record tail. Record handling
// is shared; the entry points differ only in where a name lands, expressed as
// a single callback so the function parser can capture its state mutably.

//! Value symbol table parsers.

use crate::bitstream::abi::vst_code;
use crate::bitstream::{Cursor, Event, Record};
use crate::error::{TranslateError, TranslateResult};

use super::tables::GlobalTable;
use super::BlockCtx;

/// One symbol table entry.
pub(crate) enum Entry {
    Value(u64, String),
    Block(u64, String),
}

fn record_name(rec: &Record) -> String {
    let bytes: Vec<u8> = rec.values[1..].iter().map(|&v| v as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Parse a symbol table block. The callback returns a message when the index
/// cannot take a name; the message becomes a diagnostic.
pub(crate) fn parse_entries<C: Cursor>(
    cursor: &mut C,
    bc: &BlockCtx<'_>,
    apply: &mut dyn FnMut(Entry) -> Result<(), String>,
) -> TranslateResult<()> {
    loop {
        match cursor.next_event()? {
            Some(Event::Record(rec)) => match rec.code {
                vst_code::ENTRY => {
                    if !bc.check_size_at_least(&rec, 2, "value entry")? {
                        continue;
                    }
                    if let Err(message) = apply(Entry::Value(rec.values[0], record_name(&rec))) {
                        bc.error(rec.bit_offset, message)?;
                    }
                }
                vst_code::BBENTRY => {
                    if !bc.check_size_at_least(&rec, 2, "basic block entry")? {
                        continue;
                    }
                    if let Err(message) = apply(Entry::Block(rec.values[0], record_name(&rec))) {
                        bc.error(rec.bit_offset, message)?;
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
                    "bitstream ended inside valuesymtab block".to_string(),
                ))
            }
        }
    }
}

/// Module-level table: assigns names to global declaration IDs.
pub(crate) fn parse_module_symtab<C: Cursor>(
    cursor: &mut C,
    bc: &BlockCtx<'_>,
    globals: &mut GlobalTable,
) -> TranslateResult<()> {
    parse_entries(cursor, bc, &mut |entry| match entry {
        Entry::Value(index, name) => {
            if globals.set_name(index as u32, name) {
                Ok(())
            } else {
                Err(format!("Global id {index} not defined, can't be named"))
            }
        }
        Entry::Block(index, name) => Err(format!(
            "Basic block name '{name}' for index {index} not allowed in module symbol table"
        )),
    })
}
