// Types block parser. Each record defines the next dense type ID; the NUMENTRY
// record pre-sizes the table. Illegal shapes (bad integer widths, vector
// combinations outside the legal set, vararg signatures, void parameters) are
// diagnosed and recovered per the usual substitution rules.

//! Types block parser.

use crate::bitstream::abi::type_code;
use crate::bitstream::{Cursor, Event, Record};
use crate::error::TranslateResult;
use crate::ir::{FuncSig, Type};

use super::tables::{ExtendedType, TypeTable};
use super::BlockCtx;

pub(crate) fn parse<C: Cursor>(
    cursor: &mut C,
    bc: &BlockCtx<'_>,
    table: &mut TypeTable,
) -> TranslateResult<()> {
    let mut parser = TypesParser { bc, table, next_type_id: 0 };
    loop {
        match cursor.next_event()? {
            Some(Event::Record(rec)) => parser.process_record(&rec)?,
            Some(Event::Enter { block_id }) => {
                bc.error(0, format!("Don't know how to parse block id: {block_id}"))?;
                cursor.skip_block()?;
            }
            Some(Event::Exit) => return Ok(()),
            None => {
                return Err(crate::error::TranslateError::Fatal(
                    "bitstream ended inside types block".to_string(),
                ))
            }
        }
    }
}

struct TypesParser<'a, 'c> {
    bc: &'a BlockCtx<'c>,
    table: &'a mut TypeTable,
    next_type_id: u32,
}

impl TypesParser<'_, '_> {
    fn define_next(&mut self, rec: &Record, ty: ExtendedType) -> TranslateResult<()> {
        let id = self.next_type_id;
        self.next_type_id += 1;
        if let Err(message) = self.table.define(id, ty) {
            self.bc.error(rec.bit_offset, message)?;
        }
        Ok(())
    }

    fn simple_type(&self, rec: &Record, id: u64) -> TranslateResult<Type> {
        match self.table.get_simple(id) {
            Ok(ty) => Ok(ty),
            Err(message) => {
                self.bc.error(rec.bit_offset, message)?;
                Ok(Type::Void)
            }
        }
    }

    fn process_record(&mut self, rec: &Record) -> TranslateResult<()> {
        match rec.code {
            type_code::NUMENTRY => {
                if !self.bc.check_size(rec, 1, "count")? {
                    return Ok(());
                }
                self.table.resize(rec.values[0] as usize);
                Ok(())
            }
            type_code::VOID => {
                if !self.bc.check_size(rec, 0, "void")? {
                    return Ok(());
                }
                self.define_next(rec, ExtendedType::Simple(Type::Void))
            }
            type_code::FLOAT => {
                if !self.bc.check_size(rec, 0, "float")? {
                    return Ok(());
                }
                self.define_next(rec, ExtendedType::Simple(Type::F32))
            }
            type_code::DOUBLE => {
                if !self.bc.check_size(rec, 0, "double")? {
                    return Ok(());
                }
                self.define_next(rec, ExtendedType::Simple(Type::F64))
            }
            type_code::INTEGER => {
                if !self.bc.check_size(rec, 1, "integer")? {
                    return Ok(());
                }
                let ty = match rec.values[0] {
                    1 => Type::I1,
                    8 => Type::I8,
                    16 => Type::I16,
                    32 => Type::I32,
                    64 => Type::I64,
                    width => {
                        return self.bc.error(
                            rec.bit_offset,
                            format!("Type integer record with invalid bitsize: {width}"),
                        );
                    }
                };
                self.define_next(rec, ExtendedType::Simple(ty))
            }
            type_code::VECTOR => {
                if !self.bc.check_size(rec, 2, "vector")? {
                    return Ok(());
                }
                let base = self.simple_type(rec, rec.values[1])?;
                let size = rec.values[0];
                let ty = match (base, size) {
                    (Type::I1, 4) => Some(Type::V4I1),
                    (Type::I1, 8) => Some(Type::V8I1),
                    (Type::I1, 16) => Some(Type::V16I1),
                    (Type::I8, 16) => Some(Type::V16I8),
                    (Type::I16, 8) => Some(Type::V8I16),
                    (Type::I32, 4) => Some(Type::V4I32),
                    (Type::F32, 4) => Some(Type::V4F32),
                    _ => None,
                };
                match ty {
                    Some(ty) => self.define_next(rec, ExtendedType::Simple(ty)),
                    None => self.bc.error(
                        rec.bit_offset,
                        format!("Invalid type vector record: <{size} x {base}>"),
                    ),
                }
            }
            type_code::FUNCTION => {
                if !self.bc.check_size_at_least(rec, 2, "signature")? {
                    return Ok(());
                }
                if rec.values[0] != 0 {
                    self.bc.error(rec.bit_offset, "Function type can't define varargs")?;
                }
                let ret = self.simple_type(rec, rec.values[1])?;
                let mut sig = FuncSig::new(ret);
                for (index, &value) in rec.values[2..].iter().enumerate() {
                    let mut arg = self.simple_type(rec, value)?;
                    if arg == Type::Void {
                        self.bc.error(
                            rec.bit_offset,
                            format!("Type for parameter {} not valid. Found: {arg}", index + 1),
                        )?;
                        arg = Type::I32;
                    }
                    sig.args.push(arg);
                }
                self.define_next(rec, ExtendedType::Signature(sig))
            }
            _ => self.bc.unknown_record(rec),
        }
    }
}
