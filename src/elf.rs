// Relocatable ELF emission over the `object` crate. The writer owns the
// sections, symbols and relocations for the generated code: functions land in
// .text with their call/movw/movt relocations, global variables in .data,
// .rodata or .bss depending on constness and initializer shape, with
// address-of-global initializers becoming R_ARM_ABS32 entries.

//! ELF object writer for the ARM32 target.

use std::collections::HashMap;

use object::write::{
    Object, Relocation, SectionId, StandardSection, Symbol, SymbolId, SymbolSection,
};
use object::{Architecture, BinaryFormat, Endianness, RelocationFlags, SymbolKind, SymbolScope};

use crate::arm32::assembler::{Reloc, RelocKind};
use crate::context::GlobalContext;
use crate::error::{TranslateError, TranslateResult};
use crate::parser::{GlobalTable, Initializer, VariableDecl};

/// Builds one relocatable object for the whole module.
pub struct ElfWriter {
    obj: Object<'static>,
    symbols: HashMap<String, SymbolId>,
}

impl ElfWriter {
    /// Write the initial header state: an empty ARM little-endian ELF.
    pub fn new() -> Self {
        let obj = Object::new(BinaryFormat::Elf, Architecture::Arm, Endianness::Little);
        Self { obj, symbols: HashMap::new() }
    }

    /// Symbol for `name`, creating an undefined reference on first use.
    fn symbol_id(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.symbols.get(name) {
            return id;
        }
        let id = self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: 0,
            size: 0,
            kind: SymbolKind::Unknown,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Undefined,
            flags: object::write::SymbolFlags::None,
        });
        self.symbols.insert(name.to_string(), id);
        id
    }

    fn define(
        &mut self,
        name: &str,
        internal: bool,
        kind: SymbolKind,
        section: SectionId,
        offset: u64,
        size: u64,
    ) {
        let id = self.symbol_id(name);
        let symbol = self.obj.symbol_mut(id);
        symbol.kind = kind;
        symbol.scope = if internal { SymbolScope::Compilation } else { SymbolScope::Linkage };
        symbol.section = SymbolSection::Section(section);
        symbol.value = offset;
        symbol.size = size;
    }

    /// Append one function's code to .text and attach its relocations.
    pub fn emit_function(
        &mut self,
        name: &str,
        internal: bool,
        bytes: &[u8],
        relocs: &[Reloc],
    ) -> TranslateResult<()> {
        let text = self.obj.section_id(StandardSection::Text);
        let offset = self.obj.append_section_data(text, bytes, 4);
        self.define(name, internal, SymbolKind::Text, text, offset, bytes.len() as u64);
        for reloc in relocs {
            let symbol = self.symbol_id(&reloc.symbol);
            let r_type = match reloc.kind {
                RelocKind::Call => object::elf::R_ARM_CALL,
                RelocKind::MovwAbs => object::elf::R_ARM_MOVW_ABS_NC,
                RelocKind::MovtAbs => object::elf::R_ARM_MOVT_ABS,
            };
            self.obj
                .add_relocation(
                    text,
                    Relocation {
                        offset: offset + reloc.offset,
                        symbol,
                        addend: reloc.addend,
                        flags: RelocationFlags::Elf { r_type },
                    },
                )
                .map_err(|e| TranslateError::Object(e.to_string()))?;
        }
        Ok(())
    }

    /// Emit every declared global variable into the appropriate section.
    /// Variable names are module-private and take the symbol prefix.
    pub fn emit_globals(&mut self, ctx: &GlobalContext, globals: &GlobalTable) -> TranslateResult<()> {
        for var in &globals.variables {
            self.emit_variable(ctx, var, globals)?;
        }
        Ok(())
    }

    fn emit_variable(
        &mut self,
        ctx: &GlobalContext,
        var: &VariableDecl,
        globals: &GlobalTable,
    ) -> TranslateResult<()> {
        let name = ctx.mangle_name(&var.name, false);
        let total: u64 = var.initializers.iter().map(Initializer::size_in_bytes).sum();
        let zero_fill_only =
            var.initializers.iter().all(|init| matches!(init, Initializer::ZeroFill(_)));
        let align = var.align.max(1) as u64;
        if zero_fill_only {
            let bss = self.obj.section_id(StandardSection::UninitializedData);
            let offset = self.obj.append_section_bss(bss, total, align);
            self.define(&name, true, SymbolKind::Data, bss, offset, total);
            return Ok(());
        }
        let section = if var.constant {
            self.obj.section_id(StandardSection::ReadOnlyData)
        } else {
            self.obj.section_id(StandardSection::Data)
        };
        let mut bytes = Vec::with_capacity(total as usize);
        let mut relocs = Vec::new();
        for init in &var.initializers {
            match init {
                Initializer::ZeroFill(n) => bytes.resize(bytes.len() + *n as usize, 0),
                Initializer::Data(data) => bytes.extend_from_slice(data),
                Initializer::Reloc { target, addend } => {
                    let target_name = ctx.mangle_name(
                        globals.name(*target).unwrap_or(""),
                        globals.suppress_mangling(*target),
                    );
                    relocs.push((bytes.len() as u64, target_name, *addend));
                    bytes.extend_from_slice(&[0; 4]);
                }
            }
        }
        let offset = self.obj.append_section_data(section, &bytes, align);
        self.define(&name, true, SymbolKind::Data, section, offset, total);
        for (reloc_offset, target_name, addend) in relocs {
            let symbol = self.symbol_id(&target_name);
            self.obj
                .add_relocation(
                    section,
                    Relocation {
                        offset: offset + reloc_offset,
                        symbol,
                        addend,
                        flags: RelocationFlags::Elf { r_type: object::elf::R_ARM_ABS32 },
                    },
                )
                .map_err(|e| TranslateError::Object(e.to_string()))?;
        }
        Ok(())
    }

    /// Finish the object and return its bytes.
    pub fn finish(self) -> TranslateResult<Vec<u8>> {
        self.obj.write().map_err(|e| TranslateError::Object(e.to_string()))
    }
}

impl Default for ElfWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{Object as _, ObjectSection, ObjectSymbol};

    #[test]
    fn test_function_and_symbol() {
        let mut writer = ElfWriter::new();
        // bx lr
        writer
            .emit_function("answer", false, &0xE12F_FF1Eu32.to_le_bytes(), &[])
            .unwrap();
        let bytes = writer.finish().unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        assert!(file.section_by_name(".text").is_some());
        let symbol = file.symbols().find(|s| s.name() == Ok("answer")).unwrap();
        assert_eq!(symbol.size(), 4);
    }

    #[test]
    fn test_call_relocation() {
        let mut writer = ElfWriter::new();
        let relocs = vec![Reloc {
            offset: 0,
            kind: RelocKind::Call,
            symbol: "memcpy".to_string(),
            addend: -8,
        }];
        writer
            .emit_function("f", false, &0xEBFF_FFFEu32.to_le_bytes(), &relocs)
            .unwrap();
        let bytes = writer.finish().unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        assert_eq!(text.relocations().count(), 1);
    }

    #[test]
    fn test_globals_placement() {
        let ctx = GlobalContext::new(crate::context::Flags::default(), Box::new(Vec::new()));
        let mut globals = GlobalTable::default();
        globals.declare_variables(2);
        globals.variables[0].initializers.push(Initializer::Data(vec![1, 2, 3, 4]));
        globals.variables[1].initializers.push(Initializer::ZeroFill(64));
        let mut writer = ElfWriter::new();
        writer.emit_globals(&ctx, &globals).unwrap();
        let bytes = writer.finish().unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        assert!(file.section_by_name(".data").is_some());
        assert!(file.section_by_name(".bss").is_some());
    }
}
