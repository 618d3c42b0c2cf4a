// Global translation state shared by the parser and the lowering workers. The
// context owns the two pieces of process-wide mutable state the translator
// needs: the serialized output stream and the diagnostic accumulator. Tables
// that are write-once during parsing (interned constant symbols) live behind a
// mutex but are only written from the producer thread. Tests build one context
// per scenario, usually writing into a Vec<u8>.

//! Translation context: flags, diagnostics, output serialization.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::ir::GlobalId;

/// Output formats selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Textual assembly.
    Asm,
    /// Relocatable ELF object.
    Elf,
}

/// Configuration assembled by the driver before translation starts.
#[derive(Debug, Clone)]
pub struct Flags {
    /// Continue after diagnosable errors with substitute values instead of
    /// aborting on the first one.
    pub error_recovery: bool,
    pub output_format: OutputFormat,
    /// Prefix prepended to non-ABI symbol names, for testing. Empty disables
    /// mangling.
    pub prefix: String,
    /// Worker count for the lowering pool; 0 selects the host parallelism.
    pub threads: usize,
    /// Log per-function translation wall time.
    pub time_funcs: bool,
    /// Dump parsed IR before lowering.
    pub verbose: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            error_recovery: false,
            output_format: OutputFormat::Asm,
            prefix: String::new(),
            threads: 1,
            time_funcs: false,
            verbose: false,
        }
    }
}

/// A recoverable diagnostic, tagged with the bit position of the offending
/// record and the name of the block being parsed.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub bit_offset: u64,
    pub block: &'static str,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{}) {}", self.bit_offset / 8, self.bit_offset % 8, self.message)
    }
}

/// An interned relocatable symbol, created on first reference to a global
/// declaration from a function body. The lowering resolves every symbol it
/// emits through this table: `offset` becomes the relocation addend and
/// `suppress_mangling` marks ABI-fixed names the prefix must not touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocSymbol {
    pub offset: i64,
    pub name: String,
    pub suppress_mangling: bool,
}

/// Process-wide translation state.
pub struct GlobalContext {
    pub flags: Flags,
    diagnostics: Mutex<Vec<Diagnostic>>,
    num_errors: AtomicUsize,
    translation_disabled: AtomicBool,
    out: Mutex<Box<dyn Write + Send>>,
    symbols: Mutex<HashMap<GlobalId, Arc<RelocSymbol>>>,
}

impl GlobalContext {
    pub fn new(flags: Flags, out: Box<dyn Write + Send>) -> Self {
        Self {
            flags,
            diagnostics: Mutex::new(Vec::new()),
            num_errors: AtomicUsize::new(0),
            translation_disabled: AtomicBool::new(false),
            out: Mutex::new(out),
            symbols: Mutex::new(HashMap::new()),
        }
    }

    /// Record a diagnostic. Once any error is recorded, later functions are
    /// still parsed but no longer translated.
    pub fn report(&self, diag: Diagnostic) {
        log::debug!("diagnostic: {diag}");
        self.num_errors.fetch_add(1, Ordering::SeqCst);
        self.translation_disabled.store(true, Ordering::SeqCst);
        self.diagnostics.lock().unwrap().push(diag);
    }

    pub fn num_errors(&self) -> usize {
        self.num_errors.load(Ordering::SeqCst)
    }

    pub fn translation_disabled(&self) -> bool {
        self.translation_disabled.load(Ordering::SeqCst)
    }

    /// Snapshot of the accumulated diagnostics, rendered.
    pub fn diagnostic_messages(&self) -> Vec<String> {
        self.diagnostics.lock().unwrap().iter().map(|d| d.to_string()).collect()
    }

    /// Raw diagnostics, for message-content assertions.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap().clone()
    }

    /// Write one function's worth of output under the stream lock.
    pub fn write_output(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut out = self.out.lock().unwrap();
        out.write_all(bytes)
    }

    pub fn flush_output(&self) -> std::io::Result<()> {
        self.out.lock().unwrap().flush()
    }

    /// Intern the relocatable symbol for a global declaration. The closure
    /// runs only on the first reference.
    pub fn constant_symbol(
        &self,
        id: GlobalId,
        make: impl FnOnce() -> RelocSymbol,
    ) -> Arc<RelocSymbol> {
        let mut symbols = self.symbols.lock().unwrap();
        symbols.entry(id).or_insert_with(|| Arc::new(make())).clone()
    }

    /// The interned symbol for a global ID, if any function body referenced
    /// it. The table is write-once during parsing, so this is the read side
    /// the lowering workers use.
    pub fn find_symbol(&self, id: GlobalId) -> Option<Arc<RelocSymbol>> {
        self.symbols.lock().unwrap().get(&id).cloned()
    }

    /// Apply the symbol prefix. ABI-fixed names (`suppress_mangling`) and
    /// runs without a prefix come back unchanged.
    pub fn mangle_name(&self, name: &str, suppress_mangling: bool) -> String {
        if suppress_mangling || self.flags.prefix.is_empty() {
            return name.to_string();
        }
        format!("{}{name}", self.flags.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> GlobalContext {
        GlobalContext::new(Flags::default(), Box::new(Vec::new()))
    }

    #[test]
    fn test_diagnostic_prefix() {
        let diag = Diagnostic { bit_offset: 42, block: "function", message: "boom".to_string() };
        assert_eq!(diag.to_string(), "(5:2) boom");
    }

    #[test]
    fn test_error_disables_translation() {
        let ctx = test_context();
        assert!(!ctx.translation_disabled());
        ctx.report(Diagnostic { bit_offset: 0, block: "module", message: "bad".to_string() });
        assert!(ctx.translation_disabled());
        assert_eq!(ctx.num_errors(), 1);
    }

    #[test]
    fn test_symbols_interned_once() {
        let ctx = test_context();
        let a = ctx.constant_symbol(3, || RelocSymbol {
            offset: 0,
            name: "f3".to_string(),
            suppress_mangling: false,
        });
        let b = ctx.constant_symbol(3, || panic!("must not be called twice"));
        assert!(Arc::ptr_eq(&a, &b));
        let found = ctx.find_symbol(3).unwrap();
        assert!(Arc::ptr_eq(&a, &found));
        assert!(ctx.find_symbol(4).is_none());
    }

    #[test]
    fn test_mangling_honors_prefix_and_suppression() {
        let ctx = test_context();
        assert_eq!(ctx.mangle_name("f0", false), "f0");
        let flags = Flags { prefix: "tp$".to_string(), ..Flags::default() };
        let ctx = GlobalContext::new(flags, Box::new(Vec::new()));
        assert_eq!(ctx.mangle_name("f0", false), "tp$f0");
        // ABI-fixed names are never prefixed.
        assert_eq!(ctx.mangle_name("memcpy", true), "memcpy");
    }
}
