//! Command-line driver for the translator.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use floe::bitstream::PexeReader;
use floe::context::{Flags, GlobalContext, OutputFormat};
use floe::translator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FileType {
    Asm,
    Elf,
}

#[derive(Parser, Debug)]
#[command(name = "floe")]
#[command(about = "PNaCl bitcode to ARM32 native code translator", long_about = None)]
struct Cli {
    /// Input bitcode file.
    input: PathBuf,

    /// Output file.
    #[arg(short, long)]
    output: PathBuf,

    /// Target architecture.
    #[arg(long, default_value = "arm32", value_parser = ["arm32"])]
    target: String,

    /// Output format.
    #[arg(long, value_enum, default_value_t = FileType::Asm)]
    filetype: FileType,

    /// Continue past recoverable errors with substitute values.
    #[arg(long)]
    error_recovery: bool,

    /// Prefix prepended to non-ABI symbol names, for testing.
    #[arg(long, default_value = "")]
    prefix: String,

    /// Lowering worker threads; 0 uses the host parallelism.
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Log per-function translation time.
    #[arg(long)]
    time_funcs: bool,

    /// Dump parsed IR to the log.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(num_errors) if num_errors == 0 => ExitCode::SUCCESS,
        Ok(num_errors) => {
            eprintln!("floe: {num_errors} error(s) during translation");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("floe: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<usize, Box<dyn std::error::Error>> {
    let input = fs::read(&cli.input)?;
    let mut cursor = PexeReader::new(&input)?;
    let flags = Flags {
        error_recovery: cli.error_recovery,
        output_format: match cli.filetype {
            FileType::Asm => OutputFormat::Asm,
            FileType::Elf => OutputFormat::Elf,
        },
        prefix: cli.prefix.clone(),
        threads: cli.threads,
        time_funcs: cli.time_funcs,
        verbose: cli.verbose,
    };
    let out = fs::File::create(&cli.output)?;
    let ctx = GlobalContext::new(flags, Box::new(out));
    let summary = translator::translate(&mut cursor, &ctx)?;
    for diagnostic in ctx.diagnostic_messages() {
        eprintln!("{diagnostic}");
    }
    log::debug!("translated {} function(s)", summary.functions_translated);
    Ok(summary.num_errors)
}
