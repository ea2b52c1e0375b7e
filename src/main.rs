//! CLI driver. A plain positional-file compiler invocation (spec.md §6),
//! not a subcommand dispatcher — grounded on the *shape* of the teacher's
//! `main.rs` (a `clap::Parser` derive struct feeding a `CompilerConfig`
//! into a `compile_*` entry point) without its subcommand layer, which has
//! no analog in this crate's external interface.

use clap::Parser as ClapParser;
use dccc::asm::AssemblerSyntax;
use dccc::config::{CompilerConfig, OutputKind};
use dccc::{compile_and_link_files, compile_source};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(ClapParser, Debug)]
#[command(name = "dccc", about = "Compile a restricted C dialect to DCPU-16-style assembly")]
struct Cli {
    /// Source files to compile.
    files: Vec<PathBuf>,

    /// Emit assembly text only; skip assembling and linking.
    #[arg(short = 'S', long = "assembly-only")]
    assembly_only: bool,

    /// Assembly dialect accepted/emitted: `notch` (default) or `sca`.
    #[arg(long = "syntax", default_value = "notch")]
    syntax: String,

    /// Disable the AST/IR optimization passes.
    #[arg(long = "no-optimize")]
    no_optimize: bool,

    /// Output file; defaults to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let syntax = match cli.syntax.as_str() {
        "notch" => AssemblerSyntax::Notch,
        "sca" => AssemblerSyntax::Sca,
        other => {
            eprintln!("error: unknown --syntax '{}', expected 'notch' or 'sca'", other);
            return ExitCode::FAILURE;
        }
    };

    if cli.files.is_empty() {
        eprintln!("error: no input files");
        return ExitCode::FAILURE;
    }

    let config = CompilerConfig::builder()
        .emit_syntax(syntax)
        .optimize(!cli.no_optimize)
        .output(if cli.assembly_only { OutputKind::Assembly } else { OutputKind::Linked })
        .build();

    let mut sources = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("error: cannot read {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        };
        sources.push((path.display().to_string(), text));
    }

    if cli.assembly_only {
        // `-S` always reports per-file, since there is nothing to link.
        let mut out = String::new();
        let mut source_texts = std::collections::HashMap::new();
        for (name, src) in &sources {
            source_texts.insert(name.clone(), src.clone());
            match compile_source(src, name, &config) {
                Ok(result) => {
                    if !result.diagnostics.is_empty() {
                        eprint!("{}", result.diagnostics.render_all(&source_texts));
                    }
                    out.push_str(&result.assembly);
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        return write_output(&cli.output, &out);
    }

    let source_texts: std::collections::HashMap<String, String> = sources.iter().cloned().collect();
    match compile_and_link_files(&sources, &config) {
        Ok((words, diagnostics)) => {
            if !diagnostics.is_empty() {
                eprint!("{}", diagnostics.render_all(&source_texts));
            }
            let hex = words.iter().map(|w| format!("{:04x}", w)).collect::<Vec<_>>().join(" ");
            write_output(&cli.output, &hex)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn write_output(path: &Option<PathBuf>, text: &str) -> ExitCode {
    match path {
        Some(p) => match fs::write(p, text) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: cannot write {}: {}", p.display(), e);
                ExitCode::FAILURE
            }
        },
        None => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
    }
}
