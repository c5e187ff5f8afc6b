//! Crispy command-line entry.
//!
//! `crispy` with no script starts the interactive shell; `crispy
//! <script>` compiles and runs the file. Exit codes: 0 on success, 42
//! for runtime errors, 43 for compile errors, 44 for an unhandled
//! panic inside the pipeline, negative codes for I/O failures.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crispy_runtime::{InterpretError, Vm, VmOptions};

mod shell;

#[derive(Parser)]
#[command(name = "crispy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "The Crispy programming language", long_about = None)]
struct Cli {
    /// Script to execute; omit to start the interactive shell
    script: Option<PathBuf>,

    /// TOML file with VM options
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Dump the bytecode of each compiled unit to stderr
    #[arg(long)]
    dump_bytecode: bool,

    /// Trace every executed instruction to stderr
    #[arg(long)]
    trace: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut options = match VmOptions::load(cli.config.as_deref()) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            process::exit(-4);
        }
    };
    options.dump_bytecode |= cli.dump_bytecode;
    options.trace_execution |= cli.trace;

    let code = match cli.script {
        Some(path) => run_file(&path, options),
        None => shell::run(options),
    };
    process::exit(code);
}

fn run_file(path: &Path, options: VmOptions) -> i32 {
    let source = match std::fs::read(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not open file '{}': {err}", path.display());
            return -1;
        }
    };

    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut vm = Vm::with_options(false, options);
        vm.interpret(&source)
    }));

    match result {
        Ok(Ok(())) => 0,
        Ok(Err(InterpretError::Runtime(_))) => {
            eprintln!("Error while interpreting {}", path.display());
            42
        }
        Ok(Err(InterpretError::Compile(_))) => {
            eprintln!("Error while compiling {}", path.display());
            43
        }
        Err(_) => 44,
    }
}
