//! jz compiler CLI
//!
//! Compiles program ASTs (JSON) to WebAssembly text modules.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use jzc::CompilerConfig;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "jzc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "jz compiler - compile program ASTs to WebAssembly text", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an AST (JSON) file to a .wat module
    Build {
        /// Input AST file (JSON)
        input: PathBuf,

        /// Output .wat path (defaults to the input filename with .wat)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Project configuration file (jz.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Request the GC memory model (not implemented; warns and falls
        /// back to NaN-boxed linear memory)
        #[arg(long)]
        gc: bool,

        /// Treat warnings as errors
        #[arg(long)]
        deny_warnings: bool,
    },

    /// Compile without writing output, reporting errors and warnings
    Check {
        /// Input AST files (JSON)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Project configuration file (jz.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            config,
            gc,
            deny_warnings,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("wat"));
            run_build(&input, &output, config.as_deref(), gc, deny_warnings);
        }
        Commands::Check { inputs, config } => {
            run_check(&inputs, config.as_deref());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "jzc", &mut io::stdout());
        }
    }
}

fn load_config(path: Option<&Path>, gc_flag: bool) -> CompilerConfig {
    let mut config = match path {
        Some(p) => match CompilerConfig::from_file(p) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        },
        None => CompilerConfig::new(),
    };
    if gc_flag {
        config = config.with_gc(true);
    }
    config
}

fn read_ast(path: &Path) -> serde_json::Value {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: failed to read '{}': {e}", path.display());
            process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: '{}' is not valid JSON: {e}", path.display());
            process::exit(1);
        }
    }
}

fn run_build(input: &Path, output: &Path, config: Option<&Path>, gc: bool, deny_warnings: bool) {
    let config = load_config(config, gc);
    let ast = read_ast(input);

    let result = match jzc::compile(&ast, &config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    for w in &result.warnings {
        eprintln!("warning: {w}");
    }
    if deny_warnings && !result.warnings.is_empty() {
        eprintln!(
            "error: {} warning(s) with --deny-warnings",
            result.warnings.len()
        );
        process::exit(1);
    }

    if let Err(e) = std::fs::write(output, &result.wat) {
        eprintln!("error: failed to write '{}': {e}", output.display());
        process::exit(1);
    }
    println!("wrote {}", output.display());
}

fn run_check(inputs: &[PathBuf], config: Option<&Path>) {
    let config = load_config(config, false);
    let mut failed = false;
    for input in inputs {
        let ast = read_ast(input);
        match jzc::compile(&ast, &config) {
            Ok(result) => {
                for w in &result.warnings {
                    eprintln!("{}: warning: {w}", input.display());
                }
                println!("{}: ok", input.display());
            }
            Err(e) => {
                eprintln!("{}: error: {e}", input.display());
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}
