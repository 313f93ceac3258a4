//! `cc`: command-line driver for the compiler.

use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process;

use nsc::{compile_file, preprocess_file, render_preprocessed, CompilerConfig};

#[derive(ClapParser)]
#[command(name = "cc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile a subset of C to x86-64 GAS/Intel assembly", long_about = None)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Append `dir` to the include search path (`-I<dir>`).
    #[arg(short = 'I', value_name = "dir")]
    include_dirs: Vec<PathBuf>,

    /// Run the preprocessor only and print the expanded token stream.
    #[arg(short = 'E')]
    preprocess_only: bool,

    /// Define an object-like macro: `-D name[=value]` (value defaults to `1`).
    #[arg(short = 'D', value_name = "name[=value]")]
    defines: Vec<String>,

    /// Undefine a macro.
    #[arg(short = 'U', value_name = "name")]
    undefs: Vec<String>,

    /// gcc-style glued `-f` flags; only `-fpic` has any effect.
    #[arg(short = 'f', value_name = "flag")]
    f_flags: Vec<String>,

    /// Print usage and exit.
    #[arg(short = 'h', long = "help", action = clap::ArgAction::SetTrue)]
    help: bool,

    /// C source file to compile.
    input: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if cli.help {
        let _ = <Cli as clap::CommandFactory>::command().print_help();
        println!();
        // Exits 1 even on an explicitly requested usage message; no flag
        // combination here counts as "success".
        process::exit(1);
    }

    let Some(input) = cli.input else {
        eprintln!("cc: no input file");
        process::exit(1);
    };

    let config = build_config(&cli);

    if cli.preprocess_only {
        match preprocess_file(&input, &config) {
            Ok(tokens) => {
                print!("{}", render_preprocessed(&tokens));
                process::exit(0);
            }
            Err(e) => {
                eprint!("{e}");
                process::exit(1);
            }
        }
    }

    match compile_file(&input, &config) {
        Ok(asm) => {
            print!("{asm}");
            process::exit(0);
        }
        Err(e) => {
            eprint!("{e}");
            process::exit(1);
        }
    }
}

/// Builds a [`CompilerConfig`] from parsed flags, prepending `INCLUDE_PATH`
/// (colon-separated, `PATH`-like) ahead of any `-I` directories.
fn build_config(cli: &Cli) -> CompilerConfig {
    let mut config = CompilerConfig::new();

    if let Ok(env_path) = std::env::var("INCLUDE_PATH") {
        for dir in env_path.split(':').filter(|s| !s.is_empty()) {
            config = config.with_include_dir(dir);
        }
    }
    for dir in &cli.include_dirs {
        config = config.with_include_dir(dir.clone());
    }

    for d in &cli.defines {
        match d.split_once('=') {
            Some((name, value)) => config = config.with_define(name, value),
            None => config = config.with_define(d, "1"),
        }
    }
    for u in &cli.undefs {
        config = config.with_undefine(u);
    }

    let pic = cli.f_flags.iter().any(|f| f == "pic");
    config.with_preprocess_only(cli.preprocess_only).with_pic(pic)
}
