//=====================================================
// File: main.rs
//=====================================================
// Goal: RigVM CLI entry point
// Objective: Assemble, run, disassemble and fingerprint RigVM programs
//            and list the functions a registry offers
//=====================================================

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use rigvm::commands::{self, RunRequest};
use rigvm::config::Config;
use rigvm::host::build_dispatch;
use rigvm::logging::install_tracing;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "rigvm", about = "RigVM bytecode toolchain")]
pub struct Args {
    /// Configuration file; defaults to rigvm/rigvm.toml in the user config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable interpreter debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Assemble a .rvasm file into a .rvpk package.
    Assemble(AssembleArgs),
    /// Run an entry of a source file or package.
    Run(RunArgs),
    /// Print a program as assembly.
    Disasm(InputArgs),
    /// Print the structural hash of a program's bytecode.
    Hash(InputArgs),
    /// List templates, permutations and plain functions.
    Functions(FunctionsArgs),
    /// Write the default configuration file.
    InitConfig(InitConfigArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct AssembleArgs {
    pub input: PathBuf,
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Drop operand alignment padding.
    #[arg(long)]
    pub packed: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Source (.rvasm) or package (.rvpk).
    pub input: PathBuf,

    /// Entry to run; defaults to the configured entry.
    #[arg(short, long)]
    pub entry: Option<String>,

    /// External register override, NAME=VALUE. Repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub set: Vec<String>,

    /// Trace every executed instruction.
    #[arg(long)]
    pub trace: bool,

    /// Collect and print an execution profile.
    #[arg(long)]
    pub profile: bool,

    /// Run the entry this many times on the same memory.
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,

    /// Print the outcome and memory as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct InputArgs {
    pub input: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct FunctionsArgs {
    /// Only this template or function.
    pub name: Option<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct InitConfigArgs {
    /// Destination; defaults to the user config directory.
    pub path: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (config, config_path) = Config::load(args.config.as_deref())?;
    install_tracing(&config.log_filter, args.verbose);
    debug!(config = ?config_path, "configuration loaded");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.command {
        Command::Assemble(cmd) => {
            let dispatch = build_dispatch(&config)?;
            commands::assemble_file(&cmd.input, &cmd.output, cmd.packed, &dispatch, &mut out)?;
        }
        Command::Run(cmd) => {
            let dispatch = build_dispatch(&config)?;
            let mut options = config.vm.clone();
            options.trace |= cmd.trace;
            options.profile |= cmd.profile;
            let entry = cmd.entry.as_deref().unwrap_or(&config.default_entry);
            commands::run_file(
                RunRequest {
                    input: &cmd.input,
                    entry,
                    externals: &cmd.set,
                    options,
                    repeat: cmd.repeat,
                    json: cmd.json,
                },
                &dispatch,
                &mut out,
            )?;
        }
        Command::Disasm(cmd) => {
            let dispatch = build_dispatch(&config)?;
            commands::disassemble_file(&cmd.input, &dispatch, &mut out)?;
        }
        Command::Hash(cmd) => {
            let dispatch = build_dispatch(&config)?;
            commands::hash_file(&cmd.input, &dispatch, &mut out)?;
        }
        Command::Functions(cmd) => {
            let dispatch = build_dispatch(&config)?;
            commands::list_functions(&dispatch, cmd.name.as_deref(), cmd.json, &mut out)?;
        }
        Command::InitConfig(cmd) => {
            let path = cmd
                .path
                .or_else(Config::default_path)
                .ok_or_else(|| anyhow!("unable to determine configuration directory"))?;
            commands::write_default_config(&path, &mut out)?;
        }
    }
    out.flush()?;
    Ok(())
}

//=====================================================
// End of file
//=====================================================
