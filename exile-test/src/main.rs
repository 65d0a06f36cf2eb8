//! exile test dispatcher
//!
//! Runs named sandboxing scenarios in forked children and compiles YAML
//! policies for inspection.
//!
//! # Usage
//!
//! ```bash
//! exile-test list
//! exile-test run seccomp-blacklisted
//! exile-test compile policy.yaml --dump
//! ```
//!
//! `run` exits 0 on pass, 1 on failure and 2 when the kernel lacks the
//! needed feature.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use exile::PolicyFile;
use exile_common::arch::SECCOMP_DATA_NR;
use exile_common::{ArchTable, SyscallTable};

mod cases;

use cases::Outcome;

/// `ld [k]`
const LD_ABS: u16 = 0x20;
/// `jeq #k`
const JEQ_K: u16 = 0x15;
const BPF_ALU: u16 = 0x04;

/// exile scenario runner and policy compiler
#[derive(Parser, Debug)]
#[command(name = "exile-test")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List scenario names
    List,
    /// Run one scenario
    Run {
        /// Scenario name (see `list`)
        name: String,
    },
    /// Validate and compile a YAML policy without installing it
    Compile {
        /// YAML policy file
        policy: PathBuf,

        /// Print every instruction and the raw program bytes
        #[arg(long)]
        dump: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    exile_common::init_tracing(args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    match args.command {
        Command::List => {
            for case in cases::CASES {
                println!("{}", case.name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { name } => {
            let case = cases::find(&name)
                .with_context(|| format!("unknown scenario '{}' (try `list`)", name))?;
            info!("Running scenario {}", case.name);
            let outcome = (case.run)().with_context(|| format!("scenario '{}'", name))?;
            Ok(match outcome {
                Outcome::Pass => {
                    println!("{}: ok", name);
                    ExitCode::SUCCESS
                }
                Outcome::Fail(reason) => {
                    println!("{}: FAILED: {}", name, reason);
                    ExitCode::from(1)
                }
                Outcome::Skipped(reason) => {
                    println!("{}: skipped ({})", name, reason);
                    ExitCode::from(2)
                }
            })
        }
        Command::Compile { policy, dump } => {
            compile(&policy, dump)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn compile(path: &Path, dump: bool) -> Result<()> {
    let rs = PolicyFile::load(path)
        .and_then(PolicyFile::into_ruleset)
        .with_context(|| format!("Failed to load policy {}", path.display()))?;
    let compiled = rs
        .validate()
        .and_then(|policy| policy.compile())
        .context("Failed to compile policy")?;

    println!("Architecture: {}", compiled.arch());
    println!("Path rules: {}", compiled.path_rules().len());

    let Some(program) = compiled.program() else {
        println!("Instructions: 0 (no seccomp filter needed)");
        return Ok(());
    };
    println!("Instructions: {}", program.len());

    if dump {
        let table = ArchTable::new(compiled.arch());
        // Whether the accumulator currently holds the syscall number
        let mut holds_nr = false;
        for (i, insn) in program.instructions().iter().enumerate() {
            let mut line = format!(
                "{:4}: code=0x{:04x} jt={:3} jf={:3} k=0x{:08x}",
                i, insn.code, insn.jt, insn.jf, insn.k
            );
            match insn.code {
                LD_ABS => holds_nr = insn.k == SECCOMP_DATA_NR,
                JEQ_K if holds_nr => {
                    if let Some(name) = table.name_of(insn.k) {
                        line.push_str(&format!("  ; {}", name));
                    }
                }
                code if code & 0x07 == BPF_ALU => holds_nr = false,
                _ => {}
            }
            println!("{}", line);
        }
        println!();
        for chunk in program.to_bytes().chunks(8) {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            println!("{}", hex.join(" "));
        }
    }

    Ok(())
}
