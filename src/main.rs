use std::io::{self, Write};
use std::process::Command;

use anyhow::{Context, Result};
use ptdbg::{shell, syscall, Execute, Ptracer, SessionConfig, TracerThread};
use structopt::clap::AppSettings;
use structopt::StructOpt;
use tracing::info;

mod logging;

use logging::LogFormat;

#[derive(StructOpt, Debug)]
#[structopt(name = "ptdbg", about = "Trace the syscalls of a program, or debug it, with ptrace(2)")]
struct Opt {
    /// Log output format on stderr: `pretty` or `json`. Filtered by `RUST_LOG`.
    #[structopt(long, default_value = "pretty")]
    log_format: LogFormat,

    #[structopt(subcommand)]
    cmd: Subcommand,
}

#[derive(StructOpt, Debug)]
enum Subcommand {
    /// Run a program and print the number of each syscall it completes
    #[structopt(setting = AppSettings::TrailingVarArg)]
    Strace {
        #[structopt(required = true, min_values = 1)]
        argv: Vec<String>,
    },

    /// Run a program under an interactive breakpoint debugger
    #[structopt(setting = AppSettings::TrailingVarArg)]
    Debug {
        /// Write the original bytes back over all breakpoints when the session ends
        #[structopt(long)]
        restore_breakpoints: bool,

        #[structopt(required = true, min_values = 1)]
        argv: Vec<String>,
    },
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    logging::init(opt.log_format)?;

    match opt.cmd {
        Subcommand::Strace { argv } => strace(&argv),
        Subcommand::Debug { restore_breakpoints, argv } => {
            let config = SessionConfig { restore_breakpoints_on_exit: restore_breakpoints };
            debug(&argv, config)
        },
    }
}

fn command(argv: &[String]) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd
}

fn strace(argv: &[String]) -> Result<()> {
    info!(?argv, "running command");

    let tracer = Ptracer::spawn(command(argv))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let last = syscall::trace(tracer, |event| {
        writeln!(out, "{}", event)?;
        Ok(())
    })
    .context("syscall trace failed")?;

    info!(%last, "trace complete");

    Ok(())
}

fn debug(argv: &[String], config: SessionConfig) -> Result<()> {
    let mut tracer = TracerThread::spawn(command(argv), config)?;

    println!("Debugging started for {}, pid {}", argv[0], tracer.pid());
    info!(commands = ?tracer.commands(), "session ready");

    let stdin = io::stdin();
    shell::run(&mut tracer, stdin.lock(), io::stdout()).context("debugging session failed")?;

    tracer.shutdown()?;

    Ok(())
}
