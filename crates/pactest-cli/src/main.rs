use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod commands;
mod completion;
mod render;

use completion::CliCompletionShell;
use render::resolve_output_style;

#[derive(Parser, Debug)]
#[command(name = "pactest")]
#[command(about = "Black-box test harness for the pacman package manager", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run test definitions against the subject binary.
    Run(RunArgs),
    /// Parse test definitions and flag rules that can never be evaluated.
    Lint {
        #[arg(required = true)]
        tests: Vec<PathBuf>,
    },
    Completion {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Test definition files or directories of `.toml` definitions.
    #[arg(required = true)]
    tests: Vec<PathBuf>,
    /// Package manager binary under test.
    #[arg(short = 'p', long = "pacman", default_value = "pacman")]
    bin: PathBuf,
    /// Program to run the subject through, e.g. fakeroot. Repeatable.
    #[arg(long = "wrapper")]
    wrappers: Vec<String>,
    /// Pass --debug=<LEVEL> to the subject.
    #[arg(short, long)]
    debug: Option<u8>,
    /// Directory used as the throwaway root for every test.
    #[arg(long)]
    root: Option<PathBuf>,
    #[arg(long)]
    keep_root: bool,
    /// Do not capture subject output to the log file.
    #[arg(long)]
    nolog: bool,
    #[arg(long)]
    gdb: bool,
    #[arg(long)]
    valgrind: bool,
    /// Omit --noconfirm so the subject prompts.
    #[arg(long)]
    manual_confirm: bool,
    /// Seconds before a running subject is killed.
    #[arg(long, default_value_t = 120)]
    timeout: u64,
    /// Write the run summary as JSON to this path.
    #[arg(long)]
    json_report: Option<PathBuf>,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let style = resolve_output_style(
        std::io::stdout().is_terminal(),
        std::io::stderr().is_terminal(),
    );

    let code = match cli.command {
        Commands::Run(args) => commands::run_tests(&args, style)?,
        Commands::Lint { tests } => commands::lint_tests(&tests, style)?,
        Commands::Completion { shell } => {
            completion::write_completions_script(shell, &mut std::io::stdout().lock())?;
            0
        }
    };

    Ok(ExitCode::from(code))
}
