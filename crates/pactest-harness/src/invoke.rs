use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use pactest_core::RootLayout;
use wait_timeout::ChildExt;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const HUNG_EXIT_CODE: i32 = 124;

const GDB_PREFIX: [&str; 2] = ["gdb", "--args"];
const VALGRIND_PREFIX: [&str; 5] = [
    "valgrind",
    "-q",
    "--tool=memcheck",
    "--leak-check=full",
    "--show-reachable=yes",
];

/// How to launch the package manager under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectConfig {
    pub bin: PathBuf,
    /// Programs placed in front of the subject, e.g. `fakeroot`.
    pub wrappers: Vec<String>,
    pub debug: Option<u8>,
    pub manual_confirm: bool,
    pub nolog: bool,
    pub gdb: bool,
    pub valgrind: bool,
    pub timeout: Duration,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("pacman"),
            wrappers: Vec::new(),
            debug: None,
            manual_confirm: false,
            nolog: false,
            gdb: false,
            valgrind: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SubjectConfig {
    /// Output is captured only when nothing needs the terminal.
    pub fn captures_output(&self) -> bool {
        !(self.gdb || self.valgrind || self.nolog)
    }

    pub fn command_line(&self, layout: &RootLayout, args: &[String]) -> Vec<String> {
        let mut argv = self.wrappers.clone();
        if self.gdb {
            argv.extend(GDB_PREFIX.iter().map(ToString::to_string));
        }
        if self.valgrind {
            argv.extend(VALGRIND_PREFIX.iter().map(ToString::to_string));
        }
        argv.push(self.bin.display().to_string());
        argv.push(format!("--config={}", layout.config_file().display()));
        argv.push(format!("--root={}", layout.root().display()));
        argv.push(format!("--dbpath={}", layout.dbpath().display()));
        argv.push(format!("--cachedir={}", layout.cache_dir().display()));
        if !self.manual_confirm {
            argv.push("--noconfirm".to_string());
        }
        if let Some(level) = self.debug.filter(|level| *level > 0) {
            argv.push(format!("--debug={level}"));
        }
        argv.extend(args.iter().cloned());
        argv
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub exit_code: i32,
    pub hung: bool,
    pub output_log: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Runs the subject against `layout` with the working directory set to the
/// root's `tmp` dir, killing it once `config.timeout` elapses.
pub fn invoke_subject(
    config: &SubjectConfig,
    layout: &RootLayout,
    args: &[String],
) -> Result<Invocation> {
    let argv = config.command_line(layout, args);
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| anyhow!("subject command line is empty"))?;

    let mut command = Command::new(program);
    command.args(rest).current_dir(layout.tmp_dir());

    let output_log = if config.captures_output() {
        let log_path = layout.log_file();
        let log = File::create(&log_path)
            .with_context(|| format!("failed to create {}", log_path.display()))?;
        let log_err = log
            .try_clone()
            .with_context(|| format!("failed to share {}", log_path.display()))?;
        command.stdout(Stdio::from(log)).stderr(Stdio::from(log_err));
        Some(log_path)
    } else {
        None
    };
    if config.manual_confirm || config.gdb {
        command.stdin(Stdio::inherit());
    } else {
        command.stdin(Stdio::null());
    }

    tracing::info!(command = %argv.join(" "), "running subject");
    let started = Instant::now();
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to launch subject '{program}'"))?;

    let (exit_code, hung) = match child
        .wait_timeout(config.timeout)
        .context("failed waiting for subject")?
    {
        Some(status) => (normalize_exit(status), false),
        None => {
            tracing::warn!(timeout = ?config.timeout, "subject timed out, killing it");
            child.kill().context("failed to kill hung subject")?;
            child.wait().context("failed to reap hung subject")?;
            (HUNG_EXIT_CODE, true)
        }
    };

    let elapsed = started.elapsed();
    tracing::debug!(exit_code, hung, ?elapsed, "subject finished");
    Ok(Invocation {
        argv,
        exit_code,
        hung,
        output_log,
        elapsed,
    })
}

/// Signal terminations map to `128 + signal`, as shells report them.
pub fn normalize_exit(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}
