use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pactest_harness::{load_test, SubjectConfig, Suite, TapSink};

use crate::render::{
    format_elapsed, render_status_line, render_summary_lines, OutputStyle, ProgressSink,
};
use crate::RunArgs;

pub(crate) fn run_tests(args: &RunArgs, style: OutputStyle) -> Result<u8> {
    let definitions = collect_definitions(&args.tests)?;
    let root = match &args.root {
        Some(root) => root.clone(),
        None => default_root(),
    };
    let subject = subject_config(args)?;
    tracing::info!(
        bin = %subject.bin.display(),
        root = %root.display(),
        tests = definitions.len(),
        "preparing suite"
    );

    let mut suite = Suite::new(subject);
    let mut load_failures = 0usize;
    for path in &definitions {
        match load_test(path, &root) {
            Ok(test) => suite.add_test(test),
            Err(err) => {
                load_failures += 1;
                eprintln!("{}", render_status_line(style, "error", &format!("{err:#}")));
            }
        }
    }

    let mut sink = ProgressSink::new(TapSink::new(std::io::stdout().lock()), style);
    let outcome = suite.run(&mut sink).map(|summary| summary.clone());
    let (_, elapsed) = sink.finish();

    if !args.keep_root {
        cleanup_root(&root);
    }
    let summary = outcome?;

    for line in render_summary_lines(&summary, style) {
        eprintln!("{line}");
    }
    eprintln!(
        "{}",
        render_status_line(
            style,
            if summary.has_failures() { "error" } else { "ok" },
            &format!("ran {} test(s) in {}", summary.total(), format_elapsed(elapsed)),
        )
    );

    if let Some(path) = &args.json_report {
        let rendered = serde_json::to_string_pretty(&summary)
            .context("failed to serialize suite summary")?;
        fs::write(path, rendered)
            .with_context(|| format!("failed to write json report {}", path.display()))?;
    }

    if load_failures > 0 || summary.has_failures() {
        Ok(1)
    } else {
        Ok(0)
    }
}

pub(crate) fn lint_tests(paths: &[PathBuf], style: OutputStyle) -> Result<u8> {
    let definitions = collect_definitions(paths)?;
    let root = default_root();
    let mut problems = 0usize;

    for path in &definitions {
        let test = match load_test(path, &root) {
            Ok(test) => test,
            Err(err) => {
                problems += 1;
                println!("{}", render_status_line(style, "error", &format!("{err:#}")));
                continue;
            }
        };
        let unevaluable = test.unevaluable_rules();
        if unevaluable.is_empty() {
            println!(
                "{}",
                render_status_line(
                    style,
                    "ok",
                    &format!("{}: {} rule(s)", test.name(), test.rules().len())
                )
            );
            continue;
        }
        problems += unevaluable.len();
        for (rule, reason) in unevaluable {
            println!(
                "{}",
                render_status_line(style, "warn", &format!("{}: {rule} ({reason})", test.name()))
            );
        }
    }

    Ok(u8::from(problems > 0))
}

/// Expands directories into their `.toml` files in name order; files are
/// kept as given.
pub(crate) fn collect_definitions(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut definitions = Vec::new();
    for path in paths {
        if !path.is_dir() {
            definitions.push(path.clone());
            continue;
        }
        let mut found = Vec::new();
        for entry in fs::read_dir(path)
            .with_context(|| format!("failed to read test directory {}", path.display()))?
        {
            let entry = entry
                .with_context(|| format!("failed to read entry in {}", path.display()))?;
            let candidate = entry.path();
            if candidate.is_file() && candidate.extension().is_some_and(|ext| ext == "toml") {
                found.push(candidate);
            }
        }
        found.sort();
        definitions.extend(found);
    }
    Ok(definitions)
}

pub(crate) fn subject_config(args: &RunArgs) -> Result<SubjectConfig> {
    Ok(SubjectConfig {
        bin: resolve_bin(&args.bin)?,
        wrappers: args.wrappers.clone(),
        debug: args.debug,
        manual_confirm: args.manual_confirm,
        nolog: args.nolog,
        gdb: args.gdb,
        valgrind: args.valgrind,
        timeout: Duration::from_secs(args.timeout),
    })
}

/// Paths with a separator are made absolute since the subject runs from
/// `<root>/tmp`; bare names are left for `PATH` lookup.
fn resolve_bin(bin: &Path) -> Result<PathBuf> {
    if bin.components().count() <= 1 {
        return Ok(bin.to_path_buf());
    }
    fs::canonicalize(bin)
        .with_context(|| format!("failed to resolve subject binary {}", bin.display()))
}

fn default_root() -> PathBuf {
    std::env::temp_dir().join(format!("pactest-root-{}", std::process::id()))
}

fn cleanup_root(root: &Path) {
    if let Err(err) = fs::remove_dir_all(root) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(root = %root.display(), error = %err, "failed to remove test root");
        }
    }
}
