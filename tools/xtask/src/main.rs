//! Workspace automation tasks.
//!
//! Run with: `cargo xtask <command>`

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

/// Lint attributes every library crate root must carry.
const CRATE_LINTS: &[&str] = &[
    "#![forbid(unsafe_code)]",
    "#![deny(missing_docs)]",
    "#![deny(rust_2018_idioms)]",
    "#![warn(clippy::pedantic)]",
];

/// Crates that declare this may panic on `unwrap`/`expect` outside tests.
const PANIC_OPT_OUT: &str = "#![allow(clippy::unwrap_used)]";

#[derive(Parser)]
#[command(name = "xtask", about = "Tessera workspace automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format, lint, test and document the workspace, then check conventions
    Ci,
    /// Check crate naming, crate-level lints and panic-free library code
    Lint,
    /// Run the lock and journal property suites with more cases
    Props {
        /// Cases per property
        #[arg(long, default_value_t = 2048)]
        cases: u32,
    },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Ci => run_ci(),
        Commands::Lint => run_lint(Path::new("crates")),
        Commands::Props { cases } => run_props(cases),
    }
}

fn run_ci() -> Result<()> {
    let steps: [&[&str]; 4] = [
        &["fmt", "--check"],
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        &["test", "--workspace"],
        &["doc", "--workspace", "--no-deps"],
    ];
    for args in steps {
        cargo(args, &[])?;
    }
    run_lint(Path::new("crates"))?;
    println!("\nci: ok");
    Ok(())
}

fn run_props(cases: u32) -> Result<()> {
    let cases = cases.to_string();
    for (package, suite) in [
        ("tessera-core", "path_lock_properties"),
        ("tessera-flow", "journal_properties"),
    ] {
        cargo(
            &["test", "-p", package, "--test", suite],
            &[("PROPTEST_CASES", cases.as_str())],
        )?;
    }
    Ok(())
}

fn run_lint(crates_dir: &Path) -> Result<()> {
    let mut problems = Vec::new();
    for root in crate_roots(crates_dir)? {
        problems.extend(lint_crate(&root)?);
    }

    if problems.is_empty() {
        println!("lint: ok");
        return Ok(());
    }
    for problem in &problems {
        eprintln!("{problem}");
    }
    anyhow::bail!("{} convention violation(s)", problems.len())
}

fn crate_roots(crates_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut roots = std::fs::read_dir(crates_dir)
        .with_context(|| format!("reading {}", crates_dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    roots.retain(|path| path.is_dir());
    roots.sort();
    Ok(roots)
}

fn lint_crate(root: &Path) -> Result<Vec<String>> {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut problems = Vec::new();
    if !name.starts_with("tessera-") {
        problems.push(format!("{name}: crate does not follow tessera-* naming"));
    }

    let src = root.join("src");
    let lib_rs = std::fs::read_to_string(src.join("lib.rs"))
        .with_context(|| format!("reading {}/src/lib.rs", root.display()))?;
    for lint in missing_lints(&lib_rs) {
        problems.push(format!("{name}: lib.rs is missing {lint}"));
    }
    if lib_rs.contains(PANIC_OPT_OUT) {
        return Ok(problems);
    }

    for file in rust_files(&src)? {
        let source = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        for line in panicking_lines(&source) {
            problems.push(format!("{}:{line}: unwrap/expect outside tests", file.display()));
        }
    }
    Ok(problems)
}

fn rust_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            files.extend(rust_files(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn missing_lints(lib_rs: &str) -> Vec<&'static str> {
    CRATE_LINTS
        .iter()
        .copied()
        .filter(|lint| !lib_rs.lines().any(|line| line.trim() == *lint))
        .collect()
}

/// One-based line numbers of `unwrap()`/`expect(` calls ahead of the test
/// module. Comment lines are skipped.
fn panicking_lines(source: &str) -> Vec<usize> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .filter(|(_, line)| line.contains(".unwrap()") || line.contains(".expect("))
        .map(|(idx, _)| idx + 1)
        .collect()
}

fn cargo(args: &[&str], envs: &[(&str, &str)]) -> Result<()> {
    println!("$ cargo {}", args.join(" "));
    let status = Command::new("cargo")
        .args(args)
        .envs(envs.iter().copied())
        .status()
        .with_context(|| format!("spawning cargo {}", args.join(" ")))?;
    if !status.success() {
        anyhow::bail!("cargo {} exited with {status}", args.join(" "));
    }
    Ok(())
}
