//! Conformance harness for the artifact action protocol.
//!
//! Runs TOML case files through the parse, validate and apply pipeline and
//! checks each outcome against the case's expectation.

mod case;
mod report;
mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::case::{CaseFile, discover_cases};
use crate::report::{case_line, summarize, summary_line};
use crate::run::run_case;

#[derive(Parser)]
#[command(
    name = "conformance",
    version,
    about = "Conformance cases for the artifact action protocol"
)]
struct Cli {
    /// Directory holding `*.toml` case files.
    #[arg(long, global = true, default_value = "conformance/cases")]
    cases: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List case ids.
    List,
    /// Run one case by id.
    Run { case_id: String },
    /// Run every case and print a summary.
    RunAll,
}

fn main() {
    artifact::logging::init();
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(2);
        }
    }
}

/// Returns whether every executed case passed.
fn run() -> Result<bool> {
    let cli = Cli::parse();
    match cli.command {
        Command::List => {
            for case in discover_cases(&cli.cases)? {
                println!("{}", case.case.id);
            }
            Ok(true)
        }
        Command::Run { case_id } => run_one(&cli.cases, &case_id),
        Command::RunAll => run_all(&cli.cases),
    }
}

fn run_one(cases_dir: &Path, case_id: &str) -> Result<bool> {
    let case = discover_cases(cases_dir)?
        .into_iter()
        .find(|case| case.case.id == case_id);
    let Some(case) = case else {
        bail!("case {} not found in {}", case_id, cases_dir.display());
    };
    let result = run_case(&case).with_context(|| format!("run case {case_id}"))?;
    println!("{}", case_line(&result));
    Ok(result.passed())
}

fn run_all(cases_dir: &Path) -> Result<bool> {
    let cases: Vec<CaseFile> = discover_cases(cases_dir)?;
    if cases.is_empty() {
        bail!("no cases found in {}", cases_dir.display());
    }
    let mut results = Vec::with_capacity(cases.len());
    for case in &cases {
        let result = run_case(case).with_context(|| format!("run case {}", case.case.id))?;
        println!("{}", case_line(&result));
        results.push(result);
    }
    let summary = summarize(&results);
    println!("{}", summary_line(&summary));
    info!(
        total = summary.total,
        failed = summary.failed,
        "conformance run finished"
    );
    Ok(summary.all_passed())
}
