//! CLI entrypoint for monoheap conformance tooling.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use monoheap_conformance::{render_markdown, run_all, scenario_names, Outcome, ReportError};

/// CLI for the monoheap conformance scenario runner.
#[derive(Debug, Parser)]
#[command(name = "monoheap-conformance")]
#[command(about = "Conformance tooling for the monoheap allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Supported CLI subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run every scenario and optionally emit report files.
    Run {
        /// Output json report path.
        #[arg(long)]
        report_json: Option<PathBuf>,
        /// Output markdown report path.
        #[arg(long)]
        report_md: Option<PathBuf>,
    },
    /// Print the scenario names, in run order.
    List,
}

fn main() -> Result<ExitCode, ReportError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            report_json,
            report_md,
        } => {
            let report = run_all();
            if let Some(path) = report_json {
                fs::write(path, serde_json::to_string_pretty(&report)?)?;
            }
            if let Some(path) = report_md {
                fs::write(path, render_markdown(&report))?;
            }
            println!(
                "{} passed, {} failed ({} scenarios)",
                report.passed,
                report.failed,
                report.scenarios.len()
            );
            for scenario in report.scenarios.iter().filter(|s| s.outcome == Outcome::Fail) {
                println!("FAIL {}: {}", scenario.name, scenario.details);
            }
            if report.all_passed() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::List => {
            for name in scenario_names() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
