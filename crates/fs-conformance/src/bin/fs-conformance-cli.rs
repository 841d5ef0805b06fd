#![forbid(unsafe_code)]

use std::path::PathBuf;

use fs_conformance::{default_fixture_root, run_suite};
use tracing::Level;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut fixture_root: Option<PathBuf> = None;
    let mut require_green = false;
    let mut json = false;
    let mut verbose = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixtures" => {
                let value = args.next().ok_or("--fixtures requires a directory")?;
                fixture_root = Some(PathBuf::from(value));
            }
            "--require-green" => {
                require_green = true;
            }
            "--json" => {
                json = true;
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    if json {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let root = fixture_root.unwrap_or_else(default_fixture_root);
    let report = run_suite(&root)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for case in &report.cases {
            match &case.detail {
                Some(detail) => println!(
                    "case={} operation={} passed={} detail={detail}",
                    case.name, case.operation, case.passed
                ),
                None => println!(
                    "case={} operation={} passed={}",
                    case.name, case.operation, case.passed
                ),
            }
        }
        println!(
            "fixtures={} passed={} failed={} green={}",
            report.fixture_count,
            report.passed,
            report.failed,
            report.is_green()
        );
    }

    if require_green && !report.is_green() {
        return Err(format!(
            "conformance suite is not green: {} of {} fixtures failed",
            report.failed, report.fixture_count
        )
        .into());
    }

    Ok(())
}

fn print_help() {
    println!(
        "fs-conformance-cli\n\
         Usage:\n\
         \tfs-conformance-cli [--fixtures DIR] [--require-green] [--json] [--verbose]\n\
         Options:\n\
         \t--fixtures <dir>     Fixture directory (default: the crate's fixtures/)\n\
         \t--require-green      Fail with non-zero exit when any fixture fails\n\
         \t--json               Print the suite report and log events as JSON\n\
         \t-v, --verbose        Log at debug level, including each failed case\n\
         \t-h, --help           Show this help"
    );
}
