//! Determinism check: every fixture goes through the pipeline twice and the
//! two artifact sets must be byte-identical, sequential and parallel alike.
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;
use oas_client_gen::document::{LoadOptions, OpenApiDocument};
use oas_client_gen::{generate, GeneratorConfig};

fn render(path: &Path, parallel: bool) -> Result<String> {
    let doc = OpenApiDocument::from_path(path, &LoadOptions::default())?;
    let config = GeneratorConfig { parallel, ..GeneratorConfig::default() };
    let generation = generate(&doc, &config)?;
    Ok(generation.artifacts.to_json_pretty()?)
}

fn check(path: &Path) -> Result<usize> {
    let first = render(path, true)?;
    let second = render(path, true)?;
    let sequential = render(path, false)?;
    anyhow::ensure!(first == second, "two parallel runs differ");
    anyhow::ensure!(first == sequential, "parallel and sequential runs differ");
    let value: serde_json::Value = serde_json::from_str(&first)?;
    Ok(value["models"].as_array().map(Vec::len).unwrap_or_default())
}

fn main() -> ExitCode {
    let pattern = concat!(env!("CARGO_MANIFEST_DIR"), "/../fixtures/*");
    let paths = match glob::glob(pattern).context("bad fixture pattern") {
        Ok(paths) => paths.filter_map(Result::ok).collect::<Vec<_>>(),
        Err(error) => {
            eprintln!("{} {error:#}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };
    let mut failed = 0;
    for path in &paths {
        match check(path) {
            Ok(models) => eprintln!("{} {} ({models} models)", "✅".green(), path.display()),
            Err(error) => {
                failed += 1;
                eprintln!("{} {}: {error:#}", "❌".red(), path.display());
            }
        }
    }
    eprintln!("{} fixture(s), {failed} failed", paths.len());
    if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
