//! CLI: OpenAPI document → (artifact set | request-builder tree | models)
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::document::{LoadOptions, OpenApiDocument};
use crate::error::Severity;
use crate::generate::{generate, Generation, GeneratorConfig};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// generate a typed client model (models + request-builder tree) from OpenAPI 3.x documents
#[derive(Parser, Debug)]
#[command(name = "oas-client-gen", version)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,

    /// more logging (debug)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// less logging (warnings only)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// generate and write the artifact set as JSON
    Generate(GenerateOut),
    /// print the request-builder tree
    Tree(TreeOut),
    /// print the synthesized model units as JSON
    Types(TypesOut),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// JSON Pointer selecting the OpenAPI document inside each input (e.g. /spec)
    #[arg(long)]
    json_pointer: Option<String>,

    /// jq pre-process filter for each document; the first output is used
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,

    /// generator config file (.json or .yaml); flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// name of the root client unit
    #[arg(long)]
    client_name: Option<String>,

    /// only keep paths matching this glob (repeatable)
    #[arg(long = "include-path")]
    include_paths: Vec<String>,

    /// drop paths matching this glob (repeatable)
    #[arg(long = "exclude-path")]
    exclude_paths: Vec<String>,

    /// build artifacts on one thread
    #[arg(long)]
    no_parallel: bool,
}

#[derive(clap::Parser, Debug)]
struct GenerateOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// output .json file (stdout if omitted); a directory when there are several inputs
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// exit with status 2 when any operation failed to bind
    #[arg(long)]
    deny_warnings: bool,
}

#[derive(clap::Parser, Debug)]
struct TreeOut {
    #[command(flatten)]
    input_settings: InputSettings,
}

#[derive(clap::Parser, Debug)]
struct TypesOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn config(&self) -> Result<GeneratorConfig> {
        let mut config = match &self.config {
            Some(path) => GeneratorConfig::load_file(path)?,
            None => GeneratorConfig::default(),
        };
        if let Some(name) = &self.client_name {
            config.client_name = name.clone();
        }
        config.include_paths.extend(self.include_paths.iter().cloned());
        config.exclude_paths.extend(self.exclude_paths.iter().cloned());
        if self.no_parallel {
            config.parallel = false;
        }
        Ok(config)
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            json_pointer: self.json_pointer.clone(),
            jq_expr: self.jq_expr.clone(),
        }
    }

    /// Input files with globs expanded, in argument order.
    fn resolve_paths(&self) -> Result<Vec<PathBuf>> {
        resolve_file_path_patterns(&self.input)
    }

    /// Run the pipeline over resolved input files, in order. The first fatal
    /// error stops everything.
    fn generate_each(
        &self,
        source_paths: &[PathBuf],
        mut apply: impl FnMut(&Path, Generation) -> Result<()>,
    ) -> Result<()> {
        let config = self.config()?;
        let options = self.load_options();
        for source_path in source_paths {
            let doc = OpenApiDocument::from_path(source_path, &options)?;
            let generation = generate(&doc, &config)
                .with_context(|| format!("generation failed for {}", source_path.display()))?;
            report(source_path, &generation);
            apply(source_path, generation)?;
        }
        Ok(())
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    /// Install the stderr log subscriber. `-v`/`-q` win over `RUST_LOG`.
    pub fn init_logging(&self) -> Result<()> {
        let filter = if self.verbose {
            "oas_client_gen=debug".to_string()
        } else if self.quiet {
            "oas_client_gen=warn".to_string()
        } else {
            std::env::var("RUST_LOG").unwrap_or_else(|_| "oas_client_gen=info".to_string())
        };
        let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_filter(filter),
            )
            .try_init()
            .context("failed to install the log subscriber")
    }

    pub fn run(&self) -> Result<ExitCode> {
        match &self.cmd {
            Command::Generate(target) => {
                let settings = &target.input_settings;
                let source_paths = settings.resolve_paths()?;
                let several = source_paths.len() > 1;
                let mut binding_errors = 0;
                settings.generate_each(&source_paths, |source_path, generation| {
                    binding_errors += generation.binding_errors.len();
                    let src = generation.artifacts.to_json_pretty()?;
                    match target.out.as_ref() {
                        Some(out) if several => {
                            let stem = source_path.file_stem().unwrap_or_default();
                            write_output(&out.join(stem).with_extension("json"), &src)
                        }
                        Some(out) => write_output(out, &src),
                        None => {
                            print!("{src}");
                            Ok(())
                        }
                    }
                })?;
                if target.deny_warnings && binding_errors > 0 {
                    eprintln!(
                        "{} {binding_errors} operation(s) failed to bind",
                        "denied:".red().bold()
                    );
                    return Ok(ExitCode::from(2));
                }
                Ok(ExitCode::SUCCESS)
            }
            Command::Tree(target) => {
                let source_paths = target.input_settings.resolve_paths()?;
                let several = source_paths.len() > 1;
                target.input_settings.generate_each(&source_paths, |source_path, generation| {
                    if several {
                        println!("# {}", source_path.display());
                    }
                    print!("{}", generation.tree.render());
                    Ok(())
                })?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Types(target) => {
                let source_paths = target.input_settings.resolve_paths()?;
                let mut models = Vec::new();
                target.input_settings.generate_each(&source_paths, |_, generation| {
                    models.extend(generation.artifacts.models);
                    Ok(())
                })?;
                let mut src = serde_json::to_string_pretty(&models)?;
                src.push('\n');
                match target.out.as_ref() {
                    Some(out) => write_output(out, &src)?,
                    None => print!("{src}"),
                }
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn write_output(out: &Path, src: &str) -> Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(out, src).with_context(|| format!("failed to write {}", out.display()))
}

/// Diagnostics report on stderr.
fn report(source_path: &Path, generation: &Generation) {
    for diagnostic in generation.diagnostics() {
        let label = match diagnostic.severity {
            Severity::Warning => "warning".yellow().bold(),
            Severity::Error => "error".red().bold(),
        };
        eprintln!("{label}: {} {}", diagnostic.pointer.dimmed(), diagnostic.message);
    }
    let summary = format!(
        "{}: {} model(s), {} operation(s), {} diagnostic(s)",
        source_path.display(),
        generation.artifacts.models.len(),
        generation.tree.operation_count(),
        generation.diagnostics().len(),
    );
    eprintln!("{}", summary.green());
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                anyhow::bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY: &str = r#"
openapi: 3.0.3
info:
  title: Open Library
  version: "1"
paths:
  /search.json:
    get:
      parameters:
        - name: q
          in: query
          schema:
            type: string
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                $ref: '#/components/schemas/SearchResponse'
  /authors/{olid}:
    get:
      responses:
        "200":
          description: ok
components:
  schemas:
    SearchResponse:
      type: object
      properties:
        numFound:
          type: integer
"#;

    fn cli(args: &[&str]) -> CommandLineInterface {
        CommandLineInterface::try_parse_from(std::iter::once("oas-client-gen").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn generate_writes_artifacts_and_denies_binding_errors() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("library.yaml");
        std::fs::write(&input, LIBRARY).unwrap();
        let out = dir.path().join("out/library.json");

        let args = ["generate", "-i", input.to_str().unwrap(), "-o", out.to_str().unwrap(), "--client-name", "OpenLibraryClient"];
        let code = cli(&args).run().unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["clientName"], "OpenLibraryClient");
        assert_eq!(written["models"][0]["name"], "SearchResponse");
        // `/authors/{olid}` declares no `olid` parameter
        assert_eq!(written["diagnostics"][0]["severity"], "error");

        let mut denied = args.to_vec();
        denied.push("--deny-warnings");
        assert_eq!(cli(&denied).run().unwrap(), ExitCode::from(2));
    }

    #[test]
    fn one_glob_matching_several_files_writes_one_artifact_each() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), LIBRARY.replace("Open Library", "A")).unwrap();
        std::fs::write(dir.path().join("b.yaml"), LIBRARY.replace("Open Library", "B")).unwrap();
        let pattern = dir.path().join("*.yaml");
        let out = dir.path().join("gen");

        let parsed = cli(&["tree", "-i", pattern.to_str().unwrap()]);
        let Command::Tree(target) = &parsed.cmd else { panic!("expected tree") };
        assert_eq!(target.input_settings.resolve_paths().unwrap().len(), 2);

        let code = cli(&["generate", "-i", pattern.to_str().unwrap(), "-o", out.to_str().unwrap()]).run().unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(out.is_dir());
        let title = |name: &str| -> serde_json::Value {
            let written: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(out.join(name)).unwrap()).unwrap();
            written["title"].clone()
        };
        assert_eq!(title("a.json"), "A");
        assert_eq!(title("b.json"), "B");
    }

    #[test]
    fn second_log_subscriber_is_reported() {
        let parsed = cli(&["tree", "-i", "x.yaml", "-q"]);
        let _ = parsed.init_logging();
        let err = parsed.init_logging().unwrap_err();
        assert!(format!("{err:#}").starts_with("failed to install the log subscriber"));
    }

    #[test]
    fn fatal_errors_surface_as_err() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dup.json");
        std::fs::write(&input, r#"{"openapi": "3.0.0", "paths": {"/books": {}, "/books/": {}}}"#).unwrap();
        let out = dir.path().join("dup.out.json");
        let result = cli(&["generate", "-i", input.to_str().unwrap(), "-o", out.to_str().unwrap()]).run();
        assert!(result.is_err());
        assert!(!out.exists());

        let missing = dir.path().join("nothing-*.yaml");
        assert!(cli(&["tree", "-i", missing.to_str().unwrap()]).run().is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("gen.json");
        std::fs::write(&config, r#"{"clientName": "FromFile", "excludePaths": ["/internal/*"]}"#).unwrap();
        let parsed = cli(&[
            "types",
            "-i",
            "x.yaml",
            "--config",
            config.to_str().unwrap(),
            "--client-name",
            "FromFlag",
            "--exclude-path",
            "/debug/*",
            "--no-parallel",
        ]);
        let Command::Types(target) = &parsed.cmd else { panic!("expected types") };
        let config = target.input_settings.config().unwrap();
        assert_eq!(config.client_name, "FromFlag");
        assert_eq!(config.exclude_paths, ["/internal/*", "/debug/*"]);
        assert!(!config.parallel);
    }
}
