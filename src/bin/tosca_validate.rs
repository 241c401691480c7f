//! `tosca-validate` - standalone CLI front-end over `tosca_core`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Reset SIGPIPE to default behavior so piping (e.g. `tosca-validate | less`) exits
/// cleanly instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use tosca_core::diagnostics::Diagnostic;
use tosca_core::import::{FilesystemLoader, ImportBase};
use tosca_core::value::Value;
use tosca_core::EngineOptions;

/// tosca-validate - parse and validate a TOSCA Simple Profile YAML service template
#[derive(Parser)]
#[command(name = "tosca-validate", version, about, long_about = None)]
struct Cli {
    /// Path to the root service template YAML file
    template: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Abort each pipeline stage on its first error instead of accumulating diagnostics
    #[arg(short, long)]
    strict: bool,

    /// Bind an input value as `name=value` (repeatable); values are parsed as YAML scalars
    #[arg(short, long = "input", value_parser = parse_input)]
    inputs: Vec<(String, Value)>,
}

fn parse_input(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected `name=value`, got `{}`", raw))?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(value).map_err(|e| e.to_string())?;
    Ok((name.to_string(), tosca_core::value::generic_from_yaml(&yaml)))
}

fn main() -> Result<ExitCode> {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let contents = std::fs::read_to_string(&cli.template)
        .with_context(|| format!("failed to read `{}`", cli.template.display()))?;
    let root: serde_yaml::Value =
        serde_yaml::from_str(&contents).with_context(|| format!("`{}` is not valid YAML", cli.template.display()))?;

    let base_dir = cli
        .template
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let base = ImportBase::new(base_dir.to_string_lossy().into_owned());
    let loader = FilesystemLoader;
    let inputs: HashMap<String, Value> = cli.inputs.into_iter().collect();
    let options = EngineOptions::new().strict(cli.strict);

    let (topology, diagnostics) = tosca_core::parse_service_template(root, base, &loader, inputs, options);

    print_diagnostics(&diagnostics, &cli.template.display().to_string());

    let has_errors = diagnostics.iter().any(Diagnostic::is_error);
    match (&topology, has_errors) {
        (Some(topology), false) => {
            println!(
                "{} {} node template(s), {} group(s), {} policy(ies), {} output(s).",
                "✓".green().bold(),
                topology.node_templates().len(),
                topology.groups().len(),
                topology.policies().len(),
                topology.outputs().len(),
            );
            Ok(ExitCode::SUCCESS)
        }
        (Some(_), true) => {
            println!("{}", "Validated with errors.".yellow().bold());
            Ok(ExitCode::FAILURE)
        }
        (None, _) => {
            println!("{}", "Parsing aborted.".red().bold());
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Pretty-print diagnostics grouped by severity, modeled on the teacher's
/// validation-error printer: one line per diagnostic, location dimmed,
/// severity-colored marker up front.
fn print_diagnostics(diagnostics: &[Diagnostic], template: &str) {
    if diagnostics.is_empty() {
        return;
    }
    println!();
    println!("{}", format!("Diagnostics for {}", template).bold().cyan());
    println!("{}", "─".repeat(60));
    for d in diagnostics {
        let marker = if d.is_error() {
            "✗".red().bold()
        } else {
            "!".yellow().bold()
        };
        let deprecation = d.tag.map(|t| format!(" [{}]", t)).unwrap_or_default();
        println!(
            "  {} [{}] {}{} {}",
            marker,
            d.kind.tag(),
            d.kind,
            deprecation.dimmed(),
            format!("({}:{})", d.source.file, d.source.path).dimmed()
        );
    }
    println!("{}", "─".repeat(60));
    println!();
}
