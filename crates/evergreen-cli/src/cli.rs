//! evergreen CLI - Command-line interface for rendering configuration templates
//!
//! Usage:
//!   evergreen render config.yaml --format json
//!   evergreen render config.yaml --output resolved.yaml --max-passes 50
//!   evergreen check config.yaml other.json

use clap::{Parser, Subcommand};
use colored::Colorize;
use evergreen_core::template::{self, Format};
use evergreen_core::{check, Engine, EngineOptions, DEFAULT_MAX_PASSES};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// evergreen - Render configuration templates with placeholders and directives
#[derive(Parser)]
#[command(name = "evergreen")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log each resolution pass (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a template and print the materialized configuration
    Render {
        /// Template file (YAML, or JSON by extension)
        file: PathBuf,

        /// Output format: yaml, json
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Give up after this many passes
        #[arg(long, default_value_t = DEFAULT_MAX_PASSES)]
        max_passes: usize,

        /// Directory for relative `$file:` paths (defaults to the template's directory)
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },

    /// Check templates for expression syntax errors and reference cycles
    Check {
        /// Template file(s) to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Run the CLI with the given arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Render {
            file,
            format,
            output,
            max_passes,
            base_dir,
        } => cmd_render(file, &format, output, max_passes, base_dir),

        Commands::Check { files } => cmd_check(files),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .try_init();
}

fn output_format(format: &str) -> Format {
    match format {
        "json" => Format::Json,
        _ => Format::Yaml,
    }
}

fn engine_options(file: &Path, max_passes: usize, base_dir: Option<PathBuf>) -> EngineOptions {
    let base_dir = base_dir.unwrap_or_else(|| {
        file.parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    });
    EngineOptions::default()
        .with_max_passes(max_passes)
        .with_base_dir(base_dir)
}

/// Render `file` and serialize the result; errors are already formatted for display
fn render_to_string(file: &Path, options: EngineOptions, format: Format) -> Result<String, String> {
    let template = template::from_file(file)
        .map_err(|e| format!("Failed to load {}: {}", file.display(), e))?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;
    let engine = Engine::with_options(options);
    let report = runtime
        .block_on(engine.render_report(&template))
        .map_err(|e| e.to_string())?;

    log::info!(
        "Rendered {} in {} pass(es), {} directive(s)",
        file.display(),
        report.passes,
        report.directives_dispatched
    );

    template::to_string(&report.value, format).map_err(|e| e.to_string())
}

fn cmd_render(
    file: PathBuf,
    format: &str,
    output: Option<PathBuf>,
    max_passes: usize,
    base_dir: Option<PathBuf>,
) -> ExitCode {
    let options = engine_options(&file, max_passes, base_dir);

    let content = match render_to_string(&file, options, output_format(format)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e.red());
            return ExitCode::from(1);
        }
    };

    if let Some(output_path) = output {
        if let Err(e) = std::fs::write(&output_path, &content) {
            eprintln!("{}: {}", "Error writing file".red(), e);
            return ExitCode::from(2);
        }
        eprintln!("{} Wrote to {}", "✓".green(), output_path.display());
    } else {
        print!("{}", content);
        if !content.ends_with('\n') {
            println!();
        }
    }

    ExitCode::SUCCESS
}

/// Parse-only validation of one template; returns the number of expressions
fn check_file(file: &Path) -> Result<usize, String> {
    let template = template::from_file(file).map_err(|e| e.to_string())?;
    let evaluation = check(&template).map_err(|e| e.to_string())?;
    Ok(evaluation.expression_count())
}

fn cmd_check(files: Vec<PathBuf>) -> ExitCode {
    let mut all_valid = true;

    for file in files {
        match check_file(&file) {
            Ok(count) => {
                println!(
                    "{} {}: valid ({} expression{})",
                    "✓".green(),
                    file.display(),
                    count,
                    if count == 1 { "" } else { "s" }
                );
            }
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                all_valid = false;
            }
        }
    }

    if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
