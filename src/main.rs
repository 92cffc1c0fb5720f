//! Cook CLI - run targets of a Cookfile or call a built-in directly

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

use cook::args::{parse_args, Invocation};
use cook::cli::{self, OutputFormat};
use cook::error::{format_diagnostic, format_error, CookError};
use cook::functions::FunctionRegistry;

#[derive(Parser)]
#[command(name = "cook")]
#[command(about = "Cook - a scripting language for build automation", long_about = None)]
#[command(version)]
struct Cli {
    /// Cookfile to load
    #[arg(short, long, default_value = "Cookfile")]
    cookfile: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Working directory
    #[arg(short = 'C', long)]
    directory: Option<PathBuf>,

    /// List targets and functions, then exit
    #[arg(long)]
    list: bool,

    /// Output format for direct @function calls
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Parse the Cookfile and report syntax errors only
    #[arg(long)]
    check: bool,

    /// Targets and variables (--name value), or @function followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);
    if std::env::var_os("RUST_LOG").is_some() {
        subscriber.with_env_filter(EnvFilter::from_default_env()).init();
    } else {
        subscriber.init();
    }

    if let Err(err) = run(cli) {
        report(&err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Change directory if specified
    if let Some(dir) = &cli.directory {
        std::env::set_current_dir(dir)?;
    }

    let (targets, variables) = match parse_args(&cli.args)? {
        Invocation::Function(call) => {
            if let Some(output) = call.run(&FunctionRegistry::new(), cli.format)? {
                println!("{}", output);
            }
            return Ok(());
        }
        Invocation::Run { targets, variables } => (targets, variables),
    };

    let cook = cook::parser::parse_file(&cli.cookfile)?;
    if cli.check {
        cli::success(&format!(
            "{} parsed: {} targets, {} functions",
            cli.cookfile.display(),
            cook.targets().len(),
            cook.functions().len()
        ));
        return Ok(());
    }
    if cli.list {
        print!("{}", cli::format_listing(&cook));
        return Ok(());
    }

    let started = Instant::now();
    if targets.is_empty() {
        cook.execute(&variables)?;
    } else {
        cook.execute_with_target(&variables, &targets)?;
    }
    debug!(
        "{} finished in {}",
        cli.cookfile.display(),
        cli::format_duration(started.elapsed())
    );
    Ok(())
}

/// Print an error; syntax errors get a source excerpt when the file is readable
fn report(err: &anyhow::Error) {
    let Some(CookError::Parse(errors)) = err.downcast_ref::<CookError>() else {
        eprintln!("{}", format_error(err));
        return;
    };
    for diagnostic in errors.diagnostics() {
        match std::fs::read_to_string(&*diagnostic.position.file) {
            Ok(source) => eprint!("{}", format_diagnostic(diagnostic, &source)),
            Err(_) => eprintln!("{} {}", "Parse error:".red().bold(), diagnostic),
        }
    }
    cli::error(&format!("{} syntax error(s)", errors.diagnostics().len()));
}
