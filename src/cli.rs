//! Terminal output for the cook binary

use anyhow::Result;
use colored::*;

use crate::cook::Cook;
use crate::value::Value;

/// How `cook @fn` prints its result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn render(self, value: &Value) -> Result<String> {
        match self {
            OutputFormat::Text => Ok(value.to_string()),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        }
    }
}

/// `✓ msg` on stdout
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// `✗ msg` on stderr
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

pub fn warning(msg: &str) {
    eprintln!("{} {}", "⚠ warning:".yellow().bold(), msg);
}

/// Targets and user functions of a program, one per line
pub fn format_listing(cook: &Cook) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "Targets:".bold()));
    if let Some(all) = cook.all_target() {
        let note = if all.run_all { " (every target)" } else { "" };
        out.push_str(&format!("  {}{}\n", all.name.cyan(), note));
    }
    for target in cook.targets() {
        out.push_str(&format!("  {}  {}\n", target.name.cyan(), target.pos.to_string().dimmed()));
    }

    let functions = cook.functions();
    if !functions.is_empty() {
        out.push_str(&format!("{}\n", "Functions:".bold()));
        for function in functions {
            out.push_str(&format!(
                "  {}({})  {}\n",
                function.name.cyan(),
                function.params.join(", "),
                function.pos.to_string().dimmed()
            ));
        }
    }
    out
}

/// Human readable elapsed time, milliseconds below one second
pub fn format_duration(duration: std::time::Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
