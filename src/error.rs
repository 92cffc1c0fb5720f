//! Error kinds and diagnostic formatting for Cook
//!
//! Parse errors are aggregated into `ParseErrors`. Evaluation errors carry the
//! position of the node that failed. `CookError::Internal` marks a broken
//! interpreter invariant and is never caused by user input.

use std::fmt;

use anyhow::Result;
use colored::Colorize;

use crate::token::Position;

/// A single syntax or lexical error
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub position: Position,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.position, self.message)
    }
}

/// Every diagnostic collected during one parse
#[derive(Debug, Clone, PartialEq)]
pub struct ParseErrors(pub Vec<Diagnostic>);

impl std::error::Error for ParseErrors {}

impl ParseErrors {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

impl fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CookError {
    #[error(transparent)]
    Parse(#[from] ParseErrors),

    #[error("{position}: {message}")]
    Eval { position: Position, message: String },

    #[error("{position}: internal invariant violated: {message}")]
    Internal { position: Position, message: String },
}

/// User facing evaluation error at `pos`
pub fn eval_error(pos: &Position, message: impl Into<String>) -> anyhow::Error {
    CookError::Eval {
        position: pos.clone(),
        message: message.into(),
    }
    .into()
}

/// Interpreter bug detected at `pos`
pub fn internal_error(pos: &Position, message: impl Into<String>) -> anyhow::Error {
    CookError::Internal {
        position: pos.clone(),
        message: message.into(),
    }
    .into()
}

/// Attach a position to errors that do not have one yet
pub trait ResultExt<T> {
    fn at(self, pos: &Position) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn at(self, pos: &Position) -> Result<T> {
        self.map_err(|err| {
            if err.downcast_ref::<CookError>().is_some() {
                err
            } else {
                eval_error(pos, format!("{:#}", err))
            }
        })
    }
}

/// True when `err` reports a broken interpreter invariant
pub fn is_internal(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<CookError>(),
        Some(CookError::Internal { .. })
    )
}

/// Format a diagnostic with the offending source line and a caret
pub fn format_diagnostic(diagnostic: &Diagnostic, source: &str) -> String {
    let mut output = String::new();
    let Position { file, line, column } = &diagnostic.position;

    output.push_str(&format!(
        "{} {}\n",
        "Parse error:".red().bold(),
        diagnostic.message
    ));
    output.push_str(&format!(
        "  {} {}\n",
        "-->".blue().bold(),
        format!("{}:{}:{}", file, line, column).cyan()
    ));

    let lines: Vec<&str> = source.lines().collect();
    if *line > 0 && *line <= lines.len() {
        let text = lines[line - 1];
        output.push_str(&format!("   {}\n", "|".blue()));
        output.push_str(&format!(
            " {} | {}\n",
            format!("{:3}", line).blue().bold(),
            text
        ));
        let indicator = format!("{}^", " ".repeat(column.saturating_sub(1) + 7));
        output.push_str(&format!("   {} {}\n", "|".blue(), indicator.red().bold()));
    }

    output
}

/// Format any error for the terminal
pub fn format_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<CookError>() {
        Some(CookError::Internal { .. }) => {
            format!("{} {}", "Internal error:".red().bold(), err)
        }
        Some(CookError::Parse(errors)) => errors
            .0
            .iter()
            .map(|d| format!("{} {}", "Parse error:".red().bold(), d))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => format!("{} {:#}", "Error:".red().bold(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn pos(line: usize, column: usize) -> Position {
        Position::new("Cookfile".into(), line, column)
    }

    #[test]
    fn test_parse_errors_display() {
        let errors = ParseErrors(vec![
            Diagnostic {
                position: pos(1, 3),
                message: "expected IDENT".to_string(),
            },
            Diagnostic {
                position: pos(4, 1),
                message: "unexpected }".to_string(),
            },
        ]);
        assert_eq!(
            errors.to_string(),
            "Cookfile:1:3: expected IDENT\nCookfile:4:1: unexpected }"
        );
    }

    #[test]
    fn test_position_is_attached_once() {
        let err = Err::<(), _>(anyhow!("division by zero")).at(&pos(2, 5));
        let err = err.at(&pos(9, 9)).unwrap_err();
        assert_eq!(err.to_string(), "Cookfile:2:5: division by zero");
        assert!(!is_internal(&err));
        assert!(is_internal(&internal_error(&pos(1, 1), "bad operator")));
    }

    #[test]
    fn test_errors_cross_threads() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<CookError>();
        assert_send_sync::<Position>();

        let err = eval_error(&pos(3, 7), "boom");
        let handle = std::thread::spawn(move || err.to_string());
        assert_eq!(handle.join().unwrap(), "Cookfile:3:7: boom");
    }

    #[test]
    fn test_format_diagnostic() {
        colored::control::set_override(false);
        let diagnostic = Diagnostic {
            position: pos(2, 5),
            message: "expected {".to_string(),
        };
        let output = format_diagnostic(&diagnostic, "a = 1\nfor i\n");
        assert!(output.contains("Cookfile:2:5"));
        assert!(output.contains("for i"));
        assert!(output.contains("^"));
    }
}
