//! Cook - a scripting language for build automation
//!
//! A Cookfile declares named targets made of statements: variables, loops,
//! conditionals, calls to built-in functions (`@name`) and external programs
//! (`#name`) with pipes and redirects. Parsing a Cookfile yields a [`Cook`]
//! program that can be executed with command line variables.
//!
//! ```no_run
//! let cook = cook::parse_file("Cookfile")?;
//! cook.execute_with_target(&[("out".to_string(), cook::Value::from("dist"))], &["build"])?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod args;
pub mod ast;
pub mod cli;
pub mod context;
pub mod cook;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod operators;
pub mod parser;
pub mod token;
pub mod transform;
pub mod value;

// Re-export commonly used types
pub use crate::cook::Cook;
pub use error::{CookError, Diagnostic, ParseErrors};
pub use evaluator::Evaluator;
pub use functions::FunctionRegistry;
pub use parser::{parse_file, parse_source, Parser};
pub use token::{Position, Token};
pub use value::{Kind, Value};

/// Cook version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
