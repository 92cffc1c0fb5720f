//! Trailing command line arguments: targets, variables and direct calls
//!
//! Everything after the binary's own options is handed to [`parse_args`]:
//!
//! ```text
//! cook build test --out dist --jobs:i 4 --env:s:s mode:release
//! cook @upper < in.txt > out.txt
//! cook --format json @ssplit --ws 'a b c'
//! ```
//!
//! Variable flags take the form `--NAME value`, `--NAME=value`,
//! `--NAME:T value` with `T` one of `i`, `f`, `b`, `s`, or `--NAME:K:V key:value`
//! for a map entry. Untyped values are detected as integer, float, boolean
//! and finally string. Repeating a flag collects its values into an array.

use std::fs;

use anyhow::{anyhow, bail, Context as _, Result};
use tracing::debug;

use crate::cli::OutputFormat;
use crate::functions::FunctionRegistry;
use crate::value::{Value, ValueMap};

/// What the trailing arguments ask for
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Run targets of the Cookfile; no targets means `all`
    Run {
        targets: Vec<String>,
        variables: Vec<(String, Value)>,
    },
    /// `@name args...` calls a built-in directly
    Function(FunctionCall),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Value>,
    /// `>` or `>>` target files and whether to append
    pub redirect: Option<(bool, Vec<String>)>,
}

/// Value type requested by a flag suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagType {
    Auto,
    Integer,
    Float,
    Boolean,
    String,
}

impl FlagType {
    fn from_code(code: &str) -> Result<Self> {
        match code {
            "i" => Ok(FlagType::Integer),
            "f" => Ok(FlagType::Float),
            "b" => Ok(FlagType::Boolean),
            "s" => Ok(FlagType::String),
            _ => bail!("unknown type {}, only i, f, b and s are allowed", code),
        }
    }

    fn parse(self, raw: &str) -> Result<Value> {
        match self {
            FlagType::Integer => raw
                .parse()
                .map(Value::Int)
                .map_err(|_| anyhow!("{} is not an integer", raw)),
            FlagType::Float => raw
                .parse()
                .map(Value::Float)
                .map_err(|_| anyhow!("{} is not a float", raw)),
            FlagType::Boolean => crate::operators::parse_bool(raw)
                .map(Value::Bool)
                .ok_or_else(|| anyhow!("{} is not a boolean", raw)),
            FlagType::String => Ok(Value::String(raw.to_string())),
            // integer, then float, then boolean, otherwise string
            FlagType::Auto => Ok(if let Ok(i) = raw.parse::<i64>() {
                Value::Int(i)
            } else if let Ok(f) = raw.parse::<f64>() {
                Value::Float(f)
            } else if let Some(b) = crate::operators::parse_bool(raw) {
                Value::Bool(b)
            } else {
                Value::String(raw.to_string())
            }),
        }
    }
}

pub fn parse_args(args: &[String]) -> Result<Invocation> {
    if let Some(name) = args.first().and_then(|first| first.strip_prefix('@')) {
        return parse_function_call(name, &args[1..]).map(Invocation::Function);
    }

    let mut targets = Vec::new();
    let mut variables: Vec<(String, Value)> = Vec::new();
    let mut rest = args.iter();
    while let Some(arg) = rest.next() {
        if let Some(flag) = arg.strip_prefix("--") {
            let (decl, raw) = match flag.split_once('=') {
                Some((decl, raw)) => (decl, raw.to_string()),
                None => match rest.next() {
                    Some(raw) => (flag, raw.clone()),
                    None => bail!("missing value for variable flag --{}", flag),
                },
            };
            let (name, value) = parse_variable(decl, &raw)?;
            add_variable(&mut variables, name, value)?;
        } else if arg.starts_with('-') {
            bail!("variable flag must start with --, got {}", arg);
        } else if arg.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            targets.push(arg.clone());
        } else {
            bail!("invalid target name {}", arg);
        }
    }

    Ok(Invocation::Run { targets, variables })
}

/// `NAME`, `NAME:T` or `NAME:K:V` with its raw value
fn parse_variable(decl: &str, raw: &str) -> Result<(String, Value)> {
    let parts: Vec<&str> = decl.split(':').collect();
    let name = parts[0];
    if name.is_empty() || !name.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        bail!("invalid variable name in flag --{}", decl);
    }
    let value = match parts.as_slice() {
        [_] => FlagType::Auto.parse(raw)?,
        [_, ty] => FlagType::from_code(ty)?.parse(raw)?,
        [_, key_ty, value_ty] => {
            let (key, value) = raw
                .split_once(':')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| anyhow!("invalid map value {} for --{}, expected key:value", raw, name))?;
            let mut map = ValueMap::new();
            map.insert(
                FlagType::from_code(key_ty)?.parse(key)?,
                FlagType::from_code(value_ty)?.parse(value)?,
            );
            Value::Map(map)
        }
        _ => bail!("invalid flag format --{}, e.g. --name:s or --name:s:i", decl),
    };
    Ok((name.to_string(), value))
}

fn add_variable(variables: &mut Vec<(String, Value)>, name: String, value: Value) -> Result<()> {
    let Some((_, existing)) = variables.iter_mut().find(|(n, _)| *n == name) else {
        variables.push((name, value));
        return Ok(());
    };
    match (existing, value) {
        (Value::Map(map), Value::Map(entry)) => {
            for (k, v) in entry.iter() {
                map.insert(k.clone(), v.clone());
            }
        }
        (existing @ Value::Map(_), value) | (existing, value @ Value::Map(_)) => {
            bail!("variable {} mixes map entries ({}) with plain values ({})", name, existing, value);
        }
        (Value::Array(items), value) => items.push(value),
        (existing, value) => {
            let first = std::mem::replace(existing, Value::empty());
            *existing = Value::Array(vec![first, value]);
        }
    }
    Ok(())
}

fn parse_function_call(name: &str, args: &[String]) -> Result<FunctionCall> {
    if name.is_empty() {
        bail!("missing function name after @");
    }
    let mut call = FunctionCall {
        name: name.to_string(),
        args: Vec::new(),
        redirect: None,
    };
    let mut rest = args.iter();
    while let Some(arg) = rest.next() {
        if let Some((_, files)) = &mut call.redirect {
            files.push(arg.clone());
            continue;
        }
        match arg.as_str() {
            "<" => {
                let path = rest.next().ok_or_else(|| anyhow!("missing file after <"))?;
                let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
                call.args.push(Value::String(content));
            }
            ">" | ">>" => call.redirect = Some((arg == ">>", Vec::new())),
            _ => call.args.push(Value::String(arg.clone())),
        }
    }
    if matches!(&call.redirect, Some((_, files)) if files.is_empty()) {
        bail!("missing file after redirect");
    }
    Ok(call)
}

impl FunctionCall {
    /// Call the function and write or return its output
    ///
    /// With a redirect every file receives the output and `None` is
    /// returned, otherwise the output is returned for printing.
    pub fn run(&self, registry: &FunctionRegistry, format: OutputFormat) -> Result<Option<String>> {
        if !registry.has_function(&self.name) {
            bail!("function {} is not exist", self.name);
        }
        debug!("calling @{} with {} arguments", self.name, self.args.len());
        let result = registry
            .call(&self.name, &self.args)
            .with_context(|| format!("error while execute function @{}", self.name))?;
        let output = format.render(&result)?;

        let Some((append, files)) = &self.redirect else {
            return Ok(Some(output));
        };
        for file in files {
            write_output(file, &output, *append)?;
        }
        Ok(None)
    }
}

fn write_output(path: &str, output: &str, append: bool) -> Result<()> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .with_context(|| format!("failed to open {}", path))?;
    file.write_all(output.as_bytes())
        .with_context(|| format!("failed to write {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn run(list: &[&str]) -> (Vec<String>, Vec<(String, Value)>) {
        match parse_args(&args(list)).unwrap() {
            Invocation::Run { targets, variables } => (targets, variables),
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_targets_and_detected_values() {
        let (targets, variables) = run(&["build", "_test", "--n", "4", "--ratio=0.5", "--on", "true", "--who", "cook"]);
        assert_eq!(targets, vec!["build", "_test"]);
        assert_eq!(
            variables,
            vec![
                ("n".to_string(), Value::Int(4)),
                ("ratio".to_string(), Value::Float(0.5)),
                ("on".to_string(), Value::Bool(true)),
                ("who".to_string(), Value::from("cook")),
            ]
        );
    }

    #[test]
    fn test_untyped_flags_detect_their_type() {
        assert_eq!(FlagType::Auto.parse("-7").unwrap(), Value::Int(-7));
        assert_eq!(FlagType::Auto.parse("1e3").unwrap(), Value::Float(1000.0));
        assert_eq!(FlagType::Auto.parse("FALSE").unwrap(), Value::Bool(false));
        assert_eq!(FlagType::Auto.parse("1.2.3").unwrap(), Value::from("1.2.3"));
        let (_, variables) = run(&["--v=-7"]);
        assert_eq!(variables[0].1, Value::Int(-7));
    }

    #[test]
    fn test_typed_flags() {
        let (_, variables) = run(&["--v:s", "12", "--f:f=3"]);
        assert_eq!(variables[0].1, Value::from("12"));
        assert_eq!(variables[1].1, Value::Float(3.0));
        assert!(parse_args(&args(&["--v:i", "abc"])).is_err());
        assert!(parse_args(&args(&["--v:x", "1"])).is_err());
    }

    #[test]
    fn test_repeated_flags_accumulate() {
        let (_, variables) = run(&["--a", "1", "--a", "2", "--a", "x"]);
        assert_eq!(
            variables,
            vec![(
                "a".to_string(),
                Value::Array(vec![Value::Int(1), Value::Int(2), Value::from("x")])
            )]
        );
    }

    #[test]
    fn test_map_flags() {
        let (_, variables) = run(&["--m:s:i", "a:1", "--m:s:i", "b:2"]);
        assert_eq!(variables.len(), 1);
        assert_eq!(variables[0].1.to_string(), "{a: 1, b: 2}");
        assert!(parse_args(&args(&["--m:s:i", "novalue"])).is_err());
        assert!(parse_args(&args(&["--m:s:i", "a:1", "--m", "2"])).is_err());
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(parse_args(&args(&["-x"])).is_err());
        assert!(parse_args(&args(&["9lives"])).is_err());
        assert!(parse_args(&args(&["--dangling"])).is_err());
    }

    #[test]
    fn test_function_call_with_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        std::fs::write(&input, "hello").unwrap();

        let list = vec![
            "@upper".to_string(),
            "<".to_string(),
            input.display().to_string(),
            ">".to_string(),
            output.display().to_string(),
        ];
        let Invocation::Function(call) = parse_args(&list).unwrap() else {
            panic!("expected function call");
        };
        assert_eq!(call.args, vec![Value::from("hello")]);

        let registry = FunctionRegistry::new();
        assert_eq!(call.run(&registry, OutputFormat::Text).unwrap(), None);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "HELLO");

        let Invocation::Function(call) = parse_args(&args(&["@lower", "ABC"])).unwrap() else {
            panic!("expected function call");
        };
        assert_eq!(call.run(&registry, OutputFormat::Text).unwrap(), Some("abc".to_string()));

        let Invocation::Function(call) = parse_args(&args(&["@ssplit", "--ws", "a b"])).unwrap() else {
            panic!("expected function call");
        };
        assert_eq!(
            call.run(&registry, OutputFormat::Json).unwrap(),
            Some("[\n  \"a\",\n  \"b\"\n]".to_string())
        );

        let Invocation::Function(call) = parse_args(&args(&["@nope"])).unwrap() else {
            panic!("expected function call");
        };
        assert!(call.run(&registry, OutputFormat::Text).unwrap_err().to_string().contains("is not exist"));
    }
}
