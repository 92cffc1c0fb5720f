//! Built-in functions for Cook
//!
//! The evaluator only sees the registry: a name (or alias) mapped to a
//! callable taking already evaluated arguments. Array arguments arrive
//! flattened, so functions over lists take their items variadically.
//! Leading `-x` / `--long` words are flags, see [`Flag`].

mod files;
mod paths;
mod strings;

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};

use crate::value::Value;

/// Callable stored in the registry
pub type BuiltinFunction = Rc<dyn Fn(&[Value]) -> Result<Value>>;

/// Name and alias lookup for built-in functions
#[derive(Clone)]
pub struct FunctionRegistry {
    entries: HashMap<String, BuiltinFunction>,
}

impl FunctionRegistry {
    /// Registry holding the default catalogue
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("print", print);
        registry.register_text();
        registry.register_collections();
        registry.register_files();
        registry.register_paths();
        registry.register_strings();
        registry
    }

    /// Registry without any function
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a function, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        self.entries.insert(name.to_string(), Rc::new(func));
    }

    /// Make `alias` call the function registered as `name`
    pub fn register_alias(&mut self, alias: &str, name: &str) -> bool {
        let Some(func) = self.entries.get(name).cloned() else {
            return false;
        };
        self.entries.insert(alias.to_string(), func);
        true
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        match self.entries.get(name) {
            Some(func) => func(args),
            None => Err(anyhow!("function {} is not exist", name)),
        }
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names and aliases in alphabetical order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn register_text(&mut self) {
        self.register("upper", with_text("upper", |s| Ok(Value::String(s.to_uppercase()))));
        self.register("lower", with_text("lower", |s| Ok(Value::String(s.to_lowercase()))));
        self.register("trim", with_text("trim", |s| Ok(Value::String(s.trim().to_string()))));
        self.register("replace", |args: &[Value]| {
            let [text, from, to] = exactly::<3>("replace", args)?;
            Ok(Value::String(text.to_text()?.replace(&from.to_text()?, &to.to_text()?)))
        });
        self.register("split", |args: &[Value]| {
            let [text, sep] = exactly::<2>("split", args)?;
            let sep = sep.to_text()?;
            Ok(Value::Array(text.to_text()?.split(sep.as_str()).map(Value::from).collect()))
        });
        // join ITEM... SEP
        self.register("join", |args: &[Value]| {
            let Some((sep, items)) = args.split_last() else {
                bail!("join: missing separator");
            };
            let items = items.iter().map(Value::to_text).collect::<Result<Vec<_>>>()?;
            Ok(Value::String(items.join(&sep.to_text()?)))
        });
        self.register("format", format);
        // env NAME [DEFAULT]
        self.register("env", |args: &[Value]| {
            let (name, default) = match args {
                [name] => (name.to_text()?, None),
                [name, default] => (name.to_text()?, Some(default)),
                _ => bail!("env: expected 1 or 2 arguments, got {}", args.len()),
            };
            match (std::env::var(&name), default) {
                (Ok(value), _) => Ok(Value::String(value)),
                (Err(_), Some(default)) => Ok(default.clone()),
                (Err(_), None) => bail!("environment variable {} is not set", name),
            }
        });
    }

    fn register_collections(&mut self) {
        self.register("length", length);
        self.register_alias("len", "length");
        // contains HAYSTACK... NEEDLE
        self.register("contains", |args: &[Value]| {
            let found = match args {
                [Value::String(s), needle] => s.contains(needle.to_text()?.as_str()),
                [Value::Map(m), key] => m.contains_key(key),
                [items @ .., needle] if !items.is_empty() => items.contains(needle),
                _ => bail!("contains: expected a haystack and a needle, got {} arguments", args.len()),
            };
            Ok(Value::Bool(found))
        });
        self.register("keys", |args: &[Value]| match exactly::<1>("keys", args)? {
            [Value::Map(m)] => Ok(Value::Array(m.keys().cloned().collect())),
            [other] => bail!("keys: expected map, got {}", other.kind()),
        });
        self.register("values", |args: &[Value]| match exactly::<1>("values", args)? {
            [Value::Map(m)] => Ok(Value::Array(m.iter().map(|(_, v)| v.clone()).collect())),
            [other] => bail!("values: expected map, got {}", other.kind()),
        });
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `print [-ens] ARG...`: `-e` returns the text instead of writing it,
/// `-n` omits the trailing newline, `-s` trims every argument.
fn print(args: &[Value]) -> Result<Value> {
    let (mut echo, mut omit_newline, mut strip) = (false, false, false);
    let mut rest = args;
    while let Some((Value::String(flag), tail)) = rest.split_first() {
        match flag.strip_prefix('-') {
            Some(letters) if !letters.is_empty() && letters.chars().all(|c| "ens".contains(c)) => {
                echo |= letters.contains('e');
                omit_newline |= letters.contains('n');
                strip |= letters.contains('s');
                rest = tail;
            }
            _ => break,
        }
    }

    let mut words = Vec::with_capacity(rest.len());
    for arg in rest {
        let word = arg.to_text()?;
        words.push(if strip { word.trim().to_string() } else { word });
    }
    let mut line = words.join(" ");
    if !omit_newline {
        line.push('\n');
    }

    if echo {
        return Ok(Value::String(line));
    }
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(line.as_bytes())?;
    stdout.flush()?;
    Ok(Value::empty())
}

/// `format FMT ARG...` with `%s`, `%d`, `%f`, `%v` and `%%`
fn format(args: &[Value]) -> Result<Value> {
    let Some((pattern, values)) = args.split_first() else {
        bail!("format: missing format string");
    };
    let mut values = values.iter();
    let mut next = || values.next().ok_or_else(|| anyhow!("format: not enough arguments"));

    let mut out = String::new();
    let pattern = pattern.to_text()?;
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s' | 'v') => out.push_str(&next()?.to_string()),
            Some('d') => out.push_str(&next()?.to_int()?.to_string()),
            Some('f') => out.push_str(&Value::Float(next()?.to_float()?).to_string()),
            Some(verb) => {
                out.push('%');
                out.push(verb);
            }
            None => out.push('%'),
        }
    }
    Ok(Value::String(out))
}

/// Character count of a single string, entry count of a map, otherwise
/// the number of (flattened) arguments
fn length(args: &[Value]) -> Result<Value> {
    let n = match args {
        [Value::String(s)] => s.chars().count(),
        [Value::Map(m)] => m.len(),
        items => items.len(),
    };
    Ok(Value::Int(n as i64))
}

/// Wrap a function of exactly one string argument
fn with_text<F>(name: &'static str, f: F) -> impl Fn(&[Value]) -> Result<Value>
where
    F: Fn(String) -> Result<Value>,
{
    move |args: &[Value]| {
        let [arg] = exactly::<1>(name, args)?;
        f(arg.to_text()?)
    }
}

fn exactly<'a, const N: usize>(name: &str, args: &'a [Value]) -> Result<&'a [Value; N]> {
    args.try_into().map_err(|_| {
        let plural = if N == 1 { "" } else { "s" };
        anyhow!("{}: expected {} argument{}, got {}", name, N, plural, args.len())
    })
}

/// Every argument as text, at least one required
fn texts(name: &str, args: &[Value]) -> Result<Vec<String>> {
    if args.is_empty() {
        bail!("{}: path argument is required", name);
    }
    args.iter().map(Value::to_text).collect()
}

/// A flag a built-in understands. `-abc` bundles short switches; a short
/// option takes the rest of its word or the next argument as value.
#[derive(Debug, Clone, Copy)]
struct Flag {
    short: Option<char>,
    long: &'static str,
    takes_value: bool,
}

impl Flag {
    const fn switch(short: char, long: &'static str) -> Self {
        Self {
            short: Some(short),
            long,
            takes_value: false,
        }
    }

    const fn long_switch(long: &'static str) -> Self {
        Self {
            short: None,
            long,
            takes_value: false,
        }
    }

    const fn option(short: Option<char>, long: &'static str) -> Self {
        Self {
            short,
            long,
            takes_value: true,
        }
    }
}

/// Flags found in front of the operands, keyed by long name
#[derive(Debug, Default)]
struct Options {
    found: HashMap<&'static str, Option<Value>>,
}

impl Options {
    /// Split `args` into flags and operands. Parsing stops at the first word
    /// that is not a flag or after `--`.
    fn parse<'a>(name: &str, flags: &[Flag], args: &'a [Value]) -> Result<(Self, &'a [Value])> {
        let mut options = Self::default();
        let mut rest = args;
        while let Some((Value::String(word), tail)) = rest.split_first() {
            if word == "--" {
                rest = tail;
                break;
            }
            if !is_flag(word) {
                break;
            }
            rest = tail;

            if let Some(long) = word.strip_prefix("--") {
                let (long, inline) = match long.split_once('=') {
                    Some((long, value)) => (long, Some(Value::from(value))),
                    None => (long, None),
                };
                let flag = flags
                    .iter()
                    .find(|flag| flag.long == long)
                    .ok_or_else(|| anyhow!("{}: unknown flag --{}", name, long))?;
                let value = match (flag.takes_value, inline) {
                    (false, None) => None,
                    (false, Some(_)) => bail!("{}: flag --{} does not take a value", name, long),
                    (true, Some(value)) => Some(value),
                    (true, None) => {
                        let (value, tail) = rest
                            .split_first()
                            .ok_or_else(|| anyhow!("{}: flag --{} requires a value", name, long))?;
                        rest = tail;
                        Some(value.clone())
                    }
                };
                options.found.insert(flag.long, value);
                continue;
            }

            let letters = &word[1..];
            for (at, letter) in letters.char_indices() {
                let flag = flags
                    .iter()
                    .find(|flag| flag.short == Some(letter))
                    .ok_or_else(|| anyhow!("{}: unknown flag -{}", name, letter))?;
                if !flag.takes_value {
                    options.found.insert(flag.long, None);
                    continue;
                }
                let attached = &letters[at + letter.len_utf8()..];
                let value = if attached.is_empty() {
                    let (value, tail) = rest
                        .split_first()
                        .ok_or_else(|| anyhow!("{}: flag -{} requires a value", name, letter))?;
                    rest = tail;
                    value.clone()
                } else {
                    Value::from(attached)
                };
                options.found.insert(flag.long, Some(value));
                break;
            }
        }
        Ok((options, rest))
    }

    fn has(&self, long: &str) -> bool {
        self.found.contains_key(long)
    }

    fn text(&self, long: &str) -> Result<Option<String>> {
        self.found
            .get(long)
            .and_then(Option::as_ref)
            .map(Value::to_text)
            .transpose()
    }

    fn int(&self, long: &str) -> Result<i64> {
        match self.found.get(long).and_then(Option::as_ref) {
            Some(value) => value.to_int(),
            None => Ok(0),
        }
    }
}

/// `-x`, `-abc` or `--long`, but not `-` or a negative number
fn is_flag(word: &str) -> bool {
    let mut chars = word.chars();
    chars.next() == Some('-') && chars.next().is_some_and(|c| c.is_alphabetic() || c == '-')
}
