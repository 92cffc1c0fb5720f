//! Path helpers: pabs, pbase, pext, pdir, pclean, psplit, pglob and prel
//!
//! Everything except `pabs` and `pglob` is lexical and never touches the
//! filesystem.

use std::path::{is_separator, Component, Path, PathBuf, MAIN_SEPARATOR};

use anyhow::{bail, Context as _, Result};

use super::{exactly, with_text, FunctionRegistry};
use crate::value::Value;

impl FunctionRegistry {
    pub(super) fn register_paths(&mut self) {
        self.register("pabs", with_text("pabs", |p| Ok(path_value(&absolute(Path::new(&p))?))));
        self.register("pbase", with_text("pbase", |p| Ok(Value::String(base(&p)))));
        self.register("pext", with_text("pext", |p| Ok(Value::from(extension(&p)))));
        self.register("pdir", with_text("pdir", |p| Ok(path_value(&dir(&p)))));
        self.register("pclean", with_text("pclean", |p| Ok(path_value(&clean(Path::new(&p))))));
        self.register(
            "psplit",
            with_text("psplit", |p| {
                Ok(Value::Array(p.split(MAIN_SEPARATOR).map(Value::from).collect()))
            }),
        );
        self.register(
            "pglob",
            with_text("pglob", |pattern| {
                let paths = glob_paths(&pattern)?;
                Ok(Value::Array(paths.iter().map(|p| path_value(p)).collect()))
            }),
        );
        // prel BASE TARGET
        self.register("prel", |args: &[Value]| {
            let [from, to] = exactly::<2>("prel", args)?;
            let rel = relative(Path::new(&from.to_text()?), Path::new(&to.to_text()?))?;
            Ok(path_value(&rel))
        });
    }
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

/// Shortest equivalent path: no `.`, no `name/..`, no repeated or trailing
/// separators. `..` above the root is dropped; an empty result is `.`.
pub(super) fn clean(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.into_iter().collect()
}

/// `path` joined onto the working directory when relative, then cleaned
pub(super) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(clean(path));
    }
    let cwd = std::env::current_dir().context("cannot read the working directory")?;
    Ok(clean(&cwd.join(path)))
}

/// Matches of a glob pattern in the order the `glob` crate yields them
pub(super) fn glob_paths(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in glob::glob(pattern).with_context(|| format!("invalid glob pattern {}", pattern))? {
        paths.push(entry?);
    }
    Ok(paths)
}

/// Last element after trailing separators are removed
fn base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches(is_separator);
    if trimmed.is_empty() {
        return MAIN_SEPARATOR.to_string();
    }
    trimmed.rsplit(is_separator).next().unwrap_or(trimmed).to_string()
}

/// Suffix from the last `.` of the last element, empty without a dot
fn extension(path: &str) -> &str {
    let name = path.rsplit(is_separator).next().unwrap_or(path);
    name.rfind('.').map_or("", |at| &name[at..])
}

/// Everything before the last element, cleaned
fn dir(path: &str) -> PathBuf {
    match path.rfind(is_separator) {
        Some(at) => clean(Path::new(&path[..=at])),
        None => PathBuf::from("."),
    }
}

/// Path that leads from `from` to `to`, both taken lexically
fn relative(from: &Path, to: &Path) -> Result<PathBuf> {
    let (from_clean, to_clean) = (clean(from), clean(to));
    if from_clean.is_absolute() != to_clean.is_absolute() {
        bail!("prel: can't make {} relative to {}", to.display(), from.display());
    }
    let from_parts: Vec<Component> = from_clean.components().filter(|c| *c != Component::CurDir).collect();
    let to_parts: Vec<Component> = to_clean.components().filter(|c| *c != Component::CurDir).collect();
    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();
    if from_parts[common..].contains(&Component::ParentDir) {
        bail!("prel: can't make {} relative to {}", to.display(), from.display());
    }

    let mut rel = PathBuf::new();
    for _ in common..from_parts.len() {
        rel.push("..");
    }
    for part in &to_parts[common..] {
        rel.push(part);
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    Ok(rel)
}
