//! Text built-ins: ssplit, sreplace and spad

use std::fs;

use anyhow::{anyhow, bail, Context as _, Result};
use regex::Regex;

use super::{Flag, FunctionRegistry, Options};
use crate::value::Value;

const SSPLIT_FLAGS: &[Flag] = &[
    Flag::long_switch("ws"),
    Flag::switch('l', "line"),
    Flag::option(None, "by"),
    Flag::option(None, "regx"),
    Flag::option(None, "rc"),
];
const SREPLACE_FLAGS: &[Flag] = &[Flag::switch('x', "regx"), Flag::option(Some('l'), "line")];
const SPAD_FLAGS: &[Flag] = &[
    Flag::option(Some('l'), "left"),
    Flag::option(Some('r'), "right"),
    Flag::option(Some('m'), "max"),
    Flag::option(None, "by"),
];

impl FunctionRegistry {
    pub(super) fn register_strings(&mut self) {
        self.register("ssplit", ssplit);
        self.register("sreplace", sreplace);
        self.register("spad", spad);
    }
}

/// `ssplit [-l] [--ws] [--by SEP] [--regx RE] [--rc ROW:COL] TEXT`
///
/// `--line` alone gives the lines, `--ws` or `--by` alone the fields, both
/// together a table of fields per line. `--rc` picks a row, a column (`:C`)
/// or a cell out of that table, `-1` being the last. Empty lines and
/// repeated separators are skipped.
fn ssplit(args: &[Value]) -> Result<Value> {
    let (options, rest) = Options::parse("ssplit", SSPLIT_FLAGS, args)?;
    let [text] = rest else {
        bail!("ssplit: expected a single string argument, got {}", rest.len());
    };
    let text = text.to_text()?;

    if let Some(pattern) = options.text("regx")? {
        let regex = Regex::new(&pattern).with_context(|| format!("ssplit: invalid regular expression {}", pattern))?;
        return Ok(Value::Array(regex.split(&text).map(Value::from).collect()));
    }

    let by = options.text("by")?.filter(|by| !by.is_empty());
    let ws = options.has("ws");
    let by_line = options.has("line");
    if by_line && by.as_deref().is_some_and(|by| by.contains(['\n', '\r'])) {
        bail!("ssplit: flag --by must not contain a newline when --line is given");
    }
    let fields = |line: &str| -> Vec<Value> {
        if ws {
            line.split_whitespace().map(Value::from).collect()
        } else if let Some(by) = &by {
            line.split(by.as_str()).filter(|f| !f.is_empty()).map(Value::from).collect()
        } else {
            vec![Value::from(line)]
        }
    };

    if !by_line {
        if options.has("rc") {
            bail!("ssplit: flag --line is required when specified flag --rc");
        }
        if !ws && by.is_none() {
            bail!("ssplit: required at least one split flag");
        }
        return Ok(Value::Array(fields(&text)));
    }

    let rows: Vec<Vec<Value>> = text.lines().filter(|l| !l.is_empty()).map(|l| fields(l)).collect();
    let tabular = ws || by.is_some();
    let row_value = |row: Vec<Value>| -> Value {
        if tabular {
            Value::Array(row)
        } else {
            row.into_iter().next().unwrap_or_else(Value::empty)
        }
    };

    let Some(rc) = options.text("rc")? else {
        return Ok(Value::Array(rows.into_iter().map(row_value).collect()));
    };
    let (row, column) = parse_row_column(&rc)?;
    match (row, column) {
        (Some(row), None) => {
            let index = pick(row, rows.len()).ok_or_else(|| anyhow!("ssplit: row {} is out of range", row))?;
            Ok(row_value(rows[index].clone()))
        }
        (None, Some(column)) => {
            let mut picked = Vec::with_capacity(rows.len());
            for row in &rows {
                let index = pick(column, row.len())
                    .ok_or_else(|| anyhow!("ssplit: column {} is out of range", column))?;
                picked.push(row[index].clone());
            }
            Ok(Value::Array(picked))
        }
        (Some(row), Some(column)) => {
            let cells = pick(row, rows.len()).map(|index| &rows[index]);
            cells
                .and_then(|cells| pick(column, cells.len()).map(|index| cells[index].clone()))
                .ok_or_else(|| anyhow!("ssplit: cell {}:{} is out of range", row, column))
        }
        (None, None) => bail!("ssplit: invalid --rc value {}", rc),
    }
}

/// `R`, `R:C` or `:C`
fn parse_row_column(rc: &str) -> Result<(Option<i64>, Option<i64>)> {
    let number = |s: &str| -> Result<Option<i64>> {
        if s.is_empty() {
            return Ok(None);
        }
        s.parse().map(Some).map_err(|_| anyhow!("ssplit: invalid --rc value {}", rc))
    };
    match rc.split_once(':') {
        Some((row, column)) => Ok((number(row)?, number(column)?)),
        None => Ok((number(rc)?, None)),
    }
}

/// Index into a list of `len` items, `-1` counting from the end
fn pick(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    usize::try_from(resolved).ok().filter(|&i| i < len)
}

/// `sreplace [-x] [-l LINES] OLD NEW TEXT` returns the replaced text;
/// `sreplace ... OLD NEW @FILE [@OUT]` rewrites FILE, or writes OUT.
/// LINES are zero based and comma separated.
fn sreplace(args: &[Value]) -> Result<Value> {
    let (options, rest) = Options::parse("sreplace", SREPLACE_FLAGS, args)?;
    let (old, new, input, output) = match rest {
        [old, new, input] => (old, new, input, None),
        [old, new, input, output] => (old, new, input, Some(output.to_text()?)),
        _ => bail!("sreplace: expected 3 or 4 arguments, got {}", rest.len()),
    };
    let (old, new, input) = (old.to_text()?, new.to_text()?, input.to_text()?);
    let lines = match options.text("line")? {
        Some(spec) => Some(parse_lines(&spec)?),
        None => None,
    };
    let regex = if options.has("regx") {
        Some(Regex::new(&old).with_context(|| format!("sreplace: invalid regular expression {}", old))?)
    } else {
        None
    };
    let replace = |text: &str| match &regex {
        Some(regex) => regex.replace_all(text, new.as_str()).into_owned(),
        None => text.replace(&old, &new),
    };

    let Some(file) = input.strip_prefix('@') else {
        if output.is_some() {
            bail!("sreplace: an output file needs a file input");
        }
        return Ok(Value::String(match &lines {
            Some(lines) => by_lines(&input, lines, replace),
            None => replace(&input),
        }));
    };

    let out = match &output {
        Some(out) => out
            .strip_prefix('@')
            .ok_or_else(|| anyhow!("sreplace: output {} must start with @", out))?,
        None => file,
    };
    let content = fs::read_to_string(file).with_context(|| format!("sreplace: cannot read {}", file))?;
    let replaced = match (&lines, &regex) {
        (Some(lines), _) => by_lines(&content, lines, replace),
        // regular expressions see one line at a time
        (None, Some(_)) => content.split_inclusive('\n').map(replace).collect(),
        (None, None) => replace(&content),
    };
    fs::write(out, replaced).with_context(|| format!("sreplace: cannot write {}", out))?;
    Ok(Value::empty())
}

fn parse_lines(spec: &str) -> Result<Vec<usize>> {
    spec.split(',')
        .map(|line| {
            line.trim()
                .parse()
                .map_err(|_| anyhow!("sreplace: invalid line format {} in {}", line, spec))
        })
        .collect()
}

/// Apply `replace` to the listed lines only, newlines kept
fn by_lines(text: &str, lines: &[usize], replace: impl Fn(&str) -> String) -> String {
    text.split_inclusive('\n')
        .enumerate()
        .map(|(n, line)| {
            if lines.contains(&n) {
                replace(line)
            } else {
                line.to_string()
            }
        })
        .collect()
}

/// `spad [-l N] [-r N] [-m MAX] [--by S] TEXT...` repeats S N times on
/// each side, keeping at most MAX characters
fn spad(args: &[Value]) -> Result<Value> {
    let (options, rest) = Options::parse("spad", SPAD_FLAGS, args)?;
    if rest.is_empty() {
        bail!("spad: expected at least one argument");
    }
    let count = |name: &str| -> Result<usize> {
        let n = options.int(name)?;
        usize::try_from(n).map_err(|_| anyhow!("spad: --{} must not be negative, got {}", name, n))
    };
    let (left, right, max) = (count("left")?, count("right")?, count("max")?);
    let by = options.text("by")?.unwrap_or_default();
    if left == 0 && right == 0 {
        return Ok(match rest {
            [single] => single.clone(),
            items => Value::Array(items.to_vec()),
        });
    }

    let mut padded = Vec::with_capacity(rest.len());
    for arg in rest {
        padded.push(Value::String(pad(&arg.to_text()?, left, right, max, &by)));
    }
    Ok(match padded.len() {
        1 => padded.remove(0),
        _ => Value::Array(padded),
    })
}

fn pad(text: &str, mut left: usize, mut right: usize, max: usize, by: &str) -> String {
    let len = text.chars().count();
    let unit = by.chars().count();
    if unit == 0 || (max > 0 && len >= max) {
        return text.to_string();
    }
    let total = |left: usize, right: usize| (left + right) * unit + len;

    // drop whole repetitions, right side first, until at most one partial
    // repetition is over the limit
    let mut left_turn = false;
    while max > 0 && left + right > 0 && total(left, right) >= max + unit {
        if (left_turn && left > 0) || right == 0 {
            left -= 1;
        } else {
            right -= 1;
        }
        left_turn = !left_turn;
    }

    // the remaining overflow is cut from the outer end of the left padding,
    // or of the right padding when there is none on the left
    let cut = if max > 0 { total(left, right).saturating_sub(max) } else { 0 };
    let (left_cut, right_cut) = if left > 0 { (cut, 0) } else { (0, cut) };
    let mut out: String = by.repeat(left).chars().skip(left_cut).collect();
    out.push_str(text);
    let suffix = by.repeat(right);
    let keep = suffix.chars().count().saturating_sub(right_cut);
    out.extend(suffix.chars().take(keep));
    out
}
