//! Filesystem built-ins: mkdir, rmdir, rm, mv, cp, chmod and workin
//!
//! Paths use `/` on every platform. Sources of `mv` and `cp` may be glob
//! patterns; several sources need an existing directory as destination.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _, Result};
use tracing::debug;

use super::paths::{absolute, clean, glob_paths};
use super::{texts, Flag, FunctionRegistry, Options};
use crate::value::Value;

/// Mode of directories created by `mkdir` without `-m`
const DEFAULT_DIR_MODE: u32 = 0o740;

const MKDIR_FLAGS: &[Flag] = &[Flag::switch('p', "recursive"), Flag::option(Some('m'), "mode")];
const RMDIR_FLAGS: &[Flag] = &[Flag::switch('p', "recursive")];
const RM_FLAGS: &[Flag] = &[Flag::switch('r', "recursive"), Flag::switch('s', "silence")];
const CP_FLAGS: &[Flag] = &[Flag::switch('r', "recursive")];
const CHMOD_FLAGS: &[Flag] = &[Flag::switch('r', "recursive")];

impl FunctionRegistry {
    pub(super) fn register_files(&mut self) {
        self.register("mkdir", mkdir);
        self.register("rmdir", rmdir);
        self.register("rm", rm);
        self.register("mv", |args: &[Value]| transfer("mv", args, true));
        self.register_alias("move", "mv");
        self.register("cp", |args: &[Value]| transfer("cp", args, false));
        self.register_alias("copy", "cp");
        self.register("chmod", chmod);

        // without a path, return to the directory the registry was built in
        let start = std::env::current_dir().ok();
        self.register("workin", move |args: &[Value]| {
            let dir = match args {
                [] => start
                    .clone()
                    .ok_or_else(|| anyhow!("workin: start directory is unknown"))?,
                [dir] => PathBuf::from(dir.to_text()?),
                _ => bail!("workin: expected at most 1 argument, got {}", args.len()),
            };
            std::env::set_current_dir(&dir)
                .with_context(|| format!("workin: cannot enter {}", dir.display()))?;
            debug!("working directory is now {}", dir.display());
            Ok(Value::empty())
        });
        self.register_alias("chdir", "workin");
    }
}

/// `mkdir [-p] [-m MODE] PATH...`
fn mkdir(args: &[Value]) -> Result<Value> {
    let (options, rest) = Options::parse("mkdir", MKDIR_FLAGS, args)?;
    let mode = match options.text("mode")? {
        Some(mode) => parse_mode(&mode, 0, true)?,
        None => DEFAULT_DIR_MODE,
    };
    let mut builder = fs::DirBuilder::new();
    builder.recursive(options.has("recursive"));
    #[cfg(unix)]
    std::os::unix::fs::DirBuilderExt::mode(&mut builder, mode);
    #[cfg(not(unix))]
    let _ = mode;

    for path in texts("mkdir", rest)? {
        builder
            .create(&path)
            .with_context(|| format!("mkdir: cannot create {}", path))?;
    }
    Ok(Value::empty())
}

/// `rmdir [-p] PATH...`, with `-p` every parent of a relative path goes too
fn rmdir(args: &[Value]) -> Result<Value> {
    let (options, rest) = Options::parse("rmdir", RMDIR_FLAGS, args)?;
    for path in texts("rmdir", rest)? {
        let path = clean(Path::new(&path));
        if !fs::metadata(&path)
            .with_context(|| format!("rmdir: cannot access {}", path.display()))?
            .is_dir()
        {
            bail!("rmdir: {} is not a directory", path.display());
        }
        if !options.has("recursive") {
            fs::remove_dir(&path).with_context(|| format!("rmdir: cannot remove {}", path.display()))?;
            continue;
        }
        if path.is_absolute() {
            bail!("rmdir: {} is an absolute path, -p only accepts relative paths", path.display());
        }
        let mut current = Some(path.as_path());
        while let Some(dir) = current.filter(|dir| !dir.as_os_str().is_empty()) {
            fs::remove_dir(dir).with_context(|| format!("rmdir: cannot remove {}", dir.display()))?;
            current = dir.parent();
        }
    }
    Ok(Value::empty())
}

/// `rm [-r] [-s] PATH...`, `-s` swallows every error
fn rm(args: &[Value]) -> Result<Value> {
    let (options, rest) = Options::parse("rm", RM_FLAGS, args)?;
    let recursive = options.has("recursive");
    let result = texts("rm", rest).and_then(|paths| {
        paths
            .iter()
            .try_for_each(|path| remove(Path::new(path), recursive))
    });
    match result {
        Err(err) if options.has("silence") => {
            debug!("{:#}", err);
            Ok(Value::empty())
        }
        other => other.map(|()| Value::empty()),
    }
}

fn remove(path: &Path, recursive: bool) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("rm: cannot remove {}", path.display()))?;
    let removed = if meta.is_dir() {
        if !recursive {
            bail!("rm: {} is a directory, use rmdir or add flag -r", path.display());
        }
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.with_context(|| format!("rm: cannot remove {}", path.display()))
}

/// `mv SOURCE... DEST` and `cp [-r] SOURCE... DEST`
fn transfer(name: &str, args: &[Value], moving: bool) -> Result<Value> {
    let flags = if moving { &[][..] } else { CP_FLAGS };
    let (options, rest) = Options::parse(name, flags, args)?;
    let recursive = moving || options.has("recursive");
    let paths = texts(name, rest)?;
    let Some((dest, sources)) = paths.split_last().filter(|(_, sources)| !sources.is_empty()) else {
        bail!("{}: target is required", name);
    };
    let dest = Path::new(dest);

    let mut matched = Vec::new();
    for source in sources {
        matched.extend(expand(source)?);
    }
    if matched.is_empty() {
        bail!("{}: source {} is not exist", name, sources.join(" "));
    }
    let literal = sources.len() == 1 && matched.len() == 1 && matched[0] == Path::new(&sources[0]);
    if !literal && !dest.is_dir() {
        bail!("{}: last argument {} must be an existed directory", name, dest.display());
    }

    for source in &matched {
        let target = destination(source, dest)?;
        if source.is_dir() && !recursive {
            bail!("{}: {} is a directory, to copy a directory use -r", name, source.display());
        }
        debug!("{} {} -> {}", name, source.display(), target.display());
        if moving {
            move_path(source, &target)?;
        } else {
            copy_path(source, &target)?;
        }
    }
    Ok(Value::empty())
}

/// Glob matches of a pattern, or the path itself when it exists
fn expand(source: &str) -> Result<Vec<PathBuf>> {
    if source.contains(['*', '?', '[']) {
        return glob_paths(source);
    }
    let path = PathBuf::from(source);
    Ok(if fs::symlink_metadata(&path).is_ok() {
        vec![path]
    } else {
        Vec::new()
    })
}

/// Where `source` lands: inside `dest` when it is a directory, unless the
/// source directory ends with `/`, which copies its content only
fn destination(source: &Path, dest: &Path) -> Result<PathBuf> {
    let content_only = source.is_dir() && source.as_os_str().to_string_lossy().ends_with(['/', '\\']);
    if !dest.is_dir() || content_only {
        return Ok(dest.to_path_buf());
    }
    let name = source
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", source.display()))?;
    Ok(dest.join(name))
}

fn move_path(source: &Path, target: &Path) -> Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    // rename fails across devices and onto existing directories
    copy_path(source, target)?;
    let removed = if source.is_dir() {
        fs::remove_dir_all(source)
    } else {
        fs::remove_file(source)
    };
    removed.with_context(|| format!("mv: cannot remove {}", source.display()))
}

fn copy_path(source: &Path, target: &Path) -> Result<()> {
    if !source.is_dir() {
        fs::copy(source, target).with_context(|| {
            format!("cannot copy {} to {}", source.display(), target.display())
        })?;
        return Ok(());
    }
    if absolute(target)?.starts_with(absolute(source)?) {
        bail!("cannot copy {} into itself", source.display());
    }
    fs::create_dir_all(target).with_context(|| format!("cannot create {}", target.display()))?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        copy_path(&entry.path(), &target.join(entry.file_name()))?;
    }
    Ok(())
}

/// `chmod [-r] MODE PATH...` with an octal or symbolic (`u+x,go-w`) mode
fn chmod(args: &[Value]) -> Result<Value> {
    let (options, rest) = Options::parse("chmod", CHMOD_FLAGS, args)?;
    let Some((mode, paths)) = rest.split_first() else {
        bail!("chmod: mode is required");
    };
    let mode = mode.to_text()?;
    for path in texts("chmod", paths)? {
        if options.has("recursive") {
            walk(Path::new(&path), &mut |entry| set_mode(entry, &mode))?;
        } else {
            set_mode(Path::new(&path), &mode)?;
        }
    }
    Ok(Value::empty())
}

/// Visit `path` and everything below it. Children are listed before the
/// directory itself is visited so a mode change cannot hide them.
fn walk(path: &Path, visit: &mut dyn FnMut(&Path) -> Result<()>) -> Result<()> {
    let children = if fs::symlink_metadata(path)?.is_dir() {
        fs::read_dir(path)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()?
    } else {
        Vec::new()
    };
    visit(path)?;
    for child in children {
        walk(&child, visit)?;
    }
    Ok(())
}

fn set_mode(path: &Path, mode: &str) -> Result<()> {
    let meta = fs::metadata(path).with_context(|| format!("chmod: cannot access {}", path.display()))?;
    let mut permissions = meta.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let updated = parse_mode(mode, permissions.mode() & 0o7777, meta.is_dir())?;
        permissions.set_mode(updated);
    }
    #[cfg(not(unix))]
    {
        let current = if permissions.readonly() { 0o555 } else { 0o755 };
        let updated = parse_mode(mode, current, meta.is_dir())?;
        permissions.set_readonly(updated & 0o200 == 0);
    }
    fs::set_permissions(path, permissions)
        .with_context(|| format!("chmod: cannot change {}", path.display()))
}

const SETUID: u32 = 0o4000;
const SETGID: u32 = 0o2000;

/// Apply an octal (`755`) or symbolic (`a=r,u+wx,g-s`) mode to `current`
fn parse_mode(spec: &str, current: u32, is_dir: bool) -> Result<u32> {
    let spec = spec.trim();
    if spec.starts_with(|c: char| c.is_ascii_digit()) {
        return u32::from_str_radix(spec, 8)
            .map(|mode| mode & 0o7777)
            .map_err(|_| anyhow!("invalid file mode {}", spec));
    }

    let mut mode = current;
    for clause in spec.split(',') {
        let mut chars = clause.chars().peekable();
        let mut who = 0;
        while let Some(c) = chars.next_if(|c| "ugoa".contains(*c)) {
            who |= match c {
                'u' => 0o700,
                'g' => 0o070,
                'o' => 0o007,
                _ => 0o777,
            };
        }
        if who == 0 {
            who = 0o777;
        }
        if chars.peek().is_none() {
            bail!("invalid file mode {}: missing operator +, - or =", spec);
        }

        while let Some(op) = chars.next() {
            if !"+-=".contains(op) {
                bail!("invalid file mode {}: missing operator +, - or =", spec);
            }
            let mut triple = 0;
            let mut special = 0;
            while let Some(c) = chars.next_if(|c| !"+-=".contains(*c)) {
                match c {
                    'r' => triple |= 4,
                    'w' => triple |= 2,
                    'x' => triple |= 1,
                    'X' if is_dir || current & 0o111 != 0 => triple |= 1,
                    'X' => {}
                    's' => special |= (if who & 0o700 != 0 { SETUID } else { 0 })
                        | (if who & 0o070 != 0 { SETGID } else { 0 }),
                    'u' => triple |= (mode >> 6) & 7,
                    'g' => triple |= (mode >> 3) & 7,
                    'o' => triple |= mode & 7,
                    other => bail!("invalid file mode {}: unknown permission {}", spec, other),
                }
            }
            let bits = (triple * 0o111) & who | special;
            mode = match op {
                '+' => mode | bits,
                '-' => mode & !bits,
                _ => {
                    let cleared = who
                        | if who & 0o700 != 0 { SETUID } else { 0 }
                        | if who & 0o070 != 0 { SETGID } else { 0 };
                    (mode & !cleared) | bits
                }
            };
        }
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: &[&str]) -> Result<Value> {
        let args: Vec<Value> = args.iter().map(|s| Value::from(*s)).collect();
        FunctionRegistry::new().call(name, &args)
    }

    fn path_arg(path: &Path) -> String {
        path.display().to_string()
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755", 0, false).unwrap(), 0o755);
        assert_eq!(parse_mode("u+x", 0o644, false).unwrap(), 0o744);
        assert_eq!(parse_mode("go-w", 0o666, false).unwrap(), 0o644);
        assert_eq!(parse_mode("a=r,u+w", 0o777, false).unwrap(), 0o644);
        assert_eq!(parse_mode("+X", 0o644, true).unwrap(), 0o755);
        assert_eq!(parse_mode("+X", 0o644, false).unwrap(), 0o644);
        assert_eq!(parse_mode("g=u", 0o640, false).unwrap(), 0o660);
        assert_eq!(parse_mode("u+s", 0o755, false).unwrap(), 0o4755);
        assert!(parse_mode("u", 0o644, false).is_err());
        assert!(parse_mode("u+q", 0o644, false).is_err());
        assert!(parse_mode("9", 0, false).is_err());
    }

    #[test]
    fn test_mkdir_and_rmdir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        assert!(call("mkdir", &[&path_arg(&nested)]).is_err());
        call("mkdir", &["-p", &path_arg(&nested)]).unwrap();
        assert!(nested.is_dir());

        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let err = call("rmdir", &[&path_arg(&file)]).unwrap_err();
        assert!(err.to_string().contains("is not a directory"), "{}", err);
        assert!(call("rmdir", &["-p", &path_arg(&nested)]).unwrap_err().to_string().contains("absolute"));
        call("rmdir", &[&path_arg(&nested)]).unwrap();
        assert!(!nested.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_mkdir_mode_and_chmod() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m");
        call("mkdir", &["-m", "700", &path_arg(&target)]).unwrap();
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&target), 0o700);

        let file = target.join("run.sh");
        fs::write(&file, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).unwrap();
        call("chmod", &["u+x,g+r", &path_arg(&file)]).unwrap();
        assert_eq!(mode(&file), 0o740);
        call("chmod", &["-r", "go+rX", &path_arg(&target)]).unwrap();
        assert_eq!(mode(&target), 0o755);
        assert_eq!(mode(&file), 0o755);
    }

    #[test]
    fn test_rm() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir_all(sub.join("deep")).unwrap();
        fs::write(sub.join("deep/f.txt"), "x").unwrap();

        let err = call("rm", &[&path_arg(&sub)]).unwrap_err();
        assert!(err.to_string().contains("use rmdir or add flag -r"), "{}", err);
        assert!(call("rm", &[&path_arg(&dir.path().join("missing"))]).is_err());
        call("rm", &["-s", &path_arg(&dir.path().join("missing"))]).unwrap();
        call("rm", &["-r", &path_arg(&sub)]).unwrap();
        assert!(!sub.exists());
    }

    #[test]
    fn test_cp_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("inner")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("inner/b.txt"), "b").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        call("cp", &[&path_arg(&src.join("a.txt")), &path_arg(&out)]).unwrap();
        assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "a");
        call("cp", &[&path_arg(&src.join("a.txt")), &path_arg(&out.join("renamed.txt"))]).unwrap();
        assert!(out.join("renamed.txt").is_file());

        let err = call("cp", &[&path_arg(&src), &path_arg(&out)]).unwrap_err();
        assert!(err.to_string().contains("use -r"), "{}", err);
        call("cp", &["-r", &path_arg(&src), &path_arg(&out)]).unwrap();
        assert_eq!(fs::read_to_string(out.join("src/inner/b.txt")).unwrap(), "b");

        let content = dir.path().join("content");
        call("cp", &["-r", &format!("{}/", path_arg(&src)), &path_arg(&content)]).unwrap();
        assert!(content.join("inner/b.txt").is_file());

        let glob = format!("{}/*.txt", path_arg(&src));
        let flat = dir.path().join("flat");
        assert!(call("cp", &[&glob, &path_arg(&flat)]).is_err());
        fs::create_dir(&flat).unwrap();
        call("cp", &[&glob, &path_arg(&flat)]).unwrap();
        assert!(flat.join("a.txt").is_file());
        assert!(call("cp", &[&path_arg(&src)]).unwrap_err().to_string().contains("target is required"));
    }

    #[test]
    fn test_mv() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "a").unwrap();
        let moved = dir.path().join("b.txt");
        call("mv", &[&path_arg(&file), &path_arg(&moved)]).unwrap();
        assert!(!file.exists() && moved.is_file());

        let into = dir.path().join("into");
        fs::create_dir(&into).unwrap();
        call("move", &[&path_arg(&moved), &path_arg(&into)]).unwrap();
        assert_eq!(fs::read_to_string(into.join("b.txt")).unwrap(), "a");
        let err = call("mv", &[&path_arg(&file), &path_arg(&into)]).unwrap_err();
        assert!(err.to_string().contains("is not exist"), "{}", err);
    }
}
