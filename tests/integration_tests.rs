use cook::context::Context;
use cook::{CookError, Value};
use pretty_assertions::assert_eq;

/// Helper function to parse a Cookfile, run targets and return the final state
fn run_source(content: &str, targets: &[&str]) -> Result<Context, anyhow::Error> {
    let cook = cook::parse_source("Cookfile", content)?;
    let mut evaluator = cook.evaluator();
    cook.execute_in(&mut evaluator, targets)?;
    Ok(evaluator.into_context())
}

fn var(ctx: &Context, name: &str) -> Value {
    ctx.get_variable(name)
        .unwrap_or_else(|| panic!("variable {} is not set", name))
}

#[test]
fn test_basic_example() {
    let content = include_str!("../demos/basic.cook");
    let ctx = run_source(content, &["all"]).expect("Failed to run basic.cook");

    assert_eq!(var(&ctx, "total"), Value::Int(7));
    assert_eq!(var(&ctx, "label"), Value::from("cook v1.5"));
    assert_eq!(var(&ctx, "ratio"), Value::Int(3));
    assert_eq!(var(&ctx, "status"), Value::from("ready"));
    assert_eq!(var(&ctx, "items").to_string(), "[1, 2, 3, 4]");
    assert_eq!(var(&ctx, "config").to_string(), "{mode: debug, jobs: 5}");
    assert_eq!(var(&ctx, "chosen"), Value::from("fallback"));
    assert_eq!(var(&ctx, "between"), Value::Bool(true));
    assert_eq!(var(&ctx, "kind"), Value::Bool(true));
}

#[test]
fn test_loops_example() {
    let content = include_str!("../demos/loops.cook");
    let ctx = run_source(content, &["all"]).expect("Failed to run loops.cook");

    assert_eq!(var(&ctx, "squares").to_string(), "[1, 4, 9, 16, 25]");
    assert_eq!(var(&ctx, "evens").to_string(), "[0, 2, 4, 6, 8, 10]");
    assert_eq!(var(&ctx, "joined"), Value::from("abc"));
    assert_eq!(var(&ctx, "pairs"), Value::Int(6));
    assert_eq!(var(&ctx, "doubled"), Value::Int(42));
    assert_eq!(var(&ctx, "factorial"), Value::Int(120));
    assert_eq!(var(&ctx, "first_scaled"), Value::Int(10));
    assert_eq!(var(&ctx, "squares").to_string(), "[1, 4, 9, 16, 25]");
}

#[test]
fn test_interval_forms() {
    let ctx = run_source(
        "a = []\nfor i in (1..10) {\n    a += i\n}\nb = []\nfor i in (5..5] {\n    b += i\n}\nc = []\nfor i in 3..1 {\n    c += i\n}\n",
        &[],
    )
    .unwrap();
    assert_eq!(var(&ctx, "a").to_string(), "[2, 3, 4, 5, 6, 7, 8, 9]");
    assert_eq!(var(&ctx, "b").to_string(), "[]");
    assert_eq!(var(&ctx, "c").to_string(), "[3, 2, 1]");
}

#[test]
fn test_chained_comparison() {
    let ctx = run_source("x = 5\nr = 2 < x < 3\ns = 1 < 2 <= x < 6\n", &[]).unwrap();
    assert_eq!(var(&ctx, "r"), Value::Bool(false));
    assert_eq!(var(&ctx, "s"), Value::Bool(true));
}

#[test]
fn test_labeled_break_stops_both_loops() {
    let src = "\
outer = 0
inner = 0
for :labela i1 in 14..20 {
    outer++
    for :labelb i2 in 5..10 {
        inner++
        if i2 == 6 {
            break :labela
        }
    }
}
";
    let ctx = run_source(src, &[]).unwrap();
    assert_eq!(var(&ctx, "outer"), Value::Int(1));
    assert_eq!(var(&ctx, "inner"), Value::Int(2));
}

#[test]
fn test_transform_view_and_in_place() {
    let src = "\
a = [1, 2, 3]
v = a(i, x) => x * 2
first = v[0]
a = a(i, x) => x + 1
";
    let ctx = run_source(src, &[]).unwrap();
    assert_eq!(var(&ctx, "first"), Value::Int(2));
    assert_eq!(var(&ctx, "a").to_string(), "[2, 3, 4]");
}

#[test]
fn test_delete_and_merge() {
    let src = "\
a = [1, 2, 3, 4, 5]
delete a[1, 3]
m = {'x': 1}
m += < {'x': 2, 'y': 3}
m += ? {'x': 9}
";
    let ctx = run_source(src, &[]).unwrap();
    assert_eq!(var(&ctx, "a").to_string(), "[1, 3, 5]");
    assert_eq!(var(&ctx, "m").to_string(), "{x: 2, y: 3}");

    let err = run_source("a = [1]\ndelete a[4]\n", &[]).unwrap_err();
    assert!(format!("{:#}", err).contains("out of range"));
}

#[test]
fn test_redirect_read_and_pipe_with_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let src = format!(
        "@upper 'hello' > '{out}'\n@print -en ' world' >> '{out}'\ncontent = @trim < '{out}'\nshout = @lower 'ABC' | @upper\n",
        out = out.display()
    );
    let ctx = run_source(&src, &[]).unwrap();
    assert_eq!(var(&ctx, "content"), Value::from("HELLO world"));
    assert_eq!(var(&ctx, "shout"), Value::from("ABC"));
}

#[test]
fn test_include_and_targets_with_arguments() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("lib.cook"),
        "greet:\n    greeting = 'hello ' + $1\n",
    )
    .unwrap();
    let main = dir.path().join("Cookfile");
    std::fs::write(&main, "include 'lib.cook'\nall:\n    @greet 'cook'\n").unwrap();

    let cook = cook::parse_file(&main).unwrap();
    let mut evaluator = cook.evaluator();
    cook.execute_in(&mut evaluator, &["all"]).unwrap();
    // target scopes are discarded, the call itself must succeed
    assert!(evaluator.variable("greeting").is_none());
}

#[test]
fn test_execute_with_variables() {
    let cook = cook::parse_source("Cookfile", "all:\n    out = dir + '/bin'\n    @print -n out\n").unwrap();
    cook.execute(&[("dir".to_string(), Value::from("dist"))]).unwrap();
    let err = cook.execute(&[]).unwrap_err();
    assert!(format!("{:#}", err).contains("variable dir is not defined"));
}

#[test]
fn test_parse_errors_are_aggregated() {
    let Err(err) = cook::parse_source("Cookfile", "a = \nb = = 2\nc = [1, 2\n") else {
        panic!("malformed Cookfile parsed");
    };
    let Some(CookError::Parse(errors)) = err.downcast_ref::<CookError>() else {
        panic!("expected parse errors, got {:#}", err);
    };
    assert!(errors.diagnostics().len() >= 2, "{}", errors);
    assert!(errors.to_string().contains("Cookfile:2:3"));
}

#[test]
fn test_finalize_runs_after_failure() {
    let src = "\
log = []
finalize:
    log += 'cleanup'
all:
    log += 'start'
    x = 1 / 0
";
    let cook = cook::parse_source("Cookfile", src).unwrap();
    let mut evaluator = cook.evaluator();
    let err = cook.execute_in(&mut evaluator, &["all"]).unwrap_err();
    assert!(format!("{:#}", err).contains("divide by zero"));
    assert_eq!(
        evaluator.variable("log").unwrap().to_string(),
        "[start, cleanup]"
    );
}
