//! Tree-walking evaluator for Cookfiles
//!
//! The evaluator owns the `Context` of one execution and borrows the parsed
//! `Cook` program, which stays immutable. Statements are executed in order
//! and a block stops at its first error or as soon as a break, continue or
//! return is pending.
//!
//! Calls come in two flavours. Inside an expression a call's result is
//! captured; as a statement it is not, so an external command streams to the
//! terminal instead. Piped input travels as an extra parameter of
//! `eval_invocation` rather than being stored in the tree.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::rc::Rc;

use anyhow::{anyhow, Context as _, Result};
use tracing::{debug, trace};

use crate::ast::{
    Block, Call, CallKind, DeleteSelection, ElseBranch, ExistsSubject, Expr, ForKind,
    ForStatement, Function, FunctionBody, IfStatement, Interval, MergeMode, Statement, Target,
};
use crate::context::{Context, LValue};
use crate::cook::Cook;
use crate::error::{eval_error, internal_error, is_internal, ResultExt};
use crate::operators;
use crate::token::{Position, Token};
use crate::transform::{array_index, transform_in_place, TransformView};
use crate::value::{Kind, Value, ValueMap};

/// Nested function and target invocations allowed before giving up
const MAX_CALL_DEPTH: usize = 200;

/// Longest chain of write-backs followed by one assignment
const MAX_WRITE_BACK_DEPTH: usize = 64;

/// Normalised interval: inclusive `start..=end` walked by a signed `step`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sequence {
    Empty,
    Int { start: i64, end: i64, step: i64 },
    Float { start: f64, end: f64, step: f64 },
}

impl Sequence {
    /// Every value of the sequence, in iteration order
    pub fn values(&self) -> Vec<Value> {
        match *self {
            Sequence::Empty => Vec::new(),
            Sequence::Int { start, end, step } => {
                let mut out = Vec::new();
                let mut i = start;
                while int_in_range(i, end, step) {
                    out.push(Value::Int(i));
                    match i.checked_add(step) {
                        Some(next) => i = next,
                        None => break,
                    }
                }
                out
            }
            Sequence::Float { start, end, step } => {
                let mut out = Vec::new();
                let mut f = start;
                while float_in_range(f, end, step) {
                    out.push(Value::Float(f));
                    f += step;
                }
                out
            }
        }
    }
}

fn int_in_range(i: i64, end: i64, step: i64) -> bool {
    if step > 0 {
        i <= end
    } else {
        i >= end
    }
}

fn float_in_range(f: f64, end: f64, step: f64) -> bool {
    if step > 0.0 {
        f <= end
    } else {
        f >= end
    }
}

/// Evaluation state of one execution of a `Cook` program
pub struct Evaluator<'a> {
    ctx: Context,
    cook: &'a Cook,
    chain_operand: Option<Value>,
    call_depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(cook: &'a Cook) -> Self {
        Self {
            ctx: Context::new(),
            cook,
            chain_operand: None,
            call_depth: 0,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn into_context(self) -> Context {
        self.ctx
    }

    /// Current value of a variable, `None` when undefined
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.ctx.get_variable(name)
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    /// Run a block, optionally inside a fresh child scope
    pub fn exec_block(&mut self, block: &Block, scoped: bool) -> Result<()> {
        let scope = scoped.then(|| self.ctx.enter_block());
        let result = self.exec_statements(&block.statements);
        if let Some(scope) = scope {
            self.ctx.exit_block(scope, &block.pos)?;
        }
        result
    }

    fn exec_statements(&mut self, statements: &[Statement]) -> Result<()> {
        for stmt in statements {
            self.exec_statement(stmt)?;
            if self.ctx.should_break(false) {
                break;
            }
        }
        Ok(())
    }

    pub fn exec_statement(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::Block(block) => self.exec_block(block, true),
            Statement::Assign {
                target,
                op,
                value,
                pos,
            } => self.exec_assign(target, *op, value, pos),
            Statement::BreakContinue { op, label, pos } => {
                let label = label.as_deref();
                match op {
                    Token::Break => self.ctx.break_loop(label).at(pos),
                    Token::Continue => self.ctx.continue_loop(label).at(pos),
                    op => Err(internal_error(pos, format!("{} is not break or continue", op))),
                }
            }
            Statement::Expr(expr) if expr.is_call() => {
                self.eval_invocation(expr, false, None)?;
                Ok(())
            }
            Statement::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
            Statement::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::empty(),
                };
                self.ctx.set_return(value);
                Ok(())
            }
            Statement::For(stmt) => self.exec_for(stmt),
            Statement::If(stmt) => self.exec_if(stmt),
        }
    }

    fn exec_assign(&mut self, target: &Expr, op: Token, value: &Expr, pos: &Position) -> Result<()> {
        if let (Expr::Ident { name, .. }, Token::Assign) = (target, op) {
            return match value {
                Expr::Transformation {
                    source,
                    func,
                    pos: tpos,
                } if source == name => {
                    let current = self.lookup(name, tpos)?;
                    let updated = transform_in_place(self, current, func).at(tpos)?;
                    self.assign_variable(name, updated, None, pos)
                }
                Expr::Index { .. } => {
                    let (value, element) = self.eval_place(value)?;
                    self.assign_variable(name, value, element, pos)
                }
                _ => {
                    let value = self.eval(value)?;
                    self.assign_variable(name, value, None, pos)
                }
            };
        }

        let rhs = self.eval(value)?;
        let lvalue = self.target_lvalue(target)?;
        let updated = if op == Token::Assign {
            rhs
        } else {
            let current = self.load(&lvalue, pos)?;
            self.compound(op, current, rhs, pos)?
        };
        self.store(&lvalue, updated, pos)
    }

    fn compound(&mut self, op: Token, current: Value, rhs: Value, pos: &Position) -> Result<Value> {
        let Some(binary) = op.compound_operator() else {
            return Err(internal_error(pos, format!("{} is not an assignment operator", op)));
        };
        let current = self.materialize(current)?;
        let rhs = self.materialize(rhs)?;
        if binary == Token::Add && matches!((&current, &rhs), (Value::Map(_), Value::Map(_))) {
            return merge_maps(current, rhs, MergeMode::Strict).at(pos);
        }
        operators::binary(binary, current, rhs).at(pos)
    }

    fn exec_if(&mut self, stmt: &IfStatement) -> Result<()> {
        if self.eval_condition(&stmt.cond)? {
            return self.exec_block(&stmt.body, false);
        }
        match &stmt.otherwise {
            Some(ElseBranch::If(next)) => self.exec_if(next),
            Some(ElseBranch::Block(block)) => self.exec_block(block, false),
            None => Ok(()),
        }
    }

    fn exec_for(&mut self, stmt: &ForStatement) -> Result<()> {
        let scope = self.ctx.enter_block();
        let loop_index = self.ctx.enter_loop(stmt.label.clone());
        let result = match &stmt.kind {
            ForKind::Range { index, range } => self.for_range(index, range, &stmt.body, &stmt.pos),
            ForKind::Each {
                index,
                value,
                operand,
            } => self.for_each(index, value, operand, &stmt.body, &stmt.pos),
            ForKind::Infinite => self.for_infinite(&stmt.body),
        };
        let exited = self.ctx.exit_loop(loop_index, &stmt.pos);
        let closed = self.ctx.exit_block(scope, &stmt.pos);
        result?;
        exited?;
        closed
    }

    /// Run one iteration, false when the loop must stop
    fn iterate(&mut self, body: &Block) -> Result<bool> {
        self.exec_block(body, false)?;
        if self.ctx.should_break(true) {
            return Ok(false);
        }
        self.ctx.reset_break_continue();
        Ok(true)
    }

    fn for_infinite(&mut self, body: &Block) -> Result<()> {
        while self.iterate(body)? {}
        Ok(())
    }

    fn for_range(&mut self, name: &str, range: &Interval, body: &Block, pos: &Position) -> Result<()> {
        match self.normalize(range)? {
            Sequence::Empty => Ok(()),
            Sequence::Int { start, end, step } => {
                let mut i = start;
                while int_in_range(i, end, step) {
                    self.ctx.declare(name, Value::Int(i), None);
                    if !self.iterate(body)? {
                        break;
                    }
                    i = match self.ctx.get_variable(name) {
                        Some(Value::Int(current)) => current,
                        _ => return Err(eval_error(pos, format!("loop variable {} must stay integer", name))),
                    };
                    match i.checked_add(step) {
                        Some(next) => i = next,
                        None => break,
                    }
                }
                Ok(())
            }
            Sequence::Float { start, end, step } => {
                let mut f = start;
                while float_in_range(f, end, step) {
                    self.ctx.declare(name, Value::Float(f), None);
                    if !self.iterate(body)? {
                        break;
                    }
                    f = match self.ctx.get_variable(name) {
                        Some(Value::Float(current)) => current,
                        _ => return Err(eval_error(pos, format!("loop variable {} must stay float", name))),
                    };
                    f += step;
                }
                Ok(())
            }
        }
    }

    fn for_each(
        &mut self,
        index: &str,
        value: &str,
        operand: &Expr,
        body: &Block,
        pos: &Position,
    ) -> Result<()> {
        let (container, base) = self.eval_place(operand)?;
        let base = if matches!(container, Value::View(_)) { None } else { base };
        match self.materialize(container)? {
            Value::Array(items) => {
                for (i, item) in items.into_iter().enumerate() {
                    let element = base
                        .clone()
                        .map(|base| LValue::ArrayIndex(Box::new(base), i));
                    self.ctx.declare(index, Value::Int(i as i64), None);
                    self.ctx.declare(value, item, element);
                    if !self.iterate(body)? {
                        break;
                    }
                }
            }
            Value::Map(map) => {
                for (key, item) in map.iter() {
                    let element = base
                        .clone()
                        .map(|base| LValue::MapKey(Box::new(base), key.clone()));
                    self.ctx.declare(index, key.clone(), None);
                    self.ctx.declare(value, item.clone(), element);
                    if !self.iterate(body)? {
                        break;
                    }
                }
            }
            Value::String(s) => {
                for (i, ch) in s.chars().enumerate() {
                    self.ctx.declare(index, Value::Int(i as i64), None);
                    self.ctx.declare(value, Value::String(ch.to_string()), None);
                    if !self.iterate(body)? {
                        break;
                    }
                }
            }
            other => {
                return Err(eval_error(pos, format!("cannot iterate over {}", other.kind())));
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Variables and write-back
    // ---------------------------------------------------------------------

    fn lookup(&self, name: &str, pos: &Position) -> Result<Value> {
        self.ctx
            .get_variable(name)
            .ok_or_else(|| eval_error(pos, format!("variable {} is not defined", name)))
    }

    fn assign_variable(
        &mut self,
        name: &str,
        value: Value,
        write_back: Option<LValue>,
        pos: &Position,
    ) -> Result<()> {
        if write_back.is_some() {
            self.ctx.set_variable(name, value, write_back);
            return Ok(());
        }
        self.store(&LValue::Variable(name.to_string()), value, pos)
    }

    /// Read the current value behind an lvalue
    fn load(&self, lvalue: &LValue, pos: &Position) -> Result<Value> {
        match lvalue {
            LValue::Variable(name) => self.lookup(name, pos),
            LValue::ArrayIndex(container, index) => match self.load(container, pos)? {
                Value::Array(items) => items.get(*index).cloned().ok_or_else(|| {
                    eval_error(pos, format!("index {} out of range, length is {}", index, items.len()))
                }),
                other => Err(eval_error(pos, format!("cannot index {}", other.kind()))),
            },
            LValue::MapKey(container, key) => match self.load(container, pos)? {
                Value::Map(map) => map
                    .get(key)
                    .cloned()
                    .ok_or_else(|| eval_error(pos, format!("map: key {} is not exist", key))),
                other => Err(eval_error(pos, format!("cannot index {}", other.kind()))),
            },
        }
    }

    /// Write through an lvalue, following write-backs of the variables touched
    fn store(&mut self, lvalue: &LValue, value: Value, pos: &Position) -> Result<()> {
        let mut pending = Some((lvalue.clone(), value));
        let mut depth = 0;
        while let Some((lvalue, value)) = pending.take() {
            depth += 1;
            if depth > MAX_WRITE_BACK_DEPTH {
                return Err(eval_error(pos, "write-back chain is too deep"));
            }
            pending = match lvalue {
                LValue::Variable(name) => self
                    .ctx
                    .set_variable(&name, value.clone(), None)
                    .map(|next| (next, value)),
                LValue::ArrayIndex(container, index) => {
                    let mut current = self.load(&container, pos)?;
                    match &mut current {
                        Value::Array(items) => {
                            let len = items.len();
                            match items.get_mut(index) {
                                Some(slot) => *slot = value,
                                None => {
                                    return Err(eval_error(
                                        pos,
                                        format!("index {} out of range, length is {}", index, len),
                                    ))
                                }
                            }
                        }
                        other => {
                            return Err(eval_error(pos, format!("cannot index {}", other.kind())))
                        }
                    }
                    Some((*container, current))
                }
                LValue::MapKey(container, key) => {
                    let mut current = self.load(&container, pos)?;
                    match &mut current {
                        Value::Map(map) => {
                            map.insert(key, value);
                        }
                        other => {
                            return Err(eval_error(pos, format!("cannot index {}", other.kind())))
                        }
                    }
                    Some((*container, current))
                }
            };
        }
        Ok(())
    }

    /// Lvalue of an assignment target, checking that array indexes exist
    fn target_lvalue(&mut self, expr: &Expr) -> Result<LValue> {
        match expr {
            Expr::Ident { name, .. } => Ok(LValue::Variable(name.clone())),
            Expr::Index { target, index, pos } => {
                let base = self.target_lvalue(target)?;
                let container = self.load(&base, pos)?;
                let key = self.eval(index)?;
                match container {
                    Value::Array(items) => {
                        let i = array_index(&key, items.len()).at(pos)?;
                        Ok(LValue::ArrayIndex(Box::new(base), i))
                    }
                    Value::Map(_) => Ok(LValue::MapKey(Box::new(base), key)),
                    Value::View(_) => Err(eval_error(pos, "cannot assign into a transformation")),
                    other => Err(eval_error(pos, format!("cannot assign to index of {}", other.kind()))),
                }
            }
            other => Err(eval_error(other.position(), "expression cannot be assigned to")),
        }
    }

    /// Value of an identifier or index chain and the lvalue it came from
    fn eval_place(&mut self, expr: &Expr) -> Result<(Value, Option<LValue>)> {
        match expr {
            Expr::Ident { name, pos } => {
                let value = self.lookup(name, pos)?;
                Ok((value, Some(LValue::Variable(name.clone()))))
            }
            Expr::Index { target, index, pos } => {
                let (container, base) = self.eval_place(target)?;
                let key = self.eval(index)?;
                let value = self.index_value(&container, &key).at(pos)?;
                let element = base.and_then(|base| match &container {
                    Value::Array(_) => key
                        .to_int()
                        .ok()
                        .map(|i| LValue::ArrayIndex(Box::new(base), i as usize)),
                    Value::Map(_) => Some(LValue::MapKey(Box::new(base), key.clone())),
                    _ => None,
                });
                Ok((value, element))
            }
            other => Ok((self.eval(other)?, None)),
        }
    }

    fn index_value(&mut self, container: &Value, key: &Value) -> Result<Value> {
        match container {
            Value::Array(items) => Ok(items[array_index(key, items.len())?].clone()),
            Value::Map(map) => map
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow!("map: key {} is not exist", key)),
            Value::String(s) => {
                let index = array_index(key, s.chars().count())?;
                Ok(s.chars().nth(index).map(String::from).unwrap_or_default().into())
            }
            Value::View(view) => Rc::clone(view).get(self, key),
            other => Err(anyhow!("cannot index {}", other.kind())),
        }
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    /// Evaluate an expression; calls inside it are captured
    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::BasicLit { value, .. } => Ok(value.clone()),
            Expr::Ident { name, pos } => self.lookup(name, pos),
            Expr::Binary {
                op,
                left,
                right,
                pos,
            } => self.eval_binary(*op, left, right, pos),
            Expr::Chained { pos } => self
                .chain_operand
                .take()
                .ok_or_else(|| internal_error(pos, "chained comparison without a left operand")),
            Expr::Unary { op, operand, pos } => {
                if *op == Token::Fd {
                    return self.eval_text(operand).map(Value::String);
                }
                let value = self.eval(operand)?;
                let value = self.materialize(value)?;
                operators::unary(*op, value).at(pos)
            }
            Expr::IncDec { op, target, pos } => {
                let lvalue = self.target_lvalue(target)?;
                let current = self.load(&lvalue, pos)?;
                let updated = operators::inc_dec(*op, &current).at(pos)?;
                self.store(&lvalue, updated.clone(), pos)?;
                Ok(updated)
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
                ..
            } => {
                if self.eval_condition(cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Fallback {
                primary, default, ..
            } => match self.eval(primary) {
                Err(err) if !is_internal(&err) => {
                    trace!("fallback taken: {:#}", err);
                    self.eval(default)
                }
                result => result,
            },
            Expr::IsType { operand, kinds, .. } => {
                let kind = match operand.as_ref() {
                    Expr::Ident { name, .. } if !self.ctx.has_variable(name) => {
                        return Ok(Value::Bool(false))
                    }
                    other => self.eval(other)?.kind(),
                };
                Ok(Value::Bool(Kind::mask(kinds) & kind.bit() != 0))
            }
            Expr::TypeCast { to, operand, pos } => {
                let value = self.eval(operand)?;
                let value = self.materialize(value)?;
                operators::cast(*to, value).at(pos)
            }
            Expr::SizeOf { operand, pos } => self.eval_sizeof(operand, pos),
            Expr::Exit { code, pos } => {
                let code = self.eval(code)?.to_int().at(pos)?;
                debug!("exit with status {}", code);
                std::process::exit(code as i32)
            }
            Expr::ArrayLiteral { items, .. } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::Array(values))
            }
            Expr::MapLiteral { entries, .. } => {
                let mut map = ValueMap::new();
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let key = self.materialize_all(key)?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Expr::MergeMap {
                target,
                source,
                mode,
                pos,
            } => {
                let source = self.eval(source)?;
                let source = self.materialize(source)?;
                let lvalue = self.target_lvalue(target)?;
                let current = self.load(&lvalue, pos)?;
                let merged = merge_maps(current, source, *mode).at(pos)?;
                self.store(&lvalue, merged.clone(), pos)?;
                Ok(merged)
            }
            Expr::Delete {
                target,
                selection,
                pos,
            } => self.eval_delete(target, selection, pos),
            Expr::Index { .. } => self.eval_place(expr).map(|(value, _)| value),
            Expr::SubValue { target, range, pos } => self.eval_sub_value(target, range, pos),
            Expr::Interval(interval) => Ok(Value::Array(self.normalize(interval)?.values())),
            Expr::OSysCheck { os, .. } => Ok(Value::Bool(os == std::env::consts::OS)),
            Expr::Exists { subject, .. } => self.eval_exists(subject).map(Value::Bool),
            Expr::Call(_) | Expr::Pipe { .. } | Expr::RedirectTo { .. } => {
                self.eval_invocation(expr, true, None)
            }
            Expr::ReadFrom { file, pos } => {
                let path = self.eval_text(file)?;
                fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path))
                    .at(pos)
                    .map(Value::String)
            }
            Expr::Paren { inner, .. } => self.eval(inner),
            Expr::Transformation { source, func, pos } => {
                let value = self.lookup(source, pos)?;
                let view = TransformView::new(value, Rc::clone(func)).at(pos)?;
                Ok(Value::View(Rc::new(view)))
            }
            Expr::StringInterpolation { parts, .. } => {
                let mut out = String::new();
                for part in parts {
                    let value = self.eval(part)?;
                    out.push_str(&self.stringify(value)?);
                }
                Ok(Value::String(out))
            }
        }
    }

    fn eval_binary(&mut self, op: Token, left: &Expr, right: &Expr, pos: &Position) -> Result<Value> {
        match op {
            Token::LAnd | Token::LOr => {
                let l = self.eval_bool_operand(op, left)?;
                if (op == Token::LAnd) != l {
                    return Ok(Value::Bool(l));
                }
                self.eval_bool_operand(op, right).map(Value::Bool)
            }
            op if op.is_comparison() => {
                let l = self.eval(left)?;
                let l = self.materialize(l)?;
                let r = self.eval(right)?;
                let r = self.materialize(r)?;
                let result = operators::compare(op, &l, &r).at(pos)?;
                self.chain_operand = Some(r);
                Ok(Value::Bool(result))
            }
            op if operators::is_binary_operator(op) => {
                let l = self.eval(left)?;
                let l = self.materialize(l)?;
                let r = self.eval(right)?;
                let r = self.materialize(r)?;
                operators::binary(op, l, r).at(pos)
            }
            op => Err(internal_error(pos, format!("{} is not a binary operator", op))),
        }
    }

    fn eval_bool_operand(&mut self, op: Token, expr: &Expr) -> Result<bool> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(eval_error(
                expr.position(),
                format!("operator {} requires boolean operands, got {}", op, other.kind()),
            )),
        }
    }

    fn eval_condition(&mut self, expr: &Expr) -> Result<bool> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(eval_error(
                expr.position(),
                format!("condition must be boolean, got {}", other.kind()),
            )),
        }
    }

    fn eval_text(&mut self, expr: &Expr) -> Result<String> {
        let value = self.eval(expr)?;
        value.to_text().at(expr.position())
    }

    fn eval_sizeof(&mut self, operand: &Expr, pos: &Position) -> Result<Value> {
        if let Expr::Unary {
            op: Token::Fd,
            operand: path,
            ..
        } = operand
        {
            let path = self.eval_text(path)?;
            return Ok(Value::Int(file_size(Path::new(&path))));
        }
        match self.eval(operand)? {
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Array(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(map) => Ok(Value::Int(map.len() as i64)),
            Value::View(view) => Ok(Value::Int(view.len() as i64)),
            other => Err(eval_error(pos, format!("sizeof is not supported on {}", other.kind()))),
        }
    }

    fn eval_exists(&mut self, subject: &ExistsSubject) -> Result<bool> {
        match subject {
            ExistsSubject::Callable(name) => Ok(self.cook.registry().has_function(name)
                || self.cook.target(name).is_some()
                || self.cook.function(name).is_some()),
            ExistsSubject::Command(name) => Ok(command_exists(name)),
            ExistsSubject::File(path) => {
                let path = self.eval_text(path)?;
                Ok(Path::new(&path).exists())
            }
            ExistsSubject::Value(expr) => match expr.as_ref() {
                Expr::Ident { name, .. } => Ok(self.ctx.has_variable(name)),
                other => match self.eval(other) {
                    Ok(_) => Ok(true),
                    Err(err) if is_internal(&err) => Err(err),
                    Err(_) => Ok(false),
                },
            },
        }
    }

    fn eval_sub_value(&mut self, target: &Expr, range: &Interval, pos: &Position) -> Result<Value> {
        let container = self.eval(target)?;
        let container = self.materialize(container)?;
        let len = match &container {
            Value::Array(items) => items.len(),
            Value::String(s) => s.chars().count(),
            other => return Err(eval_error(pos, format!("sub value is not supported on {}", other.kind()))),
        };
        let indices: Vec<usize> = match self.normalize(range)? {
            Sequence::Empty => Vec::new(),
            Sequence::Int { start, end, step } if step > 0 => {
                if start < 0 || end < start || end as usize > len {
                    return Err(eval_error(
                        pos,
                        format!("sub value range {}..{} out of bounds, length is {}", start, end, len),
                    ));
                }
                (start as usize..end as usize).step_by(step as usize).collect()
            }
            Sequence::Int { .. } => {
                return Err(eval_error(pos, "sub value range must be ascending"));
            }
            Sequence::Float { .. } => {
                return Err(eval_error(pos, "sub value range must be integer"));
            }
        };
        Ok(match container {
            Value::Array(items) => Value::Array(indices.into_iter().map(|i| items[i].clone()).collect()),
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                Value::String(indices.into_iter().map(|i| chars[i]).collect())
            }
            _ => Value::empty(),
        })
    }

    fn eval_delete(&mut self, target: &Expr, selection: &DeleteSelection, pos: &Position) -> Result<Value> {
        let lvalue = self.target_lvalue(target)?;
        let container = self.load(&lvalue, pos)?;
        let keys = match selection {
            DeleteSelection::Keys(keys) => {
                let mut values = Vec::with_capacity(keys.len());
                for key in keys {
                    values.push(self.eval(key)?);
                }
                values
            }
            DeleteSelection::Range(range) => match self.normalize(range)? {
                seq @ (Sequence::Empty | Sequence::Int { .. }) => seq.values(),
                Sequence::Float { .. } => {
                    return Err(eval_error(pos, "delete range must be integer"));
                }
            },
        };
        let updated = delete_keys(container, &keys).at(pos)?;
        self.store(&lvalue, updated.clone(), pos)?;
        Ok(updated)
    }

    /// Resolve an interval into start, end and signed step
    pub fn normalize(&mut self, interval: &Interval) -> Result<Sequence> {
        let pos = &interval.pos;
        let start = self.eval_number(&interval.start)?;
        let end = self.eval_number(&interval.end)?;
        let step = match &interval.step {
            Some(step) => self.eval_number(step)?,
            None => Value::Int(1),
        };
        let exclusive = !interval.start_inclusive || !interval.end_inclusive;

        if let (Value::Int(a), Value::Int(b), Value::Int(s)) = (&start, &end, &step) {
            let (a, b) = (*a, *b);
            let s = s.checked_abs().unwrap_or(i64::MAX);
            if s == 0 {
                return Err(eval_error(pos, "interval step must not be zero"));
            }
            if a == b && exclusive {
                return Ok(Sequence::Empty);
            }
            let s = if a <= b { s } else { -s };
            let overflow = || eval_error(pos, "interval bound overflows");
            let a = if interval.start_inclusive { a } else { a.checked_add(s).ok_or_else(overflow)? };
            let b = if interval.end_inclusive { b } else { b.checked_sub(s).ok_or_else(overflow)? };
            return Ok(Sequence::Int { start: a, end: b, step: s });
        }

        let (a, b) = (start.to_float().at(pos)?, end.to_float().at(pos)?);
        let s = step.to_float().at(pos)?.abs();
        if s == 0.0 || s.is_nan() {
            return Err(eval_error(pos, "interval step must not be zero"));
        }
        if a == b && exclusive {
            return Ok(Sequence::Empty);
        }
        let s = if a <= b { s } else { -s };
        let a = if interval.start_inclusive { a } else { a + s };
        let b = if interval.end_inclusive { b } else { b - s };
        Ok(Sequence::Float { start: a, end: b, step: s })
    }

    fn eval_number(&mut self, expr: &Expr) -> Result<Value> {
        let value = self.eval(expr)?;
        value.to_number().at(expr.position())
    }

    // ---------------------------------------------------------------------
    // Calls, pipes and redirects
    // ---------------------------------------------------------------------

    /// Evaluate a call, pipe or redirect. `piped` is the output of the
    /// previous stage of a pipe.
    pub fn eval_invocation(&mut self, expr: &Expr, capture: bool, piped: Option<Value>) -> Result<Value> {
        match expr {
            Expr::Call(call) => self.eval_call(call, capture, piped),
            Expr::Pipe { source, sink, .. } => {
                let output = self.eval_invocation(source, true, piped)?;
                self.eval_invocation(sink, capture, Some(output))
            }
            Expr::RedirectTo {
                caller,
                files,
                append,
                pos,
            } => {
                let output = self.eval_invocation(caller, true, piped)?;
                self.redirect(&output, files, *append, pos)?;
                Ok(output)
            }
            other if piped.is_some() => Err(internal_error(other.position(), "pipe into a non call expression")),
            other => self.eval(other),
        }
    }

    fn eval_call(&mut self, call: &Call, capture: bool, piped: Option<Value>) -> Result<Value> {
        if call.kind == CallKind::External {
            let mut args = Vec::new();
            for arg in &call.args {
                let value = self.eval(arg)?;
                match self.materialize_all(value)? {
                    Value::Array(items) => {
                        for item in items {
                            args.push(item.to_string());
                        }
                    }
                    value => args.push(value.to_string()),
                }
            }
            let input = match piped {
                Some(value) => Some(self.stringify(value)?),
                None => None,
            };
            return run_command(&call.name, &args, capture, input, &call.pos);
        }

        let cook = self.cook;
        if let Some(target) = cook.target(&call.name) {
            let mut args = self.eval_args(&call.args)?;
            args.extend(piped);
            self.run_target(target, args)?;
            return Ok(Value::empty());
        }

        let registry = cook.registry();
        if registry.has_function(&call.name) {
            let mut args = Vec::new();
            for arg in &call.args {
                let value = self.eval(arg)?;
                match self.materialize_all(value)? {
                    Value::Array(items) => args.extend(items),
                    value => args.push(value),
                }
            }
            if let Some(value) = piped {
                args.push(self.materialize_all(value)?);
            }
            trace!("calling built-in {} with {} arguments", call.name, args.len());
            return registry.call(&call.name, &args).at(&call.pos);
        }

        if let Some(func) = cook.function(&call.name) {
            let mut args = self.eval_args(&call.args)?;
            args.extend(piped);
            return self.call_function(func, args, &call.pos);
        }

        Err(eval_error(
            &call.pos,
            format!("target or function {} is not defined", call.name),
        ))
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        Ok(values)
    }

    fn enter_call(&mut self, pos: &Position) -> Result<()> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(eval_error(pos, "maximum call depth exceeded"));
        }
        self.call_depth += 1;
        Ok(())
    }

    /// Invoke a user function or lambda with positional arguments
    pub fn call_function(&mut self, func: &Function, args: Vec<Value>, pos: &Position) -> Result<Value> {
        if args.len() != func.params.len() {
            return Err(eval_error(
                pos,
                format!(
                    "function {} expects {} arguments, got {}",
                    func.name,
                    func.params.len(),
                    args.len()
                ),
            ));
        }
        self.enter_call(pos)?;
        let scope = self.ctx.enter_block();
        let frame = self.ctx.enter_frame();
        for (param, arg) in func.params.iter().zip(args) {
            self.ctx.declare(param, arg, None);
        }

        let result = match &func.body {
            FunctionBody::Lambda(expr) => self.eval(expr),
            FunctionBody::Block(block) => self.exec_block(block, false).and_then(|_| {
                self.ctx.take_return().ok_or_else(|| {
                    eval_error(pos, format!("function {} finished without return", func.name))
                })
            }),
        };
        self.ctx.take_return();
        self.ctx.exit_frame(frame);
        self.call_depth -= 1;
        self.ctx.exit_block(scope, &func.pos)?;
        result
    }

    /// Run a target in its own scope. Arguments are visible as `$1..$n`
    /// and `$0` holds their count.
    pub fn run_target(&mut self, target: &Target, args: Vec<Value>) -> Result<()> {
        debug!("running target {}", target.name);
        let mut texts = Vec::with_capacity(args.len());
        for arg in args {
            texts.push(self.stringify(arg)?);
        }
        self.enter_call(&target.pos)?;
        let scope = self.ctx.enter_block();
        let frame = self.ctx.enter_frame();
        self.ctx.declare("0", Value::Int(texts.len() as i64), None);
        for (i, text) in texts.into_iter().enumerate() {
            self.ctx.declare(&(i + 1).to_string(), Value::String(text), None);
        }

        let result = self.exec_block(&target.body, false);
        self.ctx.take_return();
        self.ctx.exit_frame(frame);
        self.call_depth -= 1;
        self.ctx.exit_block(scope, &target.pos)?;
        result
    }

    fn redirect(&mut self, output: &Value, files: &[Expr], append: bool, pos: &Position) -> Result<()> {
        let text = match output {
            Value::Array(_) | Value::Map(_) | Value::View(_) => {
                return Err(eval_error(pos, format!("cannot redirect {} to a file", output.kind())));
            }
            scalar => scalar.to_string(),
        };
        for file in files {
            let path = self.eval_text(file)?;
            debug!("redirecting output to {} (append: {})", path, append);
            let mut handle = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&path)
                .with_context(|| format!("failed to open {}", path))
                .at(file.position())?;
            handle
                .write_all(text.as_bytes())
                .with_context(|| format!("failed to write {}", path))
                .at(file.position())?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    /// Evaluate a transformation view into a plain container
    pub fn materialize(&mut self, value: Value) -> Result<Value> {
        match value {
            Value::View(view) => view.materialize(self),
            other => Ok(other),
        }
    }

    /// Like `materialize`, but also inside nested containers
    pub fn materialize_all(&mut self, value: Value) -> Result<Value> {
        match value {
            Value::View(view) => {
                let value = view.materialize(self)?;
                self.materialize_all(value)
            }
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.materialize_all(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Map(map) => {
                let mut out = ValueMap::new();
                for (key, item) in map.iter() {
                    out.insert(key.clone(), self.materialize_all(item.clone())?);
                }
                Ok(Value::Map(out))
            }
            other => Ok(other),
        }
    }

    /// Textual form of any value, views included
    pub fn stringify(&mut self, value: Value) -> Result<String> {
        Ok(self.materialize_all(value)?.to_string())
    }
}

/// Merge `source` into `target` following `mode`
pub fn merge_maps(target: Value, source: Value, mode: MergeMode) -> Result<Value> {
    match (target, source) {
        (Value::Map(mut target), Value::Map(source)) => {
            for (key, value) in source.iter() {
                if target.contains_key(key) {
                    match mode {
                        MergeMode::Overwrite => {}
                        MergeMode::Skip => continue,
                        MergeMode::Strict => {
                            return Err(anyhow!(
                                "map: key {} is already exist, use '?' to ignore the error",
                                key
                            ))
                        }
                    }
                }
                target.insert(key.clone(), value.clone());
            }
            Ok(Value::Map(target))
        }
        (target, source) => Err(anyhow!(
            "merge requires two maps, got {} and {}",
            target.kind(),
            source.kind()
        )),
    }
}

/// Remove array indexes or map keys; every selected element must exist
pub fn delete_keys(container: Value, keys: &[Value]) -> Result<Value> {
    match container {
        Value::Array(mut items) => {
            let mut indices = keys
                .iter()
                .map(|key| array_index(key, items.len()))
                .collect::<Result<Vec<_>>>()?;
            indices.sort_unstable();
            indices.dedup();
            for index in indices.into_iter().rev() {
                items.remove(index);
            }
            Ok(Value::Array(items))
        }
        Value::Map(mut map) => {
            for key in keys {
                if map.remove(key).is_none() {
                    return Err(anyhow!("map: key {} is not exist", key));
                }
            }
            Ok(Value::Map(map))
        }
        other => Err(anyhow!("cannot delete from {}", other.kind())),
    }
}

/// File size in bytes, entry count for a directory, -1 when missing
fn file_size(path: &Path) -> i64 {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => fs::read_dir(path).map_or(-1, |entries| entries.count() as i64),
        Ok(meta) => meta.len() as i64,
        Err(_) => -1,
    }
}

fn command_exists(name: &str) -> bool {
    if name.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(name).is_file();
    }
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| {
            let candidate = dir.join(name);
            candidate.is_file() || (cfg!(windows) && candidate.with_extension("exe").is_file())
        })
    })
}

fn run_command(
    name: &str,
    args: &[String],
    capture: bool,
    input: Option<String>,
    pos: &Position,
) -> Result<Value> {
    debug!("running command {} {:?}", name, args);
    let mut command = Command::new(name);
    command
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::inherit() })
        .stdout(if capture { Stdio::piped() } else { Stdio::inherit() })
        .stderr(Stdio::inherit());
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to run {}", name))
        .at(pos)?;

    let writer = match (input, child.stdin.take()) {
        (Some(input), Some(mut stdin)) => {
            Some(std::thread::spawn(move || stdin.write_all(input.as_bytes())))
        }
        _ => None,
    };
    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for {}", name))
        .at(pos)?;
    if let Some(Ok(Err(err))) = writer.map(|w| w.join()) {
        if err.kind() != ErrorKind::BrokenPipe {
            return Err(eval_error(pos, format!("failed to write input of {}: {}", name, err)));
        }
    }
    if !output.status.success() {
        return Err(eval_error(pos, format!("command {} failed: {}", name, output.status)));
    }
    if capture {
        Ok(Value::String(String::from_utf8_lossy(&output.stdout).into_owned()))
    } else {
        Ok(Value::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::parser::parse_source;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn pos() -> Position {
        Position::new("test".into(), 1, 1)
    }

    fn run(src: &str) -> Context {
        let cook = parse_source("test", src).unwrap();
        let mut ev = Evaluator::new(&cook);
        ev.exec_block(cook.block(), false).unwrap();
        ev.into_context()
    }

    fn run_err(src: &str) -> String {
        let cook = parse_source("test", src).unwrap();
        let mut ev = Evaluator::new(&cook);
        format!("{:#}", ev.exec_block(cook.block(), false).unwrap_err())
    }

    fn var(ctx: &Context, name: &str) -> Value {
        ctx.get_variable(name).unwrap()
    }

    fn ints(items: &[i64]) -> Value {
        Value::Array(items.iter().map(|i| Value::Int(*i)).collect())
    }

    fn interval(start: i64, end: i64, start_inclusive: bool, end_inclusive: bool) -> Interval {
        let lit = |v: i64| Expr::BasicLit {
            value: Value::Int(v),
            pos: pos(),
        };
        Interval {
            start: lit(start),
            end: lit(end),
            start_inclusive,
            end_inclusive,
            step: None,
            pos: pos(),
        }
    }

    #[test]
    fn test_interval_normalisation() {
        let cook = Cook::default();
        let mut ev = Evaluator::new(&cook);
        let seq = ev.normalize(&interval(1, 10, false, false)).unwrap();
        assert_eq!(seq.values(), (2..=9).map(Value::Int).collect::<Vec<_>>());
        assert_eq!(ev.normalize(&interval(5, 5, false, true)).unwrap(), Sequence::Empty);
        assert_eq!(ev.normalize(&interval(5, 5, true, true)).unwrap().values(), vec![Value::Int(5)]);
        let down = ev.normalize(&interval(5, 1, true, false)).unwrap();
        assert_eq!(down.values(), vec![Value::Int(5), Value::Int(4), Value::Int(3), Value::Int(2)]);
    }

    #[test]
    fn test_interval_float_and_step() {
        let ctx = run("a = []\nfor i in 0..1:0.5 {\n a += i\n}\nb = []\nfor i in [0..10):3 {\n b += i\n}\n");
        assert_eq!(
            var(&ctx, "a"),
            Value::Array(vec![Value::Float(0.0), Value::Float(0.5), Value::Float(1.0)])
        );
        assert_eq!(var(&ctx, "b"), ints(&[0, 3, 6]));
    }

    #[test]
    fn test_chained_comparison_evaluates_middle_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut registry = FunctionRegistry::empty();
        registry.register("five", move |_args| {
            counter.set(counter.get() + 1);
            Ok(Value::Int(5))
        });
        let cook = Cook::new(Rc::new(registry));
        let lit = |v: i64| {
            Box::new(Expr::BasicLit {
                value: Value::Int(v),
                pos: pos(),
            })
        };
        let middle = Box::new(Expr::Call(Call {
            kind: CallKind::Function,
            name: "five".to_string(),
            args: Vec::new(),
            pos: pos(),
        }));
        let expr = Expr::Binary {
            op: Token::LAnd,
            left: Box::new(Expr::Binary {
                op: Token::Lss,
                left: lit(2),
                right: middle,
                pos: pos(),
            }),
            right: Box::new(Expr::Binary {
                op: Token::Lss,
                left: Box::new(Expr::Chained { pos: pos() }),
                right: lit(3),
                pos: pos(),
            }),
            pos: pos(),
        };
        let mut ev = Evaluator::new(&cook);
        assert_eq!(ev.eval(&expr).unwrap(), Value::Bool(false));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_chained_comparison_from_source() {
        let ctx = run("a = 2 < 5 < 3\nb = 1 < 2 <= 2 < 4\n");
        assert_eq!(var(&ctx, "a"), Value::Bool(false));
        assert_eq!(var(&ctx, "b"), Value::Bool(true));
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let ctx = run("a = 1 + 2 * 3\nb = 'x' + a\nc = a + 0.5\nd = [2, 3] + 1\ne = \"v=${a + 1} $b\"\n");
        assert_eq!(var(&ctx, "a"), Value::Int(7));
        assert_eq!(var(&ctx, "b"), Value::from("x7"));
        assert_eq!(var(&ctx, "c"), Value::Float(7.5));
        assert_eq!(var(&ctx, "d"), ints(&[2, 3, 1]));
        assert_eq!(var(&ctx, "e"), Value::from("v=8 x7"));
    }

    #[test]
    fn test_nested_labeled_loops() {
        let src = "\
sum = 0
outer = 0
for :labela i1 in (14..21) {
    outer++
    for :labelb i2 in (5..11) {
        if i2 % 2 == 0 {
            continue :labelb
        }
        if i1 == 19 && i2 == 9 {
            continue :labela
        }
        for i3 in (0..11) {
            if i3 > i2 {
                break
            }
            sum += i3
        }
        if i1 == 20 && i2 == 7 {
            break :labela
        }
    }
}
";
        let ctx = run(src);
        let mut sum = 0;
        let mut outer = 0;
        'labela: for i1 in 15..=20 {
            outer += 1;
            for i2 in 6..=10 {
                if i2 % 2 == 0 {
                    continue;
                }
                if i1 == 19 && i2 == 9 {
                    continue 'labela;
                }
                for i3 in 1..=10 {
                    if i3 > i2 {
                        break;
                    }
                    sum += i3;
                }
                if i1 == 20 && i2 == 7 {
                    break 'labela;
                }
            }
        }
        assert_eq!(var(&ctx, "sum"), Value::Int(sum));
        assert_eq!(var(&ctx, "outer"), Value::Int(outer));
    }

    #[test]
    fn test_loop_variable_modification_is_honoured() {
        let ctx = run("n = 0\nfor i in 0..10 {\n n++\n i += 2\n}\n");
        assert_eq!(var(&ctx, "n"), Value::Int(4));
    }

    #[test]
    fn test_for_each_writes_back() {
        let ctx = run("V = [[1, 2], [3, 4]]\nfor i, iv in V {\n iv += 'text'\n}\n");
        assert_eq!(
            var(&ctx, "V"),
            Value::Array(vec![
                Value::Array(vec![Value::Int(1), Value::Int(2), Value::from("text")]),
                Value::Array(vec![Value::Int(3), Value::Int(4), Value::from("text")]),
            ])
        );
    }

    #[test]
    fn test_element_binding_writes_back() {
        let ctx = run("a = [1, [2]]\nb = a[1]\nb += 3\nm = {'k': 1}\nc = m['k']\nc++\n");
        assert_eq!(
            var(&ctx, "a"),
            Value::Array(vec![Value::Int(1), ints(&[2, 3])])
        );
        let m = var(&ctx, "m");
        let Value::Map(m) = m else { panic!("expected map") };
        assert_eq!(m.get(&Value::from("k")), Some(&Value::Int(2)));
    }

    #[test]
    fn test_index_assignment_and_errors() {
        let ctx = run("a = [[0, 0], [0, 0]]\na[1][0] = 5\na[0][1] += 2\n");
        assert_eq!(
            var(&ctx, "a"),
            Value::Array(vec![ints(&[0, 2]), ints(&[5, 0])])
        );
        assert!(run_err("a = [1]\na[3] = 1\n").contains("out of range"));
        assert!(run_err("m = {1: 2}\nx = m[5]\n").contains("key 5 is not exist"));
        assert!(run_err("x = y + 1\n").contains("variable y is not defined"));
    }

    #[test]
    fn test_transformation_views() {
        let ctx = run("a = [1, 2, 3]\nb = a(i, v) => v * 2\nc = b[0]\nd = b(i, v) => v + i\ne = d[2]\nn = sizeof d\n");
        assert_eq!(var(&ctx, "a"), ints(&[1, 2, 3]));
        assert_eq!(var(&ctx, "c"), Value::Int(2));
        assert_eq!(var(&ctx, "e"), Value::Int(8));
        assert_eq!(var(&ctx, "n"), Value::Int(3));
        assert!(matches!(var(&ctx, "b"), Value::View(_)));
    }

    #[test]
    fn test_transformation_in_place() {
        let ctx = run("a = [1, 2, 3]\na = a(i, v) => v * 2\n");
        assert_eq!(var(&ctx, "a"), ints(&[2, 4, 6]));
    }

    #[test]
    fn test_delete() {
        let ctx = run("a = [0, 1, 2, 3, 4]\ndelete a[3, 1]\nb = [0, 1, 2, 3, 4]\ndelete b{1..3}\nm = {1: 'a', 2: 'b'}\ndelete m[1]\n");
        assert_eq!(var(&ctx, "a"), ints(&[0, 2, 4]));
        assert_eq!(var(&ctx, "b"), ints(&[0, 4]));
        assert_eq!(var(&ctx, "m").to_string(), "{2: b}");
        assert!(run_err("a = [1, 2]\ndelete a[2]\n").contains("out of range"));
    }

    #[test]
    fn test_merge_map() {
        let ctx = run("a = {1: 'a', 2: 'b'}\na += < {2: 'c', 3: 'd'}\nb = {1: 'a'}\nb += ? {1: 'z', 4: 'e'}\n");
        assert_eq!(var(&ctx, "a").to_string(), "{1: a, 2: c, 3: d}");
        assert_eq!(var(&ctx, "b").to_string(), "{1: a, 4: e}");
        assert!(run_err("a = {1: 'a'}\na += {1: 'b'}\n").contains("map: key 1 is already exist"));
    }

    #[test]
    fn test_sub_value() {
        let ctx = run("a = [0, 1, 2, 3, 4]\nb = a{1..3}\ns = 'héllo'\nt = s{1..4}\n");
        assert_eq!(var(&ctx, "b"), ints(&[1, 2]));
        assert_eq!(var(&ctx, "t"), Value::from("éll"));
        assert!(run_err("a = [1]\nb = a{0..3}\n").contains("out of bounds"));

        let ctx = run("c = 'hello'[1]\nd = 'sample text'{1..6}\ne = \"a\\tb\"[1]\n");
        assert_eq!(var(&ctx, "c"), Value::from("e"));
        assert_eq!(var(&ctx, "d"), Value::from("ample"));
        assert_eq!(var(&ctx, "e"), Value::from("\t"));
    }

    #[test]
    fn test_types_sizes_and_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "12345").unwrap();
        let src = format!(
            "f = '{}'\na = sizeof ~f\nb = sizeof ~'{}'\nc = sizeof 'héllo'\nd = x is integer\nx = 1.5\ne = x is integer | float\ng = integer(x)\nh = x exists\ni = y exists\nj = ~f exists\nk = @print exists\nl = @nothing exists\n",
            file.display(),
            dir.path().join("missing").display()
        );
        let ctx = run(&src);
        assert_eq!(var(&ctx, "a"), Value::Int(5));
        assert_eq!(var(&ctx, "b"), Value::Int(-1));
        assert_eq!(var(&ctx, "c"), Value::Int(5));
        assert_eq!(var(&ctx, "d"), Value::Bool(false));
        assert_eq!(var(&ctx, "e"), Value::Bool(true));
        assert_eq!(var(&ctx, "g"), Value::Int(1));
        assert_eq!(var(&ctx, "h"), Value::Bool(true));
        assert_eq!(var(&ctx, "i"), Value::Bool(false));
        assert_eq!(var(&ctx, "j"), Value::Bool(true));
        assert_eq!(var(&ctx, "k"), Value::Bool(true));
        assert_eq!(var(&ctx, "l"), Value::Bool(false));
    }

    #[test]
    fn test_conditional_and_fallback() {
        let ctx = run("a = 3 > 2 ? 'yes' : 'no'\nb = missing ?? 'default'\nm = {}\nc = m['x'] ?? 0\n");
        assert_eq!(var(&ctx, "a"), Value::from("yes"));
        assert_eq!(var(&ctx, "b"), Value::from("default"));
        assert_eq!(var(&ctx, "c"), Value::Int(0));
    }

    #[test]
    fn test_functions_and_lambdas() {
        let ctx = run("add(a, b) => a + b\nfact(n) {\n if n <= 1 {\n return 1\n }\n m = n - 1\n r = @fact m\n return n * r\n}\nx = @add 1 2\ny = @fact 5\n");
        assert_eq!(var(&ctx, "x"), Value::Int(3));
        assert_eq!(var(&ctx, "y"), Value::Int(120));
        assert!(run_err("f(a) {\n a++\n}\nx = @f 1\n").contains("finished without return"));
        assert!(run_err("f(a) => a\nx = @f 1 2\n").contains("expects 1 arguments"));
        assert!(run_err("x = @nope 1\n").contains("target or function nope is not defined"));
    }

    #[test]
    fn test_return_leaves_loops() {
        let ctx = run("first(items) {\n for i, v in items {\n if v > 2 {\n return v\n }\n }\n return -1\n}\nx = @first [1, 3, 5]\n");
        assert_eq!(var(&ctx, "x"), Value::Int(3));
    }

    #[test]
    fn test_builtin_pipe_and_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let src = format!(
            "x = @upper 'abc' | @lower\n@upper 'first' > '{0}'\n@lower 'SECOND' >> '{0}'\ny = @trim < '{0}'\n",
            out.display()
        );
        let ctx = run(&src);
        assert_eq!(var(&ctx, "x"), Value::from("abc"));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "FIRSTsecond");
        assert_eq!(var(&ctx, "y"), Value::from("FIRSTsecond"));
    }

    #[test]
    fn test_break_outside_loop_is_error() {
        assert!(run_err("break\n").contains("outside of a loop"));
        assert!(run_err("for i in 0..1 {\n break :nope\n}\n").contains("label nope"));
    }

    #[test]
    fn test_merge_and_delete_helpers() {
        let map = |pairs: &[(i64, i64)]| {
            Value::Map(pairs.iter().map(|(k, v)| (Value::Int(*k), Value::Int(*v))).collect())
        };
        assert_eq!(
            merge_maps(map(&[(1, 1)]), map(&[(1, 2), (2, 2)]), MergeMode::Overwrite).unwrap(),
            map(&[(1, 2), (2, 2)])
        );
        assert!(merge_maps(ints(&[1]), map(&[]), MergeMode::Skip).is_err());
        assert_eq!(
            delete_keys(ints(&[0, 1, 2, 3, 4]), &[Value::Int(1), Value::Int(3), Value::Int(1)]).unwrap(),
            ints(&[0, 2, 4])
        );
        assert!(delete_keys(ints(&[0]), &[Value::Int(-1)]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_external_command_capture_and_stdin() {
        let ctx = run("a = #echo 'hi'\nb = @upper 'piped' | #cat\n");
        assert_eq!(var(&ctx, "a"), Value::from("hi\n"));
        assert_eq!(var(&ctx, "b"), Value::from("PIPED"));
        assert!(run_err("#false\n").contains("command false failed"));
    }
}
