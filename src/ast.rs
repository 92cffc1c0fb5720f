//! Abstract Syntax Tree for Cookfiles
//!
//! The tree is built once by the parser and never mutated afterwards, so a
//! parsed `Cook` can be executed any number of times. Every node carries the
//! position it was parsed from for error reporting.

use std::rc::Rc;

use crate::token::{Position, Token};
use crate::value::{Kind, Value};

/// Expression nodes
#[derive(Debug, Clone)]
pub enum Expr {
    /// Integer, float, boolean or string literal
    BasicLit { value: Value, pos: Position },
    Ident { name: String, pos: Position },
    Binary {
        op: Token,
        left: Box<Expr>,
        right: Box<Expr>,
        pos: Position,
    },
    /// Right operand of the previous comparison in a chain such as `a < b < c`
    Chained { pos: Position },
    Unary {
        op: Token,
        operand: Box<Expr>,
        pos: Position,
    },
    IncDec {
        op: Token,
        target: Box<Expr>,
        pos: Position,
    },
    /// `cond ? a : b`
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
        pos: Position,
    },
    /// `primary ?? default`
    Fallback {
        primary: Box<Expr>,
        default: Box<Expr>,
        pos: Position,
    },
    /// `x is integer | float`
    IsType {
        operand: Box<Expr>,
        kinds: Vec<Kind>,
        pos: Position,
    },
    /// `integer(x)`
    TypeCast {
        to: Kind,
        operand: Box<Expr>,
        pos: Position,
    },
    SizeOf { operand: Box<Expr>, pos: Position },
    Exit { code: Box<Expr>, pos: Position },
    ArrayLiteral { items: Vec<Expr>, pos: Position },
    MapLiteral {
        entries: Vec<(Expr, Expr)>,
        pos: Position,
    },
    /// `a += < {...}` / `a += ? {...}` / `a += {...}`
    MergeMap {
        target: Box<Expr>,
        source: Box<Expr>,
        mode: MergeMode,
        pos: Position,
    },
    Delete {
        target: Box<Expr>,
        selection: DeleteSelection,
        pos: Position,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        pos: Position,
    },
    /// `x{a..b}`
    SubValue {
        target: Box<Expr>,
        range: Box<Interval>,
        pos: Position,
    },
    Interval(Box<Interval>),
    /// `on linux`
    OSysCheck { os: String, pos: Position },
    Exists { subject: ExistsSubject, pos: Position },
    Call(Call),
    /// `@a | @b`, the sink is a call, another pipe or a redirect
    Pipe {
        source: Box<Expr>,
        sink: Box<Expr>,
        pos: Position,
    },
    ReadFrom { file: Box<Expr>, pos: Position },
    RedirectTo {
        caller: Box<Expr>,
        files: Vec<Expr>,
        append: bool,
        pos: Position,
    },
    Paren { inner: Box<Expr>, pos: Position },
    /// `source(i, v) => expr`
    Transformation {
        source: String,
        func: Rc<Function>,
        pos: Position,
    },
    StringInterpolation { parts: Vec<Expr>, pos: Position },
}

impl Expr {
    pub fn position(&self) -> &Position {
        match self {
            Expr::BasicLit { pos, .. }
            | Expr::Ident { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Chained { pos }
            | Expr::Unary { pos, .. }
            | Expr::IncDec { pos, .. }
            | Expr::Conditional { pos, .. }
            | Expr::Fallback { pos, .. }
            | Expr::IsType { pos, .. }
            | Expr::TypeCast { pos, .. }
            | Expr::SizeOf { pos, .. }
            | Expr::Exit { pos, .. }
            | Expr::ArrayLiteral { pos, .. }
            | Expr::MapLiteral { pos, .. }
            | Expr::MergeMap { pos, .. }
            | Expr::Delete { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::SubValue { pos, .. }
            | Expr::OSysCheck { pos, .. }
            | Expr::Exists { pos, .. }
            | Expr::Pipe { pos, .. }
            | Expr::ReadFrom { pos, .. }
            | Expr::RedirectTo { pos, .. }
            | Expr::Paren { pos, .. }
            | Expr::Transformation { pos, .. }
            | Expr::StringInterpolation { pos, .. } => pos,
            Expr::Interval(interval) => &interval.pos,
            Expr::Call(call) => &call.pos,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Expr::Call(_) | Expr::Pipe { .. } | Expr::RedirectTo { .. }
        )
    }
}

/// How `MergeMap` treats keys present in both maps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// `<`: source wins
    Overwrite,
    /// `?`: target wins
    Skip,
    /// bare `+=`: conflicts are errors
    Strict,
}

#[derive(Debug, Clone)]
pub enum DeleteSelection {
    /// Array indexes or map keys
    Keys(Vec<Expr>),
    /// Inclusive index range
    Range(Box<Interval>),
}

#[derive(Debug, Clone)]
pub enum ExistsSubject {
    /// `@name exists`
    Callable(String),
    /// `#name exists`
    Command(String),
    /// `~path exists`
    File(Box<Expr>),
    /// `x exists`, `x[i] exists`
    Value(Box<Expr>),
}

/// Range `A..B` with independent endpoint inclusion and optional step
#[derive(Debug, Clone)]
pub struct Interval {
    pub start: Expr,
    pub end: Expr,
    pub start_inclusive: bool,
    pub end_inclusive: bool,
    pub step: Option<Expr>,
    pub pos: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `@name`: target, built-in or user function
    Function,
    /// `#name`: external program
    External,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub name: String,
    pub args: Vec<Expr>,
    pub pos: Position,
}

/// Statements
#[derive(Debug, Clone)]
pub enum Statement {
    Block(Block),
    Assign {
        target: Expr,
        op: Token,
        value: Expr,
        pos: Position,
    },
    BreakContinue {
        op: Token,
        label: Option<String>,
        pos: Position,
    },
    Expr(Expr),
    Return { value: Option<Expr>, pos: Position },
    For(ForStatement),
    If(IfStatement),
}

impl Statement {
    pub fn position(&self) -> &Position {
        match self {
            Statement::Block(block) => &block.pos,
            Statement::Assign { pos, .. }
            | Statement::BreakContinue { pos, .. }
            | Statement::Return { pos, .. } => pos,
            Statement::Expr(expr) => expr.position(),
            Statement::For(stmt) => &stmt.pos,
            Statement::If(stmt) => &stmt.pos,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub pos: Position,
}

impl Block {
    pub fn new(pos: Position) -> Self {
        Self {
            statements: Vec::new(),
            pos,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForStatement {
    pub label: Option<String>,
    pub kind: ForKind,
    pub body: Block,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub enum ForKind {
    /// `for i in A..B`
    Range { index: String, range: Interval },
    /// `for i, v in operand`
    Each {
        index: String,
        value: String,
        operand: Expr,
    },
    /// `for { }`
    Infinite,
}

#[derive(Debug, Clone)]
pub struct IfStatement {
    pub cond: Expr,
    pub body: Block,
    pub otherwise: Option<ElseBranch>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub enum ElseBranch {
    If(Box<IfStatement>),
    Block(Block),
}

/// User function, lambda or transformation body
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    /// Must reach a `return`
    Block(Block),
    /// Implicit return
    Lambda(Expr),
}

/// Named block of statements
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub body: Block,
    /// `all: *`
    pub run_all: bool,
    pub pos: Position,
}
