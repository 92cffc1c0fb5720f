//! Recursive descent parser for Cookfiles
//!
//! The parser pulls tokens from the scanner with one token of lookahead and
//! builds a `Cook` program. Syntax errors do not stop parsing: each one is
//! recorded, the parser skips to the next statement boundary and carries on,
//! and every diagnostic is returned at once as `CookError::Parse`.
//!
//! Included files are resolved relative to the including file and parsed
//! once each, after the file that included them.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context as _, Result};
use tracing::debug;

use crate::ast::{
    Block, Call, CallKind, DeleteSelection, ElseBranch, ExistsSubject, Expr, ForKind,
    ForStatement, Function, FunctionBody, IfStatement, Interval, MergeMode, Statement, Target,
};
use crate::cook::{Cook, ALL, FINALIZE, INITIALIZE};
use crate::error::{CookError, Diagnostic, ParseErrors};
use crate::functions::FunctionRegistry;
use crate::lexer::{ScanMode, Scanner};
use crate::token::{Position, Token, LOWEST_PREC};
use crate::value::{Kind, Value};

/// Parse a Cookfile and everything it includes with the default registry
pub fn parse_file(path: impl AsRef<Path>) -> Result<Cook> {
    Parser::new(Rc::new(FunctionRegistry::new())).parse_file(path)
}

/// Parse in-memory source; includes resolve against the working directory
pub fn parse_source(name: &str, src: &str) -> Result<Cook> {
    Parser::new(Rc::new(FunctionRegistry::new())).parse_source(name, src)
}

/// Program-level parser: include bookkeeping and diagnostics
pub struct Parser {
    registry: Rc<FunctionRegistry>,
    diagnostics: Rc<RefCell<Vec<Diagnostic>>>,
    parsed: HashSet<PathBuf>,
    pending: VecDeque<PathBuf>,
}

impl Parser {
    pub fn new(registry: Rc<FunctionRegistry>) -> Self {
        Self {
            registry,
            diagnostics: Rc::new(RefCell::new(Vec::new())),
            parsed: HashSet::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn parse_file(&mut self, path: impl AsRef<Path>) -> Result<Cook> {
        let path = path.as_ref();
        let src = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        if let Ok(canonical) = fs::canonicalize(path) {
            self.parsed.insert(canonical);
        }
        let dir = path.parent().map(Path::to_path_buf);
        self.run(&path.display().to_string(), src, dir)
    }

    pub fn parse_source(&mut self, name: &str, src: &str) -> Result<Cook> {
        self.run(name, src.as_bytes().to_vec(), None)
    }

    fn run(&mut self, name: &str, src: Vec<u8>, dir: Option<PathBuf>) -> Result<Cook> {
        let mut cook = Cook::new(Rc::clone(&self.registry));
        self.diagnostics.borrow_mut().clear();
        self.parse_one(&mut cook, name, src, dir, true);

        while let Some(path) = self.pending.pop_front() {
            if !self.parsed.insert(path.clone()) {
                continue;
            }
            debug!("parsing included file {}", path.display());
            let src = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let dir = path.parent().map(Path::to_path_buf);
            self.parse_one(&mut cook, &path.display().to_string(), src, dir, false);
        }

        let diagnostics = std::mem::take(&mut *self.diagnostics.borrow_mut());
        if !diagnostics.is_empty() {
            return Err(CookError::Parse(ParseErrors(diagnostics)).into());
        }
        Ok(cook)
    }

    fn parse_one(&mut self, cook: &mut Cook, name: &str, src: Vec<u8>, dir: Option<PathBuf>, main: bool) {
        let sink = Rc::clone(&self.diagnostics);
        let scanner = Scanner::new(
            name,
            src,
            Some(Box::new(move |position, message: &str| {
                sink.borrow_mut().push(Diagnostic {
                    position,
                    message: message.to_string(),
                });
            })),
        );
        let mut parser = FileParser::new(scanner, cook, Rc::clone(&self.diagnostics), dir);
        if main {
            let pos = parser.pos();
            parser.cook.set_block_position(pos);
        }
        parser.parse_program();
        for include in parser.includes {
            if !self.parsed.contains(&include) && !self.pending.contains(&include) {
                self.pending.push_back(include);
            }
        }
    }
}

/// Syntax error that has been recorded and recovered from
#[derive(Debug)]
struct Recovered;

type PResult<T> = std::result::Result<T, Recovered>;

#[derive(Debug, Clone)]
struct Lexeme {
    offset: usize,
    end: usize,
    tok: Token,
    lit: String,
    /// Scanner was still inside an interpolated string after this token
    in_string: bool,
}

/// Where top-level statements currently go
enum Section {
    Top,
    Target(Target),
}

/// Parser for one source file
struct FileParser<'p> {
    scanner: Scanner,
    current: Lexeme,
    ahead: Lexeme,
    prev_end: usize,
    cook: &'p mut Cook,
    diagnostics: Rc<RefCell<Vec<Diagnostic>>>,
    dir: Option<PathBuf>,
    includes: Vec<PathBuf>,
    initialize: Option<Position>,
    finalize: Option<Position>,
}

impl<'p> FileParser<'p> {
    fn new(
        mut scanner: Scanner,
        cook: &'p mut Cook,
        diagnostics: Rc<RefCell<Vec<Diagnostic>>>,
        dir: Option<PathBuf>,
    ) -> Self {
        let current = Self::scan(&mut scanner);
        let ahead = Self::scan(&mut scanner);
        Self {
            scanner,
            current,
            ahead,
            prev_end: 0,
            cook,
            diagnostics,
            dir,
            includes: Vec::new(),
            initialize: None,
            finalize: None,
        }
    }

    fn scan(scanner: &mut Scanner) -> Lexeme {
        loop {
            let (offset, tok, lit) = scanner.scan();
            if tok == Token::Comment {
                continue;
            }
            return Lexeme {
                offset,
                end: scanner.offset(),
                tok,
                lit,
                in_string: scanner.mode().contains(ScanMode::STRING_INTERP),
            };
        }
    }

    // ---------------------------------------------------------------------
    // Helper methods
    // ---------------------------------------------------------------------

    fn advance(&mut self) {
        if self.current.tok == Token::Eof {
            return;
        }
        self.prev_end = self.current.end;
        let next = if self.ahead.tok == Token::Eof {
            self.ahead.clone()
        } else {
            Self::scan(&mut self.scanner)
        };
        self.current = std::mem::replace(&mut self.ahead, next);
    }

    fn check(&self, tok: Token) -> bool {
        self.current.tok == tok
    }

    /// Current token starts right where the previous one ended
    fn adjacent(&self) -> bool {
        self.current.offset == self.prev_end
    }

    fn pos(&self) -> Position {
        self.scanner.position(self.current.offset)
    }

    fn expect(&mut self, tok: Token) -> PResult<Lexeme> {
        if self.check(tok) {
            let lexeme = self.current.clone();
            self.advance();
            return Ok(lexeme);
        }
        Err(self.error(format!("expected {}, got {}", tok, self.describe_current())))
    }

    fn expect_ident(&mut self) -> PResult<String> {
        self.expect(Token::Ident).map(|lexeme| lexeme.lit)
    }

    /// Identifiers and keyword lexemes such as `true` or `for`
    fn current_is_word(&self) -> bool {
        self.current.tok.is_word()
    }

    /// Name after `@` or `#`, where keywords name commands too (`#false`)
    fn expect_call_name(&mut self) -> PResult<String> {
        if self.current_is_word() {
            let name = self.current.lit.clone();
            self.advance();
            return Ok(name);
        }
        Err(self.error(format!("expected {}, got {}", Token::Ident, self.describe_current())))
    }

    fn describe_current(&self) -> String {
        match self.current.tok {
            Token::Ident | Token::Integer | Token::Float => {
                format!("{} ({})", self.current.tok, self.current.lit)
            }
            Token::Lf => "end of line".to_string(),
            Token::Eof => "end of file".to_string(),
            tok => tok.to_string(),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(Token::Lf) {
            self.advance();
        }
    }

    /// Record a diagnostic without touching the token stream
    fn report(&mut self, position: Position, message: impl Into<String>) {
        self.diagnostics.borrow_mut().push(Diagnostic {
            position,
            message: message.into(),
        });
    }

    /// Record a diagnostic at the current token and resynchronise
    fn error(&mut self, message: impl Into<String>) -> Recovered {
        let pos = self.pos();
        self.report(pos, message);
        self.synchronize();
        Recovered
    }

    /// Skip tokens until something that can start a statement
    fn synchronize(&mut self) {
        loop {
            let after_line_feed = self.check(Token::Lf);
            self.advance();
            match self.current.tok {
                Token::Eof
                | Token::RBrace
                | Token::For
                | Token::If
                | Token::Break
                | Token::Continue
                | Token::Return
                | Token::Exit
                | Token::Delete
                | Token::Include => return,
                Token::At | Token::Hash if after_line_feed => return,
                Token::Ident
                    if after_line_feed
                        || self.ahead.tok.is_assign_op()
                        || matches!(
                            self.ahead.tok,
                            Token::LBrack | Token::Colon | Token::Inc | Token::Dec
                        ) =>
                {
                    return
                }
                _ => {}
            }
        }
    }

    fn end_statement(&mut self) -> PResult<()> {
        match self.current.tok {
            Token::Lf => {
                self.advance();
                Ok(())
            }
            Token::Eof | Token::RBrace => Ok(()),
            _ => Err(self.error(format!(
                "expected end of statement, got {}",
                self.describe_current()
            ))),
        }
    }

    // ---------------------------------------------------------------------
    // Program structure
    // ---------------------------------------------------------------------

    fn parse_program(&mut self) {
        self.skip_newlines();
        while self.check(Token::Include) {
            // errors are recorded, parsing goes on
            let _ = self.parse_include();
            self.skip_newlines();
        }

        let mut section = Section::Top;
        loop {
            self.skip_newlines();
            match self.current.tok {
                Token::Eof => break,
                Token::Include => {
                    self.error("include directive must be placed at the top of the file");
                }
                Token::RBrace => {
                    self.error("unexpected }");
                }
                Token::Ident if self.ahead.tok == Token::Colon => {
                    let previous = std::mem::replace(&mut section, Section::Top);
                    self.finish_section(previous);
                    if let Ok(target) = self.parse_target_header() {
                        section = Section::Target(target);
                    }
                }
                _ => match self.parse_statement() {
                    Ok(Some(stmt)) => match &mut section {
                        Section::Top => self.cook.push_statement(stmt),
                        Section::Target(target) if target.run_all => {
                            let pos = stmt.position().clone();
                            self.report(pos, "statements are not allowed after all: *");
                        }
                        Section::Target(target) => target.body.statements.push(stmt),
                    },
                    Ok(None) | Err(Recovered) => {}
                },
            }
        }
        self.finish_section(section);
    }

    fn parse_include(&mut self) -> PResult<()> {
        let pos = self.pos();
        self.advance();
        let lit = self.expect(Token::String)?.lit;
        self.end_statement()?;

        let path = match &self.dir {
            Some(dir) => dir.join(&lit),
            None => PathBuf::from(&lit),
        };
        match fs::canonicalize(&path) {
            Ok(canonical) => {
                debug!("include {} resolved to {}", lit, canonical.display());
                self.includes.push(canonical);
            }
            Err(_) => self.report(pos, format!("included file {} not found", path.display())),
        }
        Ok(())
    }

    fn parse_target_header(&mut self) -> PResult<Target> {
        let pos = self.pos();
        let name = self.expect_ident()?;
        self.advance(); // ':'
        if !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            self.report(pos.clone(), format!("target name {} must start with a letter or '_'", name));
        }
        let run_all = if self.check(Token::Mul) {
            if name != ALL {
                return Err(self.error(format!("only target {} can be declared with *", ALL)));
            }
            self.advance();
            true
        } else {
            false
        };
        Ok(Target {
            name,
            body: Block::new(pos.clone()),
            run_all,
            pos,
        })
    }

    fn finish_section(&mut self, section: Section) {
        let Section::Target(target) = section else {
            return;
        };
        let pos = target.pos.clone();
        let name = target.name.clone();
        let previous = match name.as_str() {
            INITIALIZE => match &self.initialize {
                Some(previous) => Err(previous.clone()),
                None => {
                    self.initialize = Some(pos.clone());
                    self.cook.add_initialize(target);
                    Ok(())
                }
            },
            FINALIZE => match &self.finalize {
                Some(previous) => Err(previous.clone()),
                None => {
                    self.finalize = Some(pos.clone());
                    self.cook.add_finalize(target);
                    Ok(())
                }
            },
            ALL => self.cook.set_all(target),
            _ => self.cook.add_target(target),
        };
        if let Err(previous) = previous {
            self.report(
                pos,
                format!("target {} already exist, previously define at {}", name, previous),
            );
        }
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    /// Parse one statement; declarations yield `None`
    fn parse_statement(&mut self) -> PResult<Option<Statement>> {
        let pos = self.pos();
        let stmt = match self.current.tok {
            Token::Ident if self.ahead.tok == Token::LParen => {
                self.parse_function_declaration()?;
                return Ok(None);
            }
            Token::Ident if self.ahead.tok == Token::Colon => {
                return Err(self.error("target declaration is only allowed at the top level"));
            }
            Token::Ident => self.parse_simple_statement()?,
            Token::At | Token::Hash => Statement::Expr(self.parse_unary()?),
            Token::For => return self.parse_for().map(Some),
            Token::If => return self.parse_if().map(|stmt| Some(Statement::If(stmt))),
            Token::LBrace => {
                let block = self.parse_block()?;
                return Ok(Some(Statement::Block(block)));
            }
            Token::Break | Token::Continue => {
                let op = self.current.tok;
                self.advance();
                let label = if self.check(Token::Colon) {
                    self.advance();
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                Statement::BreakContinue { op, label, pos }
            }
            Token::Return => {
                self.advance();
                let value = if matches!(self.current.tok, Token::Lf | Token::RBrace | Token::Eof) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Statement::Return { value, pos }
            }
            Token::Exit => {
                self.advance();
                let code = self.parse_expr()?;
                Statement::Expr(Expr::Exit {
                    code: Box::new(code),
                    pos,
                })
            }
            Token::Delete => Statement::Expr(self.parse_delete()?),
            _ => {
                return Err(self.error(format!("unexpected {}", self.describe_current())));
            }
        };
        self.end_statement()?;
        Ok(Some(stmt))
    }

    /// Assignment, merge or increment on an identifier or index chain
    fn parse_simple_statement(&mut self) -> PResult<Statement> {
        let pos = self.pos();
        let target = self.parse_postfix()?;
        if !matches!(target, Expr::Ident { .. } | Expr::Index { .. }) {
            return Err(self.error("expression cannot be assigned to"));
        }

        let op = self.current.tok;
        if matches!(op, Token::Inc | Token::Dec) {
            self.advance();
            return Ok(Statement::Expr(Expr::IncDec {
                op,
                target: Box::new(target),
                pos,
            }));
        }
        if !op.is_assign_op() {
            return Err(self.error(format!(
                "expected assignment operator, got {}",
                self.describe_current()
            )));
        }
        self.advance();

        if op == Token::AddAssign && matches!(self.current.tok, Token::Lss | Token::Qes) {
            let mode = if self.check(Token::Lss) {
                MergeMode::Overwrite
            } else {
                MergeMode::Skip
            };
            self.advance();
            let source = self.parse_expr()?;
            return Ok(Statement::Expr(Expr::MergeMap {
                target: Box::new(target),
                source: Box::new(source),
                mode,
                pos,
            }));
        }

        let value = self.parse_expr()?;
        Ok(Statement::Assign {
            target,
            op,
            value,
            pos,
        })
    }

    fn parse_block(&mut self) -> PResult<Block> {
        let pos = self.pos();
        self.expect(Token::LBrace)?;
        let mut block = Block::new(pos);
        loop {
            self.skip_newlines();
            match self.current.tok {
                Token::RBrace => break,
                Token::Eof => return Err(self.error("expected }, got end of file")),
                _ => match self.parse_statement() {
                    Ok(Some(stmt)) => block.statements.push(stmt),
                    Ok(None) | Err(Recovered) => {}
                },
            }
        }
        self.advance();
        Ok(block)
    }

    fn parse_for(&mut self) -> PResult<Statement> {
        let pos = self.pos();
        self.advance();
        let label = if self.check(Token::Colon) {
            self.advance();
            Some(self.expect_ident()?)
        } else {
            None
        };

        let kind = if self.check(Token::Ident) {
            let index = self.expect_ident()?;
            if self.check(Token::Comma) {
                self.advance();
                let value = self.expect_ident()?;
                self.expect(Token::In)?;
                if matches!(self.current.tok, Token::Integer | Token::Float | Token::Boolean) {
                    return Err(self.error(format!("for loop cannot iterate over {}", self.current.tok)));
                }
                let operand = self.parse_unary()?;
                ForKind::Each {
                    index,
                    value,
                    operand,
                }
            } else {
                self.expect(Token::In)?;
                ForKind::Range {
                    index,
                    range: self.parse_interval()?,
                }
            }
        } else {
            ForKind::Infinite
        };

        let body = self.parse_block()?;
        Ok(Statement::For(ForStatement {
            label,
            kind,
            body,
            pos,
        }))
    }

    fn parse_if(&mut self) -> PResult<IfStatement> {
        let pos = self.pos();
        self.advance();
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;

        if self.check(Token::Lf) && self.ahead.tok == Token::Else {
            self.advance();
        }
        let otherwise = if self.check(Token::Else) {
            self.advance();
            if self.check(Token::If) {
                Some(ElseBranch::If(Box::new(self.parse_if()?)))
            } else {
                Some(ElseBranch::Block(self.parse_block()?))
            }
        } else {
            None
        };

        Ok(IfStatement {
            cond,
            body,
            otherwise,
            pos,
        })
    }

    /// `name(a, b) { ... }` or `name(a, b) => expr`
    fn parse_function_declaration(&mut self) -> PResult<()> {
        let pos = self.pos();
        let name = self.expect_ident()?;
        let function = self.parse_function_rest(name, pos.clone())?;
        if let Err(previous) = self.cook.add_function(function.clone()) {
            self.report(
                pos,
                format!("function {} already exist, previously define at {}", function.name, previous),
            );
        }
        Ok(())
    }

    /// Parameters and body of a function, transformation or lambda
    fn parse_function_rest(&mut self, name: String, pos: Position) -> PResult<Function> {
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        while !self.check(Token::RParen) {
            params.push(self.expect_ident()?);
            if !self.check(Token::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(Token::RParen)?;

        let body = match self.current.tok {
            Token::Lambda => {
                self.advance();
                FunctionBody::Lambda(self.parse_expr()?)
            }
            Token::LBrace => FunctionBody::Block(self.parse_block()?),
            _ => {
                return Err(self.error(format!(
                    "expected => or {{ after parameters, got {}",
                    self.describe_current()
                )))
            }
        };
        Ok(Function {
            name,
            params,
            body,
            pos,
        })
    }

    /// `delete x[i, j]` or `delete x{A..B}`
    fn parse_delete(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        self.advance();
        let ident_pos = self.pos();
        let name = self.expect_ident()?;
        let mut target = Expr::Ident {
            name,
            pos: ident_pos,
        };

        let mut groups: Vec<(Vec<Expr>, Position)> = Vec::new();
        while self.check(Token::LBrack) && self.adjacent() {
            let group_pos = self.pos();
            self.advance();
            let items = self.parse_expr_list(Token::RBrack)?;
            groups.push((items, group_pos));
        }

        let selection = if self.check(Token::LBrace) && self.adjacent() {
            DeleteSelection::Range(Box::new(self.parse_braced_interval()?))
        } else {
            match groups.pop() {
                Some((keys, _)) if !keys.is_empty() => DeleteSelection::Keys(keys),
                _ => return Err(self.error("delete requires [keys] or {range} after the variable")),
            }
        };

        for (mut items, group_pos) in groups {
            if items.len() != 1 {
                return Err(self.error("index chain of delete must have one index per level"));
            }
            target = Expr::Index {
                target: Box::new(target),
                index: Box::new(items.remove(0)),
                pos: group_pos,
            };
        }

        Ok(Expr::Delete {
            target: Box::new(target),
            selection,
            pos,
        })
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_binary(LOWEST_PREC + 1)
    }

    /// Precedence climbing; comparison chains `a < b < c` become
    /// `a < b && <b> < c` where `<b>` reuses the evaluated operand
    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = self.current.tok;
            let prec = op.precedence();
            if prec == LOWEST_PREC || prec < min_prec {
                return Ok(left);
            }
            let pos = self.pos();
            self.advance();
            left = match op {
                Token::Qes => {
                    let then = self.parse_expr()?;
                    self.expect(Token::Colon)?;
                    let otherwise = self.parse_expr()?;
                    Expr::Conditional {
                        cond: Box::new(left),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                        pos,
                    }
                }
                Token::Dqs => Expr::Fallback {
                    primary: Box::new(left),
                    default: Box::new(self.parse_binary(prec)?),
                    pos,
                },
                Token::Is => Expr::IsType {
                    operand: Box::new(left),
                    kinds: self.parse_type_list()?,
                    pos,
                },
                op if op.is_comparison() => {
                    let right = self.parse_binary(prec + 1)?;
                    let mut chain = Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                        pos,
                    };
                    while self.current.tok.is_comparison() {
                        let next_op = self.current.tok;
                        let next_pos = self.pos();
                        self.advance();
                        let right = self.parse_binary(prec + 1)?;
                        chain = Expr::Binary {
                            op: Token::LAnd,
                            left: Box::new(chain),
                            right: Box::new(Expr::Binary {
                                op: next_op,
                                left: Box::new(Expr::Chained {
                                    pos: next_pos.clone(),
                                }),
                                right: Box::new(right),
                                pos: next_pos.clone(),
                            }),
                            pos: next_pos,
                        };
                    }
                    chain
                }
                op => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(self.parse_binary(prec + 1)?),
                    pos,
                },
            };
        }
    }

    fn parse_type_list(&mut self) -> PResult<Vec<Kind>> {
        let mut kinds = Vec::new();
        loop {
            match type_kind(self.current.tok) {
                Some(kind) => kinds.push(kind),
                None => {
                    return Err(self.error(format!("expected type name, got {}", self.describe_current())))
                }
            }
            self.advance();
            if !matches!(self.current.tok, Token::Or | Token::Pipe) {
                return Ok(kinds);
            }
            self.advance();
        }
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        match self.current.tok {
            Token::Add | Token::Sub | Token::Not | Token::Xor => {
                let op = self.current.tok;
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                    pos,
                })
            }
            Token::Fd => {
                self.advance();
                let operand = self.parse_postfix()?;
                if self.check(Token::Exists) {
                    self.advance();
                    return Ok(Expr::Exists {
                        subject: ExistsSubject::File(Box::new(operand)),
                        pos,
                    });
                }
                Ok(Expr::Unary {
                    op: Token::Fd,
                    operand: Box::new(operand),
                    pos,
                })
            }
            Token::SizeOf => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::SizeOf {
                    operand: Box::new(operand),
                    pos,
                })
            }
            Token::At | Token::Hash => {
                let kind = if self.check(Token::At) {
                    CallKind::Function
                } else {
                    CallKind::External
                };
                self.advance();
                if self.current_is_word() && self.ahead.tok == Token::Exists {
                    let name = self.current.lit.clone();
                    self.advance();
                    self.advance();
                    let subject = match kind {
                        CallKind::Function => ExistsSubject::Callable(name),
                        CallKind::External => ExistsSubject::Command(name),
                    };
                    return Ok(Expr::Exists { subject, pos });
                }
                self.parse_call(kind, pos)
            }
            _ => {
                let operand = self.parse_postfix()?;
                if self.check(Token::Exists) {
                    self.advance();
                    return Ok(Expr::Exists {
                        subject: ExistsSubject::Value(Box::new(operand)),
                        pos,
                    });
                }
                Ok(operand)
            }
        }
    }

    /// Primary expression followed by `[index]` and `{A..B}` suffixes
    /// written without a space
    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if !self.adjacent() {
                return Ok(expr);
            }
            let pos = self.pos();
            match self.current.tok {
                Token::LBrack => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(Token::RBrack)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                        pos,
                    };
                }
                Token::LBrace => {
                    let range = self.parse_braced_interval()?;
                    expr = Expr::SubValue {
                        target: Box::new(expr),
                        range: Box::new(range),
                        pos,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        let lexeme = self.current.clone();
        match lexeme.tok {
            Token::Ident if self.ahead.tok == Token::LParen => {
                self.advance();
                let func = self.parse_function_rest(lexeme.lit.clone(), pos.clone())?;
                Ok(Expr::Transformation {
                    source: lexeme.lit,
                    func: Rc::new(func),
                    pos,
                })
            }
            Token::Ident => {
                self.advance();
                Ok(Expr::Ident {
                    name: lexeme.lit,
                    pos,
                })
            }
            Token::Integer => match lexeme.lit.parse::<i64>() {
                Ok(value) => {
                    self.advance();
                    Ok(Expr::BasicLit {
                        value: Value::Int(value),
                        pos,
                    })
                }
                Err(_) => Err(self.error(format!("integer literal {} is out of range", lexeme.lit))),
            },
            Token::Float => match lexeme.lit.parse::<f64>() {
                Ok(value) => {
                    self.advance();
                    Ok(Expr::BasicLit {
                        value: Value::Float(value),
                        pos,
                    })
                }
                Err(_) => Err(self.error(format!("invalid float literal {}", lexeme.lit))),
            },
            Token::Boolean => {
                self.advance();
                Ok(Expr::BasicLit {
                    value: Value::Bool(lexeme.lit == "true"),
                    pos,
                })
            }
            Token::String => {
                self.advance();
                Ok(Expr::BasicLit {
                    value: Value::String(lexeme.lit),
                    pos,
                })
            }
            Token::StringItp => self.parse_interpolation(),
            Token::Var => {
                self.advance();
                match self.current.tok {
                    Token::Integer | Token::Ident => {
                        let name = self.current.lit.clone();
                        self.advance();
                        Ok(Expr::Ident { name, pos })
                    }
                    _ => Err(self.error(format!(
                        "expected argument number after $, got {}",
                        self.describe_current()
                    ))),
                }
            }
            Token::LParen => {
                self.advance();
                self.skip_newlines();
                let inner = self.parse_expr()?;
                if self.check(Token::Range) {
                    let interval = self.finish_interval(inner, false, pos)?;
                    return Ok(Expr::Interval(Box::new(interval)));
                }
                self.skip_newlines();
                self.expect(Token::RParen)?;
                Ok(Expr::Paren {
                    inner: Box::new(inner),
                    pos,
                })
            }
            Token::LBrack => self.parse_array_literal(),
            Token::LBrace => self.parse_map_literal(),
            Token::On => {
                self.advance();
                let os = match self.current.tok {
                    Token::Linux | Token::MacOs | Token::Windows => self.current.tok.as_str().to_string(),
                    _ => {
                        return Err(self.error(format!(
                            "expected operating system keyword, got {}",
                            self.describe_current()
                        )))
                    }
                };
                self.advance();
                Ok(Expr::OSysCheck { os, pos })
            }
            tok => match type_kind(tok) {
                Some(to) => {
                    self.advance();
                    self.expect(Token::LParen)?;
                    let operand = self.parse_expr()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::TypeCast {
                        to,
                        operand: Box::new(operand),
                        pos,
                    })
                }
                None => Err(self.error(format!("unexpected {}", self.describe_current()))),
            },
        }
    }

    fn parse_interpolation(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        let mut parts = Vec::new();
        loop {
            match self.current.tok {
                Token::StringItp => {
                    let more = self.current.in_string;
                    if !self.current.lit.is_empty() {
                        parts.push(Expr::BasicLit {
                            value: Value::String(self.current.lit.clone()),
                            pos: self.pos(),
                        });
                    }
                    self.advance();
                    if !more {
                        break;
                    }
                }
                Token::Var => {
                    self.advance();
                    let part_pos = self.pos();
                    match self.current.tok {
                        Token::Ident | Token::Integer => {
                            parts.push(Expr::Ident {
                                name: self.current.lit.clone(),
                                pos: part_pos,
                            });
                            self.advance();
                        }
                        Token::LBrace => {
                            self.advance();
                            parts.push(self.parse_expr()?);
                            self.expect(Token::RBrace)?;
                        }
                        _ => {
                            return Err(self.error(format!(
                                "expected identifier or {{ after $, got {}",
                                self.describe_current()
                            )))
                        }
                    }
                }
                _ => {
                    return Err(self.error(format!(
                        "unexpected {} in string",
                        self.describe_current()
                    )))
                }
            }
        }
        Ok(Expr::StringInterpolation { parts, pos })
    }

    fn parse_expr_list(&mut self, close: Token) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(close) {
                break;
            }
            items.push(self.parse_expr()?);
            self.skip_newlines();
            if !self.check(Token::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(close)?;
        Ok(items)
    }

    /// Array literal, or an interval when the first item is followed by `..`
    fn parse_array_literal(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        self.advance();
        self.skip_newlines();
        let mut items = Vec::new();
        if !self.check(Token::RBrack) {
            let first = self.parse_expr()?;
            if self.check(Token::Range) {
                let interval = self.finish_interval(first, true, pos)?;
                return Ok(Expr::Interval(Box::new(interval)));
            }
            self.push_array_item(&mut items, first);
            self.skip_newlines();
            while self.check(Token::Comma) {
                self.advance();
                self.skip_newlines();
                if self.check(Token::RBrack) {
                    break;
                }
                let item = self.parse_expr()?;
                self.push_array_item(&mut items, item);
                self.skip_newlines();
            }
        }
        self.expect(Token::RBrack)?;
        Ok(Expr::ArrayLiteral { items, pos })
    }

    /// String items holding a glob pattern expand to the matching paths
    fn push_array_item(&mut self, items: &mut Vec<Expr>, item: Expr) {
        let Expr::BasicLit {
            value: Value::String(pattern),
            pos,
        } = &item
        else {
            items.push(item);
            return;
        };
        if !pattern.contains(['*', '?', '[']) {
            items.push(item);
            return;
        }
        let matches: Vec<String> = match glob::glob(pattern) {
            Ok(paths) => paths
                .filter_map(|entry| entry.ok())
                .map(|path| path.to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        debug!("glob {} matched {} files", pattern, matches.len());
        if matches.is_empty() {
            items.push(item);
            return;
        }
        for path in matches {
            items.push(Expr::BasicLit {
                value: Value::String(path),
                pos: pos.clone(),
            });
        }
    }

    fn parse_map_literal(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        self.advance();
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(Token::RBrace) {
                break;
            }
            let key = self.parse_unary()?;
            self.expect(Token::Colon)?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            self.skip_newlines();
            if !self.check(Token::Comma) {
                break;
            }
            self.advance();
        }
        self.skip_newlines();
        self.expect(Token::RBrace)?;
        Ok(Expr::MapLiteral { entries, pos })
    }

    /// Interval with optional brackets: `[` or none opens inclusive,
    /// `(`, `{` or `]` exclusive
    fn parse_interval(&mut self) -> PResult<Interval> {
        let pos = self.pos();
        let start_inclusive = match self.current.tok {
            Token::LBrack => {
                self.advance();
                true
            }
            Token::LParen | Token::LBrace | Token::RBrack => {
                self.advance();
                false
            }
            _ => true,
        };
        let start = self.parse_unary()?;
        self.finish_interval(start, start_inclusive, pos)
    }

    /// `..B` with the closing bracket and `:step` of an interval
    fn finish_interval(&mut self, start: Expr, start_inclusive: bool, pos: Position) -> PResult<Interval> {
        self.expect(Token::Range)?;
        let end = self.parse_unary()?;
        let end_inclusive = match self.current.tok {
            Token::RBrack => {
                self.advance();
                true
            }
            Token::RParen | Token::RBrace | Token::LBrack => {
                self.advance();
                false
            }
            _ => true,
        };
        let step = if self.check(Token::Colon) {
            self.advance();
            Some(self.parse_unary()?)
        } else {
            None
        };
        Ok(Interval {
            start,
            end,
            start_inclusive,
            end_inclusive,
            step,
            pos,
        })
    }

    /// `{A..B}` used by slices and range deletes, both ends inclusive
    fn parse_braced_interval(&mut self) -> PResult<Interval> {
        let pos = self.pos();
        self.expect(Token::LBrace)?;
        let start = self.parse_unary()?;
        self.expect(Token::Range)?;
        let end = self.parse_unary()?;
        let step = if self.check(Token::Colon) {
            self.advance();
            Some(self.parse_unary()?)
        } else {
            None
        };
        self.expect(Token::RBrace)?;
        Ok(Interval {
            start,
            end,
            start_inclusive: true,
            end_inclusive: true,
            step,
            pos,
        })
    }

    /// Call arguments, read-from, redirects and pipes up to the end of line
    fn parse_call(&mut self, kind: CallKind, pos: Position) -> PResult<Expr> {
        let name = self.expect_call_name()?;
        let mut args = Vec::new();
        let mut files = Vec::new();
        let mut redirect: Option<(bool, Position)> = None;

        loop {
            match self.current.tok {
                Token::WriteTo | Token::AppendTo => {
                    if redirect.is_some() {
                        return Err(self.error("multiple write (>) or append (>>) to"));
                    }
                    redirect = Some((self.check(Token::AppendTo), self.pos()));
                    self.advance();
                }
                Token::ReadFrom => {
                    if redirect.is_some() {
                        return Err(self.error("read from (<) is not allowed after write or append to"));
                    }
                    let read_pos = self.pos();
                    self.advance();
                    let file = self.parse_unary()?;
                    args.push(Expr::ReadFrom {
                        file: Box::new(file),
                        pos: read_pos,
                    });
                }
                tok if starts_operand(tok) => {
                    let arg = self.parse_argument()?;
                    if redirect.is_some() {
                        files.push(arg);
                    } else {
                        args.push(arg);
                    }
                }
                _ => break,
            }
        }

        let call = Expr::Call(Call {
            kind,
            name,
            args,
            pos: pos.clone(),
        });
        if let Some((append, redirect_pos)) = redirect {
            if files.is_empty() {
                return Err(self.error("expected file after write (>) or append (>>)"));
            }
            if self.check(Token::Pipe) {
                return Err(self.error("pipe is not allowed after write or append to"));
            }
            return Ok(Expr::RedirectTo {
                caller: Box::new(call),
                files,
                append,
                pos: redirect_pos,
            });
        }
        if self.check(Token::Pipe) {
            let pipe_pos = self.pos();
            self.advance();
            let sink_pos = self.pos();
            let sink_kind = match self.current.tok {
                Token::At => CallKind::Function,
                Token::Hash => CallKind::External,
                _ => {
                    return Err(self.error(format!(
                        "expected @ or # after pipe, got {}",
                        self.describe_current()
                    )))
                }
            };
            self.advance();
            let sink = self.parse_call(sink_kind, sink_pos)?;
            return Ok(Expr::Pipe {
                source: Box::new(call),
                sink: Box::new(sink),
                pos: pipe_pos,
            });
        }
        Ok(call)
    }

    /// A call argument; `-name` and `--name` written without spaces are
    /// flag strings
    fn parse_argument(&mut self) -> PResult<Expr> {
        if matches!(self.current.tok, Token::Sub | Token::Dec)
            && self.ahead.tok == Token::Ident
            && self.ahead.offset == self.current.end
        {
            let pos = self.pos();
            let flag = format!("{}{}", self.current.lit, self.ahead.lit);
            self.advance();
            self.advance();
            return Ok(Expr::BasicLit {
                value: Value::String(flag),
                pos,
            });
        }
        self.parse_unary()
    }
}

fn type_kind(tok: Token) -> Option<Kind> {
    Some(match tok {
        Token::TInteger => Kind::Integer,
        Token::TFloat => Kind::Float,
        Token::TString => Kind::String,
        Token::TBoolean => Kind::Boolean,
        Token::TArray => Kind::Array,
        Token::TMap => Kind::Map,
        _ => return None,
    })
}

/// Tokens that can begin a call argument
fn starts_operand(tok: Token) -> bool {
    tok.is_type_keyword()
        || matches!(
            tok,
            Token::Ident
                | Token::Integer
                | Token::Float
                | Token::Boolean
                | Token::String
                | Token::StringItp
                | Token::LParen
                | Token::LBrack
                | Token::LBrace
                | Token::Add
                | Token::Sub
                | Token::Dec
                | Token::Not
                | Token::Xor
                | Token::Fd
                | Token::Var
                | Token::SizeOf
                | Token::On
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> Cook {
        match parse_source("test", src) {
            Ok(cook) => cook,
            Err(err) => panic!("parse failed: {:#}", err),
        }
    }

    fn parse_errors(src: &str) -> Vec<String> {
        let err = parse_source("test", src).err().expect("expected parse errors");
        match err.downcast_ref::<CookError>() {
            Some(CookError::Parse(errors)) => errors.diagnostics().iter().map(|d| d.to_string()).collect(),
            _ => panic!("not a parse error: {:#}", err),
        }
    }

    fn first_statement(src: &str) -> Statement {
        parse(src).block().statements[0].clone()
    }

    fn assigned(src: &str) -> Expr {
        match first_statement(src) {
            Statement::Assign { value, .. } => value,
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let Expr::Binary { op, right, .. } = assigned("a = 1 + 2 * 3\n") else {
            panic!("expected binary");
        };
        assert_eq!(op, Token::Add);
        assert!(matches!(*right, Expr::Binary { op: Token::Mul, .. }));
    }

    #[test]
    fn test_chained_comparison_shape() {
        let Expr::Binary { op, left, right, .. } = assigned("a = 1 < b <= 3\n") else {
            panic!("expected binary");
        };
        assert_eq!(op, Token::LAnd);
        assert!(matches!(*left, Expr::Binary { op: Token::Lss, .. }));
        let Expr::Binary { op, left, .. } = *right else {
            panic!("expected binary");
        };
        assert_eq!(op, Token::Leq);
        assert!(matches!(*left, Expr::Chained { .. }));
    }

    #[test]
    fn test_string_interpolation_parts() {
        let Expr::StringInterpolation { parts, .. } = assigned("a = \"x $b ${c + 1}$d\"\n") else {
            panic!("expected interpolation");
        };
        assert_eq!(parts.len(), 5);
        assert!(matches!(&parts[1], Expr::Ident { name, .. } if name == "b"));
        assert!(matches!(&parts[3], Expr::Binary { op: Token::Add, .. }));
        assert!(matches!(&parts[4], Expr::Ident { name, .. } if name == "d"));
    }

    #[test]
    fn test_interval_brackets() {
        let Statement::For(stmt) = first_statement("for i in (1..10] {\n}\n") else {
            panic!("expected for");
        };
        let ForKind::Range { range, .. } = stmt.kind else {
            panic!("expected range loop");
        };
        assert!(!range.start_inclusive);
        assert!(range.end_inclusive);

        let Expr::Interval(interval) = assigned("a = [1..5):2\n") else {
            panic!("expected interval");
        };
        assert!(interval.start_inclusive);
        assert!(!interval.end_inclusive);
        assert!(interval.step.is_some());
    }

    #[test]
    fn test_call_pipe_and_redirect() {
        let Statement::Expr(Expr::Pipe { source, sink, .. }) =
            first_statement("@print -e 'a' | #cat > 'out.txt'\n")
        else {
            panic!("expected pipe");
        };
        let Expr::Call(call) = *source else {
            panic!("expected call");
        };
        assert_eq!(call.name, "print");
        assert!(matches!(&call.args[0], Expr::BasicLit { value: Value::String(s), .. } if s == "-e"));
        let Expr::RedirectTo { caller, files, append, .. } = *sink else {
            panic!("expected redirect");
        };
        assert!(!append);
        assert_eq!(files.len(), 1);
        assert!(matches!(*caller, Expr::Call(Call { kind: CallKind::External, .. })));
    }

    #[test]
    fn test_keyword_command_names() {
        let Statement::Expr(Expr::Call(call)) = first_statement("#false '-x'\n") else {
            panic!("expected call");
        };
        assert_eq!(call.name, "false");
        assert_eq!(call.kind, CallKind::External);
        assert_eq!(call.args.len(), 1);
        assert!(matches!(
            assigned("a = #true exists\n"),
            Expr::Exists { subject: ExistsSubject::Command(name), .. } if name == "true"
        ));
    }

    #[test]
    fn test_postfix_on_string_literal() {
        let Expr::Index { target, .. } = assigned("s = 'hello'[1]\n") else {
            panic!("expected index");
        };
        assert!(matches!(*target, Expr::BasicLit { value: Value::String(s), .. } if s == "hello"));
        assert!(matches!(assigned("s = 'hello'{1..3}\n"), Expr::SubValue { .. }));
        assert!(matches!(assigned("s = \"a\\tb\"[2]\n"), Expr::Index { .. }));
        assert!(matches!(assigned("s = `raw`[0]\n"), Expr::Index { .. }));
        assert!(!parse_errors("s = 'hello' [1]\n").is_empty());
    }

    #[test]
    fn test_targets_and_functions() {
        let cook = parse("x = 1\ninitialize:\n  x = 2\nbuild:\n  @print x\nadd(a, b) => a + b\nall: *\n");
        assert_eq!(cook.block().statements.len(), 1);
        assert_eq!(cook.targets().len(), 1);
        assert_eq!(cook.targets()[0].body.statements.len(), 1);
        assert!(cook.function("add").is_some());
        assert!(cook.all_target().is_some_and(|t| t.run_all));
    }

    #[test]
    fn test_delete_and_merge_shapes() {
        let Statement::Expr(Expr::Delete { selection, target, .. }) = first_statement("delete a[0][1, 2]\n") else {
            panic!("expected delete");
        };
        assert!(matches!(selection, DeleteSelection::Keys(keys) if keys.len() == 2));
        assert!(matches!(*target, Expr::Index { .. }));
        let Statement::Expr(Expr::MergeMap { mode, .. }) = first_statement("a += ? {1: 2}\n") else {
            panic!("expected merge");
        };
        assert_eq!(mode, MergeMode::Skip);
    }

    #[test]
    fn test_errors_are_aggregated() {
        let errors = parse_errors("a = = 1\nb = 2\nc = )\nfor i in 1..2 {\n  d = ]\n}\n");
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors[0].starts_with("test:1:5"), "{:?}", errors);
        assert!(errors[1].starts_with("test:3:5"), "{:?}", errors);
        assert!(errors[2].starts_with("test:5:7"), "{:?}", errors);
    }

    #[test]
    fn test_duplicate_declarations() {
        let errors = parse_errors("a:\n  x = 1\na:\n  x = 2\nf(x) => x\nf(y) => y\n");
        assert_eq!(errors.len(), 2, "{:?}", errors);
        assert!(errors
            .iter()
            .any(|e| e.contains("target a already exist, previously define at test:1:1")));
        assert!(errors.iter().any(|e| e.contains("function f already exist")));
    }

    #[test]
    fn test_all_star_rejects_statements() {
        let errors = parse_errors("all: *\n  x = 1\n");
        assert!(errors[0].contains("not allowed after all: *"));
    }

    #[test]
    fn test_include_must_come_first() {
        let errors = parse_errors("x = 1\ninclude 'other'\n");
        assert!(errors[0].contains("include directive must be placed at the top"));
        let errors = parse_errors("include 'definitely-missing.cook'\n");
        assert!(errors[0].contains("included file definitely-missing.cook not found"));
    }

    #[test]
    fn test_includes_are_merged_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("common.cook"), "include 'Cookfile'\nshared = 1\nlint:\n  x = 1\n").unwrap();
        let main = dir.path().join("Cookfile");
        std::fs::write(&main, "include 'common.cook'\ninclude './common.cook'\nbuild:\n  x = 2\n").unwrap();
        let cook = parse_file(&main).unwrap();
        let names: Vec<&str> = cook.targets().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["build", "lint"]);
        assert_eq!(cook.block().statements.len(), 1);
    }

    #[test]
    fn test_glob_expansion_in_array_literal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        let pattern = format!("{}/*.txt", dir.path().display());
        let Expr::ArrayLiteral { items, .. } = assigned(&format!("a = ['{}', 'none-*.zzz']\n", pattern)) else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[2], Expr::BasicLit { value: Value::String(s), .. } if s == "none-*.zzz"));
    }

    #[test]
    fn test_lexical_errors_are_reported() {
        let errors = parse_errors("a = 'unterminated\nb = 1\n");
        assert!(errors.iter().any(|e| e.contains("string literal not terminated")), "{:?}", errors);
    }
}
