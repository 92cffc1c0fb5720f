//! Token kinds, keywords, precedence and source positions
//!
//! The scanner produces `(offset, Token, literal)` triples. Offsets are turned
//! into human readable positions through the line table kept by `SourceFile`.

use std::fmt;
use std::sync::Arc;

/// Lowest binary precedence; `parse_binary_expr` starts one above this.
pub const LOWEST_PREC: u8 = 0;

/// Highest binary precedence, used for unary operands
pub const HIGHEST_PREC: u8 = 7;

/// Token kinds produced by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Illegal,
    Eof,
    Comment,
    Lf,

    // Literals
    Ident,
    Integer,
    Float,
    Boolean,
    String,
    StringItp,

    // Operators
    Add,    // +
    Sub,    // -
    Mul,    // *
    Quo,    // /
    Rem,    // %
    And,    // &
    Or,     // |
    Xor,    // ^
    Shl,    // <<
    Shr,    // >>
    AndNot, // &^

    AddAssign,    // +=
    SubAssign,    // -=
    MulAssign,    // *=
    QuoAssign,    // /=
    RemAssign,    // %=
    AndAssign,    // &=
    OrAssign,     // |=
    XorAssign,    // ^=
    ShlAssign,    // <<=
    ShrAssign,    // >>=
    AndNotAssign, // &^=

    LAnd, // &&
    LOr,  // ||
    Inc,  // ++
    Dec,  // --

    Eql,    // ==
    Lss,    // <
    Gtr,    // >
    Assign, // =
    Not,    // !
    Neq,    // !=
    Leq,    // <=
    Geq,    // >=

    LParen, // (
    LBrack, // [
    LBrace, // {
    RParen, // )
    RBrack, // ]
    RBrace, // }
    Comma,  // ,
    Colon,  // :
    Range,  // ..
    Qes,    // ?
    Dqs,    // ??
    Lambda, // =>
    At,     // @
    Hash,   // #
    Fd,     // ~
    Var,    // $

    // Argument mode
    ReadFrom, // <
    WriteTo,  // >
    AppendTo, // >>
    Pipe,     // |

    // Keywords
    Include,
    For,
    In,
    If,
    Else,
    Break,
    Continue,
    Return,
    Exit,
    Is,
    Exists,
    SizeOf,
    On,
    Linux,
    MacOs,
    Windows,
    Delete,
    TInteger,
    TFloat,
    TString,
    TBoolean,
    TArray,
    TMap,
}

impl Token {
    /// Map an identifier to its keyword token, if any
    pub fn lookup(ident: &str) -> Token {
        match ident {
            "include" => Token::Include,
            "for" => Token::For,
            "in" => Token::In,
            "if" => Token::If,
            "else" => Token::Else,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "return" => Token::Return,
            "exit" => Token::Exit,
            "is" => Token::Is,
            "exists" => Token::Exists,
            "sizeof" => Token::SizeOf,
            "on" => Token::On,
            "linux" => Token::Linux,
            "macos" => Token::MacOs,
            "windows" => Token::Windows,
            "delete" => Token::Delete,
            "integer" => Token::TInteger,
            "float" => Token::TFloat,
            "string" => Token::TString,
            "boolean" => Token::TBoolean,
            "array" => Token::TArray,
            "map" => Token::TMap,
            "true" | "false" => Token::Boolean,
            _ => Token::Ident,
        }
    }

    /// Identifiers and keywords, which all scan from identifier text
    pub fn is_word(self) -> bool {
        matches!(
            self,
            Token::Ident
                | Token::Boolean
                | Token::Include
                | Token::For
                | Token::In
                | Token::If
                | Token::Else
                | Token::Break
                | Token::Continue
                | Token::Return
                | Token::Exit
                | Token::Is
                | Token::Exists
                | Token::SizeOf
                | Token::On
                | Token::Linux
                | Token::MacOs
                | Token::Windows
                | Token::Delete
                | Token::TInteger
                | Token::TFloat
                | Token::TString
                | Token::TBoolean
                | Token::TArray
                | Token::TMap
        )
    }

    /// Binary operator precedence, `LOWEST_PREC` for non operators
    pub fn precedence(self) -> u8 {
        match self {
            Token::Qes | Token::Dqs => 1,
            Token::LOr => 2,
            Token::LAnd => 3,
            Token::Eql
            | Token::Neq
            | Token::Lss
            | Token::Leq
            | Token::Gtr
            | Token::Geq
            | Token::Is => 4,
            Token::Add | Token::Sub | Token::Or | Token::Xor => 5,
            Token::Mul
            | Token::Quo
            | Token::Rem
            | Token::Shl
            | Token::Shr
            | Token::And
            | Token::AndNot => 6,
            _ => LOWEST_PREC,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Token::Eql | Token::Neq | Token::Lss | Token::Leq | Token::Gtr | Token::Geq
        )
    }

    /// Assignment operators accepted by an assign statement
    pub fn is_assign_op(self) -> bool {
        matches!(
            self,
            Token::Assign
                | Token::AddAssign
                | Token::SubAssign
                | Token::MulAssign
                | Token::QuoAssign
                | Token::RemAssign
                | Token::AndAssign
                | Token::OrAssign
                | Token::XorAssign
                | Token::ShlAssign
                | Token::ShrAssign
                | Token::AndNotAssign
        )
    }

    /// The binary operator applied by a compound assignment (`+=` -> `+`)
    pub fn compound_operator(self) -> Option<Token> {
        Some(match self {
            Token::AddAssign => Token::Add,
            Token::SubAssign => Token::Sub,
            Token::MulAssign => Token::Mul,
            Token::QuoAssign => Token::Quo,
            Token::RemAssign => Token::Rem,
            Token::AndAssign => Token::And,
            Token::OrAssign => Token::Or,
            Token::XorAssign => Token::Xor,
            Token::ShlAssign => Token::Shl,
            Token::ShrAssign => Token::Shr,
            Token::AndNotAssign => Token::AndNot,
            _ => return None,
        })
    }

    pub fn is_type_keyword(self) -> bool {
        matches!(
            self,
            Token::TInteger
                | Token::TFloat
                | Token::TString
                | Token::TBoolean
                | Token::TArray
                | Token::TMap
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Token::Illegal => "ILLEGAL",
            Token::Eof => "EOF",
            Token::Comment => "COMMENT",
            Token::Lf => "LF",
            Token::Ident => "IDENT",
            Token::Integer => "INTEGER",
            Token::Float => "FLOAT",
            Token::Boolean => "BOOLEAN",
            Token::String => "STRING",
            Token::StringItp => "STRING_ITP",
            Token::Add => "+",
            Token::Sub => "-",
            Token::Mul => "*",
            Token::Quo => "/",
            Token::Rem => "%",
            Token::And => "&",
            Token::Or => "|",
            Token::Xor => "^",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::AndNot => "&^",
            Token::AddAssign => "+=",
            Token::SubAssign => "-=",
            Token::MulAssign => "*=",
            Token::QuoAssign => "/=",
            Token::RemAssign => "%=",
            Token::AndAssign => "&=",
            Token::OrAssign => "|=",
            Token::XorAssign => "^=",
            Token::ShlAssign => "<<=",
            Token::ShrAssign => ">>=",
            Token::AndNotAssign => "&^=",
            Token::LAnd => "&&",
            Token::LOr => "||",
            Token::Inc => "++",
            Token::Dec => "--",
            Token::Eql => "==",
            Token::Lss => "<",
            Token::Gtr => ">",
            Token::Assign => "=",
            Token::Not => "!",
            Token::Neq => "!=",
            Token::Leq => "<=",
            Token::Geq => ">=",
            Token::LParen => "(",
            Token::LBrack => "[",
            Token::LBrace => "{",
            Token::RParen => ")",
            Token::RBrack => "]",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Range => "..",
            Token::Qes => "?",
            Token::Dqs => "??",
            Token::Lambda => "=>",
            Token::At => "@",
            Token::Hash => "#",
            Token::Fd => "~",
            Token::Var => "$",
            Token::ReadFrom => "READ_FROM",
            Token::WriteTo => "WRITE_TO",
            Token::AppendTo => "APPEND_TO",
            Token::Pipe => "PIPE",
            Token::Include => "include",
            Token::For => "for",
            Token::In => "in",
            Token::If => "if",
            Token::Else => "else",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Return => "return",
            Token::Exit => "exit",
            Token::Is => "is",
            Token::Exists => "exists",
            Token::SizeOf => "sizeof",
            Token::On => "on",
            Token::Linux => "linux",
            Token::MacOs => "macos",
            Token::Windows => "windows",
            Token::Delete => "delete",
            Token::TInteger => "integer",
            Token::TFloat => "float",
            Token::TString => "string",
            Token::TBoolean => "boolean",
            Token::TArray => "array",
            Token::TMap => "map",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved source location, 1-based line and column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub file: Arc<str>,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(file: Arc<str>, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Per-file table of line start offsets, filled while scanning
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: Arc<str>,
    lines: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            lines: vec![0],
        }
    }

    pub fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Record the start offset of a new line. Offsets must grow.
    pub fn add_line(&mut self, offset: usize) {
        if self.lines.last().is_some_and(|&last| offset > last) {
            self.lines.push(offset);
        }
    }

    /// Resolve a byte offset into a position
    pub fn position(&self, offset: usize) -> Position {
        let index = match self.lines.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Position::new(self.name(), index + 1, offset - self.lines[index] + 1)
    }
}
