//! Scanner for Cookfiles
//!
//! The scanner turns raw bytes into `(offset, Token, literal)` triples. The
//! meaning of some characters depends on the current scan mode: inside the
//! argument list of a call `<`, `>` and `|` are redirects and pipes, inside an
//! interpolated string everything but `$` is literal text, and `${ ... }`
//! switches back to expression tokens until the matching brace.
//!
//! Errors never stop scanning. They are reported through the error handler
//! and the scanner resumes at the next character.

use std::ops::{BitOr, BitOrAssign};

use crate::token::{Position, SourceFile, Token};

const BOM: char = '\u{FEFF}';

/// Callback receiving lexical errors
pub type ErrorHandler = Box<dyn FnMut(Position, &str)>;

/// Scanner modes, combinable as bit flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanMode(u8);

impl ScanMode {
    pub const NORMAL: ScanMode = ScanMode(1);
    pub const ARGUMENT: ScanMode = ScanMode(2);
    pub const STRING_INTERP: ScanMode = ScanMode(4);
    pub const ALLOW_EXPR: ScanMode = ScanMode(8);

    pub fn contains(self, other: ScanMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn remove(&mut self, other: ScanMode) {
        self.0 &= !other.0;
    }
}

impl BitOr for ScanMode {
    type Output = ScanMode;

    fn bitor(self, rhs: ScanMode) -> ScanMode {
        ScanMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for ScanMode {
    fn bitor_assign(&mut self, rhs: ScanMode) {
        self.0 |= rhs.0;
    }
}

/// Mode-sensitive scanner over a single source file
pub struct Scanner {
    file: SourceFile,
    src: Vec<u8>,

    ch: Option<char>,
    offset: usize,
    rd_offset: usize,

    mode: ScanMode,
    skip_line_feed: bool,
    prev: [Token; 2],
    string_quote: char,
    string_start: usize,
    expr_depth: usize,

    error_handler: Option<ErrorHandler>,
    error_count: usize,
}

impl Scanner {
    /// Create a scanner over `src`. `name` is used in positions.
    pub fn new(name: &str, src: impl Into<Vec<u8>>, error_handler: Option<ErrorHandler>) -> Self {
        let mut scanner = Self {
            file: SourceFile::new(name),
            src: src.into(),
            ch: Some(' '),
            offset: 0,
            rd_offset: 0,
            mode: ScanMode::NORMAL,
            skip_line_feed: true,
            prev: [Token::Illegal, Token::Illegal],
            string_quote: '"',
            string_start: 0,
            expr_depth: 0,
            error_handler,
            error_count: 0,
        };
        scanner.next();
        if scanner.ch == Some(BOM) {
            scanner.next();
        }
        scanner
    }

    pub fn file(&self) -> &SourceFile {
        &self.file
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Number of errors reported so far
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Offset just past the last scanned token
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Resolve an offset of this file into a position
    pub fn position(&self, offset: usize) -> Position {
        self.file.position(offset)
    }

    /// Scan the next token
    pub fn scan(&mut self) -> (usize, Token, String) {
        if matches!(self.prev[0], Token::At | Token::Hash) && self.prev[1].is_word() {
            self.mode |= ScanMode::ARGUMENT;
        }
        let (offset, tok, lit) = self.scan_token();
        self.prev = [self.prev[1], tok];
        (offset, tok, lit)
    }

    fn scan_token(&mut self) -> (usize, Token, String) {
        loop {
            let start = self.offset;
            if self.mode.contains(ScanMode::STRING_INTERP)
                && !self.mode.contains(ScanMode::ALLOW_EXPR)
            {
                if self.prev[1] != Token::Var {
                    if self.ch == Some('$') {
                        self.next();
                        return (start, Token::Var, "$".to_string());
                    }
                    let (tok, lit) = self.scan_string_body();
                    return (start, tok, lit);
                }
                if !matches!(self.ch, Some(c) if is_letter(c) || c.is_ascii_digit() || c == '{') {
                    self.error(start, "expected identifier or '{' after '$'");
                    let (tok, lit) = self.scan_string_body();
                    return (start, tok, lit);
                }
            }

            self.skip_whitespace();
            let offset = self.offset;
            let mut skip_line_feed = true;

            let Some(ch) = self.ch else {
                self.mode.remove(ScanMode::ARGUMENT);
                if !self.skip_line_feed {
                    self.skip_line_feed = true;
                    return (offset, Token::Lf, "\n".to_string());
                }
                return (offset, Token::Eof, String::new());
            };

            if is_letter(ch) {
                let lit = self.scan_identifier();
                let in_string = self.mode.contains(ScanMode::STRING_INTERP)
                    && !self.mode.contains(ScanMode::ALLOW_EXPR);
                let tok = if lit.chars().count() > 1 && !in_string {
                    Token::lookup(&lit)
                } else {
                    Token::Ident
                };
                self.skip_line_feed = !can_end_statement(tok);
                return (offset, tok, lit);
            }

            if ch.is_ascii_digit() {
                let (tok, lit) = self.scan_number();
                self.skip_line_feed = false;
                return (offset, tok, lit);
            }

            self.next();
            let tok = match ch {
                '\n' => {
                    self.mode.remove(ScanMode::ARGUMENT);
                    self.skip_line_feed = true;
                    return (offset, Token::Lf, "\n".to_string());
                }
                '\\' if self.mode.contains(ScanMode::ARGUMENT) && self.ch == Some('\n') => {
                    self.next();
                    continue;
                }
                '"' | '\'' | '`' => {
                    self.string_quote = ch;
                    self.string_start = offset;
                    let (tok, lit) = self.scan_string_body();
                    if tok == Token::String {
                        self.skip_line_feed = false;
                    }
                    return (offset, tok, lit);
                }
                '/' if self.ch == Some('/') || self.ch == Some('*') => {
                    let lit = self.scan_comment(offset);
                    return (offset, Token::Comment, lit);
                }
                ':' => Token::Colon,
                ',' => Token::Comma,
                '@' => Token::At,
                '#' => Token::Hash,
                '~' => Token::Fd,
                '$' => Token::Var,
                '≥' => Token::Geq,
                '≤' => Token::Leq,
                '≠' => Token::Neq,
                '?' => self.switch2(Token::Qes, '?', Token::Dqs),
                '.' => {
                    if self.ch == Some('.') {
                        self.next();
                        Token::Range
                    } else {
                        self.error(offset, "illegal character '.'");
                        Token::Illegal
                    }
                }
                '(' => Token::LParen,
                '[' => Token::LBrack,
                '{' => {
                    if self.mode.contains(ScanMode::ALLOW_EXPR) {
                        self.expr_depth += 1;
                    } else if self.mode.contains(ScanMode::STRING_INTERP)
                        && self.prev[1] == Token::Var
                    {
                        self.mode |= ScanMode::ALLOW_EXPR;
                        self.expr_depth = 0;
                    }
                    Token::LBrace
                }
                ')' => {
                    skip_line_feed = false;
                    Token::RParen
                }
                ']' => {
                    skip_line_feed = false;
                    Token::RBrack
                }
                '}' => {
                    if self.mode.contains(ScanMode::ALLOW_EXPR) {
                        if self.expr_depth == 0 {
                            self.mode.remove(ScanMode::ALLOW_EXPR);
                        } else {
                            self.expr_depth -= 1;
                        }
                    }
                    skip_line_feed = false;
                    Token::RBrace
                }
                '+' => {
                    let tok = self.switch3(Token::Add, '=', Token::AddAssign, '+', Token::Inc);
                    skip_line_feed = tok != Token::Inc;
                    tok
                }
                '-' => {
                    let tok = self.switch3(Token::Sub, '=', Token::SubAssign, '-', Token::Dec);
                    skip_line_feed = tok != Token::Dec;
                    tok
                }
                '*' => self.switch2(Token::Mul, '=', Token::MulAssign),
                '/' => self.switch2(Token::Quo, '=', Token::QuoAssign),
                '%' => self.switch2(Token::Rem, '=', Token::RemAssign),
                '^' => self.switch2(Token::Xor, '=', Token::XorAssign),
                '<' if self.mode.contains(ScanMode::ARGUMENT) => Token::ReadFrom,
                '<' => {
                    if self.ch == Some('<') {
                        self.next();
                        self.switch2(Token::Shl, '=', Token::ShlAssign)
                    } else {
                        self.switch2(Token::Lss, '=', Token::Leq)
                    }
                }
                '>' if self.mode.contains(ScanMode::ARGUMENT) => {
                    self.switch2(Token::WriteTo, '>', Token::AppendTo)
                }
                '>' => {
                    if self.ch == Some('>') {
                        self.next();
                        self.switch2(Token::Shr, '=', Token::ShrAssign)
                    } else {
                        self.switch2(Token::Gtr, '=', Token::Geq)
                    }
                }
                '=' => self.switch3(Token::Assign, '=', Token::Eql, '>', Token::Lambda),
                '!' => self.switch2(Token::Not, '=', Token::Neq),
                '&' => {
                    if self.ch == Some('^') {
                        self.next();
                        self.switch2(Token::AndNot, '=', Token::AndNotAssign)
                    } else {
                        self.switch3(Token::And, '&', Token::LAnd, '=', Token::AndAssign)
                    }
                }
                '|' if self.mode.contains(ScanMode::ARGUMENT) => Token::Pipe,
                '|' => self.switch3(Token::Or, '|', Token::LOr, '=', Token::OrAssign),
                _ => {
                    if ch != BOM {
                        self.error(offset, &format!("illegal character {:?}", ch));
                    }
                    Token::Illegal
                }
            };
            self.skip_line_feed = skip_line_feed;
            let lit = String::from_utf8_lossy(&self.src[offset..self.offset]).into_owned();
            return (offset, tok, lit);
        }
    }

    fn next(&mut self) {
        if self.rd_offset >= self.src.len() {
            self.offset = self.src.len();
            if self.ch == Some('\n') {
                self.file.add_line(self.offset);
            }
            self.ch = None;
            return;
        }
        self.offset = self.rd_offset;
        if self.ch == Some('\n') {
            self.file.add_line(self.offset);
        }
        let (ch, width) = self.decode(self.rd_offset);
        self.rd_offset += width;
        self.ch = Some(ch);
    }

    fn decode(&mut self, at: usize) -> (char, usize) {
        let b = self.src[at];
        match b {
            0 => {
                self.error(at, "illegal character NUL");
                ('\0', 1)
            }
            b'\r' => {
                if self.src.get(at + 1) == Some(&b'\n') {
                    ('\n', 2)
                } else {
                    ('\n', 1)
                }
            }
            b if b < 0x80 => (b as char, 1),
            b => {
                let width = match b {
                    0xC0..=0xDF => 2,
                    0xE0..=0xEF => 3,
                    0xF0..=0xF7 => 4,
                    _ => 1,
                };
                let end = (at + width).min(self.src.len());
                match std::str::from_utf8(&self.src[at..end])
                    .ok()
                    .and_then(|s| s.chars().next())
                {
                    Some(ch) => {
                        if ch == BOM && at > 0 {
                            self.error(at, "illegal byte order mark");
                        }
                        (ch, width)
                    }
                    None => {
                        self.error(at, "illegal UTF-8 encoding");
                        (char::REPLACEMENT_CHARACTER, 1)
                    }
                }
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.rd_offset).copied()
    }

    fn error(&mut self, offset: usize, msg: &str) {
        self.error_count += 1;
        let position = self.file.position(offset);
        if let Some(handler) = self.error_handler.as_mut() {
            handler(position, msg);
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.ch {
            if ch == ' ' || ch == '\t' || (ch == '\n' && self.skip_line_feed) {
                self.next();
            } else {
                break;
            }
        }
    }

    fn switch2(&mut self, tok0: Token, ch: char, tok1: Token) -> Token {
        if self.ch == Some(ch) {
            self.next();
            return tok1;
        }
        tok0
    }

    fn switch3(&mut self, tok0: Token, ch1: char, tok1: Token, ch2: char, tok2: Token) -> Token {
        if self.ch == Some(ch1) {
            self.next();
            tok1
        } else if self.ch == Some(ch2) {
            self.next();
            tok2
        } else {
            tok0
        }
    }

    fn scan_identifier(&mut self) -> String {
        let start = self.offset;
        while matches!(self.ch, Some(c) if is_letter(c) || c.is_ascii_digit()) {
            self.next();
        }
        String::from_utf8_lossy(&self.src[start..self.offset]).into_owned()
    }

    fn scan_number(&mut self) -> (Token, String) {
        let start = self.offset;
        let mut tok = Token::Integer;
        while matches!(self.ch, Some(c) if c.is_ascii_digit()) {
            self.next();
        }
        // `1..2` is a range, not a float
        if self.ch == Some('.') && self.peek() != Some(b'.') {
            tok = Token::Float;
            self.next();
            while matches!(self.ch, Some(c) if c.is_ascii_digit()) {
                self.next();
            }
        }
        (
            tok,
            String::from_utf8_lossy(&self.src[start..self.offset]).into_owned(),
        )
    }

    /// Scan a comment; the leading `/` is already consumed.
    fn scan_comment(&mut self, start: usize) -> String {
        if self.ch == Some('/') {
            while matches!(self.ch, Some(c) if c != '\n') {
                self.next();
            }
        } else {
            self.next();
            let mut terminated = false;
            while let Some(ch) = self.ch {
                self.next();
                if ch == '*' && self.ch == Some('/') {
                    self.next();
                    terminated = true;
                    break;
                }
            }
            if !terminated {
                self.error(start, "comment not terminated");
            }
        }
        String::from_utf8_lossy(&self.src[start..self.offset]).into_owned()
    }

    /// Scan string content up to the closing quote or the next `$`.
    fn scan_string_body(&mut self) -> (Token, String) {
        let quote = self.string_quote;
        let raw = quote == '`';
        let interpolated = self.mode.contains(ScanMode::STRING_INTERP);
        let mut lit = String::new();
        loop {
            match self.ch {
                None => {
                    self.error(self.string_start, "string literal not terminated");
                    break;
                }
                Some('\n') if !raw => {
                    self.error(self.string_start, "string literal not terminated");
                    break;
                }
                Some(c) if c == quote => {
                    self.next();
                    break;
                }
                Some('$') => {
                    self.mode |= ScanMode::STRING_INTERP;
                    return (Token::StringItp, lit);
                }
                Some('\\') if !raw => {
                    self.next();
                    self.scan_escape(quote, &mut lit);
                }
                Some(c) => {
                    lit.push(c);
                    self.next();
                }
            }
        }
        self.mode.remove(ScanMode::STRING_INTERP);
        if interpolated {
            self.skip_line_feed = false;
            (Token::StringItp, lit)
        } else {
            (Token::String, lit)
        }
    }

    fn scan_escape(&mut self, quote: char, lit: &mut String) {
        let offset = self.offset;
        let unescaped = match self.ch {
            Some('a') => '\x07',
            Some('b') => '\x08',
            Some('f') => '\x0c',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('v') => '\x0b',
            Some('\\') => '\\',
            Some('$') => '$',
            Some(c) if c == quote => c,
            None | Some('\n') => {
                self.error(offset, "escape sequence not terminated");
                return;
            }
            Some(c) => {
                self.error(offset, "unknown escape sequence");
                lit.push('\\');
                lit.push(c);
                self.next();
                return;
            }
        };
        lit.push(unescaped);
        self.next();
    }
}

fn is_letter(ch: char) -> bool {
    ch == '_' || ch.is_alphabetic()
}

/// Tokens after which a newline terminates the statement
fn can_end_statement(tok: Token) -> bool {
    tok.is_type_keyword()
        || matches!(
            tok,
            Token::Ident
                | Token::Boolean
                | Token::Break
                | Token::Continue
                | Token::Return
                | Token::Exists
                | Token::Linux
                | Token::MacOs
                | Token::Windows
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn scan_all(src: &str) -> Vec<(Token, String)> {
        let mut scanner = Scanner::new("sample", src, None);
        let mut out = Vec::new();
        loop {
            let (_, tok, lit) = scanner.scan();
            if tok == Token::Eof {
                break;
            }
            out.push((tok, lit));
        }
        out
    }

    fn kinds(src: &str) -> Vec<Token> {
        scan_all(src).into_iter().map(|(tok, _)| tok).collect()
    }

    #[test]
    fn test_plain_strings() {
        assert_eq!(
            scan_all("'sample test'"),
            vec![
                (Token::String, "sample test".to_string()),
                (Token::Lf, "\n".to_string())
            ]
        );
        assert_eq!(
            scan_all("\"sample test + test\"")[0],
            (Token::String, "sample test + test".to_string())
        );
    }

    #[test]
    fn test_interpolated_strings() {
        for src in [
            "\"sample * $test + test\"",
            "'sample * $test + test'",
            "`sample * $test + test`",
        ] {
            let tokens = scan_all(src);
            assert_eq!(
                &tokens[..4],
                &[
                    (Token::StringItp, "sample * ".to_string()),
                    (Token::Var, "$".to_string()),
                    (Token::Ident, "test".to_string()),
                    (Token::StringItp, " + test".to_string()),
                ]
            );
        }
    }

    #[test]
    fn test_interpolation_expression() {
        assert_eq!(
            kinds("\"v=${a + 1}!\""),
            vec![
                Token::StringItp,
                Token::Var,
                Token::LBrace,
                Token::Ident,
                Token::Add,
                Token::Integer,
                Token::RBrace,
                Token::StringItp,
                Token::Lf,
            ]
        );
    }

    #[test]
    fn test_interpolated_string_then_next_line() {
        let tokens = scan_all("'sample * $test + test'\n\t\t'text second line'");
        assert_eq!(tokens[4], (Token::Lf, "\n".to_string()));
        assert_eq!(tokens[5], (Token::String, "text second line".to_string()));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            scan_all(r#""a\tb\$c\"""#)[0],
            (Token::String, "a\tb$c\"".to_string())
        );
        assert_eq!(scan_all(r"`raw\n`")[0], (Token::String, "raw\\n".to_string()));
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            scan_all("// single line comment"),
            vec![(Token::Comment, "// single line comment".to_string())]
        );
        assert_eq!(
            scan_all("/* first line comment\nsecond line comment */"),
            vec![(
                Token::Comment,
                "/* first line comment\nsecond line comment */".to_string()
            )]
        );
    }

    #[test]
    fn test_array_literal_round_trip() {
        assert_eq!(
            kinds("a = [1,2,b,{1:2}]\n"),
            vec![
                Token::Ident,
                Token::Assign,
                Token::LBrack,
                Token::Integer,
                Token::Comma,
                Token::Integer,
                Token::Comma,
                Token::Ident,
                Token::Comma,
                Token::LBrace,
                Token::Integer,
                Token::Colon,
                Token::Integer,
                Token::RBrace,
                Token::RBrack,
                Token::Lf,
            ]
        );
    }

    #[test]
    fn test_line_feed_suppression() {
        assert_eq!(kinds("target:\n"), vec![Token::Ident, Token::Colon]);
        assert_eq!(
            kinds("a = 1 +\n 2\n"),
            vec![Token::Ident, Token::Assign, Token::Integer, Token::Add, Token::Integer, Token::Lf]
        );
        assert_eq!(
            kinds("\tfor i in [1..10) {\n"),
            vec![
                Token::For,
                Token::Ident,
                Token::In,
                Token::LBrack,
                Token::Integer,
                Token::Range,
                Token::Integer,
                Token::RParen,
                Token::LBrace,
            ]
        );
        assert_eq!(
            kinds("\t} else { }\n"),
            vec![Token::RBrace, Token::Else, Token::LBrace, Token::RBrace, Token::Lf]
        );
    }

    #[test]
    fn test_offsets_and_positions() {
        let mut scanner = Scanner::new("sample", "var = a\nb = 1", None);
        assert_eq!(scanner.scan(), (0, Token::Ident, "var".to_string()));
        assert_eq!(scanner.scan().0, 4);
        assert_eq!(scanner.scan().0, 6);
        assert_eq!(scanner.scan(), (7, Token::Lf, "\n".to_string()));
        let (offset, tok, _) = scanner.scan();
        assert_eq!(tok, Token::Ident);
        assert_eq!(scanner.position(offset).to_string(), "sample:2:1");
    }

    #[test]
    fn test_keywords_and_operators() {
        assert_eq!(
            kinds("delete a{1..2}"),
            vec![
                Token::Delete,
                Token::Ident,
                Token::LBrace,
                Token::Integer,
                Token::Range,
                Token::Integer,
                Token::RBrace,
                Token::Lf,
            ]
        );
        assert_eq!(
            kinds("(a, b) => a * b"),
            vec![
                Token::LParen,
                Token::Ident,
                Token::Comma,
                Token::Ident,
                Token::RParen,
                Token::Lambda,
                Token::Ident,
                Token::Mul,
                Token::Ident,
                Token::Lf,
            ]
        );
        assert_eq!(
            kinds("a &^= b ?? c ≥ 1"),
            vec![
                Token::Ident,
                Token::AndNotAssign,
                Token::Ident,
                Token::Dqs,
                Token::Ident,
                Token::Geq,
                Token::Integer,
                Token::Lf,
            ]
        );
        assert_eq!(kinds("if a is integer | float {")[3], Token::TInteger);
    }

    #[test]
    fn test_argument_mode() {
        assert_eq!(
            kinds("@print a < src > out | @upper\nx > 1"),
            vec![
                Token::At,
                Token::Ident,
                Token::Ident,
                Token::ReadFrom,
                Token::Ident,
                Token::WriteTo,
                Token::Ident,
                Token::Pipe,
                Token::At,
                Token::Ident,
                Token::Lf,
                Token::Ident,
                Token::Gtr,
                Token::Integer,
                Token::Lf,
            ]
        );
        assert_eq!(
            kinds("#echo a \\\n b >> log"),
            vec![
                Token::Hash,
                Token::Ident,
                Token::Ident,
                Token::Ident,
                Token::AppendTo,
                Token::Ident,
                Token::Lf,
            ]
        );
    }

    #[test]
    fn test_errors_are_reported_and_scanning_continues() {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&errors);
        let handler: ErrorHandler = Box::new(move |pos, msg| {
            sink.borrow_mut().push(format!("{}: {}", pos, msg));
        });
        let mut scanner = Scanner::new("sample", "a = 'open\nb = . 1\n/* tail", Some(handler));
        let mut tokens = Vec::new();
        loop {
            let (_, tok, _) = scanner.scan();
            if tok == Token::Eof {
                break;
            }
            tokens.push(tok);
        }
        assert!(tokens.contains(&Token::Illegal));
        assert_eq!(scanner.error_count(), 3);
        let errors = errors.borrow();
        assert_eq!(errors[0], "sample:1:5: string literal not terminated");
        assert!(errors[1].contains("illegal character '.'"));
        assert!(errors[2].ends_with("comment not terminated"));
    }
}
