//! The lexer: byte stream to token stream.
//!
//! Newlines and semicolons come out as distinct terminator tokens; the
//! parser accepts either as a statement separator. Double-quoted strings are
//! scanned in segments: `#{` emits a `StrPart` carrying the bytes so far and
//! switches into interpolation mode (tracking brace depth), the matching `}`
//! emits `InterpEnd`, and scanning resumes inside the string, finishing with
//! a plain `Str` token for the final segment.

use crate::error::Error;

/// Source location of a token start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int(i64),
    Float(f64),
    /// Complete string, or the final segment of an interpolated string
    Str(String),
    /// String segment terminated by `#{`
    StrPart(String),
    /// The `}` that closes an interpolation segment
    InterpEnd,
    Sym(String),

    // Names
    Ident(String),
    ConstName(String),
    Ivar(String),
    Cvar(String),
    Gvar(String),

    // Keywords
    KwClass,
    KwModule,
    KwDef,
    KwEnd,
    KwIf,
    KwElsif,
    KwElse,
    KwUnless,
    KwWhile,
    KwUntil,
    KwFor,
    KwIn,
    KwCase,
    KwWhen,
    KwThen,
    KwDo,
    KwYield,
    KwReturn,
    KwBreak,
    KwNext,
    KwRedo,
    KwRetry,
    KwSuper,
    KwSelf,
    KwTrue,
    KwFalse,
    KwNil,
    KwAnd,
    KwOr,
    KwNot,
    KwBegin,
    KwRescue,
    KwEnsure,
    KwRaise,
    KwRequire,
    KwLoad,
    KwAlias,
    KwFile,
    KwLine,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    OrOrAssign,
    AndAndAssign,
    Dot,
    SafeNav,
    DotDot,
    DotDotDot,
    Comma,
    Colon,
    ColonColon,
    Question,
    Arrow,
    FatArrow,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Terminators
    Newline,
    Semi,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

pub struct Lexer<'a> {
    filename: &'a str,
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    column: u32,
    /// Brace depth per open interpolation, innermost last
    interp_depths: Vec<u32>,
}

impl<'a> Lexer<'a> {
    pub fn new(filename: &'a str, source: &'a str) -> Self {
        Self {
            filename,
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
            interp_depths: Vec::new(),
        }
    }

    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, Error> {
        let mut tokens = Vec::new();
        loop {
            self.skip_spaces_and_comments();
            let span = Span::new(self.line, self.column);
            let Some((_, ch)) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, span));
                break;
            };

            match ch {
                '\n' => {
                    self.advance();
                    tokens.push(Token::new(TokenKind::Newline, span));
                }
                ';' => {
                    self.advance();
                    tokens.push(Token::new(TokenKind::Semi, span));
                }
                '(' => self.single(&mut tokens, span, TokenKind::LParen),
                ')' => self.single(&mut tokens, span, TokenKind::RParen),
                '[' => self.single(&mut tokens, span, TokenKind::LBracket),
                ']' => self.single(&mut tokens, span, TokenKind::RBracket),
                '{' => {
                    self.advance();
                    if let Some(depth) = self.interp_depths.last_mut() {
                        *depth += 1;
                    }
                    tokens.push(Token::new(TokenKind::LBrace, span));
                }
                '}' => {
                    self.advance();
                    match self.interp_depths.last_mut() {
                        Some(depth) if *depth == 1 => {
                            // closes the interpolation: resume string scanning
                            self.interp_depths.pop();
                            tokens.push(Token::new(TokenKind::InterpEnd, span));
                            let seg_span = Span::new(self.line, self.column);
                            let seg = self.scan_string_segment()?;
                            tokens.push(Token::new(seg, seg_span));
                        }
                        Some(depth) => {
                            *depth -= 1;
                            tokens.push(Token::new(TokenKind::RBrace, span));
                        }
                        None => tokens.push(Token::new(TokenKind::RBrace, span)),
                    }
                }
                ',' => self.single(&mut tokens, span, TokenKind::Comma),
                '+' => self.with_assign(&mut tokens, span, TokenKind::Plus, TokenKind::PlusAssign),
                '-' => {
                    self.advance();
                    if self.match_char('>') {
                        tokens.push(Token::new(TokenKind::Arrow, span));
                    } else if self.match_char('=') {
                        tokens.push(Token::new(TokenKind::MinusAssign, span));
                    } else {
                        tokens.push(Token::new(TokenKind::Minus, span));
                    }
                }
                '*' => self.with_assign(&mut tokens, span, TokenKind::Star, TokenKind::StarAssign),
                '/' => self.with_assign(&mut tokens, span, TokenKind::Slash, TokenKind::SlashAssign),
                '%' => {
                    self.with_assign(&mut tokens, span, TokenKind::Percent, TokenKind::PercentAssign)
                }
                '=' => {
                    self.advance();
                    if self.match_char('=') {
                        tokens.push(Token::new(TokenKind::EqEq, span));
                    } else if self.match_char('>') {
                        tokens.push(Token::new(TokenKind::FatArrow, span));
                    } else {
                        tokens.push(Token::new(TokenKind::Assign, span));
                    }
                }
                '!' => {
                    self.advance();
                    if self.match_char('=') {
                        tokens.push(Token::new(TokenKind::NotEq, span));
                    } else {
                        tokens.push(Token::new(TokenKind::Bang, span));
                    }
                }
                '<' => {
                    self.advance();
                    if self.match_char('=') {
                        tokens.push(Token::new(TokenKind::Le, span));
                    } else if self.match_char('<') {
                        tokens.push(Token::new(TokenKind::Shl, span));
                    } else {
                        tokens.push(Token::new(TokenKind::Lt, span));
                    }
                }
                '>' => {
                    self.advance();
                    if self.match_char('=') {
                        tokens.push(Token::new(TokenKind::Ge, span));
                    } else if self.match_char('>') {
                        tokens.push(Token::new(TokenKind::Shr, span));
                    } else {
                        tokens.push(Token::new(TokenKind::Gt, span));
                    }
                }
                '&' => {
                    self.advance();
                    if self.match_char('&') {
                        if self.match_char('=') {
                            tokens.push(Token::new(TokenKind::AndAndAssign, span));
                        } else {
                            tokens.push(Token::new(TokenKind::AndAnd, span));
                        }
                    } else if self.match_char('.') {
                        tokens.push(Token::new(TokenKind::SafeNav, span));
                    } else {
                        tokens.push(Token::new(TokenKind::Amp, span));
                    }
                }
                '|' => {
                    self.advance();
                    if self.match_char('|') {
                        if self.match_char('=') {
                            tokens.push(Token::new(TokenKind::OrOrAssign, span));
                        } else {
                            tokens.push(Token::new(TokenKind::OrOr, span));
                        }
                    } else {
                        tokens.push(Token::new(TokenKind::Pipe, span));
                    }
                }
                '^' => self.single(&mut tokens, span, TokenKind::Caret),
                '~' => self.single(&mut tokens, span, TokenKind::Tilde),
                '?' => self.single(&mut tokens, span, TokenKind::Question),
                '.' => {
                    self.advance();
                    if self.match_char('.') {
                        if self.match_char('.') {
                            tokens.push(Token::new(TokenKind::DotDotDot, span));
                        } else {
                            tokens.push(Token::new(TokenKind::DotDot, span));
                        }
                    } else {
                        tokens.push(Token::new(TokenKind::Dot, span));
                    }
                }
                ':' => {
                    self.advance();
                    if self.match_char(':') {
                        tokens.push(Token::new(TokenKind::ColonColon, span));
                    } else if self
                        .peek()
                        .map(|(_, c)| c.is_ascii_alphabetic() || c == '_' || c == '"')
                        .unwrap_or(false)
                    {
                        let kind = self.scan_symbol()?;
                        tokens.push(Token::new(kind, span));
                    } else {
                        tokens.push(Token::new(TokenKind::Colon, span));
                    }
                }
                '"' => {
                    self.advance(); // opening quote
                    let seg = self.scan_string_segment()?;
                    tokens.push(Token::new(seg, span));
                }
                '\'' => {
                    let kind = self.scan_single_quoted()?;
                    tokens.push(Token::new(kind, span));
                }
                '0'..='9' => {
                    let kind = self.scan_number()?;
                    tokens.push(Token::new(kind, span));
                }
                '@' => {
                    self.advance();
                    if self.match_char('@') {
                        let name = self.scan_name();
                        if name.is_empty() {
                            return Err(self.error("expected class variable name after '@@'"));
                        }
                        tokens.push(Token::new(TokenKind::Cvar(name), span));
                    } else {
                        let name = self.scan_name();
                        if name.is_empty() {
                            return Err(self.error("expected instance variable name after '@'"));
                        }
                        tokens.push(Token::new(TokenKind::Ivar(name), span));
                    }
                }
                '$' => {
                    self.advance();
                    let name = self.scan_name();
                    if name.is_empty() {
                        return Err(self.error("expected global variable name after '$'"));
                    }
                    tokens.push(Token::new(TokenKind::Gvar(name), span));
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let kind = self.scan_identifier();
                    tokens.push(Token::new(kind, span));
                }
                other => return Err(self.error(&format!("unexpected character '{}'", other))),
            }
        }
        Ok(tokens)
    }

    fn single(&mut self, tokens: &mut Vec<Token>, span: Span, kind: TokenKind) {
        self.advance();
        tokens.push(Token::new(kind, span));
    }

    fn with_assign(
        &mut self,
        tokens: &mut Vec<Token>,
        span: Span,
        plain: TokenKind,
        assign: TokenKind,
    ) {
        self.advance();
        if self.match_char('=') {
            tokens.push(Token::new(assign, span));
        } else {
            tokens.push(Token::new(plain, span));
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((_, ch)) = result {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek().map(|(_, c)| c) == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_spaces_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some((_, ' ' | '\t' | '\r')) => {
                    self.advance();
                }
                Some((_, '#')) => {
                    while let Some((_, ch)) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some((_, '\\')) => {
                    // line continuation: backslash-newline
                    let mut look = self.chars.clone();
                    look.next();
                    if look.peek().map(|(_, c)| *c) == Some('\n') {
                        self.advance();
                        self.advance();
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    /// Scan a double-quoted string body until the closing quote or `#{`.
    /// Returns `Str` for a completed string, `StrPart` when interpolation
    /// follows. A backslash consumes the next character verbatim.
    fn scan_string_segment(&mut self) -> Result<TokenKind, Error> {
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string")),
                Some((_, '"')) => return Ok(TokenKind::Str(value)),
                Some((_, '\\')) => match self.advance() {
                    Some((_, next)) => value.push(next),
                    None => return Err(self.error("unterminated string")),
                },
                Some((i, '#')) => {
                    if self.peek().map(|(_, c)| c) == Some('{') {
                        self.advance(); // '{'
                        self.interp_depths.push(1);
                        return Ok(TokenKind::StrPart(value));
                    }
                    let _ = i;
                    value.push('#');
                }
                Some((_, ch)) => value.push(ch),
            }
        }
    }

    fn scan_single_quoted(&mut self) -> Result<TokenKind, Error> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string")),
                Some((_, '\'')) => return Ok(TokenKind::Str(value)),
                Some((_, '\\')) => match self.advance() {
                    Some((_, next)) => value.push(next),
                    None => return Err(self.error("unterminated string")),
                },
                Some((_, ch)) => value.push(ch),
            }
        }
    }

    fn scan_symbol(&mut self) -> Result<TokenKind, Error> {
        if self.match_char('"') {
            // :"arbitrary name"
            let mut value = String::new();
            loop {
                match self.advance() {
                    None => return Err(self.error("unterminated symbol")),
                    Some((_, '"')) => return Ok(TokenKind::Sym(value)),
                    Some((_, ch)) => value.push(ch),
                }
            }
        }
        let mut name = self.scan_name();
        // setter symbols like :name=
        if self.peek().map(|(_, c)| c) == Some('=') {
            let mut look = self.chars.clone();
            look.next();
            if look.peek().map(|(_, c)| *c) != Some('=') {
                self.advance();
                name.push('=');
            }
        }
        Ok(TokenKind::Sym(name))
    }

    /// Scan number: decimal integer or float. `1.` followed by `.` stays an
    /// integer so that `1..2` lexes as a range.
    fn scan_number(&mut self) -> Result<TokenKind, Error> {
        let start = self.peek().map(|(i, _)| i).unwrap_or(0);
        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }
        let mut is_float = false;
        if let Some((_, '.')) = self.peek() {
            let mut look = self.chars.clone();
            look.next();
            if look.peek().map(|(_, c)| c.is_ascii_digit()).unwrap_or(false) {
                is_float = true;
                self.advance();
                while let Some((_, ch)) = self.peek() {
                    if ch.is_ascii_digit() {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }
        let end = self.peek().map(|(i, _)| i).unwrap_or(self.source.len());
        let text = &self.source[start..end];
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error(&format!("invalid float '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.error(&format!("invalid integer '{}'", text)))
        }
    }

    /// An identifier body: alphanumerics and underscores, optionally ending
    /// in `?` or `!`.
    fn scan_name(&mut self) -> String {
        let start = self.peek().map(|(i, _)| i).unwrap_or(self.source.len());
        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let mut end = self.peek().map(|(i, _)| i).unwrap_or(self.source.len());
        if matches!(self.peek().map(|(_, c)| c), Some('?') | Some('!')) {
            self.advance();
            end = self.peek().map(|(i, _)| i).unwrap_or(self.source.len());
        }
        self.source[start..end].to_string()
    }

    fn scan_identifier(&mut self) -> TokenKind {
        let name = self.scan_name();
        match name.as_str() {
            "class" => TokenKind::KwClass,
            "module" => TokenKind::KwModule,
            "def" => TokenKind::KwDef,
            "end" => TokenKind::KwEnd,
            "if" => TokenKind::KwIf,
            "elsif" => TokenKind::KwElsif,
            "else" => TokenKind::KwElse,
            "unless" => TokenKind::KwUnless,
            "while" => TokenKind::KwWhile,
            "until" => TokenKind::KwUntil,
            "for" => TokenKind::KwFor,
            "in" => TokenKind::KwIn,
            "case" => TokenKind::KwCase,
            "when" => TokenKind::KwWhen,
            "then" => TokenKind::KwThen,
            "do" => TokenKind::KwDo,
            "yield" => TokenKind::KwYield,
            "return" => TokenKind::KwReturn,
            "break" => TokenKind::KwBreak,
            "next" => TokenKind::KwNext,
            "redo" => TokenKind::KwRedo,
            "retry" => TokenKind::KwRetry,
            "super" => TokenKind::KwSuper,
            "self" => TokenKind::KwSelf,
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            "nil" => TokenKind::KwNil,
            "and" => TokenKind::KwAnd,
            "or" => TokenKind::KwOr,
            "not" => TokenKind::KwNot,
            "begin" => TokenKind::KwBegin,
            "rescue" => TokenKind::KwRescue,
            "ensure" => TokenKind::KwEnsure,
            "raise" => TokenKind::KwRaise,
            "require" => TokenKind::KwRequire,
            "load" => TokenKind::KwLoad,
            "alias" => TokenKind::KwAlias,
            "__FILE__" => TokenKind::KwFile,
            "__LINE__" => TokenKind::KwLine,
            _ => {
                if name.starts_with(|c: char| c.is_ascii_uppercase()) {
                    TokenKind::ConstName(name)
                } else {
                    TokenKind::Ident(name)
                }
            }
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::parse(message, self.filename, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new("test.rb", source);
        lexer
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_assignment() {
        let t = kinds("x = 42");
        assert_eq!(
            t,
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::Int(42),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_operators() {
        let t = kinds("== != <= >= << >> &. => :: .. ... ||= &&= ->");
        assert_eq!(
            t,
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::SafeNav,
                TokenKind::FatArrow,
                TokenKind::ColonColon,
                TokenKind::DotDot,
                TokenKind::DotDotDot,
                TokenKind::OrOrAssign,
                TokenKind::AndAndAssign,
                TokenKind::Arrow,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_terminators() {
        let t = kinds("a\nb; c");
        assert_eq!(
            t,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Newline,
                TokenKind::Ident("b".into()),
                TokenKind::Semi,
                TokenKind::Ident("c".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_keywords_and_names() {
        let t = kinds("class Foo def bar @x @@y $z end");
        assert_eq!(
            t,
            vec![
                TokenKind::KwClass,
                TokenKind::ConstName("Foo".into()),
                TokenKind::KwDef,
                TokenKind::Ident("bar".into()),
                TokenKind::Ivar("x".into()),
                TokenKind::Cvar("y".into()),
                TokenKind::Gvar("z".into()),
                TokenKind::KwEnd,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_predicate_identifiers() {
        let t = kinds("alive? has_key? empty!");
        assert_eq!(
            t,
            vec![
                TokenKind::Ident("alive?".into()),
                TokenKind::Ident("has_key?".into()),
                TokenKind::Ident("empty!".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let t = kinds("1 3.14 1..5");
        assert_eq!(
            t,
            vec![
                TokenKind::Int(1),
                TokenKind::Float(3.14),
                TokenKind::Int(1),
                TokenKind::DotDot,
                TokenKind::Int(5),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_symbols() {
        let t = kinds(":name :\"with space\" :setter=");
        assert_eq!(
            t,
            vec![
                TokenKind::Sym("name".into()),
                TokenKind::Sym("with space".into()),
                TokenKind::Sym("setter=".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_plain_string() {
        let t = kinds(r#""hello""#);
        assert_eq!(t, vec![TokenKind::Str("hello".into()), TokenKind::Eof]);
    }

    #[test]
    fn test_backslash_consumes_verbatim() {
        let t = kinds(r#""a\"b\\c""#);
        assert_eq!(t, vec![TokenKind::Str(r#"a"b\c"#.into()), TokenKind::Eof]);
    }

    #[test]
    fn test_interpolation_segments() {
        let t = kinds(r#""x=#{s}-#{1+2}""#);
        assert_eq!(
            t,
            vec![
                TokenKind::StrPart("x=".into()),
                TokenKind::Ident("s".into()),
                TokenKind::InterpEnd,
                TokenKind::StrPart("-".into()),
                TokenKind::Int(1),
                TokenKind::Plus,
                TokenKind::Int(2),
                TokenKind::InterpEnd,
                TokenKind::Str("".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_interpolation_with_nested_braces() {
        let t = kinds(r#""v=#{ {1 => 2}[1] }""#);
        assert!(t.contains(&TokenKind::StrPart("v=".into())));
        assert!(t.contains(&TokenKind::InterpEnd));
        assert_eq!(t[t.len() - 2], TokenKind::Str("".into()));
    }

    #[test]
    fn test_comment_skipped() {
        let t = kinds("a # comment here\nb");
        assert_eq!(
            t,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Newline,
                TokenKind::Ident("b".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_single_quoted() {
        let t = kinds("'no #{interp} here'");
        assert_eq!(
            t,
            vec![TokenKind::Str("no #{interp} here".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_ternary_vs_symbol() {
        let t = kinds("x ? a : b");
        assert_eq!(
            t,
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Question,
                TokenKind::Ident("a".into()),
                TokenKind::Colon,
                TokenKind::Ident("b".into()),
                TokenKind::Eof
            ]
        );
    }
}
