//! Recursive-descent parser with Pratt-style precedence climbing.
//!
//! The surface sugar is lowered here so the bytecode compiler sees a small
//! core: `unless`/`until` negate into `if`/`while`, `case`/`when` becomes an
//! `if` chain over a hidden one-shot temporary, `for x in e` becomes
//! `e.each { |x| .. }`, statement modifiers wrap their statement, op-assign
//! expands to read-op-write, and attribute writes become `name=` calls.

use crate::compiler::ast::{BinOp, BlockDef, Node, Param, Program, RescueClause, UnOp};
use crate::compiler::lexer::{Span, Token, TokenKind};
use crate::error::Error;

pub struct Parser<'a> {
    filename: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    /// Counter for hidden `case` subject temporaries
    case_counter: u32,
}

impl<'a> Parser<'a> {
    pub fn new(filename: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            filename,
            tokens,
            pos: 0,
            case_counter: 0,
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, Error> {
        let body = self.parse_stmts_until(&[])?;
        if !self.check(&TokenKind::Eof) {
            return Err(self.err_here("unexpected token"));
        }
        Ok(Program { body })
    }

    // ---- token plumbing ----

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek2_kind(&self) -> &TokenKind {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].kind
    }

    fn here(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, Error> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.err_here(&format!("expected {}", what)))
        }
    }

    fn err_here(&self, message: &str) -> Error {
        let span = self.here();
        Error::parse(message, self.filename, span.line, span.column)
    }

    fn err_at(&self, span: Span, message: &str) -> Error {
        Error::parse(message, self.filename, span.line, span.column)
    }

    /// Skip statement terminators (newlines and semicolons).
    fn skip_terms(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semi) {
            self.advance();
        }
    }

    /// Skip newlines only; used after operators and commas where the
    /// expression continues on the next line.
    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    // ---- statements ----

    fn parse_stmts_until(&mut self, enders: &[TokenKind]) -> Result<Vec<Node>, Error> {
        let mut stmts = Vec::new();
        loop {
            self.skip_terms();
            if self.check(&TokenKind::Eof) || enders.iter().any(|k| self.check(k)) {
                break;
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Node, Error> {
        let mut node = self.parse_expr()?;

        // multiple assignment: a, b = e1, e2
        if self.check(&TokenKind::Comma) && Self::is_assign_target(&node) {
            node = self.parse_multi_assign(node)?;
        }

        // statement modifiers
        loop {
            let span = self.here();
            match self.peek_kind() {
                TokenKind::KwIf => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    node = Node::If {
                        cond: Box::new(cond),
                        then: vec![node],
                        els: vec![],
                        span,
                    };
                }
                TokenKind::KwUnless => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    node = Node::If {
                        cond: Box::new(cond),
                        then: vec![],
                        els: vec![node],
                        span,
                    };
                }
                TokenKind::KwWhile => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    node = Node::While {
                        cond: Box::new(cond),
                        body: vec![node],
                        span,
                    };
                }
                TokenKind::KwUntil => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    node = Node::While {
                        cond: Box::new(Node::UnExpr {
                            op: UnOp::Not,
                            operand: Box::new(cond),
                            span,
                        }),
                        body: vec![node],
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_multi_assign(&mut self, first: Node) -> Result<Node, Error> {
        let span = first.span();
        let mut targets = vec![first];
        while self.match_kind(&TokenKind::Comma) {
            self.skip_newlines();
            let target = self.parse_ternary()?;
            if !Self::is_assign_target(&target) {
                return Err(self.err_at(target.span(), "invalid assignment target"));
            }
            targets.push(target);
        }
        self.expect(&TokenKind::Assign, "'=' in multiple assignment")?;
        self.skip_newlines();
        let mut values = vec![self.parse_ternary()?];
        while self.match_kind(&TokenKind::Comma) {
            self.skip_newlines();
            values.push(self.parse_ternary()?);
        }
        Ok(Node::MultiAssign {
            targets,
            values,
            span,
        })
    }

    fn is_assign_target(node: &Node) -> bool {
        match node {
            Node::Ident(..)
            | Node::ConstRef(..)
            | Node::Ivar(..)
            | Node::Cvar(..)
            | Node::Gvar(..) => true,
            Node::Index { safe, .. } => !safe,
            Node::Call {
                recv: Some(_),
                args,
                block: None,
                block_arg: None,
                safe: false,
                ..
            } => args.is_empty(),
            _ => false,
        }
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> Result<Node, Error> {
        if self.check(&TokenKind::KwNot) {
            let span = self.here();
            self.advance();
            let operand = self.parse_expr()?;
            return Ok(Node::UnExpr {
                op: UnOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        let mut lhs = self.parse_assign()?;
        loop {
            let span = self.here();
            let op = match self.peek_kind() {
                TokenKind::KwAnd => BinOp::And,
                TokenKind::KwOr => BinOp::Or,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_assign()?;
            lhs = Node::BinExpr {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_assign(&mut self) -> Result<Node, Error> {
        let lhs = self.parse_ternary()?;
        let span = self.here();
        let op = match self.peek_kind() {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            TokenKind::SlashAssign => Some(BinOp::Div),
            TokenKind::PercentAssign => Some(BinOp::Mod),
            TokenKind::OrOrAssign => Some(BinOp::Or),
            TokenKind::AndAndAssign => Some(BinOp::And),
            _ => return Ok(lhs),
        };
        if !Self::is_assign_target(&lhs) {
            // leave `a == b` style alone; a bare `=` after a non-target is an error
            if op.is_none() {
                return Err(self.err_at(lhs.span(), "invalid assignment target"));
            }
            return Ok(lhs);
        }
        self.advance();
        self.skip_newlines();
        let value = self.parse_assign()?;
        let value = match op {
            None => value,
            Some(op) => Node::BinExpr {
                op,
                lhs: Box::new(lhs.clone()),
                rhs: Box::new(value),
                span,
            },
        };
        self.make_assign(lhs, value, span)
    }

    fn make_assign(&self, target: Node, value: Node, span: Span) -> Result<Node, Error> {
        Ok(match target {
            Node::Ident(name, _) | Node::ConstRef(name, _) => Node::Assign {
                name,
                value: Box::new(value),
                span,
            },
            Node::Ivar(name, _) => Node::IvarAssign {
                name,
                value: Box::new(value),
                span,
            },
            Node::Cvar(name, _) => Node::CvarAssign {
                name,
                value: Box::new(value),
                span,
            },
            Node::Gvar(name, _) => Node::GvarAssign {
                name,
                value: Box::new(value),
                span,
            },
            Node::Index { recv, index, .. } => Node::IndexAssign {
                recv,
                index,
                value: Box::new(value),
                span,
            },
            Node::Call { recv, name, .. } => Node::Call {
                recv,
                name: format!("{}=", name),
                args: vec![value],
                block: None,
                block_arg: None,
                safe: false,
                span,
            },
            other => return Err(self.err_at(other.span(), "invalid assignment target")),
        })
    }

    fn parse_ternary(&mut self) -> Result<Node, Error> {
        let cond = self.parse_range()?;
        if self.check(&TokenKind::Question) {
            let span = self.here();
            self.advance();
            self.skip_newlines();
            let then = self.parse_ternary()?;
            self.expect(&TokenKind::Colon, "':' in ternary")?;
            self.skip_newlines();
            let els = self.parse_ternary()?;
            return Ok(Node::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                els: Box::new(els),
                span,
            });
        }
        Ok(cond)
    }

    fn parse_range(&mut self) -> Result<Node, Error> {
        let start = self.parse_or()?;
        let exclusive = match self.peek_kind() {
            TokenKind::DotDot => false,
            TokenKind::DotDotDot => true,
            _ => return Ok(start),
        };
        let span = self.here();
        self.advance();
        self.skip_newlines();
        let end = self.parse_or()?;
        Ok(Node::RangeLit {
            start: Box::new(start),
            end: Box::new(end),
            exclusive,
            span,
        })
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Node, Error>,
        table: &[(TokenKind, BinOp)],
    ) -> Result<Node, Error> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (kind, op) in table {
                if self.check(kind) {
                    let span = self.here();
                    self.advance();
                    self.skip_newlines();
                    let rhs = next(self)?;
                    lhs = Node::BinExpr {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        span,
                    };
                    continue 'outer;
                }
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Node, Error> {
        self.binary_level(Self::parse_and, &[(TokenKind::OrOr, BinOp::Or)])
    }

    fn parse_and(&mut self) -> Result<Node, Error> {
        self.binary_level(Self::parse_equality, &[(TokenKind::AndAnd, BinOp::And)])
    }

    fn parse_equality(&mut self) -> Result<Node, Error> {
        self.binary_level(
            Self::parse_comparison,
            &[(TokenKind::EqEq, BinOp::Eq), (TokenKind::NotEq, BinOp::Ne)],
        )
    }

    fn parse_comparison(&mut self) -> Result<Node, Error> {
        self.binary_level(
            Self::parse_bitor,
            &[
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::Le, BinOp::Le),
                (TokenKind::Gt, BinOp::Gt),
                (TokenKind::Ge, BinOp::Ge),
            ],
        )
    }

    fn parse_bitor(&mut self) -> Result<Node, Error> {
        self.binary_level(
            Self::parse_bitand,
            &[
                (TokenKind::Pipe, BinOp::BitOr),
                (TokenKind::Caret, BinOp::BitXor),
            ],
        )
    }

    fn parse_bitand(&mut self) -> Result<Node, Error> {
        self.binary_level(Self::parse_shift, &[(TokenKind::Amp, BinOp::BitAnd)])
    }

    fn parse_shift(&mut self) -> Result<Node, Error> {
        self.binary_level(
            Self::parse_additive,
            &[(TokenKind::Shl, BinOp::Shl), (TokenKind::Shr, BinOp::Shr)],
        )
    }

    fn parse_additive(&mut self) -> Result<Node, Error> {
        self.binary_level(
            Self::parse_multiplicative,
            &[(TokenKind::Plus, BinOp::Add), (TokenKind::Minus, BinOp::Sub)],
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Node, Error> {
        self.binary_level(
            Self::parse_unary,
            &[
                (TokenKind::Star, BinOp::Mul),
                (TokenKind::Slash, BinOp::Div),
                (TokenKind::Percent, BinOp::Mod),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Node, Error> {
        let span = self.here();
        let op = match self.peek_kind() {
            TokenKind::Bang => UnOp::Not,
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Plus => UnOp::Pos,
            TokenKind::Tilde => UnOp::BitNot,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Node::UnExpr {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn parse_postfix(&mut self) -> Result<Node, Error> {
        let mut node = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot | TokenKind::SafeNav | TokenKind::ColonColon => {
                    let safe = self.check(&TokenKind::SafeNav);
                    let span = self.here();
                    self.advance();
                    self.skip_newlines();
                    let name = self.parse_method_name()?;
                    let (args, block_arg) = self.parse_call_args()?;
                    let block = self.parse_block_opt()?;
                    node = Node::Call {
                        recv: Some(Box::new(node)),
                        name,
                        args,
                        block: block.map(Box::new),
                        block_arg: block_arg.map(Box::new),
                        safe,
                        span,
                    };
                }
                TokenKind::LBracket => {
                    let span = self.here();
                    self.advance();
                    self.skip_newlines();
                    let index = self.parse_expr()?;
                    self.skip_newlines();
                    self.expect(&TokenKind::RBracket, "']'")?;
                    node = Node::Index {
                        recv: Box::new(node),
                        index: Box::new(index),
                        safe: false,
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(node)
    }

    /// A method name after `.`: an identifier, constant, operator, or one of
    /// the few keywords that double as method names.
    fn parse_method_name(&mut self) -> Result<String, Error> {
        let tok = self.advance();
        Ok(match tok.kind {
            TokenKind::Ident(name) | TokenKind::ConstName(name) => name,
            TokenKind::KwClass => "class".to_string(),
            TokenKind::KwLoad => "load".to_string(),
            TokenKind::Plus => "+".to_string(),
            TokenKind::Minus => "-".to_string(),
            TokenKind::Star => "*".to_string(),
            TokenKind::Slash => "/".to_string(),
            TokenKind::Percent => "%".to_string(),
            TokenKind::EqEq => "==".to_string(),
            TokenKind::Lt => "<".to_string(),
            TokenKind::Le => "<=".to_string(),
            TokenKind::Gt => ">".to_string(),
            TokenKind::Ge => ">=".to_string(),
            TokenKind::Shl => "<<".to_string(),
            TokenKind::Shr => ">>".to_string(),
            _ => return Err(self.err_at(tok.span, "expected method name")),
        })
    }

    /// Whether a token can begin a paren-less argument. Kept deliberately
    /// narrow so binary operators never get re-parsed as arguments.
    fn starts_bare_arg(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::StrPart(_)
                | TokenKind::Sym(_)
                | TokenKind::Ident(_)
                | TokenKind::ConstName(_)
                | TokenKind::Ivar(_)
                | TokenKind::Cvar(_)
                | TokenKind::Gvar(_)
                | TokenKind::KwNil
                | TokenKind::KwTrue
                | TokenKind::KwFalse
                | TokenKind::KwSelf
                | TokenKind::KwFile
                | TokenKind::KwLine
                | TokenKind::LParen
                | TokenKind::Arrow
        )
    }

    /// Arguments of a call: `( .. )`, paren-less, or none. Returns the
    /// positional arguments and an optional `&block` pass-through.
    #[allow(clippy::type_complexity)]
    fn parse_call_args(&mut self) -> Result<(Vec<Node>, Option<Node>), Error> {
        if self.check(&TokenKind::LParen) {
            self.advance();
            self.parse_paren_args_rest()
        } else if Self::starts_bare_arg(self.peek_kind()) {
            let mut args = vec![self.parse_ternary()?];
            while self.match_kind(&TokenKind::Comma) {
                self.skip_newlines();
                args.push(self.parse_ternary()?);
            }
            Ok((args, None))
        } else {
            Ok((Vec::new(), None))
        }
    }

    /// The rest of a parenthesized argument list, opening paren consumed.
    #[allow(clippy::type_complexity)]
    fn parse_paren_args_rest(&mut self) -> Result<(Vec<Node>, Option<Node>), Error> {
        let mut args = Vec::new();
        let mut block_arg = None;
        self.skip_newlines();
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.match_kind(&TokenKind::Amp) {
                    block_arg = Some(self.parse_ternary()?);
                } else {
                    args.push(self.parse_expr()?);
                }
                self.skip_newlines();
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok((args, block_arg))
    }

    /// An attached block: `{ |a| .. }` or `do |a| .. end`.
    fn parse_block_opt(&mut self) -> Result<Option<BlockDef>, Error> {
        let span = self.here();
        let (body, params) = if self.match_kind(&TokenKind::LBrace) {
            self.skip_terms();
            let params = self.parse_block_params()?;
            let body = self.parse_stmts_until(&[TokenKind::RBrace])?;
            self.expect(&TokenKind::RBrace, "'}'")?;
            (body, params)
        } else if self.match_kind(&TokenKind::KwDo) {
            self.skip_terms();
            let params = self.parse_block_params()?;
            let body = self.parse_stmts_until(&[TokenKind::KwEnd])?;
            self.expect(&TokenKind::KwEnd, "'end'")?;
            (body, params)
        } else {
            return Ok(None);
        };
        Ok(Some(BlockDef { params, body, span }))
    }

    fn parse_block_params(&mut self) -> Result<Vec<Param>, Error> {
        if self.match_kind(&TokenKind::OrOr) {
            return Ok(Vec::new());
        }
        if !self.match_kind(&TokenKind::Pipe) {
            return Ok(Vec::new());
        }
        let mut params = Vec::new();
        if !self.check(&TokenKind::Pipe) {
            loop {
                let splat = self.match_kind(&TokenKind::Star);
                let tok = self.advance();
                let name = match tok.kind {
                    TokenKind::Ident(name) => name,
                    _ => return Err(self.err_at(tok.span, "expected block parameter name")),
                };
                params.push(Param {
                    name,
                    default: None,
                    splat,
                    block: false,
                });
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::Pipe, "'|'")?;
        Ok(params)
    }

    // ---- primaries ----

    fn parse_primary(&mut self) -> Result<Node, Error> {
        let span = self.here();
        match self.peek_kind().clone() {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Node::Int(v, span))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Node::Float(v, span))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Node::Str(s, span))
            }
            TokenKind::StrPart(_) => self.parse_interp_string(span),
            TokenKind::Sym(s) => {
                self.advance();
                Ok(Node::Sym(s, span))
            }
            TokenKind::KwNil => {
                self.advance();
                Ok(Node::Nil(span))
            }
            TokenKind::KwTrue => {
                self.advance();
                Ok(Node::True(span))
            }
            TokenKind::KwFalse => {
                self.advance();
                Ok(Node::False(span))
            }
            TokenKind::KwSelf => {
                self.advance();
                Ok(Node::SelfExpr(span))
            }
            TokenKind::KwFile => {
                self.advance();
                Ok(Node::Str(self.filename.to_string(), span))
            }
            TokenKind::KwLine => {
                self.advance();
                Ok(Node::Int(span.line as i64, span))
            }
            TokenKind::Ident(name) => {
                self.advance();
                self.parse_ident_or_call(name, span)
            }
            TokenKind::ConstName(name) => {
                self.advance();
                Ok(Node::ConstRef(name, span))
            }
            TokenKind::Ivar(name) => {
                self.advance();
                Ok(Node::Ivar(name, span))
            }
            TokenKind::Cvar(name) => {
                self.advance();
                Ok(Node::Cvar(name, span))
            }
            TokenKind::Gvar(name) => {
                self.advance();
                Ok(Node::Gvar(name, span))
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let inner = self.parse_expr()?;
                self.skip_newlines();
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_array_literal(span),
            TokenKind::LBrace => self.parse_hash_literal(span),
            TokenKind::Arrow => self.parse_lambda(span),
            TokenKind::KwIf => self.parse_if(span, false),
            TokenKind::KwUnless => self.parse_if(span, true),
            TokenKind::KwWhile => self.parse_while(span, false),
            TokenKind::KwUntil => self.parse_while(span, true),
            TokenKind::KwFor => self.parse_for(span),
            TokenKind::KwCase => self.parse_case(span),
            TokenKind::KwBegin => self.parse_begin(span),
            TokenKind::KwDef => self.parse_def(span),
            TokenKind::KwClass => self.parse_class(span),
            TokenKind::KwModule => self.parse_module(span),
            TokenKind::KwAlias => self.parse_alias(span),
            TokenKind::KwReturn => {
                self.advance();
                let value = self.parse_opt_value()?;
                Ok(Node::Return(value.map(Box::new), span))
            }
            TokenKind::KwBreak => {
                self.advance();
                let value = self.parse_opt_value()?;
                Ok(Node::Break(value.map(Box::new), span))
            }
            TokenKind::KwNext => {
                self.advance();
                let value = self.parse_opt_value()?;
                Ok(Node::Next(value.map(Box::new), span))
            }
            TokenKind::KwRedo => {
                self.advance();
                Ok(Node::Redo(span))
            }
            TokenKind::KwRetry => {
                self.advance();
                Ok(Node::Retry(span))
            }
            TokenKind::KwYield => {
                self.advance();
                let (args, _) = self.parse_call_args()?;
                Ok(Node::Yield(args, span))
            }
            TokenKind::KwSuper => {
                self.advance();
                let args = if self.check(&TokenKind::LParen) {
                    self.advance();
                    let (args, _) = self.parse_paren_args_rest()?;
                    Some(args)
                } else if Self::starts_bare_arg(self.peek_kind()) {
                    let (args, _) = self.parse_call_args()?;
                    Some(args)
                } else {
                    None
                };
                Ok(Node::Super { args, span })
            }
            TokenKind::KwRaise => {
                self.advance();
                let value = self.parse_opt_value()?;
                Ok(Node::Raise(value.map(Box::new), span))
            }
            TokenKind::KwRequire => {
                self.advance();
                let path = self.parse_ternary()?;
                Ok(Node::Require(Box::new(path), span))
            }
            TokenKind::KwLoad => {
                self.advance();
                let path = self.parse_ternary()?;
                Ok(Node::Load(Box::new(path), span))
            }
            _ => Err(self.err_here("unexpected token")),
        }
    }

    /// Optional value for `return`/`break`/`next`/`raise`. Statement
    /// modifiers after the keyword leave the value empty.
    fn parse_opt_value(&mut self) -> Result<Option<Node>, Error> {
        if Self::starts_bare_arg(self.peek_kind())
            || matches!(self.peek_kind(), TokenKind::LBracket | TokenKind::Minus | TokenKind::Bang)
        {
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    /// A lowercase identifier in value position. With arguments or a block it
    /// is a call; bare it stays an identifier and the compiler resolves it as
    /// a variable read falling back to an implicit zero-argument call.
    fn parse_ident_or_call(&mut self, name: String, span: Span) -> Result<Node, Error> {
        let (args, block_arg) = if self.check(&TokenKind::LParen) {
            self.advance();
            self.parse_paren_args_rest()?
        } else if Self::starts_bare_arg(self.peek_kind()) {
            self.parse_call_args()?
        } else {
            (Vec::new(), None)
        };
        let block = self.parse_block_opt()?;
        if args.is_empty() && block.is_none() && block_arg.is_none() {
            return Ok(Node::Ident(name, span));
        }
        Ok(Node::Call {
            recv: None,
            name,
            args,
            block: block.map(Box::new),
            block_arg: block_arg.map(Box::new),
            safe: false,
            span,
        })
    }

    fn parse_interp_string(&mut self, span: Span) -> Result<Node, Error> {
        let mut parts = Vec::new();
        loop {
            let tok = self.advance();
            match tok.kind {
                TokenKind::Str(s) => {
                    if !s.is_empty() {
                        parts.push(Node::Str(s, tok.span));
                    }
                    break;
                }
                TokenKind::StrPart(s) => {
                    if !s.is_empty() {
                        parts.push(Node::Str(s, tok.span));
                    }
                    self.skip_newlines();
                    parts.push(self.parse_expr()?);
                    self.skip_newlines();
                    self.expect(&TokenKind::InterpEnd, "'}' closing interpolation")?;
                }
                _ => return Err(self.err_at(tok.span, "malformed string interpolation")),
            }
        }
        Ok(Node::InterpStr(parts, span))
    }

    fn parse_array_literal(&mut self, span: Span) -> Result<Node, Error> {
        self.expect(&TokenKind::LBracket, "'['")?;
        self.skip_terms();
        let mut elems = Vec::new();
        if !self.check(&TokenKind::RBracket) {
            loop {
                elems.push(self.parse_ternary()?);
                self.skip_terms();
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
                self.skip_terms();
                if self.check(&TokenKind::RBracket) {
                    break; // trailing comma
                }
            }
        }
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Node::ArrayLit(elems, span))
    }

    fn parse_hash_literal(&mut self, span: Span) -> Result<Node, Error> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        self.skip_terms();
        let mut pairs = Vec::new();
        if !self.check(&TokenKind::RBrace) {
            loop {
                // `name: value` shorthand for a symbol key
                let key = if let (TokenKind::Ident(name), TokenKind::Colon) =
                    (self.peek_kind().clone(), self.peek2_kind().clone())
                {
                    let key_span = self.here();
                    self.advance();
                    self.advance();
                    Node::Sym(name, key_span)
                } else {
                    let key = self.parse_ternary()?;
                    self.skip_newlines();
                    self.expect(&TokenKind::FatArrow, "'=>' in hash literal")?;
                    key
                };
                self.skip_newlines();
                pairs.push((key, self.parse_ternary()?));
                self.skip_terms();
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
                self.skip_terms();
                if self.check(&TokenKind::RBrace) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Node::HashLit(pairs, span))
    }

    fn parse_lambda(&mut self, span: Span) -> Result<Node, Error> {
        self.expect(&TokenKind::Arrow, "'->'")?;
        let params = if self.match_kind(&TokenKind::LParen) {
            let params = self.parse_def_params(&TokenKind::RParen)?;
            self.expect(&TokenKind::RParen, "')'")?;
            params
        } else {
            Vec::new()
        };
        let block = self
            .parse_block_opt()?
            .ok_or_else(|| self.err_here("expected lambda body"))?;
        if !block.params.is_empty() {
            return Err(self.err_at(span, "lambda parameters belong in '->(..)'"));
        }
        Ok(Node::Lambda {
            params,
            body: block.body,
            span,
        })
    }

    fn parse_if(&mut self, span: Span, is_unless: bool) -> Result<Node, Error> {
        self.advance();
        let node = self.parse_if_tail(span)?;
        if !is_unless {
            return Ok(node);
        }
        match node {
            Node::If {
                cond, then, els, ..
            } => Ok(Node::If {
                cond,
                then: els,
                els: then,
                span,
            }),
            _ => unreachable!(),
        }
    }

    /// Body of an `if`/`elsif`, keyword already consumed. The recursion for
    /// `elsif` consumes the single shared `end`.
    fn parse_if_tail(&mut self, span: Span) -> Result<Node, Error> {
        let cond = self.parse_expr()?;
        if !self.match_kind(&TokenKind::KwThen) {
            self.skip_terms();
        }
        let then = self.parse_stmts_until(&[
            TokenKind::KwElsif,
            TokenKind::KwElse,
            TokenKind::KwEnd,
        ])?;
        if self.check(&TokenKind::KwElsif) {
            let nested_span = self.here();
            self.advance();
            let nested = self.parse_if_tail(nested_span)?;
            return Ok(Node::If {
                cond: Box::new(cond),
                then,
                els: vec![nested],
                span,
            });
        }
        let els = if self.match_kind(&TokenKind::KwElse) {
            self.parse_stmts_until(&[TokenKind::KwEnd])?
        } else {
            Vec::new()
        };
        self.expect(&TokenKind::KwEnd, "'end'")?;
        Ok(Node::If {
            cond: Box::new(cond),
            then,
            els,
            span,
        })
    }

    fn parse_while(&mut self, span: Span, is_until: bool) -> Result<Node, Error> {
        self.advance();
        let cond = self.parse_expr()?;
        if !self.match_kind(&TokenKind::KwDo) {
            self.skip_terms();
        }
        let body = self.parse_stmts_until(&[TokenKind::KwEnd])?;
        self.expect(&TokenKind::KwEnd, "'end'")?;
        let cond = if is_until {
            Node::UnExpr {
                op: UnOp::Not,
                operand: Box::new(cond),
                span,
            }
        } else {
            cond
        };
        Ok(Node::While {
            cond: Box::new(cond),
            body,
            span,
        })
    }

    /// `for x in e .. end` lowers to `e.each { |x| .. }`.
    fn parse_for(&mut self, span: Span) -> Result<Node, Error> {
        self.advance();
        let mut params = Vec::new();
        loop {
            let tok = self.advance();
            let name = match tok.kind {
                TokenKind::Ident(name) => name,
                _ => return Err(self.err_at(tok.span, "expected loop variable")),
            };
            params.push(Param {
                name,
                default: None,
                splat: false,
                block: false,
            });
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::KwIn, "'in'")?;
        let iter = self.parse_expr()?;
        if !self.match_kind(&TokenKind::KwDo) {
            self.skip_terms();
        }
        let body = self.parse_stmts_until(&[TokenKind::KwEnd])?;
        self.expect(&TokenKind::KwEnd, "'end'")?;
        Ok(Node::Call {
            recv: Some(Box::new(iter)),
            name: "each".to_string(),
            args: Vec::new(),
            block: Some(Box::new(BlockDef { params, body, span })),
            block_arg: None,
            safe: false,
            span,
        })
    }

    /// `case`/`when` lowers to an `if` chain. The subject is evaluated once
    /// into a hidden temporary whose name no source identifier can collide
    /// with; the first comparison embeds the assignment.
    fn parse_case(&mut self, span: Span) -> Result<Node, Error> {
        self.advance();
        let subject = if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.skip_terms();

        let mut whens: Vec<(Vec<Node>, Vec<Node>)> = Vec::new();
        while self.check(&TokenKind::KwWhen) {
            self.advance();
            let mut conds = vec![self.parse_ternary()?];
            while self.match_kind(&TokenKind::Comma) {
                self.skip_newlines();
                conds.push(self.parse_ternary()?);
            }
            if !self.match_kind(&TokenKind::KwThen) {
                self.skip_terms();
            }
            let body = self.parse_stmts_until(&[
                TokenKind::KwWhen,
                TokenKind::KwElse,
                TokenKind::KwEnd,
            ])?;
            whens.push((conds, body));
        }
        if whens.is_empty() {
            return Err(self.err_at(span, "case needs at least one when clause"));
        }
        let mut els = if self.match_kind(&TokenKind::KwElse) {
            self.parse_stmts_until(&[TokenKind::KwEnd])?
        } else {
            Vec::new()
        };
        self.expect(&TokenKind::KwEnd, "'end'")?;

        let temp = subject.as_ref().map(|_| {
            let name = format!("%case{}", self.case_counter);
            self.case_counter += 1;
            name
        });

        for (i, (conds, body)) in whens.into_iter().enumerate().rev() {
            let mut cond_expr: Option<Node> = None;
            for (j, test) in conds.into_iter().enumerate() {
                let test_span = test.span();
                let one = match (&subject, &temp) {
                    (Some(subj), Some(temp)) => {
                        let lhs = if i == 0 && j == 0 {
                            Node::Assign {
                                name: temp.clone(),
                                value: Box::new(subj.clone()),
                                span: test_span,
                            }
                        } else {
                            Node::Ident(temp.clone(), test_span)
                        };
                        Node::BinExpr {
                            op: BinOp::Eq,
                            lhs: Box::new(lhs),
                            rhs: Box::new(test),
                            span: test_span,
                        }
                    }
                    _ => test,
                };
                cond_expr = Some(match cond_expr {
                    None => one,
                    Some(prev) => Node::BinExpr {
                        op: BinOp::Or,
                        lhs: Box::new(prev),
                        rhs: Box::new(one),
                        span: test_span,
                    },
                });
            }
            els = vec![Node::If {
                cond: Box::new(cond_expr.ok_or_else(|| self.err_at(span, "empty when clause"))?),
                then: body,
                els,
                span,
            }];
        }
        Ok(els.pop().ok_or_else(|| self.err_at(span, "malformed case"))?)
    }

    fn parse_begin(&mut self, span: Span) -> Result<Node, Error> {
        self.advance();
        let body = self.parse_stmts_until(&[
            TokenKind::KwRescue,
            TokenKind::KwEnsure,
            TokenKind::KwEnd,
        ])?;
        let rescue = if self.match_kind(&TokenKind::KwRescue) {
            let var = if self.match_kind(&TokenKind::FatArrow) {
                let tok = self.advance();
                match tok.kind {
                    TokenKind::Ident(name) => Some(name),
                    _ => return Err(self.err_at(tok.span, "expected rescue variable")),
                }
            } else {
                None
            };
            let body = self.parse_stmts_until(&[TokenKind::KwEnsure, TokenKind::KwEnd])?;
            Some(RescueClause { var, body })
        } else {
            None
        };
        let ensure = if self.match_kind(&TokenKind::KwEnsure) {
            Some(self.parse_stmts_until(&[TokenKind::KwEnd])?)
        } else {
            None
        };
        self.expect(&TokenKind::KwEnd, "'end'")?;
        Ok(Node::Begin {
            body,
            rescue,
            ensure,
            span,
        })
    }

    fn parse_def(&mut self, span: Span) -> Result<Node, Error> {
        self.advance();
        // `def self.name` / `def Const.name` define singleton methods
        let recv = if matches!(
            (self.peek_kind(), self.peek2_kind()),
            (TokenKind::KwSelf | TokenKind::ConstName(_), TokenKind::Dot)
        ) {
            let recv_span = self.here();
            let tok = self.advance();
            self.advance(); // dot
            Some(Box::new(match tok.kind {
                TokenKind::KwSelf => Node::SelfExpr(recv_span),
                TokenKind::ConstName(name) => Node::ConstRef(name, recv_span),
                _ => unreachable!(),
            }))
        } else {
            None
        };
        let name = self.parse_def_name()?;
        let params = if self.match_kind(&TokenKind::LParen) {
            let params = self.parse_def_params(&TokenKind::RParen)?;
            self.expect(&TokenKind::RParen, "')'")?;
            params
        } else if matches!(
            self.peek_kind(),
            TokenKind::Ident(_) | TokenKind::Star | TokenKind::Amp
        ) {
            self.parse_def_params(&TokenKind::Newline)?
        } else {
            Vec::new()
        };
        let body = self.parse_stmts_until(&[TokenKind::KwEnd])?;
        self.expect(&TokenKind::KwEnd, "'end'")?;
        Ok(Node::Def {
            name,
            recv,
            params,
            body,
            span,
        })
    }

    /// A definable method name: identifier (with optional `=` for setters)
    /// or an operator.
    fn parse_def_name(&mut self) -> Result<String, Error> {
        let tok = self.advance();
        Ok(match tok.kind {
            TokenKind::Ident(mut name) => {
                if self.check(&TokenKind::Assign) {
                    self.advance();
                    name.push('=');
                }
                name
            }
            TokenKind::LBracket => {
                self.expect(&TokenKind::RBracket, "']'")?;
                if self.match_kind(&TokenKind::Assign) {
                    "[]=".to_string()
                } else {
                    "[]".to_string()
                }
            }
            TokenKind::Plus => "+".to_string(),
            TokenKind::Minus => "-".to_string(),
            TokenKind::Star => "*".to_string(),
            TokenKind::Slash => "/".to_string(),
            TokenKind::Percent => "%".to_string(),
            TokenKind::EqEq => "==".to_string(),
            TokenKind::Lt => "<".to_string(),
            TokenKind::Le => "<=".to_string(),
            TokenKind::Gt => ">".to_string(),
            TokenKind::Ge => ">=".to_string(),
            TokenKind::Shl => "<<".to_string(),
            TokenKind::Shr => ">>".to_string(),
            _ => return Err(self.err_at(tok.span, "expected method name")),
        })
    }

    /// Parameter list for `def` and lambdas: positional, `name = default`,
    /// `*splat`, `&block`.
    fn parse_def_params(&mut self, ender: &TokenKind) -> Result<Vec<Param>, Error> {
        let mut params = Vec::new();
        self.skip_newlines();
        if self.check(ender) {
            return Ok(params);
        }
        loop {
            if self.match_kind(&TokenKind::Star) {
                let tok = self.advance();
                let name = match tok.kind {
                    TokenKind::Ident(name) => name,
                    _ => return Err(self.err_at(tok.span, "expected parameter name after '*'")),
                };
                params.push(Param {
                    name,
                    default: None,
                    splat: true,
                    block: false,
                });
            } else if self.match_kind(&TokenKind::Amp) {
                let tok = self.advance();
                let name = match tok.kind {
                    TokenKind::Ident(name) => name,
                    _ => return Err(self.err_at(tok.span, "expected parameter name after '&'")),
                };
                params.push(Param {
                    name,
                    default: None,
                    splat: false,
                    block: true,
                });
            } else {
                let tok = self.advance();
                let name = match tok.kind {
                    TokenKind::Ident(name) => name,
                    _ => return Err(self.err_at(tok.span, "expected parameter name")),
                };
                let default = if self.match_kind(&TokenKind::Assign) {
                    Some(self.parse_ternary()?)
                } else {
                    None
                };
                params.push(Param {
                    name,
                    default,
                    splat: false,
                    block: false,
                });
            }
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        Ok(params)
    }

    fn parse_class(&mut self, span: Span) -> Result<Node, Error> {
        self.advance();
        let tok = self.advance();
        let name = match tok.kind {
            TokenKind::ConstName(name) => name,
            _ => return Err(self.err_at(tok.span, "expected class name")),
        };
        let superclass = if self.match_kind(&TokenKind::Lt) {
            let tok = self.advance();
            match tok.kind {
                TokenKind::ConstName(name) => Some(name),
                _ => return Err(self.err_at(tok.span, "expected superclass name")),
            }
        } else {
            None
        };
        let body = self.parse_stmts_until(&[TokenKind::KwEnd])?;
        self.expect(&TokenKind::KwEnd, "'end'")?;
        Ok(Node::ClassDef {
            name,
            superclass,
            body,
            span,
        })
    }

    fn parse_module(&mut self, span: Span) -> Result<Node, Error> {
        self.advance();
        let tok = self.advance();
        let name = match tok.kind {
            TokenKind::ConstName(name) => name,
            _ => return Err(self.err_at(tok.span, "expected module name")),
        };
        let body = self.parse_stmts_until(&[TokenKind::KwEnd])?;
        self.expect(&TokenKind::KwEnd, "'end'")?;
        Ok(Node::ModuleDef { name, body, span })
    }

    fn parse_alias(&mut self, span: Span) -> Result<Node, Error> {
        self.advance();
        let new = self.parse_alias_name()?;
        let old = self.parse_alias_name()?;
        Ok(Node::Alias { new, old, span })
    }

    fn parse_alias_name(&mut self) -> Result<String, Error> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Ident(name) | TokenKind::Sym(name) => Ok(name),
            _ => Err(self.err_at(tok.span, "expected method name in alias")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;

    fn parse(source: &str) -> Program {
        let tokens = Lexer::new("test.rb", source).scan_tokens().unwrap();
        Parser::new("test.rb", tokens).parse_program().unwrap()
    }

    fn parse_err(source: &str) -> Error {
        let tokens = Lexer::new("test.rb", source).scan_tokens().unwrap();
        Parser::new("test.rb", tokens).parse_program().unwrap_err()
    }

    fn one(source: &str) -> Node {
        let mut program = parse(source);
        assert_eq!(program.body.len(), 1, "expected one statement");
        program.body.pop().unwrap()
    }

    #[test]
    fn test_assignment() {
        match one("x = 1 + 2") {
            Node::Assign { name, value, .. } => {
                assert_eq!(name, "x");
                assert!(matches!(*value, Node::BinExpr { op: BinOp::Add, .. }));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        match one("1 + 2 * 3") {
            Node::BinExpr { op: BinOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Node::BinExpr { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_command_call() {
        match one("puts \"hi\", 42") {
            Node::Call { recv, name, args, .. } => {
                assert!(recv.is_none());
                assert_eq!(name, "puts");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_method_call_with_block() {
        match one("3.times { |i| puts i }") {
            Node::Call { recv, name, block, .. } => {
                assert!(recv.is_some());
                assert_eq!(name, "times");
                let block = block.unwrap();
                assert_eq!(block.params.len(), 1);
                assert_eq!(block.params[0].name, "i");
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_safe_navigation() {
        match one("a&.b") {
            Node::Call { safe, name, .. } => {
                assert!(safe);
                assert_eq!(name, "b");
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_attribute_write_desugar() {
        match one("p.name = \"x\"") {
            Node::Call { name, args, .. } => {
                assert_eq!(name, "name=");
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_op_assign_desugar() {
        match one("x += 1") {
            Node::Assign { name, value, .. } => {
                assert_eq!(name, "x");
                assert!(matches!(*value, Node::BinExpr { op: BinOp::Add, .. }));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_or_assign_desugar() {
        match one("x ||= 5") {
            Node::Assign { value, .. } => {
                assert!(matches!(*value, Node::BinExpr { op: BinOp::Or, .. }));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_multi_assign() {
        match one("a, b = b, a") {
            Node::MultiAssign { targets, values, .. } => {
                assert_eq!(targets.len(), 2);
                assert_eq!(values.len(), 2);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_unless_swaps_branches() {
        match one("unless x\n 1\n else\n 2\n end") {
            Node::If { then, els, .. } => {
                assert!(matches!(then[0], Node::Int(2, _)));
                assert!(matches!(els[0], Node::Int(1, _)));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_elsif_chain() {
        match one("if a\n1\nelsif b\n2\nelse\n3\nend") {
            Node::If { els, .. } => match &els[0] {
                Node::If { els: inner, .. } => assert!(matches!(inner[0], Node::Int(3, _))),
                other => panic!("unexpected node {:?}", other),
            },
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_until_negates() {
        match one("until done\n step\n end") {
            Node::While { cond, .. } => {
                assert!(matches!(*cond, Node::UnExpr { op: UnOp::Not, .. }));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_statement_modifier() {
        match one("return 1 if x") {
            Node::If { then, .. } => {
                assert!(matches!(then[0], Node::Return(Some(_), _)));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_for_desugars_to_each() {
        match one("for i in 1..3\n puts i\n end") {
            Node::Call { name, recv, block, .. } => {
                assert_eq!(name, "each");
                assert!(matches!(**recv.as_ref().unwrap(), Node::RangeLit { .. }));
                assert_eq!(block.unwrap().params[0].name, "i");
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_case_desugars_to_if_chain() {
        let node = one("case n\n when 1, 2 then \"low\"\n else \"high\"\n end");
        match node {
            Node::If { cond, .. } => match *cond {
                // first test embeds the one-shot subject assignment
                Node::BinExpr { op: BinOp::Or, lhs, .. } => match *lhs {
                    Node::BinExpr { op: BinOp::Eq, lhs, .. } => {
                        assert!(matches!(*lhs, Node::Assign { .. }));
                    }
                    other => panic!("unexpected node {:?}", other),
                },
                other => panic!("unexpected node {:?}", other),
            },
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_begin_rescue_ensure() {
        match one("begin\n work\n rescue => e\n puts e\n ensure\n done\n end") {
            Node::Begin { rescue, ensure, .. } => {
                assert_eq!(rescue.unwrap().var.as_deref(), Some("e"));
                assert!(ensure.is_some());
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_def_with_defaults_and_splat() {
        match one("def f(a, b = 2, *rest, &blk)\n end") {
            Node::Def { name, params, .. } => {
                assert_eq!(name, "f");
                assert_eq!(params.len(), 4);
                assert!(params[1].default.is_some());
                assert!(params[2].splat);
                assert!(params[3].block);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_singleton_def() {
        match one("def self.build\n end") {
            Node::Def { recv, .. } => assert!(matches!(*recv.unwrap(), Node::SelfExpr(_))),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_operator_def() {
        match one("def ==(other)\n end") {
            Node::Def { name, .. } => assert_eq!(name, "=="),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_class_with_superclass() {
        match one("class Dog < Animal\n end") {
            Node::ClassDef { name, superclass, .. } => {
                assert_eq!(name, "Dog");
                assert_eq!(superclass.as_deref(), Some("Animal"));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_bare_super_vs_called_super() {
        assert!(matches!(one("super"), Node::Super { args: None, .. }));
        match one("super(1)") {
            Node::Super { args: Some(args), .. } => assert_eq!(args.len(), 1),
            other => panic!("unexpected node {:?}", other),
        }
        assert!(matches!(
            one("super()"),
            Node::Super { args: Some(ref a), .. } if a.is_empty()
        ));
    }

    #[test]
    fn test_interpolated_string() {
        match one("\"x=#{s}-#{n}\"") {
            Node::InterpStr(parts, _) => assert_eq!(parts.len(), 4),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_hash_literal_both_key_forms() {
        match one("{ \"a\" => 1, b: 2 }") {
            Node::HashLit(pairs, _) => {
                assert_eq!(pairs.len(), 2);
                assert!(matches!(pairs[1].0, Node::Sym(_, _)));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_block_pass_argument() {
        match one("xs.map(&:name)") {
            Node::Call { block_arg, .. } => {
                assert!(matches!(*block_arg.unwrap(), Node::Sym(_, _)));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_ternary_and_range() {
        assert!(matches!(one("a ? 1 : 2"), Node::Ternary { .. }));
        assert!(matches!(
            one("1...5"),
            Node::RangeLit { exclusive: true, .. }
        ));
    }

    #[test]
    fn test_lambda() {
        match one("->(a, b) { a + b }") {
            Node::Lambda { params, body, .. } => {
                assert_eq!(params.len(), 2);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_alias_forms() {
        match one("alias fetch get") {
            Node::Alias { new, old, .. } => {
                assert_eq!(new, "fetch");
                assert_eq!(old, "get");
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse_err("if x\n 1\n");
        assert_eq!(err.kind, crate::error::ErrorKind::Parse);
        assert_eq!(err.file, "test.rb");
    }

    #[test]
    fn test_index_assignment() {
        assert!(matches!(one("a[0] = 9"), Node::IndexAssign { .. }));
    }

    #[test]
    fn test_keyword_logic_is_lowest() {
        // `x = 1 and y` parses as (x = 1) and y
        match one("x = 1 and y") {
            Node::BinExpr { op: BinOp::And, lhs, .. } => {
                assert!(matches!(*lhs, Node::Assign { .. }));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }
}
