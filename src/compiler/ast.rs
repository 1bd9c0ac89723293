use crate::compiler::lexer::Span;

/// A parsed program: a statement list.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub body: Vec<Node>,
}

/// Parameter of a `def` or block: name, optional default expression, and
/// whether it is the splat (`*rest`) or block (`&blk`) parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Node>,
    pub splat: bool,
    pub block: bool,
}

/// A block literal attached to a call (`{ |a| .. }` or `do .. end`).
#[derive(Debug, Clone)]
pub struct BlockDef {
    pub params: Vec<Param>,
    pub body: Vec<Node>,
    pub span: Span,
}

/// A rescue clause. `var` is the `rescue => e` binding; the raised message
/// string is bound to it.
#[derive(Debug, Clone)]
pub struct RescueClause {
    pub var: Option<String>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,    // short-circuit &&
    Or,     // short-circuit ||
    BitAnd, // &
    BitOr,  // |
    BitXor, // ^
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
    Pos,
    BitNot,
}

/// AST nodes. The parser desugars `unless`, `until`, `case/when`, `for/in`,
/// statement modifiers, and op-assign, so the compiler only ever sees this
/// core set.
#[derive(Debug, Clone)]
pub enum Node {
    Nil(Span),
    True(Span),
    False(Span),
    Int(i64, Span),
    Float(f64, Span),
    Str(String, Span),
    Sym(String, Span),
    SelfExpr(Span),
    /// Alternating literal-string and expression parts
    InterpStr(Vec<Node>, Span),
    ArrayLit(Vec<Node>, Span),
    HashLit(Vec<(Node, Node)>, Span),
    RangeLit {
        start: Box<Node>,
        end: Box<Node>,
        exclusive: bool,
        span: Span,
    },

    /// Lowercase identifier in value position: local read or implicit call
    Ident(String, Span),
    /// Uppercase constant; constants live in the global table
    ConstRef(String, Span),
    Ivar(String, Span),
    Cvar(String, Span),
    Gvar(String, Span),

    Assign {
        name: String,
        value: Box<Node>,
        span: Span,
    },
    IvarAssign {
        name: String,
        value: Box<Node>,
        span: Span,
    },
    CvarAssign {
        name: String,
        value: Box<Node>,
        span: Span,
    },
    GvarAssign {
        name: String,
        value: Box<Node>,
        span: Span,
    },
    IndexAssign {
        recv: Box<Node>,
        index: Box<Node>,
        value: Box<Node>,
        span: Span,
    },
    MultiAssign {
        targets: Vec<Node>,
        values: Vec<Node>,
        span: Span,
    },

    BinExpr {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
        span: Span,
    },
    UnExpr {
        op: UnOp,
        operand: Box<Node>,
        span: Span,
    },
    Ternary {
        cond: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
        span: Span,
    },

    Index {
        recv: Box<Node>,
        index: Box<Node>,
        safe: bool,
        span: Span,
    },
    /// Method or function call. `recv` is `None` for bare `foo(...)` calls.
    /// `block_arg` is a `&expr` pass-through (a proc value, or a symbol for
    /// symbol-to-proc dispatch); mutually exclusive with `block`.
    Call {
        recv: Option<Box<Node>>,
        name: String,
        args: Vec<Node>,
        block: Option<Box<BlockDef>>,
        block_arg: Option<Box<Node>>,
        safe: bool,
        span: Span,
    },
    Lambda {
        params: Vec<Param>,
        body: Vec<Node>,
        span: Span,
    },

    If {
        cond: Box<Node>,
        then: Vec<Node>,
        els: Vec<Node>,
        span: Span,
    },
    While {
        cond: Box<Node>,
        body: Vec<Node>,
        span: Span,
    },
    Begin {
        body: Vec<Node>,
        rescue: Option<RescueClause>,
        ensure: Option<Vec<Node>>,
        span: Span,
    },

    Def {
        name: String,
        recv: Option<Box<Node>>,
        params: Vec<Param>,
        body: Vec<Node>,
        span: Span,
    },
    ClassDef {
        name: String,
        superclass: Option<String>,
        body: Vec<Node>,
        span: Span,
    },
    ModuleDef {
        name: String,
        body: Vec<Node>,
        span: Span,
    },
    Alias {
        new: String,
        old: String,
        span: Span,
    },

    Return(Option<Box<Node>>, Span),
    Break(Option<Box<Node>>, Span),
    Next(Option<Box<Node>>, Span),
    Redo(Span),
    Retry(Span),
    Yield(Vec<Node>, Span),
    /// `super` — `args: None` means bare super, which re-passes the current
    /// method's parameters
    Super {
        args: Option<Vec<Node>>,
        span: Span,
    },
    Raise(Option<Box<Node>>, Span),
    Require(Box<Node>, Span),
    Load(Box<Node>, Span),
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Nil(s)
            | Node::True(s)
            | Node::False(s)
            | Node::Int(_, s)
            | Node::Float(_, s)
            | Node::Str(_, s)
            | Node::Sym(_, s)
            | Node::SelfExpr(s)
            | Node::InterpStr(_, s)
            | Node::ArrayLit(_, s)
            | Node::HashLit(_, s)
            | Node::Ident(_, s)
            | Node::ConstRef(_, s)
            | Node::Ivar(_, s)
            | Node::Cvar(_, s)
            | Node::Gvar(_, s)
            | Node::Return(_, s)
            | Node::Break(_, s)
            | Node::Next(_, s)
            | Node::Redo(s)
            | Node::Retry(s)
            | Node::Yield(_, s)
            | Node::Raise(_, s)
            | Node::Require(_, s)
            | Node::Load(_, s) => *s,
            Node::RangeLit { span, .. }
            | Node::Assign { span, .. }
            | Node::IvarAssign { span, .. }
            | Node::CvarAssign { span, .. }
            | Node::GvarAssign { span, .. }
            | Node::IndexAssign { span, .. }
            | Node::MultiAssign { span, .. }
            | Node::BinExpr { span, .. }
            | Node::UnExpr { span, .. }
            | Node::Ternary { span, .. }
            | Node::Index { span, .. }
            | Node::Call { span, .. }
            | Node::Lambda { span, .. }
            | Node::If { span, .. }
            | Node::While { span, .. }
            | Node::Begin { span, .. }
            | Node::Def { span, .. }
            | Node::ClassDef { span, .. }
            | Node::ModuleDef { span, .. }
            | Node::Alias { span, .. }
            | Node::Super { span, .. } => *span,
        }
    }
}
