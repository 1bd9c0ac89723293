//! AST to bytecode.
//!
//! Each `def` body, block, lambda, and parameter default compiles into its
//! own chunk; class and module bodies compile inline into the enclosing
//! chunk bracketed by register save/restore. Every expression leaves exactly
//! one value; statement position pops it, keeping the last value of a body
//! as the body's value.

use std::rc::Rc;

use crate::compiler::ast::{BinOp, Node, Param, Program, UnOp};
use crate::error::Error;
use crate::vm::{Chunk, Const, Interner, Op, ProcDef, SymId};

/// What kind of chunk is being emitted; governs `break`/`next` and where
/// `def` binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    Main,
    Method,
    Block,
}

struct LoopCtx {
    /// Condition re-check, the target of `next`
    start: usize,
    /// First body instruction, the target of `redo`
    body_start: usize,
    /// `Jump` indices to patch to the loop exit
    breaks: Vec<usize>,
}

struct FnCtx {
    chunk: Chunk,
    kind: ChunkKind,
    /// Nesting depth of class/module bodies; `def` becomes a method when
    /// positive
    class_depth: u32,
    loops: Vec<LoopCtx>,
    /// Parameter names of the enclosing method, for bare `super`
    method_params: Vec<String>,
    line: u32,
}

impl FnCtx {
    fn new(file: Rc<str>, kind: ChunkKind, method_params: Vec<String>) -> Self {
        Self {
            chunk: Chunk::new(file),
            kind,
            class_depth: 0,
            loops: Vec::new(),
            method_params,
            line: 0,
        }
    }

    fn emit(&mut self, op: Op) -> usize {
        self.chunk.ops.push(op);
        self.chunk.lines.push(self.line);
        self.chunk.ops.len() - 1
    }

    fn here(&self) -> usize {
        self.chunk.ops.len()
    }

    /// Point a previously emitted jump at the current instruction.
    fn patch_to_here(&mut self, at: usize) {
        let target = self.chunk.ops.len() as u32;
        match &mut self.chunk.ops[at] {
            Op::Jump(t) | Op::JumpIfFalse(t) | Op::SetEnsure(t) => *t = target,
            Op::Try { rescue } => *rescue = Some(target),
            _ => unreachable!("patch target is not a jump"),
        }
    }
}

pub struct Compiler<'a> {
    syms: &'a mut Interner,
    file: Rc<str>,
}

impl<'a> Compiler<'a> {
    pub fn new(filename: &str, syms: &'a mut Interner) -> Self {
        Self {
            syms,
            file: Rc::from(filename),
        }
    }

    pub fn compile(&mut self, program: &Program) -> Result<Chunk, Error> {
        let mut ctx = FnCtx::new(self.file.clone(), ChunkKind::Main, Vec::new());
        self.compile_body(&mut ctx, &program.body, true)?;
        ctx.emit(Op::Ret);
        Ok(ctx.chunk)
    }

    // ---- constants ----

    fn konst(&mut self, ctx: &mut FnCtx, c: Const) -> u32 {
        // symbols are deduplicated; other constants are cheap enough to repeat
        if let Const::Sym(id) = c {
            for (i, existing) in ctx.chunk.consts.iter().enumerate() {
                if matches!(existing, Const::Sym(e) if *e == id) {
                    return i as u32;
                }
            }
        }
        ctx.chunk.consts.push(c);
        (ctx.chunk.consts.len() - 1) as u32
    }

    fn sym_const(&mut self, ctx: &mut FnCtx, name: &str) -> u32 {
        let id = self.syms.intern(name);
        self.konst(ctx, Const::Sym(id))
    }

    fn err(&self, node: &Node, message: &str) -> Error {
        let span = node.span();
        Error::parse(message, &self.file, span.line, span.column)
    }

    // ---- statement lists ----

    fn compile_body(&mut self, ctx: &mut FnCtx, stmts: &[Node], keep: bool) -> Result<(), Error> {
        if stmts.is_empty() {
            if keep {
                let idx = self.konst(ctx, Const::Nil);
                ctx.emit(Op::Const(idx));
            }
            return Ok(());
        }
        let last = stmts.len() - 1;
        for (i, stmt) in stmts.iter().enumerate() {
            self.compile_node(ctx, stmt)?;
            if !(keep && i == last) {
                ctx.emit(Op::Pop);
            }
        }
        Ok(())
    }

    // ---- expressions ----

    fn compile_node(&mut self, ctx: &mut FnCtx, node: &Node) -> Result<(), Error> {
        ctx.line = node.span().line;
        match node {
            Node::Nil(_) => {
                let idx = self.konst(ctx, Const::Nil);
                ctx.emit(Op::Const(idx));
            }
            Node::True(_) => {
                let idx = self.konst(ctx, Const::True);
                ctx.emit(Op::Const(idx));
            }
            Node::False(_) => {
                let idx = self.konst(ctx, Const::False);
                ctx.emit(Op::Const(idx));
            }
            Node::Int(v, _) => {
                let idx = self.konst(ctx, Const::Int(*v));
                ctx.emit(Op::Const(idx));
            }
            Node::Float(v, _) => {
                let idx = self.konst(ctx, Const::Float(*v));
                ctx.emit(Op::Const(idx));
            }
            Node::Str(s, _) => {
                let idx = self.konst(ctx, Const::Str(s.clone()));
                ctx.emit(Op::Const(idx));
            }
            Node::Sym(s, _) => {
                let idx = self.sym_const(ctx, s);
                ctx.emit(Op::Const(idx));
            }
            Node::SelfExpr(_) => {
                ctx.emit(Op::GetSelf);
            }
            Node::InterpStr(parts, _) => {
                if parts.is_empty() {
                    let idx = self.konst(ctx, Const::Str(String::new()));
                    ctx.emit(Op::Const(idx));
                } else {
                    for part in parts {
                        self.compile_node(ctx, part)?;
                    }
                    ctx.emit(Op::Concat(parts.len() as u16));
                }
            }
            Node::ArrayLit(elems, _) => {
                for elem in elems {
                    self.compile_node(ctx, elem)?;
                }
                ctx.emit(Op::MakeArray(elems.len() as u16));
            }
            Node::HashLit(pairs, _) => {
                for (k, v) in pairs {
                    self.compile_node(ctx, k)?;
                    self.compile_node(ctx, v)?;
                }
                ctx.emit(Op::MakeHash(pairs.len() as u16));
            }
            Node::RangeLit {
                start,
                end,
                exclusive,
                ..
            } => {
                self.compile_node(ctx, start)?;
                self.compile_node(ctx, end)?;
                ctx.emit(Op::MakeRange {
                    exclusive: *exclusive,
                });
            }

            Node::Ident(name, _) | Node::ConstRef(name, _) => {
                let idx = self.sym_const(ctx, name);
                ctx.emit(Op::GetGlobal(idx));
            }
            Node::Ivar(name, _) => {
                let idx = self.sym_const(ctx, name);
                ctx.emit(Op::GetIvar(idx));
            }
            Node::Cvar(name, _) => {
                let idx = self.sym_const(ctx, name);
                ctx.emit(Op::GetCvar(idx));
            }
            Node::Gvar(name, _) => {
                let idx = self.sym_const(ctx, &format!("${}", name));
                ctx.emit(Op::GetGlobal(idx));
            }

            Node::Assign { name, value, .. } => {
                self.compile_node(ctx, value)?;
                let idx = self.sym_const(ctx, name);
                ctx.emit(Op::SetGlobal(idx));
            }
            Node::IvarAssign { name, value, .. } => {
                self.compile_node(ctx, value)?;
                let idx = self.sym_const(ctx, name);
                ctx.emit(Op::SetIvar(idx));
            }
            Node::CvarAssign { name, value, .. } => {
                self.compile_node(ctx, value)?;
                let idx = self.sym_const(ctx, name);
                ctx.emit(Op::SetCvar(idx));
            }
            Node::GvarAssign { name, value, .. } => {
                self.compile_node(ctx, value)?;
                let idx = self.sym_const(ctx, &format!("${}", name));
                ctx.emit(Op::SetGlobal(idx));
            }
            Node::IndexAssign {
                recv, index, value, ..
            } => {
                self.compile_node(ctx, recv)?;
                self.compile_node(ctx, index)?;
                self.compile_node(ctx, value)?;
                ctx.emit(Op::SetIndex);
            }
            Node::MultiAssign {
                targets, values, ..
            } => self.compile_multi_assign(ctx, node, targets, values)?,

            Node::BinExpr { op, lhs, rhs, .. } => match op {
                BinOp::And => {
                    self.compile_node(ctx, lhs)?;
                    ctx.emit(Op::Dup);
                    let out = ctx.emit(Op::JumpIfFalse(0));
                    ctx.emit(Op::Pop);
                    self.compile_node(ctx, rhs)?;
                    ctx.patch_to_here(out);
                }
                BinOp::Or => {
                    self.compile_node(ctx, lhs)?;
                    ctx.emit(Op::Dup);
                    let take_rhs = ctx.emit(Op::JumpIfFalse(0));
                    let out = ctx.emit(Op::Jump(0));
                    ctx.patch_to_here(take_rhs);
                    ctx.emit(Op::Pop);
                    self.compile_node(ctx, rhs)?;
                    ctx.patch_to_here(out);
                }
                BinOp::Ne => {
                    self.compile_node(ctx, lhs)?;
                    self.compile_node(ctx, rhs)?;
                    ctx.emit(Op::Eq);
                    ctx.emit(Op::Not);
                }
                _ => {
                    self.compile_node(ctx, lhs)?;
                    self.compile_node(ctx, rhs)?;
                    ctx.emit(Self::bin_op(*op));
                }
            },
            Node::UnExpr { op, operand, .. } => {
                self.compile_node(ctx, operand)?;
                match op {
                    UnOp::Not => {
                        ctx.emit(Op::Not);
                    }
                    UnOp::Neg => {
                        ctx.emit(Op::Neg);
                    }
                    UnOp::Pos => {}
                    UnOp::BitNot => {
                        // ~x == -x - 1 in two's complement
                        ctx.emit(Op::Neg);
                        let one = self.konst(ctx, Const::Int(1));
                        ctx.emit(Op::Const(one));
                        ctx.emit(Op::Sub);
                    }
                }
            }
            Node::Ternary {
                cond, then, els, ..
            } => {
                self.compile_node(ctx, cond)?;
                let to_else = ctx.emit(Op::JumpIfFalse(0));
                self.compile_node(ctx, then)?;
                let out = ctx.emit(Op::Jump(0));
                ctx.patch_to_here(to_else);
                self.compile_node(ctx, els)?;
                ctx.patch_to_here(out);
            }

            Node::Index {
                recv, index, safe, ..
            } => {
                self.compile_node(ctx, recv)?;
                self.compile_node(ctx, index)?;
                ctx.emit(if *safe { Op::SafeIndex } else { Op::GetIndex });
            }
            Node::Call {
                recv,
                name,
                args,
                block,
                block_arg,
                safe,
                ..
            } => {
                if args.len() > u8::MAX as usize {
                    return Err(self.err(node, "too many arguments"));
                }
                if let Some(recv) = recv {
                    self.compile_node(ctx, recv)?;
                }
                for arg in args {
                    self.compile_node(ctx, arg)?;
                }
                if let Some(block) = block {
                    let def = self.compile_proc(
                        None,
                        &block.params,
                        &block.body,
                        ChunkKind::Block,
                        false,
                        ctx,
                    )?;
                    let idx = self.konst(ctx, Const::Proc(def));
                    ctx.emit(Op::SetBlock(idx));
                } else if let Some(block_arg) = block_arg {
                    self.compile_node(ctx, block_arg)?;
                    ctx.emit(Op::SetBlockVal);
                }
                let name_idx = self.sym_const(ctx, name);
                let argc = args.len() as u8;
                if *safe {
                    ctx.emit(Op::SafeCall {
                        argc,
                        name: name_idx,
                    });
                } else {
                    ctx.emit(Op::Call {
                        argc,
                        name: name_idx,
                        has_recv: recv.is_some(),
                    });
                }
            }
            Node::Lambda { params, body, .. } => {
                let def = self.compile_proc(None, params, body, ChunkKind::Block, true, ctx)?;
                let idx = self.konst(ctx, Const::Proc(def));
                ctx.emit(Op::Const(idx));
            }

            Node::If {
                cond, then, els, ..
            } => {
                self.compile_node(ctx, cond)?;
                let to_else = ctx.emit(Op::JumpIfFalse(0));
                self.compile_body(ctx, then, true)?;
                let out = ctx.emit(Op::Jump(0));
                ctx.patch_to_here(to_else);
                self.compile_body(ctx, els, true)?;
                ctx.patch_to_here(out);
            }
            Node::While { cond, body, .. } => {
                let start = ctx.here();
                self.compile_node(ctx, cond)?;
                let done = ctx.emit(Op::JumpIfFalse(0));
                let body_start = ctx.here();
                ctx.loops.push(LoopCtx {
                    start,
                    body_start,
                    breaks: Vec::new(),
                });
                self.compile_body(ctx, body, false)?;
                let jump_back = ctx.emit(Op::Jump(0));
                ctx.chunk.ops[jump_back] = Op::Jump(start as u32);
                ctx.patch_to_here(done);
                let nil = self.konst(ctx, Const::Nil);
                ctx.emit(Op::Const(nil));
                let finished = ctx.loops.pop().unwrap_or_else(|| unreachable!());
                for at in finished.breaks {
                    ctx.patch_to_here(at);
                }
            }
            Node::Begin {
                body,
                rescue,
                ensure,
                ..
            } => self.compile_begin(ctx, body, rescue.as_ref(), ensure.as_deref())?,

            Node::Def {
                name,
                recv,
                params,
                body,
                ..
            } => {
                let def = self.compile_proc(
                    Some(name.clone()),
                    params,
                    body,
                    ChunkKind::Method,
                    true,
                    ctx,
                )?;
                let proc_idx = self.konst(ctx, Const::Proc(def));
                let name_idx = self.sym_const(ctx, name);
                match recv {
                    Some(recv) => {
                        self.compile_node(ctx, recv)?;
                        ctx.emit(Op::Const(proc_idx));
                        ctx.emit(Op::DefSingleton(name_idx));
                    }
                    None if ctx.class_depth > 0 => {
                        ctx.emit(Op::Const(proc_idx));
                        ctx.emit(Op::DefMethod(name_idx));
                    }
                    None => {
                        // top-level def is a global function
                        ctx.emit(Op::Const(proc_idx));
                        ctx.emit(Op::SetGlobal(name_idx));
                    }
                }
            }
            Node::ClassDef {
                name,
                superclass,
                body,
                ..
            } => {
                let name_idx = self.sym_const(ctx, name);
                let super_idx = match superclass {
                    Some(s) => Some(self.sym_const(ctx, s)),
                    None => None,
                };
                ctx.emit(Op::GetClassReg);
                ctx.emit(Op::GetSelf);
                ctx.emit(Op::MakeClass {
                    name: name_idx,
                    superclass: super_idx,
                });
                ctx.emit(Op::Dup);
                ctx.emit(Op::SetClassReg);
                ctx.emit(Op::SetSelf);
                ctx.class_depth += 1;
                self.compile_body(ctx, body, false)?;
                ctx.class_depth -= 1;
                ctx.emit(Op::SetSelf);
                ctx.emit(Op::SetClassReg);
                let nil = self.konst(ctx, Const::Nil);
                ctx.emit(Op::Const(nil));
            }
            Node::ModuleDef { name, body, .. } => {
                let name_idx = self.sym_const(ctx, name);
                ctx.emit(Op::GetClassReg);
                ctx.emit(Op::GetSelf);
                ctx.emit(Op::MakeModule { name: name_idx });
                ctx.emit(Op::Dup);
                ctx.emit(Op::SetClassReg);
                ctx.emit(Op::SetSelf);
                ctx.class_depth += 1;
                self.compile_body(ctx, body, false)?;
                ctx.class_depth -= 1;
                ctx.emit(Op::SetSelf);
                ctx.emit(Op::SetClassReg);
                let nil = self.konst(ctx, Const::Nil);
                ctx.emit(Op::Const(nil));
            }
            Node::Alias { new, old, .. } => {
                let new_idx = self.sym_const(ctx, new);
                let old_idx = self.sym_const(ctx, old);
                ctx.emit(Op::Const(new_idx));
                ctx.emit(Op::Const(old_idx));
                let name_idx = self.sym_const(ctx, "alias_method");
                ctx.emit(Op::Call {
                    argc: 2,
                    name: name_idx,
                    has_recv: false,
                });
            }

            Node::Return(value, _) => {
                self.compile_opt_value(ctx, value.as_deref())?;
                ctx.emit(Op::Ret);
            }
            Node::Break(value, _) => {
                self.compile_opt_value(ctx, value.as_deref())?;
                if ctx.loops.is_empty() {
                    if ctx.kind != ChunkKind::Block {
                        return Err(self.err(node, "break outside of loop or block"));
                    }
                    ctx.emit(Op::Break);
                } else {
                    let at = ctx.emit(Op::Jump(0));
                    if let Some(l) = ctx.loops.last_mut() {
                        l.breaks.push(at);
                    }
                }
            }
            Node::Next(value, _) => {
                self.compile_opt_value(ctx, value.as_deref())?;
                if let Some(start) = ctx.loops.last().map(|l| l.start) {
                    // the loop discards statement values itself
                    ctx.emit(Op::Pop);
                    ctx.emit(Op::Jump(start as u32));
                } else if ctx.kind == ChunkKind::Block {
                    ctx.emit(Op::Ret);
                } else {
                    return Err(self.err(node, "next outside of loop or block"));
                }
            }
            Node::Redo(_) => {
                if let Some(l) = ctx.loops.last() {
                    ctx.emit(Op::Jump(l.body_start as u32));
                } else if ctx.kind == ChunkKind::Block {
                    ctx.emit(Op::Jump(0));
                } else {
                    return Err(self.err(node, "redo outside of loop or block"));
                }
                // unreachable value slot for expression position
                let nil = self.konst(ctx, Const::Nil);
                ctx.emit(Op::Const(nil));
            }
            Node::Retry(_) => {
                ctx.emit(Op::Retry);
                let nil = self.konst(ctx, Const::Nil);
                ctx.emit(Op::Const(nil));
            }
            Node::Yield(args, _) => {
                if args.len() > u8::MAX as usize {
                    return Err(self.err(node, "too many arguments"));
                }
                for arg in args {
                    self.compile_node(ctx, arg)?;
                }
                ctx.emit(Op::Yield(args.len() as u8));
            }
            Node::Super { args, .. } => {
                let argc = match args {
                    Some(args) => {
                        for arg in args {
                            self.compile_node(ctx, arg)?;
                        }
                        args.len()
                    }
                    None => {
                        // bare super re-passes the current parameter values
                        let params = ctx.method_params.clone();
                        for p in &params {
                            let idx = self.sym_const(ctx, p);
                            ctx.emit(Op::GetGlobal(idx));
                        }
                        params.len()
                    }
                };
                if argc > u8::MAX as usize {
                    return Err(self.err(node, "too many arguments"));
                }
                let name_idx = self.sym_const(ctx, "super");
                ctx.emit(Op::Call {
                    argc: argc as u8,
                    name: name_idx,
                    has_recv: false,
                });
            }
            Node::Raise(value, _) => {
                match value {
                    Some(v) => {
                        self.compile_node(ctx, v)?;
                        ctx.emit(Op::Throw);
                    }
                    None => {
                        ctx.emit(Op::Reraise);
                    }
                }
                // both ops unwind; the slot below keeps the stack shape honest
                let nil = self.konst(ctx, Const::Nil);
                ctx.emit(Op::Const(nil));
            }
            Node::Require(path, _) => {
                self.compile_node(ctx, path)?;
                let name_idx = self.sym_const(ctx, "require");
                ctx.emit(Op::Call {
                    argc: 1,
                    name: name_idx,
                    has_recv: false,
                });
            }
            Node::Load(path, _) => {
                self.compile_node(ctx, path)?;
                let name_idx = self.sym_const(ctx, "load");
                ctx.emit(Op::Call {
                    argc: 1,
                    name: name_idx,
                    has_recv: false,
                });
            }
        }
        Ok(())
    }

    fn bin_op(op: BinOp) -> Op {
        match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::Mod => Op::Mod,
            BinOp::Eq => Op::Eq,
            BinOp::Lt => Op::Lt,
            BinOp::Le => Op::Lte,
            BinOp::Gt => Op::Gt,
            BinOp::Ge => Op::Gte,
            BinOp::BitAnd => Op::And,
            BinOp::BitOr => Op::Or,
            BinOp::BitXor => Op::Xor,
            BinOp::Shl => Op::Shl,
            BinOp::Shr => Op::Shr,
            BinOp::And | BinOp::Or | BinOp::Ne => {
                unreachable!("handled before the table")
            }
        }
    }

    fn compile_opt_value(&mut self, ctx: &mut FnCtx, value: Option<&Node>) -> Result<(), Error> {
        match value {
            Some(v) => self.compile_node(ctx, v),
            None => {
                let nil = self.konst(ctx, Const::Nil);
                ctx.emit(Op::Const(nil));
                Ok(())
            }
        }
    }

    fn compile_multi_assign(
        &mut self,
        ctx: &mut FnCtx,
        node: &Node,
        targets: &[Node],
        values: &[Node],
    ) -> Result<(), Error> {
        for v in values {
            self.compile_node(ctx, v)?;
        }
        if targets.len() > u8::MAX as usize || values.len() > u8::MAX as usize {
            return Err(self.err(node, "too many assignment targets"));
        }
        ctx.emit(Op::MultiUnpack {
            want: targets.len() as u8,
            have: values.len() as u8,
        });
        // values lie left-to-right with the last target's value on top
        for target in targets.iter().rev() {
            match target {
                Node::Ident(name, _) | Node::ConstRef(name, _) => {
                    let idx = self.sym_const(ctx, name);
                    ctx.emit(Op::SetGlobal(idx));
                }
                Node::Ivar(name, _) => {
                    let idx = self.sym_const(ctx, name);
                    ctx.emit(Op::SetIvar(idx));
                }
                Node::Cvar(name, _) => {
                    let idx = self.sym_const(ctx, name);
                    ctx.emit(Op::SetCvar(idx));
                }
                Node::Gvar(name, _) => {
                    let idx = self.sym_const(ctx, &format!("${}", name));
                    ctx.emit(Op::SetGlobal(idx));
                }
                other => {
                    return Err(self.err(other, "unsupported multiple-assignment target"));
                }
            }
            ctx.emit(Op::Pop);
        }
        let nil = self.konst(ctx, Const::Nil);
        ctx.emit(Op::Const(nil));
        Ok(())
    }

    fn compile_begin(
        &mut self,
        ctx: &mut FnCtx,
        body: &[Node],
        rescue: Option<&crate::compiler::ast::RescueClause>,
        ensure: Option<&[Node]>,
    ) -> Result<(), Error> {
        let try_at = ctx.emit(Op::Try { rescue: None });
        let set_ensure_at = ensure.map(|_| ctx.emit(Op::SetEnsure(0)));

        self.compile_body(ctx, body, true)?;
        let body_done = ctx.emit(Op::Jump(0));

        if let Some(clause) = rescue {
            // the VM enters here with the raised message string pushed
            ctx.patch_to_here(try_at);
            match &clause.var {
                Some(var) => {
                    let idx = self.sym_const(ctx, var);
                    ctx.emit(Op::SetGlobal(idx));
                    ctx.emit(Op::Pop);
                }
                None => {
                    ctx.emit(Op::Pop);
                }
            }
            self.compile_body(ctx, &clause.body, true)?;
        }
        let rescue_done = rescue.map(|_| ctx.emit(Op::Jump(0)));

        // ensure entry; also reached directly by the unwinder
        if let Some(at) = set_ensure_at {
            ctx.patch_to_here(at);
        }
        ctx.patch_to_here(body_done);
        if let Some(at) = rescue_done {
            ctx.patch_to_here(at);
        }
        ctx.emit(Op::EnterEnsure);
        if let Some(ensure_body) = ensure {
            self.compile_body(ctx, ensure_body, false)?;
        }
        ctx.emit(Op::EndTry);
        Ok(())
    }

    /// Compile a `def` body, block, or lambda into a shared procedure
    /// definition. Methods and lambdas declare their own locals; blocks share
    /// the enclosing frame's, so `own_locals` is false and their assignments
    /// were already collected into the enclosing definition.
    fn compile_proc(
        &mut self,
        name: Option<String>,
        params: &[Param],
        body: &[Node],
        kind: ChunkKind,
        own_locals: bool,
        enclosing: &FnCtx,
    ) -> Result<Rc<ProcDef>, Error> {
        let mut param_ids = Vec::new();
        let mut param_names = Vec::new();
        let mut splat = None;
        let mut block_param = None;
        let mut defaults = Vec::new();

        for param in params {
            if param.block {
                block_param = Some(self.syms.intern(&param.name));
                continue;
            }
            if param.splat {
                splat = Some(param_ids.len());
            }
            param_ids.push(self.syms.intern(&param.name));
            param_names.push(param.name.clone());
            defaults.push(match &param.default {
                Some(expr) => {
                    let mut dctx =
                        FnCtx::new(self.file.clone(), kind, enclosing.method_params.clone());
                    self.compile_node(&mut dctx, expr)?;
                    dctx.emit(Op::Ret);
                    Some(Rc::new(dctx.chunk))
                }
                None => None,
            });
        }

        let mut local_names = Vec::new();
        if own_locals {
            collect_locals(body, &mut local_names);
        }
        let locals: Vec<SymId> = local_names
            .iter()
            .filter(|n| !param_names.iter().any(|p| p == *n))
            .map(|n| self.syms.intern(n))
            .collect();

        let method_params = if kind == ChunkKind::Method {
            param_names
        } else {
            enclosing.method_params.clone()
        };
        let mut ctx = FnCtx::new(self.file.clone(), kind, method_params);
        self.compile_body(&mut ctx, body, true)?;
        ctx.emit(Op::Ret);

        Ok(Rc::new(ProcDef {
            name,
            params: param_ids,
            splat,
            block_param,
            defaults,
            chunk: Rc::new(ctx.chunk),
            locals,
        }))
    }
}

/// Collect names assigned anywhere in a body: those are the frame's declared
/// locals, saved and cleared on entry. Nested blocks share the frame so
/// their assignments and parameters count; nested `def`, class and module
/// bodies, and lambdas get their own frames and do not.
fn collect_locals(nodes: &[Node], out: &mut Vec<String>) {
    for node in nodes {
        collect_locals_node(node, out);
    }
}

fn push_local(name: &str, out: &mut Vec<String>) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

fn collect_locals_node(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::Assign { name, value, .. } => {
            push_local(name, out);
            collect_locals_node(value, out);
        }
        Node::IvarAssign { value, .. }
        | Node::CvarAssign { value, .. }
        | Node::GvarAssign { value, .. } => collect_locals_node(value, out),
        Node::IndexAssign {
            recv, index, value, ..
        } => {
            collect_locals_node(recv, out);
            collect_locals_node(index, out);
            collect_locals_node(value, out);
        }
        Node::MultiAssign {
            targets, values, ..
        } => {
            for t in targets {
                if let Node::Ident(name, _) | Node::ConstRef(name, _) = t {
                    push_local(name, out);
                } else {
                    collect_locals_node(t, out);
                }
            }
            collect_locals(values, out);
        }
        Node::InterpStr(parts, _) => collect_locals(parts, out),
        Node::ArrayLit(elems, _) => collect_locals(elems, out),
        Node::HashLit(pairs, _) => {
            for (k, v) in pairs {
                collect_locals_node(k, out);
                collect_locals_node(v, out);
            }
        }
        Node::RangeLit { start, end, .. } => {
            collect_locals_node(start, out);
            collect_locals_node(end, out);
        }
        Node::BinExpr { lhs, rhs, .. } => {
            collect_locals_node(lhs, out);
            collect_locals_node(rhs, out);
        }
        Node::UnExpr { operand, .. } => collect_locals_node(operand, out),
        Node::Ternary {
            cond, then, els, ..
        } => {
            collect_locals_node(cond, out);
            collect_locals_node(then, out);
            collect_locals_node(els, out);
        }
        Node::Index { recv, index, .. } => {
            collect_locals_node(recv, out);
            collect_locals_node(index, out);
        }
        Node::Call {
            recv,
            args,
            block,
            block_arg,
            ..
        } => {
            if let Some(recv) = recv {
                collect_locals_node(recv, out);
            }
            collect_locals(args, out);
            if let Some(block) = block {
                for p in &block.params {
                    push_local(&p.name, out);
                }
                collect_locals(&block.body, out);
            }
            if let Some(block_arg) = block_arg {
                collect_locals_node(block_arg, out);
            }
        }
        Node::If {
            cond, then, els, ..
        } => {
            collect_locals_node(cond, out);
            collect_locals(then, out);
            collect_locals(els, out);
        }
        Node::While { cond, body, .. } => {
            collect_locals_node(cond, out);
            collect_locals(body, out);
        }
        Node::Begin {
            body,
            rescue,
            ensure,
            ..
        } => {
            collect_locals(body, out);
            if let Some(clause) = rescue {
                if let Some(var) = &clause.var {
                    push_local(var, out);
                }
                collect_locals(&clause.body, out);
            }
            if let Some(ensure) = ensure {
                collect_locals(ensure, out);
            }
        }
        Node::Return(v, _) | Node::Break(v, _) | Node::Next(v, _) | Node::Raise(v, _) => {
            if let Some(v) = v {
                collect_locals_node(v, out);
            }
        }
        Node::Yield(args, _) => collect_locals(args, out),
        Node::Super {
            args: Some(args), ..
        } => collect_locals(args, out),
        Node::Require(path, _) | Node::Load(path, _) => collect_locals_node(path, out),
        // new frames: their assignments are their own locals
        Node::Def { .. } | Node::ClassDef { .. } | Node::ModuleDef { .. } | Node::Lambda { .. } => {}
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::Parser;

    fn compile(source: &str) -> (Chunk, Interner) {
        let mut syms = Interner::new();
        let tokens = Lexer::new("test.rb", source).scan_tokens().unwrap();
        let program = Parser::new("test.rb", tokens).parse_program().unwrap();
        let chunk = Compiler::new("test.rb", &mut syms).compile(&program).unwrap();
        (chunk, syms)
    }

    fn proc_consts(chunk: &Chunk) -> Vec<Rc<ProcDef>> {
        let mut out = Vec::new();
        for c in &chunk.consts {
            if let Const::Proc(p) = c {
                out.push(p.clone());
                out.extend(proc_consts(&p.chunk));
            }
        }
        out
    }

    #[test]
    fn test_statement_values_popped_except_last() {
        let (chunk, _) = compile("1\n2");
        assert_eq!(
            chunk.ops,
            vec![Op::Const(0), Op::Pop, Op::Const(1), Op::Ret]
        );
    }

    #[test]
    fn test_binary_expression() {
        let (chunk, _) = compile("1 + 2 * 3");
        assert_eq!(
            chunk.ops,
            vec![
                Op::Const(0),
                Op::Const(1),
                Op::Const(2),
                Op::Mul,
                Op::Add,
                Op::Ret
            ]
        );
    }

    #[test]
    fn test_short_circuit_and() {
        let (chunk, _) = compile("a && b");
        assert!(chunk.ops.contains(&Op::Dup));
        assert!(chunk
            .ops
            .iter()
            .any(|op| matches!(op, Op::JumpIfFalse(_))));
        assert!(!chunk.ops.contains(&Op::And));
    }

    #[test]
    fn test_top_level_def_is_global() {
        let (chunk, _) = compile("def f\n 1\n end");
        assert!(chunk.ops.iter().any(|op| matches!(op, Op::SetGlobal(_))));
        assert!(!chunk.ops.iter().any(|op| matches!(op, Op::DefMethod(_))));
    }

    #[test]
    fn test_def_in_class_is_method() {
        let (chunk, _) = compile("class A\n def f\n 1\n end\n end");
        assert!(chunk.ops.iter().any(|op| matches!(op, Op::DefMethod(_))));
        assert!(chunk
            .ops
            .iter()
            .any(|op| matches!(op, Op::MakeClass { .. })));
    }

    #[test]
    fn test_singleton_def() {
        let (chunk, _) = compile("class A\n def self.make\n end\n end");
        assert!(chunk
            .ops
            .iter()
            .any(|op| matches!(op, Op::DefSingleton(_))));
    }

    #[test]
    fn test_while_loop_shape() {
        let (chunk, _) = compile("while x\n y\n end");
        // jump back to the condition exists
        assert!(chunk.ops.iter().any(|op| matches!(op, Op::Jump(0))));
        assert!(chunk
            .ops
            .iter()
            .any(|op| matches!(op, Op::JumpIfFalse(_))));
    }

    #[test]
    fn test_break_in_while_jumps_past_nil() {
        let (chunk, _) = compile("while true\n break 7\n end");
        // the break jump lands after the loop's nil
        let target = chunk
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Jump(t) => Some(*t as usize),
                _ => None,
            })
            .max()
            .unwrap();
        assert_eq!(target, chunk.ops.len() - 1); // lands on Ret
    }

    #[test]
    fn test_block_compiles_to_proc_const() {
        let (chunk, _) = compile("3.times { |i| puts i }");
        let procs = proc_consts(&chunk);
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].params.len(), 1);
        assert!(chunk.ops.iter().any(|op| matches!(op, Op::SetBlock(_))));
    }

    #[test]
    fn test_method_locals_exclude_params() {
        let (chunk, syms) = compile("def f(a)\n b = a + 1\n b\n end");
        let mut syms = syms;
        let procs = proc_consts(&chunk);
        let b = syms.intern("b");
        let a = syms.intern("a");
        assert!(procs[0].locals.contains(&b));
        assert!(!procs[0].locals.contains(&a));
    }

    #[test]
    fn test_block_params_are_enclosing_locals() {
        let (chunk, syms) = compile("def f(xs)\n xs.each { |v| puts v }\n end");
        let mut syms = syms;
        let v = syms.intern("v");
        let procs = proc_consts(&chunk);
        let method = procs
            .iter()
            .find(|p| p.name.as_deref() == Some("f"))
            .unwrap();
        assert!(method.locals.contains(&v));
    }

    #[test]
    fn test_blocks_declare_no_locals_of_their_own() {
        let (chunk, _) = compile("def f(xs)\n n = 0\n xs.each { |v| n = n + v }\n n\n end");
        let procs = proc_consts(&chunk);
        let block = procs.iter().find(|p| p.name.is_none()).unwrap();
        assert!(block.locals.is_empty());
    }

    #[test]
    fn test_defaults_compile_to_chunks() {
        let (chunk, _) = compile("def f(a, b = a + 1)\n b\n end");
        let procs = proc_consts(&chunk);
        assert!(procs[0].defaults[0].is_none());
        assert!(procs[0].defaults[1].is_some());
    }

    #[test]
    fn test_splat_and_block_param() {
        let (chunk, _) = compile("def f(a, *rest, &blk)\n end");
        let procs = proc_consts(&chunk);
        assert_eq!(procs[0].splat, Some(1));
        assert!(procs[0].block_param.is_some());
        assert_eq!(procs[0].params.len(), 2);
    }

    #[test]
    fn test_begin_rescue_layout() {
        let (chunk, _) = compile("begin\n f\n rescue => e\n g\n ensure\n h\n end");
        assert!(chunk
            .ops
            .iter()
            .any(|op| matches!(op, Op::Try { rescue: Some(_) })));
        assert!(chunk.ops.iter().any(|op| matches!(op, Op::SetEnsure(_))));
        assert!(chunk.ops.contains(&Op::EnterEnsure));
        assert!(chunk.ops.contains(&Op::EndTry));
    }

    #[test]
    fn test_rescue_without_ensure_has_no_set_ensure() {
        let (chunk, _) = compile("begin\n f\n rescue\n g\n end");
        assert!(!chunk.ops.iter().any(|op| matches!(op, Op::SetEnsure(_))));
        assert!(chunk.ops.contains(&Op::EndTry));
    }

    #[test]
    fn test_raise_with_value_throws_bare_raise_rethrows() {
        let (chunk, _) = compile("begin\n raise \"boom\"\nrescue\n raise\nend");
        assert!(chunk.ops.contains(&Op::Throw));
        assert!(chunk.ops.contains(&Op::Reraise));
    }

    #[test]
    fn test_raise_nil_still_throws() {
        let (chunk, _) = compile("raise nil");
        assert!(chunk.ops.contains(&Op::Throw));
        assert!(!chunk.ops.contains(&Op::Reraise));
    }

    #[test]
    fn test_bare_super_repasses_params() {
        let (chunk, _) = compile("class B < A\n def f(x, y)\n super\n end\n end");
        let procs = proc_consts(&chunk);
        let f = procs
            .iter()
            .find(|p| p.name.as_deref() == Some("f"))
            .unwrap();
        let get_globals = f
            .chunk
            .ops
            .iter()
            .filter(|op| matches!(op, Op::GetGlobal(_)))
            .count();
        assert_eq!(get_globals, 2);
        assert!(f
            .chunk
            .ops
            .iter()
            .any(|op| matches!(op, Op::Call { argc: 2, .. })));
    }

    #[test]
    fn test_explicit_empty_super_passes_nothing() {
        let (chunk, _) = compile("class B < A\n def f(x)\n super()\n end\n end");
        let procs = proc_consts(&chunk);
        let f = procs
            .iter()
            .find(|p| p.name.as_deref() == Some("f"))
            .unwrap();
        assert!(f
            .chunk
            .ops
            .iter()
            .any(|op| matches!(op, Op::Call { argc: 0, .. })));
    }

    #[test]
    fn test_case_subject_assigned_once() {
        let (chunk, syms) = compile("case n\n when 1\n \"a\"\n when 2\n \"b\"\n end");
        let mut syms = syms;
        let temp = syms.intern("%case0");
        let temp_idx = chunk
            .consts
            .iter()
            .position(|c| matches!(c, Const::Sym(s) if *s == temp))
            .unwrap() as u32;
        let sets = chunk
            .ops
            .iter()
            .filter(|op| matches!(op, Op::SetGlobal(i) if *i == temp_idx))
            .count();
        assert_eq!(sets, 1);
    }

    #[test]
    fn test_gvar_gets_dollar_prefix() {
        let (chunk, syms) = compile("$counter = 1\n$counter");
        let mut syms = syms;
        let id = syms.intern("$counter");
        assert!(chunk
            .consts
            .iter()
            .any(|c| matches!(c, Const::Sym(s) if *s == id)));
    }

    #[test]
    fn test_interpolation_concat() {
        let (chunk, _) = compile("\"x=#{s}-3\"");
        assert!(chunk.ops.iter().any(|op| matches!(op, Op::Concat(3))));
    }

    #[test]
    fn test_multi_assign_unpack() {
        let (chunk, _) = compile("a, b = 1, 2");
        assert!(chunk
            .ops
            .iter()
            .any(|op| matches!(op, Op::MultiUnpack { want: 2, have: 2 })));
    }

    #[test]
    fn test_break_outside_loop_fails() {
        let mut syms = Interner::new();
        let tokens = Lexer::new("test.rb", "break").scan_tokens().unwrap();
        let program = Parser::new("test.rb", tokens).parse_program().unwrap();
        let err = Compiler::new("test.rb", &mut syms)
            .compile(&program)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Parse);
    }

    #[test]
    fn test_alias_lowered_to_alias_method() {
        let (chunk, syms) = compile("class A\n alias b a\n end");
        let mut syms = syms;
        let id = syms.intern("alias_method");
        assert!(chunk
            .consts
            .iter()
            .any(|c| matches!(c, Const::Sym(s) if *s == id)));
    }

    #[test]
    fn test_safe_call_op() {
        let (chunk, _) = compile("a&.b");
        assert!(chunk
            .ops
            .iter()
            .any(|op| matches!(op, Op::SafeCall { .. })));
    }

    #[test]
    fn test_lines_track_source() {
        let (chunk, _) = compile("1\n\n2");
        let line_of_second = chunk.lines[2];
        assert_eq!(line_of_second, 3);
    }
}
