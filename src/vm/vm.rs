//! The execution engine: frames, handlers, and the instruction loop.
//!
//! One [`VmState`] is one operand stack plus one frame stack. The main
//! program owns the first; each coroutine owns its own, which the
//! interpreter hoists onto its active-VM stack during `resume` and parks
//! again on yield. Method and block calls push frames onto the active VM and
//! the single flat loop keeps running, so a coroutine can suspend from any
//! call depth.
//!
//! Locals are shadowed globals: frame entry saves the previous global
//! binding of every parameter and declared local and installs the new one,
//! frame exit restores. Suspending a coroutine swaps every one of its
//! frames' bindings out of the global table (and back in on resume), so two
//! worlds never see each other's locals.

use std::collections::HashMap;
use std::rc::Rc;

use super::heap::Obj;
use super::methods::{self, Resolved, Visibility};
use super::value::{GcRef, SymId, Value};
use super::{Chunk, Const, Op, ProcDef};
use crate::error::Error;
use crate::interp::Interp;

/// Per-frame handler limit and call-depth limit.
const MAX_HANDLERS: usize = 16;
const MAX_FRAMES: usize = 4096;

/// Interpreter registers that travel with a coroutine across suspension.
#[derive(Debug, Clone)]
pub struct Regs {
    pub self_val: Value,
    pub class_reg: Value,
    pub block: Value,
    pub method_class: Option<GcRef>,
    pub method_name: Option<SymId>,
}

impl Default for Regs {
    fn default() -> Self {
        Self {
            self_val: Value::Nil,
            class_reg: Value::Nil,
            block: Value::Nil,
            method_class: None,
            method_name: None,
        }
    }
}

/// An in-flight `begin` region.
#[derive(Debug, Clone)]
pub struct Handler {
    pub rescue_ip: Option<u32>,
    pub ensure_ip: Option<u32>,
    /// Operand stack depth at `Try`; unwinding truncates to it
    pub sp: usize,
    /// First body instruction, the target of `retry`
    pub body_ip: usize,
    pub in_rescue: bool,
    pub in_ensure: bool,
    /// The error being handled by the rescue clause, for bare `raise`
    pub current: Option<Error>,
    /// An error parked while the ensure clause runs; re-raised at `EndTry`
    pub pending: Option<Error>,
}

/// One activation record.
pub struct Frame {
    pub chunk: Rc<Chunk>,
    pub ip: usize,
    /// Operand stack depth at entry
    pub base: usize,
    pub handlers: Vec<Handler>,
    /// The proc being executed, kept alive for the collector
    pub proc_ref: Option<GcRef>,
    pub is_block: bool,
    /// Saved global bindings of parameters (and the block parameter)
    pub saved_params: Vec<(SymId, Option<Value>)>,
    /// Saved global bindings of declared locals
    pub saved_locals: Vec<(SymId, Option<Value>)>,
    pub saved_self: Value,
    pub saved_block: Value,
    pub saved_class_reg: Value,
    pub saved_method_class: Option<GcRef>,
    pub saved_method_name: Option<SymId>,
    /// Forced return value; `new` uses this to make `initialize` return the
    /// instance
    pub return_override: Option<Value>,
}

/// One operand stack plus one frame stack.
#[derive(Default)]
pub struct VmState {
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    /// The resumer's registers while this VM (a coroutine's) is active, and
    /// the coroutine's own registers while it is suspended
    pub saved_regs: Regs,
}

/// Why the run loop stopped.
pub(crate) enum Signal {
    /// The entry frame returned
    Done(Value),
    /// A coroutine suspended; its frames stay on the VM
    Yielded(Value),
}

enum Flow {
    Next,
    Yielded(Value),
}

impl Interp {
    fn vm(&mut self) -> &mut VmState {
        self.vms.last_mut().expect("no active VM")
    }

    fn push(&mut self, v: Value) {
        self.vm().stack.push(v);
    }

    fn pop(&mut self) -> Value {
        self.vm().stack.pop().expect("stack underflow")
    }

    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let stack = &mut self.vm().stack;
        let at = stack.len().checked_sub(n).expect("stack underflow");
        stack.split_off(at)
    }

    fn const_at(&mut self, idx: u32) -> Const {
        let frame = self.vm().frames.last().expect("no frame");
        frame.chunk.consts[idx as usize].clone()
    }

    fn const_sym(&mut self, idx: u32) -> SymId {
        match self.const_at(idx) {
            Const::Sym(s) => s,
            other => panic!("expected symbol constant, found {:?}", other),
        }
    }

    // =========================================================================
    // The loop
    // =========================================================================

    /// Run until the frame stack shrinks back to `base_frames` (returning the
    /// final value), the active coroutine yields, or an unhandled error
    /// escapes past `base_frames`.
    pub(crate) fn run_vm(&mut self, base_frames: usize) -> Result<Signal, Error> {
        loop {
            if self.heap.wants_collect() {
                self.collect_garbage();
            }

            let (op, line, file) = {
                let frame = match self.vm().frames.last_mut() {
                    Some(f) => f,
                    None => return Ok(Signal::Done(Value::Nil)),
                };
                let op = match frame.chunk.ops.get(frame.ip) {
                    Some(op) => op.clone(),
                    None => Op::Ret, // chunks always end in Ret; belt and braces
                };
                frame.ip += 1;
                (op, frame.chunk.line_at(frame.ip - 1), frame.chunk.file.clone())
            };

            if self.debug_hook.is_some() {
                if let Some(mut hook) = self.debug_hook.take() {
                    hook(&file, line, op.name());
                    if self.debug_hook.is_none() {
                        self.debug_hook = Some(hook);
                    }
                }
            }

            match self.step(&op) {
                Ok(Flow::Next) => {
                    let vm = self.vm();
                    if vm.frames.len() == base_frames {
                        let v = vm.stack.pop().unwrap_or(Value::Nil);
                        return Ok(Signal::Done(v));
                    }
                }
                Ok(Flow::Yielded(v)) => return Ok(Signal::Yielded(v)),
                Err(e) => {
                    let e = e.with_pos(&file, line);
                    self.unwind(e, base_frames)?;
                }
            }
        }
    }

    fn step(&mut self, op: &Op) -> Result<Flow, Error> {
        match *op {
            Op::Const(idx) => {
                let c = self.const_at(idx);
                let v = self.materialize(c);
                self.push(v);
            }
            Op::Pop => {
                self.pop();
            }
            Op::Dup => {
                let v = *self.vm().stack.last().expect("stack underflow");
                self.push(v);
            }

            Op::GetGlobal(idx) => {
                let sym = self.const_sym(idx);
                match self.globals.get(&sym).copied() {
                    Some(v) => self.push(v),
                    // unset $-globals read as nil; bare names fall back to an
                    // implicit zero-argument call
                    None if self.syms.name(sym).starts_with('$') => self.push(Value::Nil),
                    None => self.op_call(0, sym, false, false)?,
                }
            }
            Op::SetGlobal(idx) => {
                let sym = self.const_sym(idx);
                let v = *self.vm().stack.last().expect("stack underflow");
                self.globals.insert(sym, v);
            }
            Op::GetIvar(idx) => {
                let sym = self.const_sym(idx);
                let v = match self.cur_self {
                    Value::Object(r) => {
                        self.heap.instance(r).ivars.get(&sym).copied().unwrap_or(Value::Nil)
                    }
                    Value::Class(r) | Value::Module(r) => {
                        self.heap.class(r).cvars.get(&sym).copied().unwrap_or(Value::Nil)
                    }
                    _ => Value::Nil,
                };
                self.push(v);
            }
            Op::SetIvar(idx) => {
                let sym = self.const_sym(idx);
                let v = *self.vm().stack.last().expect("stack underflow");
                if self.heap.is_frozen(self.cur_self) {
                    return Err(Error::runtime("can't modify frozen object"));
                }
                match self.cur_self {
                    Value::Object(r) => {
                        self.heap.instance_mut(r).ivars.insert(sym, v);
                    }
                    Value::Class(r) | Value::Module(r) => {
                        self.heap.class_mut(r).cvars.insert(sym, v);
                    }
                    other => {
                        return Err(Error::type_error(format!(
                            "can't set instance variable on {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Op::GetCvar(idx) => {
                let sym = self.const_sym(idx);
                let class = self.cvar_class()?;
                let mut cur = Some(class);
                let mut found = Value::Nil;
                while let Some(c) = cur {
                    if let Some(v) = self.heap.class(c).cvars.get(&sym) {
                        found = *v;
                        break;
                    }
                    cur = self.heap.class(c).superclass;
                }
                self.push(found);
            }
            Op::SetCvar(idx) => {
                let sym = self.const_sym(idx);
                let v = *self.vm().stack.last().expect("stack underflow");
                let class = self.cvar_class()?;
                // assign where the variable already lives, else on this class
                let mut target = class;
                let mut cur = Some(class);
                while let Some(c) = cur {
                    if self.heap.class(c).cvars.contains_key(&sym) {
                        target = c;
                        break;
                    }
                    cur = self.heap.class(c).superclass;
                }
                self.heap.class_mut(target).cvars.insert(sym, v);
            }

            Op::GetIndex => self.op_index(false)?,
            Op::SafeIndex => self.op_index(true)?,
            Op::SetIndex => self.op_set_index()?,

            Op::GetClassReg => {
                let v = self.cur_class;
                self.push(v);
            }
            Op::SetClassReg => {
                self.cur_class = self.pop();
                // each class body starts and ends with public visibility
                self.default_visibility = Visibility::Public;
            }
            Op::GetSelf => {
                let v = self.cur_self;
                self.push(v);
            }
            Op::SetSelf => {
                self.cur_self = self.pop();
            }

            Op::MakeClass { name, superclass } => self.op_make_class(name, superclass)?,
            Op::MakeModule { name } => self.op_make_module(name)?,
            Op::DefMethod(idx) => {
                let sym = self.const_sym(idx);
                let method = self.pop();
                let class = match self.cur_class {
                    Value::Class(c) | Value::Module(c) => c,
                    _ => return Err(Error::runtime("method definition outside of class")),
                };
                if let Value::Proc(p) = method {
                    self.heap.proc_mut(p).visibility = self.default_visibility;
                }
                self.heap.class_mut(class).methods.insert(sym, method);
                self.epoch += 1;
                self.push(Value::Sym(sym));
            }
            Op::DefSingleton(idx) => {
                let sym = self.const_sym(idx);
                let method = self.pop();
                let recv = self.pop();
                match recv {
                    Value::Class(c) | Value::Module(c) => {
                        self.heap.class_mut(c).singleton.insert(sym, method);
                    }
                    Value::Object(o) => {
                        self.heap.instance_mut(o).singleton.insert(sym, method);
                    }
                    other => {
                        return Err(Error::type_error(format!(
                            "can't define singleton method on {}",
                            other.type_name()
                        )))
                    }
                }
                self.epoch += 1;
                self.push(Value::Sym(sym));
            }
            Op::SetBlock(idx) => {
                let c = self.const_at(idx);
                let v = self.materialize(c);
                self.pending_block = Some(v);
            }
            Op::SetBlockVal => {
                let v = self.pop();
                self.pending_block = Some(v);
            }

            Op::Call { argc, name, has_recv } => {
                let sym = self.const_sym(name);
                self.op_call(argc, sym, has_recv, false)?;
            }
            Op::SafeCall { argc, name } => {
                let sym = self.const_sym(name);
                self.op_call(argc, sym, true, true)?;
            }
            Op::Ret => {
                let v = self.pop();
                let base = self.vm().frames.last().expect("no frame").base;
                self.vm().stack.truncate(base);
                let override_v = self.restore_frame();
                self.push(override_v.unwrap_or(v));
            }

            Op::Jump(t) => {
                self.vm().frames.last_mut().expect("no frame").ip = t as usize;
            }
            Op::JumpIfFalse(t) => {
                let cond = self.pop();
                if !cond.is_truthy() {
                    self.vm().frames.last_mut().expect("no frame").ip = t as usize;
                }
            }

            Op::Try { rescue } => {
                let sp = self.vm().stack.len();
                let frame = self.vm().frames.last_mut().expect("no frame");
                if frame.handlers.len() >= MAX_HANDLERS {
                    return Err(Error::runtime("too many nested begin blocks"));
                }
                let body_ip = frame.ip;
                frame.handlers.push(Handler {
                    rescue_ip: rescue,
                    ensure_ip: None,
                    sp,
                    body_ip,
                    in_rescue: false,
                    in_ensure: false,
                    current: None,
                    pending: None,
                });
            }
            Op::SetEnsure(t) => {
                let frame = self.vm().frames.last_mut().expect("no frame");
                if let Some(h) = frame.handlers.last_mut() {
                    h.ensure_ip = Some(t);
                }
            }
            Op::EnterEnsure => {
                let frame = self.vm().frames.last_mut().expect("no frame");
                if let Some(h) = frame.handlers.last_mut() {
                    h.in_ensure = true;
                }
            }
            Op::EndTry => {
                let frame = self.vm().frames.last_mut().expect("no frame");
                let handler = frame.handlers.pop();
                if let Some(h) = handler {
                    if let Some(pending) = h.pending {
                        return Err(pending);
                    }
                }
            }
            Op::Throw => {
                let v = self.pop();
                return Err(self.raise_value(v));
            }
            Op::Reraise => {
                return Err(self.reraise_error());
            }
            Op::Retry => {
                let frame = self.vm().frames.last_mut().expect("no frame");
                let h = frame
                    .handlers
                    .last_mut()
                    .ok_or_else(|| Error::runtime("retry outside rescue"))?;
                let sp = h.sp;
                let body_ip = h.body_ip;
                h.in_rescue = false;
                h.in_ensure = false;
                h.current = None;
                h.pending = None;
                frame.ip = body_ip;
                self.vm().stack.truncate(sp);
            }

            Op::MakeArray(n) => {
                let elems = self.pop_n(n as usize);
                let v = self.heap.alloc_array(elems);
                self.push(v);
            }
            Op::MakeHash(n) => {
                let flat = self.pop_n(n as usize * 2);
                let mut entries: Vec<(Value, Value)> = Vec::with_capacity(n as usize);
                for pair in flat.chunks(2) {
                    let (k, v) = (pair[0], pair[1]);
                    match entries.iter_mut().find(|(ek, _)| self.heap.value_eq(*ek, k)) {
                        Some(entry) => entry.1 = v,
                        None => entries.push((k, v)),
                    }
                }
                let v = self.heap.alloc_hash(entries);
                self.push(v);
            }
            Op::MakeRange { exclusive } => {
                let end = self.pop();
                let start = self.pop();
                let v = self.heap.alloc_range(start, end, exclusive);
                self.push(v);
            }

            Op::Yield(argc) => return self.op_yield(argc),
            Op::Break => return self.op_break(),
            Op::Concat(n) => {
                let parts = self.pop_n(n as usize);
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.heap.display(part, &self.syms));
                }
                let v = self.heap.alloc_str(out);
                self.push(v);
            }
            Op::MultiUnpack { want, have } => self.op_multi_unpack(want as usize, have as usize),

            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::Shl
            | Op::Shr
            | Op::Eq
            | Op::Lt
            | Op::Lte
            | Op::Gt
            | Op::Gte => self.op_binary(op)?,
            Op::Not => {
                let v = self.pop();
                self.push(Value::Bool(!v.is_truthy()));
            }
            Op::Neg => {
                let v = self.pop();
                match v {
                    Value::Int(n) => self.push(Value::Int(n.wrapping_neg())),
                    Value::Float(x) => self.push(Value::Float(-x)),
                    other => {
                        return Err(Error::type_error(format!(
                            "can't negate {}",
                            other.type_name()
                        )))
                    }
                }
            }
        }
        Ok(Flow::Next)
    }

    fn materialize(&mut self, c: Const) -> Value {
        match c {
            Const::Nil => Value::Nil,
            Const::True => Value::Bool(true),
            Const::False => Value::Bool(false),
            Const::Int(n) => Value::Int(n),
            Const::Float(x) => Value::Float(x),
            // string literals are mutable, so every evaluation is a fresh heap string
            Const::Str(s) => self.heap.alloc_str(s),
            Const::Sym(s) => Value::Sym(s),
            Const::Proc(def) => self.heap.alloc_proc(def, Visibility::Public),
        }
    }

    fn cvar_class(&self) -> Result<GcRef, Error> {
        if let Some(c) = self.cur_method_class {
            return Ok(c);
        }
        match self.cur_class {
            Value::Class(c) | Value::Module(c) => Ok(c),
            _ => Err(Error::runtime("class variable access outside of class")),
        }
    }

    // =========================================================================
    // Errors
    // =========================================================================

    fn raise_value(&mut self, v: Value) -> Error {
        if v == Value::Nil {
            // `raise nil` has no message to carry, unlike bare `raise`
            return Error::runtime("raise");
        }
        Error::runtime(self.heap.display(v, &self.syms))
    }

    /// Bare `raise` rethrows the error the innermost rescue is handling.
    fn reraise_error(&self) -> Error {
        let vm = self.vms.last().expect("no active VM");
        for frame in vm.frames.iter().rev() {
            for h in frame.handlers.iter().rev() {
                if h.in_rescue {
                    if let Some(e) = &h.current {
                        return e.clone();
                    }
                }
            }
        }
        Error::runtime("no current exception to re-raise")
    }

    /// Walk handlers innermost-first, then pop frames, looking for a rescue
    /// or a not-yet-run ensure. Frames popped on the way restore their
    /// bindings. Errors that escape `base_frames` propagate to the caller.
    fn unwind(&mut self, err: Error, base_frames: usize) -> Result<(), Error> {
        loop {
            {
                let message = err.message.clone();
                let vm = self.vms.last_mut().expect("no active VM");
                if vm.frames.len() <= base_frames {
                    return Err(err);
                }
                let frame = vm.frames.last_mut().expect("no frame");
                let mut entered = None;
                while let Some(h) = frame.handlers.last_mut() {
                    if h.rescue_ip.is_some() && !h.in_rescue {
                        h.in_rescue = true;
                        h.current = Some(err.clone());
                        let sp = h.sp;
                        frame.ip = h.rescue_ip.expect("checked above") as usize;
                        entered = Some((sp, true, message.clone()));
                        break;
                    }
                    if h.ensure_ip.is_some() && !h.in_ensure {
                        h.in_ensure = true;
                        h.pending = Some(err.clone());
                        let sp = h.sp;
                        frame.ip = h.ensure_ip.expect("checked above") as usize;
                        entered = Some((sp, false, message.clone()));
                        break;
                    }
                    frame.handlers.pop();
                }
                if let Some((sp, is_rescue, message)) = entered {
                    vm.stack.truncate(sp);
                    if is_rescue {
                        let s = self.heap.alloc_str(message);
                        self.push(s);
                    }
                    return Ok(());
                }
            }
            // no handler in this frame
            let base = self.vm().frames.last().expect("no frame").base;
            self.vm().stack.truncate(base);
            self.restore_frame();
        }
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// Pop the top frame, restoring every binding and register it shadowed.
    /// Returns the frame's forced return value, if any.
    pub(crate) fn restore_frame(&mut self) -> Option<Value> {
        let frame = self.vm().frames.pop().expect("no frame to pop");
        for (sym, old) in frame.saved_locals.iter().rev() {
            match old {
                Some(v) => self.globals.insert(*sym, *v),
                None => self.globals.remove(sym),
            };
        }
        for (sym, old) in frame.saved_params.iter().rev() {
            match old {
                Some(v) => self.globals.insert(*sym, *v),
                None => self.globals.remove(sym),
            };
        }
        self.cur_self = frame.saved_self;
        self.cur_block = frame.saved_block;
        self.cur_class = frame.saved_class_reg;
        self.cur_method_class = frame.saved_method_class;
        self.cur_method_name = frame.saved_method_name;
        frame.return_override
    }

    /// Push a frame for a compiled procedure, binding parameters into the
    /// global table and clearing declared locals.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push_frame(
        &mut self,
        proc_ref: Option<GcRef>,
        def: Rc<ProcDef>,
        args: Vec<Value>,
        block: Value,
        is_block: bool,
        new_self: Option<Value>,
        method_class: Option<GcRef>,
        method_name: Option<SymId>,
        return_override: Option<Value>,
        strict_arity: bool,
    ) -> Result<(), Error> {
        if self.vm().frames.len() >= MAX_FRAMES {
            return Err(Error::runtime("stack level too deep"));
        }
        let n = def.params.len();
        if strict_arity && def.splat.is_none() && args.len() > n {
            return Err(Error::runtime(format!(
                "wrong number of arguments (given {}, expected {})",
                args.len(),
                n
            )));
        }

        // distribute positional arguments, honoring the splat
        let mut slots: Vec<Option<Value>> = vec![None; n];
        match def.splat {
            None => {
                for (i, slot) in slots.iter_mut().enumerate() {
                    *slot = args.get(i).copied();
                }
            }
            Some(s) => {
                let after = n - s - 1;
                for (i, slot) in slots.iter_mut().enumerate().take(s) {
                    *slot = args.get(i).copied();
                }
                let take = args.len().saturating_sub(after).max(s.min(args.len()));
                let rest: Vec<Value> = args
                    .get(s.min(args.len())..take.min(args.len()))
                    .unwrap_or(&[])
                    .to_vec();
                slots[s] = Some(self.heap.alloc_array(rest));
                for j in 0..after {
                    slots[s + 1 + j] = args.get(take + j).copied();
                }
            }
        }

        // keep unbound arguments reachable while default chunks may collect
        let scratch_base = self.scratch.len();
        self.scratch.extend(slots.iter().flatten().copied());
        self.scratch.push(block);
        if let Some(v) = new_self {
            self.scratch.push(v);
        }

        let frame = Frame {
            chunk: def.chunk.clone(),
            ip: 0,
            base: self.vm().stack.len(),
            handlers: Vec::new(),
            proc_ref,
            is_block,
            saved_params: Vec::with_capacity(n + 1),
            saved_locals: Vec::with_capacity(def.locals.len()),
            saved_self: self.cur_self,
            saved_block: self.cur_block,
            saved_class_reg: self.cur_class,
            saved_method_class: self.cur_method_class,
            saved_method_name: self.cur_method_name,
            return_override,
        };
        self.vm().frames.push(frame);

        // bind parameters left to right so later defaults can see earlier ones
        let given = args.len();
        for i in 0..n {
            let sym = def.params[i];
            let value = match slots[i] {
                Some(v) => v,
                None => match &def.defaults[i] {
                    Some(chunk) => match self.run_nested_chunk(chunk.clone()) {
                        Ok(v) => v,
                        Err(e) => {
                            self.scratch.truncate(scratch_base);
                            self.abort_frame();
                            return Err(e);
                        }
                    },
                    None if strict_arity => {
                        self.scratch.truncate(scratch_base);
                        self.abort_frame();
                        return Err(Error::runtime(format!(
                            "wrong number of arguments (given {}, expected {})",
                            given, n
                        )));
                    }
                    None => Value::Nil,
                },
            };
            let old = self.globals.insert(sym, value);
            self.vm()
                .frames
                .last_mut()
                .expect("no frame")
                .saved_params
                .push((sym, old));
        }
        if let Some(bsym) = def.block_param {
            let old = self.globals.insert(bsym, block);
            self.vm()
                .frames
                .last_mut()
                .expect("no frame")
                .saved_params
                .push((bsym, old));
        }
        for &sym in &def.locals {
            let old = self.globals.remove(&sym);
            self.vm()
                .frames
                .last_mut()
                .expect("no frame")
                .saved_locals
                .push((sym, old));
        }

        if let Some(new_self) = new_self {
            self.cur_self = new_self;
        }
        self.cur_block = block;
        if !is_block {
            self.cur_method_class = method_class;
            self.cur_method_name = method_name;
        }
        self.scratch.truncate(scratch_base);
        Ok(())
    }

    /// Back out of a partially bound frame after a binding error.
    fn abort_frame(&mut self) {
        self.restore_frame();
    }

    /// Run a bare chunk to completion on the active VM; used for parameter
    /// defaults, `eval`, and `require`.
    pub(crate) fn run_nested_chunk(&mut self, chunk: Rc<Chunk>) -> Result<Value, Error> {
        let base = self.vm().frames.len();
        let frame = Frame {
            chunk,
            ip: 0,
            base: self.vm().stack.len(),
            handlers: Vec::new(),
            proc_ref: None,
            is_block: false,
            saved_params: Vec::new(),
            saved_locals: Vec::new(),
            saved_self: self.cur_self,
            saved_block: self.cur_block,
            saved_class_reg: self.cur_class,
            saved_method_class: self.cur_method_class,
            saved_method_name: self.cur_method_name,
            return_override: None,
        };
        self.vm().frames.push(frame);
        match self.run_vm(base)? {
            Signal::Done(v) => Ok(v),
            Signal::Yielded(_) => Err(Error::runtime("can't yield across this boundary")),
        }
    }

    /// Resolve a method on `recv` and run it to completion, recursively
    /// entering the loop. Drives hooks, host calls, and operator fallbacks.
    pub(crate) fn invoke_now(
        &mut self,
        recv: Value,
        name: SymId,
        args: Vec<Value>,
        block: Value,
    ) -> Result<Value, Error> {
        let res = self.resolve_on(recv, name).ok_or_else(|| {
            Error::name_error(format!(
                "undefined method '{}' for {}",
                self.syms.name(name),
                recv.type_name()
            ))
        })?;
        let depth = self.vm().frames.len();
        self.invoke_resolved(recv, name, res, args, block, false)?;
        if self.vm().frames.len() > depth {
            match self.run_vm(depth)? {
                Signal::Done(v) => Ok(v),
                Signal::Yielded(_) => Err(Error::runtime("can't yield across this boundary")),
            }
        } else {
            Ok(self.pop())
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn op_call(
        &mut self,
        argc: u8,
        name: SymId,
        has_recv: bool,
        safe: bool,
    ) -> Result<(), Error> {
        let args = self.pop_n(argc as usize);
        let block = match self.pending_block.take() {
            Some(v) => v,
            None => Value::Nil,
        };

        if !has_recv {
            if name == self.wk.super_ {
                return self.op_super(args, block);
            }
            if let Some(f) = self.natives.get(&name).cloned() {
                return self.call_native(f, args, block);
            }
            if let Some(v) = self.globals.get(&name).copied() {
                if let Value::Proc(p) = v {
                    let def = self.heap.proc_obj(p).def.clone();
                    return self.push_frame(
                        Some(p),
                        def,
                        args,
                        block,
                        false,
                        None,
                        None,
                        Some(name),
                        None,
                        true,
                    );
                }
                if args.is_empty() {
                    self.push(v);
                    return Ok(());
                }
                return Err(Error::type_error(format!(
                    "'{}' is not callable",
                    self.syms.name(name)
                )));
            }
            // implicit call on self; private methods are reachable here
            if let Some(res) = self.resolve_on(self.cur_self, name) {
                return self.invoke_resolved(self.cur_self, name, res, args, block, false);
            }
            return self.try_method_missing(self.cur_self, name, args, block, true);
        }

        let recv = self.pop();
        if safe && recv == Value::Nil {
            self.push(Value::Nil);
            return Ok(());
        }

        if let Value::Proc(p) = recv {
            if name == self.wk.call {
                let def = self.heap.proc_obj(p).def.clone();
                return self.push_frame(
                    Some(p),
                    def,
                    args,
                    block,
                    true,
                    None,
                    None,
                    None,
                    None,
                    false,
                );
            }
        }
        if let Value::Coroutine(c) = recv {
            if name == self.wk.resume {
                let v = self.resume_coroutine(c, &args)?;
                self.push(v);
                return Ok(());
            }
            if name == self.wk.alive {
                let alive = !self.heap.coroutine(c).done;
                self.push(Value::Bool(alive));
                return Ok(());
            }
        }
        if let Value::Class(c) = recv {
            if name == self.wk.new && !self.heap.class(c).is_module {
                return self.instantiate(c, args, block);
            }
        }

        match self.resolve_on(recv, name) {
            Some(res) => self.invoke_resolved(recv, name, res, args, block, true),
            None => self.try_method_missing(recv, name, args, block, false),
        }
    }

    /// The class backing a value for method resolution.
    pub(crate) fn class_of(&self, v: Value) -> GcRef {
        match v {
            Value::Nil => self.basics.nil_class,
            Value::Bool(_) => self.basics.boolean,
            Value::Int(_) => self.basics.integer,
            Value::Float(_) => self.basics.float,
            Value::Sym(_) => self.basics.symbol,
            Value::Str(_) => self.basics.string,
            Value::Array(_) => self.basics.array,
            Value::Hash(_) => self.basics.hash,
            Value::Range(_) => self.basics.range,
            Value::Proc(_) => self.basics.proc_class,
            Value::Coroutine(_) => self.basics.coroutine,
            Value::Object(r) => self.heap.instance(r).class,
            Value::Class(_) | Value::Module(_) | Value::CMethod(_) => self.basics.class_class,
        }
    }

    pub(crate) fn resolve_on(&mut self, recv: Value, name: SymId) -> Option<Resolved> {
        let epoch = self.epoch;
        match recv {
            Value::Class(c) | Value::Module(c) => {
                methods::lookup_singleton(&mut self.heap, epoch, c, name).or_else(|| {
                    methods::lookup(&mut self.heap, epoch, self.basics.class_class, name)
                })
            }
            Value::Object(o) => {
                let class = self.heap.instance(o).class;
                if let Some(m) = self.heap.instance(o).singleton.get(&name).copied() {
                    return Some(Resolved { method: m, owner: class });
                }
                methods::lookup(&mut self.heap, epoch, class, name)
            }
            other => {
                let class = self.class_of(other);
                methods::lookup(&mut self.heap, epoch, class, name)
            }
        }
    }

    fn invoke_resolved(
        &mut self,
        recv: Value,
        name: SymId,
        res: Resolved,
        args: Vec<Value>,
        block: Value,
        explicit: bool,
    ) -> Result<(), Error> {
        match res.method {
            Value::Proc(p) => {
                if explicit {
                    let vis = self.heap.proc_obj(p).visibility;
                    match vis {
                        Visibility::Private if recv != self.cur_self => {
                            return Err(Error::name_error(format!(
                                "private method '{}' called",
                                self.syms.name(name)
                            )));
                        }
                        Visibility::Protected => {
                            let caller_class = self.class_of(self.cur_self);
                            if !methods::is_descendant(&self.heap, caller_class, res.owner) {
                                return Err(Error::name_error(format!(
                                    "protected method '{}' called",
                                    self.syms.name(name)
                                )));
                            }
                        }
                        _ => {}
                    }
                }
                let def = self.heap.proc_obj(p).def.clone();
                self.push_frame(
                    Some(p),
                    def,
                    args,
                    block,
                    false,
                    Some(recv),
                    Some(res.owner),
                    Some(name),
                    None,
                    true,
                )
            }
            Value::CMethod(m) => {
                let f = self.heap.cmethod(m).func.clone();
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(recv);
                argv.extend(args);
                self.call_native(f, argv, block)
            }
            // a raw value stored in a method table acts as a constant getter
            other => {
                self.push(other);
                Ok(())
            }
        }
    }

    fn call_native(
        &mut self,
        f: crate::interp::NativeFn,
        argv: Vec<Value>,
        block: Value,
    ) -> Result<(), Error> {
        let saved = self.cur_block;
        self.cur_block = block;
        let result = f(self, &argv);
        self.cur_block = saved;
        let v = result?;
        self.push(v);
        Ok(())
    }

    fn try_method_missing(
        &mut self,
        recv: Value,
        name: SymId,
        args: Vec<Value>,
        block: Value,
        implicit: bool,
    ) -> Result<(), Error> {
        let mm = self.wk.method_missing;
        if let Some(res) = self.resolve_on(recv, mm) {
            let mut argv = Vec::with_capacity(args.len() + 1);
            argv.push(Value::Sym(name));
            argv.extend(args);
            return self.invoke_resolved(recv, mm, res, argv, block, false);
        }
        if implicit {
            Err(Error::name_error(format!(
                "undefined function or method '{}'",
                self.syms.name(name)
            )))
        } else {
            Err(Error::name_error(format!(
                "undefined method '{}' for {}",
                self.syms.name(name),
                recv.type_name()
            )))
        }
    }

    fn instantiate(&mut self, class: GcRef, args: Vec<Value>, block: Value) -> Result<(), Error> {
        let obj = Value::Object(self.heap.alloc(Obj::Object(super::heap::InstanceObj::new(class))));
        let init = self.wk.initialize;
        match methods::lookup(&mut self.heap, self.epoch, class, init) {
            Some(res) => match res.method {
                Value::Proc(p) => {
                    let def = self.heap.proc_obj(p).def.clone();
                    self.push_frame(
                        Some(p),
                        def,
                        args,
                        block,
                        false,
                        Some(obj),
                        Some(res.owner),
                        Some(init),
                        Some(obj),
                        true,
                    )
                }
                Value::CMethod(m) => {
                    let f = self.heap.cmethod(m).func.clone();
                    let mut argv = Vec::with_capacity(args.len() + 1);
                    argv.push(obj);
                    argv.extend(args);
                    let saved = self.cur_block;
                    self.cur_block = block;
                    let result = f(self, &argv);
                    self.cur_block = saved;
                    result?;
                    self.push(obj);
                    Ok(())
                }
                _ => {
                    self.push(obj);
                    Ok(())
                }
            },
            None => {
                self.push(obj);
                Ok(())
            }
        }
    }

    fn op_super(&mut self, args: Vec<Value>, block: Value) -> Result<(), Error> {
        let defining = self
            .cur_method_class
            .ok_or_else(|| Error::name_error("super called outside of method"))?;
        let name = self
            .cur_method_name
            .ok_or_else(|| Error::name_error("super called outside of method"))?;
        let res = methods::lookup_super(&self.heap, defining, name).ok_or_else(|| {
            Error::name_error(format!(
                "super: no superclass method '{}'",
                self.syms.name(name)
            ))
        })?;
        // forward the current block when none was given explicitly
        let block = if block == Value::Nil { self.cur_block } else { block };
        self.invoke_resolved(self.cur_self, name, res, args, block, false)
    }

    // =========================================================================
    // Yield, break, unpacking
    // =========================================================================

    fn op_yield(&mut self, argc: u8) -> Result<Flow, Error> {
        let args = self.pop_n(argc as usize);
        match self.cur_block {
            Value::Proc(p) => {
                let def = self.heap.proc_obj(p).def.clone();
                self.push_frame(
                    Some(p),
                    def,
                    args,
                    Value::Nil,
                    true,
                    None,
                    None,
                    None,
                    None,
                    false,
                )?;
                Ok(Flow::Next)
            }
            Value::Sym(m) => {
                // symbol-to-proc: dispatch the named method on the first value
                let recv = args.first().copied().unwrap_or(Value::Nil);
                let rest = args.get(1..).unwrap_or(&[]).to_vec();
                match self.resolve_on(recv, m) {
                    Some(res) => {
                        self.invoke_resolved(recv, m, res, rest, Value::Nil, false)?;
                        Ok(Flow::Next)
                    }
                    None => {
                        self.try_method_missing(recv, m, rest, Value::Nil, false)?;
                        Ok(Flow::Next)
                    }
                }
            }
            _ => {
                if self.vms.len() > 1 {
                    // no block: suspend the active coroutine
                    let v = match args.len() {
                        0 => Value::Nil,
                        1 => args[0],
                        _ => self.heap.alloc_array(args),
                    };
                    Ok(Flow::Yielded(v))
                } else {
                    Err(Error::runtime("no block given (yield)"))
                }
            }
        }
    }

    /// `break` in a block: pop the block frame (and any blocks directly
    /// below) plus the method frame that yielded, delivering the value there.
    fn op_break(&mut self) -> Result<Flow, Error> {
        let v = self.pop();
        loop {
            let frame = self
                .vm()
                .frames
                .last()
                .ok_or_else(|| Error::runtime("break from orphaned block"))?;
            let is_block = frame.is_block;
            let base = frame.base;
            self.vm().stack.truncate(base);
            self.restore_frame();
            if !is_block {
                self.push(v);
                return Ok(Flow::Next);
            }
        }
    }

    fn op_multi_unpack(&mut self, want: usize, have: usize) {
        if have == 1 && want > 1 {
            let v = self.pop();
            if let Value::Array(r) = v {
                let elems = self.heap.array(r).elems.clone();
                for i in 0..want {
                    let e = elems.get(i).copied().unwrap_or(Value::Nil);
                    self.push(e);
                }
            } else {
                self.push(v);
                for _ in 1..want {
                    self.push(Value::Nil);
                }
            }
            return;
        }
        if have > want {
            for _ in 0..(have - want) {
                self.pop();
            }
        } else {
            for _ in 0..(want - have) {
                self.push(Value::Nil);
            }
        }
    }

    // =========================================================================
    // Indexing and arithmetic
    // =========================================================================

    fn op_index(&mut self, safe: bool) -> Result<(), Error> {
        let index = self.pop();
        let recv = self.pop();
        if safe && recv == Value::Nil {
            self.push(Value::Nil);
            return Ok(());
        }
        match recv {
            Value::Array(r) => {
                let elems = &self.heap.array(r).elems;
                let v = array_index(elems.len(), index)
                    .and_then(|i| elems.get(i).copied())
                    .unwrap_or(Value::Nil);
                self.push(v);
            }
            Value::Hash(r) => {
                let v = self
                    .heap
                    .hash(r)
                    .position(&self.heap, index)
                    .map(|i| self.heap.hash(r).entries[i].1)
                    .unwrap_or(Value::Nil);
                self.push(v);
            }
            Value::Str(r) => {
                let s = &self.heap.str_obj(r).bytes;
                let v = array_index(s.chars().count(), index)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| c.to_string());
                let v = match v {
                    Some(s) => self.heap.alloc_str(s),
                    None => Value::Nil,
                };
                self.push(v);
            }
            Value::Object(_) => {
                let name = self.wk.index_get;
                match self.resolve_on(recv, name) {
                    Some(res) => self.invoke_resolved(recv, name, res, vec![index], Value::Nil, false)?,
                    None => {
                        return Err(Error::type_error(format!(
                            "{} can't be indexed",
                            recv.type_name()
                        )))
                    }
                }
            }
            other => {
                return Err(Error::type_error(format!(
                    "{} can't be indexed",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    fn op_set_index(&mut self) -> Result<(), Error> {
        let value = self.pop();
        let index = self.pop();
        let recv = self.pop();
        if self.heap.is_frozen(recv) {
            return Err(Error::runtime(format!(
                "can't modify frozen {}",
                recv.type_name()
            )));
        }
        match recv {
            Value::Array(r) => {
                let len = self.heap.array(r).elems.len();
                let i = match index {
                    Value::Int(i) if i >= 0 => i as usize,
                    Value::Int(i) => {
                        let adjusted = len as i64 + i;
                        if adjusted < 0 {
                            return Err(Error::runtime(format!("index {} out of range", i)));
                        }
                        adjusted as usize
                    }
                    other => {
                        return Err(Error::type_error(format!(
                            "array index must be an integer, got {}",
                            other.type_name()
                        )))
                    }
                };
                let elems = &mut self.heap.array_mut(r).elems;
                if i >= elems.len() {
                    elems.resize(i + 1, Value::Nil);
                }
                elems[i] = value;
                self.push(value);
            }
            Value::Hash(r) => {
                match self.heap.hash(r).position(&self.heap, index) {
                    Some(i) => self.heap.hash_mut(r).entries[i].1 = value,
                    None => self.heap.hash_mut(r).entries.push((index, value)),
                }
                self.push(value);
            }
            Value::Object(_) => {
                let name = self.wk.index_set;
                match self.resolve_on(recv, name) {
                    Some(res) => {
                        self.invoke_resolved(recv, name, res, vec![index, value], Value::Nil, false)?
                    }
                    None => {
                        return Err(Error::type_error(format!(
                            "{} can't be index-assigned",
                            recv.type_name()
                        )))
                    }
                }
            }
            other => {
                return Err(Error::type_error(format!(
                    "{} can't be index-assigned",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    fn op_binary(&mut self, op: &Op) -> Result<(), Error> {
        let b = self.pop();
        let a = self.pop();
        // user classes overload operators as ordinary methods
        if let Value::Object(_) = a {
            let name = self.operator_sym(op);
            match self.resolve_on(a, name) {
                Some(res) => return self.invoke_resolved(a, name, res, vec![b], Value::Nil, false),
                None => {
                    if !matches!(op, Op::Eq) {
                        return Err(Error::name_error(format!(
                            "undefined method '{}' for {}",
                            self.syms.name(name),
                            a.type_name()
                        )));
                    }
                }
            }
        }
        let v = match op {
            Op::Add => self.arith_add(a, b)?,
            Op::Sub => self.numeric(a, b, "-", |x, y| x.wrapping_sub(y), |x, y| x - y)?,
            Op::Mul => self.numeric(a, b, "*", |x, y| x.wrapping_mul(y), |x, y| x * y)?,
            Op::Div => self.arith_div(a, b)?,
            Op::Mod => self.arith_mod(a, b)?,
            Op::And => self.bitwise(a, b, "&", |x, y| x & y)?,
            Op::Or => self.bitwise(a, b, "|", |x, y| x | y)?,
            Op::Xor => self.bitwise(a, b, "^", |x, y| x ^ y)?,
            Op::Shl => self.arith_shl(a, b)?,
            Op::Shr => self.bitwise(a, b, ">>", shr_i64)?,
            Op::Eq => Value::Bool(self.heap.value_eq(a, b)),
            Op::Lt => self.compare(a, b, "<", |o| o == std::cmp::Ordering::Less)?,
            Op::Lte => self.compare(a, b, "<=", |o| o != std::cmp::Ordering::Greater)?,
            Op::Gt => self.compare(a, b, ">", |o| o == std::cmp::Ordering::Greater)?,
            Op::Gte => self.compare(a, b, ">=", |o| o != std::cmp::Ordering::Less)?,
            _ => unreachable!("not a binary op"),
        };
        self.push(v);
        Ok(())
    }

    fn operator_sym(&mut self, op: &Op) -> SymId {
        let name = match op {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::And => "&",
            Op::Or => "|",
            Op::Xor => "^",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::Eq => "==",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
            _ => unreachable!("not a binary op"),
        };
        self.syms.intern(name)
    }

    fn arith_add(&mut self, a: Value, b: Value) -> Result<Value, Error> {
        match (a, b) {
            (Value::Str(x), Value::Str(y)) => {
                let joined = format!("{}{}", self.heap.str_obj(x).bytes, self.heap.str_obj(y).bytes);
                Ok(self.heap.alloc_str(joined))
            }
            (Value::Str(x), y) => {
                let joined = format!(
                    "{}{}",
                    self.heap.str_obj(x).bytes,
                    self.heap.display(y, &self.syms)
                );
                Ok(self.heap.alloc_str(joined))
            }
            (Value::Array(x), Value::Array(y)) => {
                let mut elems = self.heap.array(x).elems.clone();
                elems.extend(self.heap.array(y).elems.iter().copied());
                Ok(self.heap.alloc_array(elems))
            }
            _ => self.numeric(a, b, "+", |x, y| x.wrapping_add(y), |x, y| x + y),
        }
    }

    /// `<<` appends on arrays and strings, shifts on integers.
    fn arith_shl(&mut self, a: Value, b: Value) -> Result<Value, Error> {
        match a {
            Value::Array(r) => {
                if self.heap.array(r).frozen {
                    return Err(Error::runtime("can't modify frozen array"));
                }
                self.heap.array_mut(r).elems.push(b);
                Ok(a)
            }
            Value::Str(r) => {
                if self.heap.str_obj(r).frozen {
                    return Err(Error::runtime("can't modify frozen string"));
                }
                let tail = self.heap.display(b, &self.syms);
                self.heap.str_mut(r).bytes.push_str(&tail);
                Ok(a)
            }
            _ => self.bitwise(a, b, "<<", shl_i64),
        }
    }

    fn arith_div(&mut self, a: Value, b: Value) -> Result<Value, Error> {
        if let (Value::Int(_), Value::Int(0)) = (a, b) {
            return Err(Error::runtime("divided by 0"));
        }
        self.numeric(a, b, "/", |x, y| x.wrapping_div(y), |x, y| x / y)
    }

    fn arith_mod(&mut self, a: Value, b: Value) -> Result<Value, Error> {
        if let (Value::Int(_), Value::Int(0)) = (a, b) {
            return Err(Error::runtime("divided by 0"));
        }
        self.numeric(a, b, "%", |x, y| x.wrapping_rem(y), |x, y| x % y)
    }

    fn numeric(
        &mut self,
        a: Value,
        b: Value,
        opname: &str,
        int_op: fn(i64, i64) -> i64,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value, Error> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(int_op(x, y))),
            (Value::Int(x), Value::Float(y)) => Ok(Value::Float(float_op(x as f64, y))),
            (Value::Float(x), Value::Int(y)) => Ok(Value::Float(float_op(x, y as f64))),
            (Value::Float(x), Value::Float(y)) => Ok(Value::Float(float_op(x, y))),
            _ => Err(Error::type_error(format!(
                "unsupported operands for '{}': {} and {}",
                opname,
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn bitwise(
        &mut self,
        a: Value,
        b: Value,
        opname: &str,
        int_op: fn(i64, i64) -> i64,
    ) -> Result<Value, Error> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(int_op(x, y))),
            (Value::Bool(x), Value::Bool(y)) => {
                let v = match opname {
                    "&" => x & y,
                    "|" => x | y,
                    "^" => x ^ y,
                    _ => {
                        return Err(Error::type_error(format!(
                            "unsupported operands for '{}': boolean and boolean",
                            opname
                        )))
                    }
                };
                Ok(Value::Bool(v))
            }
            _ => Err(Error::type_error(format!(
                "unsupported operands for '{}': {} and {}",
                opname,
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn compare(
        &mut self,
        a: Value,
        b: Value,
        opname: &str,
        accept: fn(std::cmp::Ordering) -> bool,
    ) -> Result<Value, Error> {
        match self.heap.value_cmp(a, b) {
            Some(ord) => Ok(Value::Bool(accept(ord))),
            None => Err(Error::type_error(format!(
                "can't compare {} with {} using '{}'",
                a.type_name(),
                b.type_name(),
                opname
            ))),
        }
    }

    // =========================================================================
    // Classes and modules
    // =========================================================================

    fn op_make_class(&mut self, name_idx: u32, superclass_idx: Option<u32>) -> Result<(), Error> {
        let name = self.const_sym(name_idx);
        let super_name = superclass_idx.map(|i| self.const_sym(i));

        if let Some(existing) = self.globals.get(&name).copied() {
            return match existing {
                Value::Class(c) => {
                    // reopening must not change the superclass
                    if let Some(sname) = super_name {
                        let declared = match self.globals.get(&sname).copied() {
                            Some(Value::Class(s)) => Some(s),
                            _ => None,
                        };
                        if declared != self.heap.class(c).superclass {
                            return Err(Error::type_error(format!(
                                "superclass mismatch for class {}",
                                self.syms.name(name)
                            )));
                        }
                    }
                    self.push(Value::Class(c));
                    Ok(())
                }
                other => Err(Error::type_error(format!(
                    "{} is not a class (it is a {})",
                    self.syms.name(name),
                    other.type_name()
                ))),
            };
        }

        let superclass = match super_name {
            Some(sname) => match self.globals.get(&sname).copied() {
                Some(Value::Class(s)) => s,
                Some(other) => {
                    return Err(Error::type_error(format!(
                        "superclass must be a class, got {}",
                        other.type_name()
                    )))
                }
                None => {
                    return Err(Error::name_error(format!(
                        "undefined superclass '{}'",
                        self.syms.name(sname)
                    )))
                }
            },
            None => self.basics.object,
        };

        let class = self
            .heap
            .alloc(Obj::Class(super::heap::ClassObj::new(name, Some(superclass), false)));
        self.globals.insert(name, Value::Class(class));
        self.epoch += 1;

        // notify the superclass
        let hook = self.wk.inherited;
        if let Some(res) =
            methods::lookup_singleton(&mut self.heap, self.epoch, superclass, hook)
        {
            let depth = self.vm().frames.len();
            self.invoke_resolved(Value::Class(superclass), hook, res, vec![Value::Class(class)], Value::Nil, false)?;
            if self.vm().frames.len() > depth {
                match self.run_vm(depth)? {
                    Signal::Done(_) => {}
                    Signal::Yielded(_) => {
                        return Err(Error::runtime("can't yield across this boundary"))
                    }
                }
            } else {
                self.pop();
            }
        }

        self.push(Value::Class(class));
        Ok(())
    }

    fn op_make_module(&mut self, name_idx: u32) -> Result<(), Error> {
        let name = self.const_sym(name_idx);
        if let Some(existing) = self.globals.get(&name).copied() {
            return match existing {
                Value::Module(m) => {
                    self.push(Value::Module(m));
                    Ok(())
                }
                other => Err(Error::type_error(format!(
                    "{} is not a module (it is a {})",
                    self.syms.name(name),
                    other.type_name()
                ))),
            };
        }
        let module = self
            .heap
            .alloc(Obj::Class(super::heap::ClassObj::new(name, None, true)));
        self.globals.insert(name, Value::Module(module));
        self.epoch += 1;
        self.push(Value::Module(module));
        Ok(())
    }
}

fn array_index(len: usize, index: Value) -> Option<usize> {
    match index {
        Value::Int(i) if i >= 0 => Some(i as usize),
        Value::Int(i) => {
            let adjusted = len as i64 + i;
            if adjusted < 0 {
                None
            } else {
                Some(adjusted as usize)
            }
        }
        _ => None,
    }
}

fn shl_i64(x: i64, s: i64) -> i64 {
    if !(0..64).contains(&s) {
        0
    } else {
        ((x as u64) << s) as i64
    }
}

fn shr_i64(x: i64, s: i64) -> i64 {
    if s < 0 {
        0
    } else if s >= 64 {
        if x < 0 {
            -1
        } else {
            0
        }
    } else {
        x >> s
    }
}

/// Every value reachable from an active VM, for root gathering.
pub(crate) fn vm_root_values(vm: &VmState, out: &mut Vec<Value>) {
    out.extend(vm.stack.iter().copied());
    for frame in &vm.frames {
        if let Some(p) = frame.proc_ref {
            out.push(Value::Proc(p));
        }
        for (_, v) in frame.saved_params.iter().chain(frame.saved_locals.iter()) {
            if let Some(v) = v {
                out.push(*v);
            }
        }
        out.push(frame.saved_self);
        out.push(frame.saved_block);
        out.push(frame.saved_class_reg);
        if let Some(c) = frame.saved_method_class {
            out.push(Value::Class(c));
        }
        if let Some(v) = frame.return_override {
            out.push(v);
        }
    }
    out.push(vm.saved_regs.self_val);
    out.push(vm.saved_regs.class_reg);
    out.push(vm.saved_regs.block);
    if let Some(c) = vm.saved_regs.method_class {
        out.push(Value::Class(c));
    }
}

/// Swap one global binding with a parked slot; used when a coroutine
/// suspends or resumes.
pub(crate) fn swap_binding(
    globals: &mut HashMap<SymId, Value>,
    sym: SymId,
    slot: &mut Option<Value>,
) {
    let current = globals.remove(&sym);
    if let Some(v) = slot.take() {
        globals.insert(sym, v);
    }
    *slot = current;
}
