//! Built-in functions and methods.
//!
//! Primitives that need heap access are native Rust functions. Iteration
//! protocols (`each`, `map`, `times`, ...) are defined in the language
//! itself by [`PRELUDE`], so a `yield` reached through them is an ordinary
//! VM frame chain and coroutines can suspend from inside any iterator.

use std::rc::Rc;

use crate::error::Error;
use crate::interp::Interp;
use crate::vm::{
    methods, Chunk, Const, GcRef, Op, ProcDef, SymId, Value, Visibility,
};

/// Iterators and other conveniences expressed in the language itself.
const PRELUDE: &str = r#"
class Integer
  def times
    i = 0
    while i < self
      yield i
      i += 1
    end
    self
  end

  def upto(n)
    i = self
    while i <= n
      yield i
      i += 1
    end
    self
  end

  def downto(n)
    i = self
    while i >= n
      yield i
      i -= 1
    end
    self
  end
end

class Array
  def each
    i = 0
    while i < size
      yield self[i]
      i += 1
    end
    self
  end

  def each_with_index
    i = 0
    while i < size
      yield self[i], i
      i += 1
    end
    self
  end

  def map(&blk)
    out = []
    each { |x| out.push(blk.call(x)) }
    out
  end

  def select(&blk)
    out = []
    each { |x| out.push(x) if blk.call(x) }
    out
  end

  def reject(&blk)
    out = []
    each { |x| out.push(x) unless blk.call(x) }
    out
  end

  def find(&blk)
    i = 0
    while i < size
      return self[i] if blk.call(self[i])
      i += 1
    end
    nil
  end

  def any?(&blk)
    found = false
    each { |x| found = true if blk.call(x) }
    found
  end

  def all?(&blk)
    ok = true
    each { |x| ok = false unless blk.call(x) }
    ok
  end
end

class Hash
  def each(&blk)
    ks = keys
    i = 0
    while i < ks.size
      blk.call(ks[i], self[ks[i]])
      i += 1
    end
    self
  end
end

class Range
  def each
    i = first
    if exclusive?
      while i < last
        yield i
        i += 1
      end
    else
      while i <= last
        yield i
        i += 1
      end
    end
    self
  end

  def to_a
    out = []
    each { |x| out.push(x) }
    out
  end

  def map(&blk)
    out = []
    each { |x| out.push(blk.call(x)) }
    out
  end

  def include?(x)
    if exclusive?
      x >= first && x < last
    else
      x >= first && x <= last
    end
  end
end
"#;

/// Install every built-in and run the prelude. Called once at boot.
pub(crate) fn install(it: &mut Interp) {
    install_kernel(it);
    install_object(it);
    install_string(it);
    install_numeric(it);
    install_array(it);
    install_hash(it);
    install_range(it);
    install_symbol(it);
    install_class(it);
    it.epoch += 1;
    // the prelude only uses constructs the engine itself provides
    if let Err(e) = it.eval("<prelude>", PRELUDE) {
        panic!("prelude failed to load: {}", e);
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or(Value::Nil)
}

fn want_int(v: Value, what: &str) -> Result<i64, Error> {
    v.as_int()
        .ok_or_else(|| Error::type_error(format!("{} must be an integer, got {}", what, v.type_name())))
}

fn want_str(it: &Interp, v: Value, what: &str) -> Result<String, Error> {
    match v {
        Value::Str(r) => Ok(it.heap.str_obj(r).bytes.clone()),
        other => Err(Error::type_error(format!(
            "{} must be a string, got {}",
            what,
            other.type_name()
        ))),
    }
}

fn want_sym(it: &mut Interp, v: Value, what: &str) -> Result<SymId, Error> {
    match v {
        Value::Sym(s) => Ok(s),
        Value::Str(r) => {
            let name = it.heap.str_obj(r).bytes.clone();
            Ok(it.syms.intern(&name))
        }
        other => Err(Error::type_error(format!(
            "{} must be a symbol, got {}",
            what,
            other.type_name()
        ))),
    }
}

/// The class the `cur_class` register points at, for class-body helpers like
/// `attr_reader` and `include`.
fn open_class(it: &Interp) -> Result<GcRef, Error> {
    match it.cur_class {
        Value::Class(c) | Value::Module(c) => Ok(c),
        _ => Err(Error::runtime("no class is open here")),
    }
}

fn method(
    it: &mut Interp,
    class: GcRef,
    name: &str,
    f: impl Fn(&mut Interp, &[Value]) -> Result<Value, Error> + 'static,
) {
    let sym = it.syms.intern(name);
    let m = it.heap.alloc_cmethod(name, Rc::new(f));
    it.heap.class_mut(class).methods.insert(sym, m);
}

// =============================================================================
// Kernel
// =============================================================================

fn install_kernel(it: &mut Interp) {
    it.register_function("puts", |it, args| {
        if args.is_empty() {
            println!();
        }
        for v in args {
            let text = display_for_output(it, *v)?;
            println!("{}", text);
        }
        Ok(Value::Nil)
    });

    it.register_function("print", |it, args| {
        for v in args {
            let text = display_for_output(it, *v)?;
            print!("{}", text);
        }
        Ok(Value::Nil)
    });

    it.register_function("p", |it, args| {
        for v in args {
            println!("{}", it.inspect_value(*v));
        }
        Ok(args.last().copied().unwrap_or(Value::Nil))
    });

    it.register_function("require", |it, args| {
        let name = want_str(it, arg(args, 0), "require path")?;
        it.require(&name).map(Value::Bool)
    });

    it.register_function("load", |it, args| {
        let name = want_str(it, arg(args, 0), "load path")?;
        it.load(&name)?;
        Ok(Value::Bool(true))
    });

    it.register_function("len", |it, args| match arg(args, 0) {
        Value::Str(r) => Ok(Value::Int(it.heap.str_obj(r).bytes.chars().count() as i64)),
        Value::Array(r) => Ok(Value::Int(it.heap.array(r).elems.len() as i64)),
        Value::Hash(r) => Ok(Value::Int(it.heap.hash(r).entries.len() as i64)),
        other => Err(Error::type_error(format!(
            "len does not apply to {}",
            other.type_name()
        ))),
    });

    it.register_function("load_text", |it, args| {
        let path = want_str(it, arg(args, 0), "path")?;
        Ok(match it.read_text(&path) {
            Some(text) => it.heap.alloc_str(text),
            None => Value::Nil,
        })
    });

    // `lambda { .. }` and `proc { .. }` hand the attached block back as a value
    it.register_function("lambda", |it, _args| match it.cur_block {
        Value::Nil => Err(Error::runtime("tried to create a proc without a block")),
        block => Ok(block),
    });
    it.register_function("proc", |it, _args| match it.cur_block {
        Value::Nil => Err(Error::runtime("tried to create a proc without a block")),
        block => Ok(block),
    });

    it.register_function("coroutine_new", |it, args| {
        let body = match args.first().copied() {
            Some(v) if !v.is_nil() => v,
            _ => it.cur_block,
        };
        if body.is_nil() {
            return Err(Error::runtime("coroutine_new requires a block or proc"));
        }
        it.coroutine_new(body)
    });

    it.register_function("rand", |it, args| match args.first().copied() {
        None => Ok(Value::Float((it.next_rand() >> 11) as f64 / (1u64 << 53) as f64)),
        Some(Value::Int(n)) if n > 0 => Ok(Value::Int((it.next_rand() % n as u64) as i64)),
        Some(other) => Err(Error::type_error(format!(
            "rand bound must be a positive integer, got {}",
            it.display_value(other)
        ))),
    });

    it.register_function("srand", |it, args| {
        let seed = want_int(arg(args, 0), "seed")?;
        it.seed_rng(seed as u64);
        Ok(Value::Nil)
    });

    it.register_function("sqrt", |_it, args| {
        let x = arg(args, 0)
            .as_float()
            .ok_or_else(|| Error::type_error("sqrt expects a number"))?;
        Ok(Value::Float(x.sqrt()))
    });

    it.register_function("alias_method", |it, args| {
        let new_s = want_sym(it, arg(args, 0), "alias name")?;
        let old_s = want_sym(it, arg(args, 1), "alias target")?;
        let class = open_class(it)?;
        if let Some(res) = methods::lookup(&mut it.heap, it.epoch, class, old_s) {
            it.heap.class_mut(class).methods.insert(new_s, res.method);
            it.epoch += 1;
            return Ok(Value::Sym(new_s));
        }
        if let Some(v @ Value::Proc(_)) = it.globals.get(&old_s).copied() {
            it.globals.insert(new_s, v);
            return Ok(Value::Sym(new_s));
        }
        Err(Error::name_error(format!(
            "undefined method '{}'",
            it.syms.name(old_s)
        )))
    });

    it.register_function("attr_reader", attr_reader);
    it.register_function("attr_writer", attr_writer);
    it.register_function("attr_accessor", |it, args| {
        attr_reader(it, args)?;
        attr_writer(it, args)
    });

    it.register_function("include", |it, args| {
        let class = open_class(it)?;
        for v in args {
            let m = module_ref(*v)?;
            it.heap.class_mut(class).includes.push(m);
        }
        it.epoch += 1;
        Ok(it.cur_class)
    });

    it.register_function("prepend", |it, args| {
        let class = open_class(it)?;
        for v in args {
            let m = module_ref(*v)?;
            it.heap.class_mut(class).prepends.push(m);
        }
        it.epoch += 1;
        Ok(it.cur_class)
    });

    // extend copies the module's methods into the class's singleton table
    it.register_function("extend", |it, args| {
        let class = open_class(it)?;
        for v in args {
            let m = module_ref(*v)?;
            let entries: Vec<(SymId, Value)> =
                it.heap.class(m).methods.iter().map(|(k, v)| (*k, *v)).collect();
            for (name, method) in entries {
                it.heap.class_mut(class).singleton.insert(name, method);
            }
        }
        it.epoch += 1;
        Ok(it.cur_class)
    });

    // module_function exposes named methods at the module level and makes
    // the instance copies private
    it.register_function("module_function", |it, args| {
        let class = open_class(it)?;
        for v in args {
            let s = want_sym(it, *v, "method name")?;
            let method = it.heap.class(class).methods.get(&s).copied();
            match method {
                Some(Value::Proc(p)) => {
                    let def = it.heap.proc_mut(p).def.clone();
                    let copy = it.heap.alloc_proc(def, Visibility::Public);
                    it.heap.class_mut(class).singleton.insert(s, copy);
                    it.heap.proc_mut(p).visibility = Visibility::Private;
                }
                Some(m) => {
                    it.heap.class_mut(class).singleton.insert(s, m);
                }
                None => {
                    return Err(Error::name_error(format!(
                        "undefined method '{}'",
                        it.syms.name(s)
                    )))
                }
            }
        }
        it.epoch += 1;
        Ok(args.last().copied().unwrap_or(Value::Nil))
    });

    it.register_function("private", |it, args| set_visibility(it, args, Visibility::Private));
    it.register_function("public", |it, args| set_visibility(it, args, Visibility::Public));
    it.register_function("protected", |it, args| {
        set_visibility(it, args, Visibility::Protected)
    });
}

/// Display text for `puts`/`print`. Instances go through their `to_s` so a
/// user-defined one wins over the default rendering.
fn display_for_output(it: &mut Interp, v: Value) -> Result<String, Error> {
    if let Value::Object(_) = v {
        let to_s = it.syms.intern("to_s");
        let s = it.invoke_now(v, to_s, Vec::new(), Value::Nil)?;
        return Ok(it.display_value(s));
    }
    Ok(it.display_value(v))
}

fn module_ref(v: Value) -> Result<GcRef, Error> {
    match v {
        Value::Module(m) | Value::Class(m) => Ok(m),
        other => Err(Error::type_error(format!(
            "expected a module, got {}",
            other.type_name()
        ))),
    }
}

fn set_visibility(it: &mut Interp, args: &[Value], vis: Visibility) -> Result<Value, Error> {
    if args.is_empty() {
        it.default_visibility = vis;
        return Ok(Value::Nil);
    }
    let class = open_class(it)?;
    for v in args {
        let s = want_sym(it, *v, "method name")?;
        let method = it.heap.class(class).methods.get(&s).copied();
        match method {
            Some(Value::Proc(p)) => it.heap.proc_mut(p).visibility = vis,
            Some(_) => {}
            None => {
                return Err(Error::name_error(format!(
                    "undefined method '{}'",
                    it.syms.name(s)
                )))
            }
        }
    }
    it.epoch += 1;
    Ok(args.last().copied().unwrap_or(Value::Nil))
}

/// Synthesize `def x; @x; end` for each symbol argument.
fn attr_reader(it: &mut Interp, args: &[Value]) -> Result<Value, Error> {
    let class = open_class(it)?;
    for v in args {
        let s = want_sym(it, *v, "attribute name")?;
        let name = it.syms.name(s).to_string();
        let mut chunk = Chunk::new(Rc::from("<attr>"));
        chunk.consts.push(Const::Sym(s));
        chunk.ops.push(Op::GetIvar(0));
        chunk.ops.push(Op::Ret);
        chunk.lines.extend([0, 0]);
        let def = Rc::new(ProcDef {
            name: Some(name),
            params: Vec::new(),
            splat: None,
            block_param: None,
            defaults: Vec::new(),
            chunk: Rc::new(chunk),
            locals: Vec::new(),
        });
        let m = it.heap.alloc_proc(def, Visibility::Public);
        it.heap.class_mut(class).methods.insert(s, m);
    }
    it.epoch += 1;
    Ok(Value::Nil)
}

/// Synthesize `def x=(value); @x = value; end` for each symbol argument.
fn attr_writer(it: &mut Interp, args: &[Value]) -> Result<Value, Error> {
    let class = open_class(it)?;
    for v in args {
        let s = want_sym(it, *v, "attribute name")?;
        let name = it.syms.name(s).to_string();
        let setter = it.syms.intern(&format!("{}=", name));
        let param = it.syms.intern("value");
        let mut chunk = Chunk::new(Rc::from("<attr>"));
        chunk.consts.push(Const::Sym(param));
        chunk.consts.push(Const::Sym(s));
        chunk.ops.push(Op::GetGlobal(0));
        chunk.ops.push(Op::SetIvar(1));
        chunk.ops.push(Op::Ret);
        chunk.lines.extend([0, 0, 0]);
        let def = Rc::new(ProcDef {
            name: Some(format!("{}=", name)),
            params: vec![param],
            splat: None,
            block_param: None,
            defaults: vec![None],
            chunk: Rc::new(chunk),
            locals: Vec::new(),
        });
        let m = it.heap.alloc_proc(def, Visibility::Public);
        it.heap.class_mut(class).methods.insert(setter, m);
    }
    it.epoch += 1;
    Ok(Value::Nil)
}

// =============================================================================
// Object
// =============================================================================

fn install_object(it: &mut Interp) {
    let object = it.basics.object;

    method(it, object, "class", |it, argv| {
        Ok(Value::Class(it.class_of(arg(argv, 0))))
    });

    method(it, object, "is_a?", |it, argv| {
        let target = module_ref(arg(argv, 1))?;
        let class = it.class_of(arg(argv, 0));
        Ok(Value::Bool(methods::is_descendant(&it.heap, class, target)))
    });

    method(it, object, "kind_of?", |it, argv| {
        let target = module_ref(arg(argv, 1))?;
        let class = it.class_of(arg(argv, 0));
        Ok(Value::Bool(methods::is_descendant(&it.heap, class, target)))
    });

    method(it, object, "respond_to?", |it, argv| {
        let recv = arg(argv, 0);
        let s = want_sym(it, arg(argv, 1), "method name")?;
        Ok(Value::Bool(it.resolve_on(recv, s).is_some()))
    });

    method(it, object, "send", |it, argv| {
        let recv = arg(argv, 0);
        let s = want_sym(it, arg(argv, 1), "method name")?;
        let rest = argv.get(2..).unwrap_or(&[]).to_vec();
        let block = it.cur_block;
        it.invoke_now(recv, s, rest, block)
    });

    method(it, object, "freeze", |it, argv| {
        let recv = arg(argv, 0);
        it.heap.freeze(recv);
        Ok(recv)
    });

    method(it, object, "frozen?", |it, argv| {
        Ok(Value::Bool(it.heap.is_frozen(arg(argv, 0))))
    });

    method(it, object, "nil?", |_it, argv| {
        Ok(Value::Bool(arg(argv, 0).is_nil()))
    });

    method(it, object, "to_s", |it, argv| {
        let s = it.display_value(arg(argv, 0));
        Ok(it.heap.alloc_str(s))
    });

    method(it, object, "inspect", |it, argv| {
        let s = it.inspect_value(arg(argv, 0));
        Ok(it.heap.alloc_str(s))
    });

    method(it, object, "object_id", |_it, argv| {
        let id = match arg(argv, 0) {
            Value::Nil => 0,
            Value::Bool(false) => 1,
            Value::Bool(true) => 2,
            Value::Int(n) => n,
            Value::Sym(s) => 3 + s.0 as i64,
            v => match v.gc_ref() {
                Some(r) => 1000 + r.index as i64,
                None => -1,
            },
        };
        Ok(Value::Int(id))
    });
}

// =============================================================================
// String
// =============================================================================

fn recv_string(it: &Interp, argv: &[Value]) -> Result<String, Error> {
    want_str(it, arg(argv, 0), "receiver")
}

fn install_string(it: &mut Interp) {
    let string = it.basics.string;

    method(it, string, "size", |it, argv| {
        Ok(Value::Int(recv_string(it, argv)?.chars().count() as i64))
    });
    method(it, string, "length", |it, argv| {
        Ok(Value::Int(recv_string(it, argv)?.chars().count() as i64))
    });
    method(it, string, "empty?", |it, argv| {
        Ok(Value::Bool(recv_string(it, argv)?.is_empty()))
    });

    method(it, string, "upcase", |it, argv| {
        let s = recv_string(it, argv)?.to_uppercase();
        Ok(it.heap.alloc_str(s))
    });
    method(it, string, "downcase", |it, argv| {
        let s = recv_string(it, argv)?.to_lowercase();
        Ok(it.heap.alloc_str(s))
    });
    method(it, string, "strip", |it, argv| {
        let s = recv_string(it, argv)?.trim().to_string();
        Ok(it.heap.alloc_str(s))
    });
    method(it, string, "reverse", |it, argv| {
        let s: String = recv_string(it, argv)?.chars().rev().collect();
        Ok(it.heap.alloc_str(s))
    });

    method(it, string, "to_i", |it, argv| {
        Ok(Value::Int(parse_int_prefix(&recv_string(it, argv)?)))
    });
    method(it, string, "to_f", |it, argv| {
        Ok(Value::Float(parse_float_prefix(&recv_string(it, argv)?)))
    });
    method(it, string, "to_s", |_it, argv| Ok(arg(argv, 0)));
    method(it, string, "to_sym", |it, argv| {
        let s = recv_string(it, argv)?;
        Ok(Value::Sym(it.syms.intern(&s)))
    });

    method(it, string, "include?", |it, argv| {
        let hay = recv_string(it, argv)?;
        let needle = want_str(it, arg(argv, 1), "substring")?;
        Ok(Value::Bool(hay.contains(&needle)))
    });
    method(it, string, "start_with?", |it, argv| {
        let hay = recv_string(it, argv)?;
        let prefix = want_str(it, arg(argv, 1), "prefix")?;
        Ok(Value::Bool(hay.starts_with(&prefix)))
    });
    method(it, string, "end_with?", |it, argv| {
        let hay = recv_string(it, argv)?;
        let suffix = want_str(it, arg(argv, 1), "suffix")?;
        Ok(Value::Bool(hay.ends_with(&suffix)))
    });

    method(it, string, "split", |it, argv| {
        let s = recv_string(it, argv)?;
        let parts: Vec<String> = match argv.get(1).copied() {
            None | Some(Value::Nil) => s.split_whitespace().map(str::to_string).collect(),
            Some(sep) => {
                let sep = want_str(it, sep, "separator")?;
                s.split(&sep as &str).map(str::to_string).collect()
            }
        };
        let elems: Vec<Value> = parts.into_iter().map(|p| it.heap.alloc_str(p)).collect();
        Ok(it.heap.alloc_array(elems))
    });

    method(it, string, "chars", |it, argv| {
        let s = recv_string(it, argv)?;
        let elems: Vec<Value> = s.chars().map(|c| it.heap.alloc_str(c.to_string())).collect();
        Ok(it.heap.alloc_array(elems))
    });
}

fn parse_int_prefix(s: &str) -> i64 {
    let t = s.trim_start();
    let mut end = 0;
    let bytes = t.as_bytes();
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    t[..end].parse().unwrap_or(0)
}

fn parse_float_prefix(s: &str) -> f64 {
    let t = s.trim_start();
    let mut end = 0;
    let bytes = t.as_bytes();
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    t[..end].parse().unwrap_or(0.0)
}

// =============================================================================
// Numerics
// =============================================================================

fn install_numeric(it: &mut Interp) {
    for class in [it.basics.integer, it.basics.float] {
        method(it, class, "abs", |_it, argv| match arg(argv, 0) {
            Value::Int(n) => Ok(Value::Int(n.wrapping_abs())),
            Value::Float(x) => Ok(Value::Float(x.abs())),
            other => Err(Error::type_error(format!("abs on {}", other.type_name()))),
        });
        method(it, class, "floor", |_it, argv| match arg(argv, 0) {
            Value::Int(n) => Ok(Value::Int(n)),
            Value::Float(x) => Ok(Value::Int(x.floor() as i64)),
            other => Err(Error::type_error(format!("floor on {}", other.type_name()))),
        });
        method(it, class, "ceil", |_it, argv| match arg(argv, 0) {
            Value::Int(n) => Ok(Value::Int(n)),
            Value::Float(x) => Ok(Value::Int(x.ceil() as i64)),
            other => Err(Error::type_error(format!("ceil on {}", other.type_name()))),
        });
        method(it, class, "round", |_it, argv| match arg(argv, 0) {
            Value::Int(n) => Ok(Value::Int(n)),
            Value::Float(x) => Ok(Value::Int(x.round() as i64)),
            other => Err(Error::type_error(format!("round on {}", other.type_name()))),
        });
        method(it, class, "to_i", |_it, argv| match arg(argv, 0) {
            Value::Int(n) => Ok(Value::Int(n)),
            Value::Float(x) => Ok(Value::Int(x as i64)),
            other => Err(Error::type_error(format!("to_i on {}", other.type_name()))),
        });
        method(it, class, "to_f", |_it, argv| match arg(argv, 0) {
            Value::Int(n) => Ok(Value::Float(n as f64)),
            Value::Float(x) => Ok(Value::Float(x)),
            other => Err(Error::type_error(format!("to_f on {}", other.type_name()))),
        });
        method(it, class, "zero?", |_it, argv| match arg(argv, 0) {
            Value::Int(n) => Ok(Value::Bool(n == 0)),
            Value::Float(x) => Ok(Value::Bool(x == 0.0)),
            other => Err(Error::type_error(format!("zero? on {}", other.type_name()))),
        });
    }

    let integer = it.basics.integer;
    method(it, integer, "even?", |_it, argv| {
        Ok(Value::Bool(want_int(arg(argv, 0), "receiver")? % 2 == 0))
    });
    method(it, integer, "odd?", |_it, argv| {
        Ok(Value::Bool(want_int(arg(argv, 0), "receiver")? % 2 != 0))
    });
}

// =============================================================================
// Array
// =============================================================================

fn recv_array(argv: &[Value]) -> Result<GcRef, Error> {
    match arg(argv, 0) {
        Value::Array(r) => Ok(r),
        other => Err(Error::type_error(format!(
            "receiver must be an array, got {}",
            other.type_name()
        ))),
    }
}

fn check_unfrozen(it: &Interp, v: Value) -> Result<(), Error> {
    if it.heap.is_frozen(v) {
        return Err(Error::runtime(format!(
            "can't modify frozen {}",
            v.type_name()
        )));
    }
    Ok(())
}

fn install_array(it: &mut Interp) {
    let array = it.basics.array;

    method(it, array, "size", |it, argv| {
        Ok(Value::Int(it.heap.array(recv_array(argv)?).elems.len() as i64))
    });
    method(it, array, "length", |it, argv| {
        Ok(Value::Int(it.heap.array(recv_array(argv)?).elems.len() as i64))
    });
    method(it, array, "empty?", |it, argv| {
        Ok(Value::Bool(it.heap.array(recv_array(argv)?).elems.is_empty()))
    });

    method(it, array, "push", |it, argv| {
        let recv = arg(argv, 0);
        check_unfrozen(it, recv)?;
        let r = recv_array(argv)?;
        for v in argv.get(1..).unwrap_or(&[]) {
            it.heap.array_mut(r).elems.push(*v);
        }
        Ok(recv)
    });

    method(it, array, "pop", |it, argv| {
        let recv = arg(argv, 0);
        check_unfrozen(it, recv)?;
        let r = recv_array(argv)?;
        Ok(it.heap.array_mut(r).elems.pop().unwrap_or(Value::Nil))
    });

    method(it, array, "first", |it, argv| {
        let r = recv_array(argv)?;
        Ok(it.heap.array(r).elems.first().copied().unwrap_or(Value::Nil))
    });
    method(it, array, "last", |it, argv| {
        let r = recv_array(argv)?;
        Ok(it.heap.array(r).elems.last().copied().unwrap_or(Value::Nil))
    });

    method(it, array, "include?", |it, argv| {
        let r = recv_array(argv)?;
        let needle = arg(argv, 1);
        let found = it
            .heap
            .array(r)
            .elems
            .iter()
            .any(|e| it.heap.value_eq(*e, needle));
        Ok(Value::Bool(found))
    });

    method(it, array, "index", |it, argv| {
        let r = recv_array(argv)?;
        let needle = arg(argv, 1);
        let found = it
            .heap
            .array(r)
            .elems
            .iter()
            .position(|e| it.heap.value_eq(*e, needle));
        Ok(found.map(|i| Value::Int(i as i64)).unwrap_or(Value::Nil))
    });

    method(it, array, "join", |it, argv| {
        let r = recv_array(argv)?;
        let sep = match argv.get(1).copied() {
            Some(Value::Str(s)) => it.heap.str_obj(s).bytes.clone(),
            _ => String::new(),
        };
        let elems = it.heap.array(r).elems.clone();
        let parts: Vec<String> = elems.iter().map(|e| it.display_value(*e)).collect();
        Ok(it.heap.alloc_str(parts.join(&sep)))
    });

    method(it, array, "reverse", |it, argv| {
        let r = recv_array(argv)?;
        let mut elems = it.heap.array(r).elems.clone();
        elems.reverse();
        Ok(it.heap.alloc_array(elems))
    });

    method(it, array, "sort", |it, argv| {
        let r = recv_array(argv)?;
        let mut elems = it.heap.array(r).elems.clone();
        let mut incomparable = false;
        let heap = &it.heap;
        elems.sort_by(|a, b| {
            heap.value_cmp(*a, *b).unwrap_or_else(|| {
                incomparable = true;
                std::cmp::Ordering::Equal
            })
        });
        if incomparable {
            return Err(Error::type_error("elements are not comparable"));
        }
        Ok(it.heap.alloc_array(elems))
    });

    method(it, array, "min", |it, argv| {
        fold_extreme(it, argv, std::cmp::Ordering::Less)
    });
    method(it, array, "max", |it, argv| {
        fold_extreme(it, argv, std::cmp::Ordering::Greater)
    });
}

fn fold_extreme(
    it: &mut Interp,
    argv: &[Value],
    keep: std::cmp::Ordering,
) -> Result<Value, Error> {
    let r = recv_array(argv)?;
    let elems = &it.heap.array(r).elems;
    let mut best = match elems.first() {
        Some(v) => *v,
        None => return Ok(Value::Nil),
    };
    for v in &elems[1..] {
        match it.heap.value_cmp(*v, best) {
            Some(ord) if ord == keep => best = *v,
            Some(_) => {}
            None => return Err(Error::type_error("elements are not comparable")),
        }
    }
    Ok(best)
}

// =============================================================================
// Hash
// =============================================================================

fn recv_hash(argv: &[Value]) -> Result<GcRef, Error> {
    match arg(argv, 0) {
        Value::Hash(r) => Ok(r),
        other => Err(Error::type_error(format!(
            "receiver must be a hash, got {}",
            other.type_name()
        ))),
    }
}

fn install_hash(it: &mut Interp) {
    let hash = it.basics.hash;

    method(it, hash, "size", |it, argv| {
        Ok(Value::Int(it.heap.hash(recv_hash(argv)?).entries.len() as i64))
    });
    method(it, hash, "length", |it, argv| {
        Ok(Value::Int(it.heap.hash(recv_hash(argv)?).entries.len() as i64))
    });
    method(it, hash, "empty?", |it, argv| {
        Ok(Value::Bool(it.heap.hash(recv_hash(argv)?).entries.is_empty()))
    });

    method(it, hash, "keys", |it, argv| {
        let r = recv_hash(argv)?;
        let keys: Vec<Value> = it.heap.hash(r).entries.iter().map(|(k, _)| *k).collect();
        Ok(it.heap.alloc_array(keys))
    });
    method(it, hash, "values", |it, argv| {
        let r = recv_hash(argv)?;
        let values: Vec<Value> = it.heap.hash(r).entries.iter().map(|(_, v)| *v).collect();
        Ok(it.heap.alloc_array(values))
    });

    method(it, hash, "has_key?", hash_has_key);
    method(it, hash, "key?", hash_has_key);
    method(it, hash, "include?", hash_has_key);

    method(it, hash, "delete", |it, argv| {
        let recv = arg(argv, 0);
        check_unfrozen(it, recv)?;
        let r = recv_hash(argv)?;
        let key = arg(argv, 1);
        match it.heap.hash(r).position(&it.heap, key) {
            Some(i) => Ok(it.heap.hash_mut(r).entries.remove(i).1),
            None => Ok(Value::Nil),
        }
    });
}

fn hash_has_key(it: &mut Interp, argv: &[Value]) -> Result<Value, Error> {
    let r = recv_hash(argv)?;
    let key = arg(argv, 1);
    Ok(Value::Bool(it.heap.hash(r).position(&it.heap, key).is_some()))
}

// =============================================================================
// Range, Symbol, Class
// =============================================================================

fn install_range(it: &mut Interp) {
    let range = it.basics.range;

    method(it, range, "first", |it, argv| match arg(argv, 0) {
        Value::Range(r) => Ok(it.heap.range(r).start),
        other => Err(Error::type_error(format!("first on {}", other.type_name()))),
    });
    method(it, range, "last", |it, argv| match arg(argv, 0) {
        Value::Range(r) => Ok(it.heap.range(r).end),
        other => Err(Error::type_error(format!("last on {}", other.type_name()))),
    });
    method(it, range, "exclusive?", |it, argv| match arg(argv, 0) {
        Value::Range(r) => Ok(Value::Bool(it.heap.range(r).exclusive)),
        other => Err(Error::type_error(format!(
            "exclusive? on {}",
            other.type_name()
        ))),
    });
    method(it, range, "size", |it, argv| match arg(argv, 0) {
        Value::Range(r) => {
            let range = it.heap.range(r);
            match (range.start, range.end) {
                (Value::Int(a), Value::Int(b)) => {
                    let span = b - a + if range.exclusive { 0 } else { 1 };
                    Ok(Value::Int(span.max(0)))
                }
                _ => Ok(Value::Nil),
            }
        }
        other => Err(Error::type_error(format!("size on {}", other.type_name()))),
    });
}

fn install_symbol(it: &mut Interp) {
    let symbol = it.basics.symbol;
    method(it, symbol, "to_s", |it, argv| match arg(argv, 0) {
        Value::Sym(s) => {
            let name = it.syms.name(s).to_string();
            Ok(it.heap.alloc_str(name))
        }
        other => Err(Error::type_error(format!("to_s on {}", other.type_name()))),
    });
    method(it, symbol, "to_sym", |_it, argv| Ok(arg(argv, 0)));

    // a symbol passed as `&:name` is invoked like a proc of one argument
    method(it, symbol, "call", |it, argv| {
        let s = match arg(argv, 0) {
            Value::Sym(s) => s,
            other => return Err(Error::type_error(format!("call on {}", other.type_name()))),
        };
        let target = arg(argv, 1);
        let rest = argv.get(2..).unwrap_or(&[]).to_vec();
        it.invoke_now(target, s, rest, Value::Nil)
    });
}

fn install_class(it: &mut Interp) {
    let class_class = it.basics.class_class;

    method(it, class_class, "name", |it, argv| {
        let c = module_ref(arg(argv, 0))?;
        let name = it.syms.name(it.heap.class(c).name).to_string();
        Ok(it.heap.alloc_str(name))
    });

    method(it, class_class, "superclass", |it, argv| {
        let c = module_ref(arg(argv, 0))?;
        Ok(match it.heap.class(c).superclass {
            Some(sup) => Value::Class(sup),
            None => Value::Nil,
        })
    });

    method(it, class_class, "ancestors", |it, argv| {
        let c = module_ref(arg(argv, 0))?;
        let chain = methods::ancestors(&it.heap, c);
        let elems: Vec<Value> = chain
            .into_iter()
            .map(|r| {
                if it.heap.class(r).is_module {
                    Value::Module(r)
                } else {
                    Value::Class(r)
                }
            })
            .collect();
        Ok(it.heap.alloc_array(elems))
    });
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::interp::Interp;
    use crate::vm::Value;

    fn eval(src: &str) -> Value {
        let mut it = Interp::new(RuntimeConfig::default());
        it.eval("t.rb", src).unwrap()
    }

    fn eval_display(src: &str) -> String {
        let mut it = Interp::new(RuntimeConfig::default());
        let v = it.eval("t.rb", src).unwrap();
        it.display_value(v)
    }

    #[test]
    fn test_array_sort_and_join() {
        assert_eq!(eval_display("[3, 1, 2].sort"), "[1, 2, 3]");
        assert_eq!(eval_display("[1, 2, 3].join(\"-\")"), "1-2-3");
    }

    #[test]
    fn test_array_iterators_from_prelude() {
        assert_eq!(eval_display("[1, 2, 3].map { |x| x * 10 }"), "[10, 20, 30]");
        assert_eq!(
            eval_display("[1, 2, 3, 4].select { |x| x % 2 == 0 }"),
            "[2, 4]"
        );
        assert_eq!(eval("[1, 2, 3].find { |x| x > 1 }"), Value::Int(2));
        assert_eq!(eval("[1, 2, 3].any? { |x| x > 2 }"), Value::Bool(true));
        assert_eq!(eval("[1, 2, 3].all? { |x| x > 2 }"), Value::Bool(false));
    }

    #[test]
    fn test_each_accumulates() {
        assert_eq!(
            eval("total = 0\n[1, 2, 3].each { |x| total += x }\ntotal"),
            Value::Int(6)
        );
    }

    #[test]
    fn test_integer_times() {
        assert_eq!(eval("n = 0\n3.times { |i| n += i }\nn"), Value::Int(3));
    }

    #[test]
    fn test_range_to_a_and_include() {
        assert_eq!(eval_display("(1..4).to_a"), "[1, 2, 3, 4]");
        assert_eq!(eval_display("(1...4).to_a"), "[1, 2, 3]");
        assert_eq!(eval("(1..4).include?(4)"), Value::Bool(true));
        assert_eq!(eval("(1...4).include?(4)"), Value::Bool(false));
    }

    #[test]
    fn test_hash_access() {
        assert_eq!(eval("h = { \"a\" => 1 }\nh[\"a\"]"), Value::Int(1));
        assert_eq!(eval("h = { 1 => 2 }\nh.has_key?(1)"), Value::Bool(true));
        assert_eq!(eval("h = { 1 => 2 }\nh.delete(1)"), Value::Int(2));
        assert_eq!(eval("h = { 1 => 2 }\nh.delete(9)"), Value::Nil);
        assert_eq!(eval_display("{ :a => 1, :b => 2 }.keys"), "[:a, :b]");
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval_display("\"hello\".upcase"), "HELLO");
        assert_eq!(eval("\"hello\".size"), Value::Int(5));
        assert_eq!(eval("\"42abc\".to_i"), Value::Int(42));
        assert_eq!(eval("\"3.5\".to_f"), Value::Float(3.5));
        assert_eq!(eval_display("\"a,b,c\".split(\",\")"), "[\"a\", \"b\", \"c\"]");
        assert_eq!(eval("\"hello\".include?(\"ell\")"), Value::Bool(true));
    }

    #[test]
    fn test_shovel_appends() {
        assert_eq!(eval_display("a = [1]\na << 2 << 3\na"), "[1, 2, 3]");
        assert_eq!(eval_display("s = \"ab\"\ns << \"c\"\ns"), "abc");
        assert_eq!(eval("1 << 4"), Value::Int(16));
    }

    #[test]
    fn test_attr_accessor() {
        let v = eval(
            "class P\n  attr_accessor :x\n  def initialize(x)\n    @x = x\n  end\nend\np1 = P.new(7)\np1.x = p1.x + 1\np1.x",
        );
        assert_eq!(v, Value::Int(8));
    }

    #[test]
    fn test_object_protocol() {
        assert_eq!(eval_display("1.class.name"), "Integer");
        assert_eq!(eval("1.is_a?(Integer)"), Value::Bool(true));
        assert_eq!(eval("1.is_a?(String)"), Value::Bool(false));
        assert_eq!(eval("nil.nil?"), Value::Bool(true));
        assert_eq!(eval("\"s\".respond_to?(:upcase)"), Value::Bool(true));
        assert_eq!(eval("\"s\".respond_to?(:launch)"), Value::Bool(false));
    }

    #[test]
    fn test_freeze_blocks_mutation() {
        let mut it = Interp::new(RuntimeConfig::default());
        let err = it
            .eval("t.rb", "a = [1]\na.freeze\na.push(2)")
            .unwrap_err();
        assert!(err.message.contains("frozen"));
        assert_eq!(it.eval("t.rb", "a.frozen?").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_include_module_method() {
        assert_eq!(
            eval_display(
                "module Greets\n  def hi\n    \"hi\"\n  end\nend\nclass P\n  include Greets\nend\nP.new.hi",
            ),
            "hi"
        );
    }

    #[test]
    fn test_private_blocks_external_call() {
        let mut it = Interp::new(RuntimeConfig::default());
        let err = it
            .eval(
                "t.rb",
                "class P\n  def go\n    helper\n  end\n  private\n  def helper\n    9\n  end\nend\nP.new.helper",
            )
            .unwrap_err();
        assert!(err.message.contains("private"));
        // reachable through a public method on the same object
        assert_eq!(it.eval("t.rb", "P.new.go").unwrap(), Value::Int(9));
    }

    #[test]
    fn test_module_function_exposes_module_level_call() {
        let mut it = Interp::new(RuntimeConfig::default());
        it.eval(
            "t.rb",
            "module Geo\n  def area(w, h)\n    w * h\n  end\n  module_function :area\nend",
        )
        .unwrap();
        assert_eq!(it.eval("t.rb", "Geo.area(3, 4)").unwrap(), Value::Int(12));
        // the instance copy turns private
        let err = it
            .eval("t.rb", "class Plot\n  include Geo\nend\nPlot.new.area(2, 2)")
            .unwrap_err();
        assert!(err.message.contains("private"));
    }

    #[test]
    fn test_alias_method() {
        assert_eq!(
            eval("class P\n  def a\n    5\n  end\n  alias b a\nend\nP.new.b"),
            Value::Int(5)
        );
    }

    #[test]
    fn test_rand_is_deterministic_after_srand() {
        let mut it = Interp::new(RuntimeConfig::default());
        it.eval("t.rb", "srand(7)").unwrap();
        let a = it.eval("t.rb", "rand(1000)").unwrap();
        it.eval("t.rb", "srand(7)").unwrap();
        let b = it.eval("t.rb", "rand(1000)").unwrap();
        assert_eq!(a, b);
        if let Value::Int(n) = a {
            assert!((0..1000).contains(&n));
        } else {
            panic!("rand(n) must return an integer");
        }
    }

    #[test]
    fn test_lambda_and_call() {
        assert_eq!(eval("f = lambda { |x| x * 2 }\nf.call(21)"), Value::Int(42));
    }

    #[test]
    fn test_symbol_to_proc_block() {
        assert_eq!(eval_display("[\"a\", \"b\"].map(&:upcase)"), "[\"A\", \"B\"]");
    }
}
