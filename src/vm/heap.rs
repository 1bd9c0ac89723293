//! The heap arena, symbol interner, and mark-and-sweep collector.
//!
//! Heap entities live in an index-addressed arena owned by the interpreter
//! state; a [`GcRef`] is a slot handle. Cross-references between entities are
//! handles, so marking is a plain reachability walk over a worklist and
//! cycles (class ↔ singleton table, coroutine ↔ proc) need no special care.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use super::value::{GcRef, SymId, Value};
use super::vm::VmState;
use super::ProcDef;
use crate::interp::NativeFn;

// =============================================================================
// Symbol interner
// =============================================================================

/// Interns identifier spellings to stable ids. Symbols are never collected.
#[derive(Default)]
pub struct Interner {
    names: Vec<String>,
    ids: HashMap<String, SymId>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> SymId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = SymId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, id: SymId) -> &str {
        &self.names[id.0 as usize]
    }

    pub fn lookup(&self, name: &str) -> Option<SymId> {
        self.ids.get(name).copied()
    }
}

// =============================================================================
// Heap object kinds
// =============================================================================

#[derive(Debug, Default)]
pub struct StrObj {
    pub bytes: String,
    pub frozen: bool,
}

#[derive(Debug, Default)]
pub struct ArrayObj {
    pub elems: Vec<Value>,
    pub frozen: bool,
}

/// Insertion-ordered key/value entries. Lookup is linear, keyed by the
/// language's equality law; hash identity (not entry equality) decides `==`
/// between two hashes.
#[derive(Debug, Default)]
pub struct HashObj {
    pub entries: Vec<(Value, Value)>,
    pub frozen: bool,
}

impl HashObj {
    pub fn position(&self, heap: &Heap, key: Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| heap.value_eq(*k, key))
    }
}

#[derive(Debug)]
pub struct RangeObj {
    pub start: Value,
    pub end: Value,
    pub exclusive: bool,
}

#[derive(Debug)]
pub struct ProcObj {
    pub def: Rc<ProcDef>,
    pub visibility: super::Visibility,
}

/// Epoch-tagged method cache. Trusted only while `epoch` matches the state's
/// method epoch; cleared and re-tagged on first stale access. Negative
/// results are cached as `None`.
#[derive(Debug, Default)]
pub struct MethodCache {
    pub epoch: u64,
    pub entries: HashMap<SymId, Option<super::Resolved>>,
}

pub struct ClassObj {
    pub name: SymId,
    pub superclass: Option<GcRef>,
    pub is_module: bool,
    pub methods: HashMap<SymId, Value>,
    pub singleton: HashMap<SymId, Value>,
    /// Most recently included last
    pub includes: Vec<GcRef>,
    /// Most recently prepended last
    pub prepends: Vec<GcRef>,
    pub cvars: HashMap<SymId, Value>,
    pub frozen: bool,
    pub cache: MethodCache,
    pub singleton_cache: MethodCache,
}

impl ClassObj {
    pub fn new(name: SymId, superclass: Option<GcRef>, is_module: bool) -> Self {
        Self {
            name,
            superclass,
            is_module,
            methods: HashMap::new(),
            singleton: HashMap::new(),
            includes: Vec::new(),
            prepends: Vec::new(),
            cvars: HashMap::new(),
            frozen: false,
            cache: MethodCache::default(),
            singleton_cache: MethodCache::default(),
        }
    }
}

pub struct InstanceObj {
    pub class: GcRef,
    pub ivars: HashMap<SymId, Value>,
    pub singleton: HashMap<SymId, Value>,
    pub frozen: bool,
}

impl InstanceObj {
    pub fn new(class: GcRef) -> Self {
        Self {
            class,
            ivars: HashMap::new(),
            singleton: HashMap::new(),
            frozen: false,
        }
    }
}

/// A cooperative coroutine: an owned proc and an owned VM. While suspended
/// the VM lives here; while running the interpreter takes it onto its active
/// VM stack and puts it back on yield or completion.
pub struct CoroutineObj {
    pub proc_val: Value,
    pub vm: VmState,
    pub started: bool,
    pub done: bool,
    /// Value most recently carried across the yield boundary
    pub transfer: Value,
}

pub struct CMethodObj {
    pub name: String,
    pub func: NativeFn,
}

pub enum Obj {
    Str(StrObj),
    Array(ArrayObj),
    Hash(HashObj),
    Range(RangeObj),
    Proc(ProcObj),
    Class(ClassObj),
    Object(InstanceObj),
    Coroutine(Box<CoroutineObj>),
    CMethod(CMethodObj),
}

impl Obj {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Obj::Str(_) => "string",
            Obj::Array(_) => "array",
            Obj::Hash(_) => "hash",
            Obj::Range(_) => "range",
            Obj::Proc(_) => "proc",
            Obj::Class(c) => {
                if c.is_module {
                    "module"
                } else {
                    "class"
                }
            }
            Obj::Object(_) => "object",
            Obj::Coroutine(_) => "coroutine",
            Obj::CMethod(_) => "cmethod",
        }
    }
}

struct Slot {
    marked: bool,
    obj: Obj,
}

// =============================================================================
// Heap
// =============================================================================

/// GC statistics, reported through `--gc-stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub cycles: u64,
    pub freed: u64,
    pub live: usize,
}

pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    /// Objects allocated since the last collection
    allocated: usize,
    initial_threshold: usize,
    threshold: usize,
    enabled: bool,
    /// Pause depth; collection is suppressed while > 0
    pause_depth: u32,
    stats: GcStats,
}

impl Heap {
    pub fn new(threshold: usize, enabled: bool) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            allocated: 0,
            initial_threshold: threshold,
            threshold,
            enabled,
            pause_depth: 0,
            stats: GcStats::default(),
        }
    }

    pub fn alloc(&mut self, obj: Obj) -> GcRef {
        self.allocated += 1;
        let slot = Slot { marked: false, obj };
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(slot);
            GcRef { index }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(slot));
            GcRef { index }
        }
    }

    /// Whether the allocation counter has crossed the threshold. The VM polls
    /// this at instruction boundaries, where every live value is rooted.
    pub fn wants_collect(&self) -> bool {
        self.enabled && self.pause_depth == 0 && self.allocated >= self.threshold
    }

    /// Suppress collection across a multi-allocation construction whose
    /// intermediate pieces are not yet reachable from roots.
    pub fn pause(&mut self) {
        self.pause_depth += 1;
    }

    pub fn unpause(&mut self) {
        debug_assert!(self.pause_depth > 0);
        self.pause_depth = self.pause_depth.saturating_sub(1);
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn get(&self, r: GcRef) -> &Obj {
        &self.slots[r.index as usize]
            .as_ref()
            .expect("dangling GcRef")
            .obj
    }

    fn get_mut(&mut self, r: GcRef) -> &mut Obj {
        &mut self.slots[r.index as usize]
            .as_mut()
            .expect("dangling GcRef")
            .obj
    }

    // Typed accessors. Handles are produced and consumed by the engine only,
    // so a kind mismatch is arena corruption.

    pub fn str_obj(&self, r: GcRef) -> &StrObj {
        match self.get(r) {
            Obj::Str(s) => s,
            other => panic!("expected string, found {}", other.kind_name()),
        }
    }

    pub fn str_mut(&mut self, r: GcRef) -> &mut StrObj {
        match self.get_mut(r) {
            Obj::Str(s) => s,
            other => panic!("expected string, found {}", other.kind_name()),
        }
    }

    pub fn array(&self, r: GcRef) -> &ArrayObj {
        match self.get(r) {
            Obj::Array(a) => a,
            other => panic!("expected array, found {}", other.kind_name()),
        }
    }

    pub fn array_mut(&mut self, r: GcRef) -> &mut ArrayObj {
        match self.get_mut(r) {
            Obj::Array(a) => a,
            other => panic!("expected array, found {}", other.kind_name()),
        }
    }

    pub fn hash(&self, r: GcRef) -> &HashObj {
        match self.get(r) {
            Obj::Hash(h) => h,
            other => panic!("expected hash, found {}", other.kind_name()),
        }
    }

    pub fn hash_mut(&mut self, r: GcRef) -> &mut HashObj {
        match self.get_mut(r) {
            Obj::Hash(h) => h,
            other => panic!("expected hash, found {}", other.kind_name()),
        }
    }

    pub fn range(&self, r: GcRef) -> &RangeObj {
        match self.get(r) {
            Obj::Range(x) => x,
            other => panic!("expected range, found {}", other.kind_name()),
        }
    }

    pub fn proc_obj(&self, r: GcRef) -> &ProcObj {
        match self.get(r) {
            Obj::Proc(p) => p,
            other => panic!("expected proc, found {}", other.kind_name()),
        }
    }

    pub fn proc_mut(&mut self, r: GcRef) -> &mut ProcObj {
        match self.get_mut(r) {
            Obj::Proc(p) => p,
            other => panic!("expected proc, found {}", other.kind_name()),
        }
    }

    pub fn class(&self, r: GcRef) -> &ClassObj {
        match self.get(r) {
            Obj::Class(c) => c,
            other => panic!("expected class, found {}", other.kind_name()),
        }
    }

    pub fn class_mut(&mut self, r: GcRef) -> &mut ClassObj {
        match self.get_mut(r) {
            Obj::Class(c) => c,
            other => panic!("expected class, found {}", other.kind_name()),
        }
    }

    pub fn instance(&self, r: GcRef) -> &InstanceObj {
        match self.get(r) {
            Obj::Object(o) => o,
            other => panic!("expected object, found {}", other.kind_name()),
        }
    }

    pub fn instance_mut(&mut self, r: GcRef) -> &mut InstanceObj {
        match self.get_mut(r) {
            Obj::Object(o) => o,
            other => panic!("expected object, found {}", other.kind_name()),
        }
    }

    pub fn coroutine(&self, r: GcRef) -> &CoroutineObj {
        match self.get(r) {
            Obj::Coroutine(c) => c,
            other => panic!("expected coroutine, found {}", other.kind_name()),
        }
    }

    pub fn coroutine_mut(&mut self, r: GcRef) -> &mut CoroutineObj {
        match self.get_mut(r) {
            Obj::Coroutine(c) => c,
            other => panic!("expected coroutine, found {}", other.kind_name()),
        }
    }

    pub fn cmethod(&self, r: GcRef) -> &CMethodObj {
        match self.get(r) {
            Obj::CMethod(m) => m,
            other => panic!("expected cmethod, found {}", other.kind_name()),
        }
    }

    // Convenience constructors

    pub fn alloc_str(&mut self, s: impl Into<String>) -> Value {
        Value::Str(self.alloc(Obj::Str(StrObj {
            bytes: s.into(),
            frozen: false,
        })))
    }

    pub fn alloc_array(&mut self, elems: Vec<Value>) -> Value {
        Value::Array(self.alloc(Obj::Array(ArrayObj {
            elems,
            frozen: false,
        })))
    }

    pub fn alloc_hash(&mut self, entries: Vec<(Value, Value)>) -> Value {
        Value::Hash(self.alloc(Obj::Hash(HashObj {
            entries,
            frozen: false,
        })))
    }

    pub fn alloc_range(&mut self, start: Value, end: Value, exclusive: bool) -> Value {
        Value::Range(self.alloc(Obj::Range(RangeObj {
            start,
            end,
            exclusive,
        })))
    }

    pub fn alloc_proc(&mut self, def: Rc<ProcDef>, visibility: super::Visibility) -> Value {
        Value::Proc(self.alloc(Obj::Proc(ProcObj { def, visibility })))
    }

    pub fn alloc_cmethod(&mut self, name: impl Into<String>, func: NativeFn) -> Value {
        Value::CMethod(self.alloc(Obj::CMethod(CMethodObj {
            name: name.into(),
            func,
        })))
    }

    // =========================================================================
    // Equality, ordering, freezing
    // =========================================================================

    /// The language's `==`: structural for primitives and strings, identity
    /// for every other heap kind.
    pub fn value_eq(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Str(x), Value::Str(y)) => {
                x == y || self.str_obj(x).bytes == self.str_obj(y).bytes
            }
            _ => a == b,
        }
    }

    /// Ordered comparison for `<`/`<=`/`>`/`>=` and sorting. Numbers compare
    /// numerically across int/float; strings compare bytewise.
    pub fn value_cmp(&self, a: Value, b: Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Some(x.cmp(&y)),
            (Value::Int(x), Value::Float(y)) => (x as f64).partial_cmp(&y),
            (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(y as f64)),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(&y),
            (Value::Str(x), Value::Str(y)) => {
                Some(self.str_obj(x).bytes.cmp(&self.str_obj(y).bytes))
            }
            _ => None,
        }
    }

    /// Whether a value rejects mutation. Primitives and symbols are always
    /// frozen; heap entities carry a flag.
    pub fn is_frozen(&self, v: Value) -> bool {
        match v {
            Value::Str(r) => self.str_obj(r).frozen,
            Value::Array(r) => self.array(r).frozen,
            Value::Hash(r) => self.hash(r).frozen,
            Value::Class(r) | Value::Module(r) => self.class(r).frozen,
            Value::Object(r) => self.instance(r).frozen,
            Value::Range(_) | Value::Proc(_) | Value::Coroutine(_) | Value::CMethod(_) => false,
            _ => true,
        }
    }

    pub fn freeze(&mut self, v: Value) {
        match v {
            Value::Str(r) => self.str_mut(r).frozen = true,
            Value::Array(r) => self.array_mut(r).frozen = true,
            Value::Hash(r) => self.hash_mut(r).frozen = true,
            Value::Class(r) | Value::Module(r) => self.class_mut(r).frozen = true,
            Value::Object(r) => self.instance_mut(r).frozen = true,
            _ => {}
        }
    }

    // =========================================================================
    // Display
    // =========================================================================

    /// Display form: what `puts` prints. Integers as decimal, floats %g-style,
    /// nil/true/false as keywords, strings raw, containers in literal form.
    pub fn display(&self, v: Value, syms: &Interner) -> String {
        self.render(v, syms, false, 0)
    }

    /// Inspect form: strings quoted, symbols with a leading colon.
    pub fn inspect(&self, v: Value, syms: &Interner) -> String {
        self.render(v, syms, true, 0)
    }

    fn render(&self, v: Value, syms: &Interner, inspect: bool, depth: usize) -> String {
        if depth > 8 {
            return "...".to_string();
        }
        match v {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(x) => format_float(x),
            Value::Sym(s) => {
                if inspect {
                    format!(":{}", syms.name(s))
                } else {
                    syms.name(s).to_string()
                }
            }
            Value::Str(r) => {
                let s = &self.str_obj(r).bytes;
                if inspect {
                    let mut out = String::with_capacity(s.len() + 2);
                    out.push('"');
                    for ch in s.chars() {
                        match ch {
                            '"' => out.push_str("\\\""),
                            '\\' => out.push_str("\\\\"),
                            '\n' => out.push_str("\\n"),
                            _ => out.push(ch),
                        }
                    }
                    out.push('"');
                    out
                } else {
                    s.clone()
                }
            }
            Value::Array(r) => {
                let parts: Vec<String> = self
                    .array(r)
                    .elems
                    .iter()
                    .map(|e| self.render(*e, syms, true, depth + 1))
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Hash(r) => {
                let parts: Vec<String> = self
                    .hash(r)
                    .entries
                    .iter()
                    .map(|(k, val)| {
                        format!(
                            "{} => {}",
                            self.render(*k, syms, true, depth + 1),
                            self.render(*val, syms, true, depth + 1)
                        )
                    })
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Range(r) => {
                let range = self.range(r);
                format!(
                    "{}{}{}",
                    self.render(range.start, syms, true, depth + 1),
                    if range.exclusive { "..." } else { ".." },
                    self.render(range.end, syms, true, depth + 1)
                )
            }
            Value::Class(r) | Value::Module(r) => syms.name(self.class(r).name).to_string(),
            Value::Object(r) => {
                let class_name = syms.name(self.class(self.instance(r).class).name);
                format!("#<{}>", class_name)
            }
            Value::Proc(_) => "#<proc>".to_string(),
            Value::Coroutine(_) => "#<coroutine>".to_string(),
            Value::CMethod(r) => format!("#<cmethod {}>", self.cmethod(r).name),
        }
    }

    // =========================================================================
    // Mark and sweep
    // =========================================================================

    /// Run a full collection. `roots` must enumerate every root value: the
    /// global table, the current-class/self/block registers, and every slot
    /// of every active VM (stacks plus frame saves). Suspended coroutine VMs
    /// are traced through their heap objects.
    pub fn collect(&mut self, roots: &[Value]) {
        let mut worklist: Vec<GcRef> = roots.iter().filter_map(|v| v.gc_ref()).collect();

        while let Some(r) = worklist.pop() {
            let slot = match self.slots[r.index as usize].as_mut() {
                Some(s) => s,
                None => continue,
            };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            trace_obj(&slot.obj, &mut worklist);
        }

        let mut freed = 0u64;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(s) if s.marked => s.marked = false,
                Some(_) => {
                    *slot = None;
                    self.free.push(i as u32);
                    freed += 1;
                }
                None => {}
            }
        }

        let live = self.slots.iter().filter(|s| s.is_some()).count();
        self.allocated = 0;
        self.threshold = self.initial_threshold.max(2 * live);
        self.stats.cycles += 1;
        self.stats.freed += freed;
        self.stats.live = live;
    }
}

/// Push every value an object references onto the worklist. Strings and
/// native methods are leaves.
fn trace_obj(obj: &Obj, worklist: &mut Vec<GcRef>) {
    let mut push = |v: Value| {
        if let Some(r) = v.gc_ref() {
            worklist.push(r);
        }
    };
    match obj {
        Obj::Str(_) | Obj::CMethod(_) => {}
        Obj::Array(a) => a.elems.iter().copied().for_each(&mut push),
        Obj::Hash(h) => {
            for (k, v) in &h.entries {
                push(*k);
                push(*v);
            }
        }
        Obj::Range(r) => {
            push(r.start);
            push(r.end);
        }
        Obj::Proc(_) => {}
        Obj::Class(c) => {
            if let Some(sup) = c.superclass {
                push(Value::Class(sup));
            }
            c.methods.values().copied().for_each(&mut push);
            c.singleton.values().copied().for_each(&mut push);
            c.includes.iter().copied().map(Value::Module).for_each(&mut push);
            c.prepends.iter().copied().map(Value::Module).for_each(&mut push);
            c.cvars.values().copied().for_each(&mut push);
            for entry in c.cache.entries.values().flatten() {
                push(entry.method);
            }
            for entry in c.singleton_cache.entries.values().flatten() {
                push(entry.method);
            }
        }
        Obj::Object(o) => {
            push(Value::Class(o.class));
            o.ivars.values().copied().for_each(&mut push);
            o.singleton.values().copied().for_each(&mut push);
        }
        Obj::Coroutine(co) => {
            push(co.proc_val);
            push(co.transfer);
            trace_vm(&co.vm, worklist);
        }
    }
}

/// Trace a VM: every operand-stack slot and every frame's saved bindings.
pub(crate) fn trace_vm(vm: &VmState, worklist: &mut Vec<GcRef>) {
    let mut push = |v: Value| {
        if let Some(r) = v.gc_ref() {
            worklist.push(r);
        }
    };
    vm.stack.iter().copied().for_each(&mut push);
    for frame in &vm.frames {
        if let Some(p) = frame.proc_ref {
            push(Value::Proc(p));
        }
        for (_, v) in frame.saved_params.iter().chain(frame.saved_locals.iter()) {
            if let Some(v) = v {
                push(*v);
            }
        }
        push(frame.saved_self);
        push(frame.saved_block);
        push(frame.saved_class_reg);
        if let Some(c) = frame.saved_method_class {
            push(Value::Class(c));
        }
        if let Some(v) = frame.return_override {
            push(v);
        }
    }
    push(vm.saved_regs.self_val);
    push(vm.saved_regs.class_reg);
    push(vm.saved_regs.block);
    if let Some(c) = vm.saved_regs.method_class {
        push(Value::Class(c));
    }
}

/// C `%g`-style float rendering: up to six significant digits, no trailing
/// zeros, exponent form outside [1e-4, 1e16).
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if x == 0.0 {
        return "0".to_string();
    }
    let mag = x.abs().log10().floor() as i32;
    if !(-5..16).contains(&mag) {
        let mut s = format!("{:e}", x);
        // normalize Rust's `1e5` to `1e+05`-less C style is overkill; keep as-is
        if let Some(pos) = s.find('e') {
            let (mantissa, exp) = s.split_at(pos);
            let trimmed = trim_zeros(mantissa);
            s = format!("{}{}", trimmed, exp);
        }
        return s;
    }
    let decimals = (5 - mag).max(0) as usize;
    let s = format!("{:.*}", decimals, x);
    trim_zeros(&s)
}

fn trim_zeros(s: &str) -> String {
    if s.contains('.') {
        let t = s.trim_end_matches('0').trim_end_matches('.');
        t.to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut syms = Interner::new();
        let a = syms.intern("hello");
        let b = syms.intern("world");
        let c = syms.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(syms.name(a), "hello");
    }

    #[test]
    fn test_string_equality_by_contents() {
        let mut heap = Heap::new(1024, true);
        let a = heap.alloc_str("abc");
        let b = heap.alloc_str("abc");
        let c = heap.alloc_str("abd");
        assert!(heap.value_eq(a, b));
        assert!(!heap.value_eq(a, c));
    }

    #[test]
    fn test_array_identity() {
        let mut heap = Heap::new(1024, true);
        let a = heap.alloc_array(vec![Value::Int(1)]);
        let b = heap.alloc_array(vec![Value::Int(1)]);
        assert!(heap.value_eq(a, a));
        assert!(!heap.value_eq(a, b));
    }

    #[test]
    fn test_collect_frees_unreachable() {
        let mut heap = Heap::new(1024, true);
        let kept = heap.alloc_array(vec![]);
        let _dropped = heap.alloc_str("garbage");
        heap.collect(&[kept]);
        assert_eq!(heap.live_count(), 1);
        // the kept array is still usable
        assert!(heap.array(kept.gc_ref().unwrap()).elems.is_empty());
    }

    #[test]
    fn test_collect_traces_containers() {
        let mut heap = Heap::new(1024, true);
        let inner = heap.alloc_str("deep");
        let outer = heap.alloc_array(vec![inner]);
        let hash = heap.alloc_hash(vec![(Value::Int(1), outer)]);
        heap.collect(&[hash]);
        assert_eq!(heap.live_count(), 3);
        assert_eq!(heap.str_obj(inner.gc_ref().unwrap()).bytes, "deep");
    }

    #[test]
    fn test_collect_survives_cycles() {
        let mut heap = Heap::new(1024, true);
        let a = heap.alloc(Obj::Array(ArrayObj::default()));
        let b = heap.alloc_array(vec![Value::Array(a)]);
        heap.array_mut(a).elems.push(b);
        heap.collect(&[Value::Array(a)]);
        assert_eq!(heap.live_count(), 2);
        heap.collect(&[]);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn test_threshold_grows_with_live_set() {
        let mut heap = Heap::new(2, true);
        let mut roots = Vec::new();
        for i in 0..10 {
            roots.push(heap.alloc_str(i.to_string()));
        }
        heap.collect(&roots);
        assert_eq!(heap.stats().live, 10);
        assert!(heap.stats().cycles == 1);
        // threshold becomes max(initial, 2 * live)
        assert!(!heap.wants_collect());
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.0), "3");
        assert_eq!(format_float(3.14), "3.14");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(-2.25), "-2.25");
        assert_eq!(format_float(0.0), "0");
        assert_eq!(format_float(0.1 + 0.2), "0.3");
    }

    #[test]
    fn test_freeze() {
        let mut heap = Heap::new(1024, true);
        let a = heap.alloc_array(vec![]);
        assert!(!heap.is_frozen(a));
        heap.freeze(a);
        assert!(heap.is_frozen(a));
        assert!(heap.is_frozen(Value::Int(1)));
        assert!(heap.is_frozen(Value::Sym(SymId(0))));
    }
}
