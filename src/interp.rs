//! The interpreter state and the host embedding API.
//!
//! An [`Interp`] owns everything: the heap arena, the symbol interner, the
//! global table, the VM stack (the main VM plus any coroutine VMs currently
//! resumed into), registered native functions, and the virtual file system.
//! Hosts construct one, optionally register functions and modules, and call
//! [`Interp::eval`].

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::vfs::{DiskFs, Vfs};
use crate::vm::heap::{ClassObj, CoroutineObj, InstanceObj};
use crate::vm::{
    swap_binding, vm_root_values, GcRef, GcStats, Heap, Interner, Obj, Regs, Signal, SymId, Value,
    Visibility, VmState,
};

/// A host function callable from the language. The receiver, when the
/// function is installed as a method, arrives as `argv[0]`.
pub type NativeFn = Rc<dyn Fn(&mut Interp, &[Value]) -> Result<Value, Error>>;

/// A host-registered module, run once on first `require` of its name.
pub type ModuleLoader = Rc<dyn Fn(&mut Interp) -> Result<(), Error>>;

/// Instruction-level trace hook: file, line, opcode name.
pub type DebugHook = Box<dyn FnMut(&str, u32, &str)>;

/// Handles to the built-in classes, resolved once at boot.
pub(crate) struct Basics {
    pub object: GcRef,
    pub class_class: GcRef,
    pub nil_class: GcRef,
    pub boolean: GcRef,
    pub integer: GcRef,
    pub float: GcRef,
    pub symbol: GcRef,
    pub string: GcRef,
    pub array: GcRef,
    pub hash: GcRef,
    pub range: GcRef,
    pub proc_class: GcRef,
    pub coroutine: GcRef,
}

/// Pre-interned names the dispatcher compares against on every call.
pub(crate) struct WellKnown {
    pub call: SymId,
    pub new: SymId,
    pub super_: SymId,
    pub resume: SymId,
    pub alive: SymId,
    pub initialize: SymId,
    pub method_missing: SymId,
    pub inherited: SymId,
    pub index_get: SymId,
    pub index_set: SymId,
}

pub struct Interp {
    pub(crate) heap: Heap,
    pub(crate) syms: Interner,
    pub(crate) globals: HashMap<SymId, Value>,
    pub(crate) natives: HashMap<SymId, NativeFn>,
    module_loaders: HashMap<String, ModuleLoader>,
    vfs: Box<dyn Vfs>,
    config: RuntimeConfig,

    /// Active VMs; index 0 is the main program, the rest are coroutines in
    /// resume order. The last is the one executing.
    pub(crate) vms: Vec<VmState>,
    /// Coroutine handles matching `vms[1..]`
    coro_stack: Vec<GcRef>,

    pub(crate) cur_self: Value,
    pub(crate) cur_class: Value,
    pub(crate) cur_block: Value,
    pub(crate) pending_block: Option<Value>,
    pub(crate) cur_method_class: Option<GcRef>,
    pub(crate) cur_method_name: Option<SymId>,

    /// Bumped on every mutation that can change method resolution
    pub(crate) epoch: u64,
    pub(crate) default_visibility: Visibility,
    pub(crate) debug_hook: Option<DebugHook>,

    /// Values held live by native code while it re-enters the VM; a GC root.
    pub(crate) scratch: Vec<Value>,

    last_err: Option<Error>,
    loaded: HashSet<String>,
    search_paths: Vec<String>,
    rng: u64,

    pub(crate) basics: Basics,
    pub(crate) wk: WellKnown,
}

impl Interp {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_vfs(config, Box::new(DiskFs))
    }

    pub fn with_vfs(config: RuntimeConfig, vfs: Box<dyn Vfs>) -> Self {
        let mut heap = Heap::new(config.gc_threshold, config.gc_enabled);
        let mut syms = Interner::new();
        let mut globals = HashMap::new();

        heap.pause();
        let object = heap.alloc(Obj::Class(ClassObj::new(syms.intern("Object"), None, false)));
        globals.insert(syms.intern("Object"), Value::Class(object));
        let mut basic = |heap: &mut Heap, syms: &mut Interner, name: &str| {
            let sym = syms.intern(name);
            let class = heap.alloc(Obj::Class(ClassObj::new(sym, Some(object), false)));
            globals.insert(sym, Value::Class(class));
            class
        };
        let basics = Basics {
            object,
            class_class: basic(&mut heap, &mut syms, "Class"),
            nil_class: basic(&mut heap, &mut syms, "NilClass"),
            boolean: basic(&mut heap, &mut syms, "Boolean"),
            integer: basic(&mut heap, &mut syms, "Integer"),
            float: basic(&mut heap, &mut syms, "Float"),
            symbol: basic(&mut heap, &mut syms, "Symbol"),
            string: basic(&mut heap, &mut syms, "String"),
            array: basic(&mut heap, &mut syms, "Array"),
            hash: basic(&mut heap, &mut syms, "Hash"),
            range: basic(&mut heap, &mut syms, "Range"),
            proc_class: basic(&mut heap, &mut syms, "Proc"),
            coroutine: basic(&mut heap, &mut syms, "Coroutine"),
        };
        let main_obj = heap.alloc(Obj::Object(InstanceObj::new(object)));
        heap.unpause();

        let wk = WellKnown {
            call: syms.intern("call"),
            new: syms.intern("new"),
            super_: syms.intern("super"),
            resume: syms.intern("resume"),
            alive: syms.intern("alive?"),
            initialize: syms.intern("initialize"),
            method_missing: syms.intern("method_missing"),
            inherited: syms.intern("inherited"),
            index_get: syms.intern("[]"),
            index_set: syms.intern("[]="),
        };

        let search_paths = config.search_paths.clone();
        let mut interp = Self {
            heap,
            syms,
            globals,
            natives: HashMap::new(),
            module_loaders: HashMap::new(),
            vfs,
            config,
            vms: vec![VmState::default()],
            coro_stack: Vec::new(),
            cur_self: Value::Object(main_obj),
            cur_class: Value::Class(object),
            cur_block: Value::Nil,
            pending_block: None,
            cur_method_class: None,
            cur_method_name: None,
            epoch: 1,
            default_visibility: Visibility::Public,
            debug_hook: None,
            scratch: Vec::new(),
            last_err: None,
            loaded: HashSet::new(),
            search_paths,
            rng: 0x2545f4914f6cdd1d,
            basics,
            wk,
        };
        crate::stdlib::install(&mut interp);
        interp
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Compile and run a source string on the active VM. The failure, if any,
    /// is also recorded for [`Interp::last_error`].
    pub fn eval(&mut self, filename: &str, source: &str) -> Result<Value, Error> {
        let chunk = match crate::compiler::compile(filename, source, &mut self.syms) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.last_err = Some(e.clone());
                return Err(e);
            }
        };
        match self.run_nested_chunk(Rc::new(chunk)) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.last_err = Some(e.clone());
                Err(e)
            }
        }
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_err.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_err = None;
    }

    /// The canonical `<file>:<line>: <code>: <message>` rendering.
    pub fn format_error(&self, err: &Error) -> String {
        err.to_string()
    }

    // =========================================================================
    // require / load
    // =========================================================================

    /// Run a file (or registered module) once. Returns false when it was
    /// already loaded.
    pub fn require(&mut self, name: &str) -> Result<bool, Error> {
        if let Some(loader) = self.module_loaders.get(name).cloned() {
            let key = format!("module:{}", name);
            if self.loaded.contains(&key) {
                return Ok(false);
            }
            self.loaded.insert(key.clone());
            if let Err(e) = loader(self) {
                self.loaded.remove(&key);
                return Err(e);
            }
            return Ok(true);
        }
        let path = self.resolve_path(name).ok_or_else(|| {
            Error::io(format!("cannot load such file -- {}", name))
        })?;
        if self.loaded.contains(&path) {
            return Ok(false);
        }
        // marked before running so mutual requires terminate
        self.loaded.insert(path.clone());
        match self.run_file(&path) {
            Ok(_) => Ok(true),
            Err(e) => {
                self.loaded.remove(&path);
                Err(e)
            }
        }
    }

    /// Run a file unconditionally, re-reading it every time.
    pub fn load(&mut self, name: &str) -> Result<(), Error> {
        let path = self.resolve_path(name).ok_or_else(|| {
            Error::io(format!("cannot load such file -- {}", name))
        })?;
        self.run_file(&path).map(|_| ())
    }

    pub fn add_search_path(&mut self, path: impl Into<String>) {
        self.search_paths.push(path.into());
    }

    fn resolve_path(&self, name: &str) -> Option<String> {
        let mut candidates = vec![name.to_string()];
        if !name.ends_with(".rb") {
            candidates.push(format!("{}.rb", name));
        }
        for dir in &self.search_paths {
            let dir = dir.trim_end_matches('/');
            candidates.push(format!("{}/{}", dir, name));
            if !name.ends_with(".rb") {
                candidates.push(format!("{}/{}.rb", dir, name));
            }
        }
        candidates.into_iter().find(|c| self.vfs.exists(c))
    }

    fn run_file(&mut self, path: &str) -> Result<Value, Error> {
        let bytes = self
            .vfs
            .read(path)
            .ok_or_else(|| Error::io(format!("cannot read {}", path)))?;
        let source = String::from_utf8(bytes)
            .map_err(|_| Error::io(format!("{} is not valid UTF-8", path)))?;
        let chunk = crate::compiler::compile(path, &source, &mut self.syms)?;
        self.run_nested_chunk(Rc::new(chunk))
    }

    /// Read a file through the VFS without evaluating it.
    pub(crate) fn read_text(&self, path: &str) -> Option<String> {
        let bytes = self.vfs.read(path)?;
        String::from_utf8(bytes).ok()
    }

    // =========================================================================
    // Globals and value construction
    // =========================================================================

    pub fn get_global(&mut self, name: &str) -> Option<Value> {
        let sym = self.syms.intern(name);
        self.globals.get(&sym).copied()
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let sym = self.syms.intern(name);
        self.globals.insert(sym, value);
    }

    pub fn str_value(&mut self, s: impl Into<String>) -> Value {
        self.heap.alloc_str(s)
    }

    pub fn array_value(&mut self, elems: Vec<Value>) -> Value {
        self.heap.alloc_array(elems)
    }

    pub fn hash_value(&mut self, entries: Vec<(Value, Value)>) -> Value {
        self.heap.alloc_hash(entries)
    }

    pub fn sym_value(&mut self, name: &str) -> Value {
        Value::Sym(self.syms.intern(name))
    }

    /// What `puts` would print for the value.
    pub fn display_value(&self, v: Value) -> String {
        self.heap.display(v, &self.syms)
    }

    /// What `p` would print for the value.
    pub fn inspect_value(&self, v: Value) -> String {
        self.heap.inspect(v, &self.syms)
    }

    // =========================================================================
    // Calling in
    // =========================================================================

    /// Call a top-level function or registered native by name.
    pub fn invoke_global(&mut self, name: &str, args: &[Value]) -> Result<Value, Error> {
        let sym = self.syms.intern(name);
        if let Some(f) = self.natives.get(&sym).cloned() {
            return f(self, args);
        }
        match self.globals.get(&sym).copied() {
            Some(v @ Value::Proc(_)) => self.call(v, args),
            Some(_) => Err(Error::type_error(format!("'{}' is not callable", name))),
            None => Err(Error::name_error(format!("undefined function '{}'", name))),
        }
    }

    /// Call a method on a receiver, running it to completion.
    pub fn invoke_method(
        &mut self,
        recv: Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        let sym = self.syms.intern(name);
        self.invoke_now(recv, sym, args.to_vec(), Value::Nil)
    }

    /// Call a proc value.
    pub fn call(&mut self, proc: Value, args: &[Value]) -> Result<Value, Error> {
        match proc {
            Value::Proc(p) => {
                let def = self.heap.proc_obj(p).def.clone();
                let depth = self.vms.last().map(|vm| vm.frames.len()).unwrap_or(0);
                self.push_frame(
                    Some(p),
                    def,
                    args.to_vec(),
                    Value::Nil,
                    true,
                    None,
                    None,
                    None,
                    None,
                    false,
                )?;
                self.run_to(depth)
            }
            other => Err(Error::type_error(format!(
                "expected a proc, got {}",
                other.type_name()
            ))),
        }
    }

    fn run_to(&mut self, depth: usize) -> Result<Value, Error> {
        match self.run_vm(depth)? {
            Signal::Done(v) => Ok(v),
            Signal::Yielded(_) => Err(Error::runtime("can't yield across this boundary")),
        }
    }

    // =========================================================================
    // Extension
    // =========================================================================

    /// Register a global host function callable as `name(...)`.
    pub fn register_function(
        &mut self,
        name: &str,
        f: impl Fn(&mut Interp, &[Value]) -> Result<Value, Error> + 'static,
    ) {
        let sym = self.syms.intern(name);
        self.natives.insert(sym, Rc::new(f));
    }

    /// Register a module run on first `require name`.
    pub fn register_module(
        &mut self,
        name: &str,
        loader: impl Fn(&mut Interp) -> Result<(), Error> + 'static,
    ) {
        self.module_loaders.insert(name.to_string(), Rc::new(loader));
    }

    /// Define (or fetch) a named class visible to scripts.
    pub fn define_class(&mut self, name: &str, superclass: Option<&str>) -> Result<Value, Error> {
        let sym = self.syms.intern(name);
        if let Some(existing) = self.globals.get(&sym).copied() {
            return match existing {
                Value::Class(_) => Ok(existing),
                other => Err(Error::type_error(format!(
                    "{} is not a class (it is a {})",
                    name,
                    other.type_name()
                ))),
            };
        }
        let sup = match superclass {
            Some(s) => {
                let ssym = self.syms.intern(s);
                match self.globals.get(&ssym).copied() {
                    Some(Value::Class(c)) => c,
                    _ => return Err(Error::name_error(format!("undefined superclass '{}'", s))),
                }
            }
            None => self.basics.object,
        };
        let class = self
            .heap
            .alloc(Obj::Class(ClassObj::new(sym, Some(sup), false)));
        self.globals.insert(sym, Value::Class(class));
        self.epoch += 1;
        Ok(Value::Class(class))
    }

    /// Install a host function as an instance method on a class.
    pub fn define_method(
        &mut self,
        class: Value,
        name: &str,
        f: impl Fn(&mut Interp, &[Value]) -> Result<Value, Error> + 'static,
    ) -> Result<(), Error> {
        let c = match class {
            Value::Class(c) | Value::Module(c) => c,
            other => {
                return Err(Error::type_error(format!(
                    "expected a class, got {}",
                    other.type_name()
                )))
            }
        };
        let sym = self.syms.intern(name);
        let method = self.heap.alloc_cmethod(name, Rc::new(f));
        self.heap.class_mut(c).methods.insert(sym, method);
        self.epoch += 1;
        Ok(())
    }

    pub fn set_debug_hook(&mut self, hook: Option<DebugHook>) {
        self.debug_hook = hook;
    }

    // =========================================================================
    // Coroutines
    // =========================================================================

    /// Wrap a proc in a fresh, not-yet-started coroutine.
    pub fn coroutine_new(&mut self, proc: Value) -> Result<Value, Error> {
        match proc {
            Value::Proc(_) => {
                let r = self.heap.alloc(Obj::Coroutine(Box::new(CoroutineObj {
                    proc_val: proc,
                    vm: VmState::default(),
                    started: false,
                    done: false,
                    transfer: Value::Nil,
                })));
                Ok(Value::Coroutine(r))
            }
            other => Err(Error::type_error(format!(
                "coroutine body must be a proc, got {}",
                other.type_name()
            ))),
        }
    }

    /// Resume a coroutine, delivering `args` either to the body's parameters
    /// (first resume) or as the value of the suspended `yield`.
    pub fn coroutine_resume(&mut self, coro: Value, args: &[Value]) -> Result<Value, Error> {
        match coro {
            Value::Coroutine(r) => self.resume_coroutine(r, args),
            other => Err(Error::type_error(format!(
                "expected a coroutine, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn coroutine_alive(&self, coro: Value) -> bool {
        match coro {
            Value::Coroutine(r) => !self.heap.coroutine(r).done,
            _ => false,
        }
    }

    pub(crate) fn resume_coroutine(&mut self, r: GcRef, args: &[Value]) -> Result<Value, Error> {
        // a finished coroutine has nothing left to produce
        if self.heap.coroutine(r).done {
            return Ok(Value::Nil);
        }
        if self.coro_stack.contains(&r) {
            return Err(Error::runtime("coroutine is already running"));
        }

        let vm = std::mem::take(&mut self.heap.coroutine_mut(r).vm);
        self.vms.push(vm);
        self.coro_stack.push(r);

        if !self.heap.coroutine(r).started {
            self.heap.coroutine_mut(r).started = true;
            self.vms.last_mut().expect("no active VM").saved_regs = Regs {
                self_val: self.cur_self,
                class_reg: self.cur_class,
                block: Value::Nil,
                method_class: None,
                method_name: None,
            };
            self.swap_regs();
            let proc_val = self.heap.coroutine(r).proc_val;
            let started = match proc_val {
                Value::Proc(p) => {
                    let def = self.heap.proc_obj(p).def.clone();
                    self.push_frame(
                        Some(p),
                        def,
                        args.to_vec(),
                        Value::Nil,
                        true,
                        None,
                        None,
                        None,
                        None,
                        false,
                    )
                }
                other => Err(Error::type_error(format!(
                    "coroutine body must be a proc, got {}",
                    other.type_name()
                ))),
            };
            if let Err(e) = started {
                self.retire_coroutine(r);
                return Err(e);
            }
        } else {
            self.unpark_bindings();
            // the resume value becomes the suspended yield's result
            let resumed = args.first().copied().unwrap_or(Value::Nil);
            self.vms.last_mut().expect("no active VM").stack.push(resumed);
        }

        match self.run_vm(0) {
            Ok(Signal::Done(v)) => {
                self.retire_coroutine(r);
                self.heap.coroutine_mut(r).transfer = v;
                Ok(v)
            }
            Ok(Signal::Yielded(v)) => {
                self.park_bindings();
                let vm = self.vms.pop().expect("no active VM");
                self.coro_stack.pop();
                let co = self.heap.coroutine_mut(r);
                co.vm = vm;
                co.transfer = v;
                Ok(v)
            }
            Err(e) => {
                self.retire_coroutine(r);
                Err(e)
            }
        }
    }

    /// Finish a coroutine whose frames have fully unwound: restore the
    /// resumer's registers and discard the (empty) VM.
    fn retire_coroutine(&mut self, r: GcRef) {
        self.swap_regs();
        self.vms.pop();
        self.coro_stack.pop();
        self.heap.coroutine_mut(r).done = true;
    }

    /// Exchange the interpreter registers with the active VM's stash.
    fn swap_regs(&mut self) {
        let vm = self.vms.last_mut().expect("no active VM");
        std::mem::swap(&mut self.cur_self, &mut vm.saved_regs.self_val);
        std::mem::swap(&mut self.cur_class, &mut vm.saved_regs.class_reg);
        std::mem::swap(&mut self.cur_block, &mut vm.saved_regs.block);
        std::mem::swap(&mut self.cur_method_class, &mut vm.saved_regs.method_class);
        std::mem::swap(&mut self.cur_method_name, &mut vm.saved_regs.method_name);
    }

    /// Suspend: back the coroutine's locals out of the global table, undoing
    /// each frame's shadowing newest-first, then restore the resumer's
    /// registers.
    fn park_bindings(&mut self) {
        {
            let vm = self.vms.last_mut().expect("no active VM");
            for frame in vm.frames.iter_mut().rev() {
                for (sym, slot) in frame.saved_locals.iter_mut().rev() {
                    swap_binding(&mut self.globals, *sym, slot);
                }
                for (sym, slot) in frame.saved_params.iter_mut().rev() {
                    swap_binding(&mut self.globals, *sym, slot);
                }
            }
        }
        self.swap_regs();
    }

    /// Resume: the exact inverse of [`Interp::park_bindings`].
    fn unpark_bindings(&mut self) {
        self.swap_regs();
        let vm = self.vms.last_mut().expect("no active VM");
        for frame in vm.frames.iter_mut() {
            for (sym, slot) in frame.saved_params.iter_mut() {
                swap_binding(&mut self.globals, *sym, slot);
            }
            for (sym, slot) in frame.saved_locals.iter_mut() {
                swap_binding(&mut self.globals, *sym, slot);
            }
        }
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Gather every root and run a full mark-and-sweep cycle.
    pub fn collect_garbage(&mut self) {
        let mut roots: Vec<Value> = Vec::with_capacity(self.globals.len() + 64);
        roots.extend(self.globals.values().copied());
        roots.push(self.cur_self);
        roots.push(self.cur_class);
        roots.push(self.cur_block);
        if let Some(b) = self.pending_block {
            roots.push(b);
        }
        if let Some(c) = self.cur_method_class {
            roots.push(Value::Class(c));
        }
        roots.push(Value::Class(self.basics.object));
        roots.push(Value::Class(self.basics.class_class));
        for r in &self.coro_stack {
            roots.push(Value::Coroutine(*r));
        }
        roots.extend(self.scratch.iter().copied());
        for vm in &self.vms {
            vm_root_values(vm, &mut roots);
        }
        self.heap.collect(&roots);
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // =========================================================================
    // Randomness (xorshift64*)
    // =========================================================================

    pub(crate) fn seed_rng(&mut self, seed: u64) {
        self.rng = if seed == 0 { 0x2545f4914f6cdd1d } else { seed };
    }

    pub(crate) fn next_rand(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng = x;
        x.wrapping_mul(0x2545f4914f6cdd1d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemFs;

    fn interp() -> Interp {
        Interp::new(RuntimeConfig::default())
    }

    #[test]
    fn test_eval_simple_expression() {
        let mut it = interp();
        let v = it.eval("t.rb", "1 + 2 * 3").unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn test_eval_records_last_error() {
        let mut it = interp();
        assert!(it.eval("t.rb", "1 / 0").is_err());
        let err = it.last_error().unwrap();
        assert_eq!(err.message, "divided by 0");
        it.clear_error();
        assert!(it.last_error().is_none());
    }

    #[test]
    fn test_globals_cross_boundary() {
        let mut it = interp();
        let s = it.str_value("host");
        it.set_global("who", s);
        let v = it.eval("t.rb", "\"hello \" + who").unwrap();
        assert_eq!(it.display_value(v), "hello host");
        it.eval("t.rb", "answer = 42").unwrap();
        assert_eq!(it.get_global("answer"), Some(Value::Int(42)));
    }

    #[test]
    fn test_register_function() {
        let mut it = interp();
        it.register_function("double", |_it, args| {
            match args.first() {
                Some(Value::Int(n)) => Ok(Value::Int(n * 2)),
                _ => Ok(Value::Nil),
            }
        });
        let v = it.eval("t.rb", "double(21)").unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn test_invoke_global_function() {
        let mut it = interp();
        it.eval("t.rb", "def add(a, b)\n  a + b\nend").unwrap();
        let v = it.invoke_global("add", &[Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(v, Value::Int(5));
    }

    #[test]
    fn test_invoke_method_on_object() {
        let mut it = interp();
        let obj = it
            .eval(
                "t.rb",
                "class Greeter\n  def hi(name)\n    \"hi \" + name\n  end\nend\nGreeter.new",
            )
            .unwrap();
        let arg = it.str_value("there");
        let v = it.invoke_method(obj, "hi", &[arg]).unwrap();
        assert_eq!(it.display_value(v), "hi there");
    }

    #[test]
    fn test_require_through_memfs() {
        let mut fs = MemFs::new();
        fs.insert("lib/answer.rb", "def answer\n  42\nend");
        let mut it = Interp::with_vfs(RuntimeConfig::default(), Box::new(fs));
        it.add_search_path("lib");
        let first = it.eval("t.rb", "require \"answer\"").unwrap();
        assert_eq!(first, Value::Bool(true));
        let again = it.eval("t.rb", "require \"answer\"").unwrap();
        assert_eq!(again, Value::Bool(false));
        assert_eq!(it.eval("t.rb", "answer").unwrap(), Value::Int(42));
    }

    #[test]
    fn test_register_module() {
        let mut it = interp();
        it.register_module("host_math", |it| {
            it.register_function("triple", |_it, args| match args.first() {
                Some(Value::Int(n)) => Ok(Value::Int(n * 3)),
                _ => Ok(Value::Nil),
            });
            Ok(())
        });
        let v = it
            .eval("t.rb", "require \"host_math\"\ntriple(5)")
            .unwrap();
        assert_eq!(v, Value::Int(15));
    }

    #[test]
    fn test_define_class_and_method_from_host() {
        let mut it = interp();
        let class = it.define_class("Point", None).unwrap();
        it.define_method(class, "magnitude", |_it, argv| {
            // receiver is argv[0]; a stub distance for the test
            let _ = argv;
            Ok(Value::Int(5))
        })
        .unwrap();
        let v = it.eval("t.rb", "Point.new.magnitude").unwrap();
        assert_eq!(v, Value::Int(5));
    }

    #[test]
    fn test_coroutine_host_api() {
        let mut it = interp();
        let body = it
            .eval("t.rb", "f = lambda { |x| yield x + 1\n yield x + 2\n x + 3 }\nf")
            .unwrap();
        let co = it.coroutine_new(body).unwrap();
        assert!(it.coroutine_alive(co));
        assert_eq!(it.coroutine_resume(co, &[Value::Int(10)]).unwrap(), Value::Int(11));
        assert_eq!(it.coroutine_resume(co, &[]).unwrap(), Value::Int(12));
        assert_eq!(it.coroutine_resume(co, &[]).unwrap(), Value::Int(13));
        assert!(!it.coroutine_alive(co));
        // a dead coroutine keeps answering nil
        assert_eq!(it.coroutine_resume(co, &[]).unwrap(), Value::Nil);
        assert_eq!(it.coroutine_resume(co, &[]).unwrap(), Value::Nil);
    }

    #[test]
    fn test_next_skips_an_iteration_in_while() {
        let mut it = interp();
        let v = it
            .eval(
                "t.rb",
                "total = 0\ni = 0\nwhile i < 5\n i += 1\n next if i == 3\n total += i\nend\ntotal",
            )
            .unwrap();
        assert_eq!(v, Value::Int(12));
    }

    #[test]
    fn test_raise_nil_is_an_error_not_a_reraise() {
        let mut it = interp();
        let err = it.eval("t.rb", "raise nil").unwrap_err();
        assert_eq!(err.message, "raise");
    }

    #[test]
    fn test_bare_raise_rethrows_handled_error() {
        let mut it = interp();
        let err = it
            .eval("t.rb", "begin\n raise \"boom\"\nrescue\n raise\nend")
            .unwrap_err();
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_bare_raise_outside_rescue() {
        let mut it = interp();
        let err = it.eval("t.rb", "raise").unwrap_err();
        assert!(err.message.contains("no current exception"));
    }

    #[test]
    fn test_dead_coroutine_resume_is_nil_from_script() {
        let mut it = interp();
        let v = it
            .eval("t.rb", "f = coroutine_new { 42 }\nf.resume\nf.resume")
            .unwrap();
        assert_eq!(v, Value::Nil);
    }

    #[test]
    fn test_arguments_survive_collection_during_default_eval() {
        // an aggressive threshold makes every instruction boundary a GC point,
        // including the ones inside a default-value chunk
        let mut config = RuntimeConfig::default();
        config.gc_threshold = 1;
        let mut it = Interp::with_vfs(config, Box::new(MemFs::new()));
        let v = it
            .eval(
                "t.rb",
                "def f(a = \"pad#{1}\", *rest)\n rest.push(a)\n rest.size\nend\nf()",
            )
            .unwrap();
        assert_eq!(v, Value::Int(1));
    }

    #[test]
    fn test_receiver_survives_collection_during_default_eval() {
        let mut config = RuntimeConfig::default();
        config.gc_threshold = 1;
        let mut it = Interp::with_vfs(config, Box::new(MemFs::new()));
        let v = it
            .eval(
                "t.rb",
                "class Box\n def initialize\n @v = \"kept\"\n end\n def peek(pad = \"x#{1}\")\n @v + pad\n end\nend\nBox.new.peek",
            )
            .unwrap();
        assert_eq!(it.display_value(v), "keptx1");
    }

    #[test]
    fn test_collect_keeps_reachable_values() {
        let mut it = interp();
        it.eval("t.rb", "keep = [1, 2, 3]").unwrap();
        for _ in 0..100 {
            it.eval("t.rb", "[\"garbage\"]").unwrap();
        }
        it.collect_garbage();
        let v = it.eval("t.rb", "keep[2]").unwrap();
        assert_eq!(v, Value::Int(3));
    }

    #[test]
    fn test_debug_hook_fires() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let counter = Rc::new(RefCell::new(0usize));
        let seen = counter.clone();
        let mut it = interp();
        it.set_debug_hook(Some(Box::new(move |_file, _line, _op| {
            *seen.borrow_mut() += 1;
        })));
        it.eval("t.rb", "1 + 1").unwrap();
        it.set_debug_hook(None);
        assert!(*counter.borrow() > 0);
    }
}
