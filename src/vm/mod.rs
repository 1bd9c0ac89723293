pub(crate) mod heap;
pub(crate) mod methods;
mod ops;
mod value;
#[allow(clippy::module_inception)]
mod vm;

pub use heap::{format_float, GcStats, Heap, Interner, Obj};
pub use methods::Visibility;
pub use ops::Op;
pub use value::{GcRef, SymId, Value};
pub use vm::{Frame, Handler, Regs, VmState};

pub(crate) use methods::Resolved;
pub(crate) use vm::{swap_binding, vm_root_values, Signal};

use std::rc::Rc;

/// A compiled unit: instructions, a parallel line map, and a constant pool.
/// One per top-level eval and one per compiled procedure body.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub ops: Vec<Op>,
    pub lines: Vec<u32>,
    pub consts: Vec<Const>,
    /// Source filename, for errors and the debug hook
    pub file: Rc<str>,
}

impl Chunk {
    pub fn new(file: Rc<str>) -> Self {
        Self {
            ops: Vec::new(),
            lines: Vec::new(),
            consts: Vec::new(),
            file,
        }
    }

    pub fn line_at(&self, ip: usize) -> u32 {
        self.lines.get(ip).copied().unwrap_or(0)
    }
}

/// Constant pool entries. Strings materialize as fresh heap strings each
/// time (string literals are mutable); procs wrap a shared definition.
#[derive(Debug, Clone)]
pub enum Const {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    Sym(SymId),
    Proc(Rc<ProcDef>),
}

/// A compiled procedure body: parameters, per-parameter default chunks, the
/// main chunk, and the statically collected declared-local names that frame
/// push saves and clears (see the locals-as-shadowed-globals model).
#[derive(Debug)]
pub struct ProcDef {
    pub name: Option<String>,
    pub params: Vec<SymId>,
    /// Index into `params` of the splat parameter, if any
    pub splat: Option<usize>,
    /// `&blk` parameter, bound to the caller's block
    pub block_param: Option<SymId>,
    /// Parallel to `params`; `Some` for parameters with default values
    pub defaults: Vec<Option<Rc<Chunk>>>,
    pub chunk: Rc<Chunk>,
    /// Names assigned anywhere in the body (excluding params and nested
    /// def/class/module bodies, including nested blocks)
    pub locals: Vec<SymId>,
}
