/// Bytecode operations for the garnet VM.
///
/// Operand-carrying ops index either the chunk's constant pool (`u32` pool
/// indices, always a `Const::Sym` for name-addressed ops) or an instruction
/// offset within the same chunk (jumps are absolute).
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Push constant at pool index
    Const(u32),
    /// Discard top of stack
    Pop,
    /// Duplicate top of stack
    Dup,

    // Variables. Locals are shadowed globals: frame push saves and clears
    // the callee's parameter and declared-local names, frame pop restores.
    GetGlobal(u32),
    SetGlobal(u32),
    GetIvar(u32),
    SetIvar(u32),
    GetCvar(u32),
    SetCvar(u32),

    // Containers
    GetIndex,
    /// Like GetIndex but nil receiver yields nil
    SafeIndex,
    SetIndex,

    // Current-class and current-self registers
    GetClassReg,
    SetClassReg,
    GetSelf,
    SetSelf,

    /// Build (or reopen) a class named by pool index, optional super name
    MakeClass { name: u32, superclass: Option<u32> },
    MakeModule { name: u32 },
    /// Bind the proc on the stack as a method on the current class
    DefMethod(u32),
    /// Bind the proc on the stack as a singleton method on the receiver below it
    DefSingleton(u32),
    /// Stage the block proc (constant) for the next call
    SetBlock(u32),
    /// Stage the value on the stack (a proc or symbol) as the next call's block
    SetBlockVal,

    /// Call `name` with `argc` explicit arguments; if `has_recv`, the
    /// receiver sits below the arguments on the stack.
    Call { argc: u8, name: u32, has_recv: bool },
    /// Like Call with a receiver, but nil receiver yields nil
    SafeCall { argc: u8, name: u32 },
    Ret,

    Jump(u32),
    JumpIfFalse(u32),

    // Exception handling
    /// Push a handler; rescue ip is absolute, ensure ip filled in later
    Try { rescue: Option<u32> },
    SetEnsure(u32),
    EnterEnsure,
    /// Pop the handler; re-raise a pending error if one survived ensure
    EndTry,
    /// Convert top of stack to a runtime error and unwind
    Throw,
    /// Rethrow the error the innermost active rescue is handling
    Reraise,
    /// Re-enter the body of the innermost handler, clearing rescue state
    Retry,

    MakeArray(u16),
    MakeHash(u16),
    MakeRange { exclusive: bool },

    /// Yield to the current block, or suspend the active coroutine
    Yield(u8),
    /// Return a value through the block invocation to the iterating caller
    Break,
    /// Concatenate the top n values coerced to strings
    Concat(u16),
    /// Adjust the top of the stack from `have` values to exactly `want`
    MultiUnpack { want: u8, have: u8 },

    // Arithmetic / logical / comparison, type-dispatched
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Not,
    Neg,
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Op {
    /// Opcode name for tracing and the debug hook.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Const(_) => "Const",
            Op::Pop => "Pop",
            Op::Dup => "Dup",
            Op::GetGlobal(_) => "GetGlobal",
            Op::SetGlobal(_) => "SetGlobal",
            Op::GetIvar(_) => "GetIvar",
            Op::SetIvar(_) => "SetIvar",
            Op::GetCvar(_) => "GetCvar",
            Op::SetCvar(_) => "SetCvar",
            Op::GetIndex => "GetIndex",
            Op::SafeIndex => "SafeIndex",
            Op::SetIndex => "SetIndex",
            Op::GetClassReg => "GetClassReg",
            Op::SetClassReg => "SetClassReg",
            Op::GetSelf => "GetSelf",
            Op::SetSelf => "SetSelf",
            Op::MakeClass { .. } => "MakeClass",
            Op::MakeModule { .. } => "MakeModule",
            Op::DefMethod(_) => "DefMethod",
            Op::DefSingleton(_) => "DefSingleton",
            Op::SetBlock(_) => "SetBlock",
            Op::SetBlockVal => "SetBlockVal",
            Op::Call { .. } => "Call",
            Op::SafeCall { .. } => "SafeCall",
            Op::Ret => "Ret",
            Op::Jump(_) => "Jump",
            Op::JumpIfFalse(_) => "JumpIfFalse",
            Op::Try { .. } => "Try",
            Op::SetEnsure(_) => "SetEnsure",
            Op::EnterEnsure => "EnterEnsure",
            Op::EndTry => "EndTry",
            Op::Throw => "Throw",
            Op::Reraise => "Reraise",
            Op::Retry => "Retry",
            Op::MakeArray(_) => "MakeArray",
            Op::MakeHash(_) => "MakeHash",
            Op::MakeRange { .. } => "MakeRange",
            Op::Yield(_) => "Yield",
            Op::Break => "Break",
            Op::Concat(_) => "Concat",
            Op::MultiUnpack { .. } => "MultiUnpack",
            Op::Add => "Add",
            Op::Sub => "Sub",
            Op::Mul => "Mul",
            Op::Div => "Div",
            Op::Mod => "Mod",
            Op::And => "And",
            Op::Or => "Or",
            Op::Xor => "Xor",
            Op::Shl => "Shl",
            Op::Shr => "Shr",
            Op::Not => "Not",
            Op::Neg => "Neg",
            Op::Eq => "Eq",
            Op::Lt => "Lt",
            Op::Lte => "Lte",
            Op::Gt => "Gt",
            Op::Gte => "Gte",
        }
    }
}
