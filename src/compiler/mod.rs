//! Source to bytecode: lexer, parser, and code generator.

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;

use crate::error::Error;
use crate::vm::{Chunk, Interner};

/// Compile a source string into a chunk. The first error encountered, in
/// any phase, aborts compilation.
pub fn compile(filename: &str, source: &str, syms: &mut Interner) -> Result<Chunk, Error> {
    let tokens = lexer::Lexer::new(filename, source).scan_tokens()?;
    let program = parser::Parser::new(filename, tokens).parse_program()?;
    codegen::Compiler::new(filename, syms).compile(&program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_produces_chunk() {
        let mut syms = Interner::new();
        let chunk = compile("main.rb", "x = 1 + 2\nputs x", &mut syms).unwrap();
        assert!(!chunk.ops.is_empty());
        assert_eq!(&*chunk.file, "main.rb");
    }

    #[test]
    fn test_lex_error_surfaces() {
        let mut syms = Interner::new();
        let err = compile("main.rb", "\"open", &mut syms).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Parse);
        assert_eq!(err.file, "main.rb");
    }

    #[test]
    fn test_parse_error_surfaces() {
        let mut syms = Interner::new();
        let err = compile("main.rb", "def f(\n", &mut syms).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Parse);
    }
}
