//! Error taxonomy for the interpreter.
//!
//! Every failure the engine can surface carries one of a fixed set of codes
//! plus a message and the source position it was raised at. The canonical
//! rendering is `<file>:<line>:<col>: <code>: <message>`.

use std::fmt;

/// Error codes. `Parse` aborts compilation; the rest surface at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Syntax error during lexing or parsing
    Parse,
    /// Generic execution failure, including uncaught `raise`
    Runtime,
    /// Operation applied to a value of the wrong kind
    Type,
    /// Undefined method, function, variable, or `super` target
    Name,
    /// Virtual file system failure
    Io,
    /// Allocation failure
    Oom,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Type => "type",
            ErrorKind::Name => "name",
            ErrorKind::Io => "io",
            ErrorKind::Oom => "oom",
        }
    }
}

/// A positioned interpreter error.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: String::new(),
            line: 0,
            column: 0,
        }
    }

    pub fn parse(message: impl Into<String>, file: &str, line: u32, column: u32) -> Self {
        Self {
            kind: ErrorKind::Parse,
            message: message.into(),
            file: file.to_string(),
            line,
            column,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    /// Attach a source position if the error does not have one yet.
    pub fn with_pos(mut self, file: &str, line: u32) -> Self {
        if self.file.is_empty() {
            self.file = file.to_string();
            self.line = line;
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = if self.file.is_empty() { "<unknown>" } else { &self.file };
        if self.column > 0 {
            write!(
                f,
                "{}:{}:{}: {}: {}",
                file,
                self.line,
                self.column,
                self.kind.code(),
                self.message
            )
        } else {
            write!(f, "{}:{}: {}: {}", file, self.line, self.kind.code(), self.message)
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_with_column() {
        let e = Error::parse("unexpected token", "main.rb", 3, 7);
        assert_eq!(e.to_string(), "main.rb:3:7: parse: unexpected token");
    }

    #[test]
    fn test_format_without_column() {
        let e = Error::runtime("divided by 0").with_pos("main.rb", 12);
        assert_eq!(e.to_string(), "main.rb:12: runtime: divided by 0");
    }

    #[test]
    fn test_with_pos_keeps_existing() {
        let e = Error::parse("bad", "a.rb", 1, 1).with_pos("b.rb", 9);
        assert_eq!(e.file, "a.rb");
        assert_eq!(e.line, 1);
    }
}
