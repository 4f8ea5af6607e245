use std::fmt;

/// A line/column position in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn point(line: usize, col: usize) -> Span {
        Span { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SylvaError {
    #[error("Reader error at {span}: {message}")]
    Reader { message: String, span: Span },

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Type error: expected {expected}, got {got}")]
    Type { expected: String, got: String },

    #[error("No block named {0} is currently visible")]
    UnknownBlock(String),

    #[error("Unknown tag {0}")]
    UnknownTag(String),

    #[error("Macro expansion error: {0}")]
    Macro(String),
}

impl SylvaError {
    pub fn compile(msg: impl Into<String>) -> Self {
        SylvaError::Compile(msg.into())
    }

    pub fn type_error(expected: impl Into<String>, got: impl Into<String>) -> Self {
        SylvaError::Type {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn macro_error(msg: impl Into<String>) -> Self {
        SylvaError::Macro(msg.into())
    }

    pub fn reader(msg: impl Into<String>, span: Span) -> Self {
        SylvaError::Reader {
            message: msg.into(),
            span,
        }
    }
}
