use crate::AnnotationToken;

pub mod hand_written_reader;

pub use hand_written_reader::{HandWrittenReader, Tokenizer};

/// One logical line of debugger output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// An annotation marker with the rest of its line
    Annotation {
        token: AnnotationToken,
        params: String,
    },
    /// Plain output
    Text(String),
}

impl Line {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn annotation(token: AnnotationToken) -> Self {
        Self::Annotation {
            token,
            params: String::new(),
        }
    }
}

pub trait Reader<R> {
    fn new(input: R) -> Self;

    /// Block until the next complete line is available.
    ///
    /// Returns `None` once the input is exhausted.
    fn poll_line(&mut self) -> eyre::Result<Option<Line>>;
}
