use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::Duration;

use bytes::BytesMut;
use eyre::WrapErr;

use crate::{ANNOTATION_MARKER, AnnotationToken, Line, Reader};

const READ_CHUNK_SIZE: usize = 4096;

/// Splits a growing byte buffer into classified lines.
///
/// Bytes are buffered until a full newline-terminated line is available, so
/// output split across several reads is reassembled before it is classified.
#[derive(Default)]
pub struct Tokenizer {
    buffer: BytesMut,
    ready: VecDeque<Line>,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of raw process output
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Return the next complete line, or `None` if only a partial line is buffered
    pub fn next_line(&mut self) -> Option<Line> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(line);
            }

            let newline = self.buffer.iter().position(|b| *b == b'\n')?;
            let raw = self.buffer.split_to(newline + 1);
            let text = String::from_utf8_lossy(&raw[..newline]);
            let text = text.strip_suffix('\r').unwrap_or(&text);
            self.classify(text);
        }
    }

    /// Flush whatever is left in the buffer once the input has ended
    pub fn finish(&mut self) -> Option<Line> {
        if let Some(line) = self.next_line() {
            return Some(line);
        }
        if self.buffer.is_empty() {
            return None;
        }
        let raw = self.buffer.split();
        let text = String::from_utf8_lossy(&raw).into_owned();
        self.classify(&text);
        self.ready.pop_front()
    }

    /// Whether a partial line is still waiting for its newline
    pub fn has_partial_line(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn classify(&mut self, text: &str) {
        let Some(idx) = text.find(ANNOTATION_MARKER) else {
            self.ready.push_back(Line::Text(text.to_string()));
            return;
        };

        if idx > 0 {
            self.ready.push_back(Line::Text(text[..idx].to_string()));
        }

        let marker = &text[idx + ANNOTATION_MARKER.len()..];
        let (name, params) = marker.split_once(' ').unwrap_or((marker, ""));
        self.ready.push_back(Line::Annotation {
            token: AnnotationToken::from_marker(name),
            params: params.to_string(),
        });
    }
}

/// Blocking reader over the debugger's output stream
pub struct HandWrittenReader<R> {
    input: R,
    tokenizer: Tokenizer,
    finished: bool,
}

impl<R> Reader<R> for HandWrittenReader<R>
where
    R: Read,
{
    fn new(input: R) -> Self {
        Self {
            input,
            tokenizer: Tokenizer::new(),
            finished: false,
        }
    }

    fn poll_line(&mut self) -> eyre::Result<Option<Line>> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(line) = self.tokenizer.next_line() {
                return Ok(Some(line));
            }

            if self.finished {
                return Ok(None);
            }

            match self.input.read(&mut chunk) {
                Ok(0) => {
                    tracing::debug!(
                        partial = self.tokenizer.has_partial_line(),
                        "end of debugger output"
                    );
                    self.finished = true;
                    return Ok(self.tokenizer.finish());
                }
                Ok(n) => {
                    tracing::trace!(bytes = n, "received output chunk");
                    self.tokenizer.feed(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                Err(e) => {
                    return Err(e).wrap_err("reading debugger output");
                }
            }
        }
    }
}
