//! Protocol state machine
//!
//! [`ProtocolParser`] consumes classified [`Line`]s and assembles complete
//! [`Event`]s. Nested Begin/End blocks are tracked on a stack of open
//! contexts so that values can nest arbitrarily (arrays of structs, structs
//! containing arrays, ...).
//!
//! Payload text is always delimited by the surrounding annotations. GDB
//! prints the element separator of an array inside the next element's text
//! run, so that leading `,` is the only punctuation ever removed from a value.
use std::mem;
use std::path::PathBuf;

use crate::AnnotationToken;
use crate::Command;
use crate::Line;
use crate::events::{Completion, Display, Event, Register, Signal, StackFrame, Value};

/// How plain lines after `post-prompt` are collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CaptureMode {
    #[default]
    Plain,
    Locals,
    Params,
    Registers,
    Disassembly,
    Memory,
}

impl CaptureMode {
    /// `post-prompt` means different things depending on the command in flight
    fn for_command(command: Option<&Command>) -> Self {
        let Some(command) = command else {
            return Self::Plain;
        };
        let line = command.line();
        let line = line.trim();
        if line == "info locals" {
            Self::Locals
        } else if line == "info args" {
            Self::Params
        } else if line.starts_with("info registers") {
            Self::Registers
        } else if line == "disas" || line == "disassemble" {
            Self::Disassembly
        } else if line.starts_with("x/") {
            Self::Memory
        } else {
            Self::Plain
        }
    }

    fn from_token(token: &AnnotationToken) -> Option<Self> {
        match token {
            AnnotationToken::Locals => Some(Self::Locals),
            AnnotationToken::Params => Some(Self::Params),
            AnnotationToken::InfoRegisters => Some(Self::Registers),
            AnnotationToken::InfoAsm => Some(Self::Disassembly),
            AnnotationToken::Memory => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FramePart {
    #[default]
    Other,
    Function,
    File,
    Line,
}

#[derive(Debug, Default)]
struct FrameBuilder {
    function_name: String,
    file: String,
    line: String,
    part: FramePart,
}

impl FrameBuilder {
    fn push_text(&mut self, text: &str) {
        match self.part {
            FramePart::Other => {}
            FramePart::Function => self.function_name.push_str(text),
            FramePart::File => self.file.push_str(text),
            FramePart::Line => self.line.push_str(text),
        }
    }

    fn build(self) -> Option<StackFrame> {
        let function_name = self.function_name.trim();
        if function_name.is_empty() {
            return None;
        }
        let file = self.file.trim();
        Some(StackFrame {
            function_name: function_name.to_string(),
            path: (!file.is_empty()).then(|| PathBuf::from(file)),
            line: self.line.trim().parse().unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DisplayPart {
    #[default]
    Number,
    Expression,
    Other,
}

#[derive(Debug, Default)]
struct DisplayBuilder {
    number: String,
    expression: String,
    part: DisplayPart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SignalPart {
    #[default]
    Other,
    Name,
    Description,
}

#[derive(Debug)]
enum Context {
    Frame(FrameBuilder),
    Display(DisplayBuilder),
    ValueHistory,
    Error(Vec<String>),
    Signal {
        signal: Signal,
        part: SignalPart,
    },
    /// A value under construction: plain text until a composite is attached
    Slot {
        text: String,
        composite: Option<Value>,
        element: bool,
    },
    Struct {
        fields: Vec<(String, Value)>,
        name: String,
        naming: bool,
    },
    Array {
        elements: Vec<Value>,
    },
}

impl Context {
    fn slot(element: bool) -> Self {
        Context::Slot {
            text: String::new(),
            composite: None,
            element,
        }
    }
}

/// Streaming parser for the annotated output of a single debugger process
#[derive(Debug, Default)]
pub struct ProtocolParser {
    current: Option<Command>,
    stack: Vec<Context>,
    mode: CaptureMode,
    in_prompt: bool,

    output: String,
    error: Option<String>,
    frames: Vec<StackFrame>,
    displays: Vec<Display>,
    captured: Vec<String>,
    join_captured: bool,

    events: Vec<Event>,
}

impl ProtocolParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the command whose output follows
    pub fn set_current(&mut self, command: Command) {
        self.current = Some(command);
    }

    pub fn current(&self) -> Option<&Command> {
        self.current.as_ref()
    }

    /// Feed one line, returning any events it completed
    pub fn on_line(&mut self, line: Line) -> Vec<Event> {
        match line {
            Line::Annotation { token, params } => self.on_annotation(token, params.trim()),
            Line::Text(text) => self.on_text(&text),
        }
        mem::take(&mut self.events)
    }

    /// The output stream has ended: close whatever is still open and report
    /// the process as gone
    pub fn finish(&mut self) -> Vec<Event> {
        tracing::debug!(open_contexts = self.stack.len(), "flushing parser at end of output");
        self.close_all();
        self.flush_captured();
        let pending = self.current.is_some()
            || !self.output.is_empty()
            || self.error.is_some()
            || !self.frames.is_empty()
            || !self.displays.is_empty();
        if pending {
            self.complete_command();
        }
        self.events.push(Event::ProcessExited);
        mem::take(&mut self.events)
    }

    fn on_text(&mut self, text: &str) {
        match self.stack.last_mut() {
            None => self.on_plain_text(text),
            Some(Context::Frame(frame)) => frame.push_text(text),
            Some(Context::Display(display)) => match display.part {
                DisplayPart::Number => display.number.push_str(text),
                DisplayPart::Expression => display.expression.push_str(text),
                DisplayPart::Other => {}
            },
            Some(Context::ValueHistory) => {}
            Some(Context::Error(lines)) => {
                if !text.trim().is_empty() {
                    lines.push(text.trim_end().to_string());
                }
            }
            Some(Context::Signal { signal, part }) => match part {
                SignalPart::Name => signal.name.push_str(text),
                SignalPart::Description => signal.description.push_str(text),
                SignalPart::Other => {}
            },
            Some(Context::Slot {
                text: slot_text,
                composite,
                ..
            }) => {
                if composite.is_none() {
                    slot_text.push_str(text);
                }
            }
            Some(Context::Struct { name, naming, .. }) => {
                if *naming {
                    name.push_str(text);
                }
            }
            Some(Context::Array { .. }) => {}
        }
    }

    fn on_plain_text(&mut self, text: &str) {
        if self.in_prompt || text.trim().is_empty() {
            return;
        }
        match self.mode {
            CaptureMode::Plain => {
                self.output.push_str(text);
                self.output.push('\n');
            }
            _ => match self.captured.last_mut() {
                Some(last) if self.join_captured => last.push_str(text),
                _ => self.captured.push(text.to_string()),
            },
        }
        self.join_captured = false;
    }

    fn on_annotation(&mut self, token: AnnotationToken, params: &str) {
        tracing::trace!(?token, %params, "annotation");

        // an error message runs until the next annotation of any kind
        if matches!(self.stack.last(), Some(Context::Error(_))) && token != AnnotationToken::ErrorEnd
        {
            self.close_error();
        }

        // argument values inside a frame line are not tracked
        if matches!(self.stack.last(), Some(Context::Frame(_)))
            && (token.is_value_structure()
                || matches!(
                    token,
                    AnnotationToken::ArgBegin
                        | AnnotationToken::ArgNameEnd
                        | AnnotationToken::ArgValue
                        | AnnotationToken::ArgEnd
                ))
        {
            return;
        }

        if self.stack.is_empty() && self.mode != CaptureMode::Plain && token.is_value_structure() {
            self.join_captured = true;
            return;
        }

        match token {
            AnnotationToken::PrePrompt => {
                // the prompt text must not land in an unfinished value
                self.close_all();
                self.flush_captured();
                self.in_prompt = true;
            }
            AnnotationToken::Prompt => {
                self.in_prompt = false;
                self.close_all();
                self.flush_captured();
                self.complete_command();
            }
            AnnotationToken::PostPrompt => {
                self.in_prompt = false;
                self.mode = CaptureMode::for_command(self.current.as_ref());
            }
            AnnotationToken::Locals
            | AnnotationToken::Params
            | AnnotationToken::InfoRegisters
            | AnnotationToken::InfoAsm
            | AnnotationToken::Memory => {
                self.in_prompt = false;
                self.mode = CaptureMode::from_token(&token).unwrap_or_default();
            }
            AnnotationToken::Source => match parse_source(params) {
                Some((path, line)) => self.events.push(Event::Source { path, line }),
                None => tracing::debug!(%params, "unparseable source annotation"),
            },

            AnnotationToken::DisplayBegin => {
                self.stack.push(Context::Display(DisplayBuilder {
                    number: params.to_string(),
                    ..Default::default()
                }));
            }
            AnnotationToken::DisplayNumberEnd
            | AnnotationToken::DisplayFormat
            | AnnotationToken::DisplayExpressionEnd => {
                self.set_display_part(DisplayPart::Other)
            }
            AnnotationToken::DisplayExpression => self.set_display_part(DisplayPart::Expression),
            AnnotationToken::DisplayValue => {
                if matches!(self.stack.last(), Some(Context::Display(_))) {
                    self.stack.push(Context::slot(false));
                }
            }
            AnnotationToken::DisplayEnd => self.close_display(),

            AnnotationToken::FrameBegin => self.stack.push(Context::Frame(FrameBuilder::default())),
            AnnotationToken::FrameFunctionName => self.set_frame_part(FramePart::Function),
            AnnotationToken::FrameSourceFile => self.set_frame_part(FramePart::File),
            AnnotationToken::FrameSourceLine => self.set_frame_part(FramePart::Line),
            AnnotationToken::FrameArgs
            | AnnotationToken::FrameSourceBegin
            | AnnotationToken::FrameSourceFileEnd
            | AnnotationToken::FrameSourceEnd
            | AnnotationToken::FrameWhere => self.set_frame_part(FramePart::Other),
            AnnotationToken::FrameEnd => {
                if let Some(Context::Frame(frame)) =
                    self.pop_to(|c| matches!(c, Context::Frame(_)))
                {
                    self.frames.extend(frame.build());
                }
            }

            AnnotationToken::ErrorBegin => self.stack.push(Context::Error(Vec::new())),
            AnnotationToken::ErrorEnd => self.close_error(),

            AnnotationToken::ArraySectionBegin => {
                if matches!(self.stack.last(), Some(Context::Slot { .. })) {
                    self.stack.push(Context::Array {
                        elements: Vec::new(),
                    });
                    self.stack.push(Context::slot(true));
                }
            }
            AnnotationToken::Elt => {
                if !self.in_array_element() {
                    return;
                }
                let value = self.finish_value();
                if let (Some(Context::Array { elements }), Some(value)) =
                    (self.stack.last_mut(), value)
                {
                    elements.push(value);
                    self.stack.push(Context::slot(true));
                }
            }
            AnnotationToken::ArraySectionEnd => {
                if !self.in_array_element() {
                    return;
                }
                let value = self.finish_value();
                if let Some(Context::Array { elements }) = self.stack.last_mut() {
                    if let Some(value) = value.filter(|v| !is_empty_scalar(v)) {
                        elements.push(value);
                    }
                }
                if let Some(Context::Array { elements }) = self.stack.pop() {
                    self.attach(Value::Array(elements));
                }
            }
            AnnotationToken::EltRep | AnnotationToken::EltRepEnd => {}

            AnnotationToken::FieldBegin => match self.stack.last_mut() {
                Some(Context::Slot { .. }) => self.stack.push(Context::Struct {
                    fields: Vec::new(),
                    name: String::new(),
                    naming: true,
                }),
                Some(Context::Struct { name, naming, .. }) => {
                    name.clear();
                    *naming = true;
                }
                _ => tracing::debug!("field outside of a value"),
            },
            AnnotationToken::FieldNameEnd => {
                if let Some(Context::Struct { naming, .. }) = self.stack.last_mut() {
                    *naming = false;
                }
            }
            AnnotationToken::FieldValue => {
                if matches!(self.stack.last(), Some(Context::Struct { .. })) {
                    self.stack.push(Context::slot(false));
                }
            }
            AnnotationToken::FieldEnd => {
                if !matches!(self.stack.last(), Some(Context::Slot { .. } | Context::Struct { .. }))
                {
                    return;
                }
                let value = self.finish_value();
                match (self.stack.last_mut(), value) {
                    (Some(Context::Struct { fields, name, .. }), Some(value)) => {
                        fields.push((name.trim().to_string(), value));
                        name.clear();
                    }
                    _ => tracing::debug!("field end without an open struct"),
                }
            }

            AnnotationToken::ArgBegin
            | AnnotationToken::ArgNameEnd
            | AnnotationToken::ArgValue
            | AnnotationToken::ArgEnd => {}

            AnnotationToken::ValueHistoryBegin => self.stack.push(Context::ValueHistory),
            AnnotationToken::ValueHistoryValue => {
                if matches!(self.stack.last(), Some(Context::ValueHistory)) {
                    self.stack.push(Context::slot(false));
                }
            }
            AnnotationToken::ValueHistoryEnd => {
                let value = self.finish_value();
                if self
                    .pop_to(|c| matches!(c, Context::ValueHistory))
                    .is_some()
                {
                    let value = value.unwrap_or_default();
                    self.events.push(Event::Evaluation(value.to_string()));
                }
            }

            AnnotationToken::Signal | AnnotationToken::Signalled => {
                self.stack.push(Context::Signal {
                    signal: Signal::default(),
                    part: SignalPart::Other,
                })
            }
            AnnotationToken::SignalName => self.set_signal_part(SignalPart::Name),
            AnnotationToken::SignalString => self.set_signal_part(SignalPart::Description),
            AnnotationToken::SignalNameEnd => self.set_signal_part(SignalPart::Other),
            AnnotationToken::SignalStringEnd => {
                if let Some(Context::Signal { signal, .. }) =
                    self.pop_to(|c| matches!(c, Context::Signal { .. }))
                {
                    self.emit_signal(signal);
                }
            }

            AnnotationToken::Exited => {
                let code = params.parse().unwrap_or_else(|_| {
                    tracing::debug!(%params, "unparseable exit code");
                    0
                });
                self.events.push(Event::Exited(code));
            }
            AnnotationToken::Starting
            | AnnotationToken::Stopped
            | AnnotationToken::BreakpointHit => {}
            AnnotationToken::Unknown(name) => {
                tracing::trace!(%name, "ignoring unknown annotation");
            }
        }
    }

    fn set_display_part(&mut self, part: DisplayPart) {
        if let Some(Context::Display(display)) = self.stack.last_mut() {
            display.part = part;
        }
    }

    fn set_frame_part(&mut self, part: FramePart) {
        if let Some(Context::Frame(frame)) = self.stack.last_mut() {
            frame.part = part;
        }
    }

    fn set_signal_part(&mut self, part: SignalPart) {
        if let Some(Context::Signal { part: current, .. }) = self.stack.last_mut() {
            *current = part;
        }
    }

    fn in_array_element(&self) -> bool {
        self.stack.iter().rev().any(|c| matches!(c, Context::Array { .. }))
    }

    /// Close the innermost open value, folding any structs opened inside it
    fn finish_value(&mut self) -> Option<Value> {
        loop {
            match self.stack.pop()? {
                Context::Slot {
                    text,
                    composite,
                    element,
                } => {
                    return Some(composite.unwrap_or_else(|| Value::Scalar(clean_scalar(&text, element))));
                }
                Context::Struct { fields, .. } => self.attach(Value::Struct(fields)),
                other => {
                    self.stack.push(other);
                    return None;
                }
            }
        }
    }

    fn attach(&mut self, value: Value) {
        match self.stack.last_mut() {
            Some(Context::Slot { composite, .. }) => *composite = Some(value),
            _ => tracing::debug!("composite value without an enclosing slot"),
        }
    }

    /// Pop contexts until one matching `pred` is found
    fn pop_to<F>(&mut self, pred: F) -> Option<Context>
    where
        F: Fn(&Context) -> bool,
    {
        if !self.stack.iter().any(&pred) {
            tracing::debug!("end annotation without a matching begin");
            return None;
        }
        while let Some(context) = self.stack.pop() {
            if pred(&context) {
                return Some(context);
            }
            tracing::debug!(?context, "discarding unclosed context");
        }
        None
    }

    fn close_display(&mut self) {
        let value = self.finish_value();
        let Some(Context::Display(display)) = self.pop_to(|c| matches!(c, Context::Display(_)))
        else {
            return;
        };
        self.stage_display(display, value);
    }

    /// Displays are handed over together when the command completes
    fn stage_display(&mut self, display: DisplayBuilder, value: Option<Value>) {
        let number = display.number.trim().trim_end_matches(':');
        match number.parse() {
            Ok(slot) => self.displays.push(Display {
                slot,
                expression: display.expression.trim().to_string(),
                value: value.unwrap_or_default(),
            }),
            Err(_) => tracing::debug!(%number, "display without a valid number"),
        }
    }

    fn close_error(&mut self) {
        if let Some(Context::Error(lines)) = self.pop_to(|c| matches!(c, Context::Error(_))) {
            let text = lines.join("\n");
            match &mut self.error {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&text);
                }
                None => self.error = Some(text),
            }
        }
    }

    fn emit_signal(&mut self, mut signal: Signal) {
        signal.name = signal.name.trim().to_string();
        signal.description = signal.description.trim().to_string();
        self.events.push(Event::Signal(signal));
    }

    /// Force-close every open context, keeping whatever is usable
    fn close_all(&mut self) {
        loop {
            let value = self.salvage_value();
            let Some(context) = self.stack.pop() else {
                if value.is_some() {
                    tracing::debug!("dropping value outside of a display");
                }
                return;
            };
            match context {
                Context::Display(display) => self.stage_display(display, value),
                Context::ValueHistory => {
                    let value = value.unwrap_or_default();
                    self.events.push(Event::Evaluation(value.to_string()));
                }
                Context::Frame(frame) => self.frames.extend(frame.build()),
                Context::Signal { signal, .. } => self.emit_signal(signal),
                Context::Error(lines) => {
                    self.stack.push(Context::Error(lines));
                    self.close_error();
                }
                other => tracing::debug!(context = ?other, "dropping unfinished context"),
            }
        }
    }

    /// Fold the unfinished value contexts on top of the stack into one value,
    /// keeping the fields and elements read so far
    fn salvage_value(&mut self) -> Option<Value> {
        let mut value = None;
        loop {
            match self.stack.pop() {
                Some(Context::Slot {
                    text,
                    composite,
                    element,
                }) => {
                    value = Some(
                        value
                            .or(composite)
                            .unwrap_or_else(|| Value::Scalar(clean_scalar(&text, element))),
                    );
                }
                Some(Context::Struct {
                    mut fields, name, ..
                }) => {
                    if let Some(field) = value.take() {
                        fields.push((name.trim().to_string(), field));
                    }
                    value = Some(Value::Struct(fields));
                }
                Some(Context::Array { mut elements }) => {
                    if let Some(element) = value.take().filter(|v| !is_empty_scalar(v)) {
                        elements.push(element);
                    }
                    value = Some(Value::Array(elements));
                }
                Some(other) => {
                    self.stack.push(other);
                    return value;
                }
                None => return value,
            }
        }
    }

    fn flush_captured(&mut self) {
        let lines = mem::take(&mut self.captured);
        self.join_captured = false;
        let mode = mem::take(&mut self.mode);
        let event = match mode {
            CaptureMode::Plain => return,
            CaptureMode::Locals => Event::Locals(lines),
            CaptureMode::Params => Event::Params(lines),
            CaptureMode::Registers => {
                Event::Registers(lines.iter().filter_map(|l| Register::parse(l)).collect())
            }
            CaptureMode::Disassembly => Event::Disassembly(lines),
            CaptureMode::Memory => Event::Memory(lines),
        };
        self.events.push(event);
    }

    fn complete_command(&mut self) {
        if !self.frames.is_empty() {
            self.events
                .push(Event::Backtrace(mem::take(&mut self.frames)));
        }
        if !self.displays.is_empty() {
            self.events
                .push(Event::Watches(mem::take(&mut self.displays)));
        }
        let completion = Completion {
            command: self.current.take(),
            output: mem::take(&mut self.output),
            error: self.error.take(),
        };
        tracing::debug!(
            command = ?completion.command.as_ref().map(Command::line),
            failed = completion.failed(),
            "command complete"
        );
        self.events.push(Event::CommandCompleted(completion));
    }
}

fn is_empty_scalar(value: &Value) -> bool {
    matches!(value, Value::Scalar(s) if s.is_empty())
}

fn clean_scalar(text: &str, element: bool) -> String {
    let text = text.trim();
    let text = if element {
        text.strip_prefix(',').unwrap_or(text).trim_start()
    } else {
        text
    };
    text.to_string()
}

/// `<file>:<line>:<character>:<middle|beg>:<address>`, where the file name
/// may itself contain colons
fn parse_source(params: &str) -> Option<(PathBuf, usize)> {
    let mut parts = params.rsplitn(5, ':');
    let _address = parts.next()?;
    let _position = parts.next()?;
    let _character = parts.next()?;
    let line = parts.next()?.parse().ok()?;
    let file = parts.next()?;
    Some((PathBuf::from(file), line))
}
