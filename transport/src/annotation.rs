//! The closed set of annotation markers GDB emits at `--annotate=2`

/// A single annotation marker, recognised from the text following
/// [`crate::ANNOTATION_MARKER`].
///
/// The last group of variants is never produced by the tokenizer: the
/// protocol parser substitutes them for [`AnnotationToken::PostPrompt`]
/// depending on which command is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationToken {
    PrePrompt,
    Prompt,
    PostPrompt,
    Source,

    DisplayBegin,
    DisplayNumberEnd,
    DisplayFormat,
    DisplayExpression,
    DisplayExpressionEnd,
    DisplayValue,
    DisplayEnd,

    FrameBegin,
    FrameEnd,
    FrameFunctionName,
    FrameArgs,
    FrameSourceBegin,
    FrameSourceFile,
    FrameSourceFileEnd,
    FrameSourceLine,
    FrameSourceEnd,
    FrameWhere,

    ErrorBegin,
    ErrorEnd,

    ArraySectionBegin,
    ArraySectionEnd,
    Elt,
    EltRep,
    EltRepEnd,

    FieldBegin,
    FieldNameEnd,
    FieldValue,
    FieldEnd,

    ArgBegin,
    ArgNameEnd,
    ArgValue,
    ArgEnd,

    ValueHistoryBegin,
    ValueHistoryValue,
    ValueHistoryEnd,

    Signal,
    SignalName,
    SignalNameEnd,
    SignalString,
    SignalStringEnd,
    Signalled,

    Exited,
    Starting,
    Stopped,
    BreakpointHit,

    Locals,
    Params,
    InfoRegisters,
    InfoAsm,
    Memory,

    /// A marker this client does not know about
    Unknown(String),
}

impl AnnotationToken {
    /// Classify the marker name (the first word after the escape sequence).
    ///
    /// Matching is case-exact. Names outside the known set become
    /// [`AnnotationToken::Unknown`] instead of failing.
    pub fn from_marker(name: &str) -> Self {
        match name {
            "pre-prompt" => Self::PrePrompt,
            "prompt" => Self::Prompt,
            "post-prompt" => Self::PostPrompt,
            "source" => Self::Source,
            "display-begin" => Self::DisplayBegin,
            "display-number-end" => Self::DisplayNumberEnd,
            "display-format" => Self::DisplayFormat,
            "display-expression" => Self::DisplayExpression,
            "display-expression-end" => Self::DisplayExpressionEnd,
            "display-value" => Self::DisplayValue,
            "display-end" => Self::DisplayEnd,
            "frame-begin" => Self::FrameBegin,
            "frame-end" => Self::FrameEnd,
            "frame-function-name" => Self::FrameFunctionName,
            "frame-args" => Self::FrameArgs,
            "frame-source-begin" => Self::FrameSourceBegin,
            "frame-source-file" => Self::FrameSourceFile,
            "frame-source-file-end" => Self::FrameSourceFileEnd,
            "frame-source-line" => Self::FrameSourceLine,
            "frame-source-end" => Self::FrameSourceEnd,
            "frame-where" => Self::FrameWhere,
            "error-begin" => Self::ErrorBegin,
            "error" => Self::ErrorEnd,
            "array-section-begin" => Self::ArraySectionBegin,
            "array-section-end" => Self::ArraySectionEnd,
            "elt" => Self::Elt,
            "elt-rep" => Self::EltRep,
            "elt-rep-end" => Self::EltRepEnd,
            "field-begin" => Self::FieldBegin,
            "field-name-end" => Self::FieldNameEnd,
            "field-value" => Self::FieldValue,
            "field-end" => Self::FieldEnd,
            "arg-begin" => Self::ArgBegin,
            "arg-name-end" => Self::ArgNameEnd,
            "arg-value" => Self::ArgValue,
            "arg-end" => Self::ArgEnd,
            "value-history-begin" => Self::ValueHistoryBegin,
            "value-history-value" => Self::ValueHistoryValue,
            "value-history-end" => Self::ValueHistoryEnd,
            "signal" => Self::Signal,
            "signal-name" => Self::SignalName,
            "signal-name-end" => Self::SignalNameEnd,
            "signal-string" => Self::SignalString,
            "signal-string-end" => Self::SignalStringEnd,
            "signalled" => Self::Signalled,
            "exited" => Self::Exited,
            "starting" => Self::Starting,
            "stopped" => Self::Stopped,
            "breakpoint" => Self::BreakpointHit,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Tokens that only structure a printed value
    pub fn is_value_structure(&self) -> bool {
        matches!(
            self,
            Self::ArraySectionBegin
                | Self::ArraySectionEnd
                | Self::Elt
                | Self::EltRep
                | Self::EltRepEnd
                | Self::FieldBegin
                | Self::FieldNameEnd
                | Self::FieldValue
                | Self::FieldEnd
        )
    }
}
