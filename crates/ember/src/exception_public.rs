//! The exception type returned to embedders.
//!
//! Heap exception objects only live as long as their runtime; when one escapes to the
//! host it is copied into an [`Exception`], together with its traceback and its
//! `__cause__`/`__context__` chain, and formatted the way Python prints uncaught
//! exceptions.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::{
    exception_private::{ExcType, ExceptionRaise, RunError, SimpleException},
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    object::Object,
    resource::ResourceTracker,
    value::{Value, class_name},
};

/// Chains longer than this are cut off when copying out of the heap.
const MAX_CHAIN_DEPTH: usize = 64;

/// One line of a traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub filename: String,
    pub line: u32,
    /// Name of the code object running in the frame.
    pub name: String,
}

/// An exception raised by code running in the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    type_name: String,
    exc_type: ExcType,
    message: Option<String>,
    traceback: Vec<StackFrame>,
    cause: Option<Box<Exception>>,
    context: Option<Box<Exception>>,
    suppress_context: bool,
    args: Vec<Object>,
}

impl Exception {
    /// Creates an exception of a builtin type with no traceback.
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        let args = message.iter().map(|m| Object::String(m.clone())).collect();
        Self {
            type_name: exc_type.to_string(),
            exc_type,
            message: message.filter(|m| !m.is_empty()),
            traceback: Vec::new(),
            cause: None,
            context: None,
            suppress_context: false,
            args,
        }
    }

    /// The builtin exception class, for user exception classes the builtin they derive from.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    /// The name of the exception's class.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// `str()` of the exception, `None` when empty.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Traceback frames, outermost first.
    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }

    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    #[must_use]
    pub fn context(&self) -> Option<&Self> {
        self.context.as_deref()
    }

    #[must_use]
    pub fn suppress_context(&self) -> bool {
        self.suppress_context
    }

    /// The exception's `args`; for `StopIteration` the first one is the return value.
    #[must_use]
    pub fn args(&self) -> &[Object] {
        &self.args
    }

    /// Whether `except exc_type:` would catch this exception.
    #[must_use]
    pub fn is_instance_of(&self, exc_type: ExcType) -> bool {
        self.exc_type.is_subclass_of(exc_type)
    }

    /// The last line of the formatted exception: `Type: message`, or just `Type`.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {message}", self.type_name),
            None => self.type_name.clone(),
        }
    }

    #[must_use]
    pub fn with_traceback(mut self, traceback: Vec<StackFrame>) -> Self {
        self.traceback = traceback;
        self
    }

    /// Converts a runtime error that escaped every frame, releasing what it owns.
    pub(crate) fn from_run_error(err: RunError, heap: &mut Heap<impl ResourceTracker>, interns: &Interns) -> Self {
        match err {
            RunError::Raised(id) => {
                let exc = Self::from_heap(id, heap, interns);
                heap.dec_ref(id);
                exc
            }
            RunError::Exc(raise) | RunError::UncatchableExc(raise) => Self::from_raise(&raise, interns),
            RunError::Internal(msg) => Self::new(ExcType::SystemError, Some(format!("internal error: {msg}"))),
        }
    }

    /// Converts an exception that never got a heap object. Its frames are innermost first.
    pub(crate) fn from_raise(raise: &ExceptionRaise, interns: &Interns) -> Self {
        let traceback = raise
            .frames
            .iter()
            .rev()
            .map(|frame| StackFrame {
                filename: interns.get_str(frame.filename).to_owned(),
                line: frame.line,
                name: interns.get_str(frame.name).to_owned(),
            })
            .collect();
        Self::new(raise.exc.exc_type(), raise.exc.arg().cloned()).with_traceback(traceback)
    }

    /// Copies a heap exception object, following its chain.
    pub(crate) fn from_heap(id: HeapId, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> Self {
        let mut seen = Vec::new();
        Self::from_heap_inner(id, heap, interns, &mut seen)
    }

    fn from_heap_inner(
        id: HeapId,
        heap: &Heap<impl ResourceTracker>,
        interns: &Interns,
        seen: &mut Vec<HeapId>,
    ) -> Self {
        let HeapData::Exception(exc) = heap.get(id) else {
            return Self::new(ExcType::SystemError, Some("non-exception object raised".to_owned()));
        };
        seen.push(id);
        let message = exc.str_message(heap, interns);
        let chained = |link: &Value, seen: &mut Vec<HeapId>| -> Option<Box<Self>> {
            let link_id = link.ref_id()?;
            if seen.contains(&link_id) || seen.len() >= MAX_CHAIN_DEPTH {
                return None;
            }
            Some(Box::new(Self::from_heap_inner(link_id, heap, interns, seen)))
        };
        let cause = chained(&exc.cause, seen);
        let context = chained(&exc.context, seen);
        Self {
            type_name: class_name(&exc.class, heap).into_owned(),
            exc_type: exc.builtin_type(heap),
            message: Some(message).filter(|m| !m.is_empty()),
            traceback: traceback_frames(&exc.traceback, heap, interns),
            cause,
            context,
            suppress_context: exc.suppress_context,
            args: exc
                .args
                .iter()
                .map(|arg| Object::from_value(arg, heap, interns))
                .collect(),
        }
    }
}

/// Walks a traceback chain from the outermost frame inwards.
fn traceback_frames(tb: &Value, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    let mut current = tb.ref_id();
    while let Some(id) = current {
        let HeapData::Traceback(entry) = heap.get(id) else {
            break;
        };
        frames.push(StackFrame {
            filename: interns.get_str(entry.filename).to_owned(),
            line: entry.lineno,
            name: interns.get_str(entry.name).to_owned(),
        });
        current = entry.next.ref_id();
    }
    frames
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cause) = &self.cause {
            writeln!(f, "{cause}")?;
            f.write_str("\nThe above exception was the direct cause of the following exception:\n\n")?;
        } else if let Some(context) = self.context.as_ref().filter(|_| !self.suppress_context) {
            writeln!(f, "{context}")?;
            f.write_str("\nDuring handling of the above exception, another exception occurred:\n\n")?;
        }
        if !self.traceback.is_empty() {
            f.write_str("Traceback (most recent call last):\n")?;
            f.write_str(&format_frames(&self.traceback))?;
        }
        f.write_str(&self.summary())
    }
}

/// Formats traceback lines, collapsing runs of more than three identical frames.
fn format_frames(frames: &[StackFrame]) -> String {
    const REPEAT_CUTOFF: usize = 3;
    let mut out = String::new();
    let mut last: Option<&StackFrame> = None;
    let mut count = 0;
    let flush = |out: &mut String, count: usize| {
        if count > REPEAT_CUTOFF {
            let more = count - REPEAT_CUTOFF;
            let _ = writeln!(
                out,
                "  [Previous line repeated {more} more time{}]",
                if more == 1 { "" } else { "s" }
            );
        }
    };
    for frame in frames {
        if last == Some(frame) {
            count += 1;
        } else {
            flush(&mut out, count);
            last = Some(frame);
            count = 1;
        }
        if count <= REPEAT_CUTOFF {
            let _ = writeln!(out, "  File \"{}\", line {}, in {}", frame.filename, frame.line, frame.name);
        }
    }
    flush(&mut out, count);
    out
}

impl std::error::Error for Exception {}

/// An exception reported by the embedder, such as a failing [`PrintWriter`](crate::PrintWriter),
/// is raised in the running frame as a builtin exception.
impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        SimpleException::new(exc.exc_type, exc.message).into()
    }
}
