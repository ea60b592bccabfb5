use std::{
    borrow::Cow,
    cell::RefCell,
    io::{self, Write as _},
};

use crate::exception_public::Exception;

/// Destination of the `print()` builtin.
///
/// A failing writer makes `print()` raise the returned exception in the running frame.
pub trait PrintWriter {
    /// Writes one formatted argument, without separators or the line terminator.
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception>;

    /// Writes a separator or terminator character.
    fn stdout_push(&mut self, end: char) -> Result<(), Exception>;
}

/// Writes to stdout, buffered per thread and flushed when the writer is dropped.
#[derive(Debug, Default)]
pub struct StdPrint;

thread_local! {
    static STDOUT_BUFFER: RefCell<String> = const { RefCell::new(String::new()) };
}

impl StdPrint {
    /// Flushes buffered output to stdout.
    pub fn flush(&mut self) {
        STDOUT_BUFFER.with(|buffer| {
            let mut buffer = buffer.borrow_mut();
            if buffer.is_empty() {
                return;
            }
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(buffer.as_bytes());
            let _ = stdout.flush();
            buffer.clear();
        });
    }
}

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push_str(&output));
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push(end));
        if end == '\n' && STDOUT_BUFFER.with(|buffer| buffer.borrow().len()) > 8 * 1024 {
            self.flush();
        }
        Ok(())
    }
}

impl Drop for StdPrint {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Collects everything printed into a string, for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the output collected so far and starts over.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.0)
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.0.push_str(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        self.0.push(end);
        Ok(())
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) -> Result<(), Exception> {
        Ok(())
    }

    fn stdout_push(&mut self, _end: char) -> Result<(), Exception> {
        Ok(())
    }
}
