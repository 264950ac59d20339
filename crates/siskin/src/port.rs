use std::io::{self, Write as _};

use crate::error::{ErrorKind, SchemeError, SchemeResult};

/// Trait for sinks the printer writes to.
///
/// Implement this to capture or redirect printer output. The printer calls
/// `put_str` for multi-byte runs and `put_char` for single characters; the
/// only errors a sink may raise are I/O errors.
pub trait PortWrite {
    /// Writes a string slice to the sink.
    fn put_str(&mut self, s: &str) -> SchemeResult<()>;

    /// Writes a single character to the sink.
    fn put_char(&mut self, c: char) -> SchemeResult<()> {
        self.put_str(c.encode_utf8(&mut [0u8; 4]))
    }
}

fn io_error(err: &io::Error) -> SchemeError {
    SchemeError::new(ErrorKind::IoError, err.to_string())
}

/// Default sink: the process's standard output, unbuffered per call.
#[derive(Debug, Default)]
pub struct StdoutPort;

impl PortWrite for StdoutPort {
    fn put_str(&mut self, s: &str) -> SchemeResult<()> {
        io::stdout().write_all(s.as_bytes()).map_err(|e| io_error(&e))
    }
}

/// A sink that collects all output into a string.
///
/// Useful for testing and for capturing printed output programmatically.
#[derive(Debug, Default)]
pub struct BufferPort(String);

impl BufferPort {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected output.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    /// Consumes the sink and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PortWrite for BufferPort {
    fn put_str(&mut self, s: &str) -> SchemeResult<()> {
        self.0.push_str(s);
        Ok(())
    }

    fn put_char(&mut self, c: char) -> SchemeResult<()> {
        self.0.push(c);
        Ok(())
    }
}

/// A sink that discards all output.
#[derive(Debug, Default)]
pub struct NullPort;

impl PortWrite for NullPort {
    fn put_str(&mut self, _s: &str) -> SchemeResult<()> {
        Ok(())
    }
}

/// A port as a heap value.
///
/// Port buffering and the full read side live outside the core; the heap
/// object exists so ports participate in the value universe (the printer
/// names them, the expander and serializer reject them).
#[derive(Debug)]
pub struct Port {
    pub kind: PortKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// The interpreter's standard output.
    Stdout,
    /// A sink that discards everything.
    Sink,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_port_collects() {
        let mut out = BufferPort::new();
        out.put_str("ab").unwrap();
        out.put_char('c').unwrap();
        assert_eq!(out.output(), "abc");
        assert_eq!(out.into_output(), "abc");
    }

    #[test]
    fn null_port_discards() {
        let mut out = NullPort;
        out.put_str("ignored").unwrap();
        out.put_char('x').unwrap();
    }
}
