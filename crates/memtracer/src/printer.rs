use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// Formatted-text sink used for dumps and diagnostics.
///
/// Printers are exercised only while the tracer holds its lock, and
/// must not call back into the tracer that is printing.
pub trait Printer: Send {
    fn print(&mut self, text: fmt::Arguments);
}

/// The default sink: standard output.
pub struct StdoutPrinter;

impl Printer for StdoutPrinter {
    fn print(&mut self, text: fmt::Arguments) {
        let _ = io::stdout().write_fmt(text);
    }
}

/// Writes to any `io::Write`, e.g. a dump file.
pub struct WritePrinter<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WritePrinter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Printer for WritePrinter<W> {
    fn print(&mut self, text: fmt::Arguments) {
        let _ = self.writer.write_fmt(text);
    }
}

/// Captures output into a shared string buffer.
#[derive(Clone, Default)]
pub struct MemoryPrinter {
    buffer: Arc<Mutex<String>>,
}

impl MemoryPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything printed so far. Clones of the printer
    /// share the buffer, so the handle stays useful after the printer
    /// has been handed to a tracer.
    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Printer for MemoryPrinter {
    fn print(&mut self, text: fmt::Arguments) {
        use fmt::Write as _;
        let _ = self.buffer.lock().write_fmt(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_printer_shares_its_buffer() {
        let printer = MemoryPrinter::new();
        let mut sink: Box<dyn Printer> = Box::new(printer.clone());
        sink.print(format_args!("hello {}", 42));
        assert_eq!(printer.contents(), "hello 42");
        printer.clear();
        assert_eq!(printer.contents(), "");
    }

    #[test]
    fn write_printer_forwards_to_the_writer() {
        let mut printer = WritePrinter::new(Vec::new());
        printer.print(format_args!("line\n"));
        assert_eq!(printer.into_inner(), b"line\n");
    }
}
