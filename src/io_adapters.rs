use std::cell::RefCell;
use std::io::{Result as IoResult, Write};
use std::rc::Rc;

/// Handle to the bytes collected by a [`MemWriter`].
pub type SharedBuffer = Rc<RefCell<Vec<u8>>>;

/// Memory-backed writer for capturing console output.
///
/// Used in place of stdout when the interpreter runs under test, and anywhere
/// a caller wants to read back what was printed.
pub struct MemWriter {
    buf: SharedBuffer,
}

impl MemWriter {
    /// Public constructor.
    pub fn new() -> Self {
        Self {
            buf: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Convenience: create writer and return (writer, rc_handle).
    pub fn with_handle() -> (Self, SharedBuffer) {
        let mw = MemWriter::new();
        let rc = mw.buf.clone();
        (mw, rc)
    }
}

impl Default for MemWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.buf.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Lossy UTF-8 view of everything written to `buf` so far.
pub fn buffer_text(buf: &SharedBuffer) -> String {
    String::from_utf8_lossy(&buf.borrow()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_sees_writes() {
        let (mut writer, handle) = MemWriter::with_handle();
        write!(writer, "hello ").unwrap();
        writeln!(writer, "world").unwrap();
        assert_eq!(buffer_text(&handle), "hello world\n");
    }
}
