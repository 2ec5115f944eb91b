//! User-facing status output.
//!
//! Everything the interpreter says to the user goes through [`Console`]: plain
//! lines, and tagged status lines (`[*]` info, `[+]` success, `[~]` warning,
//! `[!]` error). Diagnostics meant for developers go through `tracing` instead.

use crate::io_adapters::{MemWriter, SharedBuffer};
use std::fmt::Display;
use std::io::{self, IsTerminal, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Cyan,
}

impl Color {
    fn code(self) -> &'static str {
        match self {
            Color::Red => "31",
            Color::Green => "32",
            Color::Yellow => "33",
            Color::Blue => "34",
            Color::Cyan => "36",
        }
    }
}

pub struct Console {
    out: Box<dyn Write>,
    color: bool,
}

impl Console {
    pub fn new(out: Box<dyn Write>, color: bool) -> Self {
        Self { out, color }
    }

    /// Console on the process stdout, colored when stdout is a terminal.
    pub fn stdout() -> Self {
        let color = io::stdout().is_terminal();
        Self::new(Box::new(io::stdout()), color)
    }

    /// Uncolored console writing into memory, plus a handle to read it back.
    pub fn captured() -> (Self, SharedBuffer) {
        let (writer, handle) = MemWriter::with_handle();
        (Self::new(Box::new(writer), false), handle)
    }

    pub fn paint(&self, color: Color, text: impl Display) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", color.code(), text)
        } else {
            text.to_string()
        }
    }

    // A console that cannot write has nowhere to report it.
    pub fn line(&mut self, text: impl Display) {
        let _ = writeln!(self.out, "{}", text);
    }

    pub fn blank(&mut self) {
        let _ = writeln!(self.out);
    }

    /// Writes without a trailing newline and flushes.
    pub fn raw(&mut self, text: impl Display) {
        let _ = write!(self.out, "{}", text);
        let _ = self.out.flush();
    }

    fn tagged(&mut self, tag: &str, color: Color, text: impl Display) {
        let tag = self.paint(color, tag);
        self.line(format!("{} {}", tag, text));
    }

    pub fn info(&mut self, text: impl Display) {
        self.tagged("[*]", Color::Blue, text);
    }

    pub fn success(&mut self, text: impl Display) {
        self.tagged("[+]", Color::Green, text);
    }

    pub fn warning(&mut self, text: impl Display) {
        self.tagged("[~]", Color::Yellow, text);
    }

    pub fn error(&mut self, text: impl Display) {
        self.tagged("[!]", Color::Red, text);
    }
}
