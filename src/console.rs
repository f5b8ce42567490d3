//! User-facing output.
//!
//! A `Console` is passed by reference to whatever needs to print. Nesting is
//! a property of the value (`nested()` returns an indented child), so there
//! is no global indentation state. Diagnostics go through `tracing`, not here.

use crate::core::types::Status;
use colored::{ColoredString, Colorize};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone)]
enum Sink {
    Stdout,
    Buffer(Rc<RefCell<String>>),
}

/// Indented, optionally colored line printer.
#[derive(Clone)]
pub struct Console {
    sink: Sink,
    depth: usize,
    verbose: bool,
    color: bool,
}

impl Console {
    /// Print to stdout.
    pub fn stdout(verbose: bool) -> Self {
        Self {
            sink: Sink::Stdout,
            depth: 0,
            verbose,
            color: true,
        }
    }

    /// Collect plain lines in memory.
    pub fn buffered(verbose: bool) -> Self {
        Self {
            sink: Sink::Buffer(Rc::new(RefCell::new(String::new()))),
            depth: 0,
            verbose,
            color: false,
        }
    }

    /// Everything written so far (empty for stdout consoles).
    pub fn contents(&self) -> String {
        match &self.sink {
            Sink::Stdout => String::new(),
            Sink::Buffer(buf) => buf.borrow().clone(),
        }
    }

    /// Child console, indented one level deeper, sharing the same sink.
    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn line(&self, msg: &str) {
        let indent = "  ".repeat(self.depth);
        match &self.sink {
            Sink::Stdout => println!("{}{}", indent, msg),
            Sink::Buffer(buf) => {
                let mut buf = buf.borrow_mut();
                buf.push_str(&indent);
                buf.push_str(msg);
                buf.push('\n');
            }
        }
    }

    fn paint(&self, text: &str, style: fn(&str) -> ColoredString) -> String {
        if self.color {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn header(&self, title: &str) {
        self.line(&self.paint(title, |s| s.bold()));
    }

    pub fn info(&self, msg: &str) {
        self.line(&format!("{} {}", self.paint("ℹ", |s| s.blue()), msg));
    }

    pub fn success(&self, msg: &str) {
        self.line(&format!("{} {}", self.paint("✓", |s| s.green()), msg));
    }

    pub fn warn(&self, msg: &str) {
        self.line(&format!("{} {}", self.paint("⚠", |s| s.yellow()), msg));
    }

    pub fn dim(&self, msg: &str) {
        self.line(&self.paint(msg, |s| s.dimmed()));
    }

    /// Only shown with `--verbose`.
    pub fn detail(&self, msg: &str) {
        if self.verbose {
            self.dim(msg);
        }
    }

    /// Status marker used in plan listings.
    pub fn status_icon(&self, status: Option<Status>) -> String {
        match status {
            Some(Status::Missing) => self.paint("+", |s| s.green().bold()),
            Some(Status::Stale) => self.paint("~", |s| s.yellow().bold()),
            Some(Status::Valid) => self.paint("✓", |s| s.green()),
            Some(Status::Invalid) => self.paint("✗", |s| s.red().bold()),
            None => self.paint("?", |s| s.dimmed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_indents_and_shares_sink() {
        let console = Console::buffered(false);
        console.line("top");
        let child = console.nested();
        child.line("child");
        child.nested().warn("deep");
        console.line("back");
        assert_eq!(console.contents(), "top\n  child\n    ⚠ deep\nback\n");
        assert_eq!(child.contents(), console.contents());
    }

    #[test]
    fn test_detail_only_when_verbose() {
        let quiet = Console::buffered(false);
        quiet.detail("hidden");
        assert!(quiet.contents().is_empty());
        let loud = Console::buffered(true);
        loud.detail("shown");
        assert_eq!(loud.contents(), "shown\n");
    }

    #[test]
    fn test_status_icons_plain() {
        let c = Console::buffered(false);
        assert_eq!(c.status_icon(Some(Status::Missing)), "+");
        assert_eq!(c.status_icon(Some(Status::Stale)), "~");
        assert_eq!(c.status_icon(None), "?");
    }

    #[test]
    fn test_stdout_console_has_no_contents() {
        assert!(Console::stdout(false).contents().is_empty());
    }
}
