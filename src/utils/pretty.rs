//! Formatting support for textual dumps.
//!
//! Expression-shaped data implements [`PrettyPrint`] and renders through
//! the `pretty` document allocator; the IR printer uses the line-oriented
//! [`IndentWriter`] since its output is strictly one operation per line.

use pretty::{BoxAllocator, DocAllocator, DocBuilder};

/// Line width used when no explicit width is given.
pub const DEFAULT_WIDTH: usize = 80;

/// A value that renders as a layout document.
pub trait PrettyPrint {
    /// Convert to a layout document.
    fn to_doc<'a, D: DocAllocator<'a>>(&self, allocator: &'a D) -> DocBuilder<'a, D>;

    /// Render with an explicit line width.
    fn pretty_print(&self, width: usize) -> String {
        let allocator = BoxAllocator;
        let mut rendered = String::new();
        let result = match self.to_doc(&allocator).render_fmt(width, &mut rendered) {
            Ok(()) => rendered,
            Err(_) => String::new(),
        };
        result
    }

    /// Render at [`DEFAULT_WIDTH`].
    fn pretty(&self) -> String {
        self.pretty_print(DEFAULT_WIDTH)
    }
}

/// Collects output lines, indenting each one by the current scope depth.
#[derive(Debug, Default)]
pub struct IndentWriter {
    depth: usize,
    lines: Vec<String>,
}

impl IndentWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit one line at the current depth.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.lines.push(String::new());
            return;
        }
        let mut indented = "  ".repeat(self.depth);
        indented.push_str(text);
        self.lines.push(indented);
    }

    /// Emit `header {`, run `body` one level deeper, then close the brace.
    pub fn scope<F: FnOnce(&mut Self)>(&mut self, header: &str, body: F) {
        self.line(format!("{} {{", header));
        self.depth += 1;
        body(self);
        self.depth -= 1;
        self.line("}");
    }

    /// Run `body` one level deeper, without braces.
    pub fn indented<F: FnOnce(&mut Self)>(&mut self, body: F) {
        self.depth += 1;
        body(self);
        self.depth -= 1;
    }

    /// The accumulated text, newline-terminated.
    pub fn finish(self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}
