//! Source location tracking for error reporting.
//!
//! Ranges keep a shared handle to the source buffer they point into, so a
//! diagnostic can render the offending line long after lexing is done.

use std::fmt;
use std::sync::Arc;

/// An immutable source buffer together with its file name.
///
/// All ranges produced from one compilation share the same buffer.
#[derive(Debug)]
pub struct SourceFile {
    /// File name used in diagnostics (`-` for stdin).
    pub name: String,
    /// The full source text.
    pub contents: String,
    /// Byte offsets at which each line starts.
    line_starts: Vec<usize>,
}

impl SourceFile {
    /// Create a shared source file.
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Arc<Self> {
        let contents = contents.into();
        let mut line_starts = vec![0];
        for (i, c) in contents.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Arc::new(Self {
            name: name.into(),
            contents,
            line_starts,
        })
    }

    /// Get a line of source (1-indexed), without the trailing newline.
    pub fn line(&self, line_number: usize) -> Option<&str> {
        if line_number == 0 || line_number > self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line_number - 1];
        let end = self
            .line_starts
            .get(line_number)
            .copied()
            .unwrap_or(self.contents.len());
        Some(self.contents[start..end].trim_end_matches('\n'))
    }

    /// Number of lines in the buffer.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

/// A byte range into a shared source buffer, with line/column bookkeeping.
#[derive(Clone)]
pub struct SourceRange {
    /// The shared source buffer.
    pub file: Arc<SourceFile>,
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
    /// Start line (1-indexed).
    pub start_line: usize,
    /// Start column (1-indexed).
    pub start_col: usize,
    /// End line (1-indexed).
    pub end_line: usize,
    /// End column (1-indexed).
    pub end_col: usize,
}

impl SourceRange {
    /// Create a new range.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file: Arc<SourceFile>,
        start: usize,
        end: usize,
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Self {
        Self {
            file,
            start,
            end,
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// An empty range at the start of the given file.
    pub fn start_of(file: Arc<SourceFile>) -> Self {
        Self::new(file, 0, 0, 1, 1, 1, 1)
    }

    /// The raw text covered by this range.
    pub fn text(&self) -> &str {
        &self.file.contents[self.start..self.end]
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Merge two ranges into one covering both.
    pub fn merge(&self, other: &SourceRange) -> SourceRange {
        let mut r = self.clone();
        if other.start < r.start {
            r.start = other.start;
            r.start_line = other.start_line;
            r.start_col = other.start_col;
        }
        if other.end > r.end {
            r.end = other.end;
            r.end_line = other.end_line;
            r.end_col = other.end_col;
        }
        r
    }

    /// Check whether this range fully contains `other`.
    pub fn contains(&self, other: &SourceRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Render the source line of this range with a `~~~` underline.
    pub fn highlight(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let line = self.file.line(self.start_line).unwrap_or("");
        let _ = writeln!(out, "{}", line);
        let col = self.start_col.saturating_sub(1);
        let width = if self.end_line == self.start_line {
            self.end_col.saturating_sub(self.start_col).max(1)
        } else {
            line.len().saturating_sub(col).max(1)
        };
        let _ = writeln!(out, "{}{} <--- here", " ".repeat(col), "~".repeat(width));
        out
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.name, self.start_line, self.start_col)
    }
}

impl fmt::Debug for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SourceRange({}..{}, {}:{}-{}:{})",
            self.start, self.end, self.start_line, self.start_col, self.end_line, self.end_col
        )
    }
}

impl PartialEq for SourceRange {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.file, &other.file) && self.start == other.start && self.end == other.end
    }
}

impl Eq for SourceRange {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_lookup() {
        let file = SourceFile::new("t.tc", "line1\nline2\nline3");
        assert_eq!(file.line_count(), 3);
        assert_eq!(file.line(1), Some("line1"));
        assert_eq!(file.line(2), Some("line2"));
        assert_eq!(file.line(3), Some("line3"));
        assert_eq!(file.line(4), None);
    }

    #[test]
    fn test_range_text_and_merge() {
        let file = SourceFile::new("t.tc", "abc def ghi");
        let a = SourceRange::new(file.clone(), 0, 3, 1, 1, 1, 4);
        let b = SourceRange::new(file.clone(), 8, 11, 1, 9, 1, 12);
        assert_eq!(a.text(), "abc");
        assert_eq!(b.text(), "ghi");

        let merged = a.merge(&b);
        assert_eq!(merged.text(), "abc def ghi");
        assert!(merged.contains(&a));
        assert!(merged.contains(&b));
    }

    #[test]
    fn test_highlight() {
        let file = SourceFile::new("t.tc", "def f() {}\n");
        let r = SourceRange::new(file, 4, 5, 1, 5, 1, 6);
        let h = r.highlight();
        assert!(h.contains("def f() {}"));
        assert!(h.contains("    ~"));
    }
}
