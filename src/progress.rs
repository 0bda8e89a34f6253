//! Transient progress for the file being worked on.
//!
//! Durable output (completed files, hash-link notes, totals) goes through
//! plain `println!`; this is just the in-place line that shows where a
//! long walk currently is, and it only appears on an actual terminal.

use camino::Utf8Path;
use console::Term;
use unicode_segmentation::UnicodeSegmentation;

pub struct ProgressLine {
    term: Term,
}

impl ProgressLine {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }

    /// Show which file we're on, overwriting the previous transient line.
    /// The cursor is left at the start of the line so markers land on
    /// top of it.
    pub fn working(&self, rel: &Utf8Path) {
        if !self.term.is_term() {
            return;
        }
        let line = truncate_line(&format!("  {rel}"), self.term.size().1 as usize);
        let _ = self.term.write_str(&format!("{line}\r"));
    }

    /// Flag the transient line: `H` while hashing, `C` while copying.
    pub fn marker(&self, marker: char) {
        if !self.term.is_term() {
            return;
        }
        let _ = self.term.write_str(&format!("{marker}\r"));
    }

    /// Erase the transient line before durable output.
    pub fn clear(&self) {
        if !self.term.is_term() {
            return;
        }
        let _ = self.term.clear_line();
    }
}

impl Default for ProgressLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Squeeze `text` to `width` by ellipsizing the middle, so both the top of
/// the tree and the file name stay visible.
fn truncate_line(text: &str, width: usize) -> String {
    if width <= 3 {
        return ".".repeat(width);
    }
    let syms: Vec<_> = text.graphemes(true).collect();
    if syms.len() <= width {
        return text.to_string();
    }
    let half = (width - 3) / 2;
    format!(
        "{}...{}",
        syms[..half].concat(),
        syms[syms.len() - half..].concat()
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_lines_pass_through() {
        assert_eq!(truncate_line("  a/b/c", 80), "  a/b/c");
    }

    #[test]
    fn long_lines_lose_their_middle() {
        let squeezed = truncate_line("  some/deeply/nested/directory/file.txt", 21);
        assert_eq!(squeezed, "  some/de.../file.txt");
        assert_eq!(squeezed.graphemes(true).count(), 21);
    }

    #[test]
    fn absurd_widths_do_not_panic() {
        assert_eq!(truncate_line("whatever", 3), "...");
        assert_eq!(truncate_line("whatever", 0), "");
    }
}
