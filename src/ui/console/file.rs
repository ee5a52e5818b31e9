//! Source rendering for the console interface.

use anyhow::Context;
use crossterm::style::Stylize;
use std::fs;
use std::path::Path;

const CONTEXT_LINES: u64 = 10;
const TAB_REPLACEMENT: &str = "    ";

/// Renders a window of source lines around a position, the current line
/// marked with `->`.
pub struct FileView;

impl FileView {
    pub fn new() -> Self {
        Self
    }

    /// Render `line` with up to ten lines of context in both directions.
    /// Tabs are expanded so the marker column stays aligned.
    pub fn render_around(&self, path: &Path, line: u64) -> anyhow::Result<String> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read source file {}", path.display()))?;

        let start = line.saturating_sub(CONTEXT_LINES).max(1);
        let end = line + CONTEXT_LINES;

        let mut output = String::new();
        for (idx, text) in content.lines().enumerate() {
            let number = idx as u64 + 1;
            if number < start || number > end {
                continue;
            }

            let text = text.replace('\t', TAB_REPLACEMENT);
            let rendered = if number == line {
                format!("{} {number:>4} {text}\n", "->".bold())
            } else {
                format!("   {number:>4} {text}\n")
            };
            output.push_str(&rendered);
        }

        if output.is_empty() {
            anyhow::bail!("line {line} is out of range for {}", path.display());
        }
        Ok(output)
    }
}

impl Default for FileView {
    fn default() -> Self {
        Self::new()
    }
}
