//! Terminal rendering of markdown output with termimad.

use anyhow::Result;
use termimad::{crossterm::style::Color, MadSkin};

const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Prints markdown either styled for a terminal or as plain text.
pub struct TerminalRenderer {
    rich_enabled: bool,
    skin: MadSkin,
}

impl TerminalRenderer {
    pub fn new(rich_enabled: bool) -> Self {
        let mut skin = MadSkin::default();
        skin.set_headers_fg(Color::Cyan);
        skin.bold.set_fg(Color::Yellow);
        skin.italic.set_fg(Color::Grey);
        skin.inline_code.set_bg(Color::AnsiValue(236));

        Self { rich_enabled, skin }
    }

    /// Prints `markdown`. Header lines keep their hash marks so journey and
    /// enrollment ids stay readable; failed and completed status lines are
    /// coloured.
    pub fn render(&self, markdown: &str) -> Result<()> {
        if !self.rich_enabled {
            print!("{markdown}");
            return Ok(());
        }

        for line in markdown.lines() {
            match line_color(line) {
                Some(color) => println!("{color}{line}{RESET}"),
                None => {
                    self.skin.print_inline(line);
                    println!();
                }
            }
        }
        Ok(())
    }
}

fn line_color(line: &str) -> Option<&'static str> {
    if line.starts_with('#') {
        Some(CYAN)
    } else if line.contains('✗') {
        Some(RED)
    } else if line.contains('✓') {
        Some(GREEN)
    } else {
        None
    }
}
