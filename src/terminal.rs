//! Terminal capability: color, emphasis and cursor control
//!
//! Color and cursor codes are only emitted when stdout is a terminal. Styles are
//! composed with anstyle and rendered as `{style}text{style:#}`.

use anstyle::{AnsiColor, Color, Style};
use std::io::IsTerminal;

use crate::report::Palette;

const LABEL: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack)));
const FIGURE: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));
const HOT: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
const EMPHASIS: Style = Style::new().bold();

const CURSOR_HOME: &str = "\x1b[H";
const CLEAR_SCREEN: &str = "\x1b[2J";
const HIDE_CURSOR: &str = "\x1b[?25l";
const SHOW_CURSOR: &str = "\x1b[?25h";

#[derive(Debug, Clone, Copy)]
pub struct Terminal {
    color: bool,
}

impl Terminal {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Colors when stdout is attached to a terminal
    pub fn detect() -> Self {
        Self::new(std::io::stdout().is_terminal())
    }

    pub fn supports_color(&self) -> bool {
        self.color
    }

    pub fn emphasize(&self, text: &str) -> String {
        self.paint(EMPHASIS, text)
    }

    pub fn cursor_home(&self) -> &'static str {
        self.control(CURSOR_HOME)
    }

    pub fn clear_screen(&self) -> &'static str {
        self.control(CLEAR_SCREEN)
    }

    pub fn hide_cursor(&self) -> &'static str {
        self.control(HIDE_CURSOR)
    }

    pub fn show_cursor(&self) -> &'static str {
        self.control(SHOW_CURSOR)
    }

    fn control(&self, code: &'static str) -> &'static str {
        if self.color {
            code
        } else {
            ""
        }
    }

    fn paint(&self, style: Style, text: &str) -> String {
        if !self.color || text.is_empty() {
            return text.to_string();
        }
        format!("{style}{text}{style:#}")
    }
}

impl Palette for Terminal {
    fn label(&self, text: &str) -> String {
        self.paint(LABEL, text)
    }

    fn figure(&self, text: &str) -> String {
        self.paint(FIGURE, text)
    }

    fn bar(&self, text: &str, flagged: bool) -> String {
        self.paint(if flagged { HOT } else { FIGURE }, text)
    }
}
