//! Terminal byte stream to text
//!
//! Captured input and output are raw terminal bytes: echoes, line editing
//! (backspace, cursor movement, erase-in-line), colours and title updates.
//! [`ScreenParser`] replays them on an alacritty terminal sized like the
//! client's and reads the grid back, so the audit log holds what the user
//! actually saw.

use std::sync::OnceLock;

use alacritty_terminal::event::{Event, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::cell::Flags;
use alacritty_terminal::term::{Config, Term};
use alacritty_terminal::vte::ansi::Processor;
use regex::Regex;

/// Turns captured terminal bytes into audit text
pub trait TtyParser: Send + Sync {
    /// Text of the command the user entered
    fn parse_input(&mut self, data: &[u8]) -> String;

    /// Text printed by the command, without the trailing prompt
    fn parse_output(&mut self, data: &[u8]) -> String;

    /// Follow a client window size change
    fn resize(&mut self, width: u16, height: u16);
}

/// alacritty refuses grids narrower than this
const MIN_COLUMNS: u16 = 2;

fn prompt_pattern() -> &'static Regex {
    static PS1: OnceLock<Regex> = OnceLock::new();
    // Same shape as a bash PS1 (`[user@host dir]$ `, `user@host:~# `) or the mysql client prompt
    PS1.get_or_init(|| {
        Regex::new(r"^\[?.*@.*\]?[\$#]\s|mysql>\s").expect("prompt pattern is valid")
    })
}

/// Grid size handed to [`Term::new`]
#[derive(Debug, Clone, Copy)]
struct ScreenSize {
    columns: u16,
    lines: u16,
}

impl Dimensions for ScreenSize {
    fn total_lines(&self) -> usize {
        self.lines as usize
    }

    fn screen_lines(&self) -> usize {
        self.lines as usize
    }

    fn columns(&self) -> usize {
        self.columns as usize
    }
}

/// Title changes, bells and clipboard requests go nowhere
#[derive(Clone, Copy)]
struct Discard;

impl EventListener for Discard {
    fn send_event(&self, _event: Event) {}
}

/// Virtual screen parser sized like the client's terminal
#[derive(Debug, Clone)]
pub struct ScreenParser {
    size: ScreenSize,
}

impl ScreenParser {
    pub fn new(width: u16, height: u16) -> Self {
        let mut parser = Self {
            size: ScreenSize {
                columns: MIN_COLUMNS,
                lines: 1,
            },
        };
        parser.resize(width, height);
        parser
    }

    /// Replay `data` on a fresh terminal; one string per grid row, scrollback
    /// first, trailing blanks trimmed
    fn render(&self, data: &[u8]) -> Vec<String> {
        let mut term = Term::new(Config::default(), &self.size, Discard);
        let mut processor: Processor = Processor::new();
        processor.advance(&mut term, data);

        let grid = term.grid();
        let columns = grid.columns();
        (grid.topmost_line().0..=grid.bottommost_line().0)
            .map(|line| {
                let row = &grid[Line(line)];
                let text: String = (0..columns)
                    .map(|col| &row[Column(col)])
                    .filter(|cell| !cell.flags.contains(Flags::WIDE_CHAR_SPACER))
                    .map(|cell| cell.c)
                    .collect();
                text.trim_end().to_string()
            })
            .collect()
    }
}

impl TtyParser for ScreenParser {
    fn parse_input(&mut self, data: &[u8]) -> String {
        let command = self
            .render(data)
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or_default();

        prompt_pattern().replace(&command, "").into_owned()
    }

    fn parse_output(&mut self, data: &[u8]) -> String {
        let mut lines: Vec<String> = self
            .render(data)
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect();
        // Last line is the prompt printed after the command finished
        lines.pop();
        lines.join("\n")
    }

    fn resize(&mut self, width: u16, height: u16) {
        self.size = ScreenSize {
            columns: width.max(MIN_COLUMNS),
            lines: height.max(1),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ScreenParser {
        ScreenParser::new(80, 24)
    }

    #[test]
    fn test_input_plain_echo() {
        assert_eq!(parser().parse_input(b"ls -la"), "ls -la");
    }

    #[test]
    fn test_input_backspace_editing() {
        // bash echoes a backspace as BS + erase-to-end-of-line
        assert_eq!(parser().parse_input(b"lx\x08\x1b[Ks"), "ls");
        assert_eq!(parser().parse_input(b"pwdd\x08 \x08"), "pwd");
    }

    #[test]
    fn test_input_prompt_stripped() {
        assert_eq!(
            parser().parse_input(b"[root@web01 ~]# uptime"),
            "uptime"
        );
        assert_eq!(parser().parse_input(b"mysql> show tables;"), "show tables;");
    }

    #[test]
    fn test_input_takes_last_line() {
        assert_eq!(parser().parse_input(b"first\r\nsecond  "), "second");
        assert_eq!(parser().parse_input(b""), "");
    }

    #[test]
    fn test_output_drops_prompt_line() {
        assert_eq!(
            parser().parse_output(b"\r\nfile1 file2\r\n$ "),
            "file1 file2"
        );
        assert_eq!(
            parser().parse_output(b"\r\na\r\nb\r\n[root@web01 ~]# "),
            "a\nb"
        );
    }

    #[test]
    fn test_output_ignores_colours_and_titles() {
        let data = b"\r\n\x1b[01;34mdir\x1b[0m  file\r\n\x1b]0;root@web01:~\x07$ ";
        assert_eq!(parser().parse_output(data), "dir  file");
    }

    #[test]
    fn test_output_keeps_scrolled_lines() {
        let mut data = Vec::new();
        for i in 0..30 {
            data.extend_from_slice(format!("line{}\r\n", i).as_bytes());
        }
        data.extend_from_slice(b"$ ");
        let output = ScreenParser::new(80, 5).parse_output(&data);
        assert_eq!(output.lines().count(), 30);
        assert!(output.starts_with("line0\n"));
        assert!(output.ends_with("line29"));
    }

    #[test]
    fn test_output_wraps_long_lines() {
        let output = ScreenParser::new(4, 24).parse_output(b"abcdefgh\r\n$ ");
        assert_eq!(output, "abcd\nefgh");
    }

    #[test]
    fn test_resize_changes_wrap_width() {
        let mut parser = ScreenParser::new(80, 24);
        assert_eq!(parser.parse_output(b"abcdef\r\n$ "), "abcdef");
        parser.resize(3, 24);
        assert_eq!(parser.parse_output(b"abcdef\r\n$ "), "abc\ndef");
        // Degenerate sizes are clamped rather than rejected
        parser.resize(0, 24);
        assert_eq!(parser.parse_output(b"abcd\r\n$ "), "ab\ncd");
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(parser().parse_output(b""), "");
        assert_eq!(parser().parse_output(b"$ "), "");
    }
}
