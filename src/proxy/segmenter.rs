//! Input/output segmentation of a terminal session
//!
//! The segmenter alternates between capturing a command and capturing its
//! output. Both are read from the backend stream: while the user types, the
//! backend's echo is the command as edited on the remote line editor; once
//! the user presses enter, everything the backend prints is output. The
//! next keystroke closes the output capture and yields a
//! [`CompletedCommand`].

use tracing::debug;

use super::ignore::IgnoreFilter;
use crate::tty::TtyParser;

const ENTER_CHARS: &[u8] = b"\r\n";
const ALT_SCREEN_ENTER: &[u8] = b"\x1b[?1049h";
const ALT_SCREEN_EXIT: &[u8] = b"\x1b[?1049l";

/// One finished input/output cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedCommand {
    pub command_no: u64,
    pub command: String,
    pub output: String,
}

/// Command/output capture state of one session
pub struct CommandSegmenter {
    parser: Box<dyn TtyParser>,
    ignore: IgnoreFilter,
    command_no: u64,
    input_data: Vec<Vec<u8>>,
    output_data: Vec<Vec<u8>>,
    input: String,
    output: String,
    is_first_input: bool,
    in_input_state: bool,
    in_vim_state: bool,
    suspend_on_alt_screen: bool,
    /// Tail of the last backend chunk that may begin an alternate screen switch
    alt_screen_carry: Vec<u8>,
}

impl CommandSegmenter {
    pub fn new(parser: Box<dyn TtyParser>, ignore: IgnoreFilter) -> Self {
        Self {
            parser,
            ignore,
            command_no: 1,
            input_data: Vec::new(),
            output_data: Vec::new(),
            input: String::new(),
            output: String::new(),
            is_first_input: true,
            in_input_state: false,
            in_vim_state: false,
            suspend_on_alt_screen: false,
            alt_screen_carry: Vec::new(),
        }
    }

    /// Pause segmentation while a full-screen program owns the alternate screen
    pub fn with_alt_screen_suspend(mut self, enabled: bool) -> Self {
        self.suspend_on_alt_screen = enabled;
        self
    }

    /// Number the next completed command will get
    pub fn command_no(&self) -> u64 {
        self.command_no
    }

    pub fn is_first_input(&self) -> bool {
        self.is_first_input
    }

    pub fn in_input_state(&self) -> bool {
        self.in_input_state
    }

    pub fn in_vim_state(&self) -> bool {
        self.in_vim_state
    }

    /// Last parsed command text
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Last parsed output text
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Track the client terminal size used for parsing
    pub fn resize(&mut self, width: u16, height: u16) {
        self.parser.resize(width, height);
    }

    /// Bookkeeping for a chunk read from the client (possibly empty on EOF).
    ///
    /// Returns the cycle closed by this keystroke, if any.
    pub fn on_client_data(&mut self, chunk: &[u8]) -> Option<CompletedCommand> {
        if self.in_vim_state {
            self.is_first_input = false;
            return None;
        }

        let completed = if self.in_input_state {
            None
        } else {
            self.finish_output()
        };

        self.in_input_state = true;
        self.is_first_input = false;

        if chunk.iter().any(|b| ENTER_CHARS.contains(b)) {
            self.finish_input();
            self.in_input_state = false;
        }

        completed
    }

    /// Route a chunk read from the backend into the active capture
    pub fn on_backend_data(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        if self.in_input_state {
            self.input_data.push(chunk.to_vec());
            return;
        }

        if !self.suspend_on_alt_screen {
            self.capture_output(chunk);
            return;
        }

        let mut data = std::mem::take(&mut self.alt_screen_carry);
        data.extend_from_slice(chunk);
        let mut rest = &data[..];
        loop {
            if self.in_vim_state {
                match find(rest, ALT_SCREEN_EXIT) {
                    Some(pos) => {
                        debug!("Full-screen program exited, resuming capture");
                        self.in_vim_state = false;
                        rest = &rest[pos + ALT_SCREEN_EXIT.len()..];
                    }
                    None => {
                        let keep = partial_suffix(rest, ALT_SCREEN_EXIT);
                        self.alt_screen_carry = rest[rest.len() - keep..].to_vec();
                        return;
                    }
                }
            } else {
                match find(rest, ALT_SCREEN_ENTER) {
                    Some(pos) => {
                        debug!("Full-screen program started, suspending capture");
                        self.capture_output(&rest[..pos]);
                        self.in_vim_state = true;
                        rest = &rest[pos + ALT_SCREEN_ENTER.len()..];
                    }
                    None => {
                        // Held back until the next chunk completes or breaks the sequence
                        let split = rest.len() - partial_suffix(rest, ALT_SCREEN_ENTER);
                        self.capture_output(&rest[..split]);
                        self.alt_screen_carry = rest[split..].to_vec();
                        return;
                    }
                }
            }
        }
    }

    /// Close a pending output capture when the session ends
    pub fn finish(&mut self) -> Option<CompletedCommand> {
        if self.in_input_state || self.is_first_input {
            return None;
        }
        let completed = self.finish_output();
        self.in_input_state = true;
        completed
    }

    fn capture_output(&mut self, chunk: &[u8]) {
        if chunk.is_empty() || self.ignore.matches(&self.input) {
            return;
        }
        self.output_data.push(chunk.to_vec());
    }

    fn finish_input(&mut self) {
        self.input = self.parser.parse_input(&self.input_data.concat());
        self.input_data.clear();
        debug!(command = %self.input, "Command captured");
    }

    fn finish_output(&mut self) -> Option<CompletedCommand> {
        if self.is_first_input {
            // Banner, motd and the first prompt
            self.output_data.clear();
            return None;
        }

        if !self.in_vim_state && !self.alt_screen_carry.is_empty() {
            let held = std::mem::take(&mut self.alt_screen_carry);
            self.capture_output(&held);
        }
        self.output = self.parser.parse_output(&self.output_data.concat());
        self.output_data.clear();
        debug!(output = %self.output, "Output captured");

        if self.input.is_empty() {
            return None;
        }

        let completed = CompletedCommand {
            command_no: self.command_no,
            command: self.input.clone(),
            output: self.output.clone(),
        };
        self.command_no += 1;
        Some(completed)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of the longest proper prefix of `needle` that `haystack` ends with
fn partial_suffix(haystack: &[u8], needle: &[u8]) -> usize {
    (1..needle.len())
        .rev()
        .find(|&len| haystack.ends_with(&needle[..len]))
        .unwrap_or(0)
}
