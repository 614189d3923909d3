//! Instance console access.
//!
//! This module already has:
//! - `ConsoleSession` - prompt-aware send/receive, login wait, command execution
//! - `TelnetTransport` - the byte stream the orchestration system serves consoles on
//! - `patterns` - login prompt matching
//!
//! Read all methods before adding new ones. Don't duplicate functionality.

mod patterns;
mod session;
mod telnet;

pub use patterns::{contains_login_prompt, is_login_prompt, trim_line_end, LOGIN_PROMPT_SUFFIX};
pub use session::{ConsoleSession, SessionState};
pub use telnet::{escape_iac, TelnetDecoder, TelnetTransport};

use crate::error::Result;

/// A raw bidirectional console byte stream.
pub trait Transport {
    /// Write `bytes` immediately.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Return whatever bytes are available right now, possibly none.
    fn read_eager(&mut self) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_all(bytes)
    }

    fn read_eager(&mut self) -> Result<Vec<u8>> {
        (**self).read_eager()
    }
}

/// Everything read from the console since the last reset.
#[derive(Debug, Clone, Default)]
pub struct ConsoleBuffer {
    text: String,
}

impl ConsoleBuffer {
    pub(crate) fn append(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.split('\n')
    }

    /// Last `n` lines, oldest first. Used for failure context.
    pub fn tail(&self, n: usize) -> Vec<&str> {
        let mut lines: Vec<&str> = self.lines().collect();
        let skip = lines.len().saturating_sub(n);
        lines.drain(..skip);
        lines
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}
