//! Scripted interaction with an instance console.
//!
//! There is no command framing on a serial console: we type, wait, and scrape
//! until a known prompt shows up. Everything here is a poll loop with a fixed
//! sleep between reads.

use super::patterns::contains_login_prompt;
use super::telnet::TelnetTransport;
use super::{ConsoleBuffer, Transport};
use crate::clock::{Clock, SystemClock};
use crate::config::ConsoleConfig;
use crate::error::{HarnessError, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    AwaitingLoginPrompt,
    /// A login prompt was seen or the login sequence has been typed.
    Ready,
}

/// Console controller for one instance.
///
/// Owns the connection exclusively; not meant to be shared between callers.
pub struct ConsoleSession<T = TelnetTransport, C = SystemClock> {
    transport: T,
    clock: C,
    config: ConsoleConfig,
    buffer: ConsoleBuffer,
    state: SessionState,
}

impl ConsoleSession<TelnetTransport, SystemClock> {
    /// Open the console at `host:port` within `config.connect_timeout`.
    pub fn connect(host: &str, port: u16, config: ConsoleConfig) -> Result<Self> {
        let transport = TelnetTransport::connect(host, port, config.connect_timeout)?;
        info!(host, port, "console session open");
        Ok(Self::with_parts(transport, SystemClock, config))
    }
}

impl<T: Transport, C: Clock> ConsoleSession<T, C> {
    pub fn with_parts(transport: T, clock: C, config: ConsoleConfig) -> Self {
        Self {
            transport,
            clock,
            config,
            buffer: ConsoleBuffer::default(),
            state: SessionState::Connected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn buffer(&self) -> &ConsoleBuffer {
        &self.buffer
    }

    pub fn reset_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Type `text` as-is. No newline is added.
    pub fn send(&mut self, text: &str) -> Result<()> {
        if !text.is_ascii() {
            return Err(HarnessError::Encoding(text.to_string()));
        }
        debug!(data = %text.escape_debug(), ">>");
        self.transport.write_all(text.as_bytes())
    }

    /// Read whatever is available without waiting. May be empty.
    pub fn receive(&mut self) -> Result<String> {
        let bytes = self.transport.read_eager()?;
        // single-byte decoding: every byte maps to exactly one char
        let text: String = bytes.iter().map(|&b| char::from(b)).collect();
        if !text.is_empty() {
            debug!(data = %text.escape_debug(), "<<");
            self.buffer.append(&text);
        }
        Ok(text)
    }

    /// Keep reading into the buffer for `period`, pausing
    /// `config.poll_interval` between reads.
    pub fn drain_for(&mut self, period: Duration) -> Result<()> {
        let start = self.clock.now();
        loop {
            self.receive()?;
            if self.clock.elapsed_since(start) >= period {
                return Ok(());
            }
            self.clock.sleep(self.config.poll_interval);
        }
    }

    /// Wait for a `... login:` line, giving up quietly after
    /// `config.login_timeout`.
    ///
    /// Returns whether the prompt was seen. Not seeing it is not an error:
    /// some images never print one on the serial console, and the caller can
    /// still work with the raw bytes.
    pub fn await_login_prompt(&mut self) -> Result<bool> {
        self.state = SessionState::AwaitingLoginPrompt;
        let start = self.clock.now();
        // unterminated last line, so a prompt split over two reads still matches
        let mut pending = String::new();

        loop {
            pending.push_str(&self.receive()?);
            if contains_login_prompt(&pending) {
                info!(waited = ?self.clock.elapsed_since(start), "login prompt seen on console");
                self.state = SessionState::Ready;
                return Ok(true);
            }
            if let Some(idx) = pending.rfind('\n') {
                pending.drain(..=idx);
            }

            self.clock.sleep(self.config.poll_interval);
            if self.clock.elapsed_since(start) > self.config.login_timeout {
                warn!(
                    timeout = ?self.config.login_timeout,
                    "no login prompt on console, continuing anyway"
                );
                self.state = SessionState::Connected;
                return Ok(false);
            }
        }
    }

    /// Back out of whatever the console was doing and log in again.
    ///
    /// Sends the reset keystrokes and the credential lines, pausing and
    /// discarding output after each one. This assumes the guest's login flow
    /// matches the configured credentials; nothing is verified.
    pub fn ensure_fresh(&mut self) -> Result<()> {
        for keys in self.config.fresh_sequence() {
            self.send(&keys)?;
            self.clock.sleep(self.config.poll_interval);
            self.receive()?;
        }
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Run `command` in a fresh login shell and return everything printed up
    /// to and including the shell prompt.
    ///
    /// Fails with [`HarnessError::PromptTimeout`] when the prompt does not
    /// show up within `config.prompt_timeout`; with no timeout configured
    /// this waits forever.
    pub fn execute(&mut self, command: &str) -> Result<String> {
        self.ensure_fresh()?;
        self.send(&format!("{}\n", command))?;
        self.clock.sleep(self.config.settle_delay);

        let start = self.clock.now();
        let mut output = String::new();
        while !output.ends_with(self.config.shell_prompt.as_str()) {
            if let Some(limit) = self.config.prompt_timeout {
                let waited = self.clock.elapsed_since(start);
                if waited >= limit {
                    return Err(HarnessError::PromptTimeout {
                        command: command.to_string(),
                        waited,
                        output,
                    });
                }
            }

            let chunk = self.receive()?;
            if chunk.is_empty() {
                self.clock.sleep(self.config.poll_interval);
            } else {
                output.push_str(&chunk);
            }
        }

        Ok(output)
    }
}
