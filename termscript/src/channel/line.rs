//! Line assembly for response and line reads.
//!
//! The in-progress line is the only thing patterns are tested against.
//! Completed lines are collected per call and handed back in arrival
//! order.

use regex::Regex;

const CR: char = '\r';
const LF: char = '\n';
const BS: char = '\x08';

/// Accumulator for the current line and the lines completed since the
/// last [`reset`](Self::reset).
#[derive(Debug)]
pub struct LineBuffer {
    /// The line in progress.
    line: String,

    /// Terminated, non-empty lines in arrival order.
    lines: Vec<String>,

    /// Set until the first CR, which is taken as the end of the echoed
    /// command.
    echo: bool,

    /// Optional cap on the line in progress, in characters.
    max_len: Option<usize>,
}

impl LineBuffer {
    /// Create a buffer. `max_len` caps the line in progress by dropping
    /// its oldest characters; `None` leaves it unbounded.
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            line: String::new(),
            lines: Vec::new(),
            echo: true,
            max_len,
        }
    }

    /// Clear all state for a new call.
    pub fn reset(&mut self) {
        self.line.clear();
        self.lines.clear();
        self.echo = true;
    }

    /// Apply the response rules to one character.
    ///
    /// Returns `true` when the character was appended to the line, which
    /// is the only time a completion pattern needs testing.
    pub fn push_response(&mut self, ch: char) -> bool {
        match ch {
            CR => {
                if self.echo {
                    self.line.clear();
                    self.echo = false;
                }
                false
            }
            LF => {
                if !self.line.is_empty() {
                    self.lines.push(std::mem::take(&mut self.line));
                }
                false
            }
            BS => {
                self.line.pop();
                false
            }
            _ => {
                self.append(ch);
                true
            }
        }
    }

    /// Apply the single-line rules to one character.
    ///
    /// Returns the line when a CR or LF terminates a non-empty line. Empty
    /// terminated lines are skipped.
    pub fn push_line(&mut self, ch: char) -> Option<String> {
        match ch {
            CR | LF => {
                if self.line.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut self.line))
                }
            }
            BS => {
                self.line.pop();
                None
            }
            _ => {
                self.append(ch);
                None
            }
        }
    }

    fn append(&mut self, ch: char) {
        self.line.push(ch);
        if let Some(max) = self.max_len {
            while self.line.chars().count() > max {
                self.line.remove(0);
            }
        }
    }

    /// Test `pattern` anywhere in the line in progress.
    pub fn matches(&self, pattern: &Regex) -> bool {
        pattern.is_match(&self.line)
    }

    /// Take the completed lines, optionally followed by the line in
    /// progress.
    pub fn finish(&mut self, keep: bool) -> Vec<String> {
        if keep {
            self.lines.push(std::mem::take(&mut self.line));
        }
        std::mem::take(&mut self.lines)
    }

    /// The line in progress.
    pub fn current(&self) -> &str {
        &self.line
    }

    /// Lines completed so far in this call.
    pub fn completed(&self) -> &[String] {
        &self.lines
    }
}
