//! Channel layer: character capture, bounded polling and line assembly.
//!
//! A single capture task owns the input half of the duplex stream and
//! feeds decoded units into an unbounded queue. Everything above this
//! layer waits only inside [`TimedQueueReader::poll`].

mod line;
mod patterns;
mod reader;
mod source;

pub use line::LineBuffer;
pub use patterns::{
    DEFAULT_PROMPT, LOGIN_PROMPT, LoginPatterns, PASSWORD_PROMPT, PromptClass, compile_pattern,
};
pub use reader::{Deadline, TimedQueueReader};
pub use source::{AnsiDecoder, ByteDecoder, CharacterSource, TextDecoder, UnitDecoder, Utf8Decoder};
