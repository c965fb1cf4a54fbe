//! Line reassembly, multi-format parsing and ordering for device logs.
//!
//! Provides:
//! - `LineReassembler` - Byte chunks to complete lines
//! - `LogParser` - Ordered, first-match-wins format matchers
//! - `should_persist` - Monotonic timestamp filter

pub mod ansi;
pub mod matcher;
pub mod order;
pub mod parser;
pub mod reassembler;
pub mod timestamp;

pub use ansi::strip_ansi;
pub use matcher::{FormatMatcher, ParsedLog, RegexMatcher};
pub use order::should_persist;
pub use parser::LogParser;
pub use reassembler::LineReassembler;
pub use timestamp::parse_timestamp;
