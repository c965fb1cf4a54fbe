//! Reassembly of transport chunks into complete lines.

/// Upper bound on a held fragment. A stream that never emits a newline is
/// cut into lines of this size rather than buffered without limit.
pub const MAX_PARTIAL_BYTES: usize = 1024 * 1024;

/// Turns arbitrary byte chunks into complete lines.
///
/// Works on bytes so a chunk boundary may split a multi-byte character or
/// an escape sequence; decoding happens once a line is complete.
#[derive(Debug, Default)]
pub struct LineReassembler {
    partial: Vec<u8>,
}

impl LineReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the lines it completed, in arrival order.
    ///
    /// A trailing `\r` (PTY line endings) is removed from each line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);

        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return self.spill_oversized();
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);

        let mut lines: Vec<String> = complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect();
        lines.extend(self.spill_oversized());
        lines
    }

    /// The fragment held for the next chunk.
    #[must_use]
    pub fn leftover(&self) -> String {
        String::from_utf8_lossy(&self.partial).into_owned()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    /// Drop any held fragment.
    pub fn reset(&mut self) {
        self.partial.clear();
    }

    /// Take the held fragment as a final line, e.g. at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = decode_line(&self.partial);
        self.partial.clear();
        Some(line)
    }

    fn spill_oversized(&mut self) -> Vec<String> {
        if self.partial.len() <= MAX_PARTIAL_BYTES {
            return Vec::new();
        }
        tracing::warn!(
            bytes = self.partial.len(),
            "Unterminated line exceeded buffer limit, emitting as-is"
        );
        self.finish().into_iter().collect()
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
