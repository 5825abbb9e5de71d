//! Reassembly of newline-delimited messages from arbitrarily chunked reads.

use tracing::debug;

/// Log target for framing diagnostics.
const FRAMER_TARGET: &str = "clarity_relay::framer";

/// Accumulates raw output chunks into complete newline-terminated lines.
///
/// The framer keeps the unterminated tail of the most recent chunk and
/// prepends it to the next one, so a message split across reads is emitted
/// exactly once, whole. Empty and whitespace-only lines are discarded.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Creates an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the complete lines it finished.
    ///
    /// Non-UTF-8 lines are dropped with a debug log; the worker protocol is
    /// textual and such lines cannot belong to any pending request.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            let mut raw = std::mem::replace(&mut self.buffer, rest);
            raw.pop();

            match String::from_utf8(raw) {
                Ok(line) if !line.trim().is_empty() => lines.push(line),
                Ok(_) => {}
                Err(error) => {
                    debug!(
                        target: FRAMER_TARGET,
                        error = %error,
                        "dropping non-UTF-8 worker output line"
                    );
                }
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn emits_single_complete_line() {
        let mut framer = LineFramer::new();

        let lines = framer.feed(b"{\"id\":1}\n");

        assert_eq!(lines, vec!["{\"id\":1}"]);
    }

    #[rstest]
    fn joins_line_split_across_chunks() {
        let mut framer = LineFramer::new();

        assert!(framer.feed(b"{\"id\":1,\"result\"").is_empty());
        let lines = framer.feed(b":\"ok\"}\n");

        assert_eq!(lines, vec!["{\"id\":1,\"result\":\"ok\"}"]);
    }

    #[rstest]
    fn emits_multiple_lines_from_one_chunk() {
        let mut framer = LineFramer::new();

        let lines = framer.feed(b"first\nsecond\ntail");

        assert_eq!(lines, vec!["first", "second"]);

        let lines = framer.feed(b"-end\n");
        assert_eq!(lines, vec!["tail-end"]);
    }

    #[rstest]
    fn discards_blank_and_whitespace_lines() {
        let mut framer = LineFramer::new();

        let lines = framer.feed(b"\n   \n{\"id\":2}\n\n");

        assert_eq!(lines, vec!["{\"id\":2}"]);
    }

    #[rstest]
    fn retains_empty_tail_after_terminator() {
        let mut framer = LineFramer::new();

        assert_eq!(framer.feed(b"one\n"), vec!["one"]);
        assert_eq!(framer.feed(b"two\n"), vec!["two"]);
    }
}
