//! Incremental sentence splitting for streamed model text.
//!
//! A boundary is `.`, `?` or `!` followed by whitespace. The whitespace run
//! belongs to the sentence it ends, so a segment is only released once a
//! non-whitespace character shows the run is complete. Concatenating every
//! segment returned by [`SentenceSegmenter::feed`] and the final
//! [`SentenceSegmenter::flush`] reproduces the input exactly.

#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '?' | '!')
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every sentence it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut cuts = Vec::new();
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((_, c)) = chars.next() {
            if !is_terminator(c) {
                continue;
            }
            if !chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
                continue;
            }
            while chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
                chars.next();
            }
            // Whitespace running to the end of the buffer may continue.
            if let Some(&(end, _)) = chars.peek() {
                cuts.push(end);
            }
        }

        let Some(&last) = cuts.last() else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last);
        let done = std::mem::replace(&mut self.buffer, rest);

        let mut sentences = Vec::with_capacity(cuts.len());
        let mut start = 0;
        for cut in cuts {
            sentences.push(done[start..cut].to_string());
            start = cut;
        }
        sentences
    }

    /// Take whatever remains as the final segment.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
