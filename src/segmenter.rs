//! Incremental sentence segmentation of streamed model output.
//!
//! Completion deltas arrive in arbitrary pieces. A sentence ends at the first
//! terminal punctuation mark (ASCII or full-width comma, period, question
//! mark, exclamation mark); each complete sentence is dispatched to
//! synthesis on its own so audio can start before the reply finishes.

/// Result of one [`segment`] call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    /// The buffer extended with the consumed part of the delta.
    pub sentence: String,
    /// Characters of the delta after the terminator, not yet consumed.
    pub remainder: String,
    /// True iff a terminator was seen in this call.
    pub complete: bool,
}

/// Returns true for characters that close a sentence.
pub fn is_terminal(c: char) -> bool {
    matches!(c, ',' | '，' | '.' | '。' | '?' | '？' | '!' | '！')
}

/// Appends `delta` to `buffer` up to and including the first terminal
/// character; everything after it goes to the remainder.
///
/// Callers extract every sentence in a delta by feeding `remainder` back
/// with an empty buffer until `complete` is false.
pub fn segment(buffer: &str, delta: &str) -> Segment {
    let mut sentence = String::with_capacity(buffer.len() + delta.len());
    sentence.push_str(buffer);

    match delta.char_indices().find(|&(_, c)| is_terminal(c)) {
        Some((idx, c)) => {
            let split = idx + c.len_utf8();
            sentence.push_str(&delta[..split]);
            Segment {
                sentence,
                remainder: delta[split..].to_string(),
                complete: true,
            }
        }
        None => {
            sentence.push_str(delta);
            Segment {
                sentence,
                remainder: String::new(),
                complete: false,
            }
        }
    }
}

/// Holds the unterminated prefix of the current turn across deltas.
#[derive(Debug, Default, Clone)]
pub struct SentenceAccumulator {
    pending: String,
}

impl SentenceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one delta and returns every sentence it completes, in order.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut rest = delta.to_string();
        loop {
            let seg = segment(&self.pending, &rest);
            if !seg.complete {
                self.pending = seg.sentence;
                return sentences;
            }
            sentences.push(seg.sentence);
            self.pending.clear();
            rest = seg.remainder;
        }
    }

    /// The unterminated prefix collected so far.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Returns the unterminated prefix and clears it.
    pub fn take_pending(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
