//! Incremental sentence segmentation for speech output.
//!
//! [`SentenceSegmenter`] turns an append-only stream of text deltas into
//! sentence-sized units that sound natural when synthesized one at a time.
//!
//! A boundary is one of `. ! ? , ; :` followed by whitespace. Text after the
//! last boundary stays buffered. Each `feed` then runs three stages:
//!
//! 1. **Hold**: a piece shorter than the minimum word count (2 for the first
//!    sentence of a stream, 3 afterwards) is held and prefixed to the next.
//! 2. **Merge**: sentences of at most two words are folded into the previous
//!    sentence; a short sentence with nothing before it rolls forward.
//! 3. **Tail**: the last sentence of each batch is kept back because more
//!    text may still extend it. It is released once a later batch produces
//!    a sentence, or by [`SentenceSegmenter::flush`].
//!
//! No text is dropped. Merged pieces are joined with a single space.

/// Characters that end a sentence or clause when followed by whitespace.
pub const BOUNDARY_CHARS: [char; 6] = ['.', '!', '?', ',', ';', ':'];

/// Minimum words for the first sentence of a stream.
pub const MIN_WORDS_FIRST: usize = 2;

/// Minimum words for every later sentence.
pub const MIN_WORDS: usize = 3;

/// Sentences with at most this many words are merged into a neighbour.
pub const MERGE_IF_WORDS: usize = 2;

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn join(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_owned(),
        (_, true) => a.to_owned(),
        _ => format!("{a} {b}"),
    }
}

/// Split `text` after every boundary.
///
/// Returns the terminated pieces (trimmed, non-empty) and the unterminated
/// remainder, which never contains a boundary followed by whitespace.
pub fn split_terminated(text: &str) -> (Vec<&str>, &str) {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !BOUNDARY_CHARS.contains(&c) {
            continue;
        }
        let Some(&(_, next)) = chars.peek() else {
            break;
        };
        if !next.is_whitespace() {
            continue;
        }
        let piece = text[start..i + c.len_utf8()].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        while chars.next_if(|(_, n)| n.is_whitespace()).is_some() {}
        start = chars.peek().map_or(text.len(), |(j, _)| *j);
    }

    (pieces, &text[start..])
}

/// Stateful segmenter. Create one per response stream.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    /// Unterminated text after the last boundary.
    buffer: String,
    /// Too-short fragment waiting to be prefixed to the next piece.
    pending: String,
    /// Last sentence of the previous batch, not yet released.
    tail: Option<String>,
    /// Whether a sentence has been accepted in this stream.
    started: bool,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unterminated text not yet split.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Held short fragment, if any.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Sentence held back as the likely-incomplete tail.
    pub fn tail(&self) -> Option<&str> {
        self.tail.as_deref()
    }

    /// Append a delta and return the sentences now ready for synthesis.
    pub fn feed(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let (pieces, remainder) = split_terminated(&self.buffer);
        if pieces.is_empty() {
            return Vec::new();
        }
        let pieces: Vec<String> = pieces.into_iter().map(str::to_owned).collect();
        self.buffer = remainder.to_owned();

        let accepted = self.accept(pieces);
        let merged = self.merge(accepted);
        self.release(merged)
    }

    /// End of stream: return the final sentence(s) and reset all state.
    ///
    /// The remainder (held fragment plus buffered text) is merged into the
    /// tail when it is at most two words, otherwise both are returned.
    pub fn flush(&mut self) -> Vec<String> {
        let pending = std::mem::take(&mut self.pending);
        let buffer = std::mem::take(&mut self.buffer);
        let remainder = join(&pending, buffer.trim());
        let tail = self.tail.take();
        self.started = false;

        match tail {
            Some(t) if !remainder.is_empty() && word_count(&remainder) <= MERGE_IF_WORDS => {
                vec![join(&t, &remainder)]
            }
            Some(t) if remainder.is_empty() => vec![t],
            Some(t) => vec![t, remainder],
            None if remainder.is_empty() => Vec::new(),
            None => vec![remainder],
        }
    }

    fn accept(&mut self, pieces: Vec<String>) -> Vec<String> {
        let mut accepted = Vec::new();
        for piece in pieces {
            let piece = if self.pending.is_empty() {
                piece
            } else {
                join(&std::mem::take(&mut self.pending), &piece)
            };
            let min = if self.started || !accepted.is_empty() {
                MIN_WORDS
            } else {
                MIN_WORDS_FIRST
            };
            if word_count(&piece) < min {
                self.pending = piece;
            } else {
                accepted.push(piece);
            }
        }
        if !accepted.is_empty() {
            self.started = true;
        }
        accepted
    }

    fn merge(&mut self, accepted: Vec<String>) -> Vec<String> {
        let mut merged: Vec<String> = Vec::new();
        let mut carry: Option<String> = None;

        for sentence in accepted {
            let sentence = match carry.take() {
                Some(c) => join(&c, &sentence),
                None => sentence,
            };
            if word_count(&sentence) > MERGE_IF_WORDS {
                merged.push(sentence);
            } else if let Some(last) = merged.last_mut() {
                *last = join(last, &sentence);
            } else if let Some(tail) = self.tail.as_mut() {
                *tail = join(tail, &sentence);
            } else {
                carry = Some(sentence);
            }
        }

        // A lone short sentence goes back in front of the held fragment.
        if let Some(c) = carry {
            self.pending = join(&c, &self.pending);
        }
        merged
    }

    fn release(&mut self, mut merged: Vec<String>) -> Vec<String> {
        let Some(last) = merged.pop() else {
            return Vec::new();
        };
        let mut ready = Vec::with_capacity(merged.len() + 1);
        if let Some(tail) = self.tail.take() {
            ready.push(tail);
        }
        ready.extend(merged);
        self.tail = Some(last);
        ready
    }
}
