//! Fixed-size word windows over the growing transcript.
//!
//! Question jobs are cut at every full `window_words` boundary while capture
//! runs, plus one remainder window at session flush. The cutter tracks how
//! many words have already been handed out, so across any interleaving of
//! `cut` and `cut_remainder` the emitted windows tile `[0, processed)`
//! exactly: no word is dropped, none is submitted twice.

use std::ops::Range;

/// Words per question-generation job during live capture.
pub const DEFAULT_WINDOW_WORDS: usize = 100;

/// One contiguous span of transcript words submitted as a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    /// Cut order, starting at 0. Also the FIFO completion order.
    pub index: usize,
    /// The window's words joined with single spaces.
    pub text: String,
    /// Word positions this window covers in the session transcript.
    pub words: Range<usize>,
}

impl TextWindow {
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

/// Stateful cutter: remembers the high-water mark of processed words.
#[derive(Debug)]
pub struct WindowCutter {
    window_words: usize,
    processed_words: usize,
    next_index: usize,
}

impl WindowCutter {
    pub fn new(window_words: usize) -> Self {
        Self {
            window_words: window_words.max(1),
            processed_words: 0,
            next_index: 0,
        }
    }

    /// Cut every full window now available in `full_text`.
    ///
    /// The transcript only ever grows, so words before `processed_words`
    /// are the same words earlier windows were cut from.
    pub fn cut(&mut self, full_text: &str) -> Vec<TextWindow> {
        let words: Vec<&str> = full_text.split_whitespace().collect();
        let mut windows = Vec::new();

        while words.len() - self.processed_words >= self.window_words {
            let range = self.processed_words..self.processed_words + self.window_words;
            windows.push(self.emit(&words, range));
        }
        windows
    }

    /// Cut whatever is left past the high-water mark as one final window,
    /// whatever its size. Called once at session flush.
    pub fn cut_remainder(&mut self, full_text: &str) -> Option<TextWindow> {
        let words: Vec<&str> = full_text.split_whitespace().collect();
        if words.len() <= self.processed_words {
            return None;
        }
        let range = self.processed_words..words.len();
        Some(self.emit(&words, range))
    }

    pub fn processed_words(&self) -> usize {
        self.processed_words
    }

    pub fn windows_cut(&self) -> usize {
        self.next_index
    }

    pub fn reset(&mut self) {
        self.processed_words = 0;
        self.next_index = 0;
    }

    fn emit(&mut self, words: &[&str], range: Range<usize>) -> TextWindow {
        let text = words[range.clone()].join(" ");
        self.processed_words = range.end;
        let window = TextWindow {
            index: self.next_index,
            text,
            words: range,
        };
        self.next_index += 1;
        window
    }
}
