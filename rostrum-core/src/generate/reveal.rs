//! Deferred result publication.
//!
//! Question jobs complete while capture is still running, but consumers must
//! not see mid-session results: everything lands in a hidden buffer and
//! becomes visible in one atomic step after the session flush has drained.

use parking_lot::{Mutex, RwLock};

use crate::ipc::events::QuizQuestion;

/// One finished generation job, held until reveal.
#[derive(Debug, Clone)]
pub struct CompletedWindow {
    /// Index of the text window this job covered.
    pub window_index: usize,
    pub questions: Vec<QuizQuestion>,
}

/// Two-stage question store: hidden until [`reveal`](RevealBuffer::reveal).
#[derive(Debug, Default)]
pub struct RevealBuffer {
    hidden: Mutex<Vec<CompletedWindow>>,
    visible: RwLock<Vec<QuizQuestion>>,
}

impl RevealBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished job. Not observable through [`visible`](Self::visible)
    /// until the next reveal.
    pub fn push(&self, completed: CompletedWindow) {
        self.hidden.lock().push(completed);
    }

    /// Publish all hidden questions, in completion order, in one step.
    /// Returns the full visible list after publication.
    pub fn reveal(&self) -> Vec<QuizQuestion> {
        let staged: Vec<CompletedWindow> = std::mem::take(&mut *self.hidden.lock());
        let mut visible = self.visible.write();
        for window in staged {
            visible.extend(window.questions);
        }
        visible.clone()
    }

    /// Currently published questions.
    pub fn visible(&self) -> Vec<QuizQuestion> {
        self.visible.read().clone()
    }

    /// Finished jobs not yet revealed.
    pub fn hidden_len(&self) -> usize {
        self.hidden.lock().len()
    }

    pub fn reset(&self) {
        self.hidden.lock().clear();
        self.visible.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(text: &str) -> QuizQuestion {
        QuizQuestion {
            question: text.to_string(),
            options: vec!["a".into(), "b".into(), String::new(), String::new()],
            correct_option_index: 0,
        }
    }

    #[test]
    fn pushed_questions_stay_hidden_until_reveal() {
        let buffer = RevealBuffer::new();
        buffer.push(CompletedWindow {
            window_index: 0,
            questions: vec![question("q1"), question("q2")],
        });

        assert!(buffer.visible().is_empty());
        assert_eq!(buffer.hidden_len(), 1);

        let revealed = buffer.reveal();
        assert_eq!(revealed.len(), 2);
        assert_eq!(buffer.visible().len(), 2);
        assert_eq!(buffer.hidden_len(), 0);
    }

    #[test]
    fn reveal_appends_in_completion_order() {
        let buffer = RevealBuffer::new();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            buffer.push(CompletedWindow {
                window_index: i,
                questions: vec![question(text)],
            });
        }

        let revealed = buffer.reveal();
        let texts: Vec<&str> = revealed.iter().map(|q| q.question.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn second_reveal_with_nothing_staged_is_a_no_op() {
        let buffer = RevealBuffer::new();
        buffer.push(CompletedWindow {
            window_index: 0,
            questions: vec![question("only")],
        });
        assert_eq!(buffer.reveal().len(), 1);
        assert_eq!(buffer.reveal().len(), 1);
    }

    #[test]
    fn reset_clears_both_stages() {
        let buffer = RevealBuffer::new();
        buffer.push(CompletedWindow {
            window_index: 0,
            questions: vec![question("gone")],
        });
        buffer.reveal();
        buffer.push(CompletedWindow {
            window_index: 1,
            questions: vec![question("also gone")],
        });
        buffer.reset();
        assert!(buffer.visible().is_empty());
        assert_eq!(buffer.hidden_len(), 0);
    }
}
