//! Option-list normalization to the fixed four-slot answer layout.
//!
//! The service may return any number of options. Short lists are padded
//! with empty strings without moving the correct answer. Long lists keep
//! the correct answer plus three randomly chosen incorrect ones; the
//! correct answer only moves (to a uniformly random slot) when its original
//! position does not exist in the four-slot layout.

use rand::seq::SliceRandom;
use rand::Rng;

/// Answer slots presented per question.
pub const OPTION_SLOTS: usize = 4;

/// Normalize `options` to exactly [`OPTION_SLOTS`] entries.
///
/// Returns the shaped options and the correct answer's slot. An
/// out-of-range `correct_index` is treated as 0.
pub fn shape_options(options: Vec<String>, correct_index: usize) -> (Vec<String>, usize) {
    shape_options_with(options, correct_index, &mut rand::thread_rng())
}

/// [`shape_options`] with an explicit RNG so tests can seed it.
pub fn shape_options_with<R: Rng>(
    options: Vec<String>,
    correct_index: usize,
    rng: &mut R,
) -> (Vec<String>, usize) {
    let correct_index = if correct_index < options.len() {
        correct_index
    } else {
        0
    };

    if options.len() <= OPTION_SLOTS {
        let mut padded = options;
        padded.resize(OPTION_SLOTS, String::new());
        return (padded, correct_index);
    }

    let correct_text = options[correct_index].clone();
    let mut incorrect: Vec<String> = options
        .into_iter()
        .enumerate()
        .filter(|(i, text)| *i != correct_index && !text.trim().is_empty())
        .map(|(_, text)| text)
        .collect();
    incorrect.shuffle(rng);
    incorrect.truncate(OPTION_SLOTS - 1);

    let slot = if correct_index < OPTION_SLOTS {
        correct_index
    } else {
        rng.gen_range(0..OPTION_SLOTS)
    };

    let mut shaped = vec![String::new(); OPTION_SLOTS];
    shaped[slot] = correct_text;
    let mut fill = incorrect.into_iter();
    for i in 0..OPTION_SLOTS {
        if i != slot {
            if let Some(text) = fill.next() {
                shaped[i] = text;
            }
        }
    }
    (shaped, slot)
}
