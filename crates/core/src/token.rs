//! Token estimation.
//!
//! Word-count heuristic: `ceil(words × tokens_per_word)`, plus a fixed
//! per-turn overhead for role names and delimiters. Cheap, deterministic,
//! and the same estimator is used everywhere a budget is enforced.

use serde::{Deserialize, Serialize};

use crate::conversation::Turn;

/// Word-based token estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenEstimator {
    pub tokens_per_word: f64,
    pub per_turn_overhead: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            tokens_per_word: 1.3,
            per_turn_overhead: 4,
        }
    }
}

impl TokenEstimator {
    pub fn new(tokens_per_word: f64, per_turn_overhead: usize) -> Self {
        Self {
            tokens_per_word,
            per_turn_overhead,
        }
    }

    /// Estimate tokens for a bare string. Empty text costs nothing.
    pub fn text(&self, text: &str) -> usize {
        let words = text.split_whitespace().count();
        if words == 0 {
            return 0;
        }
        (words as f64 * self.tokens_per_word).ceil() as usize
    }

    /// Estimate tokens for a turn, including overhead.
    pub fn turn(&self, turn: &Turn) -> usize {
        self.per_turn_overhead + self.text(&turn.content)
    }

    pub fn turns(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|t| self.turn(t)).sum()
    }

    /// Clip `text` to at most `max_tokens`, keeping whole leading words.
    pub fn clip(&self, text: &str, max_tokens: usize) -> String {
        if self.text(text) <= max_tokens {
            return text.to_string();
        }
        let max_words = (max_tokens as f64 / self.tokens_per_word).floor() as usize;
        text.split_whitespace()
            .take(max_words)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
