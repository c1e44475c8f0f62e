//! Query classification: decides whether a query needs AI reasoning.
//!
//! A deterministic heuristic over the normalized query: greeting-only input
//! gets help, trigger terms or long queries get AI analysis, follow-ups get
//! AI analysis once the conversation has started, everything else gets the
//! data summary. Ambiguity resolves toward `Simple`.

use serde::{Deserialize, Serialize};
use sitrep_config::ClassifierConfig;
use std::collections::HashSet;

/// Routing decision for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Deterministic data summary
    Simple,
    /// Needs AI reasoning
    Complex,
    /// Capabilities / greeting response
    Help,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Complex => "complex",
            Self::Help => "help",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single words match at the start of a token; multi-word terms match as
/// phrases. With `inflected`, a token only needs to start with the word
/// ("explaining" matches "explain", "show" never matches "how").
#[derive(Debug, Clone, Default)]
struct TermSet {
    words: HashSet<String>,
    phrases: Vec<Vec<String>>,
    inflected: bool,
}

impl TermSet {
    fn new(terms: &[String], inflected: bool) -> Self {
        let mut set = Self {
            inflected,
            ..Self::default()
        };
        for term in terms {
            let parts = tokenize(term);
            match parts.len() {
                0 => {}
                1 => {
                    set.words.extend(parts);
                }
                _ => set.phrases.push(parts),
            }
        }
        set
    }

    fn word_matches(&self, token: &str, word: &str) -> bool {
        if self.inflected {
            token.starts_with(word)
        } else {
            token == word
        }
    }

    fn matches(&self, tokens: &[String]) -> bool {
        let word_hit = if self.inflected {
            tokens
                .iter()
                .any(|t| self.words.iter().any(|w| t.starts_with(w.as_str())))
        } else {
            tokens.iter().any(|t| self.words.contains(t))
        };
        word_hit
            || self.phrases.iter().any(|p| {
                tokens.windows(p.len()).any(|w| {
                    let (last, head) = (w.len() - 1, &w[..w.len() - 1]);
                    head == &p[..last] && self.word_matches(&w[last], &p[last])
                })
            })
    }
}

/// Lowercase and split on anything that isn't part of a word.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .map(|t| t.trim_matches(|c| c == '-' || c == '\''))
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// The query classifier. Pure; build once from configuration and share.
#[derive(Debug, Clone)]
pub struct QueryClassifier {
    triggers: TermSet,
    greetings: HashSet<String>,
    follow_ups: TermSet,
    word_threshold: usize,
}

impl QueryClassifier {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            triggers: TermSet::new(&config.trigger_keywords, true),
            greetings: config
                .greeting_terms
                .iter()
                .flat_map(|g| tokenize(g))
                .collect(),
            follow_ups: TermSet::new(&config.follow_up_terms, false),
            word_threshold: config.complexity_word_threshold,
        }
    }

    /// Classify `query` given how many turns the session already holds.
    pub fn classify(&self, query: &str, session_turn_count: usize) -> Classification {
        let tokens = tokenize(query);

        if tokens.iter().all(|t| self.greetings.contains(t)) {
            return Classification::Help;
        }
        if self.triggers.matches(&tokens) {
            return Classification::Complex;
        }
        if tokens.len() > self.word_threshold {
            return Classification::Complex;
        }
        if session_turn_count > 0 && self.follow_ups.matches(&tokens) {
            return Classification::Complex;
        }
        Classification::Simple
    }
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}
