//! Computer opponent for casual matches that fail to pair.
//!
//! The solver keeps the pool of 4-digit codes still consistent with every
//! piece of feedback its own guesses have earned, and plays the first
//! unplayed survivor. The human's secret is always in the pool, so the pool
//! never empties; the random fallback only exists as a backstop.

use rand::Rng;
use shared::{evaluate_guess, Feedback};
use std::collections::HashSet;

/// Identity prefix for bot seats in a match.
pub const BOT_USER_ID: &str = "bot:medium";
/// Name shown to the human opponent.
pub const BOT_DISPLAY_NAME: &str = "CPU (Medium)";

/// Picks the bot's secret: a uniform code with a non-zero leading digit.
pub fn random_bot_secret() -> String {
    rand::thread_rng().gen_range(1000..10_000).to_string()
}

/// Candidate-elimination guesser.
pub struct BotSolver {
    candidates: Vec<String>,
    history: Vec<(String, Feedback)>,
    played: HashSet<String>,
}

impl BotSolver {
    pub fn new() -> Self {
        BotSolver {
            candidates: (0..10_000).map(|code| format!("{:04}", code)).collect(),
            history: Vec::new(),
            played: HashSet::new(),
        }
    }

    /// Codes still consistent with the feedback seen so far.
    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }

    /// Records the feedback one of our guesses earned.
    pub fn record(&mut self, guess: String, feedback: Feedback) {
        self.played.insert(guess.clone());
        self.history.push((guess, feedback));
    }

    /// Chooses the next guess.
    ///
    /// A candidate survives only if, were it the secret, every past guess
    /// would have earned exactly the feedback it actually got.
    pub fn next_guess(&mut self) -> String {
        let history = &self.history;
        self.candidates
            .retain(|candidate| history.iter().all(|(guess, feedback)| {
                evaluate_guess(candidate, guess) == *feedback
            }));

        if let Some(candidate) = self
            .candidates
            .iter()
            .find(|candidate| !self.played.contains(*candidate))
        {
            return candidate.clone();
        }

        // Pool exhausted of fresh picks: fall back to any unplayed code.
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let guess = format!("{:04}", rng.gen_range(0..10_000));
            if !self.played.contains(&guess) {
                return guess;
            }
        }
        "0123".to_string()
    }
}
