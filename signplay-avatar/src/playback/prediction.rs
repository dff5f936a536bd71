//! Next-sign prediction
//!
//! Keeps a short rolling history and a bigram frequency table. Predictions
//! only steer speculative preloading and the "common sequence" speed hint;
//! a wrong guess costs a wasted load, never correctness.

use crate::config::MachineSettings;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct SignPredictor {
    history: VecDeque<String>,
    history_len: usize,
    /// previous sign -> (follow-up sign -> count)
    observed: HashMap<String, HashMap<String, u32>>,
    /// Follow-ups assumed before any history exists
    builtin: HashMap<String, String>,
    common_min_count: u32,
}

impl SignPredictor {
    pub fn new(history_len: usize, builtin: HashMap<String, String>, common_min_count: u32) -> Self {
        Self {
            history: VecDeque::with_capacity(history_len),
            history_len: history_len.max(1),
            observed: HashMap::new(),
            builtin,
            common_min_count: common_min_count.max(1),
        }
    }

    pub fn from_settings(settings: &MachineSettings) -> Self {
        Self::new(
            settings.history_len,
            settings.bigrams.clone(),
            settings.common_sequence_min_count,
        )
    }

    /// Record a completed sign
    pub fn record(&mut self, sign_id: &str) {
        if let Some(previous) = self.history.back() {
            *self
                .observed
                .entry(previous.clone())
                .or_default()
                .entry(sign_id.to_string())
                .or_insert(0) += 1;
        }
        self.history.push_back(sign_id.to_string());
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
    }

    /// Most likely follow-up to `sign_id`
    ///
    /// Observed bigrams win over the built-in table. Ties go to the
    /// alphabetically first sign so predictions are deterministic.
    pub fn predict_next(&self, sign_id: &str) -> Option<String> {
        let observed = self.observed.get(sign_id).and_then(|followers| {
            followers
                .iter()
                .max_by(|(a_sign, a_count), (b_sign, b_count)| {
                    a_count.cmp(b_count).then_with(|| b_sign.cmp(a_sign))
                })
                .map(|(sign, _)| sign.clone())
        });
        observed.or_else(|| self.builtin.get(sign_id).cloned())
    }

    /// True when `previous -> next` is a learned or built-in pairing
    pub fn is_common_sequence(&self, previous: &str, next: &str) -> bool {
        let count = self
            .observed
            .get(previous)
            .and_then(|followers| followers.get(next))
            .copied()
            .unwrap_or(0);
        count >= self.common_min_count
            || self.builtin.get(previous).is_some_and(|b| b == next)
    }

    /// Times `next` has been observed right after `previous`
    pub fn observed_count(&self, previous: &str, next: &str) -> u32 {
        self.observed
            .get(previous)
            .and_then(|followers| followers.get(next))
            .copied()
            .unwrap_or(0)
    }

    /// Recent signs, oldest first
    pub fn history(&self) -> Vec<String> {
        self.history.iter().cloned().collect()
    }

    /// Forget history and learned bigrams (built-in table stays)
    pub fn clear(&mut self) {
        self.history.clear();
        self.observed.clear();
    }
}

impl Default for SignPredictor {
    fn default() -> Self {
        Self::from_settings(&MachineSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut predictor = SignPredictor::new(3, HashMap::new(), 2);
        for sign in ["A", "B", "C", "D", "E"] {
            predictor.record(sign);
        }
        assert_eq!(predictor.history(), vec!["C", "D", "E"]);
    }

    #[test]
    fn test_builtin_used_without_history() {
        let predictor = SignPredictor::default();
        assert_eq!(predictor.predict_next("Hello").as_deref(), Some("My"));
        assert_eq!(predictor.predict_next("My").as_deref(), Some("Name"));
        assert!(predictor.predict_next("Zebra").is_none());
    }

    #[test]
    fn test_observed_overrides_builtin() {
        let mut predictor = SignPredictor::default();
        for sign in ["Hello", "Friend", "Hello", "Friend", "Hello", "My"] {
            predictor.record(sign);
        }
        assert_eq!(predictor.observed_count("Hello", "Friend"), 2);
        assert_eq!(predictor.predict_next("Hello").as_deref(), Some("Friend"));
    }

    #[test]
    fn test_common_sequence_threshold() {
        let mut predictor = SignPredictor::new(5, HashMap::new(), 2);
        predictor.record("See");
        predictor.record("You");
        assert!(!predictor.is_common_sequence("See", "You"));
        predictor.record("See");
        predictor.record("You");
        assert!(predictor.is_common_sequence("See", "You"));
    }

    #[test]
    fn test_tie_breaks_alphabetically() {
        let mut predictor = SignPredictor::new(5, HashMap::new(), 1);
        for sign in ["X", "B", "X", "A"] {
            predictor.record(sign);
        }
        assert_eq!(predictor.predict_next("X").as_deref(), Some("A"));
    }

    #[test]
    fn test_clear_keeps_builtin() {
        let mut predictor = SignPredictor::default();
        predictor.record("Hello");
        predictor.record("Friend");
        predictor.clear();
        assert!(predictor.history().is_empty());
        assert_eq!(predictor.predict_next("Hello").as_deref(), Some("My"));
    }
}
