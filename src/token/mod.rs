//! Provider-aware token estimation for strings and structured messages.
//!
//! Spec §4.1: "Prefer the provider's tokenizer when accessible; else a
//! calibrated BPE approximation. Never `len(text)/4` in production paths."

mod constants;
mod estimator;

pub use estimator::{CalibratedTokenEstimator, ProviderTokenCounter, SharedTokenEstimator, TokenEstimator};

use crate::data_model::Message;

/// Counts tokens for strings and for structured message lists, preferring a
/// provider-supplied counter when one is wired in and falling back to the
/// calibrated estimator otherwise.
pub struct TokenCounter {
    provider: Option<Box<dyn ProviderTokenCounter>>,
    fallback: SharedTokenEstimator,
}

impl TokenCounter {
    pub fn new(fallback: SharedTokenEstimator) -> Self {
        Self {
            provider: None,
            fallback,
        }
    }

    pub fn with_provider(mut self, provider: Box<dyn ProviderTokenCounter>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn count_text(&self, text: &str) -> usize {
        if let Some(provider) = &self.provider {
            if let Some(count) = provider.count_tokens(text) {
                return count;
            }
        }
        self.fallback.estimate_tokens(text)
    }

    pub fn count_message(&self, message: &Message) -> usize {
        // Role tags and structural separators cost a handful of tokens in
        // every real tokenizer; the calibrated estimator accounts for this
        // via its own constants, so we just sum content plus a small fixed
        // overhead per message (see token/constants.rs).
        self.count_text(&message.content) + constants::PER_MESSAGE_OVERHEAD_TOKENS
    }

    pub fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn empty_text_counts_zero() {
        let counter = TokenCounter::new(Arc::new(CalibratedTokenEstimator::default()));
        assert_eq!(counter.count_text(""), 0);
    }

    #[test]
    fn provider_counter_takes_precedence() {
        struct Fixed;
        impl ProviderTokenCounter for Fixed {
            fn count_tokens(&self, _text: &str) -> Option<usize> {
                Some(7)
            }
        }
        let counter = TokenCounter::new(Arc::new(CalibratedTokenEstimator::default()))
            .with_provider(Box::new(Fixed));
        assert_eq!(counter.count_text("anything at all"), 7);
    }

    #[test]
    fn provider_miss_falls_back() {
        struct Unavailable;
        impl ProviderTokenCounter for Unavailable {
            fn count_tokens(&self, _text: &str) -> Option<usize> {
                None
            }
        }
        let counter = TokenCounter::new(Arc::new(CalibratedTokenEstimator::default()))
            .with_provider(Box::new(Unavailable));
        assert!(counter.count_text("hello world") > 0);
    }
}
