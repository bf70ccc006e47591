use std::sync::Arc;

use super::constants::{
    CODE_DETECTION_THRESHOLD, CODE_INDICATOR_CHARS, CODE_TOKEN_MULTIPLIER, LONG_WORD_SCALE_FACTOR,
    LONG_WORD_THRESHOLD, MIN_TOKEN_COUNT, TOKENS_PER_CHARACTER,
};

/// Estimates the number of tokens contained in a string, without calling
/// out to a provider.
pub trait TokenEstimator: Send + Sync {
    fn estimate_tokens(&self, text: &str) -> usize;
}

/// Shared estimator handle, used as the context manager's fallback counter.
pub type SharedTokenEstimator = Arc<dyn TokenEstimator>;

/// A calibrated BPE approximation: a chars-per-token ratio adjusted for
/// long words and code-like punctuation density. This is the estimator
/// used whenever the provider's own tokenizer is not reachable (spec
/// §4.1); it intentionally avoids the `len(text) / 4` shortcut the spec
/// calls out as unacceptable in production paths.
#[derive(Debug, Clone, Copy)]
pub struct CalibratedTokenEstimator;

impl Default for CalibratedTokenEstimator {
    fn default() -> Self {
        Self
    }
}

impl TokenEstimator for CalibratedTokenEstimator {
    fn estimate_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count();
        let mut estimate = (char_count as f64 / TOKENS_PER_CHARACTER).ceil();

        let mut long_word_count = 0usize;
        for word in text.split_whitespace() {
            if word.chars().count() > LONG_WORD_THRESHOLD {
                long_word_count += 1;
            }
        }
        if long_word_count > 0 {
            estimate += (long_word_count * (LONG_WORD_THRESHOLD - 2) / LONG_WORD_SCALE_FACTOR) as f64;
        }

        let code_indicator_count = text.chars().filter(|c| CODE_INDICATOR_CHARS.contains(*c)).count();
        if char_count > 0 && code_indicator_count * CODE_DETECTION_THRESHOLD > char_count {
            estimate *= CODE_TOKEN_MULTIPLIER;
        }

        (estimate.ceil() as usize).max(MIN_TOKEN_COUNT)
    }
}

/// Adapter over a real provider tokenizer (e.g. an HTTP token-count
/// endpoint or a bundled vocabulary file). Implementations live outside
/// this crate; `None` means "not available for this input", triggering
/// fallback to [`CalibratedTokenEstimator`].
pub trait ProviderTokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> Option<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(CalibratedTokenEstimator.estimate_tokens(""), 0);
    }

    #[test]
    fn non_empty_is_never_zero() {
        assert!(CalibratedTokenEstimator.estimate_tokens("a").max(1) >= 1);
    }

    #[test]
    fn code_like_text_estimates_higher_density_than_plain_prose_of_equal_length() {
        let code = "fn f(a:i32,b:i32)->i32{a+b}";
        let prose = "the quick brown fox jumped over";
        assert_eq!(code.len(), prose.len());
        let est = CalibratedTokenEstimator;
        assert!(est.estimate_tokens(code) >= est.estimate_tokens(prose));
    }
}
