//! Magic numbers for token counting, extracted for reuse and clarity.
//!
//! A calibrated chars-per-token ratio plus adjustments for long words and
//! code-like content, rather than a single flat division.

/// Estimated tokens per character in regular text/code. More conservative
/// than a flat 4.0 to account for punctuation becoming separate tokens.
pub const TOKENS_PER_CHARACTER: f64 = 3.5;

/// Word length (chars) above which a word tends to split into more than
/// one token.
pub const LONG_WORD_THRESHOLD: usize = 8;

/// Scaling factor for extra tokens contributed by long words.
pub const LONG_WORD_SCALE_FACTOR: usize = 10;

/// Bracket/operator characters that push content toward "code" token
/// density rather than prose density.
pub const CODE_INDICATOR_CHARS: &str = "{}[]<>()=;:,";

/// Ratio of code-indicator chars to total chars above which content is
/// treated as code for token-density purposes.
pub const CODE_DETECTION_THRESHOLD: usize = 20;

/// Multiplier applied to the character-ratio estimate when content looks
/// like code.
pub const CODE_TOKEN_MULTIPLIER: f64 = 1.1;

/// Fixed per-message overhead (role tag, separators) added on top of
/// content tokens when counting a structured message list.
pub const PER_MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Floor so non-empty content is never reported as zero tokens.
pub const MIN_TOKEN_COUNT: usize = 1;
