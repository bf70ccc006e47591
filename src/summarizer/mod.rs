//! Intelligent Summarizer: type-aware compression producing bounded-length
//! summaries. Every strategy is a pure function of
//! `(input_text, target_length)` and is idempotent.

mod content_type;
mod strategies;

pub use content_type::{detect_content_type, ContentType};

/// Summarizes arbitrary text by first detecting its content type, then
/// dispatching to the matching strategy.
pub struct Summarizer {
    default_target_len: usize,
}

impl Default for Summarizer {
    fn default() -> Self {
        Self {
            default_target_len: 2_000,
        }
    }
}

impl Summarizer {
    pub fn new(default_target_len: usize) -> Self {
        Self { default_target_len }
    }

    pub fn summarize(&self, text: &str, hint_path: Option<&str>) -> String {
        self.summarize_to(text, hint_path, self.default_target_len)
    }

    pub fn summarize_to(&self, text: &str, hint_path: Option<&str>, target_len: usize) -> String {
        // Idempotence guard: a previously summarized text carries a
        // sentinel marker; re-summarizing returns it unchanged rather than
        // re-analyzing.
        if strategies::is_already_summarized(text) {
            return text.to_string();
        }

        let content_type = detect_content_type(text, hint_path);
        let summary = match content_type {
            ContentType::Code => strategies::summarize_code(text, target_len),
            ContentType::ErrorMessage => strategies::summarize_error(text, target_len),
            ContentType::ToolOutput | ContentType::LogOutput => {
                strategies::summarize_tool_or_log_output(text, target_len)
            }
            ContentType::Configuration => strategies::summarize_configuration(text, target_len),
            ContentType::Documentation | ContentType::Conversation | ContentType::Generic => {
                strategies::summarize_extractive(text, target_len)
            }
        };
        strategies::with_sentinel(&summary)
    }
}
