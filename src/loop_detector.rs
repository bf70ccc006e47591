//! Loop detection (SPEC_FULL.md §E): flags a tool-call loop before it
//! burns the full per-turn call cap, by watching a bounded window of
//! recent (name, normalized-args) pairs for exact repeats.

use std::collections::VecDeque;

use serde_json::Value;

const DEFAULT_WINDOW: usize = 6;
const REPEAT_THRESHOLD: usize = 3;

fn normalize_args(args: &Value) -> String {
    // serde_json::Value's Display already produces a canonical, key-order
    // preserving rendering; callers pass already-parsed JSON so this is
    // stable across calls for semantically identical arguments.
    args.to_string()
}

/// Watches a rolling window of recent tool calls for an identical call
/// repeating too many times in a row, independent of the outer tool-call
/// cap (`Tool.LoopCapExceeded`).
pub struct LoopDetector {
    window: VecDeque<(String, String)>,
    capacity: usize,
    threshold: usize,
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, REPEAT_THRESHOLD)
    }
}

impl LoopDetector {
    pub fn new(capacity: usize, threshold: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
        }
    }

    /// Records a tool call and returns `true` if the same call (by name
    /// and normalized args) now appears `threshold` or more times
    /// consecutively at the end of the window.
    pub fn record(&mut self, name: &str, args: &Value) -> bool {
        let key = (name.to_string(), normalize_args(args));
        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(key.clone());

        self.window.iter().rev().take(self.threshold).filter(|k| **k == key).count() >= self.threshold
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}
