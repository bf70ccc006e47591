//! Tool dispatch batching: within one LLM response's tool-call batch,
//! independent read-only calls run concurrently; a write-capable call is
//! serialized and completes before the next read-only run in the same
//! batch begins. Conservative by construction: only calls whose name
//! matches a known read-only marker are ever batched together.

use crate::interfaces::ProposedToolCall;

const READ_ONLY_MARKERS: &[&str] = &["read", "search", "list", "retrieve", "grep", "find", "query", "get", "view", "status"];

/// Whether `name` looks like a read-only tool. Matches by substring so
/// names like `read_file` or `list_directory` classify the same as the
/// bare verb.
pub fn is_read_only_tool(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    READ_ONLY_MARKERS.iter().any(|m| lowered.contains(m))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchGroup {
    /// A maximal run of consecutive read-only calls, safe to run together.
    Parallel,
    /// A single write-capable call, run alone before the batch continues.
    Serial,
}

/// Splits `calls` into maximal runs tagged for parallel or serial
/// execution, as indices into `calls`, preserving original order. Two
/// adjacent read-only calls land in the same `Parallel` run; any
/// write-capable call starts its own `Serial` run of one.
pub fn batch_calls(calls: &[ProposedToolCall]) -> Vec<(DispatchGroup, Vec<usize>)> {
    let mut batches = Vec::new();
    let mut current_read_only_run: Vec<usize> = Vec::new();

    for (idx, call) in calls.iter().enumerate() {
        if is_read_only_tool(&call.name) {
            current_read_only_run.push(idx);
        } else {
            if !current_read_only_run.is_empty() {
                batches.push((DispatchGroup::Parallel, std::mem::take(&mut current_read_only_run)));
            }
            batches.push((DispatchGroup::Serial, vec![idx]));
        }
    }
    if !current_read_only_run.is_empty() {
        batches.push((DispatchGroup::Parallel, current_read_only_run));
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str) -> ProposedToolCall {
        ProposedToolCall { name: name.to_string(), args: json!({}) }
    }

    #[test]
    fn classifies_known_read_only_verbs() {
        assert!(is_read_only_tool("read_file"));
        assert!(is_read_only_tool("search_code"));
        assert!(is_read_only_tool("list_directory"));
        assert!(!is_read_only_tool("edit_file"));
        assert!(!is_read_only_tool("shell"));
    }

    #[test]
    fn all_read_only_batch_is_one_parallel_run() {
        let calls = vec![call("read_file"), call("search_code"), call("list_directory")];
        let batches = batch_calls(&calls);
        assert_eq!(batches, vec![(DispatchGroup::Parallel, vec![0, 1, 2])]);
    }

    #[test]
    fn write_call_splits_surrounding_reads_into_separate_runs() {
        let calls = vec![call("read_file"), call("edit_file"), call("search_code")];
        let batches = batch_calls(&calls);
        assert_eq!(
            batches,
            vec![
                (DispatchGroup::Parallel, vec![0]),
                (DispatchGroup::Serial, vec![1]),
                (DispatchGroup::Parallel, vec![2]),
            ]
        );
    }

    #[test]
    fn consecutive_write_calls_each_get_their_own_serial_run() {
        let calls = vec![call("shell"), call("edit_file")];
        let batches = batch_calls(&calls);
        assert_eq!(batches, vec![(DispatchGroup::Serial, vec![0]), (DispatchGroup::Serial, vec![1])]);
    }

    #[test]
    fn empty_batch_yields_no_runs() {
        assert!(batch_calls(&[]).is_empty());
    }
}
