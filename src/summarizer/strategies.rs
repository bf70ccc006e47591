//! Per-content-type summarization strategies. Each is a pure function of
//! `(text, target_length)`.

const SENTINEL: char = '\u{200B}';

/// Wrap a freshly produced summary with the idempotence sentinel.
pub fn with_sentinel(summary: &str) -> String {
    if summary.starts_with(SENTINEL) {
        summary.to_string()
    } else {
        format!("{SENTINEL}{summary}")
    }
}

/// Whether `text` already carries the sentinel, meaning it is the output
/// of a prior summarization pass and should be returned unchanged.
pub fn is_already_summarized(text: &str) -> bool {
    text.starts_with(SENTINEL)
}

/// CODE: keep imports, signatures, short docstrings; drop function bodies.
pub fn summarize_code(text: &str, target_len: usize) -> String {
    let mut out = String::new();
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;
    let mut elided_in_current_block = 0usize;

    let is_signature = |l: &str| {
        let t = l.trim_start();
        t.starts_with("fn ")
            || t.starts_with("pub fn ")
            || t.starts_with("async fn ")
            || t.starts_with("pub async fn ")
            || t.starts_with("class ")
            || t.starts_with("def ")
            || t.starts_with("impl ")
            || t.starts_with("struct ")
            || t.starts_with("enum ")
            || t.starts_with("trait ")
    };
    let is_import = |l: &str| {
        let t = l.trim_start();
        t.starts_with("use ") || t.starts_with("import ") || t.starts_with("from ") || t.starts_with("#include")
    };
    let is_doc = |l: &str| {
        let t = l.trim_start();
        t.starts_with("///") || t.starts_with("//!") || t.starts_with("\"\"\"") || t.starts_with('#')
    };

    while i < lines.len() {
        let line = lines[i];
        if is_import(line) || is_doc(line) {
            out.push_str(line);
            out.push('\n');
            i += 1;
            continue;
        }
        if is_signature(line) {
            if elided_in_current_block > 0 {
                out.push_str(&format!("    [body elided: {elided_in_current_block} lines]\n"));
                elided_in_current_block = 0;
            }
            out.push_str(line);
            out.push('\n');
            i += 1;
            // Skip the body: consume lines until we hit the next
            // signature/import at the same or lower indentation, or run out.
            let base_indent = line.len() - line.trim_start().len();
            let mut elided = 0usize;
            while i < lines.len() {
                let next = lines[i];
                let next_indent = next.len() - next.trim_start().len();
                if next.trim().is_empty() {
                    i += 1;
                    continue;
                }
                if next_indent <= base_indent && (is_signature(next) || is_import(next)) {
                    break;
                }
                elided += 1;
                i += 1;
            }
            elided_in_current_block = elided;
            continue;
        }
        i += 1;
    }
    if elided_in_current_block > 0 {
        out.push_str(&format!("    [body elided: {elided_in_current_block} lines]\n"));
    }

    if out.is_empty() {
        out = text.chars().take(target_len).collect();
    }
    truncate_to(&out, target_len)
}

/// ERROR_MESSAGE: keep type, message, top/bottom traceback frames (<=5),
/// file references verbatim.
pub fn summarize_error(text: &str, target_len: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= 11 {
        return truncate_to(text, target_len);
    }

    let head: Vec<&str> = lines.iter().take(5).copied().collect();
    let tail: Vec<&str> = lines.iter().rev().take(5).rev().copied().collect();
    let omitted = lines.len().saturating_sub(head.len() + tail.len());

    let mut out = String::new();
    out.push_str(&head.join("\n"));
    out.push('\n');
    out.push_str(&format!("... [{omitted} intermediate frame(s) elided] ...\n"));
    out.push_str(&tail.join("\n"));
    truncate_to(&out, target_len)
}

/// TOOL_OUTPUT / LOG_OUTPUT: group by severity, keep all ERROR/WARN up to a
/// cap, sample INFO; prepend a 1-line header.
pub fn summarize_tool_or_log_output(text: &str, target_len: usize) -> String {
    const ERROR_WARN_CAP: usize = 50;
    const INFO_SAMPLE_EVERY: usize = 5;

    let mut kept: Vec<&str> = Vec::new();
    let mut error_warn_count = 0usize;
    let mut info_seen = 0usize;
    let mut total = 0usize;

    for line in text.lines() {
        total += 1;
        let upper = line.to_ascii_uppercase();
        if upper.contains("ERROR") || upper.contains("WARN") {
            if error_warn_count < ERROR_WARN_CAP {
                kept.push(line);
                error_warn_count += 1;
            }
        } else {
            info_seen += 1;
            if info_seen % INFO_SAMPLE_EVERY == 0 {
                kept.push(line);
            }
        }
    }

    let header = format!(
        "[{total} line(s): {error_warn_count} error/warn kept, {} info line(s) sampled]",
        kept.len().saturating_sub(error_warn_count)
    );
    let mut out = String::with_capacity(header.len() + 1);
    out.push_str(&header);
    out.push('\n');
    out.push_str(&kept.join("\n"));
    truncate_to(&out, target_len)
}

/// CONFIGURATION (JSON/YAML/TOML-ish): keep top-level keys with leaf value
/// previews; elide nested blobs over 200 bytes.
pub fn summarize_configuration(text: &str, target_len: usize) -> String {
    const NESTED_BLOB_ELIDE_BYTES: usize = 200;

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(text) {
        let mut out = String::from("{\n");
        for (key, value) in map {
            let rendered = match &value {
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    let s = value.to_string();
                    if s.len() > NESTED_BLOB_ELIDE_BYTES {
                        format!("<elided: {} bytes>", s.len())
                    } else {
                        s
                    }
                }
                other => other.to_string(),
            };
            out.push_str(&format!("  \"{key}\": {rendered},\n"));
        }
        out.push('}');
        return truncate_to(&out, target_len);
    }

    // Not JSON: treat as line-oriented key: value / key = value config and
    // keep top-level (unindented) lines, eliding long nested blocks.
    let mut out = String::new();
    for line in text.lines() {
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if indented {
            continue;
        }
        if line.len() > NESTED_BLOB_ELIDE_BYTES {
            out.push_str(&format!("{}... <elided: {} bytes>\n", &line[..40.min(line.len())], line.len()));
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    truncate_to(&out, target_len)
}

/// DOCUMENTATION / CONVERSATION / GENERIC: extractive sentence scoring
/// with a keyword bonus, respecting the target length.
pub fn summarize_extractive(text: &str, target_len: usize) -> String {
    if text.len() <= target_len {
        return text.to_string();
    }

    let sentences: Vec<&str> = text
        .split(|c| c == '.' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return truncate_to(text, target_len);
    }

    let keyword_bonus_words = ["must", "important", "error", "note", "todo", "decision", "should"];
    let mut scored: Vec<(usize, &str, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(idx, s)| {
            let position_score = 1.0 - (idx as f64 / sentences.len() as f64) * 0.5;
            let length_score = (s.len() as f64 / 120.0).min(1.0);
            let keyword_score = keyword_bonus_words
                .iter()
                .filter(|kw| s.to_ascii_lowercase().contains(*kw))
                .count() as f64
                * 0.2;
            (idx, *s, position_score + length_score + keyword_score)
        })
        .collect();
    scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut chosen: Vec<(usize, &str)> = Vec::new();
    let mut used = 0usize;
    for (idx, sentence, _score) in scored {
        if used + sentence.len() + 2 > target_len {
            continue;
        }
        used += sentence.len() + 2;
        chosen.push((idx, sentence));
    }
    chosen.sort_by_key(|(idx, _)| *idx);
    let joined = chosen
        .into_iter()
        .map(|(_, s)| s)
        .collect::<Vec<_>>()
        .join(". ");
    truncate_to(&joined, target_len)
}

fn truncate_to(text: &str, target_len: usize) -> String {
    if text.len() <= target_len {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(target_len).collect();
        truncated.push('\u{2026}');
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_elides_bodies_but_keeps_signatures() {
        let code = "use std::fmt;\n\nfn add(a: i32, b: i32) -> i32 {\n    let x = a + b;\n    let y = x * 2;\n    y\n}\n";
        let summary = summarize_code(code, 2_000);
        assert!(summary.contains("use std::fmt;"));
        assert!(summary.contains("fn add(a: i32, b: i32) -> i32 {"));
        assert!(summary.contains("body elided"));
        assert!(!summary.contains("let y = x * 2;"));
    }

    #[test]
    fn error_keeps_head_and_tail() {
        let mut text = String::new();
        for i in 0..20 {
            text.push_str(&format!("frame {i} at file.py:{i}\n"));
        }
        let summary = summarize_error(&text, 2_000);
        assert!(summary.contains("frame 0"));
        assert!(summary.contains("frame 19"));
        assert!(summary.contains("elided"));
        assert!(!summary.contains("frame 10 "));
    }

    #[test]
    fn log_keeps_all_warn_error_and_samples_info() {
        let mut text = String::new();
        for i in 0..20 {
            text.push_str(&format!("INFO line {i}\n"));
        }
        text.push_str("ERROR something broke\n");
        let summary = summarize_tool_or_log_output(&text, 4_000);
        assert!(summary.contains("ERROR something broke"));
    }

    #[test]
    fn config_keeps_top_level_json_keys() {
        let json = r#"{"host": "localhost", "port": 8080, "nested": {"a":1,"b":2}}"#;
        let summary = summarize_configuration(json, 2_000);
        assert!(summary.contains("host"));
        assert!(summary.contains("port"));
    }

    #[test]
    fn sentinel_roundtrips() {
        let s = with_sentinel("hello");
        assert!(is_already_summarized(&s));
        assert!(!is_already_summarized("hello"));
    }
}
