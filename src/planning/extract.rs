//! 从模型的自由文本中提取 JSON
//!
//! 模型输出可能带有说明文字、Markdown 代码块（```json ... ```）或其它装饰。
//! Plan Generator 与 Answer Synthesizer 共用这里的修复逻辑，不在调用点各自写正则。

use serde_json::Value;

/// 代码块语言标记（去掉围栏后可能残留在开头）
const LANGUAGE_TAGS: [&str; 2] = ["json", "javascript"];

/// 去掉两端空白与反引号围栏，再去掉开头的语言标记
fn strip_fences(raw: &str) -> &str {
    let mut s = raw.trim().trim_matches('`').trim();
    for tag in LANGUAGE_TAGS {
        if s.get(..tag.len()).is_some_and(|head| head.eq_ignore_ascii_case(tag)) {
            let rest = &s[tag.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with(['{', '[']) {
                s = rest.trim_start();
                break;
            }
        }
    }
    s
}

/// 以 open 开头、以最后一个 close 结尾的最大区间
fn greedy_span(text: &str, open: char, close: char) -> Option<(usize, &str)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some((start, &text[start..=end]))
}

/// 提取 JSON 文本：返回第一个以 `{` 或 `[` 开头、到对应闭合符最远处结束的子串；
/// 找不到括号区间时原样返回清理后的文本。永不失败，解析由调用方负责。
pub fn extract_json(raw: &str) -> String {
    let cleaned = strip_fences(raw);
    let object = greedy_span(cleaned, '{', '}');
    let array = greedy_span(cleaned, '[', ']');
    let picked = match (object, array) {
        (Some(o), Some(a)) => Some(if a.0 < o.0 { a } else { o }),
        (o, a) => o.or(a),
    };
    picked
        .map(|(_, span)| span.to_string())
        .unwrap_or_else(|| cleaned.to_string())
}

/// 提取并解析为 JSON 值；首选区间解析失败时再尝试另一种括号的区间
pub fn parse_json_payload(raw: &str) -> Option<Value> {
    let cleaned = strip_fences(raw);
    let mut candidates: Vec<(usize, &str)> = [
        greedy_span(cleaned, '{', '}'),
        greedy_span(cleaned, '[', ']'),
    ]
    .into_iter()
    .flatten()
    .collect();
    candidates.sort_by_key(|(start, _)| *start);

    if candidates.is_empty() {
        return serde_json::from_str(cleaned).ok();
    }
    candidates
        .into_iter()
        .find_map(|(_, span)| serde_json::from_str(span).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_object_unchanged() {
        assert_eq!(extract_json(r#"{"a": 1}"#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_fenced_block_with_language_tag() {
        let raw = "```json\n{\"action\": \"use_tool\", \"invocations\": []}\n```";
        assert_eq!(
            extract_json(raw),
            r#"{"action": "use_tool", "invocations": []}"#
        );
    }

    #[test]
    fn test_object_surrounded_by_prose() {
        let raw = "Sure! Here is the plan:\n```json\n{\"action\": \"use_tool\"}\n```\nLet me know.";
        assert_eq!(extract_json(raw), r#"{"action": "use_tool"}"#);
    }

    #[test]
    fn test_bare_array_with_prose() {
        let raw = "Tools: [{\"capability\": \"sentiment\"}] done";
        assert_eq!(extract_json(raw), r#"[{"capability": "sentiment"}]"#);
    }

    #[test]
    fn test_nested_object_keeps_full_span() {
        let raw = "x {\"a\": {\"b\": [1, 2]}} y";
        assert_eq!(extract_json(raw), r#"{"a": {"b": [1, 2]}}"#);
    }

    #[test]
    fn test_no_brackets_returns_cleaned_text() {
        assert_eq!(extract_json("  ```no json here```  "), "no json here");
        assert_eq!(extract_json(""), "");
    }

    #[test]
    fn test_language_tag_only_stripped_as_token() {
        assert_eq!(extract_json("jsonify this"), "jsonify this");
        assert_eq!(extract_json("JSON{\"k\": true}"), r#"{"k": true}"#);
    }

    #[test]
    fn test_parse_payload_falls_back_to_other_bracket() {
        let raw = "[note] result: {\"answer\": 1, \"reasoning\": \"r\", \"confidence\": 0.5}";
        assert_eq!(
            parse_json_payload(raw),
            Some(json!({"answer": 1, "reasoning": "r", "confidence": 0.5}))
        );
    }

    #[test]
    fn test_parse_payload_garbage_is_none() {
        assert_eq!(parse_json_payload("I cannot help with that."), None);
        assert_eq!(parse_json_payload("{not json}"), None);
    }

    #[test]
    fn test_parse_payload_without_brackets_uses_cleaned_text() {
        assert_eq!(parse_json_payload("```json\n42\n```"), Some(json!(42)));
    }
}
