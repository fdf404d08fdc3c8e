//! Structured-command recovery from free-form model output.
//!
//! Generators rarely return clean JSON. [`extract`] walks an ordered list of
//! pure strategies and stops at the first one that yields a JSON object:
//!
//! | # | Strategy | Matches |
//! |---|---|---|
//! | 1 | `direct` | whole trimmed text is `{...}` |
//! | 2 | `json_fence` | first code fence tagged `json` (any case) |
//! | 3 | `any_fence` | first code fence with any or no tag |
//! | 4 | `brace_scan` | first balanced `{...}` region that parses |
//!
//! Parse failures inside a strategy only mean "no match"; nothing here can
//! fail loudly.

use std::sync::LazyLock;

use go2gate_types::StructuredCommand;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

type Object = Map<String, Value>;

/// One named way of locating a JSON object inside text.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub find: fn(&str) -> Option<Object>,
}

/// Strategies in priority order.
pub const STRATEGIES: [Strategy; 4] = [
    Strategy { name: "direct", find: direct },
    Strategy { name: "json_fence", find: json_fence },
    Strategy { name: "any_fence", find: any_fence },
    Strategy { name: "brace_scan", find: brace_scan },
];

static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```json\s*(\{.*?\})\s*```").expect("valid regex")
});
static ANY_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[\w+.-]*\s*(\{.*?\})\s*```").expect("valid regex")
});

/// Recover a [`StructuredCommand`] from `text`, or `None` when no strategy
/// finds a JSON object.
pub fn extract(text: &str) -> Option<StructuredCommand> {
    let (strategy, object) = find_object(text)?;
    let command = StructuredCommand::from_object(&object);
    debug!(
        strategy,
        cmd = command.cmd.as_deref(),
        tool = command.tool.as_deref(),
        "structured command extracted"
    );
    Some(command)
}

/// Run [`STRATEGIES`] in order and return the first hit with its strategy name.
pub fn find_object(text: &str) -> Option<(&'static str, Object)> {
    STRATEGIES
        .iter()
        .find_map(|s| (s.find)(text).map(|object| (s.name, object)))
}

fn parse_object(candidate: &str) -> Option<Object> {
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

fn direct(text: &str) -> Option<Object> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        parse_object(trimmed)
    } else {
        None
    }
}

fn fenced(re: &Regex, text: &str) -> Option<Object> {
    let interior = re.captures(text)?.get(1)?;
    parse_object(interior.as_str())
}

fn json_fence(text: &str) -> Option<Object> {
    fenced(&JSON_FENCE_RE, text)
}

fn any_fence(text: &str) -> Option<Object> {
    fenced(&ANY_FENCE_RE, text)
}

/// Find the leftmost `{` whose balanced region parses as an object.
///
/// One left-to-right pass keeps a stack of open-brace offsets; braces inside
/// JSON string literals of an open region do not count. Regions closed
/// within one top-level group are tried in order of their opening offset
/// once the group ends, so a malformed outer region falls back to the
/// objects nested inside it and an unclosed prefix never hides a later one.
fn brace_scan(text: &str) -> Option<Object> {
    let mut open: Vec<usize> = Vec::new();
    let mut closed: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(i),
            '}' => {
                let Some(start) = open.pop() else { continue };
                closed.push((start, i + 1));
                if open.is_empty()
                    && let Some(object) = first_parsing(text, &mut closed)
                {
                    return Some(object);
                }
            }
            _ => {}
        }
    }
    first_parsing(text, &mut closed)
}

/// Try the recorded regions leftmost first and clear them.
fn first_parsing(text: &str, closed: &mut Vec<(usize, usize)>) -> Option<Object> {
    closed.sort_unstable_by_key(|&(start, _)| start);
    let found = closed
        .iter()
        .find_map(|&(start, end)| parse_object(&text[start..end]));
    closed.clear();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmd_of(text: &str) -> Option<String> {
        extract(text).and_then(|c| c.cmd)
    }

    fn strategy_of(text: &str) -> Option<&'static str> {
        find_object(text).map(|(name, _)| name)
    }

    #[test]
    fn direct_object() {
        let command = extract(r#"  {"cmd":"follow","say":" 따라갈게요 "}  "#).unwrap();
        assert_eq!(command.cmd.as_deref(), Some("follow"));
        assert_eq!(command.say, "따라갈게요");
        assert_eq!(strategy_of(r#"{"cmd":"follow"}"#), Some("direct"));
    }

    #[test]
    fn labeled_fence_is_case_insensitive() {
        let text = "Sure!\n```JSON\n{\"cmd\": \"block\", \"say\": \"막을게요\"}\n```\nDone.";
        assert_eq!(cmd_of(text).as_deref(), Some("block"));
        assert_eq!(strategy_of(text), Some("json_fence"));
    }

    #[test]
    fn untagged_fence() {
        let text = "```\n{\"cmd\": \"research\"}\n```";
        assert_eq!(cmd_of(text).as_deref(), Some("research"));
        assert_eq!(strategy_of(text), Some("any_fence"));
    }

    #[test]
    fn fence_with_other_tag() {
        let text = "```javascript\n{\"cmd\": \"follow\"}\n```";
        assert_eq!(strategy_of(text), Some("any_fence"));
    }

    #[test]
    fn labeled_fence_beats_earlier_untagged_fence() {
        let text = "```\n{\"cmd\": \"block\"}\n```\nor\n```json\n{\"cmd\": \"follow\"}\n```";
        assert_eq!(cmd_of(text).as_deref(), Some("follow"));
    }

    #[test]
    fn fenced_nested_object() {
        let text = "```json\n{\"name\": \"follow\", \"arguments\": {\"speed\": 2}}\n```";
        let (_, object) = find_object(text).unwrap();
        assert_eq!(object.get("arguments"), Some(&json!({"speed": 2})));
    }

    #[test]
    fn brace_scan_in_prose() {
        let text = r#"blah {"cmd":"follow","say":"ok"} blah"#;
        let command = extract(text).unwrap();
        assert_eq!(command.cmd.as_deref(), Some("follow"));
        assert_eq!(command.say, "ok");
        assert_eq!(strategy_of(text), Some("brace_scan"));
    }

    #[test]
    fn brace_scan_ignores_braces_in_strings() {
        let text = r#"reply: {"cmd":"none","say":"use } and { freely"} end"#;
        let command = extract(text).unwrap();
        assert_eq!(command.cmd.as_deref(), Some("none"));
        assert_eq!(command.say, "use } and { freely");
    }

    #[test]
    fn brace_scan_skips_malformed_candidate() {
        let text = r#"{not json} then {"cmd":"block"}"#;
        assert_eq!(cmd_of(text).as_deref(), Some("block"));
    }

    #[test]
    fn brace_scan_finds_object_inside_unclosed_prefix() {
        let text = r#"{ oops {"cmd":"research"}"#;
        assert_eq!(cmd_of(text).as_deref(), Some("research"));
    }

    #[test]
    fn first_valid_candidate_wins() {
        let text = r#"{"cmd":"follow"} and later {"cmd":"block"}"#;
        assert_eq!(cmd_of(text).as_deref(), Some("follow"));
    }

    #[test]
    fn no_object_means_no_command() {
        assert!(extract("그냥 인사만 할게요.").is_none());
        assert!(extract("").is_none());
        assert!(extract("{ never closed").is_none());
        assert!(extract("[1, 2, 3]").is_none());
    }

    #[test]
    fn every_strategy_agrees_on_a_single_object() {
        let object = r#"{"cmd":"research","say":"탐색 시작"}"#;
        let inputs = [
            object.to_string(),
            format!("```json\n{object}\n```"),
            format!("```\n{object}\n```"),
            format!("Okay: {object} (that's it)"),
        ];
        for input in &inputs {
            let command = extract(input).unwrap();
            assert_eq!(command.cmd.as_deref(), Some("research"), "input: {input}");
            assert_eq!(command.say, "탐색 시작", "input: {input}");
        }
    }

    #[test]
    fn encoded_command_is_recovered() {
        let original = StructuredCommand {
            cmd: Some("block".into()),
            say: "앞을 막겠습니다".into(),
            tool: None,
        };
        let encoded = serde_json::to_string(&original).unwrap();
        assert_eq!(extract(&encoded), Some(original));
    }

    #[test]
    fn object_without_cmd_is_still_extracted() {
        let command = extract(r#"{"say":"hello"}"#).unwrap();
        assert_eq!(command.cmd, None);
        assert_eq!(command.say, "hello");
    }

    #[test]
    fn tool_call_shape_sets_tool() {
        let command = extract(r#"{"name":"follow_user","arguments":{}}"#).unwrap();
        assert_eq!(command.cmd, None);
        assert_eq!(command.tool.as_deref(), Some("follow_user"));
    }

    #[test]
    fn brace_scan_handles_escaped_quotes() {
        let text = r#"note {"cmd":"follow","say":"a \"}\" b"} tail"#;
        let command = extract(text).unwrap();
        assert_eq!(command.cmd.as_deref(), Some("follow"));
        assert_eq!(command.say, r#"a "}" b"#);
    }

    #[test]
    fn brace_scan_prefers_outer_object_over_nested_one() {
        let text = r#"go {"cmd":"block","args":{"cmd":"follow"}} now"#;
        assert_eq!(cmd_of(text).as_deref(), Some("block"));
    }

    #[test]
    fn brace_scan_falls_back_to_nested_object_in_malformed_region() {
        let text = r#"{ broken {"cmd":"follow"} still broken } then {"cmd":"block"}"#;
        assert_eq!(cmd_of(text).as_deref(), Some("follow"));
    }

    #[test]
    fn brace_scan_ignores_quotes_in_prose() {
        let text = r#"he said "go" then {"cmd":"research"}"#;
        assert_eq!(cmd_of(text).as_deref(), Some("research"));
    }

    #[test]
    fn brace_scan_stays_linear_on_unclosed_braces() {
        let started = std::time::Instant::now();
        assert!(extract(&"{".repeat(100_000)).is_none());
        let noisy = format!("{}{}", "{ x ".repeat(50_000), r#"{"cmd":"follow"}"#);
        assert_eq!(cmd_of(&noisy).as_deref(), Some("follow"));
        assert!(
            started.elapsed() < std::time::Duration::from_secs(2),
            "took {:?}",
            started.elapsed()
        );
    }
}
