//! Resolution of the JSON document a hook is invoked with.
//!
//! Precedence for tool input:
//! 1. `CLAUDE_TOOL_INPUT` when set and non-empty;
//! 2. stdin JSON, using its `tool_input` field if present, else the whole object.
//!
//! `tool_name` is always taken from stdin when present. Anything that does
//! not parse becomes an empty input, which every hook treats as "nothing to
//! check".

use regex::RegexBuilder;
use serde_json::{Map, Value as JsonValue};
use std::io::{IsTerminal, Read};

pub const TOOL_INPUT_ENV: &str = "CLAUDE_TOOL_INPUT";
pub const USER_PROMPT_ENV: &str = "CLAUDE_USER_PROMPT";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookInput {
    pub tool_name: Option<String>,
    pub tool_input: Map<String, JsonValue>,
}

impl HookInput {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.tool_input
            .get(key)
            .and_then(JsonValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Target of a file-writing tool.
    pub fn file_path(&self) -> Option<&str> {
        self.str_field("file_path")
            .or_else(|| self.str_field("notebook_path"))
            .or_else(|| self.str_field("path"))
    }

    /// Shell command of a Bash tool call.
    pub fn command(&self) -> Option<&str> {
        self.str_field("command")
    }

    pub fn is_empty(&self) -> bool {
        self.tool_input.is_empty()
    }
}

fn parse_object(text: &str) -> Option<Map<String, JsonValue>> {
    match serde_json::from_str::<JsonValue>(text.trim()) {
        Ok(JsonValue::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn unwrap_tool_input(mut obj: Map<String, JsonValue>) -> Map<String, JsonValue> {
    match obj.remove("tool_input") {
        Some(JsonValue::Object(inner)) => inner,
        Some(_) => Map::new(),
        None => obj,
    }
}

/// Pure resolution from the env value and stdin text.
pub fn resolve(env_value: Option<&str>, stdin_text: &str) -> HookInput {
    let stdin_obj = parse_object(stdin_text);
    let tool_name = stdin_obj
        .as_ref()
        .and_then(|o| o.get("tool_name"))
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    let tool_input = match env_value.filter(|v| !v.trim().is_empty()) {
        Some(env) => parse_object(env).map(unwrap_tool_input).unwrap_or_default(),
        None => stdin_obj.map(unwrap_tool_input).unwrap_or_default(),
    };
    HookInput {
        tool_name,
        tool_input,
    }
}

/// Stdin text, or empty when stdin is a terminal or unreadable.
pub fn read_stdin() -> String {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return String::new();
    }
    let mut buf = String::new();
    if stdin.lock().read_to_string(&mut buf).is_err() {
        return String::new();
    }
    buf
}

pub fn from_process(stdin_text: &str) -> HookInput {
    let env = std::env::var(TOOL_INPUT_ENV).ok();
    resolve(env.as_deref(), stdin_text)
}

/// The human prompt: stdin `user_prompt` or `prompt`, then the env fallback.
pub fn resolve_prompt(stdin_text: &str, env_value: Option<&str>) -> Option<String> {
    let from_stdin = parse_object(stdin_text).and_then(|o| {
        ["user_prompt", "prompt"]
            .iter()
            .find_map(|k| o.get(*k).and_then(JsonValue::as_str).map(str::to_string))
    });
    from_stdin
        .or_else(|| env_value.map(str::to_string))
        .filter(|p| !p.trim().is_empty())
}

pub fn prompt_from_process(stdin_text: &str) -> Option<String> {
    let env = std::env::var(USER_PROMPT_ENV).ok();
    resolve_prompt(stdin_text, env.as_deref())
}

/// Case-insensitive, word-bounded phrase match.
pub fn mentions_phrase(message: &str, phrases: &[String]) -> Option<String> {
    phrases
        .iter()
        .filter(|p| !p.trim().is_empty())
        .find(|p| {
            RegexBuilder::new(&format!(r"\b{}\b", regex::escape(p.trim())))
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(message))
                .unwrap_or(false)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_wins_over_stdin() {
        let input = resolve(
            Some(r#"{"file_path": "src/env.py"}"#),
            r#"{"tool_name": "Edit", "tool_input": {"file_path": "src/stdin.py"}}"#,
        );
        assert_eq!(input.file_path(), Some("src/env.py"));
        assert_eq!(input.tool_name.as_deref(), Some("Edit"));
    }

    #[test]
    fn test_blank_env_falls_through_to_stdin() {
        let input = resolve(
            Some("  "),
            r#"{"tool_name": "Write", "tool_input": {"file_path": "src/a.py", "content": "x"}}"#,
        );
        assert_eq!(input.file_path(), Some("src/a.py"));
    }

    #[test]
    fn test_stdin_without_wrapper_is_the_input() {
        let input = resolve(None, r#"{"file_path": "src/a.py"}"#);
        assert_eq!(input.file_path(), Some("src/a.py"));
        assert_eq!(input.tool_name, None);
    }

    #[test]
    fn test_malformed_is_empty() {
        assert!(resolve(None, "{not json").is_empty());
        assert!(resolve(None, "").is_empty());
        assert!(resolve(None, "[1,2]").is_empty());
        assert!(resolve(Some("garbage"), r#"{"file_path": "src/a.py"}"#).is_empty());
        assert!(resolve(None, r#"{"tool_input": "text"}"#).is_empty());
    }

    #[test]
    fn test_notebook_and_command_fields() {
        let nb = resolve(None, r#"{"tool_input": {"notebook_path": "nb/a.ipynb"}}"#);
        assert_eq!(nb.file_path(), Some("nb/a.ipynb"));
        let bash = resolve(None, r#"{"tool_name": "Bash", "tool_input": {"command": "ls"}}"#);
        assert_eq!(bash.command(), Some("ls"));
        assert_eq!(bash.file_path(), None);
    }

    #[test]
    fn test_prompt_sources() {
        assert_eq!(
            resolve_prompt(r#"{"user_prompt": "approved"}"#, Some("env")).as_deref(),
            Some("approved")
        );
        assert_eq!(
            resolve_prompt(r#"{"prompt": "lgtm"}"#, None).as_deref(),
            Some("lgtm")
        );
        assert_eq!(resolve_prompt("nope", Some("override")).as_deref(), Some("override"));
        assert_eq!(resolve_prompt("", None), None);
    }

    #[test]
    fn test_phrase_matching_is_word_bounded() {
        let phrases = vec!["override".to_string(), "ich genehmige".to_string()];
        assert!(mentions_phrase("OK, Override.", &phrases).is_some());
        assert!(mentions_phrase("ja, ich genehmige das", &phrases).is_some());
        assert!(mentions_phrase("the overrides file", &phrases).is_none());
        assert!(mentions_phrase("method_override_x", &phrases).is_none());
        assert!(mentions_phrase("", &phrases).is_none());
    }
}
