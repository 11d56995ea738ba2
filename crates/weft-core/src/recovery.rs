//! Best-effort parsing of tool configuration typed into the visual editor.
//!
//! [`parse_config`] never fails: it tries a strict JSON parse, then a syntax
//! repair pass, then regex extraction of quoted key/value pairs, then a loose
//! `key=value` scan. The worst case is an empty map.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

pub type ConfigMap = Map<String, Value>;

static TRAILING_BRACE: OnceLock<Regex> = OnceLock::new();
static TRAILING_BRACKET: OnceLock<Regex> = OnceLock::new();
static BARE_KEY: OnceLock<Regex> = OnceLock::new();
static QUOTED_STRING: OnceLock<Regex> = OnceLock::new();
static QUOTED_NUMBER: OnceLock<Regex> = OnceLock::new();
static QUOTED_BOOL: OnceLock<Regex> = OnceLock::new();
static LOOSE_PAIR: OnceLock<Regex> = OnceLock::new();
static FLOAT: OnceLock<Regex> = OnceLock::new();

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

/// Parse a possibly malformed config string into a key/value map.
pub fn parse_config(raw: Option<&str>) -> ConfigMap {
    let raw = match raw {
        Some(s) if !s.trim().is_empty() => s,
        _ => return ConfigMap::new(),
    };

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        return map;
    }

    debug!(len = raw.len(), "Strict config parse failed, attempting recovery");

    if let Some(map) = repair_syntax(raw) {
        return map;
    }

    let extracted = extract_quoted_pairs(raw);
    if !extracted.is_empty() {
        return extracted;
    }

    extract_loose_pairs(raw)
}

/// Strip trailing commas, quote bare keys, add missing braces, re-parse.
fn repair_syntax(raw: &str) -> Option<ConfigMap> {
    let fixed = raw.trim();
    let fixed = regex(&TRAILING_BRACE, r",\s*\}").replace_all(fixed, "}");
    let fixed = regex(&TRAILING_BRACKET, r",\s*\]").replace_all(&fixed, "]");
    let fixed = regex(&BARE_KEY, r"(\{|,)\s*([a-zA-Z0-9_]+)\s*:").replace_all(&fixed, r#"${1}"${2}":"#);

    let fixed = if fixed.starts_with('{') || fixed.starts_with('[') {
        fixed.into_owned()
    } else {
        format!("{{{fixed}}}")
    };

    match serde_json::from_str::<Value>(&fixed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Union of `"key": "string"`, `"key": number`, `"key": bool` matches.
/// Later patterns overwrite keys found by earlier ones.
fn extract_quoted_pairs(raw: &str) -> ConfigMap {
    let mut map = ConfigMap::new();

    for caps in regex(&QUOTED_STRING, r#""([^"]+)"\s*:\s*"([^"]*)""#).captures_iter(raw) {
        map.insert(caps[1].to_string(), Value::String(caps[2].to_string()));
    }

    for caps in regex(&QUOTED_NUMBER, r#""([^"]+)"\s*:\s*(-?\d+(?:\.\d+)?)"#).captures_iter(raw) {
        let text = &caps[2];
        let value = if text.contains('.') {
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
        } else {
            text.parse::<i64>().ok().map(Value::from)
        };
        map.insert(
            caps[1].to_string(),
            value.unwrap_or_else(|| Value::String(text.to_string())),
        );
    }

    for caps in regex(&QUOTED_BOOL, r#""([^"]+)"\s*:\s*(true|false)"#).captures_iter(raw) {
        map.insert(caps[1].to_string(), Value::Bool(&caps[2] == "true"));
    }

    map
}

/// Last resort: `key=value` or `key: value` tokens with type coercion.
fn extract_loose_pairs(raw: &str) -> ConfigMap {
    let mut map = ConfigMap::new();
    for caps in regex(&LOOSE_PAIR, r"([a-zA-Z0-9_]+)[=:]\s*([a-zA-Z0-9_./\\-]+)").captures_iter(raw) {
        map.insert(caps[1].to_string(), coerce(&caps[2]));
    }
    map
}

fn coerce(text: &str) -> Value {
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if text.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = text.parse::<i64>() {
            return Value::from(n);
        }
    }
    if regex(&FLOAT, r"^-?\d+\.\d+$").is_match(text) {
        if let Some(n) = text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

/// Launch parameters for an external tool process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchSpec {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    pub disabled_tools: Option<Vec<String>>,
}

/// Depth-first search for the first object carrying a `command` key.
///
/// The current level is checked before nested objects, which are visited in
/// key order. `disabled_tools` falls back to the root map when the located
/// object has none.
pub fn locate_launch(map: &ConfigMap) -> LaunchSpec {
    let Some(found) = find_command(map) else {
        return LaunchSpec::default();
    };

    let disabled = found
        .get("disabled_tools")
        .or_else(|| map.get("disabled_tools"))
        .map(string_list)
        .unwrap_or_default();

    LaunchSpec {
        command: found.get("command").and_then(scalar_string),
        args: Some(found.get("args").map(string_list).unwrap_or_default()),
        env: Some(found.get("env").map(string_map).unwrap_or_default()),
        disabled_tools: Some(disabled),
    }
}

fn find_command(map: &ConfigMap) -> Option<&ConfigMap> {
    if map
        .get("command")
        .and_then(scalar_string)
        .is_some_and(|c| !c.is_empty())
    {
        return Some(map);
    }
    map.values().find_map(|v| match v {
        Value::Object(nested) => find_command(nested),
        _ => None,
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| scalar_string(item).unwrap_or_else(|| item.to_string()))
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn string_map(value: &Value) -> HashMap<String, String> {
    match value {
        Value::Object(entries) => entries
            .iter()
            .map(|(k, v)| (k.clone(), scalar_string(v).unwrap_or_else(|| v.to_string())))
            .collect(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> ConfigMap {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn empty_and_absent_give_empty_map() {
        assert!(parse_config(None).is_empty());
        assert!(parse_config(Some("")).is_empty());
        assert!(parse_config(Some("   \n")).is_empty());
    }

    #[test]
    fn valid_json_matches_strict_parse() {
        let raw = r#"{"mcpServers":{"docs":{"command":"uvx","args":["docs-server@latest"],"env":{"LOG":"ERROR"}}},"n":1.5}"#;
        let strict: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(Value::Object(parse_config(Some(raw))), strict);
    }

    #[test]
    fn trailing_commas_are_repaired() {
        let map = parse_config(Some(r#"{"command": "npx", "args": ["-y", "pkg",],}"#));
        assert_eq!(map.get("command"), Some(&json!("npx")));
        assert_eq!(map.get("args"), Some(&json!(["-y", "pkg"])));
    }

    #[test]
    fn bare_keys_are_quoted() {
        let map = parse_config(Some(r#"{command: "uvx", timeout: 30}"#));
        assert_eq!(map.get("command"), Some(&json!("uvx")));
        assert_eq!(map.get("timeout"), Some(&json!(30)));
    }

    #[test]
    fn unwrapped_fragment_is_braced() {
        let map = parse_config(Some(r#""command": "uvx", "debug": true"#));
        assert_eq!(map.get("command"), Some(&json!("uvx")));
        assert_eq!(map.get("debug"), Some(&json!(true)));
    }

    #[test]
    fn regex_extraction_unions_types() {
        // Unbalanced braces defeat the repair pass.
        let map = parse_config(Some(r#"{"name": "x", "retries": 3, "ratio": -0.5, "on": false {"#));
        assert_eq!(map.get("name"), Some(&json!("x")));
        assert_eq!(map.get("retries"), Some(&json!(3)));
        assert_eq!(map.get("ratio"), Some(&json!(-0.5)));
        assert_eq!(map.get("on"), Some(&json!(false)));
    }

    #[test]
    fn loose_pairs_are_coerced() {
        let map = parse_config(Some("command=uvx verbose=TRUE port=8080 scale=1.25 path=/usr/bin ]["));
        assert_eq!(map.get("command"), Some(&json!("uvx")));
        assert_eq!(map.get("verbose"), Some(&json!(true)));
        assert_eq!(map.get("port"), Some(&json!(8080)));
        assert_eq!(map.get("scale"), Some(&json!(1.25)));
        assert_eq!(map.get("path"), Some(&json!("/usr/bin")));
    }

    #[test]
    fn non_object_json_falls_through() {
        assert!(parse_config(Some("[1, 2, 3]")).is_empty());
        assert!(parse_config(Some("42")).is_empty());
    }

    #[test]
    fn garbled_input_never_panics() {
        let samples = [
            "{", "}", "\"", "{\"a\":", ",,,", "{\"a\": \"b\"", "::::", "=", "{[}]",
            "\u{0}\u{1}", "{\"\": 1}", "a=", "ünïcödé: ✓", "{\"k\": 99999999999999999999999}",
        ];
        for s in samples {
            let _ = parse_config(Some(s));
        }
        let full = r#"{"mcpServers": {"x": {"command": "run", "args": ["a"]}}}"#;
        for i in 0..full.len() {
            if full.is_char_boundary(i) {
                let _ = parse_config(Some(&full[..i]));
            }
        }
    }

    #[test]
    fn locate_finds_nested_command() {
        let map = obj(json!({
            "mcpServers": {
                "aws-docs": {
                    "command": "uvx",
                    "args": ["awslabs.aws-documentation-mcp-server@latest", 3],
                    "env": {"FASTMCP_LOG_LEVEL": "ERROR", "PORT": 80}
                }
            }
        }));
        let spec = locate_launch(&map);
        assert_eq!(spec.command.as_deref(), Some("uvx"));
        assert_eq!(
            spec.args.unwrap(),
            vec!["awslabs.aws-documentation-mcp-server@latest".to_string(), "3".to_string()]
        );
        let env = spec.env.unwrap();
        assert_eq!(env.get("FASTMCP_LOG_LEVEL").map(String::as_str), Some("ERROR"));
        assert_eq!(env.get("PORT").map(String::as_str), Some("80"));
        assert_eq!(spec.disabled_tools, Some(vec![]));
    }

    #[test]
    fn locate_prefers_current_level() {
        let map = obj(json!({
            "nested": {"command": "inner"},
            "command": "outer"
        }));
        assert_eq!(locate_launch(&map).command.as_deref(), Some("outer"));
    }

    #[test]
    fn locate_visits_nested_in_key_order() {
        let map = obj(json!({
            "first": {"command": "one"},
            "second": {"command": "two"}
        }));
        assert_eq!(locate_launch(&map).command.as_deref(), Some("one"));
    }

    #[test]
    fn locate_reads_root_disabled_tools() {
        let map = obj(json!({
            "disabled_tools": ["delete_everything"],
            "servers": {"s": {"command": "srv"}}
        }));
        assert_eq!(
            locate_launch(&map).disabled_tools,
            Some(vec!["delete_everything".to_string()])
        );
    }

    #[test]
    fn locate_without_command_is_all_none() {
        let map = obj(json!({"args": ["x"], "env": {"A": "B"}}));
        assert_eq!(locate_launch(&map), LaunchSpec::default());
    }
}
