//! Tool-call parsing over the model's text output.
//!
//! Four shapes are accepted, tried in order:
//!
//! 1. `[TOOL_CALL] … [/TOOL_CALL]` blocks (the format the system prompt
//!    mandates),
//! 2. fenced ```json blocks with `{"name": …, "parameters": …}`,
//! 3. fenced ```tool:<name> blocks,
//! 4. bare `tool:<name>` key/value lines (some local models drop fences).

use std::collections::HashMap;

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolCall {
    pub tool_name: String,
    pub command_name: String,
    pub parameters: HashMap<String, String>,
}

impl ParsedToolCall {
    /// Parameters as a JSON object, for skill tools that take typed args.
    pub fn parameters_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.parameters {
            // Numbers stay numbers so schemas with integer fields validate.
            let value = v
                .parse::<i64>()
                .map(serde_json::Value::from)
                .unwrap_or_else(|_| serde_json::Value::from(v.clone()));
            map.insert(k.clone(), value);
        }
        serde_json::Value::Object(map)
    }
}

/// Quick containment test used before attempting the full parse.
pub fn contains_tool_call(text: &str) -> bool {
    text.contains("[TOOL_CALL]") && text.contains("[/TOOL_CALL]")
        || text.contains("```tool:")
        || (text.contains("```json") && text.contains("\"name\""))
        || SIMPLE_FORMAT.is_match(text)
}

static SIMPLE_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^tool:(\w+)\s*\n((?:[a-z_]+:[^\n]+\n?)+)").expect("simple tool pattern")
});

/// Parse the first tool call found in `text`, trying each shape in order.
pub fn parse_tool_call(text: &str) -> Option<ParsedToolCall> {
    if let Some(call) = parse_block_format(text) {
        debug!(tool = %call.tool_name, command = %call.command_name, "parsed [TOOL_CALL] format");
        return Some(call);
    }
    if let Some(call) = parse_json_format(text) {
        debug!(tool = %call.tool_name, command = %call.command_name, "parsed json format");
        return Some(call);
    }
    if let Some(call) = parse_backtick_format(text) {
        debug!(tool = %call.tool_name, command = %call.command_name, "parsed backtick format");
        return Some(call);
    }
    if let Some(call) = parse_simple_format(text) {
        debug!(tool = %call.tool_name, command = %call.command_name, "parsed simple format");
        return Some(call);
    }
    None
}

/// Replace the tool-call block in `text` with `replacement`. The simple
/// (fence-less) format has no delimited block, so the result replaces the
/// whole text there.
pub fn replace_tool_block(text: &str, replacement: &str) -> String {
    if let (Some(start), Some(end)) = (text.find("[TOOL_CALL]"), text.find("[/TOOL_CALL]")) {
        if end > start {
            let end = end + "[/TOOL_CALL]".len();
            return format!("{}{}{}", &text[..start], replacement, &text[end..]);
        }
    }
    if let Some(start) = text.find("```tool:") {
        if let Some(rel_end) = text[start + 8..].find("```") {
            let end = start + 8 + rel_end + 3;
            return format!("{}{}{}", &text[..start], replacement, &text[end..]);
        }
    }
    if let Some(start) = text.find("```json") {
        if let Some(rel_end) = text[start + 7..].find("```") {
            let end = start + 7 + rel_end + 3;
            return format!("{}{}{}", &text[..start], replacement, &text[end..]);
        }
    }
    replacement.to_string()
}

fn parse_block_format(text: &str) -> Option<ParsedToolCall> {
    let start = text.find("[TOOL_CALL]")? + "[TOOL_CALL]".len();
    let end = text.find("[/TOOL_CALL]")?;
    if end <= start {
        return None;
    }
    let block = &text[start..end];

    let mut tool_name = None;
    let mut command_name = None;
    let mut parameters = HashMap::new();
    let mut in_parameters = false;

    for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(value) = line.strip_prefix("tool_name:") {
            tool_name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("command_name:") {
            command_name = Some(value.trim().to_string());
        } else if line.starts_with("parameters:") {
            in_parameters = true;
        } else if in_parameters {
            if let Some((key, value)) = line.split_once(':') {
                parameters.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    Some(ParsedToolCall {
        tool_name: tool_name?,
        command_name: command_name?,
        parameters,
    })
}

fn parse_json_format(text: &str) -> Option<ParsedToolCall> {
    let start = text.find("```json")? + 7;
    let end = text[start..].find("```")? + start;
    let payload: serde_json::Value = serde_json::from_str(text[start..end].trim()).ok()?;

    let tool_name = payload["name"].as_str()?.to_string();
    let params = payload["parameters"].as_object()?;

    let mut command_name = None;
    let mut parameters = HashMap::new();
    for (key, value) in params {
        let value_str = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if key == "command" {
            command_name = Some(value_str);
        } else {
            parameters.insert(key.clone(), value_str);
        }
    }

    Some(ParsedToolCall {
        tool_name,
        command_name: command_name?,
        parameters,
    })
}

fn parse_backtick_format(text: &str) -> Option<ParsedToolCall> {
    let start = text.find("```tool:")?;
    let end = text[start + 8..].find("```")? + start + 8;
    let block = text[start + 8..end].trim();

    let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty());
    let tool_name = lines.next()?.trim_start_matches(':').to_string();
    parse_key_values(lines, tool_name)
}

fn parse_simple_format(text: &str) -> Option<ParsedToolCall> {
    let captures = SIMPLE_FORMAT.captures(text)?;
    let tool_name = captures.get(1)?.as_str().to_string();
    let body = captures.get(2)?.as_str();
    parse_key_values(body.lines().map(str::trim).filter(|l| !l.is_empty()), tool_name)
}

fn parse_key_values<'a>(
    lines: impl Iterator<Item = &'a str>,
    tool_name: String,
) -> Option<ParsedToolCall> {
    let mut command_name = None;
    let mut parameters = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim().to_string();
            if key == "command" {
                command_name = Some(value);
            } else {
                parameters.insert(key.to_string(), value);
            }
        }
    }
    Some(ParsedToolCall {
        tool_name,
        command_name: command_name?,
        parameters,
    })
}
