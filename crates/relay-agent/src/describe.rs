//! Human-readable rendering of tool calls and results.

use relay_core::truncate_chars;
use serde_json::Value;

/// Maximum characters of a tool error shown in the output stream.
pub const MAX_TOOL_ERROR_CHARS: usize = 1500;

const MAX_DETAIL_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 1000;

fn str_field<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| input.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// The path argument of a file tool, if any.
pub fn path_argument(input: &Value) -> Option<&str> {
    str_field(input, &["file_path", "notebook_path", "path"])
}

/// Text shown in an approval prompt for `tool_name` called with `input`.
pub fn describe_action(tool_name: &str, input: &Value) -> String {
    let described = match tool_name {
        "Bash" => str_field(input, &["command"]).map(str::to_string),
        "Write" | "Edit" | "MultiEdit" | "NotebookEdit" | "Read" => {
            path_argument(input).map(str::to_string)
        }
        "Glob" | "Grep" => str_field(input, &["pattern"]).map(|p| match path_argument(input) {
            Some(path) => format!("{} in {}", p, path),
            None => p.to_string(),
        }),
        "ExitPlanMode" => str_field(input, &["plan"]).map(str::to_string),
        "WebFetch" => str_field(input, &["url"]).map(str::to_string),
        "WebSearch" => str_field(input, &["query"]).map(str::to_string),
        _ => None,
    };
    let text = described.unwrap_or_else(|| compact_json(input));
    truncate_chars(&text, MAX_DESCRIPTION_CHARS)
}

fn compact_json(input: &Value) -> String {
    match input {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => other.to_string(),
    }
}

/// One output line announcing a tool call.
pub fn format_tool_use(tool_name: &str, input: &Value) -> String {
    let detail = match tool_name {
        "TodoWrite" => String::new(),
        _ => describe_action(tool_name, input),
    };
    let detail = truncate_chars(detail.lines().next().unwrap_or(""), MAX_DETAIL_CHARS);
    if detail.is_empty() {
        format!("🔧 {}\n", tool_name)
    } else {
        format!("🔧 {}: {}\n", tool_name, detail)
    }
}

/// Plain text of a tool result; the CLI sends either a string or text blocks.
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Output line for a failed tool call, truncated for chat display.
pub fn format_tool_error(content: &Value) -> String {
    let text = tool_result_text(content);
    format!("⚠️ {}\n", truncate_chars(text.trim(), MAX_TOOL_ERROR_CHARS))
}
