//! Unified tool-use parser over the three interchangeable formats.
//!
//! The parser is restartable: given any prefix of an assistant message it
//! returns only invocations that are already complete. The `streaming` flag
//! tightens "complete" for markdown (a closed fence must be followed by a
//! blank line, so the engine never acts on a block the model is still
//! amending).

use once_cell::sync::Lazy;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use regex::Regex;
use serde_json::Value;

use super::ToolRegistry;
pub use env_config::ToolFormatName;

/// A parsed tool invocation. Never stored; re-parsed from message content.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolUse {
    pub tool: String,
    /// Positional arguments (markdown header args, xml param values in order).
    pub args: Vec<String>,
    /// Block body (markdown), `<content>` element (xml), or raw JSON (native).
    pub content: String,
    pub call_id: Option<String>,
    /// Named arguments, when the invocation came in JSON form.
    pub kwargs: Option<Value>,
}

impl ToolUse {
    pub fn new(tool: impl Into<String>, args: Vec<String>, content: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args,
            content: content.into(),
            call_id: None,
            kwargs: None,
        }
    }

    /// JSON view for `tool_pending` events.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "tool": self.tool,
            "args": self.args,
            "content": self.content,
            "call_id": self.call_id,
        })
    }
}

/// Scans `content` for complete tool invocations in the given format.
pub fn parse_tool_uses(
    content: &str,
    format: ToolFormatName,
    streaming: bool,
    registry: &ToolRegistry,
) -> Vec<ToolUse> {
    match format {
        ToolFormatName::Markdown => parse_markdown(content, streaming, registry),
        ToolFormatName::Xml => parse_xml(content, registry),
        ToolFormatName::Tool => parse_native(content),
    }
}

/// Markdown format: fenced code blocks whose tag matches a registered tool
/// alias. Runnable iff the fence is closed and, while streaming, followed by
/// a blank line (or end of input after a trailing newline).
fn parse_markdown(content: &str, streaming: bool, registry: &ToolRegistry) -> Vec<ToolUse> {
    let mut out = Vec::new();
    let lines: Vec<&str> = content.split('\n').collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let Some(header) = line.strip_prefix("```") else {
            i += 1;
            continue;
        };
        let header = header.trim();
        if header.is_empty() {
            i += 1;
            continue;
        }
        let mut parts = header.split_whitespace();
        let tag = parts.next().unwrap_or("");
        let args: Vec<String> = parts.map(str::to_string).collect();

        // find the closing fence
        let mut close = None;
        for (j, l) in lines.iter().enumerate().skip(i + 1) {
            if l.trim_end() == "```" {
                close = Some(j);
                break;
            }
        }
        let Some(close) = close else {
            break; // unclosed block: nothing after this can be complete
        };

        let trailing_ok = if streaming {
            // the close fence must be followed by a blank line already present
            lines
                .get(close + 1)
                .map(|l| l.trim().is_empty())
                .unwrap_or(false)
        } else {
            true
        };

        if trailing_ok {
            if let Some(spec) = registry.resolve_block_tag(tag) {
                let body = lines[i + 1..close].join("\n");
                out.push(ToolUse::new(spec.name.clone(), args, body));
            }
        }
        i = close + 1;
    }
    out
}

/// XML format: complete `<tool name="…">…</tool>` regions. The scanner
/// tolerates partial input by only considering regions with a closing tag.
fn parse_xml(content: &str, registry: &ToolRegistry) -> Vec<ToolUse> {
    let mut out = Vec::new();
    let mut search_from = 0;
    while let Some(rel) = content[search_from..].find("<tool") {
        let start = search_from + rel;
        let Some(end_rel) = content[start..].find("</tool>") else {
            break; // still streaming in; not complete
        };
        let end = start + end_rel + "</tool>".len();
        if let Some(tu) = parse_xml_region(&content[start..end], registry) {
            out.push(tu);
        }
        search_from = end;
    }
    out
}

fn parse_xml_region(region: &str, registry: &ToolRegistry) -> Option<ToolUse> {
    let mut reader = Reader::from_str(region);
    reader.config_mut().trim_text(true);

    let mut tool_name = None;
    let mut call_id = None;
    let mut args = Vec::new();
    let mut kwargs = serde_json::Map::new();
    let mut content = String::new();
    let mut direct_text = String::new();

    #[derive(PartialEq)]
    enum Where {
        Top,
        Param(String),
        Content,
    }
    let mut at = Where::Top;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => match e.name().as_ref() {
                b"tool" => {
                    for attr in e.attributes().flatten() {
                        let key = attr.key.as_ref().to_vec();
                        let value = attr.unescape_value().ok()?.into_owned();
                        match key.as_slice() {
                            b"name" => tool_name = Some(value),
                            b"call_id" => call_id = Some(value),
                            _ => {}
                        }
                    }
                }
                b"param" => {
                    let name = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"name")
                        .and_then(|a| a.unescape_value().ok())
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    at = Where::Param(name);
                }
                b"content" => at = Where::Content,
                _ => {}
            },
            Ok(XmlEvent::End(e)) => match e.name().as_ref() {
                b"param" | b"content" => at = Where::Top,
                b"tool" => break,
                _ => {}
            },
            Ok(XmlEvent::Text(t)) => {
                let text = t.unescape().ok()?.into_owned();
                match &at {
                    Where::Param(name) => {
                        args.push(text.clone());
                        kwargs.insert(name.clone(), Value::String(text));
                    }
                    Where::Content => content.push_str(&text),
                    Where::Top => direct_text.push_str(&text),
                }
            }
            Ok(XmlEvent::CData(t)) => {
                let text = String::from_utf8_lossy(&t).into_owned();
                match &at {
                    Where::Content => content.push_str(&text),
                    Where::Param(name) => {
                        args.push(text.clone());
                        kwargs.insert(name.clone(), Value::String(text));
                    }
                    Where::Top => direct_text.push_str(&text),
                }
            }
            Ok(XmlEvent::Eof) => break,
            Err(_) => return None, // malformed region: not a runnable invocation
            _ => {}
        }
    }

    let name = tool_name?;
    let spec = registry.resolve_block_tag(&name)?;
    if content.is_empty() {
        content = direct_text.trim().to_string();
    }
    Some(ToolUse {
        tool: spec.name.clone(),
        args,
        content,
        call_id,
        kwargs: if kwargs.is_empty() {
            None
        } else {
            Some(Value::Object(kwargs))
        },
    })
}

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^@([A-Za-z0-9_.\-]+)\(([^)]*)\):[ \t]*").expect("static regex"));

/// Native format: `@<name>(<call_id>): <json-args>` markers produced by the
/// adapters. An invocation is complete once its JSON object is balanced.
fn parse_native(content: &str) -> Vec<ToolUse> {
    parse_native_markers(content).1
}

/// Splits marker invocations out of flattened assistant text.
/// Returns (prose without complete invocations, invocations).
pub fn parse_native_markers(content: &str) -> (String, Vec<ToolUse>) {
    let mut prose = String::with_capacity(content.len());
    let mut uses = Vec::new();
    let mut cursor = 0;

    for caps in MARKER_RE.captures_iter(content) {
        let (Some(whole), Some(name), Some(call_id)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        if whole.start() < cursor {
            continue;
        }
        let name = name.as_str().to_string();
        let call_id = call_id.as_str().to_string();
        let json_start = whole.end();
        let Some(json_len) = complete_json_len(&content[json_start..]) else {
            // arguments still streaming in; leave the tail in prose
            continue;
        };
        let json_text = &content[json_start..json_start + json_len];
        let Ok(kwargs) = serde_json::from_str::<Value>(json_text) else {
            continue;
        };

        prose.push_str(&content[cursor..whole.start()]);
        cursor = json_start + json_len;

        uses.push(ToolUse {
            tool: name,
            args: Vec::new(),
            content: json_text.to_string(),
            call_id: if call_id.is_empty() {
                None
            } else {
                Some(call_id)
            },
            kwargs: Some(kwargs),
        });
    }
    prose.push_str(&content[cursor..]);
    (prose, uses)
}

/// Length of a complete JSON object/array at the start of `s`, if any.
/// Brace matching is string- and escape-aware.
fn complete_json_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let open = *bytes.first()?;
    let close = match open {
        b'{' => b'}',
        b'[' => b']',
        _ => return None,
    };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolSpec;

    fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::echo_for_tests()
                    .named("shell")
                    .with_block_types(vec!["shell".into(), "bash".into(), "sh".into()]),
            )
            .unwrap();
        registry
            .register(ToolSpec::echo_for_tests().named("patch"))
            .unwrap();
        registry
    }

    // --- markdown ---

    #[test]
    fn markdown_complete_block_parses() {
        let content = "Listing:\n```shell\nls\n```\n";
        let uses = parse_tool_uses(content, ToolFormatName::Markdown, false, &registry());
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].tool, "shell");
        assert_eq!(uses[0].content, "ls");
        assert!(uses[0].args.is_empty());
    }

    #[test]
    fn markdown_alias_resolves_to_tool_name() {
        let content = "```bash\necho hi\n```\n";
        let uses = parse_tool_uses(content, ToolFormatName::Markdown, false, &registry());
        assert_eq!(uses[0].tool, "shell");
    }

    #[test]
    fn markdown_unknown_tag_is_not_runnable() {
        let content = "```python\nprint(1)\n```\n";
        let uses = parse_tool_uses(content, ToolFormatName::Markdown, false, &registry());
        assert!(uses.is_empty());
    }

    #[test]
    fn markdown_unclosed_block_is_not_complete() {
        let content = "```shell\nls";
        let uses = parse_tool_uses(content, ToolFormatName::Markdown, true, &registry());
        assert!(uses.is_empty());
    }

    #[test]
    fn markdown_streaming_requires_trailing_blank_line() {
        let reg = registry();
        // closed, but no blank line yet: the model may still be amending
        let no_blank = "```shell\nls\n```";
        assert!(parse_tool_uses(no_blank, ToolFormatName::Markdown, true, &reg).is_empty());
        // blank line present: runnable
        let with_blank = "```shell\nls\n```\n\n";
        assert_eq!(
            parse_tool_uses(with_blank, ToolFormatName::Markdown, true, &reg).len(),
            1
        );
        // non-streaming parse does not require it
        assert_eq!(
            parse_tool_uses(no_blank, ToolFormatName::Markdown, false, &reg).len(),
            1
        );
    }

    #[test]
    fn markdown_header_args_are_positional() {
        let content = "```patch src/main.rs\n-old\n+new\n```\n";
        let uses = parse_tool_uses(content, ToolFormatName::Markdown, false, &registry());
        assert_eq!(uses[0].args, vec!["src/main.rs"]);
        assert_eq!(uses[0].content, "-old\n+new");
    }

    #[test]
    fn markdown_reparse_is_stable() {
        // the multiset of runnable uses must match between passes
        let content = "a\n```shell\nls\n```\n\nmore\n```shell\npwd\n```\n\n";
        let reg = registry();
        let first = parse_tool_uses(content, ToolFormatName::Markdown, true, &reg);
        let second = parse_tool_uses(content, ToolFormatName::Markdown, false, &reg);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    // --- xml ---

    #[test]
    fn xml_complete_element_parses() {
        let content = r#"Running:
<tool name="shell"><param name="cwd">/tmp</param><content>ls -la</content></tool>"#;
        let uses = parse_tool_uses(content, ToolFormatName::Xml, true, &registry());
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].tool, "shell");
        assert_eq!(uses[0].args, vec!["/tmp"]);
        assert_eq!(uses[0].content, "ls -la");
        assert_eq!(uses[0].kwargs.as_ref().unwrap()["cwd"], "/tmp");
    }

    #[test]
    fn xml_partial_element_is_not_complete() {
        let content = r#"<tool name="shell"><content>ls"#;
        let uses = parse_tool_uses(content, ToolFormatName::Xml, true, &registry());
        assert!(uses.is_empty());
    }

    #[test]
    fn xml_unknown_tool_skipped() {
        let content = r#"<tool name="nope"><content>x</content></tool>"#;
        let uses = parse_tool_uses(content, ToolFormatName::Xml, false, &registry());
        assert!(uses.is_empty());
    }

    #[test]
    fn xml_direct_text_becomes_content() {
        let content = r#"<tool name="shell">echo hi</tool>"#;
        let uses = parse_tool_uses(content, ToolFormatName::Xml, false, &registry());
        assert_eq!(uses[0].content, "echo hi");
    }

    // --- native markers ---

    #[test]
    fn native_marker_parses_complete_json() {
        let content = "Checking.\n@shell(call_3): {\"command\": \"ls\"}";
        let uses = parse_tool_uses(content, ToolFormatName::Tool, true, &registry());
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].tool, "shell");
        assert_eq!(uses[0].call_id.as_deref(), Some("call_3"));
        assert_eq!(uses[0].kwargs.as_ref().unwrap()["command"], "ls");
    }

    #[test]
    fn native_marker_incomplete_json_not_runnable() {
        let content = "@shell(call_3): {\"command\": \"l";
        let uses = parse_tool_uses(content, ToolFormatName::Tool, true, &registry());
        assert!(uses.is_empty());
    }

    #[test]
    fn native_marker_json_with_nested_braces_and_strings() {
        let content = r#"@patch(c1): {"edit": "fn a() { \"}\" }", "n": [1, 2]}"#;
        let (prose, uses) = parse_native_markers(content);
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].kwargs.as_ref().unwrap()["n"][1], 2);
        assert!(prose.trim().is_empty());
    }

    #[test]
    fn native_markers_split_prose() {
        let content = "Before.\n@shell(c9): {\"command\": \"pwd\"}\nAfter.";
        let (prose, uses) = parse_native_markers(content);
        assert_eq!(uses.len(), 1);
        assert!(prose.contains("Before."));
        assert!(prose.contains("After."));
        assert!(!prose.contains("@shell"));
    }

    #[test]
    fn complete_json_len_handles_escapes() {
        assert_eq!(complete_json_len(r#"{"a": "b"}"#), Some(10));
        assert_eq!(complete_json_len(r#"{"a": "\"}"}"#), Some(12));
        assert_eq!(complete_json_len("{\"a\": 1"), None);
        assert_eq!(complete_json_len("not json"), None);
    }
}
