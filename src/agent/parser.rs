//! Tool-call extraction from raw model output.
//!
//! Models emit tool calls as XML-style tags inline with their prose:
//!
//! ```text
//! I'll check the file first.
//! <read_file path="src/main.rs"/>
//! <write_file path="notes.txt" description="add note">
//! hello
//! </write_file>
//! ```
//!
//! The element name is the tool name; attributes are string parameters; the
//! text between an open/close pair is the invocation body. Attribute values
//! are parsed from the start tag alone, and the body is captured by an
//! explicit end-marker search, so bodies may contain tag-like content
//! without confusing the scan. Malformed or unterminated markers extract
//! nothing -- corrupt input must never trigger a partial execution.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Start tag: `<name attr="value" ...>` or self-closing `<name .../>`.
/// Attribute values are double-quoted and may not contain quotes.
static START_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([A-Za-z_][A-Za-z0-9_]*)((?:\s+[A-Za-z_][A-Za-z0-9_]*="[^"]*")*)\s*(/?)>"#)
        .expect("invalid start tag regex")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)="([^"]*)""#).expect("invalid attribute regex")
});

/// One tool call extracted from a model response. Ephemeral: produced by
/// [`parse_response`], consumed immediately by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: String,
    /// Ordered so derived strings (signatures, log lines) are deterministic.
    pub params: BTreeMap<String, String>,
    pub body: String,
}

impl ToolInvocation {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }
}

/// The decomposition of one model response: the prose before the first tool
/// call, plus every well-formed call in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub narration: String,
    pub invocations: Vec<ToolInvocation>,
}

impl ParsedResponse {
    pub fn has_invocations(&self) -> bool {
        !self.invocations.is_empty()
    }
}

/// Scan a model response for tool calls.
///
/// Returns every well-formed invocation in document order and the narration
/// preceding the first one. When no invocation is found the whole text is
/// narration. An unterminated open tag is skipped and scanning resumes after
/// it, so a later well-formed call is still extracted.
pub fn parse_response(text: &str) -> ParsedResponse {
    let mut invocations = Vec::new();
    let mut first_invocation_at: Option<usize> = None;
    let mut cursor = 0;

    while cursor < text.len() {
        let Some(caps) = START_TAG.captures(&text[cursor..]) else {
            break;
        };
        let full = caps.get(0).expect("regex match has group 0");
        let tag_start = cursor + full.start();
        let tag_end = cursor + full.end();
        let name = caps.get(1).expect("tool name group").as_str();
        let attrs = caps.get(2).map(|g| g.as_str()).unwrap_or("");
        let self_closing = !caps.get(3).expect("slash group").as_str().is_empty();

        let mut params = BTreeMap::new();
        for attr in ATTRIBUTE.captures_iter(attrs) {
            params.insert(attr[1].to_string(), attr[2].to_string());
        }

        if self_closing {
            first_invocation_at.get_or_insert(tag_start);
            invocations.push(ToolInvocation {
                tool: name.to_string(),
                params,
                body: String::new(),
            });
            cursor = tag_end;
            continue;
        }

        let end_marker = format!("</{name}>");
        match text[tag_end..].find(&end_marker) {
            Some(offset) => {
                let body = trim_body(&text[tag_end..tag_end + offset]);
                first_invocation_at.get_or_insert(tag_start);
                invocations.push(ToolInvocation {
                    tool: name.to_string(),
                    params,
                    body,
                });
                cursor = tag_end + offset + end_marker.len();
            }
            None => {
                // Unterminated: not an invocation. Keep scanning past the
                // open tag in case a well-formed call follows.
                cursor = tag_end;
            }
        }
    }

    let narration = match first_invocation_at {
        Some(idx) => text[..idx].trim().to_string(),
        None => text.trim().to_string(),
    };

    ParsedResponse {
        narration,
        invocations,
    }
}

/// Strip the single newline that conventionally follows the open tag and
/// precedes the close tag. Interior whitespace is content and stays intact.
fn trim_body(raw: &str) -> String {
    let s = raw
        .strip_prefix("\r\n")
        .or_else(|| raw.strip_prefix('\n'))
        .unwrap_or(raw);
    let s = s
        .strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s);
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_all_narration() {
        let parsed = parse_response("Just a normal answer with no tool calls.");
        assert!(parsed.invocations.is_empty());
        assert_eq!(parsed.narration, "Just a normal answer with no tool calls.");
    }

    #[test]
    fn self_closing_invocation_with_attributes() {
        let parsed = parse_response("Let me look.\n<read_file path=\"src/main.rs\"/>");
        assert_eq!(parsed.narration, "Let me look.");
        assert_eq!(parsed.invocations.len(), 1);

        let inv = &parsed.invocations[0];
        assert_eq!(inv.tool, "read_file");
        assert_eq!(inv.param("path"), Some("src/main.rs"));
        assert_eq!(inv.body, "");
    }

    #[test]
    fn body_survives_marker_like_content() {
        let text = "<write_file path=\"index.html\">\n<div>hello</div>\n</write_file>";
        let parsed = parse_response(text);

        assert_eq!(parsed.invocations.len(), 1);
        assert_eq!(parsed.invocations[0].body, "<div>hello</div>");
    }

    #[test]
    fn empty_body_pair_matches_self_closing_form() {
        let a = parse_response("<list_dir path=\"src\"/>");
        let b = parse_response("<list_dir path=\"src\"></list_dir>");
        assert_eq!(a.invocations, b.invocations);
    }

    #[test]
    fn multiple_invocations_keep_document_order() {
        let text = "Plan:\n<read_file path=\"a.rs\"/>\nthen\n<read_file path=\"b.rs\"/>";
        let parsed = parse_response(text);

        assert_eq!(parsed.narration, "Plan:");
        let paths: Vec<_> = parsed
            .invocations
            .iter()
            .map(|i| i.param("path").unwrap())
            .collect();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn unterminated_open_tag_extracts_nothing() {
        let parsed = parse_response("<write_file path=\"x.rs\">\nfn main() {}");
        assert!(parsed.invocations.is_empty(), "no end marker, no invocation");
    }

    #[test]
    fn truncated_start_tag_extracts_nothing() {
        let parsed = parse_response("cut off mid-tag: <read_file path=\"x.rs\"");
        assert!(parsed.invocations.is_empty());
        assert_eq!(parsed.narration, "cut off mid-tag: <read_file path=\"x.rs\"");
    }

    #[test]
    fn valid_call_after_unterminated_one_is_still_found() {
        let text = "<write_file path=\"x\">\nabandoned\n<read_file path=\"ok.rs\"/>";
        let parsed = parse_response(text);

        assert_eq!(parsed.invocations.len(), 1);
        assert_eq!(parsed.invocations[0].tool, "read_file");
    }

    #[test]
    fn unknown_attributes_are_preserved_as_strings() {
        let parsed = parse_response("<search_files pattern=\"TODO\" max_results=\"5\"/>");
        let inv = &parsed.invocations[0];
        assert_eq!(inv.param("pattern"), Some("TODO"));
        assert_eq!(inv.param("max_results"), Some("5"));
    }

    #[test]
    fn body_keeps_interior_whitespace() {
        let text = "<write_file path=\"a.txt\">\nline one\n\nline three\n</write_file>";
        let parsed = parse_response(text);
        assert_eq!(parsed.invocations[0].body, "line one\n\nline three");
    }

    #[test]
    fn body_tool_takes_command_from_body() {
        let parsed = parse_response("<shell_exec>\ncargo check\n</shell_exec>");
        let inv = &parsed.invocations[0];
        assert_eq!(inv.tool, "shell_exec");
        assert!(inv.params.is_empty());
        assert_eq!(inv.body, "cargo check");
    }

    #[test]
    fn comparison_prose_is_not_a_tag() {
        let parsed = parse_response("note that a < b and b > c here");
        assert!(parsed.invocations.is_empty());
    }

    #[test]
    fn narration_stops_at_first_invocation() {
        let text = "intro\n<read_file path=\"a\"/>\nbetween\n<read_file path=\"b\"/>\ntail";
        let parsed = parse_response(text);
        assert_eq!(parsed.narration, "intro");
        assert_eq!(parsed.invocations.len(), 2);
    }
}
