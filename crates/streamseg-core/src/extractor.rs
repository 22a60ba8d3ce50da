//! Detection of tool-call JSON embedded in assistant text.
//!
//! Two strategies run over the full content on every call:
//! 1. fenced blocks (```` ```json ... ``` ````) whose body holds a `"tool"` key,
//! 2. bare objects starting with `{"tool":`, delimited by the brace scanner.
//!
//! Fenced matches are accepted first. A bare candidate that intersects an
//! accepted range is dropped, so accepted ranges never overlap.

use crate::scanner::{find_object_end, strip_trailing_commas, ScanOutcome};
use crate::segments::build_segments;
use crate::types::{CallKind, ContentSegment, IncompleteToolCall, ToolCallCandidate, ToolStatus};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::ops::Range;
use std::sync::LazyLock;
use streamseg_config::ExtractionConfig;
use tracing::{debug, trace};

static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n?(.*?)```").unwrap());

static BARE_TOOL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\{\s*"tool"\s*:"#).unwrap());

static PARTIAL_TOOL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""tool"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

// The value group may be unterminated while the string is still streaming
static PARTIAL_STRING_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([A-Za-z_][A-Za-z0-9_]*)"\s*:\s*"((?:[^"\\]|\\.)*)"#).unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorOptions {
    pub fenced_blocks: bool,
    pub bare_json: bool,
    pub repair_json: bool,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            fenced_blocks: true,
            bare_json: true,
            repair_json: true,
        }
    }
}

impl From<&ExtractionConfig> for ExtractorOptions {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            fenced_blocks: config.fenced_blocks,
            bare_json: config.bare_json,
            repair_json: config.repair_json,
        }
    }
}

/// Everything one extractor run found
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Accepted calls sorted by start offset
    pub candidates: Vec<ToolCallCandidate>,
    /// Trailing bare call still waiting for its closing brace
    pub incomplete: Option<IncompleteToolCall>,
}

/// Result of the stand-alone [`extract`] entry point
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub tool_calls: Vec<ToolCallCandidate>,
    pub clean_content: String,
    pub segments: Vec<ContentSegment>,
}

/// Extract tool calls, segments and clean text from `content` with default options.
pub fn extract(content: &str) -> ExtractionResult {
    let extraction = ToolCallExtractor::default().extract(content);
    let segmented = build_segments(content, &extraction.candidates);
    ExtractionResult {
        tool_calls: extraction.candidates,
        clean_content: segmented.clean_content,
        segments: segmented.segments,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolCallExtractor {
    options: ExtractorOptions,
}

impl ToolCallExtractor {
    pub fn new(options: ExtractorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ExtractorOptions {
        self.options
    }

    /// Scan the whole content. The content itself is never modified.
    pub fn extract(&self, content: &str) -> Extraction {
        let mut candidates = Vec::new();
        let mut incomplete = None;

        if self.options.fenced_blocks {
            self.extract_fenced(content, &mut candidates);
        }
        if self.options.bare_json {
            incomplete = self.extract_bare(content, &mut candidates);
        }

        candidates.sort_by_key(|c| c.start_offset);
        trace!(
            "Extracted {} tool calls from {} bytes (incomplete: {})",
            candidates.len(),
            content.len(),
            incomplete.is_some()
        );

        Extraction {
            candidates,
            incomplete,
        }
    }

    fn extract_fenced(&self, content: &str, accepted: &mut Vec<ToolCallCandidate>) {
        for caps in FENCED_BLOCK_RE.captures_iter(content) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if !body.as_str().contains("\"tool\"") {
                continue;
            }

            let Some(parsed) = parse_tool_call(body.as_str().trim(), self.options.repair_json)
            else {
                debug!(
                    "Fenced block at {} mentions \"tool\" but is not a valid tool call",
                    whole.start()
                );
                continue;
            };

            let object_offset = body.start() + body.as_str().find('{').unwrap_or(0);
            accepted.push(candidate(
                content,
                whole.range(),
                object_offset,
                CallKind::Fenced,
                parsed,
            ));
        }
    }

    fn extract_bare(
        &self,
        content: &str,
        accepted: &mut Vec<ToolCallCandidate>,
    ) -> Option<IncompleteToolCall> {
        let mut unclosed = None;

        for found in BARE_TOOL_RE.find_iter(content) {
            let start = found.start();
            if accepted.iter().any(|c| c.range().contains(&start)) {
                continue;
            }

            let end = match find_object_end(content, start) {
                ScanOutcome::Complete { end } => end,
                ScanOutcome::Incomplete => {
                    trace!("Bare tool call at {} is not closed", start);
                    unclosed = Some(start);
                    continue;
                }
            };

            if accepted
                .iter()
                .any(|c| c.start_offset < end && start < c.end_offset)
            {
                debug!("Bare tool call at {}..{} overlaps an accepted range", start, end);
                continue;
            }

            match parse_tool_call(&content[start..end], self.options.repair_json) {
                Some(parsed) => accepted.push(candidate(
                    content,
                    start..end,
                    start,
                    CallKind::Bare,
                    parsed,
                )),
                None => debug!("Discarding malformed bare tool call at {}..{}", start, end),
            }
        }

        // Only a trailing unclosed object is still streaming; an earlier one
        // followed by accepted calls is stray text
        let start = unclosed?;
        if accepted.iter().any(|c| c.start_offset > start) {
            debug!("Ignoring unclosed tool call at {} followed by complete calls", start);
            return None;
        }
        Some(preview_incomplete(content, start))
    }
}

struct ParsedCall {
    tool: String,
    args: Map<String, Value>,
}

fn candidate(
    content: &str,
    range: Range<usize>,
    object_offset: usize,
    kind: CallKind,
    parsed: ParsedCall,
) -> ToolCallCandidate {
    ToolCallCandidate {
        id: format!("call-{}", object_offset),
        tool: parsed.tool,
        args: parsed.args,
        raw_source: content[range.clone()].to_string(),
        start_offset: range.start,
        end_offset: range.end,
        object_offset,
        kind,
        status: ToolStatus::Pending,
    }
}

/// Parse `json` as a tool call, retrying once with trailing commas removed.
///
/// Only the structural shape is checked: a non-empty `tool` string and an
/// `args` object.
fn parse_tool_call(json: &str, repair: bool) -> Option<ParsedCall> {
    let value = match serde_json::from_str::<Value>(json) {
        Ok(value) => value,
        Err(e) if repair => {
            let repaired = strip_trailing_commas(json);
            match serde_json::from_str::<Value>(&repaired) {
                Ok(value) => {
                    debug!("Repaired tool call JSON after parse error: {}", e);
                    value
                }
                Err(_) => return None,
            }
        }
        Err(_) => return None,
    };

    let Value::Object(mut object) = value else {
        return None;
    };

    let tool = object.get("tool")?.as_str()?.trim().to_string();
    if tool.is_empty() {
        return None;
    }

    match object.remove("args") {
        Some(Value::Object(args)) => Some(ParsedCall { tool, args }),
        _ => None,
    }
}

/// Best-effort view of an unfinished tool call for progressive display
fn preview_incomplete(content: &str, start: usize) -> IncompleteToolCall {
    let partial = &content[start..];

    let tool = PARTIAL_TOOL_NAME_RE
        .captures(partial)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape_partial(m.as_str()).trim().to_string())
        .filter(|name| !name.is_empty());

    let mut preview_args = Map::new();
    for caps in PARTIAL_STRING_FIELD_RE.captures_iter(partial) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if key.as_str() == "tool" {
            continue;
        }
        preview_args.insert(
            key.as_str().to_string(),
            Value::String(unescape_partial(value.as_str())),
        );
    }

    IncompleteToolCall {
        object_offset: start,
        tool,
        preview_args,
    }
}

/// Undo the common JSON escapes; unknown escapes are kept verbatim
fn unescape_partial(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
