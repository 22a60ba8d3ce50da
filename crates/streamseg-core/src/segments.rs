use crate::types::{ContentSegment, ToolCallCandidate};
use serde::Serialize;

/// Ordered display sequence plus the text with every tool call removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentedContent {
    pub segments: Vec<ContentSegment>,
    pub clean_content: String,
}

/// Partition `content` into alternating text and tool segments.
///
/// `calls` must hold non-overlapping ranges; they are visited in start order.
/// Whitespace inside text gaps is kept as-is since markdown rendering depends
/// on it. Empty gaps (adjacent calls) produce no text segment.
pub fn build_segments(content: &str, calls: &[ToolCallCandidate]) -> SegmentedContent {
    let mut ordered: Vec<&ToolCallCandidate> = calls.iter().collect();
    ordered.sort_by_key(|c| c.start_offset);

    let mut segments = Vec::with_capacity(ordered.len() * 2 + 1);
    let mut cursor = 0;

    for call in &ordered {
        if call.start_offset > cursor {
            push_text(&mut segments, &content[cursor..call.start_offset]);
        }
        segments.push(ContentSegment::Tool {
            tool_call_id: call.id.clone(),
            order: segments.len(),
        });
        cursor = cursor.max(call.end_offset);
    }
    if cursor < content.len() {
        push_text(&mut segments, &content[cursor..]);
    }

    SegmentedContent {
        segments,
        clean_content: strip_ranges(content, &ordered),
    }
}

fn push_text(segments: &mut Vec<ContentSegment>, text: &str) {
    // Consecutive text is merged so order values stay dense
    if let Some(ContentSegment::Text { content, .. }) = segments.last_mut() {
        content.push_str(text);
        return;
    }
    segments.push(ContentSegment::Text {
        content: text.to_string(),
        order: segments.len(),
    });
}

/// Remove every call range, last first so earlier offsets stay valid, then trim.
fn strip_ranges(content: &str, ordered: &[&ToolCallCandidate]) -> String {
    let mut clean = content.to_string();
    for call in ordered.iter().rev() {
        clean.replace_range(call.start_offset..call.end_offset, "");
    }
    clean.trim().to_string()
}
