use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle status of a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Failed,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolStatus::Rejected | ToolStatus::Completed | ToolStatus::Failed
        )
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolStatus::Pending => "pending",
            ToolStatus::Approved => "approved",
            ToolStatus::Rejected => "rejected",
            ToolStatus::Completed => "completed",
            ToolStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a tool call was embedded in the text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    /// Inside a triple-backtick fence; the fence markers belong to the range
    Fenced,
    /// A JSON object directly in the text
    Bare,
}

/// A tool call found by one run of the extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallCandidate {
    pub id: String,
    pub tool: String,
    pub args: Map<String, Value>,
    /// Exactly `content[start_offset..end_offset]`
    pub raw_source: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Offset of the object's opening brace; the identity key across re-parses
    pub object_offset: usize,
    pub kind: CallKind,
    pub status: ToolStatus,
}

impl ToolCallCandidate {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start_offset..self.end_offset
    }
}

/// A bare tool call whose closing brace has not been streamed yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteToolCall {
    pub object_offset: usize,
    pub tool: Option<String>,
    /// String fields recovered from the partial JSON, for progressive display
    pub preview_args: Map<String, Value>,
}

/// Long-lived registry view of a tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub raw_source: String,
    #[serde(default)]
    pub start_offset: Option<usize>,
    #[serde(default)]
    pub end_offset: Option<usize>,
    #[serde(default)]
    pub object_offset: Option<usize>,
    pub status: ToolStatus,
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolCall {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `pending(complete)` in lifecycle terms
    pub fn awaiting_approval(&self) -> bool {
        self.status == ToolStatus::Pending && !self.is_partial
    }
}

/// One unit of the reconciled display sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentSegment {
    #[serde(rename_all = "camelCase")]
    Text { content: String, order: usize },
    #[serde(rename_all = "camelCase")]
    Tool { tool_call_id: String, order: usize },
}

impl ContentSegment {
    pub fn order(&self) -> usize {
        match self {
            ContentSegment::Text { order, .. } | ContentSegment::Tool { order, .. } => *order,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentSegment::Text { content, .. } => Some(content),
            ContentSegment::Tool { .. } => None,
        }
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            ContentSegment::Tool { tool_call_id, .. } => Some(tool_call_id),
            ContentSegment::Text { .. } => None,
        }
    }
}
