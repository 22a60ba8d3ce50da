//! Tool-call extraction and streaming segment reconciliation.
//!
//! Assistant text arrives as a growing stream. [`MessageController`] re-parses
//! it on every delta, keeps tool call identity and lifecycle status in a
//! per-message [`ToolCallRegistry`], and exposes a [`MessageView`] of ordered
//! text/tool segments for display.

pub mod controller;
pub mod error;
pub mod extractor;
pub mod registry;
pub mod scanner;
pub mod segments;
pub mod session;
pub mod types;

pub use controller::{
    MessageController, MessageView, ModeTransition, ReconcileSettings, StreamMode,
    TransitionReason,
};
pub use error::{LifecycleAction, LifecycleError};
pub use extractor::{extract, Extraction, ExtractionResult, ExtractorOptions, ToolCallExtractor};
pub use registry::{MergeSummary, ToolCallRegistry};
pub use scanner::{find_object_end, ScanOutcome};
pub use segments::{build_segments, SegmentedContent};
pub use session::Conversation;
pub use types::{
    CallKind, ContentSegment, IncompleteToolCall, ToolCall, ToolCallCandidate, ToolStatus,
};
