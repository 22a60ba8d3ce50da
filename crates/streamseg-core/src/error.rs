use crate::types::ToolStatus;
use thiserror::Error;

/// Lifecycle action requested by a collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Approve,
    Reject,
    RecordResult,
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleAction::Approve => "approve",
            LifecycleAction::Reject => "reject",
            LifecycleAction::RecordResult => "record result for",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("unknown tool call: {0}")]
    UnknownToolCall(String),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("cannot {action} tool call {id}: status is {from} (partial: {partial})")]
    InvalidTransition {
        id: String,
        from: ToolStatus,
        partial: bool,
        action: LifecycleAction,
    },
}
