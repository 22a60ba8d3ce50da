//! Per-message tool call lifecycle.
//!
//! ```text
//! pending(partial) -> pending(complete) -> approved -> completed | failed
//!                     pending(complete) -> rejected
//! ```
//!
//! Fresh extractor candidates are merged into long-lived entries on every
//! re-parse. Identity is assigned once, at first discovery, and the object
//! offset is only used to find that identity again.

use crate::error::{LifecycleAction, LifecycleError};
use crate::types::{IncompleteToolCall, ToolCall, ToolCallCandidate, ToolStatus};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// What a single merge did, mostly for logging and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub refreshed: usize,
    pub kept_terminal: usize,
    pub pruned: usize,
    pub auto_approved: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCallRegistry {
    entries: Vec<ToolCall>,
    /// Ids matched by the most recent merge
    seen: HashSet<String>,
    auto_approve: bool,
}

impl ToolCallRegistry {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            entries: Vec::new(),
            seen: HashSet::new(),
            auto_approve,
        }
    }

    /// Start from tool calls restored from storage
    pub fn with_persisted(persisted: Vec<ToolCall>, auto_approve: bool) -> Self {
        debug!("Restoring {} persisted tool calls", persisted.len());
        Self {
            entries: persisted,
            seen: HashSet::new(),
            auto_approve,
        }
    }

    pub fn set_auto_approve(&mut self, auto_approve: bool) {
        self.auto_approve = auto_approve;
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&ToolCall> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when there is at least one call and every call is finished
    pub fn all_terminal(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|e| e.is_terminal() && !e.is_partial)
    }

    /// Merge a fresh parse into the registry.
    ///
    /// Each candidate's `id` and `status` are rewritten to the registry's view.
    /// Terminal entries are never touched; non-terminal entries take the
    /// candidate's structural fields and keep their status.
    pub fn merge(
        &mut self,
        candidates: &mut [ToolCallCandidate],
        settled: bool,
        incomplete: Option<&IncompleteToolCall>,
    ) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let mut claimed: HashSet<usize> = HashSet::new();
        self.seen.clear();

        for (index, candidate) in candidates.iter_mut().enumerate() {
            let slot = self
                .position_by_offset(candidate.object_offset, &claimed)
                .or_else(|| self.position_by_index(index, &claimed));

            let entry = match slot {
                Some(slot) => {
                    claimed.insert(slot);
                    let entry = &mut self.entries[slot];
                    if entry.is_terminal() {
                        trace!("Keeping terminal tool call {} ({})", entry.id, entry.status);
                        summary.kept_terminal += 1;
                    } else {
                        entry.tool = candidate.tool.clone();
                        entry.args = candidate.args.clone();
                        entry.raw_source = candidate.raw_source.clone();
                        entry.start_offset = Some(candidate.start_offset);
                        entry.end_offset = Some(candidate.end_offset);
                        entry.object_offset = Some(candidate.object_offset);
                        entry.is_partial = !settled;
                        summary.refreshed += 1;
                    }
                    entry
                }
                None => {
                    let id = format!("call_{}", Uuid::new_v4());
                    debug!(
                        "New tool call {} ({}) at offset {}",
                        id, candidate.tool, candidate.object_offset
                    );
                    self.entries.push(ToolCall {
                        id,
                        tool: candidate.tool.clone(),
                        args: candidate.args.clone(),
                        raw_source: candidate.raw_source.clone(),
                        start_offset: Some(candidate.start_offset),
                        end_offset: Some(candidate.end_offset),
                        object_offset: Some(candidate.object_offset),
                        status: ToolStatus::Pending,
                        is_partial: !settled,
                        result: None,
                    });
                    claimed.insert(self.entries.len() - 1);
                    summary.inserted += 1;
                    // Just pushed, so the vector is non-empty
                    let last = self.entries.len() - 1;
                    &mut self.entries[last]
                }
            };

            candidate.id = entry.id.clone();
            candidate.status = entry.status;
            self.seen.insert(entry.id.clone());
        }

        // A call that never settled and is gone from the text was never actionable,
        // e.g. an object nested in a larger call that has since closed
        let unclosed_offset = incomplete.map(|i| i.object_offset);
        let seen = &self.seen;
        let before = self.entries.len();
        self.entries.retain(|e| {
            seen.contains(&e.id)
                || e.status != ToolStatus::Pending
                || !e.is_partial
                || e.object_offset.is_none()
                || e.object_offset == unclosed_offset
        });
        summary.pruned = before - self.entries.len();
        if summary.pruned > 0 {
            debug!("Dropped {} unsettled tool calls no longer in the text", summary.pruned);
        }

        if let Some(incomplete) = incomplete {
            for entry in self.entries.iter_mut() {
                if !self.seen.contains(&entry.id)
                    && !entry.is_terminal()
                    && entry.object_offset == Some(incomplete.object_offset)
                {
                    entry.is_partial = true;
                }
            }
        }

        if settled {
            summary.auto_approved = self.apply_auto_approve();
        }
        summary
    }

    /// The stream has settled: calls seen in the last parse are complete
    pub fn settle(&mut self) -> Vec<String> {
        for entry in self.entries.iter_mut() {
            if self.seen.contains(&entry.id) && !entry.is_terminal() {
                entry.is_partial = false;
            }
        }
        self.apply_auto_approve()
    }

    pub fn approve(&mut self, id: &str) -> Result<&ToolCall, LifecycleError> {
        let entry = self.awaiting_approval_mut(id, LifecycleAction::Approve)?;
        entry.status = ToolStatus::Approved;
        info!("Approved tool call {} ({})", entry.id, entry.tool);
        Ok(entry)
    }

    pub fn reject(&mut self, id: &str) -> Result<&ToolCall, LifecycleError> {
        let entry = self.awaiting_approval_mut(id, LifecycleAction::Reject)?;
        entry.status = ToolStatus::Rejected;
        info!("Rejected tool call {} ({})", entry.id, entry.tool);
        Ok(entry)
    }

    /// Attach the execution result of an approved call
    pub fn record_result(
        &mut self,
        id: &str,
        result: Value,
        success: bool,
    ) -> Result<&ToolCall, LifecycleError> {
        let entry = self.entry_mut(id)?;
        if entry.status != ToolStatus::Approved {
            return Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                from: entry.status,
                partial: entry.is_partial,
                action: LifecycleAction::RecordResult,
            });
        }

        entry.status = if success {
            ToolStatus::Completed
        } else {
            ToolStatus::Failed
        };
        entry.result = Some(result);
        // A finished call is no longer waiting on the stream
        entry.is_partial = false;
        info!("Tool call {} ({}) {}", entry.id, entry.tool, entry.status);
        Ok(entry)
    }

    fn apply_auto_approve(&mut self) -> Vec<String> {
        if !self.auto_approve {
            return Vec::new();
        }
        let mut approved = Vec::new();
        for entry in self.entries.iter_mut().filter(|e| e.awaiting_approval()) {
            entry.status = ToolStatus::Approved;
            info!("Auto-approved tool call {} ({})", entry.id, entry.tool);
            approved.push(entry.id.clone());
        }
        approved
    }

    fn awaiting_approval_mut(
        &mut self,
        id: &str,
        action: LifecycleAction,
    ) -> Result<&mut ToolCall, LifecycleError> {
        let entry = self.entry_mut(id)?;
        if !entry.awaiting_approval() {
            return Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                from: entry.status,
                partial: entry.is_partial,
                action,
            });
        }
        Ok(entry)
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut ToolCall, LifecycleError> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LifecycleError::UnknownToolCall(id.to_string()))
    }

    fn position_by_offset(&self, object_offset: usize, claimed: &HashSet<usize>) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .position(|(i, e)| !claimed.contains(&i) && e.object_offset == Some(object_offset))
    }

    /// Persisted calls without a known position match the candidate at the same index
    fn position_by_index(&self, index: usize, claimed: &HashSet<usize>) -> Option<usize> {
        match self.entries.get(index) {
            Some(entry) if entry.object_offset.is_none() && !claimed.contains(&index) => {
                Some(index)
            }
            _ => None,
        }
    }
}
