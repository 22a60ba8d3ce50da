//! Streaming/stable reconciliation for a single assistant message.
//!
//! The controller owns the accumulated content, the message's tool call
//! registry and the latest segment view. It never reads a clock itself;
//! every entry point takes `now` so callers (and tests) drive time.

use crate::error::LifecycleError;
use crate::extractor::{ExtractorOptions, ToolCallExtractor};
use crate::registry::ToolCallRegistry;
use crate::segments::{build_segments, SegmentedContent};
use crate::types::{ContentSegment, IncompleteToolCall, ToolCall};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use streamseg_config::Config;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    Streaming,
    Stable,
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMode::Streaming => f.write_str("streaming"),
            StreamMode::Stable => f.write_str("stable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionReason {
    Growth,
    SettleTimer,
    ToolCallsResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeTransition {
    pub from: StreamMode,
    pub to: StreamMode,
    pub reason: TransitionReason,
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Quiet period after the last growth before the message is stable
    pub settle_window: Duration,
    /// Growth needed to leave `Stable` once it has been reached
    pub reopen_min_bytes: usize,
    /// Coalesce re-parses closer together than this
    pub min_reparse_interval: Option<Duration>,
    pub auto_approve: bool,
    pub extractor: ExtractorOptions,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            settle_window: Duration::from_millis(1000),
            reopen_min_bytes: 64,
            min_reparse_interval: None,
            auto_approve: false,
            extractor: ExtractorOptions::default(),
        }
    }
}

impl From<&Config> for ReconcileSettings {
    fn from(config: &Config) -> Self {
        Self {
            settle_window: config.streaming.settle_window(),
            reopen_min_bytes: config.streaming.reopen_min_bytes,
            min_reparse_interval: config.streaming.min_reparse_interval(),
            auto_approve: config.approval.auto_approve,
            extractor: ExtractorOptions::from(&config.extraction),
        }
    }
}

/// Everything a display layer needs to render one message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub mode: StreamMode,
    pub segments: Vec<ContentSegment>,
    pub tool_calls: Vec<ToolCall>,
    pub clean_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<IncompleteToolCall>,
}

#[derive(Debug)]
pub struct MessageController {
    settings: ReconcileSettings,
    extractor: ToolCallExtractor,
    registry: ToolCallRegistry,
    content: String,
    mode: StreamMode,
    segmented: SegmentedContent,
    incomplete: Option<IncompleteToolCall>,
    settle_deadline: Option<Instant>,
    last_transition: Option<Instant>,
    /// Growth seen while stable that did not reopen streaming
    absorbed_bytes: usize,
    last_parse: Option<Instant>,
    /// A throttled re-parse is owed
    dirty: bool,
}

impl MessageController {
    pub fn new(settings: ReconcileSettings) -> Self {
        Self::with_persisted(settings, Vec::new())
    }

    pub fn with_persisted(settings: ReconcileSettings, persisted: Vec<ToolCall>) -> Self {
        let registry = ToolCallRegistry::with_persisted(persisted, settings.auto_approve);
        Self {
            extractor: ToolCallExtractor::new(settings.extractor),
            settings,
            registry,
            content: String::new(),
            mode: StreamMode::Streaming,
            segmented: SegmentedContent::default(),
            incomplete: None,
            settle_deadline: None,
            last_transition: None,
            absorbed_bytes: 0,
            last_parse: None,
            dirty: false,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn registry(&self) -> &ToolCallRegistry {
        &self.registry
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.registry.get(id)
    }

    pub fn settle_deadline(&self) -> Option<Instant> {
        self.settle_deadline
    }

    pub fn set_auto_approve(&mut self, auto_approve: bool) {
        self.settings.auto_approve = auto_approve;
        self.registry.set_auto_approve(auto_approve);
    }

    /// Append a streamed delta
    pub fn append(&mut self, delta: &str, now: Instant) -> Option<ModeTransition> {
        if delta.is_empty() {
            return None;
        }
        self.content.push_str(delta);
        self.on_growth(delta.len(), now)
    }

    /// Replace the content with a full snapshot
    pub fn update(&mut self, content: &str, now: Instant) -> Option<ModeTransition> {
        if content == self.content {
            trace!("Snapshot unchanged, skipping re-parse");
            return None;
        }

        let previous = self.content.len();
        self.content.clear();
        self.content.push_str(content);

        if content.len() > previous {
            return self.on_growth(content.len() - previous, now);
        }

        if content.len() < previous {
            warn!(
                "Message content shrank from {} to {} bytes; re-parsing without mode change",
                previous,
                content.len()
            );
        }
        self.reparse_or_defer(self.stream_settled(), now);
        self.check_resolved(now)
    }

    /// Fire the settle timer and any deferred re-parse that is due
    pub fn poll(&mut self, now: Instant) -> Option<ModeTransition> {
        if self.dirty && self.throttle_elapsed(now) {
            self.reparse(self.stream_settled(), now);
            if let Some(transition) = self.check_resolved(now) {
                return Some(transition);
            }
        }

        match self.settle_deadline {
            Some(deadline) if now >= deadline => {
                if self.dirty {
                    self.reparse(false, now);
                }
                self.settle_deadline = None;
                let approved = self.registry.settle();
                if !approved.is_empty() {
                    debug!("Auto-approved {} tool calls on settle", approved.len());
                }
                match self.mode {
                    StreamMode::Streaming => {
                        Some(self.commit(StreamMode::Stable, TransitionReason::SettleTimer, now))
                    }
                    // Growth absorbed while stable settles without a visible transition
                    StreamMode::Stable => None,
                }
            }
            _ => None,
        }
    }

    /// Run an owed re-parse now, ignoring the throttle
    pub fn flush(&mut self, now: Instant) -> Option<ModeTransition> {
        if !self.dirty {
            return None;
        }
        self.reparse(self.stream_settled(), now);
        self.check_resolved(now)
    }

    pub fn approve(&mut self, id: &str, now: Instant) -> Result<Option<ModeTransition>, LifecycleError> {
        self.registry.approve(id)?;
        Ok(self.check_resolved(now))
    }

    pub fn reject(&mut self, id: &str, now: Instant) -> Result<Option<ModeTransition>, LifecycleError> {
        self.registry.reject(id)?;
        Ok(self.check_resolved(now))
    }

    pub fn record_result(
        &mut self,
        id: &str,
        result: Value,
        success: bool,
        now: Instant,
    ) -> Result<Option<ModeTransition>, LifecycleError> {
        self.registry.record_result(id, result, success)?;
        Ok(self.check_resolved(now))
    }

    pub fn view(&self) -> MessageView {
        MessageView {
            mode: self.mode,
            segments: self.segmented.segments.clone(),
            tool_calls: self.registry.tool_calls().to_vec(),
            clean_content: self.segmented.clean_content.clone(),
            in_progress: self.incomplete.clone(),
        }
    }

    fn on_growth(&mut self, grown_by: usize, now: Instant) -> Option<ModeTransition> {
        let reopening = match self.mode {
            StreamMode::Streaming => false,
            StreamMode::Stable => {
                self.absorbed_bytes += grown_by;
                self.can_reopen(now)
            }
        };

        // Any growth means the stream is live again, even when the visible mode stays stable
        self.settle_deadline = Some(now + self.settings.settle_window);
        let parsed = self.reparse_or_defer(false, now);

        if reopening {
            if parsed && self.is_resolved() {
                debug!("Growth left every tool call resolved, staying stable");
                self.settle_deadline = None;
                self.absorbed_bytes = 0;
                return None;
            }
            return Some(self.commit(StreamMode::Streaming, TransitionReason::Growth, now));
        }

        if self.mode == StreamMode::Stable {
            trace!(
                "Absorbed {} bytes while stable ({} pending reopen)",
                grown_by,
                self.absorbed_bytes
            );
            return None;
        }
        self.check_resolved(now)
    }

    /// Stable and no growth is waiting to settle
    fn stream_settled(&self) -> bool {
        self.mode == StreamMode::Stable && self.settle_deadline.is_none()
    }

    fn can_reopen(&self, now: Instant) -> bool {
        self.absorbed_bytes >= self.settings.reopen_min_bytes
            && self.last_transition.map_or(true, |at| {
                now.saturating_duration_since(at) >= self.settings.settle_window
            })
    }

    fn throttle_elapsed(&self, now: Instant) -> bool {
        match (self.settings.min_reparse_interval, self.last_parse) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            _ => true,
        }
    }

    /// Returns false when the re-parse was deferred by the throttle
    fn reparse_or_defer(&mut self, settled: bool, now: Instant) -> bool {
        if !self.throttle_elapsed(now) {
            trace!("Deferring re-parse, throttle interval not elapsed");
            self.dirty = true;
            return false;
        }
        self.reparse(settled, now);
        true
    }

    fn reparse(&mut self, settled: bool, now: Instant) {
        let extraction = self.extractor.extract(&self.content);
        let mut candidates = extraction.candidates;
        let summary = self
            .registry
            .merge(&mut candidates, settled, extraction.incomplete.as_ref());
        if summary.inserted > 0 {
            debug!(
                "Re-parse found {} new tool calls ({} total)",
                summary.inserted,
                self.registry.len()
            );
        }

        self.segmented = build_segments(&self.content, &candidates);
        self.incomplete = extraction.incomplete;
        self.last_parse = Some(now);
        self.dirty = false;
    }

    fn is_resolved(&self) -> bool {
        !self.dirty && self.incomplete.is_none() && self.registry.all_terminal()
    }

    fn check_resolved(&mut self, now: Instant) -> Option<ModeTransition> {
        if self.mode != StreamMode::Streaming || !self.is_resolved() {
            return None;
        }
        self.settle_deadline = None;
        Some(self.commit(StreamMode::Stable, TransitionReason::ToolCallsResolved, now))
    }

    fn commit(&mut self, to: StreamMode, reason: TransitionReason, now: Instant) -> ModeTransition {
        let transition = ModeTransition {
            from: self.mode,
            to,
            reason,
        };
        self.mode = to;
        self.last_transition = Some(now);
        self.absorbed_bytes = 0;
        info!("Message {} -> {} ({:?})", transition.from, to, reason);
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolStatus;
    use serde_json::json;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn controller() -> MessageController {
        MessageController::new(ReconcileSettings::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_growth_then_settle_timer() {
        let t0 = Instant::now();
        let mut ctl = controller();

        assert_eq!(ctl.append("Hello", t0), None);
        assert_eq!(ctl.mode(), StreamMode::Streaming);
        assert_eq!(ctl.settle_deadline(), Some(t0 + WINDOW));

        // Growth pushes the deadline out
        ctl.append(" world", t0 + ms(600));
        assert_eq!(ctl.poll(t0 + ms(1100)), None);

        let transition = ctl.poll(t0 + ms(1600)).unwrap();
        assert_eq!(transition.to, StreamMode::Stable);
        assert_eq!(transition.reason, TransitionReason::SettleTimer);
        assert_eq!(ctl.poll(t0 + ms(5000)), None);
    }

    #[test]
    fn test_calls_partial_until_settled() {
        let t0 = Instant::now();
        let mut ctl = controller();
        ctl.append(r#"{"tool":"shell","args":{"command":"ls"}}"#, t0);

        let view = ctl.view();
        assert_eq!(view.tool_calls.len(), 1);
        assert!(view.tool_calls[0].is_partial);
        let id = view.tool_calls[0].id.clone();
        assert!(ctl.approve(&id, t0).is_err());

        ctl.poll(t0 + WINDOW);
        assert!(!ctl.view().tool_calls[0].is_partial);
        ctl.approve(&id, t0 + WINDOW).unwrap();
        assert_eq!(ctl.tool_call(&id).unwrap().status, ToolStatus::Approved);
    }

    #[test]
    fn test_small_growth_after_stable_is_absorbed() {
        let t0 = Instant::now();
        let mut ctl = controller();
        ctl.append("Some text", t0);
        ctl.poll(t0 + WINDOW);
        assert_eq!(ctl.mode(), StreamMode::Stable);

        assert_eq!(ctl.append("!", t0 + ms(3000)), None);
        assert_eq!(ctl.mode(), StreamMode::Stable);
        assert_eq!(ctl.view().clean_content, "Some text!");
    }

    #[test]
    fn test_call_in_absorbed_growth_waits_for_settle() {
        let settings = ReconcileSettings {
            auto_approve: true,
            ..ReconcileSettings::default()
        };
        let t0 = Instant::now();
        let mut ctl = MessageController::new(settings);
        ctl.append("Thinking.", t0);
        ctl.poll(t0 + WINDOW);

        let grown_at = t0 + ms(1100);
        assert_eq!(
            ctl.append(r#" {"tool":"shell","args":{"command":"rm x"}}"#, grown_at),
            None
        );
        assert_eq!(ctl.mode(), StreamMode::Stable);
        assert_eq!(ctl.settle_deadline(), Some(grown_at + WINDOW));
        let call = &ctl.view().tool_calls[0];
        assert_eq!(call.status, ToolStatus::Pending);
        assert!(call.is_partial);

        // Settling absorbed growth is not a visible transition
        assert_eq!(ctl.poll(grown_at + WINDOW), None);
        assert_eq!(ctl.mode(), StreamMode::Stable);
        assert_eq!(ctl.settle_deadline(), None);
        let call = &ctl.view().tool_calls[0];
        assert_eq!(call.status, ToolStatus::Approved);
        assert!(!call.is_partial);
    }

    #[test]
    fn test_reopen_skipped_when_calls_resolved() {
        let persisted = vec![ToolCall {
            id: "done".to_string(),
            tool: "shell".to_string(),
            args: serde_json::Map::new(),
            raw_source: String::new(),
            start_offset: None,
            end_offset: None,
            object_offset: None,
            status: ToolStatus::Completed,
            is_partial: false,
            result: Some(json!("ok")),
        }];
        let t0 = Instant::now();
        let mut ctl = MessageController::with_persisted(ReconcileSettings::default(), persisted);
        let transition = ctl.update(r#"Ran it. {"tool":"shell","args":{}}"#, t0).unwrap();
        assert_eq!(transition.reason, TransitionReason::ToolCallsResolved);

        let summary = format!(" {}", "The listing came back empty, nothing else to do here. ".repeat(2));
        assert!(summary.len() >= 64);
        assert_eq!(ctl.append(&summary, t0 + ms(1500)), None);

        assert_eq!(ctl.mode(), StreamMode::Stable);
        assert_eq!(ctl.settle_deadline(), None);
        assert_eq!(ctl.tool_call("done").unwrap().status, ToolStatus::Completed);
    }

    #[test]
    fn test_reopen_requires_bytes_and_window() {
        let t0 = Instant::now();
        let mut ctl = controller();
        ctl.append("start", t0);
        ctl.poll(t0 + WINDOW);

        let big = "x".repeat(80);
        // Enough bytes but too soon after the last transition
        assert_eq!(ctl.append(&big, t0 + WINDOW + ms(100)), None);
        assert_eq!(ctl.mode(), StreamMode::Stable);

        let transition = ctl.append("y", t0 + ms(2500)).unwrap();
        assert_eq!(transition.to, StreamMode::Streaming);
        assert_eq!(transition.reason, TransitionReason::Growth);
        assert_eq!(ctl.settle_deadline(), Some(t0 + ms(2500) + WINDOW));
    }

    #[test]
    fn test_resolved_calls_skip_settle_timer() {
        let persisted = vec![ToolCall {
            id: "done".to_string(),
            tool: "shell".to_string(),
            args: serde_json::Map::new(),
            raw_source: String::new(),
            start_offset: None,
            end_offset: None,
            object_offset: None,
            status: ToolStatus::Completed,
            is_partial: false,
            result: Some(json!("ok")),
        }];
        let t0 = Instant::now();
        let mut ctl = MessageController::with_persisted(ReconcileSettings::default(), persisted);

        let transition = ctl
            .update(r#"Ran it. {"tool":"shell","args":{}} Done."#, t0)
            .unwrap();
        assert_eq!(transition.reason, TransitionReason::ToolCallsResolved);
        assert_eq!(ctl.mode(), StreamMode::Stable);
        assert_eq!(ctl.view().segments[1].tool_call_id(), Some("done"));
    }

    #[test]
    fn test_record_result_does_not_reopen() {
        let t0 = Instant::now();
        let mut ctl = controller();
        ctl.append(r#"{"tool":"shell","args":{}}"#, t0);
        ctl.poll(t0 + WINDOW);
        let id = ctl.view().tool_calls[0].id.clone();

        assert_eq!(ctl.approve(&id, t0 + WINDOW).unwrap(), None);
        assert_eq!(
            ctl.record_result(&id, json!("ok"), true, t0 + WINDOW).unwrap(),
            None
        );
        assert_eq!(ctl.mode(), StreamMode::Stable);
    }

    #[test]
    fn test_incomplete_call_reported_in_progress() {
        let t0 = Instant::now();
        let mut ctl = controller();
        ctl.append("Writing: {\"tool\":\"write_file\",\"args\":{\"path\":\"a", t0);

        let view = ctl.view();
        assert!(view.tool_calls.is_empty());
        assert_eq!(view.clean_content, "Writing: {\"tool\":\"write_file\",\"args\":{\"path\":\"a");
        let in_progress = view.in_progress.unwrap();
        assert_eq!(in_progress.tool.as_deref(), Some("write_file"));

        ctl.append("\"}}", t0 + ms(10));
        let view = ctl.view();
        assert!(view.in_progress.is_none());
        assert_eq!(view.tool_calls.len(), 1);
        assert_eq!(view.clean_content, "Writing:");
    }

    #[test]
    fn test_throttled_reparse() {
        let settings = ReconcileSettings {
            min_reparse_interval: Some(ms(100)),
            ..ReconcileSettings::default()
        };
        let t0 = Instant::now();
        let mut ctl = MessageController::new(settings);

        ctl.append("a", t0);
        ctl.append(r#" {"tool":"x","args":{}}"#, t0 + ms(10));
        // Second delta was coalesced
        assert!(ctl.view().tool_calls.is_empty());

        assert_eq!(ctl.poll(t0 + ms(50)), None);
        assert!(ctl.view().tool_calls.is_empty());

        ctl.poll(t0 + ms(120));
        assert_eq!(ctl.view().tool_calls.len(), 1);
    }

    #[test]
    fn test_flush_forces_deferred_reparse() {
        let settings = ReconcileSettings {
            min_reparse_interval: Some(ms(100)),
            ..ReconcileSettings::default()
        };
        let t0 = Instant::now();
        let mut ctl = MessageController::new(settings);
        ctl.append("a", t0);
        ctl.append(" b", t0 + ms(1));
        assert_eq!(ctl.view().clean_content, "a");

        ctl.flush(t0 + ms(2));
        assert_eq!(ctl.view().clean_content, "a b");
    }

    #[test]
    fn test_shrinking_snapshot_keeps_mode() {
        let t0 = Instant::now();
        let mut ctl = controller();
        ctl.update("hello world", t0);
        ctl.poll(t0 + WINDOW);

        assert_eq!(ctl.update("hello", t0 + ms(1100)), None);
        assert_eq!(ctl.mode(), StreamMode::Stable);
        assert_eq!(ctl.view().clean_content, "hello");
    }

    #[test]
    fn test_view_serializes_camel_case() {
        let t0 = Instant::now();
        let mut ctl = controller();
        ctl.append("text", t0);
        let value = serde_json::to_value(ctl.view()).unwrap();
        assert_eq!(value["mode"], json!("streaming"));
        assert_eq!(value["cleanContent"], json!("text"));
        assert!(value.get("inProgress").is_none());
    }
}
