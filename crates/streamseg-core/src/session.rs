use crate::controller::{MessageController, MessageView, ModeTransition, ReconcileSettings};
use crate::error::LifecycleError;
use crate::types::ToolCall;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// All messages of one conversation, each reconciled independently
#[derive(Debug, Default)]
pub struct Conversation {
    settings: ReconcileSettings,
    messages: BTreeMap<String, MessageController>,
}

impl Conversation {
    pub fn new(settings: ReconcileSettings) -> Self {
        Self {
            settings,
            messages: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn message(&self, message_id: &str) -> Option<&MessageController> {
        self.messages.get(message_id)
    }

    /// Stream a delta into a message, creating it on first use
    pub fn append(&mut self, message_id: &str, delta: &str, now: Instant) -> Option<ModeTransition> {
        self.controller_entry(message_id).append(delta, now)
    }

    /// Replace a message's content with a full snapshot, creating it on first use
    pub fn update(&mut self, message_id: &str, content: &str, now: Instant) -> Option<ModeTransition> {
        self.controller_entry(message_id).update(content, now)
    }

    /// Seed a message with tool calls restored from storage.
    ///
    /// Replaces any state already held for the message.
    pub fn load_persisted(&mut self, message_id: &str, persisted: Vec<ToolCall>) {
        debug!(
            "Loading {} persisted tool calls for message {}",
            persisted.len(),
            message_id
        );
        let controller = MessageController::with_persisted(self.settings.clone(), persisted);
        self.messages.insert(message_id.to_string(), controller);
    }

    /// Override the auto-approve flag for a single message
    pub fn set_auto_approve(
        &mut self,
        message_id: &str,
        auto_approve: bool,
    ) -> Result<(), LifecycleError> {
        self.controller_mut(message_id)?.set_auto_approve(auto_approve);
        debug!("Auto-approve for message {} set to {}", message_id, auto_approve);
        Ok(())
    }

    pub fn approve(
        &mut self,
        message_id: &str,
        tool_call_id: &str,
        now: Instant,
    ) -> Result<Option<ModeTransition>, LifecycleError> {
        self.controller_mut(message_id)?.approve(tool_call_id, now)
    }

    pub fn reject(
        &mut self,
        message_id: &str,
        tool_call_id: &str,
        now: Instant,
    ) -> Result<Option<ModeTransition>, LifecycleError> {
        self.controller_mut(message_id)?.reject(tool_call_id, now)
    }

    pub fn record_result(
        &mut self,
        message_id: &str,
        tool_call_id: &str,
        result: Value,
        success: bool,
        now: Instant,
    ) -> Result<Option<ModeTransition>, LifecycleError> {
        self.controller_mut(message_id)?
            .record_result(tool_call_id, result, success, now)
    }

    /// Poll every message's timers, in message id order
    pub fn poll(&mut self, now: Instant) -> Vec<(String, ModeTransition)> {
        self.messages
            .iter_mut()
            .filter_map(|(id, controller)| controller.poll(now).map(|t| (id.clone(), t)))
            .collect()
    }

    pub fn view(&self, message_id: &str) -> Result<MessageView, LifecycleError> {
        self.messages
            .get(message_id)
            .map(MessageController::view)
            .ok_or_else(|| LifecycleError::UnknownMessage(message_id.to_string()))
    }

    /// Drop a message along with its registry and settle timer
    pub fn discard(&mut self, message_id: &str) -> Result<(), LifecycleError> {
        if self.messages.remove(message_id).is_none() {
            return Err(LifecycleError::UnknownMessage(message_id.to_string()));
        }
        debug!("Discarded message {}", message_id);
        Ok(())
    }

    pub fn reset(&mut self) {
        info!("Resetting conversation ({} messages)", self.messages.len());
        self.messages.clear();
    }

    fn controller_entry(&mut self, message_id: &str) -> &mut MessageController {
        let settings = &self.settings;
        self.messages
            .entry(message_id.to_string())
            .or_insert_with(|| MessageController::new(settings.clone()))
    }

    fn controller_mut(&mut self, message_id: &str) -> Result<&mut MessageController, LifecycleError> {
        self.messages
            .get_mut(message_id)
            .ok_or_else(|| LifecycleError::UnknownMessage(message_id.to_string()))
    }
}
