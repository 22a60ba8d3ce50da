use anyhow::Result;
use serde::Serialize;
use std::time::{Duration, Instant};
use streamseg_core::{Conversation, MessageView, ModeTransition, ReconcileSettings};
use tracing::{debug, info};

const MESSAGE_ID: &str = "replay";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedTransition {
    pub at_ms: u128,
    #[serde(flatten)]
    pub transition: ModeTransition,
}

/// Outcome of replaying one message
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub transitions: Vec<TimedTransition>,
    pub approved: Vec<String>,
    pub view: MessageView,
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub chunk_size: usize,
    pub delay: Duration,
    pub approve_all: bool,
}

/// Split `content` into deltas of at most `size` bytes without cutting a character
pub fn chunk_str(content: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < content.len() {
        let mut end = (start + size).min(content.len());
        while !content.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(&content[start..end]);
        start = end;
    }
    chunks
}

/// Stream `content` into a fresh conversation in real time and wait for it to settle
pub async fn replay(
    content: &str,
    settings: ReconcileSettings,
    options: &ReplayOptions,
) -> Result<ReplayReport> {
    if content.is_empty() {
        anyhow::bail!("Nothing to replay: input is empty");
    }

    let mut conversation = Conversation::new(settings);
    let started = Instant::now();
    let mut transitions = Vec::new();
    let mut record = |transition: ModeTransition, at: Instant| {
        transitions.push(TimedTransition {
            at_ms: at.duration_since(started).as_millis(),
            transition,
        });
    };

    let chunks = chunk_str(content, options.chunk_size);
    info!(
        "Replaying {} bytes as {} deltas ({} ms apart)",
        content.len(),
        chunks.len(),
        options.delay.as_millis()
    );

    for chunk in chunks {
        let now = Instant::now();
        if let Some(transition) = conversation.append(MESSAGE_ID, chunk, now) {
            record(transition, now);
        }
        for (_, transition) in conversation.poll(now) {
            record(transition, now);
        }
        if !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
    }

    // Wait out the settle timer, including growth absorbed while already stable
    loop {
        let Some(deadline) = conversation
            .message(MESSAGE_ID)
            .and_then(|message| message.settle_deadline())
        else {
            break;
        };
        debug!("Waiting for settle deadline");
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;

        let now = Instant::now();
        for (_, transition) in conversation.poll(now) {
            record(transition, now);
        }
    }

    let mut approved = Vec::new();
    if options.approve_all {
        let pending: Vec<String> = conversation
            .view(MESSAGE_ID)?
            .tool_calls
            .iter()
            .filter(|call| call.awaiting_approval())
            .map(|call| call.id.clone())
            .collect();

        for id in pending {
            let now = Instant::now();
            if let Some(transition) = conversation.approve(MESSAGE_ID, &id, now)? {
                record(transition, now);
            }
            approved.push(id);
        }
    }

    Ok(ReplayReport {
        transitions,
        approved,
        view: conversation.view(MESSAGE_ID)?,
    })
}
