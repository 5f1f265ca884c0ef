//! Conversation replay from persisted trace trees.
//!
//! A multi-turn session is stored as a root trace plus ordered child traces,
//! one per refinement. Replaying walks that tree and produces the linear
//! transcript the user saw live, plus the result payload to resume from.
//! Everything here is pure; network state never leaks in.

pub mod output;

use chrono::{DateTime, Duration};
use once_cell::sync::Lazy;
use regex::Regex;

use shared_types::{ConversationMessage, DiscoveryResult, MessageRole, Trace};

use self::output::parse_final_output;

/// Ordered extraction patterns for the user text embedded in a child trace's
/// stored prompt. Child prompts embed the prior conversation ahead of the
/// marker, so only the text after the last matching marker survives.
static REFINEMENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?is).*refinement request:\s*(.+)\z").expect("refinement marker pattern"),
        Regex::new(r"(?is).*new message:\s*(.+)\z").expect("new-message marker pattern"),
    ]
});

/// Extract the user's actual refinement text from a stored input prompt.
///
/// Falls back to the whole prompt when no marker matches.
pub fn extract_refinement_text(prompt: &str) -> String {
    for pattern in REFINEMENT_PATTERNS.iter() {
        if let Some(text) = pattern
            .captures(prompt)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|text| !text.is_empty())
        {
            return text.to_string();
        }
    }
    prompt.trim().to_string()
}

/// Assistant-turn text for a parsed result.
pub fn assistant_summary(result: &DiscoveryResult) -> String {
    match result.products.len() {
        0 => result
            .no_results_message
            .clone()
            .unwrap_or_else(|| "No products found for this search.".to_string()),
        1 => "Found 1 product matching your criteria.".to_string(),
        count => format!("Found {count} products matching your criteria."),
    }
}

/// Output of a replay: the transcript plus the state to resume from.
#[derive(Debug, Clone, Default)]
pub struct ReconstructedSession {
    pub messages: Vec<ConversationMessage>,
    /// Last non-empty result in the conversation. An empty final turn does
    /// not overwrite it, so resuming after "no matches" still shows the last
    /// useful result set alongside the failure message.
    pub current_result: Option<DiscoveryResult>,
    pub current_trace_id: Option<String>,
}

/// Rebuild the transcript for a root trace and its ordered children.
///
/// The original query is supplied by the caller: the root trace's stored
/// prompt includes system scaffolding and is not what the user typed.
/// Message ids and timestamps are synthetic and strictly increasing; only
/// relative order matters, so replaying the same tree twice is
/// byte-identical.
pub fn reconstruct_conversation(root: &Trace, original_query: &str) -> ReconstructedSession {
    let mut messages = Vec::with_capacity(2 + root.child_traces.len() * 2);
    let mut seq = 0i64;
    let mut current: Option<(String, DiscoveryResult)> = None;

    let root_result = parse_final_output(root.final_output.as_deref());
    messages.push(replay_message(
        &mut seq,
        MessageRole::User,
        original_query.to_string(),
        &root.id,
        None,
    ));
    messages.push(replay_message(
        &mut seq,
        MessageRole::Assistant,
        assistant_summary(&root_result),
        &root.id,
        Some(root_result.clone()),
    ));
    if !root_result.is_empty() {
        current = Some((root.id.clone(), root_result));
    }

    for child in &root.child_traces {
        let visible_before = current.as_ref().map(|(_, result)| result.clone());
        messages.push(replay_message(
            &mut seq,
            MessageRole::User,
            extract_refinement_text(&child.input_prompt),
            &child.id,
            visible_before,
        ));

        let child_result = parse_final_output(child.final_output.as_deref());
        messages.push(replay_message(
            &mut seq,
            MessageRole::Assistant,
            assistant_summary(&child_result),
            &child.id,
            Some(child_result.clone()),
        ));
        if !child_result.is_empty() {
            current = Some((child.id.clone(), child_result));
        }
    }

    let (current_trace_id, current_result) = match current {
        Some((id, result)) => (Some(id), Some(result)),
        None => (None, None),
    };
    ReconstructedSession {
        messages,
        current_result,
        current_trace_id,
    }
}

fn replay_message(
    seq: &mut i64,
    role: MessageRole,
    content: String,
    trace_id: &str,
    results_snapshot: Option<DiscoveryResult>,
) -> ConversationMessage {
    let index = *seq;
    *seq += 1;
    ConversationMessage {
        id: format!("replay-{index}"),
        role,
        content,
        timestamp: DateTime::UNIX_EPOCH + Duration::seconds(index),
        trace_id: Some(trace_id.to_string()),
        results_snapshot,
    }
}
