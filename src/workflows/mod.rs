//! Concrete workflows (C5): the two request flows named in §5, built from
//! [`crate::graph`] nodes wired over shared services.

pub mod chat;
pub mod search;

use std::collections::HashMap;

use crate::graph::state::{ExecutionState, NodePayload};

/// Derive the caller-visible final response from a completed
/// [`ExecutionState`], preferring a successful terminal payload and falling
/// back to whatever the error handler recovered. Shared by both workflows
/// so the gateway doesn't need per-workflow response assembly logic.
pub fn assemble_final_response(state: &mut ExecutionState) {
    if let Some(NodePayload::Synthesized { text, citations, confidence }) = last_payload_of_kind(state, is_synthesized) {
        state.final_response = text;
        state.response_meta = serde_json::json!({ "citations": citations, "confidence": confidence });
        return;
    }
    if let Some(NodePayload::ResponseGenerated { text, .. }) = last_payload_of_kind(state, is_response_generated) {
        state.final_response = text;
        return;
    }
    if let Some(NodePayload::ErrorHandled { recovered_text }) = last_payload_of_kind(state, is_error_handled) {
        state.final_response = recovered_text.unwrap_or_default();
        state.response_meta = serde_json::json!({
            "error_kind": state.errors.last().map(|e| e.kind.clone()),
        });
    }
}

fn is_synthesized(p: &NodePayload) -> bool {
    matches!(p, NodePayload::Synthesized { .. })
}
fn is_response_generated(p: &NodePayload) -> bool {
    matches!(p, NodePayload::ResponseGenerated { .. })
}
fn is_error_handled(p: &NodePayload) -> bool {
    matches!(p, NodePayload::ErrorHandled { .. })
}

fn last_payload_of_kind(state: &ExecutionState, matches_kind: impl Fn(&NodePayload) -> bool) -> Option<NodePayload> {
    state
        .execution_path
        .iter()
        .rev()
        .find_map(|name| state.intermediate.get(name).filter(|p| matches_kind(p)).cloned())
}

/// Build a default `params` map for a generation call at `quality_tier`.
/// Kept as a free function since both workflows' generator nodes need the
/// same mapping and it is config-shaped, not state-shaped.
#[must_use]
pub fn default_generation_params() -> HashMap<String, serde_json::Value> {
    let mut params = HashMap::new();
    params.insert("temperature".to_string(), serde_json::json!(0.7));
    params
}
