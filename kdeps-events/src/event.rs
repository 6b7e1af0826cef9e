//! Execution-level event types: one variant per executor milestone (§4.2, §4.7).
//! State-carrying variants use `serde_json::Value`; `kdeps-core` serializes records into that.

use serde::Serialize;
use serde_json::Value;

/// One event in the lifetime of a request: wire shape (type + payload); envelope
/// (requestID, actionID, event_id) is applied separately via [`crate::EnvelopeState`].
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The resolver produced a plan for the target action.
    PlanResolved { plan: Vec<String> },
    /// An action is about to be dispatched to its handler.
    ActionStart { id: String },
    /// An action's handler committed a result record.
    ActionCommitted { id: String, result: Value },
    /// An action was marked SKIPPED (skip condition, request gate, or upstream skip).
    ActionSkipped { id: String, reason: String },
    /// An action failed preflight validation.
    PreflightFailed { id: String, predicate: String },
    /// An action's handler returned an execution error.
    ActionFailed { id: String, error: String },
    /// The request finished: final APIResponse record committed (or a synthesized default).
    RequestComplete { success: bool },
}

impl ExecutionEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
