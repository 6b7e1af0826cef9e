//! Envelope (requestID, actionID, event_id) wrapped around each [`ExecutionEvent`].
//! [`EnvelopeState`] tracks the current action and injects the envelope into each event.

use crate::event::ExecutionEvent;
use serde_json::Value;

/// Envelope fields attached to each emitted event.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Request ID; constant within one request.
    pub request_id: Option<String>,
    /// Action ID currently being dispatched, when applicable.
    pub action_id: Option<String>,
    /// Per-event sequence number; monotonically increasing within a request.
    pub event_id: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_action_id(mut self, id: impl Into<String>) -> Self {
        self.action_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.request_id {
            obj.entry("request_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref id) = self.action_id {
            obj.entry("action_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(id) = self.event_id {
            obj.entry("event_id")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
    }
}

/// Envelope state for one request: request_id, current action id, next event_id.
pub struct EnvelopeState {
    pub request_id: String,
    pub current_action_id: String,
    pub next_event_id: u64,
}

impl EnvelopeState {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            current_action_id: String::new(),
            next_event_id: 1,
        }
    }

    /// Injects envelope into the event value and advances state.
    /// On `type == "action_start"`, updates `current_action_id` from the event's `id`.
    pub fn inject_into(&mut self, value: &mut Value) {
        if let Some(t) = value.get("type").and_then(|v| v.as_str()) {
            if t == "action_start" {
                let id = value.get("id").and_then(|v| v.as_str()).unwrap_or("");
                self.current_action_id = id.to_string();
            }
        }
        let env = Envelope::new()
            .with_request_id(&self.request_id)
            .with_action_id(self.current_action_id.clone())
            .with_event_id(self.next_event_id);
        self.next_event_id += 1;
        env.inject_into(value);
    }
}

/// Converts an execution event to JSON and injects the envelope using the given state.
pub fn to_json(
    event: &ExecutionEvent,
    state: &mut EnvelopeState,
) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_inject_does_not_overwrite_existing_keys() {
        let mut obj = serde_json::json!({"type":"action_start","id":"b","request_id":"keep-me"});
        let env = Envelope::new()
            .with_request_id("r1")
            .with_action_id("b")
            .with_event_id(1);
        env.inject_into(&mut obj);
        assert_eq!(obj["request_id"], "keep-me");
        assert_eq!(obj["action_id"], "b");
        assert_eq!(obj["event_id"], 1);
    }

    #[test]
    fn to_json_injects_envelope_and_tracks_current_action() {
        let ev = ExecutionEvent::ActionStart { id: "b".to_string() };
        let mut state = EnvelopeState::new("req-1".to_string());
        let value = to_json(&ev, &mut state).unwrap();
        assert_eq!(value["type"], "action_start");
        assert_eq!(value["request_id"], "req-1");
        assert_eq!(value["action_id"], "b");
        assert_eq!(value["event_id"], 1);

        let ev2 = ExecutionEvent::ActionCommitted {
            id: "b".to_string(),
            result: serde_json::json!({"exitCode": 0}),
        };
        let value2 = to_json(&ev2, &mut state).unwrap();
        assert_eq!(value2["action_id"], "b");
        assert_eq!(value2["event_id"], 2);
    }
}
