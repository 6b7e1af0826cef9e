//! Structured execution-event protocol for kdeps: type + payload + envelope.
//!
//! This crate defines the wire shape of one execution event emitted by the executor
//! while it runs a plan. It does not depend on `kdeps-core`; `kdeps-core` bridges its
//! own internal progress into [`ExecutionEvent`] and calls [`to_json`].

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::ExecutionEvent;
