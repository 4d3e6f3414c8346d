//! Session event protocol: type + payload + envelope.
//!
//! This crate defines the wire shape of a single session event and envelope injection.
//! It does not depend on weft. The server serializes events, injects the envelope
//! (session_id, event_id) and writes each as one SSE data frame; clients that reopen
//! the stream with the same session id replay from a given event_id.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::SessionEvent;
