//! Event sink: a type-erased callback the step engine emits session events
//! through. The server pushes into a session's replayable event log; the CLI
//! prints tokens; tests collect into a vector.

use std::sync::Arc;
use stream_event::SessionEvent;

#[derive(Clone)]
pub struct EventSink {
    emit_fn: Arc<dyn Fn(SessionEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new(emit_fn: impl Fn(SessionEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit_fn: Arc::new(emit_fn),
        }
    }

    /// A sink that drops everything.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, event: SessionEvent) {
        (self.emit_fn)(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Collects emitted events for assertions.
    pub fn collector() -> (EventSink, Arc<Mutex<Vec<SessionEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events2 = events.clone();
        let sink = EventSink::new(move |ev| {
            events2.lock().unwrap().push(ev);
        });
        (sink, events)
    }
}
