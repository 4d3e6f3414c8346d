//! Long-lived per-conversation sessions: replayable event log, pending-tool
//! table, auto-confirm counter, client subscriber set, idle cleanup.
//!
//! Sessions of the same conversation share one `generating` flag so two
//! sessions can never generate concurrently on one conversation; they can
//! both stream events.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use stream_event::{EnvelopeState, SessionEvent};
use weft::{
    CostAwareness, EventSink, HookBus, HookContext, HookType, Interrupt, SessionCosts,
    ToolExecution,
};

/// Idle sessions older than this are swept (when not generating, no clients).
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub struct Session {
    pub id: String,
    pub conversation_id: String,
    pub active: AtomicBool,
    /// Shared across all sessions of a conversation: the step mutex.
    pub generating: Arc<AtomicBool>,
    pub interrupt: Interrupt,
    pub pending_tools: Arc<DashMap<String, ToolExecution>>,
    pub auto_confirm_count: Arc<AtomicI64>,
    pub costs: Arc<SessionCosts>,
    pub hooks: Arc<HookBus>,
    /// Envelope-injected frames retained for replay until idle-expiry.
    events: Mutex<Vec<Value>>,
    envelope: Mutex<EnvelopeState>,
    notify: Notify,
    clients: Mutex<HashSet<String>>,
    last_activity: Mutex<Instant>,
}

impl Session {
    fn new(conversation_id: &str, generating: Arc<AtomicBool>) -> Arc<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let costs = Arc::new(SessionCosts::new(id.clone()));
        let hooks = Arc::new(HookBus::new());
        CostAwareness::new(costs.clone()).register(&hooks);
        Arc::new(Self {
            envelope: Mutex::new(EnvelopeState::new(id.clone())),
            id,
            conversation_id: conversation_id.to_string(),
            active: AtomicBool::new(true),
            generating,
            interrupt: Interrupt::new(),
            pending_tools: Arc::new(DashMap::new()),
            auto_confirm_count: Arc::new(AtomicI64::new(0)),
            costs,
            hooks,
            events: Mutex::new(Vec::new()),
            notify: Notify::new(),
            clients: Mutex::new(HashSet::new()),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    /// Appends one event to the replay log and wakes subscribers.
    pub fn push_event(&self, event: SessionEvent) {
        let value = {
            let mut envelope = self.envelope.lock().unwrap();
            match stream_event::to_json(&event, &mut envelope) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("event serialization failed: {}", e);
                    return;
                }
            }
        };
        self.events.lock().unwrap().push(value);
        self.touch();
        self.notify.notify_waiters();
    }

    /// Event frames with `event_id > after`, for replay and live tailing.
    pub fn events_since(&self, after: u64) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.get("event_id").and_then(Value::as_u64).unwrap_or(0) > after)
            .cloned()
            .collect()
    }

    /// Signal flipped whenever a new event lands. Callers should register
    /// interest (enable the notified future) before scanning, so an event
    /// arriving mid-scan still wakes them.
    pub fn event_signal(&self) -> &Notify {
        &self.notify
    }

    pub fn sink(self: &Arc<Self>) -> EventSink {
        let session = self.clone();
        EventSink::new(move |event| session.push_event(event))
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn add_client(&self, client_id: &str) {
        self.clients.lock().unwrap().insert(client_id.to_string());
        self.touch();
    }

    pub fn remove_client(&self, client_id: &str) {
        self.clients.lock().unwrap().remove(client_id);
        self.touch();
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    fn is_expired(&self, max_idle: Duration) -> bool {
        self.idle_for() > max_idle
            && !self.generating.load(Ordering::SeqCst)
            && self.client_count() == 0
    }
}

/// Process-wide session registry.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    /// One generating flag per conversation, shared by its sessions.
    conversation_flags: DashMap<String, Arc<AtomicBool>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, conversation_id: &str) -> Arc<Session> {
        let generating = self
            .conversation_flags
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone();
        let session = Session::new(conversation_id, generating);
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    pub fn for_conversation(&self, conversation_id: &str) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|e| e.value().conversation_id == conversation_id)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Broadcasts an event to every session of a conversation.
    pub fn broadcast(&self, conversation_id: &str, event: &SessionEvent) {
        for session in self.for_conversation(conversation_id) {
            session.push_event(event.clone());
        }
    }

    /// Drops a conversation's sessions (conversation deleted), firing
    /// SESSION_END on the last one.
    pub async fn remove_for_conversation(&self, conversation_id: &str, logdir: &std::path::Path) {
        let sessions = self.for_conversation(conversation_id);
        let count = sessions.len();
        for (i, session) in sessions.into_iter().enumerate() {
            session.active.store(false, Ordering::SeqCst);
            if i + 1 == count {
                self.fire_session_end(&session, logdir).await;
            }
            self.sessions.remove(&session.id);
        }
        self.conversation_flags.remove(conversation_id);
    }

    /// Sweeps idle sessions; fires SESSION_END when a conversation loses its
    /// last session.
    pub async fn sweep(&self, max_idle: Duration, logs_home: &std::path::Path) {
        let expired: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_expired(max_idle))
            .map(|e| e.value().clone())
            .collect();
        for session in expired {
            self.sessions.remove(&session.id);
            let remaining = self.for_conversation(&session.conversation_id).len();
            if remaining == 0 {
                let logdir = logs_home.join(&session.conversation_id);
                self.fire_session_end(&session, &logdir).await;
                self.conversation_flags.remove(&session.conversation_id);
            }
            tracing::debug!(
                "swept idle session {} (conversation {})",
                session.id,
                session.conversation_id
            );
        }
    }

    async fn fire_session_end(&self, session: &Arc<Session>, logdir: &std::path::Path) {
        let ctx = HookContext::new(
            HookType::SessionEnd,
            session.conversation_id.clone(),
            logdir.to_path_buf(),
        );
        match session.hooks.trigger(ctx).await {
            Ok(messages) => {
                // Farewell messages still land in the log when it exists.
                if !messages.is_empty() {
                    if let Ok(mut log) =
                        weft::ConversationLog::open(logdir, weft::LogOptions::default())
                    {
                        for m in messages {
                            let _ = log.append(m);
                        }
                    }
                }
            }
            Err(e) => tracing::debug!("session-end hook error: {}", e),
        }
    }

    /// Spawns the periodic idle sweeper.
    pub fn spawn_sweeper(registry: Arc<Self>, logs_home: std::path::PathBuf) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                registry.sweep(SESSION_IDLE_TIMEOUT, &logs_home).await;
            }
        });
    }
}
