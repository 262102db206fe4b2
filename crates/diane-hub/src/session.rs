//! Session object and registry (spec.md §4.4/§4.5).
//!
//! Grounded on `crucible-acp::session`'s session-object shape (id, bound
//! state, sequencing) generalized from "one session per ACP client" to
//! "many concurrent sessions across three transports sharing one handler."

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a session's bound context was chosen — kept for diagnostics only;
/// `diane_core::model::ContextSource` covers the same enum for the shared
/// vocabulary, this local copy exists so transports can attach it without
/// a `diane-core` import at every call site.
pub use diane_core::model::ContextSource;

/// Depth of the outbound change-notification queue. Spec.md §4.5 requires
/// overflow to coalesce into one pending notification rather than grow
/// unbounded, so depth 1 plus "drop on full" *is* the coalescing policy,
/// not an approximation of it.
const NOTIFY_QUEUE_DEPTH: usize = 1;

pub struct Session {
    pub id: String,
    context: parking_lot::RwLock<String>,
    initialized: AtomicBool,
    seq: AtomicU64,
    notify_tx: mpsc::Sender<()>,
    notify_rx: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
    cancel: CancellationToken,
    /// Last time this session was touched by an inbound request. Only
    /// consulted by the HTTP-streamable transport's idle reaper (spec.md
    /// §4.4); stdio and SSE sessions live for the connection's lifetime
    /// instead.
    last_activity: parking_lot::Mutex<Instant>,
}

impl Session {
    pub fn new(id: String, context: String) -> Arc<Self> {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_QUEUE_DEPTH);
        Arc::new(Self {
            id,
            context: parking_lot::RwLock::new(context),
            initialized: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            notify_tx,
            notify_rx: parking_lot::Mutex::new(Some(notify_rx)),
            cancel: CancellationToken::new(),
            last_activity: parking_lot::Mutex::new(Instant::now()),
        })
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn context(&self) -> String {
        self.context.read().clone()
    }

    /// Only called on reconnect (spec.md §4.4: "bound once at handshake,
    /// updated only by reconnect"), never mid-session.
    pub fn rebind_context(&self, context: String) {
        *self.context.write() = context;
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Queue a "something changed" wakeup. Best-effort: a full queue means
    /// a notification is already pending, which already covers this one
    /// (spec.md §4.5: "the notification is idempotent and carries no
    /// payload beyond 'something changed'").
    pub fn notify_changed(&self) {
        let _ = self.notify_tx.try_send(());
    }

    /// Take the receiving half so a transport's outbound task can await
    /// wakeups. Only one caller may hold this per session; a second call
    /// (e.g. after a bug double-spawns the outbound task) gets `None`.
    pub fn take_notify_receiver(&self) -> Option<mpsc::Receiver<()>> {
        self.notify_rx.lock().take()
    }
}

/// Registry of live sessions across all three transports, keyed by the
/// transport-opaque session id. Shared by `Dispatch` (to fan out change
/// notifications) and each transport (to create/close sessions).
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    /// Fan out "something changed" to every active session (spec.md §4.5:
    /// "best-effort and unordered relative to other sessions").
    pub fn notify_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().notify_changed();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove and cancel every session idle longer than `max_idle`, returning
    /// their ids (spec.md §4.4: "Idle sessions are reaped after a bounded
    /// inactivity window").
    pub fn reap_idle(&self, max_idle: std::time::Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > max_idle)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &expired {
            if let Some(session) = self.sessions.remove(id) {
                session.1.cancel();
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflowing_notifications_coalesce_to_one_pending() {
        let session = Session::new("s1".to_string(), "personal".to_string());
        session.notify_changed();
        session.notify_changed();
        session.notify_changed();

        let mut rx = session.take_notify_receiver().unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "extra notifications must not queue up");
    }

    #[test]
    fn registry_fans_out_to_every_session() {
        let registry = SessionRegistry::new();
        let a = Session::new("a".to_string(), "personal".to_string());
        let b = Session::new("b".to_string(), "work".to_string());
        let mut rx_a = a.take_notify_receiver().unwrap();
        let mut rx_b = b.take_notify_receiver().unwrap();
        registry.insert(a);
        registry.insert(b);

        registry.notify_all();

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn reap_idle_removes_only_stale_sessions() {
        let registry = SessionRegistry::new();
        let stale = Session::new("stale".to_string(), "personal".to_string());
        let fresh = Session::new("fresh".to_string(), "personal".to_string());
        registry.insert(stale);
        registry.insert(fresh);

        std::thread::sleep(std::time::Duration::from_millis(20));
        registry.get("fresh").unwrap().touch();

        let expired = registry.reap_idle(std::time::Duration::from_millis(10));
        assert_eq!(expired, vec!["stale".to_string()]);
        assert!(registry.get("stale").is_none());
        assert!(registry.get("fresh").is_some());
    }

    #[test]
    fn rebind_context_changes_only_on_explicit_call() {
        let session = Session::new("s1".to_string(), "personal".to_string());
        assert_eq!(session.context(), "personal");
        session.rebind_context("work".to_string());
        assert_eq!(session.context(), "work");
    }
}
