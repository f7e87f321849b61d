//! Routing tables for push events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use appdump_protocol::messages::DetachedEvent;
use appdump_protocol::{DetachReason, Message};
use appdump_session::{DetachObserver, InboundMessage, log_detach};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// In-flight requests keyed by request id.
pub(crate) type PendingMap = Arc<tokio::sync::Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// Where pushed `message` and `detached` events go.
#[derive(Default)]
pub(crate) struct Routes {
    scripts: Mutex<HashMap<String, mpsc::UnboundedSender<InboundMessage>>>,
    sessions: Mutex<HashMap<String, Option<DetachObserver>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Routes {
    pub(crate) fn add_script(&self, script: &str) -> mpsc::UnboundedReceiver<InboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.scripts).insert(script.to_string(), tx);
        rx
    }

    pub(crate) fn remove_script(&self, script: &str) {
        lock(&self.scripts).remove(script);
    }

    /// Queues an agent message for its script.
    pub(crate) fn deliver(&self, script: &str, inbound: InboundMessage) {
        let mut scripts = lock(&self.scripts);
        let Some(tx) = scripts.get(script) else {
            warn!(script, "message for unknown script, dropping");
            return;
        };
        if tx.send(inbound).is_err() {
            debug!(script, "script receiver gone, removing route");
            scripts.remove(script);
        }
    }

    pub(crate) fn add_session(&self, session: &str) {
        lock(&self.sessions).insert(session.to_string(), None);
    }

    pub(crate) fn set_observer(&self, session: &str, observer: DetachObserver) {
        match lock(&self.sessions).get_mut(session) {
            Some(slot) => *slot = Some(observer),
            None => warn!(session, "observer for unknown session ignored"),
        }
    }

    /// Delivers a `detached` event and forgets the session.
    pub(crate) fn detached(&self, event: DetachedEvent) {
        let route = lock(&self.sessions).remove(&event.session);
        match route {
            Some(Some(observer)) => observer(event.reason, event.crash),
            Some(None) => log_detach(&event.session, 0, &event.reason, event.crash.as_ref()),
            None => debug!(session = %event.session, reason = %event.reason, "detach for unknown session"),
        }
    }

    /// Connection lost: every session is reported detached and every
    /// script queue is closed.
    pub(crate) fn close_all(&self) {
        let sessions: Vec<_> = lock(&self.sessions).drain().collect();
        for (session, observer) in sessions {
            match observer {
                Some(observer) => observer(DetachReason::ConnectionTerminated, None),
                None => log_detach(&session, 0, &DetachReason::ConnectionTerminated, None),
            }
        }
        lock(&self.scripts).clear();
    }

    #[cfg(test)]
    pub(crate) fn script_count(&self) -> usize {
        lock(&self.scripts).len()
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }
}
