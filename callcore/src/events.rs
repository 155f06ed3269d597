use crate::session::CallSnapshot;
use crate::types::{EndReason, PeerId, SessionId};
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// Events published to observers of a call controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    /// Emitted on every state transition and every track change.
    StateChanged(CallSnapshot),
    /// A call-invite was accepted into `incoming-ringing`.
    IncomingCall {
        session_id: SessionId,
        caller: PeerId,
        video: bool,
    },
    CallEnded {
        session_id: SessionId,
        reason: EndReason,
        /// Connected time in seconds; absent if media never flowed.
        duration_secs: Option<i64>,
    },
}

impl CallEvent {
    /// Derive the events a snapshot implies: the snapshot itself, plus the
    /// incoming-call and call-ended notices.
    pub fn from_snapshot(snapshot: &CallSnapshot, previous: &CallSnapshot) -> Vec<CallEvent> {
        use crate::types::CallStateKind;

        let mut events = vec![CallEvent::StateChanged(snapshot.clone())];
        let entered = snapshot.state != previous.state || snapshot.session_id != previous.session_id;
        if !entered {
            return events;
        }

        match (snapshot.state, &snapshot.session_id, &snapshot.peer) {
            (CallStateKind::IncomingRinging, Some(session_id), Some(caller)) => {
                events.push(CallEvent::IncomingCall {
                    session_id: session_id.clone(),
                    caller: caller.clone(),
                    video: snapshot.video_requested,
                });
            }
            (CallStateKind::Ended, Some(session_id), _) => {
                if let Some(reason) = snapshot.end_reason {
                    events.push(CallEvent::CallEnded {
                        session_id: session_id.clone(),
                        reason,
                        duration_secs: snapshot.duration_secs(),
                    });
                }
            }
            _ => {}
        }
        events
    }
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &CallEvent);
}

#[derive(Default, Clone)]
pub struct CallEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl CallEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, event: &CallEvent) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
    }
}
