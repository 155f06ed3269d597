//! Call state machine.
//!
//! The machine is the single authority for the call lifecycle. It performs no
//! I/O: every input returns the list of [`Effect`]s the runtime must carry out
//! (send a message, start a negotiation operation, tear down media, notify
//! observers). Long-running work is started with [`Effect::Begin`] and its
//! outcome comes back as [`CallInput::OperationCompleted`] tagged with the
//! [`OpId`] it was started with; completions for an operation that has since
//! been cancelled are discarded.
//!
//! While an operation is pending the observable state does not move. Intents
//! other than end-call are deferred and replayed in order once it completes.

use log::{debug, info, warn};
use std::collections::VecDeque;

use crate::candidate::IceCandidate;
use crate::error::{DeviceError, NegotiationError};
use crate::sdp::SessionDescription;
use crate::session::{CallSession, CallSnapshot};
use crate::signaling::{SignalingMessage, SignalingType};
use crate::types::{
    CallDirection, CallStateKind, EndReason, MediaConstraints, PeerId, SessionId, TrackKind,
};
use chrono::Utc;

/// Current state of the call, carrying the session it applies to.
#[derive(Debug, Clone, Default)]
pub enum CallState {
    #[default]
    Idle,
    OutgoingRinging(CallSession),
    IncomingRinging(CallSession),
    Connecting(CallSession),
    Connected(CallSession),
    /// Final snapshot of the last session. Behaves like `Idle` for new calls.
    /// The session itself is dropped once it ends.
    Ended(CallSnapshot),
}

impl CallState {
    pub fn kind(&self) -> CallStateKind {
        match self {
            Self::Idle => CallStateKind::Idle,
            Self::OutgoingRinging(_) => CallStateKind::OutgoingRinging,
            Self::IncomingRinging(_) => CallStateKind::IncomingRinging,
            Self::Connecting(_) => CallStateKind::Connecting,
            Self::Connected(_) => CallStateKind::Connected,
            Self::Ended(_) => CallStateKind::Ended,
        }
    }

    pub fn session(&self) -> Option<&CallSession> {
        match self {
            Self::Idle | Self::Ended(_) => None,
            Self::OutgoingRinging(s)
            | Self::IncomingRinging(s)
            | Self::Connecting(s)
            | Self::Connected(s) => Some(s),
        }
    }

    fn session_mut(&mut self) -> Option<&mut CallSession> {
        match self {
            Self::Idle | Self::Ended(_) => None,
            Self::OutgoingRinging(s)
            | Self::IncomingRinging(s)
            | Self::Connecting(s)
            | Self::Connected(s) => Some(s),
        }
    }

    fn into_session(self) -> Option<CallSession> {
        match self {
            Self::Idle | Self::Ended(_) => None,
            Self::OutgoingRinging(s)
            | Self::IncomingRinging(s)
            | Self::Connecting(s)
            | Self::Connected(s) => Some(s),
        }
    }

    /// A session exists and has not ended.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Ended(_))
    }

    pub fn snapshot(&self) -> CallSnapshot {
        match self {
            Self::Ended(snapshot) => snapshot.clone(),
            _ => match self.session() {
                Some(session) => session.snapshot(self.kind()),
                None => CallSnapshot::idle(),
            },
        }
    }
}

/// Requests coming from the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    StartCall {
        peer: PeerId,
        constraints: MediaConstraints,
    },
    Answer,
    Reject,
    End,
    ToggleMic,
    ToggleVideo,
    /// Not supported by a 1:1 call; logged and ignored.
    AddParticipant(PeerId),
}

/// Identifies one started operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub u64);

/// Work the runtime performs on behalf of the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Acquire local media, then create the offer.
    CreateOffer { constraints: MediaConstraints },
    /// Acquire local media, apply the remote offer, then create the answer.
    CreateAnswer {
        constraints: MediaConstraints,
        remote_offer: SessionDescription,
    },
    ApplyRemoteDescription { description: SessionDescription },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateOffer { .. } => "create-offer",
            Self::CreateAnswer { .. } => "create-answer",
            Self::ApplyRemoteDescription { .. } => "apply-remote-description",
        }
    }
}

/// Why an operation failed.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationFailure {
    Device(DeviceError),
    Negotiation(NegotiationError),
}

/// Outcome of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// Offer created with the tracks that capture produced.
    OfferCreated {
        description: SessionDescription,
        local_kinds: Vec<TrackKind>,
    },
    AnswerCreated {
        description: SessionDescription,
        local_kinds: Vec<TrackKind>,
    },
    RemoteDescriptionApplied,
    Failed(OperationFailure),
}

/// Everything the machine reacts to.
#[derive(Debug, Clone)]
pub enum CallInput {
    Intent(Intent),
    Signal(SignalingMessage),
    OperationCompleted {
        session_id: SessionId,
        op: OpId,
        result: OperationResult,
    },
    /// A remote media track became receivable (or stopped).
    RemoteTrack {
        session_id: SessionId,
        kind: TrackKind,
        active: bool,
    },
    LocalCandidate {
        session_id: SessionId,
        candidate: IceCandidate,
    },
    TransportFailed {
        session_id: SessionId,
        reason: String,
    },
    ChannelClosed,
}

/// Side effects requested by the machine, to be executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(SignalingMessage),
    /// Prepare per-session negotiation state (negotiator + media transport).
    OpenSession {
        session_id: SessionId,
        direction: CallDirection,
    },
    Begin {
        session_id: SessionId,
        op: OpId,
        operation: Operation,
    },
    /// Abort an in-flight operation; its completion will be discarded.
    Cancel { op: OpId },
    AddRemoteCandidate {
        session_id: SessionId,
        candidate: IceCandidate,
    },
    SetTrackEnabled {
        session_id: SessionId,
        kind: TrackKind,
        enabled: bool,
    },
    /// Close the media transport and release local devices.
    TearDown { session_id: SessionId },
    Notify(CallSnapshot),
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    op: OpId,
}

/// Single-session call state machine.
#[derive(Debug)]
pub struct CallStateMachine {
    local_peer: PeerId,
    state: CallState,
    pending: Option<Pending>,
    deferred: VecDeque<Intent>,
    /// Set once an answer has been handed to the negotiator.
    remote_description_requested: bool,
    /// Ids of the most recent ended sessions, oldest first.
    recently_ended: VecDeque<SessionId>,
    next_op: u64,
}

const RECENTLY_ENDED_CAPACITY: usize = 16;

impl CallStateMachine {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            state: CallState::Idle,
            pending: None,
            deferred: VecDeque::new(),
            remote_description_requested: false,
            recently_ended: VecDeque::with_capacity(RECENTLY_ENDED_CAPACITY),
            next_op: 1,
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn state_kind(&self) -> CallStateKind {
        self.state.kind()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.state.snapshot()
    }

    /// Id of the session that has not ended yet, if any.
    pub fn active_session_id(&self) -> Option<&SessionId> {
        if self.state.is_active() {
            self.state.session().map(|s| &s.session_id)
        } else {
            None
        }
    }

    pub fn has_pending_operation(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one input and collect the effects it produces.
    pub fn handle(&mut self, input: CallInput) -> Vec<Effect> {
        let mut fx = Vec::new();
        match input {
            CallInput::Intent(intent) => self.on_intent(intent, &mut fx),
            CallInput::Signal(msg) => self.on_signal(msg, &mut fx),
            CallInput::OperationCompleted {
                session_id,
                op,
                result,
            } => self.on_completed(session_id, op, result, &mut fx),
            CallInput::RemoteTrack {
                session_id,
                kind,
                active,
            } => self.on_remote_track(session_id, kind, active, &mut fx),
            CallInput::LocalCandidate {
                session_id,
                candidate,
            } => self.on_local_candidate(session_id, candidate, &mut fx),
            CallInput::TransportFailed { session_id, reason } => {
                if self.is_current(&session_id) {
                    warn!("Media transport failed for call {session_id}: {reason}");
                    self.finish(EndReason::TransportFailed, &mut fx);
                }
            }
            CallInput::ChannelClosed => {
                if self.state.is_active() {
                    warn!("Signaling channel closed during an active call");
                    self.finish(EndReason::SignalingLost, &mut fx);
                }
            }
        }
        self.replay_deferred(&mut fx);
        fx
    }

    fn replay_deferred(&mut self, fx: &mut Vec<Effect>) {
        if self.pending.is_some() || self.deferred.is_empty() {
            return;
        }
        let queued: Vec<Intent> = self.deferred.drain(..).collect();
        for intent in queued {
            if self.pending.is_some() {
                self.deferred.push_back(intent);
            } else {
                self.on_intent(intent, fx);
            }
        }
    }

    fn is_current(&self, session_id: &SessionId) -> bool {
        self.active_session_id() == Some(session_id)
    }

    fn next_op_id(&mut self) -> OpId {
        let op = OpId(self.next_op);
        self.next_op += 1;
        op
    }

    fn begin(&mut self, session_id: SessionId, operation: Operation, fx: &mut Vec<Effect>) {
        let op = self.next_op_id();
        debug!("Call {session_id}: starting {} ({op:?})", operation.name());
        self.pending = Some(Pending { op });
        fx.push(Effect::Begin {
            session_id,
            op,
            operation,
        });
    }

    /// Move the current session into another state variant.
    fn move_to(&mut self, make: fn(CallSession) -> CallState) {
        let state = std::mem::take(&mut self.state);
        if let Some(session) = state.into_session() {
            self.state = make(session);
        }
    }

    fn notify(&self, fx: &mut Vec<Effect>) {
        fx.push(Effect::Notify(self.state.snapshot()));
    }

    /// Transition the active session to `ended`.
    fn finish(&mut self, reason: EndReason, fx: &mut Vec<Effect>) {
        if !self.state.is_active() {
            return;
        }
        if let Some(pending) = self.pending.take() {
            fx.push(Effect::Cancel { op: pending.op });
        }
        self.deferred.clear();
        self.remote_description_requested = false;

        let state = std::mem::take(&mut self.state);
        let Some(mut session) = state.into_session() else {
            return;
        };

        info!("Call {} ended: {}", session.session_id, reason);
        if reason.notifies_peer() {
            fx.push(Effect::Send(SignalingMessage::end(session.session_id.clone())));
        }
        fx.push(Effect::TearDown {
            session_id: session.session_id.clone(),
        });
        session.mark_ended(reason);
        if self.recently_ended.len() == RECENTLY_ENDED_CAPACITY {
            self.recently_ended.pop_front();
        }
        self.recently_ended.push_back(session.session_id.clone());
        self.state = CallState::Ended(session.snapshot(CallStateKind::Ended));
        self.notify(fx);
    }

    fn has_ended(&self, session_id: &SessionId) -> bool {
        self.recently_ended.contains(session_id)
    }

    // ==================== Intents ====================

    fn on_intent(&mut self, intent: Intent, fx: &mut Vec<Effect>) {
        if self.pending.is_some() && intent != Intent::End {
            debug!("Deferring {intent:?} until the pending operation completes");
            self.deferred.push_back(intent);
            return;
        }

        match intent {
            Intent::StartCall { peer, constraints } => self.start_call(peer, constraints, fx),
            Intent::Answer => self.answer(fx),
            Intent::Reject => {
                if let CallState::IncomingRinging(session) = &self.state {
                    fx.push(Effect::Send(SignalingMessage::reject(
                        session.session_id.clone(),
                    )));
                    self.finish(EndReason::RejectedLocal, fx);
                } else {
                    debug!("Ignoring reject in state {}", self.state_kind());
                }
            }
            Intent::End => {
                if self.state.is_active() {
                    self.finish(EndReason::LocalHangup, fx);
                } else {
                    debug!("Ignoring end-call in state {}", self.state_kind());
                }
            }
            Intent::ToggleMic => self.toggle(TrackKind::Audio, fx),
            Intent::ToggleVideo => self.toggle(TrackKind::Video, fx),
            Intent::AddParticipant(peer) => {
                warn!("Adding participant {peer} is not supported for 1:1 calls");
            }
        }
    }

    fn start_call(&mut self, peer: PeerId, constraints: MediaConstraints, fx: &mut Vec<Effect>) {
        if self.state.is_active() {
            warn!(
                "Cannot call {peer}: already in a call ({})",
                self.state_kind()
            );
            return;
        }

        let session = CallSession::new_outgoing(SessionId::generate(), peer, constraints);
        let session_id = session.session_id.clone();
        info!("Starting outgoing call {} to {}", session_id, session.peer);

        self.remote_description_requested = false;
        self.state = CallState::OutgoingRinging(session);
        fx.push(Effect::OpenSession {
            session_id: session_id.clone(),
            direction: CallDirection::Outgoing,
        });
        self.notify(fx);
        self.begin(session_id, Operation::CreateOffer { constraints }, fx);
    }

    fn answer(&mut self, fx: &mut Vec<Effect>) {
        let CallState::IncomingRinging(session) = &self.state else {
            debug!("Ignoring answer in state {}", self.state_kind());
            return;
        };

        let Some(remote_offer) = session.remote_offer.clone() else {
            debug!("Answer requested before the offer arrived; waiting");
            self.deferred.push_back(Intent::Answer);
            return;
        };

        let session_id = session.session_id.clone();
        let constraints = session.constraints;
        self.begin(
            session_id,
            Operation::CreateAnswer {
                constraints,
                remote_offer,
            },
            fx,
        );
    }

    fn toggle(&mut self, kind: TrackKind, fx: &mut Vec<Effect>) {
        if !matches!(self.state, CallState::Connecting(_) | CallState::Connected(_)) {
            debug!("Ignoring {kind} toggle in state {}", self.state_kind());
            return;
        }
        let Some(session) = self.state.session_mut() else {
            return;
        };
        let Some(enabled) = session.toggle_local_track(kind) else {
            debug!("Call has no local {kind} track to toggle");
            return;
        };
        let session_id = session.session_id.clone();
        fx.push(Effect::SetTrackEnabled {
            session_id,
            kind,
            enabled,
        });
        self.notify(fx);
    }

    // ==================== Signaling ====================

    fn on_signal(&mut self, msg: SignalingMessage, fx: &mut Vec<Effect>) {
        if msg.kind == SignalingType::CallInvite {
            self.on_invite(msg, fx);
            return;
        }

        if !self.is_current(&msg.session_id) {
            debug!(
                "Discarding stray {} for session {}",
                msg.kind, msg.session_id
            );
            return;
        }

        match msg.kind {
            SignalingType::CallInvite => {}
            SignalingType::Offer => self.on_offer(msg, fx),
            SignalingType::Answer => self.on_answer(msg, fx),
            SignalingType::Candidate => match msg.ice_candidate() {
                Ok(candidate) => fx.push(Effect::AddRemoteCandidate {
                    session_id: msg.session_id,
                    candidate,
                }),
                Err(e) => warn!("Dropping undecodable candidate for {}: {e}", msg.session_id),
            },
            SignalingType::CallAccept => self.on_accept(fx),
            SignalingType::CallReject => {
                if matches!(self.state, CallState::OutgoingRinging(_)) {
                    self.finish(EndReason::RejectedRemote, fx);
                } else {
                    debug!("Ignoring call-reject in state {}", self.state_kind());
                }
            }
            SignalingType::CallEnd => self.finish(EndReason::RemoteHangup, fx),
        }
    }

    fn on_invite(&mut self, msg: SignalingMessage, fx: &mut Vec<Effect>) {
        let invite = match msg.invite_payload() {
            Ok(invite) => invite,
            Err(e) => {
                warn!("Ignoring malformed call-invite {}: {e}", msg.session_id);
                return;
            }
        };

        if invite.callee != self.local_peer {
            debug!(
                "Ignoring call-invite {} addressed to {}",
                msg.session_id, invite.callee
            );
            return;
        }

        if self.has_ended(&msg.session_id) {
            debug!("Ignoring call-invite for ended session {}", msg.session_id);
            return;
        }

        if let Some(active) = self.active_session_id() {
            if *active == msg.session_id {
                debug!("Duplicate call-invite for {}", msg.session_id);
            } else {
                info!(
                    "Busy: auto-rejecting call {} from {}",
                    msg.session_id, invite.caller
                );
                fx.push(Effect::Send(SignalingMessage::reject(msg.session_id)));
            }
            return;
        }

        info!(
            "Incoming call {} from {} (video: {})",
            msg.session_id, invite.caller, invite.video
        );
        let session = CallSession::new_incoming(
            msg.session_id.clone(),
            invite.caller.clone(),
            invite.constraints(),
        );
        self.pending = None;
        self.deferred.clear();
        self.remote_description_requested = false;
        self.state = CallState::IncomingRinging(session);
        fx.push(Effect::OpenSession {
            session_id: msg.session_id,
            direction: CallDirection::Incoming,
        });
        self.notify(fx);
    }

    fn on_offer(&mut self, msg: SignalingMessage, fx: &mut Vec<Effect>) {
        let CallState::IncomingRinging(session) = &mut self.state else {
            debug!("Ignoring offer in state {}", self.state_kind());
            return;
        };
        if session.remote_offer.is_some() {
            warn!("Ignoring repeated offer for {}", msg.session_id);
            return;
        }
        match msg.session_description() {
            Ok(offer) => session.remote_offer = Some(offer),
            Err(e) => {
                warn!("Malformed offer for {}: {e}", msg.session_id);
                self.finish(EndReason::NegotiationFailed, fx);
            }
        }
    }

    fn on_answer(&mut self, msg: SignalingMessage, fx: &mut Vec<Effect>) {
        let expects_answer = match &self.state {
            CallState::OutgoingRinging(session)
            | CallState::Connecting(session)
            | CallState::Connected(session) => session.is_initiator(),
            _ => false,
        };
        if !expects_answer {
            debug!("Ignoring answer in state {}", self.state_kind());
            return;
        }

        let answer = match msg.session_description() {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Malformed answer for {}: {e}", msg.session_id);
                self.finish(EndReason::NegotiationFailed, fx);
                return;
            }
        };

        match &mut self.state {
            CallState::OutgoingRinging(session) if session.early_answer.is_none() => {
                debug!("Answer for {} arrived before call-accept", msg.session_id);
                session.early_answer = Some(answer);
            }
            CallState::Connecting(session) | CallState::Connected(session)
                if session.is_initiator() =>
            {
                if self.remote_description_requested {
                    warn!("Second answer for {}", msg.session_id);
                    self.finish(EndReason::NegotiationFailed, fx);
                    return;
                }
                self.remote_description_requested = true;
                self.begin(
                    msg.session_id,
                    Operation::ApplyRemoteDescription {
                        description: answer,
                    },
                    fx,
                );
            }
            CallState::OutgoingRinging(_) => {
                warn!("Second answer for {}", msg.session_id);
                self.finish(EndReason::NegotiationFailed, fx);
            }
            _ => debug!("Ignoring answer in state {}", self.state_kind()),
        }
    }

    fn on_accept(&mut self, fx: &mut Vec<Effect>) {
        let CallState::OutgoingRinging(session) = &mut self.state else {
            debug!("Ignoring call-accept in state {}", self.state_kind());
            return;
        };
        if !session.local_description_sent {
            warn!(
                "Ignoring call-accept for {} before our offer was sent",
                session.session_id
            );
            return;
        }

        let session_id = session.session_id.clone();
        let early_answer = session.early_answer.take();
        info!("Call {session_id} accepted by peer");

        self.move_to(CallState::Connecting);
        self.notify(fx);

        if let Some(description) = early_answer {
            self.remote_description_requested = true;
            self.begin(
                session_id,
                Operation::ApplyRemoteDescription { description },
                fx,
            );
        }
    }

    // ==================== Runtime feedback ====================

    fn on_completed(
        &mut self,
        session_id: SessionId,
        op: OpId,
        result: OperationResult,
        fx: &mut Vec<Effect>,
    ) {
        let current = self.pending.map(|p| p.op) == Some(op) && self.is_current(&session_id);
        if !current {
            debug!("Discarding stale completion {op:?} for {session_id}");
            return;
        }
        self.pending = None;

        match result {
            OperationResult::OfferCreated {
                description,
                local_kinds,
            } => {
                let Some(session) = self.state.session_mut() else {
                    return;
                };
                session.set_local_tracks(&local_kinds);
                session.local_description_sent = true;
                let held = std::mem::take(&mut session.held_candidates);
                fx.push(Effect::Send(SignalingMessage::invite(
                    session_id.clone(),
                    self.local_peer.clone(),
                    session.peer.clone(),
                    session.constraints,
                )));
                fx.push(Effect::Send(SignalingMessage::description(
                    session_id.clone(),
                    &description,
                )));
                for candidate in held {
                    fx.push(Effect::Send(SignalingMessage::candidate(
                        session_id.clone(),
                        &candidate,
                    )));
                }
                self.notify(fx);
            }
            OperationResult::AnswerCreated {
                description,
                local_kinds,
            } => {
                let Some(session) = self.state.session_mut() else {
                    return;
                };
                session.set_local_tracks(&local_kinds);
                session.local_description_sent = true;
                let held = std::mem::take(&mut session.held_candidates);
                fx.push(Effect::Send(SignalingMessage::accept(session_id.clone())));
                fx.push(Effect::Send(SignalingMessage::description(
                    session_id.clone(),
                    &description,
                )));
                for candidate in held {
                    fx.push(Effect::Send(SignalingMessage::candidate(
                        session_id.clone(),
                        &candidate,
                    )));
                }
                info!("Answered call {session_id}");
                self.move_to(CallState::Connecting);
                self.notify(fx);
            }
            OperationResult::RemoteDescriptionApplied => {
                debug!("Remote description applied for {session_id}");
            }
            OperationResult::Failed(OperationFailure::Device(e)) => {
                warn!("Device error on call {session_id}: {e}");
                self.finish(EndReason::DeviceError, fx);
            }
            OperationResult::Failed(OperationFailure::Negotiation(e)) => {
                warn!("Negotiation failed on call {session_id}: {e}");
                self.finish(EndReason::NegotiationFailed, fx);
            }
        }
    }

    fn on_remote_track(
        &mut self,
        session_id: SessionId,
        kind: TrackKind,
        active: bool,
        fx: &mut Vec<Effect>,
    ) {
        if !self.is_current(&session_id) {
            debug!("Discarding remote {kind} track event for {session_id}");
            return;
        }

        match &mut self.state {
            CallState::Connecting(session) => {
                session.set_remote_track(kind, active);
                if active {
                    session.started_at = Some(Utc::now());
                    info!("Call {session_id} connected ({kind} flowing)");
                    self.move_to(CallState::Connected);
                    self.notify(fx);
                }
            }
            CallState::Connected(session) => {
                if session.set_remote_track(kind, active) {
                    self.notify(fx);
                }
            }
            _ => debug!(
                "Ignoring remote {kind} track in state {}",
                self.state_kind()
            ),
        }
    }

    fn on_local_candidate(
        &mut self,
        session_id: SessionId,
        candidate: IceCandidate,
        fx: &mut Vec<Effect>,
    ) {
        if !self.is_current(&session_id) {
            return;
        }
        let Some(session) = self.state.session_mut() else {
            return;
        };
        if session.local_description_sent {
            fx.push(Effect::Send(SignalingMessage::candidate(
                session_id, &candidate,
            )));
        } else {
            session.held_candidates.push(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::SdpType;

    const ALICE: &str = "alice";
    const BOB: &str = "bob";
    const CAROL: &str = "carol";

    fn machine(local: &str) -> CallStateMachine {
        CallStateMachine::new(PeerId::new(local))
    }

    fn sent(fx: &[Effect]) -> Vec<SignalingType> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Send(m) => Some(m.kind),
                _ => None,
            })
            .collect()
    }

    fn begun(fx: &[Effect]) -> Option<(SessionId, OpId, Operation)> {
        fx.iter().find_map(|e| match e {
            Effect::Begin {
                session_id,
                op,
                operation,
            } => Some((session_id.clone(), *op, operation.clone())),
            _ => None,
        })
    }

    fn notified(fx: &[Effect]) -> Vec<CallStateKind> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Notify(s) => Some(s.state),
                _ => None,
            })
            .collect()
    }

    fn invite(session: &str, caller: &str, callee: &str) -> CallInput {
        CallInput::Signal(SignalingMessage::invite(
            SessionId::new(session),
            PeerId::new(caller),
            PeerId::new(callee),
            MediaConstraints::video(),
        ))
    }

    fn offer(session: &str) -> CallInput {
        CallInput::Signal(SignalingMessage::description(
            SessionId::new(session),
            &SessionDescription::offer("v=0 offer"),
        ))
    }

    fn answer_signal(session: &SessionId) -> CallInput {
        CallInput::Signal(SignalingMessage::description(
            session.clone(),
            &SessionDescription::answer("v=0 answer"),
        ))
    }

    fn complete(session_id: &SessionId, op: OpId, result: OperationResult) -> CallInput {
        CallInput::OperationCompleted {
            session_id: session_id.clone(),
            op,
            result,
        }
    }

    fn offer_created() -> OperationResult {
        OperationResult::OfferCreated {
            description: SessionDescription::offer("v=0 local"),
            local_kinds: vec![TrackKind::Audio, TrackKind::Video],
        }
    }

    fn answer_created() -> OperationResult {
        OperationResult::AnswerCreated {
            description: SessionDescription::answer("v=0 local"),
            local_kinds: vec![TrackKind::Audio, TrackKind::Video],
        }
    }

    /// Drive an outgoing call from alice to bob up to `outgoing-ringing` with
    /// the offer sent.
    fn ringing_outgoing() -> (CallStateMachine, SessionId) {
        let mut m = machine(ALICE);
        let fx = m.handle(CallInput::Intent(Intent::StartCall {
            peer: PeerId::new(BOB),
            constraints: MediaConstraints::video(),
        }));
        let (sid, op, _) = begun(&fx).unwrap();
        m.handle(complete(&sid, op, offer_created()));
        (m, sid)
    }

    /// Drive an incoming call on bob up to `incoming-ringing` with the offer stored.
    fn ringing_incoming(session: &str) -> (CallStateMachine, SessionId) {
        let mut m = machine(BOB);
        m.handle(invite(session, ALICE, BOB));
        m.handle(offer(session));
        (m, SessionId::new(session))
    }

    fn connecting_incoming(session: &str) -> (CallStateMachine, SessionId) {
        let (mut m, sid) = ringing_incoming(session);
        let fx = m.handle(CallInput::Intent(Intent::Answer));
        let (_, op, _) = begun(&fx).unwrap();
        m.handle(complete(&sid, op, answer_created()));
        assert_eq!(m.state_kind(), CallStateKind::Connecting);
        (m, sid)
    }

    #[test]
    fn test_outgoing_call_accepted_flow() {
        let mut m = machine(ALICE);
        let fx = m.handle(CallInput::Intent(Intent::StartCall {
            peer: PeerId::new(BOB),
            constraints: MediaConstraints::video(),
        }));
        assert_eq!(m.state_kind(), CallStateKind::OutgoingRinging);
        assert_eq!(notified(&fx), vec![CallStateKind::OutgoingRinging]);
        assert!(matches!(fx[0], Effect::OpenSession { direction: CallDirection::Outgoing, .. }));
        let (sid, op, operation) = begun(&fx).unwrap();
        assert_eq!(
            operation,
            Operation::CreateOffer {
                constraints: MediaConstraints::video()
            }
        );
        // Nothing goes on the wire until the offer exists.
        assert!(sent(&fx).is_empty());

        let fx = m.handle(complete(&sid, op, offer_created()));
        assert_eq!(sent(&fx), vec![SignalingType::CallInvite, SignalingType::Offer]);
        assert_eq!(m.state_kind(), CallStateKind::OutgoingRinging);
        let Effect::Send(invite) = &fx[0] else { panic!() };
        let payload = invite.invite_payload().unwrap();
        assert_eq!(payload.caller.as_str(), ALICE);
        assert_eq!(payload.callee.as_str(), BOB);

        let fx = m.handle(CallInput::Signal(SignalingMessage::accept(sid.clone())));
        assert_eq!(m.state_kind(), CallStateKind::Connecting);
        assert_eq!(notified(&fx), vec![CallStateKind::Connecting]);

        let fx = m.handle(answer_signal(&sid));
        let (_, apply_op, operation) = begun(&fx).unwrap();
        assert!(matches!(operation, Operation::ApplyRemoteDescription { description } if description.sdp_type == SdpType::Answer));
        m.handle(complete(&sid, apply_op, OperationResult::RemoteDescriptionApplied));
        assert_eq!(m.state_kind(), CallStateKind::Connecting);

        let fx = m.handle(CallInput::RemoteTrack {
            session_id: sid.clone(),
            kind: TrackKind::Audio,
            active: true,
        });
        assert_eq!(m.state_kind(), CallStateKind::Connected);
        assert_eq!(notified(&fx), vec![CallStateKind::Connected]);
        assert!(m.snapshot().started_at.is_some());
    }

    #[test]
    fn test_sdp_completion_alone_does_not_connect() {
        let (mut m, sid) = ringing_outgoing();
        m.handle(CallInput::Signal(SignalingMessage::accept(sid.clone())));
        let fx = m.handle(answer_signal(&sid));
        let (_, op, _) = begun(&fx).unwrap();
        m.handle(complete(&sid, op, OperationResult::RemoteDescriptionApplied));
        assert_eq!(m.state_kind(), CallStateKind::Connecting);

        // An inactive track report is not media flow either.
        m.handle(CallInput::RemoteTrack {
            session_id: sid,
            kind: TrackKind::Video,
            active: false,
        });
        assert_eq!(m.state_kind(), CallStateKind::Connecting);
    }

    #[test]
    fn test_answer_before_accept_is_applied_on_accept() {
        let (mut m, sid) = ringing_outgoing();
        let fx = m.handle(answer_signal(&sid));
        assert!(fx.is_empty());
        let fx = m.handle(CallInput::Signal(SignalingMessage::accept(sid)));
        assert!(matches!(
            begun(&fx),
            Some((_, _, Operation::ApplyRemoteDescription { .. }))
        ));
    }

    #[test]
    fn test_incoming_call_rejected() {
        let mut m = machine(BOB);
        let fx = m.handle(invite("S1", ALICE, BOB));
        assert_eq!(m.state_kind(), CallStateKind::IncomingRinging);
        assert_eq!(notified(&fx), vec![CallStateKind::IncomingRinging]);
        assert_eq!(m.snapshot().direction, Some(CallDirection::Incoming));

        let fx = m.handle(CallInput::Intent(Intent::Reject));
        assert_eq!(sent(&fx), vec![SignalingType::CallReject]);
        assert_eq!(m.state_kind(), CallStateKind::Ended);
        assert_eq!(m.snapshot().end_reason, Some(EndReason::RejectedLocal));
        assert!(fx.iter().any(|e| matches!(e, Effect::TearDown { .. })));
        assert_eq!(notified(&fx), vec![CallStateKind::Ended]);
    }

    #[test]
    fn test_outgoing_call_rejected_by_peer() {
        let (mut m, sid) = ringing_outgoing();
        let fx = m.handle(CallInput::Signal(SignalingMessage::reject(sid)));
        assert_eq!(m.snapshot().end_reason, Some(EndReason::RejectedRemote));
        assert!(sent(&fx).is_empty());
    }

    #[test]
    fn test_double_answer_sends_accept_once() {
        let (mut m, sid) = ringing_incoming("S1");

        let fx1 = m.handle(CallInput::Intent(Intent::Answer));
        let fx2 = m.handle(CallInput::Intent(Intent::Answer));
        assert!(begun(&fx2).is_none());
        // Still ringing while the answer is being created.
        assert_eq!(m.state_kind(), CallStateKind::IncomingRinging);

        let (_, op, _) = begun(&fx1).unwrap();
        let fx3 = m.handle(complete(&sid, op, answer_created()));
        let fx4 = m.handle(CallInput::Intent(Intent::Answer));

        let accepts = [fx1, fx2, fx3, fx4]
            .iter()
            .flat_map(|fx| sent(fx))
            .filter(|k| *k == SignalingType::CallAccept)
            .count();
        assert_eq!(accepts, 1);
        assert_eq!(m.state_kind(), CallStateKind::Connecting);
    }

    #[test]
    fn test_answer_waits_for_offer() {
        let mut m = machine(BOB);
        m.handle(invite("S1", ALICE, BOB));
        let fx = m.handle(CallInput::Intent(Intent::Answer));
        assert!(begun(&fx).is_none());

        let fx = m.handle(offer("S1"));
        assert!(matches!(
            begun(&fx),
            Some((_, _, Operation::CreateAnswer { .. }))
        ));
    }

    #[test]
    fn test_reject_after_answer_is_noop() {
        let (mut m, _sid) = connecting_incoming("S1");
        let fx = m.handle(CallInput::Intent(Intent::Reject));
        assert!(fx.is_empty());
        assert_eq!(m.state_kind(), CallStateKind::Connecting);
    }

    #[test]
    fn test_invite_while_busy_is_auto_rejected() {
        let (mut m, sid) = connecting_incoming("A-SESSION");
        let before = m.snapshot();

        let fx = m.handle(invite("B-SESSION", CAROL, BOB));
        assert_eq!(fx.len(), 1);
        let Effect::Send(reject) = &fx[0] else { panic!("expected a send") };
        assert_eq!(reject.kind, SignalingType::CallReject);
        assert_eq!(reject.session_id.as_str(), "B-SESSION");

        assert_eq!(m.snapshot(), before);
        assert_eq!(m.active_session_id(), Some(&sid));
    }

    #[test]
    fn test_duplicate_invite_is_ignored() {
        let mut m = machine(BOB);
        m.handle(invite("S1", ALICE, BOB));
        let fx = m.handle(invite("S1", ALICE, BOB));
        assert!(fx.is_empty());
        assert_eq!(m.state_kind(), CallStateKind::IncomingRinging);
    }

    #[test]
    fn test_replayed_invite_for_ended_session_is_ignored() {
        let mut m = machine(BOB);
        m.handle(invite("S1", ALICE, BOB));
        m.handle(CallInput::Intent(Intent::Reject));
        let ended = m.snapshot();

        let fx = m.handle(invite("S1", ALICE, BOB));
        assert!(fx.is_empty());
        assert_eq!(m.state_kind(), CallStateKind::Ended);
        assert_eq!(m.snapshot(), ended);

        // A fresh session from the same caller still rings.
        let fx = m.handle(invite("S2", ALICE, BOB));
        assert_eq!(notified(&fx), vec![CallStateKind::IncomingRinging]);
    }

    #[test]
    fn test_ended_state_keeps_only_the_final_snapshot() {
        let (mut m, sid) = ringing_outgoing();
        m.handle(CallInput::Intent(Intent::End));

        assert!(m.state().session().is_none());
        assert!(m.active_session_id().is_none());
        let CallState::Ended(snapshot) = m.state() else {
            panic!("expected ended state")
        };
        assert_eq!(snapshot.session_id.as_ref(), Some(&sid));
        assert_eq!(snapshot.state, CallStateKind::Ended);
        assert_eq!(snapshot.end_reason, Some(EndReason::LocalHangup));
        assert!(snapshot.ended_at.is_some());
        assert_eq!(m.snapshot(), *snapshot);
    }

    #[test]
    fn test_invite_for_someone_else_is_ignored() {
        let mut m = machine(BOB);
        let fx = m.handle(invite("S1", ALICE, CAROL));
        assert!(fx.is_empty());
        assert_eq!(m.state_kind(), CallStateKind::Idle);
    }

    #[test]
    fn test_never_two_active_sessions() {
        let mut m = machine(BOB);
        let inputs = vec![
            invite("S1", ALICE, BOB),
            CallInput::Intent(Intent::StartCall {
                peer: PeerId::new(CAROL),
                constraints: MediaConstraints::audio(),
            }),
            invite("S2", CAROL, BOB),
            CallInput::Intent(Intent::Reject),
            invite("S3", CAROL, BOB),
            CallInput::Intent(Intent::StartCall {
                peer: PeerId::new(ALICE),
                constraints: MediaConstraints::audio(),
            }),
            CallInput::Signal(SignalingMessage::end(SessionId::new("S3"))),
            CallInput::Intent(Intent::StartCall {
                peer: PeerId::new(ALICE),
                constraints: MediaConstraints::audio(),
            }),
            invite("S4", CAROL, BOB),
        ];

        let mut opened = 0usize;
        let mut ended = 0usize;
        for input in inputs {
            for effect in m.handle(input) {
                match effect {
                    Effect::OpenSession { .. } => opened += 1,
                    Effect::Notify(s) if s.state == CallStateKind::Ended => ended += 1,
                    _ => {}
                }
                assert!(opened - ended <= 1, "two sessions active at once");
            }
        }
        // S1, S3 and the final outgoing call.
        assert_eq!(opened, 3);
    }

    #[test]
    fn test_end_call_from_every_active_state() {
        let (mut m, _) = ringing_outgoing();
        let fx = m.handle(CallInput::Intent(Intent::End));
        assert_eq!(sent(&fx), vec![SignalingType::CallEnd]);
        assert_eq!(m.snapshot().end_reason, Some(EndReason::LocalHangup));

        let (mut m, _) = ringing_incoming("S1");
        m.handle(CallInput::Intent(Intent::End));
        assert_eq!(m.snapshot().end_reason, Some(EndReason::LocalHangup));

        let (mut m, sid) = connecting_incoming("S2");
        m.handle(CallInput::RemoteTrack {
            session_id: sid,
            kind: TrackKind::Audio,
            active: true,
        });
        assert_eq!(m.state_kind(), CallStateKind::Connected);
        let fx = m.handle(CallInput::Intent(Intent::End));
        assert_eq!(sent(&fx), vec![SignalingType::CallEnd]);
        assert!(fx.iter().any(|e| matches!(e, Effect::TearDown { .. })));

        // Ended is terminal: a second end does nothing.
        assert!(m.handle(CallInput::Intent(Intent::End)).is_empty());
    }

    #[test]
    fn test_remote_hangup_and_channel_loss() {
        let (mut m, sid) = connecting_incoming("S1");
        let fx = m.handle(CallInput::Signal(SignalingMessage::end(sid)));
        assert!(sent(&fx).is_empty());
        assert_eq!(m.snapshot().end_reason, Some(EndReason::RemoteHangup));

        let (mut m, sid) = connecting_incoming("S2");
        m.handle(CallInput::RemoteTrack {
            session_id: sid,
            kind: TrackKind::Audio,
            active: true,
        });
        let fx = m.handle(CallInput::ChannelClosed);
        assert!(sent(&fx).is_empty());
        assert!(fx.iter().any(|e| matches!(e, Effect::TearDown { .. })));
        assert_eq!(m.snapshot().end_reason, Some(EndReason::SignalingLost));

        // Closing while idle changes nothing.
        let mut idle = machine(ALICE);
        assert!(idle.handle(CallInput::ChannelClosed).is_empty());
    }

    #[test]
    fn test_end_during_pending_answer_discards_completion() {
        let (mut m, sid) = ringing_incoming("S1");
        let fx = m.handle(CallInput::Intent(Intent::Answer));
        let (_, op, _) = begun(&fx).unwrap();

        let fx = m.handle(CallInput::Intent(Intent::End));
        assert!(fx.contains(&Effect::Cancel { op }));
        assert_eq!(m.snapshot().end_reason, Some(EndReason::LocalHangup));

        let fx = m.handle(complete(&sid, op, answer_created()));
        assert!(fx.is_empty());
        assert_eq!(m.state_kind(), CallStateKind::Ended);
    }

    #[test]
    fn test_device_error_ends_call() {
        let mut m = machine(ALICE);
        let fx = m.handle(CallInput::Intent(Intent::StartCall {
            peer: PeerId::new(BOB),
            constraints: MediaConstraints::video(),
        }));
        let (sid, op, _) = begun(&fx).unwrap();
        let fx = m.handle(complete(
            &sid,
            op,
            OperationResult::Failed(OperationFailure::Device(DeviceError::PermissionDenied(
                TrackKind::Video,
            ))),
        ));
        assert_eq!(m.snapshot().end_reason, Some(EndReason::DeviceError));
        assert_eq!(m.snapshot().status_line(), "Camera or microphone unavailable");
        assert!(fx.iter().any(|e| matches!(e, Effect::TearDown { .. })));
    }

    #[test]
    fn test_malformed_offer_fails_negotiation() {
        let mut m = machine(BOB);
        m.handle(invite("S1", ALICE, BOB));
        let mut bad = SignalingMessage::description(
            SessionId::new("S1"),
            &SessionDescription::offer("v=0"),
        );
        bad.payload = serde_json::json!({"sdp": 42});
        m.handle(CallInput::Signal(bad));
        assert_eq!(m.snapshot().end_reason, Some(EndReason::NegotiationFailed));
    }

    #[test]
    fn test_second_answer_fails_negotiation() {
        let (mut m, sid) = ringing_outgoing();
        m.handle(CallInput::Signal(SignalingMessage::accept(sid.clone())));
        let fx = m.handle(answer_signal(&sid));
        let (_, op, _) = begun(&fx).unwrap();
        m.handle(complete(&sid, op, OperationResult::RemoteDescriptionApplied));
        m.handle(answer_signal(&sid));
        assert_eq!(m.snapshot().end_reason, Some(EndReason::NegotiationFailed));
    }

    #[test]
    fn test_callee_ignores_malformed_answer() {
        let (mut m, sid) = connecting_incoming("S1");
        let before = m.snapshot();

        let mut bad =
            SignalingMessage::description(sid.clone(), &SessionDescription::answer("v=0"));
        bad.payload = serde_json::json!({"sdp": 42});
        let fx = m.handle(CallInput::Signal(bad));

        assert!(fx.is_empty());
        assert_eq!(m.state_kind(), CallStateKind::Connecting);
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn test_caller_fails_on_malformed_answer() {
        let (mut m, sid) = ringing_outgoing();
        let mut bad =
            SignalingMessage::description(sid.clone(), &SessionDescription::answer("v=0"));
        bad.payload = serde_json::json!({"sdp": 42});
        let fx = m.handle(CallInput::Signal(bad));

        assert_eq!(sent(&fx), vec![SignalingType::CallEnd]);
        assert_eq!(m.snapshot().end_reason, Some(EndReason::NegotiationFailed));
    }

    #[test]
    fn test_candidates_forwarded_in_order() {
        let (mut m, sid) = ringing_incoming("S1");
        let mut forwarded = Vec::new();
        for i in 0..3 {
            let c = IceCandidate::new(format!("candidate:{i} 1 udp 1 10.0.0.1 900{i} typ host"));
            for e in m.handle(CallInput::Signal(SignalingMessage::candidate(sid.clone(), &c))) {
                if let Effect::AddRemoteCandidate { candidate, .. } = e {
                    forwarded.push(candidate);
                }
            }
        }
        let ports: Vec<_> = forwarded
            .iter()
            .map(|c| c.attribute().unwrap().port)
            .collect();
        assert_eq!(ports, vec![9000, 9001, 9002]);
    }

    #[test]
    fn test_undecodable_candidate_is_dropped_silently() {
        let (mut m, sid) = connecting_incoming("S1");
        let before = m.snapshot();
        let mut msg = SignalingMessage::candidate(sid, &IceCandidate::new("x"));
        msg.payload = serde_json::json!("garbage");
        let fx = m.handle(CallInput::Signal(msg));
        assert!(fx.is_empty());
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn test_stray_messages_are_ignored() {
        let (mut m, _sid) = connecting_incoming("S1");
        let before = m.snapshot();
        for msg in [
            SignalingMessage::end(SessionId::new("OTHER")),
            SignalingMessage::accept(SessionId::new("OTHER")),
            SignalingMessage::candidate(SessionId::new("OTHER"), &IceCandidate::new("candidate:1 1 udp 1 1.1.1.1 1 typ host")),
        ] {
            assert!(m.handle(CallInput::Signal(msg)).is_empty());
        }
        assert_eq!(m.snapshot(), before);

        // Messages for an ended session are stray too.
        let (mut m, sid) = ringing_incoming("S2");
        m.handle(CallInput::Intent(Intent::Reject));
        assert!(m.handle(CallInput::Signal(SignalingMessage::end(sid))).is_empty());
    }

    #[test]
    fn test_local_candidates_held_until_description_sent() {
        let mut m = machine(ALICE);
        let fx = m.handle(CallInput::Intent(Intent::StartCall {
            peer: PeerId::new(BOB),
            constraints: MediaConstraints::audio(),
        }));
        let (sid, op, _) = begun(&fx).unwrap();

        let early = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 9000 typ host");
        let fx = m.handle(CallInput::LocalCandidate {
            session_id: sid.clone(),
            candidate: early,
        });
        assert!(fx.is_empty());

        let fx = m.handle(complete(&sid, op, offer_created()));
        assert_eq!(
            sent(&fx),
            vec![
                SignalingType::CallInvite,
                SignalingType::Offer,
                SignalingType::Candidate
            ]
        );

        let fx = m.handle(CallInput::LocalCandidate {
            session_id: sid,
            candidate: IceCandidate::new("candidate:2 1 udp 1 10.0.0.1 9001 typ host"),
        });
        assert_eq!(sent(&fx), vec![SignalingType::Candidate]);
    }

    #[test]
    fn test_toggles_only_while_connecting_or_connected() {
        let (mut m, _) = ringing_incoming("S1");
        assert!(m.handle(CallInput::Intent(Intent::ToggleMic)).is_empty());

        let (mut m, sid) = connecting_incoming("S2");
        let fx = m.handle(CallInput::Intent(Intent::ToggleVideo));
        assert!(fx.contains(&Effect::SetTrackEnabled {
            session_id: sid.clone(),
            kind: TrackKind::Video,
            enabled: false,
        }));
        assert!(!m.snapshot().local_enabled(TrackKind::Video));
        assert_eq!(notified(&fx), vec![CallStateKind::Connecting]);

        let fx = m.handle(CallInput::Intent(Intent::ToggleMic));
        assert!(fx.contains(&Effect::SetTrackEnabled {
            session_id: sid,
            kind: TrackKind::Audio,
            enabled: false,
        }));
    }

    #[test]
    fn test_toggle_during_pending_operation_is_deferred() {
        let (mut m, sid) = ringing_incoming("S1");
        let fx = m.handle(CallInput::Intent(Intent::Answer));
        let (_, op, _) = begun(&fx).unwrap();
        assert!(m.handle(CallInput::Intent(Intent::ToggleMic)).is_empty());

        let fx = m.handle(complete(&sid, op, answer_created()));
        let kinds: Vec<_> = fx
            .iter()
            .filter(|e| matches!(e, Effect::SetTrackEnabled { .. }))
            .collect();
        assert_eq!(kinds.len(), 1);
        assert!(!m.snapshot().local_enabled(TrackKind::Audio));
    }

    #[test]
    fn test_remote_video_off_is_observed() {
        let (mut m, sid) = connecting_incoming("S1");
        m.handle(CallInput::RemoteTrack {
            session_id: sid.clone(),
            kind: TrackKind::Video,
            active: true,
        });
        let fx = m.handle(CallInput::RemoteTrack {
            session_id: sid,
            kind: TrackKind::Video,
            active: false,
        });
        assert_eq!(notified(&fx), vec![CallStateKind::Connected]);
        assert!(!m.snapshot().remote_active(TrackKind::Video));
    }

    #[test]
    fn test_add_participant_is_unsupported() {
        let (mut m, _) = connecting_incoming("S1");
        let before = m.snapshot();
        assert!(
            m.handle(CallInput::Intent(Intent::AddParticipant(PeerId::new(CAROL))))
                .is_empty()
        );
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn test_transport_failure_notifies_peer() {
        let (mut m, sid) = connecting_incoming("S1");
        let fx = m.handle(CallInput::TransportFailed {
            session_id: sid,
            reason: "ice failed".into(),
        });
        assert_eq!(sent(&fx), vec![SignalingType::CallEnd]);
        assert_eq!(m.snapshot().end_reason, Some(EndReason::TransportFailed));
    }

    #[test]
    fn test_new_call_after_ended() {
        let (mut m, _) = ringing_outgoing();
        m.handle(CallInput::Intent(Intent::End));
        let fx = m.handle(invite("S9", CAROL, ALICE));
        assert_eq!(notified(&fx), vec![CallStateKind::IncomingRinging]);
        assert_eq!(m.active_session_id().unwrap().as_str(), "S9");
    }
}
