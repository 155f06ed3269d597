//! The call controller: the public face of a call.
//!
//! A [`CallController`] owns one actor task. The actor holds the
//! [`CallStateMachine`] and is the only place session state changes. It
//! consumes UI intents, signaling events, negotiator events and operation
//! completions one at a time, and executes the effects the machine returns.
//!
//! Observers read the latest [`CallSnapshot`] through a `watch` channel, or
//! receive every [`CallEvent`] through the event bus.

use crate::calls::error::CallError;
use crate::calls::media::{LocalMedia, MediaDevices, MediaTransportFactory};
use crate::calls::negotiator::{NegotiatorEvent, SessionEvent, SessionNegotiator, open_negotiator};
use crate::config::CallControllerConfig;
use crate::signaling::{ChannelEvent, SignalingChannel, SignalingConnector};
use callcore::{
    CallEvent, CallEventBus, CallInput, CallSnapshot, CallStateMachine, Effect, EventHandler,
    Intent, MediaConstraints, NegotiationError, OpId, Operation, OperationFailure,
    OperationResult, PeerId, SessionId, SignalingMessage,
};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

enum ControllerCommand {
    Intent(Intent),
    Shutdown,
}

/// Result of a spawned negotiator operation, with the media it acquired.
struct OpOutcome {
    session_id: SessionId,
    op: OpId,
    result: OperationResult,
    media: Option<LocalMedia>,
}

/// Forwards bus events into an mpsc stream.
struct ChannelForwarder(mpsc::UnboundedSender<CallEvent>);

impl EventHandler for ChannelForwarder {
    fn handle_event(&self, event: &CallEvent) {
        let _ = self.0.send(event.clone());
    }
}

/// Handle to a running call controller.
pub struct CallController {
    local_peer: PeerId,
    command_tx: mpsc::Sender<ControllerCommand>,
    snapshot_rx: watch::Receiver<CallSnapshot>,
    event_bus: CallEventBus,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CallController {
    pub fn builder() -> CallControllerBuilder {
        CallControllerBuilder::default()
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// Place a call to `peer`.
    pub async fn start_call(&self, peer: PeerId, constraints: MediaConstraints) {
        self.intent(Intent::StartCall { peer, constraints }).await;
    }

    pub async fn answer_call(&self) {
        self.intent(Intent::Answer).await;
    }

    pub async fn reject_call(&self) {
        self.intent(Intent::Reject).await;
    }

    pub async fn end_call(&self) {
        self.intent(Intent::End).await;
    }

    pub async fn toggle_mic(&self) {
        self.intent(Intent::ToggleMic).await;
    }

    pub async fn toggle_video(&self) {
        self.intent(Intent::ToggleVideo).await;
    }

    /// Multi-party calls are not supported; the request is logged and ignored.
    pub async fn add_participant(&self, peer: PeerId) {
        self.intent(Intent::AddParticipant(peer)).await;
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_bus.add_handler(handler);
    }

    /// Every event from now on, as a stream.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CallEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_bus.add_handler(Arc::new(ChannelForwarder(tx)));
        rx
    }

    /// End any active call, close the signaling channel and stop the actor.
    pub async fn shutdown(&self) {
        if let Err(e) = self.command(ControllerCommand::Shutdown).await {
            debug!(target: "Call/Controller", "Shutdown of {}: {e}", self.local_peer);
        }
        if let Some(task) = self.task.lock().await.take()
            && let Err(e) = task.await
        {
            error!(target: "Call/Controller", "Controller task for {} failed: {e}", self.local_peer);
        }
    }

    async fn intent(&self, intent: Intent) {
        if let Err(e) = self.command(ControllerCommand::Intent(intent)).await {
            warn!(target: "Call/Controller", "Dropping intent for {}: {e}", self.local_peer);
        }
    }

    async fn command(&self, command: ControllerCommand) -> Result<(), CallError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| CallError::Stopped)
    }
}

/// Assembles a [`CallController`] from its components.
#[derive(Default)]
pub struct CallControllerBuilder {
    config: CallControllerConfig,
    signaling: Option<(Arc<dyn SignalingChannel>, mpsc::Receiver<ChannelEvent>)>,
    devices: Option<Arc<dyn MediaDevices>>,
    transports: Option<Arc<dyn MediaTransportFactory>>,
    event_bus: CallEventBus,
}

impl CallControllerBuilder {
    pub fn with_config(mut self, config: CallControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_signaling(
        mut self,
        channel: Arc<dyn SignalingChannel>,
        events: mpsc::Receiver<ChannelEvent>,
    ) -> Self {
        self.signaling = Some((channel, events));
        self
    }

    /// Open the signaling channel through `connector`.
    pub async fn connect(self, connector: &dyn SignalingConnector) -> Result<Self, CallError> {
        let (channel, events) = connector.connect().await?;
        Ok(self.with_signaling(channel, events))
    }

    pub fn with_devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn with_transport_factory(mut self, transports: Arc<dyn MediaTransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    pub fn with_event_handler(self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_bus.add_handler(handler);
        self
    }

    /// Spawn the controller actor. Requires a tokio runtime.
    pub fn spawn(self) -> Result<CallController, CallError> {
        let (channel, channel_rx) = self
            .signaling
            .ok_or(CallError::MissingComponent("signaling channel"))?;
        let devices = self
            .devices
            .ok_or(CallError::MissingComponent("media devices"))?;
        let transports = self
            .transports
            .ok_or(CallError::MissingComponent("media transport factory"))?;

        let local_peer = self.config.local_peer.clone();
        let machine = CallStateMachine::new(local_peer.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        let (command_tx, command_rx) = mpsc::channel(self.config.command_capacity.max(1));
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let actor = CallActor {
            config: self.config,
            machine,
            channel,
            channel_rx,
            channel_open: true,
            command_rx,
            devices,
            transports,
            session_tx,
            session_rx,
            outcome_tx,
            outcome_rx,
            negotiator: None,
            media: None,
            in_flight: Arc::new(DashMap::new()),
            snapshot_tx,
            event_bus: self.event_bus.clone(),
        };
        let task = tokio::spawn(actor.run());

        Ok(CallController {
            local_peer,
            command_tx,
            snapshot_rx,
            event_bus: self.event_bus,
            task: Mutex::new(Some(task)),
        })
    }
}

struct CallActor {
    config: CallControllerConfig,
    machine: CallStateMachine,

    channel: Arc<dyn SignalingChannel>,
    channel_rx: mpsc::Receiver<ChannelEvent>,
    channel_open: bool,
    command_rx: mpsc::Receiver<ControllerCommand>,

    devices: Arc<dyn MediaDevices>,
    transports: Arc<dyn MediaTransportFactory>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    outcome_tx: mpsc::UnboundedSender<OpOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<OpOutcome>,

    negotiator: Option<Arc<dyn SessionNegotiator>>,
    media: Option<LocalMedia>,
    in_flight: Arc<DashMap<OpId, AbortHandle>>,

    snapshot_tx: watch::Sender<CallSnapshot>,
    event_bus: CallEventBus,
}

impl CallActor {
    async fn run(mut self) {
        info!(target: "Call/Controller", "Controller for {} started", self.machine.local_peer());

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(ControllerCommand::Intent(intent)) => {
                        debug!(target: "Call/Controller", "Intent {intent:?}");
                        self.process(CallInput::Intent(intent)).await;
                    }
                    Some(ControllerCommand::Shutdown) | None => break,
                },
                event = self.channel_rx.recv(), if self.channel_open => match event {
                    Some(ChannelEvent::Connected) => {
                        debug!(target: "Call/Controller", "Signaling channel connected");
                    }
                    Some(ChannelEvent::Message(message)) => {
                        self.process(CallInput::Signal(message)).await;
                    }
                    Some(ChannelEvent::Closed) | None => {
                        warn!(target: "Call/Controller", "Signaling channel closed");
                        self.channel_open = false;
                        self.process(CallInput::ChannelClosed).await;
                    }
                },
                Some(event) = self.session_rx.recv() => {
                    self.process(session_input(event)).await;
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.complete(outcome).await;
                }
            }
        }

        self.stop().await;
        info!(target: "Call/Controller", "Controller for {} stopped", self.machine.local_peer());
    }

    async fn stop(&mut self) {
        if self.machine.state().is_active() {
            self.process(CallInput::Intent(Intent::End)).await;
        }
        for entry in self.in_flight.iter() {
            entry.value().abort();
        }
        self.in_flight.clear();
        self.tear_down().await;
        self.channel.close().await;
    }

    async fn process(&mut self, input: CallInput) {
        let effects = self.machine.handle(input);
        self.run_effects(effects).await;
    }

    /// Feed a finished operation back to the machine. Media acquired by an
    /// operation the machine no longer wants is released here.
    async fn complete(&mut self, outcome: OpOutcome) {
        let OpOutcome {
            session_id,
            op,
            result,
            media,
        } = outcome;
        self.in_flight.remove(&op);
        debug!(target: "Call/Controller", "Operation {op:?} for {session_id} completed");

        let effects = self.machine.handle(CallInput::OperationCompleted {
            session_id: session_id.clone(),
            op,
            result,
        });

        if let Some(media) = media {
            let wanted = self.machine.state().is_active()
                && self.machine.active_session_id() == Some(&session_id)
                && self.media.is_none();
            if wanted {
                self.media = Some(media);
            } else {
                debug!(target: "Call/Controller", "Releasing media of discarded operation {op:?}");
                drop(media);
            }
        }

        self.run_effects(effects).await;
    }

    async fn run_effects(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            if let Some(input) = self.execute(effect).await {
                queue.extend(self.machine.handle(input));
            }
        }
    }

    /// Execute one effect. A failure that the machine must hear about is
    /// returned as a follow-up input.
    async fn execute(&mut self, effect: Effect) -> Option<CallInput> {
        match effect {
            Effect::Send(message) => self.send(message).await,
            Effect::OpenSession {
                session_id,
                direction,
            } => {
                self.tear_down().await;
                match open_negotiator(
                    &self.config,
                    &session_id,
                    self.transports.as_ref(),
                    self.session_tx.clone(),
                )
                .await
                {
                    Ok(negotiator) => {
                        info!(target: "Call/Controller", "Opened {direction:?} session {session_id}");
                        self.negotiator = Some(negotiator);
                        None
                    }
                    Err(e) => {
                        error!(target: "Call/Controller", "Failed to open transport for {session_id}: {e}");
                        Some(CallInput::TransportFailed {
                            session_id,
                            reason: e.to_string(),
                        })
                    }
                }
            }
            Effect::Begin {
                session_id,
                op,
                operation,
            } => self.begin(session_id, op, operation),
            Effect::Cancel { op } => {
                if let Some((_, handle)) = self.in_flight.remove(&op) {
                    debug!(target: "Call/Controller", "Cancelling operation {op:?}");
                    handle.abort();
                }
                None
            }
            Effect::AddRemoteCandidate {
                session_id,
                candidate,
            } => {
                match self.negotiator_for(&session_id) {
                    Some(negotiator) => negotiator.add_remote_candidate(candidate).await,
                    None => debug!(target: "Call/Controller", "No negotiator for candidate on {session_id}"),
                }
                None
            }
            Effect::SetTrackEnabled {
                session_id,
                kind,
                enabled,
            } => {
                if let Some(media) = &self.media
                    && !media.set_enabled(kind, enabled)
                {
                    debug!(target: "Call/Controller", "No local {kind} track to toggle");
                }
                if let Some(negotiator) = self.negotiator_for(&session_id) {
                    negotiator.set_track_enabled(kind, enabled).await;
                }
                None
            }
            Effect::TearDown { session_id } => {
                debug!(target: "Call/Controller", "Tearing down session {session_id}");
                self.tear_down().await;
                None
            }
            Effect::Notify(snapshot) => {
                self.notify(snapshot);
                None
            }
        }
    }

    async fn send(&mut self, message: SignalingMessage) -> Option<CallInput> {
        if !self.channel_open {
            debug!(target: "Call/Controller", "Not sending {} on closed channel", message.kind);
            return Some(CallInput::ChannelClosed);
        }
        match self.channel.send(&message).await {
            Ok(()) => None,
            Err(e) => {
                error!(target: "Call/Controller", "Failed to send {}: {e}", message.kind);
                self.channel_open = false;
                Some(CallInput::ChannelClosed)
            }
        }
    }

    fn begin(&mut self, session_id: SessionId, op: OpId, operation: Operation) -> Option<CallInput> {
        let Some(negotiator) = self.negotiator_for(&session_id) else {
            warn!(target: "Call/Controller", "No negotiator for {} on {session_id}", operation.name());
            return Some(CallInput::OperationCompleted {
                session_id,
                op,
                result: OperationResult::Failed(OperationFailure::Negotiation(
                    NegotiationError::Closed,
                )),
            });
        };

        debug!(target: "Call/Controller", "Starting {} as {op:?} for {session_id}", operation.name());
        let devices = self.devices.clone();
        let outcome_tx = self.outcome_tx.clone();
        let in_flight = self.in_flight.clone();
        let task = tokio::spawn(async move {
            let _guard = scopeguard::guard(in_flight, move |in_flight| {
                in_flight.remove(&op);
            });
            let (result, media) = run_operation(devices.as_ref(), negotiator.as_ref(), operation).await;
            let _ = outcome_tx.send(OpOutcome {
                session_id,
                op,
                result,
                media,
            });
        });
        self.in_flight.insert(op, task.abort_handle());
        None
    }

    fn negotiator_for(&self, session_id: &SessionId) -> Option<Arc<dyn SessionNegotiator>> {
        self.negotiator
            .as_ref()
            .filter(|n| n.session_id() == session_id)
            .cloned()
    }

    async fn tear_down(&mut self) {
        if let Some(negotiator) = self.negotiator.take() {
            negotiator.close().await;
        }
        if let Some(mut media) = self.media.take() {
            media.release();
        }
    }

    fn notify(&self, snapshot: CallSnapshot) {
        let previous = self.snapshot_tx.send_replace(snapshot.clone());
        if previous.state != snapshot.state {
            info!(
                target: "Call/Controller",
                "{} -> {} ({})",
                previous.state,
                snapshot.state,
                snapshot.status_line()
            );
        }
        for event in CallEvent::from_snapshot(&snapshot, &previous) {
            self.event_bus.dispatch(&event);
        }
    }
}

fn session_input(event: SessionEvent) -> CallInput {
    let SessionEvent { session_id, event } = event;
    match event {
        NegotiatorEvent::LocalCandidate(candidate) => CallInput::LocalCandidate {
            session_id,
            candidate,
        },
        NegotiatorEvent::RemoteTrack { kind, active } => CallInput::RemoteTrack {
            session_id,
            kind,
            active,
        },
        NegotiatorEvent::TransportFailed(reason) => CallInput::TransportFailed { session_id, reason },
    }
}

/// Run one negotiator operation. Offer and answer acquire local media first;
/// on failure the media is dropped and so released.
async fn run_operation(
    devices: &dyn MediaDevices,
    negotiator: &dyn SessionNegotiator,
    operation: Operation,
) -> (OperationResult, Option<LocalMedia>) {
    let failed = |failure| (OperationResult::Failed(failure), None);
    match operation {
        Operation::CreateOffer { constraints } => {
            let media = match LocalMedia::acquire(devices, constraints).await {
                Ok(media) => media,
                Err(e) => return failed(OperationFailure::Device(e)),
            };
            match negotiator.create_offer(&media).await {
                Ok(description) => (
                    OperationResult::OfferCreated {
                        description,
                        local_kinds: media.kinds(),
                    },
                    Some(media),
                ),
                Err(e) => failed(OperationFailure::Negotiation(e)),
            }
        }
        Operation::CreateAnswer {
            constraints,
            remote_offer,
        } => {
            let media = match LocalMedia::acquire(devices, constraints).await {
                Ok(media) => media,
                Err(e) => return failed(OperationFailure::Device(e)),
            };
            match negotiator.create_answer(&media, &remote_offer).await {
                Ok(description) => (
                    OperationResult::AnswerCreated {
                        description,
                        local_kinds: media.kinds(),
                    },
                    Some(media),
                ),
                Err(e) => failed(OperationFailure::Negotiation(e)),
            }
        }
        Operation::ApplyRemoteDescription { description } => {
            match negotiator.apply_remote_description(&description).await {
                Ok(()) => (OperationResult::RemoteDescriptionApplied, None),
                Err(e) => failed(OperationFailure::Negotiation(e)),
            }
        }
    }
}
