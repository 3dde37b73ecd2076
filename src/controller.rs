//! Call session state machine.
//!
//! [`handle_event`] is the only way state changes: it takes the current
//! [`ControllerState`] and one [`PhoneEvent`] and returns the [`Action`]s the
//! runtime must perform. It never performs I/O, so a whole call can be driven
//! from a test by feeding synthetic events.

use crate::error::PhoneError;
use crate::events::{
    Action, ChannelGeneration, MediaCommand, MediaEvent, PhoneEvent, StatusKind, UiEvent,
};
use crate::peer::types::{IceCandidate, PeerConnectionState, SessionDescription};
use crate::session::{Role, Session, SessionId, UserId};
use crate::signaling::SignalingEnvelope;
use crate::utils::{format_duration, generate_session_id};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::VecDeque;

/// Most signaling items kept per kind while no session exists; the oldest go first.
const EARLY_LIMIT: usize = 64;
/// How many ended session ids are remembered so their stragglers can be dropped.
const ENDED_LIMIT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneState {
    Unregistered,
    Registering,
    Registered,
    /// Outgoing call pending.
    Calling,
    /// Incoming call pending.
    Ringing,
    InCall,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct ControllerState {
    state: PhoneState,
    user_id: Option<UserId>,
    session: Option<Session>,
    generation: ChannelGeneration,
    // offers and candidates that reached us before their `incoming_call`
    early_offers: Vec<(SessionId, SessionDescription)>,
    early_candidates: Vec<(SessionId, IceCandidate)>,
    ended: VecDeque<SessionId>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerState {
    pub fn new() -> Self {
        Self {
            state: PhoneState::Unregistered,
            user_id: None,
            session: None,
            generation: 0,
            early_offers: Vec::new(),
            early_candidates: Vec::new(),
            ended: VecDeque::new(),
        }
    }

    pub fn state(&self) -> PhoneState {
        self.state
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn generation(&self) -> ChannelGeneration {
        self.generation
    }

    /// Offers and candidates buffered while no session exists yet.
    pub fn early_buffered(&self) -> usize {
        self.early_offers.len() + self.early_candidates.len()
    }

    fn is_current(&self, id: &SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| &s.id == id)
    }

    fn matches_optional(&self, id: Option<&SessionId>) -> bool {
        match id {
            Some(id) => self.is_current(id),
            None => self.session.is_some(),
        }
    }

    fn connected_status(&self) -> UiEvent {
        UiEvent::status(
            format!("Connected as {}", self.user_id.as_deref().unwrap_or_default()),
            StatusKind::Connected,
        )
    }

    fn validate_register(&self, id: &str) -> Result<(), PhoneError> {
        match self.state {
            PhoneState::Unregistered | PhoneState::Disconnected => {}
            _ => return Err(PhoneError::AlreadyRegistered),
        }
        if id.is_empty() {
            return Err(PhoneError::EmptyUserId);
        }
        Ok(())
    }

    fn validate_call(&self, dest: &str) -> Result<(), PhoneError> {
        match self.state {
            PhoneState::Registered if self.session.is_none() => {}
            PhoneState::Calling | PhoneState::Ringing | PhoneState::InCall => {
                return Err(PhoneError::Busy)
            }
            _ => return Err(PhoneError::NotRegistered),
        }
        if dest.is_empty() {
            return Err(PhoneError::EmptyDestination);
        }
        if self.user_id.as_deref() == Some(dest) {
            return Err(PhoneError::SelfCall);
        }
        Ok(())
    }

    fn clear_early(&mut self) {
        self.early_offers.clear();
        self.early_candidates.clear();
    }

    /// Whether early traffic for `id` may be buffered.
    fn accepts_early(&self, id: &SessionId) -> bool {
        self.state == PhoneState::Registered && self.session.is_none() && !self.ended.contains(id)
    }

    fn mark_ended(&mut self, id: SessionId) {
        self.early_offers.retain(|(early, _)| early != &id);
        self.early_candidates.retain(|(early, _)| early != &id);
        if !self.ended.contains(&id) {
            self.ended.push_back(id);
            if self.ended.len() > ENDED_LIMIT {
                self.ended.pop_front();
            }
        }
    }

    /// Discards the session and returns to `next`. Owed media is released and the
    /// peer is told only when `notify_peer` is set.
    fn end_session(&mut self, next: PhoneState, notify_peer: bool, out: &mut Vec<Action>) {
        if let Some(session) = self.session.take() {
            if notify_peer {
                out.push(Action::Send(SignalingEnvelope::Hangup {
                    session_id: session.id.clone(),
                }));
            }
            if session.media_requested {
                out.push(Action::Media {
                    session: session.id.clone(),
                    command: MediaCommand::Release,
                });
            }
            info!("Session {} with {} discarded", session.id, session.peer);
            self.mark_ended(session.id);
        }
        self.clear_early();
        self.state = next;
    }

    fn enter_in_call(&mut self, out: &mut Vec<Action>) {
        self.state = PhoneState::InCall;
        if let Some(session) = self.session.as_mut() {
            if !session.is_active() {
                session.started_at = Some(Utc::now());
            }
            out.push(Action::Ui(UiEvent::status("In call", StatusKind::InCall)));
            out.push(Action::Ui(UiEvent::CallActive {
                peer: session.peer.clone(),
            }));
        }
    }
}

/// Applies one event and returns what the runtime has to do about it.
pub fn handle_event(state: &mut ControllerState, event: PhoneEvent) -> Vec<Action> {
    let mut out = Vec::new();
    match event {
        PhoneEvent::Register(id) => on_register(state, id, &mut out),
        PhoneEvent::Call(dest) => on_call(state, dest, &mut out),
        PhoneEvent::Answer => on_answer(state, &mut out),
        PhoneEvent::Reject => on_reject(state, &mut out),
        PhoneEvent::Hangup => on_hangup(state, &mut out),

        PhoneEvent::ChannelOpened { generation } => {
            if generation == state.generation {
                debug!("Signaling channel {generation} open, waiting for registration ack");
            }
        }
        PhoneEvent::ChannelError { generation, error } => {
            if generation == state.generation {
                warn!("Signaling channel error: {error}");
                out.push(Action::Ui(UiEvent::status(
                    "Connection failed",
                    StatusKind::Disconnected,
                )));
            }
        }
        PhoneEvent::ChannelClosed { generation, reason } => {
            if generation != state.generation {
                debug!("Ignoring close of superseded channel {generation}");
            } else if !matches!(
                state.state,
                PhoneState::Unregistered | PhoneState::Disconnected
            ) {
                info!("Signaling channel closed: {}", reason.as_deref().unwrap_or("no reason"));
                state.end_session(PhoneState::Disconnected, false, &mut out);
                out.push(Action::Ui(UiEvent::status(
                    "Disconnected",
                    StatusKind::Disconnected,
                )));
                out.push(Action::Ui(UiEvent::Disconnected));
            }
        }
        PhoneEvent::Signal {
            generation,
            envelope,
        } => {
            if generation == state.generation {
                on_signal(state, envelope, &mut out);
            } else {
                debug!("Dropping {} from superseded channel", envelope.kind());
            }
        }

        PhoneEvent::Media { session, event } => {
            if state.is_current(&session) {
                on_media(state, event, &mut out);
            } else {
                debug!("Discarding late media completion for {session}: {event:?}");
            }
        }

        PhoneEvent::Tick(now) => {
            if state.state == PhoneState::InCall {
                if let Some(elapsed) = state.session.as_ref().and_then(|s| s.elapsed(now)) {
                    out.push(Action::Ui(UiEvent::CallDuration(format_duration(elapsed))));
                }
            }
        }
    }
    out
}

fn alert(err: PhoneError, out: &mut Vec<Action>) {
    debug!("Rejected user action: {err}");
    out.push(Action::Ui(UiEvent::Alert(err.to_string())));
}

fn on_register(state: &mut ControllerState, id: UserId, out: &mut Vec<Action>) {
    let id = id.trim().to_string();
    if let Err(err) = state.validate_register(&id) {
        return alert(err, out);
    }

    state.user_id = Some(id.clone());
    state.generation += 1;
    state.state = PhoneState::Registering;
    info!("Registering as {id} on channel {}", state.generation);

    out.push(Action::Ui(UiEvent::status("Connecting...", StatusKind::Calling)));
    out.push(Action::OpenChannel {
        generation: state.generation,
    });
    out.push(Action::Send(SignalingEnvelope::Register { user_id: id }));
}

fn on_call(state: &mut ControllerState, dest: UserId, out: &mut Vec<Action>) {
    let dest = dest.trim().to_string();
    if let Err(err) = state.validate_call(&dest) {
        return alert(err, out);
    }

    let mut session = Session::outgoing(generate_session_id(), dest);
    session.media_requested = true;
    info!("Calling {} in session {}", session.peer, session.id);

    state.clear_early();
    state.state = PhoneState::Calling;
    out.push(Action::Ui(UiEvent::status("Calling...", StatusKind::Calling)));
    out.push(Action::Media {
        session: session.id.clone(),
        command: MediaCommand::Prepare,
    });
    state.session = Some(session);
}

fn on_answer(state: &mut ControllerState, out: &mut Vec<Action>) {
    if state.state != PhoneState::Ringing {
        return alert(PhoneError::NoIncomingCall, out);
    }
    let Some(from) = state.user_id.clone() else {
        return alert(PhoneError::NotRegistered, out);
    };
    let Some(session) = state.session.as_mut() else {
        return alert(PhoneError::NoIncomingCall, out);
    };

    session.media_requested = true;
    let id = session.id.clone();
    info!("Answering session {id}");
    out.push(Action::Send(SignalingEnvelope::Answer {
        session_id: id.clone(),
        from,
    }));
    out.push(Action::Media {
        session: id,
        command: MediaCommand::Prepare,
    });
    state.enter_in_call(out);
}

fn on_reject(state: &mut ControllerState, out: &mut Vec<Action>) {
    if state.state != PhoneState::Ringing {
        return alert(PhoneError::NoIncomingCall, out);
    }
    info!("Rejecting incoming call");
    state.end_session(PhoneState::Registered, true, out);
    out.push(Action::Ui(UiEvent::CallEnded));
    out.push(Action::Ui(state.connected_status()));
}

fn on_hangup(state: &mut ControllerState, out: &mut Vec<Action>) {
    match state.state {
        PhoneState::Ringing => on_reject(state, out),
        PhoneState::Calling | PhoneState::InCall => {
            info!("Hanging up");
            state.end_session(PhoneState::Registered, true, out);
            out.push(Action::Ui(UiEvent::CallEnded));
            out.push(Action::Ui(state.connected_status()));
        }
        _ => debug!("Hangup with no call in progress"),
    }
}

fn on_signal(state: &mut ControllerState, envelope: SignalingEnvelope, out: &mut Vec<Action>) {
    debug!("Signaling message: {}", envelope.kind());
    match envelope {
        SignalingEnvelope::Registered { .. } => {
            if state.state == PhoneState::Registering {
                state.state = PhoneState::Registered;
                let user_id = state.user_id.clone().unwrap_or_default();
                info!("Registered as {user_id}");
                out.push(Action::Ui(state.connected_status()));
                out.push(Action::Ui(UiEvent::Registered { user_id }));
            }
        }

        SignalingEnvelope::IncomingCall { session_id, from } => {
            on_incoming_call(state, session_id, from, out)
        }

        SignalingEnvelope::Ringing { session_id } => {
            if state.state == PhoneState::Calling && state.matches_optional(session_id.as_ref()) {
                out.push(Action::Ui(UiEvent::status("Ringing...", StatusKind::Calling)));
            }
        }

        SignalingEnvelope::CallAnswered { session_id } => {
            if state.state == PhoneState::Calling && state.matches_optional(session_id.as_ref()) {
                out.push(Action::Ui(UiEvent::status("Call answered", StatusKind::InCall)));
            }
        }

        SignalingEnvelope::SdpAnswer {
            session_id, sdp, ..
        } => {
            if !state.is_current(&session_id) {
                return;
            }
            if !matches!(state.state, PhoneState::Calling | PhoneState::InCall) {
                return;
            }
            let Some(session) = state.session.as_mut() else {
                return;
            };
            if session.role != Role::Initiator || session.answer_applied {
                debug!("Ignoring unexpected sdp_answer for {session_id}");
                return;
            }
            session.answer_applied = true;
            out.push(Action::Media {
                session: session_id,
                command: MediaCommand::ApplyAnswer(sdp),
            });
            if state.state == PhoneState::Calling {
                state.enter_in_call(out);
            }
        }

        SignalingEnvelope::SdpOffer {
            session_id, sdp, ..
        } => on_remote_offer(state, session_id, sdp, out),

        SignalingEnvelope::IceCandidate {
            session_id,
            candidate,
            ..
        } => on_remote_candidate(state, session_id, candidate, out),

        SignalingEnvelope::CallEnded { session_id }
        | SignalingEnvelope::Hangup { session_id } => {
            if state.is_current(&session_id) {
                info!("Call {session_id} ended by peer");
                state.end_session(PhoneState::Registered, false, out);
                out.push(Action::Ui(UiEvent::CallEnded));
                out.push(Action::Ui(state.connected_status()));
            } else {
                state.mark_ended(session_id);
            }
        }

        SignalingEnvelope::CallFailed { session_id, reason } => {
            if state.state == PhoneState::Calling && state.matches_optional(session_id.as_ref()) {
                warn!("Call failed: {reason}");
                state.end_session(PhoneState::Registered, false, out);
                out.push(Action::Ui(UiEvent::CallFailed { reason }));
                out.push(Action::Ui(state.connected_status()));
            }
        }

        other @ (SignalingEnvelope::Register { .. }
        | SignalingEnvelope::Call { .. }
        | SignalingEnvelope::Answer { .. }) => {
            warn!("Unexpected client-bound message {}", other.kind());
        }
    }
}

fn on_incoming_call(
    state: &mut ControllerState,
    session_id: SessionId,
    from: UserId,
    out: &mut Vec<Action>,
) {
    if state.is_current(&session_id) {
        debug!("Duplicate incoming_call for {session_id}");
        return;
    }
    match state.state {
        PhoneState::Registered if state.session.is_none() => {}
        PhoneState::Calling | PhoneState::Ringing | PhoneState::InCall => {
            info!("Busy, rejecting incoming call {session_id} from {from}");
            state.mark_ended(session_id.clone());
            out.push(Action::Send(SignalingEnvelope::Hangup { session_id }));
            return;
        }
        _ => {
            debug!("Ignoring incoming_call while {:?}", state.state);
            return;
        }
    }

    let mut session = Session::incoming(session_id, from.clone());
    session.remote_offer = std::mem::take(&mut state.early_offers)
        .into_iter()
        .find(|(id, _)| id == &session.id)
        .map(|(_, sdp)| sdp);
    let early = std::mem::take(&mut state.early_candidates);
    session.pending_remote = early
        .into_iter()
        .filter(|(id, _)| id == &session.id)
        .map(|(_, c)| c)
        .collect();
    info!(
        "Incoming call {} from {from} ({} early candidates)",
        session.id,
        session.pending_remote.len()
    );

    state.session = Some(session);
    state.state = PhoneState::Ringing;
    out.push(Action::Ui(UiEvent::status(
        format!("Incoming call from {from}"),
        StatusKind::Calling,
    )));
    out.push(Action::Ui(UiEvent::IncomingCall { from }));
}

fn on_remote_offer(
    state: &mut ControllerState,
    session_id: SessionId,
    sdp: SessionDescription,
    out: &mut Vec<Action>,
) {
    if state.session.is_none() {
        if state.accepts_early(&session_id) {
            state.early_offers.retain(|(id, _)| id != &session_id);
            state.early_offers.push((session_id, sdp));
            trim_oldest(&mut state.early_offers);
        } else {
            debug!("Dropping offer for {session_id}");
        }
        return;
    }
    if !state.is_current(&session_id) {
        debug!("Ignoring offer for foreign session {session_id}");
        return;
    }
    let Some(session) = state.session.as_mut() else {
        return;
    };
    if session.role != Role::Responder || session.offer_applied {
        debug!("Ignoring unexpected sdp_offer for {session_id}");
        return;
    }
    if session.peer_ready {
        session.offer_applied = true;
        out.push(Action::Media {
            session: session_id,
            command: MediaCommand::AcceptOffer(sdp),
        });
    } else {
        session.remote_offer = Some(sdp);
    }
}

fn on_remote_candidate(
    state: &mut ControllerState,
    session_id: SessionId,
    candidate: IceCandidate,
    out: &mut Vec<Action>,
) {
    match state.session.as_mut() {
        None => {
            if state.accepts_early(&session_id) {
                state.early_candidates.push((session_id, candidate));
                trim_oldest(&mut state.early_candidates);
            } else {
                debug!("Dropping candidate for {session_id}");
            }
        }
        Some(session) if session.id == session_id => {
            if session.peer_ready {
                out.push(Action::Media {
                    session: session_id,
                    command: MediaCommand::AddCandidate(candidate),
                });
            } else {
                session.pending_remote.push(candidate);
            }
        }
        Some(_) => debug!("Ignoring candidate for foreign session {session_id}"),
    }
}

fn trim_oldest<T>(items: &mut Vec<T>) {
    if items.len() > EARLY_LIMIT {
        let excess = items.len() - EARLY_LIMIT;
        items.drain(..excess);
    }
}

fn on_media(state: &mut ControllerState, event: MediaEvent, out: &mut Vec<Action>) {
    let Some(user_id) = state.user_id.clone() else {
        return;
    };
    let Some(session) = state.session.as_mut() else {
        return;
    };
    let id = session.id.clone();

    match event {
        MediaEvent::PeerReady(audio) => {
            session.peer_ready = true;
            out.push(Action::Ui(UiEvent::LocalAudio(audio)));
            match session.role {
                Role::Initiator => out.push(Action::Media {
                    session: id.clone(),
                    command: MediaCommand::CreateOffer,
                }),
                Role::Responder => {
                    if let Some(offer) = session.remote_offer.take() {
                        session.offer_applied = true;
                        out.push(Action::Media {
                            session: id.clone(),
                            command: MediaCommand::AcceptOffer(offer),
                        });
                    }
                }
            }
            for candidate in session.pending_remote.drain(..) {
                out.push(Action::Media {
                    session: id.clone(),
                    command: MediaCommand::AddCandidate(candidate),
                });
            }
        }

        MediaEvent::OfferCreated(sdp) => {
            if session.role != Role::Initiator || session.offer_sent {
                return;
            }
            session.offer_sent = true;
            out.push(Action::Send(SignalingEnvelope::SdpOffer {
                session_id: id.clone(),
                dest: session.peer.clone(),
                from: user_id.clone(),
                sdp,
            }));
            out.push(Action::Send(SignalingEnvelope::Call {
                session_id: id.clone(),
                dest: session.peer.clone(),
                from: user_id,
            }));
            for candidate in session.pending_local.drain(..) {
                out.push(Action::Send(SignalingEnvelope::IceCandidate {
                    session_id: id.clone(),
                    dest: session.peer.clone(),
                    candidate,
                }));
            }
        }

        MediaEvent::AnswerCreated(sdp) => {
            if session.role == Role::Responder {
                out.push(Action::Send(SignalingEnvelope::SdpAnswer {
                    session_id: id,
                    dest: session.peer.clone(),
                    sdp,
                }));
            }
        }

        MediaEvent::LocalCandidate(candidate) => {
            if session.role == Role::Initiator && !session.offer_sent {
                session.pending_local.push(candidate);
            } else {
                out.push(Action::Send(SignalingEnvelope::IceCandidate {
                    session_id: id,
                    dest: session.peer.clone(),
                    candidate,
                }));
            }
        }

        MediaEvent::RemoteTrack(remote) => out.push(Action::Ui(UiEvent::RemoteAudio(remote))),

        MediaEvent::ConnectionState(PeerConnectionState::Connected) => {
            if state.state == PhoneState::Calling {
                state.enter_in_call(out);
            } else {
                out.push(Action::Ui(UiEvent::status("In call", StatusKind::InCall)));
            }
        }
        MediaEvent::ConnectionState(PeerConnectionState::Failed) => {
            warn!("Peer connection failed for {id}");
            out.push(Action::Ui(UiEvent::status(
                "Connection problem",
                StatusKind::Calling,
            )));
        }
        MediaEvent::ConnectionState(other) => debug!("Peer connection {id} is {other:?}"),

        MediaEvent::AudioFailed(reason) | MediaEvent::Failed(reason) => {
            warn!("Media setup failed for {id}: {reason}");
            let announced = session.role == Role::Responder || session.offer_sent;
            state.end_session(PhoneState::Registered, announced, out);
            out.push(Action::Ui(UiEvent::Alert(reason)));
            out.push(Action::Ui(UiEvent::CallEnded));
            out.push(Action::Ui(state.connected_status()));
        }
    }
}
