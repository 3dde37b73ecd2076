//! Inputs and outputs of the reactive loop.
//!
//! Everything the controller reacts to is a [`PhoneEvent`]; everything it wants
//! done is an [`Action`]. Asynchronous completions carry the session or channel
//! identity they were issued for so stale ones can be dropped.

use crate::peer::audio::{LocalAudio, RemoteAudio};
use crate::peer::types::{IceCandidate, PeerConnectionState, SessionDescription};
use crate::session::{SessionId, UserId};
use crate::signaling::SignalingEnvelope;
use chrono::{DateTime, Utc};

/// Monotonic counter identifying one relay connection attempt.
pub type ChannelGeneration = u64;

#[derive(Debug, Clone)]
pub enum PhoneEvent {
    // user actions
    Register(UserId),
    Call(UserId),
    Answer,
    Reject,
    Hangup,

    // relay channel
    ChannelOpened {
        generation: ChannelGeneration,
    },
    ChannelError {
        generation: ChannelGeneration,
        error: String,
    },
    ChannelClosed {
        generation: ChannelGeneration,
        reason: Option<String>,
    },
    Signal {
        generation: ChannelGeneration,
        envelope: SignalingEnvelope,
    },

    // real-time session completions
    Media {
        session: SessionId,
        event: MediaEvent,
    },

    Tick(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// Local audio acquired and peer session created.
    PeerReady(LocalAudio),
    AudioFailed(String),
    OfferCreated(SessionDescription),
    AnswerCreated(SessionDescription),
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteAudio),
    ConnectionState(PeerConnectionState),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenChannel { generation: ChannelGeneration },
    Send(SignalingEnvelope),
    Media {
        session: SessionId,
        command: MediaCommand,
    },
    Ui(UiEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaCommand {
    /// Acquire local audio and create the peer session.
    Prepare,
    CreateOffer,
    /// Apply the remote offer and produce an answer.
    AcceptOffer(SessionDescription),
    ApplyAnswer(SessionDescription),
    AddCandidate(IceCandidate),
    /// Close the peer session and stop local capture.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Connected,
    Calling,
    InCall,
    Disconnected,
}

/// Output sink for a front end.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Status { text: String, kind: StatusKind },
    Registered { user_id: UserId },
    IncomingCall { from: UserId },
    CallActive { peer: UserId },
    CallDuration(String),
    /// Capture of the active call; the front end feeds it encoded frames.
    LocalAudio(LocalAudio),
    /// Audio from the peer, ready to be played.
    RemoteAudio(RemoteAudio),
    CallEnded,
    CallFailed { reason: String },
    Disconnected,
    Alert(String),
}

impl UiEvent {
    pub fn status(text: impl Into<String>, kind: StatusKind) -> Self {
        Self::Status {
            text: text.into(),
            kind,
        }
    }
}
