use crate::error::{PhoneError, Result};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::session::{SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Messages exchanged with the relay, tagged by `type`.
///
/// `register`, `call`, `answer`, `hangup`, `sdp_*` and `ice_candidate` are sent by
/// clients; the relay answers with `registered`, `incoming_call`, `ringing`,
/// `call_answered`, `call_ended` and `call_failed`, and forwards `sdp_*` and
/// `ice_candidate` verbatim to `dest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingEnvelope {
    Register {
        user_id: UserId,
    },
    Registered {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    Call {
        session_id: SessionId,
        dest: UserId,
        from: UserId,
    },
    IncomingCall {
        session_id: SessionId,
        from: UserId,
    },
    Ringing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    Answer {
        session_id: SessionId,
        from: UserId,
    },
    CallAnswered {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    CallEnded {
        session_id: SessionId,
    },
    CallFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        #[serde(default)]
        reason: String,
    },
    Hangup {
        session_id: SessionId,
    },
    SdpOffer {
        session_id: SessionId,
        dest: UserId,
        from: UserId,
        sdp: SessionDescription,
    },
    SdpAnswer {
        session_id: SessionId,
        dest: UserId,
        sdp: SessionDescription,
    },
    IceCandidate {
        session_id: SessionId,
        dest: UserId,
        candidate: IceCandidate,
    },
}

impl SignalingEnvelope {
    /// Wire name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Registered { .. } => "registered",
            Self::Call { .. } => "call",
            Self::IncomingCall { .. } => "incoming_call",
            Self::Ringing { .. } => "ringing",
            Self::Answer { .. } => "answer",
            Self::CallAnswered { .. } => "call_answered",
            Self::CallEnded { .. } => "call_ended",
            Self::CallFailed { .. } => "call_failed",
            Self::Hangup { .. } => "hangup",
            Self::SdpOffer { .. } => "sdp_offer",
            Self::SdpAnswer { .. } => "sdp_answer",
            Self::IceCandidate { .. } => "ice_candidate",
        }
    }
}

pub fn encode(envelope: &SignalingEnvelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parses one inbound frame. Unknown types and missing fields are `Malformed`.
pub fn decode(text: &str) -> Result<SignalingEnvelope> {
    serde_json::from_str(text).map_err(|e| PhoneError::Malformed(e.to_string()))
}
