use crate::peer::types::{IceCandidate, SessionDescription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registered identity; unique per connection on the relay.
pub type UserId = String;

/// Opaque call token chosen by the caller and echoed in every message of the call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// One call attempt or active call.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub peer: UserId,
    pub role: Role,
    /// Set when the call becomes active.
    pub started_at: Option<DateTime<Utc>>,
    /// Media preparation has been requested, so a release is owed on teardown.
    pub media_requested: bool,
    pub peer_ready: bool,
    /// Initiator: `sdp_offer` and `call` have gone out.
    pub offer_sent: bool,
    pub answer_applied: bool,
    /// Responder: remote offer waiting for the peer session to exist.
    pub remote_offer: Option<SessionDescription>,
    pub offer_applied: bool,
    /// Remote candidates waiting for the peer session to exist, in receipt order.
    pub pending_remote: Vec<IceCandidate>,
    /// Initiator: local candidates held until the offer is sent.
    pub pending_local: Vec<IceCandidate>,
}

impl Session {
    fn new(id: SessionId, peer: UserId, role: Role) -> Self {
        Self {
            id,
            peer,
            role,
            started_at: None,
            media_requested: false,
            peer_ready: false,
            offer_sent: false,
            answer_applied: false,
            remote_offer: None,
            offer_applied: false,
            pending_remote: Vec::new(),
            pending_local: Vec::new(),
        }
    }

    pub fn outgoing(id: SessionId, peer: UserId) -> Self {
        Self::new(id, peer, Role::Initiator)
    }

    pub fn incoming(id: SessionId, peer: UserId) -> Self {
        Self::new(id, peer, Role::Responder)
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|t| now - t)
    }
}
