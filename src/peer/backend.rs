use crate::error::Result;
use crate::events::{MediaEvent, PhoneEvent};
use crate::peer::audio::LocalAudio;
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::session::SessionId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Where a peer session reports its asynchronous happenings.
///
/// Every event is tagged with the session it was created for, so the
/// controller can drop those that outlive their call.
#[derive(Clone, Debug)]
pub struct PeerEvents {
    session: SessionId,
    tx: UnboundedSender<PhoneEvent>,
}

impl PeerEvents {
    pub fn new(session: SessionId, tx: UnboundedSender<PhoneEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn emit(&self, event: MediaEvent) {
        let _ = self.tx.send(PhoneEvent::Media {
            session: self.session.clone(),
            event,
        });
    }
}

/// Source of local audio and peer sessions.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn acquire_audio(&self, session: &SessionId) -> Result<LocalAudio>;

    async fn create_peer(
        &self,
        audio: &LocalAudio,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerSession>>;
}

/// One negotiated peer-to-peer audio session.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Creates an offer and installs it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Applies the remote offer, then creates and installs the answer.
    async fn create_answer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    async fn set_remote_answer(&self, answer: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
