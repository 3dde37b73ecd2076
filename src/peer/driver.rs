//! Executes media commands one at a time against a [`MediaBackend`].
//!
//! Commands run in the order the controller issued them, so a `Release` that
//! follows a slow `Prepare` always finds the peer it has to close. At most one
//! peer session and one audio capture are live; preparing a new session closes
//! the previous one first.

use crate::error::{PhoneError, Result};
use crate::events::{MediaCommand, MediaEvent, PhoneEvent};
use crate::peer::audio::LocalAudio;
use crate::peer::backend::{MediaBackend, PeerEvents, PeerSession};
use crate::session::SessionId;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub type MediaRequest = (SessionId, MediaCommand);

struct ActiveMedia {
    session: SessionId,
    audio: LocalAudio,
    peer: Option<Arc<dyn PeerSession>>,
}

pub struct MediaDriver {
    backend: Arc<dyn MediaBackend>,
    events: UnboundedSender<PhoneEvent>,
    active: Option<ActiveMedia>,
}

impl MediaDriver {
    pub fn new(backend: Arc<dyn MediaBackend>, events: UnboundedSender<PhoneEvent>) -> Self {
        Self {
            backend,
            events,
            active: None,
        }
    }

    /// Runs the driver on its own task; it stops, releasing any live media, once
    /// every request sender is gone.
    pub fn spawn(self) -> (UnboundedSender<MediaRequest>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }

    async fn run(mut self, mut rx: UnboundedReceiver<MediaRequest>) {
        while let Some((session, command)) = rx.recv().await {
            self.execute(session, command).await;
        }
        if let Some(active) = self.active.take() {
            release(active).await;
        }
        debug!("Media driver stopped");
    }

    pub fn active_session(&self) -> Option<&SessionId> {
        self.active.as_ref().map(|a| &a.session)
    }

    fn emit(&self, session: &SessionId, event: MediaEvent) {
        let _ = self.events.send(PhoneEvent::Media {
            session: session.clone(),
            event,
        });
    }

    fn peer_for(&self, session: &SessionId) -> Result<Arc<dyn PeerSession>> {
        self.active
            .as_ref()
            .filter(|a| &a.session == session)
            .and_then(|a| a.peer.clone())
            .ok_or_else(|| PhoneError::NoPeer(session.to_string()))
    }

    pub async fn execute(&mut self, session: SessionId, command: MediaCommand) {
        match command {
            MediaCommand::Prepare => self.prepare(session).await,
            MediaCommand::Release => {
                if self
                    .active
                    .as_ref()
                    .is_some_and(|a| a.session == session)
                {
                    if let Some(active) = self.active.take() {
                        release(active).await;
                    }
                }
            }
            command => {
                match self.peer_for(&session) {
                    Ok(peer) => self.negotiate(&session, peer, command).await,
                    Err(e) => debug!("{e}, dropping {command:?}"),
                }
            }
        }
    }

    async fn prepare(&mut self, session: SessionId) {
        if let Some(previous) = self.active.take() {
            warn!("Closing leftover media of {} before {session}", previous.session);
            release(previous).await;
        }

        let audio = match self.backend.acquire_audio(&session).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Audio acquisition failed for {session}: {e}");
                self.emit(&session, MediaEvent::AudioFailed(e.to_string()));
                return;
            }
        };
        info!("Local audio {} acquired", audio.label());

        let events = PeerEvents::new(session.clone(), self.events.clone());
        match self.backend.create_peer(&audio, events).await {
            Ok(peer) => {
                self.active = Some(ActiveMedia {
                    session: session.clone(),
                    audio: audio.clone(),
                    peer: Some(peer),
                });
                self.emit(&session, MediaEvent::PeerReady(audio));
            }
            Err(e) => {
                audio.stop();
                warn!("Peer creation failed for {session}: {e}");
                self.emit(&session, MediaEvent::Failed(e.to_string()));
            }
        }
    }

    async fn negotiate(
        &self,
        session: &SessionId,
        peer: Arc<dyn PeerSession>,
        command: MediaCommand,
    ) {
        match command {
            MediaCommand::CreateOffer => match peer.create_offer().await {
                Ok(offer) => self.emit(session, MediaEvent::OfferCreated(offer)),
                Err(e) => self.emit(session, MediaEvent::Failed(e.to_string())),
            },
            MediaCommand::AcceptOffer(offer) => match peer.create_answer(offer).await {
                Ok(answer) => self.emit(session, MediaEvent::AnswerCreated(answer)),
                Err(e) => self.emit(session, MediaEvent::Failed(e.to_string())),
            },
            MediaCommand::ApplyAnswer(answer) => {
                if let Err(e) = peer.set_remote_answer(answer).await {
                    self.emit(session, MediaEvent::Failed(e.to_string()));
                }
            }
            MediaCommand::AddCandidate(candidate) => {
                if let Err(e) = peer.add_ice_candidate(candidate).await {
                    warn!("Error adding ICE candidate for {session}: {e}");
                }
            }
            MediaCommand::Prepare | MediaCommand::Release => {}
        }
    }
}

async fn release(active: ActiveMedia) {
    if let Some(peer) = active.peer {
        if let Err(e) = peer.close().await {
            warn!("Error closing peer of {}: {e}", active.session);
        }
    }
    active.audio.stop();
    info!("Media released for {}", active.session);
}
