use crate::error::{PhoneError, Result};
use crate::events::MediaEvent;
use crate::logger::dump_candidate;
use crate::peer::audio::{LocalAudio, RemoteAudio};
use crate::peer::backend::{MediaBackend, PeerEvents, PeerSession};
use crate::peer::ice::{analyze_candidates, PendingCandidates};
use crate::peer::types::{
    IceCandidate, PeerConnectionState, ServerConfig, SessionDescription,
};
use crate::session::SessionId;
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// webrtc-rs implementation of the real-time session adapter.
pub struct WebRtcBackend {
    api: API,
    ice_servers: Vec<ServerConfig>,
}

impl WebRtcBackend {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl MediaBackend for WebRtcBackend {
    async fn acquire_audio(&self, session: &SessionId) -> Result<LocalAudio> {
        Ok(LocalAudio::opus(session.as_str()))
    }

    async fn create_peer(
        &self,
        audio: &LocalAudio,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerSession>> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config(&self.ice_servers))
                .await?,
        );

        if let Some(track) = audio.track() {
            let track: Arc<dyn TrackLocal + Send + Sync> = track;
            let sender = pc.add_track(track).await?;
            // RTCP has to be read for the interceptors to work
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }

        attach_handlers(&pc, events);
        Ok(Arc::new(WebRtcPeer {
            pc,
            pending: PendingCandidates::default(),
        }))
    }
}

fn attach_handlers(pc: &Arc<RTCPeerConnection>, events: PeerEvents) {
    let gathered: Arc<Mutex<Vec<IceCandidate>>> = Arc::new(Mutex::new(Vec::new()));

    let ev = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let ev = ev.clone();
        let gathered = gathered.clone();
        Box::pin(async move {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate::from(init);
                        dump_candidate("LOCAL", &candidate);
                        gathered.lock().await.push(candidate.clone());
                        ev.emit(MediaEvent::LocalCandidate(candidate));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {e}"),
                },
                None => {
                    // end of gathering
                    let counts = analyze_candidates(&gathered.lock().await);
                    if counts.relay == 0 {
                        warn!("No TURN relay candidates for {}; calls across NAT may fail", ev.session());
                    }
                }
            }
        })
    }));

    let ev = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            info!("Received remote {:?} track for {}", track.kind(), ev.session());
            ev.emit(MediaEvent::RemoteTrack(RemoteAudio::from_track(
                ev.session().as_str(),
                track,
            )));
            Box::pin(async {})
        },
    ));

    let ev = events;
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        debug!("Peer connection state changed to: {st:?}");
        ev.emit(MediaEvent::ConnectionState(st.into()));
        Box::pin(async {})
    }));
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(st: RTCPeerConnectionState) -> Self {
        match st {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    pending: PendingCandidates,
}

impl WebRtcPeer {
    async fn local_sdp(&self) -> Result<String> {
        self.pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .ok_or(PhoneError::NoLocalDescription)
    }

    /// Applies candidates that were waiting for the remote description.
    async fn apply_pending(&self) {
        for candidate in self.pending.release().await {
            debug!("Applying pending candidate: {}", candidate.candidate);
            if let Err(e) = self.pc.add_ice_candidate(candidate.into()).await {
                warn!("Failed to apply pending candidate: {e}");
            }
        }
    }
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        Ok(SessionDescription::offer(self.local_sdp().await?))
    }

    async fn create_answer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.pc
            .set_remote_description(RTCSessionDescription::offer(offer.sdp)?)
            .await?;
        self.apply_pending().await;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        Ok(SessionDescription::answer(self.local_sdp().await?))
    }

    async fn set_remote_answer(&self, answer: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(RTCSessionDescription::answer(answer.sdp)?)
            .await?;
        self.apply_pending().await;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if let Some(candidate) = self.pending.admit(candidate).await {
            self.pc.add_ice_candidate(candidate.into()).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let unapplied = self.pending.queued().await;
        if unapplied > 0 {
            debug!("Closing peer with {unapplied} candidates never applied");
        }
        self.pc.close().await?;
        Ok(())
    }
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}
