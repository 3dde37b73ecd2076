use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Handle on the local audio capture for one call.
///
/// Clones share the same capture; `stop` ends it for all of them. The front end
/// feeds encoded Opus frames into [`LocalAudio::track`].
#[derive(Clone)]
pub struct LocalAudio {
    label: String,
    track: Option<Arc<TrackLocalStaticSample>>,
    live: Arc<AtomicBool>,
}

impl LocalAudio {
    /// Opus track suitable for adding to a peer connection.
    pub fn opus(label: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            label.to_owned(),
        ));
        Self {
            label: label.to_owned(),
            track: Some(track),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Capture with no media track attached; used by backends that carry audio elsewhere.
    pub fn detached(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            track: None,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.track.clone()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            log::debug!("Local audio {} stopped", self.label);
        }
    }
}

impl std::fmt::Debug for LocalAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAudio")
            .field("label", &self.label)
            .field("has_track", &self.track.is_some())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Clones compare equal; separate captures never do.
impl PartialEq for LocalAudio {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.live, &other.live)
    }
}

/// Handle on the audio the peer sends us. The front end reads RTP packets
/// from [`RemoteAudio::track`] and plays them.
#[derive(Clone)]
pub struct RemoteAudio {
    label: String,
    track: Option<Arc<TrackRemote>>,
}

impl RemoteAudio {
    pub fn from_track(label: &str, track: Arc<TrackRemote>) -> Self {
        Self {
            label: label.to_owned(),
            track: Some(track),
        }
    }

    /// Remote audio delivered outside of a webrtc track.
    pub fn detached(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            track: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn track(&self) -> Option<Arc<TrackRemote>> {
        self.track.clone()
    }
}

impl std::fmt::Debug for RemoteAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAudio")
            .field("label", &self.label)
            .field("has_track", &self.track.is_some())
            .finish()
    }
}

impl PartialEq for RemoteAudio {
    fn eq(&self, other: &Self) -> bool {
        let same_track = match (&self.track, &other.track) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_track && self.label == other.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_shared_between_clones() {
        let audio = LocalAudio::detached("mic");
        let clone = audio.clone();
        assert!(clone.is_live());
        audio.stop();
        assert!(!clone.is_live());
        audio.stop();
    }

    #[test]
    fn opus_capture_carries_a_track() {
        let audio = LocalAudio::opus("session-1");
        assert!(audio.track().is_some());
        assert_eq!(audio.label(), "session-1");
    }

    #[test]
    fn local_audio_equality_follows_the_capture() {
        let audio = LocalAudio::detached("s1");
        assert_eq!(audio, audio.clone());
        assert_ne!(audio, LocalAudio::detached("s1"));
    }

    #[test]
    fn detached_remote_audio_has_no_track() {
        let remote = RemoteAudio::detached("s1");
        assert!(remote.track().is_none());
        assert_eq!(remote.label(), "s1");
        assert_eq!(remote, RemoteAudio::detached("s1"));
    }
}
