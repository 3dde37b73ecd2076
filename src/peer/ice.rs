use crate::peer::types::IceCandidate;
use tokio::sync::Mutex;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

/// Remote candidates that arrived before the remote description was applied.
///
/// Candidates leave in the order they came in.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    inner: Mutex<PendingInner>,
}

#[derive(Debug, Default)]
struct PendingInner {
    remote_ready: bool,
    queued: Vec<IceCandidate>,
}

impl PendingCandidates {
    /// Queues `candidate` unless the remote description is already in place;
    /// returns it back when it can be applied right away.
    pub async fn admit(&self, candidate: IceCandidate) -> Option<IceCandidate> {
        let mut inner = self.inner.lock().await;
        if inner.remote_ready {
            Some(candidate)
        } else {
            log::debug!("Remote description not set yet, queuing candidate");
            inner.queued.push(candidate);
            None
        }
    }

    /// Marks the remote description applied and hands back everything queued.
    pub async fn release(&self) -> Vec<IceCandidate> {
        let mut inner = self.inner.lock().await;
        inner.remote_ready = true;
        std::mem::take(&mut inner.queued)
    }

    pub async fn queued(&self) -> usize {
        self.inner.lock().await.queued.len()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateCounts {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateCounts {
    let mut counts = CandidateCounts::default();
    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            counts.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            counts.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            counts.relay += 1;
        }
    }

    log::debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        counts.host,
        counts.srflx,
        counts.relay
    );
    counts
}
