#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use moq_phone::error::{PhoneError, Result};
use moq_phone::peer::{
    IceCandidate, LocalAudio, MediaBackend, PeerConnectionState, PeerEvents, PeerSession,
    RemoteAudio, SessionDescription,
};
use moq_phone::{MediaEvent, Phone, PhoneConfig, SessionId, UiEvent};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const CLOSE: &str = "__close__";

type Clients = Arc<Mutex<HashMap<String, UnboundedSender<String>>>>;

/// In-process relay that routes the way the production relay does.
pub struct Relay {
    pub url: String,
    clients: Clients,
    received: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl Relay {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let clients: Clients = Arc::default();
        let received: Arc<Mutex<Vec<Value>>> = Arc::default();

        let task = tokio::spawn({
            let clients = clients.clone();
            let received = received.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve_client(stream, clients.clone(), received.clone()));
                }
            }
        });

        Self {
            url,
            clients,
            received,
            task,
        }
    }

    /// Every message the relay received, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_from(&self, kind: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|m| m["type"] == kind)
            .collect()
    }

    /// Closes the connection of `user`.
    pub fn kick(&self, user: &str) {
        if let Some(tx) = self.clients.lock().unwrap().remove(user) {
            let _ = tx.send(CLOSE.to_string());
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_client(stream: TcpStream, clients: Clients, received: Arc<Mutex<Vec<Value>>>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if text == CLOSE {
                let _ = sink.close().await;
                break;
            }
            if sink.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut me: Option<String> = None;
    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(data) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        received.lock().unwrap().push(data.clone());

        let session_id = data["session_id"].clone();
        let mut clients = clients.lock().unwrap();
        match data["type"].as_str().unwrap_or_default() {
            "register" => {
                if let Some(id) = data["user_id"].as_str() {
                    clients.insert(id.to_string(), tx.clone());
                    me = Some(id.to_string());
                    let _ = tx.send(
                        json!({ "type": "registered", "user_id": id, "status": "success" })
                            .to_string(),
                    );
                }
            }
            "call" => {
                let dest = data["dest"].as_str().unwrap_or_default();
                match clients.get(dest) {
                    Some(dest_tx) => {
                        let _ = dest_tx.send(
                            json!({ "type": "incoming_call", "session_id": session_id, "from": data["from"] })
                                .to_string(),
                        );
                        let _ = tx.send(
                            json!({ "type": "ringing", "session_id": session_id }).to_string(),
                        );
                    }
                    None => {
                        let _ = tx.send(
                            json!({ "type": "call_failed", "session_id": session_id, "reason": "user_not_found" })
                                .to_string(),
                        );
                    }
                }
            }
            "answer" => {
                for (user, client) in clients.iter() {
                    if Some(user) != me.as_ref() {
                        let _ = client.send(
                            json!({ "type": "call_answered", "session_id": session_id })
                                .to_string(),
                        );
                    }
                }
            }
            "hangup" => {
                for client in clients.values() {
                    let _ = client.send(
                        json!({ "type": "call_ended", "session_id": session_id }).to_string(),
                    );
                }
            }
            "sdp_offer" | "sdp_answer" | "ice_candidate" => {
                if let Some(dest_tx) = data["dest"].as_str().and_then(|d| clients.get(d)) {
                    let _ = dest_tx.send(text.to_string());
                }
            }
            _ => {}
        }
    }

    if let Some(me) = me {
        let mut clients = clients.lock().unwrap();
        // a newer connection may have registered the same id meanwhile
        if clients.get(&me).is_some_and(|c| c.same_channel(&tx)) {
            clients.remove(&me);
        }
    }
    writer.abort();
}

/// What a fake backend did, for leak and ordering checks.
#[derive(Default)]
pub struct Recorder {
    pub audio: Mutex<Vec<LocalAudio>>,
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub remote_candidates: Mutex<Vec<String>>,
    pub deny_audio: AtomicBool,
}

impl Recorder {
    pub fn all_released(&self) -> bool {
        self.created.load(Ordering::SeqCst) == self.closed.load(Ordering::SeqCst)
            && self.audio.lock().unwrap().iter().all(|a| !a.is_live())
    }

    pub fn acquired(&self) -> usize {
        self.audio.lock().unwrap().len()
    }
}

pub struct FakeBackend(pub Arc<Recorder>);

struct FakePeer {
    recorder: Arc<Recorder>,
    events: PeerEvents,
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn acquire_audio(&self, session: &SessionId) -> Result<LocalAudio> {
        if self.0.deny_audio.load(Ordering::SeqCst) {
            return Err(PhoneError::AudioUnavailable("permission denied".into()));
        }
        let audio = LocalAudio::detached(session.as_str());
        self.0.audio.lock().unwrap().push(audio.clone());
        Ok(audio)
    }

    async fn create_peer(
        &self,
        _audio: &LocalAudio,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerSession>> {
        self.0.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePeer {
            recorder: self.0.clone(),
            events,
        }))
    }
}

impl FakePeer {
    fn remote_track(&self) {
        self.events.emit(MediaEvent::RemoteTrack(RemoteAudio::detached(
            self.events.session().as_str(),
        )));
    }
}

#[async_trait]
impl PeerSession for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.events.emit(MediaEvent::LocalCandidate(IceCandidate::new(
            "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host",
        )));
        Ok(SessionDescription::offer(format!(
            "v=0 offer {}",
            self.events.session()
        )))
    }

    async fn create_answer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.events.emit(MediaEvent::LocalCandidate(IceCandidate::new(
            "candidate:2 1 udp 2122260223 10.0.0.2 50001 typ host",
        )));
        self.events
            .emit(MediaEvent::ConnectionState(PeerConnectionState::Connected));
        self.remote_track();
        Ok(SessionDescription::answer(format!("v=0 answer to {}", offer.sdp)))
    }

    async fn set_remote_answer(&self, _answer: SessionDescription) -> Result<()> {
        self.events
            .emit(MediaEvent::ConnectionState(PeerConnectionState::Connected));
        self.remote_track();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.recorder
            .remote_candidates
            .lock()
            .unwrap()
            .push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.recorder.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Client {
    pub phone: Phone,
    pub ui: UnboundedReceiver<UiEvent>,
    pub recorder: Arc<Recorder>,
}

impl Client {
    pub fn start(relay: &Relay) -> Self {
        let recorder = Arc::new(Recorder::default());
        let config = PhoneConfig {
            relay_url: relay.url.clone(),
            connect_timeout_secs: 5,
            log_filter: Some("debug".into()),
            ..Default::default()
        };
        let (phone, ui) =
            Phone::start(config, Arc::new(FakeBackend(recorder.clone()))).expect("phone start");
        Self {
            phone,
            ui,
            recorder,
        }
    }

    pub async fn registered(relay: &Relay, user: &str) -> Self {
        let mut client = Self::start(relay);
        client.phone.register(user).unwrap();
        client
            .expect(|e| matches!(e, UiEvent::Registered { .. }))
            .await;
        client
    }

    /// Waits for the first UI event matching `pred`, skipping the rest.
    pub async fn expect(&mut self, pred: impl Fn(&UiEvent) -> bool) -> UiEvent {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let event = tokio::time::timeout_at(deadline, self.ui.recv())
                .await
                .expect("timed out waiting for UI event")
                .expect("UI stream closed");
            if pred(&event) {
                return event;
            }
        }
    }
}

/// Polls `cond` until it holds or five seconds pass.
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..250 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
