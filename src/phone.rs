//! The runtime around the controller.
//!
//! A [`Phone`] owns one reactive loop task. User actions, relay traffic, media
//! completions and duration ticks all arrive on one queue and are fed to
//! [`handle_event`] in order; the resulting actions are carried out here.

use crate::config::PhoneConfig;
use crate::controller::{handle_event, ControllerState};
use crate::error::{PhoneError, Result};
use crate::events::{Action, PhoneEvent, UiEvent};
use crate::logger;
use crate::peer::backend::MediaBackend;
use crate::peer::connection::WebRtcBackend;
use crate::peer::driver::{MediaDriver, MediaRequest};
use crate::relay::RelayChannel;
use crate::session::UserId;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct Phone {
    events: UnboundedSender<PhoneEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<ControllerState>,
}

impl Phone {
    /// Starts the loop with the given media backend. Must be called inside a tokio runtime.
    pub fn start(
        config: PhoneConfig,
        backend: Arc<dyn MediaBackend>,
    ) -> Result<(Self, UnboundedReceiver<UiEvent>)> {
        config.validate()?;
        if let Some(filter) = &config.log_filter {
            logger::init(filter);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let (media_tx, media_task) = MediaDriver::new(backend, events_tx.clone()).spawn();
        let runtime = Runtime {
            config,
            state: ControllerState::new(),
            events_tx: events_tx.clone(),
            ui: ui_tx,
            media: media_tx,
            media_task,
            relay: None,
        };
        let task = tokio::spawn(runtime.run(events_rx, shutdown_rx));
        info!("Phone started");

        Ok((
            Self {
                events: events_tx,
                shutdown: Some(shutdown_tx),
                task,
            },
            ui_rx,
        ))
    }

    /// Starts the loop with the webrtc-rs backend using the configured ICE servers.
    pub fn with_webrtc(config: PhoneConfig) -> Result<(Self, UnboundedReceiver<UiEvent>)> {
        let backend = WebRtcBackend::new(config.ice_servers.clone())?;
        Self::start(config, Arc::new(backend))
    }

    fn dispatch(&self, event: PhoneEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| PhoneError::ChannelClosed)
    }

    pub fn register(&self, user_id: impl Into<UserId>) -> Result<()> {
        self.dispatch(PhoneEvent::Register(user_id.into()))
    }

    pub fn call(&self, dest: impl Into<UserId>) -> Result<()> {
        self.dispatch(PhoneEvent::Call(dest.into()))
    }

    pub fn answer(&self) -> Result<()> {
        self.dispatch(PhoneEvent::Answer)
    }

    pub fn reject(&self) -> Result<()> {
        self.dispatch(PhoneEvent::Reject)
    }

    pub fn hangup(&self) -> Result<()> {
        self.dispatch(PhoneEvent::Hangup)
    }

    /// Stops the loop, closes the relay channel and releases any live media.
    /// Returns the final controller state.
    pub async fn shutdown(mut self) -> Option<ControllerState> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Phone loop ended abnormally: {e}");
                None
            }
        }
    }
}

struct Runtime {
    config: PhoneConfig,
    state: ControllerState,
    events_tx: UnboundedSender<PhoneEvent>,
    ui: UnboundedSender<UiEvent>,
    media: UnboundedSender<MediaRequest>,
    media_task: JoinHandle<()>,
    relay: Option<RelayChannel>,
}

impl Runtime {
    async fn run(
        mut self,
        mut events: UnboundedReceiver<PhoneEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> ControllerState {
        let mut ticker = tokio::time::interval(self.config.duration_tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => break,
                ev = events.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
                _ = ticker.tick() => PhoneEvent::Tick(Utc::now()),
            };

            for action in handle_event(&mut self.state, event) {
                self.perform(action);
            }
        }

        info!("Phone shutting down");
        let Runtime {
            state,
            media,
            media_task,
            relay,
            ..
        } = self;
        drop(relay);
        drop(media);
        if let Err(e) = media_task.await {
            warn!("Media driver ended abnormally: {e}");
        }
        state
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::OpenChannel { generation } => {
                // replacing the previous channel aborts it
                self.relay = Some(RelayChannel::open(
                    self.config.relay_url.clone(),
                    generation,
                    self.events_tx.clone(),
                    self.config.connect_timeout(),
                ));
            }
            Action::Send(envelope) => match &self.relay {
                Some(relay) => {
                    if let Err(e) = relay.send(envelope) {
                        warn!("Could not queue envelope on channel {}: {e}", relay.generation());
                    }
                }
                None => warn!("No relay channel, dropping {}", envelope.kind()),
            },
            Action::Media { session, command } => {
                if self.media.send((session, command)).is_err() {
                    warn!("Media driver is gone");
                }
            }
            Action::Ui(event) => {
                debug!("UI: {event:?}");
                let _ = self.ui.send(event);
            }
        }
    }
}
