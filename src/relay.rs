//! WebSocket channel to the signaling relay.
//!
//! One [`RelayChannel`] is one connection attempt. Outbound envelopes are
//! queued from the moment the channel is created and flushed in order once the
//! socket is up. Open, error and close are reported as [`PhoneEvent`]s tagged
//! with the channel generation; there is no reconnect.

use crate::error::{PhoneError, Result};
use crate::events::{ChannelGeneration, PhoneEvent};
use crate::signaling::{self, SignalingEnvelope};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub struct RelayChannel {
    generation: ChannelGeneration,
    outbound: UnboundedSender<SignalingEnvelope>,
    task: JoinHandle<()>,
}

impl RelayChannel {
    pub fn open(
        url: String,
        generation: ChannelGeneration,
        events: UnboundedSender<PhoneEvent>,
        connect_timeout: Duration,
    ) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(url, generation, rx, events, connect_timeout));
        Self {
            generation,
            outbound,
            task,
        }
    }

    pub fn generation(&self) -> ChannelGeneration {
        self.generation
    }

    pub fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .map_err(|_| PhoneError::ChannelClosed)
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    url: String,
    generation: ChannelGeneration,
    outbound: UnboundedReceiver<SignalingEnvelope>,
    events: UnboundedSender<PhoneEvent>,
    connect_timeout: Duration,
) {
    let reason = match serve(&url, generation, outbound, &events, connect_timeout).await {
        Ok(reason) => reason,
        Err(e) => {
            warn!("Relay channel {generation} failed: {e}");
            let _ = events.send(PhoneEvent::ChannelError {
                generation,
                error: e.to_string(),
            });
            Some(e.to_string())
        }
    };
    info!("Relay channel {generation} closed");
    let _ = events.send(PhoneEvent::ChannelClosed { generation, reason });
}

/// Pumps both directions until either side goes away. Returns the close reason.
async fn serve(
    url: &str,
    generation: ChannelGeneration,
    mut outbound: UnboundedReceiver<SignalingEnvelope>,
    events: &UnboundedSender<PhoneEvent>,
    connect_timeout: Duration,
) -> Result<Option<String>> {
    debug!("Connecting to relay {url}");
    let (ws, _) = timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| PhoneError::ConnectTimeout(url.to_string()))??;
    info!("Relay channel {generation} connected to {url}");
    let _ = events.send(PhoneEvent::ChannelOpened { generation });

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(envelope) => {
                    let text = signaling::encode(&envelope)?;
                    debug!("-> {}", envelope.kind());
                    sink.send(Message::text(text)).await?;
                }
                None => {
                    let _ = sink.close().await;
                    return Ok(Some("channel dropped".into()));
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => deliver(text.as_str(), generation, events),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => deliver(text, generation, events),
                    Err(_) => warn!("Ignoring non-UTF-8 binary frame ({} bytes)", data.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    return Ok(frame.map(|f| f.reason.to_string()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            },
        }
    }
}

fn deliver(text: &str, generation: ChannelGeneration, events: &UnboundedSender<PhoneEvent>) {
    match signaling::decode(text) {
        Ok(envelope) => {
            debug!("<- {}", envelope.kind());
            let _ = events.send(PhoneEvent::Signal {
                generation,
                envelope,
            });
        }
        Err(e) => warn!("Ignoring relay frame: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn next_event(rx: &mut UnboundedReceiver<PhoneEvent>) -> PhoneEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn queued_register_is_flushed_and_replies_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            ws.send(Message::text("garbage")).await.unwrap();
            ws.send(Message::text(r#"{"type":"registered","user_id":"alice"}"#))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            first.into_text().unwrap().to_string()
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = RelayChannel::open(format!("ws://{addr}"), 7, tx, Duration::from_secs(5));
        channel
            .send(SignalingEnvelope::Register {
                user_id: "alice".into(),
            })
            .unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            PhoneEvent::ChannelOpened { generation: 7 }
        ));
        match next_event(&mut rx).await {
            PhoneEvent::Signal {
                generation,
                envelope,
            } => {
                assert_eq!(generation, 7);
                assert_eq!(
                    envelope,
                    SignalingEnvelope::Registered {
                        user_id: Some("alice".into())
                    }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            next_event(&mut rx).await,
            PhoneEvent::ChannelClosed { generation: 7, .. }
        ));

        let first = server.await.unwrap();
        assert_eq!(first, r#"{"type":"register","user_id":"alice"}"#);
    }

    #[tokio::test]
    async fn unreachable_relay_reports_error_then_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _channel = RelayChannel::open(format!("ws://{addr}"), 1, tx, Duration::from_secs(5));

        assert!(matches!(
            next_event(&mut rx).await,
            PhoneEvent::ChannelError { generation: 1, .. }
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            PhoneEvent::ChannelClosed { generation: 1, .. }
        ));
    }
}
