use crate::peer::types::{ServerConfig, ServerKind};
use crate::session::SessionId;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// `session-<unix millis>-<16 hex>`; unique enough for relay routing.
pub fn generate_session_id() -> SessionId {
    SessionId::new(format!(
        "session-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        random_id()
    ))
}

// Adds the stun:/turn: scheme to an ICE server URL when it is missing
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = match config.kind {
            ServerKind::Turn => "turn:",
            ServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}

/// `MM:SS`; minutes keep counting past 59.
pub fn format_duration(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
