use thiserror::Error;

/// Every failure the phone can report.
///
/// The first group are user-action rejections; the controller turns them into
/// `UiEvent::Alert` with the `Display` text, so the messages are user-facing.
#[derive(Debug, Error)]
pub enum PhoneError {
    #[error("Please enter a user ID")]
    EmptyUserId,

    #[error("Please enter a user ID to call")]
    EmptyDestination,

    #[error("Cannot call yourself")]
    SelfCall,

    #[error("Not registered")]
    NotRegistered,

    #[error("Already registered")]
    AlreadyRegistered,

    #[error("A call is already in progress")]
    Busy,

    #[error("No incoming call")]
    NoIncomingCall,

    #[error("signaling channel is closed")]
    ChannelClosed,

    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Failed to access microphone: {0}")]
    AudioUnavailable(String),

    #[error("no peer session for {0}")]
    NoPeer(String),

    #[error("local description unavailable")]
    NoLocalDescription,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
}

pub type Result<T> = std::result::Result<T, PhoneError>;
