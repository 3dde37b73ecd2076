pub mod audio;
pub mod backend;
pub mod connection;
pub mod driver;
pub mod ice;
pub mod types;

pub use audio::{LocalAudio, RemoteAudio};
pub use backend::{MediaBackend, PeerEvents, PeerSession};
pub use connection::WebRtcBackend;
pub use driver::MediaDriver;
pub use types::{IceCandidate, PeerConnectionState, SdpType, ServerConfig, ServerKind, SessionDescription};
