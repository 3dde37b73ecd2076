pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod logger;
pub mod peer;
pub mod phone;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::PhoneConfig;
pub use controller::{handle_event, ControllerState, PhoneState};
pub use error::{PhoneError, Result};
pub use events::{Action, MediaCommand, MediaEvent, PhoneEvent, StatusKind, UiEvent};
pub use phone::Phone;
pub use session::{Role, Session, SessionId, UserId};
pub use signaling::SignalingEnvelope;
