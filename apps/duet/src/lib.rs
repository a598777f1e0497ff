pub mod client;
pub mod config;
pub mod control;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{ClientSnapshot, SignalingClient, SignalingHandle};
pub use config::ClientConfig;
pub use session::{EndpointIdentity, IdentityError, SessionEvent, SessionSnapshot, SessionState};
