//! WebRTC peer-сессии с perfect negotiation.
//!
//! Одна [`PeerSession`] на удалённого пира: разрешает встречные offer'ы по
//! роли polite/impolite, пересылает ICE-кандидаты через [`SignalingLink`]
//! и сводит под-состояния движка в одно [`PeerState`].

pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod signaling;
pub mod utils;

pub use config::{LoggingConfig, PeerConfig};
pub use error::{Error, Result};
pub use peer::{
    EngineEvent, MediaTracks, PeerRole, PeerSession, PeerState, RemoteMediaTrack, RtcEngine,
    SessionHandlers, SessionParams, WebRtcEngine,
};
pub use signaling::{ChannelLink, SignalMessage, SignalingLink};
