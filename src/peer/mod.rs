pub mod connection;
pub mod data_channel;
pub mod engine;
pub mod negotiation;
pub mod session;
pub mod state;
pub mod tracks;
pub mod types;

pub use connection::{LocalTrack, WebRtcEngine, WebRtcRemoteTrack};
pub use engine::{
    EngineEvent, EngineEventHandler, IceConnectionState, IceGatheringState, PeerConnectionState,
    RemoteMediaTrack, RtcEngine, SignalingState, TrackKind,
};
pub use negotiation::{Negotiator, RemoteAction};
pub use session::{PeerSession, SessionHandlers, SessionParams};
pub use state::{ConnectionStateAggregator, PeerState, SubSignal, SubStates};
pub use types::{
    IceCandidate, MediaTracks, OfferOptions, PeerRole, SdpType, ServerConfig, SessionDescription,
};
