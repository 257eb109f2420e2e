//! Возможности нижележащего RTC движка.
//!
//! Ядро сессии не обращается к webrtc-rs напрямую: всё, что нужно от peer
//! connection, идёт через [`RtcEngine`], а всё, о чём сообщает соединение,
//! возвращается как [`EngineEvent`].

use crate::error::Result;
use crate::peer::types::{IceCandidate, OfferOptions, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceGatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Потеря связи, о которой владелец должен узнать сразу
    pub fn is_lost(self) -> bool {
        matches!(
            self,
            PeerConnectionState::Disconnected | PeerConnectionState::Failed
        )
    }
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }
}

impl From<RTCIceGatheringState> for IceGatheringState {
    fn from(state: RTCIceGatheringState) -> Self {
        match state {
            RTCIceGatheringState::Gathering => IceGatheringState::Gathering,
            RTCIceGatheringState::Complete => IceGatheringState::Complete,
            _ => IceGatheringState::New,
        }
    }
}

// в callback'е webrtc-rs приходит состояние gatherer'а, а не gathering
impl From<RTCIceGathererState> for IceGatheringState {
    fn from(state: RTCIceGathererState) -> Self {
        match state {
            RTCIceGathererState::Gathering => IceGatheringState::Gathering,
            RTCIceGathererState::Complete => IceGatheringState::Complete,
            _ => IceGatheringState::New,
        }
    }
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
            _ => IceConnectionState::New,
        }
    }
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            _ => PeerConnectionState::New,
        }
    }
}

/// Вид медиа-трека
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Входящий медиа-трек, выданный движком
#[async_trait]
pub trait RemoteMediaTrack: Send + Sync + 'static {
    /// Идентификатор трека, по нему ключуется набор входящих треков
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    /// Прекратить приём медиа по треку
    async fn stop(&self) -> Result<()>;
}

/// Событие движка
pub enum EngineEvent<R> {
    /// Локальный кандидат; `None` означает конец сбора
    IceCandidate(Option<IceCandidate>),
    Track(Arc<R>),
    TrackMuted(String),
    TrackEnded(String),
    NegotiationNeeded,
    SignalingStateChange(SignalingState),
    IceGatheringStateChange(IceGatheringState),
    IceConnectionStateChange(IceConnectionState),
    ConnectionStateChange(PeerConnectionState),
}

impl<R> std::fmt::Debug for EngineEvent<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
            EngineEvent::Track(_) => f.write_str("Track"),
            EngineEvent::TrackMuted(id) => f.debug_tuple("TrackMuted").field(id).finish(),
            EngineEvent::TrackEnded(id) => f.debug_tuple("TrackEnded").field(id).finish(),
            EngineEvent::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            EngineEvent::SignalingStateChange(s) => {
                f.debug_tuple("SignalingStateChange").field(s).finish()
            }
            EngineEvent::IceGatheringStateChange(s) => {
                f.debug_tuple("IceGatheringStateChange").field(s).finish()
            }
            EngineEvent::IceConnectionStateChange(s) => {
                f.debug_tuple("IceConnectionStateChange").field(s).finish()
            }
            EngineEvent::ConnectionStateChange(s) => {
                f.debug_tuple("ConnectionStateChange").field(s).finish()
            }
        }
    }
}

/// Приёмник событий; движок вызывает его из своих callback'ов
pub type EngineEventHandler<R> = Arc<dyn Fn(EngineEvent<R>) + Send + Sync>;

/// Одно peer connection RTC движка.
///
/// Изменения description применяются в порядке вызова: операция, начатая
/// раньше, вступает в силу раньше, даже если обе ожидаются вместе.
#[async_trait]
pub trait RtcEngine: Send + Sync + 'static {
    /// Тип исходящего трека для `add_track`
    type LocalTrack: Clone + Send + Sync + 'static;
    /// Sender, который возвращает `add_track`
    type Sender: Clone + Send + Sync + 'static;
    type RemoteTrack: RemoteMediaTrack;

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription>;

    async fn create_answer(&self, options: OfferOptions) -> Result<SessionDescription>;

    /// Применяет local description; `SdpType::Rollback` откатывает pending offer
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_track(&self, track: Self::LocalTrack) -> Result<Self::Sender>;

    async fn remove_track(&self, sender: &Self::Sender) -> Result<()>;

    async fn senders(&self) -> Vec<Self::Sender>;

    /// Data channel, заранее согласованный вне SDP под фиксированным id
    async fn create_negotiated_data_channel(&self, label: &str, id: u16) -> Result<()>;

    fn signaling_state(&self) -> SignalingState;

    fn ice_gathering_state(&self) -> IceGatheringState;

    fn ice_connection_state(&self) -> IceConnectionState;

    fn connection_state(&self) -> PeerConnectionState;

    /// Направляет все события в `handler`, заменяя предыдущий
    fn set_event_handler(&self, handler: EngineEventHandler<Self::RemoteTrack>);

    async fn close(&self) -> Result<()>;
}
