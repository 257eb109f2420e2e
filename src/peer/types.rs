use serde::{Deserialize, Serialize};

/// Тип session description (W3C `RTCSdpType`)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description в JSON-форме `{"type": .., "sdp": ..}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Псевдо-описание для отката pending local description
    pub fn rollback() -> Self {
        Self {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.sdp_type == SdpType::Offer
    }
}

/// ICE кандидат для WebRTC соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Роль в perfect negotiation
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Уступает при коллизии: откатывает свой offer и принимает чужой
    Polite,
    /// Игнорирует встречный offer при коллизии
    Impolite,
}

impl PeerRole {
    pub fn is_polite(self) -> bool {
        self == PeerRole::Polite
    }
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerRole::Polite => f.write_str("polite"),
            PeerRole::Impolite => f.write_str("impolite"),
        }
    }
}

/// Опции для create_offer / create_answer
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OfferOptions {
    pub ice_restart: bool,
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
}

/// Локальные медиа-треки, отправляемые удалённой стороне
#[derive(Debug, Clone)]
pub struct MediaTracks<T> {
    pub audio: Option<T>,
    pub video: Option<T>,
}

impl<T> Default for MediaTracks<T> {
    fn default() -> Self {
        Self {
            audio: None,
            video: None,
        }
    }
}

impl<T> MediaTracks<T> {
    pub fn new(audio: Option<T>, video: Option<T>) -> Self {
        Self { audio, video }
    }

    /// Опции offer/answer: ice restart всегда, приём тех видов медиа, что настроены локально
    pub fn offer_options(&self) -> OfferOptions {
        OfferOptions {
            ice_restart: true,
            offer_to_receive_audio: self.audio.is_some(),
            offer_to_receive_video: self.video.is_some(),
        }
    }
}
