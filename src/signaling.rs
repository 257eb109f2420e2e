//! Внешний signaling для peer-сессий.
//!
//! Сам транспорт живёт вне крейта. Сессии нужен только [`SignalingLink`],
//! чтобы отправлять свои description и кандидаты; входящие сообщения
//! владелец передаёт в
//! [`PeerSession::accept_remote_description`](crate::PeerSession::accept_remote_description)
//! и [`PeerSession::accept_ice_candidate`](crate::PeerSession::accept_ice_candidate).

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Отправляющая сторона signaling, общая для всех сессий владельца
#[async_trait]
pub trait SignalingLink: Send + Sync {
    /// Доставить session description в JSON пиру `remote_id`
    async fn send_local_description(&self, remote_id: &str, payload: String) -> Result<()>;

    /// Доставить ICE-кандидат в JSON пиру `remote_id`
    async fn send_ice_candidate(&self, remote_id: &str, payload: String) -> Result<()>;
}

/// Конверт для транспортов, которые везут оба вида сообщений по одному каналу
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SignalMessage {
    #[serde(rename_all = "camelCase")]
    Description { remote_id: String, payload: String },
    #[serde(rename_all = "camelCase")]
    Candidate { remote_id: String, payload: String },
}

impl SignalMessage {
    pub fn remote_id(&self) -> &str {
        match self {
            SignalMessage::Description { remote_id, .. }
            | SignalMessage::Candidate { remote_id, .. } => remote_id,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            SignalMessage::Description { payload, .. }
            | SignalMessage::Candidate { payload, .. } => payload,
        }
    }
}

/// [`SignalingLink`], складывающий исходящие сообщения в tokio канал
#[derive(Clone)]
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<SignalMessage>,
}

impl ChannelLink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SignalMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, msg: SignalMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::Signaling("signaling channel closed".into()))
    }
}

#[async_trait]
impl SignalingLink for ChannelLink {
    async fn send_local_description(&self, remote_id: &str, payload: String) -> Result<()> {
        self.push(SignalMessage::Description {
            remote_id: remote_id.to_string(),
            payload,
        })
    }

    async fn send_ice_candidate(&self, remote_id: &str, payload: String) -> Result<()> {
        self.push(SignalMessage::Candidate {
            remote_id: remote_id.to_string(),
            payload,
        })
    }
}
