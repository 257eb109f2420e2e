//! Ошибки peer-сессий

/// Result с ошибкой крейта [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Ошибки согласования и работы peer-сессии
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Движок отклонил операцию (offer/answer, description, кандидат, трек)
    #[error("Engine error: {0}")]
    Engine(String),

    /// Signaling не смог доставить сообщение
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Не удалось (де)сериализовать payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ошибка webrtc-rs
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// Неверный параметр конфигурации
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Сессия или движок уже закрыты
    #[error("Session closed")]
    Closed,
}
