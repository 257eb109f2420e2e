use crate::config::LoggingConfig;
use crate::peer::types::{IceCandidate, PeerRole};
use tracing::{debug, info_span, Span};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Формат временных меток в логах
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Устанавливает глобальный tracing subscriber.
///
/// Возвращает false, если логирование выключено или subscriber уже установлен.
/// Сами сессии глобальное состояние не читают: они пишут в свой span.
pub fn init(config: &LoggingConfig) -> bool {
    if !config.enabled {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Span, в котором пишутся все логи одной peer-сессии
pub fn session_span(remote_id: &str, session_id: &str, role: PeerRole) -> Span {
    info_span!(
        "peer_session",
        remote_id = %remote_id,
        session_id = %session_id,
        role = %role
    )
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}
