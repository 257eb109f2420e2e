//! Perfect negotiation (вежливая и невежливая сторона).
//!
//! Любой из пиров может начать offer в любой момент. Если два offer'а
//! встретились (glare), исход решает заранее назначенная роль, без лишнего
//! обмена: impolite отбрасывает входящий offer и оставляет свой, polite
//! откатывает свой offer и отвечает.
//!
//! https://w3c.github.io/webrtc-pc/#perfect-negotiation-example

use crate::error::Result;
use crate::peer::engine::{RtcEngine, SignalingState};
use crate::peer::types::{IceCandidate, OfferOptions, PeerRole, SdpType, SessionDescription};
use crate::signaling::SignalingLink;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

/// Что делать со входящим remote description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAction {
    /// Коллизия на impolite стороне: отбросить
    Ignore,
    /// Коллизия на polite стороне: откатиться и применить
    RollbackAndApply,
    Apply,
}

/// Всё, что нужно раунду согласования, кроме флагов
pub struct Exchange<'a, E: RtcEngine> {
    pub engine: &'a E,
    pub link: &'a dyn SignalingLink,
    pub remote_id: &'a str,
    pub options: OfferOptions,
}

/// Сбрасывает `making_offer` по окончании попытки, чем бы она ни кончилась
pub struct OfferGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for OfferGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Флаги согласования одной сессии и offer/answer логика на них
pub struct Negotiator {
    role: PeerRole,
    making_offer: AtomicBool,
    ignore_offer: AtomicBool,
}

impl Negotiator {
    pub fn new(role: PeerRole) -> Self {
        Self {
            role,
            making_offer: AtomicBool::new(false),
            ignore_offer: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn making_offer(&self) -> bool {
        self.making_offer.load(Ordering::SeqCst)
    }

    pub fn ignore_offer(&self) -> bool {
        self.ignore_offer.load(Ordering::SeqCst)
    }

    pub fn begin_offer(&self) -> OfferGuard<'_> {
        self.making_offer.store(true, Ordering::SeqCst);
        OfferGuard {
            flag: &self.making_offer,
        }
    }

    /// Решает, что делать со входящим description, и запоминает `ignore_offer`
    pub fn classify(&self, incoming: SdpType, signaling: SignalingState) -> RemoteAction {
        let offer_collision = incoming == SdpType::Offer
            && (self.making_offer() || signaling != SignalingState::Stable);
        let ignore = !self.role.is_polite() && offer_collision;
        self.ignore_offer.store(ignore, Ordering::SeqCst);

        if ignore {
            RemoteAction::Ignore
        } else if offer_collision {
            RemoteAction::RollbackAndApply
        } else {
            RemoteAction::Apply
        }
    }

    /// Обработка negotiation-needed. Ошибка молча завершает раунд.
    pub async fn negotiation_needed<E: RtcEngine>(&self, ex: &Exchange<'_, E>) {
        debug!("negotiation needed");
        let _guard = self.begin_offer();
        if let Err(e) = self.make_offer(ex).await {
            error!("failed to initiate negotiation: {e}");
        }
    }

    async fn make_offer<E: RtcEngine>(&self, ex: &Exchange<'_, E>) -> Result<()> {
        let offer = ex.engine.create_offer(ex.options).await?;

        if ex.engine.signaling_state() != SignalingState::Stable {
            debug!(
                "negotiation stopped: signaling state is {:?}",
                ex.engine.signaling_state()
            );
        }

        ex.engine.set_local_description(offer.clone()).await?;
        let description = ex.engine.local_description().await.unwrap_or(offer);
        send_description(ex, &description).await
    }

    /// Применяет удалённый description. Ошибки логируются, наружу не выходят.
    pub async fn accept_remote_description<E: RtcEngine>(
        &self,
        ex: &Exchange<'_, E>,
        payload: &str,
    ) {
        if let Err(e) = self.apply_remote(ex, payload).await {
            error!("failed to accept description: {e}");
        }
    }

    async fn apply_remote<E: RtcEngine>(&self, ex: &Exchange<'_, E>, payload: &str) -> Result<()> {
        let description: SessionDescription = serde_json::from_str(payload)?;
        let is_offer = description.is_offer();

        match self.classify(description.sdp_type, ex.engine.signaling_state()) {
            RemoteAction::Ignore => {
                warn!("offer collision, ignoring remote offer");
                return Ok(());
            }
            RemoteAction::RollbackAndApply => {
                debug!("offer collision, rolling back local offer");
                let (rollback, remote) = tokio::join!(
                    ex.engine
                        .set_local_description(SessionDescription::rollback()),
                    ex.engine.set_remote_description(description),
                );
                rollback?;
                remote?;
            }
            RemoteAction::Apply => {
                ex.engine.set_remote_description(description).await?;
            }
        }

        if is_offer {
            let answer = ex.engine.create_answer(ex.options).await?;
            ex.engine.set_local_description(answer.clone()).await?;
            send_description(ex, &answer).await?;
        }
        Ok(())
    }

    /// Применяет удалённый ICE-кандидат.
    ///
    /// Кандидаты проигнорированного offer'а ожидаемо не применяются, такие
    /// ошибки глотаются; любая другая возвращается.
    pub async fn accept_ice_candidate<E: RtcEngine>(
        &self,
        ex: &Exchange<'_, E>,
        payload: &str,
    ) -> Result<()> {
        let candidate: IceCandidate = serde_json::from_str(payload)?;
        debug!("remote ICE candidate");

        match ex.engine.add_ice_candidate(candidate).await {
            Ok(()) => Ok(()),
            Err(e) if self.ignore_offer() => {
                debug!("dropped candidate of ignored offer: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

async fn send_description<E: RtcEngine>(
    ex: &Exchange<'_, E>,
    description: &SessionDescription,
) -> Result<()> {
    let payload = serde_json::to_string(description)?;
    ex.link.send_local_description(ex.remote_id, payload).await?;
    debug!(
        "session description sent, type = {:?}",
        description.sdp_type
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impolite_ignores_colliding_offer() {
        let n = Negotiator::new(PeerRole::Impolite);
        let _guard = n.begin_offer();
        assert_eq!(
            n.classify(SdpType::Offer, SignalingState::Stable),
            RemoteAction::Ignore
        );
        assert!(n.ignore_offer());
    }

    #[test]
    fn polite_rolls_back_colliding_offer() {
        let n = Negotiator::new(PeerRole::Polite);
        assert_eq!(
            n.classify(SdpType::Offer, SignalingState::HaveLocalOffer),
            RemoteAction::RollbackAndApply
        );
        assert!(!n.ignore_offer());
    }

    #[test]
    fn no_collision_without_pending_offer() {
        for role in [PeerRole::Polite, PeerRole::Impolite] {
            let n = Negotiator::new(role);
            assert_eq!(
                n.classify(SdpType::Offer, SignalingState::Stable),
                RemoteAction::Apply
            );
        }
    }

    #[test]
    fn answers_never_collide_and_reset_ignore_flag() {
        let n = Negotiator::new(PeerRole::Impolite);
        n.classify(SdpType::Offer, SignalingState::HaveLocalOffer);
        assert!(n.ignore_offer());

        assert_eq!(
            n.classify(SdpType::Answer, SignalingState::HaveLocalOffer),
            RemoteAction::Apply
        );
        assert!(!n.ignore_offer());
    }

    #[test]
    fn offer_guard_clears_flag() {
        let n = Negotiator::new(PeerRole::Polite);
        {
            let _guard = n.begin_offer();
            assert!(n.making_offer());
        }
        assert!(!n.making_offer());
    }

    #[test]
    fn offer_guard_clears_flag_on_unwind() {
        let n = Negotiator::new(PeerRole::Polite);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = n.begin_offer();
            panic!("offer failed");
        }));
        assert!(result.is_err());
        assert!(!n.making_offer());
    }
}
