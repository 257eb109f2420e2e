//! Движок в памяти с offer/answer автоматом настоящего peer connection;
//! уступает планировщику на каждом async шаге, чтобы сессии перемешивались.

#![allow(dead_code)]

use async_trait::async_trait;
use ikazuchi_peer::error::{Error, Result};
use ikazuchi_peer::{PeerSession, SignalMessage};
use ikazuchi_peer::peer::{
    EngineEvent, EngineEventHandler, IceCandidate, IceConnectionState, IceGatheringState,
    OfferOptions, PeerConnectionState, RemoteMediaTrack, RtcEngine, SdpType, SessionDescription,
    SignalingState, TrackKind,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    stops: AtomicUsize,
}

impl FakeTrack {
    pub fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            stops: AtomicUsize::new(0),
        })
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteMediaTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeSender {
    pub id: usize,
    pub track: String,
}

#[derive(Default)]
struct State {
    signaling: SignalingState,
    gathering: IceGatheringState,
    ice: IceConnectionState,
    connection: PeerConnectionState,
    current_local: Option<SessionDescription>,
    current_remote: Option<SessionDescription>,
    pending_local: Option<SessionDescription>,
    pending_remote: Option<SessionDescription>,
    senders: Vec<FakeSender>,
    next_id: usize,
    history: Vec<String>,
    offer_options: Vec<OfferOptions>,
    data_channels: Vec<(String, u16)>,
    candidates: Vec<IceCandidate>,
    fail_offers: bool,
    closes: usize,
    closed: bool,
}

pub struct ScriptedEngine {
    name: String,
    state: Mutex<State>,
    handler: Mutex<Option<EngineEventHandler<FakeTrack>>>,
}

impl ScriptedEngine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(State::default()),
            handler: Mutex::new(None),
        }
    }

    /// Поднять событие так, как это сделал бы настоящий движок
    pub fn emit(&self, event: EngineEvent<FakeTrack>) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn history(&self) -> Vec<String> {
        self.state.lock().history.clone()
    }

    pub fn offer_options(&self) -> Vec<OfferOptions> {
        self.state.lock().offer_options.clone()
    }

    pub fn sender_tracks(&self) -> Vec<String> {
        self.state.lock().senders.iter().map(|s| s.track.clone()).collect()
    }

    pub fn data_channels(&self) -> Vec<(String, u16)> {
        self.state.lock().data_channels.clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().candidates.clone()
    }

    pub fn current_local(&self) -> Option<SessionDescription> {
        self.state.lock().current_local.clone()
    }

    pub fn current_remote(&self) -> Option<SessionDescription> {
        self.state.lock().current_remote.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn set_fail_offers(&self, fail: bool) {
        self.state.lock().fail_offers = fail;
    }

    fn set_signaling(&self, state: &mut State, next: SignalingState) -> Option<SignalingState> {
        if state.signaling == next {
            return None;
        }
        state.signaling = next;
        Some(next)
    }

    fn notify_signaling(&self, changed: Option<SignalingState>) {
        if let Some(s) = changed {
            self.emit(EngineEvent::SignalingStateChange(s));
        }
    }

    fn invalid(&self, op: &str, state: SignalingState) -> Error {
        Error::Engine(format!("{}: cannot {op} in {state:?}", self.name))
    }
}

#[async_trait]
impl RtcEngine for ScriptedEngine {
    type LocalTrack = String;
    type Sender = FakeSender;
    type RemoteTrack = FakeTrack;

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        if state.fail_offers {
            return Err(Error::Engine("offer generation failed".into()));
        }
        if !matches!(
            state.signaling,
            SignalingState::Stable | SignalingState::HaveLocalOffer
        ) {
            return Err(self.invalid("create offer", state.signaling));
        }
        state.next_id += 1;
        state.offer_options.push(options);
        Ok(SessionDescription::offer(format!(
            "{}-offer-{}",
            self.name, state.next_id
        )))
    }

    async fn create_answer(&self, _options: OfferOptions) -> Result<SessionDescription> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(self.invalid("create answer", state.signaling));
        }
        state.next_id += 1;
        Ok(SessionDescription::answer(format!(
            "{}-answer-{}",
            self.name, state.next_id
        )))
    }

    // состояние меняется на первом poll, затем yield: вызовы, начатые по
    // порядку, вступают в силу по порядку
    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let changed = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Closed);
            }
            let cur = state.signaling;
            let next = match (description.sdp_type, cur) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    state.pending_local = Some(description.clone());
                    SignalingState::HaveLocalOffer
                }
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => {
                    state.current_local = Some(description.clone());
                    state.current_remote = state.pending_remote.take();
                    SignalingState::Stable
                }
                (SdpType::Rollback, _) => {
                    state.pending_local = None;
                    state.pending_remote = None;
                    SignalingState::Stable
                }
                _ => return Err(self.invalid("set local description", cur)),
            };
            state
                .history
                .push(format!("local:{:?}", description.sdp_type).to_lowercase());
            self.set_signaling(&mut state, next)
        };
        self.notify_signaling(changed);
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let changed = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Closed);
            }
            let cur = state.signaling;
            let next = match (description.sdp_type, cur) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                    state.pending_remote = Some(description.clone());
                    SignalingState::HaveRemoteOffer
                }
                (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                    state.current_remote = Some(description.clone());
                    state.current_local = state.pending_local.take();
                    SignalingState::Stable
                }
                _ => return Err(self.invalid("set remote description", cur)),
            };
            state
                .history
                .push(format!("remote:{:?}", description.sdp_type).to_lowercase());
            self.set_signaling(&mut state, next)
        };
        self.notify_signaling(changed);
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let state = self.state.lock();
        state
            .pending_local
            .clone()
            .or_else(|| state.current_local.clone())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        if candidate.candidate.contains("stale") {
            return Err(Error::Engine("unknown ufrag".into()));
        }
        if state.current_remote.is_none() && state.pending_remote.is_none() {
            return Err(Error::Engine("no remote description".into()));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: String) -> Result<FakeSender> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let sender = FakeSender {
            id: state.next_id,
            track,
        };
        state.senders.push(sender.clone());
        Ok(sender)
    }

    async fn remove_track(&self, sender: &FakeSender) -> Result<()> {
        let mut state = self.state.lock();
        let before = state.senders.len();
        state.senders.retain(|s| s.id != sender.id);
        if state.senders.len() == before {
            return Err(Error::Engine("unknown sender".into()));
        }
        Ok(())
    }

    async fn senders(&self) -> Vec<FakeSender> {
        self.state.lock().senders.clone()
    }

    async fn create_negotiated_data_channel(&self, label: &str, id: u16) -> Result<()> {
        self.state.lock().data_channels.push((label.to_string(), id));
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        self.state.lock().gathering
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.state.lock().ice
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().connection
    }

    fn set_event_handler(&self, handler: EngineEventHandler<FakeTrack>) {
        *self.handler.lock() = Some(handler);
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closes += 1;
        state.closed = true;
        state.signaling = SignalingState::Closed;
        Ok(())
    }
}

/// Ждёт выполнения `cond`, через несколько секунд тест падает
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    eventually_within(what, Duration::from_secs(5), cond).await
}

pub async fn eventually_within(what: &str, limit: Duration, cond: impl Fn() -> bool) {
    let waited = tokio::time::timeout(limit, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Доставляет всё, что отправила одна сторона, другой, по порядку
pub fn route<E: RtcEngine>(mut rx: mpsc::UnboundedReceiver<SignalMessage>, to: PeerSession<E>) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                SignalMessage::Description { payload, .. } => {
                    to.accept_remote_description(&payload).await
                }
                SignalMessage::Candidate { payload, .. } => {
                    let _ = to.accept_ice_candidate(&payload).await;
                }
            }
        }
    });
}

pub fn candidate(text: &str) -> String {
    serde_json::to_string(&IceCandidate {
        candidate: text.to_string(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    })
    .unwrap()
}

pub fn description(desc: &SessionDescription) -> String {
    serde_json::to_string(desc).unwrap()
}
