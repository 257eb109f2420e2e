use crate::peer::engine::{
    IceConnectionState, IceGatheringState, PeerConnectionState, SignalingState,
};
use serde::Serialize;

/// Грубое состояние peer-сессии, от менее к более определённому
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PeerState {
    #[default]
    New,
    Connecting,
    IceConnecting,
    Ready,
    Disconnected,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::IceConnecting => "ice-connecting",
            PeerState::Ready => "ready",
            PeerState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Последние значения независимых под-состояний движка
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubStates {
    pub signaling: SignalingState,
    pub ice_gathering: IceGatheringState,
    pub ice_connection: IceConnectionState,
    pub connection: PeerConnectionState,
}

/// Одно изменение под-состояния, пришедшее от движка
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubSignal {
    Signaling(SignalingState),
    IceGathering(IceGatheringState),
    IceConnection(IceConnectionState),
    Connection(PeerConnectionState),
}

impl SubSignal {
    /// Соединение перешло в disconnected/failed
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SubSignal::Connection(s) if s.is_lost())
    }
}

/// Сводит под-состояния в одно грубое состояние.
///
/// Условия проверяются от менее к более определённому, побеждает последнее
/// совпавшее: потеря соединения перекрывает `Ready` и `IceConnecting`.
/// `_current` не используется, каждый сигнал пересчитывает всё заново.
pub fn reduce(_current: PeerState, subs: &SubStates) -> PeerState {
    let mut state = PeerState::Connecting;

    if subs.ice_gathering == IceGatheringState::Gathering
        || matches!(
            subs.ice_connection,
            IceConnectionState::Checking | IceConnectionState::Completed
        )
    {
        state = PeerState::IceConnecting;
    }
    if subs.connection == PeerConnectionState::Connected {
        state = PeerState::Ready;
    }
    if subs.connection.is_lost() {
        state = PeerState::Disconnected;
    }

    state
}

/// Хранит под-состояния одной сессии и выводит из них [`PeerState`]
#[derive(Debug, Clone, Default)]
pub struct ConnectionStateAggregator {
    subs: SubStates,
    state: PeerState,
}

impl ConnectionStateAggregator {
    pub fn new(initial: SubStates) -> Self {
        Self {
            subs: initial,
            state: PeerState::New,
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn sub_states(&self) -> SubStates {
        self.subs
    }

    pub fn apply(&mut self, signal: SubSignal) -> PeerState {
        match signal {
            SubSignal::Signaling(s) => self.subs.signaling = s,
            SubSignal::IceGathering(s) => self.subs.ice_gathering = s,
            SubSignal::IceConnection(s) => self.subs.ice_connection = s,
            SubSignal::Connection(s) => self.subs.connection = s,
        }
        self.state = reduce(self.state, &self.subs);
        self.state
    }
}
