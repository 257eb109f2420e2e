//! Одна согласованная связь с одним удалённым пиром.

use crate::config::{PeerConfig, KEEPALIVE_CHANNEL_ID, KEEPALIVE_LABEL};
use crate::error::Result;
use crate::logger::{dump_candidate, session_span};
use crate::peer::engine::{EngineEvent, RemoteMediaTrack, RtcEngine};
use crate::peer::negotiation::{Exchange, Negotiator};
use crate::peer::state::{ConnectionStateAggregator, PeerState, SubSignal, SubStates};
use crate::peer::tracks::RemoteTrackSet;
use crate::peer::types::{IceCandidate, MediaTracks, PeerRole};
use crate::signaling::SignalingLink;
use crate::utils::random_id;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument, Span};

type StateHandler = Box<dyn Fn(PeerState) + Send + Sync>;
type ClosedHandler = Box<dyn Fn() + Send + Sync>;
type TrackHandler<R> = Box<dyn Fn(Arc<R>) + Send + Sync>;

/// Уведомления владельца, задаются один раз при создании сессии
pub struct SessionHandlers<R> {
    state_changed: Option<StateHandler>,
    closed: Option<ClosedHandler>,
    track: Option<TrackHandler<R>>,
}

impl<R> Default for SessionHandlers<R> {
    fn default() -> Self {
        Self {
            state_changed: None,
            closed: None,
            track: None,
        }
    }
}

impl<R> SessionHandlers<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Вызывается вне стека движка после каждого пересчёта состояния
    pub fn on_state_changed(mut self, f: impl Fn(PeerState) + Send + Sync + 'static) -> Self {
        self.state_changed = Some(Box::new(f));
        self
    }

    /// Вызывается сразу, как только соединение стало disconnected или failed,
    /// до пересчёта состояния
    pub fn on_closed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.closed = Some(Box::new(f));
        self
    }

    /// Вызывается один раз на каждый новый входящий трек
    pub fn on_track(mut self, f: impl Fn(Arc<R>) + Send + Sync + 'static) -> Self {
        self.track = Some(Box::new(f));
        self
    }
}

/// Параметры создания [`PeerSession`]
pub struct SessionParams<T> {
    pub remote_id: String,
    pub role: PeerRole,
    pub tracks: MediaTracks<T>,
    pub keepalive_label: String,
    pub keepalive_channel_id: u16,
}

impl<T> SessionParams<T> {
    pub fn new(remote_id: impl Into<String>, role: PeerRole, tracks: MediaTracks<T>) -> Self {
        Self {
            remote_id: remote_id.into(),
            role,
            tracks,
            keepalive_label: KEEPALIVE_LABEL.into(),
            keepalive_channel_id: KEEPALIVE_CHANNEL_ID,
        }
    }

    pub fn with_config(mut self, config: &PeerConfig) -> Self {
        self.keepalive_label = config.keepalive_label.clone();
        self.keepalive_channel_id = config.keepalive_channel_id;
        self
    }
}

struct Inner<E: RtcEngine> {
    remote_id: String,
    session_id: String,
    created_at: DateTime<Utc>,
    engine: E,
    link: Arc<dyn SignalingLink>,
    negotiator: Negotiator,
    tracks: Mutex<MediaTracks<E::LocalTrack>>,
    remote_tracks: RemoteTrackSet<E::RemoteTrack>,
    aggregator: Mutex<ConnectionStateAggregator>,
    on_closed: Option<ClosedHandler>,
    on_track: Option<TrackHandler<E::RemoteTrack>>,
    notify_tx: mpsc::UnboundedSender<PeerState>,
    closed: AtomicBool,
    span: Span,
}

/// Peer-сессия с perfect negotiation поверх одного соединения движка
pub struct PeerSession<E: RtcEngine> {
    inner: Arc<Inner<E>>,
}

impl<E: RtcEngine> Clone for PeerSession<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: RtcEngine> PeerSession<E> {
    /// Собирает сессию поверх уже созданного соединения движка.
    ///
    /// Вызывать внутри tokio runtime: цикл событий движка и рассылка
    /// состояний работают как отдельные задачи.
    pub async fn with_engine(
        engine: E,
        params: SessionParams<E::LocalTrack>,
        link: Arc<dyn SignalingLink>,
        handlers: SessionHandlers<E::RemoteTrack>,
    ) -> Result<Self> {
        let SessionParams {
            remote_id,
            role,
            tracks,
            keepalive_label,
            keepalive_channel_id,
        } = params;
        let SessionHandlers {
            state_changed,
            closed,
            track,
        } = handlers;

        let session_id = random_id();
        let span = session_span(&remote_id, &session_id, role);

        let initial = SubStates {
            signaling: engine.signaling_state(),
            ice_gathering: engine.ice_gathering_state(),
            ice_connection: engine.ice_connection_state(),
            connection: engine.connection_state(),
        };

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_notifier(notify_rx, state_changed));

        let inner = Arc::new(Inner {
            remote_id,
            session_id,
            created_at: Utc::now(),
            engine,
            link,
            negotiator: Negotiator::new(role),
            tracks: Mutex::new(MediaTracks::default()),
            remote_tracks: RemoteTrackSet::default(),
            aggregator: Mutex::new(ConnectionStateAggregator::new(initial)),
            on_closed: closed,
            on_track: track,
            notify_tx,
            closed: AtomicBool::new(false),
            span,
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        inner.engine.set_event_handler(Arc::new(move |event| {
            let _ = event_tx.send(event);
        }));
        tokio::spawn(run_events(Arc::downgrade(&inner), event_rx));

        let session = Self { inner };
        async {
            info!("creating session");
            session
                .inner
                .engine
                .create_negotiated_data_channel(&keepalive_label, keepalive_channel_id)
                .await?;
            debug!("keepalive channel {keepalive_label}#{keepalive_channel_id} created");
            session.inner.set_tracks(tracks).await
        }
        .instrument(session.inner.span.clone())
        .await?;

        Ok(session)
    }

    pub fn remote_id(&self) -> &str {
        &self.inner.remote_id
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn role(&self) -> PeerRole {
        self.inner.negotiator.role()
    }

    pub fn state(&self) -> PeerState {
        self.inner.aggregator.lock().state()
    }

    /// Живые входящие треки, порядок не гарантируется
    pub fn remote_tracks(&self) -> Vec<Arc<E::RemoteTrack>> {
        self.inner.remote_tracks.snapshot()
    }

    pub fn has_remote_track(&self, id: &str) -> bool {
        self.inner.remote_tracks.contains(id)
    }

    pub fn making_offer(&self) -> bool {
        self.inner.negotiator.making_offer()
    }

    /// true, пока последний входящий offer отброшен из-за коллизии
    pub fn ignoring_offer(&self) -> bool {
        self.inner.negotiator.ignore_offer()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> &E {
        &self.inner.engine
    }

    /// Применяет удалённый session description; ошибки только логируются
    pub async fn accept_remote_description(&self, payload: &str) {
        let inner = &self.inner;
        let ex = inner.exchange();
        inner
            .negotiator
            .accept_remote_description(&ex, payload)
            .instrument(inner.span.clone())
            .await
    }

    /// Применяет удалённый ICE-кандидат.
    ///
    /// Ошибки кандидатов проигнорированного offer'а глотаются,
    /// остальные возвращаются.
    pub async fn accept_ice_candidate(&self, payload: &str) -> Result<()> {
        let inner = &self.inner;
        let ex = inner.exchange();
        inner
            .negotiator
            .accept_ice_candidate(&ex, payload)
            .instrument(inner.span.clone())
            .await
    }

    /// Заменяет все исходящие треки; движок следом поднимет negotiation-needed
    pub async fn set_tracks(&self, tracks: MediaTracks<E::LocalTrack>) -> Result<()> {
        self.inner
            .set_tracks(tracks)
            .instrument(self.inner.span.clone())
            .await
    }

    /// Останавливает входящие треки и закрывает соединение. Повторный вызов ничего не делает.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        async {
            if inner.closed.swap(true, Ordering::SeqCst) {
                debug!("already closed");
                return Ok(());
            }
            let age = Utc::now() - inner.created_at;
            info!("closing connection after {}s", age.num_seconds());
            for track in inner.remote_tracks.drain_unstopped() {
                if let Err(e) = track.stop().await {
                    warn!("failed to stop remote track {}: {e}", track.id());
                }
            }
            inner.engine.close().await
        }
        .instrument(inner.span.clone())
        .await
    }
}

impl<E: RtcEngine> Inner<E> {
    fn exchange(&self) -> Exchange<'_, E> {
        Exchange {
            engine: &self.engine,
            link: self.link.as_ref(),
            remote_id: &self.remote_id,
            options: self.tracks.lock().offer_options(),
        }
    }

    async fn set_tracks(&self, tracks: MediaTracks<E::LocalTrack>) -> Result<()> {
        for sender in self.engine.senders().await {
            self.engine.remove_track(&sender).await?;
            debug!("local removed track");
        }

        if let Some(audio) = tracks.audio.clone() {
            self.engine.add_track(audio).await?;
            debug!("local added audio track");
        }
        if let Some(video) = tracks.video.clone() {
            self.engine.add_track(video).await?;
            debug!("local added video track");
        }

        *self.tracks.lock() = tracks;
        Ok(())
    }

    async fn handle_event(self: &Arc<Self>, event: EngineEvent<E::RemoteTrack>) {
        match event {
            EngineEvent::IceCandidate(Some(candidate)) => self.send_candidate(&candidate).await,
            EngineEvent::IceCandidate(None) => debug!("ICE candidate gathering completed"),
            EngineEvent::Track(track) => self.attach_remote_track(track),
            EngineEvent::TrackMuted(id) => {
                if let Some(track) = self.remote_tracks.take_for_stop(&id) {
                    debug!("remote track {id} muted, stopping");
                    if let Err(e) = track.stop().await {
                        warn!("failed to stop muted track {id}: {e}");
                    }
                }
            }
            EngineEvent::TrackEnded(id) => {
                if self.remote_tracks.remove(&id).is_some() {
                    debug!("remote track {id} ended");
                }
            }
            EngineEvent::NegotiationNeeded => {
                let inner = self.clone();
                tokio::spawn(
                    async move {
                        let ex = inner.exchange();
                        inner.negotiator.negotiation_needed(&ex).await;
                    }
                    .instrument(self.span.clone()),
                );
            }
            EngineEvent::SignalingStateChange(s) => {
                debug!("signaling state → {s:?}");
                self.update_state(SubSignal::Signaling(s));
            }
            EngineEvent::IceGatheringStateChange(s) => {
                debug!("ICE gathering state → {s:?}");
                self.update_state(SubSignal::IceGathering(s));
            }
            EngineEvent::IceConnectionStateChange(s) => {
                debug!("ICE connection state → {s:?}");
                self.update_state(SubSignal::IceConnection(s));
            }
            EngineEvent::ConnectionStateChange(s) => {
                info!("connection state → {s:?}");
                self.update_state(SubSignal::Connection(s));
            }
        }
    }

    fn update_state(&self, signal: SubSignal) {
        if signal.is_connection_lost() {
            if let Some(on_closed) = &self.on_closed {
                on_closed();
            }
        }
        let state = self.aggregator.lock().apply(signal);
        let _ = self.notify_tx.send(state);
    }

    async fn send_candidate(&self, candidate: &IceCandidate) {
        dump_candidate("LOCAL", candidate);
        let payload = match serde_json::to_string(candidate) {
            Ok(p) => p,
            Err(e) => {
                error!("failed to serialize ICE candidate: {e}");
                return;
            }
        };
        match self.link.send_ice_candidate(&self.remote_id, payload).await {
            Ok(()) => debug!("ICE candidate sent"),
            Err(e) => error!("failed to send ICE candidate: {e}"),
        }
    }

    fn attach_remote_track(&self, track: Arc<E::RemoteTrack>) {
        let (id, kind) = (track.id(), track.kind());
        if !self.remote_tracks.insert(track.clone()) {
            debug!("remote {kind} track {id} already attached");
            return;
        }
        debug!("remote attached {kind} track {id}");
        if let Some(on_track) = &self.on_track {
            on_track(track);
        }
    }
}

async fn run_events<E: RtcEngine>(
    inner: Weak<Inner<E>>,
    mut rx: mpsc::UnboundedReceiver<EngineEvent<E::RemoteTrack>>,
) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let span = inner.span.clone();
        inner.handle_event(event).instrument(span).await;
    }
}

async fn run_notifier(mut rx: mpsc::UnboundedReceiver<PeerState>, handler: Option<StateHandler>) {
    while let Some(state) = rx.recv().await {
        if let Some(handler) = &handler {
            handler(state);
        }
    }
}
