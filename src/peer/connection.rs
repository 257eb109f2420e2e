//! [`RtcEngine`] поверх webrtc-rs.

use crate::config::PeerConfig;
use crate::error::{Error, Result};
use crate::peer::data_channel::attach_keepalive;
use crate::peer::engine::{
    EngineEvent, EngineEventHandler, IceConnectionState, IceGatheringState, PeerConnectionState,
    RemoteMediaTrack, RtcEngine, SignalingState, TrackKind,
};
use crate::peer::session::{PeerSession, SessionHandlers, SessionParams};
use crate::peer::types::{
    IceCandidate, MediaTracks, OfferOptions, PeerRole, SdpType, ServerConfig, SessionDescription,
};
use crate::signaling::SignalingLink;
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Локальный трек в терминах webrtc-rs
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Входящий трек вместе с его receiver'ом
pub struct WebRtcRemoteTrack {
    track: Arc<TrackRemote>,
    receiver: Arc<RTCRtpReceiver>,
}

impl WebRtcRemoteTrack {
    /// Сам трек, чтобы владелец мог читать RTP
    pub fn track(&self) -> &Arc<TrackRemote> {
        &self.track
    }
}

#[async_trait]
impl RemoteMediaTrack for WebRtcRemoteTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn kind(&self) -> TrackKind {
        match self.track.kind() {
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Audio,
        }
    }

    async fn stop(&self) -> Result<()> {
        self.receiver.stop().await?;
        Ok(())
    }
}

/// Peer connection webrtc-rs за интерфейсом [`RtcEngine`]
pub struct WebRtcEngine {
    api: API,
    config: RTCConfiguration,
    pc: RwLock<Arc<RTCPeerConnection>>,
    // поколение текущего pc: события заменённых соединений отбрасываются
    generation: Arc<AtomicU64>,
    handler: Mutex<Option<EngineEventHandler<WebRtcRemoteTrack>>>,
    keepalive: Mutex<Option<Keepalive>>,
    // очередь смены description: tokio Mutex отдаёт блокировку по порядку запросов
    descriptions: tokio::sync::Mutex<()>,
}

struct Keepalive {
    label: String,
    id: u16,
    channel: Arc<RTCDataChannel>,
}

impl WebRtcEngine {
    /// создаём Peer с дефолтными кодеками и интерцепторами
    pub async fn new(ice_servers: &[ServerConfig]) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = rtc_config(ice_servers);
        let pc = Arc::new(api.new_peer_connection(config.clone()).await?);
        Ok(Self {
            api,
            config,
            pc: RwLock::new(pc),
            generation: Arc::new(AtomicU64::new(0)),
            handler: Mutex::new(None),
            keepalive: Mutex::new(None),
            descriptions: tokio::sync::Mutex::new(()),
        })
    }

    /// Текущее соединение; после отката offer'а это уже другой объект
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        self.pc.read().clone()
    }

    /// Легаси offerToReceiveAudio/Video: recvonly transceiver нужного вида, если его нет
    async fn ensure_receiving(&self, kind: RTPCodecType) -> Result<()> {
        let pc = self.peer_connection();
        let present = pc.get_transceivers().await.iter().any(|t| t.kind() == kind);
        if !present {
            debug!("adding recvonly {kind} transceiver");
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        }
        Ok(())
    }

    /// Откат pending local offer'а.
    ///
    /// webrtc-rs не умеет переход have-local-offer -> stable через rollback,
    /// поэтому неотвеченный первый offer выбрасывается вместе с соединением:
    /// создаётся новое с той же конфигурацией, треками и keepalive каналом.
    async fn rollback(&self) -> Result<()> {
        let old = self.peer_connection();
        if old.signaling_state() != RTCSignalingState::HaveLocalOffer {
            debug!("rollback requested without pending local offer");
            return Ok(());
        }
        if old.current_local_description().await.is_some() {
            return Err(Error::Engine(
                "rollback of a renegotiation offer is not supported by webrtc-rs".into(),
            ));
        }

        let pc = Arc::new(self.api.new_peer_connection(self.config.clone()).await?);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handler = self.handler.lock().clone();
        if let Some(handler) = &handler {
            register_handlers(&pc, handler.clone(), self.generation.clone(), generation);
        }

        for sender in old.get_senders().await {
            if let Some(track) = sender.track().await {
                pc.add_track(track).await?;
            }
        }

        let params = self
            .keepalive
            .lock()
            .as_ref()
            .map(|k| (k.label.clone(), k.id));
        if let Some((label, id)) = params {
            let channel = open_keepalive(&pc, &label, id).await?;
            *self.keepalive.lock() = Some(Keepalive { label, id, channel });
        }

        *self.pc.write() = pc;
        info!("local offer rolled back, peer connection replaced");
        if let Err(e) = old.close().await {
            warn!("failed to close replaced peer connection: {e}");
        }
        if let Some(handler) = handler {
            handler(EngineEvent::SignalingStateChange(SignalingState::Stable));
        }
        Ok(())
    }
}

#[async_trait]
impl RtcEngine for WebRtcEngine {
    type LocalTrack = LocalTrack;
    type Sender = Arc<RTCRtpSender>;
    type RemoteTrack = WebRtcRemoteTrack;

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription> {
        if options.offer_to_receive_audio {
            self.ensure_receiving(RTPCodecType::Audio).await?;
        }
        if options.offer_to_receive_video {
            self.ensure_receiving(RTPCodecType::Video).await?;
        }

        let pc = self.peer_connection();
        // до первого согласования ICE агента ещё нет, перезапускать нечего
        let ice_restart = options.ice_restart && pc.current_local_description().await.is_some();
        let offer = pc
            .create_offer(Some(RTCOfferOptions {
                ice_restart,
                ..Default::default()
            }))
            .await?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self, _options: OfferOptions) -> Result<SessionDescription> {
        let answer = self.peer_connection().create_answer(None).await?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let _queue = self.descriptions.lock().await;
        if description.sdp_type == SdpType::Rollback {
            return self.rollback().await;
        }
        self.peer_connection()
            .set_local_description(to_rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let _queue = self.descriptions.lock().await;
        self.peer_connection()
            .set_remote_description(to_rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection()
            .local_description()
            .await
            .and_then(|d| from_rtc_description(d).ok())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection().add_ice_candidate(init).await?;
        Ok(())
    }

    async fn add_track(&self, track: LocalTrack) -> Result<Arc<RTCRtpSender>> {
        Ok(self.peer_connection().add_track(track).await?)
    }

    async fn remove_track(&self, sender: &Arc<RTCRtpSender>) -> Result<()> {
        self.peer_connection().remove_track(sender).await?;
        Ok(())
    }

    /// Только senders с треком: после remove_track webrtc-rs оставляет пустые
    async fn senders(&self) -> Vec<Arc<RTCRtpSender>> {
        let mut senders = Vec::new();
        for sender in self.peer_connection().get_senders().await {
            if sender.track().await.is_some() {
                senders.push(sender);
            }
        }
        senders
    }

    async fn create_negotiated_data_channel(&self, label: &str, id: u16) -> Result<()> {
        let channel = open_keepalive(&self.peer_connection(), label, id).await?;
        *self.keepalive.lock() = Some(Keepalive {
            label: label.to_string(),
            id,
            channel,
        });
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.pc.read().signaling_state().into()
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        self.pc.read().ice_gathering_state().into()
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.pc.read().ice_connection_state().into()
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.pc.read().connection_state().into()
    }

    fn set_event_handler(&self, handler: EngineEventHandler<WebRtcRemoteTrack>) {
        *self.handler.lock() = Some(handler.clone());
        let generation = self.generation.load(Ordering::SeqCst);
        register_handlers(
            &self.peer_connection(),
            handler,
            self.generation.clone(),
            generation,
        );
    }

    async fn close(&self) -> Result<()> {
        let keepalive = self.keepalive.lock().take();
        if let Some(k) = keepalive {
            debug!("dropping keepalive channel {}", k.channel.label());
        }
        self.peer_connection().close().await?;
        Ok(())
    }
}

async fn open_keepalive(
    pc: &RTCPeerConnection,
    label: &str,
    id: u16,
) -> Result<Arc<RTCDataChannel>> {
    let dc = pc
        .create_data_channel(
            label,
            Some(RTCDataChannelInit {
                negotiated: Some(id),
                ..Default::default()
            }),
        )
        .await?;
    attach_keepalive(&dc);
    Ok(dc)
}

/// Вешает callback'и pc; события доходят, пока его поколение текущее
fn register_handlers(
    pc: &RTCPeerConnection,
    handler: EngineEventHandler<WebRtcRemoteTrack>,
    current: Arc<AtomicU64>,
    generation: u64,
) {
    // ended приходит и от заменённого соединения: его треки надо убрать
    let ended = handler.clone();
    let live: EngineEventHandler<WebRtcRemoteTrack> = Arc::new(move |event| {
        if current.load(Ordering::SeqCst) == generation {
            handler(event);
        }
    });

    let h = live.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let candidate = match cand.map(|c| c.to_json()) {
            Some(Ok(init)) => Some(IceCandidate {
                candidate: init.candidate,
                sdp_mid: init.sdp_mid,
                sdp_mline_index: init.sdp_mline_index,
                username_fragment: init.username_fragment,
            }),
            Some(Err(e)) => {
                warn!("failed to serialize local candidate: {e}");
                None
            }
            // cand == None означает конец сбора
            None => {
                h(EngineEvent::IceCandidate(None));
                None
            }
        };
        if let Some(candidate) = candidate {
            h(EngineEvent::IceCandidate(Some(candidate)));
        }
        Box::pin(async {})
    }));

    let h = live.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let id = track.id();
            h(EngineEvent::Track(Arc::new(WebRtcRemoteTrack {
                track,
                receiver: receiver.clone(),
            })));

            // receiver перестаёт отдавать RTCP, когда трек завершён
            let ended = ended.clone();
            tokio::spawn(async move {
                while receiver.read_rtcp().await.is_ok() {}
                ended(EngineEvent::TrackEnded(id));
            });
            Box::pin(async {})
        },
    ));

    let h = live.clone();
    pc.on_negotiation_needed(Box::new(move || {
        h(EngineEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let h = live.clone();
    pc.on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
        h(EngineEvent::SignalingStateChange(s.into()));
        Box::pin(async {})
    }));

    let h = live.clone();
    pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
        h(EngineEvent::IceGatheringStateChange(s.into()));
        Box::pin(async {})
    }));

    let h = live.clone();
    pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
        h(EngineEvent::IceConnectionStateChange(s.into()));
        Box::pin(async {})
    }));

    let h = live;
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        h(EngineEvent::ConnectionStateChange(s.into()));
        Box::pin(async {})
    }));
}

impl PeerSession<WebRtcEngine> {
    /// Создаёт webrtc-rs соединение по конфигурации и сессию поверх него
    pub async fn connect(
        config: &PeerConfig,
        remote_id: impl Into<String>,
        tracks: MediaTracks<LocalTrack>,
        role: PeerRole,
        link: Arc<dyn SignalingLink>,
        handlers: SessionHandlers<WebRtcRemoteTrack>,
    ) -> Result<Self> {
        config.validate()?;
        let engine = WebRtcEngine::new(&config.ice_servers).await?;
        let params = SessionParams::new(remote_id, role, tracks).with_config(config);
        PeerSession::with_engine(engine, params, link, handlers).await
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Перевод серверов из конфигурации в формат webrtc-rs
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| {
            let url = add_ice_url_scheme(config);

            RTCIceServer {
                urls: vec![url],
                username: config.username.clone().unwrap_or_default(),
                credential: config.credential.clone().unwrap_or_default(),
            }
        })
        .collect()
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let SessionDescription { sdp_type, sdp } = description;
    let rtc = match sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback
        }
    };
    Ok(rtc)
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::Engine("session description without type".into()))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}
