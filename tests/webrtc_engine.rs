mod common;

use common::{eventually_within, route};
use ikazuchi_peer::peer::{LocalTrack, MediaTracks, PeerRole, RtcEngine, SignalingState};
use ikazuchi_peer::{ChannelLink, PeerConfig, PeerSession, SessionHandlers, SignalMessage, WebRtcEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const LIMIT: Duration = Duration::from_secs(10);

fn opus_track(id: &str) -> LocalTrack {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        "ikazuchi".to_owned(),
    ))
}

async fn session(
    remote: &str,
    role: PeerRole,
    track: &str,
) -> (PeerSession<WebRtcEngine>, mpsc::UnboundedReceiver<SignalMessage>) {
    let (link, rx) = ChannelLink::new();
    let config = PeerConfig {
        ice_servers: vec![],
        ..Default::default()
    };
    let session = PeerSession::connect(
        &config,
        remote,
        MediaTracks::new(Some(opus_track(track)), None),
        role,
        Arc::new(link),
        SessionHandlers::new(),
    )
    .await
    .unwrap();
    (session, rx)
}

async fn wait_for_local_offer(session: &PeerSession<WebRtcEngine>) {
    let engine = session.engine();
    eventually_within("local offer", LIMIT, || {
        engine.signaling_state() == SignalingState::HaveLocalOffer && !session.making_offer()
    })
    .await;
}

fn origin(desc: Option<RTCSessionDescription>) -> Option<String> {
    desc.and_then(|d| {
        d.sdp
            .lines()
            .find(|l| l.starts_with("o="))
            .map(str::to_owned)
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_offer_goes_out_with_ice_restart_requested() {
    let (alice, mut rx) = session("bob", PeerRole::Impolite, "alice-audio").await;
    wait_for_local_offer(&alice).await;

    match rx.recv().await.unwrap() {
        SignalMessage::Description { remote_id, payload } => {
            assert_eq!(remote_id, "bob");
            assert!(payload.contains("\"type\":\"offer\""));
            assert!(payload.contains("m=audio"));
        }
        other => panic!("unexpected message {other:?}"),
    }
    alice.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crossing_offers_converge_on_webrtc_engine() {
    let (alice, alice_rx) = session("bob", PeerRole::Impolite, "alice-audio").await;
    let (bob, bob_rx) = session("alice", PeerRole::Polite, "bob-audio").await;

    // both offers are out before either side hears from the other
    wait_for_local_offer(&alice).await;
    wait_for_local_offer(&bob).await;
    route(alice_rx, bob.clone());
    route(bob_rx, alice.clone());

    let (a, b) = (alice.engine(), bob.engine());
    eventually_within("both sides stable", LIMIT, || {
        a.signaling_state() == SignalingState::Stable
            && b.signaling_state() == SignalingState::Stable
    })
    .await;

    let (a_pc, b_pc) = (a.peer_connection(), b.peer_connection());
    let alice_offer = origin(a_pc.current_local_description().await);
    let bob_answer = origin(b_pc.current_local_description().await);
    assert!(alice_offer.is_some());
    assert!(bob_answer.is_some());
    assert_eq!(alice_offer, origin(b_pc.current_remote_description().await));
    assert_eq!(bob_answer, origin(a_pc.current_remote_description().await));

    assert!(!alice.making_offer());
    assert!(!bob.making_offer());
    assert_eq!(b.senders().await.len(), 1);

    alice.close().await.unwrap();
    bob.close().await.unwrap();
}
