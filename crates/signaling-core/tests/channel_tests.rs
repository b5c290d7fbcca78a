//! Integration tests for the signaling channel over the loopback transport

use std::sync::Arc;
use std::time::Duration;

use rtcall_signaling_core::{
    CallId, EndReason, IceCandidate, LoopbackTransport, SignalingChannel, SignalingMessage,
    SignalingPayload, SignalingTransport,
};
use tokio::sync::mpsc;
use tracing_test::traced_test;

fn collecting_channel(
    transport: Arc<LoopbackTransport>,
) -> (Arc<SignalingChannel>, mpsc::UnboundedReceiver<SignalingMessage>) {
    let channel = SignalingChannel::new(transport);
    let (tx, rx) = mpsc::unbounded_channel();
    channel.on_message(move |m: SignalingMessage| {
        let _ = tx.send(m);
    });
    channel.start();
    (channel, rx)
}

#[tokio::test]
async fn test_candidates_arrive_in_send_order() {
    let (a, b) = LoopbackTransport::pair();
    let sender = SignalingChannel::new(a);
    let (_receiver, mut rx) = collecting_channel(b);

    let call_id = CallId::from("ordered");
    for i in 0..20 {
        sender
            .send(SignalingMessage::ice_candidate(
                call_id.clone(),
                IceCandidate::new(format!("candidate:{i} 1 udp 1 10.0.0.1 {} typ host", 4000 + i)),
            ))
            .await;
    }

    for i in 0..20 {
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        match msg.payload {
            SignalingPayload::IceCandidate { candidate } => {
                assert!(candidate.candidate.starts_with(&format!("candidate:{i} ")));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}

#[tokio::test]
#[traced_test]
async fn test_foreign_and_malformed_frames_are_skipped() {
    let (a, b) = LoopbackTransport::pair();
    let (_receiver, mut rx) = collecting_channel(b);

    a.send_text(r#"{"type":"chat_message","callId":"n/a","payload":{"text":"hello"}}"#.into())
        .await
        .unwrap();
    a.send_text("not json at all".into()).await.unwrap();
    a.send_text(r#"{"type":"answer","callId":"c1","payload":{"sdp":"v=0"}}"#.into())
        .await
        .unwrap();
    a.send_text(r#"{"type":"call_decline","callId":"c1","payload":{"reason":"busy"}}"#.into())
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.call_id.as_str(), "c1");
    assert_eq!(msg.payload, SignalingPayload::CallDecline { reason: EndReason::Busy });
    assert!(rx.try_recv().is_err());
    assert!(logs_contain("dropping malformed signaling frame"));
}

#[tokio::test]
async fn test_shutdown_stops_delivery() {
    let (a, b) = LoopbackTransport::pair();
    let sender = SignalingChannel::new(a);
    let (receiver, mut rx) = collecting_channel(b);

    receiver.shutdown();
    tokio::task::yield_now().await;
    sender
        .send(SignalingMessage::call_end(CallId::from("late"), EndReason::Hangup))
        .await;

    let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(got.is_err(), "no message should be delivered after shutdown");
}
