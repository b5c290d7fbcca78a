//! Two managers calling each other over the in-memory transport

mod common;

use common::{build_manager, wait_event};
use rtcall_call_core::{CallConfig, CallEvent, CallState, EndReason};
use rtcall_signaling_core::{CallerIdentity, LoopbackTransport, SignalingChannel};

fn is_state(event: &CallEvent, state: CallState) -> bool {
    matches!(event, CallEvent::StateChanged { current, .. } if *current == state)
}

#[tokio::test(start_paused = true)]
async fn test_two_managers_complete_a_video_call() {
    let (a, b) = LoopbackTransport::pair();
    let alice_config =
        CallConfig::new().with_local_identity(CallerIdentity::new("alice", "Alice"));
    let (alice, alice_media, alice_peers, _, mut alice_events) =
        build_manager(alice_config, SignalingChannel::new(a)).await;
    let (bob, bob_media, bob_peers, _, mut bob_events) =
        build_manager(CallConfig::new(), SignalingChannel::new(b)).await;

    let call_id = alice.try_start_call("bob", true).await.unwrap();

    let CallEvent::IncomingCall { invite } = wait_event(&mut bob_events, |e| {
        matches!(e, CallEvent::IncomingCall { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(invite.call_id, call_id);
    assert_eq!(invite.caller.display_name, "Alice");
    assert!(invite.kind.has_video());

    assert!(bob.accept_call().await);

    wait_event(&mut alice_events, |e| is_state(e, CallState::Active)).await;
    wait_event(&mut bob_events, |e| is_state(e, CallState::Active)).await;
    wait_event(&mut alice_events, |e| {
        matches!(e, CallEvent::RemoteStreamReceived { .. })
    })
    .await;
    wait_event(&mut bob_events, |e| {
        matches!(e, CallEvent::RemoteStreamReceived { .. })
    })
    .await;

    assert_eq!(alice.snapshot().call_id, Some(call_id.clone()));
    assert_eq!(bob.snapshot().call_id, Some(call_id.clone()));

    // Every candidate one side gathered was applied by the other
    assert_eq!(
        bob_peers.stats().candidates_applied(),
        alice_peers.stats().local_candidates()
    );
    assert_eq!(
        alice_peers.stats().candidates_applied(),
        bob_peers.stats().local_candidates()
    );

    alice.end_call().await;
    let CallEvent::CallEnded { info } =
        wait_event(&mut bob_events, |e| matches!(e, CallEvent::CallEnded { .. })).await
    else {
        unreachable!()
    };
    assert!(info.remote);
    assert_eq!(info.reason, EndReason::Hangup);
    assert_eq!(alice.state(), CallState::Idle);
    assert_eq!(bob.state(), CallState::Idle);
    assert_eq!(alice_media.release_count(), 1);
    assert_eq!(bob_media.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_callee_declining_ends_callers_attempt() {
    let (a, b) = LoopbackTransport::pair();
    let (alice, alice_media, _, _, mut alice_events) =
        build_manager(CallConfig::new(), SignalingChannel::new(a)).await;
    let (bob, bob_media, _, _, mut bob_events) =
        build_manager(CallConfig::new(), SignalingChannel::new(b)).await;

    alice.try_start_call("bob", false).await.unwrap();
    wait_event(&mut bob_events, |e| {
        matches!(e, CallEvent::IncomingCall { .. })
    })
    .await;
    bob.decline_call().await.unwrap();

    let CallEvent::CallEnded { info } =
        wait_event(&mut alice_events, |e| matches!(e, CallEvent::CallEnded { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(info.reason, EndReason::Declined);
    assert!(info.remote);
    assert_eq!(alice.state(), CallState::Idle);
    assert_eq!(alice_media.release_count(), 1);
    assert_eq!(bob_media.acquire_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_caller_cancelling_stops_callee_ringing() {
    let (a, b) = LoopbackTransport::pair();
    let (alice, _, _, _, _alice_events) =
        build_manager(CallConfig::new(), SignalingChannel::new(a)).await;
    let (bob, _, _, _, mut bob_events) =
        build_manager(CallConfig::new(), SignalingChannel::new(b)).await;

    alice.try_start_call("bob", false).await.unwrap();
    wait_event(&mut bob_events, |e| {
        matches!(e, CallEvent::IncomingCall { .. })
    })
    .await;
    alice.end_call().await;

    let CallEvent::CallEnded { info } =
        wait_event(&mut bob_events, |e| matches!(e, CallEvent::CallEnded { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(info.reason, EndReason::Cancelled);
    assert_eq!(bob.state(), CallState::Idle);
}
