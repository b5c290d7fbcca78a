//! End-to-end call flows on the simulated stack
//!
//! The manager's signaling peer is driven by hand, so every inbound message
//! and its timing is under the test's control. Time is paused; simulated
//! delays elapse instantly.

mod common;

use std::time::Duration;

use common::{Harness, remote_answer, remote_candidate, remote_offer};
use rtcall_call_core::record::RecordStatus;
use rtcall_call_core::{
    CallConfig, CallError, CallEvent, CallId, CallState, CameraFacing, EndReason, MediaKind,
    format_duration,
};
use rtcall_signaling_core::{CallerIdentity, SignalingMessage, SignalingPayload};
use tokio::time::Instant;
use tracing_test::traced_test;

fn is_state(event: &CallEvent, state: CallState) -> bool {
    matches!(event, CallEvent::StateChanged { current, .. } if *current == state)
}

fn is_ended(event: &CallEvent) -> bool {
    matches!(event, CallEvent::CallEnded { .. })
}

/// Place a call and answer it from the far end; returns once `Active`
async fn establish_outgoing(h: &mut Harness, wants_video: bool) -> CallId {
    let call_id = h
        .manager
        .try_start_call("u2", wants_video)
        .await
        .expect("call starts");
    h.wait_sent("offer").await;
    h.send_remote(SignalingMessage::answer(call_id.clone(), remote_answer()))
        .await;
    h.wait_event(|e| is_state(e, CallState::Active)).await;
    call_id
}

#[tokio::test(start_paused = true)]
async fn test_outgoing_call_becomes_active_after_remote_answer() {
    let mut h = Harness::new().await;

    assert!(h.manager.start_call("u2", false).await);
    assert_eq!(h.manager.state(), CallState::Dialing);

    let CallEvent::CallStarted { call_id } =
        h.wait_event(|e| matches!(e, CallEvent::CallStarted { .. })).await
    else {
        unreachable!()
    };
    assert!(!call_id.as_str().is_empty());

    let invite = h.wait_sent("incoming_call").await;
    assert_eq!(invite.call_id, call_id);
    let offer = h.wait_sent("offer").await;
    match offer.payload {
        SignalingPayload::Offer { kind, .. } => assert_eq!(kind, MediaKind::Voice),
        other => panic!("expected offer, got {:?}", other),
    }

    let answered_at = Instant::now();
    h.send_remote(SignalingMessage::answer(call_id.clone(), remote_answer()))
        .await;

    h.wait_event(|e| is_state(e, CallState::Connecting)).await;
    h.wait_event(|e| is_state(e, CallState::Active)).await;
    h.wait_event(|e| matches!(e, CallEvent::RemoteStreamReceived { .. }))
        .await;

    let config = CallConfig::new().simulated;
    let window =
        Duration::from_millis(config.connect_delay_ms + config.remote_stream_delay_ms + 100);
    assert!(answered_at.elapsed() <= window);

    let snapshot = h.manager.snapshot();
    assert_eq!(snapshot.state, CallState::Active);
    assert_eq!(snapshot.call_id, Some(call_id.clone()));
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.remote_stream.is_some());
    assert_eq!(
        h.records.record(&call_id).map(|r| r.status),
        Some(RecordStatus::Created)
    );
}

#[tokio::test(start_paused = true)]
async fn test_incoming_call_rings_then_connects_on_accept() {
    let mut h = Harness::new().await;

    let call_id = h.ring_in("inbound-1", MediaKind::Video).await;
    let CallEvent::IncomingCall { invite } = h
        .wait_event(|e| matches!(e, CallEvent::IncomingCall { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(invite.call_id, call_id);
    assert_eq!(invite.caller.display_name, "Remote User");
    assert_eq!(h.manager.state(), CallState::Ringing);
    assert_eq!(h.manager.caller().map(|c| c.id), Some("u2".to_string()));

    assert!(h.manager.accept_call().await);
    assert_eq!(h.manager.state(), CallState::Connecting);

    let answer = h.wait_sent("answer").await;
    assert_eq!(answer.call_id, call_id);

    h.wait_event(|e| is_state(e, CallState::Active)).await;
    assert_eq!(h.manager.state(), CallState::Active);
    assert!(!h.manager.is_video_off());
    assert_eq!(format_duration(125), "02:05");
}

#[tokio::test(start_paused = true)]
async fn test_end_call_from_active_stops_duration_ticks() {
    let mut h = Harness::new().await;
    establish_outgoing(&mut h, false).await;

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(h.manager.duration_secs(), 3);
    assert_eq!(h.manager.snapshot().formatted_duration(), "00:03");

    h.manager.end_call().await;
    assert_eq!(h.manager.state(), CallState::Idle);

    let before = h.drain_events().await;
    let CallEvent::CallEnded { info } = before.iter().rev().find(|e| is_ended(e)).unwrap() else {
        unreachable!()
    };
    assert_eq!(info.reason, EndReason::Hangup);
    assert_eq!(info.duration_secs, 3);
    assert!(!info.remote);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let after = h.drain_events().await;
    assert!(
        !after
            .iter()
            .any(|e| matches!(e, CallEvent::DurationTick { .. })),
        "tick after end: {:?}",
        after
    );
    assert_eq!(h.manager.duration_secs(), 0);

    let end = h.wait_sent("call_end").await;
    assert!(matches!(
        end.payload,
        SignalingPayload::CallEnd {
            reason: EndReason::Hangup
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_remote_end_while_dialing_returns_to_idle() {
    let mut h = Harness::new().await;
    let call_id = h.manager.try_start_call("u2", true).await.unwrap();
    h.wait_sent("offer").await;

    h.send_remote(SignalingMessage::call_end(call_id.clone(), EndReason::Hangup))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.manager.state(), CallState::Idle);

    let seen = h.drain_events().await;
    assert!(!seen.iter().any(|e| is_state(e, CallState::Active)));
    let Some(CallEvent::CallEnded { info }) = seen.iter().find(|e| is_ended(e)) else {
        panic!("no CallEnded in {:?}", seen)
    };
    assert_eq!(info.call_id, Some(call_id));
    assert!(info.remote);
    assert_eq!(h.provider.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remote_decline_ends_outgoing_call() {
    let mut h = Harness::new().await;
    let call_id = h.manager.try_start_call("u2", false).await.unwrap();

    h.send_remote(SignalingMessage::call_decline(
        call_id.clone(),
        EndReason::Declined,
    ))
    .await;
    let CallEvent::CallEnded { info } = h.wait_event(is_ended).await else {
        unreachable!()
    };
    assert_eq!(info.reason, EndReason::Declined);
    assert_eq!(
        h.records.record(&call_id).map(|r| r.status),
        Some(RecordStatus::Ended)
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_end_call_ends_once() {
    let mut h = Harness::new().await;
    let call_id = establish_outgoing(&mut h, true).await;

    tokio::join!(h.manager.end_call(), h.manager.end_call());
    h.manager.end_call().await;

    let seen = h.drain_events().await;
    assert_eq!(seen.iter().filter(|e| is_ended(e)).count(), 1);
    assert_eq!(h.provider.acquire_count(), 1);
    assert_eq!(h.provider.release_count(), 1);
    assert_eq!(
        h.records.record(&call_id).map(|r| r.status),
        Some(RecordStatus::Ended)
    );
}

#[tokio::test(start_paused = true)]
async fn test_end_call_while_idle_is_a_no_op() {
    let mut h = Harness::new().await;
    h.manager.end_call().await;
    assert_eq!(h.manager.state(), CallState::Idle);
    assert!(h.drain_events().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_candidates_before_offer_are_all_applied() {
    let mut h = Harness::new().await;
    let call_id = CallId::from("early-ice");

    h.send_remote(SignalingMessage::incoming_call(
        call_id.clone(),
        CallerIdentity::new("u2", "Remote User"),
        MediaKind::Voice,
    ))
    .await;
    for i in 0..3 {
        h.send_remote(SignalingMessage::ice_candidate(
            call_id.clone(),
            remote_candidate(i),
        ))
        .await;
    }
    h.wait_event(|e| matches!(e, CallEvent::IncomingCall { .. }))
        .await;

    // Accept before the offer arrives; the answer follows the offer
    assert!(h.manager.accept_call().await);
    h.send_remote(SignalingMessage::ice_candidate(
        call_id.clone(),
        remote_candidate(3),
    ))
    .await;
    h.send_remote(SignalingMessage::offer(
        call_id.clone(),
        remote_offer(),
        MediaKind::Voice,
    ))
    .await;

    h.wait_sent("answer").await;
    h.wait_event(|e| is_state(e, CallState::Active)).await;

    h.send_remote(SignalingMessage::ice_candidate(call_id, remote_candidate(4)))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = h.peers.stats();
    assert_eq!(stats.candidates_received(), 5);
    assert_eq!(stats.candidates_applied(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_decline_never_acquires_media() {
    let mut h = Harness::new().await;
    let call_id = h.ring_in("to-decline", MediaKind::Video).await;
    h.wait_event(|e| matches!(e, CallEvent::IncomingCall { .. }))
        .await;

    h.manager.decline_call().await.unwrap();
    assert_eq!(h.manager.state(), CallState::Idle);
    assert_eq!(h.provider.acquire_count(), 0);
    assert_eq!(h.peers.stats().adapters_created(), 0);

    let decline = h.wait_sent("call_decline").await;
    assert_eq!(decline.call_id, call_id);
    assert!(matches!(
        decline.payload,
        SignalingPayload::CallDecline {
            reason: EndReason::Declined
        }
    ));
    let CallEvent::CallEnded { info } = h.wait_event(is_ended).await else {
        unreachable!()
    };
    assert_eq!(info.reason, EndReason::Declined);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_invite_times_out() {
    let mut h = Harness::new().await;
    let call_id = h.ring_in("missed", MediaKind::Voice).await;
    h.wait_event(|e| matches!(e, CallEvent::IncomingCall { .. }))
        .await;

    let ring = Duration::from_secs(CallConfig::new().timeouts.ring_timeout_secs);
    tokio::time::sleep(ring + Duration::from_secs(1)).await;

    assert_eq!(h.manager.state(), CallState::Idle);
    let decline = h.wait_sent("call_decline").await;
    assert_eq!(decline.call_id, call_id);
    assert!(matches!(
        decline.payload,
        SignalingPayload::CallDecline {
            reason: EndReason::NoAnswer
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_outgoing_call_times_out() {
    let mut h = Harness::new().await;
    h.manager.try_start_call("u2", false).await.unwrap();

    let CallEvent::CallEnded { info } = h.wait_event(is_ended).await else {
        unreachable!()
    };
    assert_eq!(info.reason, EndReason::Timeout);
    assert_eq!(h.manager.state(), CallState::Idle);
    assert_eq!(h.provider.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_failure_tears_down() {
    let mut h = Harness::new().await;
    h.peers.fail_next_negotiation();

    let call_id = h.manager.try_start_call("u2", false).await.unwrap();
    h.send_remote(SignalingMessage::answer(call_id, remote_answer()))
        .await;

    h.wait_event(|e| matches!(e, CallEvent::Error { .. })).await;
    let CallEvent::CallEnded { info } = h.wait_event(is_ended).await else {
        unreachable!()
    };
    assert_eq!(info.reason, EndReason::Failed);
    assert_eq!(h.manager.state(), CallState::Idle);
    assert_eq!(h.provider.release_count(), 1);

    let end = h.wait_sent("call_end").await;
    assert!(matches!(
        end.payload,
        SignalingPayload::CallEnd {
            reason: EndReason::Failed
        }
    ));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_record_failure_keeps_idle() {
    let mut h = Harness::new().await;
    h.records
        .set_creation_failure(Some("service unavailable".to_string()));

    assert!(!h.manager.start_call("u2", false).await);
    assert_eq!(h.manager.state(), CallState::Idle);
    assert_eq!(h.provider.acquire_count(), 0);

    let CallEvent::Error { message } = h
        .wait_event(|e| matches!(e, CallEvent::Error { .. }))
        .await
    else {
        unreachable!()
    };
    assert!(message.contains("service unavailable"));

    // Reported at error level exactly once
    logs_assert(|lines: &[&str]| {
        let errors = lines.iter().filter(|line| line.contains("ERROR")).count();
        match errors {
            1 => Ok(()),
            n => Err(format!("expected one error line, found {}", n)),
        }
    });
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_operations_outside_their_states_are_rejected() {
    let h = Harness::new().await;

    assert!(!h.manager.accept_call().await);
    assert!(matches!(
        h.manager.decline_call().await,
        Err(CallError::InvalidStateTransition {
            state: CallState::Idle,
            ..
        })
    ));
    assert_eq!(h.manager.switch_camera().await.unwrap(), CameraFacing::Front);
    assert!(!h.manager.toggle_mute().await);
    assert!(!h.manager.is_muted());

    assert!(h.manager.start_call("u2", false).await);
    assert!(matches!(
        h.manager.try_start_call("u3", false).await,
        Err(CallError::InvalidStateTransition {
            state: CallState::Dialing,
            ..
        })
    ));
    assert_eq!(h.records.len(), 1);
    assert!(logs_contain("invalid state transition rejected"));
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "Invalid state transition")]
async fn test_strict_mode_panics_on_invalid_transition() {
    let h = Harness::with_config(CallConfig::new().with_strict_transitions(true)).await;
    let _ = h.manager.try_accept_call().await;
}

#[tokio::test(start_paused = true)]
async fn test_media_controls_follow_local_stream() {
    let mut h = Harness::new().await;
    establish_outgoing(&mut h, true).await;

    assert!(!h.manager.is_video_off());
    assert!(h.manager.toggle_mute().await);
    assert!(h.manager.is_muted());
    assert!(h.manager.toggle_video().await);
    assert!(h.manager.is_video_off());
    assert_eq!(h.manager.switch_camera().await.unwrap(), CameraFacing::Back);

    h.manager.end_call().await;
    assert!(!h.manager.is_muted());
    assert!(!h.manager.toggle_mute().await);
}

#[tokio::test(start_paused = true)]
async fn test_offer_without_invite_rings_as_unknown_caller() {
    let mut h = Harness::new().await;
    h.send_remote(SignalingMessage::offer(
        CallId::from("offer-only"),
        remote_offer(),
        MediaKind::Voice,
    ))
    .await;

    let CallEvent::IncomingCall { invite } = h
        .wait_event(|e| matches!(e, CallEvent::IncomingCall { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(invite.caller, CallerIdentity::unknown());
    assert!(invite.remote_offer.is_some());

    assert!(h.manager.accept_call().await);
    h.wait_sent("answer").await;
    h.wait_event(|e| is_state(e, CallState::Active)).await;
}

#[tokio::test(start_paused = true)]
async fn test_offer_after_decline_does_not_ring_again() {
    let mut h = Harness::new().await;
    let call_id = CallId::from("declined");
    h.send_remote(SignalingMessage::incoming_call(
        call_id.clone(),
        CallerIdentity::new("u2", "Remote User"),
        MediaKind::Voice,
    ))
    .await;
    h.wait_event(|e| matches!(e, CallEvent::IncomingCall { .. }))
        .await;
    h.manager.decline_call().await.unwrap();
    h.wait_event(is_ended).await;

    // The caller's offer was already in flight
    h.send_remote(SignalingMessage::offer(
        call_id.clone(),
        remote_offer(),
        MediaKind::Voice,
    ))
    .await;
    h.send_remote(SignalingMessage::ice_candidate(
        call_id.clone(),
        remote_candidate(0),
    ))
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.manager.state(), CallState::Idle);
    assert!(h.manager.caller().is_none());
    let seen = h.drain_events().await;
    assert!(
        !seen
            .iter()
            .any(|e| matches!(e, CallEvent::IncomingCall { .. }))
    );
    assert_eq!(h.provider.acquire_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_offer_after_ring_timeout_does_not_ring_again() {
    let mut h = Harness::new().await;
    let call_id = CallId::from("missed");
    h.send_remote(SignalingMessage::incoming_call(
        call_id.clone(),
        CallerIdentity::new("u2", "Remote User"),
        MediaKind::Video,
    ))
    .await;
    h.wait_event(is_ended).await;
    assert_eq!(h.manager.state(), CallState::Idle);

    h.send_remote(SignalingMessage::offer(call_id, remote_offer(), MediaKind::Video))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.manager.state(), CallState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_switch_camera_without_local_stream_keeps_facing() {
    let mut h = Harness::with_config(CallConfig::new().with_strict_transitions(true)).await;
    assert_eq!(h.manager.switch_camera().await.unwrap(), CameraFacing::Front);

    h.ring_in("ringing", MediaKind::Video).await;
    h.wait_event(|e| matches!(e, CallEvent::IncomingCall { .. }))
        .await;
    assert_eq!(h.manager.state(), CallState::Ringing);
    assert_eq!(h.manager.switch_camera().await.unwrap(), CameraFacing::Front);
    assert_eq!(h.provider.acquire_count(), 0);
}
