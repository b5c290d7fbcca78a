//! Generated operation sequences against a single manager
//!
//! Whatever mix of local operations and remote messages arrives, the manager
//! holds at most one session and exactly one local stream while a call needs
//! it.

mod common;

use std::time::Duration;

use proptest::prelude::*;

use common::{Harness, remote_answer};
use rtcall_call_core::{CallState, EndReason, MediaKind};
use rtcall_signaling_core::SignalingMessage;

#[derive(Debug, Clone)]
enum Step {
    Start { video: bool },
    Accept,
    Decline,
    End,
    Dismiss,
    RingIn { video: bool },
    RemoteAnswer,
    RemoteHangup,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<bool>().prop_map(|video| Step::Start { video }),
        Just(Step::Accept),
        Just(Step::Decline),
        Just(Step::End),
        Just(Step::Dismiss),
        any::<bool>().prop_map(|video| Step::RingIn { video }),
        Just(Step::RemoteAnswer),
        Just(Step::RemoteHangup),
    ]
}

async fn apply(h: &Harness, step: &Step, invites: &mut usize) {
    match step {
        Step::Start { video } => {
            h.manager.start_call("u2", *video).await;
        }
        Step::Accept => {
            h.manager.accept_call().await;
        }
        Step::Decline => {
            let _ = h.manager.decline_call().await;
        }
        Step::End => h.manager.end_call().await,
        Step::Dismiss => {
            h.manager.dismiss_waiting_call().await;
        }
        Step::RingIn { video } => {
            *invites += 1;
            let kind = MediaKind::from_wants_video(*video);
            h.ring_in(&format!("in-{}", invites), kind).await;
        }
        Step::RemoteAnswer => {
            let snapshot = h.manager.snapshot();
            if let (CallState::Dialing, Some(call_id)) = (snapshot.state, snapshot.call_id) {
                h.send_remote(SignalingMessage::answer(call_id, remote_answer()))
                    .await;
            }
        }
        Step::RemoteHangup => {
            if let Some(call_id) = h.manager.snapshot().call_id {
                h.send_remote(SignalingMessage::call_end(call_id, EndReason::Hangup))
                    .await;
            }
        }
    }
}

fn check_invariants(h: &Harness, step: &Step) -> Result<(), TestCaseError> {
    let snapshot = h.manager.snapshot();
    let held = h.provider.acquire_count() - h.provider.release_count();

    prop_assert_eq!(
        held,
        usize::from(snapshot.state.has_local_media()),
        "local streams held in {} after {:?}",
        snapshot.state,
        step
    );
    prop_assert_eq!(
        snapshot.call_id.is_some(),
        snapshot.state != CallState::Idle,
        "session presence in {} after {:?}",
        snapshot.state,
        step
    );
    if snapshot.waiting_invite.is_some() {
        prop_assert_ne!(snapshot.state, CallState::Idle);
        prop_assert_ne!(snapshot.waiting_invite.map(|w| w.call_id), snapshot.call_id);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_single_session_for_any_sequence(steps in prop::collection::vec(step(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = Harness::new().await;
            let mut invites = 0;
            for step in &steps {
                apply(&h, step, &mut invites).await;
                // Let in-flight signaling and adapter events land
                tokio::time::sleep(Duration::from_millis(10)).await;
                check_invariants(&h, step)?;
            }

            h.manager.end_call().await;
            h.manager.dismiss_waiting_call().await;
            h.manager.end_call().await;
            prop_assert_eq!(h.provider.acquire_count(), h.provider.release_count());
            h.manager.shutdown().await;
            Ok::<(), TestCaseError>(())
        })?;
    }
}
