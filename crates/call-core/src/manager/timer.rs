//! Session timers
//!
//! Timers never touch session state. They post a command tagged with the
//! session generation they were started for; the actor drops the command if
//! the session has moved on.

use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::actor::{Command, TimeoutKind};

/// Interval of the call duration counter
pub(crate) const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Post `Command::Tick` every second, starting one second from now
pub(crate) fn spawn_duration_ticker(
    commands: WeakUnboundedSender<Command>,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(commands) = commands.upgrade() else {
                break;
            };
            if commands.send(Command::Tick { generation }).is_err() {
                break;
            }
        }
    })
}

/// Post `Command::Timeout` once after `after`
pub(crate) fn spawn_timeout(
    commands: WeakUnboundedSender<Command>,
    generation: u64,
    kind: TimeoutKind,
    after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(commands) = commands.upgrade() {
            let _ = commands.send(Command::Timeout { generation, kind });
        }
    })
}
