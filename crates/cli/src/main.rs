//! `rtcall` - inspect the media environment and run loopback demo calls

mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use rtcall_call_core::{
    CallConfig, CallEndedInfo, CallEvent, CallEventHandler, CallId, CallSessionManager,
    CallState, EnvironmentCapabilitySelector, MediaMode, MediaStack, MediaStream,
    format_duration,
};
use rtcall_signaling_core::{CallerIdentity, LoopbackTransport, SignalingChannel};

use crate::logging::{LoggingConfig, parse_log_level, setup_logging};

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer call session tool", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "RTCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the media mode (auto, hardware, simulated)
    #[arg(short, long)]
    media_mode: Option<MediaMode>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Log span enter and exit events
    #[arg(long)]
    log_spans: bool,

    /// Include source file and line in log lines
    #[arg(long)]
    log_location: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report which media stack this host would run on
    Probe,
    /// Print the effective configuration as TOML
    Config,
    /// Place a call between two in-process managers
    Demo {
        /// Make it a video call
        #[arg(long)]
        video: bool,
        /// How long to stay connected
        #[arg(long, default_value = "3")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = parse_log_level(&cli.log_level)?;
    setup_logging(
        LoggingConfig::new(level)
            .with_json(cli.json)
            .with_file_info(cli.log_location)
            .with_log_spans(cli.log_spans),
    )?;

    let config = load_config(&cli)?;
    match cli.command {
        Command::Probe => probe(config).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Demo { video, seconds } => demo(config, video, seconds).await,
    }
}

fn load_config(cli: &Cli) -> Result<CallConfig> {
    let config = match &cli.config {
        Some(path) => CallConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CallConfig::new(),
    };
    let mut config = config.apply_env_overrides()?;
    if let Some(mode) = cli.media_mode {
        config.media_mode = mode;
    }
    Ok(config)
}

async fn probe(config: CallConfig) -> Result<()> {
    let selector = EnvironmentCapabilitySelector::new(config);
    let report = selector.probe().await;
    println!("requested mode     : {}", report.mode);
    println!("hardware compiled  : {}", report.hardware_compiled);
    println!("microphone         : {}", report.devices.microphone);
    println!("cameras            : {}", report.devices.cameras);

    match selector.select().await {
        Ok(stack) => println!("selected stack     : {}", stack.variant),
        Err(e) => println!("selected stack     : none ({})", e),
    }
    Ok(())
}

/// Prints one party's events and forwards them to the driver
struct Printer {
    name: &'static str,
    tx: mpsc::UnboundedSender<CallEvent>,
}

#[async_trait]
impl CallEventHandler for Printer {
    async fn on_call_started(&self, call_id: CallId) {
        println!("[{}] call started: {}", self.name, call_id);
    }

    async fn on_call_ended(&self, info: CallEndedInfo) {
        println!(
            "[{}] call ended: {} after {}",
            self.name,
            info.reason,
            format_duration(info.duration_secs)
        );
    }

    async fn on_remote_stream_received(&self, stream: MediaStream) {
        println!(
            "[{}] remote stream {} (audio: {}, video: {})",
            self.name, stream.label, stream.has_audio, stream.has_video
        );
    }

    async fn on_error(&self, message: String) {
        eprintln!("[{}] error: {}", self.name, message);
    }

    async fn on_state_changed(&self, previous: CallState, current: CallState) {
        println!("[{}] {} -> {}", self.name, previous, current);
    }

    async fn on_call_event(&self, event: CallEvent) {
        match &event {
            CallEvent::IncomingCall { invite } => println!(
                "[{}] incoming {:?} call from {}",
                self.name, invite.kind, invite.caller.display_name
            ),
            CallEvent::StateChanged { previous, current } => {
                self.on_state_changed(*previous, *current).await
            }
            CallEvent::CallStarted { call_id } => self.on_call_started(call_id.clone()).await,
            CallEvent::RemoteStreamReceived { stream } => {
                self.on_remote_stream_received(stream.clone()).await
            }
            CallEvent::CallEnded { info } => self.on_call_ended(info.clone()).await,
            CallEvent::Error { message } => self.on_error(message.clone()).await,
            _ => {}
        }
        let _ = self.tx.send(event);
    }
}

async fn party(
    name: &'static str,
    config: CallConfig,
    signaling: Arc<SignalingChannel>,
) -> Result<(CallSessionManager, mpsc::UnboundedReceiver<CallEvent>)> {
    let media = MediaStack::simulated(&config);
    let manager = CallSessionManager::builder()
        .config(config)
        .signaling(signaling)
        .media_stack(media)
        .build()
        .await?;
    let (tx, rx) = mpsc::unbounded_channel();
    manager.add_event_handler(Arc::new(Printer { name, tx }));
    Ok((manager, rx))
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<CallEvent>,
    what: &str,
    pred: impl Fn(&CallEvent) -> bool,
) -> Result<CallEvent> {
    let wait = async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    };
    match tokio::time::timeout(Duration::from_secs(30), wait).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => bail!("manager stopped while waiting for {}", what),
        Err(_) => bail!("timed out waiting for {}", what),
    }
}

async fn demo(config: CallConfig, video: bool, seconds: u64) -> Result<()> {
    if config.media_mode == MediaMode::Hardware {
        bail!("the demo runs both parties in-process and always uses simulated media");
    }

    let (a, b) = LoopbackTransport::pair();
    let alice_config = config
        .clone()
        .with_local_identity(CallerIdentity::new("alice", "Alice"));
    let bob_config = config.with_local_identity(CallerIdentity::new("bob", "Bob"));

    let (alice, mut alice_events) = party("alice", alice_config, SignalingChannel::new(a)).await?;
    let (bob, mut bob_events) = party("bob", bob_config, SignalingChannel::new(b)).await?;

    info!(video, "alice calls bob");
    alice.try_start_call("bob", video).await?;

    wait_for(&mut bob_events, "the invite", |e| {
        matches!(e, CallEvent::IncomingCall { .. })
    })
    .await?;
    bob.try_accept_call().await?;

    let active = |e: &CallEvent| matches!(e, CallEvent::StateChanged { current: CallState::Active, .. });
    wait_for(&mut alice_events, "alice to connect", active).await?;
    wait_for(&mut bob_events, "bob to connect", active).await?;

    tokio::time::sleep(Duration::from_secs(seconds)).await;
    println!(
        "[demo] connected for {} (alice) / {} (bob)",
        format_duration(alice.duration_secs()),
        format_duration(bob.duration_secs())
    );

    alice.end_call().await;
    wait_for(&mut bob_events, "bob to hang up", |e| {
        matches!(e, CallEvent::CallEnded { .. })
    })
    .await?;

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}
