use anyhow::Context;
use chrono::Local;
use clap::Parser;
use log::info;
use peercall::calls::media::LoopbackNetwork;
use peercall::callcore::{
    CallEvent, CallStateKind, EventHandler, MediaConstraints, PeerId, TrackKind,
};
use peercall::signaling::memory_pair;
use peercall::testing::{FakeMediaDevices, wait_for, wait_for_state};
use peercall::{CallController, CallControllerConfig, NegotiationStrategy};
use std::sync::Arc;
use std::time::Duration;

// Places a call between two in-process peers, "alice" and "bob", over an
// in-memory signaling link and the loopback media network. Bob answers as
// soon as the call rings.
//
// Usage:
//   cargo run                               # audio call, peer-connection negotiation
//   cargo run -- --video                    # video call; alice turns her camera off midway
//   cargo run -- --strategy relay -d 3      # relay negotiation, 3 seconds connected
//   cargo run -- --json                     # print every call event as JSON

#[derive(Parser)]
#[command(name = "peercall")]
#[command(about = "Two-peer call signaling demo")]
struct Args {
    /// Negotiation strategy: peer-connection or relay
    #[arg(short, long, default_value = "peer-connection")]
    strategy: NegotiationStrategy,

    /// Place a video call instead of an audio call
    #[arg(short, long)]
    video: bool,

    /// Seconds to stay connected before hanging up
    #[arg(short, long, default_value_t = 2)]
    duration: u64,

    /// Print call events as JSON lines
    #[arg(short, long)]
    json: bool,
}

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct EventPrinter {
    peer: &'static str,
    json: bool,
}

impl EventHandler for EventPrinter {
    fn handle_event(&self, event: &CallEvent) {
        if self.json {
            println!("{}", json_line(self.peer, event));
            return;
        }
        match event {
            CallEvent::StateChanged(snapshot) => {
                info!("[{}] {}", self.peer, snapshot.status_line());
            }
            CallEvent::IncomingCall { caller, video, .. } => {
                let kind = if *video { "video" } else { "audio" };
                info!("[{}] Incoming {kind} call from {caller}", self.peer);
            }
            CallEvent::CallEnded {
                reason,
                duration_secs,
                ..
            } => match duration_secs {
                Some(secs) => info!("[{}] Call ended ({reason}) after {secs}s", self.peer),
                None => info!("[{}] Call ended ({reason})", self.peer),
            },
        }
    }
}

fn json_line(peer: &str, event: &CallEvent) -> serde_json::Value {
    serde_json::json!({ "peer": peer, "data": event })
}

fn spawn_peer(
    name: &'static str,
    args: &Args,
    signaling: (
        Arc<peercall::signaling::MemorySignalingChannel>,
        tokio::sync::mpsc::Receiver<peercall::signaling::ChannelEvent>,
    ),
    network: &LoopbackNetwork,
) -> anyhow::Result<CallController> {
    let config = CallControllerConfig::for_peer(name).with_strategy(args.strategy);
    let controller = CallController::builder()
        .with_config(config)
        .with_signaling(signaling.0, signaling.1)
        .with_devices(Arc::new(FakeMediaDevices::new()))
        .with_transport_factory(Arc::new(network.clone()))
        .with_event_handler(Arc::new(EventPrinter {
            peer: name,
            json: args.json,
        }))
        .spawn()?;
    Ok(controller)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let network = LoopbackNetwork::new();
    let (alice_link, bob_link) = memory_pair();
    let alice = spawn_peer("alice", &args, alice_link, &network)?;
    let bob = spawn_peer("bob", &args, bob_link, &network)?;

    let mut bob_events = bob.subscribe();
    let constraints = if args.video {
        MediaConstraints::video()
    } else {
        MediaConstraints::audio()
    };
    alice.start_call(PeerId::new("bob"), constraints).await;

    loop {
        let event = tokio::time::timeout(STEP_TIMEOUT, bob_events.recv())
            .await
            .context("bob never saw the call")?
            .context("bob's event stream closed")?;
        if let CallEvent::IncomingCall { .. } = event {
            bob.answer_call().await;
            break;
        }
    }

    let mut alice_watch = alice.watch();
    wait_for_state(&mut alice_watch, CallStateKind::Connected, STEP_TIMEOUT)
        .await
        .context("call did not connect")?;

    if args.video {
        let mut bob_watch = bob.watch();
        wait_for(&mut bob_watch, STEP_TIMEOUT, |s| s.remote_active(TrackKind::Video))
            .await
            .context("bob never received alice's video")?;
        alice.toggle_video().await;
        wait_for(&mut bob_watch, STEP_TIMEOUT, |s| {
            !s.remote_active(TrackKind::Video)
        })
        .await
        .context("bob never saw alice's camera turn off")?;
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, hanging up"),
    }

    alice.end_call().await;
    let mut bob_watch = bob.watch();
    let ended = wait_for_state(&mut bob_watch, CallStateKind::Ended, STEP_TIMEOUT)
        .await
        .context("bob's side never ended")?;
    info!("Final status for bob: {}", ended.status_line());

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(run(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use peercall::callcore::{EndReason, SessionId};

    #[test]
    fn test_json_line_escapes_peer_name() {
        let event = CallEvent::CallEnded {
            session_id: SessionId::new("S1"),
            reason: EndReason::LocalHangup,
            duration_secs: Some(3),
        };
        let line = json_line("al\"ice", &event).to_string();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["peer"], "al\"ice");
        assert_eq!(parsed["data"], serde_json::to_value(&event).unwrap());
    }
}
