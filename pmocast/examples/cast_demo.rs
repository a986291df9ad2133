// examples/cast_demo.rs
//
// Walks through a full cast session against the in-process simulator:
//   - route scan with two simulated receivers
//   - session request on the first one (the scan stops before connecting)
//   - custom message channel
//   - media launch, pause and repeat mode
//   - session teardown
//
// Run from the pmocast crate:
//   cargo run --example cast_demo
//   RUST_LOG=pmocast=debug cargo run --example cast_demo

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::Receiver;
use pmocast::simulator::{SimulatedDiscovery, SimulatedReceiver};
use pmocast::{
    CastController, CastResult, Completion, ControllerOptions, Device, DeviceCapabilities,
    DeviceFilter, ScanFilter,
};
use tracing_subscriber::EnvFilter;

const NAMESPACE: &str = "urn:x-cast:com.example.demo";
const WAIT: Duration = Duration::from_secs(5);

fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

fn wait<T>(what: &str, rx: &Receiver<CastResult<T>>) -> Result<T> {
    rx.recv_timeout(WAIT)
        .with_context(|| format!("{what}: no answer"))?
        .map_err(|err| anyhow!("{what}: {err} ({})", err.bridge_code()))
}

fn main() -> Result<()> {
    let config = pmocastconfig::get_config();
    init_tracing(&config.get_log_min_level()?);
    let options = ControllerOptions::from_config(&config)?;
    println!("Starting cast demo with app {}", options.app_id);

    let discovery = SimulatedDiscovery::new();
    let receiver = SimulatedReceiver::new();
    let controller = CastController::spawn(
        options,
        Box::new(discovery.clone()),
        Box::new(receiver.clone()),
    )?;

    let events = controller.subscribe();
    let printer = thread::Builder::new()
        .name("cast-demo-events".into())
        .spawn(move || {
            for event in events {
                println!("  event {:<22} {}", event.name(), event.payload());
            }
        })?;

    // 1. Scan
    let (scan_done, scan_rx) = Completion::channel();
    let updates = controller.start_scan(ScanFilter::default(), scan_done);
    discovery.publish(vec![
        Device::new("living-room", "Living room").with_model("Chromecast Ultra"),
        Device::new("kitchen", "Kitchen speaker")
            .with_model("Google Home")
            .with_capabilities(DeviceCapabilities::AUDIO_OUT),
    ]);
    let found = updates.recv_timeout(WAIT).context("no devices discovered")?;
    println!("\nDiscovered receivers:");
    for device in &found {
        println!(
            "  {} | model={} | group={}",
            device.name,
            device.model,
            device.capabilities.is_group()
        );
    }

    // 2. Session
    let (session_done, session_rx) = Completion::channel();
    controller.request_session(DeviceFilter::by_name("Living room"), session_done);
    let snapshot = wait("session request", &session_rx)?;
    let summary = wait("scan", &scan_rx)?;
    println!(
        "\nSession {} on {} (scan delivered {} update(s))",
        snapshot.session_id, snapshot.receiver.friendly_name, summary.updates
    );

    // 3. Messages
    let (added, added_rx) = Completion::channel();
    controller.add_message_listener(NAMESPACE, added);
    wait("add listener", &added_rx)?;
    let (sent, sent_rx) = Completion::channel();
    controller.send_message(NAMESPACE, r#"{"type":"hello"}"#, sent);
    wait("send message", &sent_rx)?;
    receiver.push_message(NAMESPACE, r#"{"type":"welcome"}"#);

    // 4. Media
    let (loaded, loaded_rx) = Completion::channel();
    controller.launch_media("https://cdn.example.com/live/index.m3u8", loaded);
    if let Some(status) = wait("launch media", &loaded_rx)? {
        println!("\nMedia session {} is {:?}", status.media_session_id, status.player_state);
    }
    let (paused, paused_rx) = Completion::channel();
    controller.pause(paused);
    wait("pause", &paused_rx)?;
    let (repeat, repeat_rx) = Completion::channel();
    controller.set_repeat_mode("REPEAT_ALL", repeat);
    wait("repeat mode", &repeat_rx)?;

    // 5. Teardown
    let (ended, ended_rx) = Completion::channel();
    controller.end_current_session(ended);
    wait("end session", &ended_rx)?;
    println!("\nFinal state: {}", controller.state());

    controller.shutdown();
    drop(controller);
    if printer.join().is_err() {
        eprintln!("event printer panicked");
    }
    Ok(())
}
