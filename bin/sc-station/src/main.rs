//! StepChain Development Station
//!
//! Single-binary wiring for local development and commissioning:
//! - WorkerBus + UiBridge + ScriptRuntime
//! - A built-in demo script module so a bare checkout does something
//! - The main thread plays the UI role: it flushes the bridge periodically
//!
//! Workers are external; in this binary worker commands are only logged.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde_json::json;
use tracing::info;

use sc_bridge::{AppState, UiBridge};
use sc_bus::WorkerBus;
use sc_common::commands::script;
use sc_common::{logging, Payload};
use sc_runtime::{RuntimeConfig, ScriptModule, ScriptRegistry, ScriptRuntime};

/// StepChain development station
#[derive(Parser, Debug)]
#[command(name = "sc-station")]
#[command(about = "StepChain script runtime with a headless UI loop")]
struct Args {
    /// Directory containing script manifests
    #[arg(long, env = "SC_SCRIPTS_DIR", default_value = "scripts")]
    scripts_dir: PathBuf,

    /// Runtime name used as the bus source
    #[arg(long, env = "SC_RUNTIME_NAME", default_value = "script_runtime")]
    name: String,

    /// Hot-reload check interval in seconds
    #[arg(long, env = "SC_RELOAD_INTERVAL", default_value = "1.0")]
    reload_interval: f64,

    /// Enable mtime-based hot reload at startup
    #[arg(long, env = "SC_HOT_RELOAD")]
    hot_reload: bool,

    /// Script to start as `<name>:default` right away
    #[arg(long, env = "SC_START_SCRIPT")]
    start_script: Option<String>,

    /// Exit after this many seconds (run forever when omitted)
    #[arg(long)]
    run_seconds: Option<f64>,
}

/// Demo module: counts cycles and mirrors the latest scanner message.
fn demo_module() -> ScriptModule {
    ScriptModule::new().function("chain", |ctx| {
        ctx.vars().inc("cycles", 1.0);
        if let Some(message) = ctx.workers().tcp_message("scanner") {
            ctx.ui().set_state("current_serialnumber", json!(message));
        }
        if ctx.flow().step() == 0 {
            ctx.timing().set_cycle_time(0.5);
            ctx.flow().goto(1, "running");
        }
        Ok(())
    })
}

fn main() {
    logging::init_logging();
    let args = Args::parse();

    let bus = Arc::new(WorkerBus::new());
    let bridge = Arc::new(UiBridge::new());
    bridge.set_command_router(Arc::new(|worker, command, _payload| {
        info!(worker, command, "worker command (no worker attached)");
    }));

    let registry = Arc::new(ScriptRegistry::new());
    registry.register("demo", demo_module);

    let runtime = ScriptRuntime::new(
        RuntimeConfig {
            name: args.name,
            scripts_dir: args.scripts_dir,
            reload_check_interval: Duration::from_secs_f64(args.reload_interval.max(0.1)),
            hot_reload: args.hot_reload,
        },
        Arc::clone(&bus),
        Arc::clone(&bridge),
        registry,
    );
    runtime.start();

    if let Some(script_name) = args.start_script {
        let mut payload = Payload::new();
        payload.insert("script".to_string(), json!(script_name));
        runtime.send(script::START_CHAIN, payload);
    }

    // The main thread is the UI thread: flush the bridge until shutdown.
    let mut state = AppState::default();
    let deadline = args
        .run_seconds
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));

    loop {
        bridge.flush(&mut state, 200);
        if bridge.stopped() {
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    runtime.stop();
    bridge.stop();
    info!("station shut down");
}
