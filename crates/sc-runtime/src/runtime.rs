//! The central scheduler.
//!
//! One supervisor thread owns the chain table, pumps the worker bus and the
//! UI-state stream into every active chain's mirrors, dispatches control
//! commands and publishes scripts/chains snapshots. Each chain runs its own
//! cooperative tick thread; a crashing chain is paused and flagged without
//! touching any other chain or the runtime itself.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use sc_bridge::{NotifyKind, SendCmd, UiBridge, UiBusMessage};
use sc_bus::{BusMessage, MultiSubscription, Subscription, WorkerBus};
use sc_common::commands::script;
use sc_common::{topics, Payload};

use crate::context::ChainContext;
use crate::loader::ScriptLoader;
use crate::registry::{EntryFn, ScriptRegistry};

/// Tick duration above which a slow-tick warning is logged.
const SLOW_TICK_MS: f64 = 200.0;
/// Supervisor loop cadence.
const LOOP_SLEEP: Duration = Duration::from_millis(50);
/// Per-loop batch limits.
const BUS_DRAIN_BATCH: usize = 400;
const UI_DRAIN_BATCH: usize = 200;
const COMMAND_BATCH: usize = 200;

const STOP_SENTINEL: &str = "__stop__";

/// Runtime wiring parameters; everything else is commanded over the bus.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub name: String,
    pub scripts_dir: PathBuf,
    pub reload_check_interval: Duration,
    pub hot_reload: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "script_runtime".to_string(),
            scripts_dir: PathBuf::from("scripts"),
            reload_check_interval: Duration::from_secs(1),
            hot_reload: false,
        }
    }
}

/// One live chain owned by the supervisor.
struct ChainInstance {
    script_name: String,
    ctx: Arc<ChainContext>,
    entry: Arc<Mutex<EntryFn>>,
    active: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    next_tick: Arc<Mutex<Option<Instant>>>,
    handle: Option<JoinHandle<()>>,
}

/// Central script engine service (application-owned, not a worker).
pub struct ScriptRuntime {
    inner: Arc<RuntimeInner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

struct RuntimeInner {
    name: String,
    bus: Arc<WorkerBus>,
    bridge: Arc<UiBridge>,
    loader: Mutex<ScriptLoader>,
    commands_tx: Sender<(String, Payload)>,
    commands_rx: Receiver<(String, Payload)>,
    hot_reload_enabled: AtomicBool,
    reload_check_interval: Mutex<Duration>,
    stop: AtomicBool,
    running: AtomicBool,
}

impl ScriptRuntime {
    pub fn new(
        config: RuntimeConfig,
        bus: Arc<WorkerBus>,
        bridge: Arc<UiBridge>,
        registry: Arc<ScriptRegistry>,
    ) -> Self {
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let loader = ScriptLoader::new(&config.scripts_dir, registry);
        info!(
            name = %config.name,
            scripts_dir = %config.scripts_dir.display(),
            "script runtime initialized"
        );

        Self {
            inner: Arc::new(RuntimeInner {
                name: config.name,
                bus,
                bridge,
                loader: Mutex::new(loader),
                commands_tx,
                commands_rx,
                hot_reload_enabled: AtomicBool::new(config.hot_reload),
                reload_check_interval: Mutex::new(config.reload_check_interval),
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.stop.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        match thread::Builder::new()
            .name("script-runtime".to_string())
            .spawn(move || run_supervisor(inner))
        {
            Ok(handle) => {
                *self.supervisor.lock() = Some(handle);
                info!("script runtime started");
            }
            Err(err) => {
                self.inner.running.store(false, Ordering::SeqCst);
                error!(%err, "failed to spawn script runtime supervisor");
            }
        }
    }

    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        let _ = self
            .inner
            .commands_tx
            .send((STOP_SENTINEL.to_string(), Payload::new()));

        if let Some(handle) = self.supervisor.lock().take() {
            if !join_with_timeout(handle, Duration::from_millis(1500)) {
                warn!("script runtime supervisor did not stop in time");
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
        info!("script runtime stopped");
    }

    pub fn is_alive(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Enqueue a control command (see the `script.*` command names).
    pub fn send(&self, command: &str, payload: Payload) {
        let _ = self.inner.commands_tx.send((command.to_string(), payload));
    }
}

impl RuntimeInner {
    fn publish_value_as(&self, source_id: &str, key: &str, value: Value) {
        let mut payload = Payload::new();
        payload.insert("key".to_string(), json!(key));
        payload.insert("value".to_string(), value);
        self.bus
            .publish(topics::VALUE_CHANGED, &self.name, source_id, payload);
    }

    fn publish_error_as(&self, source_id: &str, key: Option<&str>, action: &str, error: &str) {
        let mut payload = Payload::new();
        payload.insert("key".to_string(), key.map(|k| json!(k)).unwrap_or(Value::Null));
        payload.insert("action".to_string(), json!(action));
        payload.insert("error".to_string(), json!(error));
        self.bus.publish(topics::ERROR, &self.name, source_id, payload);
    }

    fn publish_chain_state(&self, ctx: &ChainContext, active: bool) {
        let mut state = ctx.state_snapshot();
        state.insert("chain_key".to_string(), json!(ctx.chain_id()));
        state.insert("script_name".to_string(), json!(ctx.script_name()));
        state.insert("instance_id".to_string(), json!(ctx.instance_id()));
        state.insert("active".to_string(), json!(active));
        self.publish_value_as(ctx.chain_id(), script::UPDATE_CHAIN_STATE, Value::Object(state));
    }

    fn publish_chain_log(&self, chain_key: &str, ctx: Option<&ChainContext>, message: &str, level: &str) {
        let (step, step_desc) = match ctx {
            Some(ctx) => {
                let flow = ctx.flow.lock();
                (flow.step, flow.step_desc.clone())
            }
            None => (0, String::new()),
        };
        self.publish_value_as(
            chain_key,
            script::UPDATE_LOG,
            json!({
                "chain_key": chain_key,
                "step": step,
                "step_desc": step_desc,
                "level": level,
                "message": message,
            }),
        );
    }

    fn publish_scripts_if_changed(&self, last_sig: &mut String, force: bool) {
        let scripts = self.loader.lock().list_available_scripts();
        let sig = scripts.join("|");
        if force || sig != *last_sig {
            *last_sig = sig;
            debug!(count = scripts.len(), "scripts list published");
            self.publish_value_as(&self.name, script::LIST_SCRIPTS, json!(scripts));
        }
    }
}

// ------------------------------------------------------------------ supervisor

fn run_supervisor(inner: Arc<RuntimeInner>) {
    let Ok(bus_sub) = inner.bus.subscribe_many(&[
        topics::VALUE_CHANGED,
        topics::CLIENT_CONNECTED,
        topics::CLIENT_DISCONNECTED,
        topics::WRITE_FINISHED,
        topics::WRITE_ERROR,
        topics::ERROR,
        topics::MODAL_RESPONSE,
    ]) else {
        error!("failed to create runtime bus subscription");
        inner.running.store(false, Ordering::SeqCst);
        return;
    };
    let view_cmd_sub = inner.bus.subscribe(topics::VIEW_CMD_ALL);
    let Ok(ui_state_sub) = inner
        .bridge
        .subscribe_many(&[topics::STATE, topics::STATE_ALL])
    else {
        error!("failed to create runtime ui-state subscription");
        inner.running.store(false, Ordering::SeqCst);
        return;
    };

    let mut chains: HashMap<String, ChainInstance> = HashMap::new();
    let mut last_script_sig = String::new();
    let mut last_chain_sig = String::new();
    let mut last_reload_check = Instant::now();

    inner.publish_scripts_if_changed(&mut last_script_sig, true);
    publish_chains_if_changed(&inner, &chains, &mut last_chain_sig, true);
    inner.bridge.request_ui_state();

    while !inner.stop.load(Ordering::SeqCst) && !inner.bridge.stopped() {
        if inner.hot_reload_enabled.load(Ordering::SeqCst) {
            let interval = *inner.reload_check_interval.lock();
            if interval > Duration::ZERO && last_reload_check.elapsed() >= interval {
                last_reload_check = Instant::now();
                let reloaded = inner.loader.lock().check_for_updates();
                if !reloaded.is_empty() {
                    apply_reloaded_scripts(&inner, &chains, &reloaded);
                    inner.publish_scripts_if_changed(&mut last_script_sig, true);
                }
            }
        }

        drain_bus_updates(&chains, &bus_sub, &view_cmd_sub, BUS_DRAIN_BATCH);
        drain_ui_state_updates(&chains, &ui_state_sub, UI_DRAIN_BATCH);
        dispatch_commands(
            &inner,
            &mut chains,
            &mut last_script_sig,
            &mut last_chain_sig,
            COMMAND_BATCH,
        );
        publish_chains_if_changed(&inner, &chains, &mut last_chain_sig, false);

        thread::sleep(LOOP_SLEEP);
    }

    let keys: Vec<String> = chains.keys().cloned().collect();
    for chain_key in keys {
        stop_chain(&inner, &mut chains, &chain_key, "runtime_shutdown", &mut last_chain_sig);
    }
    bus_sub.close();
    view_cmd_sub.close();
    ui_state_sub.close();
    inner.running.store(false, Ordering::SeqCst);
    info!("script runtime loop stopped");
}

fn drain_bus_updates(
    chains: &HashMap<String, ChainInstance>,
    bus_sub: &MultiSubscription<BusMessage>,
    view_cmd_sub: &Subscription<BusMessage>,
    max_items: usize,
) {
    let mut processed = 0;

    while processed < max_items {
        let Some(msg) = bus_sub.try_recv() else {
            break;
        };
        processed += 1;

        if msg.topic == topics::MODAL_RESPONSE {
            route_modal_response(chains, &msg);
            continue;
        }
        mirror_to_chains(chains, &msg);
    }

    while processed < max_items {
        let Some(msg) = view_cmd_sub.try_recv() else {
            break;
        };
        processed += 1;
        mirror_to_chains(chains, &msg);
    }
}

fn mirror_to_chains(chains: &HashMap<String, ChainInstance>, msg: &BusMessage) {
    for inst in chains.values() {
        if inst.active.load(Ordering::SeqCst) {
            inst.ctx.apply_bus_message(msg);
        }
    }
}

fn route_modal_response(chains: &HashMap<String, ChainInstance>, msg: &BusMessage) {
    let chain_id = msg
        .payload
        .get("chain_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let request_id = msg
        .payload
        .get("request_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if chain_id.is_empty() || request_id.is_empty() {
        return;
    }

    if let Some(inst) = chains.get(chain_id) {
        let result = msg.payload.get("result").cloned().unwrap_or(Value::Null);
        if !inst.ctx.resolve_modal(request_id, result) {
            debug!(chain_id, request_id, "modal response with stale request id ignored");
        }
    }
}

fn drain_ui_state_updates(
    chains: &HashMap<String, ChainInstance>,
    ui_state_sub: &MultiSubscription<UiBusMessage>,
    max_items: usize,
) {
    for _ in 0..max_items {
        let Some(msg) = ui_state_sub.try_recv() else {
            break;
        };

        if msg.topic == topics::STATE {
            for inst in chains.values() {
                if inst.active.load(Ordering::SeqCst) {
                    inst.ctx.replace_app_state(msg.payload.clone());
                }
            }
        } else if let Some(key) = msg.topic.strip_prefix("state.") {
            if key.is_empty() {
                continue;
            }
            let value = msg.payload.get(key).cloned().unwrap_or(Value::Null);
            for inst in chains.values() {
                if inst.active.load(Ordering::SeqCst) {
                    inst.ctx.update_app_state(key, value.clone());
                }
            }
        }
    }
}

fn publish_chains_if_changed(
    inner: &RuntimeInner,
    chains: &HashMap<String, ChainInstance>,
    last_sig: &mut String,
    force: bool,
) {
    let mut keys: Vec<&String> = chains.keys().collect();
    keys.sort();

    let mut items = Vec::with_capacity(keys.len());
    let mut sig_parts = Vec::with_capacity(keys.len());
    for key in keys {
        let inst = &chains[key];
        let flow = inst.ctx.flow.lock();
        let active = inst.active.load(Ordering::SeqCst);
        sig_parts.push(format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            key,
            active,
            flow.paused,
            flow.error_flag,
            flow.error_message,
            flow.step,
            flow.cycle_count,
            flow.step_time_ms,
        ));
        items.push(json!({
            "key": key,
            "script": inst.script_name,
            "instance": inst.ctx.instance_id(),
            "active": active,
            "paused": flow.paused,
            "error_flag": flow.error_flag,
            "error_message": flow.error_message,
            "step": flow.step,
            "cycle_count": flow.cycle_count,
            "step_time": flow.step_time_ms,
        }));
    }

    let sig = sig_parts.join("|");
    if force || sig != *last_sig {
        *last_sig = sig;
        inner.publish_value_as(&inner.name, script::LIST_CHAINS, json!(items));
    }
}

// ------------------------------------------------------------------ commands

fn dispatch_commands(
    inner: &Arc<RuntimeInner>,
    chains: &mut HashMap<String, ChainInstance>,
    last_script_sig: &mut String,
    last_chain_sig: &mut String,
    limit: usize,
) {
    for _ in 0..limit {
        let Ok((cmd, payload)) = inner.commands_rx.try_recv() else {
            return;
        };

        match cmd.as_str() {
            STOP_SENTINEL => return,
            script::SET_HOT_RELOAD => cmd_set_hot_reload(inner, &payload),
            script::LIST_SCRIPTS => inner.publish_scripts_if_changed(last_script_sig, true),
            script::LIST_CHAINS => publish_chains_if_changed(inner, chains, last_chain_sig, true),
            script::START_CHAIN => cmd_start_chain(inner, chains, &payload, last_chain_sig),
            script::STOP_CHAIN => cmd_stop_chain(inner, chains, &payload, last_chain_sig),
            script::PAUSE_CHAIN => cmd_pause_chain(inner, chains, &payload, last_chain_sig),
            script::RESUME_CHAIN => cmd_resume_chain(inner, chains, &payload, last_chain_sig),
            script::RETRY_CHAIN => cmd_retry_chain(inner, chains, &payload, last_chain_sig),
            script::RELOAD_SCRIPT => cmd_reload_script(inner, chains, &payload, last_script_sig),
            script::RELOAD_ALL => {
                cmd_reload_all(inner, chains, last_script_sig, last_chain_sig)
            }
            other => debug!(cmd = other, "unknown runtime command ignored"),
        }
    }
}

fn payload_str<'a>(payload: &'a Payload, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        payload
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
}

fn resolve_chain_key(payload: &Payload) -> Option<String> {
    if let Some(key) = payload_str(payload, &["chain_key", "key"]) {
        return Some(key.to_string());
    }
    let script_name = payload_str(payload, &["script", "script_name"])?;
    let instance_id = payload_str(payload, &["instance_id", "id"]).unwrap_or("default");
    Some(format!("{script_name}:{instance_id}"))
}

fn cmd_set_hot_reload(inner: &RuntimeInner, payload: &Payload) {
    let enabled = payload
        .get("enabled")
        .map(sc_common::convert::truthy)
        .unwrap_or(false);
    inner.hot_reload_enabled.store(enabled, Ordering::SeqCst);

    if let Some(interval) = payload.get("interval") {
        let interval = sc_common::convert::to_f64(interval, 0.0);
        if interval > 0.0 {
            *inner.reload_check_interval.lock() = Duration::from_secs_f64(interval);
        }
    }
    info!(
        enabled,
        interval_s = inner.reload_check_interval.lock().as_secs_f64(),
        "hot reload updated"
    );
}

fn cmd_start_chain(
    inner: &Arc<RuntimeInner>,
    chains: &mut HashMap<String, ChainInstance>,
    payload: &Payload,
    last_chain_sig: &mut String,
) {
    let Some(script_name) = payload_str(payload, &["script", "script_name"]) else {
        inner.publish_error_as(
            &inner.name,
            Some(&inner.name),
            "start_chain",
            "missing payload.script/script_name",
        );
        return;
    };
    let script_name = script_name.to_string();
    let instance_id = payload_str(payload, &["instance_id", "id"])
        .unwrap_or("default")
        .to_string();
    let chain_key = format!("{script_name}:{instance_id}");

    if chains.contains_key(&chain_key) {
        stop_chain(inner, chains, &chain_key, "restart", last_chain_sig);
    }

    let entry = match inner.loader.lock().load_script(&script_name, false) {
        Ok(entry) => entry,
        Err(err) => {
            inner.publish_error_as(&chain_key, Some(&chain_key), "start_chain", &err.to_string());
            return;
        }
    };

    let bridge_for_cmds = Arc::clone(&inner.bridge);
    let send_cmd: SendCmd = Arc::new(move |worker, command, payload| {
        bridge_for_cmds.send_cmd(worker, command, payload);
    });
    let ctx = Arc::new(ChainContext::new(
        &script_name,
        &instance_id,
        Arc::clone(&inner.bus),
        Arc::clone(&inner.bridge),
        send_cmd,
    ));

    let entry = Arc::new(Mutex::new(entry));
    let active = Arc::new(AtomicBool::new(true));
    let stop = Arc::new(AtomicBool::new(false));
    let next_tick = Arc::new(Mutex::new(None));

    let runner_inner = Arc::clone(inner);
    let runner_ctx = Arc::clone(&ctx);
    let runner_entry = Arc::clone(&entry);
    let runner_active = Arc::clone(&active);
    let runner_stop = Arc::clone(&stop);
    let runner_next_tick = Arc::clone(&next_tick);

    let handle = thread::Builder::new()
        .name(format!("chain:{chain_key}"))
        .spawn(move || {
            chain_runner(
                runner_inner,
                runner_ctx,
                runner_entry,
                runner_active,
                runner_stop,
                runner_next_tick,
            )
        });
    let handle = match handle {
        Ok(handle) => handle,
        Err(err) => {
            inner.publish_error_as(&chain_key, Some(&chain_key), "start_chain", &err.to_string());
            return;
        }
    };

    chains.insert(
        chain_key.clone(),
        ChainInstance {
            script_name,
            ctx: Arc::clone(&ctx),
            entry,
            active,
            stop,
            next_tick,
            handle: Some(handle),
        },
    );

    info!(chain_key = %chain_key, "chain created");
    inner.publish_chain_log(&chain_key, Some(&ctx), "chain started", "info");
    publish_chains_if_changed(inner, chains, last_chain_sig, true);
    inner.publish_chain_state(&ctx, true);
}

fn cmd_stop_chain(
    inner: &RuntimeInner,
    chains: &mut HashMap<String, ChainInstance>,
    payload: &Payload,
    last_chain_sig: &mut String,
) {
    let Some(chain_key) = resolve_chain_key(payload) else {
        inner.publish_error_as(
            &inner.name,
            Some(&inner.name),
            "stop_chain",
            "missing payload.chain_key or payload.script/script_name",
        );
        return;
    };
    stop_chain(inner, chains, &chain_key, "stop_command", last_chain_sig);
}

fn cmd_pause_chain(
    inner: &RuntimeInner,
    chains: &mut HashMap<String, ChainInstance>,
    payload: &Payload,
    last_chain_sig: &mut String,
) {
    let chain_key = resolve_chain_key(payload).unwrap_or_default();
    let Some(inst) = chains.get(&chain_key) else {
        inner.publish_error_as(&chain_key, Some(&chain_key), "pause_chain", "chain not running");
        return;
    };

    inst.ctx.flow.lock().paused = true;
    inner.publish_chain_log(&chain_key, Some(&inst.ctx), "chain paused", "info");
    let active = inst.active.load(Ordering::SeqCst);
    inner.publish_chain_state(&inst.ctx, active);
    publish_chains_if_changed(inner, chains, last_chain_sig, true);
}

fn cmd_resume_chain(
    inner: &RuntimeInner,
    chains: &mut HashMap<String, ChainInstance>,
    payload: &Payload,
    last_chain_sig: &mut String,
) {
    let chain_key = resolve_chain_key(payload).unwrap_or_default();
    let Some(inst) = chains.get(&chain_key) else {
        inner.publish_error_as(&chain_key, Some(&chain_key), "resume_chain", "chain not running");
        return;
    };

    inst.ctx.flow.lock().paused = false;
    *inst.next_tick.lock() = None;
    inner.publish_chain_log(&chain_key, Some(&inst.ctx), "chain resumed", "info");
    let active = inst.active.load(Ordering::SeqCst);
    inner.publish_chain_state(&inst.ctx, active);
    publish_chains_if_changed(inner, chains, last_chain_sig, true);
}

fn cmd_retry_chain(
    inner: &RuntimeInner,
    chains: &mut HashMap<String, ChainInstance>,
    payload: &Payload,
    last_chain_sig: &mut String,
) {
    let chain_key = resolve_chain_key(payload).unwrap_or_default();
    let Some(inst) = chains.get(&chain_key) else {
        inner.publish_error_as(&chain_key, Some(&chain_key), "retry_chain", "chain not running");
        return;
    };

    {
        let mut flow = inst.ctx.flow.lock();
        flow.error_flag = false;
        flow.error_message.clear();
        flow.paused = false;
    }
    *inst.next_tick.lock() = None;
    inner.publish_chain_log(&chain_key, Some(&inst.ctx), "retry requested by operator", "info");
    let active = inst.active.load(Ordering::SeqCst);
    inner.publish_chain_state(&inst.ctx, active);
    publish_chains_if_changed(inner, chains, last_chain_sig, true);
}

fn cmd_reload_script(
    inner: &RuntimeInner,
    chains: &HashMap<String, ChainInstance>,
    payload: &Payload,
    last_script_sig: &mut String,
) {
    let Some(script_name) = payload_str(payload, &["script", "script_name"]) else {
        inner.publish_error_as(
            &inner.name,
            Some(&inner.name),
            "reload_script",
            "missing payload.script/script_name",
        );
        return;
    };
    let script_name = script_name.to_string();

    match inner.loader.lock().load_script(&script_name, true) {
        Ok(_) => apply_reloaded_scripts(inner, chains, &[script_name]),
        Err(err) => {
            inner.publish_error_as(&script_name, Some(&script_name), "reload_script", &err.to_string());
        }
    }
    inner.publish_scripts_if_changed(last_script_sig, true);
}

fn cmd_reload_all(
    inner: &RuntimeInner,
    chains: &mut HashMap<String, ChainInstance>,
    last_script_sig: &mut String,
    last_chain_sig: &mut String,
) {
    let scripts = inner.loader.lock().list_available_scripts();
    let mut reloaded = Vec::new();
    for name in scripts {
        if inner.loader.lock().load_script(&name, true).is_ok() {
            reloaded.push(name);
        }
    }
    if !reloaded.is_empty() {
        apply_reloaded_scripts(inner, chains, &reloaded);
    }
    inner.publish_scripts_if_changed(last_script_sig, true);
    publish_chains_if_changed(inner, chains, last_chain_sig, true);
}

/// Swap entry functions on running chains after a reload. Step, vars and
/// mirrored data stay untouched; only the code changes.
fn apply_reloaded_scripts(
    inner: &RuntimeInner,
    chains: &HashMap<String, ChainInstance>,
    script_names: &[String],
) {
    for (chain_key, inst) in chains {
        if !inst.active.load(Ordering::SeqCst) || !script_names.contains(&inst.script_name) {
            continue;
        }
        if let Some(entry) = inner.loader.lock().loaded_entry(&inst.script_name) {
            *inst.entry.lock() = entry;
            info!(chain_key = %chain_key, "chain entry function swapped");
        }
    }
}

fn stop_chain(
    inner: &RuntimeInner,
    chains: &mut HashMap<String, ChainInstance>,
    chain_key: &str,
    reason: &str,
    last_chain_sig: &mut String,
) {
    let Some(mut inst) = chains.remove(chain_key) else {
        return;
    };

    inst.active.store(false, Ordering::SeqCst);
    inst.stop.store(true, Ordering::SeqCst);
    if let Some(handle) = inst.handle.take() {
        if !join_with_timeout(handle, Duration::from_secs(1)) {
            warn!(chain_key = %chain_key, "chain thread did not stop within timeout");
        }
    }

    info!(chain_key = %chain_key, reason, "chain removed");
    inner.publish_chain_log(chain_key, None, &format!("chain stopped: {reason}"), "info");
    publish_chains_if_changed(inner, chains, last_chain_sig, true);
}

// ------------------------------------------------------------------ chain ticks

fn chain_runner(
    inner: Arc<RuntimeInner>,
    ctx: Arc<ChainContext>,
    entry: Arc<Mutex<EntryFn>>,
    active: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    next_tick: Arc<Mutex<Option<Instant>>>,
) {
    let chain_key = ctx.chain_id().to_string();
    info!(chain_key = %chain_key, "chain started");

    while !inner.stop.load(Ordering::SeqCst)
        && !inner.bridge.stopped()
        && !stop.load(Ordering::SeqCst)
        && active.load(Ordering::SeqCst)
    {
        if ctx.flow.lock().paused {
            thread::sleep(Duration::from_millis(20));
            continue;
        }

        let now = Instant::now();
        let due = *next_tick.lock();
        let wait = due.and_then(|due| due.checked_duration_since(now));
        if let Some(wait) = wait {
            thread::sleep(wait.min(Duration::from_millis(50)));
            continue;
        }

        let cycle = {
            let mut flow = ctx.flow.lock();
            flow.cycle_count += 1;
            flow.cycle_count
        };
        let entry_fn = entry.lock().clone();

        let tick_started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| entry_fn(&ctx)));
        let elapsed_ms = tick_started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(())) => {
                let cycle_time_s = {
                    let mut flow = ctx.flow.lock();
                    flow.step_time_ms = (elapsed_ms * 100.0).round() / 100.0;
                    if flow.next_step != flow.step {
                        flow.step = flow.next_step;
                        flow.step_started = Instant::now();
                    }
                    flow.cycle_time_s.max(0.001)
                };
                *next_tick.lock() = Some(Instant::now() + Duration::from_secs_f64(cycle_time_s));

                let suppress = ctx.take_suppress_slow_tick();
                if elapsed_ms > SLOW_TICK_MS && !suppress {
                    warn!(chain_key = %chain_key, duration_ms = elapsed_ms, cycle, "slow chain tick");
                }
                inner.publish_chain_state(&ctx, active.load(Ordering::SeqCst));
                thread::sleep(Duration::from_millis(1));
            }
            outcome => {
                let err_text = match outcome {
                    Ok(Err(err)) => format!("{err:#}"),
                    Err(panic) => panic_message(panic),
                    Ok(Ok(())) => unreachable!(),
                };
                error!(chain_key = %chain_key, cycle, error = %err_text, "chain tick failed");
                inner.publish_error_as(&chain_key, Some(&chain_key), "chain_tick", &err_text);

                {
                    let mut flow = ctx.flow.lock();
                    flow.paused = true;
                    flow.error_flag = true;
                    flow.error_message =
                        "StepChain crashed. Please review and press Retry.".to_string();
                }
                inner.publish_chain_log(
                    &chain_key,
                    Some(&ctx),
                    "chain crashed - paused; operator can retry",
                    "error",
                );
                inner.publish_chain_state(&ctx, active.load(Ordering::SeqCst));
                inner.bridge.emit_notify(
                    &format!("Script '{chain_key}' crashed. Open Scripts Lab and press Retry."),
                    NotifyKind::Warning,
                );
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    info!(chain_key = %chain_key, "chain stopped");
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "chain tick panicked".to_string()
    }
}

/// Join a thread, detaching it if it does not finish within `timeout`.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
