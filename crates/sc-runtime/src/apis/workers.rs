//! Worker I/O helpers for station scripts.
//!
//! Fast "latest value" reads come from the mirrored context data. True
//! synchronous calls (waiting for a worker reply) must NOT wait on the
//! mirror, because the supervisor that pumps bus messages into it runs
//! independently of this chain's tick; they wait on a dedicated bus
//! subscription instead and block only the calling tick.

use std::time::{Duration, Instant};

use serde_json::{json, Value};

use sc_common::commands::{com, itac, opcua, rest, tcp, twincat, workers};
use sc_common::convert::{to_i64, to_string_lossy};
use sc_common::{topics, Payload};

use crate::context::ChainContext;

/// Outcome of a deadline-bound wait on the bus.
enum WaitReply {
    Value(Payload),
    WorkerError(Payload),
    Timeout,
}

/// Parameters for [`WorkersApi::rest_request`].
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: String,
    pub path: Option<String>,
    pub url: Option<String>,
    pub params: Option<Payload>,
    pub headers: Option<Payload>,
    pub json_body: Option<Value>,
    pub timeout_s: f64,
}

impl Default for RestRequest {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: None,
            url: None,
            params: None,
            headers: None,
            json_body: None,
            timeout_s: 10.0,
        }
    }
}

/// Normalized iTAC response: `{result: {return_value, outArgs}}` flattened
/// into something scripts can branch on.
#[derive(Debug, Clone)]
pub struct ItacResult {
    pub ok: bool,
    pub return_value: i64,
    pub out_args: Vec<Value>,
    pub error: Option<String>,
}

pub struct WorkersApi<'a> {
    pub(crate) ctx: &'a ChainContext,
}

impl WorkersApi<'_> {
    // --------------------------- generic reads ---------------------------

    pub fn get(&self, worker: &str, source_id: &str, key: &str) -> Option<Value> {
        self.ctx.values().get(worker, source_id, key)
    }

    pub fn latest(&self, worker: &str, source_id: &str) -> Option<Value> {
        self.ctx.values().latest(worker, source_id)
    }

    // -------------------------- bus wait helper --------------------------

    fn wait_for_bus_value(
        &self,
        source: &str,
        source_id: &str,
        key_predicate: impl Fn(&str) -> bool,
        timeout_s: f64,
    ) -> WaitReply {
        let timeout_s = if timeout_s > 0.0 { timeout_s } else { 0.01 };
        // Blocking waits are intentional in scripts; skip one slow-tick warning.
        self.ctx
            .suppress_slow_tick_once
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let Ok(sub) = self
            .ctx
            .bus
            .subscribe_many(&[topics::VALUE_CHANGED, topics::ERROR])
        else {
            return WaitReply::Timeout;
        };

        let deadline = Instant::now() + Duration::from_secs_f64(timeout_s);
        loop {
            let now = Instant::now();
            if now >= deadline {
                return WaitReply::Timeout;
            }
            let slice = (deadline - now).min(Duration::from_millis(200));
            let Some(msg) = sub.recv_timeout(slice) else {
                continue;
            };

            if msg.source != source || msg.source_id != source_id {
                continue;
            }
            if msg.topic == topics::ERROR {
                return WaitReply::WorkerError(msg.payload);
            }
            if msg.topic != topics::VALUE_CHANGED {
                continue;
            }
            let key = msg
                .payload
                .get("key")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !key.is_empty() && key_predicate(key) {
                return WaitReply::Value(msg.payload);
            }
        }
    }

    /// Common tail of the synchronous request/response helpers: wait for the
    /// reply keyed `{source}.{source_id}.{action}.{request_id}` and shape the
    /// outcome into a structured map. Never raises into scripts.
    fn wait_request_reply(
        &self,
        source: &str,
        source_id: &str,
        expected_key: &str,
        request_id: &str,
        timeout_s: f64,
        id_field: &str,
    ) -> Payload {
        match self.wait_for_bus_value(source, source_id, |k| k == expected_key, timeout_s) {
            WaitReply::Value(payload) => {
                let value = payload.get("value").cloned().unwrap_or(Value::Null);
                let meta = json!({
                    id_field: source_id,
                    "request_id": request_id,
                    "key": expected_key,
                });
                match value {
                    Value::Object(mut map) => {
                        match map.get_mut("_meta") {
                            Some(Value::Object(existing)) => {
                                for (k, v) in as_map(meta) {
                                    existing.insert(k, v);
                                }
                            }
                            // A worker that sent a non-object _meta keeps it.
                            Some(_) => {}
                            None => {
                                map.insert("_meta".to_string(), meta);
                            }
                        }
                        map
                    }
                    other => as_map(json!({ "value": other, "_meta": meta })),
                }
            }
            WaitReply::WorkerError(payload) => as_map(json!({
                "error": "worker_error",
                "source": source,
                "source_id": source_id,
                "payload": payload,
            })),
            WaitReply::Timeout => as_map(json!({
                "error": "timeout",
                "timeout_s": timeout_s,
                "source": source,
                "source_id": source_id,
                "expected_key": expected_key,
                "request_id": request_id,
                id_field: source_id,
            })),
        }
    }

    fn send(&self, worker: &str, command: &str, payload: Value) {
        (self.ctx.send_cmd)(worker, command, as_map(payload));
    }

    // --------------------------- TCP helpers ----------------------------

    pub fn tcp_send(&self, client_id: &str, data: Value) {
        self.send(
            workers::TCP_CLIENT,
            tcp::SEND,
            json!({ "client_id": client_id, "data": data }),
        );
    }

    pub fn tcp_connect(&self, client_id: &str) {
        self.send(workers::TCP_CLIENT, tcp::CONNECT, json!({ "client_id": client_id }));
    }

    pub fn tcp_disconnect(&self, client_id: &str) {
        self.send(
            workers::TCP_CLIENT,
            tcp::DISCONNECT,
            json!({ "client_id": client_id }),
        );
    }

    /// Latest message received by a TCP client, as text.
    pub fn tcp_message(&self, client_id: &str) -> Option<String> {
        self.get(workers::TCP_CLIENT, client_id, "message")
            .map(|v| to_string_lossy(&v))
    }

    /// Wait for the next TCP message of a client. `None` on timeout or
    /// worker error; the chain keeps ticking afterwards.
    pub fn tcp_wait(&self, client_id: &str, timeout_s: f64) -> Option<Value> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return None;
        }
        match self.wait_for_bus_value(workers::TCP_CLIENT, client_id, |k| k == "message", timeout_s)
        {
            WaitReply::Value(payload) => payload.get("value").cloned(),
            _ => None,
        }
    }

    // -------------------------- TwinCAT helpers -------------------------

    pub fn plc_write(&self, client_id: &str, name: &str, value: Value) {
        self.send(
            workers::TWINCAT,
            twincat::WRITE,
            json!({ "client_id": client_id, "name": name, "value": value }),
        );
    }

    pub fn plc_value(&self, client_id: &str, name: &str) -> Option<Value> {
        self.get(workers::TWINCAT, client_id, name)
    }

    /// Cached PLC value if present, otherwise wait for the next update.
    pub fn plc_wait_value(&self, client_id: &str, name: &str, timeout_s: f64) -> Option<Value> {
        let client_id = client_id.trim();
        let name = name.trim();
        if client_id.is_empty() || name.is_empty() {
            return None;
        }
        if let Some(cached) = self.plc_value(client_id, name) {
            return Some(cached);
        }
        match self.wait_for_bus_value(workers::TWINCAT, client_id, |k| k == name, timeout_s) {
            WaitReply::Value(payload) => payload.get("value").cloned(),
            _ => None,
        }
    }

    // --------------------------- OPC UA helpers --------------------------

    pub fn opcua_value(&self, endpoint: &str, name_or_alias: &str) -> Option<Value> {
        self.get(workers::OPCUA, endpoint, name_or_alias)
    }

    pub fn opcua_wait_value(
        &self,
        endpoint: &str,
        name_or_alias: &str,
        timeout_s: f64,
    ) -> Option<Value> {
        let endpoint = endpoint.trim();
        let key = name_or_alias.trim();
        if endpoint.is_empty() || key.is_empty() {
            return None;
        }
        if let Some(cached) = self.opcua_value(endpoint, key) {
            return Some(cached);
        }
        match self.wait_for_bus_value(workers::OPCUA, endpoint, |k| k == key, timeout_s) {
            WaitReply::Value(payload) => payload.get("value").cloned(),
            _ => None,
        }
    }

    pub fn opcua_write(
        &self,
        endpoint: &str,
        node_id: Option<&str>,
        alias: Option<&str>,
        value: Value,
    ) {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return;
        }
        self.send(
            workers::OPCUA,
            opcua::WRITE,
            json!({ "name": endpoint, "node_id": node_id, "alias": alias, "value": value }),
        );
    }

    /// Synchronous OPC UA read via request/response correlation.
    pub fn opcua_read(
        &self,
        endpoint: &str,
        node_id: Option<&str>,
        alias: Option<&str>,
        timeout_s: f64,
    ) -> Payload {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return as_map(json!({ "error": "missing_endpoint" }));
        }

        let request_id = self.ctx.create_id();
        self.send(
            workers::OPCUA,
            opcua::READ,
            json!({
                "name": endpoint,
                "node_id": node_id,
                "alias": alias,
                "request_id": request_id,
            }),
        );

        let expected_key = format!("opcua.{endpoint}.read.{request_id}");
        self.wait_request_reply(
            workers::OPCUA,
            endpoint,
            &expected_key,
            &request_id,
            timeout_s,
            "endpoint",
        )
    }

    // ----------------------------- REST sync ----------------------------

    pub fn rest_request(&self, endpoint: &str, request: RestRequest) -> Payload {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return as_map(json!({ "error": "missing_endpoint" }));
        }

        let request_id = self.ctx.create_id();
        let timeout_s = request.timeout_s;
        self.send(
            workers::REST_API,
            rest::REQUEST,
            json!({
                "endpoint": endpoint,
                "request_id": request_id,
                "method": request.method.to_uppercase(),
                "path": request.path,
                "url": request.url,
                "params": request.params,
                "headers": request.headers,
                "json": request.json_body,
                "timeout_s": timeout_s,
            }),
        );

        let expected_key = format!("rest.{endpoint}.result.{request_id}");
        self.wait_request_reply(
            workers::REST_API,
            endpoint,
            &expected_key,
            &request_id,
            timeout_s,
            "endpoint",
        )
    }

    pub fn rest_get(&self, endpoint: &str, path: &str, timeout_s: f64) -> Payload {
        self.rest_request(
            endpoint,
            RestRequest {
                path: Some(path.to_string()),
                timeout_s,
                ..Default::default()
            },
        )
    }

    pub fn rest_post_json(&self, endpoint: &str, path: &str, body: Value, timeout_s: f64) -> Payload {
        self.rest_request(
            endpoint,
            RestRequest {
                method: "POST".to_string(),
                path: Some(path.to_string()),
                json_body: Some(body),
                timeout_s,
                ..Default::default()
            },
        )
    }

    // ----------------------------- iTAC sync ----------------------------

    pub fn itac_station_setting(
        &self,
        connection_id: &str,
        keys: &[&str],
        timeout_s: f64,
    ) -> Payload {
        let connection_id = connection_id.trim();
        if connection_id.is_empty() {
            return as_map(json!({ "error": "missing_connection_id" }));
        }

        let request_id = self.ctx.create_id();
        self.send(
            workers::ITAC,
            itac::GET_STATION_SETTING,
            json!({
                "connection_id": connection_id,
                "station_setting_keys": keys,
                "request_id": request_id,
            }),
        );

        let expected_key = format!("itac.{connection_id}.station_setting.{request_id}");
        self.wait_request_reply(
            workers::ITAC,
            connection_id,
            &expected_key,
            &request_id,
            timeout_s,
            "connection_id",
        )
    }

    pub fn itac_custom_function(
        &self,
        connection_id: &str,
        method_name: &str,
        in_args: Vec<Value>,
        timeout_s: f64,
    ) -> Payload {
        let connection_id = connection_id.trim();
        if connection_id.is_empty() {
            return as_map(json!({ "error": "missing_connection_id" }));
        }

        let request_id = self.ctx.create_id();
        self.send(
            workers::ITAC,
            itac::CALL_CUSTOM_FUNCTION,
            json!({
                "connection_id": connection_id,
                "method_name": method_name,
                "in_args": in_args,
                "request_id": request_id,
            }),
        );

        let expected_key = format!("itac.{connection_id}.custom_function.{request_id}");
        self.wait_request_reply(
            workers::ITAC,
            connection_id,
            &expected_key,
            &request_id,
            timeout_s,
            "connection_id",
        )
    }

    pub fn itac_raw_call(
        &self,
        connection_id: &str,
        function_name: &str,
        body: Payload,
        timeout_s: f64,
    ) -> Payload {
        let connection_id = connection_id.trim();
        if connection_id.is_empty() {
            return as_map(json!({ "error": "missing_connection_id" }));
        }

        let request_id = self.ctx.create_id();
        self.send(
            workers::ITAC,
            itac::RAW_CALL,
            json!({
                "connection_id": connection_id,
                "function_name": function_name,
                "body": body,
                "request_id": request_id,
            }),
        );

        let expected_key = format!("itac.{connection_id}.raw.{request_id}");
        self.wait_request_reply(
            workers::ITAC,
            connection_id,
            &expected_key,
            &request_id,
            timeout_s,
            "connection_id",
        )
    }

    /// Normalize the common iTAC worker response shape. Success is
    /// `result.return_value == 0`; worker errors and timeouts pass through.
    pub fn itac_expect_ok(&self, response: &Payload) -> ItacResult {
        if let Some(error) = response.get("error") {
            let error = to_string_lossy(error);
            if !error.is_empty() {
                return ItacResult {
                    ok: false,
                    return_value: -1,
                    out_args: Vec::new(),
                    error: Some(error),
                };
            }
        }

        let Some(result) = response.get("result").and_then(Value::as_object) else {
            return ItacResult {
                ok: false,
                return_value: -1,
                out_args: Vec::new(),
                error: Some("missing_result".to_string()),
            };
        };

        let return_value = result
            .get("return_value")
            .map(|v| to_i64(v, -1))
            .unwrap_or(-1);
        let out_args = match result.get("outArgs") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        };

        let ok = return_value == 0;
        ItacResult {
            ok,
            return_value,
            out_args,
            error: if ok {
                None
            } else {
                Some(format!("itac_return_value_{return_value}"))
            },
        }
    }

    // --------------------------- serial helpers --------------------------

    pub fn com_send(&self, device_id: &str, data: Value, add_delimiter: bool) {
        self.send(
            workers::COM_DEVICE,
            com::SEND,
            json!({
                "device_id": device_id,
                "data": data,
                "add_delimiter": add_delimiter,
            }),
        );
    }

    pub fn com_last(&self, device_id: &str) -> Option<Value> {
        self.get(workers::COM_DEVICE, device_id, "line")
    }

    pub fn com_wait(&self, device_id: &str, timeout_s: f64) -> Option<Value> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return None;
        }
        match self.wait_for_bus_value(workers::COM_DEVICE, device_id, |k| k == "line", timeout_s) {
            WaitReply::Value(payload) => payload.get("value").cloned(),
            _ => None,
        }
    }
}

fn as_map(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;
    use sc_bridge::UiBridge;
    use sc_bus::WorkerBus;
    use serde_json::json;

    use super::*;
    use crate::context::ChainContext;

    type SentCommands = Arc<Mutex<Vec<(String, Payload)>>>;

    fn ctx_with_bus() -> (Arc<ChainContext>, Arc<WorkerBus>, SentCommands) {
        let bus = Arc::new(WorkerBus::new());
        let sent: SentCommands = Arc::new(Mutex::new(Vec::new()));
        let sent_in_hook = Arc::clone(&sent);
        let ctx = Arc::new(ChainContext::new(
            "demo",
            "default",
            Arc::clone(&bus),
            Arc::new(UiBridge::new()),
            Arc::new(move |_worker, command, payload| {
                sent_in_hook.lock().push((command.to_string(), payload));
            }),
        ));
        (ctx, bus, sent)
    }

    fn publish_value(bus: &WorkerBus, source: &str, source_id: &str, key: &str, value: Value) {
        let mut payload = Payload::new();
        payload.insert("key".to_string(), json!(key));
        payload.insert("value".to_string(), value);
        bus.publish(topics::VALUE_CHANGED, source, source_id, payload);
    }

    #[test]
    fn fire_and_forget_goes_through_send_cmd() {
        let (ctx, _bus, sent) = ctx_with_bus();
        ctx.workers().tcp_send("s1", json!("PING"));
        ctx.workers().plc_write("plc1", "x.y", json!(1));
        ctx.workers().com_send("com1", json!("RT"), true);

        let commands: Vec<String> = sent.lock().iter().map(|(c, _)| c.clone()).collect();
        assert_eq!(commands, ["tcp.send", "twincat.write", "com.send"]);
        assert_eq!(sent.lock()[0].1["client_id"], json!("s1"));
    }

    #[test]
    fn wait_times_out_with_structured_result() {
        let (ctx, _bus, _sent) = ctx_with_bus();
        let started = Instant::now();
        let result = ctx.workers().opcua_read("plc1", Some("ns=2;s=x"), None, 0.2);
        let elapsed = started.elapsed();

        assert_eq!(result["error"], json!("timeout"));
        assert_eq!(result["source"], json!("opcua"));
        assert_eq!(result["source_id"], json!("plc1"));
        assert_eq!(result["endpoint"], json!("plc1"));
        assert!(result["expected_key"].as_str().unwrap().starts_with("opcua.plc1.read."));
        assert!(result.contains_key("request_id"));
        assert!(elapsed >= Duration::from_millis(180));
        assert!(elapsed < Duration::from_millis(600));
        // The blocking wait suppresses exactly one slow-tick warning.
        assert!(ctx.take_suppress_slow_tick());
        assert!(!ctx.take_suppress_slow_tick());
    }

    #[test]
    fn wait_returns_matching_reply_only() {
        let (ctx, bus, _sent) = ctx_with_bus();
        let bus_for_publisher = Arc::clone(&bus);

        let publisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            // Wrong source_id and wrong key first; both must be skipped.
            publish_value(&bus_for_publisher, "twincat", "plc2", "x.y", json!(5));
            publish_value(&bus_for_publisher, "twincat", "plc1", "other", json!(6));
            publish_value(&bus_for_publisher, "twincat", "plc1", "x.y", json!(7));
        });

        let value = ctx.workers().plc_wait_value("plc1", "x.y", 1.0);
        publisher.join().unwrap();
        assert_eq!(value, Some(json!(7)));
    }

    #[test]
    fn wait_prefers_cached_value() {
        let (ctx, _bus, _sent) = ctx_with_bus();
        // Mirror a value the way the supervisor would.
        let mut payload = Payload::new();
        payload.insert("key".to_string(), json!("x.y"));
        payload.insert("value".to_string(), json!(3));
        ctx.apply_bus_message(&sc_bus::BusMessage {
            topic: topics::VALUE_CHANGED.to_string(),
            source: "twincat".to_string(),
            source_id: "plc1".to_string(),
            payload,
        });

        let started = Instant::now();
        let value = ctx.workers().plc_wait_value("plc1", "x.y", 5.0);
        assert_eq!(value, Some(json!(3)));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn worker_error_reply_is_structured() {
        let (ctx, bus, _sent) = ctx_with_bus();
        let bus_for_publisher = Arc::clone(&bus);

        let publisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let mut payload = Payload::new();
            payload.insert("action".to_string(), json!("request"));
            payload.insert("error".to_string(), json!("endpoint unreachable"));
            bus_for_publisher.publish(topics::ERROR, "rest_api", "mes", payload);
        });

        let result = ctx.workers().rest_get("mes", "/api/ping", 1.0);
        publisher.join().unwrap();
        assert_eq!(result["error"], json!("worker_error"));
        assert_eq!(result["payload"]["error"], json!("endpoint unreachable"));
    }

    #[test]
    fn reply_with_non_object_meta_is_left_untouched() {
        let (ctx, bus, sent) = ctx_with_bus();
        let bus_for_publisher = Arc::clone(&bus);
        let sent_for_publisher = Arc::clone(&sent);

        // Answer the read once its request id shows up in the command hook.
        let publisher = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(1);
            while Instant::now() < deadline {
                let request_id = sent_for_publisher
                    .lock()
                    .iter()
                    .find(|(command, _)| command == "opcua.read")
                    .and_then(|(_, payload)| payload.get("request_id").and_then(Value::as_str))
                    .map(str::to_string);
                if let Some(request_id) = request_id {
                    // Give the caller time to open its reply subscription.
                    thread::sleep(Duration::from_millis(50));
                    publish_value(
                        &bus_for_publisher,
                        "opcua",
                        "plc1",
                        &format!("opcua.plc1.read.{request_id}"),
                        json!({ "x": 1, "_meta": "raw" }),
                    );
                    return;
                }
                thread::sleep(Duration::from_millis(10));
            }
        });

        let result = ctx.workers().opcua_read("plc1", Some("ns=2;s=x"), None, 1.0);
        publisher.join().unwrap();
        assert_eq!(result["x"], json!(1));
        assert_eq!(result["_meta"], json!("raw"));
    }

    #[test]
    fn itac_expect_ok_normalizes_shapes() {
        let (ctx, _bus, _sent) = ctx_with_bus();
        let ok = as_map(json!({ "result": { "return_value": 0, "outArgs": ["a", "b"] } }));
        let normalized = ctx.workers().itac_expect_ok(&ok);
        assert!(normalized.ok);
        assert_eq!(normalized.out_args.len(), 2);

        let failed = as_map(json!({ "result": { "return_value": -104 } }));
        let normalized = ctx.workers().itac_expect_ok(&failed);
        assert!(!normalized.ok);
        assert_eq!(normalized.return_value, -104);
        assert_eq!(normalized.error.as_deref(), Some("itac_return_value_-104"));

        let timeout = as_map(json!({ "error": "timeout" }));
        assert_eq!(
            ctx.workers().itac_expect_ok(&timeout).error.as_deref(),
            Some("timeout")
        );

        let malformed = as_map(json!({ "unexpected": true }));
        assert_eq!(
            ctx.workers().itac_expect_ok(&malformed).error.as_deref(),
            Some("missing_result")
        );
    }
}
