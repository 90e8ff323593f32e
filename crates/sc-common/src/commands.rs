//! Command names understood by the script runtime and the I/O workers.
//!
//! Worker commands are forwarded verbatim through the UiBridge `send_cmd`
//! hook; the runtime never interprets their payloads.

// ------------------------------------------------------------------ script runtime

pub mod script {
    pub const START_CHAIN: &str = "script.start_chain";
    pub const STOP_CHAIN: &str = "script.stop_chain";
    pub const PAUSE_CHAIN: &str = "script.pause_chain";
    pub const RESUME_CHAIN: &str = "script.resume_chain";
    pub const RETRY_CHAIN: &str = "script.retry_chain";
    pub const RELOAD_SCRIPT: &str = "script.reload_script";
    pub const RELOAD_ALL: &str = "script.reload_all";
    pub const LIST_SCRIPTS: &str = "script.scripts_list";
    pub const LIST_CHAINS: &str = "script.chains_list";
    pub const UPDATE_CHAIN_STATE: &str = "script.chain_state";
    pub const UPDATE_LOG: &str = "script.log";
    pub const SET_HOT_RELOAD: &str = "script.set_hot_reload";
}

// ------------------------------------------------------------------ TCP client worker

pub mod tcp {
    pub const CONNECT: &str = "tcp.connect";
    pub const DISCONNECT: &str = "tcp.disconnect";
    pub const SEND: &str = "tcp.send";
}

// ------------------------------------------------------------------ TwinCAT PLC worker

pub mod twincat {
    pub const CONNECT: &str = "twincat.connect";
    pub const DISCONNECT: &str = "twincat.disconnect";
    pub const WRITE: &str = "twincat.write";
}

// ------------------------------------------------------------------ OPC UA worker

pub mod opcua {
    pub const READ: &str = "opcua.read";
    pub const WRITE: &str = "opcua.write";
}

// ------------------------------------------------------------------ REST API worker

pub mod rest {
    pub const REQUEST: &str = "rest.request";
}

// ------------------------------------------------------------------ iTAC MES worker

pub mod itac {
    pub const GET_STATION_SETTING: &str = "itac.get_station_setting";
    pub const CALL_CUSTOM_FUNCTION: &str = "itac.custom_function";
    pub const RAW_CALL: &str = "itac.raw_call";
}

// ------------------------------------------------------------------ serial COM worker

pub mod com {
    pub const SEND: &str = "com.send";
}

// ------------------------------------------------------------------ worker names

pub mod workers {
    /// Source name used when the script runtime itself publishes on the bus.
    pub const SCRIPT_RUNTIME: &str = "script_runtime";

    pub const TCP_CLIENT: &str = "tcp_client";
    pub const TWINCAT: &str = "twincat";
    pub const OPCUA: &str = "opcua";
    pub const REST_API: &str = "rest_api";
    pub const ITAC: &str = "itac";
    pub const COM_DEVICE: &str = "com_device";
}
