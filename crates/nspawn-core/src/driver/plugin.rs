use nspawn_model::{Capabilities, FsIsolation, MountConfigSupport, NetIsolationMode, PluginInfo};
use serde_json::{Value, json};

pub const PLUGIN_NAME: &str = "nix";
pub const TASK_HANDLE_VERSION: u32 = 1;
const API_VERSION: &str = "0.1.0";

pub fn plugin_info() -> PluginInfo {
    PluginInfo {
        name: PLUGIN_NAME.to_string(),
        plugin_type: "driver".to_string(),
        plugin_version: env!("CARGO_PKG_VERSION").to_string(),
        api_versions: vec![API_VERSION.to_string()],
    }
}

pub fn capabilities() -> Capabilities {
    Capabilities {
        send_signals: true,
        exec: true,
        fs_isolation: FsIsolation::Image,
        net_isolation_modes: vec![NetIsolationMode::Host, NetIsolationMode::Group],
        mount_configs: MountConfigSupport::All,
    }
}

/// Accepted plugin configuration fields with their defaults.
pub fn config_schema() -> Value {
    json!({
        "enabled": { "type": "bool", "default": true },
        "volumes": { "type": "bool", "default": true },
    })
}

/// Accepted task configuration fields with their defaults.
pub fn task_config_schema() -> Value {
    let attr = |ty: &str| json!({ "type": ty });
    let default = |ty: &str, value: Value| json!({ "type": ty, "default": value });

    json!({
        "boot": default("bool", json!(false)),
        "ephemeral": attr("bool"),
        "network_veth": default("bool", json!(false)),
        "process_two": default("bool", json!(false)),
        "read_only": attr("bool"),
        "user_namespacing": default("bool", json!(false)),
        "command": attr("list(string)"),
        "console": default("string", json!("read-only")),
        "image": attr("string"),
        "image_download": {
            "type": "block",
            "fields": {
                "url": { "type": "string", "required": true },
                "type": default("string", json!("tar")),
                "force": default("bool", json!(false)),
                "verify": default("string", json!("no")),
            }
        },
        "pivot_root": attr("string"),
        "resolv_conf": default("string", json!("copy-host")),
        "user": attr("string"),
        "volatile": attr("string"),
        "working_directory": attr("string"),
        "directory": attr("string"),
        "bind": attr("map(string)"),
        "bind_read_only": attr("map(string)"),
        "environment": attr("map(string)"),
        "port_map": attr("map(number)"),
        "ports": attr("list(string)"),
        "properties": attr("map(string)"),
        "capability": attr("list(string)"),
        "network_zone": attr("string"),
        "link_journal": attr("string"),
        "nixos": attr("string"),
        "packages": attr("list(string)"),
        "sanitize_names": attr("bool"),
    })
}
