//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose the process-wide plugin host to Dart via FRB.
//! - Carry command arguments, setting values, and palette items as JSON text.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - Asynchronous host calls are driven to completion before returning.
//! - The host is built once per process from `PLUGHOST_*` environment config.

use futures::executor::block_on;
use log::warn;
use plughost_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    ExtensionHost, HostConfig, PaletteItem,
};
use serde_json::Value;
use std::sync::OnceLock;

static HOST: OnceLock<ExtensionHost> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Reconfiguration attempts with different level or directory return error.
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Command metadata row for palette and menu rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandItem {
    /// Fully-qualified command id.
    pub id: String,
    /// Owning extension id.
    pub owner: String,
    /// Title when declared, else the id.
    pub label: String,
    pub category: Option<String>,
}

/// Generic action response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResponse {
    /// Whether operation succeeded.
    pub ok: bool,
    /// JSON-encoded result value on success.
    pub value_json: Option<String>,
    /// Human-readable response message for diagnostics/UI.
    pub message: String,
}

impl ActionResponse {
    fn success(value: Option<&Value>, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            value_json: value.map(Value::to_string),
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            value_json: None,
            message: message.into(),
        }
    }
}

/// One palette row, grouped by `category`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteRow {
    pub provider_id: String,
    pub category: String,
    pub title: String,
    pub subtitle: Option<String>,
    /// Full item JSON; pass back unchanged to `palette_execute`.
    pub item_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteResponse {
    pub rows: Vec<PaletteRow>,
    /// Providers that failed for this query, `provider: reason` each.
    pub failures: Vec<String>,
}

/// Ids of loaded extensions, sorted.
///
/// # FFI contract
/// - Never panics; empty when the host failed to start.
#[flutter_rust_bridge::frb(sync)]
pub fn loaded_extensions() -> Vec<String> {
    host().map(ExtensionHost::extension_ids).unwrap_or_default()
}

/// Lists every registered command ordered by id.
#[flutter_rust_bridge::frb(sync)]
pub fn list_commands() -> Vec<CommandItem> {
    let Ok(host) = host() else {
        return Vec::new();
    };
    host.commands()
        .list()
        .into_iter()
        .map(|info| CommandItem {
            label: info.label().to_string(),
            id: info.id,
            owner: info.owner,
            category: info.category,
        })
        .collect()
}

/// Executes a fully-qualified command with a JSON array of arguments.
///
/// # FFI contract
/// - Blocks until the command's future resolves.
/// - `args_json` empty means no arguments; a non-array value is one argument.
/// - Never panics; handler failures come back as `ok=false`.
#[flutter_rust_bridge::frb(sync)]
pub fn execute_command(id: String, args_json: String) -> ActionResponse {
    let host = match host() {
        Ok(host) => host,
        Err(err) => return ActionResponse::failure(err),
    };
    let args = match parse_args(&args_json) {
        Ok(args) => args,
        Err(err) => return ActionResponse::failure(format!("execute_command failed: {err}")),
    };
    match block_on(host.commands().execute(id.trim(), args)) {
        Ok(value) => ActionResponse::success(Some(&value), "Command executed."),
        Err(err) => ActionResponse::failure(format!("execute_command failed: {err}")),
    }
}

/// Reads a setting by fully-qualified path as JSON; `None` for unknown paths.
#[flutter_rust_bridge::frb(sync)]
pub fn settings_get(path: String) -> Option<String> {
    host()
        .ok()?
        .settings()
        .get(path.trim())
        .map(|value| value.to_string())
}

/// Writes a setting by fully-qualified path from JSON text.
#[flutter_rust_bridge::frb(sync)]
pub fn settings_set(path: String, value_json: String) -> ActionResponse {
    let host = match host() {
        Ok(host) => host,
        Err(err) => return ActionResponse::failure(err),
    };
    let value = match serde_json::from_str::<Value>(&value_json) {
        Ok(value) => value,
        Err(err) => return ActionResponse::failure(format!("settings_set failed: {err}")),
    };
    match host.settings().set(path.trim(), value) {
        Ok(()) => ActionResponse::success(None, "Setting saved."),
        Err(err) => ActionResponse::failure(format!("settings_set failed: {err}")),
    }
}

/// Runs one palette query against all active providers.
#[flutter_rust_bridge::frb(sync)]
pub fn palette_query(query: String) -> PaletteResponse {
    let host = match host() {
        Ok(host) => host,
        Err(err) => {
            return PaletteResponse {
                rows: Vec::new(),
                failures: vec![err],
            }
        }
    };
    let results = block_on(host.palette().query(&query));
    let rows = results
        .entries
        .into_iter()
        .filter_map(|entry| {
            let item_json = match serde_json::to_string(&entry.item) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(
                        "event=ffi_palette_query module=ffi status=skipped provider={} error={}",
                        entry.provider_id, err
                    );
                    return None;
                }
            };
            Some(PaletteRow {
                provider_id: entry.provider_id,
                category: entry.category,
                title: entry.item.title,
                subtitle: entry.item.subtitle,
                item_json,
            })
        })
        .collect();
    PaletteResponse {
        rows,
        failures: results
            .failures
            .into_iter()
            .map(|failure| format!("{}: {}", failure.provider_id, failure.message))
            .collect(),
    }
}

/// Executes a palette row previously returned by `palette_query`.
#[flutter_rust_bridge::frb(sync)]
pub fn palette_execute(provider_id: String, item_json: String, query: String) -> ActionResponse {
    let host = match host() {
        Ok(host) => host,
        Err(err) => return ActionResponse::failure(err),
    };
    let item = match serde_json::from_str::<PaletteItem>(&item_json) {
        Ok(item) => item,
        Err(err) => return ActionResponse::failure(format!("palette_execute failed: {err}")),
    };
    match block_on(host.palette().execute(provider_id.trim(), &item, &query)) {
        Ok(value) => ActionResponse::success(Some(&value), "Palette item executed."),
        Err(err) => ActionResponse::failure(format!("palette_execute failed: {err}")),
    }
}

/// Ends the palette session (palette closed).
#[flutter_rust_bridge::frb(sync)]
pub fn palette_close() {
    if let Ok(host) = host() {
        host.palette().reset_session();
    }
}

fn host() -> Result<&'static ExtensionHost, String> {
    if let Some(host) = HOST.get() {
        return Ok(host);
    }
    let config = HostConfig::from_env().map_err(|err| format!("host config failed: {err}"))?;
    let built = ExtensionHost::from_config(&config).map_err(|err| format!("host start failed: {err}"))?;
    // A concurrent caller may have won the race; either host is equivalent.
    let _ = HOST.set(built);
    HOST.get()
        .ok_or_else(|| "host start failed: host was not stored".to_string())
}

fn parse_args(raw: &str) -> Result<Vec<Value>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(args)) => Ok(args),
        Ok(single) => Ok(vec![single]),
        Err(err) => Err(format!("args are not valid JSON: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        core_version, execute_command, init_logging, list_commands, palette_execute,
        palette_query, parse_args, ping, settings_get, settings_set,
    };
    use serde_json::json;

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "tmp/logs".to_string());
        assert!(!error.is_empty());
    }

    #[test]
    fn parse_args_accepts_array_scalar_and_empty() {
        assert_eq!(parse_args("").expect("empty"), Vec::<serde_json::Value>::new());
        assert_eq!(parse_args("[1, 2]").expect("array"), vec![json!(1), json!(2)]);
        assert_eq!(parse_args("\"x\"").expect("scalar"), vec![json!("x")]);
        assert!(parse_args("[1,").is_err());
    }

    #[test]
    fn unknown_command_fails_without_panicking() {
        let response = execute_command("missing.cmd".to_string(), String::new());
        assert!(!response.ok);
        assert!(response.message.contains("command not found"));
        assert!(list_commands().iter().all(|command| command.id != "missing.cmd"));
    }

    #[test]
    fn settings_reject_unknown_paths_and_bad_json() {
        assert_eq!(settings_get("missing.section.key".to_string()), None);
        assert!(!settings_set("missing.section.key".to_string(), "1".to_string()).ok);
        assert!(!settings_set("missing.section.key".to_string(), "{".to_string()).ok);
    }

    #[test]
    fn palette_round_trips_items_as_json() {
        let response = palette_query(">".to_string());
        assert!(response.failures.is_empty());

        let bad = palette_execute("host.commands".to_string(), "{}".to_string(), String::new());
        assert!(!bad.ok);
    }
}
