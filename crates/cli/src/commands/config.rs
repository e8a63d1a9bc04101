use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use depot_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

/// `(key path, environment override)` for every reported setting.
const FIELDS: &[(&str, &str)] = &[
    ("database.url", "DEPOT_DATABASE_URL"),
    ("database.max_connections", "DEPOT_DATABASE_MAX_CONNECTIONS"),
    ("database.timeout_secs", "DEPOT_DATABASE_TIMEOUT_SECS"),
    ("server.bind_address", "DEPOT_SERVER_BIND_ADDRESS"),
    ("server.port", "DEPOT_SERVER_PORT"),
    ("billing.currency", "DEPOT_BILLING_CURRENCY"),
    ("billing.tax_rate_percent", "DEPOT_BILLING_TAX_RATE_PERCENT"),
    ("billing.purchase_vat_percent", "DEPOT_BILLING_PURCHASE_VAT_PERCENT"),
    ("logging.level", "DEPOT_LOGGING_LEVEL"),
    ("logging.format", "DEPOT_LOGGING_FORMAT"),
];

pub fn run() -> CommandResult {
    match render() {
        Ok(rendered) => CommandResult::success("config", rendered),
        Err(message) => CommandResult::failure("config", "config_validation", message, 2),
    }
}

pub fn render() -> Result<String, String> {
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| format!("config validation failed: {error}"))?;

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_key) in FIELDS {
        let value = field_value(&config, key_path);
        let source =
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    Ok(lines.join("\n"))
}

fn field_value(config: &AppConfig, key_path: &str) -> String {
    match key_path {
        "database.url" => config.database.url.clone(),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "server.bind_address" => config.server.bind_address.clone(),
        "server.port" => config.server.port.to_string(),
        "billing.currency" => config.billing.currency.clone(),
        "billing.tax_rate_percent" => config.billing.tax_rate_percent.to_string(),
        "billing.purchase_vat_percent" => config.billing.purchase_vat_percent.to_string(),
        "logging.level" => config.logging.level.clone(),
        "logging.format" => format!("{:?}", config.logging.format).to_ascii_lowercase(),
        _ => "<unknown>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("depot.toml"), PathBuf::from("config/depot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
