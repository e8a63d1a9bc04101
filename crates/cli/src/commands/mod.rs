pub mod bill;
pub mod config;
pub mod migrate;
pub mod seed;

use depot_core::config::{AppConfig, LoadOptions};
use depot_core::errors::BillingError;
use depot_db::{connect_with_settings, migrations, DbPool};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// `(error_class, message, exit_code)` carried out of a command's async block.
pub(crate) type Failure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::failure_with(command, error_class, message, exit_code, None)
    }

    pub fn failure_with(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\
             \"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Loads configuration and builds a single-threaded runtime, or the failure to print.
pub(crate) fn prepare(
    command: &str,
) -> Result<(AppConfig, tokio::runtime::Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        let message = format!("configuration issue: {error}");
        CommandResult::failure(command, "config_validation", message, 2)
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;

    Ok((config, runtime))
}

pub(crate) async fn open_migrated(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

/// Exit codes for billing failures start after the infrastructure classes.
pub(crate) fn billing_failure(error: BillingError) -> Failure {
    let exit_code = match &error {
        BillingError::Validation(_) => 7,
        BillingError::NotFound { .. } => 8,
        BillingError::Conflict(_) => 9,
        BillingError::Persistence(_) => 4,
        BillingError::NoApplicableRate { .. }
        | BillingError::NoBillableActivity { .. }
        | BillingError::DomainViolation(_) => 10,
    };
    (error.kind(), error.to_string(), exit_code)
}

#[cfg(test)]
mod tests {
    use depot_core::errors::BillingError;
    use serde_json::json;

    use super::{billing_failure, CommandResult};

    #[test]
    fn failure_payload_is_one_json_line_with_class() {
        let result = CommandResult::failure_with(
            "bill run",
            "batch_partial",
            "1 customer failed",
            11,
            Some(json!({ "errors": 1 })),
        );

        assert_eq!(result.exit_code, 11);
        assert_eq!(result.output.lines().count(), 1);
        let payload: serde_json::Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["error_class"], "batch_partial");
        assert_eq!(payload["data"]["errors"], 1);
    }

    #[test]
    fn success_payload_omits_absent_data() {
        let result = CommandResult::success("migrate", "applied pending migrations");
        let payload: serde_json::Value = serde_json::from_str(&result.output).expect("json");
        assert!(payload.get("data").is_none());
        assert!(payload["error_class"].is_null());
    }

    #[test]
    fn billing_failures_map_to_distinct_exit_codes() {
        let validation = billing_failure(BillingError::Validation("bad period".to_string()));
        let conflict = billing_failure(BillingError::Conflict("claimed".to_string()));
        let persistence = billing_failure(BillingError::Persistence("locked".to_string()));

        assert_eq!((validation.0, validation.2), ("validation", 7));
        assert_eq!((conflict.0, conflict.2), ("conflict", 9));
        assert_eq!((persistence.0, persistence.2), ("persistence", 4));
    }
}
