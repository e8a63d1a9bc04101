use std::env;
use std::sync::{Mutex, OnceLock};

use depot_cli::commands::{bill, config, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("DEPOT_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_currency() {
    with_env(
        &[("DEPOT_DATABASE_URL", "sqlite::memory:"), ("DEPOT_BILLING_CURRENCY", "dollars")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn config_reports_env_sources() {
    with_env(&[("DEPOT_BILLING_TAX_RATE_PERCENT", "8")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains(
            "- billing.tax_rate_percent = 8 (source: env (DEPOT_BILLING_TAX_RATE_PERCENT))"
        ));
        assert!(message.contains("- billing.currency = USD (source: default)"));
    });
}

#[test]
fn bill_summary_rejects_malformed_period() {
    with_env(
        &[("DEPOT_DATABASE_URL", "sqlite::memory:"), ("DEPOT_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = bill::summary("03-2024");
            assert_eq!(result.exit_code, 7);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "bill summary");
            assert_eq!(payload["error_class"], "validation");
        },
    );
}

#[test]
fn seed_then_bill_run_consumes_the_demo_month() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("depot.db").display());

    with_env(&[("DEPOT_DATABASE_URL", url.as_str())], || {
        let seeded = seed::run(Some("2024-03"));
        assert_eq!(seeded.exit_code, 0, "{}", seeded.output);
        let payload = parse_payload(&seeded.output);
        assert_eq!(payload["data"]["customers_seeded"], 4);
        assert_eq!(payload["data"]["transactions_seeded"], 4);

        let reseeded = parse_payload(&seed::run(Some("2024-03")).output);
        assert_eq!(reseeded["status"], "ok");
        assert_eq!(reseeded["data"]["customers_seeded"], 0);

        let preview = parse_payload(&bill::summary("2024-03").output);
        assert_eq!(preview["status"], "ok");
        assert_eq!(preview["data"]["total_transactions"], 4);
        assert_eq!(preview["data"]["customers"].as_array().map(Vec::len), Some(2));

        let run = bill::run("2024-03");
        assert_eq!(run.exit_code, 0, "{}", run.output);
        let batch = parse_payload(&run.output);
        assert_eq!(batch["command"], "bill run");
        assert_eq!(batch["data"]["total_customers"], 3);
        assert_eq!(batch["data"]["total_invoices"], 2);

        let after = parse_payload(&bill::summary("2024-03").output);
        assert_eq!(after["data"]["total_transactions"], 0);
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "DEPOT_DATABASE_URL",
        "DEPOT_DATABASE_MAX_CONNECTIONS",
        "DEPOT_DATABASE_TIMEOUT_SECS",
        "DEPOT_SERVER_BIND_ADDRESS",
        "DEPOT_SERVER_PORT",
        "DEPOT_BILLING_CURRENCY",
        "DEPOT_BILLING_TAX_RATE_PERCENT",
        "DEPOT_BILLING_PURCHASE_VAT_PERCENT",
        "DEPOT_LOGGING_LEVEL",
        "DEPOT_LOGGING_FORMAT",
        "DEPOT_LOG_LEVEL",
        "DEPOT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
