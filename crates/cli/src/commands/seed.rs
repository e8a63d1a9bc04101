use chrono::{Datelike, Utc};
use depot_core::period::BillingPeriod;
use depot_db::{DemoDataset, Repositories, SeedResult};
use serde_json::json;

use crate::commands::{open_migrated, prepare, CommandResult, Failure};

/// Loads the demo customers, rate cards and unbilled activity into `period`
/// (the current month when omitted).
pub fn run(period: Option<&str>) -> CommandResult {
    let period = match resolve_period(period) {
        Ok(period) => period,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("seed", error_class, message, exit_code);
        }
    };
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let repositories = Repositories::sql(pool.clone());

        let seeded = DemoDataset::load(&repositories, period)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoDataset::verify(&repositories)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let outcome = if verification.all_present {
            Ok(seeded)
        } else {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&failed), 6u8))
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success_with(
            "seed",
            summary_message(&seeded, period),
            Some(json!({
                "period": period.to_string(),
                "customers_seeded": seeded.customers_seeded,
                "rate_cards_seeded": seeded.rate_cards_seeded,
                "transactions_seeded": seeded.transactions_seeded,
                "skipped": seeded.skipped,
            })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn resolve_period(raw: Option<&str>) -> Result<BillingPeriod, Failure> {
    let parsed = match raw {
        Some(raw) => raw.parse::<BillingPeriod>(),
        None => {
            let today = Utc::now();
            BillingPeriod::new(today.year(), today.month())
        }
    };
    parsed.map_err(crate::commands::billing_failure)
}

fn summary_message(seeded: &SeedResult, period: BillingPeriod) -> String {
    if seeded.customers_seeded == 0 {
        return format!("demo dataset already present ({} customers skipped)", seeded.skipped.len());
    }
    format!(
        "seeded {} customers, {} rate cards and {} transactions for {period}",
        seeded.customers_seeded, seeded.rate_cards_seeded, seeded.transactions_seeded
    )
}

fn verification_message(failed: &[&str]) -> String {
    if failed.is_empty() {
        "some demo data failed to load".to_string()
    } else {
        format!("seed verification failed for: {}", failed.join(", "))
    }
}
