use depot_billing::BillingServices;
use depot_core::config::AppConfig;
use depot_db::Repositories;
use serde::Serialize;

use crate::commands::{billing_failure, open_migrated, prepare, CommandResult, Failure};

pub fn run(period: &str) -> CommandResult {
    let command = "bill run";
    let outcome = with_services(command, |services| async move {
        services.batch.run_monthly_billing(period).await.map_err(billing_failure)
    });

    match outcome {
        Ok(batch) => {
            let message = format!(
                "{} invoices for {} customers totalling {} in {}",
                batch.total_invoices, batch.total_customers, batch.total_amount, batch.period
            );
            let data = to_value(&batch);
            if batch.is_clean() {
                CommandResult::success_with(command, message, data)
            } else {
                CommandResult::failure_with(
                    command,
                    "batch_partial",
                    format!("{message}; {} customers failed", batch.errors.len()),
                    11,
                    data,
                )
            }
        }
        Err(result) => result,
    }
}

pub fn summary(period: &str) -> CommandResult {
    let command = "bill summary";
    let outcome = with_services(command, |services| async move {
        services.batch.billing_summary(period).await.map_err(billing_failure)
    });

    match outcome {
        Ok(summary) => CommandResult::success_with(
            command,
            format!(
                "{} unbilled transactions totalling {} across {} customers in {}",
                summary.total_transactions,
                summary.total_amount,
                summary.customers.len(),
                summary.period
            ),
            to_value(&summary),
        ),
        Err(result) => result,
    }
}

fn with_services<T, F, Fut>(command: &str, operation: F) -> Result<T, CommandResult>
where
    F: FnOnce(BillingServices) -> Fut,
    Fut: std::future::Future<Output = Result<T, Failure>>,
{
    let (config, runtime) = prepare(command)?;

    runtime
        .block_on(async {
            let pool = open_migrated(&config).await?;
            let outcome = operation(services_for(&config, pool.clone())).await;
            pool.close().await;
            outcome
        })
        .map_err(|(error_class, message, exit_code)| {
            CommandResult::failure(command, error_class, message, exit_code)
        })
}

fn services_for(config: &AppConfig, pool: depot_db::DbPool) -> BillingServices {
    BillingServices::new(Repositories::sql(pool), &config.billing)
}

fn to_value(value: &impl Serialize) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}
