pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "depot",
    about = "Depot billing operator CLI",
    long_about = "Apply migrations, inspect configuration, seed demo data, and run monthly \
                  billing.",
    after_help = "Examples:\n  depot migrate\n  depot bill summary --period 2024-03\n  \
                  depot bill run --period 2024-03"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Load deterministic demo customers, rate cards and unbilled activity")]
    Seed {
        #[arg(long, value_name = "YYYY-MM", help = "Month the demo activity falls in")]
        period: Option<String>,
    },
    #[command(subcommand, about = "Monthly billing runs")]
    Bill(BillCommand),
}

#[derive(Debug, Subcommand)]
enum BillCommand {
    #[command(about = "Invoice every active customer's unbilled activity for the period")]
    Run {
        #[arg(long, value_name = "YYYY-MM")]
        period: String,
    },
    #[command(about = "Preview unbilled activity for the period without invoicing")]
    Summary {
        #[arg(long, value_name = "YYYY-MM")]
        period: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Seed { period } => commands::seed::run(period.as_deref()),
        Command::Bill(BillCommand::Run { period }) => commands::bill::run(&period),
        Command::Bill(BillCommand::Summary { period }) => commands::bill::summary(&period),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{BillCommand, Cli, Command};

    #[test]
    fn bill_run_requires_a_period() {
        assert!(Cli::try_parse_from(["depot", "bill", "run"]).is_err());

        let cli = Cli::try_parse_from(["depot", "bill", "run", "--period", "2024-03"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Bill(BillCommand::Run { ref period }) if period == "2024-03"
        ));
    }

    #[test]
    fn seed_period_is_optional() {
        let cli = Cli::try_parse_from(["depot", "seed"]).expect("parse");
        assert!(matches!(cli.command, Command::Seed { period: None }));
    }
}
