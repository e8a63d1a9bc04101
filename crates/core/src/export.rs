//! CSV and HTML renderings of a finalized invoice.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use tera::{Context, Tera};
use thiserror::Error;

use crate::domain::invoice::Invoice;

const INVOICE_TEMPLATE: &str = "invoice.html";

const CSV_HEADER: &[&str] =
    &["position", "description", "service_type", "quantity", "unit", "rate", "tax", "amount"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("template error: {0}")]
    Template(String),
    #[error("csv error: {0}")]
    Csv(String),
    #[error("unsupported export format `{0}` (expected csv|html)")]
    UnsupportedFormat(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Html,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Html => "text/html; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "html" => Ok(Self::Html),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

pub fn render(invoice: &Invoice, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => render_csv(invoice),
        ExportFormat::Html => render_html(invoice),
    }
}

/// One row per line, then `subtotal`, `tax` and `total` summary rows.
pub fn render_csv(invoice: &Invoice) -> Result<String, ExportError> {
    let mut csv = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    csv.write_record(CSV_HEADER).map_err(|e| ExportError::Csv(e.to_string()))?;

    for line in &invoice.lines {
        csv.write_record([
            line.position.to_string(),
            line.description.clone(),
            line.service_type.to_string(),
            line.quantity.normalize().to_string(),
            line.unit.clone(),
            format_money(line.rate),
            format_money(line.tax),
            format_money(line.amount),
        ])
        .map_err(|e| ExportError::Csv(e.to_string()))?;
    }

    for (label, amount) in
        [("subtotal", invoice.subtotal), ("tax", invoice.tax), ("total", invoice.total)]
    {
        csv.write_record(["", label, "", "", "", "", "", &format_money(amount)])
            .map_err(|e| ExportError::Csv(e.to_string()))?;
    }

    let bytes = csv.into_inner().map_err(|e| ExportError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Csv(e.to_string()))
}

pub fn render_html(invoice: &Invoice) -> Result<String, ExportError> {
    let mut tera = Tera::default();
    tera.register_filter("money", money_filter);
    tera.add_raw_template(INVOICE_TEMPLATE, include_str!("../templates/invoice.html.tera"))
        .map_err(|e| ExportError::Template(e.to_string()))?;

    let mut context = Context::new();
    context.insert("invoice", invoice);
    context.insert("issued_at", &invoice.issued_at.format("%Y-%m-%d").to_string());
    context.insert("balance", &invoice.remaining_balance());
    let period = match (invoice.period_from, invoice.period_to) {
        (Some(from), Some(to)) => {
            Some(format!("{} to {}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d")))
        }
        _ => None,
    };
    context.insert("period", &period);

    tera.render(INVOICE_TEMPLATE, &context).map_err(|e| ExportError::Template(e.to_string()))
}

/// Two fraction digits for display; stored values keep the full money scale.
pub fn format_money(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// Decimals serialize as strings, so accept both strings and numbers.
fn money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let amount = match value {
        tera::Value::String(raw) => Decimal::from_str(raw)
            .map_err(|e| tera::Error::msg(format!("money filter: `{raw}` is not a decimal: {e}")))?,
        tera::Value::Number(number) => Decimal::from_str(&number.to_string())
            .map_err(|e| tera::Error::msg(format!("money filter: {e}")))?,
        tera::Value::Null => Decimal::ZERO,
        other => {
            return Err(tera::Error::msg(format!("money filter expects a number, got {other}")))
        }
    };
    Ok(tera::Value::String(format_money(amount)))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{format_money, render_csv, render_html, ExportFormat};
    use crate::domain::customer::CustomerId;
    use crate::domain::invoice::{
        Invoice, InvoiceId, InvoiceLine, InvoiceNumber, InvoiceStatus, InvoiceTotals,
    };
    use crate::domain::service::ServiceType;

    fn sample_invoice() -> Invoice {
        let issued_at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let lines = vec![
            InvoiceLine::priced(
                1,
                "Picking - SO-1001, \"rush\"",
                ServiceType::Picking,
                Decimal::new(12, 0),
                "unit",
                Decimal::new(125, 2),
                Decimal::new(15, 0),
                Decimal::new(10, 0),
            ),
            InvoiceLine::priced(
                2,
                "Storage <bay 4>",
                ServiceType::Storage,
                Decimal::new(30, 0),
                "m3",
                Decimal::new(5, 1),
                Decimal::new(15, 0),
                Decimal::new(10, 0),
            ),
        ];
        let totals = InvoiceTotals::from_lines(&lines, Decimal::new(10, 0));
        Invoice {
            id: InvoiceId::new(),
            number: InvoiceNumber::first_for(issued_at),
            customer_id: CustomerId::new(),
            order_id: None,
            period_from: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            period_to: Some(Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()),
            currency: "USD".to_string(),
            subtotal: totals.subtotal,
            tax: totals.tax,
            total: totals.total,
            amount_paid: Decimal::ZERO,
            status: InvoiceStatus::Open,
            issued_at,
            lines,
            payments: Vec::new(),
        }
    }

    #[test]
    fn csv_has_header_lines_and_totals() {
        let csv = render_csv(&sample_invoice()).expect("csv");
        let rows: Vec<&str> = csv.lines().collect();

        assert_eq!(rows[0], "position,description,service_type,quantity,unit,rate,tax,amount");
        assert_eq!(
            rows[1],
            "1,\"Picking - SO-1001, \"\"rush\"\"\",PICKING,12,unit,1.25,1.50,15.00"
        );
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[5], ",total,,,,,,33.00");
    }

    #[test]
    fn html_escapes_descriptions_and_formats_money() {
        let html = render_html(&sample_invoice()).expect("html");

        assert!(html.contains("Invoice INV-202403-0001"));
        assert!(html.contains("Storage &lt;bay 4&gt;"));
        assert!(html.contains("33.00 USD"));
        assert!(html.contains("Period: 2024-02-01 to 2024-02-29"));
    }

    #[test]
    fn money_is_shown_with_two_digits() {
        assert_eq!(format_money(Decimal::new(12_345, 3)), "12.35");
        assert_eq!(format_money(Decimal::new(7, 0)), "7.00");
    }

    #[test]
    fn export_format_parses_case_insensitively() {
        assert_eq!("CSV".parse::<ExportFormat>().ok(), Some(ExportFormat::Csv));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
