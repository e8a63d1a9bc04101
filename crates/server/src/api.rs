//! JSON billing routes.
//!
//! - `POST /api/v1/transactions`                 — record an unbilled transaction
//! - `POST /api/v1/invoices`                     — invoice a customer for a period or window
//! - `GET  /api/v1/invoices/{id}`                — fetch an invoice with lines and payments
//! - `POST /api/v1/invoices/{id}/finalize`       — OPEN to FINAL
//! - `POST /api/v1/invoices/{id}/cancel`         — cancel and re-open consumed transactions
//! - `GET  /api/v1/invoices/{id}/export`         — `?format=csv|html`
//! - `GET  /api/v1/invoices/{id}/payments`       — payments and refunds, oldest first
//! - `POST /api/v1/invoices/{id}/payments`       — record a payment
//! - `POST /api/v1/payments/{id}/refund`         — refund part or all of a payment
//! - `POST /api/v1/orders/{id}/invoice`          — purchase-for-client invoice
//! - `POST /api/v1/orders/{id}/delivered`        — delivery completion hook
//! - `POST /api/v1/billing/runs/{period}`        — monthly batch run
//! - `GET  /api/v1/billing/summary/{period}`     — unbilled activity preview

use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use depot_billing::{BatchResult, BillingServices, BillingSummary, PurchaseInvoice, RefundReceipt};
use depot_core::domain::customer::CustomerId;
use depot_core::domain::invoice::{Invoice, InvoiceId};
use depot_core::domain::order::OrderId;
use depot_core::domain::payment::{NewPayment, Payment, PaymentId};
use depot_core::domain::transaction::{TransactionEntry, UnbilledTransaction};
use depot_core::errors::{BillingError, InterfaceError};
use depot_core::export::{self, ExportFormat};
use depot_core::period::BillingPeriod;

#[derive(Clone)]
pub struct AppState {
    services: BillingServices,
}

impl AppState {
    pub fn new(services: BillingServices) -> Self {
        Self { services }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/transactions", post(record_transaction))
        .route("/api/v1/invoices", post(generate_invoice))
        .route("/api/v1/invoices/{id}", get(get_invoice))
        .route("/api/v1/invoices/{id}/finalize", post(finalize_invoice))
        .route("/api/v1/invoices/{id}/cancel", post(cancel_invoice))
        .route("/api/v1/invoices/{id}/export", get(export_invoice))
        .route("/api/v1/invoices/{id}/payments", get(list_payments).post(create_payment))
        .route("/api/v1/payments/{id}/refund", post(refund_payment))
        .route("/api/v1/orders/{id}/invoice", post(invoice_order))
        .route("/api/v1/orders/{id}/delivered", post(order_delivered))
        .route("/api/v1/billing/runs/{period}", post(run_billing))
        .route("/api/v1/billing/summary/{period}", get(billing_summary))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub user_message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error: &str, message: String, user_message: &str) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.to_string(),
                message,
                user_message: user_message.to_string(),
                correlation_id: Uuid::new_v4().to_string(),
            },
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            message.into(),
            "The request could not be processed. Check inputs and try again.",
        )
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            message.into(),
            "The invoice could not be rendered.",
        )
    }
}

impl From<BillingError> for ApiError {
    fn from(value: BillingError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        let kind = value.kind();
        let interface = value.into_interface(correlation_id.clone());
        let (status, error) = match &interface {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::Unprocessable { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable")
            }
            InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
        };

        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                error_kind = kind,
                error = %interface,
                "billing request failed"
            );
        } else {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = %correlation_id,
                error_kind = kind,
                error = %interface,
                "billing request rejected"
            );
        }

        Self {
            status,
            body: ErrorBody {
                error: error.to_string(),
                message: interface.message().to_string(),
                user_message: interface.user_message().to_string(),
                correlation_id,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn parse_id<T: FromStr>(raw: &str, entity: &str) -> Result<T, ApiError> {
    raw.parse::<T>().map_err(|_| ApiError::bad_request(format!("invalid {entity} id `{raw}`")))
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Either `period` (`YYYY-MM`) or both `period_from` and `period_to`.
#[derive(Debug, Deserialize)]
pub struct GenerateInvoiceRequest {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub period_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub tax_rate_percent: Option<Decimal>,
}

impl GenerateInvoiceRequest {
    fn window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), BillingError> {
        match (&self.period, self.period_from, self.period_to) {
            (Some(period), None, None) => Ok(period.parse::<BillingPeriod>()?.bounds()),
            (None, Some(from), Some(to)) => Ok((from, to)),
            _ => Err(BillingError::Validation(
                "provide either `period` or both `period_from` and `period_to`".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryOutcome {
    pub order_id: OrderId,
    pub invoice: Option<PurchaseInvoice>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn record_transaction(
    State(state): State<AppState>,
    Json(entry): Json<TransactionEntry>,
) -> Result<(StatusCode, Json<UnbilledTransaction>), ApiError> {
    let recorded = state.services.ledger.record(entry).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

async fn generate_invoice(
    State(state): State<AppState>,
    Json(request): Json<GenerateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), ApiError> {
    let (from, to) = request.window()?;
    let mut options = state.services.default_options().clone();
    if let Some(currency) = &request.currency {
        options.currency = currency.trim().to_ascii_uppercase();
    }
    if let Some(tax_rate_percent) = request.tax_rate_percent {
        options.tax_rate_percent = tax_rate_percent;
    }

    let invoice =
        state.services.invoices.generate(&request.customer_id, from, to, &options).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, ApiError> {
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    Ok(Json(state.services.invoices.get(&invoice_id).await?))
}

async fn finalize_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, ApiError> {
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    Ok(Json(state.services.invoices.finalize(&invoice_id).await?))
}

async fn cancel_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, ApiError> {
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    Ok(Json(state.services.invoices.cancel(&invoice_id).await?))
}

async fn export_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    let format = query
        .format
        .as_deref()
        .unwrap_or("csv")
        .parse::<ExportFormat>()
        .map_err(|error| ApiError::bad_request(error.to_string()))?;

    let invoice = state.services.invoices.get(&invoice_id).await?;
    let rendered = export::render(&invoice, format).map_err(|error| {
        error!(
            event_name = "api.invoice.export_failed",
            invoice_id = %invoice.id,
            error = %error,
            "invoice export failed"
        );
        ApiError::internal(error.to_string())
    })?;

    info!(
        event_name = "api.invoice.exported",
        invoice_id = %invoice.id,
        invoice_number = %invoice.number,
        content_type = format.content_type(),
        "invoice exported"
    );
    Ok(([(header::CONTENT_TYPE, format.content_type())], rendered).into_response())
}

async fn list_payments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    Ok(Json(state.services.payments.payments_for(&invoice_id).await?))
}

async fn create_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payment): Json<NewPayment>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
    let invoice_id: InvoiceId = parse_id(&id, "invoice")?;
    let recorded = state.services.payments.create(&invoice_id, payment).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundReceipt>, ApiError> {
    let payment_id: PaymentId = parse_id(&id, "payment")?;
    let reason = request.reason.unwrap_or_else(|| "refund".to_string());
    Ok(Json(state.services.payments.refund(&payment_id, request.amount, reason).await?))
}

async fn invoice_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PurchaseInvoice>), ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let purchase = state.services.invoices.generate_for_order(&order_id).await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

async fn order_delivered(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryOutcome>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let invoice = state.services.delivery.on_delivery_completed(&order_id).await;
    Ok(Json(DeliveryOutcome { order_id, invoice }))
}

async fn run_billing(
    State(state): State<AppState>,
    Path(period): Path<String>,
) -> Result<Json<BatchResult>, ApiError> {
    Ok(Json(state.services.batch.run_monthly_billing(&period).await?))
}

pub async fn billing_summary(
    State(state): State<AppState>,
    Path(period): Path<String>,
) -> Result<Json<BillingSummary>, ApiError> {
    Ok(Json(state.services.batch.billing_summary(&period).await?))
}
