pub mod config;
pub mod domain;
pub mod errors;
pub mod export;
pub mod money;
pub mod period;
pub mod pricing;

pub use domain::customer::{Customer, CustomerId, CustomerStatus};
pub use domain::invoice::{
    BillingOptions, Invoice, InvoiceDraft, InvoiceId, InvoiceLine, InvoiceNumber, InvoiceStatus,
    InvoiceTotals,
};
pub use domain::order::{Order, OrderId, OrderLine, OrderStatus, OwnerType};
pub use domain::payment::{NewPayment, Payment, PaymentId};
pub use domain::rate_card::{NewRateCardRule, RateCard, RateCardId, RateCardRule, RateCardRuleId};
pub use domain::service::ServiceType;
pub use domain::transaction::{
    TransactionEntry, TransactionId, TransactionSource, UnbilledTransaction,
};
pub use errors::{BillingError, InterfaceError};
pub use period::BillingPeriod;
pub use pricing::{PricingEngine, PricingError, PricingResult, TieredPricingEngine};
