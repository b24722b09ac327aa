pub mod aggregation;
pub mod billing;
pub mod ingestor;
pub mod invoice;
pub mod normalizer;
pub mod pricing;
pub mod query;

pub use billing::{BillingService, InvoiceRequest};
pub use ingestor::Ingestor;
pub use invoice::InvoiceScope;
