pub mod field;
pub mod predicate;
pub mod pricing;
pub mod report;
pub mod upload;
pub mod usage;

pub use field::{CanonicalField, FieldKind};
pub use predicate::{EqualityFilter, FilterPredicate, RecordWindow, SortOrder, SEARCH_FIELDS};
pub use pricing::PricingContext;
pub use report::{CustomerTotal, InvoiceDocument, InvoiceLine, InvoiceTotals, QueryPage, UsageSummary};
pub use upload::{IngestReport, Upload, UploadRow, UploadStatus};
pub use usage::{ComputedRecord, UsageRecord};
