use crate::models::UploadStatus;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BillingError>;

/// 表头缺少必需列
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("source file has no header row")]
    EmptyHeader,

    #[error("required column {0} not found in header")]
    MissingColumn(&'static str),

    #[error("neither PricingPreTaxTotal nor BillingPreTaxTotal found in header")]
    MissingTotals,
}

/// 单行解析失败: 仅计数跳过, 不会中断导入
#[derive(Debug, Error)]
pub enum RowParseError {
    #[error("required field {0} is empty")]
    MissingField(&'static str),

    #[error("field {field} has invalid number {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid usage date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("unreadable record: {0}")]
    Record(#[source] csv::Error),
}

/// 列式存储读写错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("store column {column} is missing or has unexpected type")]
    Column { column: String },
}

/// 服务层统一错误
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid pricing context: {0}")]
    InvalidPricingContext(String),

    #[error("{matching} records match, more than the {limit} allowed; paginate or narrow the filter")]
    PayloadTooLarge { matching: usize, limit: usize },

    #[error("no records for customer {customer:?} on domain {domain:?}")]
    NoMatchingRecords { customer: String, domain: String },

    #[error("upload {0} not found")]
    UploadNotFound(i64),

    #[error("upload {0} is already being processed")]
    UploadBusy(i64),

    #[error("upload {0} is already ingested")]
    UploadAlreadyReady(i64),

    #[error("upload {id} is not ready (status: {status})")]
    UploadNotReady { id: i64, status: UploadStatus },

    #[error("no valid rows in source ({malformed} malformed)")]
    EmptyUpload { malformed: u64 },

    #[error("ingestion of upload {0} was cancelled")]
    Cancelled(i64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cannot read source file: {0}")]
    Source(#[from] csv::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
