use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// 上传状态: pending -> processing -> ready | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Processing => "processing",
            UploadStatus::Ready => "ready",
            UploadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "processing" => Ok(UploadStatus::Processing),
            "ready" => Ok(UploadStatus::Ready),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(format!("unknown upload status {:?}", other)),
        }
    }
}

/// 上传记录 (uploads 表)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub filename: String,
    pub status: UploadStatus,
    pub row_count: i64,
    pub malformed_count: i64,
    pub pricing_pretax_total: f64,
    pub billing_pretax_total: f64,
    pub usage_start: Option<NaiveDate>,
    pub usage_end: Option<NaiveDate>,
    pub store_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// uploads 表原始行, status 以文本存储
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub id: i64,
    pub filename: String,
    pub status: String,
    pub row_count: i64,
    pub malformed_count: i64,
    pub pricing_pretax_total: f64,
    pub billing_pretax_total: f64,
    pub usage_start: Option<NaiveDate>,
    pub usage_end: Option<NaiveDate>,
    pub store_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<UploadRow> for Upload {
    type Error = sqlx::Error;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        Ok(Upload {
            id: row.id,
            filename: row.filename,
            status,
            row_count: row.row_count,
            malformed_count: row.malformed_count,
            pricing_pretax_total: row.pricing_pretax_total,
            billing_pretax_total: row.billing_pretax_total,
            usage_start: row.usage_start,
            usage_end: row.usage_end,
            store_path: row.store_path,
            error_message: row.error_message,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

/// 一次成功导入的统计结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub row_count: u64,
    pub malformed_count: u64,
    pub pricing_pretax_total: f64,
    pub billing_pretax_total: f64,
    pub usage_start: Option<NaiveDate>,
    pub usage_end: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Processing,
            UploadStatus::Ready,
            UploadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>(), Ok(status));
        }
        assert!("completed".parse::<UploadStatus>().is_err());
    }
}
