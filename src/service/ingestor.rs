use crate::config::StorageConfig;
use crate::error::{BillingError, RowParseError};
use crate::models::{CanonicalField, FieldKind, IngestReport, UsageRecord};
use crate::service::normalizer::HeaderMapping;
use crate::store::StoreWriter;
use chrono::NaiveDate;
use csv::StringRecord;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// 唯一接受的日期格式
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 解析金额/数量: 允许千分位逗号, 空值视为 0
pub fn parse_amount(field: CanonicalField, raw: &str) -> Result<f64, RowParseError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Ok(0.0);
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RowParseError::InvalidNumber {
            field: field.column_name(),
            value: raw.to_string(),
        })
}

/// 按表头映射把一行原始数据转换为规范记录
pub fn parse_row(record: &StringRecord, mapping: &HeaderMapping) -> Result<UsageRecord, RowParseError> {
    let text = |field: CanonicalField| -> &str {
        mapping
            .index_of(field)
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .unwrap_or("")
    };

    if text(CanonicalField::CustomerName).is_empty() {
        return Err(RowParseError::MissingField("CustomerName"));
    }
    let raw_date = text(CanonicalField::UsageDate);
    if raw_date.is_empty() {
        return Err(RowParseError::MissingField("UsageDate"));
    }
    let usage_date = NaiveDate::parse_from_str(raw_date, DATE_FORMAT)
        .map_err(|_| RowParseError::InvalidDate(raw_date.to_string()))?;

    let amount = |field: CanonicalField| -> Result<Option<f64>, RowParseError> {
        if mapping.contains(field) {
            parse_amount(field, text(field)).map(Some)
        } else {
            Ok(None)
        }
    };
    // 只有一种合计列时另一列取相同值
    let (pricing, billing) = match (
        amount(CanonicalField::PricingPreTaxTotal)?,
        amount(CanonicalField::BillingPreTaxTotal)?,
    ) {
        (Some(p), Some(b)) => (p, b),
        (Some(p), None) => (p, p),
        (None, Some(b)) => (b, b),
        (None, None) => (0.0, 0.0),
    };

    let mut row = UsageRecord {
        customer_name: String::new(),
        customer_domain_name: String::new(),
        entitlement_description: String::new(),
        entitlement_id: String::new(),
        tags: String::new(),
        invoice_number: String::new(),
        product_name: String::new(),
        meter_category: String::new(),
        meter_sub_category: String::new(),
        meter_name: String::new(),
        meter_type: String::new(),
        charge_type: String::new(),
        unit: String::new(),
        usage_date,
        quantity: amount(CanonicalField::Quantity)?.unwrap_or(0.0),
        unit_price: amount(CanonicalField::UnitPrice)?.unwrap_or(0.0),
        pricing_pre_tax_total: pricing,
        billing_pre_tax_total: billing,
    };
    for field in CanonicalField::ALL {
        if field.kind() != FieldKind::Text {
            continue;
        }
        if let Some(slot) = row.text_mut(field) {
            slot.push_str(text(field));
        }
    }
    Ok(row)
}

/// 行级错误只计数, 其它错误 (I/O) 中断导入
fn is_row_error(err: &csv::Error) -> bool {
    matches!(
        err.kind(),
        csv::ErrorKind::Utf8 { .. } | csv::ErrorKind::UnequalLengths { .. }
    )
}

/// 导入失败: 错误本身 + 失败前已跳过的异常行数
#[derive(Debug)]
pub struct IngestFailure {
    pub error: BillingError,
    pub malformed_count: u64,
}

impl From<BillingError> for IngestFailure {
    fn from(error: BillingError) -> Self {
        Self {
            error,
            malformed_count: 0,
        }
    }
}

#[derive(Debug, Default)]
struct IngestStats {
    row_count: u64,
    malformed_count: u64,
    pricing_total: f64,
    billing_total: f64,
    usage_start: Option<NaiveDate>,
    usage_end: Option<NaiveDate>,
}

impl IngestStats {
    fn accept(&mut self, row: &UsageRecord) {
        self.row_count += 1;
        self.pricing_total += row.pricing_pre_tax_total;
        self.billing_total += row.billing_pre_tax_total;
        self.usage_start = Some(self.usage_start.map_or(row.usage_date, |d| d.min(row.usage_date)));
        self.usage_end = Some(self.usage_end.map_or(row.usage_date, |d| d.max(row.usage_date)));
    }

    fn into_report(self) -> IngestReport {
        IngestReport {
            row_count: self.row_count,
            malformed_count: self.malformed_count,
            pricing_pretax_total: self.pricing_total,
            billing_pretax_total: self.billing_total,
            usage_start: self.usage_start,
            usage_end: self.usage_end,
        }
    }
}

/// 流式导入器: 按固定行数分批读取, 内存上限与文件大小无关
#[derive(Debug, Clone)]
pub struct Ingestor {
    batch_size: usize,
    row_group_size: usize,
}

impl Ingestor {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            batch_size: storage.batch_size.max(1),
            row_group_size: storage.row_group_size.max(1),
        }
    }

    pub fn ingest_file(
        &self,
        upload_id: i64,
        source: &Path,
        store_path: &Path,
        cancel: &AtomicBool,
    ) -> Result<IngestReport, IngestFailure> {
        let file = File::open(source).map_err(|e| BillingError::Source(csv::Error::from(e)))?;
        self.ingest_reader(upload_id, BufReader::new(file), store_path, cancel)
    }

    /// 导入任意 CSV 源; 失败或取消时不会留下 store 文件
    pub fn ingest_reader<R: Read>(
        &self,
        upload_id: i64,
        source: R,
        store_path: &Path,
        cancel: &AtomicBool,
    ) -> Result<IngestReport, IngestFailure> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(source);
        let headers = reader.headers().map_err(BillingError::from)?.clone();
        let mapping = HeaderMapping::from_headers(headers.iter()).map_err(BillingError::from)?;
        tracing::info!(
            "Upload {}: 表头识别 {} 个规范字段, 共 {} 列",
            upload_id,
            mapping.len(),
            headers.len()
        );

        let mut writer = StoreWriter::create(store_path, self.row_group_size).map_err(BillingError::from)?;
        let mut stats = IngestStats::default();
        let outcome = self.copy_rows(upload_id, &mut reader, &mapping, &mut writer, cancel, &mut stats);
        let malformed_count = stats.malformed_count;

        match outcome {
            Ok(()) if stats.row_count == 0 => {
                writer.abort();
                Err(IngestFailure {
                    error: BillingError::EmptyUpload {
                        malformed: malformed_count,
                    },
                    malformed_count,
                })
            }
            Ok(()) => match writer.finish() {
                Ok(_) => Ok(stats.into_report()),
                Err(e) => Err(IngestFailure {
                    error: e.into(),
                    malformed_count,
                }),
            },
            Err(error) => {
                writer.abort();
                Err(IngestFailure {
                    error,
                    malformed_count,
                })
            }
        }
    }

    fn copy_rows<R: Read>(
        &self,
        upload_id: i64,
        reader: &mut csv::Reader<R>,
        mapping: &HeaderMapping,
        writer: &mut StoreWriter,
        cancel: &AtomicBool,
        stats: &mut IngestStats,
    ) -> Result<(), BillingError> {
        let mut batch: Vec<UsageRecord> = Vec::with_capacity(self.batch_size);
        let mut record = StringRecord::new();
        let mut batches = 0usize;

        loop {
            match reader.read_record(&mut record) {
                Ok(false) => break,
                Ok(true) => match parse_row(&record, mapping) {
                    Ok(row) => {
                        stats.accept(&row);
                        batch.push(row);
                    }
                    Err(e) => {
                        stats.malformed_count += 1;
                        tracing::debug!(
                            "Upload {}: 跳过第 {} 行: {}",
                            upload_id,
                            record.position().map_or(0, |p| p.line()),
                            e
                        );
                    }
                },
                Err(e) if is_row_error(&e) => {
                    stats.malformed_count += 1;
                    tracing::debug!("Upload {}: 跳过不可读行: {}", upload_id, RowParseError::Record(e));
                }
                Err(e) => return Err(BillingError::Source(e)),
            }

            if batch.len() >= self.batch_size {
                if cancel.load(Ordering::Relaxed) {
                    return Err(BillingError::Cancelled(upload_id));
                }
                writer.write_batch(&batch)?;
                batch.clear();
                batches += 1;
                if batches % 10 == 0 || batches == 1 {
                    tracing::info!(
                        "Upload {}: 已写入 {} 批, 有效行 {}, 异常行 {}",
                        upload_id,
                        batches,
                        stats.row_count,
                        stats.malformed_count
                    );
                }
            }
        }

        if cancel.load(Ordering::Relaxed) {
            return Err(BillingError::Cancelled(upload_id));
        }
        writer.write_batch(&batch)?;
        Ok(())
    }
}
