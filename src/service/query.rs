use crate::config::QueryConfig;
use crate::error::{BillingError, StoreError};
use crate::models::{
    CanonicalField, FieldKind, FilterPredicate, PricingContext, QueryPage, RecordWindow,
    SortOrder, UsageRecord,
};
use crate::service::pricing::price_records;
use crate::store::schema::{batch_to_records, date_column, number_column, text_column};
use crate::store::StoreReader;
use parquet::arrow::arrow_reader::ParquetRecordBatchReader;
use std::cmp::Ordering;
use std::collections::HashMap;

/// 分页/全部查询, 附带计算列
///
/// `total_matching` 基于整个过滤结果集计算, 与请求的页无关。
pub fn run_query(
    store: &StoreReader,
    predicate: &FilterPredicate,
    window: RecordWindow,
    sort: SortOrder,
    ctx: &PricingContext,
    limits: &QueryConfig,
) -> Result<QueryPage, BillingError> {
    let total_matching = store.count(predicate)?;

    let (records, page, page_size) = match window {
        RecordWindow::Page { page, page_size } => {
            if page == 0 {
                return Err(BillingError::InvalidRequest("page starts at 1".to_string()));
            }
            if page_size == 0 || page_size > limits.max_page_size {
                return Err(BillingError::InvalidRequest(format!(
                    "page_size must be between 1 and {}",
                    limits.max_page_size
                )));
            }
            let offset = (page - 1).checked_mul(page_size).ok_or_else(|| {
                BillingError::InvalidRequest("page offset out of range".to_string())
            })?;
            let records = if offset >= total_matching {
                Vec::new()
            } else {
                select_records(store, predicate, sort, offset, Some(page_size))?
            };
            (records, page, page_size)
        }
        RecordWindow::All => {
            if total_matching > limits.max_all_records {
                return Err(BillingError::PayloadTooLarge {
                    matching: total_matching,
                    limit: limits.max_all_records,
                });
            }
            let records = select_records(store, predicate, sort, 0, None)?;
            (records, 1, total_matching)
        }
    };

    Ok(QueryPage {
        records: price_records(records, ctx),
        total_matching,
        page,
        page_size,
    })
}

/// 过滤 + 排序后取 [offset, offset + limit) 窗口
pub fn select_records(
    store: &StoreReader,
    predicate: &FilterPredicate,
    sort: SortOrder,
    offset: usize,
    limit: Option<usize>,
) -> Result<Vec<UsageRecord>, StoreError> {
    match sort {
        SortOrder::Ingestion => read_records(store.scan(predicate, None, offset, limit)?),
        SortOrder::Ascending(field) => sorted_window(store, predicate, field, false, offset, limit),
        SortOrder::Descending(field) => sorted_window(store, predicate, field, true, offset, limit),
    }
}

pub fn read_records(reader: ParquetRecordBatchReader) -> Result<Vec<UsageRecord>, StoreError> {
    let mut records = Vec::new();
    for batch in reader {
        records.extend(batch_to_records(&batch?)?);
    }
    Ok(records)
}

/// 过滤结果集上某一列的排序键
enum SortKeys {
    Text(Vec<String>),
    Number(Vec<f64>),
    Date(Vec<i32>),
}

fn directed(ord: Ordering, descending: bool) -> Ordering {
    if descending {
        ord.reverse()
    } else {
        ord
    }
}

impl SortKeys {
    fn collect(
        store: &StoreReader,
        predicate: &FilterPredicate,
        field: CanonicalField,
    ) -> Result<Self, StoreError> {
        let mut keys = match field.kind() {
            FieldKind::Text => SortKeys::Text(Vec::new()),
            FieldKind::Number => SortKeys::Number(Vec::new()),
            FieldKind::Date => SortKeys::Date(Vec::new()),
        };
        for batch in store.scan(predicate, Some(&[field]), 0, None)? {
            let batch = batch?;
            match &mut keys {
                SortKeys::Text(values) => {
                    let column = text_column(&batch, field)?;
                    values.extend(column.iter().map(|v| v.unwrap_or_default().to_string()));
                }
                SortKeys::Number(values) => {
                    values.extend(number_column(&batch, field)?.values().iter().copied());
                }
                SortKeys::Date(values) => {
                    values.extend(date_column(&batch, field)?.values().iter().copied());
                }
            }
        }
        Ok(keys)
    }

    fn len(&self) -> usize {
        match self {
            SortKeys::Text(v) => v.len(),
            SortKeys::Number(v) => v.len(),
            SortKeys::Date(v) => v.len(),
        }
    }

    /// 稳定排序后的行序号 (相等键保持导入顺序)
    fn ordering(&self, descending: bool) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.len()).collect();
        match self {
            SortKeys::Text(v) => idx.sort_by(|&a, &b| directed(v[a].cmp(&v[b]), descending)),
            SortKeys::Number(v) => {
                idx.sort_by(|&a, &b| directed(v[a].total_cmp(&v[b]), descending))
            }
            SortKeys::Date(v) => idx.sort_by(|&a, &b| directed(v[a].cmp(&v[b]), descending)),
        }
        idx
    }
}

/// 只对排序列做全量排序, 再扫描一遍过滤结果取出目标行
fn sorted_window(
    store: &StoreReader,
    predicate: &FilterPredicate,
    field: CanonicalField,
    descending: bool,
    offset: usize,
    limit: Option<usize>,
) -> Result<Vec<UsageRecord>, StoreError> {
    let keys = SortKeys::collect(store, predicate, field)?;
    let wanted: Vec<usize> = keys
        .ordering(descending)
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    let Some(&last) = wanted.iter().max() else {
        return Ok(Vec::new());
    };

    let slots: HashMap<usize, usize> = wanted
        .iter()
        .enumerate()
        .map(|(slot, &ordinal)| (ordinal, slot))
        .collect();
    let mut window: Vec<Option<UsageRecord>> = vec![None; wanted.len()];
    let mut ordinal = 0usize;
    for batch in store.scan(predicate, None, 0, Some(last + 1))? {
        for record in batch_to_records(&batch?)? {
            if let Some(&slot) = slots.get(&ordinal) {
                window[slot] = Some(record);
            }
            ordinal += 1;
        }
    }
    Ok(window.into_iter().flatten().collect())
}
