//! 谓词下推: 把 `FilterPredicate` 转换为 parquet RowFilter。
//!
//! 每个等值条件和搜索各自成为一个 ArrowPredicate, 只解码自己引用的列;
//! 前一个谓词过滤掉的行不会再为后续谓词解码。

use crate::error::StoreError;
use crate::models::predicate::{equality_matches, search_matches};
use crate::models::{CanonicalField, EqualityFilter, FilterPredicate, SEARCH_FIELDS};
use arrow::array::{Array, BooleanArray, StringArray};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ArrowPredicate, ArrowPredicateFn, RowFilter};
use parquet::arrow::ProjectionMask;
use parquet::schema::types::SchemaDescriptor;

/// 按列名生成叶子列投影
pub fn projection(
    schema: &SchemaDescriptor,
    fields: &[CanonicalField],
) -> Result<ProjectionMask, StoreError> {
    let mut leaves = Vec::with_capacity(fields.len());
    for field in fields {
        let idx = schema
            .columns()
            .iter()
            .position(|c| c.name() == field.column_name())
            .ok_or_else(|| StoreError::Column {
                column: field.column_name().to_string(),
            })?;
        leaves.push(idx);
    }
    Ok(ProjectionMask::leaves(schema, leaves))
}

/// 谓词引用到的全部列 (去重, 保序)
pub fn predicate_fields(predicate: &FilterPredicate) -> Vec<CanonicalField> {
    let mut fields: Vec<CanonicalField> = Vec::new();
    let search = predicate.search().map(|_| SEARCH_FIELDS.iter().copied());
    let candidates = predicate
        .equals()
        .iter()
        .map(|f| f.field)
        .chain(search.into_iter().flatten());
    for field in candidates {
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    fields
}

/// 空谓词返回 None
pub fn row_filter(
    schema: &SchemaDescriptor,
    predicate: &FilterPredicate,
) -> Result<Option<RowFilter>, StoreError> {
    if predicate.is_empty() {
        return Ok(None);
    }

    let mut predicates: Vec<Box<dyn ArrowPredicate>> = Vec::new();
    for filter in predicate.equals() {
        let mask = projection(schema, &[filter.field])?;
        let filter = filter.clone();
        predicates.push(Box::new(ArrowPredicateFn::new(
            mask,
            move |batch: RecordBatch| equality_mask(&batch, &filter),
        )));
    }
    if let Some(needle) = predicate.search() {
        let mask = projection(schema, &SEARCH_FIELDS)?;
        let needle = needle.to_string();
        predicates.push(Box::new(ArrowPredicateFn::new(
            mask,
            move |batch: RecordBatch| search_mask(&batch, &needle),
        )));
    }
    Ok(Some(RowFilter::new(predicates)))
}

fn text_column<'a>(
    batch: &'a RecordBatch,
    field: CanonicalField,
) -> Result<&'a StringArray, ArrowError> {
    batch
        .column_by_name(field.column_name())
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| {
            ArrowError::SchemaError(format!(
                "column {} missing from filter projection",
                field.column_name()
            ))
        })
}

pub fn equality_mask(
    batch: &RecordBatch,
    filter: &EqualityFilter,
) -> Result<BooleanArray, ArrowError> {
    let column = text_column(batch, filter.field)?;
    Ok(column
        .iter()
        .map(|cell| Some(cell.map_or(false, |c| equality_matches(&filter.value, c))))
        .collect())
}

pub fn search_mask(batch: &RecordBatch, needle: &str) -> Result<BooleanArray, ArrowError> {
    let columns = SEARCH_FIELDS
        .iter()
        .map(|f| text_column(batch, *f))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((0..batch.num_rows())
        .map(|row| {
            Some(
                columns
                    .iter()
                    .any(|col| col.is_valid(row) && search_matches(needle, col.value(row))),
            )
        })
        .collect())
}
