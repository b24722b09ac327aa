use crate::error::StoreError;
use crate::models::{CanonicalField, FieldKind, UsageRecord};
use arrow::array::{Array, ArrayRef, Date32Array, Float64Array, StringArray};
use arrow::datatypes::{DataType, Date32Type, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// 存储列的 arrow 类型
pub fn data_type(field: CanonicalField) -> DataType {
    match field.kind() {
        FieldKind::Text => DataType::Utf8,
        FieldKind::Date => DataType::Date32,
        FieldKind::Number => DataType::Float64,
    }
}

/// 固定的用量 schema, 列顺序同 `CanonicalField::ALL`
pub fn usage_schema() -> SchemaRef {
    let fields: Vec<Field> = CanonicalField::ALL
        .iter()
        .map(|f| Field::new(f.column_name(), data_type(*f), false))
        .collect();
    Arc::new(Schema::new(fields))
}

/// 一批记录转为 RecordBatch
pub fn records_to_batch(
    schema: &SchemaRef,
    records: &[UsageRecord],
) -> Result<RecordBatch, StoreError> {
    let columns: Vec<ArrayRef> = CanonicalField::ALL
        .iter()
        .map(|field| column_array(*field, records))
        .collect();
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn column_array(field: CanonicalField, records: &[UsageRecord]) -> ArrayRef {
    match field.kind() {
        FieldKind::Text => Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.text(field).unwrap_or_default()),
        )),
        FieldKind::Date => Arc::new(Date32Array::from_iter_values(
            records
                .iter()
                .map(|r| Date32Type::from_naive_date(r.usage_date)),
        )),
        FieldKind::Number => Arc::new(Float64Array::from_iter_values(
            records.iter().map(|r| r.number(field).unwrap_or_default()),
        )),
    }
}

fn missing(field: CanonicalField) -> StoreError {
    StoreError::Column {
        column: field.column_name().to_string(),
    }
}

pub fn text_column(batch: &RecordBatch, field: CanonicalField) -> Result<&StringArray, StoreError> {
    batch
        .column_by_name(field.column_name())
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| missing(field))
}

pub fn number_column(
    batch: &RecordBatch,
    field: CanonicalField,
) -> Result<&Float64Array, StoreError> {
    batch
        .column_by_name(field.column_name())
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| missing(field))
}

pub fn date_column(batch: &RecordBatch, field: CanonicalField) -> Result<&Date32Array, StoreError> {
    batch
        .column_by_name(field.column_name())
        .and_then(|c| c.as_any().downcast_ref::<Date32Array>())
        .ok_or_else(|| missing(field))
}

fn text_at(column: &StringArray, row: usize) -> String {
    if column.is_null(row) {
        String::new()
    } else {
        column.value(row).to_string()
    }
}

/// 完整列的 RecordBatch 还原为记录
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<UsageRecord>, StoreError> {
    let customer_name = text_column(batch, CanonicalField::CustomerName)?;
    let customer_domain_name = text_column(batch, CanonicalField::CustomerDomainName)?;
    let entitlement_description = text_column(batch, CanonicalField::EntitlementDescription)?;
    let entitlement_id = text_column(batch, CanonicalField::EntitlementId)?;
    let tags = text_column(batch, CanonicalField::Tags)?;
    let invoice_number = text_column(batch, CanonicalField::InvoiceNumber)?;
    let product_name = text_column(batch, CanonicalField::ProductName)?;
    let meter_category = text_column(batch, CanonicalField::MeterCategory)?;
    let meter_sub_category = text_column(batch, CanonicalField::MeterSubCategory)?;
    let meter_name = text_column(batch, CanonicalField::MeterName)?;
    let meter_type = text_column(batch, CanonicalField::MeterType)?;
    let charge_type = text_column(batch, CanonicalField::ChargeType)?;
    let unit = text_column(batch, CanonicalField::Unit)?;
    let usage_date = date_column(batch, CanonicalField::UsageDate)?;
    let quantity = number_column(batch, CanonicalField::Quantity)?;
    let unit_price = number_column(batch, CanonicalField::UnitPrice)?;
    let pricing = number_column(batch, CanonicalField::PricingPreTaxTotal)?;
    let billing = number_column(batch, CanonicalField::BillingPreTaxTotal)?;

    let records = (0..batch.num_rows())
        .map(|row| UsageRecord {
            customer_name: text_at(customer_name, row),
            customer_domain_name: text_at(customer_domain_name, row),
            entitlement_description: text_at(entitlement_description, row),
            entitlement_id: text_at(entitlement_id, row),
            tags: text_at(tags, row),
            invoice_number: text_at(invoice_number, row),
            product_name: text_at(product_name, row),
            meter_category: text_at(meter_category, row),
            meter_sub_category: text_at(meter_sub_category, row),
            meter_name: text_at(meter_name, row),
            meter_type: text_at(meter_type, row),
            charge_type: text_at(charge_type, row),
            unit: text_at(unit, row),
            usage_date: Date32Type::to_naive_date(usage_date.value(row)),
            quantity: quantity.value(row),
            unit_price: unit_price.value(row),
            pricing_pre_tax_total: pricing.value(row),
            billing_pre_tax_total: billing.value(row),
        })
        .collect();
    Ok(records)
}
