use crate::error::BillingError;
use crate::models::{CanonicalField, CustomerTotal, FilterPredicate, PricingContext, UsageSummary};
use crate::service::pricing::price_amount;
use crate::store::schema::{number_column, text_column};
use crate::store::StoreReader;
use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// 过滤结果集 (而非当前页) 上的合计
pub fn summarize(
    store: &StoreReader,
    predicate: &FilterPredicate,
    ctx: &PricingContext,
) -> Result<UsageSummary, BillingError> {
    let columns = [
        CanonicalField::PricingPreTaxTotal,
        CanonicalField::BillingPreTaxTotal,
    ];
    let partials = store.fold_partitions(
        predicate,
        &columns,
        UsageSummary::default,
        |acc: &mut UsageSummary, batch: &RecordBatch| {
            let pricing = number_column(batch, CanonicalField::PricingPreTaxTotal)?;
            let billing = number_column(batch, CanonicalField::BillingPreTaxTotal)?;
            for (p, b) in pricing.values().iter().zip(billing.values().iter()) {
                let priced = price_amount(*p, ctx);
                acc.total_records += 1;
                acc.total_pricing += *p;
                acc.total_billing += *b;
                acc.total_pre_tax_with_forex += priced.pre_tax_with_forex;
                acc.total_vat_ex += priced.total_vat_ex;
                acc.total_vat_inc += priced.total_vat_inc;
            }
            Ok(())
        },
    )?;

    let mut summary = UsageSummary {
        pricing: Some(*ctx),
        ..UsageSummary::default()
    };
    for part in partials {
        summary.total_records += part.total_records;
        summary.total_pricing += part.total_pricing;
        summary.total_billing += part.total_billing;
        summary.total_pre_tax_with_forex += part.total_pre_tax_with_forex;
        summary.total_vat_ex += part.total_vat_ex;
        summary.total_vat_inc += part.total_vat_inc;
    }
    Ok(summary)
}

/// 按客户汇总账单合计, 降序, 合计相同按客户名升序
pub fn top_customers(
    store: &StoreReader,
    predicate: &FilterPredicate,
    n: usize,
) -> Result<Vec<CustomerTotal>, BillingError> {
    let columns = [CanonicalField::CustomerName, CanonicalField::BillingPreTaxTotal];
    let partials = store.fold_partitions(
        predicate,
        &columns,
        IndexMap::<String, f64>::new,
        |acc: &mut IndexMap<String, f64>, batch: &RecordBatch| {
            let names = text_column(batch, CanonicalField::CustomerName)?;
            let billing = number_column(batch, CanonicalField::BillingPreTaxTotal)?;
            for (name, amount) in names.iter().zip(billing.values().iter()) {
                *acc.entry(name.unwrap_or_default().to_string()).or_insert(0.0) += *amount;
            }
            Ok(())
        },
    )?;

    let mut totals: IndexMap<String, f64> = IndexMap::new();
    for part in partials {
        for (name, amount) in part {
            *totals.entry(name).or_insert(0.0) += amount;
        }
    }

    let mut ranked: Vec<CustomerTotal> = totals
        .into_iter()
        .map(|(customer_name, total_billing)| CustomerTotal {
            customer_name,
            total_billing,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.total_billing
            .total_cmp(&a.total_billing)
            .then_with(|| a.customer_name.cmp(&b.customer_name))
    });
    ranked.truncate(n);
    Ok(ranked)
}

/// 去重后的发票号 (升序), 忽略空白发票号
pub fn list_invoice_numbers(
    store: &StoreReader,
    predicate: &FilterPredicate,
    limit: usize,
) -> Result<Vec<String>, BillingError> {
    let partials = store.fold_partitions(
        predicate,
        &[CanonicalField::InvoiceNumber],
        BTreeSet::<String>::new,
        |acc: &mut BTreeSet<String>, batch: &RecordBatch| {
            let column = text_column(batch, CanonicalField::InvoiceNumber)?;
            for row in 0..column.len() {
                if column.is_null(row) {
                    continue;
                }
                let value = column.value(row).trim();
                if !value.is_empty() && !acc.contains(value) {
                    acc.insert(value.to_string());
                }
            }
            Ok(())
        },
    )?;

    let merged: BTreeSet<String> = partials.into_iter().flatten().collect();
    Ok(merged.into_iter().take(limit).collect())
}
