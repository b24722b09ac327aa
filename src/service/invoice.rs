use crate::error::BillingError;
use crate::models::{
    CanonicalField, FilterPredicate, InvoiceDocument, InvoiceLine, InvoiceTotals, PricingContext,
    UsageRecord,
};
use crate::service::pricing::price_amount;
use crate::service::query::read_records;
use crate::store::StoreReader;
use bigdecimal::{BigDecimal, Zero};
use indexmap::IndexMap;
use std::str::FromStr;
use tracing::info;

/// 发票请求范围: 客户 + 域名必填, 发票号和搜索词可选
#[derive(Debug, Clone, Copy)]
pub struct InvoiceScope<'a> {
    pub customer: &'a str,
    pub domain: &'a str,
    pub invoice_number: Option<&'a str>,
    pub search: Option<&'a str>,
}

impl InvoiceScope<'_> {
    pub fn predicate(&self) -> Result<FilterPredicate, BillingError> {
        Ok(self
            .pair_predicate()?
            .try_equals_opt(CanonicalField::InvoiceNumber, self.invoice_number)?
            .with_search(self.search))
    }

    /// 只按客户 + 域名过滤
    pub fn pair_predicate(&self) -> Result<FilterPredicate, BillingError> {
        if self.customer.trim().is_empty() || self.domain.trim().is_empty() {
            return Err(BillingError::InvalidRequest(
                "invoice requires both customer and domain".to_string(),
            ));
        }
        Ok(FilterPredicate::new()
            .try_equals(CanonicalField::CustomerName, self.customer)?
            .try_equals(CanonicalField::CustomerDomainName, self.domain)?)
    }
}

/// 明细行分组键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct LineKey {
    meter_category: String,
    meter_sub_category: String,
    meter_name: String,
    meter_type: String,
    unit: String,
    entitlement_description: String,
    entitlement_id: String,
}

impl LineKey {
    fn of(record: &UsageRecord) -> Self {
        Self {
            meter_category: record.meter_category.clone(),
            meter_sub_category: record.meter_sub_category.clone(),
            meter_name: record.meter_name.clone(),
            meter_type: record.meter_type.clone(),
            unit: record.unit.clone(),
            entitlement_description: record.entitlement_description.clone(),
            entitlement_id: record.entitlement_id.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct LineAcc {
    record_count: u64,
    quantity: f64,
    pricing: f64,
    billing: f64,
    tags: Vec<String>,
}

impl LineAcc {
    fn add(&mut self, record: &UsageRecord) {
        self.record_count += 1;
        self.quantity += record.quantity;
        self.pricing += record.pricing_pre_tax_total;
        self.billing += record.billing_pre_tax_total;
        for tag in record.tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !self.tags.iter().any(|t| t == tag) {
                self.tags.push(tag.to_string());
            }
        }
    }

    fn into_line(self, key: LineKey, ctx: &PricingContext) -> InvoiceLine {
        let priced = price_amount(self.pricing, ctx);
        InvoiceLine {
            meter_category: key.meter_category,
            meter_sub_category: key.meter_sub_category,
            meter_name: key.meter_name,
            meter_type: key.meter_type,
            unit: key.unit,
            entitlement_description: key.entitlement_description,
            entitlement_id: key.entitlement_id,
            tags: self.tags.join(", "),
            record_count: self.record_count,
            quantity: self.quantity,
            unit_price: weighted_unit_price(self.pricing, self.quantity),
            pricing_pretax_total: self.pricing,
            billing_pretax_total: self.billing,
            pre_tax_with_forex: priced.pre_tax_with_forex,
            total_vat_ex: priced.total_vat_ex,
            total_vat_inc: priced.total_vat_inc,
        }
    }
}

fn weighted_unit_price(pricing: f64, quantity: f64) -> f64 {
    if quantity == 0.0 {
        0.0
    } else {
        pricing / quantity
    }
}

/// f64 的最短十进制表示转为精确小数
fn decimal(value: f64) -> BigDecimal {
    BigDecimal::from_str(&value.to_string()).unwrap_or_else(|_| BigDecimal::zero())
}

fn money(value: &BigDecimal) -> String {
    value.round(2).with_scale(2).to_string()
}

/// 十进制累加的发票合计
struct ExactTotals {
    pricing: BigDecimal,
    billing: BigDecimal,
    vat_ex: BigDecimal,
}

impl ExactTotals {
    fn new() -> Self {
        Self {
            pricing: BigDecimal::zero(),
            billing: BigDecimal::zero(),
            vat_ex: BigDecimal::zero(),
        }
    }

    fn add(&mut self, record: &UsageRecord, forex: &BigDecimal, margin: &BigDecimal) {
        let pricing = decimal(record.pricing_pre_tax_total);
        self.vat_ex += &pricing * forex * margin;
        self.pricing += pricing;
        self.billing += decimal(record.billing_pre_tax_total);
    }
}

/// 组装单个客户/域名的发票文档
///
/// 读取整个范围内的记录 (不受 "全部记录" 上限约束), 按计量项分组为明细行。
pub fn assemble_invoice(
    store: &StoreReader,
    upload_id: i64,
    scope: InvoiceScope<'_>,
    ctx: &PricingContext,
) -> Result<InvoiceDocument, BillingError> {
    let predicate = scope.predicate()?;
    let records = read_records(store.scan(&predicate, None, 0, None)?)?;
    // 客户存在但发票号/搜索词过滤后为空时返回空发票
    if records.is_empty() && store.count(&scope.pair_predicate()?)? == 0 {
        return Err(BillingError::NoMatchingRecords {
            customer: scope.customer.to_string(),
            domain: scope.domain.to_string(),
        });
    }

    let forex = decimal(ctx.forex());
    let margin = decimal(ctx.margin());
    let vat = decimal(ctx.vat());

    let mut groups: IndexMap<LineKey, LineAcc> = IndexMap::new();
    let mut exact = ExactTotals::new();
    let mut quantity = 0.0;
    let mut pricing_total = 0.0;
    let mut billing_total = 0.0;
    let mut period_start = None;
    let mut period_end = None;

    for record in &records {
        groups.entry(LineKey::of(record)).or_default().add(record);
        exact.add(record, &forex, &margin);
        quantity += record.quantity;
        pricing_total += record.pricing_pre_tax_total;
        billing_total += record.billing_pre_tax_total;
        period_start = Some(period_start.map_or(record.usage_date, |d| record.usage_date.min(d)));
        period_end = Some(period_end.map_or(record.usage_date, |d| record.usage_date.max(d)));
    }

    groups.sort_keys();
    let lines: Vec<InvoiceLine> = groups
        .into_iter()
        .map(|(key, acc)| acc.into_line(key, ctx))
        .collect();

    let priced = price_amount(pricing_total, ctx);
    let vat_amount_exact = &exact.vat_ex * (&vat - BigDecimal::from(1i64));
    let vat_inc_exact = &exact.vat_ex + &vat_amount_exact;
    let totals = InvoiceTotals {
        record_count: records.len() as u64,
        quantity,
        unit_price: weighted_unit_price(pricing_total, quantity),
        pricing_pretax_total: pricing_total,
        billing_pretax_total: billing_total,
        pre_tax_with_forex: priced.pre_tax_with_forex,
        total_vat_ex: priced.total_vat_ex,
        vat_amount: priced.vat_amount,
        total_vat_inc: priced.total_vat_inc,
        pricing_pretax_total_raw: money(&exact.pricing),
        billing_pretax_total_raw: money(&exact.billing),
        total_vat_ex_raw: money(&exact.vat_ex),
        vat_amount_raw: money(&vat_amount_exact),
        total_vat_inc_raw: money(&vat_inc_exact),
    };

    info!(
        "发票组装完成: upload={}, 客户={}, 明细行={}, 记录数={}",
        upload_id,
        scope.customer,
        lines.len(),
        records.len()
    );

    let (customer_name, customer_domain_name) = match records.first() {
        Some(first) => (
            first.customer_name.clone(),
            first.customer_domain_name.clone(),
        ),
        None => (scope.customer.trim().to_string(), scope.domain.trim().to_string()),
    };
    Ok(InvoiceDocument {
        upload_id,
        customer_name,
        customer_domain_name,
        invoice_number: scope.invoice_number.map(str::to_string),
        pricing: *ctx,
        period_start,
        period_end,
        lines,
        totals,
    })
}
