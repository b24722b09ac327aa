use crate::models::{ComputedRecord, PricingContext};
use chrono::NaiveDate;
use serde::Serialize;

/// 分页查询结果
#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
    pub records: Vec<ComputedRecord>,
    /// 整个过滤结果集的行数, 与当前页无关
    pub total_matching: usize,
    pub page: usize,
    pub page_size: usize,
}

/// 过滤结果集上的汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub total_records: u64,
    pub total_pricing: f64,
    pub total_billing: f64,
    pub total_pre_tax_with_forex: f64,
    pub total_vat_ex: f64,
    pub total_vat_inc: f64,
    pub pricing: Option<PricingContext>,
}

/// 客户账单合计 (top-N)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerTotal {
    pub customer_name: String,
    pub total_billing: f64,
}

/// 发票明细行 (按计量项分组)
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceLine {
    pub meter_category: String,
    pub meter_sub_category: String,
    pub meter_name: String,
    pub meter_type: String,
    pub unit: String,
    pub entitlement_description: String,
    pub entitlement_id: String,
    pub tags: String,
    pub record_count: u64,
    pub quantity: f64,
    /// 加权单价 = 定价合计 / 数量
    pub unit_price: f64,
    pub pricing_pretax_total: f64,
    pub billing_pretax_total: f64,
    pub pre_tax_with_forex: f64,
    pub total_vat_ex: f64,
    pub total_vat_inc: f64,
}

/// 发票合计, `*_raw` 为两位小数的精确十进制字符串
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceTotals {
    pub record_count: u64,
    pub quantity: f64,
    pub unit_price: f64,
    pub pricing_pretax_total: f64,
    pub billing_pretax_total: f64,
    pub pre_tax_with_forex: f64,
    pub total_vat_ex: f64,
    pub vat_amount: f64,
    pub total_vat_inc: f64,
    pub pricing_pretax_total_raw: String,
    pub billing_pretax_total_raw: String,
    pub total_vat_ex_raw: String,
    pub vat_amount_raw: String,
    pub total_vat_inc_raw: String,
}

/// 单个客户/域名的发票文档
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDocument {
    pub upload_id: i64,
    pub customer_name: String,
    pub customer_domain_name: String,
    pub invoice_number: Option<String>,
    pub pricing: PricingContext,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub lines: Vec<InvoiceLine>,
    pub totals: InvoiceTotals,
}
