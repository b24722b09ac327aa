use crate::models::{ComputedRecord, PricingContext, UsageRecord};

/// 单个定价合计推导出的金额
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PricedAmounts {
    pub pre_tax_with_forex: f64,
    pub total_vat_ex: f64,
    pub vat_amount: f64,
    pub total_vat_inc: f64,
}

/// 纯函数: 由定价合计和请求参数推导税前/税后金额
///
/// PreTaxWithForex = PricingPreTaxTotal × forex
/// TotalVATEx      = PreTaxWithForex × margin
/// TotalVATInc     = TotalVATEx × vat
pub fn price_amount(pricing_pre_tax_total: f64, ctx: &PricingContext) -> PricedAmounts {
    let pre_tax_with_forex = pricing_pre_tax_total * ctx.forex();
    let total_vat_ex = pre_tax_with_forex * ctx.margin();
    let vat_amount = total_vat_ex * (ctx.vat() - 1.0);
    PricedAmounts {
        pre_tax_with_forex,
        total_vat_ex,
        vat_amount,
        total_vat_inc: total_vat_ex * ctx.vat(),
    }
}

/// 为一条存储记录附加计算列; 不修改存储
pub fn price_record(base: UsageRecord, ctx: &PricingContext) -> ComputedRecord {
    let amounts = price_amount(base.pricing_pre_tax_total, ctx);
    ComputedRecord {
        base,
        pre_tax_with_forex: amounts.pre_tax_with_forex,
        total_vat_ex: amounts.total_vat_ex,
        total_vat_inc: amounts.total_vat_inc,
    }
}

pub fn price_records(records: Vec<UsageRecord>, ctx: &PricingContext) -> Vec<ComputedRecord> {
    records.into_iter().map(|r| price_record(r, ctx)).collect()
}
