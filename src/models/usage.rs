use crate::models::CanonicalField;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 规范化后的用量记录 (存储行, 写入后不可变)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UsageRecord {
    pub customer_name: String,
    pub customer_domain_name: String,
    pub entitlement_description: String,
    pub entitlement_id: String,
    pub tags: String,
    pub invoice_number: String,
    pub product_name: String,
    pub meter_category: String,
    pub meter_sub_category: String,
    pub meter_name: String,
    pub meter_type: String,
    pub charge_type: String,
    pub unit: String,
    pub usage_date: NaiveDate,
    pub quantity: f64,
    pub unit_price: f64,
    /// 可能为负 (贷项), 不做截断
    pub pricing_pre_tax_total: f64,
    pub billing_pre_tax_total: f64,
}

impl UsageRecord {
    /// 文本字段取值, 非文本字段返回 None
    pub fn text(&self, field: CanonicalField) -> Option<&str> {
        let value = match field {
            CanonicalField::CustomerName => &self.customer_name,
            CanonicalField::CustomerDomainName => &self.customer_domain_name,
            CanonicalField::EntitlementDescription => &self.entitlement_description,
            CanonicalField::EntitlementId => &self.entitlement_id,
            CanonicalField::Tags => &self.tags,
            CanonicalField::InvoiceNumber => &self.invoice_number,
            CanonicalField::ProductName => &self.product_name,
            CanonicalField::MeterCategory => &self.meter_category,
            CanonicalField::MeterSubCategory => &self.meter_sub_category,
            CanonicalField::MeterName => &self.meter_name,
            CanonicalField::MeterType => &self.meter_type,
            CanonicalField::ChargeType => &self.charge_type,
            CanonicalField::Unit => &self.unit,
            CanonicalField::UsageDate
            | CanonicalField::Quantity
            | CanonicalField::UnitPrice
            | CanonicalField::PricingPreTaxTotal
            | CanonicalField::BillingPreTaxTotal => return None,
        };
        Some(value.as_str())
    }

    pub fn text_mut(&mut self, field: CanonicalField) -> Option<&mut String> {
        let value = match field {
            CanonicalField::CustomerName => &mut self.customer_name,
            CanonicalField::CustomerDomainName => &mut self.customer_domain_name,
            CanonicalField::EntitlementDescription => &mut self.entitlement_description,
            CanonicalField::EntitlementId => &mut self.entitlement_id,
            CanonicalField::Tags => &mut self.tags,
            CanonicalField::InvoiceNumber => &mut self.invoice_number,
            CanonicalField::ProductName => &mut self.product_name,
            CanonicalField::MeterCategory => &mut self.meter_category,
            CanonicalField::MeterSubCategory => &mut self.meter_sub_category,
            CanonicalField::MeterName => &mut self.meter_name,
            CanonicalField::MeterType => &mut self.meter_type,
            CanonicalField::ChargeType => &mut self.charge_type,
            CanonicalField::Unit => &mut self.unit,
            _ => return None,
        };
        Some(value)
    }

    /// 数值字段取值
    pub fn number(&self, field: CanonicalField) -> Option<f64> {
        match field {
            CanonicalField::Quantity => Some(self.quantity),
            CanonicalField::UnitPrice => Some(self.unit_price),
            CanonicalField::PricingPreTaxTotal => Some(self.pricing_pre_tax_total),
            CanonicalField::BillingPreTaxTotal => Some(self.billing_pre_tax_total),
            _ => None,
        }
    }

    pub fn number_mut(&mut self, field: CanonicalField) -> Option<&mut f64> {
        match field {
            CanonicalField::Quantity => Some(&mut self.quantity),
            CanonicalField::UnitPrice => Some(&mut self.unit_price),
            CanonicalField::PricingPreTaxTotal => Some(&mut self.pricing_pre_tax_total),
            CanonicalField::BillingPreTaxTotal => Some(&mut self.billing_pre_tax_total),
            _ => None,
        }
    }
}

/// 带动态计算列的记录, 每次请求重新计算, 从不落盘
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedRecord {
    #[serde(flatten)]
    pub base: UsageRecord,
    #[serde(rename = "PreTaxWithForex")]
    pub pre_tax_with_forex: f64,
    #[serde(rename = "TotalVATEx")]
    pub total_vat_ex: f64,
    #[serde(rename = "TotalVATInc")]
    pub total_vat_inc: f64,
}
