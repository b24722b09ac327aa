use serde::{Deserialize, Serialize};
use std::fmt;

/// 规范化账单字段 (列式存储中的列名与变体名一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalField {
    CustomerName,
    CustomerDomainName,
    EntitlementDescription,
    EntitlementId,
    Tags,
    InvoiceNumber,
    ProductName,
    MeterCategory,
    MeterSubCategory,
    MeterName,
    MeterType,
    ChargeType,
    Unit,
    UsageDate,
    Quantity,
    UnitPrice,
    PricingPreTaxTotal,
    BillingPreTaxTotal,
}

/// 字段的存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    Number,
}

impl CanonicalField {
    /// 存储列顺序
    pub const ALL: [CanonicalField; 18] = [
        CanonicalField::CustomerName,
        CanonicalField::CustomerDomainName,
        CanonicalField::EntitlementDescription,
        CanonicalField::EntitlementId,
        CanonicalField::Tags,
        CanonicalField::InvoiceNumber,
        CanonicalField::ProductName,
        CanonicalField::MeterCategory,
        CanonicalField::MeterSubCategory,
        CanonicalField::MeterName,
        CanonicalField::MeterType,
        CanonicalField::ChargeType,
        CanonicalField::Unit,
        CanonicalField::UsageDate,
        CanonicalField::Quantity,
        CanonicalField::UnitPrice,
        CanonicalField::PricingPreTaxTotal,
        CanonicalField::BillingPreTaxTotal,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            CanonicalField::CustomerName => "CustomerName",
            CanonicalField::CustomerDomainName => "CustomerDomainName",
            CanonicalField::EntitlementDescription => "EntitlementDescription",
            CanonicalField::EntitlementId => "EntitlementId",
            CanonicalField::Tags => "Tags",
            CanonicalField::InvoiceNumber => "InvoiceNumber",
            CanonicalField::ProductName => "ProductName",
            CanonicalField::MeterCategory => "MeterCategory",
            CanonicalField::MeterSubCategory => "MeterSubCategory",
            CanonicalField::MeterName => "MeterName",
            CanonicalField::MeterType => "MeterType",
            CanonicalField::ChargeType => "ChargeType",
            CanonicalField::Unit => "Unit",
            CanonicalField::UsageDate => "UsageDate",
            CanonicalField::Quantity => "Quantity",
            CanonicalField::UnitPrice => "UnitPrice",
            CanonicalField::PricingPreTaxTotal => "PricingPreTaxTotal",
            CanonicalField::BillingPreTaxTotal => "BillingPreTaxTotal",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            CanonicalField::UsageDate => FieldKind::Date,
            CanonicalField::Quantity
            | CanonicalField::UnitPrice
            | CanonicalField::PricingPreTaxTotal
            | CanonicalField::BillingPreTaxTotal => FieldKind::Number,
            _ => FieldKind::Text,
        }
    }

    /// 按列名查找 (大小写不敏感)
    pub fn from_column_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.column_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_resolve_back() {
        for field in CanonicalField::ALL {
            assert_eq!(CanonicalField::from_column_name(field.column_name()), Some(field));
        }
        assert_eq!(
            CanonicalField::from_column_name(" customername "),
            Some(CanonicalField::CustomerName)
        );
        assert_eq!(CanonicalField::from_column_name("PartnerId"), None);
    }
}
