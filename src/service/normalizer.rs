use crate::error::SchemaError;
use crate::models::CanonicalField;
use std::collections::HashMap;

/// 每个规范字段可接受的表头写法 (已小写), 按优先级排列
fn synonyms(field: CanonicalField) -> &'static [&'static str] {
    match field {
        CanonicalField::CustomerName => &["customername", "customer name", "customer_name", "customer"],
        CanonicalField::CustomerDomainName => &[
            "customerdomainname",
            "customer domain name",
            "customer_domain_name",
            "customerdomain",
            "domain",
        ],
        CanonicalField::EntitlementDescription => &[
            "entitlementdescription",
            "entitlement description",
            "subscriptiondescription",
            "subscription description",
        ],
        CanonicalField::EntitlementId => &[
            "entitlementid",
            "entitlement id",
            "subscriptionid",
            "subscription id",
        ],
        CanonicalField::Tags => &["tags", "tag"],
        CanonicalField::InvoiceNumber => &["invoicenumber", "invoice number", "invoice_number", "invoice"],
        CanonicalField::ProductName => &["productname", "product name", "product_name", "product"],
        CanonicalField::MeterCategory => &["metercategory", "meter category", "meter_category"],
        CanonicalField::MeterSubCategory => &[
            "metersubcategory",
            "meter subcategory",
            "meter sub category",
            "meter_sub_category",
        ],
        CanonicalField::MeterName => &["metername", "meter name", "meter_name"],
        CanonicalField::MeterType => &["metertype", "meter type", "meter_type"],
        CanonicalField::ChargeType => &["chargetype", "charge type", "charge_type"],
        CanonicalField::Unit => &["unit", "unitofmeasure", "unit of measure"],
        CanonicalField::UsageDate => &["usagedate", "usage date", "usage_date", "date"],
        CanonicalField::Quantity => &["quantity", "qty", "billablequantity"],
        CanonicalField::UnitPrice => &["unitprice", "unit price", "unit_price", "effectiveunitprice"],
        CanonicalField::PricingPreTaxTotal => &[
            "pricingpretaxtotal",
            "pricing pretax total",
            "pricing pre tax total",
            "pricing_pretax_total",
        ],
        CanonicalField::BillingPreTaxTotal => &[
            "billingpretaxtotal",
            "billing pretax total",
            "billing pre tax total",
            "billing_pretax_total",
        ],
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// 规范字段 -> 源文件列下标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMapping {
    columns: HashMap<CanonicalField, usize>,
}

impl HeaderMapping {
    /// 根据表头构建映射, 缺少必需列时返回 `SchemaError`; 未识别的列忽略
    pub fn from_headers<I, S>(headers: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // 同名表头只取第一次出现
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (idx, raw) in headers.into_iter().enumerate() {
            positions.entry(normalize_header(raw.as_ref())).or_insert(idx);
        }
        if positions.is_empty() || positions.keys().all(|k| k.is_empty()) {
            return Err(SchemaError::EmptyHeader);
        }

        let mut columns = HashMap::new();
        for field in CanonicalField::ALL {
            let found = synonyms(field)
                .iter()
                .find_map(|name| positions.get(*name).copied());
            if let Some(idx) = found {
                columns.insert(field, idx);
            }
        }

        for required in [CanonicalField::CustomerName, CanonicalField::UsageDate] {
            if !columns.contains_key(&required) {
                return Err(SchemaError::MissingColumn(required.column_name()));
            }
        }
        if !columns.contains_key(&CanonicalField::PricingPreTaxTotal)
            && !columns.contains_key(&CanonicalField::BillingPreTaxTotal)
        {
            return Err(SchemaError::MissingTotals);
        }

        Ok(Self { columns })
    }

    pub fn index_of(&self, field: CanonicalField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn contains(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_canonical_headers_ignoring_extras() {
        let headers = [
            "PartnerId",
            "CustomerName",
            "CustomerDomainName",
            "UsageDate",
            "PricingPreTaxTotal",
            "BillingPreTaxTotal",
            "ResourceURI",
        ];
        let mapping = HeaderMapping::from_headers(headers).unwrap();
        assert_eq!(mapping.index_of(CanonicalField::CustomerName), Some(1));
        assert_eq!(mapping.index_of(CanonicalField::BillingPreTaxTotal), Some(5));
        assert_eq!(mapping.index_of(CanonicalField::MeterName), None);
        assert_eq!(mapping.len(), 5);
    }

    #[test]
    fn matching_is_case_insensitive_trimmed_and_bom_tolerant() {
        let headers = ["\u{feff}Customer Name ", "  USAGE DATE", "billing pretax total", "Subscription Id"];
        let mapping = HeaderMapping::from_headers(headers).unwrap();
        assert_eq!(mapping.index_of(CanonicalField::CustomerName), Some(0));
        assert_eq!(mapping.index_of(CanonicalField::UsageDate), Some(1));
        assert_eq!(mapping.index_of(CanonicalField::BillingPreTaxTotal), Some(2));
        assert_eq!(mapping.index_of(CanonicalField::EntitlementId), Some(3));
        assert!(!mapping.contains(CanonicalField::PricingPreTaxTotal));
    }

    #[test]
    fn preferred_synonym_wins_over_fallback() {
        let headers = ["Customer", "CustomerName", "UsageDate", "PricingPreTaxTotal"];
        let mapping = HeaderMapping::from_headers(headers).unwrap();
        assert_eq!(mapping.index_of(CanonicalField::CustomerName), Some(1));
    }

    #[test]
    fn missing_required_columns_fail() {
        assert_eq!(
            HeaderMapping::from_headers(["UsageDate", "PricingPreTaxTotal"]),
            Err(SchemaError::MissingColumn("CustomerName"))
        );
        assert_eq!(
            HeaderMapping::from_headers(["CustomerName", "PricingPreTaxTotal"]),
            Err(SchemaError::MissingColumn("UsageDate"))
        );
        assert_eq!(
            HeaderMapping::from_headers(["CustomerName", "UsageDate", "Quantity"]),
            Err(SchemaError::MissingTotals)
        );
        assert_eq!(
            HeaderMapping::from_headers(Vec::<String>::new()),
            Err(SchemaError::EmptyHeader)
        );
    }
}
