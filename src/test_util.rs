//! 单元测试共用的构造函数

use crate::models::UsageRecord;
use crate::store::{StoreReader, StoreWriter};
use chrono::NaiveDate;
use std::path::Path;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

pub fn record(customer: &str, domain: &str, pricing: f64, billing: f64) -> UsageRecord {
    UsageRecord {
        customer_name: customer.to_string(),
        customer_domain_name: domain.to_string(),
        entitlement_description: String::new(),
        entitlement_id: String::new(),
        tags: String::new(),
        invoice_number: String::new(),
        product_name: String::new(),
        meter_category: String::new(),
        meter_sub_category: String::new(),
        meter_name: String::new(),
        meter_type: String::new(),
        charge_type: String::new(),
        unit: String::new(),
        usage_date: date(2024, 1, 15),
        quantity: 1.0,
        unit_price: pricing,
        pricing_pre_tax_total: pricing,
        billing_pre_tax_total: billing,
    }
}

/// 把记录按给定 row group 大小写成一个可读的 store
pub fn write_store(dir: &Path, records: &[UsageRecord], row_group_size: usize) -> StoreReader {
    let path = dir.join("upload_1.parquet");
    let mut writer = StoreWriter::create(&path, row_group_size).expect("create store");
    for chunk in records.chunks(row_group_size.max(1)) {
        writer.write_batch(chunk).expect("write batch");
    }
    writer.finish().expect("finish store");
    StoreReader::open(&path).expect("open store")
}

/// 一组覆盖多客户、多发票、负数贷项的样例记录
pub fn sample_records() -> Vec<UsageRecord> {
    let mut rows = Vec::new();
    let specs = [
        ("Acme", "acme.example", "INV-1", "Virtual Machines", "D2 v3", 100.0, 120.0, 1),
        ("Globex", "globex.example", "INV-2", "Storage", "Hot LRS", 50.0, 60.0, 2),
        ("Acme", "acme.example", "INV-1", "Storage", "Hot LRS", 25.5, 30.0, 3),
        ("Initech", "initech.example", "INV-3", "Virtual Machines", "D4 v3", 300.0, 310.0, 4),
        ("Acme", "acme.example", "INV-4", "Virtual Machines", "D2 v3", -10.0, -12.0, 5),
        ("Globex", "globex.example", "INV-2", "Bandwidth", "Egress", 7.25, 8.0, 6),
        ("acme", "acme.example", "INV-1", "Virtual Machines", "D2 v3", 40.0, 44.0, 7),
    ];
    for (customer, domain, invoice, category, meter, pricing, billing, day) in specs {
        let mut rec = record(customer, domain, pricing, billing);
        rec.invoice_number = invoice.to_string();
        rec.meter_category = category.to_string();
        rec.meter_name = meter.to_string();
        rec.product_name = format!("{} Product", category);
        rec.usage_date = date(2024, 1, day);
        rec.quantity = day as f64;
        rows.push(rec);
    }
    rows
}
