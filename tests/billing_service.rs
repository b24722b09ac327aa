use csp_billing_rust::config::AppConfig;
use csp_billing_rust::models::{
    CanonicalField, FilterPredicate, RecordWindow, SortOrder, UploadStatus,
};
use csp_billing_rust::db::try_claim_for_processing;
use csp_billing_rust::service::InvoiceRequest;
use csp_billing_rust::store::writer::partial_path;
use csp_billing_rust::{create_pool, BillingError, BillingService};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const HEADER: &str = "CustomerName,CustomerDomainName,InvoiceNumber,ProductName,MeterCategory,\
MeterName,UsageDate,Quantity,UnitPrice,PricingPreTaxTotal,BillingPreTaxTotal";

fn test_config(tmp: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = format!("sqlite://{}", tmp.path().join("meta.db").display());
    config.storage.processed_dir = tmp.path().join("warehouse");
    config.storage.batch_size = 2;
    config.storage.row_group_size = 2;
    config
}

async fn service(tmp: &TempDir) -> BillingService {
    service_with(test_config(tmp)).await
}

async fn service_with(config: AppConfig) -> BillingService {
    let pool = create_pool(&config.database).await.unwrap();
    BillingService::open(pool, config).await.unwrap()
}

/// 每批一行, 取消标记逐行可见
fn slow_config(tmp: &TempDir) -> AppConfig {
    let mut config = test_config(tmp);
    config.storage.batch_size = 1;
    config.storage.row_group_size = 1024;
    config
}

fn write_large_csv(tmp: &TempDir, name: &str, rows: usize) -> PathBuf {
    let mut body = String::from(HEADER);
    body.push('\n');
    for i in 0..rows {
        body.push_str(&format!(
            "Cust{},cust{}.example,INV-{},VM Product,Virtual Machines,D2 v3,2024-01-01,1,10,10,12\n",
            i % 50,
            i % 50,
            i % 7
        ));
    }
    let path = tmp.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// 等待导入离开 processing
async fn wait_until_settled(service: &BillingService, id: i64) -> UploadStatus {
    for _ in 0..3000 {
        let status = service.get_upload(id).await.unwrap().status;
        if status != UploadStatus::Processing {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("upload {} still processing", id);
}

fn assert_no_store(path: &Path) {
    assert!(!path.exists(), "store left behind: {}", path.display());
    assert!(!partial_path(path).exists(), "partial store left behind");
}

fn write_csv(tmp: &TempDir, name: &str, rows: &[&str]) -> PathBuf {
    let mut body = String::from(HEADER);
    body.push('\n');
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    let path = tmp.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn usage_rows() -> Vec<&'static str> {
    vec![
        "Acme,acme.example,INV-1,VM Product,Virtual Machines,D2 v3,2024-01-01,10,10,100,120",
        "Globex,globex.example,INV-2,Storage Product,Storage,Hot LRS,2024-01-02,5,10,50,60",
        "Acme,acme.example,INV-1,Storage Product,Storage,Hot LRS,2024-01-03,1,25.5,25.5,30",
        "Initech,initech.example,INV-3,VM Product,Virtual Machines,D4 v3,2024-01-04,3,100,300,300",
        "Acme,acme.example,INV-4,VM Product,Virtual Machines,D2 v3,2024-01-05,-1,10,-10,-12",
    ]
}

#[tokio::test]
async fn three_row_file_with_missing_customer_is_ready() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp).await;
    let source = write_csv(
        &tmp,
        "three.csv",
        &[
            "Acme,acme.example,INV-1,VM Product,Virtual Machines,D2 v3,2024-01-01,1,10,10,12",
            ",nobody.example,INV-9,VM Product,Virtual Machines,D2 v3,2024-01-02,1,5,5,6",
            "Globex,globex.example,INV-2,VM Product,Virtual Machines,D2 v3,2024-01-03,1,20,20,22",
        ],
    );

    let upload = service.register_upload("three.csv").await.unwrap();
    let status = service.ingest(upload.id, &source).await.unwrap();
    assert_eq!(status, UploadStatus::Ready);

    let upload = service.get_upload(upload.id).await.unwrap();
    assert_eq!(upload.status, UploadStatus::Ready);
    assert_eq!(upload.row_count, 2);
    assert_eq!(upload.malformed_count, 1);
    assert!(upload.completed_at.is_some());
}

#[tokio::test]
async fn reingesting_identical_file_gives_identical_results() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp).await;
    let source = write_csv(&tmp, "usage.csv", &usage_rows());

    let first = service.register_upload("usage.csv").await.unwrap();
    let second = service.register_upload("usage.csv").await.unwrap();
    service.ingest(first.id, &source).await.unwrap();
    service.ingest(second.id, &source).await.unwrap();

    let a = service.get_upload(first.id).await.unwrap();
    let b = service.get_upload(second.id).await.unwrap();
    assert_eq!(a.row_count, b.row_count);
    assert_eq!(a.malformed_count, b.malformed_count);
    assert_eq!(a.billing_pretax_total, b.billing_pretax_total);

    let ctx = service.pricing_context(Some(1.1), Some(1.05), None).unwrap();
    let sa = service.summary(first.id, FilterPredicate::new(), ctx).await.unwrap();
    let sb = service.summary(second.id, FilterPredicate::new(), ctx).await.unwrap();
    assert_eq!(sa, sb);
    assert_eq!(sa.total_records, 5);
}

#[tokio::test]
async fn ready_upload_rejects_second_ingest_and_failed_upload_can_retry() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp).await;
    let good = write_csv(&tmp, "good.csv", &usage_rows());
    let bad = tmp.path().join("bad.csv");
    std::fs::write(&bad, "Foo,Bar\n1,2\n").unwrap();

    let upload = service.register_upload("usage.csv").await.unwrap();
    let status = service.ingest(upload.id, &bad).await.unwrap();
    assert_eq!(status, UploadStatus::Failed);
    let failed = service.get_upload(upload.id).await.unwrap();
    assert!(failed.error_message.unwrap().contains("CustomerName"));

    // 不可读查询
    let err = service
        .summary(upload.id, FilterPredicate::new(), Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::UploadNotReady { status: UploadStatus::Failed, .. }));

    assert_eq!(service.ingest(upload.id, &good).await.unwrap(), UploadStatus::Ready);
    let err = service.ingest(upload.id, &good).await.unwrap_err();
    assert!(matches!(err, BillingError::UploadAlreadyReady(_)));

    let err = service.ingest(9999, &good).await.unwrap_err();
    assert!(matches!(err, BillingError::UploadNotFound(9999)));
}

#[tokio::test]
async fn processing_upload_rejects_ingest_and_delete() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp).await;
    let source = write_csv(&tmp, "usage.csv", &usage_rows());
    let upload = service.register_upload("usage.csv").await.unwrap();

    // 另一个导入已抢占
    assert!(try_claim_for_processing(service.pool(), upload.id).await.unwrap());

    let err = service.ingest(upload.id, &source).await.unwrap_err();
    assert!(matches!(err, BillingError::UploadBusy(_)));
    let err = service.start_ingest(upload.id, source.clone()).await.unwrap_err();
    assert!(matches!(err, BillingError::UploadBusy(_)));
    let err = service.delete_upload(upload.id).await.unwrap_err();
    assert!(matches!(err, BillingError::UploadBusy(_)));
    assert_eq!(
        service.get_upload(upload.id).await.unwrap().status,
        UploadStatus::Processing
    );
}

#[tokio::test]
async fn reopening_fails_interrupted_uploads_and_allows_retry() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp).await;
    let source = write_csv(&tmp, "usage.csv", &usage_rows());
    let upload = service.register_upload("usage.csv").await.unwrap();
    assert!(try_claim_for_processing(service.pool(), upload.id).await.unwrap());

    // 进程退出时留下的半成品
    let store = service.config().store_path(upload.id);
    std::fs::create_dir_all(store.parent().unwrap()).unwrap();
    std::fs::write(partial_path(&store), b"half written").unwrap();

    let reopened = BillingService::open(service.pool().clone(), service.config().clone())
        .await
        .unwrap();
    let failed = reopened.get_upload(upload.id).await.unwrap();
    assert_eq!(failed.status, UploadStatus::Failed);
    assert!(failed.error_message.unwrap().contains("interrupted"));
    assert_no_store(&store);

    assert_eq!(
        reopened.ingest(upload.id, &source).await.unwrap(),
        UploadStatus::Ready
    );
}

#[tokio::test]
async fn cancelled_background_ingest_fails_without_store() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(slow_config(&tmp)).await;
    let source = write_large_csv(&tmp, "large.csv", 20_000);
    let upload = service.register_upload("large.csv").await.unwrap();

    service.start_ingest(upload.id, source).await.unwrap();
    assert!(service.cancel_ingest(upload.id));

    assert_eq!(wait_until_settled(&service, upload.id).await, UploadStatus::Failed);
    let failed = service.get_upload(upload.id).await.unwrap();
    assert!(failed.error_message.unwrap().contains("cancelled"));
    assert_no_store(&service.config().store_path(upload.id));
    assert!(!service.cancel_ingest(upload.id));
}

#[tokio::test]
async fn unwritable_store_directory_fails_upload() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let mut config = test_config(&tmp);
    config.storage.processed_dir = blocker.join("warehouse");
    let service = service_with(config).await;
    let source = write_csv(&tmp, "usage.csv", &usage_rows());
    let upload = service.register_upload("usage.csv").await.unwrap();

    let status = service.ingest(upload.id, &source).await.unwrap();
    assert_eq!(status, UploadStatus::Failed);
    let failed = service.get_upload(upload.id).await.unwrap();
    assert!(failed.error_message.unwrap().contains("store io error"));
    assert_eq!(failed.row_count, 0);
    assert_no_store(&service.config().store_path(upload.id));
}

#[tokio::test]
async fn abandoned_ingest_call_still_records_final_status() {
    let tmp = TempDir::new().unwrap();
    let service = service_with(slow_config(&tmp)).await;
    let source = write_large_csv(&tmp, "large.csv", 20_000);
    let upload = service.register_upload("large.csv").await.unwrap();

    // 调用方放弃等待, 导入任务继续运行并写回状态
    let abandoned =
        tokio::time::timeout(Duration::from_millis(1), service.ingest(upload.id, &source)).await;
    if let Ok(result) = abandoned {
        assert_eq!(result.unwrap(), UploadStatus::Ready);
    }

    assert_eq!(wait_until_settled(&service, upload.id).await, UploadStatus::Ready);
    let ready = service.get_upload(upload.id).await.unwrap();
    assert_eq!(ready.row_count, 20_000);
    assert!(service.config().store_path(upload.id).exists());
}

#[tokio::test]
async fn queries_summary_and_invoice_agree_on_filtered_view() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp).await;
    let source = write_csv(&tmp, "usage.csv", &usage_rows());
    let upload = service.register_upload("usage.csv").await.unwrap();
    service.ingest(upload.id, &source).await.unwrap();

    let ctx = service.pricing_context(None, None, None).unwrap();
    let acme = FilterPredicate::new()
        .try_equals(CanonicalField::CustomerName, "ACME")
        .unwrap();

    let page = service
        .query(
            upload.id,
            acme.clone(),
            RecordWindow::Page { page: 1, page_size: 2 },
            SortOrder::Ingestion,
            ctx,
        )
        .await
        .unwrap();
    assert_eq!(page.total_matching, 3);
    assert_eq!(page.records.len(), 2);

    let all = service
        .query(upload.id, acme.clone(), RecordWindow::All, SortOrder::Ingestion, ctx)
        .await
        .unwrap();
    let summary = service.summary(upload.id, acme.clone(), ctx).await.unwrap();
    let billing: f64 = all.records.iter().map(|r| r.base.billing_pre_tax_total).sum();
    assert!((summary.total_billing - billing).abs() < 1e-9);
    assert!((summary.total_billing - 138.0).abs() < 1e-9);

    let top = service
        .top_customers(upload.id, FilterPredicate::new(), 2)
        .await
        .unwrap();
    assert_eq!(top[0].customer_name, "Initech");
    assert_eq!(top[1].customer_name, "Acme");

    let invoices = service
        .list_invoice_numbers(upload.id, acme, None)
        .await
        .unwrap();
    assert_eq!(invoices, vec!["INV-1", "INV-4"]);

    let doc = service
        .assemble_invoice(
            upload.id,
            InvoiceRequest {
                customer: "Acme".to_string(),
                domain: "acme.example".to_string(),
                invoice_number: None,
                search: None,
            },
            ctx,
        )
        .await
        .unwrap();
    assert_eq!(doc.totals.record_count, 3);
    assert_eq!(doc.totals.billing_pretax_total_raw, "138.00");

    let err = service
        .assemble_invoice(
            upload.id,
            InvoiceRequest {
                customer: "Acme".to_string(),
                domain: "none.example".to_string(),
                invoice_number: None,
                search: None,
            },
            ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NoMatchingRecords { .. }));
}

#[tokio::test]
async fn delete_removes_store_and_record() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp).await;
    let source = write_csv(&tmp, "usage.csv", &usage_rows());
    let upload = service.register_upload("usage.csv").await.unwrap();
    service.ingest(upload.id, &source).await.unwrap();

    let store = service.config().store_path(upload.id);
    assert!(store.exists());
    service.delete_upload(upload.id).await.unwrap();
    assert!(!store.exists());
    assert!(matches!(
        service.get_upload(upload.id).await.unwrap_err(),
        BillingError::UploadNotFound(_)
    ));
    assert!(!service.cancel_ingest(upload.id));
}

#[tokio::test]
async fn invalid_pricing_context_is_rejected_up_front() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp).await;
    assert!(matches!(
        service.pricing_context(Some(0.0), None, None),
        Err(BillingError::InvalidPricingContext(_))
    ));
    assert!(matches!(
        service.pricing_context(None, Some(-1.0), None),
        Err(BillingError::InvalidPricingContext(_))
    ));
    assert_eq!(
        service.pricing_context(None, None, None).unwrap().vat(),
        1.12
    );
}
