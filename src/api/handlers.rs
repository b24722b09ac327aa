use crate::error::{BillingError, StoreError};
use crate::models::{CanonicalField, FilterPredicate, RecordWindow, SortOrder};
use crate::service::{BillingService, InvoiceRequest};
use axum::{
    body::Body,
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// 统一响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

fn ok<T: Serialize>(status: StatusCode, message: impl Into<String>, data: T) -> Response {
    let body = ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
    };
    (status, Json(body)).into_response()
}

/// 错误 -> HTTP 状态码
pub fn status_of(err: &BillingError) -> StatusCode {
    match err {
        BillingError::Schema(_)
        | BillingError::InvalidPricingContext(_)
        | BillingError::InvalidRequest(_)
        | BillingError::EmptyUpload { .. }
        | BillingError::Source(_) => StatusCode::BAD_REQUEST,
        BillingError::UploadNotFound(_) | BillingError::NoMatchingRecords { .. } => {
            StatusCode::NOT_FOUND
        }
        BillingError::UploadBusy(_)
        | BillingError::UploadAlreadyReady(_)
        | BillingError::UploadNotReady { .. }
        | BillingError::Cancelled(_) => StatusCode::CONFLICT,
        BillingError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        BillingError::Store(_) | BillingError::Database(_) | BillingError::Task(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn fail(err: BillingError) -> Response {
    let status = status_of(&err);
    if status.is_server_error() {
        tracing::error!("请求失败: {}", err);
    }
    let body = ApiResponse::<()> {
        success: false,
        message: format!("Error: {}", err),
        data: None,
    };
    (status, Json(body)).into_response()
}

fn respond<T: Serialize>(result: Result<T, BillingError>, message: &str) -> Response {
    match result {
        Ok(data) => ok(StatusCode::OK, message, data),
        Err(e) => fail(e),
    }
}

/// 读接口共用的查询参数
#[derive(Debug, Default, Deserialize)]
pub struct BillingParams {
    pub customer: Option<String>,
    pub domain: Option<String>,
    pub invoice_number: Option<String>,
    pub product: Option<String>,
    pub charge_type: Option<String>,
    pub search: Option<String>,
    pub forex: Option<f64>,
    pub margin: Option<f64>,
    pub vat: Option<f64>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub all: Option<bool>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub n: Option<usize>,
    pub limit: Option<usize>,
}

impl BillingParams {
    pub fn predicate(&self) -> Result<FilterPredicate, BillingError> {
        Ok(FilterPredicate::new()
            .try_equals_opt(CanonicalField::CustomerName, self.customer.as_deref())?
            .try_equals_opt(CanonicalField::CustomerDomainName, self.domain.as_deref())?
            .try_equals_opt(CanonicalField::InvoiceNumber, self.invoice_number.as_deref())?
            .try_equals_opt(CanonicalField::ProductName, self.product.as_deref())?
            .try_equals_opt(CanonicalField::ChargeType, self.charge_type.as_deref())?
            .with_search(self.search.as_deref()))
    }

    pub fn window(&self) -> RecordWindow {
        if self.all.unwrap_or(false) {
            RecordWindow::All
        } else {
            RecordWindow::Page {
                page: self.page.unwrap_or(1),
                page_size: self.page_size.unwrap_or(100),
            }
        }
    }

    pub fn sort(&self) -> Result<SortOrder, BillingError> {
        let Some(name) = self.sort_by.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(SortOrder::Ingestion);
        };
        let field = CanonicalField::from_column_name(name)
            .ok_or_else(|| BillingError::InvalidRequest(format!("unknown sort column {:?}", name)))?;
        match self.sort_dir.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => Ok(SortOrder::Ascending(field)),
            Some("desc") => Ok(SortOrder::Descending(field)),
            Some(other) => Err(BillingError::InvalidRequest(format!(
                "sort_dir must be asc or desc, got {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub filename: Option<String>,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 请求体流式写入暂存文件
async fn save_body(body: Body, target: &FsPath) -> Result<u64, BillingError> {
    let io_err = |source: std::io::Error| {
        BillingError::Store(StoreError::Io {
            path: target.to_path_buf(),
            source,
        })
    };
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = tokio::fs::File::create(target).await.map_err(io_err)?;
    let mut written = 0u64;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BillingError::InvalidRequest(format!("upload interrupted: {}", e)))?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    Ok(written)
}

/// 上传 CSV 并在后台导入, 立即返回 202
pub async fn create_upload(
    State(service): State<Arc<BillingService>>,
    Query(params): Query<UploadParams>,
    body: Body,
) -> Response {
    let filename = params.filename.unwrap_or_else(|| "upload.csv".to_string());
    let upload = match service.register_upload(&filename).await {
        Ok(upload) => upload,
        Err(e) => return fail(e),
    };
    let source = service.config().source_path(upload.id);
    let result = async {
        let bytes = save_body(body, &source).await?;
        tracing::info!("上传 {} 已接收 {} 字节", upload.id, bytes);
        service.start_ingest(upload.id, source.clone()).await
    }
    .await;

    match result {
        Ok(()) => ok(
            StatusCode::ACCEPTED,
            format!("Upload {} accepted, ingestion started", upload.id),
            upload,
        ),
        Err(e) => fail(e),
    }
}

pub async fn list_uploads(State(service): State<Arc<BillingService>>) -> Response {
    respond(service.list_uploads().await, "OK")
}

pub async fn get_upload(
    State(service): State<Arc<BillingService>>,
    Path(id): Path<i64>,
) -> Response {
    respond(service.get_upload(id).await, "OK")
}

pub async fn delete_upload(
    State(service): State<Arc<BillingService>>,
    Path(id): Path<i64>,
) -> Response {
    respond(
        service.delete_upload(id).await.map(|_| id),
        &format!("Upload {} deleted", id),
    )
}

/// 重新导入 (failed 状态重试), 使用已暂存的源文件
pub async fn retry_ingest(
    State(service): State<Arc<BillingService>>,
    Path(id): Path<i64>,
) -> Response {
    let source = service.config().source_path(id);
    if !source.exists() {
        return fail(BillingError::InvalidRequest(format!(
            "source file for upload {} is no longer available",
            id
        )));
    }
    match service.start_ingest(id, source).await {
        Ok(()) => ok(StatusCode::ACCEPTED, format!("Upload {} ingestion started", id), id),
        Err(e) => fail(e),
    }
}

pub async fn cancel_ingest(
    State(service): State<Arc<BillingService>>,
    Path(id): Path<i64>,
) -> Response {
    if service.cancel_ingest(id) {
        ok(StatusCode::OK, format!("Cancellation requested for upload {}", id), id)
    } else {
        fail(BillingError::InvalidRequest(format!(
            "upload {} has no ingestion in progress",
            id
        )))
    }
}

/// 分页/全部记录
pub async fn query_records(
    State(service): State<Arc<BillingService>>,
    Path(id): Path<i64>,
    Query(params): Query<BillingParams>,
) -> Response {
    let result = async {
        let predicate = params.predicate()?;
        let sort = params.sort()?;
        let ctx = service.pricing_context(params.forex, params.margin, params.vat)?;
        service.query(id, predicate, params.window(), sort, ctx).await
    }
    .await;
    respond(result, "OK")
}

pub async fn summary(
    State(service): State<Arc<BillingService>>,
    Path(id): Path<i64>,
    Query(params): Query<BillingParams>,
) -> Response {
    let result = async {
        let predicate = params.predicate()?;
        let ctx = service.pricing_context(params.forex, params.margin, params.vat)?;
        service.summary(id, predicate, ctx).await
    }
    .await;
    respond(result, "OK")
}

pub async fn top_customers(
    State(service): State<Arc<BillingService>>,
    Path(id): Path<i64>,
    Query(params): Query<BillingParams>,
) -> Response {
    let result = async {
        let predicate = params.predicate()?;
        service.top_customers(id, predicate, params.n.unwrap_or(10)).await
    }
    .await;
    respond(result, "OK")
}

pub async fn invoice_numbers(
    State(service): State<Arc<BillingService>>,
    Path(id): Path<i64>,
    Query(params): Query<BillingParams>,
) -> Response {
    let result = async {
        let predicate = params.predicate()?;
        service.list_invoice_numbers(id, predicate, params.limit).await
    }
    .await;
    respond(result, "OK")
}

/// 单个客户/域名的发票
pub async fn invoice(
    State(service): State<Arc<BillingService>>,
    Path(id): Path<i64>,
    Query(params): Query<BillingParams>,
) -> Response {
    let result = async {
        let ctx = service.pricing_context(params.forex, params.margin, params.vat)?;
        let request = InvoiceRequest {
            customer: params.customer.clone().unwrap_or_default(),
            domain: params.domain.clone().unwrap_or_default(),
            invoice_number: params.invoice_number.clone(),
            search: params.search.clone(),
        };
        service.assemble_invoice(id, request, ctx).await
    }
    .await;
    respond(result, "OK")
}
