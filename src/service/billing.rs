use crate::config::AppConfig;
use crate::db::queries;
use crate::error::BillingError;
use crate::models::{
    CustomerTotal, FilterPredicate, IngestReport, InvoiceDocument, PricingContext, QueryPage,
    RecordWindow, SortOrder, Upload, UploadStatus, UsageSummary,
};
use crate::service::ingestor::{IngestFailure, Ingestor};
use crate::service::invoice::{self, InvoiceScope};
use crate::service::{aggregation, query};
use crate::store::{self, StoreReader};
use dashmap::DashMap;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// 发票请求 (拥有所有权, 可跨线程传递)
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceRequest {
    pub customer: String,
    pub domain: String,
    pub invoice_number: Option<String>,
    pub search: Option<String>,
}

impl InvoiceRequest {
    pub fn scope(&self) -> InvoiceScope<'_> {
        InvoiceScope {
            customer: &self.customer,
            domain: &self.domain,
            invoice_number: self.invoice_number.as_deref(),
            search: self.search.as_deref(),
        }
    }
}

/// 账单服务: 上传生命周期 + 只读查询
///
/// 查询类操作对已封存的 store 无锁读取; 导入由 uploads.status 做互斥。
pub struct BillingService {
    pool: SqlitePool,
    config: AppConfig,
    ingestor: Ingestor,
    /// 正在导入的上传 -> 取消标记
    ingest_jobs: Arc<DashMap<i64, Arc<AtomicBool>>>,
}

/// 上次进程退出时仍在 processing 的上传所记录的错误
pub const INTERRUPTED_MESSAGE: &str = "ingestion interrupted before completion";

impl BillingService {
    pub fn new(pool: SqlitePool, config: AppConfig) -> Self {
        let ingestor = Ingestor::new(&config.storage);
        Self {
            pool,
            config,
            ingestor,
            ingest_jobs: Arc::new(DashMap::new()),
        }
    }

    /// 创建服务并回收上次中断的导入 (processing -> failed, 清理残留 store)
    pub async fn open(pool: SqlitePool, config: AppConfig) -> Result<Self, BillingError> {
        let service = Self::new(pool, config);
        service.recover_interrupted().await?;
        Ok(service)
    }

    async fn recover_interrupted(&self) -> Result<(), BillingError> {
        let ids = queries::fail_interrupted(&self.pool, INTERRUPTED_MESSAGE).await?;
        for id in &ids {
            if let Err(e) = store::discard(&self.config.store_path(*id)) {
                warn!("上传 {} 的残留 store 清理失败: {}", id, e);
            }
        }
        if !ids.is_empty() {
            warn!("{} 个中断的导入已标记为 failed: {:?}", ids.len(), ids);
        }
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 请求参数 -> 定价上下文, 缺省 vat 来自配置
    pub fn pricing_context(
        &self,
        forex: Option<f64>,
        margin: Option<f64>,
        vat: Option<f64>,
    ) -> Result<PricingContext, BillingError> {
        PricingContext::from_optional(forex, margin, vat, self.config.pricing.default_vat)
    }

    // ---------------------------------------------------------------
    // 上传记录
    // ---------------------------------------------------------------

    pub async fn register_upload(&self, filename: &str) -> Result<Upload, BillingError> {
        let upload = queries::insert_upload(&self.pool, filename).await?;
        info!("登记上传 {}: {}", upload.id, filename);
        Ok(upload)
    }

    pub async fn get_upload(&self, id: i64) -> Result<Upload, BillingError> {
        queries::get_upload(&self.pool, id)
            .await?
            .ok_or(BillingError::UploadNotFound(id))
    }

    pub async fn list_uploads(&self) -> Result<Vec<Upload>, BillingError> {
        Ok(queries::list_uploads(&self.pool).await?)
    }

    /// 删除上传记录及其 store 文件; processing 状态拒绝删除
    pub async fn delete_upload(&self, id: i64) -> Result<(), BillingError> {
        let upload = self.get_upload(id).await?;
        if upload.status == UploadStatus::Processing {
            return Err(BillingError::UploadBusy(id));
        }
        if !queries::delete_upload(&self.pool, id).await? {
            return Err(BillingError::UploadBusy(id));
        }

        let store_path = upload
            .store_path
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.store_path(id));
        store::discard(&store_path)?;
        let source = self.config.source_path(id);
        if source.exists() {
            if let Err(e) = std::fs::remove_file(&source) {
                warn!("上传 {} 的暂存文件删除失败: {}", id, e);
            }
        }
        info!("已删除上传 {}", id);
        Ok(())
    }

    // ---------------------------------------------------------------
    // 导入
    // ---------------------------------------------------------------

    /// 同步导入, 返回最终状态
    ///
    /// 导入期错误落在上传记录上 (failed + 错误详情), 不作为 Err 返回。
    /// 抢占和导入都在独立任务中运行, 调用方中途放弃等待也不会跳过最终状态的写入。
    pub async fn ingest(&self, id: i64, source: &Path) -> Result<UploadStatus, BillingError> {
        let job = self.ingest_job(id, source.to_path_buf());
        tokio::spawn(job.claim_and_run()).await?
    }

    /// 抢占成功后在后台导入, 立即返回
    pub async fn start_ingest(&self, id: i64, source: PathBuf) -> Result<(), BillingError> {
        let job = self.ingest_job(id, source);
        tokio::spawn(job.claim_and_start()).await?
    }

    /// 设置取消标记, 返回该上传是否正在导入
    pub fn cancel_ingest(&self, id: i64) -> bool {
        match self.ingest_jobs.get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                warn!("上传 {} 已请求取消导入", id);
                true
            }
            None => false,
        }
    }

    fn ingest_job(&self, id: i64, source: PathBuf) -> IngestJob {
        IngestJob {
            id,
            source,
            store_path: self.config.store_path(id),
            cancel: Arc::new(AtomicBool::new(false)),
            pool: self.pool.clone(),
            ingestor: self.ingestor.clone(),
            jobs: Arc::clone(&self.ingest_jobs),
        }
    }

    // ---------------------------------------------------------------
    // 只读查询
    // ---------------------------------------------------------------

    async fn ready_store(&self, id: i64) -> Result<StoreReader, BillingError> {
        let upload = self.get_upload(id).await?;
        if upload.status != UploadStatus::Ready {
            return Err(BillingError::UploadNotReady {
                id,
                status: upload.status,
            });
        }
        let path = upload
            .store_path
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.store_path(id));
        Ok(StoreReader::open(&path)?)
    }

    pub async fn query(
        &self,
        id: i64,
        predicate: FilterPredicate,
        window: RecordWindow,
        sort: SortOrder,
        ctx: PricingContext,
    ) -> Result<QueryPage, BillingError> {
        let store = self.ready_store(id).await?;
        let limits = self.config.query.clone();
        tokio::task::spawn_blocking(move || {
            query::run_query(&store, &predicate, window, sort, &ctx, &limits)
        })
        .await?
    }

    pub async fn summary(
        &self,
        id: i64,
        predicate: FilterPredicate,
        ctx: PricingContext,
    ) -> Result<UsageSummary, BillingError> {
        let store = self.ready_store(id).await?;
        tokio::task::spawn_blocking(move || aggregation::summarize(&store, &predicate, &ctx)).await?
    }

    pub async fn top_customers(
        &self,
        id: i64,
        predicate: FilterPredicate,
        n: usize,
    ) -> Result<Vec<CustomerTotal>, BillingError> {
        let store = self.ready_store(id).await?;
        tokio::task::spawn_blocking(move || aggregation::top_customers(&store, &predicate, n)).await?
    }

    /// 去重发票号; 未指定 limit 时取配置默认值
    pub async fn list_invoice_numbers(
        &self,
        id: i64,
        predicate: FilterPredicate,
        limit: Option<usize>,
    ) -> Result<Vec<String>, BillingError> {
        let store = self.ready_store(id).await?;
        let limit = limit.unwrap_or(self.config.query.default_invoice_list_limit);
        tokio::task::spawn_blocking(move || {
            aggregation::list_invoice_numbers(&store, &predicate, limit)
        })
        .await?
    }

    pub async fn assemble_invoice(
        &self,
        id: i64,
        request: InvoiceRequest,
        ctx: PricingContext,
    ) -> Result<InvoiceDocument, BillingError> {
        let store = self.ready_store(id).await?;
        tokio::task::spawn_blocking(move || {
            invoice::assemble_invoice(&store, id, request.scope(), &ctx)
        })
        .await?
    }
}

/// 一次已抢占的导入, 持有完成状态写回所需的全部资源
struct IngestJob {
    id: i64,
    source: PathBuf,
    store_path: PathBuf,
    cancel: Arc<AtomicBool>,
    pool: SqlitePool,
    ingestor: Ingestor,
    jobs: Arc<DashMap<i64, Arc<AtomicBool>>>,
}

impl IngestJob {
    /// pending/failed -> processing; 失败时给出具体原因
    async fn claim(&self) -> Result<(), BillingError> {
        if queries::try_claim_for_processing(&self.pool, self.id).await? {
            // 抢占成功后才登记, 不会覆盖正在运行的导入的取消标记
            self.jobs.insert(self.id, Arc::clone(&self.cancel));
            return Ok(());
        }
        match queries::get_upload(&self.pool, self.id).await? {
            None => Err(BillingError::UploadNotFound(self.id)),
            Some(upload) if upload.status == UploadStatus::Ready => {
                Err(BillingError::UploadAlreadyReady(self.id))
            }
            Some(_) => Err(BillingError::UploadBusy(self.id)),
        }
    }

    async fn claim_and_run(self) -> Result<UploadStatus, BillingError> {
        self.claim().await?;
        self.run().await
    }

    /// 返回时 cancel_ingest 已可命中该上传
    async fn claim_and_start(self) -> Result<(), BillingError> {
        self.claim().await?;
        let id = self.id;
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("上传 {} 后台导入异常: {}", id, e);
            }
        });
        Ok(())
    }

    async fn run(self) -> Result<UploadStatus, BillingError> {
        let id = self.id;
        let ingestor = self.ingestor.clone();
        let source = self.source.clone();
        let target = self.store_path.clone();
        let cancel = Arc::clone(&self.cancel);
        let started = Instant::now();
        info!("上传 {} 开始导入: {}", id, source.display());

        let outcome = tokio::task::spawn_blocking(move || {
            ingestor.ingest_file(id, &source, &target, &cancel)
        })
        .await
        .map_err(|e| IngestFailure::from(BillingError::from(e)))
        .and_then(|result| result);
        self.jobs.remove(&id);

        match outcome {
            Ok(report) => self.finish_ready(&report, started).await,
            Err(failure) => {
                self.finish_failed(&failure.error, failure.malformed_count).await?;
                Ok(UploadStatus::Failed)
            }
        }
    }

    async fn finish_ready(
        &self,
        report: &IngestReport,
        started: Instant,
    ) -> Result<UploadStatus, BillingError> {
        let path = self.store_path.to_string_lossy();
        if let Err(e) = queries::mark_ready(&self.pool, self.id, report, &path).await {
            let e = BillingError::from(e);
            self.finish_failed(&e, report.malformed_count).await?;
            return Err(e);
        }
        info!(
            "上传 {} 导入完成: 有效行 {}, 异常行 {}, 耗时 {:?}",
            self.id,
            report.row_count,
            report.malformed_count,
            started.elapsed()
        );
        Ok(UploadStatus::Ready)
    }

    async fn finish_failed(&self, cause: &BillingError, malformed: u64) -> Result<(), BillingError> {
        match cause {
            BillingError::Cancelled(_) => warn!("上传 {} 导入已取消", self.id),
            _ => error!("上传 {} 导入失败: {}", self.id, cause),
        }
        if let Err(e) = store::discard(&self.store_path) {
            warn!("上传 {} 的残留 store 清理失败: {}", self.id, e);
        }
        queries::mark_failed(&self.pool, self.id, &cause.to_string(), malformed).await?;
        Ok(())
    }
}
