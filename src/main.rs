use axum::{
    routing::{get, post},
    Router,
};
use csp_billing_rust::{api, create_pool, AppConfig, BillingService};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env()?;
    info!("Starting server with config: {:?}", config);

    std::fs::create_dir_all(&config.storage.processed_dir)?;

    // 创建元数据库连接池
    let pool = create_pool(&config.database).await?;
    info!("Database pool created");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    // 上次退出时未完成的导入会被标记为 failed
    let service = Arc::new(BillingService::open(pool, config).await?);

    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/uploads", get(api::list_uploads).post(api::create_upload))
        .route("/api/uploads/:id", get(api::get_upload).delete(api::delete_upload))
        .route("/api/uploads/:id/ingest", post(api::retry_ingest))
        .route("/api/uploads/:id/cancel", post(api::cancel_ingest))
        .route("/api/uploads/:id/records", get(api::query_records))
        .route("/api/uploads/:id/summary", get(api::summary))
        .route("/api/uploads/:id/top-customers", get(api::top_customers))
        .route("/api/uploads/:id/invoice-numbers", get(api::invoice_numbers))
        .route("/api/uploads/:id/invoice", get(api::invoice))
        .with_state(service)
        .layer(ServiceBuilder::new());

    // 启动服务器
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/uploads?filename=...          - 上传 CSV 并后台导入");
    info!("  GET  /api/uploads/:id/records           - 分页查询 (含计算列)");
    info!("  GET  /api/uploads/:id/summary           - 过滤结果汇总");
    info!("  GET  /api/uploads/:id/top-customers     - 客户账单排行");
    info!("  GET  /api/uploads/:id/invoice-numbers   - 发票号列表");
    info!("  GET  /api/uploads/:id/invoice           - 客户发票");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
