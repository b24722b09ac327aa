use crate::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{ConnectOptions, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

/// uploads 表, 启动时按需创建
const CREATE_UPLOADS: &str = r#"
CREATE TABLE IF NOT EXISTS uploads (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    filename             TEXT    NOT NULL,
    status               TEXT    NOT NULL DEFAULT 'pending',
    row_count            INTEGER NOT NULL DEFAULT 0,
    malformed_count      INTEGER NOT NULL DEFAULT 0,
    pricing_pretax_total REAL    NOT NULL DEFAULT 0,
    billing_pretax_total REAL    NOT NULL DEFAULT 0,
    usage_start          TEXT,
    usage_end            TEXT,
    store_path           TEXT,
    error_message        TEXT,
    created_at           TEXT    NOT NULL,
    completed_at         TEXT
)
"#;

/// 创建元数据库连接池并初始化表结构
pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool, sqlx::Error> {
    let mut connect_options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let filename = connect_options.clone().get_filename();
    if let Some(parent) = filename.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // 设置慢查询日志阈值为 5秒
    connect_options = connect_options.log_slow_statements(
        tracing::log::LevelFilter::Warn,
        Duration::from_secs(5),
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await?;

    sqlx::query(CREATE_UPLOADS).execute(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_missing_parent_directories_and_table() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("nested").join("meta").join("billing.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", db.display()),
            max_connections: 1,
        };
        let pool = create_pool(&config).await.unwrap();
        assert!(db.exists());

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM uploads")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
