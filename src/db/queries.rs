use crate::models::{IngestReport, Upload, UploadRow, UploadStatus};
use chrono::Utc;
use sqlx::SqlitePool;

const UPLOAD_COLUMNS: &str = "id, filename, status, row_count, malformed_count, \
     pricing_pretax_total, billing_pretax_total, usage_start, usage_end, \
     store_path, error_message, created_at, completed_at";

/// 登记新上传, 状态为 pending
///
/// INSERT 执行完毕后再按 id 回读, 返回时其它连接已能看到该行。
pub async fn insert_upload(pool: &SqlitePool, filename: &str) -> Result<Upload, sqlx::Error> {
    let result = sqlx::query("INSERT INTO uploads (filename, status, created_at) VALUES (?, ?, ?)")
        .bind(filename)
        .bind(UploadStatus::Pending.as_str())
        .bind(Utc::now())
        .execute(pool)
        .await?;
    get_upload(pool, result.last_insert_rowid())
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// 查询单个上传
pub async fn get_upload(pool: &SqlitePool, id: i64) -> Result<Option<Upload>, sqlx::Error> {
    let row = sqlx::query_as::<_, UploadRow>(&format!(
        "SELECT {} FROM uploads WHERE id = ?",
        UPLOAD_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(Upload::try_from).transpose()
}

/// 上传列表, 新的在前
pub async fn list_uploads(pool: &SqlitePool) -> Result<Vec<Upload>, sqlx::Error> {
    let rows = sqlx::query_as::<_, UploadRow>(&format!(
        "SELECT {} FROM uploads ORDER BY id DESC",
        UPLOAD_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Upload::try_from).collect()
}

/// pending/failed -> processing 的条件更新, 返回是否抢占成功
///
/// 单条 UPDATE 完成比较和设置, 同一上传同一时刻只有一个导入者。
pub async fn try_claim_for_processing(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE uploads
        SET status = ?, error_message = NULL, completed_at = NULL
        WHERE id = ? AND status IN (?, ?)
        "#,
    )
    .bind(UploadStatus::Processing.as_str())
    .bind(id)
    .bind(UploadStatus::Pending.as_str())
    .bind(UploadStatus::Failed.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// processing -> ready, 写入统计信息
pub async fn mark_ready(
    pool: &SqlitePool,
    id: i64,
    report: &IngestReport,
    store_path: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE uploads
        SET status = ?,
            row_count = ?,
            malformed_count = ?,
            pricing_pretax_total = ?,
            billing_pretax_total = ?,
            usage_start = ?,
            usage_end = ?,
            store_path = ?,
            error_message = NULL,
            completed_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(UploadStatus::Ready.as_str())
    .bind(report.row_count as i64)
    .bind(report.malformed_count as i64)
    .bind(report.pricing_pretax_total)
    .bind(report.billing_pretax_total)
    .bind(report.usage_start)
    .bind(report.usage_end)
    .bind(store_path)
    .bind(Utc::now())
    .bind(id)
    .bind(UploadStatus::Processing.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// processing -> failed, 记录错误详情; 已写出的统计清零
pub async fn mark_failed(
    pool: &SqlitePool,
    id: i64,
    message: &str,
    malformed_count: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE uploads
        SET status = ?,
            row_count = 0,
            malformed_count = ?,
            pricing_pretax_total = 0,
            billing_pretax_total = 0,
            usage_start = NULL,
            usage_end = NULL,
            store_path = NULL,
            error_message = ?,
            completed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(UploadStatus::Failed.as_str())
    .bind(malformed_count as i64)
    .bind(message)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// 启动时把遗留的 processing 记录置为 failed, 返回这些上传的 id
pub async fn fail_interrupted(pool: &SqlitePool, message: &str) -> Result<Vec<i64>, sqlx::Error> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM uploads WHERE status = ? ORDER BY id")
        .bind(UploadStatus::Processing.as_str())
        .fetch_all(pool)
        .await?;
    for &id in &ids {
        mark_failed(pool, id, message, 0).await?;
    }
    Ok(ids)
}

/// 删除非 processing 状态的上传, 返回是否删除
pub async fn delete_upload(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM uploads WHERE id = ? AND status <> ?")
        .bind(id)
        .bind(UploadStatus::Processing.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::create_pool;
    use crate::test_util::date;
    use tempfile::TempDir;

    async fn pool(dir: &TempDir) -> SqlitePool {
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("meta.db").display()),
            max_connections: 2,
        };
        create_pool(&config).await.unwrap()
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_failure() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let upload = insert_upload(&pool, "usage.csv").await.unwrap();
        assert_eq!(upload.status, UploadStatus::Pending);

        assert!(try_claim_for_processing(&pool, upload.id).await.unwrap());
        assert!(!try_claim_for_processing(&pool, upload.id).await.unwrap());

        mark_failed(&pool, upload.id, "boom", 3).await.unwrap();
        let failed = get_upload(&pool, upload.id).await.unwrap().unwrap();
        assert_eq!(failed.status, UploadStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert_eq!(failed.malformed_count, 3);

        assert!(try_claim_for_processing(&pool, upload.id).await.unwrap());
    }

    #[tokio::test]
    async fn ready_uploads_keep_stats_and_cannot_be_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let upload = insert_upload(&pool, "usage.csv").await.unwrap();
        assert!(try_claim_for_processing(&pool, upload.id).await.unwrap());

        let report = IngestReport {
            row_count: 2,
            malformed_count: 1,
            pricing_pretax_total: 150.5,
            billing_pretax_total: 170.0,
            usage_start: Some(date(2024, 1, 1)),
            usage_end: Some(date(2024, 1, 31)),
        };
        mark_ready(&pool, upload.id, &report, "data/upload_1.parquet").await.unwrap();

        let ready = get_upload(&pool, upload.id).await.unwrap().unwrap();
        assert_eq!(ready.status, UploadStatus::Ready);
        assert_eq!(ready.row_count, 2);
        assert_eq!(ready.malformed_count, 1);
        assert_eq!(ready.usage_end, Some(date(2024, 1, 31)));
        assert!(ready.completed_at.is_some());
        assert!(!try_claim_for_processing(&pool, upload.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_delete_skips_processing() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let first = insert_upload(&pool, "a.csv").await.unwrap();
        let second = insert_upload(&pool, "b.csv").await.unwrap();

        let ids: Vec<i64> = list_uploads(&pool).await.unwrap().iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        assert!(try_claim_for_processing(&pool, second.id).await.unwrap());
        assert!(!delete_upload(&pool, second.id).await.unwrap());
        assert!(delete_upload(&pool, first.id).await.unwrap());
        assert!(get_upload(&pool, first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inserted_upload_is_visible_on_every_connection() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let mut ids = Vec::new();
        for name in ["a.csv", "b.csv", "c.csv"] {
            ids.push(insert_upload(&pool, name).await.unwrap().id);
        }
        // 两个连接交替使用, 每次都应看到全部行
        for _ in 0..4 {
            let listed: Vec<i64> = list_uploads(&pool).await.unwrap().iter().map(|u| u.id).collect();
            assert_eq!(listed, ids.iter().rev().copied().collect::<Vec<_>>());
        }
        for &id in &ids {
            assert!(try_claim_for_processing(&pool, id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn interrupted_processing_rows_become_failed() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let stuck = insert_upload(&pool, "a.csv").await.unwrap();
        let idle = insert_upload(&pool, "b.csv").await.unwrap();
        assert!(try_claim_for_processing(&pool, stuck.id).await.unwrap());

        let ids = fail_interrupted(&pool, "interrupted").await.unwrap();
        assert_eq!(ids, vec![stuck.id]);

        let stuck = get_upload(&pool, stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, UploadStatus::Failed);
        assert_eq!(stuck.error_message.as_deref(), Some("interrupted"));
        let idle = get_upload(&pool, idle.id).await.unwrap().unwrap();
        assert_eq!(idle.status, UploadStatus::Pending);
        assert!(try_claim_for_processing(&pool, stuck.id).await.unwrap());
    }
}
