use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub pricing: PricingConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// 列式存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// parquet 文件目录
    pub processed_dir: PathBuf,
    /// 每批读取的行数 (决定导入时的内存上限)
    pub batch_size: usize,
    pub row_group_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub default_vat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub max_page_size: usize,
    /// "全部记录" 模式允许返回的最大行数
    pub max_all_records: usize,
    pub default_invoice_list_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://data/billing.db".to_string(),
                max_connections: 5,
            },
            storage: StorageConfig {
                processed_dir: PathBuf::from("data/warehouse"),
                batch_size: 50_000,
                row_group_size: 256_000,
            },
            pricing: PricingConfig { default_vat: 1.12 },
            query: QueryConfig {
                max_page_size: 5_000,
                max_all_records: 100_000,
                default_invoice_list_limit: 200,
            },
        }
    }
}

impl AppConfig {
    /// 加载配置: 默认值 -> billing.toml (可选) -> BILLING__* 环境变量
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        config::Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port as i64)?
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections as i64)?
            .set_default(
                "storage.processed_dir",
                defaults.storage.processed_dir.to_string_lossy().into_owned(),
            )?
            .set_default("storage.batch_size", defaults.storage.batch_size as i64)?
            .set_default("storage.row_group_size", defaults.storage.row_group_size as i64)?
            .set_default("pricing.default_vat", defaults.pricing.default_vat)?
            .set_default("query.max_page_size", defaults.query.max_page_size as i64)?
            .set_default("query.max_all_records", defaults.query.max_all_records as i64)?
            .set_default(
                "query.default_invoice_list_limit",
                defaults.query.default_invoice_list_limit as i64,
            )?
            .add_source(config::File::with_name("billing").required(false))
            .add_source(config::Environment::with_prefix("BILLING").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// 某次上传对应的 parquet 文件路径
    pub fn store_path(&self, upload_id: i64) -> PathBuf {
        self.storage
            .processed_dir
            .join(format!("upload_{}.parquet", upload_id))
    }

    /// 通过 HTTP 接收的原始 CSV 暂存路径
    pub fn source_path(&self, upload_id: i64) -> PathBuf {
        self.storage
            .processed_dir
            .join("incoming")
            .join(format!("upload_{}.csv", upload_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_path_is_per_upload() {
        let config = AppConfig::default();
        let path = config.store_path(42);
        assert!(path.ends_with("upload_42.parquet"));
        assert!(path.starts_with("data/warehouse"));
        assert!(config.source_path(42).ends_with("incoming/upload_42.csv"));
    }

    #[test]
    fn from_env_falls_back_to_defaults() {
        let config = AppConfig::from_env().expect("defaults should deserialize");
        assert!(config.storage.batch_size > 0);
        assert!(config.query.max_all_records >= config.query.max_page_size);
    }
}
