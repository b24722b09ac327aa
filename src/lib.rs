pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::AppConfig;
pub use db::create_pool;
pub use error::BillingError;
pub use service::BillingService;
