use crate::error::BillingError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FOREX: f64 = 1.0;
pub const DEFAULT_MARGIN: f64 = 1.0;
pub const DEFAULT_VAT: f64 = 1.12;

/// 请求级定价参数 (汇率 / 毛利 / 增值税乘数), 从不持久化
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingContext {
    forex: f64,
    margin: f64,
    vat: f64,
}

impl PricingContext {
    /// 任一乘数非正或非有限数时拒绝
    pub fn new(forex: f64, margin: f64, vat: f64) -> Result<Self, BillingError> {
        for (name, value) in [("forex", forex), ("margin", margin), ("vat", vat)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(BillingError::InvalidPricingContext(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        Ok(Self { forex, margin, vat })
    }

    /// 未提供的参数取默认值, vat 默认值来自配置
    pub fn from_optional(
        forex: Option<f64>,
        margin: Option<f64>,
        vat: Option<f64>,
        default_vat: f64,
    ) -> Result<Self, BillingError> {
        Self::new(
            forex.unwrap_or(DEFAULT_FOREX),
            margin.unwrap_or(DEFAULT_MARGIN),
            vat.unwrap_or(default_vat),
        )
    }

    pub fn forex(&self) -> f64 {
        self.forex
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn vat(&self) -> f64 {
        self.vat
    }
}

impl Default for PricingContext {
    fn default() -> Self {
        Self {
            forex: DEFAULT_FOREX,
            margin: DEFAULT_MARGIN,
            vat: DEFAULT_VAT,
        }
    }
}
