//! 行情数据源接口。具体客户端（Yahoo 等）在本 crate 之外实现。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::common::error::MarketDataError;

#[derive(Debug, Clone)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// 行情数据源。失败以 [`MarketDataError`] 表示，监控任务将其
/// 视为跳过本轮而非任务失败。
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// 批量获取当前价格快照，缺数据的代码允许从返回映射中省略。
    async fn fetch_current(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, PriceSnapshot>, MarketDataError>;

    /// 获取单个代码最近 `window_days` 天的历史 K 线，按时间升序。
    async fn fetch_history(
        &self,
        symbol: &str,
        window_days: usize,
    ) -> Result<Vec<PriceBar>, MarketDataError>;
}

/// 空数据源：永远返回"数据不可用"。用于只校验配置的干跑模式，
/// 所有监控周期都会被跳过。
pub struct NullMarketData;

#[async_trait]
impl MarketDataSource for NullMarketData {
    async fn fetch_current(
        &self,
        _symbols: &[String],
    ) -> Result<HashMap<String, PriceSnapshot>, MarketDataError> {
        Err(MarketDataError::Unavailable(
            "未接入行情数据源".to_string(),
        ))
    }

    async fn fetch_history(
        &self,
        _symbol: &str,
        _window_days: usize,
    ) -> Result<Vec<PriceBar>, MarketDataError> {
        Err(MarketDataError::Unavailable(
            "未接入行情数据源".to_string(),
        ))
    }
}
