//! 配置解析器：系统默认值 + 用户覆盖 -> 每用户有效配置。
//!
//! 合并是逐字段的：用户显式设置的字段生效，未设置的字段继承系统
//! 默认值；`signal_weights` 按键深合并。有效配置按值持有全部数据，
//! 之后对默认值或股票池的修改不会回溯影响已解析的快照。

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::common::error::ConfigError;
use crate::config::pools::StockPoolRegistry;
use crate::config::system::{FluctuationOverrides, SystemDefaults, TrendOverrides};
use crate::config::user::UserConfig;

// 代码内兜底默认值，与系统配置缺省时的行为一致。
// threshold_percent 故意没有兜底：启用波动监控却无阈值是配置错误。
const BUILTIN_NOTIFICATION_INTERVAL_MINUTES: u64 = 5;
const BUILTIN_FLUCTUATION_POLL_SECS: u64 = 60;
const BUILTIN_TREND_POLL_SECS: u64 = 1800;
const BUILTIN_HISTORY_WINDOW_DAYS: usize = 90;
const BUILTIN_TREND_CHANGE_THRESHOLD: u32 = 3;
const BUILTIN_SIGNAL_THRESHOLD: f64 = 0.8;
const BUILTIN_TREND_NOTIFICATION_INTERVAL_MINUTES: u64 = 60;
// 盘前盘后通知缺省开启
const BUILTIN_SESSION_NOTIFICATION: bool = true;

fn builtin_signal_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("ema_cross".to_string(), 0.3),
        ("macd_cross".to_string(), 0.2),
        ("adx_strength".to_string(), 0.2),
        ("bb_position".to_string(), 0.15),
        ("rsi_level".to_string(), 0.15),
    ])
}

/// 合并后的波动监控参数，全部字段已定值。
#[derive(Debug, Clone, PartialEq)]
pub struct FluctuationParams {
    pub threshold_percent: f64,
    pub notification_interval_minutes: u64,
    pub poll_interval_secs: u64,
}

/// 合并后的趋势监控参数。
#[derive(Debug, Clone, PartialEq)]
pub struct TrendParams {
    pub poll_interval_secs: u64,
    pub history_window_days: usize,
    pub up_trend_threshold: u32,
    pub down_trend_threshold: u32,
    pub buy_signal_threshold: f64,
    pub sell_signal_threshold: f64,
    pub notification_interval_minutes: u64,
    pub pre_market_notification: bool,
    pub post_market_notification: bool,
    pub signal_weights: HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveFluctuation {
    pub symbols: Vec<String>,
    pub params: FluctuationParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveTrend {
    pub symbols: Vec<String>,
    pub params: TrendParams,
}

/// 某个用户完全解析后的有效配置。
///
/// 派生数据，从不持久化；系统默认值或用户配置变化时重新计算。
/// 禁用的分区在这里是 `None`，永远不会产生监控任务。
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveUserConfig {
    pub user_key: String,
    pub fluctuation: Option<EffectiveFluctuation>,
    pub trend: Option<EffectiveTrend>,
}

impl EffectiveUserConfig {
    /// 用户是否完全休眠（两个分区都未启用）。
    pub fn is_dormant(&self) -> bool {
        self.fluctuation.is_none() && self.trend.is_none()
    }
}

/// 配置解析器，持有一份不可变的股票池注册表快照。
pub struct ConfigResolver {
    pools: Arc<StockPoolRegistry>,
}

impl ConfigResolver {
    pub fn new(pools: Arc<StockPoolRegistry>) -> Self {
        Self { pools }
    }

    /// 解析单个用户的有效配置。
    ///
    /// 两个监控分区独立处理：禁用的分区直接省略；股票来源经注册表
    /// 展开；参数逐字段合并。任一分区出错整体返回 `Err`。
    pub fn resolve(
        &self,
        defaults: &SystemDefaults,
        user_key: &str,
        user: &UserConfig,
    ) -> Result<EffectiveUserConfig, ConfigError> {
        let fluctuation = match &user.fluctuation {
            Some(section) if section.enabled => Some(EffectiveFluctuation {
                symbols: self.pools.resolve(&section.symbols)?,
                params: merge_fluctuation(&defaults.fluctuation, &section.overrides, user_key)?,
            }),
            _ => None,
        };

        let trend = match &user.trend {
            Some(section) if section.enabled => Some(EffectiveTrend {
                symbols: self.pools.resolve(&section.symbols)?,
                params: merge_trend(&defaults.trend, &section.overrides),
            }),
            _ => None,
        };

        Ok(EffectiveUserConfig {
            user_key: user_key.to_string(),
            fluctuation,
            trend,
        })
    }

    /// 宽容解析：出错的分区记录诊断日志后按禁用处理，不让单个
    /// 用户的坏配置阻断其他用户。热重载路径使用这个变体。
    pub fn resolve_lenient(
        &self,
        defaults: &SystemDefaults,
        user_key: &str,
        user: &UserConfig,
    ) -> EffectiveUserConfig {
        let fluctuation = match &user.fluctuation {
            Some(section) if section.enabled => {
                match self.resolve_fluctuation(defaults, user_key, section) {
                    Ok(effective) => Some(effective),
                    Err(err) => {
                        warn!("用户 {} 的波动监控配置无效，该分区已禁用: {}", user_key, err);
                        None
                    }
                }
            }
            _ => None,
        };

        let trend = match &user.trend {
            Some(section) if section.enabled => match self.pools.resolve(&section.symbols) {
                Ok(symbols) => Some(EffectiveTrend {
                    symbols,
                    params: merge_trend(&defaults.trend, &section.overrides),
                }),
                Err(err) => {
                    warn!("用户 {} 的趋势监控配置无效，该分区已禁用: {}", user_key, err);
                    None
                }
            },
            _ => None,
        };

        EffectiveUserConfig {
            user_key: user_key.to_string(),
            fluctuation,
            trend,
        }
    }

    fn resolve_fluctuation(
        &self,
        defaults: &SystemDefaults,
        user_key: &str,
        section: &crate::config::user::FluctuationSection,
    ) -> Result<EffectiveFluctuation, ConfigError> {
        Ok(EffectiveFluctuation {
            symbols: self.pools.resolve(&section.symbols)?,
            params: merge_fluctuation(&defaults.fluctuation, &section.overrides, user_key)?,
        })
    }
}

fn merge_fluctuation(
    defaults: &FluctuationOverrides,
    user: &FluctuationOverrides,
    user_key: &str,
) -> Result<FluctuationParams, ConfigError> {
    let threshold_percent = user
        .threshold_percent
        .or(defaults.threshold_percent)
        .ok_or_else(|| ConfigError::Validation {
            user: user_key.to_string(),
            kind: "fluctuation".to_string(),
            field: "threshold_percent",
        })?;

    Ok(FluctuationParams {
        threshold_percent,
        notification_interval_minutes: user
            .notification_interval_minutes
            .or(defaults.notification_interval_minutes)
            .unwrap_or(BUILTIN_NOTIFICATION_INTERVAL_MINUTES),
        poll_interval_secs: user
            .poll_interval_secs
            .or(defaults.poll_interval_secs)
            .unwrap_or(BUILTIN_FLUCTUATION_POLL_SECS),
    })
}

fn merge_trend(defaults: &TrendOverrides, user: &TrendOverrides) -> TrendParams {
    // 权重按键深合并：内置 <- 系统默认 <- 用户覆盖
    let mut signal_weights = builtin_signal_weights();
    signal_weights.extend(defaults.signal_weights.clone());
    signal_weights.extend(user.signal_weights.clone());

    TrendParams {
        poll_interval_secs: user
            .poll_interval_secs
            .or(defaults.poll_interval_secs)
            .unwrap_or(BUILTIN_TREND_POLL_SECS),
        history_window_days: user
            .history_window_days
            .or(defaults.history_window_days)
            .unwrap_or(BUILTIN_HISTORY_WINDOW_DAYS),
        up_trend_threshold: user
            .up_trend_threshold
            .or(defaults.up_trend_threshold)
            .unwrap_or(BUILTIN_TREND_CHANGE_THRESHOLD),
        down_trend_threshold: user
            .down_trend_threshold
            .or(defaults.down_trend_threshold)
            .unwrap_or(BUILTIN_TREND_CHANGE_THRESHOLD),
        buy_signal_threshold: user
            .buy_signal_threshold
            .or(defaults.buy_signal_threshold)
            .unwrap_or(BUILTIN_SIGNAL_THRESHOLD),
        sell_signal_threshold: user
            .sell_signal_threshold
            .or(defaults.sell_signal_threshold)
            .unwrap_or(BUILTIN_SIGNAL_THRESHOLD),
        notification_interval_minutes: user
            .notification_interval_minutes
            .or(defaults.notification_interval_minutes)
            .unwrap_or(BUILTIN_TREND_NOTIFICATION_INTERVAL_MINUTES),
        pre_market_notification: user
            .pre_market_notification
            .or(defaults.pre_market_notification)
            .unwrap_or(BUILTIN_SESSION_NOTIFICATION),
        post_market_notification: user
            .post_market_notification
            .or(defaults.post_market_notification)
            .unwrap_or(BUILTIN_SESSION_NOTIFICATION),
        signal_weights,
    }
}
