//! 系统配置：SMTP、Web、运行时参数、监控默认值与股票池定义。
//!
//! 对应 YAML 文档路径由环境变量 `RAGOALERT_SYSTEM_CONFIG` 指定，
//! 生产与开发环境指向不同文件，互不覆盖。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::common::error::ConfigError;

pub const SYSTEM_CONFIG_ENV: &str = "RAGOALERT_SYSTEM_CONFIG";
const DEFAULT_SYSTEM_CONFIG_PATH: &str = "system_config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub sender_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "smtp.gmail.com".to_string(),
            port: 465,
            user: String::new(),
            password: String::new(),
            sender_name: "RagoAlert".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub log_level: String,
    pub timezone: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            // 交易时段判定所用的交易所时区
            timezone: "America/New_York".to_string(),
        }
    }
}

/// 监控调度的运行时参数：工作池大小与外部调用超时。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorRuntimeConfig {
    /// 并发评估上限（工作池大小）
    pub worker_pool_size: usize,
    /// 行情拉取超时（秒）
    pub fetch_timeout_secs: u64,
    /// 通知投递超时（秒）
    pub notify_timeout_secs: u64,
    /// 配置文件变更轮询间隔（秒）
    pub config_poll_secs: u64,
    /// 只在交易时段（含盘前盘后）评估，休市时暂停
    pub market_hours_only: bool,
}

impl Default for MonitorRuntimeConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 5,
            fetch_timeout_secs: 30,
            notify_timeout_secs: 30,
            config_poll_secs: 30,
            market_hours_only: true,
        }
    }
}

impl MonitorRuntimeConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn config_poll_interval(&self) -> Duration {
        Duration::from_secs(self.config_poll_secs)
    }
}

/// 波动监控参数的可选覆盖层。
///
/// 同一结构同时充当系统默认值（部分设置）和用户覆盖段：
/// 未设置的字段向下继承，逐字段合并，不做整段替换。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluctuationOverrides {
    pub threshold_percent: Option<f64>,
    pub notification_interval_minutes: Option<u64>,
    pub poll_interval_secs: Option<u64>,
}

/// 趋势监控参数的可选覆盖层，`signal_weights` 按键深合并。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendOverrides {
    pub poll_interval_secs: Option<u64>,
    pub history_window_days: Option<usize>,
    pub up_trend_threshold: Option<u32>,
    pub down_trend_threshold: Option<u32>,
    pub buy_signal_threshold: Option<f64>,
    pub sell_signal_threshold: Option<f64>,
    pub notification_interval_minutes: Option<u64>,
    pub pre_market_notification: Option<bool>,
    pub post_market_notification: Option<bool>,
    pub signal_weights: HashMap<String, f64>,
}

/// 系统级监控默认值，用户未覆盖的字段从这里继承。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemDefaults {
    pub fluctuation: FluctuationOverrides,
    pub trend: TrendOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SystemConfig {
    pub smtp: SmtpConfig,
    pub web: WebConfig,
    pub system: RuntimeConfig,
    pub monitor: MonitorRuntimeConfig,
    pub defaults: SystemDefaults,
    pub stock_pools: HashMap<String, Vec<String>>,
}

impl SystemConfig {
    /// 从 YAML 文件加载系统配置。
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config: SystemConfig = serde_yaml::from_str(&content)?;
        config.replace_env_vars()?;
        Ok(config)
    }

    /// 环境变量指定的配置文件路径（未设置时用默认路径）。
    pub fn path() -> std::path::PathBuf {
        env::var(SYSTEM_CONFIG_ENV)
            .unwrap_or_else(|_| DEFAULT_SYSTEM_CONFIG_PATH.to_string())
            .into()
    }

    /// 从环境变量指定的路径加载配置。
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::load_from_file(Self::path())
    }

    /// 替换配置中的 `${VAR}` 形式环境变量（SMTP 凭据等敏感字段）。
    fn replace_env_vars(&mut self) -> Result<(), ConfigError> {
        self.smtp.user = replace_env_var(&self.smtp.user)?;
        self.smtp.password = replace_env_var(&self.smtp.password)?;
        Ok(())
    }
}

fn replace_env_var(s: &str) -> Result<String, ConfigError> {
    if s.starts_with("${") && s.ends_with('}') {
        let var_name = &s[2..s.len() - 1];
        env::var(var_name).map_err(|_| ConfigError::MissingEnvVar(var_name.to_string()))
    } else {
        Ok(s.to_string())
    }
}
