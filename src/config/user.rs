//! 用户配置：以邮箱为键的每用户监控设置。
//!
//! 文档路径由环境变量 `RAGOALERT_CONFIG` 指定。每个用户持有独立的
//! 波动、趋势两个子配置段；段内未设置的参数逐字段继承系统默认值。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::common::error::ConfigError;
use crate::config::pools::SymbolSource;
use crate::config::system::{FluctuationOverrides, TrendOverrides};

pub const USERS_CONFIG_ENV: &str = "RAGOALERT_CONFIG";
const DEFAULT_USERS_CONFIG_PATH: &str = "users_config.yaml";

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub name: String,
}

/// 波动监控段：启用标志 + 股票来源 + 参数覆盖。
///
/// 空的覆盖段表示"全部使用默认值"，不等于禁用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluctuationSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub symbols: SymbolSource,
    #[serde(flatten)]
    pub overrides: FluctuationOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub symbols: SymbolSource,
    #[serde(flatten)]
    pub overrides: TrendOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub profile: UserProfile,
    pub fluctuation: Option<FluctuationSection>,
    pub trend: Option<TrendSection>,
}

/// 全量用户配置：邮箱 -> 用户配置，按键有序保证遍历确定性。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsersConfig {
    #[serde(flatten)]
    pub users: BTreeMap<String, UserConfig>,
}

impl UsersConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: UsersConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// 环境变量指定的配置文件路径（未设置时用默认路径）。
    pub fn path() -> std::path::PathBuf {
        env::var(USERS_CONFIG_ENV)
            .unwrap_or_else(|_| DEFAULT_USERS_CONFIG_PATH.to_string())
            .into()
    }

    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::load_from_file(Self::path())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn get(&self, user_key: &str) -> Option<&UserConfig> {
        self.users.get(user_key)
    }
}
