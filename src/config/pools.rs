//! 股票池注册表：系统级命名股票列表，支持 `@名称` 引用展开。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::error::ConfigError;

/// 监控分区的股票来源：字面列表或股票池引用。
///
/// YAML 中既可以写成序列，也可以写成 `"@us_tech"` 这样的引用字符串。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SymbolSource {
    List(Vec<String>),
    Reference(String),
}

impl Default for SymbolSource {
    fn default() -> Self {
        SymbolSource::List(Vec::new())
    }
}

/// 系统配置加载时构建的股票池快照。
///
/// 两次重载之间不可变；重载时整体替换为新的注册表，
/// 解析过程永远不会读到半更新状态。
#[derive(Debug, Clone, Default)]
pub struct StockPoolRegistry {
    pools: HashMap<String, Vec<String>>,
}

impl StockPoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pools(pools: HashMap<String, Vec<String>>) -> Self {
        Self { pools }
    }

    /// 注册或替换一个股票池。
    pub fn define(&mut self, name: &str, symbols: Vec<String>) {
        self.pools.insert(name.to_string(), symbols);
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.pools.get(name).map(|v| v.as_slice())
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// 展开股票来源为具体代码列表。
    ///
    /// 字面列表按原顺序透传（重复项保留），列表内以 `@` 开头的
    /// 元素按池引用原位展开；`"@名称"` 字符串返回注册池的完整序列。
    /// 未注册的引用返回 [`ConfigError::UnknownPool`]，不降级为空列表。
    pub fn resolve(&self, source: &SymbolSource) -> Result<Vec<String>, ConfigError> {
        match source {
            SymbolSource::List(symbols) => {
                let mut expanded = Vec::with_capacity(symbols.len());
                for symbol in symbols {
                    if let Some(pool_name) = symbol.strip_prefix('@') {
                        expanded.extend(self.lookup(pool_name)?.iter().cloned());
                    } else {
                        expanded.push(symbol.clone());
                    }
                }
                Ok(expanded)
            }
            SymbolSource::Reference(reference) => {
                if let Some(pool_name) = reference.strip_prefix('@') {
                    Ok(self.lookup(pool_name)?.to_vec())
                } else {
                    // 单个字面代码写成字符串的情况
                    Ok(vec![reference.clone()])
                }
            }
        }
    }

    fn lookup(&self, pool_name: &str) -> Result<&[String], ConfigError> {
        self.pools
            .get(pool_name)
            .map(|v| v.as_slice())
            .ok_or_else(|| ConfigError::UnknownPool(pool_name.to_string()))
    }
}
