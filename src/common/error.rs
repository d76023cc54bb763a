use std::time::Duration;
use thiserror::Error;

/// 配置层错误：股票池引用、字段校验、文件读取与解析。
///
/// 启动时的 `FileRead` / `YamlParse` 是致命错误；`UnknownPool` 和
/// `Validation` 只影响对应用户的对应监控分区。
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("未定义的股票池引用: @{0}")]
    UnknownPool(String),

    #[error("配置校验失败 [{user}/{kind}]: 缺少必填字段 {field}")]
    Validation {
        user: String,
        kind: String,
        field: &'static str,
    },

    #[error("读取配置文件失败: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("解析 YAML 配置失败: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("缺少必需的环境变量: {0}")]
    MissingEnvVar(String),
}

/// 行情数据获取错误，一律按"跳过本轮"处理，下一个周期重试。
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("行情数据不可用: {0}")]
    Unavailable(String),

    #[error("行情请求超时 ({0:?})")]
    Timeout(Duration),
}

/// 通知投递错误，单轮内至多重试一次，之后记录日志并丢弃。
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("通知投递失败: {0}")]
    Delivery(String),

    #[error("通知投递超时 ({0:?})")]
    Timeout(Duration),
}

/// 监控任务级别的不可恢复错误。
///
/// 在管理器边界被捕获：仅停止出错的任务本身，不影响其他任务。
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("监控数据异常: {0}")]
    InvalidData(String),

    #[error("配置类型不匹配: {0}")]
    KindMismatch(String),
}
