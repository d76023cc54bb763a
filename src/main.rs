//! 主程序入口：加载双 YAML 配置，构建多用户监控管理器，
//! 监视配置文件变更并热重载，Ctrl+C 优雅停止。
//!
//! 行情数据源、通知渠道与趋势分析器是外部协作方；这里接入的是
//! 空实现（只校验配置并跑调度骨架），真实部署时替换为具体实现。

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

use rago_alert::common::logging::init_logging;
use rago_alert::config::watcher::{ConfigUpdate, ConfigWatcher};
use rago_alert::config::{SystemConfig, UsersConfig};
use rago_alert::monitor::analysis::NullAnalyzer;
use rago_alert::monitor::market::NullMarketData;
use rago_alert::monitor::notify::LogNotifier;
use rago_alert::monitor::MultiUserMonitorManager;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // 启动时的配置加载失败是致命错误
    let system = SystemConfig::load()?;
    let users = UsersConfig::load()?;

    init_logging(&system.system.log_level);
    info!("🚀 RagoAlert 多用户监控核心启动");
    info!(
        "配置文件: {} / {}",
        SystemConfig::path().display(),
        UsersConfig::path().display()
    );

    let mut manager = MultiUserMonitorManager::new(
        &system,
        Arc::new(NullMarketData),
        Arc::new(LogNotifier),
        Arc::new(NullAnalyzer),
    );
    manager.apply_config(&system, &users).await;
    info!("监控状态: {}", manager.status());

    // 配置变更监视：重载结果经通道整体下发
    let (update_tx, mut update_rx) = mpsc::channel::<ConfigUpdate>(4);
    let watcher = ConfigWatcher::new(
        SystemConfig::path(),
        UsersConfig::path(),
        system.monitor.config_poll_interval(),
    );
    tokio::spawn(watcher.run(update_tx));

    loop {
        tokio::select! {
            Some(update) = update_rx.recv() => {
                manager.apply_config(&update.system, &update.users).await;
                info!("监控状态: {}", manager.status());
            }
            _ = signal::ctrl_c() => {
                info!("收到停止信号，正在关闭...");
                break;
            }
        }
    }

    manager.shutdown().await;
    info!("✅ 服务已停止");
    Ok(())
}
