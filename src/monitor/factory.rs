//! 由有效配置构建监控任务集合。

use crate::config::resolver::EffectiveUserConfig;
use crate::monitor::task::MonitorTask;

pub struct UserMonitorFactory;

impl UserMonitorFactory {
    /// 为每个启用的监控分区构建恰好一个任务，已接好解析后的
    /// 股票列表与合并参数；任务不在这里启动。完全休眠的用户
    /// 返回空集合（管理器仍会跟踪该用户，等待后续重载）。
    pub fn build(effective: &EffectiveUserConfig) -> Vec<MonitorTask> {
        let mut tasks = Vec::new();
        if let Some(config) = &effective.fluctuation {
            tasks.push(MonitorTask::fluctuation(
                &effective.user_key,
                config.clone(),
            ));
        }
        if let Some(config) = &effective.trend {
            tasks.push(MonitorTask::trend(&effective.user_key, config.clone()));
        }
        tasks
    }
}
