pub mod analysis;
pub mod factory;
pub mod fluctuation;
pub mod manager;
pub mod market;
pub mod notify;
pub mod session;
pub mod task;
pub mod trend;

pub use manager::MultiUserMonitorManager;
pub use task::{MonitorKind, MonitorTask, TaskKey, TaskState};

/// 单轮评估的结果。行情不可用算跳过而非失败，下一轮重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { notifications: usize },
    Skipped,
}
