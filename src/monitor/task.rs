//! 监控任务：每个 (用户, 监控类型) 一个，持有自己的有效配置与
//! 调度状态，可独立启停、原地重配。

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::common::error::MonitorError;
use crate::config::resolver::{EffectiveFluctuation, EffectiveTrend};
use crate::monitor::analysis::TrendAnalyzer;
use crate::monitor::fluctuation::FluctuationMonitor;
use crate::monitor::market::MarketDataSource;
use crate::monitor::notify::NotificationSink;
use crate::monitor::session::MarketSession;
use crate::monitor::trend::TrendMonitor;
use crate::monitor::CycleOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorKind {
    Fluctuation,
    Trend,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 2] = [MonitorKind::Fluctuation, MonitorKind::Trend];
}

impl std::fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorKind::Fluctuation => write!(f, "fluctuation"),
            MonitorKind::Trend => write!(f, "trend"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub user_key: String,
    pub kind: MonitorKind,
}

impl TaskKey {
    pub fn new(user_key: &str, kind: MonitorKind) -> Self {
        Self {
            user_key: user_key.to_string(),
            kind,
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_key, self.kind)
    }
}

/// 任务状态机: Stopped -> Running -> (重配时 Suspended) -> Running | Stopped。
/// Stopped 对一个任务实例是终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Stopped,
    Running,
    Suspended,
}

/// 重配时注入的单分区有效配置。
#[derive(Debug, Clone, PartialEq)]
pub enum SectionConfig {
    Fluctuation(EffectiveFluctuation),
    Trend(EffectiveTrend),
}

impl SectionConfig {
    pub fn kind(&self) -> MonitorKind {
        match self {
            SectionConfig::Fluctuation(_) => MonitorKind::Fluctuation,
            SectionConfig::Trend(_) => MonitorKind::Trend,
        }
    }
}

enum Evaluator {
    Fluctuation(FluctuationMonitor),
    Trend(TrendMonitor),
}

pub struct MonitorTask {
    key: TaskKey,
    state: TaskState,
    evaluator: Evaluator,
    last_run: Option<DateTime<Utc>>,
}

impl MonitorTask {
    /// 构造波动监控任务，初始状态 Stopped、未启动。
    pub fn fluctuation(user_key: &str, config: EffectiveFluctuation) -> Self {
        Self {
            key: TaskKey::new(user_key, MonitorKind::Fluctuation),
            state: TaskState::Stopped,
            evaluator: Evaluator::Fluctuation(FluctuationMonitor::new(user_key, config)),
            last_run: None,
        }
    }

    pub fn trend(user_key: &str, config: EffectiveTrend) -> Self {
        Self {
            key: TaskKey::new(user_key, MonitorKind::Trend),
            state: TaskState::Stopped,
            evaluator: Evaluator::Trend(TrendMonitor::new(user_key, config)),
            last_run: None,
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn last_notification(&self, symbol: &str) -> Option<DateTime<Utc>> {
        match &self.evaluator {
            Evaluator::Fluctuation(m) => m.last_notification(symbol),
            Evaluator::Trend(m) => m.last_notification(symbol),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        let secs = match &self.evaluator {
            Evaluator::Fluctuation(m) => m.poll_interval_secs(),
            Evaluator::Trend(m) => m.poll_interval_secs(),
        };
        Duration::from_secs(secs)
    }

    pub fn start(&mut self) {
        self.state = TaskState::Running;
    }

    pub fn stop(&mut self) {
        self.state = TaskState::Stopped;
    }

    /// 原地切换到新的有效配置。
    ///
    /// 调用方持有任务锁，因此与本任务自己的评估周期串行；
    /// 切换期间短暂进入 Suspended，运行历史（上次通知时间等）保留。
    pub fn reconfigure(&mut self, section: SectionConfig) -> Result<(), MonitorError> {
        let resume = self.state == TaskState::Running;
        self.state = TaskState::Suspended;

        let result = match (&mut self.evaluator, section) {
            (Evaluator::Fluctuation(m), SectionConfig::Fluctuation(config)) => {
                m.apply_config(config);
                Ok(())
            }
            (Evaluator::Trend(m), SectionConfig::Trend(config)) => {
                m.apply_config(config);
                Ok(())
            }
            (_, section) => Err(MonitorError::KindMismatch(format!(
                "任务 {} 收到 {} 配置",
                self.key,
                section.kind()
            ))),
        };

        self.state = if resume {
            TaskState::Running
        } else {
            TaskState::Stopped
        };
        result
    }

    /// 执行一轮评估并记录执行时间。
    pub async fn run_cycle(
        &mut self,
        session: MarketSession,
        market: &dyn MarketDataSource,
        sink: &dyn NotificationSink,
        analyzer: &dyn TrendAnalyzer,
    ) -> Result<CycleOutcome, MonitorError> {
        self.last_run = Some(Utc::now());
        match &mut self.evaluator {
            Evaluator::Fluctuation(m) => m.run_cycle(session, market, sink).await,
            Evaluator::Trend(m) => m.run_cycle(session, market, sink, analyzer).await,
        }
    }
}
