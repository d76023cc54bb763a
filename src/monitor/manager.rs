//! 多用户监控管理器：持有全部 (用户, 类型) -> 任务 的映射，在
//! 有界工作池上驱动任务调度，并以 diff-and-patch 的方式应用
//! 配置变更——改一个用户的阈值不应打断任何其他用户的监控节奏。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::common::error::{MarketDataError, NotificationError};
use crate::config::pools::StockPoolRegistry;
use crate::config::resolver::{ConfigResolver, EffectiveUserConfig};
use crate::config::system::SystemConfig;
use crate::config::user::UsersConfig;
use crate::monitor::analysis::TrendAnalyzer;
use crate::monitor::factory::UserMonitorFactory;
use crate::monitor::market::{MarketDataSource, PriceBar, PriceSnapshot};
use crate::monitor::notify::{NotificationMessage, NotificationSink};
use crate::monitor::session::{market_session, MarketSession};
use crate::monitor::task::{MonitorKind, MonitorTask, SectionConfig, TaskKey, TaskState};
use crate::monitor::CycleOutcome;

/// 行情源的超时装饰器：慢调用不能无限占用工作池。
struct BoundedMarket {
    inner: Arc<dyn MarketDataSource>,
    timeout: Duration,
}

#[async_trait]
impl MarketDataSource for BoundedMarket {
    async fn fetch_current(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, PriceSnapshot>, MarketDataError> {
        match time::timeout(self.timeout, self.inner.fetch_current(symbols)).await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout(self.timeout)),
        }
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        window_days: usize,
    ) -> Result<Vec<PriceBar>, MarketDataError> {
        match time::timeout(self.timeout, self.inner.fetch_history(symbol, window_days)).await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout(self.timeout)),
        }
    }
}

/// 通知端的超时装饰器。
struct BoundedSink {
    inner: Arc<dyn NotificationSink>,
    timeout: Duration,
}

#[async_trait]
impl NotificationSink for BoundedSink {
    async fn send(
        &self,
        user_key: &str,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError> {
        match time::timeout(self.timeout, self.inner.send(user_key, message)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout(self.timeout)),
        }
    }
}

/// 所有任务循环共享的上下文：有界工作池、外部协作方与交易时段判定。
struct TaskContext {
    workers: Semaphore,
    market: Arc<dyn MarketDataSource>,
    sink: Arc<dyn NotificationSink>,
    analyzer: Arc<dyn TrendAnalyzer>,
    timezone: Tz,
    market_hours_only: bool,
}

impl TaskContext {
    fn current_session(&self) -> MarketSession {
        if self.market_hours_only {
            market_session(Utc::now(), self.timezone)
        } else {
            MarketSession::Regular
        }
    }
}

struct TaskHandle {
    task: Arc<Mutex<MonitorTask>>,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    // 任务实例代号：原地重配不变，仅重建任务时递增
    generation: u64,
}

pub struct MultiUserMonitorManager {
    ctx: Arc<TaskContext>,
    tasks: HashMap<TaskKey, TaskHandle>,
    effective: HashMap<String, EffectiveUserConfig>,
    next_generation: u64,
}

impl MultiUserMonitorManager {
    pub fn new(
        system: &SystemConfig,
        market: Arc<dyn MarketDataSource>,
        sink: Arc<dyn NotificationSink>,
        analyzer: Arc<dyn TrendAnalyzer>,
    ) -> Self {
        let timezone: Tz = system.system.timezone.parse().unwrap_or_else(|_| {
            warn!(
                "无法识别时区 {}，按 America/New_York 处理",
                system.system.timezone
            );
            chrono_tz::America::New_York
        });
        let ctx = TaskContext {
            workers: Semaphore::new(system.monitor.worker_pool_size.max(1)),
            market: Arc::new(BoundedMarket {
                inner: market,
                timeout: system.monitor.fetch_timeout(),
            }),
            sink: Arc::new(BoundedSink {
                inner: sink,
                timeout: system.monitor.notify_timeout(),
            }),
            analyzer,
            timezone,
            market_hours_only: system.monitor.market_hours_only,
        };
        Self {
            ctx: Arc::new(ctx),
            tasks: HashMap::new(),
            effective: HashMap::new(),
            next_generation: 0,
        }
    }

    /// 应用一份完整的配置快照（启动与热重载共用同一条路径）。
    ///
    /// 先整体解析出每个用户的有效配置（解析失败的分区禁用并记录
    /// 诊断，不中断重载），再逐 (用户, 类型) 与当前任务集做 diff：
    /// 未变化的任务不触碰；变化的任务持锁原地重配（与该任务自己的
    /// 周期串行，运行历史保留）；新启用的创建并启动；取消启用或
    /// 用户删除的停止并移除。任务只会读到完整的不可变快照。
    pub async fn apply_config(&mut self, system: &SystemConfig, users: &UsersConfig) {
        let registry = Arc::new(StockPoolRegistry::from_pools(system.stock_pools.clone()));
        let resolver = ConfigResolver::new(registry);

        let mut desired: HashMap<String, EffectiveUserConfig> = HashMap::new();
        for (user_key, user_config) in &users.users {
            desired.insert(
                user_key.clone(),
                resolver.resolve_lenient(&system.defaults, user_key, user_config),
            );
        }

        let all_users: BTreeSet<String> = self
            .effective
            .keys()
            .chain(desired.keys())
            .cloned()
            .collect();

        for user_key in &all_users {
            match (self.effective.get(user_key).cloned(), desired.get(user_key)) {
                // 新用户：工厂批量构建该用户的全部任务
                (None, Some(new_cfg)) => {
                    for mut task in UserMonitorFactory::build(new_cfg) {
                        task.start();
                        let key = task.key().clone();
                        info!("创建并启动监控任务 {}", key);
                        self.spawn_started(key, task);
                    }
                }
                // 用户删除：停掉其全部任务
                (Some(_), None) => {
                    for kind in MonitorKind::ALL {
                        self.remove_task(&TaskKey::new(user_key, kind)).await;
                    }
                    info!("用户 {} 已删除，监控任务全部停止", user_key);
                }
                // 既有用户：逐分区 diff
                (Some(old_cfg), Some(new_cfg)) => {
                    for kind in MonitorKind::ALL {
                        self.reconcile_kind(user_key, kind, &old_cfg, new_cfg).await;
                    }
                }
                (None, None) => unreachable!(),
            }
        }

        self.effective = desired;
        info!(
            "配置应用完成: {} 个用户, {} 个监控任务",
            self.effective.len(),
            self.tasks.len()
        );
    }

    async fn reconcile_kind(
        &mut self,
        user_key: &str,
        kind: MonitorKind,
        old_cfg: &EffectiveUserConfig,
        new_cfg: &EffectiveUserConfig,
    ) {
        let key = TaskKey::new(user_key, kind);
        let old_section = section_of(old_cfg, kind);
        let new_section = section_of(new_cfg, kind);

        // 任务循环因不可恢复错误退出后，句柄仍留在映射里；先收割，
        // 让仍然启用的分区走下面的重建路径，而不是重配一个死实例
        if let Some(handle) = self.tasks.get(&key) {
            if handle.task.lock().await.state() == TaskState::Stopped {
                warn!("任务 {} 已因错误停止，收割旧实例", key);
                self.tasks.remove(&key);
            }
        }

        match (old_section, new_section) {
            (None, None) => {}
            (None, Some(section)) => {
                info!("新启用监控任务 {}", key);
                let mut task = build_task(user_key, section);
                task.start();
                self.spawn_started(key, task);
            }
            (Some(_), None) => {
                info!("监控分区取消启用，停止任务 {}", key);
                self.remove_task(&key).await;
            }
            (Some(old), Some(new)) if old == new => {
                if self.tasks.contains_key(&key) {
                    debug!("任务 {} 配置未变化，不触碰", key);
                } else {
                    // 配置没变但实例已停止（被收割），重建恢复监控
                    info!("任务 {} 配置未变化但实例已停止，重建", key);
                    let mut task = build_task(user_key, new);
                    task.start();
                    self.spawn_started(key, task);
                }
            }
            (Some(_), Some(new)) => {
                if let Some(handle) = self.tasks.get(&key) {
                    // 持锁等待可能在途的评估周期结束，再原地换配置
                    let mut guard = handle.task.lock().await;
                    match guard.reconfigure(new) {
                        Ok(()) => info!("任务 {} 已原地重配", key),
                        Err(err) => error!("任务 {} 重配失败: {}", key, err),
                    }
                } else {
                    // 任务此前因不可恢复错误停止，按新配置重建
                    warn!("任务 {} 不在运行集中，按新配置重建", key);
                    let mut task = build_task(user_key, new);
                    task.start();
                    self.spawn_started(key, task);
                }
            }
        }
    }

    fn spawn_started(&mut self, key: TaskKey, task: MonitorTask) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = Arc::new(Mutex::new(task));
        let join = tokio::spawn(run_loop(self.ctx.clone(), task.clone(), stop_rx));

        self.next_generation += 1;
        let handle = TaskHandle {
            task,
            stop_tx,
            join,
            generation: self.next_generation,
        };
        if let Some(previous) = self.tasks.insert(key.clone(), handle) {
            // 不应出现：同键任务被替换时确保旧循环退出
            warn!("任务 {} 被替换，旧实例停止", key);
            let _ = previous.stop_tx.send(true);
        }
    }

    /// 停止并移除一个任务。停止在下一个调度周期开始前生效，
    /// 在途的评估周期允许跑完，避免半截通知状态。
    async fn remove_task(&mut self, key: &TaskKey) {
        if let Some(handle) = self.tasks.remove(key) {
            let _ = handle.stop_tx.send(true);
            handle.task.lock().await.stop();
        }
    }

    /// 停止全部任务并等待任务循环退出。
    pub async fn shutdown(&mut self) {
        info!("正在停止全部监控任务...");
        let handles: Vec<TaskHandle> = self
            .tasks
            .drain()
            .map(|(_, handle)| {
                let _ = handle.stop_tx.send(true);
                handle
            })
            .collect();

        for handle in &handles {
            handle.task.lock().await.stop();
        }
        futures::future::join_all(handles.into_iter().map(|h| h.join)).await;
        self.effective.clear();
        info!("全部监控任务已停止");
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn has_task(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub async fn task_state(&self, key: &TaskKey) -> Option<TaskState> {
        let handle = self.tasks.get(key)?;
        Some(handle.task.lock().await.state())
    }

    /// 任务实例代号：原地重配不变，重建任务才会变化。
    pub fn task_generation(&self, key: &TaskKey) -> Option<u64> {
        self.tasks.get(key).map(|h| h.generation)
    }

    pub async fn last_notification(
        &self,
        key: &TaskKey,
        symbol: &str,
    ) -> Option<DateTime<Utc>> {
        let handle = self.tasks.get(key)?;
        handle.task.lock().await.last_notification(symbol)
    }

    pub fn effective_for(&self, user_key: &str) -> Option<&EffectiveUserConfig> {
        self.effective.get(user_key)
    }

    /// 监控状态快照。
    pub fn status(&self) -> serde_json::Value {
        let mut fluctuation_users: Vec<&str> = Vec::new();
        let mut trend_users: Vec<&str> = Vec::new();
        for key in self.tasks.keys() {
            match key.kind {
                MonitorKind::Fluctuation => fluctuation_users.push(&key.user_key),
                MonitorKind::Trend => trend_users.push(&key.user_key),
            }
        }
        fluctuation_users.sort_unstable();
        trend_users.sort_unstable();

        serde_json::json!({
            "users": self.effective.len(),
            "fluctuation_monitors": fluctuation_users.len(),
            "trend_monitors": trend_users.len(),
            "fluctuation_users": fluctuation_users,
            "trend_users": trend_users,
        })
    }
}

fn section_of(cfg: &EffectiveUserConfig, kind: MonitorKind) -> Option<SectionConfig> {
    match kind {
        MonitorKind::Fluctuation => cfg.fluctuation.clone().map(SectionConfig::Fluctuation),
        MonitorKind::Trend => cfg.trend.clone().map(SectionConfig::Trend),
    }
}

fn build_task(user_key: &str, section: SectionConfig) -> MonitorTask {
    match section {
        SectionConfig::Fluctuation(config) => MonitorTask::fluctuation(user_key, config),
        SectionConfig::Trend(config) => MonitorTask::trend(user_key, config),
    }
}

/// 单个任务的调度循环。
///
/// 每轮先按任务自己的评估间隔休眠，再从工作池取许可后持锁执行；
/// 同一任务的周期绝不与自身并发，也不与重配并发。停止信号在下一轮
/// 开始前生效。任务返回不可恢复错误时只停止该任务本身。
async fn run_loop(
    ctx: Arc<TaskContext>,
    task: Arc<Mutex<MonitorTask>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let key = task.lock().await.key().clone();

    loop {
        let interval = task.lock().await.poll_interval();
        tokio::select! {
            _ = time::sleep(interval) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
        }
        if *stop_rx.borrow() {
            break;
        }

        let _permit = match ctx.workers.acquire().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let mut guard = task.lock().await;
        match guard.state() {
            TaskState::Running => {}
            TaskState::Stopped => break,
            TaskState::Suspended => continue,
        }

        let session = ctx.current_session();
        match guard
            .run_cycle(session, ctx.market.as_ref(), ctx.sink.as_ref(), ctx.analyzer.as_ref())
            .await
        {
            Ok(CycleOutcome::Completed { notifications }) => {
                if notifications > 0 {
                    info!("任务 {} 本轮发送 {} 条通知", key, notifications);
                }
            }
            Ok(CycleOutcome::Skipped) => {
                debug!("任务 {} 本轮跳过", key);
            }
            Err(err) => {
                // 不可恢复错误只停掉本任务，不波及其他任务
                error!("任务 {} 发生不可恢复错误，已停止: {}", key, err);
                guard.stop();
                break;
            }
        }
    }

    task.lock().await.stop();
    debug!("任务 {} 调度循环退出", key);
}
